//! 스캔 저장소 -- 제품별 식별 정보와 스캔 이력 보관
//!
//! [`ScanStore`]는 비즈니스 로직이 없는 저장소 계약입니다. 모든 연산은
//! 단일 제품 범위이며, 제품 간 트랜잭션은 없습니다.
//!
//! [`MemoryScanStore`]는 제품 코드마다 독립된 `tokio::sync::Mutex`를 두어
//! 스캔 추가와 인시던트 저장을 제품 단위 원자적 갱신으로 처리합니다.
//! 외부 맵 락은 조회/삽입 동안에만 잡습니다.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use scanguard_core::types::{
    FraudIncident, LedgerErrorRecord, LedgerFailureKind, LedgerStatus, Product, ScanEvent,
};

use crate::error::StoreError;

/// 인시던트 원장 상태 갱신 내용
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentLedgerUpdate {
    /// 새 원장 상태
    pub status: LedgerStatus,
    /// 원장 참조 (확정 시)
    pub ledger_ref: Option<String>,
    /// 이번 제출 라운드에서 사용한 시도 횟수 (누적값에 더해짐)
    pub attempts: u32,
    /// 실패 기록 (None이면 기존 기록 유지)
    pub error: Option<LedgerErrorRecord>,
}

impl IncidentLedgerUpdate {
    /// 원장 확정
    pub fn confirmed(ledger_ref: impl Into<String>, attempts: u32) -> Self {
        Self {
            status: LedgerStatus::Confirmed,
            ledger_ref: Some(ledger_ref.into()),
            attempts,
            error: None,
        }
    }

    /// 최종 실패
    pub fn failed(kind: LedgerFailureKind, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            status: LedgerStatus::Failed,
            ledger_ref: None,
            attempts,
            error: Some(LedgerErrorRecord {
                kind,
                message: message.into(),
            }),
        }
    }

    /// 재제출 대기 상태로 되돌림
    pub fn pending() -> Self {
        Self {
            status: LedgerStatus::Pending,
            ledger_ref: None,
            attempts: 0,
            error: None,
        }
    }
}

/// 스캔 저장소 계약
pub trait ScanStore: Send + Sync + 'static {
    /// 새 제품을 등록합니다. 이미 존재하는 코드면 `Conflict`.
    fn insert_product(
        &self,
        product: Product,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// 제품 스냅샷을 조회합니다.
    fn product(&self, code: &str) -> impl Future<Output = Result<Product, StoreError>> + Send;

    /// 스캔을 원자적으로 추가합니다. 기존 이벤트 순서는 바뀌지 않습니다.
    fn append_scan(
        &self,
        code: &str,
        location: &str,
        actor: Option<&str>,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<ScanEvent, StoreError>> + Send;

    /// `since` 이후(포함)의 스캔을 시간 오름차순으로 반환합니다.
    fn recent_scans(
        &self,
        code: &str,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<ScanEvent>, StoreError>> + Send;

    /// 인시던트를 저장하고 제품을 위조로 표시합니다.
    ///
    /// 제품이 이미 위조로 표시되어 있으면 (열린 인시던트 여부와 무관하게)
    /// `Conflict`를 반환합니다. 제품당 인시던트는 최대 하나입니다.
    fn persist_incident(
        &self,
        code: &str,
        incident: FraudIncident,
    ) -> impl Future<Output = Result<FraudIncident, StoreError>> + Send;

    /// 인시던트의 원장 추적 필드를 갱신합니다. 확정된 인시던트는 변경되지 않습니다.
    fn update_incident_ledger_status(
        &self,
        code: &str,
        incident_id: &str,
        update: IncidentLedgerUpdate,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// 원장 미확정 인시던트를 (제품 코드, 인시던트) 쌍으로 반환합니다.
    fn unconfirmed_incidents(
        &self,
    ) -> impl Future<Output = Result<Vec<(String, FraudIncident)>, StoreError>> + Send;
}

type ProductSlot = Arc<Mutex<Product>>;

/// 인메모리 스캔 저장소
#[derive(Debug, Default)]
pub struct MemoryScanStore {
    products: RwLock<HashMap<String, ProductSlot>>,
}

impl MemoryScanStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 스냅샷에서 저장소를 복원합니다.
    ///
    /// 중복 코드, 위조 플래그/인시던트 불일치, 열린 인시던트 중복을 거부합니다.
    pub fn restore(products: Vec<Product>) -> Result<Self, StoreError> {
        let mut map = HashMap::with_capacity(products.len());
        for product in products {
            if product.counterfeit != !product.incidents.is_empty() {
                return Err(StoreError::Corrupt(format!(
                    "product '{}' counterfeit flag does not match its incidents",
                    product.code
                )));
            }
            if product.incidents.iter().filter(|i| i.is_open()).count() > 1 {
                return Err(StoreError::Corrupt(format!(
                    "product '{}' has more than one open incident",
                    product.code
                )));
            }
            if product
                .scans
                .windows(2)
                .any(|pair| pair[1].occurred_at < pair[0].occurred_at)
            {
                return Err(StoreError::Corrupt(format!(
                    "product '{}' scan history is out of order",
                    product.code
                )));
            }
            let code = product.code.clone();
            if map
                .insert(code.clone(), Arc::new(Mutex::new(product)))
                .is_some()
            {
                return Err(StoreError::Corrupt(format!("duplicate product code '{code}'")));
            }
        }
        Ok(Self {
            products: RwLock::new(map),
        })
    }

    /// 모든 제품의 스냅샷을 코드 순으로 반환합니다.
    pub async fn snapshot(&self) -> Vec<Product> {
        let slots: Vec<ProductSlot> = self.products.read().await.values().cloned().collect();
        let mut products = Vec::with_capacity(slots.len());
        for slot in slots {
            products.push(slot.lock().await.clone());
        }
        products.sort_by(|a, b| a.code.cmp(&b.code));
        products
    }

    /// 등록된 제품 수
    pub async fn product_count(&self) -> usize {
        self.products.read().await.len()
    }

    async fn slot(&self, code: &str) -> Result<ProductSlot, StoreError> {
        self.products
            .read()
            .await
            .get(code)
            .cloned()
            .ok_or_else(|| StoreError::ProductNotFound(code.to_owned()))
    }
}

impl ScanStore for MemoryScanStore {
    async fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        let mut products = self.products.write().await;
        if products.contains_key(&product.code) {
            return Err(StoreError::Conflict {
                code: product.code,
                reason: "product code already registered".to_owned(),
            });
        }
        products.insert(product.code.clone(), Arc::new(Mutex::new(product)));
        Ok(())
    }

    async fn product(&self, code: &str) -> Result<Product, StoreError> {
        let slot = self.slot(code).await?;
        let product = slot.lock().await;
        Ok(product.clone())
    }

    async fn append_scan(
        &self,
        code: &str,
        location: &str,
        actor: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<ScanEvent, StoreError> {
        let slot = self.slot(code).await?;
        let mut product = slot.lock().await;

        // 시계가 뒤로 가도 이력 순서가 바뀌지 않도록 마지막 스캔 시각으로 올림
        let occurred_at = match product.last_scan() {
            Some(last) if at < last.occurred_at => {
                debug!(
                    product_code = code,
                    requested = %at,
                    clamped_to = %last.occurred_at,
                    "scan timestamp older than history, clamping"
                );
                last.occurred_at
            }
            _ => at,
        };

        let scan = ScanEvent::new(occurred_at, location, actor.map(str::to_owned));
        product.scans.push(scan.clone());
        Ok(scan)
    }

    async fn recent_scans(
        &self,
        code: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ScanEvent>, StoreError> {
        let slot = self.slot(code).await?;
        let product = slot.lock().await;
        let start = product.scans.partition_point(|scan| scan.occurred_at < since);
        Ok(product.scans[start..].to_vec())
    }

    async fn persist_incident(
        &self,
        code: &str,
        incident: FraudIncident,
    ) -> Result<FraudIncident, StoreError> {
        let slot = self.slot(code).await?;
        let mut product = slot.lock().await;

        // 위조 표시는 되돌려지지 않으므로 확정된 인시던트가 있어도 새 인시던트는 없음
        if product.counterfeit {
            let reason = match product.open_incident() {
                Some(open) => format!("incident {} is still open", open.id),
                None => "product already flagged as counterfeit".to_owned(),
            };
            return Err(StoreError::Conflict {
                code: code.to_owned(),
                reason,
            });
        }

        product.counterfeit = true;
        product.incidents.push(incident.clone());
        Ok(incident)
    }

    async fn update_incident_ledger_status(
        &self,
        code: &str,
        incident_id: &str,
        update: IncidentLedgerUpdate,
    ) -> Result<(), StoreError> {
        let slot = self.slot(code).await?;
        let mut product = slot.lock().await;

        let incident = product
            .incidents
            .iter_mut()
            .find(|i| i.id == incident_id)
            .ok_or_else(|| StoreError::IncidentNotFound {
                product_code: code.to_owned(),
                incident_id: incident_id.to_owned(),
            })?;

        if incident.ledger_status == LedgerStatus::Confirmed {
            debug!(
                product_code = code,
                incident_id = incident_id,
                requested = %update.status,
                "incident already confirmed, ignoring ledger status update"
            );
            return Ok(());
        }

        incident.ledger_status = update.status;
        incident.ledger_attempts = incident.ledger_attempts.saturating_add(update.attempts);
        if update.ledger_ref.is_some() {
            incident.ledger_ref = update.ledger_ref;
        }
        match (update.status, update.error) {
            (LedgerStatus::Confirmed, _) => incident.last_ledger_error = None,
            (_, Some(error)) => incident.last_ledger_error = Some(error),
            (_, None) => {}
        }
        Ok(())
    }

    async fn unconfirmed_incidents(&self) -> Result<Vec<(String, FraudIncident)>, StoreError> {
        let slots: Vec<(String, ProductSlot)> = self
            .products
            .read()
            .await
            .iter()
            .map(|(code, slot)| (code.clone(), Arc::clone(slot)))
            .collect();

        let mut open = Vec::new();
        for (code, slot) in slots {
            let product = slot.lock().await;
            for incident in product.incidents.iter().filter(|i| i.is_open()) {
                open.push((code.clone(), incident.clone()));
            }
        }
        open.sort_by(|a, b| a.1.detected_at.cmp(&b.1.detected_at));
        Ok(open)
    }
}
