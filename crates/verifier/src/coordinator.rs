//! 스캔 코디네이터 -- 스캔 기록, 이상 탐지, 인시던트 발생의 요청 경로
//!
//! ```text
//! record_scan ─> ScanStore::recent_scans ─> ScanStore::append_scan
//!                                               │
//!                                               v
//!                                   AnomalyDetector::evaluate
//!                                               │ flagged
//!                                               v
//!                  ScanStore::persist_incident (제품당 승자 하나)
//!                                               │ winner
//!                         ReportNotifier::attach + IncidentEvent ──mpsc──> LedgerWorker
//! ```
//!
//! 원장 제출은 요청 경로 밖에서 수행되므로 원장 지연이나 장애가
//! 스캔 응답 시간에 영향을 주지 않습니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use scanguard_core::event::IncidentEvent;
use scanguard_core::metrics as m;
use scanguard_core::types::{
    FraudIncident, LedgerStatus, ManufacturerReportEntry, Product, ScanEvent,
};

use crate::clock::Clock;
use crate::detector::{AnomalyDetector, Verdict};
use crate::error::{StoreError, VerifierError};
use crate::ledger::{LedgerClient, LedgerPayload, LedgerRecord, LedgerRef};
use crate::notifier::ReportNotifier;
use crate::store::ScanStore;

/// 위조 판정된 제품 스캔 시 경고 문구
pub const COUNTERFEIT_WARNING: &str =
    "this product has been flagged as counterfeit; do not trust its authenticity";

/// 스캔 기록 결과
#[derive(Debug, Clone, Serialize)]
pub struct ScanVerification {
    /// 제품 코드
    pub product_code: String,
    /// 기록된 스캔
    pub scan: ScanEvent,
    /// 현재 위조 판정 여부
    pub counterfeit: bool,
    /// 사용자에게 보여줄 경고
    pub warning: Option<String>,
    /// 탐지 결과 (이미 위조 판정된 제품이면 None)
    pub verdict: Option<Verdict>,
    /// 이번 스캔으로 발생한 인시던트
    pub raised_incident: Option<FraudIncident>,
}

/// 제품 조회 결과 (읽기 전용)
#[derive(Debug, Clone, Serialize)]
pub struct ProductView {
    /// 제품 코드
    pub code: String,
    /// 제품명
    pub name: String,
    /// 배치 ID
    pub batch_id: String,
    /// 제조 시각 (epoch seconds)
    pub manufactured_at: i64,
    /// 만료 시각 (epoch seconds)
    pub expires_at: i64,
    /// 제조사 ID
    pub manufacturer_id: String,
    /// 위조 판정 여부
    pub counterfeit: bool,
    /// 조회 응답의 판정 플래그
    pub flagged: bool,
    /// 스캔 이력
    pub scans: Vec<ScanEvent>,
    /// 인시던트 이력
    pub incidents: Vec<FraudIncident>,
}

impl From<Product> for ProductView {
    fn from(product: Product) -> Self {
        Self {
            flagged: product.counterfeit,
            code: product.code,
            name: product.name,
            batch_id: product.batch_id,
            manufactured_at: product.manufactured_at,
            expires_at: product.expires_at,
            manufacturer_id: product.manufacturer_id,
            counterfeit: product.counterfeit,
            scans: product.scans,
            incidents: product.incidents,
        }
    }
}

/// 인시던트 원장 감사 결과
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    /// 제품 코드
    pub product_code: String,
    /// 인시던트 ID
    pub incident_id: String,
    /// 로컬 원장 상태
    pub local_status: LedgerStatus,
    /// 로컬에 저장된 원장 참조
    pub ledger_ref: Option<String>,
    /// 로컬 인시던트로 다시 계산한 페이로드 해시
    pub content_hash: String,
    /// 원장 조회 결과 (확정된 인시던트만 조회)
    pub record: Option<LedgerRecord>,
    /// 원장 해시와 로컬 해시 일치 여부 (원장이 해시를 제공할 때만)
    pub hash_matches: Option<bool>,
}

/// 스캔 코디네이터
pub struct ScanCoordinator<S, N, L> {
    store: Arc<S>,
    notifier: Arc<N>,
    ledger: Arc<L>,
    detector: AnomalyDetector,
    clock: Arc<dyn Clock>,
    incident_tx: mpsc::Sender<IncidentEvent>,
    scans_recorded: Arc<AtomicU64>,
    incidents_raised: Arc<AtomicU64>,
    raise_conflicts: Arc<AtomicU64>,
}

impl<S, N, L> ScanCoordinator<S, N, L>
where
    S: ScanStore,
    N: ReportNotifier,
    L: LedgerClient,
{
    /// 새 코디네이터를 생성합니다.
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        ledger: Arc<L>,
        detector: AnomalyDetector,
        clock: Arc<dyn Clock>,
        incident_tx: mpsc::Sender<IncidentEvent>,
    ) -> Self {
        Self {
            store,
            notifier,
            ledger,
            detector,
            clock,
            incident_tx,
            scans_recorded: Arc::new(AtomicU64::new(0)),
            incidents_raised: Arc::new(AtomicU64::new(0)),
            raise_conflicts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 기록된 스캔 수
    pub fn scans_recorded(&self) -> u64 {
        self.scans_recorded.load(Ordering::Relaxed)
    }

    /// 이 코디네이터가 발생시킨 인시던트 수
    pub fn incidents_raised(&self) -> u64 {
        self.incidents_raised.load(Ordering::Relaxed)
    }

    /// 경합에서 흡수된 인시던트 발생 시도 수
    pub fn raise_conflicts(&self) -> u64 {
        self.raise_conflicts.load(Ordering::Relaxed)
    }

    /// 스캔을 기록하고 탐지를 수행합니다.
    ///
    /// 제조사가 자기 제품을 스캔하면 `Forbidden`, 알 수 없는 코드는 `NotFound`.
    /// 원장 제출은 큐에 넣기만 하고 기다리지 않습니다.
    pub async fn record_scan(
        &self,
        code: &str,
        location: &str,
        actor: Option<&str>,
    ) -> Result<ScanVerification, VerifierError> {
        let started = Instant::now();
        let result = self.record_scan_inner(code, location, actor).await;
        metrics::histogram!(m::SCAN_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            let reason = match e {
                VerifierError::Store(StoreError::ProductNotFound(_)) => Some("not_found"),
                VerifierError::Forbidden { .. } => Some("forbidden"),
                _ => None,
            };
            if let Some(reason) = reason {
                metrics::counter!(m::SCANS_REJECTED_TOTAL, m::LABEL_REASON => reason).increment(1);
            }
        }
        result
    }

    async fn record_scan_inner(
        &self,
        code: &str,
        location: &str,
        actor: Option<&str>,
    ) -> Result<ScanVerification, VerifierError> {
        let product = self.store.product(code).await?;

        if let Some(actor) = actor
            && product.is_owned_by(actor)
        {
            warn!(
                product_code = code,
                actor, "manufacturer attempted to scan own product"
            );
            return Err(VerifierError::Forbidden {
                actor: actor.to_owned(),
                product_code: code.to_owned(),
            });
        }

        // 탐지 윈도우는 이번 스캔 직전까지의 이력
        let at = self.clock.now();
        let window = if product.counterfeit {
            Vec::new()
        } else {
            self.store
                .recent_scans(code, self.detector.window_start(at))
                .await?
        };

        let scan = self.store.append_scan(code, location, actor, at).await?;
        self.scans_recorded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::SCANS_RECORDED_TOTAL).increment(1);
        debug!(product_code = code, scan = %scan, "scan recorded");

        if product.counterfeit {
            return Ok(ScanVerification {
                product_code: code.to_owned(),
                scan,
                counterfeit: true,
                warning: Some(COUNTERFEIT_WARNING.to_owned()),
                verdict: None,
                raised_incident: None,
            });
        }

        let verdict = self.detector.evaluate(&window);

        if !verdict.flagged {
            return Ok(ScanVerification {
                product_code: code.to_owned(),
                scan,
                counterfeit: false,
                warning: None,
                verdict: Some(verdict),
                raised_incident: None,
            });
        }

        let candidate = FraudIncident::new(
            scan.occurred_at,
            verdict.scan_count,
            verdict.distinct_locations.clone(),
        );

        let incident = match self.store.persist_incident(code, candidate).await {
            Ok(incident) => incident,
            Err(e) if e.is_conflict() => {
                // 다른 요청이 먼저 인시던트를 올렸거나 이미 위조로 표시됨
                self.raise_conflicts.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::INCIDENT_CONFLICTS_TOTAL).increment(1);
                debug!(product_code = code, "incident already raised by concurrent scan");
                return Ok(ScanVerification {
                    product_code: code.to_owned(),
                    scan,
                    counterfeit: true,
                    warning: Some(COUNTERFEIT_WARNING.to_owned()),
                    verdict: Some(verdict),
                    raised_incident: None,
                });
            }
            Err(e) => return Err(e.into()),
        };

        self.incidents_raised.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::INCIDENTS_RAISED_TOTAL).increment(1);
        warn!(
            product_code = code,
            incident_id = %incident.id,
            scan_count = incident.scan_count,
            distinct_locations = incident.distinct_locations.len(),
            "counterfeit detected, incident raised"
        );

        if let Err(e) = self
            .notifier
            .attach(&product.manufacturer_id, code, &incident)
            .await
        {
            metrics::counter!(m::REPORTS_ATTACH_FAILURES_TOTAL).increment(1);
            warn!(
                product_code = code,
                manufacturer_id = %product.manufacturer_id,
                incident_id = %incident.id,
                error = %e,
                "failed to attach manufacturer report"
            );
        }

        self.enqueue(code, &incident);

        Ok(ScanVerification {
            product_code: code.to_owned(),
            scan,
            counterfeit: true,
            warning: Some(COUNTERFEIT_WARNING.to_owned()),
            verdict: Some(verdict),
            raised_incident: Some(incident),
        })
    }

    /// 원장 워커 큐에 넣습니다. 큐가 가득 차면 인시던트는 Pending으로 남고
    /// 재조정이 다시 넣습니다.
    fn enqueue(&self, code: &str, incident: &FraudIncident) {
        let event = IncidentEvent::new(code, incident.clone());
        match self.incident_tx.try_send(event) {
            Ok(()) => {
                debug!(product_code = code, incident_id = %incident.id, "ledger submission queued");
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    product_code = code,
                    incident_id = %incident.id,
                    "ledger queue full, incident left pending for reconciliation"
                );
            }
            Err(TrySendError::Closed(_)) => {
                warn!(
                    product_code = code,
                    incident_id = %incident.id,
                    "ledger worker not running, incident left pending for reconciliation"
                );
            }
        }
    }

    /// 제품을 조회합니다. 스캔을 추가하거나 탐지를 수행하지 않습니다.
    pub async fn verify_product(&self, code: &str) -> Result<ProductView, VerifierError> {
        Ok(self.store.product(code).await?.into())
    }

    /// 제조사 리포트 목록을 조회합니다.
    pub async fn manufacturer_reports(
        &self,
        manufacturer_id: &str,
    ) -> Result<Vec<ManufacturerReportEntry>, VerifierError> {
        Ok(self.notifier.reports(manufacturer_id).await?)
    }

    /// 인시던트를 원장 기록과 대조합니다.
    pub async fn audit_incident(
        &self,
        code: &str,
        incident_id: &str,
    ) -> Result<AuditReport, VerifierError> {
        let product = self.store.product(code).await?;
        let incident = product
            .incident(incident_id)
            .ok_or_else(|| StoreError::IncidentNotFound {
                product_code: code.to_owned(),
                incident_id: incident_id.to_owned(),
            })?;
        self.audit(code, incident).await
    }

    /// 제품의 모든 인시던트를 원장 기록과 대조합니다.
    pub async fn audit_product(&self, code: &str) -> Result<Vec<AuditReport>, VerifierError> {
        let product = self.store.product(code).await?;
        let mut reports = Vec::with_capacity(product.incidents.len());
        for incident in &product.incidents {
            reports.push(self.audit(code, incident).await?);
        }
        Ok(reports)
    }

    async fn audit(
        &self,
        code: &str,
        incident: &FraudIncident,
    ) -> Result<AuditReport, VerifierError> {
        let content_hash = LedgerPayload::from_incident(code, incident).content_hash()?;

        let record = match (&incident.ledger_status, &incident.ledger_ref) {
            (LedgerStatus::Confirmed, Some(ledger_ref)) => Some(
                self.ledger
                    .query(&LedgerRef(ledger_ref.clone()))
                    .await?,
            ),
            _ => None,
        };

        let hash_matches = record
            .as_ref()
            .and_then(|r| r.content_hash.as_ref())
            .map(|remote| *remote == content_hash);

        if hash_matches == Some(false) {
            warn!(
                product_code = code,
                incident_id = %incident.id,
                "ledger record hash does not match local incident"
            );
        } else {
            info!(
                product_code = code,
                incident_id = %incident.id,
                status = %incident.ledger_status,
                "incident audited"
            );
        }

        Ok(AuditReport {
            product_code: code.to_owned(),
            incident_id: incident.id.clone(),
            local_status: incident.ledger_status,
            ledger_ref: incident.ledger_ref.clone(),
            content_hash,
            record,
            hash_matches,
        })
    }
}
