//! 제조사 리포트 알림 -- 인시던트를 제조사별 리포트 목록으로 팬아웃
//!
//! 리포트 목록은 파생 읽기 모델입니다. 원본은 항상 제품의 인시던트 이력이며,
//! 여기서의 실패는 인시던트를 되돌리지 않습니다.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;

use tokio::sync::RwLock;
use tracing::debug;

use scanguard_core::types::{FraudIncident, ManufacturerReportEntry};

use crate::error::NotifierError;

/// 리포트 알림 계약
pub trait ReportNotifier: Send + Sync + 'static {
    /// 제조사 리포트 목록에 인시던트를 추가합니다.
    fn attach(
        &self,
        manufacturer_id: &str,
        product_code: &str,
        incident: &FraudIncident,
    ) -> impl Future<Output = Result<ManufacturerReportEntry, NotifierError>> + Send;

    /// 제조사 리포트 목록을 조회합니다.
    fn reports(
        &self,
        manufacturer_id: &str,
    ) -> impl Future<Output = Result<Vec<ManufacturerReportEntry>, NotifierError>> + Send;
}

/// 인메모리 리포트 목록 (등록된 제조사만 허용)
#[derive(Debug, Default)]
pub struct MemoryReportBook {
    books: RwLock<HashMap<String, Vec<ManufacturerReportEntry>>>,
}

impl MemoryReportBook {
    /// 빈 리포트 목록을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 스냅샷에서 복원합니다.
    pub fn restore(books: BTreeMap<String, Vec<ManufacturerReportEntry>>) -> Self {
        Self {
            books: RwLock::new(books.into_iter().collect()),
        }
    }

    /// 제조사를 등록합니다. 새로 등록되면 true.
    pub async fn register_manufacturer(&self, manufacturer_id: &str) -> bool {
        let mut books = self.books.write().await;
        if books.contains_key(manufacturer_id) {
            return false;
        }
        books.insert(manufacturer_id.to_owned(), Vec::new());
        true
    }

    /// 제조사 등록 여부
    pub async fn is_registered(&self, manufacturer_id: &str) -> bool {
        self.books.read().await.contains_key(manufacturer_id)
    }

    /// 전체 리포트 목록 스냅샷 (제조사 ID 순)
    pub async fn snapshot(&self) -> BTreeMap<String, Vec<ManufacturerReportEntry>> {
        self.books
            .read()
            .await
            .iter()
            .map(|(id, entries)| (id.clone(), entries.clone()))
            .collect()
    }
}

impl ReportNotifier for MemoryReportBook {
    async fn attach(
        &self,
        manufacturer_id: &str,
        product_code: &str,
        incident: &FraudIncident,
    ) -> Result<ManufacturerReportEntry, NotifierError> {
        let mut books = self.books.write().await;
        let entries = books
            .get_mut(manufacturer_id)
            .ok_or_else(|| NotifierError::UnknownManufacturer(manufacturer_id.to_owned()))?;

        if let Some(existing) = entries.iter().find(|e| e.incident_id == incident.id) {
            debug!(
                manufacturer_id,
                incident_id = %incident.id,
                "report entry already attached"
            );
            return Ok(existing.clone());
        }

        let entry = ManufacturerReportEntry {
            product_code: product_code.to_owned(),
            incident_id: incident.id.clone(),
            detected_at: incident.detected_at,
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn reports(
        &self,
        manufacturer_id: &str,
    ) -> Result<Vec<ManufacturerReportEntry>, NotifierError> {
        self.books
            .read()
            .await
            .get(manufacturer_id)
            .cloned()
            .ok_or_else(|| NotifierError::UnknownManufacturer(manufacturer_id.to_owned()))
    }
}
