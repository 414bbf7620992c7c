//! 상태 스냅샷 -- 저장소와 리포트 목록의 JSON 영속화
//!
//! 쓰기는 같은 디렉토리의 임시 파일에 기록한 뒤 rename 하므로
//! 중간에 중단되어도 이전 스냅샷이 온전히 남습니다.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use scanguard_core::types::{ManufacturerReportEntry, Product};

use crate::error::VerifierError;
use crate::notifier::MemoryReportBook;
use crate::store::MemoryScanStore;

/// 현재 스냅샷 포맷 버전
pub const SNAPSHOT_VERSION: u32 = 1;

/// 저장소 + 리포트 목록 스냅샷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// 포맷 버전
    pub version: u32,
    /// 저장 시각
    pub saved_at: DateTime<Utc>,
    /// 제품 목록 (코드 순)
    #[serde(default)]
    pub products: Vec<Product>,
    /// 제조사별 리포트 목록
    #[serde(default)]
    pub manufacturers: BTreeMap<String, Vec<ManufacturerReportEntry>>,
}

impl StateSnapshot {
    /// 빈 스냅샷
    pub fn empty() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            products: Vec::new(),
            manufacturers: BTreeMap::new(),
        }
    }

    /// 현재 상태를 캡처합니다.
    pub async fn capture(store: &MemoryScanStore, book: &MemoryReportBook) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            products: store.snapshot().await,
            manufacturers: book.snapshot().await,
        }
    }

    /// 저장소와 리포트 목록으로 복원합니다.
    pub fn into_parts(self) -> Result<(MemoryScanStore, MemoryReportBook), VerifierError> {
        let store = MemoryScanStore::restore(self.products)?;
        let book = MemoryReportBook::restore(self.manufacturers);
        Ok((store, book))
    }
}

/// 스냅샷 파일
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    /// 경로로 스냅샷 파일 핸들을 생성합니다.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 파일 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 스냅샷을 읽습니다. 파일이 없으면 빈 스냅샷을 반환합니다.
    pub async fn load(&self) -> Result<StateSnapshot, VerifierError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state file, starting empty");
                return Ok(StateSnapshot::empty());
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: StateSnapshot = serde_json::from_str(&raw).map_err(|e| {
            VerifierError::Snapshot(format!("failed to parse {}: {e}", self.path.display()))
        })?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(VerifierError::Snapshot(format!(
                "{} has version {}, this build supports up to {SNAPSHOT_VERSION}",
                self.path.display(),
                snapshot.version
            )));
        }

        debug!(
            path = %self.path.display(),
            products = snapshot.products.len(),
            manufacturers = snapshot.manufacturers.len(),
            "state loaded"
        );
        Ok(snapshot)
    }

    /// 스냅샷을 원자적으로 저장합니다.
    pub async fn save(&self, snapshot: &StateSnapshot) -> Result<(), VerifierError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| VerifierError::Snapshot(format!("failed to serialize state: {e}")))?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path).await?;
        info!(
            path = %self.path.display(),
            products = snapshot.products.len(),
            "state saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use scanguard_core::types::FraudIncident;

    use super::*;
    use crate::notifier::ReportNotifier;
    use crate::store::ScanStore;

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        let snapshot = file.load().await.unwrap();
        assert!(snapshot.products.is_empty());
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
    }

    #[tokio::test]
    async fn save_then_load_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("nested").join("state.json"));

        let store = MemoryScanStore::new();
        let book = MemoryReportBook::new();
        store
            .insert_product(Product::new("P1", "Serum", "B-1", "m-1", 0, 1))
            .await
            .unwrap();
        store
            .append_scan("P1", "Seoul", None, Utc::now())
            .await
            .unwrap();
        let incident = store
            .persist_incident("P1", FraudIncident::new(Utc::now(), 11, BTreeSet::new()))
            .await
            .unwrap();
        book.register_manufacturer("m-1").await;
        book.attach("m-1", "P1", &incident).await.unwrap();

        let snapshot = StateSnapshot::capture(&store, &book).await;
        file.save(&snapshot).await.unwrap();
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());

        let loaded = file.load().await.unwrap();
        assert_eq!(loaded, snapshot);

        let (store, book) = loaded.into_parts().unwrap();
        let product = store.product("P1").await.unwrap();
        assert!(product.counterfeit);
        assert_eq!(product.scans[0].location, "Seoul");
        assert_eq!(book.reports("m-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn garbage_file_is_snapshot_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, "not json").await.unwrap();
        let err = StateFile::new(path).load().await.unwrap_err();
        assert!(matches!(err, VerifierError::Snapshot(_)));
    }

    #[tokio::test]
    async fn newer_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut snapshot = StateSnapshot::empty();
        snapshot.version = SNAPSHOT_VERSION + 1;
        tokio::fs::write(&path, serde_json::to_vec(&snapshot).unwrap())
            .await
            .unwrap();
        let err = StateFile::new(path).load().await.unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn inconsistent_snapshot_is_corrupt() {
        let mut product = Product::new("P1", "Serum", "B-1", "m-1", 0, 1);
        product.counterfeit = true;
        let snapshot = StateSnapshot {
            products: vec![product],
            ..StateSnapshot::empty()
        };
        assert!(snapshot.into_parts().is_err());
    }
}
