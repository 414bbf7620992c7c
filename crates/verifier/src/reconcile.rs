//! 재조정기 -- 원장 미확정 인시던트를 다시 제출 큐에 넣습니다.
//!
//! 프로세스 재시작으로 남은 `Pending`, 재시도 소진으로 `Failed`가 된
//! 인시던트를 찾아 원장 워커에 다시 전달합니다. 원장이 거부한 인시던트는
//! 운영자가 명시적으로 요청할 때만 다시 제출합니다.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scanguard_core::event::{IncidentEvent, MODULE_RECONCILER};
use scanguard_core::metrics as m;
use scanguard_core::types::LedgerStatus;

use crate::error::VerifierError;
use crate::store::{IncidentLedgerUpdate, ScanStore};

/// 재조정 1회 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// 발견한 미확정 인시던트 수
    pub unconfirmed: usize,
    /// 다시 큐에 넣은 수
    pub enqueued: usize,
    /// 원장 거부로 건너뛴 수
    pub skipped_rejected: usize,
}

/// 재조정기
pub struct Reconciler<S> {
    store: Arc<S>,
    incident_tx: mpsc::Sender<IncidentEvent>,
    include_rejected: bool,
}

impl<S: ScanStore> Reconciler<S> {
    /// 새 재조정기를 생성합니다.
    pub fn new(store: Arc<S>, incident_tx: mpsc::Sender<IncidentEvent>) -> Self {
        Self {
            store,
            incident_tx,
            include_rejected: false,
        }
    }

    /// 원장이 거부한 인시던트도 다시 제출할지 설정합니다.
    pub fn include_rejected(mut self, include: bool) -> Self {
        self.include_rejected = include;
        self
    }

    /// 미확정 인시던트를 한 번 훑어 큐에 넣습니다.
    pub async fn run_once(&self) -> Result<ReconcileReport, VerifierError> {
        let unconfirmed = self.store.unconfirmed_incidents().await?;
        let mut report = ReconcileReport {
            unconfirmed: unconfirmed.len(),
            ..ReconcileReport::default()
        };

        for (code, mut incident) in unconfirmed {
            if incident.is_rejected() && !self.include_rejected {
                debug!(
                    product_code = %code,
                    incident_id = %incident.id,
                    "skipping rejected incident"
                );
                report.skipped_rejected += 1;
                continue;
            }

            if incident.ledger_status == LedgerStatus::Failed {
                self.store
                    .update_incident_ledger_status(&code, &incident.id, IncidentLedgerUpdate::pending())
                    .await?;
                incident.ledger_status = LedgerStatus::Pending;
            }

            let trace_id = uuid::Uuid::new_v4().to_string();
            let event = IncidentEvent::with_trace(MODULE_RECONCILER, code, incident, trace_id);
            self.incident_tx
                .send(event)
                .await
                .map_err(|e| VerifierError::Channel(format!("ledger queue closed: {e}")))?;
            metrics::counter!(m::LEDGER_RECONCILED_TOTAL).increment(1);
            report.enqueued += 1;
        }

        if report.unconfirmed > 0 {
            info!(
                unconfirmed = report.unconfirmed,
                enqueued = report.enqueued,
                skipped_rejected = report.skipped_rejected,
                "reconciliation pass completed"
            );
        }
        Ok(report)
    }

    /// 시작 시 한 번, 이후 `interval`마다 재조정합니다. `interval`이 None이면 한 번만.
    pub async fn run(self, interval: Option<Duration>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.run_once() => {
                    if let Err(e) = result {
                        warn!(error = %e, "reconciliation pass failed");
                    }
                }
            }

            let Some(interval) = interval else {
                break;
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        debug!("reconciler stopped");
    }
}
