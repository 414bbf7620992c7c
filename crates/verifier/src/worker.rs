//! 원장 워커 -- 인시던트를 외부 원장에 제출하고 재시도를 관리합니다.
//!
//! 코디네이터가 보낸 [`IncidentEvent`]를 mpsc 채널로 받아 인시던트마다
//! 별도 태스크에서 제출합니다. 동시 제출 수는 세마포어로 제한합니다.
//!
//! # 재시도 정책
//! - `Unavailable`/타임아웃: `base * 2^(n-1)` 백오프 후 재시도 (`max`로 상한)
//! - `Rejected`: 재시도 없이 즉시 `Failed`
//! - 시도 소진: `Failed`
//!
//! 취소 토큰이 발화하면 백오프 대기를 중단하고 인시던트를 `Pending`으로 남깁니다.
//! 남은 인시던트는 다음 재조정에서 다시 제출됩니다.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use scanguard_core::event::{IncidentEvent, LedgerEvent, LedgerOutcome};
use scanguard_core::metrics as m;
use scanguard_core::types::{LedgerErrorRecord, LedgerFailureKind, LedgerStatus};

use crate::config::VerifierConfig;
use crate::error::LedgerError;
use crate::ledger::{LedgerClient, LedgerPayload, LedgerRef};
use crate::store::{IncidentLedgerUpdate, ScanStore};

/// 지수 백오프 재시도 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 최대 시도 횟수 (첫 시도 포함)
    pub max_attempts: u32,
    /// 첫 백오프 간격
    pub base: Duration,
    /// 백오프 상한
    pub max: Duration,
}

impl RetryPolicy {
    /// 검증기 설정에서 정책을 생성합니다.
    pub fn from_config(config: &VerifierConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_secs(config.backoff_max_secs),
        }
    }

    /// `failed_attempts`번 실패한 뒤의 대기 시간
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |d| d.min(self.max))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&VerifierConfig::default())
    }
}

/// 한 번의 제출 라운드 결과
#[derive(Debug)]
enum SubmitResult {
    Confirmed(LedgerRef),
    Failed(LedgerFailureKind, String),
    Cancelled(Option<String>),
}

/// 원장 워커
pub struct LedgerWorker<S, L> {
    store: Arc<S>,
    ledger: Arc<L>,
    policy: RetryPolicy,
    request_timeout: Duration,
    max_in_flight: usize,
    outcome_tx: Option<mpsc::Sender<LedgerEvent>>,
    cancel: CancellationToken,
    in_flight: Mutex<HashSet<String>>,
    confirmed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl<S, L> LedgerWorker<S, L>
where
    S: ScanStore,
    L: LedgerClient,
{
    /// 새 워커를 생성합니다.
    pub fn new(
        store: Arc<S>,
        ledger: Arc<L>,
        config: &VerifierConfig,
        outcome_tx: Option<mpsc::Sender<LedgerEvent>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            ledger,
            policy: RetryPolicy::from_config(config),
            request_timeout: config.request_timeout(),
            max_in_flight: config.max_in_flight.max(1),
            outcome_tx,
            cancel,
            in_flight: Mutex::new(HashSet::new()),
            confirmed: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 재시도 정책
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// 확정된 인시던트 수
    pub fn confirmed_count(&self) -> u64 {
        self.confirmed.load(Ordering::Relaxed)
    }

    /// 최종 실패한 인시던트 수
    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// 현재 제출 중인 인시던트 수
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map_or(0, |set| set.len())
    }

    /// 수신 루프를 실행합니다.
    ///
    /// 채널이 닫히면 진행 중인 제출을 모두 기다린 뒤 반환합니다.
    /// 취소되면 `grace` 동안만 기다리고 남은 태스크를 중단합니다.
    pub async fn run(self: Arc<Self>, mut incident_rx: mpsc::Receiver<IncidentEvent>, grace: Duration) {
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();
        info!(
            backend = self.ledger.backend_name(),
            max_in_flight = self.max_in_flight,
            max_attempts = self.policy.max_attempts,
            "ledger worker started"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("ledger worker received shutdown signal");
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined
                        && e.is_panic()
                    {
                        error!(error = %e, "ledger submission task panicked");
                    }
                }
                received = incident_rx.recv() => {
                    let Some(event) = received else {
                        debug!("incident channel closed");
                        break;
                    };

                    let permit = tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                    };

                    let worker = Arc::clone(&self);
                    tasks.spawn(async move {
                        worker.process(event).await;
                        drop(permit);
                    });
                }
            }
        }

        if self.cancel.is_cancelled() {
            let pending = tasks.len();
            let drained = tokio::time::timeout(grace, async {
                while tasks.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(
                    pending,
                    grace_secs = grace.as_secs(),
                    "ledger submissions still running after grace period, aborting"
                );
                tasks.abort_all();
            }
        } else {
            while tasks.join_next().await.is_some() {}
        }

        info!(
            confirmed = self.confirmed_count(),
            failed = self.failed_count(),
            "ledger worker stopped"
        );
    }

    /// 인시던트 하나를 제출하고 결과를 저장소에 반영합니다.
    ///
    /// 같은 인시던트가 이미 제출 중이면 아무것도 하지 않습니다.
    pub async fn process(&self, event: IncidentEvent) {
        let incident_id = event.incident.id.clone();
        if !self.claim(&incident_id) {
            debug!(incident_id = %incident_id, "incident already in flight, skipping");
            return;
        }

        self.process_claimed(&event).await;

        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&incident_id);
        }
    }

    fn claim(&self, incident_id: &str) -> bool {
        match self.in_flight.lock() {
            Ok(mut set) => set.insert(incident_id.to_owned()),
            Err(_) => true,
        }
    }

    async fn process_claimed(&self, event: &IncidentEvent) {
        let code = event.product_code.as_str();

        // 큐에 들어간 이후 다른 경로로 확정되었을 수 있으므로 저장소 기준으로 판단
        let current = match self.store.product(code).await {
            Ok(product) => product.incident(&event.incident.id).cloned(),
            Err(e) => {
                warn!(product_code = code, error = %e, "failed to load incident for submission");
                return;
            }
        };
        let Some(incident) = current else {
            warn!(
                product_code = code,
                incident_id = %event.incident.id,
                "incident no longer exists, dropping submission"
            );
            return;
        };
        let incident = &incident;

        if incident.ledger_status == LedgerStatus::Confirmed {
            debug!(product_code = code, incident_id = %incident.id, "incident already confirmed");
            return;
        }

        let payload = LedgerPayload::from_incident(code, incident);
        let (attempts, result) = self.submit_with_retry(&payload).await;

        match result {
            SubmitResult::Confirmed(ledger_ref) => {
                self.confirmed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::LEDGER_CONFIRMED_TOTAL).increment(1);
                info!(
                    product_code = code,
                    incident_id = %incident.id,
                    ledger_ref = %ledger_ref,
                    attempts,
                    trace_id = %event.metadata.trace_id,
                    "incident confirmed on ledger"
                );
                self.apply(
                    code,
                    &incident.id,
                    IncidentLedgerUpdate::confirmed(ledger_ref.as_str(), attempts),
                )
                .await;
                self.emit(LedgerEvent::for_incident(
                    event,
                    attempts,
                    LedgerOutcome::Confirmed {
                        ledger_ref: ledger_ref.0,
                    },
                ));
            }
            SubmitResult::Failed(kind, reason) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                let kind_label = match kind {
                    LedgerFailureKind::Unavailable => "unavailable",
                    LedgerFailureKind::Rejected => "rejected",
                };
                metrics::counter!(m::LEDGER_FAILED_TOTAL, m::LABEL_FAILURE_KIND => kind_label)
                    .increment(1);
                error!(
                    alert = "ledger",
                    product_code = code,
                    incident_id = %incident.id,
                    kind = kind_label,
                    attempts,
                    error = %reason,
                    trace_id = %event.metadata.trace_id,
                    "ledger submission failed, incident kept locally"
                );
                self.apply(
                    code,
                    &incident.id,
                    IncidentLedgerUpdate::failed(kind, reason.clone(), attempts),
                )
                .await;
                self.emit(LedgerEvent::for_incident(
                    event,
                    attempts,
                    LedgerOutcome::Failed { kind, reason },
                ));
            }
            SubmitResult::Cancelled(last_error) => {
                info!(
                    product_code = code,
                    incident_id = %incident.id,
                    attempts,
                    "ledger submission interrupted by shutdown, left pending"
                );
                if attempts > 0 {
                    let update = IncidentLedgerUpdate {
                        status: LedgerStatus::Pending,
                        ledger_ref: None,
                        attempts,
                        error: last_error.map(|message| LedgerErrorRecord {
                            kind: LedgerFailureKind::Unavailable,
                            message,
                        }),
                    };
                    self.apply(code, &incident.id, update).await;
                }
            }
        }
    }

    async fn submit_with_retry(&self, payload: &LedgerPayload) -> (u32, SubmitResult) {
        let mut last_error: Option<String> = None;

        for attempt in 1..=self.policy.max_attempts {
            if self.cancel.is_cancelled() {
                return (attempt - 1, SubmitResult::Cancelled(last_error));
            }

            let started = Instant::now();
            let result = match tokio::time::timeout(self.request_timeout, self.ledger.submit(payload))
                .await
            {
                Ok(result) => result,
                Err(_elapsed) => Err(LedgerError::Unavailable(format!(
                    "request timed out after {}ms",
                    self.request_timeout.as_millis()
                ))),
            };
            metrics::histogram!(m::LEDGER_SUBMIT_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());

            match result {
                Ok(ledger_ref) => {
                    metrics::counter!(m::LEDGER_SUBMISSIONS_TOTAL, m::LABEL_RESULT => "success")
                        .increment(1);
                    return (attempt, SubmitResult::Confirmed(ledger_ref));
                }
                Err(e) if !e.is_retryable() => {
                    metrics::counter!(m::LEDGER_SUBMISSIONS_TOTAL, m::LABEL_RESULT => "failure")
                        .increment(1);
                    return (
                        attempt,
                        SubmitResult::Failed(LedgerFailureKind::Rejected, e.to_string()),
                    );
                }
                Err(e) => {
                    metrics::counter!(m::LEDGER_SUBMISSIONS_TOTAL, m::LABEL_RESULT => "failure")
                        .increment(1);
                    last_error = Some(e.to_string());

                    if attempt == self.policy.max_attempts {
                        break;
                    }

                    let backoff = self.policy.backoff(attempt);
                    warn!(
                        incident_id = %payload.incident_id,
                        attempt,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "ledger unavailable, retrying"
                    );

                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            return (attempt, SubmitResult::Cancelled(last_error));
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        (
            self.policy.max_attempts,
            SubmitResult::Failed(
                LedgerFailureKind::Unavailable,
                last_error.unwrap_or_else(|| "no attempts made".to_owned()),
            ),
        )
    }

    async fn apply(&self, code: &str, incident_id: &str, update: IncidentLedgerUpdate) {
        if let Err(e) = self
            .store
            .update_incident_ledger_status(code, incident_id, update)
            .await
        {
            error!(
                product_code = code,
                incident_id,
                error = %e,
                "failed to record ledger status"
            );
        }
    }

    fn emit(&self, event: LedgerEvent) {
        let Some(tx) = &self.outcome_tx else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            warn!(error = %e, "failed to send ledger outcome event");
        }
    }
}
