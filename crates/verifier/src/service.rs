//! 검증 서비스 -- 코디네이터, 원장 워커, 재조정기의 생명주기를 관리합니다.
//!
//! [`VerifierService`]는 core의 [`Pipeline`] trait을 구현합니다.
//!
//! ```text
//! ScanCoordinator ──IncidentEvent──┐
//!                                  ├──mpsc──> LedgerWorker ──LedgerEvent──> downstream
//! Reconciler (start + interval) ───┘
//! ```
//!
//! # 사용 예시
//! ```ignore
//! let (mut service, outcome_rx) = VerifierServiceBuilder::new()
//!     .config(config)
//!     .store(Arc::new(store))
//!     .notifier(Arc::new(book))
//!     .ledger(Arc::new(ledger))
//!     .build()?;
//!
//! service.start().await?;
//! let result = service.coordinator().record_scan("P1", "Seoul", None).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scanguard_core::error::{PipelineError, ScanguardError};
use scanguard_core::event::{IncidentEvent, LedgerEvent};
use scanguard_core::pipeline::{HealthStatus, Pipeline};

use crate::clock::{Clock, SystemClock};
use crate::config::VerifierConfig;
use crate::coordinator::ScanCoordinator;
use crate::detector::AnomalyDetector;
use crate::error::VerifierError;
use crate::ledger::{LedgerBackend, LedgerClient};
use crate::notifier::{MemoryReportBook, ReportNotifier};
use crate::reconcile::Reconciler;
use crate::store::{MemoryScanStore, ScanStore};
use crate::worker::LedgerWorker;

/// 기본 구성의 검증 서비스
pub type DefaultVerifierService = VerifierService<MemoryScanStore, MemoryReportBook, LedgerBackend>;

/// 태스크 정리 시 grace 이후 추가로 기다리는 시간
const STOP_MARGIN: Duration = Duration::from_secs(1);

/// 서비스 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceState {
    Initialized,
    Running,
    Stopped,
}

/// 검증 서비스
pub struct VerifierService<S, N, L> {
    config: VerifierConfig,
    state: ServiceState,
    store: Arc<S>,
    notifier: Arc<N>,
    ledger: Arc<L>,
    coordinator: Arc<ScanCoordinator<S, N, L>>,
    worker: Arc<LedgerWorker<S, L>>,
    incident_tx: mpsc::Sender<IncidentEvent>,
    incident_rx: Option<mpsc::Receiver<IncidentEvent>>,
    include_rejected: bool,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<S, N, L> VerifierService<S, N, L>
where
    S: ScanStore,
    N: ReportNotifier,
    L: LedgerClient,
{
    /// 현재 상태를 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            ServiceState::Initialized => "initialized",
            ServiceState::Running => "running",
            ServiceState::Stopped => "stopped",
        }
    }

    /// 스캔 코디네이터
    pub fn coordinator(&self) -> Arc<ScanCoordinator<S, N, L>> {
        Arc::clone(&self.coordinator)
    }

    /// 스캔 저장소
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// 리포트 알림
    pub fn notifier(&self) -> &Arc<N> {
        &self.notifier
    }

    /// 원장 클라이언트
    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// 서비스 설정
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// 원장 확정 수
    pub fn ledger_confirmed(&self) -> u64 {
        self.worker.confirmed_count()
    }

    /// 원장 최종 실패 수
    pub fn ledger_failed(&self) -> u64 {
        self.worker.failed_count()
    }

    /// 현재 원장 제출 중인 인시던트 수
    pub fn ledger_in_flight(&self) -> usize {
        self.worker.in_flight()
    }
}

impl<S, N, L> Pipeline for VerifierService<S, N, L>
where
    S: ScanStore,
    N: ReportNotifier,
    L: LedgerClient,
{
    async fn start(&mut self) -> Result<(), ScanguardError> {
        if self.state == ServiceState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        let incident_rx = self.incident_rx.take().ok_or_else(|| {
            ScanguardError::Pipeline(PipelineError::InitFailed(
                "incident receiver already consumed, rebuild the service to restart".to_owned(),
            ))
        })?;

        info!(
            backend = self.ledger.backend_name(),
            window_hours = self.config.window_hours,
            "starting verifier service"
        );

        let worker = Arc::clone(&self.worker);
        let grace = self.config.shutdown_grace();
        self.tasks
            .push(tokio::spawn(async move { worker.run(incident_rx, grace).await }));

        let reconciler = Reconciler::new(Arc::clone(&self.store), self.incident_tx.clone())
            .include_rejected(self.include_rejected);
        let interval = self.config.reconcile_interval();
        let cancel = self.cancel.clone();
        self.tasks
            .push(tokio::spawn(async move { reconciler.run(interval, cancel).await }));

        self.state = ServiceState::Running;
        info!("verifier service started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ScanguardError> {
        if self.state != ServiceState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!(
            in_flight = self.worker.in_flight(),
            "stopping verifier service"
        );
        self.cancel.cancel();

        let deadline = self.config.shutdown_grace() + STOP_MARGIN;
        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(deadline, &mut task).await.is_err() {
                warn!("background task did not stop in time, aborting");
                task.abort();
            }
        }

        self.state = ServiceState::Stopped;
        info!(
            confirmed = self.worker.confirmed_count(),
            failed = self.worker.failed_count(),
            "verifier service stopped"
        );
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            ServiceState::Running => {
                // tasks[0]은 원장 워커. 재조정기는 interval이 없으면 한 번 돌고 끝남
                if self.tasks.first().is_some_and(|t| t.is_finished()) {
                    return HealthStatus::Unhealthy("ledger worker exited".to_owned());
                }
                if self.incident_tx.capacity() == 0 {
                    HealthStatus::Degraded("ledger queue full".to_owned())
                } else {
                    HealthStatus::Healthy
                }
            }
            ServiceState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            ServiceState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 검증 서비스 빌더
///
/// 저장소, 리포트 알림, 원장 클라이언트는 필수입니다.
pub struct VerifierServiceBuilder<S, N, L> {
    config: VerifierConfig,
    store: Option<Arc<S>>,
    notifier: Option<Arc<N>>,
    ledger: Option<Arc<L>>,
    clock: Arc<dyn Clock>,
    outcome_tx: Option<mpsc::Sender<LedgerEvent>>,
    outcome_channel_capacity: usize,
    include_rejected: bool,
}

impl<S, N, L> VerifierServiceBuilder<S, N, L>
where
    S: ScanStore,
    N: ReportNotifier,
    L: LedgerClient,
{
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: VerifierConfig::default(),
            store: None,
            notifier: None,
            ledger: None,
            clock: Arc::new(SystemClock),
            outcome_tx: None,
            outcome_channel_capacity: 256,
            include_rejected: false,
        }
    }

    /// 서비스 설정을 지정합니다.
    pub fn config(mut self, config: VerifierConfig) -> Self {
        self.config = config;
        self
    }

    /// 스캔 저장소를 지정합니다.
    pub fn store(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    /// 리포트 알림을 지정합니다.
    pub fn notifier(mut self, notifier: Arc<N>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// 원장 클라이언트를 지정합니다.
    pub fn ledger(mut self, ledger: Arc<L>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// 시간 소스를 지정합니다 (기본값: 시스템 시계).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 외부 원장 결과 전송 채널을 설정합니다.
    ///
    /// 설정하지 않으면 빌더가 새 채널을 생성합니다.
    pub fn outcome_sender(mut self, tx: mpsc::Sender<LedgerEvent>) -> Self {
        self.outcome_tx = Some(tx);
        self
    }

    /// 결과 채널 용량을 설정합니다 (외부 채널 미사용 시).
    pub fn outcome_channel_capacity(mut self, capacity: usize) -> Self {
        self.outcome_channel_capacity = capacity;
        self
    }

    /// 재조정 시 원장이 거부한 인시던트도 다시 제출합니다.
    pub fn include_rejected(mut self, include: bool) -> Self {
        self.include_rejected = include;
        self
    }

    /// 서비스를 빌드합니다.
    ///
    /// # Returns
    /// - `VerifierService`: 서비스 인스턴스
    /// - `Option<mpsc::Receiver<LedgerEvent>>`: 원장 결과 수신 채널
    ///   (외부 outcome_sender를 설정한 경우 None)
    #[allow(clippy::type_complexity)]
    pub fn build(
        self,
    ) -> Result<(VerifierService<S, N, L>, Option<mpsc::Receiver<LedgerEvent>>), VerifierError>
    {
        self.config.validate()?;

        let store = self.store.ok_or_else(|| missing("store"))?;
        let notifier = self.notifier.ok_or_else(|| missing("notifier"))?;
        let ledger = self.ledger.ok_or_else(|| missing("ledger"))?;

        let (outcome_tx, outcome_rx) = if let Some(tx) = self.outcome_tx {
            (tx, None)
        } else {
            let (tx, rx) = mpsc::channel(self.outcome_channel_capacity.max(1));
            (tx, Some(rx))
        };

        let (incident_tx, incident_rx) = mpsc::channel(self.config.queue_capacity);
        let cancel = CancellationToken::new();

        let coordinator = Arc::new(ScanCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&notifier),
            Arc::clone(&ledger),
            AnomalyDetector::new(self.config.detection_rule()),
            self.clock,
            incident_tx.clone(),
        ));

        let worker = Arc::new(LedgerWorker::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            &self.config,
            Some(outcome_tx),
            cancel.clone(),
        ));

        let service = VerifierService {
            config: self.config,
            state: ServiceState::Initialized,
            store,
            notifier,
            ledger,
            coordinator,
            worker,
            incident_tx,
            incident_rx: Some(incident_rx),
            include_rejected: self.include_rejected,
            cancel,
            tasks: Vec::new(),
        };

        Ok((service, outcome_rx))
    }
}

impl<S, N, L> Default for VerifierServiceBuilder<S, N, L>
where
    S: ScanStore,
    N: ReportNotifier,
    L: LedgerClient,
{
    fn default() -> Self {
        Self::new()
    }
}

fn missing(field: &str) -> VerifierError {
    VerifierError::Config {
        field: field.to_owned(),
        reason: format!("{field} must be provided"),
    }
}
