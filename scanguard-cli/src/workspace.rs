//! Loaded configuration plus restored state for a single CLI invocation.
//!
//! Every command that touches products follows the same shape: open the
//! workspace, act on the in-memory store, then `save()` the snapshot back.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scanguard_core::config::ScanguardConfig;
use scanguard_core::event::IncidentEvent;
use scanguard_verifier::clock::SystemClock;
use scanguard_verifier::config::VerifierConfig;
use scanguard_verifier::coordinator::ScanCoordinator;
use scanguard_verifier::detector::AnomalyDetector;
use scanguard_verifier::ledger::LedgerBackend;
use scanguard_verifier::notifier::MemoryReportBook;
use scanguard_verifier::snapshot::{StateFile, StateSnapshot};
use scanguard_verifier::store::MemoryScanStore;
use scanguard_verifier::worker::LedgerWorker;

use crate::error::CliError;

/// Coordinator over the CLI's concrete store, report book and ledger.
pub type CliCoordinator = ScanCoordinator<MemoryScanStore, MemoryReportBook, LedgerBackend>;

/// Ledger worker over the CLI's concrete store and ledger.
pub type CliWorker = LedgerWorker<MemoryScanStore, LedgerBackend>;

/// Configuration and restored state.
pub struct Workspace {
    /// Effective configuration (file + env overrides).
    pub config: ScanguardConfig,
    /// Verifier runtime settings derived from `config`.
    pub verifier: VerifierConfig,
    /// Restored product store.
    pub store: Arc<MemoryScanStore>,
    /// Restored manufacturer report book.
    pub book: Arc<MemoryReportBook>,
    state_file: StateFile,
    cancel: CancellationToken,
}

impl Workspace {
    /// Load and validate the configuration, then restore the state snapshot.
    ///
    /// A missing state file yields an empty workspace.
    pub async fn open(config_path: &Path) -> Result<Self, CliError> {
        let config = ScanguardConfig::load(config_path).await?;
        let verifier = VerifierConfig::from_core(&config);
        verifier.validate()?;

        let state_file = StateFile::new(config.state_path());
        let snapshot = state_file.load().await?;
        debug!(
            path = %state_file.path().display(),
            products = snapshot.products.len(),
            "state restored"
        );
        let (store, book) = snapshot.into_parts()?;

        Ok(Self {
            config,
            verifier,
            store: Arc::new(store),
            book: Arc::new(book),
            state_file,
            cancel: CancellationToken::new(),
        })
    }

    /// Path of the state snapshot file.
    pub fn state_path(&self) -> &Path {
        self.state_file.path()
    }

    /// Open the configured ledger backend.
    pub async fn ledger(&self) -> Result<Arc<LedgerBackend>, CliError> {
        Ok(Arc::new(LedgerBackend::from_config(&self.config.ledger).await?))
    }

    /// Build a coordinator that queues incidents into `incident_tx`.
    pub fn coordinator(
        &self,
        ledger: Arc<LedgerBackend>,
        incident_tx: mpsc::Sender<IncidentEvent>,
    ) -> CliCoordinator {
        ScanCoordinator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.book),
            ledger,
            AnomalyDetector::new(self.verifier.detection_rule()),
            Arc::new(SystemClock),
            incident_tx,
        )
    }

    /// Build a ledger worker bound to this workspace's store.
    pub fn worker(&self, ledger: Arc<LedgerBackend>) -> Arc<CliWorker> {
        Arc::new(LedgerWorker::new(
            Arc::clone(&self.store),
            ledger,
            &self.verifier,
            None,
            self.cancel.clone(),
        ))
    }

    /// Run `worker` until every queued incident is submitted.
    ///
    /// All senders of `incident_rx` must be dropped first. Ctrl-C cancels the
    /// worker; interrupted incidents stay pending for the next reconcile.
    pub async fn drain(&self, worker: Arc<CliWorker>, incident_rx: mpsc::Receiver<IncidentEvent>) {
        let cancel = self.cancel.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling ledger submissions");
                cancel.cancel();
            }
        });

        worker.run(incident_rx, self.verifier.shutdown_grace()).await;
        interrupt.abort();
    }

    /// Persist the current store and report book.
    pub async fn save(&self) -> Result<(), CliError> {
        let snapshot = StateSnapshot::capture(&self.store, &self.book).await;
        self.state_file.save(&snapshot).await?;
        info!(
            path = %self.state_file.path().display(),
            products = snapshot.products.len(),
            "state saved"
        );
        Ok(())
    }
}
