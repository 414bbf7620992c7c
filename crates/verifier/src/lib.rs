//! # scanguard-verifier
//!
//! Scan verification, counterfeit detection and the ledger hand-off pipeline.
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`VerifierError`, `StoreError`, `LedgerError`, `NotifierError`)
//! - [`config`]: Runtime configuration (`VerifierConfig`, builder)
//! - [`clock`]: Time source abstraction (`Clock`, `SystemClock`, `ManualClock`)
//! - [`store`]: Per-product scan history (`ScanStore` trait, `MemoryScanStore`)
//! - [`detector`]: Pure anomaly rule (`AnomalyDetector`, `Verdict`)
//! - [`ledger`]: External ledger adapters (`LedgerClient` trait, `FileLedger`, `HttpLedgerClient`)
//! - [`notifier`]: Manufacturer report fan-out (`ReportNotifier` trait, `MemoryReportBook`)
//! - [`coordinator`]: Request path (`ScanCoordinator`)
//! - [`worker`]: Ledger submission with retry (`LedgerWorker`, `RetryPolicy`)
//! - [`reconcile`]: Re-submission of unconfirmed incidents (`Reconciler`)
//! - [`service`]: Lifecycle owner (`VerifierService`, `VerifierServiceBuilder`)
//! - [`snapshot`]: JSON state persistence (`StateFile`, `StateSnapshot`)
//!
//! # Architecture
//!
//! ```text
//! record_scan --> ScanStore.recent_scans --> ScanStore.append_scan --> AnomalyDetector.evaluate
//!                                               |
//!                                  ScanStore.persist_incident
//!                                               |
//!                        ReportNotifier.attach + IncidentEvent --mpsc--> LedgerWorker
//!                                                                            |
//!                                                     LedgerEvent --mpsc--> downstream
//! ```

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod detector;
pub mod error;
pub mod ledger;
pub mod notifier;
pub mod reconcile;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod worker;

// --- Public API Re-exports ---

// Service (lifecycle owner)
pub use service::{DefaultVerifierService, VerifierService, VerifierServiceBuilder};

// Coordinator
pub use coordinator::{AuditReport, COUNTERFEIT_WARNING, ProductView, ScanCoordinator, ScanVerification};

// Configuration
pub use config::{VerifierConfig, VerifierConfigBuilder};

// Error
pub use error::{LedgerError, NotifierError, StoreError, VerifierError};

// Clock
pub use clock::{Clock, ManualClock, SystemClock};

// Store
pub use store::{IncidentLedgerUpdate, MemoryScanStore, ScanStore};

// Detector
pub use detector::{AnomalyDetector, DetectionRule, Verdict};

// Ledger
pub use ledger::{
    ChainVerification, FileLedger, HttpLedgerClient, LedgerBackend, LedgerClient, LedgerPayload,
    LedgerRecord, LedgerRecordStatus, LedgerRef,
};

// Notifier
pub use notifier::{MemoryReportBook, ReportNotifier};

// Worker / reconcile
pub use reconcile::{ReconcileReport, Reconciler};
pub use worker::{LedgerWorker, RetryPolicy};

// Snapshot
pub use snapshot::{SNAPSHOT_VERSION, StateFile, StateSnapshot};
