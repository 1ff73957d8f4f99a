//! # Conductor Reconciler
//!
//! Keeps base scenarios in step with projects and regional scenarios.
//!
//! ## Pipeline
//!
//! ```text
//! EventSource ──► Worker ──► Dispatcher ──► BaseScenarioService ──► PairReconciler
//!     ▲                          │               (enumerate)          (create per pair)
//!     └──── ack / redeliver ◄────┘                    │                       │
//!                                                     └──── DirectoryClient ◄─┘
//! ```
//!
//! Creation is idempotent through the directory itself: a `Conflict` answer to a
//! create means the pair already has its base scenario. Duplicate and out-of-order
//! deliveries from both event streams therefore converge on one base scenario per
//! `(project, regional scenario)` pair.
//!
//! Transient directory failures are retried with capped exponential backoff
//! ([`RetryPolicy`]); every call runs under a timeout and retries stop once
//! [`Shutdown`] fires.

mod dispatcher;
mod error;
mod handlers;
mod observer;
mod outcome;
mod reconcile;
mod retry;
mod shutdown;
mod worker;

pub use dispatcher::{
    decode, route, DispatchState, Dispatched, Dispatcher, Disposition, FailurePolicy,
};
pub use error::{HandlerError, WorkerError};
pub use handlers::{BaseScenarioService, ReconcileSettings};
pub use observer::{NoopObserver, ReconcileObserver};
pub use outcome::{
    EventReport, FailureReason, PairOutcome, ReconcileAnchor, ReconciliationOutcome,
};
pub use reconcile::{Counterpart, PairReconciler, DEFAULT_PAIR_CONCURRENCY};
pub use retry::{run_with_retry, RetryError, RetryPolicy, RetryState};
pub use shutdown::{shutdown_channel, Shutdown};
pub use worker::{Delivery, EventSource, Worker, WorkerStats};
