//! This crate drives batches of independent transactions against a private
//! execution environment service: it provisions ephemeral accounts, pushes
//! each transaction through a create, prove, send and confirm pipeline, and
//! keeps one item's failure from spoiling the rest of the batch.

pub mod types; // Account identities, templates, handles and receipts.
pub mod error; // Cancellation kinds plus service, item and batch errors.
pub mod service; // The external service contract and its local simulation.
pub mod account; // Account provisioning and deployment.
pub mod submit; // Single transaction submission and settlement polling.
pub mod batch; // Batch fan-out, stop signals and aggregated results.
pub mod config; // Defines and loads configuration.

// Re-export commonly used types and configurations for easier access.
pub use types::*;
pub use config::Config;
pub use error::{BatchError, CancelKind, CancellationError, ServiceError, SubmitError};
pub use batch::{BatchMode, BatchOrchestrator, StopSignal, SubmissionBatch};
