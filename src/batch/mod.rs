//! Batch Submission Module
//!
//! This module runs fixed-shape submission batches:
//! - BatchOrchestrator: fans out N items and fans their outcomes back in
//! - StopSignal / StopHandle: caller or external stop of a running batch
//! - SubmissionBatch: ordered per-item outcomes and a serializable summary

mod orchestrator;
mod result;
mod stop;


pub use orchestrator::{BatchMode, BatchOrchestrator};
pub use result::{BatchSummary, FailureRecord, ItemOutcome, SubmissionBatch};
pub use stop::{StopHandle, StopReason, StopSignal};
