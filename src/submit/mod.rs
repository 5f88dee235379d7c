//! Transaction Submission Module
//!
//! This module sends one transaction at a time and checks the service
//! acknowledged it:
//! - Call derivation from a seed and an item index
//! - The post-send receipt check (pending, no error)
//! - Settlement polling with a deadline

mod submitter;

pub use submitter::{ContractContext, TransactionSubmitter};
