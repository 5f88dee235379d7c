//! Account Provisioning Module
//!
//! This module derives fresh account identities from randomness and drives
//! them through registration, deployment, proving and sending.

mod provisioner;

pub use provisioner::{AccountDraw, AccountProvisioner};
