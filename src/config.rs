//! Configuration Module
//!
//! This module defines all configuration structures for the submitter.
//! Configuration is loaded from TOML files and parsed using serde.

use crate::{service::LocalPxeConfig, submit::ContractContext, types::DeploymentPolicy};
use anyhow::bail;
use ethers::types::Address;
use serde::Deserialize;
use std::fs;

/// Main configuration structure
///
/// Contains all configuration sections for the submitter.
/// Loaded from a TOML file (e.g., config/default.toml).
///
/// # Example TOML
/// ```toml
/// [run]
/// count = 10
/// mode = "deployments"
///
/// [batch]
/// max_concurrency = 4
/// item_timeout_ms = 30000
///
/// [deployment]
/// skip_class_registration = true
/// skip_public_deployment = true
/// universal_deploy = true
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub run: RunConfig,
    pub batch: BatchConfig,
    pub deployment: DeploymentPolicy,
    #[serde(default)]
    pub calls: Option<CallsConfig>,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub local: LocalPxeConfig,
}

/// Which pipeline every batch item runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeKind {
    /// Provision and deploy a fresh account per item.
    Deployments,
    /// Call an existing contract once per item.
    Calls,
}

/// What the binary submits.
///
/// # Fields
/// - `count`: Number of items in the batch
/// - `mode`: `"deployments"` or `"calls"`
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub count: usize,
    pub mode: ModeKind,
}

fn default_concurrency() -> usize {
    1
}

/// Batch execution configuration
///
/// # Fields
/// - `max_concurrency`: Items in flight at once (1 runs them strictly in order)
/// - `fail_fast`: Stop starting new items after the first failure
/// - `item_timeout_ms`: Time allowed for one item's whole pipeline
/// - `deadline_ms`: Optional deadline for the whole batch
/// - `rng_seed`: Seed for account randomness; fresh entropy when absent
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub fail_fast: bool,
    pub item_timeout_ms: u64,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

impl BatchConfig {
    /// Sequential, no deadline, 30s per item.
    pub fn sequential() -> Self {
        Self {
            max_concurrency: 1,
            fail_fast: false,
            item_timeout_ms: 30_000,
            deadline_ms: None,
            rng_seed: None,
        }
    }
}

fn default_seed() -> u64 {
    1234
}

fn default_function() -> String {
    "spam".to_string()
}

fn default_spam_count() -> u64 {
    15
}

/// Contract call configuration, required in calls mode.
///
/// # Fields
/// - `address`: Contract to call
/// - `function`: Function name, `spam` by default
/// - `spam_count`: Values consumed per call
/// - `seed`: Start value for argument derivation
#[derive(Debug, Clone, Deserialize)]
pub struct CallsConfig {
    pub address: Address,
    #[serde(default = "default_function")]
    pub function: String,
    #[serde(default = "default_spam_count")]
    pub spam_count: u64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl CallsConfig {
    pub fn context(&self) -> ContractContext {
        ContractContext {
            address: self.address,
            function: self.function.clone(),
            spam_count: self.spam_count,
            sender: None,
        }
    }
}

/// Optional wait for settlement after the batch was submitted.
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    #[serde(default)]
    pub wait: bool,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            wait: false,
            timeout_ms: 60_000,
            poll_interval_ms: 1_000,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Returns
    /// * `Ok(Config)` if the file was successfully loaded, parsed and validated
    /// * `Err` if the file couldn't be read, the TOML is invalid, or a value
    ///   is out of range
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.run.count == 0 {
            bail!("run.count must be greater than zero");
        }
        if self.batch.max_concurrency == 0 {
            bail!("batch.max_concurrency must be greater than zero");
        }
        if self.batch.item_timeout_ms == 0 {
            bail!("batch.item_timeout_ms must be greater than zero");
        }
        if self.batch.deadline_ms == Some(0) {
            bail!("batch.deadline_ms must be greater than zero when set");
        }
        if self.run.mode == ModeKind::Calls && self.calls.is_none() {
            bail!("calls mode requires a [calls] section");
        }
        if self.settlement.wait && self.settlement.poll_interval_ms == 0 {
            bail!("settlement.poll_interval_ms must be greater than zero");
        }
        Ok(())
    }
}
