//! Sync configuration
//!
//! Loaded from `SYNC_*` environment variables.

use campsync_common::env_or;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::queue::DEFAULT_CAPACITY;
use super::store::DEFAULT_PAGE_SIZE;

/// Collection whose emptiness means the weekly definitions were never synced
pub const DEFAULT_BOOTSTRAP_CANARY: &str = "divisions";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// Whether the cadence loop runs in `serve`
    pub enabled: bool,
    /// Camp year treated as "current"
    pub current_year: i32,
    pub source_base_url: String,
    pub source_timeout_secs: u64,
    pub page_size: usize,
    /// Pause between sequential jobs of a sequence
    pub job_pacing_ms: u64,
    /// How often the coordinator checks for job completion
    pub poll_interval_ms: u64,
    /// Default execution budget per job
    pub job_budget_secs: u64,
    /// Floor applied to caller-supplied budgets
    pub min_job_budget_secs: u64,
    pub queue_capacity: usize,
    pub daily_interval_secs: u64,
    pub weekly_interval_secs: u64,
    pub bootstrap_canary: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            current_year: chrono::Utc::now().year(),
            source_base_url: "http://localhost:8080/api".to_string(),
            source_timeout_secs: 60,
            page_size: DEFAULT_PAGE_SIZE,
            job_pacing_ms: 2_000,
            poll_interval_ms: 500,
            job_budget_secs: 4 * 3600,
            min_job_budget_secs: 3600,
            queue_capacity: DEFAULT_CAPACITY,
            daily_interval_secs: 86_400,
            weekly_interval_secs: 7 * 86_400,
            bootstrap_canary: DEFAULT_BOOTSTRAP_CANARY.to_string(),
        }
    }
}

impl SyncConfig {
    /// Load sync configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let config = Self {
            enabled: env_or("SYNC_ENABLED", defaults.enabled)?,
            current_year: env_or("SYNC_CURRENT_YEAR", defaults.current_year)?,
            source_base_url: env_or("SYNC_SOURCE_BASE_URL", defaults.source_base_url)?,
            source_timeout_secs: env_or("SYNC_SOURCE_TIMEOUT_SECS", defaults.source_timeout_secs)?,
            page_size: env_or("SYNC_PAGE_SIZE", defaults.page_size)?,
            job_pacing_ms: env_or("SYNC_JOB_PACING_MS", defaults.job_pacing_ms)?,
            poll_interval_ms: env_or("SYNC_POLL_INTERVAL_MS", defaults.poll_interval_ms)?,
            job_budget_secs: env_or("SYNC_JOB_BUDGET_SECS", defaults.job_budget_secs)?,
            min_job_budget_secs: env_or("SYNC_MIN_JOB_BUDGET_SECS", defaults.min_job_budget_secs)?,
            queue_capacity: env_or("SYNC_QUEUE_CAPACITY", defaults.queue_capacity)?,
            daily_interval_secs: env_or("SYNC_DAILY_INTERVAL_SECS", defaults.daily_interval_secs)?,
            weekly_interval_secs: env_or("SYNC_WEEKLY_INTERVAL_SECS", defaults.weekly_interval_secs)?,
            bootstrap_canary: env_or("SYNC_BOOTSTRAP_CANARY", defaults.bootstrap_canary)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1000..=9999).contains(&self.current_year) {
            anyhow::bail!("SYNC_CURRENT_YEAR must be a four-digit year");
        }
        if self.page_size == 0 {
            anyhow::bail!("SYNC_PAGE_SIZE must be greater than 0");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("SYNC_POLL_INTERVAL_MS must be greater than 0");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("SYNC_QUEUE_CAPACITY must be greater than 0");
        }
        if self.daily_interval_secs == 0 || self.weekly_interval_secs == 0 {
            anyhow::bail!("SYNC_DAILY_INTERVAL_SECS and SYNC_WEEKLY_INTERVAL_SECS must be greater than 0");
        }
        if self.bootstrap_canary.trim().is_empty() {
            anyhow::bail!("SYNC_BOOTSTRAP_CANARY cannot be empty");
        }
        if self.source_base_url.trim().is_empty() {
            anyhow::bail!("SYNC_SOURCE_BASE_URL cannot be empty");
        }
        Ok(())
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn job_pacing(&self) -> Duration {
        Duration::from_millis(self.job_pacing_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_budget(&self) -> Duration {
        Duration::from_secs(self.job_budget_secs)
    }

    pub fn min_job_budget(&self) -> Duration {
        Duration::from_secs(self.min_job_budget_secs)
    }

    /// Budget actually granted for a requested one: short budgets are raised
    /// to the floor.
    pub fn effective_budget(&self, requested: Option<Duration>) -> Duration {
        requested.unwrap_or_else(|| self.job_budget()).max(self.min_job_budget())
    }

    pub fn daily_interval(&self) -> Duration {
        Duration::from_secs(self.daily_interval_secs)
    }

    pub fn weekly_interval(&self) -> Duration {
        Duration::from_secs(self.weekly_interval_secs)
    }
}
