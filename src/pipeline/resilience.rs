//! Data source selection between a bulk archive and a live node.
//!
//! The controller never sleeps or performs I/O. It is fed the current
//! [`Instant`] and returns what the driver should do next.

use crate::{
    constants::{
        BULK_RETRY_INTERVAL_SECS, HISTORICAL_BLOCK_THRESHOLD, RECONCILE_RETRY_INTERVAL_SECS,
        SOURCE_FAILURE_THRESHOLD, SOURCE_RETRY_DELAY_MILLIS,
    },
    receiver::SourceError,
};
use serde_derive::{Deserialize, Serialize};
use std::{
    path::Path,
    time::{Duration, Instant},
};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    Bulk,
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Consecutive bulk failures before switching to direct
    pub failure_threshold: u32,
    pub retry_delay_millis: u64,
    /// Minimum time in direct mode before bulk is tried again
    pub bulk_retry_interval_secs: u64,
    /// Batches spanning more blocks than this are historical
    pub historical_block_threshold: u32,
    pub reconcile_interval_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: SOURCE_FAILURE_THRESHOLD,
            retry_delay_millis: SOURCE_RETRY_DELAY_MILLIS,
            bulk_retry_interval_secs: BULK_RETRY_INTERVAL_SECS,
            historical_block_threshold: HISTORICAL_BLOCK_THRESHOLD,
            reconcile_interval_secs: RECONCILE_RETRY_INTERVAL_SECS,
        }
    }
}

impl ResilienceConfig {
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_millis)
    }

    pub fn bulk_retry_interval(&self) -> Duration {
        Duration::from_secs(self.bulk_retry_interval_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

/// What to do after a failed fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDecision {
    RetryAfter(Duration),
    /// Switched to direct; fetch again immediately
    SwitchToDirect,
    Fatal,
}

/// What to do with a freshly fetched batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchDirective {
    Process,
    /// Switched back to bulk; discard the batch and fetch again from the
    /// same cursor
    RestartWithBulk,
}

#[derive(Debug, Clone)]
pub struct ResilienceController {
    config: ResilienceConfig,
    mode: SourceMode,
    failure_count: u32,
    direct_since: Option<Instant>,
    reconciled: bool,
    last_reconcile_attempt: Option<Instant>,
}

impl ResilienceController {
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            config,
            mode: SourceMode::Bulk,
            failure_count: 0,
            direct_since: None,
            reconciled: false,
            last_reconcile_attempt: None,
        }
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn is_reconciled(&self) -> bool {
        self.reconciled
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn on_source_error(&mut self, error: &SourceError, now: Instant) -> ErrorDecision {
        if !error.is_transient() {
            return ErrorDecision::Fatal;
        }

        match self.mode {
            SourceMode::Direct => ErrorDecision::RetryAfter(self.config.retry_delay()),
            SourceMode::Bulk => {
                self.failure_count += 1;
                if self.failure_count < self.config.failure_threshold {
                    warn!(
                        "Bulk source failure {}/{}: {error}",
                        self.failure_count, self.config.failure_threshold
                    );
                    return ErrorDecision::RetryAfter(self.config.retry_delay());
                }

                warn!(
                    "Bulk source failed {} times, switching to direct",
                    self.failure_count
                );
                self.mode = SourceMode::Direct;
                self.failure_count = 0;
                self.direct_since = Some(now);
                ErrorDecision::SwitchToDirect
            }
        }
    }

    pub fn on_batch(&mut self, block_range: u32, now: Instant) -> BatchDirective {
        if self.mode == SourceMode::Bulk || block_range <= self.config.historical_block_threshold {
            return BatchDirective::Process;
        }

        let due = self
            .direct_since
            .map_or(true, |since| {
                now.saturating_duration_since(since) >= self.config.bulk_retry_interval()
            });
        if !due {
            return BatchDirective::Process;
        }

        info!("Direct batch spans {block_range} blocks, retrying bulk source");
        self.mode = SourceMode::Bulk;
        self.direct_since = None;
        BatchDirective::RestartWithBulk
    }

    pub fn on_batch_success(&mut self) {
        self.failure_count = 0;
    }

    /// Whether to attempt a head reconciliation after a processed batch.
    /// Returning `true` counts as an attempt.
    pub fn should_reconcile(&mut self, block_range: u32, now: Instant) -> bool {
        if self.reconciled
            || self.mode != SourceMode::Direct
            || block_range > self.config.historical_block_threshold
        {
            return false;
        }

        let due = self.last_reconcile_attempt.map_or(true, |last| {
            now.saturating_duration_since(last) >= self.config.reconcile_interval()
        });
        if due {
            self.last_reconcile_attempt = Some(now);
        }
        due
    }

    pub fn mark_reconciled(&mut self) {
        self.reconciled = true;
    }
}

impl Default for ResilienceController {
    fn default() -> Self {
        Self::new(ResilienceConfig::default())
    }
}
