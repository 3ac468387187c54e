//! Centralized configuration for peerlink.
//!
//! Protocol defaults live here as constants so they can be reviewed in a
//! single place. [`SessionConfig`] carries the runtime values; every field
//! defaults to the matching constant and can be overridden from TOML.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ── Transfer / Chunking ──────────────────────────────────────────────────────

/// Default file fragment size in bytes (16 KiB).
///
/// Stays below the per-message limit of common data channel
/// implementations and keeps the transport send buffer bounded.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Buffered-amount threshold (bytes) above which the sender stops writing
/// fragments to a data channel.
pub const DC_BUFFER_THRESHOLD: usize = 64 * 1024;

/// Poll interval while waiting for the data channel buffer to drain.
pub const BACKPRESSURE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound for a single backpressure wait. Exceeding it fails the
/// current file with a generic transfer error.
pub const BACKPRESSURE_MAX_WAIT: Duration = Duration::from_secs(30);

/// Pause after each START/END control fragment.
pub const CONTROL_FRAGMENT_DELAY: Duration = Duration::from_millis(20);

// ── Negotiation ──────────────────────────────────────────────────────────────

/// How long a channel may stay CONNECTING before it is rolled back.
pub const CHANNEL_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long an outstanding call / remote-access invite waits for an answer.
pub const INVITE_TIMEOUT: Duration = Duration::from_secs(30);

// ── Receiving ────────────────────────────────────────────────────────────────

/// Completed inbound files kept for `received_file`; the oldest is evicted
/// beyond this.
pub const MAX_RETAINED_FILES: usize = 32;

/// Fragment slots reserved up front for an inbound file, whatever the
/// announced `totalFragments`.
pub const MAX_PREALLOCATED_FRAGMENTS: usize = 1024;

// ── Runtime configuration ────────────────────────────────────────────────────

/// Runtime knobs for one orchestrator instance.
///
/// Durations are stored in milliseconds so the struct maps one-to-one onto a
/// flat TOML table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Fragment size used by the file streamer.
    pub chunk_size: usize,
    /// Backpressure threshold on `buffered_amount`.
    pub buffer_threshold: usize,
    pub backpressure_poll_ms: u64,
    pub backpressure_max_wait_ms: u64,
    pub control_fragment_delay_ms: u64,
    pub channel_open_timeout_ms: u64,
    pub invite_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            buffer_threshold: DC_BUFFER_THRESHOLD,
            backpressure_poll_ms: BACKPRESSURE_POLL_INTERVAL.as_millis() as u64,
            backpressure_max_wait_ms: BACKPRESSURE_MAX_WAIT.as_millis() as u64,
            control_fragment_delay_ms: CONTROL_FRAGMENT_DELAY.as_millis() as u64,
            channel_open_timeout_ms: CHANNEL_OPEN_TIMEOUT.as_millis() as u64,
            invite_timeout_ms: INVITE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl SessionConfig {
    /// Parse a TOML document; missing keys fall back to the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SessionConfig =
            toml::from_str(content).context("Invalid session configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than zero");
        }
        if self.backpressure_poll_ms == 0 {
            anyhow::bail!("backpressure_poll_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn backpressure_poll(&self) -> Duration {
        Duration::from_millis(self.backpressure_poll_ms)
    }

    pub fn backpressure_max_wait(&self) -> Duration {
        Duration::from_millis(self.backpressure_max_wait_ms)
    }

    pub fn control_fragment_delay(&self) -> Duration {
        Duration::from_millis(self.control_fragment_delay_ms)
    }

    pub fn channel_open_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_open_timeout_ms)
    }

    pub fn invite_timeout(&self) -> Duration {
        Duration::from_millis(self.invite_timeout_ms)
    }
}
