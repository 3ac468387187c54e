//! Transport seams.
//!
//! The orchestrator talks to the network only through the traits here:
//! [`DataChannel`] for one open data path, [`PeerTransport`] for channel
//! establishment and SDP, and [`Signaling`] for the relay. Transports report
//! back by pushing [`TransportEvent`]s into the orchestrator's event loop.

pub mod memory;
pub mod webrtc;

use crate::core::protocol::{Channel, Message};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

// ── Traits ───────────────────────────────────────────────────────────────────

/// One open (or closing) data channel to a peer.
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;
    fn is_open(&self) -> bool;
    async fn send_binary(&self, data: Bytes) -> Result<()>;
    async fn send_text(&self, text: String) -> Result<()>;
    /// Bytes queued in the transport but not yet on the wire.
    async fn buffered_amount(&self) -> usize;
    async fn close(&self) -> Result<()>;
}

/// Establishes channels and performs the offer/answer exchange.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Start establishing `channel`; completion arrives as
    /// [`TransportEvent::ChannelOpen`].
    async fn open_channel(&self, username: &str, channel: Channel) -> Result<()>;
    async fn close_channel(&self, username: &str, channel: Channel) -> Result<()>;
    /// Whether a low-level connection to `username` already exists.
    async fn is_connected(&self, username: &str) -> bool;
    async fn create_offer(&self, username: &str, tracks: &[Channel]) -> Result<Value>;
    async fn accept_offer(
        &self,
        username: &str,
        offer: &Value,
        return_tracks: &[Channel],
    ) -> Result<Value>;
    async fn apply_answer(&self, username: &str, answer: &Value) -> Result<()>;
    async fn add_candidate(&self, username: &str, candidate: &Value) -> Result<()>;
}

/// Outbound side of the signaling relay.
#[async_trait]
pub trait Signaling: Send + Sync {
    async fn send(&self, message: &Message) -> Result<()>;
}

#[async_trait]
impl Signaling for mpsc::UnboundedSender<Message> {
    async fn send(&self, message: &Message) -> Result<()> {
        mpsc::UnboundedSender::send(self, message.clone())
            .map_err(|_| anyhow!("signaling channel closed"))
    }
}

// ── Events ───────────────────────────────────────────────────────────────────

/// A frame received on a data channel.
#[derive(Debug, Clone, PartialEq)]
pub enum DataFrame {
    Text(String),
    Binary(Bytes),
}

/// What a transport reports back to the orchestrator.
pub enum TransportEvent {
    /// A channel finished opening. Media channels carry no handle.
    ChannelOpen {
        username: String,
        channel: Channel,
        handle: Option<Arc<dyn DataChannel>>,
    },
    ChannelClosed {
        username: String,
        channel: Channel,
    },
    /// The peer started establishing a channel towards us.
    RemoteChannel {
        username: String,
        channel: Channel,
    },
    /// A remote media track arrived.
    MediaReady {
        username: String,
        channel: Channel,
    },
    Data {
        username: String,
        channel: Channel,
        frame: DataFrame,
    },
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportEvent::ChannelOpen {
                username,
                channel,
                handle,
            } => f
                .debug_struct("ChannelOpen")
                .field("username", username)
                .field("channel", channel)
                .field("handle", &handle.as_ref().map(|h| h.label().to_string()))
                .finish(),
            TransportEvent::ChannelClosed { username, channel } => f
                .debug_struct("ChannelClosed")
                .field("username", username)
                .field("channel", channel)
                .finish(),
            TransportEvent::RemoteChannel { username, channel } => f
                .debug_struct("RemoteChannel")
                .field("username", username)
                .field("channel", channel)
                .finish(),
            TransportEvent::MediaReady { username, channel } => f
                .debug_struct("MediaReady")
                .field("username", username)
                .field("channel", channel)
                .finish(),
            TransportEvent::Data {
                username,
                channel,
                frame,
            } => f
                .debug_struct("Data")
                .field("username", username)
                .field("channel", channel)
                .field("frame", frame)
                .finish(),
        }
    }
}

// ── Backpressure ─────────────────────────────────────────────────────────────

/// Why a backpressure wait gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureError {
    /// The channel closed while waiting.
    Closed,
    /// The buffer stayed above the threshold for the whole wait.
    TimedOut,
}

/// Poll until the channel's buffered amount is at or below `threshold`.
///
/// Returns the number of poll cycles that were needed.
pub async fn wait_for_buffer_space(
    dc: &dyn DataChannel,
    threshold: usize,
    poll: Duration,
    max_wait: Duration,
) -> Result<u32, BackpressureError> {
    if !dc.is_open() {
        return Err(BackpressureError::Closed);
    }
    let buffered = dc.buffered_amount().await;
    if buffered <= threshold {
        return Ok(0);
    }

    info!(
        channel = %dc.label(),
        buffered,
        threshold,
        "Applying backpressure - waiting for buffer to drain"
    );

    let deadline = tokio::time::Instant::now() + max_wait;
    let mut cycles = 0u32;
    loop {
        if tokio::time::Instant::now() >= deadline {
            return Err(BackpressureError::TimedOut);
        }
        tokio::time::sleep(poll).await;
        cycles += 1;
        if !dc.is_open() {
            return Err(BackpressureError::Closed);
        }
        if dc.buffered_amount().await <= threshold {
            return Ok(cycles);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryChannel;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_below_threshold() {
        let dc = MemoryChannel::detached("file");
        dc.script_buffered([10]);
        let cycles = wait_for_buffer_space(
            &dc,
            1000,
            Duration::from_millis(100),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(cycles, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_until_drained() {
        let dc = MemoryChannel::detached("file");
        dc.script_buffered([1500, 1500, 500]);
        let cycles = wait_for_buffer_space(
            &dc,
            1000,
            Duration::from_millis(100),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(cycles, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let dc = MemoryChannel::detached("file");
        dc.script_buffered([5000]);
        let err = wait_for_buffer_space(
            &dc,
            1000,
            Duration::from_millis(100),
            Duration::from_millis(450),
        )
        .await
        .unwrap_err();
        assert_eq!(err, BackpressureError::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel() {
        let dc = MemoryChannel::detached("file");
        dc.script_buffered([5000]);
        dc.close().await.unwrap();
        let err = wait_for_buffer_space(
            &dc,
            1000,
            Duration::from_millis(100),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert_eq!(err, BackpressureError::Closed);
    }
}
