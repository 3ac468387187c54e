//! `webrtc` crate adapter.
//!
//! `RTCDataChannel` implements [`DataChannel`] directly, and
//! [`bind_data_channel`] wires its `on_open` / `on_close` / `on_message`
//! callbacks into the orchestrator's [`TransportEvent`] stream. Peer
//! connection setup and ICE stay with the embedding application.

use super::{DataChannel, DataFrame, TransportEvent};
use crate::core::protocol::Channel;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

#[async_trait]
impl DataChannel for RTCDataChannel {
    fn label(&self) -> &str {
        RTCDataChannel::label(self)
    }

    fn is_open(&self) -> bool {
        self.ready_state() == RTCDataChannelState::Open
    }

    async fn send_binary(&self, data: Bytes) -> Result<()> {
        RTCDataChannel::send(self, &data)
            .await
            .map(|_| ())
            .map_err(|e| anyhow!("send on '{}' failed: {e}", RTCDataChannel::label(self)))
    }

    async fn send_text(&self, text: String) -> Result<()> {
        RTCDataChannel::send_text(self, text)
            .await
            .map(|_| ())
            .map_err(|e| anyhow!("send on '{}' failed: {e}", RTCDataChannel::label(self)))
    }

    async fn buffered_amount(&self) -> usize {
        RTCDataChannel::buffered_amount(self).await
    }

    async fn close(&self) -> Result<()> {
        RTCDataChannel::close(self)
            .await
            .map_err(|e| anyhow!("close of '{}' failed: {e}", RTCDataChannel::label(self)))
    }
}

/// Map a data channel label onto the logical channel it carries.
pub fn channel_for_label(label: &str) -> Option<Channel> {
    label
        .parse::<Channel>()
        .ok()
        .filter(|channel| channel.is_data_channel())
}

fn notify(events: &mpsc::UnboundedSender<TransportEvent>, event: TransportEvent) {
    if events.send(event).is_err() {
        debug!(event = "transport_event_dropped", "Orchestrator event loop is gone");
    }
}

/// Forward the lifecycle and frames of `dc` (a data channel with
/// `username`) to `events`.
///
/// A channel that is already open is reported immediately.
pub fn bind_data_channel(
    dc: &Arc<RTCDataChannel>,
    username: &str,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> Result<Channel> {
    let label = RTCDataChannel::label(dc).to_string();
    let channel = channel_for_label(&label)
        .ok_or_else(|| anyhow!("data channel label `{label}` is not a known channel"))?;

    let weak: Weak<RTCDataChannel> = Arc::downgrade(dc);
    let (user, tx) = (username.to_string(), events.clone());
    dc.on_open(Box::new(move || {
        let (weak, user, tx) = (weak.clone(), user.clone(), tx.clone());
        Box::pin(async move {
            if let Some(dc) = weak.upgrade() {
                notify(
                    &tx,
                    TransportEvent::ChannelOpen {
                        username: user,
                        channel,
                        handle: Some(dc as Arc<dyn DataChannel>),
                    },
                );
            }
        })
    }));

    let (user, tx, closed_label) = (username.to_string(), events.clone(), label.clone());
    dc.on_close(Box::new(move || {
        let (user, tx, label) = (user.clone(), tx.clone(), closed_label.clone());
        Box::pin(async move {
            warn!(event = "dc_closed", channel = %label, peer = %user, "DataChannel closed by transport");
            notify(&tx, TransportEvent::ChannelClosed { username: user, channel });
        })
    }));

    let error_label = label.clone();
    dc.on_error(Box::new(move |err| {
        let label = error_label.clone();
        Box::pin(async move {
            error!(event = "dc_error", channel = %label, %err, "DataChannel transport error");
        })
    }));

    let (user, tx) = (username.to_string(), events.clone());
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let (user, tx) = (user.clone(), tx.clone());
        Box::pin(async move {
            let frame = if msg.is_string {
                DataFrame::Text(String::from_utf8_lossy(&msg.data).into_owned())
            } else {
                DataFrame::Binary(msg.data)
            };
            notify(
                &tx,
                TransportEvent::Data {
                    username: user,
                    channel,
                    frame,
                },
            );
        })
    }));

    if dc.ready_state() == RTCDataChannelState::Open {
        notify(
            &events,
            TransportEvent::ChannelOpen {
                username: username.to_string(),
                channel,
                handle: Some(dc.clone() as Arc<dyn DataChannel>),
            },
        );
    }
    Ok(channel)
}
