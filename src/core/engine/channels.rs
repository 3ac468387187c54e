//! Channel lifecycle: open requests, timeouts, open / close events.

use super::Orchestrator;
use crate::core::connection::DataChannel;
use crate::core::negotiation::{OpenOutcome, OpenedOutcome};
use crate::core::protocol::{Channel, Message, WebrtcEventKind, WebrtcEventMessage};
use crate::core::timer::TimeoutJob;
use crate::ui::notify::{Popup, UiEvent};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl Orchestrator {
    /// Ask the transport for `channel` with `username`.
    ///
    /// Only a NOT_CONNECTED channel produces a transport request; duplicate
    /// calls while CONNECTING or CONNECTED are no-ops.
    pub async fn request_open(&self, username: &str, channel: Channel) {
        let token = {
            let mut store = self.inner.store.lock().await;
            match store.begin_connecting(username, channel) {
                OpenOutcome::Started(token) => token,
                outcome => {
                    debug!(event = "open_request_noop", peer = %username, %channel, ?outcome);
                    return;
                }
            }
        };
        self.arm_channel_timeout(username, channel, token).await;

        info!(event = "channel_open_requested", peer = %username, %channel, token);
        if let Err(e) = self.inner.transport.open_channel(username, channel).await {
            warn!(event = "channel_open_failed", peer = %username, %channel, %e, "Transport refused to open channel");
            self.abort_attempt(username, channel, token).await;
        }
    }

    /// The peer initiated `channel`: enter CONNECTING without asking the
    /// transport, so the upcoming open event is accepted.
    pub async fn accept_incoming(&self, username: &str, channel: Channel) -> OpenOutcome {
        let outcome = self
            .inner
            .store
            .lock()
            .await
            .begin_connecting(username, channel);
        if let OpenOutcome::Started(token) = outcome {
            self.arm_channel_timeout(username, channel, token).await;
        }
        outcome
    }

    pub(super) async fn arm_channel_timeout(&self, username: &str, channel: Channel, token: u64) {
        let this = self.clone();
        let user = username.to_string();
        let job = TimeoutJob::spawn(token, self.inner.config.channel_open_timeout(), async move {
            this.on_channel_timeout(&user, channel, token).await;
        });
        self.inner
            .store
            .lock()
            .await
            .attach_timeout(username, channel, job);
    }

    async fn on_channel_timeout(&self, username: &str, channel: Channel, token: u64) {
        if !self.inner.store.lock().await.expire(username, channel, token) {
            return;
        }
        warn!(
            event = "channel_open_timeout",
            peer = %username,
            %channel,
            token,
            timeout_ms = self.inner.config.channel_open_timeout_ms,
            "Channel did not open in time"
        );
        if let Err(e) = self.inner.transport.close_channel(username, channel).await {
            debug!(event = "channel_close_failed", peer = %username, %channel, %e);
        }
        self.emit(UiEvent::ChannelTimeout {
            username: username.to_string(),
            channel,
        });
    }

    /// Roll back the CONNECTING attempt `token` after a transport failure.
    pub(super) async fn abort_attempt(&self, username: &str, channel: Channel, token: u64) {
        let removed = {
            let mut store = self.inner.store.lock().await;
            let current = store
                .channel_state(username, channel)
                .is_some_and(|s| s.token() == token);
            current && store.remove_channel(username, channel).is_some()
        };
        if removed {
            self.emit(UiEvent::ChannelDisconnected {
                username: username.to_string(),
                channel,
            });
        }
    }

    // ── Capability interface for transports ──────────────────────────────

    /// The transport finished opening `channel`.
    pub async fn on_channel_open(
        &self,
        username: &str,
        channel: Channel,
        handle: Option<Arc<dyn DataChannel>>,
    ) {
        let outcome = self
            .inner
            .store
            .lock()
            .await
            .complete_open(username, channel, handle);
        if let OpenedOutcome::Ignored(status) = outcome {
            debug!(event = "open_event_ignored", peer = %username, %channel, ?status, "Channel was not connecting");
            return;
        }

        info!(event = "channel_connected", peer = %username, %channel);
        self.emit(UiEvent::ChannelConnected {
            username: username.to_string(),
            channel,
        });

        if channel == Channel::Audio {
            self.inner.session.lock().await.set_audio_calling(true);
        }

        if channel.is_data_channel() {
            self.flush_messages(username, channel).await;
            self.start_file_drain(username, channel).await;
        }

        match channel {
            Channel::RemoteControl => self.emit(UiEvent::RemoteAccessReady {
                username: username.to_string(),
            }),
            c if c.is_media() => self.emit(UiEvent::MediaStreamReady {
                username: username.to_string(),
                channel,
            }),
            _ => {}
        }
    }

    /// The transport lost or closed `channel`.
    pub async fn on_channel_closed(&self, username: &str, channel: Channel) {
        if self.teardown(username, channel).await {
            info!(event = "channel_closed", peer = %username, %channel);
        } else {
            debug!(event = "close_event_ignored", peer = %username, %channel, "Channel was not tracked");
        }
    }

    /// The peer started establishing `channel` towards us.
    pub async fn on_remote_channel(&self, username: &str, channel: Channel) {
        let outcome = self.accept_incoming(username, channel).await;
        debug!(event = "remote_channel", peer = %username, %channel, ?outcome);
    }

    /// A remote media track arrived. Completes the negotiation of that
    /// channel; one-way media is confirmed back to the sharer.
    pub async fn on_media_stream_ready(&self, username: &str, channel: Channel) {
        if channel.is_data_channel() {
            warn!(event = "media_on_data_channel", peer = %username, %channel, "Ignoring media for a data channel");
            return;
        }
        self.accept_incoming(username, channel).await;
        self.on_channel_open(username, channel, None).await;

        if channel.is_one_way() {
            let from = self.me().await;
            self.signal(Message::WebrtcEvent(WebrtcEventMessage {
                from,
                to: username.to_string(),
                channel,
                event: WebrtcEventKind::RemoteTrackReceived,
            }))
            .await;
        }
    }

    // ── Local close ──────────────────────────────────────────────────────

    /// Close `channel` from this side.
    pub async fn close_channel(&self, username: &str, channel: Channel) {
        let handle = self
            .inner
            .store
            .lock()
            .await
            .channel_state(username, channel)
            .and_then(|s| s.handle().cloned());
        if let Some(handle) = handle {
            if let Err(e) = handle.close().await {
                debug!(event = "handle_close_failed", peer = %username, %channel, %e);
            }
        }
        if let Err(e) = self.inner.transport.close_channel(username, channel).await {
            warn!(event = "channel_close_failed", peer = %username, %channel, %e);
        }
        self.teardown(username, channel).await;
    }

    /// Drop the channel state and everything hanging off it. Returns whether
    /// a state existed.
    pub(super) async fn teardown(&self, username: &str, channel: Channel) -> bool {
        let (removed, still_live) = {
            let mut store = self.inner.store.lock().await;
            let removed = store.remove_channel(username, channel).is_some();
            (removed, store.any_connected(channel))
        };

        if let Some(file_id) = self.inner.assembler.lock().await.drop_channel(username, channel) {
            warn!(event = "partial_file_dropped", peer = %username, %channel, %file_id, "Channel closed mid-transfer");
        }
        self.inner
            .session
            .lock()
            .await
            .clear_for_channel(username, channel, still_live);

        if removed {
            self.emit(UiEvent::ChannelDisconnected {
                username: username.to_string(),
                channel,
            });
        }
        removed
    }

    /// The peer announced it tore `channel` down.
    pub(super) async fn peer_disconnected(&self, username: &str, channel: Channel) {
        if let Err(e) = self.inner.transport.close_channel(username, channel).await {
            debug!(event = "channel_close_failed", peer = %username, %channel, %e);
        }
        self.teardown(username, channel).await;
        self.emit(UiEvent::Popup(Popup::Disconnected {
            username: username.to_string(),
            channel,
        }));
    }
}
