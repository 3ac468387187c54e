//! Orchestrator: sole coordinator of every peer session.
//!
//! This is the single owner of:
//! - the per-peer context store (channel states, queues, timers)
//! - the local session (username, call / remote-access invites)
//! - inbound file assemblies
//!
//! **Architecture rule**: transports only move bytes and report lifecycle
//! events; the UI only renders [`UiEvent`]s and calls the public operations
//! below. All coordination happens here. State is mutated in short critical
//! sections and no lock is held across a transport call, a sleep or a
//! file read.

mod calls;
mod channels;
mod chat;
mod files;
mod router;

use crate::core::config::SessionConfig;
use crate::core::connection::{PeerTransport, Signaling, TransportEvent};
use crate::core::peer_store::{ChannelStatus, PeerStore};
use crate::core::pipeline::{FileAssembler, ReceivedFile};
use crate::core::protocol::{Channel, Message};
use crate::core::session::LocalSessionState;
use crate::ui::notify::{UiEvent, UiSink};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use calls::call_tracks;

struct Inner {
    config: SessionConfig,
    store: Mutex<PeerStore>,
    session: Mutex<LocalSessionState>,
    assembler: Mutex<FileAssembler>,
    transport: Arc<dyn PeerTransport>,
    signaling: Arc<dyn Signaling>,
    ui: Arc<dyn UiSink>,
}

/// Cheap to clone; every clone drives the same session.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn PeerTransport>,
        signaling: Arc<dyn Signaling>,
        ui: Arc<dyn UiSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                store: Mutex::new(PeerStore::new()),
                session: Mutex::new(LocalSessionState::new()),
                assembler: Mutex::new(FileAssembler::new()),
                transport,
                signaling,
                ui,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    // ── Event loop ───────────────────────────────────────────────────────

    /// Feed transport events and signaling envelopes into the orchestrator
    /// until both sources are closed.
    pub async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut signals: mpsc::UnboundedReceiver<String>,
    ) {
        let (mut events_open, mut signals_open) = (true, true);
        while events_open || signals_open {
            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_transport_event(event).await,
                    None => events_open = false,
                },
                raw = signals.recv(), if signals_open => match raw {
                    Some(raw) => self.dispatch(&raw).await,
                    None => signals_open = false,
                },
            }
        }
        debug!(event = "orchestrator_loop_exit", "Event sources closed");
    }

    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::ChannelOpen {
                username,
                channel,
                handle,
            } => self.on_channel_open(&username, channel, handle).await,
            TransportEvent::ChannelClosed { username, channel } => {
                self.on_channel_closed(&username, channel).await
            }
            TransportEvent::RemoteChannel { username, channel } => {
                self.on_remote_channel(&username, channel).await
            }
            TransportEvent::MediaReady { username, channel } => {
                self.on_media_stream_ready(&username, channel).await
            }
            TransportEvent::Data {
                username,
                channel,
                frame,
            } => self.on_data_message(&username, channel, frame).await,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub async fn local_username(&self) -> Option<String> {
        self.inner.session.lock().await.username().map(str::to_string)
    }

    pub async fn set_local_username(&self, username: &str) {
        self.inner.session.lock().await.set_username(username);
    }

    pub async fn channel_status(&self, username: &str, channel: Channel) -> ChannelStatus {
        self.inner.store.lock().await.channel_status(username, channel)
    }

    pub async fn pending_files(&self, username: &str) -> usize {
        self.inner
            .store
            .lock()
            .await
            .get(username)
            .map_or(0, |p| p.pending_files())
    }

    pub async fn pending_messages(&self, username: &str, channel: Channel) -> usize {
        self.inner
            .store
            .lock()
            .await
            .get(username)
            .map_or(0, |p| p.pending_messages(channel))
    }

    pub async fn unread(&self, username: &str) -> u32 {
        self.inner
            .store
            .lock()
            .await
            .get(username)
            .map_or(0, |p| p.unread())
    }

    /// A completed inbound file. Only the most recent
    /// [`MAX_RETAINED_FILES`](crate::core::config::MAX_RETAINED_FILES) are
    /// kept; callers take ownership with [`Self::remove_received_file`].
    pub async fn received_file(&self, file_id: &Uuid) -> Option<ReceivedFile> {
        self.inner.assembler.lock().await.received_file(file_id).cloned()
    }

    pub async fn remove_received_file(&self, file_id: &Uuid) -> Option<ReceivedFile> {
        self.inner.assembler.lock().await.remove_received_file(file_id)
    }

    pub async fn set_screen_sharing(&self, active: bool) {
        self.inner.session.lock().await.set_screen_sharing(active);
    }

    pub async fn is_screen_sharing(&self) -> bool {
        self.inner.session.lock().await.is_screen_sharing()
    }

    pub async fn is_audio_calling(&self) -> bool {
        self.inner.session.lock().await.is_audio_calling()
    }

    /// Allow or forbid automatic re-opening when `username` asks for it.
    pub async fn set_reconnect_eligible(&self, username: &str, eligible: bool) {
        self.inner
            .store
            .lock()
            .await
            .get_or_create(username)
            .set_reconnect(eligible);
    }

    // ── Peer lifecycle ───────────────────────────────────────────────────

    /// Close every channel with `username` and forget it.
    pub async fn remove_peer(&self, username: &str) {
        let states = self.inner.store.lock().await.remove_peer(username);
        for state in states {
            if let Some(handle) = state.handle() {
                if let Err(e) = handle.close().await {
                    debug!(event = "handle_close_failed", peer = %username, %e);
                }
            }
            if let Err(e) = self.inner.transport.close_channel(username, state.channel).await {
                warn!(event = "channel_close_failed", peer = %username, channel = %state.channel, %e);
            }
        }
        self.inner.assembler.lock().await.drop_peer(username);
        self.inner.session.lock().await.clear_peer(username);
        info!(event = "peer_removed", peer = %username, "Peer context removed");
    }

    /// Remove every peer and reset the local session.
    pub async fn logout(&self) {
        let peers = self.inner.store.lock().await.usernames();
        for username in peers {
            self.remove_peer(&username).await;
        }
        self.inner.store.lock().await.clear();
        self.inner.assembler.lock().await.clear();
        self.inner.session.lock().await.reset();
        info!(event = "logout", "Session cleared");
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn emit(&self, event: UiEvent) {
        self.inner.ui.emit(event);
    }

    /// Local username for `from` fields; empty until registered.
    async fn me(&self) -> String {
        self.local_username().await.unwrap_or_default()
    }

    /// Send through the relay. Failures are logged and reported as `false`.
    async fn signal(&self, message: Message) -> bool {
        match self.inner.signaling.send(&message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    event = "signal_send_failed",
                    kind = %message.message_type(),
                    to = message.to().unwrap_or_default(),
                    %e,
                    "Failed to send signaling message"
                );
                false
            }
        }
    }
}
