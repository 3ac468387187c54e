//! Channel negotiation state machine.
//!
//! ```text
//! NOT_CONNECTED ──begin_connecting──► CONNECTING ──complete_open──► CONNECTED
//!       ▲                                 │                              │
//!       └───────── expire / remove_channel┴──────────────────────────────┘
//! ```
//!
//! Transitions are pure state changes on the [`PeerStore`]; the orchestrator
//! performs the matching transport calls and UI notifications.

use crate::core::connection::DataChannel;
use crate::core::peer_store::{ChannelState, ChannelStatus, PeerStore};
use crate::core::protocol::Channel;
use crate::core::timer::TimeoutJob;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// Result of asking for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// NOT_CONNECTED → CONNECTING; the attempt is identified by the token.
    Started(u64),
    AlreadyConnecting,
    AlreadyConnected,
}

/// Result of a transport "channel open" event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenedOutcome {
    Connected,
    /// The channel was not CONNECTING; the event is ignored.
    Ignored(ChannelStatus),
}

impl PeerStore {
    /// Move a channel to CONNECTING unless it already is past NOT_CONNECTED.
    pub fn begin_connecting(&mut self, username: &str, channel: Channel) -> OpenOutcome {
        match self.channel_status(username, channel) {
            ChannelStatus::Connecting => return OpenOutcome::AlreadyConnecting,
            ChannelStatus::Connected => return OpenOutcome::AlreadyConnected,
            ChannelStatus::NotConnected => {}
        }
        let token = self.next_token();
        let peer = self.get_or_create(username);
        peer.touch();
        peer.channels
            .insert(channel, ChannelState::connecting(channel, token));
        debug!(event = "channel_connecting", peer = %username, %channel, token);
        OpenOutcome::Started(token)
    }

    /// Attach the timeout of the attempt identified by `job.token()`.
    /// A job for an attempt that is already over is cancelled.
    pub fn attach_timeout(&mut self, username: &str, channel: Channel, job: TimeoutJob) {
        let state = self
            .get_mut(username)
            .and_then(|p| p.channels.get_mut(&channel))
            .filter(|s| s.status == ChannelStatus::Connecting && s.token == job.token());
        match state {
            Some(state) => {
                state.cancel_timeout();
                state.timeout = Some(job);
            }
            None => job.cancel(),
        }
    }

    /// CONNECTING → CONNECTED. Any other starting state is rejected.
    pub fn complete_open(
        &mut self,
        username: &str,
        channel: Channel,
        handle: Option<Arc<dyn DataChannel>>,
    ) -> OpenedOutcome {
        let Some(peer) = self.get_mut(username) else {
            return OpenedOutcome::Ignored(ChannelStatus::NotConnected);
        };
        let Some(state) = peer.channels.get_mut(&channel) else {
            return OpenedOutcome::Ignored(ChannelStatus::NotConnected);
        };
        if state.status != ChannelStatus::Connecting {
            return OpenedOutcome::Ignored(state.status);
        }
        state.cancel_timeout();
        state.status = ChannelStatus::Connected;
        state.handle = handle;
        state.last_used = Instant::now();
        peer.touch();
        OpenedOutcome::Connected
    }

    /// Timer firing. Removes the state only if it is still the CONNECTING
    /// attempt identified by `token`.
    pub fn expire(&mut self, username: &str, channel: Channel, token: u64) -> bool {
        let Some(peer) = self.get_mut(username) else {
            return false;
        };
        let current = peer
            .channels
            .get(&channel)
            .is_some_and(|s| s.status == ChannelStatus::Connecting && s.token == token);
        if current {
            // The firing job is the timer itself, so there is nothing to cancel.
            peer.channels.remove(&channel);
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::memory::MemoryChannel;
    use std::time::Duration;

    #[test]
    fn test_connected_only_via_connecting() {
        let mut store = PeerStore::new();
        let dc: Arc<dyn DataChannel> = Arc::new(MemoryChannel::detached("text"));
        assert_eq!(
            store.complete_open("bob", Channel::Text, Some(dc.clone())),
            OpenedOutcome::Ignored(ChannelStatus::NotConnected)
        );
        assert_eq!(store.channel_status("bob", Channel::Text), ChannelStatus::NotConnected);

        assert!(matches!(
            store.begin_connecting("bob", Channel::Text),
            OpenOutcome::Started(_)
        ));
        assert_eq!(
            store.complete_open("bob", Channel::Text, Some(dc.clone())),
            OpenedOutcome::Connected
        );
        assert_eq!(
            store.complete_open("bob", Channel::Text, Some(dc)),
            OpenedOutcome::Ignored(ChannelStatus::Connected)
        );
        assert!(store.open_handle("bob", Channel::Text).is_some());
    }

    #[test]
    fn test_duplicate_requests_are_noops() {
        let mut store = PeerStore::new();
        assert!(matches!(
            store.begin_connecting("bob", Channel::File),
            OpenOutcome::Started(_)
        ));
        assert_eq!(
            store.begin_connecting("bob", Channel::File),
            OpenOutcome::AlreadyConnecting
        );
        store.complete_open("bob", Channel::File, None);
        assert_eq!(
            store.begin_connecting("bob", Channel::File),
            OpenOutcome::AlreadyConnected
        );
    }

    #[test]
    fn test_stale_token_does_not_expire_new_attempt() {
        let mut store = PeerStore::new();
        let OpenOutcome::Started(first) = store.begin_connecting("bob", Channel::Text) else {
            panic!("expected a new attempt");
        };
        store.remove_channel("bob", Channel::Text);
        let OpenOutcome::Started(second) = store.begin_connecting("bob", Channel::Text) else {
            panic!("expected a new attempt");
        };
        assert!(!store.expire("bob", Channel::Text, first));
        assert_eq!(store.channel_status("bob", Channel::Text), ChannelStatus::Connecting);
        assert!(store.expire("bob", Channel::Text, second));
        assert!(!store.has_channel("bob", Channel::Text));
    }

    #[test]
    fn test_connected_channel_does_not_expire() {
        let mut store = PeerStore::new();
        let OpenOutcome::Started(token) = store.begin_connecting("bob", Channel::Text) else {
            panic!("expected a new attempt");
        };
        store.complete_open("bob", Channel::Text, None);
        assert!(!store.expire("bob", Channel::Text, token));
        assert_eq!(store.channel_status("bob", Channel::Text), ChannelStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_and_cancel_timeout() {
        let mut store = PeerStore::new();
        let OpenOutcome::Started(token) = store.begin_connecting("bob", Channel::Text) else {
            panic!("expected a new attempt");
        };
        let job = TimeoutJob::spawn(token, Duration::from_secs(10), async {});
        store.attach_timeout("bob", Channel::Text, job);
        assert!(store
            .channel_state("bob", Channel::Text)
            .unwrap()
            .has_pending_timeout());

        store.complete_open("bob", Channel::Text, None);
        assert!(!store
            .channel_state("bob", Channel::Text)
            .unwrap()
            .has_pending_timeout());

        // A job for an attempt that no longer exists is not attached.
        let stale = TimeoutJob::spawn(token + 100, Duration::from_secs(10), async {});
        store.attach_timeout("bob", Channel::Text, stale);
        assert!(!store
            .channel_state("bob", Channel::Text)
            .unwrap()
            .has_pending_timeout());
    }
}
