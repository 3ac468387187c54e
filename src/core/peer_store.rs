//! Per-peer context: channel states, outbound queues and timers.
//!
//! Everything here is synchronous. The orchestrator keeps the store behind
//! one async mutex and never holds it across a transport call.

use crate::core::connection::DataChannel;
use crate::core::pipeline::OutgoingFile;
use crate::core::protocol::Channel;
use crate::core::queue::Queue;
use crate::core::timer::TimeoutJob;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

// ── Channel state ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    NotConnected,
    Connecting,
    Connected,
}

/// Negotiation state of one channel with one peer.
///
/// A missing `ChannelState` reads as [`ChannelStatus::NotConnected`];
/// disconnecting removes it instead of demoting it.
pub struct ChannelState {
    pub channel: Channel,
    pub(crate) status: ChannelStatus,
    pub(crate) handle: Option<Arc<dyn DataChannel>>,
    pub(crate) timeout: Option<TimeoutJob>,
    pub(crate) token: u64,
    pub(crate) last_used: Instant,
}

impl ChannelState {
    pub(crate) fn connecting(channel: Channel, token: u64) -> Self {
        Self {
            channel,
            status: ChannelStatus::Connecting,
            handle: None,
            timeout: None,
            token,
            last_used: Instant::now(),
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn handle(&self) -> Option<&Arc<dyn DataChannel>> {
        self.handle.as_ref()
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn has_pending_timeout(&self) -> bool {
        self.timeout.is_some()
    }

    pub(crate) fn cancel_timeout(&mut self) {
        if let Some(job) = self.timeout.take() {
            job.cancel();
        }
    }
}

impl std::fmt::Debug for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelState")
            .field("channel", &self.channel)
            .field("status", &self.status)
            .field("has_handle", &self.handle.is_some())
            .field("token", &self.token)
            .finish()
    }
}

// ── Queued messages ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

/// An application message waiting for its channel.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub id: Uuid,
    pub channel: Channel,
    pub payload: Payload,
}

impl QueuedMessage {
    pub fn text(channel: Channel, text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel,
            payload: Payload::Text(text),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }
}

// ── Peer context ─────────────────────────────────────────────────────────────

pub struct PeerContext {
    pub username: String,
    pub(crate) channels: HashMap<Channel, ChannelState>,
    messages: HashMap<Channel, Queue<QueuedMessage>>,
    files: Queue<OutgoingFile>,
    /// Generation of the running file drain, if any.
    file_drain: Option<u64>,
    flushing: HashSet<Channel>,
    reconnect: bool,
    last_activity: Instant,
    unread: u32,
}

impl PeerContext {
    fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            channels: HashMap::new(),
            messages: HashMap::new(),
            files: Queue::new(),
            file_drain: None,
            flushing: HashSet::new(),
            reconnect: true,
            last_activity: Instant::now(),
            unread: 0,
        }
    }

    pub fn channel(&self, channel: Channel) -> Option<&ChannelState> {
        self.channels.get(&channel)
    }

    pub fn status(&self, channel: Channel) -> ChannelStatus {
        self.channels
            .get(&channel)
            .map_or(ChannelStatus::NotConnected, |s| s.status)
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    // ── Messages ─────────────────────────────────────────────────────────

    pub fn enqueue_message(&mut self, message: QueuedMessage) {
        self.messages
            .entry(message.channel)
            .or_default()
            .enqueue(message);
    }

    pub fn pending_messages(&self, channel: Channel) -> usize {
        self.messages.get(&channel).map_or(0, Queue::len)
    }

    /// Claim the flush of `channel`. `false` when one is already running.
    pub fn begin_flush(&mut self, channel: Channel) -> bool {
        self.flushing.insert(channel)
    }

    pub fn end_flush(&mut self, channel: Channel) {
        self.flushing.remove(&channel);
    }

    /// Take the head message of `channel`. Once taken it is never requeued.
    pub fn next_message(&mut self, channel: Channel) -> Option<QueuedMessage> {
        let queue = self.messages.get_mut(&channel)?;
        if queue.is_empty() {
            return None;
        }
        queue.dequeue().ok()
    }

    // ── Files ────────────────────────────────────────────────────────────

    pub fn enqueue_file(&mut self, file: OutgoingFile) {
        self.files.enqueue(file);
    }

    pub fn pending_files(&self) -> usize {
        self.files.len()
    }

    pub fn queued_file_ids(&self) -> Vec<Uuid> {
        self.files.iter().map(|f| f.id).collect()
    }

    /// Claim the file drain for `generation`. `false` when one is already
    /// running.
    pub fn begin_drain(&mut self, generation: u64) -> bool {
        if self.file_drain.is_some() {
            return false;
        }
        self.file_drain = Some(generation);
        true
    }

    /// Release the drain claim. A drain that no longer owns it changes
    /// nothing.
    pub fn end_drain(&mut self, generation: u64) {
        if self.owns_drain(generation) {
            self.file_drain = None;
        }
    }

    pub fn owns_drain(&self, generation: u64) -> bool {
        self.file_drain == Some(generation)
    }

    pub fn is_draining(&self) -> bool {
        self.file_drain.is_some()
    }

    pub fn front_file(&self) -> Option<OutgoingFile> {
        if self.files.is_empty() {
            return None;
        }
        self.files.front().ok().cloned()
    }

    /// Dequeue the head file if it is still `id`.
    pub fn pop_file(&mut self, id: Uuid) -> Option<OutgoingFile> {
        match self.files.front() {
            Ok(head) if head.id == id => self.files.dequeue().ok(),
            _ => None,
        }
    }

    // ── Chat bookkeeping ─────────────────────────────────────────────────

    pub fn increment_unread(&mut self) -> u32 {
        self.unread += 1;
        self.unread
    }

    pub fn reset_unread(&mut self) {
        self.unread = 0;
    }

    pub fn unread(&self) -> u32 {
        self.unread
    }

    pub fn reconnect_eligible(&self) -> bool {
        self.reconnect
    }

    pub fn set_reconnect(&mut self, eligible: bool) {
        self.reconnect = eligible;
    }

    fn cancel_all_timers(&mut self) {
        for state in self.channels.values_mut() {
            state.cancel_timeout();
        }
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct PeerStore {
    pub(crate) peers: HashMap<String, PeerContext>,
    next_token: u64,
}

impl PeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, username: &str) -> &mut PeerContext {
        self.peers
            .entry(username.to_string())
            .or_insert_with(|| PeerContext::new(username))
    }

    pub fn get(&self, username: &str) -> Option<&PeerContext> {
        self.peers.get(username)
    }

    pub fn get_mut(&mut self, username: &str) -> Option<&mut PeerContext> {
        self.peers.get_mut(username)
    }

    pub fn usernames(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    pub fn has_channel(&self, username: &str, channel: Channel) -> bool {
        self.channel_state(username, channel).is_some()
    }

    pub fn channel_state(&self, username: &str, channel: Channel) -> Option<&ChannelState> {
        self.peers.get(username)?.channels.get(&channel)
    }

    /// Whether any peer still has `channel` CONNECTED.
    pub fn any_connected(&self, channel: Channel) -> bool {
        self.peers
            .values()
            .any(|p| p.status(channel) == ChannelStatus::Connected)
    }

    pub fn channel_status(&self, username: &str, channel: Channel) -> ChannelStatus {
        self.peers
            .get(username)
            .map_or(ChannelStatus::NotConnected, |p| p.status(channel))
    }

    /// Handle of a CONNECTED data channel.
    pub fn open_handle(&self, username: &str, channel: Channel) -> Option<Arc<dyn DataChannel>> {
        self.channel_state(username, channel)
            .filter(|s| s.status == ChannelStatus::Connected)
            .and_then(|s| s.handle.clone())
    }

    /// Record a successful send on `channel`.
    pub fn touch_channel(&mut self, username: &str, channel: Channel) {
        if let Some(peer) = self.peers.get_mut(username) {
            peer.touch();
            if let Some(state) = peer.channels.get_mut(&channel) {
                state.last_used = Instant::now();
            }
        }
    }

    /// Cancel the pending timer, then drop the channel state.
    pub fn remove_channel(&mut self, username: &str, channel: Channel) -> Option<ChannelState> {
        let peer = self.peers.get_mut(username)?;
        let mut state = peer.channels.remove(&channel)?;
        state.cancel_timeout();
        Some(state)
    }

    /// Cancel every timer of `username` and forget it with all its queues.
    /// Returns the channels that were still tracked.
    pub fn remove_peer(&mut self, username: &str) -> Vec<ChannelState> {
        match self.peers.remove(username) {
            Some(mut peer) => {
                peer.cancel_all_timers();
                peer.channels.into_values().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        for username in self.usernames() {
            self.remove_peer(&username);
        }
    }

    pub fn next_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let mut store = PeerStore::new();
        store.get_or_create("bob").set_reconnect(false);
        assert!(!store.get_or_create("bob").reconnect_eligible());
        assert_eq!(store.usernames(), vec!["bob".to_string()]);
    }

    #[test]
    fn test_missing_state_reads_not_connected() {
        let mut store = PeerStore::new();
        assert_eq!(store.channel_status("bob", Channel::Text), ChannelStatus::NotConnected);
        store.get_or_create("bob");
        assert_eq!(store.channel_status("bob", Channel::Text), ChannelStatus::NotConnected);
        assert!(!store.has_channel("bob", Channel::Text));
    }

    #[test]
    fn test_message_queue_per_channel() {
        let mut store = PeerStore::new();
        let peer = store.get_or_create("bob");
        peer.enqueue_message(QueuedMessage::text(Channel::Text, "one".into()));
        peer.enqueue_message(QueuedMessage::text(Channel::RemoteControl, "move".into()));
        peer.enqueue_message(QueuedMessage::text(Channel::Text, "two".into()));

        assert_eq!(peer.pending_messages(Channel::Text), 2);
        assert_eq!(peer.pending_messages(Channel::RemoteControl), 1);
        let first = peer.next_message(Channel::Text).unwrap();
        assert_eq!(first.payload, Payload::Text("one".into()));
        assert!(peer.next_message(Channel::File).is_none());
    }

    #[test]
    fn test_flush_and_drain_claims() {
        let mut store = PeerStore::new();
        let peer = store.get_or_create("bob");
        assert!(peer.begin_flush(Channel::Text));
        assert!(!peer.begin_flush(Channel::Text));
        assert!(peer.begin_flush(Channel::RemoteControl));
        peer.end_flush(Channel::Text);
        assert!(peer.begin_flush(Channel::Text));

        assert!(peer.begin_drain(1));
        assert!(!peer.begin_drain(2));
        peer.end_drain(1);
        assert!(peer.begin_drain(2));
    }

    #[test]
    fn test_stale_drain_cannot_release_newer_claim() {
        let mut store = PeerStore::new();
        let first = store.next_token();
        assert!(store.get_or_create("bob").begin_drain(first));

        // The context is recreated while the first drain is still winding down.
        store.remove_peer("bob");
        let second = store.next_token();
        assert_ne!(first, second);
        assert!(store.get_or_create("bob").begin_drain(second));

        let peer = store.get_or_create("bob");
        peer.end_drain(first);
        assert!(peer.owns_drain(second));
        assert!(!peer.begin_drain(first));
        peer.end_drain(second);
        assert!(!peer.is_draining());
    }

    #[test]
    fn test_pop_file_only_matches_head() {
        let mut store = PeerStore::new();
        let peer = store.get_or_create("bob");
        let a = OutgoingFile::from_bytes("a", Bytes::from_static(b"a"), "bob");
        let b = OutgoingFile::from_bytes("b", Bytes::from_static(b"b"), "bob");
        peer.enqueue_file(a.clone());
        peer.enqueue_file(b.clone());

        assert!(peer.pop_file(b.id).is_none());
        assert_eq!(peer.front_file().unwrap().id, a.id);
        assert_eq!(peer.pop_file(a.id).unwrap().id, a.id);
        assert_eq!(peer.queued_file_ids(), vec![b.id]);
    }

    #[test]
    fn test_tokens_are_monotonic() {
        let mut store = PeerStore::new();
        let a = store.next_token();
        let b = store.next_token();
        assert!(b > a);
    }

    #[test]
    fn test_remove_peer_drops_everything() {
        let mut store = PeerStore::new();
        let peer = store.get_or_create("bob");
        peer.enqueue_message(QueuedMessage::text(Channel::Text, "x".into()));
        peer.channels
            .insert(Channel::Text, ChannelState::connecting(Channel::Text, 1));
        let removed = store.remove_peer("bob");
        assert_eq!(removed.len(), 1);
        assert!(store.get("bob").is_none());
        store.get_or_create("carol");
        store.clear();
        assert!(store.usernames().is_empty());
    }
}
