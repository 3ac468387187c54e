//! In-process loopback transport.
//!
//! Every participant joins a shared [`LoopbackNetwork`] and receives its
//! transport events and signaling envelopes through unbounded channels.
//! Data channels come in linked pairs: a frame sent on one end is delivered
//! as a [`TransportEvent::Data`] to the other participant. Each end also
//! keeps a journal of what was sent and which buffered amounts were observed,
//! and its `buffered_amount` can be scripted to exercise backpressure.

use super::{DataChannel, DataFrame, PeerTransport, Signaling, TransportEvent};
use crate::core::protocol::{Channel, Message, RegisterMessage, UserStatusMessage};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Channel ──────────────────────────────────────────────────────────────────

/// One observable operation on a [`MemoryChannel`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelOp {
    /// `buffered_amount` was polled and returned this value.
    Buffered(usize),
    Sent(DataFrame),
}

struct RemoteEnd {
    events: mpsc::UnboundedSender<TransportEvent>,
    /// Our username as the receiving side knows it.
    from: String,
    channel: Channel,
}

pub struct MemoryChannel {
    label: String,
    open: AtomicBool,
    fail_sends: AtomicBool,
    buffered: Mutex<VecDeque<usize>>,
    journal: Mutex<Vec<ChannelOp>>,
    remote: Option<RemoteEnd>,
}

impl MemoryChannel {
    fn new(label: &str, remote: Option<RemoteEnd>) -> Self {
        Self {
            label: label.to_string(),
            open: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            buffered: Mutex::new(VecDeque::new()),
            journal: Mutex::new(Vec::new()),
            remote,
        }
    }

    /// An open channel with nobody on the other end.
    pub fn detached(label: &str) -> Self {
        Self::new(label, None)
    }

    /// Values returned by successive `buffered_amount` calls. The last value
    /// sticks once the script runs out.
    pub fn script_buffered(&self, amounts: impl IntoIterator<Item = usize>) {
        let mut script = lock(&self.buffered);
        script.clear();
        script.extend(amounts);
    }

    /// Make every following send fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn journal(&self) -> Vec<ChannelOp> {
        lock(&self.journal).clone()
    }

    pub fn sent(&self) -> Vec<DataFrame> {
        lock(&self.journal)
            .iter()
            .filter_map(|op| match op {
                ChannelOp::Sent(frame) => Some(frame.clone()),
                ChannelOp::Buffered(_) => None,
            })
            .collect()
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn deliver(&self, frame: DataFrame) -> Result<()> {
        if !self.is_open() {
            bail!("channel '{}' is closed", self.label);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            bail!("channel '{}' refused the frame", self.label);
        }
        lock(&self.journal).push(ChannelOp::Sent(frame.clone()));
        if let Some(remote) = &self.remote {
            remote
                .events
                .send(TransportEvent::Data {
                    username: remote.from.clone(),
                    channel: remote.channel,
                    frame,
                })
                .map_err(|_| anyhow!("peer of '{}' is gone", self.label))?;
        }
        Ok(())
    }
}

#[async_trait]
impl DataChannel for MemoryChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_binary(&self, data: Bytes) -> Result<()> {
        self.deliver(DataFrame::Binary(data))
    }

    async fn send_text(&self, text: String) -> Result<()> {
        self.deliver(DataFrame::Text(text))
    }

    async fn buffered_amount(&self) -> usize {
        let amount = {
            let mut script = lock(&self.buffered);
            if script.len() > 1 {
                script.pop_front().unwrap_or_default()
            } else {
                script.front().copied().unwrap_or_default()
            }
        };
        lock(&self.journal).push(ChannelOp::Buffered(amount));
        amount
    }

    async fn close(&self) -> Result<()> {
        self.mark_closed();
        Ok(())
    }
}

// ── Network ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Endpoint {
    events: mpsc::UnboundedSender<TransportEvent>,
    signals: mpsc::UnboundedSender<String>,
}

/// Order-independent key for the link between two users on one channel.
type LinkKey = (String, String, Channel);

fn link_key(a: &str, b: &str, channel: Channel) -> LinkKey {
    if a <= b {
        (a.to_string(), b.to_string(), channel)
    } else {
        (b.to_string(), a.to_string(), channel)
    }
}

/// Both ends of a data link; media links carry none.
#[derive(Default)]
struct Link {
    ends: Vec<Arc<MemoryChannel>>,
}

#[derive(Default)]
struct NetworkState {
    endpoints: HashMap<String, Endpoint>,
    links: HashMap<LinkKey, Link>,
}

/// Shared medium connecting in-process participants.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

/// Everything one participant needs to run an orchestrator on the network.
pub struct LoopbackEndpoint {
    pub transport: Arc<MemoryTransport>,
    pub signaling: Arc<LoopbackSignaling>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    pub signals: mpsc::UnboundedReceiver<String>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `username`. The newcomer gets a `register` envelope and
    /// everyone else a `userActiveStatus` one.
    pub fn join(&self, username: &str) -> LoopbackEndpoint {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (signals_tx, signals) = mpsc::unbounded_channel();

        let register = Message::Register(RegisterMessage {
            success: true,
            username: username.to_string(),
        });
        let presence = Message::UserActiveStatus(UserStatusMessage {
            username: username.to_string(),
            connected: true,
        });
        {
            let mut state = lock(&self.state);
            broadcast(&state.endpoints, &presence);
            if let Ok(raw) = register.to_json() {
                let _ = signals_tx.send(raw);
            }
            state.endpoints.insert(
                username.to_string(),
                Endpoint {
                    events: events_tx,
                    signals: signals_tx,
                },
            );
        }

        LoopbackEndpoint {
            transport: Arc::new(MemoryTransport {
                local: username.to_string(),
                network: self.clone(),
                offered: Mutex::new(HashMap::new()),
            }),
            signaling: Arc::new(LoopbackSignaling {
                network: self.clone(),
            }),
            events,
            signals,
        }
    }

    /// Remove `username`, close its links and tell everyone else.
    pub fn leave(&self, username: &str) {
        let mut state = lock(&self.state);
        state.endpoints.remove(username);
        let gone: Vec<LinkKey> = state
            .links
            .keys()
            .filter(|(a, b, _)| a == username || b == username)
            .cloned()
            .collect();
        for key in gone {
            if let Some(link) = state.links.remove(&key) {
                link.ends.iter().for_each(|end| end.mark_closed());
            }
            let (a, b, channel) = key;
            let other = if a == username { b } else { a };
            if let Some(ep) = state.endpoints.get(&other) {
                let _ = ep.events.send(TransportEvent::ChannelClosed {
                    username: username.to_string(),
                    channel,
                });
            }
        }
        let presence = Message::UserActiveStatus(UserStatusMessage {
            username: username.to_string(),
            connected: false,
        });
        broadcast(&state.endpoints, &presence);
    }

    fn endpoint(&self, username: &str) -> Result<Endpoint> {
        lock(&self.state)
            .endpoints
            .get(username)
            .cloned()
            .with_context(|| format!("{username} is not on the network"))
    }

    fn add_link(&self, a: &str, b: &str, channel: Channel, ends: Vec<Arc<MemoryChannel>>) {
        let mut state = lock(&self.state);
        if let Some(old) = state.links.insert(link_key(a, b, channel), Link { ends }) {
            old.ends.iter().for_each(|end| end.mark_closed());
        }
    }

    fn remove_link(&self, a: &str, b: &str, channel: Channel) -> bool {
        let removed = lock(&self.state).links.remove(&link_key(a, b, channel));
        match removed {
            Some(link) => {
                link.ends.iter().for_each(|end| end.mark_closed());
                true
            }
            None => false,
        }
    }

    fn linked(&self, a: &str, b: &str) -> bool {
        lock(&self.state)
            .links
            .keys()
            .any(|(x, y, _)| (x == a && y == b) || (x == b && y == a))
    }
}

fn broadcast(endpoints: &HashMap<String, Endpoint>, message: &Message) {
    if let Ok(raw) = message.to_json() {
        for ep in endpoints.values() {
            let _ = ep.signals.send(raw.clone());
        }
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

/// [`PeerTransport`] over a [`LoopbackNetwork`].
pub struct MemoryTransport {
    local: String,
    network: LoopbackNetwork,
    /// Tracks offered to each peer, consumed by the matching answer.
    offered: Mutex<HashMap<String, Vec<Channel>>>,
}

impl MemoryTransport {
    fn tracks_of(value: &Value) -> Vec<Channel> {
        value
            .get("tracks")
            .cloned()
            .and_then(|t| serde_json::from_value(t).ok())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    async fn open_channel(&self, username: &str, channel: Channel) -> Result<()> {
        let peer = self.network.endpoint(username)?;
        let own = self.network.endpoint(&self.local)?;

        let (ours, theirs): (Option<Arc<dyn DataChannel>>, Option<Arc<dyn DataChannel>>) =
            if channel.is_data_channel() {
                let label = channel.as_str();
                let ours = Arc::new(MemoryChannel::new(
                    label,
                    Some(RemoteEnd {
                        events: peer.events.clone(),
                        from: self.local.clone(),
                        channel,
                    }),
                ));
                let theirs = Arc::new(MemoryChannel::new(
                    label,
                    Some(RemoteEnd {
                        events: own.events.clone(),
                        from: username.to_string(),
                        channel,
                    }),
                ));
                self.network
                    .add_link(&self.local, username, channel, vec![ours.clone(), theirs.clone()]);
                (
                    Some(ours as Arc<dyn DataChannel>),
                    Some(theirs as Arc<dyn DataChannel>),
                )
            } else {
                self.network.add_link(&self.local, username, channel, Vec::new());
                (None, None)
            };

        debug!(event = "loopback_open", from = %self.local, to = %username, %channel);
        peer.events
            .send(TransportEvent::RemoteChannel {
                username: self.local.clone(),
                channel,
            })
            .map_err(|_| anyhow!("{username} stopped listening"))?;
        peer.events
            .send(TransportEvent::ChannelOpen {
                username: self.local.clone(),
                channel,
                handle: theirs,
            })
            .map_err(|_| anyhow!("{username} stopped listening"))?;
        own.events
            .send(TransportEvent::ChannelOpen {
                username: username.to_string(),
                channel,
                handle: ours,
            })
            .map_err(|_| anyhow!("local event loop is gone"))?;
        Ok(())
    }

    async fn close_channel(&self, username: &str, channel: Channel) -> Result<()> {
        if !self.network.remove_link(&self.local, username, channel) {
            return Ok(());
        }
        if let Ok(peer) = self.network.endpoint(username) {
            let _ = peer.events.send(TransportEvent::ChannelClosed {
                username: self.local.clone(),
                channel,
            });
        }
        Ok(())
    }

    async fn is_connected(&self, username: &str) -> bool {
        self.network.linked(&self.local, username)
    }

    async fn create_offer(&self, username: &str, tracks: &[Channel]) -> Result<Value> {
        lock(&self.offered).insert(username.to_string(), tracks.to_vec());
        Ok(json!({
            "type": "offer",
            "sdp": format!("loopback {} -> {}", self.local, username),
            "tracks": tracks,
        }))
    }

    async fn accept_offer(
        &self,
        username: &str,
        _offer: &Value,
        return_tracks: &[Channel],
    ) -> Result<Value> {
        Ok(json!({
            "type": "answer",
            "sdp": format!("loopback {} -> {}", self.local, username),
            "tracks": return_tracks,
        }))
    }

    /// Completing the exchange delivers the offered tracks to the peer and the
    /// returned tracks to us.
    async fn apply_answer(&self, username: &str, answer: &Value) -> Result<()> {
        let offered = lock(&self.offered).remove(username).unwrap_or_default();
        let returned = Self::tracks_of(answer);
        let peer = self.network.endpoint(username)?;
        let own = self.network.endpoint(&self.local)?;

        for channel in offered {
            self.network.add_link(&self.local, username, channel, Vec::new());
            let _ = peer.events.send(TransportEvent::MediaReady {
                username: self.local.clone(),
                channel,
            });
        }
        for channel in returned {
            self.network.add_link(&self.local, username, channel, Vec::new());
            let _ = own.events.send(TransportEvent::MediaReady {
                username: username.to_string(),
                channel,
            });
        }
        Ok(())
    }

    async fn add_candidate(&self, username: &str, candidate: &Value) -> Result<()> {
        debug!(event = "loopback_candidate", from = %username, %candidate);
        Ok(())
    }
}

// ── Signaling ────────────────────────────────────────────────────────────────

/// Relays envelopes to the addressed participant as JSON text.
pub struct LoopbackSignaling {
    network: LoopbackNetwork,
}

#[async_trait]
impl Signaling for LoopbackSignaling {
    async fn send(&self, message: &Message) -> Result<()> {
        let to = message
            .to()
            .ok_or_else(|| anyhow!("{} has no recipient", message.message_type()))?;
        let raw = message.to_json().context("Failed to encode envelope")?;
        self.network
            .endpoint(to)?
            .signals
            .send(raw)
            .map_err(|_| anyhow!("{to} stopped listening"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::ChannelNotice;

    #[tokio::test]
    async fn test_join_announces_presence() {
        let net = LoopbackNetwork::new();
        let mut alice = net.join("alice");
        let _bob = net.join("bob");

        let first = alice.signals.recv().await.unwrap();
        assert!(first.contains("\"register\""));
        let second = alice.signals.recv().await.unwrap();
        assert!(second.contains("userActiveStatus") && second.contains("bob"));
    }

    #[tokio::test]
    async fn test_data_link_delivers_frames() {
        let net = LoopbackNetwork::new();
        let mut alice = net.join("alice");
        let mut bob = net.join("bob");

        alice.transport.open_channel("bob", Channel::Text).await.unwrap();
        assert!(alice.transport.is_connected("bob").await);

        let handle = match alice.events.recv().await.unwrap() {
            TransportEvent::ChannelOpen {
                username,
                channel,
                handle: Some(handle),
            } => {
                assert_eq!(username, "bob");
                assert_eq!(channel, Channel::Text);
                handle
            }
            other => panic!("unexpected event: {other:?}"),
        };
        assert!(matches!(
            bob.events.recv().await.unwrap(),
            TransportEvent::RemoteChannel { .. }
        ));
        assert!(matches!(
            bob.events.recv().await.unwrap(),
            TransportEvent::ChannelOpen { .. }
        ));

        handle.send_text("hi".into()).await.unwrap();
        match bob.events.recv().await.unwrap() {
            TransportEvent::Data {
                username, frame, ..
            } => {
                assert_eq!(username, "alice");
                assert_eq!(frame, DataFrame::Text("hi".into()));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        alice.transport.close_channel("bob", Channel::Text).await.unwrap();
        assert!(!handle.is_open());
        assert!(handle.send_text("late".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_signaling_routes_by_recipient() {
        let net = LoopbackNetwork::new();
        let alice = net.join("alice");
        let mut bob = net.join("bob");
        let _ = bob.signals.recv().await; // register

        let msg = Message::Disconnect(ChannelNotice {
            from: "alice".into(),
            to: "bob".into(),
            channel: Channel::Video,
        });
        alice.signaling.send(&msg).await.unwrap();
        let raw = bob.signals.recv().await.unwrap();
        assert_eq!(crate::core::protocol::classify(&raw).unwrap(), msg);

        let nobody = Message::Disconnect(ChannelNotice {
            from: "alice".into(),
            to: "carol".into(),
            channel: Channel::Video,
        });
        assert!(alice.signaling.send(&nobody).await.is_err());
    }

    #[tokio::test]
    async fn test_buffered_script_is_sticky() {
        let dc = MemoryChannel::detached("file");
        dc.script_buffered([3, 2]);
        assert_eq!(dc.buffered_amount().await, 3);
        assert_eq!(dc.buffered_amount().await, 2);
        assert_eq!(dc.buffered_amount().await, 2);
        assert_eq!(
            dc.journal(),
            vec![ChannelOp::Buffered(3), ChannelOp::Buffered(2), ChannelOp::Buffered(2)]
        );
    }
}
