//! Per-channel message queues, chat messages and receipts.

use super::Orchestrator;
use crate::core::error::SessionError;
use crate::core::peer_store::{ChannelStatus, Payload, QueuedMessage};
use crate::core::protocol::{Channel, ChatMessage, Message, MessageAck, MessageStatus};
use crate::ui::notify::UiEvent;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

impl Orchestrator {
    /// Send a chat message on the `text` channel, opening it on demand.
    /// Returns the message id used by receipts.
    pub async fn send_text(&self, username: &str, text: &str) -> Result<Uuid, SessionError> {
        let chat = ChatMessage::new(&self.me().await, username, text);
        let id = chat.id;
        self.send_message(username, Channel::Text, &Message::Text(chat), Some(id))
            .await?;
        Ok(id)
    }

    /// Queue any JSON payload on a data channel.
    pub async fn send_payload(
        &self,
        username: &str,
        channel: Channel,
        payload: &Value,
    ) -> Result<Uuid, SessionError> {
        let text = serde_json::to_string(payload).map_err(SessionError::malformed)?;
        self.enqueue(username, QueuedMessage::text(channel, text)).await
    }

    /// Queue raw bytes on a data channel.
    pub async fn send_binary(
        &self,
        username: &str,
        channel: Channel,
        data: bytes::Bytes,
    ) -> Result<Uuid, SessionError> {
        let message = QueuedMessage {
            id: Uuid::new_v4(),
            channel,
            payload: Payload::Binary(data),
        };
        self.enqueue(username, message).await
    }

    /// Mark messages from `username` as read and tell the sender.
    pub async fn acknowledge_seen(
        &self,
        username: &str,
        message_ids: &[Uuid],
    ) -> Result<(), SessionError> {
        let me = self.me().await;
        for id in message_ids {
            let ack = MessageAck::new(&me, username, *id, MessageStatus::Seen);
            self.send_message(username, Channel::Text, &Message::MessageAck(ack), None)
                .await?;
        }
        if let Some(peer) = self.inner.store.lock().await.get_mut(username) {
            peer.reset_unread();
        }
        Ok(())
    }

    pub(super) async fn send_message(
        &self,
        username: &str,
        channel: Channel,
        message: &Message,
        id: Option<Uuid>,
    ) -> Result<Uuid, SessionError> {
        let text = message.to_json().map_err(SessionError::malformed)?;
        let mut queued = QueuedMessage::text(channel, text);
        if let Some(id) = id {
            queued = queued.with_id(id);
        }
        self.enqueue(username, queued).await
    }

    async fn enqueue(&self, username: &str, message: QueuedMessage) -> Result<Uuid, SessionError> {
        let channel = message.channel;
        if !channel.is_data_channel() {
            return Err(SessionError::NotADataChannel(channel));
        }
        let id = message.id;
        let status = {
            let mut store = self.inner.store.lock().await;
            store.get_or_create(username).enqueue_message(message);
            store.channel_status(username, channel)
        };
        match status {
            ChannelStatus::Connected => self.flush_messages(username, channel).await,
            ChannelStatus::Connecting => {}
            ChannelStatus::NotConnected => self.request_open(username, channel).await,
        }
        Ok(id)
    }

    /// Send every queued message of `channel` in order.
    ///
    /// Delivery is at most once: a message is taken off the queue before it
    /// is sent; a failed send is reported and stops the flush.
    pub(super) async fn flush_messages(&self, username: &str, channel: Channel) {
        {
            let mut store = self.inner.store.lock().await;
            let Some(peer) = store.get_mut(username) else {
                return;
            };
            if !peer.begin_flush(channel) {
                debug!(event = "flush_in_progress", peer = %username, %channel);
                return;
            }
        }

        loop {
            let next = {
                let mut store = self.inner.store.lock().await;
                let handle = store.open_handle(username, channel);
                let message = match (&handle, store.get_mut(username)) {
                    (Some(_), Some(peer)) => peer.next_message(channel),
                    _ => None,
                };
                match (handle, message) {
                    (Some(handle), Some(message)) => Some((handle, message)),
                    _ => {
                        if let Some(peer) = store.get_mut(username) {
                            peer.end_flush(channel);
                        }
                        None
                    }
                }
            };
            let Some((handle, message)) = next else {
                return;
            };

            let sent = match message.payload {
                Payload::Text(text) => handle.send_text(text).await,
                Payload::Binary(data) => handle.send_binary(data).await,
            };

            let mut store = self.inner.store.lock().await;
            match sent {
                Ok(()) => store.touch_channel(username, channel),
                Err(e) => {
                    if let Some(peer) = store.get_mut(username) {
                        peer.end_flush(channel);
                    }
                    drop(store);
                    warn!(
                        event = "queued_send_failed",
                        peer = %username,
                        %channel,
                        message_id = %message.id,
                        %e,
                        "Dropping queued message"
                    );
                    self.emit(UiEvent::MessageSendFailed {
                        username: username.to_string(),
                        channel,
                        message_id: message.id,
                        reason: e.to_string(),
                    });
                    return;
                }
            }
        }
    }

    // ── Inbound ──────────────────────────────────────────────────────────

    pub(super) async fn handle_chat(&self, from: &str, chat: ChatMessage) -> Result<(), SessionError> {
        let unread = self
            .inner
            .store
            .lock()
            .await
            .get_or_create(from)
            .increment_unread();
        let message_id = chat.id;
        self.emit(UiEvent::MessageReceived {
            message: chat,
            unread,
        });

        let ack = MessageAck::new(&self.me().await, from, message_id, MessageStatus::Delivered);
        self.send_message(from, Channel::Text, &Message::MessageAck(ack), None)
            .await?;
        Ok(())
    }

    pub(super) fn handle_ack(&self, ack: MessageAck) {
        self.emit(UiEvent::MessageStatusChanged {
            username: ack.from,
            message_id: ack.message_id,
            status: ack.status,
        });
    }
}
