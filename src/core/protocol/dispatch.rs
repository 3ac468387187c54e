//! Envelope classification.
//!
//! `classify` turns raw JSON text into exactly one [`Message`] variant.
//! Unknown `type` values and unusable payloads come back as errors so the
//! orchestrator can log and drop them without stopping.

use super::messages::Message;
use crate::core::error::SessionError;
use serde_json::Value;
use std::fmt;

/// Every `type` discriminator this side understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Register,
    Offer,
    Answer,
    Candidate,
    Disconnect,
    Reconnect,
    CallRequest,
    RemoteAccess,
    UserActiveStatus,
    WebrtcEvent,
    Text,
    MessageAcknowledgement,
    File,
}

impl MessageType {
    pub fn from_wire(kind: &str) -> Option<Self> {
        let ty = match kind {
            "register" => MessageType::Register,
            "offer" => MessageType::Offer,
            "answer" => MessageType::Answer,
            "candidate" => MessageType::Candidate,
            "disconnect" => MessageType::Disconnect,
            "reconnect" => MessageType::Reconnect,
            "callRequest" => MessageType::CallRequest,
            "remoteAccess" => MessageType::RemoteAccess,
            "userActiveStatus" => MessageType::UserActiveStatus,
            "webrtcEvent" => MessageType::WebrtcEvent,
            "text" => MessageType::Text,
            "messageAcknowledgement" => MessageType::MessageAcknowledgement,
            "FILE" => MessageType::File,
            _ => return None,
        };
        Some(ty)
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            MessageType::Register => "register",
            MessageType::Offer => "offer",
            MessageType::Answer => "answer",
            MessageType::Candidate => "candidate",
            MessageType::Disconnect => "disconnect",
            MessageType::Reconnect => "reconnect",
            MessageType::CallRequest => "callRequest",
            MessageType::RemoteAccess => "remoteAccess",
            MessageType::UserActiveStatus => "userActiveStatus",
            MessageType::WebrtcEvent => "webrtcEvent",
            MessageType::Text => "text",
            MessageType::MessageAcknowledgement => "messageAcknowledgement",
            MessageType::File => "FILE",
        }
    }

    /// Types that arrive over a data channel rather than the relay.
    pub fn is_data_channel(self) -> bool {
        matches!(
            self,
            MessageType::Text | MessageType::MessageAcknowledgement | MessageType::File
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Register(_) => MessageType::Register,
            Message::Offer(_) => MessageType::Offer,
            Message::Answer(_) => MessageType::Answer,
            Message::Candidate(_) => MessageType::Candidate,
            Message::Disconnect(_) => MessageType::Disconnect,
            Message::Reconnect(_) => MessageType::Reconnect,
            Message::CallRequest(_) => MessageType::CallRequest,
            Message::RemoteAccess(_) => MessageType::RemoteAccess,
            Message::UserActiveStatus(_) => MessageType::UserActiveStatus,
            Message::WebrtcEvent(_) => MessageType::WebrtcEvent,
            Message::Text(_) => MessageType::Text,
            Message::MessageAck(_) => MessageType::MessageAcknowledgement,
            Message::File(_) => MessageType::File,
        }
    }
}

/// Parse raw envelope text into a typed message.
pub fn classify(raw: &str) -> Result<Message, SessionError> {
    let value: Value = serde_json::from_str(raw).map_err(SessionError::malformed)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| SessionError::Malformed("missing `type` field".into()))?;

    let ty = MessageType::from_wire(kind)
        .ok_or_else(|| SessionError::UnknownMessageType(kind.to_string()))?;

    serde_json::from_value::<Message>(value)
        .map_err(|e| SessionError::Malformed(format!("{ty}: {e}")))
}
