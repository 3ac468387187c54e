//! Typed wire messages.
//!
//! Every message is a JSON object with a `type` discriminator and camelCase
//! keys. Signaling messages travel through the relay; `text`,
//! `messageAcknowledgement` and `FILE` travel on open data channels.
//! DATA fragments of a file are raw binary frames and have no JSON form.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ── Channels ─────────────────────────────────────────────────────────────────

/// Logical data path multiplexed over the peer transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    Text,
    File,
    Audio,
    Video,
    Screen,
    Sound,
    RemoteControl,
}

impl Channel {
    pub const ALL: [Channel; 7] = [
        Channel::Text,
        Channel::File,
        Channel::Audio,
        Channel::Video,
        Channel::Screen,
        Channel::Sound,
        Channel::RemoteControl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Text => "text",
            Channel::File => "file",
            Channel::Audio => "audio",
            Channel::Video => "video",
            Channel::Screen => "screen",
            Channel::Sound => "sound",
            Channel::RemoteControl => "remote-control",
        }
    }

    /// Channels backed by a data channel handle (as opposed to media tracks).
    pub fn is_data_channel(self) -> bool {
        matches!(self, Channel::Text | Channel::File | Channel::RemoteControl)
    }

    pub fn is_media(self) -> bool {
        !self.is_data_channel()
    }

    /// Media that only flows from the sharer to the viewer.
    pub fn is_one_way(self) -> bool {
        matches!(self, Channel::Screen | Channel::Sound)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown channel: {s}"))
    }
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// Every message the orchestrator sends or understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Registration result from the signaling relay.
    #[serde(rename = "register")]
    Register(RegisterMessage),
    #[serde(rename = "offer")]
    Offer(OfferMessage),
    #[serde(rename = "answer")]
    Answer(AnswerMessage),
    #[serde(rename = "candidate")]
    Candidate(CandidateMessage),
    /// The peer tore a channel down.
    #[serde(rename = "disconnect")]
    Disconnect(ChannelNotice),
    /// The peer asks this side to re-establish a channel.
    #[serde(rename = "reconnect")]
    Reconnect(ChannelNotice),
    /// Media call invite / response.
    #[serde(rename = "callRequest")]
    CallRequest(InviteMessage),
    /// Remote-control invite / response.
    #[serde(rename = "remoteAccess")]
    RemoteAccess(InviteMessage),
    #[serde(rename = "userActiveStatus")]
    UserActiveStatus(UserStatusMessage),
    /// Transport event observed on the peer's side.
    #[serde(rename = "webrtcEvent")]
    WebrtcEvent(WebrtcEventMessage),
    /// Chat message (data channel).
    #[serde(rename = "text")]
    Text(ChatMessage),
    /// Delivery / read receipt (data channel).
    #[serde(rename = "messageAcknowledgement")]
    MessageAck(MessageAck),
    /// File START / END control fragment (data channel).
    #[serde(rename = "FILE")]
    File(FileFragment),
}

impl Message {
    /// Sender username, when the message carries one.
    pub fn from(&self) -> Option<&str> {
        match self {
            Message::Register(_) | Message::UserActiveStatus(_) => None,
            Message::Offer(m) => Some(&m.from),
            Message::Answer(m) => Some(&m.from),
            Message::Candidate(m) => Some(&m.from),
            Message::Disconnect(m) | Message::Reconnect(m) => Some(&m.from),
            Message::CallRequest(m) | Message::RemoteAccess(m) => Some(&m.from),
            Message::WebrtcEvent(m) => Some(&m.from),
            Message::Text(m) => Some(&m.from),
            Message::MessageAck(m) => Some(&m.from),
            Message::File(m) => Some(&m.from),
        }
    }

    /// Recipient username, when the message carries one.
    pub fn to(&self) -> Option<&str> {
        match self {
            Message::Register(_) | Message::UserActiveStatus(_) => None,
            Message::Offer(m) => Some(&m.to),
            Message::Answer(m) => Some(&m.to),
            Message::Candidate(m) => Some(&m.to),
            Message::Disconnect(m) | Message::Reconnect(m) => Some(&m.to),
            Message::CallRequest(m) | Message::RemoteAccess(m) => Some(&m.to),
            Message::WebrtcEvent(m) => Some(&m.to),
            Message::Text(m) => Some(&m.to),
            Message::MessageAck(m) => Some(&m.to),
            Message::File(m) => Some(&m.to),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ── Signaling payloads ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMessage {
    pub success: bool,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferMessage {
    pub from: String,
    pub to: String,
    pub channel: Channel,
    pub offer: Value,
    /// Adds tracks to an already established connection.
    #[serde(default)]
    pub renegotiate: bool,
    /// Channels the answering side should originate in return.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seek_return_tracks: Vec<Channel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerMessage {
    pub from: String,
    pub to: String,
    pub channel: Channel,
    pub answer: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateMessage {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    pub candidate: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelNotice {
    pub from: String,
    pub to: String,
    pub channel: Channel,
}

/// Invite lifecycle request carried by `callRequest` / `remoteAccess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteRequest {
    Invite,
    Accept,
    Decline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteMessage {
    pub from: String,
    pub to: String,
    pub channel: Channel,
    pub request: InviteRequest,
    #[serde(default)]
    pub is_native_app: bool,
    /// Remote-access accept: operating system of the shared screen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    /// Remote-access accept: zoom factor of the shared screen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_pixel_ratio: Option<f64>,
}

impl InviteMessage {
    pub fn new(from: &str, to: &str, channel: Channel, request: InviteRequest) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            channel,
            request,
            is_native_app: true,
            os: None,
            device_pixel_ratio: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusMessage {
    pub username: String,
    pub connected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WebrtcEventKind {
    ChannelOpen,
    RemoteTrackReceived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebrtcEventMessage {
    pub from: String,
    pub to: String,
    pub channel: Channel,
    pub event: WebrtcEventKind,
}

// ── Data channel payloads ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub from: String,
    pub to: String,
    pub message: String,
    /// Unix time in milliseconds.
    pub time: u64,
}

impl ChatMessage {
    pub fn new(from: &str, to: &str, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.to_string(),
            to: to.to_string(),
            message: message.into(),
            time: now_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Delivered,
    Seen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAck {
    pub id: Uuid,
    pub from: String,
    pub to: String,
    pub message_id: Uuid,
    pub status: MessageStatus,
    pub time: u64,
}

impl MessageAck {
    pub fn new(from: &str, to: &str, message_id: Uuid, status: MessageStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.to_string(),
            to: to.to_string(),
            message_id,
            status,
            time: now_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FragmentType {
    Start,
    End,
}

/// START / END control fragment that brackets the raw DATA fragments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFragment {
    pub fragment_type: FragmentType,
    pub file_id: Uuid,
    pub file_name: String,
    pub file_size: u64,
    /// MIME type; START only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    pub total_fragments: u32,
    /// Always 0 on START; absent on END.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_offset: Option<u32>,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
}

impl FileFragment {
    pub fn start(
        file_id: Uuid,
        file_name: &str,
        file_size: u64,
        file_type: &str,
        total_fragments: u32,
        from: &str,
        to: &str,
    ) -> Self {
        Self {
            fragment_type: FragmentType::Start,
            file_id,
            file_name: file_name.to_string(),
            file_size,
            file_type: Some(file_type.to_string()),
            total_fragments,
            fragment_offset: Some(0),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// END fragment matching this START.
    pub fn end(&self) -> Self {
        Self {
            fragment_type: FragmentType::End,
            file_type: None,
            fragment_offset: None,
            ..self.clone()
        }
    }
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::RemoteControl.to_string(), "remote-control");
        assert_eq!("remote-control".parse::<Channel>().unwrap(), Channel::RemoteControl);
        assert_eq!(
            serde_json::to_value(Channel::RemoteControl).unwrap(),
            json!("remote-control")
        );
        assert!("telepathy".parse::<Channel>().is_err());
    }

    #[test]
    fn test_channel_kinds() {
        assert!(Channel::Text.is_data_channel());
        assert!(Channel::RemoteControl.is_data_channel());
        assert!(Channel::Video.is_media());
        assert!(Channel::Screen.is_one_way());
        assert!(!Channel::Audio.is_one_way());
    }

    #[test]
    fn test_start_fragment_wire_shape() {
        let id = Uuid::new_v4();
        let start = FileFragment::start(id, "a.bin", 30000, "application/octet-stream", 2, "alice", "bob");
        let value = serde_json::to_value(Message::File(start.clone())).unwrap();
        assert_eq!(value["type"], "FILE");
        assert_eq!(value["fragmentType"], "START");
        assert_eq!(value["fileId"], id.to_string());
        assert_eq!(value["fileSize"], 30000);
        assert_eq!(value["totalFragments"], 2);
        assert_eq!(value["fragmentOffset"], 0);
        assert_eq!(value["fileType"], "application/octet-stream");

        let end = serde_json::to_value(Message::File(start.end())).unwrap();
        assert_eq!(end["fragmentType"], "END");
        assert!(end.get("fragmentOffset").is_none());
        assert!(end.get("fileType").is_none());
    }

    #[test]
    fn test_offer_omits_empty_return_tracks() {
        let offer = Message::Offer(OfferMessage {
            from: "alice".into(),
            to: "bob".into(),
            channel: Channel::Screen,
            offer: json!({"sdp": "v=0"}),
            renegotiate: true,
            seek_return_tracks: vec![],
        });
        let value = serde_json::to_value(&offer).unwrap();
        assert_eq!(value["type"], "offer");
        assert_eq!(value["renegotiate"], true);
        assert!(value.get("seekReturnTracks").is_none());
    }

    #[test]
    fn test_invite_parses_from_json() {
        let raw = json!({
            "type": "callRequest",
            "from": "bob",
            "to": "alice",
            "channel": "video",
            "request": "accept"
        });
        let msg: Message = serde_json::from_value(raw).unwrap();
        match msg {
            Message::CallRequest(m) => {
                assert_eq!(m.channel, Channel::Video);
                assert_eq!(m.request, InviteRequest::Accept);
                assert!(!m.is_native_app);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
