//! Wire protocol: typed signaling / data-channel messages and the router
//! that classifies raw JSON envelopes into them.

pub mod dispatch;
pub mod messages;

pub use dispatch::{classify, MessageType};
pub use messages::{
    AnswerMessage, CandidateMessage, Channel, ChannelNotice, ChatMessage, FileFragment,
    FragmentType, InviteMessage, InviteRequest, Message, MessageAck, MessageStatus, OfferMessage,
    RegisterMessage, UserStatusMessage, WebrtcEventKind, WebrtcEventMessage,
};
