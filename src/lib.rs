//! peerlink: peer-session orchestrator for P2P text, file and media channels.
//!
//! The crate keeps, for every remote peer, the negotiation state of its
//! transport channels, queues outbound messages until a channel opens, and
//! runs a chunked, backpressure-aware file transfer protocol on top of any
//! transport that implements [`core::connection::DataChannel`].

pub mod core;
pub mod ui;
pub mod utils;

pub use crate::core::config::SessionConfig;
pub use crate::core::engine::Orchestrator;
pub use crate::core::error::{FileSendErrorType, SessionError};
pub use crate::core::protocol::{Channel, Message};
pub use crate::ui::notify::{UiEvent, UiSink};
