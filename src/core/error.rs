//! Error taxonomy for the orchestrator.

use crate::core::protocol::Channel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the session orchestrator.
///
/// Transport and negotiation failures are turned into UI events at the
/// orchestrator boundary; these values travel between internal layers and
/// into logs.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Negotiation did not complete within the configured bound.
    #[error("{channel} channel with {username} did not open within {timeout:?}")]
    ChannelTimeout {
        username: String,
        channel: Channel,
        timeout: Duration,
    },

    /// A send was attempted without a live channel.
    #[error("no open {channel} channel with {username}")]
    ChannelNotOpen { username: String, channel: Channel },

    /// Read or send failure in the middle of a file.
    #[error("transfer of file {file_id} failed: {reason}")]
    GenericTransfer { file_id: Uuid, reason: String },

    /// `front`/`dequeue` on an empty queue.
    #[error("queue is empty")]
    EmptyQueue,

    /// The envelope `type` is not one this side understands.
    #[error("unknown message type `{0}`")]
    UnknownMessageType(String),

    /// Known type, unusable payload.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A file source could not be opened or read.
    #[error("file read error: {0}")]
    Read(#[from] std::io::Error),

    /// A second invite while one is still outstanding.
    #[error("an invite with {username} is already pending")]
    InvitePending { username: String },

    /// Accept / decline / cancel without a matching invite.
    #[error("no pending invite with {username}")]
    NoPendingInvite { username: String },

    /// A data-channel operation was asked of a media channel.
    #[error("{0} is not a data channel")]
    NotADataChannel(Channel),

    /// A media operation was asked of a data channel.
    #[error("{0} is not a media channel")]
    NotAMediaChannel(Channel),

    /// The transport collaborator refused an operation.
    #[error("transport error: {0}")]
    Transport(String),
}

impl SessionError {
    pub fn transport(err: impl fmt::Display) -> Self {
        SessionError::Transport(err.to_string())
    }

    pub fn malformed(err: impl fmt::Display) -> Self {
        SessionError::Malformed(err.to_string())
    }
}

/// Failure class reported to the UI for an outgoing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileSendErrorType {
    /// No open channel: the drain stops and the queue is kept.
    ChannelNotOpen,
    /// Read or send failure: only the current file is dropped.
    GenericError,
}

impl FileSendErrorType {
    /// Map a transfer error onto its UI class.
    pub fn classify(err: &SessionError) -> Self {
        match err {
            SessionError::ChannelNotOpen { .. } => FileSendErrorType::ChannelNotOpen,
            _ => FileSendErrorType::GenericError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_file_errors() {
        let closed = SessionError::ChannelNotOpen {
            username: "bob".into(),
            channel: Channel::File,
        };
        assert_eq!(FileSendErrorType::classify(&closed), FileSendErrorType::ChannelNotOpen);

        let read = SessionError::Read(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(FileSendErrorType::classify(&read), FileSendErrorType::GenericError);
    }

    #[test]
    fn test_error_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&FileSendErrorType::ChannelNotOpen).unwrap(),
            "\"CHANNEL_NOT_OPEN\""
        );
        assert_eq!(
            serde_json::to_string(&FileSendErrorType::GenericError).unwrap(),
            "\"GENERIC_ERROR\""
        );
    }
}
