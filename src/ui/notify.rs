//! User-facing notification model.
//!
//! The orchestrator never renders anything: every state change a user could
//! care about is pushed as a [`UiEvent`] into a [`UiSink`]. Verbose details
//! belong in `tracing` logs, not in these events.

use crate::core::error::FileSendErrorType;
use crate::core::protocol::{Channel, ChatMessage, FileFragment, MessageStatus};
use crate::core::session::InviteKind;
use crate::utils::formatters::{format_file_size, truncate_name};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Longest file name shown in a notification.
const MAX_NAME_LEN: usize = 40;

// ── Notification Level ───────────────────────────────────────────────────────

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NotifyLevel {
    /// Neutral informational message (e.g. progress, incoming invite).
    Info,
    /// Positive outcome (e.g. "Connected", "Transfer complete").
    Success,
    /// Non-critical issue (e.g. "Declined", "Peer offline").
    Warning,
    /// Actionable error (e.g. "Transfer failed").
    Error,
}

impl NotifyLevel {
    /// Short prefix for quick visual scan.
    pub fn icon(self) -> &'static str {
        match self {
            NotifyLevel::Info => "(i)",
            NotifyLevel::Success => "(+)",
            NotifyLevel::Warning => "(x)",
            NotifyLevel::Error => "(!)",
        }
    }
}

/// A rendered one-line notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub level: NotifyLevel,
    pub message: String,
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.level.icon(), self.message)
    }
}

// ── Events ───────────────────────────────────────────────────────────────────

/// Dialog-style prompts.
#[derive(Debug, Clone, PartialEq)]
pub enum Popup {
    /// Local invite sent, waiting for the peer.
    Calling {
        username: String,
        channel: Channel,
        kind: InviteKind,
    },
    /// The peer is inviting this side.
    IncomingInvite {
        username: String,
        channel: Channel,
        kind: InviteKind,
    },
    Declined {
        username: String,
        channel: Channel,
        kind: InviteKind,
    },
    InviteTimedOut {
        username: String,
        channel: Channel,
        kind: InviteKind,
    },
    /// The peer ended a media or remote-control session.
    Disconnected { username: String, channel: Channel },
}

/// Everything the orchestrator reports to the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Registered {
        username: String,
    },
    UserStatusChanged {
        username: String,
        connected: bool,
    },
    ChannelConnected {
        username: String,
        channel: Channel,
    },
    ChannelDisconnected {
        username: String,
        channel: Channel,
    },
    ChannelTimeout {
        username: String,
        channel: Channel,
    },
    MessageReceived {
        message: ChatMessage,
        unread: u32,
    },
    MessageStatusChanged {
        username: String,
        message_id: Uuid,
        status: MessageStatus,
    },
    /// A queued payload could not be sent and was dropped.
    MessageSendFailed {
        username: String,
        channel: Channel,
        message_id: Uuid,
        reason: String,
    },
    /// START or END seen; `sent` tells the direction.
    FileMetadata {
        fragment: FileFragment,
        sent: bool,
    },
    FileProgress {
        username: String,
        file_id: Uuid,
        fragment_offset: u32,
        progress: f64,
        sent: bool,
    },
    FileShareError {
        file_id: Uuid,
        to: String,
        error: FileSendErrorType,
        reason: String,
    },
    FileReceived {
        username: String,
        file_id: Uuid,
        file_name: String,
        size: u64,
    },
    FileSent {
        username: String,
        file_id: Uuid,
        file_name: String,
    },
    Popup(Popup),
    RemoteAccessReady {
        username: String,
    },
    MediaStreamReady {
        username: String,
        channel: Channel,
    },
}

impl UiEvent {
    pub fn level(&self) -> NotifyLevel {
        match self {
            UiEvent::ChannelConnected { .. }
            | UiEvent::Registered { .. }
            | UiEvent::FileReceived { .. }
            | UiEvent::FileSent { .. }
            | UiEvent::RemoteAccessReady { .. }
            | UiEvent::MediaStreamReady { .. } => NotifyLevel::Success,
            UiEvent::ChannelDisconnected { .. }
            | UiEvent::Popup(Popup::Declined { .. })
            | UiEvent::Popup(Popup::InviteTimedOut { .. })
            | UiEvent::Popup(Popup::Disconnected { .. }) => NotifyLevel::Warning,
            UiEvent::ChannelTimeout { .. }
            | UiEvent::MessageSendFailed { .. }
            | UiEvent::FileShareError { .. } => NotifyLevel::Error,
            _ => NotifyLevel::Info,
        }
    }

    /// One-line text for status bars and logs.
    pub fn notification(&self) -> Notification {
        let message = match self {
            UiEvent::Registered { username } => format!("Registered as {username}"),
            UiEvent::UserStatusChanged {
                username,
                connected,
            } => {
                let state = if *connected { "online" } else { "offline" };
                format!("{username} is {state}")
            }
            UiEvent::ChannelConnected { username, channel } => {
                format!("{channel} channel with {username} connected")
            }
            UiEvent::ChannelDisconnected { username, channel } => {
                format!("{channel} channel with {username} disconnected")
            }
            UiEvent::ChannelTimeout { username, channel } => {
                format!("{channel} channel with {username} timed out")
            }
            UiEvent::MessageReceived { message, .. } => {
                format!("{}: {}", message.from, message.message)
            }
            UiEvent::MessageStatusChanged {
                username, status, ..
            } => match status {
                MessageStatus::Delivered => format!("Message delivered to {username}"),
                MessageStatus::Seen => format!("{username} read your message"),
            },
            UiEvent::MessageSendFailed {
                username, reason, ..
            } => format!("Message to {username} failed: {reason}"),
            UiEvent::FileMetadata { fragment, sent } => {
                let dir = if *sent { "Sending" } else { "Receiving" };
                format!(
                    "{dir} {} ({})",
                    truncate_name(&fragment.file_name, MAX_NAME_LEN),
                    format_file_size(fragment.file_size)
                )
            }
            UiEvent::FileProgress {
                file_id, progress, ..
            } => format!("{file_id}: {progress:.2}%"),
            UiEvent::FileShareError {
                to, error, reason, ..
            } => format!("File to {to} failed ({error:?}): {reason}"),
            UiEvent::FileReceived {
                username,
                file_name,
                size,
                ..
            } => format!(
                "Received {file_name} ({}) from {username}",
                format_file_size(*size)
            ),
            UiEvent::FileSent {
                username,
                file_name,
                ..
            } => format!("Sent {file_name} to {username}"),
            UiEvent::Popup(popup) => match popup {
                Popup::Calling { username, kind, .. } => format!("Calling {username} ({kind})"),
                Popup::IncomingInvite {
                    username,
                    channel,
                    kind,
                } => format!("{username} invites you to {kind} over {channel}"),
                Popup::Declined { username, kind, .. } => {
                    format!("{username} declined the {kind}")
                }
                Popup::InviteTimedOut { username, kind, .. } => {
                    format!("No answer from {username} for the {kind}")
                }
                Popup::Disconnected { username, channel } => {
                    format!("{username} ended the {channel} session")
                }
            },
            UiEvent::RemoteAccessReady { username } => {
                format!("Remote control of {username} is ready")
            }
            UiEvent::MediaStreamReady { username, channel } => {
                format!("{channel} stream with {username} is live")
            }
        };
        Notification {
            level: self.level(),
            message,
        }
    }
}

// ── Sink ─────────────────────────────────────────────────────────────────────

/// Receiver of UI events. Must not block.
pub trait UiSink: Send + Sync {
    fn emit(&self, event: UiEvent);
}

impl UiSink for mpsc::UnboundedSender<UiEvent> {
    fn emit(&self, event: UiEvent) {
        // A closed receiver means the UI is gone; nothing left to notify.
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        let connected = UiEvent::ChannelConnected {
            username: "bob".into(),
            channel: Channel::Text,
        };
        assert_eq!(connected.level(), NotifyLevel::Success);

        let timeout = UiEvent::ChannelTimeout {
            username: "bob".into(),
            channel: Channel::File,
        };
        assert_eq!(timeout.level(), NotifyLevel::Error);

        let invite = UiEvent::Popup(Popup::IncomingInvite {
            username: "bob".into(),
            channel: Channel::Video,
            kind: InviteKind::Call,
        });
        assert_eq!(invite.level(), NotifyLevel::Info);
    }

    #[test]
    fn test_notification_text() {
        let ev = UiEvent::FileReceived {
            username: "bob".into(),
            file_id: Uuid::nil(),
            file_name: "a.txt".into(),
            size: 1536,
        };
        let n = ev.notification();
        assert_eq!(n.message, "Received a.txt (1.50 KB) from bob");
        assert_eq!(n.to_string(), "(+) Received a.txt (1.50 KB) from bob");
    }

    #[test]
    fn test_channel_sink_forwards() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.emit(UiEvent::RemoteAccessReady {
            username: "bob".into(),
        });
        assert!(matches!(rx.try_recv(), Ok(UiEvent::RemoteAccessReady { .. })));
    }
}
