//! Inbound message routing.
//!
//! Signaling envelopes and data-channel text frames both end up in
//! [`Orchestrator::route`]. A failing or panicking handler is logged with the
//! offending envelope and never stops later messages.

use super::Orchestrator;
use crate::core::connection::DataFrame;
use crate::core::error::SessionError;
use crate::core::protocol::{classify, Channel, Message};
use crate::core::session::InviteKind;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{error, warn};

impl Orchestrator {
    /// Classify a signaling envelope and run its handler.
    pub async fn dispatch(&self, raw: &str) {
        match classify(raw) {
            Ok(message) => self.route(message, raw, None).await,
            Err(e) => log_rejected(&e, raw, None),
        }
    }

    /// A frame arrived on an open data channel.
    pub async fn on_data_message(&self, username: &str, channel: Channel, frame: DataFrame) {
        match frame {
            DataFrame::Text(raw) => match classify(&raw) {
                Ok(message) => self.route(message, &raw, Some((username, channel))).await,
                Err(e) => log_rejected(&e, &raw, Some((username, channel))),
            },
            DataFrame::Binary(data) => self.handle_file_data(username, channel, data).await,
        }
    }

    async fn route(&self, message: Message, raw: &str, origin: Option<(&str, Channel)>) {
        let kind = message.message_type();
        let outcome = AssertUnwindSafe(self.handle_message(message, origin))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                event = "handler_failed",
                %kind,
                %e,
                envelope = %raw,
                "Message handler failed"
            ),
            Err(panic) => error!(
                event = "handler_panicked",
                %kind,
                reason = %panic_reason(&*panic),
                envelope = %raw,
                "Message handler panicked"
            ),
        }
    }

    async fn handle_message(
        &self,
        message: Message,
        origin: Option<(&str, Channel)>,
    ) -> Result<(), SessionError> {
        match message {
            Message::Register(register) => self.handle_register(register).await,
            Message::Offer(offer) => self.handle_offer(offer).await?,
            Message::Answer(answer) => self.handle_answer(answer).await?,
            Message::Candidate(candidate) => self.handle_candidate(candidate).await?,
            Message::Disconnect(notice) => {
                self.peer_disconnected(&notice.from, notice.channel).await
            }
            Message::Reconnect(notice) => self.handle_reconnect(notice).await,
            Message::CallRequest(invite) => self.handle_invite(InviteKind::Call, invite).await?,
            Message::RemoteAccess(invite) => {
                self.handle_invite(InviteKind::RemoteAccess, invite).await?
            }
            Message::UserActiveStatus(status) => self.handle_user_status(status),
            Message::WebrtcEvent(event) => self.handle_webrtc_event(event).await,
            Message::Text(chat) => {
                let from = origin.map_or_else(|| chat.from.clone(), |(u, _)| u.to_string());
                self.handle_chat(&from, chat).await?
            }
            Message::MessageAck(ack) => self.handle_ack(ack),
            Message::File(mut fragment) => {
                // Assemblies are keyed by the transport-level sender.
                let channel = match origin {
                    Some((username, channel)) => {
                        fragment.from = username.to_string();
                        channel
                    }
                    None => Channel::File,
                };
                self.handle_file_fragment(channel, fragment).await
            }
        }
        Ok(())
    }
}

fn log_rejected(err: &SessionError, raw: &str, origin: Option<(&str, Channel)>) {
    let peer = origin.map(|(u, _)| u).unwrap_or_default();
    let channel = origin.map(|(_, c)| c.as_str()).unwrap_or_default();
    match err {
        SessionError::UnknownMessageType(kind) => warn!(
            event = "unknown_message_type",
            kind = %kind,
            peer,
            channel,
            envelope = %raw,
            "Dropping message of unknown type"
        ),
        _ => warn!(
            event = "malformed_message",
            %err,
            peer,
            channel,
            envelope = %raw,
            "Dropping malformed message"
        ),
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
