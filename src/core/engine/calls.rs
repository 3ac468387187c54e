//! Call and remote-access invites, media track negotiation and the
//! signaling handlers that drive them.

use super::Orchestrator;
use crate::core::error::SessionError;
use crate::core::negotiation::OpenOutcome;
use crate::core::protocol::{
    AnswerMessage, CandidateMessage, Channel, ChannelNotice, InviteMessage, InviteRequest,
    Message, OfferMessage, RegisterMessage, UserStatusMessage, WebrtcEventMessage,
};
use crate::core::session::{InviteDirection, InviteKind};
use crate::core::timer::TimeoutJob;
use crate::ui::notify::{Popup, UiEvent};
use tracing::{debug, info, warn};

/// Tracks a call on `channel` needs. Video carries its own audio unless an
/// audio call is already running.
pub fn call_tracks(channel: Channel, audio_calling: bool) -> Vec<Channel> {
    match channel {
        Channel::Video if !audio_calling => vec![Channel::Video, Channel::Audio],
        other => vec![other],
    }
}

fn invite_envelope(kind: InviteKind, invite: InviteMessage) -> Message {
    match kind {
        InviteKind::Call => Message::CallRequest(invite),
        InviteKind::RemoteAccess => Message::RemoteAccess(invite),
    }
}

impl Orchestrator {
    // ── Local invites ────────────────────────────────────────────────────

    /// Invite `username` to a media session on `channel`.
    pub async fn request_media_stream(
        &self,
        username: &str,
        channel: Channel,
    ) -> Result<(), SessionError> {
        if !channel.is_media() {
            return Err(SessionError::NotAMediaChannel(channel));
        }
        self.send_invite(InviteKind::Call, username, channel).await
    }

    /// Ask `username` for control of their shared screen.
    pub async fn request_remote_access(&self, username: &str) -> Result<(), SessionError> {
        self.send_invite(InviteKind::RemoteAccess, username, Channel::RemoteControl)
            .await
    }

    async fn send_invite(
        &self,
        kind: InviteKind,
        username: &str,
        channel: Channel,
    ) -> Result<(), SessionError> {
        let token = self.inner.session.lock().await.begin_invite(
            kind,
            username,
            channel,
            InviteDirection::Outgoing,
        )?;

        let invite = InviteMessage::new(&self.me().await, username, channel, InviteRequest::Invite);
        if !self.signal(invite_envelope(kind, invite)).await {
            self.inner
                .session
                .lock()
                .await
                .take_invite(kind, username, Some(InviteDirection::Outgoing));
            return Err(SessionError::transport(format!(
                "could not deliver {kind} invite to {username}"
            )));
        }
        self.arm_invite_timeout(kind, token).await;

        info!(event = "invite_sent", peer = %username, %channel, %kind);
        self.emit(UiEvent::Popup(Popup::Calling {
            username: username.to_string(),
            channel,
            kind,
        }));
        Ok(())
    }

    /// Accept the invite `username` sent us.
    pub async fn accept_invite(&self, username: &str, kind: InviteKind) -> Result<(), SessionError> {
        self.answer_invite(username, kind, InviteRequest::Accept).await
    }

    /// Decline the invite `username` sent us.
    pub async fn decline_invite(&self, username: &str, kind: InviteKind) -> Result<(), SessionError> {
        self.answer_invite(username, kind, InviteRequest::Decline).await
    }

    async fn answer_invite(
        &self,
        username: &str,
        kind: InviteKind,
        request: InviteRequest,
    ) -> Result<(), SessionError> {
        let invite = self
            .inner
            .session
            .lock()
            .await
            .take_invite(kind, username, Some(InviteDirection::Incoming))
            .ok_or_else(|| SessionError::NoPendingInvite {
                username: username.to_string(),
            })?;

        let mut reply = InviteMessage::new(&self.me().await, username, invite.channel, request);
        if kind == InviteKind::RemoteAccess && request == InviteRequest::Accept {
            reply.os = Some(std::env::consts::OS.to_string());
            // Headless: no display scaling to report.
            reply.device_pixel_ratio = Some(1.0);
        }
        info!(event = "invite_answered", peer = %username, %kind, ?request);
        if !self.signal(invite_envelope(kind, reply)).await {
            return Err(SessionError::transport(format!(
                "could not deliver {kind} reply to {username}"
            )));
        }
        Ok(())
    }

    /// Withdraw our outstanding invite. Returns whether there was one.
    pub async fn cancel_invite(&self, kind: InviteKind) -> bool {
        let invite = {
            let mut session = self.inner.session.lock().await;
            let target = session
                .pending(kind)
                .filter(|i| i.direction == InviteDirection::Outgoing)
                .map(|i| i.username.clone());
            target.and_then(|user| session.take_invite(kind, &user, None))
        };
        let Some(invite) = invite else {
            return false;
        };
        info!(event = "invite_cancelled", peer = %invite.username, %kind);
        let decline = InviteMessage::new(
            &self.me().await,
            &invite.username,
            invite.channel,
            InviteRequest::Decline,
        );
        self.signal(invite_envelope(kind, decline)).await;
        true
    }

    /// Hang up `channel` with `username` and tell the peer.
    pub async fn stop_media_stream(&self, username: &str, channel: Channel) {
        let notice = ChannelNotice {
            from: self.me().await,
            to: username.to_string(),
            channel,
        };
        self.signal(Message::Disconnect(notice)).await;
        self.close_channel(username, channel).await;
    }

    async fn arm_invite_timeout(&self, kind: InviteKind, token: u64) {
        let this = self.clone();
        let job = TimeoutJob::spawn(token, self.inner.config.invite_timeout(), async move {
            this.on_invite_timeout(kind, token).await;
        });
        self.inner.session.lock().await.attach_timeout(kind, job);
    }

    async fn on_invite_timeout(&self, kind: InviteKind, token: u64) {
        let Some(invite) = self.inner.session.lock().await.expire(kind, token) else {
            return;
        };
        warn!(
            event = "invite_timeout",
            peer = %invite.username,
            channel = %invite.channel,
            %kind,
            direction = ?invite.direction,
            "Invite was not answered in time"
        );
        self.emit(UiEvent::Popup(Popup::InviteTimedOut {
            username: invite.username,
            channel: invite.channel,
            kind,
        }));
    }

    // ── Media negotiation ────────────────────────────────────────────────

    /// Bring every track of a call to CONNECTING and establish them, by
    /// renegotiating the existing connection when there is one.
    async fn start_media(
        &self,
        username: &str,
        channel: Channel,
        tracks: Vec<Channel>,
    ) -> Result<(), SessionError> {
        let mut started = Vec::with_capacity(tracks.len());
        for &track in &tracks {
            if let OpenOutcome::Started(token) = self.accept_incoming(username, track).await {
                started.push((track, token));
            }
        }
        info!(event = "media_start", peer = %username, %channel, ?tracks);

        if self.inner.transport.is_connected(username).await {
            let offer = match self.inner.transport.create_offer(username, &tracks).await {
                Ok(offer) => offer,
                Err(e) => {
                    for (track, token) in started {
                        self.abort_attempt(username, track, token).await;
                    }
                    return Err(SessionError::transport(e));
                }
            };
            let seek_return_tracks = if channel.is_one_way() {
                Vec::new()
            } else {
                tracks.clone()
            };
            let sent = self
                .signal(Message::Offer(OfferMessage {
                    from: self.me().await,
                    to: username.to_string(),
                    channel,
                    offer,
                    renegotiate: true,
                    seek_return_tracks,
                }))
                .await;
            if !sent {
                for (track, token) in started {
                    self.abort_attempt(username, track, token).await;
                }
            }
            return Ok(());
        }

        for (track, token) in started {
            if let Err(e) = self.inner.transport.open_channel(username, track).await {
                warn!(event = "media_open_failed", peer = %username, channel = %track, %e);
                self.abort_attempt(username, track, token).await;
            }
        }
        Ok(())
    }

    // ── Signaling handlers ───────────────────────────────────────────────

    pub(super) async fn handle_invite(
        &self,
        kind: InviteKind,
        invite: InviteMessage,
    ) -> Result<(), SessionError> {
        let from = invite.from.clone();
        match invite.request {
            InviteRequest::Invite => self.on_remote_invite(kind, invite).await,
            InviteRequest::Accept => {
                let taken = self.inner.session.lock().await.take_invite(
                    kind,
                    &from,
                    Some(InviteDirection::Outgoing),
                );
                let Some(pending) = taken else {
                    debug!(event = "late_accept_ignored", peer = %from, %kind);
                    return Ok(());
                };
                info!(event = "invite_accepted", peer = %from, channel = %pending.channel, %kind);
                match kind {
                    InviteKind::Call => {
                        let audio_calling = self.inner.session.lock().await.is_audio_calling();
                        let tracks = call_tracks(pending.channel, audio_calling);
                        self.start_media(&from, pending.channel, tracks).await
                    }
                    InviteKind::RemoteAccess => {
                        self.request_open(&from, Channel::RemoteControl).await;
                        Ok(())
                    }
                }
            }
            InviteRequest::Decline => {
                let taken = self.inner.session.lock().await.take_invite(kind, &from, None);
                if let Some(pending) = taken {
                    info!(event = "invite_declined", peer = %from, %kind);
                    self.emit(UiEvent::Popup(Popup::Declined {
                        username: from,
                        channel: pending.channel,
                        kind,
                    }));
                }
                Ok(())
            }
        }
    }

    async fn on_remote_invite(
        &self,
        kind: InviteKind,
        invite: InviteMessage,
    ) -> Result<(), SessionError> {
        let began = {
            let mut session = self.inner.session.lock().await;
            if kind == InviteKind::RemoteAccess && !session.is_screen_sharing() {
                None
            } else {
                Some(session.begin_invite(
                    kind,
                    &invite.from,
                    invite.channel,
                    InviteDirection::Incoming,
                ))
            }
        };
        match began {
            None => {
                warn!(event = "remote_access_ignored", peer = %invite.from, "Not sharing the screen");
                Ok(())
            }
            Some(Err(SessionError::InvitePending { username })) => {
                info!(event = "invite_busy", peer = %invite.from, pending_with = %username, %kind);
                let decline = InviteMessage::new(
                    &self.me().await,
                    &invite.from,
                    invite.channel,
                    InviteRequest::Decline,
                );
                self.signal(invite_envelope(kind, decline)).await;
                Ok(())
            }
            Some(Err(e)) => Err(e),
            Some(Ok(token)) => {
                self.arm_invite_timeout(kind, token).await;
                info!(event = "invite_received", peer = %invite.from, channel = %invite.channel, %kind);
                self.emit(UiEvent::Popup(Popup::IncomingInvite {
                    username: invite.from,
                    channel: invite.channel,
                    kind,
                }));
                Ok(())
            }
        }
    }

    pub(super) async fn handle_offer(&self, offer: OfferMessage) -> Result<(), SessionError> {
        let from = offer.from.as_str();
        let mut channels = vec![offer.channel];
        let return_tracks = if offer.renegotiate {
            for &track in &offer.seek_return_tracks {
                if !channels.contains(&track) {
                    channels.push(track);
                }
            }
            offer.seek_return_tracks.clone()
        } else {
            Vec::new()
        };
        for &channel in &channels {
            self.accept_incoming(from, channel).await;
        }
        debug!(event = "offer_received", peer = %from, renegotiate = offer.renegotiate, ?channels);

        let answer = self
            .inner
            .transport
            .accept_offer(from, &offer.offer, &return_tracks)
            .await
            .map_err(SessionError::transport)?;
        self.signal(Message::Answer(AnswerMessage {
            from: self.me().await,
            to: from.to_string(),
            channel: offer.channel,
            answer,
        }))
        .await;
        Ok(())
    }

    pub(super) async fn handle_answer(&self, answer: AnswerMessage) -> Result<(), SessionError> {
        self.inner
            .transport
            .apply_answer(&answer.from, &answer.answer)
            .await
            .map_err(SessionError::transport)
    }

    pub(super) async fn handle_candidate(
        &self,
        candidate: CandidateMessage,
    ) -> Result<(), SessionError> {
        self.inner
            .transport
            .add_candidate(&candidate.from, &candidate.candidate)
            .await
            .map_err(SessionError::transport)
    }

    pub(super) async fn handle_reconnect(&self, notice: ChannelNotice) {
        let eligible = self
            .inner
            .store
            .lock()
            .await
            .get(&notice.from)
            .is_some_and(|p| p.reconnect_eligible());
        if eligible {
            info!(event = "reconnect", peer = %notice.from, channel = %notice.channel);
            self.request_open(&notice.from, notice.channel).await;
        } else {
            debug!(event = "reconnect_ignored", peer = %notice.from, channel = %notice.channel);
        }
    }

    pub(super) async fn handle_webrtc_event(&self, event: WebrtcEventMessage) {
        if event.channel.is_media() {
            self.on_channel_open(&event.from, event.channel, None).await;
        } else {
            debug!(event = "webrtc_event_ignored", peer = %event.from, channel = %event.channel, kind = ?event.event);
        }
    }

    pub(super) async fn handle_register(&self, register: RegisterMessage) {
        if !register.success {
            warn!(event = "register_failed", username = %register.username, "Relay rejected registration");
            return;
        }
        self.set_local_username(&register.username).await;
        info!(event = "registered", username = %register.username);
        self.emit(UiEvent::Registered {
            username: register.username,
        });
    }

    pub(super) fn handle_user_status(&self, status: UserStatusMessage) {
        self.emit(UiEvent::UserStatusChanged {
            username: status.username,
            connected: status.connected,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_call_adds_audio() {
        assert_eq!(
            call_tracks(Channel::Video, false),
            vec![Channel::Video, Channel::Audio]
        );
        assert_eq!(call_tracks(Channel::Video, true), vec![Channel::Video]);
        assert_eq!(call_tracks(Channel::Screen, false), vec![Channel::Screen]);
        assert_eq!(call_tracks(Channel::Audio, false), vec![Channel::Audio]);
    }
}
