//! Local session state: who we are, the outstanding call / remote-access
//! invites, and the media flags that gate invite handling.

use crate::core::error::SessionError;
use crate::core::protocol::Channel;
use crate::core::timer::TimeoutJob;
use std::fmt;

/// Which invite slot a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InviteKind {
    Call,
    RemoteAccess,
}

impl fmt::Display for InviteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InviteKind::Call => f.write_str("call"),
            InviteKind::RemoteAccess => f.write_str("remote access"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteDirection {
    /// We invited the peer.
    Outgoing,
    /// The peer invited us.
    Incoming,
}

#[derive(Debug)]
pub struct PendingInvite {
    pub username: String,
    pub channel: Channel,
    pub direction: InviteDirection,
    token: u64,
    timeout: Option<TimeoutJob>,
}

impl PendingInvite {
    pub fn token(&self) -> u64 {
        self.token
    }

    fn cancel_timeout(&mut self) {
        if let Some(job) = self.timeout.take() {
            job.cancel();
        }
    }
}

#[derive(Debug, Default)]
pub struct LocalSessionState {
    username: Option<String>,
    call: Option<PendingInvite>,
    remote_access: Option<PendingInvite>,
    audio_calling: bool,
    screen_sharing: bool,
    next_token: u64,
}

impl LocalSessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn set_username(&mut self, username: &str) {
        self.username = Some(username.to_string());
    }

    pub fn is_audio_calling(&self) -> bool {
        self.audio_calling
    }

    pub fn set_audio_calling(&mut self, active: bool) {
        self.audio_calling = active;
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen_sharing
    }

    pub fn set_screen_sharing(&mut self, active: bool) {
        self.screen_sharing = active;
    }

    fn slot(&mut self, kind: InviteKind) -> &mut Option<PendingInvite> {
        match kind {
            InviteKind::Call => &mut self.call,
            InviteKind::RemoteAccess => &mut self.remote_access,
        }
    }

    pub fn pending(&self, kind: InviteKind) -> Option<&PendingInvite> {
        match kind {
            InviteKind::Call => self.call.as_ref(),
            InviteKind::RemoteAccess => self.remote_access.as_ref(),
        }
    }

    /// Record a new invite. Fails while the slot is occupied.
    pub fn begin_invite(
        &mut self,
        kind: InviteKind,
        username: &str,
        channel: Channel,
        direction: InviteDirection,
    ) -> Result<u64, SessionError> {
        if let Some(existing) = self.pending(kind) {
            return Err(SessionError::InvitePending {
                username: existing.username.clone(),
            });
        }
        self.next_token += 1;
        let token = self.next_token;
        *self.slot(kind) = Some(PendingInvite {
            username: username.to_string(),
            channel,
            direction,
            token,
            timeout: None,
        });
        Ok(token)
    }

    /// Attach the timer for the invite identified by the job's token. A job
    /// whose invite is already gone is cancelled on the spot.
    pub fn attach_timeout(&mut self, kind: InviteKind, job: TimeoutJob) {
        match self.slot(kind) {
            Some(invite) if invite.token == job.token() => {
                invite.cancel_timeout();
                invite.timeout = Some(job);
            }
            _ => job.cancel(),
        }
    }

    /// Remove the invite exchanged with `username`, optionally only in one
    /// direction. Its timer is cancelled.
    pub fn take_invite(
        &mut self,
        kind: InviteKind,
        username: &str,
        direction: Option<InviteDirection>,
    ) -> Option<PendingInvite> {
        let slot = self.slot(kind);
        let matches = slot.as_ref().is_some_and(|invite| {
            invite.username == username && direction.map_or(true, |d| d == invite.direction)
        });
        if !matches {
            return None;
        }
        let mut invite = slot.take()?;
        invite.cancel_timeout();
        Some(invite)
    }

    /// Timer firing: remove the invite only if it is still the same one.
    pub fn expire(&mut self, kind: InviteKind, token: u64) -> Option<PendingInvite> {
        let slot = self.slot(kind);
        if slot.as_ref().map(|i| i.token) != Some(token) {
            return None;
        }
        // The job calling us is the timer itself; dropping the handle is enough.
        slot.take().map(|mut invite| {
            invite.timeout = None;
            invite
        })
    }

    /// A channel with `username` went away: clear invites on that channel.
    /// The flag it drives is cleared only when no other peer keeps the
    /// channel live (`still_live`).
    pub fn clear_for_channel(
        &mut self,
        username: &str,
        channel: Channel,
        still_live: bool,
    ) -> Vec<InviteKind> {
        let mut cleared = Vec::new();
        for kind in [InviteKind::Call, InviteKind::RemoteAccess] {
            let slot = self.slot(kind);
            let hit = slot
                .as_ref()
                .is_some_and(|i| i.username == username && i.channel == channel);
            if hit {
                if let Some(mut invite) = slot.take() {
                    invite.cancel_timeout();
                }
                cleared.push(kind);
            }
        }
        match channel {
            Channel::Audio if !still_live => self.audio_calling = false,
            Channel::Screen if !still_live => self.screen_sharing = false,
            _ => {}
        }
        cleared
    }

    /// Drop every invite that references `username`.
    pub fn clear_peer(&mut self, username: &str) {
        for kind in [InviteKind::Call, InviteKind::RemoteAccess] {
            let _ = self.take_invite(kind, username, None);
        }
    }

    /// Logout: forget everything except the token counter.
    pub fn reset(&mut self) {
        for kind in [InviteKind::Call, InviteKind::RemoteAccess] {
            if let Some(mut invite) = self.slot(kind).take() {
                invite.cancel_timeout();
            }
        }
        self.username = None;
        self.audio_calling = false;
        self.screen_sharing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_invite_is_rejected() {
        let mut s = LocalSessionState::new();
        s.begin_invite(InviteKind::Call, "bob", Channel::Video, InviteDirection::Outgoing)
            .unwrap();
        let err = s
            .begin_invite(InviteKind::Call, "carol", Channel::Audio, InviteDirection::Incoming)
            .unwrap_err();
        assert!(matches!(err, SessionError::InvitePending { username } if username == "bob"));

        // The other slot is independent.
        assert!(s
            .begin_invite(
                InviteKind::RemoteAccess,
                "carol",
                Channel::RemoteControl,
                InviteDirection::Incoming
            )
            .is_ok());
    }

    #[test]
    fn test_take_respects_direction_and_peer() {
        let mut s = LocalSessionState::new();
        s.begin_invite(InviteKind::Call, "bob", Channel::Audio, InviteDirection::Outgoing)
            .unwrap();
        assert!(s
            .take_invite(InviteKind::Call, "bob", Some(InviteDirection::Incoming))
            .is_none());
        assert!(s.take_invite(InviteKind::Call, "carol", None).is_none());
        let taken = s
            .take_invite(InviteKind::Call, "bob", Some(InviteDirection::Outgoing))
            .unwrap();
        assert_eq!(taken.channel, Channel::Audio);
        assert!(s.pending(InviteKind::Call).is_none());
    }

    #[test]
    fn test_stale_token_does_not_expire() {
        let mut s = LocalSessionState::new();
        let first = s
            .begin_invite(InviteKind::Call, "bob", Channel::Audio, InviteDirection::Outgoing)
            .unwrap();
        s.take_invite(InviteKind::Call, "bob", None);
        let second = s
            .begin_invite(InviteKind::Call, "bob", Channel::Audio, InviteDirection::Outgoing)
            .unwrap();
        assert_ne!(first, second);
        assert!(s.expire(InviteKind::Call, first).is_none());
        assert!(s.expire(InviteKind::Call, second).is_some());
    }

    #[test]
    fn test_channel_loss_clears_flags() {
        let mut s = LocalSessionState::new();
        s.set_audio_calling(true);
        s.set_screen_sharing(true);
        s.begin_invite(InviteKind::Call, "bob", Channel::Audio, InviteDirection::Incoming)
            .unwrap();
        let cleared = s.clear_for_channel("bob", Channel::Audio, false);
        assert_eq!(cleared, vec![InviteKind::Call]);
        assert!(!s.is_audio_calling());
        assert!(s.is_screen_sharing());
    }

    #[test]
    fn test_flag_survives_while_channel_live_elsewhere() {
        let mut s = LocalSessionState::new();
        s.set_audio_calling(true);
        s.set_screen_sharing(true);
        assert!(s.clear_for_channel("bob", Channel::Audio, true).is_empty());
        assert!(s.is_audio_calling());
        s.clear_for_channel("bob", Channel::Screen, true);
        assert!(s.is_screen_sharing());
        s.clear_for_channel("carol", Channel::Audio, false);
        assert!(!s.is_audio_calling());
    }

    #[test]
    fn test_reset() {
        let mut s = LocalSessionState::new();
        s.set_username("alice");
        s.begin_invite(InviteKind::Call, "bob", Channel::Audio, InviteDirection::Outgoing)
            .unwrap();
        s.reset();
        assert!(s.username().is_none());
        assert!(s.pending(InviteKind::Call).is_none());
    }
}
