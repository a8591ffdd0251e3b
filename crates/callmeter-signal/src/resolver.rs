//! First-writer-wins invite resolution
//!
//! Push and poll may both deliver the same invite. The resolver holds the
//! single authoritative `channel_name` the callee is engaged with; the first
//! delivery claims it and later deliveries of the same channel or invite id
//! are absorbed. A newer invite replaces a claim that is still only ringing;
//! once the callee accepts, other channels are busy until release.

use crate::constants::SEEN_INVITES_CAPACITY;
use callmeter_core::models::CallInvite;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// Path an invite arrived by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPath {
    Push,
    Poll,
}

impl fmt::Display for DeliveryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryPath::Push => write!(f, "push"),
            DeliveryPath::Poll => write!(f, "poll"),
        }
    }
}

/// Outcome of offering an invite to the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteResolution {
    /// First delivery: the callee is now engaged with this channel
    Claimed(CallInvite),
    /// Same invite or channel already claimed
    Duplicate,
    /// Engaged with another channel; the invite is ignored
    Busy { active_channel: String },
}

/// Channel the callee is engaged with
struct Claim {
    channel_name: String,
    created_at: DateTime<Utc>,
    /// Accepted rather than only ringing
    held: bool,
}

#[derive(Default)]
struct ResolverState {
    active: Option<Claim>,
    seen: HashSet<Uuid>,
    seen_order: VecDeque<Uuid>,
}

impl ResolverState {
    fn remember(&mut self, id: Uuid) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.seen_order.push_back(id);
        if self.seen_order.len() > SEEN_INVITES_CAPACITY {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    fn active_channel(&self) -> Option<&str> {
        self.active.as_ref().map(|c| c.channel_name.as_str())
    }

    fn claim(&mut self, invite: &CallInvite, held: bool) {
        self.active = Some(Claim {
            channel_name: invite.channel_name.clone(),
            created_at: invite.created_at,
            held,
        });
    }
}

/// Guard over the channel a callee is engaged with
#[derive(Default)]
pub struct InviteResolver {
    state: Mutex<ResolverState>,
}

impl InviteResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a delivered invite
    ///
    /// Busy invites are not remembered, so they can still ring once the
    /// current claim is released.
    pub fn offer(&self, invite: CallInvite, path: DeliveryPath) -> InviteResolution {
        let mut state = self.state.lock();

        if state.active_channel() == Some(invite.channel_name.as_str()) {
            state.remember(invite.id);
            debug!(channel = %invite.channel_name, %path, "Duplicate delivery absorbed");
            return InviteResolution::Duplicate;
        }

        if state.seen.contains(&invite.id) {
            debug!(invite = %invite.id, %path, "Invite already delivered");
            return InviteResolution::Duplicate;
        }

        if let Some(active) = &state.active {
            if active.held || invite.created_at < active.created_at {
                debug!(
                    channel = %invite.channel_name,
                    active = %active.channel_name,
                    "Busy, invite ignored"
                );
                return InviteResolution::Busy {
                    active_channel: active.channel_name.clone(),
                };
            }
            debug!(
                channel = %invite.channel_name,
                superseded = %active.channel_name,
                "Ringing invite superseded"
            );
        }

        state.remember(invite.id);
        state.claim(&invite, false);
        debug!(channel = %invite.channel_name, %path, "Invite claimed");
        InviteResolution::Claimed(invite)
    }

    /// Engage with `invite`'s channel when accepting it
    ///
    /// Succeeds if the channel is the claimed one, nothing is claimed, or
    /// the claim is another invite that is still only ringing. Fails when
    /// another accepted channel holds the guard.
    pub fn hold(&self, invite: &CallInvite) -> bool {
        let mut state = self.state.lock();
        let same = state.active_channel() == Some(invite.channel_name.as_str());
        if !same && state.active.as_ref().is_some_and(|c| c.held) {
            return false;
        }
        state.claim(invite, true);
        state.remember(invite.id);
        true
    }

    /// Release the guard if it holds `channel_name`
    pub fn release(&self, channel_name: &str) -> bool {
        let mut state = self.state.lock();
        if state.active_channel() == Some(channel_name) {
            state.active = None;
            true
        } else {
            false
        }
    }

    pub fn active_channel(&self) -> Option<String> {
        self.state.lock().active_channel().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callmeter_core::models::{InviteRequest, MediaKind};

    fn invite(channel: &str) -> CallInvite {
        CallInvite::new(
            "bob",
            InviteRequest {
                from: "alice".to_string(),
                kind: MediaKind::Audio,
                channel_name: channel.to_string(),
            },
        )
    }

    #[test]
    fn test_push_then_poll_claims_once() {
        let resolver = InviteResolver::new();
        let inv = invite("x");

        assert!(matches!(
            resolver.offer(inv.clone(), DeliveryPath::Push),
            InviteResolution::Claimed(_)
        ));
        assert_eq!(
            resolver.offer(inv, DeliveryPath::Poll),
            InviteResolution::Duplicate
        );
        assert_eq!(resolver.active_channel(), Some("x".to_string()));
    }

    #[test]
    fn test_other_channel_is_busy_once_accepted() {
        let resolver = InviteResolver::new();
        let x = invite("x");
        resolver.offer(x.clone(), DeliveryPath::Poll);
        assert!(resolver.hold(&x));

        assert_eq!(
            resolver.offer(invite("y"), DeliveryPath::Push),
            InviteResolution::Busy {
                active_channel: "x".to_string()
            }
        );
    }

    #[test]
    fn test_busy_invite_rings_after_release() {
        let resolver = InviteResolver::new();
        let x = invite("x");
        let y = invite("y");
        assert!(resolver.hold(&x));

        assert!(matches!(
            resolver.offer(y.clone(), DeliveryPath::Push),
            InviteResolution::Busy { .. }
        ));
        assert!(resolver.release("x"));

        // the still-live invite surfaces again through the inbox
        assert_eq!(
            resolver.offer(y.clone(), DeliveryPath::Poll),
            InviteResolution::Claimed(y)
        );
    }

    #[test]
    fn test_newer_invite_replaces_ringing_claim() {
        let resolver = InviteResolver::new();
        let x = invite("x");
        resolver.offer(x.clone(), DeliveryPath::Push);

        let y = invite("y");
        assert_eq!(
            resolver.offer(y.clone(), DeliveryPath::Push),
            InviteResolution::Claimed(y)
        );
        assert_eq!(resolver.active_channel(), Some("y".to_string()));
        assert_eq!(
            resolver.offer(x, DeliveryPath::Poll),
            InviteResolution::Duplicate
        );

        let mut older = invite("z");
        older.created_at = older.created_at - chrono::Duration::seconds(30);
        assert!(matches!(
            resolver.offer(older, DeliveryPath::Poll),
            InviteResolution::Busy { .. }
        ));
    }

    #[test]
    fn test_release_allows_next_invite_but_not_replay() {
        let resolver = InviteResolver::new();
        let first = invite("x");
        resolver.offer(first.clone(), DeliveryPath::Push);

        assert!(!resolver.release("y"));
        assert!(resolver.release("x"));
        assert_eq!(resolver.active_channel(), None);

        // a stale poll of the finished invite must not ring again
        assert_eq!(
            resolver.offer(first, DeliveryPath::Poll),
            InviteResolution::Duplicate
        );
        assert!(matches!(
            resolver.offer(invite("z"), DeliveryPath::Poll),
            InviteResolution::Claimed(_)
        ));
    }

    #[test]
    fn test_hold() {
        let resolver = InviteResolver::new();
        let x = invite("x");
        assert!(resolver.hold(&x));
        assert!(resolver.hold(&x));
        assert!(!resolver.hold(&invite("y")));
    }

    #[test]
    fn test_accepting_another_invite_takes_over_ringing_claim() {
        let resolver = InviteResolver::new();
        resolver.offer(invite("x"), DeliveryPath::Push);

        assert!(resolver.hold(&invite("y")));
        assert_eq!(resolver.active_channel(), Some("y".to_string()));
    }

    #[test]
    fn test_seen_set_is_bounded() {
        let resolver = InviteResolver::new();
        for i in 0..(SEEN_INVITES_CAPACITY * 2) {
            let channel = format!("c{}", i);
            resolver.offer(invite(&channel), DeliveryPath::Poll);
            resolver.release(&channel);
        }
        let state = resolver.state.lock();
        assert_eq!(state.seen.len(), SEEN_INVITES_CAPACITY);
        assert_eq!(state.seen_order.len(), SEEN_INVITES_CAPACITY);
    }
}
