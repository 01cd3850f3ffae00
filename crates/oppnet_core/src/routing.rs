//! Forwarding and retention scoring.
//!
//! A carrier pulls a message in routing mode only when it scores strictly
//! higher for the message's destination than the peer holding it. The
//! retention policy values residents of a full data memory.

use crate::config::{ForwardingKind, RetentionKind};
use crate::context::{InterestContext, SocialNetwork};
use crate::message::Message;
use crate::node::CommunityAware;
use crate::types::{NodeId, Timestamp};

/// Score offset of a carrier whose local community holds the destination.
pub const COMMUNITY_BONUS: f64 = 1.0e6;

/// Score offset of a carrier that declares the destination a friend.
pub const FRIEND_BONUS: f64 = 1.0e3;

/// How good a carrier is for reaching `destination`.
pub trait ForwardingUtility {
    fn utility(
        &self,
        carrier: &dyn CommunityAware,
        social: &SocialNetwork,
        destination: NodeId,
    ) -> f64;
}

/// Community first, declared friendship second, global centrality last.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocialUtility;

impl ForwardingUtility for SocialUtility {
    fn utility(
        &self,
        carrier: &dyn CommunityAware,
        social: &SocialNetwork,
        destination: NodeId,
    ) -> f64 {
        let mut score = carrier.centrality();
        if carrier.local_community().contains(&destination) {
            score += COMMUNITY_BONUS;
        }
        if social.is_friend(destination) {
            score += FRIEND_BONUS;
        }
        score
    }
}

/// Plain global centrality.
#[derive(Debug, Clone, Copy, Default)]
pub struct CentralityUtility;

impl ForwardingUtility for CentralityUtility {
    fn utility(
        &self,
        carrier: &dyn CommunityAware,
        _social: &SocialNetwork,
        _destination: NodeId,
    ) -> f64 {
        carrier.centrality()
    }
}

impl ForwardingUtility for ForwardingKind {
    fn utility(
        &self,
        carrier: &dyn CommunityAware,
        social: &SocialNetwork,
        destination: NodeId,
    ) -> f64 {
        match self {
            ForwardingKind::Social => SocialUtility.utility(carrier, social, destination),
            ForwardingKind::Centrality => CentralityUtility.utility(carrier, social, destination),
        }
    }
}

/// Value of keeping `message` in a full data memory. Ties are broken by age
/// in the memory itself.
pub trait RetentionPolicy {
    fn retention(&self, message: &Message, interests: &InterestContext, now: Timestamp) -> f64;
}

impl RetentionPolicy for RetentionKind {
    fn retention(&self, message: &Message, interests: &InterestContext, now: Timestamp) -> f64 {
        match self {
            RetentionKind::Freshness => message.created_at as f64,
            RetentionKind::Interest => {
                let shared = message
                    .topic
                    .is_some_and(|topic| interests.has_topic(topic, now));
                if shared {
                    2.0
                } else {
                    1.0
                }
            }
        }
    }
}
