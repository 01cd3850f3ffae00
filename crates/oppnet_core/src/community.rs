//! Community & Centrality Engine
//!
//! Tracks per-peer contact exposure, the familiar set, the K-clique local
//! community and the node's centrality. All operations are local-state
//! mutations that are either idempotent or monotone.
//!
//! # K-clique rules
//!
//! With clique size `k`, writing `C` for this node's local community plus
//! the node itself:
//!
//! - **familiar promotion**: a peer whose cumulative contact time reaches the
//!   familiar threshold joins the familiar set and the local community;
//! - **conservative merge**: a peer joins when `|F(peer) ∩ C| ≥ k - 1`;
//! - **aggressive merge**: a community member propagates its own community,
//!   whose members join when `|LC(peer) ∩ C| ≥ k - 1`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::CentralityKind;
use crate::types::{NodeId, Timestamp, HOUR_MS};

// =============================================================================
// Centrality strategies
// =============================================================================

/// Contact exposure a centrality formula may consult.
#[derive(Debug, Clone, Copy)]
pub struct Exposure<'a> {
    pub total_contact_time: u64,
    pub familiar_count: usize,
    pub encounter_buckets: &'a BTreeMap<u64, BTreeSet<NodeId>>,
    pub window_hours: u64,
}

/// Scoring strategy behind the centrality value.
///
/// Implementations must be non-decreasing in contact exposure and produce
/// values comparable across nodes at the same instant.
pub trait CentralityStrategy {
    fn centrality(&self, exposure: &Exposure<'_>, elapsed: u64) -> f64;
}

impl CentralityStrategy for CentralityKind {
    fn centrality(&self, exposure: &Exposure<'_>, elapsed: u64) -> f64 {
        match self {
            CentralityKind::ContactRatio => {
                if elapsed == 0 {
                    0.0
                } else {
                    exposure.total_contact_time as f64 / elapsed as f64
                }
            }
            CentralityKind::EncounterWindow => {
                let window = exposure.window_hours.max(1);
                let distinct: usize = exposure
                    .encounter_buckets
                    .values()
                    .map(BTreeSet::len)
                    .sum();
                distinct as f64 / window as f64
            }
            CentralityKind::Degree => exposure.familiar_count as f64,
        }
    }
}

// =============================================================================
// Community state
// =============================================================================

/// Social view one node keeps of its neighbourhood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityState {
    owner: NodeId,
    familiar_threshold: u64,
    clique_k: usize,
    window_hours: u64,
    strategy: CentralityKind,
    /// Cumulative contact time per peer, tracked until the peer is familiar.
    contact_durations: BTreeMap<NodeId, u64>,
    familiar_set: BTreeSet<NodeId>,
    local_community: BTreeSet<NodeId>,
    /// Number of contacts started, in total and per peer.
    contacts_number: u64,
    contacts_per_peer: BTreeMap<NodeId, u32>,
    /// Distinct peers met per absolute hour index.
    encounters: BTreeMap<u64, BTreeSet<NodeId>>,
    total_contact_time: u64,
    centrality: f64,
}

impl CommunityState {
    pub fn new(
        owner: NodeId,
        familiar_threshold: u64,
        clique_k: usize,
        window_hours: u64,
        strategy: CentralityKind,
    ) -> Self {
        Self {
            owner,
            familiar_threshold,
            clique_k,
            window_hours,
            strategy,
            contact_durations: BTreeMap::new(),
            familiar_set: BTreeSet::new(),
            local_community: BTreeSet::new(),
            contacts_number: 0,
            contacts_per_peer: BTreeMap::new(),
            encounters: BTreeMap::new(),
            total_contact_time: 0,
            centrality: 0.0,
        }
    }

    pub fn familiar_set(&self) -> &BTreeSet<NodeId> {
        &self.familiar_set
    }

    pub fn local_community(&self) -> &BTreeSet<NodeId> {
        &self.local_community
    }

    pub fn centrality(&self) -> f64 {
        self.centrality
    }

    pub fn contacts_number(&self) -> u64 {
        self.contacts_number
    }

    pub fn contacts_with(&self, peer: NodeId) -> u32 {
        self.contacts_per_peer.get(&peer).copied().unwrap_or(0)
    }

    /// Cumulative time spent with a not-yet-familiar peer.
    pub fn contact_duration(&self, peer: NodeId) -> u64 {
        self.contact_durations.get(&peer).copied().unwrap_or(0)
    }

    pub fn total_contact_time(&self) -> u64 {
        self.total_contact_time
    }

    pub fn is_familiar(&self, peer: NodeId) -> bool {
        self.familiar_set.contains(&peer)
    }

    pub fn in_community(&self, peer: NodeId) -> bool {
        self.local_community.contains(&peer)
    }

    // -------------------------------------------------------------------------
    // Per-tick updates
    // -------------------------------------------------------------------------

    /// Add `dt` of contact time with `peer`.
    pub fn update_contact_duration(&mut self, peer: NodeId, dt: u64) {
        self.total_contact_time = self.total_contact_time.saturating_add(dt);
        if !self.familiar_set.contains(&peer) {
            *self.contact_durations.entry(peer).or_insert(0) += dt;
        }
    }

    /// Promote `peer` to the familiar set once its cumulative time reaches the
    /// threshold. Returns true if the peer was promoted by this call.
    pub fn check_threshold(&mut self, peer: NodeId) -> bool {
        if self.familiar_set.contains(&peer) {
            return false;
        }
        if self.contact_duration(peer) >= self.familiar_threshold {
            self.promote(peer);
            return true;
        }
        false
    }

    /// Recompute centrality from accumulated exposure.
    pub fn update_centrality(&mut self, elapsed: u64) {
        let exposure = Exposure {
            total_contact_time: self.total_contact_time,
            familiar_count: self.familiar_set.len(),
            encounter_buckets: &self.encounters,
            window_hours: self.window_hours,
        };
        self.centrality = self.strategy.centrality(&exposure, elapsed);
    }

    // -------------------------------------------------------------------------
    // Contact-start updates
    // -------------------------------------------------------------------------

    pub fn update_contacts_number(&mut self, peer: NodeId) {
        self.contacts_number += 1;
        *self.contacts_per_peer.entry(peer).or_insert(0) += 1;
    }

    /// Conservative familiar-set update: only accumulated time counts.
    pub fn update_familiar_set(&mut self, peer: NodeId) -> bool {
        self.check_threshold(peer)
    }

    /// Record `peer` in the hourly encounter bucket of `now`, dropping buckets
    /// that left the sliding window.
    pub fn update_encounters(&mut self, peer: NodeId, now: Timestamp) {
        let hour = now / HOUR_MS;
        self.encounters.entry(hour).or_default().insert(peer);
        let oldest = hour.saturating_sub(self.window_hours.saturating_sub(1));
        self.encounters = self.encounters.split_off(&oldest);
    }

    /// Run the contact-start sequence against a snapshot of the peer.
    ///
    /// `contact_duration` is the full length of the contact being started.
    /// Familiar promotion runs before community admission because the
    /// admission rules read the familiar set.
    pub fn on_contact_start(
        &mut self,
        peer: NodeId,
        peer_view: &CommunityState,
        contact_duration: u64,
        now: Timestamp,
    ) {
        self.update_contacts_number(peer);
        self.update_familiar_set(peer);
        self.update_encounters(peer, now);

        if !self.familiar_set.contains(&peer) {
            self.aggressive_familiar_update(peer, contact_duration);
        }
        if !self.local_community.contains(&peer) {
            self.conservative_merge(peer, peer_view);
        }
        if self.local_community.contains(&peer) {
            self.aggressive_merge(peer_view);
        }
    }

    /// Promote using the exposure this contact is known to add.
    fn aggressive_familiar_update(&mut self, peer: NodeId, contact_duration: u64) -> bool {
        let projected = self.contact_duration(peer).saturating_add(contact_duration);
        if projected >= self.familiar_threshold {
            self.promote(peer);
            return true;
        }
        false
    }

    /// Admit `peer` when enough of its familiar set already lies in our community.
    fn conservative_merge(&mut self, peer: NodeId, peer_view: &CommunityState) -> bool {
        let overlap = self.overlap_with_community(peer_view.familiar_set.iter());
        if overlap + 1 >= self.clique_k {
            self.admit(peer, "conservative");
            return true;
        }
        false
    }

    /// Pull in the peer's community when it overlaps enough with ours.
    fn aggressive_merge(&mut self, peer_view: &CommunityState) -> usize {
        let overlap = self.overlap_with_community(peer_view.local_community.iter());
        if overlap + 1 < self.clique_k {
            return 0;
        }
        let candidates: Vec<NodeId> = peer_view
            .local_community
            .iter()
            .copied()
            .filter(|&m| m != self.owner && !self.local_community.contains(&m))
            .collect();
        for &member in &candidates {
            self.admit(member, "aggressive");
        }
        candidates.len()
    }

    /// `|set ∩ (LC ∪ {owner})|`.
    fn overlap_with_community<'a>(&self, set: impl Iterator<Item = &'a NodeId>) -> usize {
        set.filter(|&&n| n == self.owner || self.local_community.contains(&n))
            .count()
    }

    fn promote(&mut self, peer: NodeId) {
        if peer == self.owner {
            return;
        }
        self.familiar_set.insert(peer);
        self.contact_durations.remove(&peer);
        trace!(node = self.owner, peer, "peer became familiar");
        self.admit(peer, "familiar");
    }

    fn admit(&mut self, peer: NodeId, rule: &'static str) {
        if peer != self.owner && self.local_community.insert(peer) {
            debug!(node = self.owner, peer, rule, "local community grew");
        }
    }
}

impl crate::node::CommunityAware for CommunityState {
    fn familiar_set(&self) -> &BTreeSet<NodeId> {
        &self.familiar_set
    }

    fn local_community(&self) -> &BTreeSet<NodeId> {
        &self.local_community
    }

    fn centrality(&self) -> f64 {
        self.centrality
    }
}
