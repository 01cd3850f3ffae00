//! Protocol Invariant Regression Suite
//!
//! Drives small populations of nodes through many exchanges and checks the
//! properties every run must keep:
//!
//! - data memory and exchange history never exceed their capacity;
//! - flooded candidacies and community messages lose one hop per relay;
//! - a message is delivered to its destination at most once;
//! - the direct-election leader score never decreases;
//! - a node nobody has judged is fully trusted;
//! - community admission waits for a strict quorum.

use std::collections::BTreeMap;
use std::sync::Arc;

use oppnet_core::election::{
    CommunityElection, CommunityMessageKind, DirectElection, LeaderCandidacy,
};
use oppnet_core::{
    ElectionMode, ExchangeContext, ExchangeMode, FullTrust, IdSequence, LeaderElecting, MessageId,
    Node, NodeConfig, NodeId, TrustEngine, TrustView, HOUR_MS,
};

/// Deterministic pair schedule: every ordered pair, repeated `rounds` times.
fn schedule(nodes: usize, rounds: usize) -> Vec<(NodeId, NodeId)> {
    let mut pairs = Vec::new();
    for round in 0..rounds {
        for a in 0..nodes {
            let b = (a + 1 + round % (nodes - 1)) % nodes;
            pairs.push((a, b));
        }
    }
    pairs
}

fn population(config: NodeConfig, nodes: usize) -> Vec<Node> {
    let config = Arc::new(config);
    (0..nodes).map(|id| Node::new(id, Arc::clone(&config))).collect()
}

fn exchange(nodes: &mut [Node], observer: NodeId, observed: NodeId, now: u64, ids: &mut IdSequence) {
    let snapshot = nodes[observed].clone();
    let mut ctx = ExchangeContext::new(now, now, ids);
    nodes[observer].on_contact_start(&snapshot, 10 * 60 * 1000, &mut ctx);
}

/// Capacity: |dataMemory| <= M and |exchangeHistory| <= H after every exchange.
#[test]
fn inv_capacity_bounds_hold() {
    let config = NodeConfig {
        data_memory_size: 3,
        exchange_history_size: 4,
        ..NodeConfig::default()
    }
    .with_election(ElectionMode::Direct)
    .with_trust(true);
    let n = 6;
    let mut nodes = population(config, n);
    let mut ids = IdSequence::new();

    for (step, (a, b)) in schedule(n, 8).into_iter().enumerate() {
        let now = step as u64 * 60_000;
        let destination = (a + 2) % n;
        nodes[a].create_message(destination, None, now, &mut ids);
        exchange(&mut nodes, a, b, now, &mut ids);

        for node in &nodes {
            assert!(node.memory().len() <= 3, "memory over capacity at node {}", node.id());
            assert!(node.history().len() <= 4, "history over capacity at node {}", node.id());
        }
    }
    let evictions: u64 = nodes.iter().map(|n| n.memory().evictions()).sum();
    println!("capacity: {} messages issued, {} evictions", ids.messages_issued(), evictions);
    assert!(evictions > 0);
}

/// Hop decay: each relay removes exactly one hop and exhausted bids vanish.
#[test]
fn inv_candidacy_hop_decay() {
    let config = NodeConfig {
        community_max_hop: 3,
        ..NodeConfig::default()
    };
    let mut chain: Vec<DirectElection> = (0..5).map(|id| DirectElection::new(id, &config)).collect();
    chain[0].generate_candidacy(0.7, 0);

    for i in 1..chain.len() {
        let upstream: Vec<LeaderCandidacy> = chain[i - 1].candidacies().values().copied().collect();
        chain[i].exchange_candidacies(upstream.iter());
    }
    let hops: Vec<Option<u32>> = chain
        .iter()
        .map(|e| e.candidacies().get(&0).map(|c| c.hop_count))
        .collect();
    println!("candidacy hops along chain: {:?}", hops);
    assert_eq!(hops, vec![Some(3), Some(2), Some(1), None, None]);
}

/// Hop decay for community messages: a relay never raises the budget.
#[test]
fn inv_community_message_hop_decay() {
    let config = NodeConfig {
        community_max_hop: 3,
        ..NodeConfig::default()
    };
    let mut ids = IdSequence::new();
    let mut origin = CommunityElection::new(0, &config);
    origin.request_merge(&BTreeMap::from([(8, 0.1)]), &FullTrust, 0, &mut ids);
    origin.request_merge(&BTreeMap::from([(9, 0.1)]), &FullTrust, 0, &mut ids);
    // origin now has members {0, 8}; the second merge went through a vote
    let budget: Vec<u32> = origin.outbox().map(|m| m.hops_left).collect();
    assert!(budget.iter().all(|&h| h == 3));

    let mut previous = origin;
    let mut last_budget = 3;
    for relay in 1..6 {
        let mut next = CommunityElection::new(relay, &config);
        next.process_messages(previous.outbox(), &FullTrust, 0, &mut ids);
        let relayed: Vec<u32> = next
            .outbox()
            .filter(|m| m.kind == CommunityMessageKind::AddRequest)
            .map(|m| m.hops_left)
            .collect();
        if relayed.is_empty() {
            break;
        }
        assert!(relayed.iter().all(|&h| h + 1 == last_budget));
        last_budget -= 1;
        previous = next;
    }
    assert_eq!(last_budget, 1);
}

/// At-most-one delivery per message at its destination.
#[test]
fn inv_at_most_one_delivery() {
    let n = 5;
    let mut nodes = population(NodeConfig::default(), n);
    let mut ids = IdSequence::new();
    for source in 1..n {
        nodes[source].create_message(0, None, 0, &mut ids);
    }
    for (step, (a, b)) in schedule(n, 6).into_iter().enumerate() {
        exchange(&mut nodes, a, b, step as u64 * 1000, &mut ids);
    }

    let received: Vec<MessageId> = nodes[0].deliveries().map(|d| d.message).collect();
    let mut unique = received.clone();
    unique.dedup();
    println!("destination received {} of {} messages", received.len(), n - 1);
    assert_eq!(received, unique);
    assert_eq!(received.len(), n - 1);
}

/// Leader-score monotonicity in the direct variant.
#[test]
fn inv_leader_score_non_decreasing() {
    let mut election = DirectElection::new(0, &NodeConfig::default());
    let mut ids = IdSequence::new();
    let mut trust = TrustEngine::new(0);
    trust.set_own_opinion(3, MessageId(1), 0.2, 0);

    let mut last = election.leader_score();
    for step in 0..40u64 {
        let candidacy = LeaderCandidacy {
            node_id: (step % 7) as usize + 1,
            centrality: ((step * 37) % 11) as f64 / 10.0,
            hop_count: 5,
            timestamp: step,
        };
        election.add_candidacy(&candidacy, &trust, step, &mut ids);
        assert!(
            election.leader_score() >= last,
            "leader score dropped from {} to {}",
            last,
            election.leader_score()
        );
        last = election.leader_score();
    }
    println!(
        "final leader {} score {:.2} after {} changes",
        election.leader(),
        last,
        election.leader_changes()
    );
}

/// Trust default: exactly 1.0 without any recorded opinion.
#[test]
fn inv_trust_default_is_one() {
    let mut nodes = population(NodeConfig::default().with_trust(true), 3);
    let mut ids = IdSequence::new();
    exchange(&mut nodes, 0, 1, HOUR_MS, &mut ids);
    for node in &nodes {
        let view = node.trust_view();
        assert_eq!(view.trust_of(2), 1.0);
        assert_eq!(view.trust_of(99), 1.0);
    }
}

/// Quorum gate: with |LC| = 5 and threshold 0.5, admission needs 3 confirmations.
#[test]
fn inv_quorum_gate() {
    let config = NodeConfig::default();
    let mut ids = IdSequence::new();
    let mut requester = CommunityElection::new(0, &config);
    requester.request_merge(
        &BTreeMap::from([(1, 0.1), (2, 0.1), (3, 0.1), (4, 0.1)]),
        &FullTrust,
        0,
        &mut ids,
    );
    assert_eq!(requester.leader_community().len(), 5);
    requester.request_merge(&BTreeMap::from([(7, 0.3)]), &FullTrust, 10, &mut ids);

    // members answer one at a time
    let requests: Vec<_> = requester
        .outbox()
        .filter(|m| m.kind == CommunityMessageKind::AddRequest)
        .cloned()
        .collect();
    assert_eq!(requests.len(), 4);

    let mut admitted_after = None;
    for (answered, request) in requests.iter().enumerate() {
        let mut member = CommunityElection::new(request.destination_id, &config);
        member.process_messages(std::iter::once(request), &FullTrust, 10, &mut ids);
        requester.process_messages(member.outbox(), &FullTrust, 10, &mut ids);
        if requester.leader_community().contains_key(&7) && admitted_after.is_none() {
            admitted_after = Some(answered + 1);
        }
    }
    // requester's own vote + 2 responses = 3 > 2.5
    assert_eq!(admitted_after, Some(2));
    assert_eq!(requester.leader_community_members(), vec![0, 1, 2, 3, 4, 7]);
}

/// Routing mode never lets a copy count go below zero.
#[test]
fn inv_copies_never_negative() {
    let config = NodeConfig {
        initial_copies: 2,
        ..NodeConfig::default()
    }
    .with_exchange_mode(ExchangeMode::Routing);
    let n = 6;
    let mut nodes = population(config, n);
    let mut ids = IdSequence::new();
    nodes[0].create_message(5, None, 0, &mut ids);
    for (step, (a, b)) in schedule(n, 10).into_iter().enumerate() {
        exchange(&mut nodes, a, b, (step as u64 + 1) * HOUR_MS, &mut ids);
    }
    for node in &nodes {
        for message in node.memory().iter() {
            assert!(message.copies_remaining <= 2);
        }
    }
}
