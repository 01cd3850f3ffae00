//! Message generation policy.

use oppnet_core::{Node, NodeId, TopicId};
use rand::seq::IteratorRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// One message to create: `(source, destination, topic)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRequest {
    pub source: NodeId,
    pub destination: NodeId,
    pub topic: Option<TopicId>,
}

/// Decides which messages appear on a generation day.
pub trait MessageGenerator: std::fmt::Debug {
    fn generate(&mut self, nodes: &[Node], rng: &mut ChaCha8Rng) -> Vec<MessageRequest>;
}

/// Every node sends `messages_per_node` messages to uniformly drawn other
/// nodes. The topic is one the destination is interested in, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformGenerator {
    messages_per_node: usize,
}

impl UniformGenerator {
    pub fn new(messages_per_node: usize) -> Self {
        Self { messages_per_node }
    }
}

impl MessageGenerator for UniformGenerator {
    fn generate(&mut self, nodes: &[Node], rng: &mut ChaCha8Rng) -> Vec<MessageRequest> {
        let n = nodes.len();
        if n < 2 {
            return Vec::new();
        }
        let mut requests = Vec::with_capacity(n * self.messages_per_node);
        for source in 0..n {
            for _ in 0..self.messages_per_node {
                // draw among the n - 1 other nodes
                let mut destination = rng.gen_range(0..n - 1);
                if destination >= source {
                    destination += 1;
                }
                let topic = nodes[destination]
                    .context()
                    .iter()
                    .map(|(topic, _)| topic)
                    .choose(rng);
                requests.push(MessageRequest {
                    source,
                    destination,
                    topic,
                });
            }
        }
        requests
    }
}
