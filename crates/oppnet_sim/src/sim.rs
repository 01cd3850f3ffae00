//! Tick-driven simulator.
//!
//! Each tick, in order:
//!
//! 1. advance every battery (when enabled);
//! 2. on a new day, draw the hour at which today's messages appear, and
//!    generate them once that hour is reached;
//! 3. activate contacts whose start has been reached;
//! 4. snapshot the observed side of every contact starting now;
//! 5. walk the active contacts in trace order: starting contacts run the
//!    full exchange against the snapshot, every contact accumulates its
//!    share of contact time;
//! 6. retire contacts whose end has been reached.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use oppnet_core::{
    Behavior, ExchangeContext, ExchangeReport, IdSequence, InterestContext, MessageId, Node, NodeId,
    SocialNetwork, Timestamp, DAY_MS, HOUR_MS,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::battery::{BatteryModel, LinearBattery};
use crate::config::{LoadError, SimulationConfig};
use crate::generator::{MessageGenerator, UniformGenerator};
use crate::metrics::{MessageRecord, SimMetrics, SimulationOutput};
use crate::trace::Trace;

/// Per-day generation state.
#[derive(Debug, Clone, Copy, Default)]
struct GenerationSchedule {
    day: Option<u64>,
    pending: Option<Timestamp>,
}

#[derive(Debug)]
pub struct Simulator {
    config: SimulationConfig,
    trace: Trace,
    nodes: Vec<Node>,
    batteries: Vec<Box<dyn BatteryModel>>,
    generator: Box<dyn MessageGenerator>,
    rng: ChaCha8Rng,
    ids: IdSequence,
    /// Contact indices by start time; `next_activation` points at the next one.
    activation: Vec<usize>,
    next_activation: usize,
    /// Active contact indices, iterated in trace order.
    active: BTreeSet<usize>,
    current_time: Timestamp,
    schedule: GenerationSchedule,
    records: BTreeMap<MessageId, MessageRecord>,
    metrics: SimMetrics,
}

impl Simulator {
    pub fn new(config: SimulationConfig, trace: Trace) -> Result<Self, LoadError> {
        config.validate()?;
        let node_count = trace.node_count();
        if let Some(&node) = config.malicious_nodes.iter().find(|&&n| n >= node_count) {
            return Err(LoadError::UnknownNode {
                node,
                nodes: node_count,
            });
        }

        let node_config = Arc::new(config.node.clone());
        let nodes = (0..node_count)
            .map(|id| {
                let node = Node::new(id, Arc::clone(&node_config));
                if config.malicious_nodes.contains(&id) {
                    node.with_behavior(Behavior::Malicious)
                } else {
                    node
                }
            })
            .collect();
        let batteries = (0..node_count)
            .map(|_| Box::new(LinearBattery::from_config(&config.battery)) as Box<dyn BatteryModel>)
            .collect();

        Ok(Self {
            generator: Box::new(UniformGenerator::new(config.messages_per_node)),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            ids: IdSequence::new(),
            activation: trace.activation_order(),
            next_activation: 0,
            active: BTreeSet::new(),
            current_time: trace.start_time(),
            schedule: GenerationSchedule::default(),
            records: BTreeMap::new(),
            metrics: SimMetrics::new(),
            nodes,
            batteries,
            trace,
            config,
        })
    }

    /// Give each node its interest topics, in node id order.
    pub fn with_contexts(mut self, contexts: Vec<InterestContext>) -> Self {
        self.nodes = self
            .nodes
            .into_iter()
            .zip(contexts.into_iter().map(Some).chain(std::iter::repeat(None)))
            .map(|(node, context)| match context {
                Some(context) => node.with_context(context),
                None => node,
            })
            .collect();
        self
    }

    /// Give each node its declared friendship row, in node id order.
    pub fn with_social_network(mut self, matrix: Vec<Vec<bool>>) -> Self {
        self.nodes = self
            .nodes
            .into_iter()
            .zip(matrix.into_iter().map(Some).chain(std::iter::repeat(None)))
            .map(|(node, row)| match row {
                Some(row) => node.with_social_network(SocialNetwork::new(row)),
                None => node,
            })
            .collect();
        self
    }

    pub fn with_generator(mut self, generator: impl MessageGenerator + 'static) -> Self {
        self.generator = Box::new(generator);
        self
    }

    /// Replace the battery models; one per node, in node id order.
    pub fn with_batteries(mut self, batteries: Vec<Box<dyn BatteryModel>>) -> Self {
        self.batteries = batteries;
        self
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    /// Generated messages so far, in id order.
    pub fn messages(&self) -> impl Iterator<Item = &MessageRecord> {
        self.records.values()
    }

    pub fn active_contacts(&self) -> usize {
        self.active.len()
    }

    /// Process one tick. Returns false once the trace end has been reached.
    pub fn step(&mut self) -> bool {
        if self.current_time >= self.trace.end_time() {
            return false;
        }
        let tick = self.current_time;
        self.process_tick(tick);
        self.metrics.ticks += 1;
        self.current_time = tick.saturating_add(self.trace.sample_time());
        true
    }

    /// Run every remaining tick.
    pub fn run(mut self) -> SimulationOutput {
        info!(
            nodes = self.nodes.len(),
            contacts = self.trace.len(),
            start = self.trace.start_time(),
            end = self.trace.end_time(),
            sample = self.trace.sample_time(),
            "simulation started"
        );
        while self.step() {}

        let output = SimulationOutput {
            end_time: self.current_time,
            messages: self.records.into_values().collect(),
            nodes: self.nodes,
            metrics: self.metrics,
        };
        info!(
            ticks = output.metrics.ticks,
            messages = output.messages.len(),
            deliveries = output.metrics.deliveries,
            hit_rate = output.hit_rate(),
            "simulation finished"
        );
        output
    }

    fn process_tick(&mut self, tick: Timestamp) {
        let elapsed = tick.saturating_sub(self.trace.start_time());

        if self.config.battery_computation {
            for battery in &mut self.batteries {
                battery.update(tick);
            }
        }

        self.maybe_generate(tick);

        let mut starting = Vec::new();
        while let Some(&index) = self.activation.get(self.next_activation) {
            if self.trace.contacts()[index].start > tick {
                break;
            }
            self.active.insert(index);
            starting.push(index);
            self.next_activation += 1;
        }
        starting.sort_unstable();

        // exchanges read the observed nodes as they stood at the tick start
        let mut snapshots: BTreeMap<NodeId, Node> = BTreeMap::new();
        for &index in &starting {
            let observed = self.trace.contacts()[index].observed;
            if !snapshots.contains_key(&observed) {
                snapshots.insert(observed, self.nodes[observed].clone());
            }
        }

        let sample = self.trace.sample_time();
        let active: Vec<usize> = self.active.iter().copied().collect();
        for index in active {
            let contact = self.trace.contacts()[index];
            let is_start = starting.binary_search(&index).is_ok();
            if self.is_depleted(contact.observer) {
                if is_start {
                    self.metrics.exchanges_skipped += 1;
                    debug!(node = contact.observer, index, "exchange skipped, battery depleted");
                }
                continue;
            }

            if is_start {
                let report = snapshots.get(&contact.observed).map(|peer| {
                    let mut ctx = ExchangeContext::new(tick, elapsed, &mut self.ids);
                    self.nodes[contact.observer].on_contact_start(
                        peer,
                        contact.duration(),
                        &mut ctx,
                    )
                });
                if let Some(report) = report {
                    self.metrics.contacts_started += 1;
                    if !report.spent.is_empty() {
                        // the snapshot pays too, so later pulls this tick see the spent budget
                        self.nodes[contact.observed].settle_handovers(contact.observer, &report.spent);
                        if let Some(snapshot) = snapshots.get_mut(&contact.observed) {
                            snapshot.settle_handovers(contact.observer, &report.spent);
                        }
                    }
                    self.absorb(contact.observer, report);
                }
            }

            let dt = sample.min(contact.end.saturating_sub(tick));
            if dt > 0 {
                self.nodes[contact.observer].on_contact_tick(contact.observed, dt, elapsed);
            }
        }

        let contacts = self.trace.contacts();
        self.active.retain(|&index| contacts[index].end > tick);
    }

    fn is_depleted(&self, node: NodeId) -> bool {
        self.config.battery_computation
            && self.batteries.get(node).is_some_and(|b| b.is_depleted())
    }

    fn maybe_generate(&mut self, tick: Timestamp) {
        let day = tick.saturating_sub(self.trace.start_time()) / DAY_MS;
        if self.schedule.day != Some(day) {
            self.schedule.day = Some(day);
            self.schedule.pending = None;
            let capped = self
                .config
                .max_generation_days
                .is_some_and(|max| self.metrics.generation_days >= max);
            if !capped {
                let hour = self.rng.gen_range(0..24u64);
                self.schedule.pending =
                    Some(self.trace.start_time() + day * DAY_MS + hour * HOUR_MS);
            }
        }

        if let Some(instant) = self.schedule.pending {
            if tick >= instant {
                self.schedule.pending = None;
                self.generate_batch(day, tick);
            }
        }
    }

    fn generate_batch(&mut self, day: u64, tick: Timestamp) {
        let requests = self.generator.generate(&self.nodes, &mut self.rng);
        let node_count = self.nodes.len();
        let mut generated = 0u64;
        for request in requests {
            if request.source >= node_count || request.destination >= node_count {
                warn!(
                    source = request.source,
                    destination = request.destination,
                    "generated message references an unknown node, dropped"
                );
                continue;
            }
            let created = self.nodes[request.source].create_message(
                request.destination,
                request.topic,
                tick,
                &mut self.ids,
            );
            match created {
                Some(message) => {
                    self.records.insert(message.id, MessageRecord::new(&message));
                    generated += 1;
                }
                None => warn!(source = request.source, "self-addressed message dropped"),
            }
        }
        self.metrics.generation_days += 1;
        self.metrics.messages_generated += generated;
        info!(day, at = tick, messages = generated, "messages generated");
    }

    /// Fold one exchange report into the run records.
    fn absorb(&mut self, observer: NodeId, report: ExchangeReport) {
        for id in &report.pulled {
            if let Some(record) = self.records.get_mut(id) {
                record.copies += 1;
            }
        }
        for delivery in &report.deliveries {
            match self
                .records
                .get_mut(&delivery.message)
                .map(|record| record.deliver(delivery))
            {
                Some(true) => {
                    self.metrics.deliveries += 1;
                    debug!(
                        message = %delivery.message,
                        node = observer,
                        hops = delivery.hops,
                        "message delivered"
                    );
                }
                Some(false) => self.metrics.duplicate_deliveries += 1,
                None => warn!(message = %delivery.message, "delivery of an unknown message"),
            }
        }
        self.metrics.duplicate_deliveries += report.duplicate_deliveries as u64;
        self.metrics.evictions += report.evicted.len() as u64;
        self.metrics.rejected_copies += report.rejected as u64;
        self.metrics.opinions_merged += report.opinions_merged as u64;
        if let Some(step) = report.election {
            self.metrics.leader_changes += u64::from(step.leader_changed);
            self.metrics.protocol_messages_handled += step.handled as u64;
            self.metrics.protocol_messages_relayed += step.relayed as u64;
        }
    }
}
