//! End-to-end runs of the simulator over small hand-written traces.

use oppnet_core::{ExchangeMode, Node, NodeConfig, TrustView, DAY_MS, HOUR_MS};
use oppnet_sim::{
    BatteryConfig, Contact, MessageGenerator, MessageRequest, SimulationConfig, Simulator, Trace,
};
use rand_chacha::ChaCha8Rng;

const MINUTE: u64 = 60 * 1000;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Same requests on every generation day.
#[derive(Debug, Clone)]
struct FixedGenerator(Vec<MessageRequest>);

impl MessageGenerator for FixedGenerator {
    fn generate(&mut self, _nodes: &[Node], _rng: &mut ChaCha8Rng) -> Vec<MessageRequest> {
        self.0.clone()
    }
}

fn trace(nodes: usize, end: u64, contacts: Vec<Contact>) -> Trace {
    match Trace::new(nodes, 0, end, MINUTE, contacts) {
        Ok(t) => t,
        Err(e) => panic!("invalid trace: {}", e),
    }
}

fn simulator(config: SimulationConfig, trace: Trace) -> Simulator {
    match Simulator::new(config, trace) {
        Ok(s) => s,
        Err(e) => panic!("simulator rejected its input: {}", e),
    }
}

/// 0 -> 1 -> 2 relay at the very end of the first day, after any generation hour.
fn relay_trace() -> Trace {
    let late = 23 * HOUR_MS + 30 * MINUTE;
    trace(
        3,
        DAY_MS,
        vec![
            Contact::new(1, 0, late, late + 10 * MINUTE),
            Contact::new(2, 1, late + 15 * MINUTE, late + 20 * MINUTE),
        ],
    )
}

fn relay_request() -> FixedGenerator {
    FixedGenerator(vec![MessageRequest {
        source: 0,
        destination: 2,
        topic: None,
    }])
}

#[test]
fn test_message_relayed_to_destination() {
    init_logging();
    let config = SimulationConfig {
        max_generation_days: Some(1),
        ..SimulationConfig::default()
    };
    let output = simulator(config, relay_trace())
        .with_generator(relay_request())
        .run();

    assert_eq!(output.messages.len(), 1);
    let record = &output.messages[0];
    assert!(record.delivered);
    assert_eq!(record.hops, Some(2));
    assert_eq!(record.copies, 1);
    assert!(!record.corrupted);
    assert_eq!(record.delivered_at, Some(23 * HOUR_MS + 45 * MINUTE));
    assert_eq!(output.hit_rate(), 1.0);
    assert_eq!(output.metrics.deliveries, 1);
    assert_eq!(output.metrics.contacts_started, 2);
    assert!(output.nodes[2].has_received(record.id));
}

#[test]
fn test_malicious_relay_distrusted_by_destination() {
    init_logging();
    let config = SimulationConfig {
        max_generation_days: Some(1),
        malicious_nodes: vec![1],
        node: NodeConfig::default().with_trust(true),
        ..SimulationConfig::default()
    };
    let output = simulator(config, relay_trace())
        .with_generator(relay_request())
        .run();

    let record = &output.messages[0];
    assert!(record.delivered);
    assert!(record.corrupted);

    let view = output.nodes[2].trust_view();
    assert_eq!(view.trust_of(1), 0.0);
    // the honest source was never judged
    assert_eq!(view.trust_of(0), 1.0);
}

#[test]
fn test_single_copy_not_multiplied_within_a_tick() {
    init_logging();
    let config = SimulationConfig {
        max_generation_days: Some(1),
        node: NodeConfig {
            initial_copies: 1,
            ..NodeConfig::default()
        }
        .with_exchange_mode(ExchangeMode::Routing),
        ..SimulationConfig::default()
    };
    let late = 23 * HOUR_MS + 30 * MINUTE;
    // five friends of the destination all meet the source on the same tick
    let mut contacts: Vec<Contact> = (1..=5)
        .map(|observer| Contact::new(observer, 0, late, late + 10 * MINUTE))
        .collect();
    contacts.push(Contact::new(6, 0, late + 15 * MINUTE, late + 20 * MINUTE));
    let social: Vec<Vec<bool>> = (0..7)
        .map(|node| (0..7).map(|peer| (1..=5).contains(&node) && peer == 6).collect())
        .collect();

    let output = simulator(config, trace(7, DAY_MS, contacts))
        .with_social_network(social)
        .with_generator(FixedGenerator(vec![MessageRequest {
            source: 0,
            destination: 6,
            topic: None,
        }]))
        .run();

    let record = &output.messages[0];
    assert_eq!(record.copies, 1);
    let carriers = output.nodes[1..=5]
        .iter()
        .filter(|n| n.memory().contains(record.id))
        .count();
    assert_eq!(carriers, 1);
    assert_eq!(
        output.nodes[0].memory().get(record.id).map(|m| m.copies_remaining),
        Some(0)
    );
    assert!(record.delivered);
}

#[test]
fn test_generation_stops_after_day_cap() {
    init_logging();
    let capped = simulator(SimulationConfig::default(), trace(4, 5 * DAY_MS, vec![])).run();
    assert_eq!(capped.metrics.generation_days, 2);
    assert_eq!(capped.messages.len(), 8);
    assert_eq!(capped.hit_rate(), 0.0);

    let config = SimulationConfig {
        max_generation_days: None,
        ..SimulationConfig::default()
    };
    let unbounded = simulator(config, trace(4, 5 * DAY_MS, vec![])).run();
    assert_eq!(unbounded.metrics.generation_days, 5);
    assert_eq!(unbounded.messages.len(), 20);
}

#[test]
fn test_same_seed_same_run() {
    init_logging();
    let contacts: Vec<Contact> = (0..60u64)
        .map(|i| {
            let observer = (i % 5) as usize;
            let observed = ((i * 3 + 1) % 5) as usize;
            let observed = if observed == observer { (observed + 1) % 5 } else { observed };
            let start = i * 45 * MINUTE;
            Contact::new(observer, observed, start, start + 25 * MINUTE)
        })
        .collect();
    let end = 2 * DAY_MS;

    let run = || {
        let config = SimulationConfig {
            messages_per_node: 3,
            ..SimulationConfig::default()
        }
        .with_seed(11);
        simulator(config, trace(5, end, contacts.clone())).run()
    };
    let first = run();
    let second = run();
    assert_eq!(first.messages, second.messages);
    assert_eq!(first.metrics, second.metrics);
    assert_eq!(first.leaders(), second.leaders());
}

#[test]
fn test_depleted_observer_skips_exchange() {
    init_logging();
    let config = SimulationConfig {
        battery_computation: true,
        battery: BatteryConfig {
            capacity: HOUR_MS,
            recharge_time: 10 * DAY_MS,
        },
        ..SimulationConfig::default()
    };
    let contacts = vec![Contact::new(0, 1, 2 * HOUR_MS, 3 * HOUR_MS)];
    let output = simulator(config, trace(2, 4 * HOUR_MS, contacts)).run();

    assert_eq!(output.metrics.exchanges_skipped, 1);
    assert_eq!(output.metrics.contacts_started, 0);
    assert_eq!(output.nodes[0].community().contacts_number(), 0);
    assert_eq!(output.nodes[0].community().total_contact_time(), 0);
}

#[test]
fn test_csv_trace_and_toml_config() {
    init_logging();
    let csv = "observer,observed,start,end\n1,0,600000,900000\n2,1,1200000,1260000\n";
    let trace = match Trace::from_csv_reader(csv.as_bytes(), 3, 0, HOUR_MS, MINUTE) {
        Ok(t) => t,
        Err(e) => panic!("trace failed to load: {}", e),
    };
    assert_eq!(trace.len(), 2);

    let toml = r#"
        seed = 3
        max_generation_days = 0

        [node]
        familiar_threshold = 120000
    "#;
    let config = match SimulationConfig::from_toml_str(toml) {
        Ok(c) => c,
        Err(e) => panic!("config failed to load: {}", e),
    };
    let output = simulator(config, trace).run();

    assert!(output.messages.is_empty());
    // five minutes together promote at contact start
    assert!(output.nodes[1].community().is_familiar(0));
    // one minute is below the threshold
    assert!(!output.nodes[2].community().is_familiar(1));
    assert_eq!(output.nodes[2].community().contact_duration(1), MINUTE);
    // only the observer side is updated
    assert!(!output.nodes[0].community().is_familiar(1));
}
