//! Replicated OR-set behaviour across nodes

use std::collections::BTreeSet;

use proptest::prelude::*;

use concord_broadcast::QuorumConfig;
use concord_crdt::{Reply, Request};
use concord_test::{ChaosConfig, Scenario, ScenarioBuilder};

#[derive(Clone, Debug)]
enum Step {
    Add(usize, &'static str),
    Remove(usize, &'static str),
    Pause(usize),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    let element = prop::sample::select(vec!["a", "b", "c"]);
    prop_oneof![
        (0usize..4, element.clone()).prop_map(|(node, e)| Step::Add(node, e)),
        (0usize..4, element).prop_map(|(node, e)| Step::Remove(node, e)),
        (0usize..8).prop_map(Step::Pause),
    ]
}

#[test]
fn test_concurrent_add_survives_remove() {
    let Scenario {
        mut sim, honest, ..
    } = ScenarioBuilder::new().with_nodes(3).build();
    let (a, b, c) = (honest[0], honest[1], honest[2]);

    sim.request(a, Request::Add("x".into()));
    assert!(sim.run_until_quiet(1_000));
    let first = sim.node(a).unwrap().replica().observed("x");
    assert_eq!(first.len(), 1);

    // B removes what it has seen while C adds again, neither seeing the other
    sim.request(b, Request::Remove("x".into()));
    sim.request(c, Request::Add("x".into()));
    let second: BTreeSet<_> = sim
        .node(c)
        .unwrap()
        .replica()
        .observed("x")
        .difference(&first)
        .copied()
        .collect();
    assert_eq!(second.len(), 1);
    assert!(!sim.node(b).unwrap().replica().state().contains("x"));

    assert!(sim.run_until_quiet(1_000));
    for &peer in &honest {
        assert_eq!(sim.node(peer).unwrap().replica().observed("x"), second);
    }
    assert!(sim.converged());
}

#[test]
fn test_remove_of_unknown_element_is_local() {
    let Scenario {
        mut sim, honest, ..
    } = ScenarioBuilder::new().with_nodes(3).build();

    sim.request(honest[1], Request::Remove("ghost".into()));
    assert_eq!(sim.take_replies(honest[1]), vec![Reply::Remove { element: "ghost".into() }]);
    assert!(sim.is_quiet());
    assert_eq!(sim.stats().sent, 0);
    assert_eq!(sim.node(honest[1]).unwrap().replica_stats().noop_removes, 1);
}

#[test]
fn test_read_reflects_replicated_state() {
    let Scenario {
        mut sim, honest, ..
    } = ScenarioBuilder::new()
        .with_nodes(3)
        .with_config(ChaosConfig::jittery())
        .build();

    sim.request(honest[0], Request::Add("apple".into()));
    sim.request(honest[1], Request::Add("banana".into()));
    assert!(sim.run_until_quiet(2_000));
    sim.take_replies(honest[2]);

    sim.request(honest[2], Request::Read);
    let expected: BTreeSet<String> = ["apple", "banana"].iter().map(|s| s.to_string()).collect();
    assert_eq!(sim.take_replies(honest[2]), vec![Reply::Read { elements: expected }]);
}

#[test]
fn test_readd_after_remove_on_another_node() {
    let Scenario {
        mut sim, honest, ..
    } = ScenarioBuilder::new()
        .with_nodes(4)
        .with_config(ChaosConfig::hostile())
        .with_seed(3)
        .build();

    sim.request(honest[0], Request::Add("x".into()));
    assert!(sim.run_until_quiet(10_000));
    sim.request(honest[1], Request::Remove("x".into()));
    assert!(sim.run_until_quiet(10_000));
    sim.request(honest[2], Request::Add("x".into()));
    assert!(sim.run_until_quiet(10_000));

    assert!(sim.converged());
    for &peer in &honest {
        let observed = sim.node(peer).unwrap().replica().observed("x");
        assert_eq!(observed.len(), 1);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_crash_replicas_converge(
        seed in any::<u64>(),
        steps in prop::collection::vec(step_strategy(), 1..40),
    ) {
        let Scenario { mut sim, honest, .. } = ScenarioBuilder::new()
            .with_nodes(4)
            .with_config(ChaosConfig::hostile())
            .with_seed(seed)
            .build();

        for step in steps {
            match step {
                Step::Add(node, element) => sim.request(honest[node], Request::Add(element.into())),
                Step::Remove(node, element) => sim.request(honest[node], Request::Remove(element.into())),
                Step::Pause(ticks) => {
                    for _ in 0..ticks {
                        sim.step();
                    }
                }
            }
        }

        prop_assert!(sim.run_until_quiet(20_000));
        prop_assert!(sim.converged(), "digests differ: {:?}", sim.digests());
        for &peer in &honest {
            prop_assert_eq!(sim.node(peer).unwrap().stalled(std::time::Duration::ZERO).len(), 0);
        }
    }

    #[test]
    fn prop_byzantine_replicas_converge_when_quiesced(
        seed in any::<u64>(),
        steps in prop::collection::vec(step_strategy(), 1..8),
    ) {
        let Scenario { mut sim, honest, .. } = ScenarioBuilder::new()
            .with_nodes(4)
            .byzantine(QuorumConfig::new(1))
            .with_config(ChaosConfig::jittery())
            .with_seed(seed)
            .build();

        // Without causal order a remove may only follow a fully delivered add
        for step in steps {
            match step {
                Step::Add(node, element) => sim.request(honest[node], Request::Add(element.into())),
                Step::Remove(node, element) => sim.request(honest[node], Request::Remove(element.into())),
                Step::Pause(_) => {}
            }
            prop_assert!(sim.run_until_quiet(10_000));
        }

        prop_assert!(sim.converged(), "digests differ: {:?}", sim.digests());
    }
}
