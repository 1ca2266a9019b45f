//! Byzantine reliable broadcast with scripted adversaries

use bytes::Bytes;

use concord_broadcast::QuorumConfig;
use concord_core::{AddTag, MessageId, PeerId};
use concord_crdt::{Operation, Reply, Request};
use concord_test::{Adversary, ChaosConfig, NetworkSimulator, Scenario, ScenarioBuilder};
use concord_wire::WireMessage;

fn add_op(element: &str) -> Vec<u8> {
    Operation::Add {
        tag: AddTag::random(),
        element: element.to_string(),
    }
    .encode()
    .to_vec()
}

/// Everything an equivocating author can say for one id: conflicting
/// sends, echoes backing each side, and readies backing each side
fn equivocate_fully(
    sim: &mut NetworkSimulator,
    adversary: &Adversary,
    id: MessageId,
    left: (&[u8], &[PeerId]),
    right: (&[u8], &[PeerId]),
    with_readies: bool,
) {
    let from = adversary.local();
    for (to, message) in adversary.equivocate(id, left, right) {
        sim.inject(from, to, &message);
    }
    for (payload, targets) in [left, right] {
        let echo = adversary.echo(id, payload);
        let ready = adversary.ready(id, adversary.envelope(payload));
        for &to in targets {
            sim.inject(from, to, &echo);
            if with_readies {
                sim.inject(from, to, &ready);
            }
        }
    }
}

fn holds(sim: &NetworkSimulator, peer: PeerId, element: &str) -> bool {
    sim.node(peer).unwrap().replica().state().contains(element)
}

#[test]
fn test_honest_broadcast_delivers_everywhere() {
    let Scenario {
        mut sim, honest, ..
    } = ScenarioBuilder::new()
        .with_nodes(4)
        .byzantine(QuorumConfig::new(1))
        .with_config(ChaosConfig::jittery())
        .build();

    sim.request(honest[0], Request::Add("x".into()));
    // Nothing is applied before delivery
    assert!(sim.take_replies(honest[0]).is_empty());
    assert!(!holds(&sim, honest[0], "x"));

    assert!(sim.run_until_quiet(5_000));
    assert_eq!(sim.take_replies(honest[0]), vec![Reply::Add { element: "x".into() }]);
    for &peer in &honest {
        assert!(holds(&sim, peer, "x"));
        assert_eq!(sim.broadcast_stats(peer).unwrap().delivered, 1);
        assert_eq!(sim.node(peer).unwrap().stalled(std::time::Duration::ZERO).len(), 0);
    }
}

#[test]
fn test_sequential_add_then_remove() {
    let Scenario {
        mut sim, honest, ..
    } = ScenarioBuilder::new()
        .with_nodes(4)
        .byzantine(QuorumConfig::new(1))
        .with_config(ChaosConfig::hostile())
        .with_seed(11)
        .build();

    sim.request(honest[0], Request::Add("x".into()));
    assert!(sim.run_until_quiet(10_000));
    sim.request(honest[3], Request::Remove("x".into()));
    assert!(sim.run_until_quiet(10_000));

    assert_eq!(sim.take_replies(honest[3]), vec![Reply::Remove { element: "x".into() }]);
    assert!(sim.converged());
    assert!(honest.iter().all(|&peer| !holds(&sim, peer, "x")));
}

#[test]
fn test_equivocation_with_four_processes_keeps_agreement() {
    let Scenario {
        mut sim,
        honest,
        adversaries,
    } = ScenarioBuilder::new()
        .with_nodes(3)
        .with_adversaries(1)
        .byzantine(QuorumConfig::new(1))
        .build();

    let (left, right) = (add_op("left"), add_op("right"));
    equivocate_fully(
        &mut sim,
        &adversaries[0],
        MessageId::random(),
        (&left[..], &honest[..1]),
        (&right[..], &honest[1..]),
        false,
    );
    assert!(sim.run_until_quiet(5_000));

    // The side with two honest echoes wins and drags the third node along
    for &peer in &honest {
        assert!(holds(&sim, peer, "right"), "{} missed the delivery", peer);
        assert!(!holds(&sim, peer, "left"));
    }
    assert!(sim.converged());
}

#[test]
fn test_equivocation_agreement_under_jitter() {
    for seed in 0..25 {
        let Scenario {
            mut sim,
            honest,
            adversaries,
        } = ScenarioBuilder::new()
            .with_nodes(3)
            .with_adversaries(1)
            .byzantine(QuorumConfig::new(1))
            .with_config(ChaosConfig::hostile())
            .with_seed(seed)
            .build();

        let (left, right) = (add_op("left"), add_op("right"));
        equivocate_fully(
            &mut sim,
            &adversaries[0],
            MessageId::random(),
            (&left[..], &honest[..1]),
            (&right[..], &honest[1..]),
            true,
        );
        assert!(sim.run_until_quiet(20_000), "seed {}", seed);

        // Either everyone delivered the same side or nobody delivered
        assert!(sim.converged(), "seed {}", seed);
        let first = sim.node(honest[0]).unwrap().replica().state();
        assert!(first.len() <= 1, "seed {}", seed);
    }
}

#[test]
fn test_standard_echo_quorum_splits_at_five_processes() {
    // (n + f + 1) / 2 = 3 matching echoes out of five: two honest plus the
    // adversary is enough on both sides of the split
    let Scenario {
        mut sim,
        honest,
        adversaries,
    } = ScenarioBuilder::new()
        .with_nodes(4)
        .with_adversaries(1)
        .byzantine(QuorumConfig::new(1))
        .build();

    let (left, right) = (add_op("left"), add_op("right"));
    equivocate_fully(
        &mut sim,
        &adversaries[0],
        MessageId::random(),
        (&left[..], &honest[..2]),
        (&right[..], &honest[2..]),
        true,
    );
    assert!(sim.run_until_quiet(5_000));

    assert!(holds(&sim, honest[0], "left") && holds(&sim, honest[1], "left"));
    assert!(holds(&sim, honest[2], "right") && holds(&sim, honest[3], "right"));
    assert!(!sim.converged());
}

#[test]
fn test_strict_echo_quorum_blocks_the_split() {
    let Scenario {
        mut sim,
        honest,
        adversaries,
    } = ScenarioBuilder::new()
        .with_nodes(4)
        .with_adversaries(1)
        .byzantine(QuorumConfig::strict(1))
        .build();

    let (left, right) = (add_op("left"), add_op("right"));
    equivocate_fully(
        &mut sim,
        &adversaries[0],
        MessageId::random(),
        (&left[..], &honest[..2]),
        (&right[..], &honest[2..]),
        true,
    );
    assert!(sim.run_until_quiet(5_000));

    assert!(sim.converged());
    for &peer in &honest {
        let node = sim.node(peer).unwrap();
        assert!(node.replica().state().is_empty());
        assert_eq!(node.broadcast_stats().delivered, 0);
    }
}

#[test]
fn test_strict_echo_quorum_still_delivers_honest_traffic() {
    let Scenario {
        mut sim, honest, ..
    } = ScenarioBuilder::new()
        .with_nodes(4)
        .with_adversaries(1)
        .byzantine(QuorumConfig::strict(1))
        .with_config(ChaosConfig::jittery())
        .build();

    // The adversary stays silent; four honest echoes meet the strict quorum
    sim.request(honest[2], Request::Add("x".into()));
    assert!(sim.run_until_quiet(5_000));
    assert!(honest.iter().all(|&peer| holds(&sim, peer, "x")));
}

#[test]
fn test_forged_author_is_rejected() {
    let Scenario {
        mut sim,
        honest,
        adversaries,
    } = ScenarioBuilder::new()
        .with_nodes(3)
        .with_adversaries(1)
        .byzantine(QuorumConfig::new(1))
        .build();
    let adversary = &adversaries[0];

    let forged = adversary.forged_send(honest[0], MessageId::random(), &add_op("forged"));
    sim.inject(adversary.local(), honest[1], &forged);
    assert!(sim.run_until_quiet(1_000));

    let stats = sim.broadcast_stats(honest[1]).unwrap();
    assert_eq!(stats.dropped_invalid, 1);
    assert_eq!(stats.delivered, 0);
    // Nobody echoed it
    assert!(sim.take_captured().is_empty());
}

#[test]
fn test_sender_must_be_the_link_peer() {
    let Scenario {
        mut sim,
        honest,
        adversaries,
    } = ScenarioBuilder::new()
        .with_nodes(3)
        .with_adversaries(1)
        .byzantine(QuorumConfig::new(1))
        .build();

    // Correctly signed by the adversary, but arriving over another peer's link
    let message = adversaries[0].send(MessageId::random(), &add_op("relayed"));
    sim.inject(honest[0], honest[1], &message);
    assert!(sim.run_until_quiet(1_000));

    assert_eq!(sim.broadcast_stats(honest[1]).unwrap().dropped_invalid, 1);
    assert!(!holds(&sim, honest[1], "relayed"));
}

#[test]
fn test_late_ready_after_delivery_is_ignored() {
    let Scenario {
        mut sim,
        honest,
        adversaries,
    } = ScenarioBuilder::new()
        .with_nodes(3)
        .with_adversaries(1)
        .byzantine(QuorumConfig::new(1))
        .build();
    let adversary = &adversaries[0];

    sim.request(honest[0], Request::Add("x".into()));
    assert!(sim.run_until_quiet(1_000));
    let id = sim
        .take_captured()
        .iter()
        .find_map(|(_, _, message)| match message {
            WireMessage::SignedBroadcast(_) => message.message_id(),
            _ => None,
        })
        .unwrap();

    let before = sim.broadcast_stats(honest[1]).unwrap().clone();
    let ready = adversary.ready(id, Bytes::from_static(b"anything"));
    sim.inject(adversary.local(), honest[1], &ready);
    assert!(sim.run_until_quiet(1_000));

    let after = sim.broadcast_stats(honest[1]).unwrap();
    assert_eq!(after.delivered, before.delivered);
    assert_eq!(after.dropped_duplicate, before.dropped_duplicate + 1);
}

#[test]
fn test_undecodable_operation_is_counted_not_applied() {
    let Scenario {
        mut sim,
        honest,
        adversaries,
    } = ScenarioBuilder::new()
        .with_nodes(3)
        .with_adversaries(1)
        .byzantine(QuorumConfig::new(1))
        .build();
    let adversary = &adversaries[0];

    // A well-formed broadcast whose payload is not a set operation
    let id = MessageId::random();
    let send = adversary.send(id, b"garbage");
    let echo = adversary.echo(id, b"garbage");
    for &peer in &honest {
        sim.inject(adversary.local(), peer, &send);
        sim.inject(adversary.local(), peer, &echo);
    }
    assert!(sim.run_until_quiet(1_000));

    for &peer in &honest {
        let node = sim.node(peer).unwrap();
        assert_eq!(node.broadcast_stats().delivered, 1);
        assert_eq!(node.replica_stats().decode_failures, 1);
        assert!(node.replica().state().is_empty());
    }
}
