//! Multi-peer election scenarios on a simulated, fully connected mesh
//!
//! Peers only exchange coordination messages; time advances in one-second
//! steps under a mock clock.

mod test_utils;

use meshhost_core::types::{PeerId, Timestamp};
use meshhost_core::{CoordinatorEvent, ElectionPhase, ElectionState, Role};
use std::collections::BTreeSet;
use test_utils::SimulatedMesh;

fn host(id: &str) -> BTreeSet<Option<PeerId>> {
    [Some(PeerId::new(id))].into_iter().collect()
}

#[test]
fn test_single_starter_pulls_everyone_into_election() {
    let mut mesh = SimulatedMesh::new(&["B", "A", "C"]);
    mesh.start("B");
    mesh.run_for(3);

    assert_eq!(mesh.hosts_seen_by_live_peers(), host("A"));

    let follower = mesh.election("B");
    assert!(!follower.is_host());
    assert_eq!(follower.current_host(), Some(&PeerId::new("A")));
    assert_eq!(follower.phase(), ElectionPhase::Elected(Role::Follower));

    let leader = mesh.election("A");
    assert!(leader.is_host());
    assert_eq!(leader.phase(), ElectionPhase::Elected(Role::Host));
}

#[test]
fn test_concurrent_starters_converge() {
    let mut mesh = SimulatedMesh::new(&["delta", "bravo", "echo", "charlie"]);
    for id in ["echo", "charlie", "delta", "bravo"] {
        mesh.start(id);
    }
    mesh.run_for(5);

    assert_eq!(mesh.hosts_seen_by_live_peers(), host("bravo"));
    for id in ["delta", "bravo", "echo", "charlie"] {
        assert_eq!(mesh.election(id).state(), ElectionState::Completed);
        assert!(mesh
            .events(id)
            .iter()
            .any(|event| matches!(event, CoordinatorEvent::ElectionCompleted { host, .. } if host.as_str() == "bravo")));
    }
}

#[test]
fn test_silent_host_is_replaced_by_next_smallest() {
    let mut mesh = SimulatedMesh::new(&["A", "B", "C"]);
    mesh.start("B");
    mesh.silence("A");

    // Last heard at t=0, so 15s of silence is not yet a timeout
    mesh.run_for(15);
    assert!(mesh.timeout_events("B").is_empty());
    assert!(mesh.timeout_events("C").is_empty());
    assert_eq!(mesh.election("B").current_host(), Some(&PeerId::new("A")));

    mesh.run_for(1);
    for survivor in ["B", "C"] {
        assert_eq!(
            mesh.timeout_events(survivor),
            vec![(Timestamp::new(16_000), PeerId::new("A"))]
        );
    }
    assert_eq!(mesh.hosts_seen_by_live_peers(), host("B"));

    // Fires once per loss, however long the old host stays silent
    mesh.run_for(30);
    for survivor in ["B", "C"] {
        assert_eq!(mesh.timeout_events(survivor).len(), 1);
    }
    assert!(mesh.election("B").is_host());
    assert_eq!(mesh.election("B").state(), ElectionState::Completed);
    assert_eq!(mesh.hosts_seen_by_live_peers(), host("B"));
}

#[test]
fn test_recovered_smaller_host_takes_over_again() {
    let mut mesh = SimulatedMesh::new(&["A", "B", "C"]);
    mesh.start("C");
    mesh.silence("A");
    mesh.run_for(20);
    assert_eq!(mesh.hosts_seen_by_live_peers(), host("B"));

    mesh.unsilence("A");
    mesh.run_for(10);

    assert_eq!(mesh.hosts_seen_by_live_peers(), host("A"));
    assert!(mesh.election("A").is_host());
    assert!(!mesh.election("B").is_host());
}

#[test]
fn test_host_that_migrates_away_is_replaced() {
    let mut mesh = SimulatedMesh::new(&["A", "B", "C"]);
    mesh.start("C");
    mesh.run_for(5);
    assert_eq!(mesh.hosts_seen_by_live_peers(), host("A"));

    // A hands the role to B, which never learns about it
    mesh.migrate("A", "B");
    mesh.run_for(30);

    let hosts = mesh.hosts_seen_by_live_peers();
    assert_eq!(hosts.len(), 1);
    let acting: Vec<&str> = ["A", "B", "C"]
        .into_iter()
        .filter(|id| mesh.election(id).is_host())
        .collect();
    assert_eq!(acting.len(), 1);
    assert_eq!(hosts, host(acting[0]));
}
