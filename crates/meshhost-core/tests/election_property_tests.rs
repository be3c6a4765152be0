//! Property-based tests for the host election rule
//!
//! The elected host must depend only on the candidate set, never on the
//! order peers were discovered in, and the host record must stay internally
//! consistent under any sequence of operations.

use meshhost_core::election::{ElectionState, HostElection, PeerView};
use meshhost_core::PeerId;
use proptest::prelude::*;

/// Distinct peer ids in arbitrary order
fn arb_candidates() -> impl Strategy<Value = Vec<PeerId>> {
    prop::collection::btree_set("[a-zA-Z0-9_-]{1,12}", 1..10)
        .prop_map(|ids| ids.into_iter().map(PeerId::new).collect::<Vec<_>>())
        .prop_shuffle()
}

#[derive(Debug, Clone)]
enum Operation {
    Start,
    Confirm,
    Claim(usize, bool),
    Timeout,
    Migrate(usize),
    Resign,
    Reset,
}

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        Just(Operation::Start),
        Just(Operation::Confirm),
        (0usize..8, any::<bool>()).prop_map(|(index, live)| Operation::Claim(index, live)),
        Just(Operation::Timeout),
        (0usize..8).prop_map(Operation::Migrate),
        Just(Operation::Resign),
        Just(Operation::Reset),
    ]
}

proptest! {
    /// Property: the winner is the smallest id whatever the input order
    #[test]
    fn winner_is_minimum_regardless_of_order(candidates in arb_candidates(), self_index in 0usize..10) {
        let expected = candidates.iter().min().cloned().unwrap();
        let self_id = candidates[self_index % candidates.len()].clone();
        let others: Vec<PeerId> = candidates.iter().filter(|id| **id != self_id).cloned().collect();

        let mut election = HostElection::new(self_id.clone());
        election.start_election(others).unwrap();

        prop_assert_eq!(election.current_host(), Some(&expected));
        prop_assert_eq!(election.is_host(), self_id == expected);
    }

    /// Property: two peers given the same set in different orders agree
    #[test]
    fn independent_peers_agree(candidates in arb_candidates()) {
        let first = candidates[0].clone();
        let last = candidates[candidates.len() - 1].clone();

        let mut forward = HostElection::new(first);
        forward.start_election(candidates.clone()).unwrap();

        let mut reversed = candidates.clone();
        reversed.reverse();
        let mut backward = HostElection::new(last);
        backward.start_election(reversed).unwrap();

        prop_assert_eq!(forward.current_host(), backward.current_host());
        prop_assert_eq!(forward.confirm_election(1, Vec::new()).is_empty(), false);
        prop_assert_eq!(forward.current_host(), backward.current_host());
    }

    /// Property: `is_self` always mirrors `current_host == self`
    #[test]
    fn host_record_stays_consistent(
        candidates in arb_candidates(),
        operations in prop::collection::vec(arb_operation(), 1..40),
    ) {
        let self_id = candidates[0].clone();
        let mut election = HostElection::new(self_id.clone());
        let view = PeerView::new(candidates.iter().skip(1).cloned(), true);

        for operation in operations {
            match operation {
                Operation::Start => {
                    election.start_election(view.candidates.clone()).unwrap();
                }
                Operation::Confirm => {
                    let round = election.round();
                    election.confirm_election(round, view.candidates.clone());
                }
                Operation::Claim(index, live) => {
                    let claimant = candidates[index % candidates.len()].clone();
                    let claim_view = PeerView { host_live: live, ..view.clone() };
                    election.handle_heartbeat(&claimant, Some(&claimant), &claim_view);
                }
                Operation::Timeout => {
                    election.handle_host_timeout(&PeerView { host_live: false, ..view.clone() });
                }
                Operation::Migrate(index) => {
                    election.migrate_host(candidates[index % candidates.len()].clone());
                }
                Operation::Resign => {
                    election.resign_host(&view);
                }
                Operation::Reset => {
                    election.reset();
                }
            }

            let record = election.host_record();
            prop_assert_eq!(record.is_self(), record.current_host() == Some(&self_id));
            prop_assert_eq!(election.heartbeat_active(), election.is_host());
            if election.state() == ElectionState::Completed {
                prop_assert!(election.current_host().is_some());
            }
        }
    }
}
