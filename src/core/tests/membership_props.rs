//! Quorum arithmetic properties

use depchain_core::{max_faulty, Block, MembershipOracle, ReplicaId, StaticMembership, Transaction};
use proptest::prelude::*;
use std::collections::HashMap;

fn membership(n: usize) -> StaticMembership {
    let replicas: Vec<ReplicaId> = (0..n).map(|i| ReplicaId::new(format!("r{:03}", i))).collect();
    let keys: HashMap<_, _> = replicas.iter().map(|r| (r.clone(), [7u8; 32])).collect();
    let leader = replicas[0].clone();
    StaticMembership::new(replicas, leader, keys).unwrap()
}

proptest! {
    #[test]
    fn two_quorums_share_a_correct_replica(n in 1usize..200) {
        let m = membership(n);
        let f = m.max_faulty();
        let q = m.quorum_size();
        prop_assert!(n >= 3 * f + 1);
        prop_assert_eq!(q, n - f);
        // |Q1 ∩ Q2| >= 2q - n, and more than f of those must exist
        prop_assert!(2 * q - n > f);
    }

    #[test]
    fn abort_threshold_needs_a_correct_replica(n in 4usize..200) {
        // f + 1 distinct senders always include a correct one
        let f = max_faulty(n);
        prop_assert!(f + 1 <= n - f);
    }

    #[test]
    fn block_hash_commits_to_every_transaction(
        data in proptest::collection::vec("[a-z]{1,8}", 1..6),
        pick in any::<prop::sample::Index>(),
    ) {
        let transactions: Vec<Transaction> = data.iter().map(|d| Transaction::opaque(d)).collect();
        let block = Block::new(Block::zero_hash(), transactions);
        prop_assert!(block.verify_hash());

        let mut tampered = block.clone();
        let i = pick.index(tampered.transactions.len());
        tampered.transactions[i].data.push('!');
        prop_assert!(!tampered.verify_hash());
    }
}
