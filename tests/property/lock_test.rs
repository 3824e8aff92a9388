// tests/property/lock_test.rs

//! Property-based tests for lock acceptance and claim merging.

use crate::test_helpers::exchange;
use hagent::core::cluster::lock::accepted_in;
use hagent::core::cluster::{ClusterStore, LockClaim, NodeSnapshot, StoreInner};
use proptest::prelude::*;
use std::sync::Arc;

fn claim(requester: &str, id: &str, requested_at: u64) -> LockClaim {
    LockClaim {
        name: "x".to_string(),
        id: id.to_string(),
        requester: requester.to_string(),
        requested_at,
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_acceptance_requires_every_member(
        views in prop::collection::vec(prop::option::of(any::<bool>()), 1..=8)
    ) {
        // None: no data from that member. Some(holds): data, holding the claim or not.
        let members: Vec<String> = (0..views.len()).map(|i| format!("n{i}")).collect();
        let mut inner = StoreInner {
            members: members.clone(),
            ..Default::default()
        };
        for (member, view) in members.iter().zip(&views) {
            if let Some(holds) = view {
                let mut snapshot = NodeSnapshot::default();
                if *holds {
                    snapshot.locks.insert("x".to_string(), claim("n0", "id1", 1));
                }
                inner.nodes.insert(member.clone(), snapshot);
            }
        }

        let expected = views.iter().all(|v| *v == Some(true));
        prop_assert_eq!(accepted_in(&inner, "x", "id1"), expected);
        prop_assert!(!accepted_in(&inner, "x", "other"));
        prop_assert!(!accepted_in(&inner, "y", "id1"));
    }

    #[test]
    fn test_concurrent_claims_converge_on_oldest(
        claims in prop::collection::vec(
            (1_000u64..1_000_000, "[a-f0-9]{8}", any::<bool>()),
            2..=5
        )
    ) {
        let names: Vec<String> = (0..claims.len()).map(|i| format!("n{i}")).collect();
        let stores: Vec<Arc<ClusterStore>> = names
            .iter()
            .map(|name| Arc::new(ClusterStore::new(name.clone(), names.clone())))
            .collect();

        // Only nodes flagged true compete. At least the first one does.
        let mut winner: Option<LockClaim> = None;
        for (i, (store, (requested_at, id, competes))) in stores.iter().zip(&claims).enumerate() {
            if i > 0 && !competes {
                continue;
            }
            let c = claim(&names[i], &format!("{id}-{i}"), *requested_at);
            if winner.as_ref().is_none_or(|w| c.wins_over(w)) {
                winner = Some(c.clone());
            }
            store.update_local(|local| {
                local.locks.insert("x".to_string(), c);
            });
        }
        let winner = winner.unwrap();

        for _ in 0..3 {
            exchange(&stores);
        }

        for store in &stores {
            let held = store.local().locks.get("x").cloned();
            prop_assert_eq!(held.as_ref(), Some(&winner));
            prop_assert!(store.read(|inner| accepted_in(inner, "x", &winner.id)));
        }
    }

    #[test]
    fn test_wins_over_is_a_strict_order(
        a in (0u64..10, "[ab]", "[0-9]"),
        b in (0u64..10, "[ab]", "[0-9]")
    ) {
        let a = claim(&a.1, &a.2, a.0);
        let b = claim(&b.1, &b.2, b.0);
        prop_assert!(!(a.wins_over(&b) && b.wins_over(&a)));
        if a != b {
            prop_assert!(a.wins_over(&b) || b.wins_over(&a));
        } else {
            prop_assert!(!a.wins_over(&b));
        }
    }
}
