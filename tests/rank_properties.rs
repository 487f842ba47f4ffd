use proptest::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

use hero_registry::error::RegistryError;
use hero_registry::models::{HeroEdit, Rank};
use hero_registry::registry::HeroRegistry;
use hero_registry::store::memory::MemoryStore;

#[derive(Debug, Clone)]
enum Op {
    Add,
    Remove(usize),
    Rank(usize, u32),
    Unrank(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Add),
        1 => any::<usize>().prop_map(Op::Remove),
        4 => (any::<usize>(), 1u32..10).prop_map(|(i, r)| Op::Rank(i, r)),
        1 => any::<usize>().prop_map(Op::Unrank),
    ]
}

fn set_rank(rank: Rank) -> HeroEdit {
    HeroEdit {
        rank: Some(rank),
        ..HeroEdit::default()
    }
}

proptest! {
    #[test]
    fn test_ranking_stays_dense(ops in prop::collection::vec(op(), 1..40)) {
        let registry = HeroRegistry::new(Arc::new(MemoryStore::new()));
        let mut live: Vec<Uuid> = Vec::new();

        for (step, op) in ops.into_iter().enumerate() {
            match op {
                Op::Add => {
                    let hero = registry
                        .add(&format!("Hero {step}"), &format!("Alias {step}"), "Quirk")
                        .unwrap();
                    live.push(hero.reference);
                }
                Op::Remove(i) if !live.is_empty() => {
                    let reference = live.remove(i % live.len());
                    registry.remove(reference).unwrap();
                }
                Op::Rank(i, r) if !live.is_empty() => {
                    let reference = live[i % live.len()];
                    let before = registry.get(reference).unwrap();
                    match registry.edit(reference, set_rank(Rank::Ranked(r))) {
                        Ok(hero) => {
                            // one past the last slot lands on the last slot
                            let landed = hero.rank.value().unwrap_or(0);
                            prop_assert!(landed == r || landed + 1 == r, "asked {}, got {}", r, hero.rank);
                        }
                        Err(RegistryError::InvalidRank { .. }) => {
                            prop_assert_eq!(registry.get(reference).unwrap(), before);
                        }
                        Err(e) => return Err(TestCaseError::fail(format!("unexpected error: {e}"))),
                    }
                }
                Op::Unrank(i) if !live.is_empty() => {
                    let reference = live[i % live.len()];
                    registry.edit(reference, set_rank(Rank::Unranked)).unwrap();
                }
                _ => {}
            }

            let audit = registry.audit().unwrap();
            prop_assert!(audit.is_consistent(), "step {}: {:?}", step, audit);
        }
    }

    #[test]
    fn test_licences_stay_unique(adds in 1usize..30) {
        let registry = HeroRegistry::new(Arc::new(MemoryStore::new()));
        let mut seen = std::collections::HashSet::new();
        for i in 0..adds {
            let hero = registry.add("name", &format!("alias {i}"), "quirk").unwrap();
            prop_assert!(seen.insert(hero.hero_id));
        }
    }
}
