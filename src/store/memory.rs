use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::error::{ShiftError, StoreError};
use crate::models::{HeroDraft, HeroRecord, PageQuery, Rank};
use crate::store::{HeroStore, RankMove, RankShift};

/// In-memory hero store. Nothing survives the process.
///
/// Every shift is applied under a single write lock, so it is never
/// observed half-done.
#[derive(Default)]
pub struct MemoryStore {
    heroes: RwLock<HashMap<Uuid, HeroRecord>>,
    counters: RwLock<BTreeMap<String, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.heroes.read().len()
    }
}

impl HeroStore for MemoryStore {
    fn find_by_alias(&self, alias: &str) -> Result<Vec<HeroRecord>, StoreError> {
        let heroes = self.heroes.read();
        Ok(heroes.values().filter(|h| h.alias == alias).cloned().collect())
    }

    fn get(&self, reference: &Uuid) -> Result<Option<HeroRecord>, StoreError> {
        Ok(self.heroes.read().get(reference).cloned())
    }

    fn insert(&self, draft: HeroDraft) -> Result<HeroRecord, StoreError> {
        let record = draft.into_record(Uuid::new_v4());
        self.heroes.write().insert(record.reference, record.clone());
        Ok(record)
    }

    fn put(&self, record: &HeroRecord) -> Result<(), StoreError> {
        self.heroes.write().insert(record.reference, record.clone());
        Ok(())
    }

    fn delete(&self, reference: &Uuid) -> Result<bool, StoreError> {
        Ok(self.heroes.write().remove(reference).is_some())
    }

    fn update_where(&self, shift: &RankShift) -> Result<usize, ShiftError> {
        let mut heroes = self.heroes.write();
        let plan = shift.plan(
            heroes
                .values()
                .filter_map(|h| h.rank.value().map(|r| (h.reference, r))),
        );
        for m in &plan {
            if let Some(hero) = heroes.get_mut(&m.reference) {
                hero.rank = Rank::Ranked(m.to);
            }
        }
        Ok(plan.len())
    }

    fn apply_moves(&self, moves: &[RankMove]) -> Result<usize, ShiftError> {
        let mut heroes = self.heroes.write();
        let mut written = 0;
        for m in moves {
            if let Some(hero) = heroes.get_mut(&m.reference) {
                if hero.rank == Rank::Ranked(m.from) {
                    hero.rank = Rank::Ranked(m.to);
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    fn query_page(&self, query: &PageQuery) -> Result<Vec<HeroRecord>, StoreError> {
        let heroes: Vec<HeroRecord> = self.heroes.read().values().cloned().collect();
        Ok(query.paginate(heroes))
    }

    fn ranks(&self) -> Result<Vec<(Uuid, u32)>, StoreError> {
        let heroes = self.heroes.read();
        Ok(heroes
            .values()
            .filter_map(|h| h.rank.value().map(|r| (h.reference, r)))
            .collect())
    }

    fn get_counter(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.counters.read().get(key).copied())
    }

    fn set_counter(&self, key: &str, value: u64) -> Result<(), StoreError> {
        self.counters.write().insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SortDirection, SortField};

    fn draft(alias: &str, rank: Rank) -> HeroDraft {
        HeroDraft {
            hero_id: None,
            name: "Shoto Todoroki".to_string(),
            alias: alias.to_string(),
            quirk: "Half-Cold Half-Hot".to_string(),
            rank,
        }
    }

    #[test]
    fn test_insert_assigns_distinct_references() {
        let store = MemoryStore::new();
        let a = store.insert(draft("Shoto", Rank::Unranked)).unwrap();
        let b = store.insert(draft("Shoto", Rank::Unranked)).unwrap();
        assert_ne!(a.reference, b.reference);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_update_where_leaves_unranked_alone() {
        let store = MemoryStore::new();
        let unranked = store.insert(draft("a", Rank::Unranked)).unwrap();
        let ranked = store.insert(draft("b", Rank::Ranked(2))).unwrap();

        let updated = store.update_where(&RankShift::up(1, 10, None)).unwrap();
        assert_eq!(updated, 1);
        assert_eq!(store.get(&unranked.reference).unwrap().unwrap().rank, Rank::Unranked);
        assert_eq!(store.get(&ranked.reference).unwrap().unwrap().rank, Rank::Ranked(3));
    }

    #[test]
    fn test_apply_moves_skips_records_already_moved() {
        let store = MemoryStore::new();
        let hero = store.insert(draft("a", Rank::Ranked(3))).unwrap();
        let moves = [RankMove {
            reference: hero.reference,
            from: 3,
            to: 2,
        }];

        assert_eq!(store.apply_moves(&moves).unwrap(), 1);
        assert_eq!(store.apply_moves(&moves).unwrap(), 0);
        assert_eq!(store.get(&hero.reference).unwrap().unwrap().rank, Rank::Ranked(2));
    }

    #[test]
    fn test_delete_reports_missing() {
        let store = MemoryStore::new();
        assert!(!store.delete(&Uuid::new_v4()).unwrap());
    }

    #[test]
    fn test_query_page_on_empty_store() {
        let store = MemoryStore::new();
        let query = PageQuery {
            offset: 0,
            limit: 10,
            sort: SortField::Rank,
            direction: SortDirection::Asc,
            search: None,
        };
        assert!(store.query_page(&query).unwrap().is_empty());
    }

    #[test]
    fn test_counters_start_missing() {
        let store = MemoryStore::new();
        assert_eq!(store.get_counter("nextID").unwrap(), None);
        store.set_counter("nextID", 4).unwrap();
        assert_eq!(store.get_counter("nextID").unwrap(), Some(4));
    }
}
