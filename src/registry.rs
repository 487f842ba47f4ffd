use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{RegistryError, Result};
use crate::models::{
    is_unknown, normalize_text, HeroDraft, HeroEdit, HeroRecord, PageQuery, PageRequest, Rank,
    RankAudit, NEXT_ID_KEY,
};
use crate::store::{net_moves, HeroStore, PendingRanking, RankShift};

/// Default and maximum number of heroes per page.
#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 100,
        }
    }
}

/// Hero roster that keeps ranked heroes on a dense `1..=N` ranking.
///
/// Writers are serialized by an internal lock held from validation to the
/// last write. Readers do not take it.
pub struct HeroRegistry {
    store: Arc<dyn HeroStore>,
    write_lock: Mutex<()>,
    limits: PageLimits,
}

impl HeroRegistry {
    pub fn new(store: Arc<dyn HeroStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
            limits: PageLimits::default(),
        }
    }

    pub fn with_page_limits(mut self, limits: PageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Add an unranked hero with the next licence number.
    pub fn add(&self, name: &str, alias: &str, quirk: &str) -> Result<HeroRecord> {
        let name = normalize_text(name);
        let alias = normalize_text(alias);
        let quirk = normalize_text(quirk);

        let _guard = self.write_lock.lock();
        self.ensure_alias_free(&alias, None)?;

        let hero_id = self.store.get_counter(NEXT_ID_KEY)?.unwrap_or(1);
        let record = self.store.insert(HeroDraft {
            hero_id: Some(hero_id),
            name,
            alias,
            quirk,
            rank: Rank::Unranked,
        })?;

        // The record only counts as added once the counter has moved past it.
        if let Err(e) = self.store.set_counter(NEXT_ID_KEY, hero_id + 1) {
            tracing::error!("Failed to advance hero counter past {hero_id}: {e}");
            if let Err(cleanup) = self.store.delete(&record.reference) {
                tracing::error!(
                    "Failed to withdraw hero {} after counter failure: {cleanup}",
                    record.reference
                );
            }
            return Err(e.into());
        }

        tracing::info!(
            "Added hero {} ({}) with licence {hero_id}",
            record.reference,
            record.alias
        );
        Ok(record)
    }

    /// Delete a hero, closing the gap its rank leaves behind.
    pub fn remove(&self, reference: Uuid) -> Result<()> {
        let _guard = self.write_lock.lock();

        let record = self.require(reference)?;
        let ranks = match record.rank {
            Rank::Ranked(_) => self.store.ranks()?,
            Rank::Unranked => Vec::new(),
        };

        if !self.store.delete(&reference)? {
            return Err(RegistryError::NotFound { reference });
        }

        if let Rank::Ranked(rank) = record.rank {
            let high = max_rank(&ranks, None);
            self.run_shifts(&[RankShift::down(rank + 1, high, None)], ranks, None)?;
        }

        tracing::info!("Removed hero {reference} ({})", record.alias);
        Ok(())
    }

    /// Update any subset of a hero's fields. Rank changes shift the other
    /// ranked heroes so the ranking stays dense.
    ///
    /// Validation happens before anything is written: on `DuplicateAlias`,
    /// `NotFound` or `InvalidRank` the hero is left exactly as it was.
    /// A rank of N+1 for a hero already ranked moves it to the bottom, N.
    pub fn edit(&self, reference: Uuid, edit: HeroEdit) -> Result<HeroRecord> {
        let _guard = self.write_lock.lock();

        let current = self.require(reference)?;

        let alias = edit
            .alias
            .as_deref()
            .map(normalize_text)
            .unwrap_or_else(|| current.alias.clone());
        if alias != current.alias {
            self.ensure_alias_free(&alias, Some(reference))?;
        }

        let ranks = match edit.rank {
            Some(requested) if requested != current.rank => self.store.ranks()?,
            _ => Vec::new(),
        };
        let rank = match edit.rank {
            Some(Rank::Ranked(r)) if edit.rank != Some(current.rank) => {
                let others = ranks.iter().filter(|(id, _)| *id != reference).count();
                let others = u32::try_from(others).unwrap_or(u32::MAX);
                // N+1, where N counts this hero when it is ranked
                let max = others
                    .saturating_add(u32::from(current.rank.is_ranked()))
                    .saturating_add(1);
                if r == 0 || r > max {
                    return Err(RegistryError::InvalidRank {
                        rank: Rank::Ranked(r),
                        max,
                    });
                }
                Rank::Ranked(r.min(others.saturating_add(1)))
            }
            Some(requested) => requested,
            None => current.rank,
        };

        let updated = HeroRecord {
            reference,
            hero_id: current.hero_id,
            name: edit
                .name
                .as_deref()
                .map(normalize_text)
                .unwrap_or_else(|| current.name.clone()),
            alias,
            quirk: edit
                .quirk
                .as_deref()
                .map(normalize_text)
                .unwrap_or_else(|| current.quirk.clone()),
            rank,
        };

        if rank == current.rank {
            self.store.put(&updated).map_err(|e| {
                tracing::error!("Failed to store edited hero {reference}: {e}");
                RegistryError::from(e)
            })?;
            return Ok(updated);
        }

        let others_high = max_rank(&ranks, Some(reference));
        let shifts = match (current.rank, rank) {
            (Rank::Unranked, Rank::Ranked(to)) => {
                vec![RankShift::up(to, others_high, Some(reference))]
            }
            (Rank::Ranked(from), Rank::Unranked) => {
                vec![RankShift::down(from + 1, others_high, Some(reference))]
            }
            (Rank::Ranked(from), Rank::Ranked(to)) => {
                // Close the old slot completely before opening the new one.
                let close = RankShift::down(from + 1, others_high, Some(reference));
                let closed = close.plan(ranks.iter().copied()).len();
                let high = if closed > 0 { others_high - 1 } else { others_high };
                vec![close, RankShift::up(to, high, Some(reference))]
            }
            (Rank::Unranked, Rank::Unranked) => Vec::new(),
        };

        self.run_shifts(&shifts, ranks, Some(&updated))?;
        tracing::info!(
            "Hero {reference} ({}) moved from rank {} to {}",
            updated.alias,
            current.rank,
            rank
        );
        Ok(updated)
    }

    pub fn get(&self, reference: Uuid) -> Result<HeroRecord> {
        self.require(reference)
    }

    /// One page of heroes, optionally filtered by an exact search term.
    pub fn page(&self, request: PageRequest) -> Result<Vec<HeroRecord>> {
        let query = PageQuery {
            offset: request.offset,
            limit: request
                .limit
                .unwrap_or(self.limits.default_limit)
                .min(self.limits.max_limit),
            sort: request.sort,
            direction: request.dir,
            search: request
                .q
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty()),
        };
        Ok(self.store.query_page(&query)?)
    }

    /// Number of ranked heroes.
    pub fn ranked_count(&self) -> Result<usize> {
        Ok(self.store.ranks()?.len())
    }

    /// Check the stored ranking without changing it.
    pub fn audit(&self) -> Result<RankAudit> {
        let ranks = self.store.ranks()?;
        let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
        for (_, rank) in &ranks {
            *counts.entry(*rank).or_default() += 1;
        }

        let ranked = ranks.len();
        let n = u32::try_from(ranked).unwrap_or(u32::MAX);
        let audit = RankAudit {
            ranked,
            duplicates: counts
                .iter()
                .filter(|(_, count)| **count > 1)
                .map(|(rank, _)| *rank)
                .collect(),
            gaps: (1..=n).filter(|r| !counts.contains_key(r)).collect(),
            out_of_range: counts.keys().copied().filter(|r| *r == 0 || *r > n).collect(),
        };

        if !audit.is_consistent() {
            tracing::warn!(
                "Ranking inconsistent: duplicates {:?}, gaps {:?}, out of range {:?}",
                audit.duplicates,
                audit.gaps,
                audit.out_of_range
            );
        }
        Ok(audit)
    }

    /// Finish a ranking change reported by [`RegistryError::PartialShift`].
    ///
    /// Moves only touch records still at their old rank and the pending hero
    /// is written whole, so resuming the same value twice is harmless.
    pub fn resume_shift(&self, pending: PendingRanking) -> Result<usize> {
        let _guard = self.write_lock.lock();
        tracing::info!(
            "Resuming ranking change: {} move(s), hero write {}",
            pending.moves.len(),
            if pending.record.is_some() { "pending" } else { "none" }
        );

        let moved = self.store.apply_moves(&pending.moves).map_err(|e| {
            tracing::error!("Resumed ranking change failed after {} move(s): {}", e.updated, e.source);
            RegistryError::PartialShift {
                shift: None,
                updated: e.updated,
                completed: Vec::new(),
                pending: Box::new(PendingRanking {
                    moves: if e.updated == 0 { pending.moves.clone() } else { e.pending },
                    record: pending.record.clone(),
                }),
                source: e.source,
            }
        })?;

        if let Some(record) = &pending.record {
            self.store.put(record).map_err(|e| {
                tracing::error!("Failed to store hero {} while resuming: {e}", record.reference);
                RegistryError::PartialShift {
                    shift: None,
                    updated: moved,
                    completed: Vec::new(),
                    pending: Box::new(PendingRanking {
                        moves: Vec::new(),
                        record: Some(record.clone()),
                    }),
                    source: e,
                }
            })?;
        }
        Ok(moved)
    }

    fn require(&self, reference: Uuid) -> Result<HeroRecord> {
        self.store
            .get(&reference)?
            .ok_or(RegistryError::NotFound { reference })
    }

    fn ensure_alias_free(&self, alias: &str, owner: Option<Uuid>) -> Result<()> {
        if is_unknown(alias) {
            return Ok(());
        }
        let taken = self
            .store
            .find_by_alias(alias)?
            .iter()
            .any(|h| Some(h.reference) != owner);
        if taken {
            return Err(RegistryError::DuplicateAlias {
                alias: alias.to_string(),
            });
        }
        Ok(())
    }

    /// Run range updates in order, then store `record` if one is given.
    ///
    /// Every step is planned against `ranks` up front, so an interruption
    /// can report all moves still owed, including those of steps that never
    /// started.
    fn run_shifts(
        &self,
        shifts: &[RankShift],
        mut ranks: Vec<(Uuid, u32)>,
        record: Option<&HeroRecord>,
    ) -> Result<usize> {
        let mut plans = Vec::with_capacity(shifts.len());
        for shift in shifts {
            let plan = shift.plan(ranks.iter().copied());
            for m in &plan {
                m.apply_to(&mut ranks);
            }
            plans.push(plan);
        }

        let mut moved = 0;
        let mut completed = Vec::new();
        for (i, shift) in shifts.iter().enumerate() {
            if plans[i].is_empty() {
                continue;
            }
            match self.store.update_where(shift) {
                Ok(n) => {
                    tracing::debug!("Rank shift {shift} moved {n} hero(es)");
                    moved += n;
                    completed.push(*shift);
                }
                Err(e) => {
                    tracing::error!(
                        "Rank shift {shift} failed after {} update(s): {}",
                        e.updated,
                        e.source
                    );
                    let rest = if e.updated == 0 {
                        plans[i].clone()
                    } else {
                        e.pending
                    };
                    let later = plans[i + 1..].iter().flatten().copied();
                    return Err(RegistryError::PartialShift {
                        shift: Some(*shift),
                        updated: e.updated,
                        completed,
                        pending: Box::new(PendingRanking {
                            moves: net_moves(rest.into_iter().chain(later)),
                            record: record.cloned(),
                        }),
                        source: e.source,
                    });
                }
            }
        }

        if let Some(record) = record {
            if let Err(e) = self.store.put(record) {
                tracing::error!(
                    "Ranking shifted but hero {} could not be stored: {e}",
                    record.reference
                );
                return Err(RegistryError::PartialShift {
                    shift: None,
                    updated: moved,
                    completed,
                    pending: Box::new(PendingRanking {
                        moves: Vec::new(),
                        record: Some(record.clone()),
                    }),
                    source: e,
                });
            }
        }
        Ok(moved)
    }
}

/// Highest rank held, ignoring `skip`; `0` when nobody is ranked.
fn max_rank(ranks: &[(Uuid, u32)], skip: Option<Uuid>) -> u32 {
    ranks
        .iter()
        .filter(|(id, _)| Some(*id) != skip)
        .map(|(_, rank)| *rank)
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SortDirection, SortField, UNKNOWN};
    use crate::store::memory::MemoryStore;

    fn registry() -> HeroRegistry {
        HeroRegistry::new(Arc::new(MemoryStore::new()))
    }

    fn rank_to(rank: u32) -> HeroEdit {
        HeroEdit {
            rank: Some(Rank::Ranked(rank)),
            ..HeroEdit::default()
        }
    }

    /// Add `count` heroes and rank them 1..=count in insertion order.
    fn ranked_roster(registry: &HeroRegistry, count: u32) -> Vec<Uuid> {
        (1..=count)
            .map(|i| {
                let hero = registry
                    .add(&format!("Hero {i}"), &format!("Alias {i}"), "Quirk")
                    .unwrap();
                registry.edit(hero.reference, rank_to(i)).unwrap();
                hero.reference
            })
            .collect()
    }

    fn rank_of(registry: &HeroRegistry, reference: Uuid) -> Rank {
        registry.get(reference).unwrap().rank
    }

    #[test]
    fn test_add_then_get_is_unranked() {
        let registry = registry();
        let hero = registry.add("Toshinori Yagi", "All Might", "One For All").unwrap();

        let loaded = registry.get(hero.reference).unwrap();
        assert_eq!(loaded.rank, Rank::Unranked);
        assert_eq!(loaded.name, "Toshinori Yagi");
        assert_eq!(loaded.alias, "All Might");
        assert_eq!(loaded.quirk, "One For All");
        assert_eq!(loaded.hero_id, Some(1));
    }

    #[test]
    fn test_add_allocates_increasing_licences() {
        let registry = registry();
        let a = registry.add("a", "A", "q").unwrap();
        let b = registry.add("b", "B", "q").unwrap();
        assert_eq!(a.hero_id, Some(1));
        assert_eq!(b.hero_id, Some(2));
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let registry = registry();
        let first = registry.add("Enji Todoroki", "Endeavor", "Hellflame").unwrap();

        let err = registry.add("Someone", "Endeavor", "Fire").unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateAlias { .. }));
        assert_eq!(registry.get(first.reference).unwrap(), first);
    }

    #[test]
    fn test_unknown_alias_may_repeat() {
        let registry = registry();
        registry.add("a", "", "q").unwrap();
        let second = registry.add("b", UNKNOWN, "q").unwrap();
        assert_eq!(second.alias, UNKNOWN);
    }

    #[test]
    fn test_move_rank_two_to_four() {
        let registry = registry();
        let ids = ranked_roster(&registry, 4);

        registry.edit(ids[1], rank_to(4)).unwrap();

        assert_eq!(rank_of(&registry, ids[0]), Rank::Ranked(1));
        assert_eq!(rank_of(&registry, ids[1]), Rank::Ranked(4));
        assert_eq!(rank_of(&registry, ids[2]), Rank::Ranked(2));
        assert_eq!(rank_of(&registry, ids[3]), Rank::Ranked(3));
    }

    #[test]
    fn test_move_rank_four_to_one() {
        let registry = registry();
        let ids = ranked_roster(&registry, 4);

        registry.edit(ids[3], rank_to(1)).unwrap();

        assert_eq!(rank_of(&registry, ids[3]), Rank::Ranked(1));
        assert_eq!(rank_of(&registry, ids[0]), Rank::Ranked(2));
        assert_eq!(rank_of(&registry, ids[1]), Rank::Ranked(3));
        assert_eq!(rank_of(&registry, ids[2]), Rank::Ranked(4));
    }

    #[test]
    fn test_remove_closes_gap() {
        let registry = registry();
        let ids = ranked_roster(&registry, 3);

        registry.remove(ids[1]).unwrap();

        assert_eq!(rank_of(&registry, ids[0]), Rank::Ranked(1));
        assert_eq!(rank_of(&registry, ids[2]), Rank::Ranked(2));
        assert!(matches!(
            registry.get(ids[1]),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let registry = registry();
        let err = registry.remove(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[test]
    fn test_unrank_closes_gap() {
        let registry = registry();
        let ids = ranked_roster(&registry, 3);

        registry
            .edit(
                ids[0],
                HeroEdit {
                    rank: Some(Rank::Unranked),
                    ..HeroEdit::default()
                },
            )
            .unwrap();

        assert_eq!(rank_of(&registry, ids[0]), Rank::Unranked);
        assert_eq!(rank_of(&registry, ids[1]), Rank::Ranked(1));
        assert_eq!(rank_of(&registry, ids[2]), Rank::Ranked(2));
    }

    #[test]
    fn test_rank_unranked_into_middle_opens_gap() {
        let registry = registry();
        let ids = ranked_roster(&registry, 3);
        let newcomer = registry.add("Mirio Togata", "Lemillion", "Permeation").unwrap();

        registry.edit(newcomer.reference, rank_to(2)).unwrap();

        assert_eq!(rank_of(&registry, ids[0]), Rank::Ranked(1));
        assert_eq!(rank_of(&registry, newcomer.reference), Rank::Ranked(2));
        assert_eq!(rank_of(&registry, ids[1]), Rank::Ranked(3));
        assert_eq!(rank_of(&registry, ids[2]), Rank::Ranked(4));
    }

    #[test]
    fn test_invalid_rank_changes_nothing() {
        let registry = registry();
        let ids = ranked_roster(&registry, 3);
        let before = registry.get(ids[0]).unwrap();

        let err = registry
            .edit(
                ids[0],
                HeroEdit {
                    name: Some("Renamed".to_string()),
                    rank: Some(Rank::Ranked(10)),
                    ..HeroEdit::default()
                },
            )
            .unwrap_err();

        assert!(matches!(err, RegistryError::InvalidRank { max: 4, .. }));
        assert_eq!(registry.get(ids[0]).unwrap(), before);
    }

    #[test]
    fn test_unranked_may_append_after_last() {
        let registry = registry();
        ranked_roster(&registry, 3);
        let hero = registry.add("Tenya Iida", "Ingenium", "Engine").unwrap();

        let edited = registry.edit(hero.reference, rank_to(4)).unwrap();
        assert_eq!(edited.rank, Rank::Ranked(4));

        let late = registry.add("Ochaco Uraraka", "Uravity", "Zero Gravity").unwrap();
        let err = registry.edit(late.reference, rank_to(6)).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRank { max: 5, .. }));
    }

    #[test]
    fn test_ranked_hero_to_one_past_last_lands_at_bottom() {
        let registry = registry();
        let ids = ranked_roster(&registry, 3);

        let edited = registry.edit(ids[0], rank_to(4)).unwrap();

        assert_eq!(edited.rank, Rank::Ranked(3));
        assert_eq!(rank_of(&registry, ids[0]), Rank::Ranked(3));
        assert_eq!(rank_of(&registry, ids[1]), Rank::Ranked(1));
        assert_eq!(rank_of(&registry, ids[2]), Rank::Ranked(2));
        assert!(registry.audit().unwrap().is_consistent());

        let err = registry.edit(ids[0], rank_to(5)).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRank { max: 4, .. }));
    }

    #[test]
    fn test_last_hero_to_one_past_last_stays_put() {
        let registry = registry();
        let ids = ranked_roster(&registry, 3);

        let edited = registry.edit(ids[2], rank_to(4)).unwrap();
        assert_eq!(edited.rank, Rank::Ranked(3));
        assert_eq!(rank_of(&registry, ids[0]), Rank::Ranked(1));
        assert_eq!(rank_of(&registry, ids[1]), Rank::Ranked(2));
    }

    #[test]
    fn test_edit_alias_to_taken_is_rejected() {
        let registry = registry();
        registry.add("a", "Creati", "Creation").unwrap();
        let other = registry.add("b", "Froppy", "Frog").unwrap();

        let err = registry
            .edit(
                other.reference,
                HeroEdit {
                    alias: Some("Creati".to_string()),
                    ..HeroEdit::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateAlias { .. }));
        assert_eq!(registry.get(other.reference).unwrap().alias, "Froppy");
    }

    #[test]
    fn test_edit_keeping_own_alias_is_allowed() {
        let registry = registry();
        let hero = registry.add("a", "Froppy", "Frog").unwrap();
        let edited = registry
            .edit(
                hero.reference,
                HeroEdit {
                    alias: Some("Froppy".to_string()),
                    quirk: Some("Frog Form".to_string()),
                    ..HeroEdit::default()
                },
            )
            .unwrap();
        assert_eq!(edited.quirk, "Frog Form");
    }

    #[test]
    fn test_page_on_empty_registry() {
        let registry = registry();
        let page = registry
            .page(PageRequest {
                offset: 0,
                limit: Some(10),
                sort: SortField::Rank,
                dir: SortDirection::Asc,
                q: None,
            })
            .unwrap();
        assert!(page.is_empty());
    }

    #[test]
    fn test_page_limit_is_capped() {
        let registry = registry().with_page_limits(PageLimits {
            default_limit: 2,
            max_limit: 3,
        });
        for i in 0..5 {
            registry.add(&format!("n{i}"), &format!("a{i}"), "q").unwrap();
        }

        assert_eq!(registry.page(PageRequest::default()).unwrap().len(), 2);
        let capped = registry
            .page(PageRequest {
                limit: Some(50),
                ..PageRequest::default()
            })
            .unwrap();
        assert_eq!(capped.len(), 3);
    }

    #[test]
    fn test_audit_of_consistent_ranking() {
        let registry = registry();
        ranked_roster(&registry, 4);
        let audit = registry.audit().unwrap();
        assert!(audit.is_consistent());
        assert_eq!(audit.ranked, 4);
        assert_eq!(registry.ranked_count().unwrap(), 4);
    }
}
