//! Storage collaborator consumed by the registry.
//!
//! A [`HeroStore`] is bound to one hero index and one metadata namespace at
//! construction. Rank shifts go through [`HeroStore::update_where`] so the
//! ranking algorithm never depends on a particular search engine.

pub mod memory;
pub mod tantivy_store;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{ShiftError, StoreError};
use crate::models::{HeroDraft, HeroRecord, PageQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftDirection {
    /// rank - 1, closes a gap
    Down,
    /// rank + 1, opens a gap
    Up,
}

/// Range update over ranked records: every ranked record with
/// `low <= rank <= high`, other than `exclude`, moves one step in `direction`.
///
/// Down shifts are applied lowest rank first and up shifts highest rank
/// first, so no two records share a rank mid-shift on a backend that writes
/// one record at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankShift {
    pub low: u32,
    pub high: u32,
    pub direction: ShiftDirection,
    pub exclude: Option<Uuid>,
}

impl RankShift {
    pub fn down(low: u32, high: u32, exclude: Option<Uuid>) -> Self {
        Self {
            low,
            high,
            direction: ShiftDirection::Down,
            exclude,
        }
    }

    pub fn up(low: u32, high: u32, exclude: Option<Uuid>) -> Self {
        Self {
            low,
            high,
            direction: ShiftDirection::Up,
            exclude,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.low > self.high
    }

    pub fn matches(&self, reference: &Uuid, rank: u32) -> bool {
        (self.low..=self.high).contains(&rank) && self.exclude.as_ref() != Some(reference)
    }

    pub fn apply(&self, rank: u32) -> u32 {
        match self.direction {
            ShiftDirection::Down => rank.saturating_sub(1),
            ShiftDirection::Up => rank.saturating_add(1),
        }
    }

    /// Moves for every matching record, in the order they must be written.
    pub fn plan<I>(&self, ranks: I) -> Vec<RankMove>
    where
        I: IntoIterator<Item = (Uuid, u32)>,
    {
        let mut moves: Vec<RankMove> = ranks
            .into_iter()
            .filter(|(reference, rank)| self.matches(reference, *rank))
            .map(|(reference, rank)| RankMove {
                reference,
                from: rank,
                to: self.apply(rank),
            })
            .collect();
        match self.direction {
            ShiftDirection::Down => moves.sort_by_key(|m| m.from),
            ShiftDirection::Up => moves.sort_by_key(|m| std::cmp::Reverse(m.from)),
        }
        moves
    }
}

/// One record's rank change, written only while the record still holds
/// `from`. Re-applying a move that already happened is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankMove {
    pub reference: Uuid,
    pub from: u32,
    pub to: u32,
}

impl RankMove {
    /// Apply the move to an in-memory rank snapshot.
    pub fn apply_to(&self, ranks: &mut [(Uuid, u32)]) {
        for (reference, rank) in ranks.iter_mut() {
            if *reference == self.reference && *rank == self.from {
                *rank = self.to;
            }
        }
    }
}

/// Fold successive moves of the same record into one, dropping records
/// that end where they started.
pub fn net_moves<I>(moves: I) -> Vec<RankMove>
where
    I: IntoIterator<Item = RankMove>,
{
    let mut net: Vec<RankMove> = Vec::new();
    for m in moves {
        match net.iter_mut().find(|n| n.reference == m.reference) {
            Some(n) => n.to = m.to,
            None => net.push(m),
        }
    }
    net.retain(|m| m.from != m.to);
    net
}

/// Writes still owed by an interrupted ranking change. Resuming applies
/// `moves` conditionally and then stores `record`, so it can be repeated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRanking {
    pub moves: Vec<RankMove>,
    /// Edited hero, with its final rank, not yet written.
    pub record: Option<HeroRecord>,
}

impl PendingRanking {
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty() && self.record.is_none()
    }
}

impl fmt::Display for RankShift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            ShiftDirection::Down => "down",
            ShiftDirection::Up => "up",
        };
        write!(f, "{dir} [{}..={}]", self.low, self.high)
    }
}

/// Minimal capability set the registry needs from a document store.
pub trait HeroStore: Send + Sync {
    /// Records whose alias equals `alias` exactly.
    fn find_by_alias(&self, alias: &str) -> Result<Vec<HeroRecord>, StoreError>;

    fn get(&self, reference: &Uuid) -> Result<Option<HeroRecord>, StoreError>;

    /// Store a new record under a reference chosen by the backend.
    fn insert(&self, draft: HeroDraft) -> Result<HeroRecord, StoreError>;

    /// Create or replace the record at `record.reference`.
    fn put(&self, record: &HeroRecord) -> Result<(), StoreError>;

    /// Returns `false` when nothing was stored at `reference`.
    fn delete(&self, reference: &Uuid) -> Result<bool, StoreError>;

    /// Apply a range update and return the number of records shifted.
    fn update_where(&self, shift: &RankShift) -> Result<usize, ShiftError>;

    /// Apply each move whose record still holds `from`; returns the number
    /// written. Records that moved already, or are gone, are skipped.
    fn apply_moves(&self, moves: &[RankMove]) -> Result<usize, ShiftError>;

    /// Matching, sorted window of records.
    fn query_page(&self, query: &PageQuery) -> Result<Vec<HeroRecord>, StoreError>;

    /// Reference and rank of every ranked record.
    fn ranks(&self) -> Result<Vec<(Uuid, u32)>, StoreError>;

    fn get_counter(&self, key: &str) -> Result<Option<u64>, StoreError>;

    fn set_counter(&self, key: &str, value: u64) -> Result<(), StoreError>;
}
