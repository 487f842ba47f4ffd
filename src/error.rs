use thiserror::Error;
use uuid::Uuid;

use crate::models::Rank;
use crate::store::{PendingRanking, RankMove, RankShift};

/// Failure reported by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport, I/O or index failure; the backend could not serve the call.
    #[error("storage backend unavailable: {0:#}")]
    Unavailable(anyhow::Error),
    /// A stored document could not be decoded into a hero record.
    #[error("corrupt stored hero: {0}")]
    Corrupt(String),
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Unavailable(err)
    }
}

/// A rank update that stopped before every planned move was written.
#[derive(Debug, Error)]
#[error("rank update wrote {updated} record(s) before failing: {source}")]
pub struct ShiftError {
    pub updated: usize,
    /// Moves not written yet, in application order.
    pub pending: Vec<RankMove>,
    #[source]
    pub source: StoreError,
}

impl ShiftError {
    /// Failure of a backend that writes all-or-nothing: every move is
    /// still pending.
    pub fn untouched(moves: Vec<RankMove>, source: StoreError) -> Self {
        Self {
            updated: 0,
            pending: moves,
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("alias {alias:?} is already taken")]
    DuplicateAlias { alias: String },

    #[error("hero {reference} not found")]
    NotFound { reference: Uuid },

    #[error("rank {rank} is out of range (expected 1..={max} or unranked)")]
    InvalidRank { rank: Rank, max: u32 },

    /// A ranking change was interrupted after some of its writes. The
    /// ranking may hold a gap or a duplicate until `pending` is resumed.
    #[error(
        "rank change interrupted after {updated} record(s) moved, {} move(s) still pending",
        .pending.moves.len()
    )]
    PartialShift {
        /// Range update that failed; `None` when the failing write came
        /// after the range updates, or while resuming.
        shift: Option<RankShift>,
        updated: usize,
        /// Range updates of the same change that finished before the failure.
        completed: Vec<RankShift>,
        pending: Box<PendingRanking>,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    BackendUnavailable(#[from] StoreError),
}

impl RegistryError {
    /// Whether the error was raised before anything was written.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RegistryError::DuplicateAlias { .. }
                | RegistryError::NotFound { .. }
                | RegistryError::InvalidRank { .. }
        )
    }
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
