use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// Stand-in for a name, alias or quirk that was not provided.
pub const UNKNOWN: &str = "???";

/// Metadata key of the next-hero-id counter.
pub const NEXT_ID_KEY: &str = "nextID";

/// Position of a hero in the roster-wide ranking.
///
/// Serialized as a plain integer, `null` when the hero is unranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Option<u32>", into = "Option<u32>")]
pub enum Rank {
    Unranked,
    Ranked(u32),
}

impl Rank {
    pub fn is_ranked(self) -> bool {
        matches!(self, Rank::Ranked(_))
    }

    pub fn value(self) -> Option<u32> {
        match self {
            Rank::Unranked => None,
            Rank::Ranked(r) => Some(r),
        }
    }

    /// Encoding used by storage backends: `0` marks an unranked record.
    pub fn to_stored(self) -> u64 {
        self.value().map(u64::from).unwrap_or(0)
    }

    pub fn from_stored(value: u64) -> Self {
        match u32::try_from(value) {
            Ok(0) | Err(_) => Rank::Unranked,
            Ok(r) => Rank::Ranked(r),
        }
    }

    /// Sort key placing unranked records after every ranked one.
    pub fn sort_key(self) -> u64 {
        self.value().map(u64::from).unwrap_or(u64::MAX)
    }
}

impl TryFrom<Option<u32>> for Rank {
    type Error = String;

    fn try_from(value: Option<u32>) -> Result<Self, Self::Error> {
        match value {
            None => Ok(Rank::Unranked),
            Some(0) => Err("rank must be a positive integer or null".to_string()),
            Some(r) => Ok(Rank::Ranked(r)),
        }
    }
}

impl From<Rank> for Option<u32> {
    fn from(rank: Rank) -> Self {
        rank.value()
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rank::Unranked => f.write_str("unranked"),
            Rank::Ranked(r) => write!(f, "{r}"),
        }
    }
}

/// A stored hero file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeroRecord {
    pub reference: Uuid,
    /// Licence number, `None` when unlicensed
    pub hero_id: Option<u64>,
    pub name: String,
    pub alias: String,
    pub quirk: String,
    pub rank: Rank,
}

/// A hero that has not been stored yet; the backend assigns the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeroDraft {
    pub hero_id: Option<u64>,
    pub name: String,
    pub alias: String,
    pub quirk: String,
    pub rank: Rank,
}

impl HeroDraft {
    pub fn into_record(self, reference: Uuid) -> HeroRecord {
        HeroRecord {
            reference,
            hero_id: self.hero_id,
            name: self.name,
            alias: self.alias,
            quirk: self.quirk,
            rank: self.rank,
        }
    }
}

/// Map blank input to [`UNKNOWN`], otherwise trim it.
pub fn normalize_text(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        UNKNOWN.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn is_unknown(value: &str) -> bool {
    value == UNKNOWN
}

/// Add-hero request
#[derive(Debug, Clone, Deserialize)]
pub struct NewHero {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub quirk: String,
}

/// Partial update of a hero. Absent fields are left unchanged.
///
/// For `rank`, an absent key keeps the current rank while an explicit
/// `null` removes the hero from the ranking.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeroEdit {
    pub name: Option<String>,
    pub alias: Option<String>,
    pub quirk: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub rank: Option<Rank>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[serde(alias = "heroID")]
    HeroId,
    Name,
    Alias,
    Quirk,
    #[default]
    Rank,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Page request as received from callers; missing values fall back to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
    #[serde(default)]
    pub sort: SortField,
    #[serde(default)]
    pub dir: SortDirection,
    /// Search term
    pub q: Option<String>,
}

/// Fully resolved page query handed to a storage backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub offset: usize,
    pub limit: usize,
    pub sort: SortField,
    pub direction: SortDirection,
    pub search: Option<String>,
}

impl PageQuery {
    /// Whether `record` matches the search term, if any.
    ///
    /// Text fields compare exactly (case-sensitive). A numeric term also
    /// matches the licence number and the rank.
    pub fn matches(&self, record: &HeroRecord) -> bool {
        let Some(term) = self.search.as_deref() else {
            return true;
        };
        if record.alias == term || record.name == term || record.quirk == term {
            return true;
        }
        match term.parse::<u64>() {
            Ok(n) => {
                record.hero_id == Some(n) || record.rank.value().map(u64::from) == Some(n)
            }
            Err(_) => false,
        }
    }

    /// Ordering of two records under this query's sort.
    ///
    /// Ties break on licence number, then reference, so pages are stable.
    pub fn compare(&self, a: &HeroRecord, b: &HeroRecord) -> Ordering {
        let primary = match self.sort {
            SortField::HeroId => hero_id_key(a).cmp(&hero_id_key(b)),
            SortField::Name => a.name.cmp(&b.name),
            SortField::Alias => a.alias.cmp(&b.alias),
            SortField::Quirk => a.quirk.cmp(&b.quirk),
            SortField::Rank => a.rank.sort_key().cmp(&b.rank.sort_key()),
        };
        let primary = match self.direction {
            SortDirection::Asc => primary,
            SortDirection::Desc => primary.reverse(),
        };
        primary
            .then_with(|| hero_id_key(a).cmp(&hero_id_key(b)))
            .then_with(|| a.reference.cmp(&b.reference))
    }

    /// Sort, then cut the requested window out of `records`.
    pub fn paginate(&self, mut records: Vec<HeroRecord>) -> Vec<HeroRecord> {
        records.retain(|r| self.matches(r));
        records.sort_by(|a, b| self.compare(a, b));
        records
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .collect()
    }
}

fn hero_id_key(record: &HeroRecord) -> u64 {
    record.hero_id.unwrap_or(u64::MAX)
}

/// Result of checking the stored ranking for density.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RankAudit {
    pub ranked: usize,
    /// Ranks held by more than one record
    pub duplicates: Vec<u32>,
    /// Ranks in `1..=max` held by no record
    pub gaps: Vec<u32>,
    /// Ranks above the ranked count
    pub out_of_range: Vec<u32>,
}

impl RankAudit {
    pub fn is_consistent(&self) -> bool {
        self.duplicates.is_empty() && self.gaps.is_empty() && self.out_of_range.is_empty()
    }
}
