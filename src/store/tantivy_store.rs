use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tantivy::collector::DocSetCollector;
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy};
use uuid::Uuid;

use crate::error::{ShiftError, StoreError};
use crate::models::{HeroDraft, HeroRecord, PageQuery, Rank};
use crate::store::{HeroStore, RankMove, RankShift};

const WRITER_MEMORY_BYTES: usize = 50_000_000;

/// Hero store persisted in a tantivy index, with counters kept in a JSON
/// metadata file next to it.
///
/// Text fields are indexed untokenized so lookups are exact and
/// case-sensitive. Numeric fields use `0` for the unranked and unlicensed
/// sentinels. Each write, including a whole rank shift, is one commit.
pub struct TantivyStore {
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    // Field handles
    f_reference: Field,
    f_hero_id: Field,
    f_name: Field,
    f_alias: Field,
    f_quirk: Field,
    f_rank: Field,
    meta_path: PathBuf,
    counters: RwLock<BTreeMap<String, u64>>,
}

impl TantivyStore {
    /// Create or open the hero index in `index_dir` and the metadata file at
    /// `meta_path`.
    pub fn open_or_create(index_dir: &Path, meta_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(index_dir)?;

        let mut schema_builder = Schema::builder();
        let f_reference = schema_builder.add_text_field("reference", STRING | STORED);
        let f_hero_id = schema_builder.add_u64_field("hero_id", INDEXED | STORED);
        let f_name = schema_builder.add_text_field("name", STRING | STORED);
        let f_alias = schema_builder.add_text_field("alias", STRING | STORED);
        let f_quirk = schema_builder.add_text_field("quirk", STRING | STORED);
        let f_rank = schema_builder.add_u64_field("rank", INDEXED | STORED);

        let schema = schema_builder.build();

        let index = if index_dir.join("meta.json").exists() {
            Index::open_in_dir(index_dir).context("Failed to open existing hero index")?
        } else {
            Index::create_in_dir(index_dir, schema).context("Failed to create hero index")?
        };

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create reader")?;
        let writer: IndexWriter = index
            .writer(WRITER_MEMORY_BYTES)
            .context("Failed to create index writer")?;

        let counters = if meta_path.exists() {
            let data = std::fs::read_to_string(meta_path)
                .with_context(|| format!("Failed to read {}", meta_path.display()))?;
            serde_json::from_str(&data)
                .with_context(|| format!("Corrupt metadata file {}", meta_path.display()))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            reader,
            writer: Mutex::new(writer),
            f_reference,
            f_hero_id,
            f_name,
            f_alias,
            f_quirk,
            f_rank,
            meta_path: meta_path.to_path_buf(),
            counters: RwLock::new(counters),
        })
    }

    fn to_document(&self, record: &HeroRecord) -> TantivyDocument {
        doc!(
            self.f_reference => record.reference.to_string(),
            self.f_hero_id => record.hero_id.unwrap_or(0),
            self.f_name => record.name.clone(),
            self.f_alias => record.alias.clone(),
            self.f_quirk => record.quirk.clone(),
            self.f_rank => record.rank.to_stored(),
        )
    }

    fn to_record(&self, doc: &TantivyDocument) -> Result<HeroRecord, StoreError> {
        let reference_str = doc
            .get_first(self.f_reference)
            .and_then(|v| v.as_str())
            .ok_or_else(|| StoreError::Corrupt("document without reference".to_string()))?;
        let reference = Uuid::parse_str(reference_str)
            .map_err(|e| StoreError::Corrupt(format!("bad reference {reference_str:?}: {e}")))?;

        let hero_id = doc
            .get_first(self.f_hero_id)
            .and_then(|v| v.as_u64())
            .filter(|id| *id != 0);

        let text = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        let rank = doc
            .get_first(self.f_rank)
            .and_then(|v| v.as_u64())
            .map(Rank::from_stored)
            .unwrap_or(Rank::Unranked);

        Ok(HeroRecord {
            reference,
            hero_id,
            name: text(self.f_name),
            alias: text(self.f_alias),
            quirk: text(self.f_quirk),
            rank,
        })
    }

    fn reference_term(&self, reference: &Uuid) -> tantivy::Term {
        tantivy::Term::from_field_text(self.f_reference, &reference.to_string())
    }

    /// Every document matching `query`, unordered.
    fn collect(&self, query: &dyn Query) -> Result<Vec<HeroRecord>, StoreError> {
        let searcher = self.reader.searcher();
        let addresses = searcher
            .search(query, &DocSetCollector)
            .context("Hero search failed")?;

        let mut records = Vec::with_capacity(addresses.len());
        for address in addresses {
            let doc: TantivyDocument = searcher
                .doc(address)
                .context("Failed to retrieve document")?;
            records.push(self.to_record(&doc)?);
        }
        Ok(records)
    }

    fn ranked_query(&self) -> BooleanQuery {
        let unranked = tantivy::Term::from_field_u64(self.f_rank, Rank::Unranked.to_stored());
        BooleanQuery::new(vec![
            (Occur::Must, Box::new(AllQuery) as Box<dyn Query>),
            (
                Occur::MustNot,
                Box::new(TermQuery::new(unranked, IndexRecordOption::Basic)),
            ),
        ])
    }

    /// Run `stage` against the writer and commit. Nothing staged survives a
    /// failure. Once the commit lands the write counts as done, even if the
    /// reader cannot be refreshed.
    fn write<F>(&self, stage: F) -> Result<()>
    where
        F: FnOnce(&mut IndexWriter) -> Result<()>,
    {
        let mut writer = self.writer.lock();
        self.write_locked(&mut writer, stage)
    }

    fn write_locked<F>(&self, writer: &mut IndexWriter, stage: F) -> Result<()>
    where
        F: FnOnce(&mut IndexWriter) -> Result<()>,
    {
        let result = stage(&mut *writer).and_then(|()| {
            writer.commit().context("Failed to commit hero index")?;
            Ok(())
        });

        if let Err(e) = result {
            if let Err(rollback) = writer.rollback() {
                tracing::error!("Rollback of hero index failed after {e:#}: {rollback}");
            }
            return Err(e);
        }

        settle_reload(self.reader.reload())
    }

    /// Stage the given moves against the ranked records in one commit.
    /// With `conditional`, moves whose record no longer holds `from` are
    /// dropped first.
    fn commit_moves(
        &self,
        writer: &mut IndexWriter,
        moves: &[RankMove],
        conditional: bool,
    ) -> Result<usize, ShiftError> {
        let ranked = self
            .collect(&self.ranked_query())
            .map_err(|e| ShiftError::untouched(moves.to_vec(), e))?;
        let mut by_reference: HashMap<Uuid, HeroRecord> = ranked
            .into_iter()
            .map(|record| (record.reference, record))
            .collect();

        let mut docs = Vec::with_capacity(moves.len());
        for m in moves {
            let Some(record) = by_reference.get_mut(&m.reference) else {
                continue;
            };
            if conditional && record.rank != Rank::Ranked(m.from) {
                continue;
            }
            record.rank = Rank::Ranked(m.to);
            docs.push((self.reference_term(&m.reference), self.to_document(record)));
        }
        if docs.is_empty() {
            return Ok(0);
        }

        let written = docs.len();
        self.write_locked(writer, |writer| {
            for (term, doc) in docs {
                writer.delete_term(term);
                writer.add_document(doc)?;
            }
            Ok(())
        })
        .map_err(|e| ShiftError::untouched(moves.to_vec(), StoreError::from(e)))?;
        Ok(written)
    }

    fn persist_counters(&self, counters: &BTreeMap<String, u64>) -> Result<()> {
        let data = serde_json::to_string_pretty(counters)?;
        let tmp_path = self.meta_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &data)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.meta_path)
            .with_context(|| format!("Failed to replace {}", self.meta_path.display()))?;
        Ok(())
    }
}

/// The commit already landed, so a failed reload only delays visibility
/// until the next successful one.
fn settle_reload(reload: tantivy::Result<()>) -> Result<()> {
    if let Err(e) = reload {
        tracing::warn!("Committed hero index but reader reload failed: {e}");
    }
    Ok(())
}

impl HeroStore for TantivyStore {
    fn find_by_alias(&self, alias: &str) -> Result<Vec<HeroRecord>, StoreError> {
        let term = tantivy::Term::from_field_text(self.f_alias, alias);
        self.collect(&TermQuery::new(term, IndexRecordOption::Basic))
    }

    fn get(&self, reference: &Uuid) -> Result<Option<HeroRecord>, StoreError> {
        let query = TermQuery::new(self.reference_term(reference), IndexRecordOption::Basic);
        Ok(self.collect(&query)?.into_iter().next())
    }

    fn insert(&self, draft: HeroDraft) -> Result<HeroRecord, StoreError> {
        let record = draft.into_record(Uuid::new_v4());
        self.put(&record)?;
        Ok(record)
    }

    fn put(&self, record: &HeroRecord) -> Result<(), StoreError> {
        let doc = self.to_document(record);
        let term = self.reference_term(&record.reference);
        self.write(|writer| {
            writer.delete_term(term);
            writer.add_document(doc)?;
            Ok(())
        })?;
        Ok(())
    }

    fn delete(&self, reference: &Uuid) -> Result<bool, StoreError> {
        let mut writer = self.writer.lock();
        if self.get(reference)?.is_none() {
            return Ok(false);
        }
        let term = self.reference_term(reference);
        self.write_locked(&mut writer, |writer| {
            writer.delete_term(term);
            Ok(())
        })?;
        Ok(true)
    }

    fn update_where(&self, shift: &RankShift) -> Result<usize, ShiftError> {
        let mut writer = self.writer.lock();
        let plan = shift.plan(self.ranks().map_err(|e| ShiftError::untouched(Vec::new(), e))?);
        self.commit_moves(&mut writer, &plan, false)
    }

    fn apply_moves(&self, moves: &[RankMove]) -> Result<usize, ShiftError> {
        let mut writer = self.writer.lock();
        self.commit_moves(&mut writer, moves, true)
    }

    fn query_page(&self, query: &PageQuery) -> Result<Vec<HeroRecord>, StoreError> {
        let matches = match query.search.as_deref() {
            None => self.collect(&AllQuery)?,
            Some(term) => {
                let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
                for field in [self.f_alias, self.f_name, self.f_quirk] {
                    let term = tantivy::Term::from_field_text(field, term);
                    clauses.push((
                        Occur::Should,
                        Box::new(TermQuery::new(term, IndexRecordOption::Basic)),
                    ));
                }
                // 0 encodes the sentinels, never a real licence or rank
                if let Some(n) = term.parse::<u64>().ok().filter(|n| *n != 0) {
                    for field in [self.f_hero_id, self.f_rank] {
                        let term = tantivy::Term::from_field_u64(field, n);
                        clauses.push((
                            Occur::Should,
                            Box::new(TermQuery::new(term, IndexRecordOption::Basic)),
                        ));
                    }
                }
                self.collect(&BooleanQuery::new(clauses))?
            }
        };
        Ok(query.paginate(matches))
    }

    fn ranks(&self) -> Result<Vec<(Uuid, u32)>, StoreError> {
        Ok(self
            .collect(&self.ranked_query())?
            .into_iter()
            .filter_map(|r| r.rank.value().map(|rank| (r.reference, rank)))
            .collect())
    }

    fn get_counter(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.counters.read().get(key).copied())
    }

    fn set_counter(&self, key: &str, value: u64) -> Result<(), StoreError> {
        let mut counters = self.counters.write();
        let mut next = counters.clone();
        next.insert(key.to_string(), value);
        self.persist_counters(&next)?;
        *counters = next;
        Ok(())
    }
}
