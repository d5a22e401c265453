//! Engine facade: the public operations over one database file.
//!
//! A [`Database`] holds a path, its immutable [`ConnectionConfig`] and the
//! process-wide lock for that path. Each operation opens the file, does
//! its work and closes it again, so handles never accumulate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashSet;
use bytes::Bytes;
use parking_lot::RwLock;
use rayon::prelude::*;
use tracing::info;

use veclite_core::vector::cosine_similarity_prenormed;
use veclite_core::{
    simd, Error, FilterExpr, PaginatedRecord, RecordId, RecordInsert, Result, SearchHit, TopK,
    Vector,
};

use crate::format::SlotHeader;
use crate::lock;
use crate::store::{FileStore, ScanRecord};

/// Batches below this size are scored on the calling thread.
const PARALLEL_SCORE_THRESHOLD: usize = 256;

/// Immutable per-connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub dimensions: u32,
    /// Tombstone ratio beyond which a delete triggers synchronous
    /// compaction.
    pub compaction_threshold: f32,
    /// Records scored per scan burst.
    pub scan_batch: usize,
}

impl ConnectionConfig {
    pub const DEFAULT_COMPACTION_THRESHOLD: f32 = 0.35;
    pub const DEFAULT_SCAN_BATCH: usize = 1024;

    #[must_use]
    pub fn new(dimensions: u32) -> Self {
        Self {
            dimensions,
            compaction_threshold: Self::DEFAULT_COMPACTION_THRESHOLD,
            scan_batch: Self::DEFAULT_SCAN_BATCH,
        }
    }

    #[must_use]
    pub fn with_compaction_threshold(mut self, threshold: f32) -> Self {
        self.compaction_threshold = threshold;
        self
    }
}

/// Header-derived statistics; answered without scanning the regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub dimensions: u32,
    pub live_count: u64,
    pub tombstone_count: u64,
    pub file_size: u64,
}

/// Handle on one database file.
#[derive(Debug)]
pub struct Database {
    path: PathBuf,
    config: ConnectionConfig,
    lock: Arc<RwLock<()>>,
}

impl Database {
    /// Open a database, creating the file when absent. Fails with
    /// `DimensionMismatch` when an existing file was created with a
    /// different dimensionality.
    pub fn connect<P: AsRef<Path>>(path: P, config: ConnectionConfig) -> Result<Self> {
        if config.dimensions == 0 {
            return Err(Error::InvalidArgument(
                "dimensionality must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&config.compaction_threshold) {
            return Err(Error::InvalidArgument(format!(
                "compaction threshold must be within [0, 1], got {}",
                config.compaction_threshold
            )));
        }

        let path = path.as_ref().to_path_buf();
        let lock = lock::for_path(&path);
        {
            let _guard = lock.write();
            FileStore::open(&path, config.dimensions)?;
        }

        Ok(Self { path, config, lock })
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    #[must_use]
    pub fn dimensions(&self) -> u32 {
        self.config.dimensions
    }

    /// Index statistics from the header alone, O(1).
    pub fn stats<P: AsRef<Path>>(path: P) -> Result<IndexStats> {
        let path = path.as_ref();
        let lock = lock::for_path(path);
        let _guard = lock.read();

        let (header, file_size) = FileStore::read_header(path)?;
        Ok(IndexStats {
            dimensions: header.dimensions,
            live_count: header.live_count(),
            tombstone_count: header.tombstone_count,
            file_size,
        })
    }

    /// Insert a batch of records; all-or-nothing.
    ///
    /// Every vector is validated against the connection dimensionality
    /// before anything is written, so a bad row rejects the whole batch
    /// and the id sequence never skips.
    pub fn insert_many(&self, batch: &[RecordInsert]) -> Result<usize> {
        let dimensions = self.config.dimensions as usize;
        for rec in batch {
            if rec.vector.len() != dimensions {
                return Err(Error::DimensionMismatch {
                    expected: dimensions,
                    actual: rec.vector.len(),
                });
            }
        }
        if batch.is_empty() {
            return Ok(0);
        }

        let _guard = self.lock.write();
        let mut store = FileStore::open(&self.path, self.config.dimensions)?;
        let ids = store.append(batch)?;
        Ok(ids.len())
    }

    /// The k most similar live records to `query`, best first.
    pub fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.search(query, k, None)
    }

    /// Like [`Database::top_k`], restricted to records whose metadata
    /// matches the JSON filter.
    pub fn top_k_with_filter(
        &self,
        query: &[f32],
        k: usize,
        json_filter: &str,
    ) -> Result<Vec<SearchHit>> {
        let filter = FilterExpr::parse(json_filter)?;
        self.search(query, k, Some(&filter))
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&FilterExpr>,
    ) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Err(Error::InvalidArgument(
                "top-k must be at least 1".to_string(),
            ));
        }

        let _guard = self.lock.read();
        let mut store = FileStore::open_existing(&self.path)?;

        let dimensions = store.header().dimensions as usize;
        if query.len() != dimensions {
            return Err(Error::DimensionMismatch {
                expected: dimensions,
                actual: query.len(),
            });
        }

        let query_norm = simd::norm_simd(query);
        let mut topk: TopK<(SlotHeader, Option<Bytes>)> = TopK::new(k);

        let mut scan = store.scan(filter.is_some())?;
        let mut batch: Vec<ScanRecord> = Vec::with_capacity(self.config.scan_batch);
        loop {
            batch.clear();
            for rec in scan.by_ref() {
                let rec = rec?;
                if rec.is_tombstoned() {
                    continue;
                }
                if let Some(f) = filter {
                    let metadata = rec.metadata.as_ref().expect("filtered scan loads metadata");
                    if !f.matches_bytes(metadata) {
                        continue;
                    }
                }
                batch.push(rec);
                if batch.len() == self.config.scan_batch {
                    break;
                }
            }
            if batch.is_empty() {
                break;
            }

            let scores: Vec<f32> = if batch.len() >= PARALLEL_SCORE_THRESHOLD {
                batch
                    .par_iter()
                    .map(|rec| cosine_similarity_prenormed(query, query_norm, &rec.vector))
                    .collect()
            } else {
                batch
                    .iter()
                    .map(|rec| cosine_similarity_prenormed(query, query_norm, &rec.vector))
                    .collect()
            };

            for (rec, score) in batch.drain(..).zip(scores) {
                topk.push(rec.slot.id, score, (rec.slot, rec.metadata));
            }
        }

        // Results own their metadata; fetch it now for winners scanned
        // without it.
        let winners = topk.into_sorted();
        let mut hits = Vec::with_capacity(winners.len());
        for (id, score, (slot, metadata)) in winners {
            let metadata = match metadata {
                Some(m) => m,
                None => store.read_metadata(&slot)?,
            };
            hits.push(SearchHit {
                id,
                score,
                metadata,
            });
        }
        Ok(hits)
    }

    /// Tombstone the given ids; unknown or already-deleted ids count as
    /// zero. Returns the number of records newly deleted.
    pub fn delete_by_ids(&self, ids: &[RecordId]) -> Result<usize> {
        let _guard = self.lock.write();
        let mut store = FileStore::open_existing(&self.path)?;

        let set: AHashSet<RecordId> = ids.iter().copied().collect();
        let deleted = store.tombstone(&set)?;
        self.maybe_compact(&mut store)?;
        Ok(deleted)
    }

    /// Tombstone every live record whose metadata matches the filter.
    pub fn delete_by_filter(&self, json_filter: &str) -> Result<usize> {
        let filter = FilterExpr::parse(json_filter)?;

        let _guard = self.lock.write();
        let mut store = FileStore::open_existing(&self.path)?;

        let mut matched: AHashSet<RecordId> = AHashSet::new();
        for rec in store.scan(true)? {
            let rec = rec?;
            if rec.is_tombstoned() {
                continue;
            }
            let metadata = rec.metadata.as_ref().expect("scan loads metadata");
            if filter.matches_bytes(metadata) {
                matched.insert(rec.id());
            }
        }

        let deleted = store.tombstone(&matched)?;
        self.maybe_compact(&mut store)?;
        Ok(deleted)
    }

    /// A page of live records in ascending id order, skipping the first
    /// `skip` live records and returning at most `limit`.
    pub fn paginate(&self, skip: usize, limit: usize) -> Result<Vec<PaginatedRecord>> {
        let _guard = self.lock.read();
        let store = FileStore::open_existing(&self.path)?;

        let mut page = Vec::with_capacity(limit.min(64));
        let mut seen = 0usize;
        for rec in store.scan(true)? {
            let rec = rec?;
            if rec.is_tombstoned() {
                continue;
            }
            if seen < skip {
                seen += 1;
                continue;
            }
            if page.len() == limit {
                break;
            }
            page.push(PaginatedRecord {
                id: rec.id(),
                vector: Vector::new(rec.vector),
                metadata: rec.metadata.expect("scan loads metadata"),
            });
        }
        Ok(page)
    }

    /// Force a compaction pass regardless of the tombstone ratio.
    pub fn compact(&self) -> Result<()> {
        let _guard = self.lock.write();
        let mut store = FileStore::open_existing(&self.path)?;
        store.compact()
    }

    fn maybe_compact(&self, store: &mut FileStore) -> Result<()> {
        let header = store.header();
        if header.record_count == 0 || header.tombstone_count == 0 {
            return Ok(());
        }
        let ratio = header.tombstone_count as f32 / header.record_count as f32;
        if ratio > self.config.compaction_threshold {
            info!(ratio, "tombstone ratio over threshold, compacting");
            store.compact()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(dir: &tempfile::TempDir, dimensions: u32) -> Database {
        Database::connect(
            dir.path().join("db.vec"),
            ConnectionConfig::new(dimensions),
        )
        .unwrap()
    }

    fn row(vector: Vec<f32>, meta: &str) -> RecordInsert {
        RecordInsert::new(vector, meta.as_bytes().to_vec())
    }

    #[test]
    fn test_insert_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let db = db(&dir, 2);

        db.insert_many(&[
            row(vec![1.0, 0.0], r#"{"n":1}"#),
            row(vec![0.0, 1.0], r#"{"n":2}"#),
        ])
        .unwrap();

        let hits = db.top_k(&[1.0, 0.1], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
        assert_eq!(&hits[0].metadata[..], br#"{"n":1}"#);
    }

    #[test]
    fn test_empty_batch_inserts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let db = db(&dir, 2);
        assert_eq!(db.insert_many(&[]).unwrap(), 0);
    }

    #[test]
    fn test_query_argument_validation() {
        let dir = tempfile::tempdir().unwrap();
        let db = db(&dir, 2);
        db.insert_many(&[row(vec![1.0, 0.0], "{}")]).unwrap();

        assert!(matches!(
            db.top_k(&[1.0, 0.0], 0).unwrap_err(),
            Error::InvalidArgument(_)
        ));
        assert!(matches!(
            db.top_k(&[1.0, 0.0, 0.0], 1).unwrap_err(),
            Error::DimensionMismatch { .. }
        ));
    }

    #[test]
    fn test_delete_threshold_triggers_compaction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.vec");
        let db = Database::connect(
            &path,
            ConnectionConfig::new(1).with_compaction_threshold(0.0),
        )
        .unwrap();

        db.insert_many(&[row(vec![1.0], "{}"), row(vec![2.0], "{}")])
            .unwrap();
        assert_eq!(db.delete_by_ids(&[1]).unwrap(), 1);

        // Any tombstone ratio beats a zero threshold, so the slot is
        // physically gone already.
        let stats = Database::stats(&path).unwrap();
        assert_eq!(stats.live_count, 1);
        assert_eq!(stats.tombstone_count, 0);
    }

    #[test]
    fn test_delete_by_filter_counts_matches() {
        let dir = tempfile::tempdir().unwrap();
        let db = db(&dir, 1);
        db.insert_many(&[
            row(vec![1.0], r#"{"tag":"a"}"#),
            row(vec![2.0], r#"{"tag":"b"}"#),
            row(vec![3.0], r#"{"tag":"a"}"#),
        ])
        .unwrap();

        assert_eq!(db.delete_by_filter(r#"{"tag":"a"}"#).unwrap(), 2);
        assert_eq!(db.delete_by_filter(r#"{"tag":"a"}"#).unwrap(), 0);
    }

    #[test]
    fn test_paginate_windows() {
        let dir = tempfile::tempdir().unwrap();
        let db = db(&dir, 1);
        db.insert_many(&[
            row(vec![1.0], r#"{"n":1}"#),
            row(vec![2.0], r#"{"n":2}"#),
            row(vec![3.0], r#"{"n":3}"#),
        ])
        .unwrap();
        db.delete_by_ids(&[2]).unwrap();

        let page = db.paginate(1, 5).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, 3);

        assert!(db.paginate(9, 5).unwrap().is_empty());
    }
}
