//! # veclite
//!
//! A tiny file-backed vector database. One database is one file on disk:
//! fixed-dimension `f32` vectors with attached JSON metadata, brute-force
//! cosine-similarity search with optional metadata filtering, tombstone
//! deletes with threshold compaction, and O(1) header-derived statistics.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use veclite::prelude::*;
//!
//! let db = Database::connect("vectors.db", ConnectionConfig::new(3))?;
//!
//! db.insert_many(&[
//!     RecordInsert::with_json(vec![1.0, 0.0, 0.0], &serde_json::json!({"t": 1})),
//!     RecordInsert::with_json(vec![0.0, 1.0, 0.0], &serde_json::json!({"t": 2})),
//! ])?;
//!
//! let hits = db.top_k(&[0.9, 0.1, 0.0], 1)?;
//! assert_eq!(hits[0].id, 1);
//!
//! let filtered = db.top_k_with_filter(&[0.9, 0.1, 0.0], 5, r#"{"t": 2}"#)?;
//! # Ok::<(), veclite::Error>(())
//! ```
//!
//! ## Crate Structure
//!
//! veclite is composed of two crates:
//!
//! - [`veclite-core`](https://docs.rs/veclite-core) - Records, metadata filters, SIMD scoring, top-k
//! - [`veclite-storage`](https://docs.rs/veclite-storage) - Single-file format, scan, compaction
//!
//! ## Features
//!
//! - **Single-file storage**: header, fixed-stride vector slots, floating metadata region
//! - **Cosine similarity**: SIMD-accelerated (AVX2, SSE, NEON), deterministic tie-breaking
//! - **Metadata Filtering**: document-style JSON predicates (`$eq`, `$in`, `$and`, ...)
//! - **Tombstone deletes**: threshold-triggered compaction through atomic rename

// Re-export core types
pub use veclite_core::{
    Error, FilterExpr, PaginatedRecord, RecordId, RecordInsert, RecordJson, Result, SearchHit,
    TopK, Vector,
};

// Re-export storage
pub use veclite_storage::{ConnectionConfig, Database, FileStore, IndexStats};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        ConnectionConfig, Database, Error, FilterExpr, IndexStats, PaginatedRecord, RecordId,
        RecordInsert, Result, SearchHit, Vector,
    };
}

/// SIMD-optimized vector operations
pub mod simd {
    pub use veclite_core::simd::{dot_product_simd, norm_simd};
}
