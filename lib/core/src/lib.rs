//! # veclite Core
//!
//! Core library for the veclite vector store.
//!
//! This crate provides the I/O-free building blocks:
//!
//! - [`Vector`] - Dense vector representation with SIMD-accelerated scoring
//! - [`RecordInsert`] / [`SearchHit`] - Insert rows and owned search results
//! - [`FilterExpr`] - JSON metadata filter, parsed once and evaluated per record
//! - [`TopK`] - Bounded best-k accumulator with deterministic tie-breaking
//!
//! Similarity is cosine throughout the engine; see [`vector::cosine_similarity`].

pub mod error;
pub mod filter;
pub mod record;
pub mod topk;
pub mod vector;

/// SIMD-optimized vector operations
///
/// Hardware-accelerated dot product and norm:
/// - AVX2/FMA on x86_64
/// - SSE on x86
/// - NEON on ARM64/Apple Silicon
pub mod simd;

pub use error::{Error, Result};
pub use filter::FilterExpr;
pub use record::{PaginatedRecord, RecordId, RecordInsert, RecordJson, SearchHit};
pub use topk::TopK;
pub use vector::Vector;
