//! The content-addressed fingerprint index.
//!
//! The engine depends only on the [`FingerprintIndex`] trait; the sqlite
//! backend is the durable implementation and [`MemoryIndex`] the in-process
//! one used for tests and throwaway sessions. Both share the same logical
//! schema: an algorithm-partitioned multimap `hash -> [(reference,
//! local_time)]` plus reference metadata.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::params::Algorithm;

/// Opaque reference identifier, allocated only by the index.
pub type ReferenceId = i64;

/// Free-form reference metadata; only `filename` is semantically consulted.
pub type ReferenceMetadata = HashMap<String, String>;

/// A registered reference recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceInfo {
    pub id: ReferenceId,
    /// Canonical file path, unique across the index
    pub path: String,
    pub filename: String,
    pub metadata: ReferenceMetadata,
}

/// One stored record returned by a bulk lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashMatch {
    pub hash: String,
    pub reference_id: ReferenceId,
    pub local_time: u32,
}

/// Persistence seam for fingerprints and reference metadata.
///
/// All fingerprint operations are algorithm-keyed: hashes registered under
/// one algorithm are invisible to every other.
#[async_trait]
pub trait FingerprintIndex: Send + Sync {
    /// Idempotent insert: returns the existing id when `file_path` is
    /// already known.
    async fn ensure_reference(
        &self,
        file_path: &str,
        metadata: &ReferenceMetadata,
    ) -> Result<ReferenceId>;

    /// True iff at least one fingerprint exists for `(file_path, algorithm)`.
    async fn is_registered(&self, file_path: &str, algorithm: Algorithm) -> Result<bool>;

    /// Atomic append of a fingerprint batch; on error nothing is committed.
    /// Storage deduplicates identical `(hash, local_time)` tuples.
    async fn write_batch(
        &self,
        reference_id: ReferenceId,
        algorithm: Algorithm,
        fingerprints: &[Fingerprint],
    ) -> Result<()>;

    /// Every stored record whose hash is in `hashes`, fetched in bulk.
    async fn lookup(&self, algorithm: Algorithm, hashes: &[String]) -> Result<Vec<HashMatch>>;

    async fn get_reference(&self, reference_id: ReferenceId) -> Result<Option<ReferenceInfo>>;

    /// Canonical parameter JSON recorded at first registration under
    /// `algorithm`, if any.
    async fn load_params(&self, algorithm: Algorithm) -> Result<Option<String>>;

    /// Record the canonical parameter JSON for `algorithm`.
    async fn store_params(&self, algorithm: Algorithm, params_json: &str) -> Result<()>;

    /// Drop every reference, fingerprint and stored parameter set.
    async fn clear_all(&self) -> Result<()>;
}

/// Filename component of a path, as stored in reference metadata.
pub fn filename_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
