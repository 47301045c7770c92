//! In-memory fingerprint index.
//!
//! A map behind a mutex with the same contract as the sqlite backend. Handy
//! for tests and one-shot sessions where persistence is not wanted.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::index::{
    filename_of, FingerprintIndex, HashMatch, ReferenceId, ReferenceInfo, ReferenceMetadata,
};
use crate::params::Algorithm;

#[derive(Debug, Default)]
struct State {
    next_id: ReferenceId,
    by_path: HashMap<String, ReferenceId>,
    references: HashMap<ReferenceId, ReferenceInfo>,
    /// algorithm -> hash -> set of (reference, local_time); the set makes
    /// storage deduplicating like the sqlite unique index.
    buckets: HashMap<Algorithm, HashMap<String, BTreeSet<(ReferenceId, u32)>>>,
    params: HashMap<Algorithm, String>,
}

/// Volatile index keeping everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    state: Mutex<State>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FingerprintIndex for MemoryIndex {
    async fn ensure_reference(
        &self,
        file_path: &str,
        metadata: &ReferenceMetadata,
    ) -> Result<ReferenceId> {
        let mut state = self.state.lock().await;
        if let Some(&id) = state.by_path.get(file_path) {
            return Ok(id);
        }

        state.next_id += 1;
        let id = state.next_id;
        let filename = metadata
            .get("filename")
            .cloned()
            .unwrap_or_else(|| filename_of(Path::new(file_path)));

        state.by_path.insert(file_path.to_string(), id);
        state.references.insert(
            id,
            ReferenceInfo {
                id,
                path: file_path.to_string(),
                filename,
                metadata: metadata.clone(),
            },
        );
        Ok(id)
    }

    async fn is_registered(&self, file_path: &str, algorithm: Algorithm) -> Result<bool> {
        let state = self.state.lock().await;
        let Some(&id) = state.by_path.get(file_path) else {
            return Ok(false);
        };
        let registered = state
            .buckets
            .get(&algorithm)
            .is_some_and(|buckets| {
                buckets
                    .values()
                    .any(|records| records.iter().any(|&(r, _)| r == id))
            });
        Ok(registered)
    }

    async fn write_batch(
        &self,
        reference_id: ReferenceId,
        algorithm: Algorithm,
        fingerprints: &[Fingerprint],
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let buckets = state.buckets.entry(algorithm).or_default();
        for fp in fingerprints {
            buckets
                .entry(fp.hash.clone())
                .or_default()
                .insert((reference_id, fp.local_time));
        }
        Ok(())
    }

    async fn lookup(&self, algorithm: Algorithm, hashes: &[String]) -> Result<Vec<HashMatch>> {
        let state = self.state.lock().await;
        let Some(buckets) = state.buckets.get(&algorithm) else {
            return Ok(Vec::new());
        };

        let mut matches = Vec::new();
        for hash in hashes {
            if let Some(records) = buckets.get(hash) {
                matches.extend(records.iter().map(|&(reference_id, local_time)| HashMatch {
                    hash: hash.clone(),
                    reference_id,
                    local_time,
                }));
            }
        }
        Ok(matches)
    }

    async fn get_reference(&self, reference_id: ReferenceId) -> Result<Option<ReferenceInfo>> {
        let state = self.state.lock().await;
        Ok(state.references.get(&reference_id).cloned())
    }

    async fn load_params(&self, algorithm: Algorithm) -> Result<Option<String>> {
        let state = self.state.lock().await;
        Ok(state.params.get(&algorithm).cloned())
    }

    async fn store_params(&self, algorithm: Algorithm, params_json: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.params.insert(algorithm, params_json.to_string());
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = State::default();
        Ok(())
    }
}
