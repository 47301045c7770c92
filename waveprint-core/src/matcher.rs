//! Histogram-of-offsets matching.
//!
//! A genuine match is a contiguous slice of a reference, so its hash
//! collisions pile up at one time offset; coincidental collisions scatter.
//! The tallest per-reference histogram bin is therefore the score, with no
//! absolute threshold; callers interpret it relative to corpus statistics.

use std::collections::{BTreeMap, HashMap, HashSet};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::index::{FingerprintIndex, ReferenceId, ReferenceInfo};
use crate::params::Algorithm;

/// One scored candidate reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankedMatch {
    pub reference_id: ReferenceId,
    /// Height of the tallest offset-histogram bin
    pub score: u64,
    /// Aligned offset in frames: `t_reference - t_query` at the tallest bin
    pub offset_frames: i64,
}

/// Successful identification result.
#[derive(Debug, Clone)]
pub struct MatchReport {
    pub best: RankedMatch,
    /// Metadata of the winning reference
    pub reference: ReferenceInfo,
    /// Up to `top_k` runners-up, best first
    pub runners_up: Vec<RankedMatch>,
    /// Number of query fingerprints that voted
    pub query_fingerprints: usize,
}

#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Match(MatchReport),
    NoMatch { reason: String },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Match(_))
    }
}

/// Score every reference sharing hashes with `query` and pick the winner.
///
/// Ties are broken deterministically: within a histogram the smallest offset
/// wins; across references the smallest reference id.
pub async fn find_best_match(
    index: &dyn FingerprintIndex,
    algorithm: Algorithm,
    query: &[Fingerprint],
    top_k: usize,
    cancel: &CancellationToken,
) -> Result<MatchOutcome> {
    if query.is_empty() {
        return Ok(MatchOutcome::NoMatch {
            reason: "no query fingerprints provided".to_string(),
        });
    }

    let unique: Vec<String> = {
        let mut seen = HashSet::new();
        query
            .iter()
            .filter(|f| seen.insert(f.hash.as_str()))
            .map(|f| f.hash.clone())
            .collect()
    };
    debug!(
        unique = unique.len(),
        algorithm = %algorithm,
        "querying index for hash matches"
    );

    let records = index.lookup(algorithm, &unique).await?;
    if records.is_empty() {
        return Ok(MatchOutcome::NoMatch {
            reason: "no matching hashes found in the index".to_string(),
        });
    }
    debug!(records = records.len(), "retrieved hash matches");

    let mut by_hash: HashMap<&str, Vec<(ReferenceId, u32)>> = HashMap::new();
    for record in &records {
        by_hash
            .entry(record.hash.as_str())
            .or_default()
            .push((record.reference_id, record.local_time));
    }

    // Every (query tuple, stored record) pair votes for one (reference,
    // offset) cell. BTreeMap keeps reference iteration deterministic.
    let mut candidates: BTreeMap<ReferenceId, Vec<(u32, u32)>> = BTreeMap::new();
    for fp in query {
        if let Some(matches) = by_hash.get(fp.hash.as_str()) {
            for &(reference_id, local_time) in matches {
                candidates
                    .entry(reference_id)
                    .or_default()
                    .push((local_time, fp.local_time));
            }
        }
    }

    let mut ranked = Vec::with_capacity(candidates.len());
    for (reference_id, pairs) in candidates {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut histogram: HashMap<i64, u64> = HashMap::new();
        for (t_reference, t_query) in pairs {
            let delta = i64::from(t_reference) - i64::from(t_query);
            *histogram.entry(delta).or_insert(0) += 1;
        }

        // Offsets are unique keys, so (count, smallest-delta) is a strict
        // order and the argmax is deterministic.
        let Some((offset_frames, score)) = histogram
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        else {
            continue;
        };

        ranked.push(RankedMatch {
            reference_id,
            score,
            offset_frames,
        });
    }

    ranked.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.reference_id.cmp(&b.reference_id))
    });

    let Some(&best) = ranked.first() else {
        return Ok(MatchOutcome::NoMatch {
            reason: "matching hashes found, but no consistent time alignment".to_string(),
        });
    };
    let runners_up = ranked[1..].iter().take(top_k).copied().collect();

    let Some(reference) = index.get_reference(best.reference_id).await? else {
        return Ok(MatchOutcome::NoMatch {
            reason: format!(
                "best match (reference {}) has no stored metadata",
                best.reference_id
            ),
        });
    };

    debug!(
        reference_id = best.reference_id,
        score = best.score,
        offset_frames = best.offset_frames,
        "identified best-aligning reference"
    );

    Ok(MatchOutcome::Match(MatchReport {
        best,
        reference,
        runners_up,
        query_fingerprints: query.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{MemoryIndex, ReferenceMetadata};

    fn fp(hash: &str, local_time: u32) -> Fingerprint {
        Fingerprint {
            hash: hash.to_string(),
            local_time,
        }
    }

    async fn seeded_index() -> (MemoryIndex, ReferenceId, ReferenceId) {
        let index = MemoryIndex::new();
        let meta = ReferenceMetadata::new();
        let a = index.ensure_reference("/db/a.wav", &meta).await.unwrap();
        let b = index.ensure_reference("/db/b.wav", &meta).await.unwrap();
        (index, a, b)
    }

    #[tokio::test]
    async fn consistent_offset_beats_scattered_collisions() {
        let (index, a, b) = seeded_index().await;
        // Reference a holds the query shifted by 10 frames.
        index
            .write_batch(
                a,
                Algorithm::MaximaPairing,
                &[fp("h1", 10), fp("h2", 15), fp("h3", 22)],
            )
            .await
            .unwrap();
        // Reference b shares two hashes, but at inconsistent offsets.
        index
            .write_batch(b, Algorithm::MaximaPairing, &[fp("h1", 3), fp("h2", 40)])
            .await
            .unwrap();

        let query = vec![fp("h1", 0), fp("h2", 5), fp("h3", 12)];
        let outcome = find_best_match(
            &index,
            Algorithm::MaximaPairing,
            &query,
            5,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let MatchOutcome::Match(report) = outcome else {
            panic!("expected a match");
        };
        assert_eq!(report.best.reference_id, a);
        assert_eq!(report.best.score, 3);
        assert_eq!(report.best.offset_frames, 10);
        assert_eq!(report.reference.path, "/db/a.wav");
        assert_eq!(report.query_fingerprints, 3);
        assert_eq!(report.runners_up.len(), 1);
        assert_eq!(report.runners_up[0].reference_id, b);
        assert_eq!(report.runners_up[0].score, 1);
    }

    #[tokio::test]
    async fn negative_offsets_are_representable() {
        let (index, a, _) = seeded_index().await;
        // The stored copy starts *earlier* than the query's frame zero.
        index
            .write_batch(a, Algorithm::Chroma, &[fp("x", 0), fp("y", 4)])
            .await
            .unwrap();

        let query = vec![fp("x", 7), fp("y", 11)];
        let outcome = find_best_match(
            &index,
            Algorithm::Chroma,
            &query,
            5,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let MatchOutcome::Match(report) = outcome else {
            panic!("expected a match");
        };
        assert_eq!(report.best.offset_frames, -7);
        assert_eq!(report.best.score, 2);
    }

    #[tokio::test]
    async fn equal_bins_resolve_to_the_smallest_offset() {
        let (index, a, _) = seeded_index().await;
        // One vote at delta 5, one at delta 9.
        index
            .write_batch(a, Algorithm::Chroma, &[fp("x", 5), fp("y", 9)])
            .await
            .unwrap();

        let query = vec![fp("x", 0), fp("y", 0)];
        let outcome = find_best_match(
            &index,
            Algorithm::Chroma,
            &query,
            5,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let MatchOutcome::Match(report) = outcome else {
            panic!("expected a match");
        };
        assert_eq!(report.best.score, 1);
        assert_eq!(report.best.offset_frames, 5);
    }

    #[tokio::test]
    async fn duplicate_query_tuples_each_vote() {
        let (index, a, _) = seeded_index().await;
        index
            .write_batch(a, Algorithm::Chroma, &[fp("x", 3)])
            .await
            .unwrap();

        // The extractor emitted the same tuple twice; both vote.
        let query = vec![fp("x", 1), fp("x", 1)];
        let outcome = find_best_match(
            &index,
            Algorithm::Chroma,
            &query,
            5,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let MatchOutcome::Match(report) = outcome else {
            panic!("expected a match");
        };
        assert_eq!(report.best.score, 2);
        assert_eq!(report.best.offset_frames, 2);
    }

    #[tokio::test]
    async fn unknown_hashes_are_a_no_match() {
        let (index, _, _) = seeded_index().await;
        let query = vec![fp("missing", 0)];
        let outcome = find_best_match(
            &index,
            Algorithm::MaximaPairing,
            &query,
            5,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(!outcome.is_match());
    }

    #[tokio::test]
    async fn empty_query_is_a_no_match() {
        let (index, _, _) = seeded_index().await;
        let outcome = find_best_match(
            &index,
            Algorithm::MaximaPairing,
            &[],
            5,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(!outcome.is_match());
    }

    #[tokio::test]
    async fn cancellation_aborts_scoring() {
        let (index, a, _) = seeded_index().await;
        index
            .write_batch(a, Algorithm::Chroma, &[fp("x", 0)])
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = find_best_match(&index, Algorithm::Chroma, &[fp("x", 0)], 5, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
