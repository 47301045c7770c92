//! Sqlite-backed fingerprint index.
//!
//! One row per `(algorithm, hash, local_time, reference)` tuple with a
//! composite lookup index on `(algorithm, hash_hex)`; a unique index makes
//! storage deduplicating. Bulk lookups build chunked `IN (...)` clauses so a
//! query of several thousand hashes costs a handful of round trips, not one
//! per hash.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::index::{
    filename_of, FingerprintIndex, HashMatch, ReferenceId, ReferenceInfo, ReferenceMetadata,
};
use crate::params::Algorithm;

/// Maximum hashes per `IN` clause; sqlite's default bind-variable budget
/// is 999.
const LOOKUP_CHUNK: usize = 500;

/// Durable index stored in a single sqlite database file.
#[derive(Debug, Clone)]
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Open (creating if needed) the database at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePool::connect(&db_url).await?;

        create_schema(&pool).await?;
        debug!("fingerprint index open at {}", db_path.display());
        Ok(Self { pool })
    }

    /// The underlying pool, for callers that need raw queries (tests).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audio_references (
            reference_id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path TEXT NOT NULL UNIQUE,
            filename TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fingerprints (
            algorithm TEXT NOT NULL,
            hash_hex TEXT NOT NULL,
            local_time INTEGER NOT NULL,
            reference_id INTEGER NOT NULL
                REFERENCES audio_references(reference_id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_fingerprints_algo_hash
        ON fingerprints (algorithm, hash_hex)
        "#,
    )
    .execute(pool)
    .await?;

    // Storage-level deduplication of repeated emissions.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_fingerprints_dedup
        ON fingerprints (algorithm, hash_hex, local_time, reference_id)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS algorithm_params (
            algorithm TEXT PRIMARY KEY,
            params TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[async_trait]
impl FingerprintIndex for SqliteIndex {
    async fn ensure_reference(
        &self,
        file_path: &str,
        metadata: &ReferenceMetadata,
    ) -> Result<ReferenceId> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT reference_id FROM audio_references WHERE file_path = ?")
                .bind(file_path)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some(id) = existing {
            tx.commit().await?;
            return Ok(id);
        }

        let filename = metadata
            .get("filename")
            .cloned()
            .unwrap_or_else(|| filename_of(Path::new(file_path)));
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| Error::Internal(format!("failed to serialize metadata: {e}")))?;

        let result = sqlx::query(
            "INSERT INTO audio_references (file_path, filename, metadata) VALUES (?, ?, ?)",
        )
        .bind(file_path)
        .bind(&filename)
        .bind(&metadata_json)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.last_insert_rowid())
    }

    async fn is_registered(&self, file_path: &str, algorithm: Algorithm) -> Result<bool> {
        let exists: i64 = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1
                FROM fingerprints f
                JOIN audio_references r ON r.reference_id = f.reference_id
                WHERE r.file_path = ? AND f.algorithm = ?
            )
            "#,
        )
        .bind(file_path)
        .bind(algorithm.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists != 0)
    }

    async fn write_batch(
        &self,
        reference_id: ReferenceId,
        algorithm: Algorithm,
        fingerprints: &[Fingerprint],
    ) -> Result<()> {
        if fingerprints.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for fp in fingerprints {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO fingerprints
                    (algorithm, hash_hex, local_time, reference_id)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(algorithm.as_str())
            .bind(&fp.hash)
            .bind(i64::from(fp.local_time))
            .bind(reference_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(
            reference_id,
            algorithm = %algorithm,
            count = fingerprints.len(),
            "committed fingerprint batch"
        );
        Ok(())
    }

    async fn lookup(&self, algorithm: Algorithm, hashes: &[String]) -> Result<Vec<HashMatch>> {
        let mut matches = Vec::new();

        for chunk in hashes.chunks(LOOKUP_CHUNK) {
            let placeholders = (0..chunk.len()).map(|_| "?").collect::<Vec<_>>().join(", ");
            let query_str = format!(
                r#"
                SELECT hash_hex, reference_id, local_time
                FROM fingerprints
                WHERE algorithm = ? AND hash_hex IN ({placeholders})
                "#
            );

            let mut query = sqlx::query(&query_str).bind(algorithm.as_str());
            for hash in chunk {
                query = query.bind(hash);
            }

            let rows = query.fetch_all(&self.pool).await?;
            for row in rows {
                matches.push(HashMatch {
                    hash: row.get("hash_hex"),
                    reference_id: row.get("reference_id"),
                    local_time: row.get::<i64, _>("local_time") as u32,
                });
            }
        }

        Ok(matches)
    }

    async fn get_reference(&self, reference_id: ReferenceId) -> Result<Option<ReferenceInfo>> {
        let row = sqlx::query(
            "SELECT reference_id, file_path, filename, metadata FROM audio_references WHERE reference_id = ?",
        )
        .bind(reference_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let metadata_json: String = row.get("metadata");
                let metadata: ReferenceMetadata = serde_json::from_str(&metadata_json)
                    .map_err(|e| Error::Internal(format!("corrupt reference metadata: {e}")))?;
                Ok(Some(ReferenceInfo {
                    id: row.get("reference_id"),
                    path: row.get("file_path"),
                    filename: row.get("filename"),
                    metadata,
                }))
            }
            None => Ok(None),
        }
    }

    async fn load_params(&self, algorithm: Algorithm) -> Result<Option<String>> {
        let params =
            sqlx::query_scalar("SELECT params FROM algorithm_params WHERE algorithm = ?")
                .bind(algorithm.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(params)
    }

    async fn store_params(&self, algorithm: Algorithm, params_json: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO algorithm_params (algorithm, params) VALUES (?, ?)
            ON CONFLICT(algorithm) DO UPDATE SET params = excluded.params
            "#,
        )
        .bind(algorithm.as_str())
        .bind(params_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        info!("clearing fingerprint index");
        sqlx::query("DROP TABLE IF EXISTS fingerprints")
            .execute(&self.pool)
            .await?;
        sqlx::query("DROP TABLE IF EXISTS audio_references")
            .execute(&self.pool)
            .await?;
        sqlx::query("DROP TABLE IF EXISTS algorithm_params")
            .execute(&self.pool)
            .await?;
        create_schema(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    async fn open_temp() -> (tempfile::TempDir, SqliteIndex) {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteIndex::open(&dir.path().join("index.db")).await.unwrap();
        (dir, index)
    }

    fn fp(hash: &str, local_time: u32) -> Fingerprint {
        Fingerprint {
            hash: hash.to_string(),
            local_time,
        }
    }

    fn meta(filename: &str) -> ReferenceMetadata {
        HashMap::from([("filename".to_string(), filename.to_string())])
    }

    #[tokio::test]
    async fn ensure_reference_is_idempotent() {
        let (_dir, index) = open_temp().await;
        let a = index
            .ensure_reference("/tmp/a.wav", &meta("a.wav"))
            .await
            .unwrap();
        let again = index
            .ensure_reference("/tmp/a.wav", &meta("a.wav"))
            .await
            .unwrap();
        let b = index
            .ensure_reference("/tmp/b.wav", &meta("b.wav"))
            .await
            .unwrap();

        assert_eq!(a, again);
        assert_ne!(a, b);

        let info = index.get_reference(a).await.unwrap().unwrap();
        assert_eq!(info.path, "/tmp/a.wav");
        assert_eq!(info.filename, "a.wav");
    }

    #[tokio::test]
    async fn lookup_is_partitioned_by_algorithm() {
        let (_dir, index) = open_temp().await;
        let id = index
            .ensure_reference("/tmp/a.wav", &meta("a.wav"))
            .await
            .unwrap();
        index
            .write_batch(id, Algorithm::MaximaPairing, &[fp("cafe", 3)])
            .await
            .unwrap();

        let hashes = vec!["cafe".to_string()];
        let hits = index.lookup(Algorithm::MaximaPairing, &hashes).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reference_id, id);
        assert_eq!(hits[0].local_time, 3);

        let cross = index.lookup(Algorithm::Chroma, &hashes).await.unwrap();
        assert!(cross.is_empty());
    }

    #[tokio::test]
    async fn storage_deduplicates_repeated_tuples() {
        let (_dir, index) = open_temp().await;
        let id = index
            .ensure_reference("/tmp/a.wav", &meta("a.wav"))
            .await
            .unwrap();
        let batch = vec![fp("beef", 1), fp("beef", 1), fp("beef", 2)];
        index
            .write_batch(id, Algorithm::SpectralPatch, &batch)
            .await
            .unwrap();
        // A second identical batch adds nothing either.
        index
            .write_batch(id, Algorithm::SpectralPatch, &batch)
            .await
            .unwrap();

        let hits = index
            .lookup(Algorithm::SpectralPatch, &["beef".to_string()])
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn is_registered_requires_fingerprints() {
        let (_dir, index) = open_temp().await;
        let id = index
            .ensure_reference("/tmp/a.wav", &meta("a.wav"))
            .await
            .unwrap();

        assert!(!index
            .is_registered("/tmp/a.wav", Algorithm::MaximaPairing)
            .await
            .unwrap());

        index
            .write_batch(id, Algorithm::MaximaPairing, &[fp("f00d", 0)])
            .await
            .unwrap();

        assert!(index
            .is_registered("/tmp/a.wav", Algorithm::MaximaPairing)
            .await
            .unwrap());
        // Still unregistered under a different algorithm.
        assert!(!index
            .is_registered("/tmp/a.wav", Algorithm::Chroma)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn bulk_lookup_spans_chunks() {
        let (_dir, index) = open_temp().await;
        let id = index
            .ensure_reference("/tmp/a.wav", &meta("a.wav"))
            .await
            .unwrap();

        let batch: Vec<Fingerprint> =
            (0..1200).map(|i| fp(&format!("hash{i:04}"), i)).collect();
        index
            .write_batch(id, Algorithm::MaximaPairing, &batch)
            .await
            .unwrap();

        let hashes: Vec<String> = (0..1200).map(|i| format!("hash{i:04}")).collect();
        let hits = index.lookup(Algorithm::MaximaPairing, &hashes).await.unwrap();
        assert_eq!(hits.len(), 1200);
    }

    #[tokio::test]
    async fn params_round_trip_per_algorithm() {
        let (_dir, index) = open_temp().await;
        assert!(index
            .load_params(Algorithm::Chroma)
            .await
            .unwrap()
            .is_none());

        index
            .store_params(Algorithm::Chroma, r#"{"threshold":0.5}"#)
            .await
            .unwrap();
        assert_eq!(
            index.load_params(Algorithm::Chroma).await.unwrap().as_deref(),
            Some(r#"{"threshold":0.5}"#)
        );
        assert!(index
            .load_params(Algorithm::MaximaPairing)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn clear_all_resets_everything() {
        let (_dir, index) = open_temp().await;
        let id = index
            .ensure_reference("/tmp/a.wav", &meta("a.wav"))
            .await
            .unwrap();
        index
            .write_batch(id, Algorithm::MaximaPairing, &[fp("dead", 0)])
            .await
            .unwrap();
        index
            .store_params(Algorithm::MaximaPairing, "{}")
            .await
            .unwrap();

        index.clear_all().await.unwrap();

        assert!(index.get_reference(id).await.unwrap().is_none());
        assert!(index
            .lookup(Algorithm::MaximaPairing, &["dead".to_string()])
            .await
            .unwrap()
            .is_empty());
        assert!(index
            .load_params(Algorithm::MaximaPairing)
            .await
            .unwrap()
            .is_none());

        // The index is immediately usable again.
        let new_id = index
            .ensure_reference("/tmp/a.wav", &meta("a.wav"))
            .await
            .unwrap();
        assert!(index.get_reference(new_id).await.unwrap().is_some());
    }
}
