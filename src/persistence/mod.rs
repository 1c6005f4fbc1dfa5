// Snapshot Cache - keeps the last store snapshot in SQLite between runs
// A single entry is kept; entries older than `max_age` are expired on load

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::StoreSnapshot;

/// A snapshot read back from the cache
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    pub id: Uuid,
    pub saved_at: DateTime<Utc>,
    pub snapshot: StoreSnapshot,
}

#[derive(Debug, Clone)]
pub struct SnapshotCache {
    pool: SqlitePool,
    max_age: Duration,
}

impl SnapshotCache {
    pub async fn connect(database_url: &str, max_age: Duration) -> AppResult<Self> {
        // One connection: an in-memory database exists per connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!(
                    "Failed to connect to snapshot cache {}: {}",
                    database_url, e
                ))
            })?;

        let cache = Self { pool, max_age };
        cache.initialize().await?;
        Ok(cache)
    }

    pub async fn new_in_memory(max_age: Duration) -> AppResult<Self> {
        Self::connect("sqlite::memory:", max_age).await
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    async fn initialize(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshot_cache (
                id TEXT PRIMARY KEY,
                saved_at INTEGER NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(format!("Failed to create snapshot cache table: {}", e))
        })?;
        Ok(())
    }

    /// Replace the cached entry with `snapshot`
    pub async fn save(&self, snapshot: &StoreSnapshot) -> AppResult<Uuid> {
        self.save_at(snapshot, Utc::now()).await
    }

    async fn save_at(&self, snapshot: &StoreSnapshot, saved_at: DateTime<Utc>) -> AppResult<Uuid> {
        let payload = serde_json::to_string(snapshot)?;
        let id = Uuid::new_v4();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(format!("Failed to begin snapshot save: {}", e))
        })?;
        sqlx::query("DELETE FROM snapshot_cache")
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to clear old snapshot: {}", e)))?;
        sqlx::query("INSERT INTO snapshot_cache (id, saved_at, payload) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(saved_at.timestamp_millis())
            .bind(payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to save snapshot: {}", e)))?;
        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(format!("Failed to commit snapshot save: {}", e))
        })?;

        debug!("snapshot {} saved", id);
        Ok(id)
    }

    /// The cached snapshot, unless there is none or it has expired.
    /// Expired and unreadable entries are deleted.
    pub async fn load(&self) -> AppResult<Option<CachedSnapshot>> {
        let row = sqlx::query(
            "SELECT id, saved_at, payload FROM snapshot_cache ORDER BY saved_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to load snapshot: {}", e)))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row.get("id");
        let saved_at_ms: i64 = row.get("saved_at");
        let payload: String = row.get("payload");

        let saved_at = DateTime::<Utc>::from_timestamp_millis(saved_at_ms).unwrap_or_default();
        let age = Utc::now()
            .signed_duration_since(saved_at)
            .to_std()
            .unwrap_or_default();
        if age > self.max_age {
            info!("snapshot {} expired after {}s", id, age.as_secs());
            self.clear().await?;
            return Ok(None);
        }

        let parsed = serde_json::from_str::<StoreSnapshot>(&payload)
            .map_err(AppError::from)
            .and_then(|snapshot| {
                let id = Uuid::parse_str(&id)
                    .map_err(|e| AppError::SerializationError(format!("bad cache id: {}", e)))?;
                Ok((id, snapshot))
            });
        match parsed {
            Ok((id, snapshot)) => Ok(Some(CachedSnapshot {
                id,
                saved_at,
                snapshot,
            })),
            Err(e) => {
                warn!("discarding unreadable snapshot {}: {}", id, e);
                self.clear().await?;
                Ok(None)
            }
        }
    }

    pub async fn clear(&self) -> AppResult<()> {
        sqlx::query("DELETE FROM snapshot_cache")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to clear snapshot cache: {}", e)))?;
        Ok(())
    }
}
