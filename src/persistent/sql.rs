//! Executes a single [`CoalescedOperation`] against the SQLite connection,
//! one `sqlx::Transaction` per coalesced operation (SPEC_FULL.md §5.8 step 4).

use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::error::{CacheError, CacheResult};
use crate::model::{self, now_ticks, CacheElement};
use crate::persistent::coalescer::CoalescedKind;
use crate::persistent::operation::OperationResult;

/// Creates the schema if it does not already exist, and applies the
/// durability/performance PRAGMAs (SPEC_FULL.md §5.7).
pub async fn bootstrap_schema(pool: &SqlitePool) -> CacheResult<()> {
    sqlx::query("PRAGMA journal_mode = WAL;").execute(pool).await?;
    sqlx::query("PRAGMA synchronous = NORMAL;").execute(pool).await?;
    sqlx::query("PRAGMA temp_store = MEMORY;").execute(pool).await?;
    sqlx::query("PRAGMA foreign_keys = OFF;").execute(pool).await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS CacheElement (
            Key TEXT PRIMARY KEY,
            TypeName TEXT NULL,
            Value BLOB NOT NULL,
            Expiration INTEGER NOT NULL,
            CreatedAt INTEGER NOT NULL
        );",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_type_name ON CacheElement(TypeName);")
        .execute(pool)
        .await?;

    Ok(())
}

fn placeholders(count: usize) -> String {
    std::iter::repeat("?").take(count).collect::<Vec<_>>().join(",")
}

fn row_to_element(row: &sqlx::sqlite::SqliteRow) -> CacheElement {
    CacheElement {
        physical_key: row.get::<String, _>("Key"),
        type_name: row.get::<Option<String>, _>("TypeName"),
        value: row.get::<Vec<u8>, _>("Value"),
        expiration: row.get::<i64, _>("Expiration"),
        created_at: row.get::<i64, _>("CreatedAt"),
    }
}

/// Runs one coalesced operation inside its own transaction and returns the
/// result to be fanned out to its originals.
pub async fn execute(pool: &SqlitePool, kind: &CoalescedKind) -> CacheResult<OperationResult> {
    let mut tx = pool.begin().await?;

    let result = match kind {
        CoalescedKind::Select(keys) => {
            if keys.is_empty() {
                OperationResult::Elements(Vec::new())
            } else {
                let sql = format!(
                    "SELECT Key, TypeName, Value, Expiration, CreatedAt FROM CacheElement WHERE Key IN ({}) AND Expiration > ?",
                    placeholders(keys.len())
                );
                let mut query = sqlx::query(&sql);
                for key in keys {
                    query = query.bind(key);
                }
                query = query.bind(now_ticks());
                let rows = query.fetch_all(&mut *tx).await?;
                OperationResult::Elements(rows.iter().map(row_to_element).collect())
            }
        }
        CoalescedKind::Insert(elements) => {
            for element in elements {
                sqlx::query(
                    "INSERT INTO CacheElement (Key, TypeName, Value, Expiration, CreatedAt)
                     VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT(Key) DO UPDATE SET
                        TypeName = excluded.TypeName,
                        Value = excluded.Value,
                        Expiration = excluded.Expiration,
                        CreatedAt = excluded.CreatedAt",
                )
                .bind(&element.physical_key)
                .bind(&element.type_name)
                .bind(&element.value)
                .bind(element.expiration)
                .bind(element.created_at)
                .execute(&mut *tx)
                .await?;
            }
            OperationResult::Unit
        }
        CoalescedKind::Invalidate(keys) => {
            if !keys.is_empty() {
                let sql = format!("DELETE FROM CacheElement WHERE Key IN ({})", placeholders(keys.len()));
                let mut query = sqlx::query(&sql);
                for key in keys {
                    query = query.bind(key);
                }
                query.execute(&mut *tx).await?;
            }
            OperationResult::Unit
        }
        CoalescedKind::InvalidateAll => {
            sqlx::query("DELETE FROM CacheElement WHERE Key NOT LIKE 'meta:%'").execute(&mut *tx).await?;
            OperationResult::Unit
        }
        CoalescedKind::GetKeys(filter) => {
            let rows = match filter {
                None => sqlx::query("SELECT Key FROM CacheElement WHERE Expiration > ? AND Key NOT LIKE 'meta:%'")
                    .bind(now_ticks())
                    .fetch_all(&mut *tx)
                    .await?,
                Some(None) => sqlx::query(
                    "SELECT Key FROM CacheElement WHERE Expiration > ? AND TypeName IS NULL AND Key NOT LIKE 'meta:%'",
                )
                .bind(now_ticks())
                .fetch_all(&mut *tx)
                .await?,
                Some(Some(tag)) => sqlx::query("SELECT Key FROM CacheElement WHERE Expiration > ? AND TypeName = ?")
                    .bind(now_ticks())
                    .bind(tag)
                    .fetch_all(&mut *tx)
                    .await?,
            };
            let keys = rows
                .iter()
                .map(|row| row.get::<String, _>("Key"))
                .map(|physical| model::strip_type_prefix(&physical).to_string())
                .collect();
            OperationResult::Keys(keys)
        }
        CoalescedKind::UpdateExpiration { physical_key, expiration_ticks } => {
            sqlx::query("UPDATE CacheElement SET Expiration = ? WHERE Key = ?")
                .bind(expiration_ticks)
                .bind(physical_key)
                .execute(&mut *tx)
                .await?;
            OperationResult::Unit
        }
        CoalescedKind::Vacuum { compact } => {
            sqlx::query("DELETE FROM CacheElement WHERE Expiration <= ?").bind(now_ticks()).execute(&mut *tx).await?;
            tx.commit().await?;
            if *compact {
                sqlx::query("VACUUM;").execute(pool).await?;
            }
            return Ok(OperationResult::Unit);
        }
        CoalescedKind::Flush => OperationResult::Unit,
    };

    tx.commit().await.map_err(CacheError::from)?;
    Ok(result)
}
