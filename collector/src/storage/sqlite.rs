//! SQLite repository
//!
//! Upserts replace gauges and increment counters. Batches are coalesced per
//! id and written as multi-row statements inside one transaction.

use super::{
    coalesce_counters, coalesce_gauges, Counter, Counters, Gauge, Gauges, Repository,
    StorageError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_core::MetricKind;
use rusqlite::{params_from_iter, Connection, OptionalExtension, ToSql, Transaction};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Rows per INSERT statement, well below SQLite's bound parameter limit
const ROWS_PER_STATEMENT: usize = 500;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS gauge_metrics (
        id    TEXT PRIMARY KEY,
        value REAL NOT NULL
    );
    CREATE TABLE IF NOT EXISTS counter_metrics (
        id    TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );
";

const GAUGE_UPSERT_PREFIX: &str = "INSERT INTO gauge_metrics (id, value) VALUES ";
const GAUGE_UPSERT_SUFFIX: &str = " ON CONFLICT (id) DO UPDATE SET value = excluded.value";
const COUNTER_UPSERT_PREFIX: &str = "INSERT INTO counter_metrics (id, value) VALUES ";
// Saturating add: plain `+` overflows into REAL in SQLite
const COUNTER_UPSERT_SUFFIX: &str = " ON CONFLICT (id) DO UPDATE SET value = CASE
        WHEN excluded.value > 0 AND counter_metrics.value > 9223372036854775807 - excluded.value
            THEN 9223372036854775807
        WHEN excluded.value < 0 AND counter_metrics.value < (-9223372036854775807 - 1) - excluded.value
            THEN (-9223372036854775807 - 1)
        ELSE counter_metrics.value + excluded.value
    END";

pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open (or create) the database file and its tables
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "Opened SQLite repository");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking closure against the connection off the async runtime
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

fn placeholders(rows: usize) -> String {
    (0..rows)
        .map(|i| format!("(?{}, ?{})", i * 2 + 1, i * 2 + 2))
        .collect::<Vec<_>>()
        .join(", ")
}

fn upsert_gauges(tx: &Transaction<'_>, gauges: &[Gauge]) -> Result<(), StorageError> {
    for chunk in gauges.chunks(ROWS_PER_STATEMENT) {
        let sql = format!(
            "{}{}{}",
            GAUGE_UPSERT_PREFIX,
            placeholders(chunk.len()),
            GAUGE_UPSERT_SUFFIX
        );
        let params = chunk
            .iter()
            .flat_map(|g| [&g.id as &dyn ToSql, &g.value as &dyn ToSql]);
        tx.execute(&sql, params_from_iter(params))?;
    }
    Ok(())
}

fn upsert_counters(tx: &Transaction<'_>, counters: &[Counter]) -> Result<(), StorageError> {
    for chunk in counters.chunks(ROWS_PER_STATEMENT) {
        let sql = format!(
            "{}{}{}",
            COUNTER_UPSERT_PREFIX,
            placeholders(chunk.len()),
            COUNTER_UPSERT_SUFFIX
        );
        let params = chunk
            .iter()
            .flat_map(|c| [&c.id as &dyn ToSql, &c.value as &dyn ToSql]);
        tx.execute(&sql, params_from_iter(params))?;
    }
    Ok(())
}

fn read_all<T: rusqlite::types::FromSql>(
    conn: &Connection,
    sql: &str,
) -> Result<std::collections::HashMap<String, T>, StorageError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, T>(1)?)))?;
    let mut out = std::collections::HashMap::new();
    for row in rows {
        let (id, value) = row?;
        out.insert(id, value);
    }
    Ok(out)
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn get_gauge(&self, id: &str) -> Result<f64, StorageError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value FROM gauge_metrics WHERE id = ?1",
                [&id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StorageError::not_found(MetricKind::Gauge, &id))
        })
        .await
    }

    async fn set_gauge(&self, id: &str, value: f64) -> Result<(), StorageError> {
        self.set_gauges(&[Gauge::new(id, value)]).await
    }

    async fn get_counter(&self, id: &str) -> Result<i64, StorageError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value FROM counter_metrics WHERE id = ?1",
                [&id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StorageError::not_found(MetricKind::Counter, &id))
        })
        .await
    }

    async fn add_counter(&self, id: &str, delta: i64) -> Result<(), StorageError> {
        self.add_counters(&[Counter::new(id, delta)]).await
    }

    async fn get_all_gauges(&self) -> Result<Gauges, StorageError> {
        self.with_conn(|conn| read_all(conn, "SELECT id, value FROM gauge_metrics ORDER BY id"))
            .await
    }

    async fn get_all_counters(&self) -> Result<Counters, StorageError> {
        self.with_conn(|conn| read_all(conn, "SELECT id, value FROM counter_metrics ORDER BY id"))
            .await
    }

    async fn set_gauges(&self, gauges: &[Gauge]) -> Result<(), StorageError> {
        self.apply(gauges, &[]).await
    }

    async fn add_counters(&self, counters: &[Counter]) -> Result<(), StorageError> {
        self.apply(&[], counters).await
    }

    async fn apply(&self, gauges: &[Gauge], counters: &[Counter]) -> Result<(), StorageError> {
        if gauges.is_empty() && counters.is_empty() {
            return Ok(());
        }

        let gauges = coalesce_gauges(gauges);
        let counters = coalesce_counters(counters);
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            upsert_gauges(&tx, &gauges)?;
            upsert_counters(&tx, &counters)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn snapshot(&self) -> Result<(Gauges, Counters), StorageError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let gauges = read_all(&tx, "SELECT id, value FROM gauge_metrics")?;
            let counters = read_all(&tx, "SELECT id, value FROM counter_metrics")?;
            tx.commit()?;
            Ok((gauges, counters))
        })
        .await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gauge_upsert_replaces() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.set_gauge("Alloc", 1.0).await.unwrap();
        repo.set_gauge("Alloc", 3.5).await.unwrap();
        assert_eq!(repo.get_gauge("Alloc").await.unwrap(), 3.5);
    }

    #[tokio::test]
    async fn test_counter_upsert_increments() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.add_counter("PollCount", 2).await.unwrap();
        repo.add_counter("PollCount", 5).await.unwrap();
        assert_eq!(repo.get_counter("PollCount").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_counter_saturates() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.add_counter("Up", i64::MAX - 1).await.unwrap();
        repo.add_counter("Up", 10).await.unwrap();
        assert_eq!(repo.get_counter("Up").await.unwrap(), i64::MAX);

        repo.add_counter("Down", i64::MIN + 1).await.unwrap();
        repo.add_counter("Down", -10).await.unwrap();
        assert_eq!(repo.get_counter("Down").await.unwrap(), i64::MIN);
    }

    #[tokio::test]
    async fn test_missing_metric() {
        let repo = SqliteRepository::in_memory().unwrap();
        assert!(repo.get_gauge("nope").await.unwrap_err().is_not_found());
        assert!(repo.get_counter("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_batch_with_duplicates() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.add_counter("PollCount", 10).await.unwrap();
        repo.apply(
            &[
                Gauge::new("Alloc", 10.0),
                Gauge::new("Heap", 4.0),
                Gauge::new("Alloc", 20.0),
            ],
            &[Counter::new("PollCount", 1), Counter::new("PollCount", 2)],
        )
        .await
        .unwrap();

        assert_eq!(repo.get_gauge("Alloc").await.unwrap(), 20.0);
        assert_eq!(repo.get_counter("PollCount").await.unwrap(), 13);

        let (gauges, counters) = repo.snapshot().await.unwrap();
        assert_eq!(gauges.len(), 2);
        assert_eq!(counters.get("PollCount"), Some(&13));
    }

    #[tokio::test]
    async fn test_large_batch_spans_statements() {
        let repo = SqliteRepository::in_memory().unwrap();
        let gauges: Vec<Gauge> = (0..1200)
            .map(|i| Gauge::new(format!("g{}", i), i as f64))
            .collect();
        repo.set_gauges(&gauges).await.unwrap();

        let all = repo.get_all_gauges().await.unwrap();
        assert_eq!(all.len(), 1200);
        assert_eq!(all.get("g1199"), Some(&1199.0));
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.db");
        {
            let repo = SqliteRepository::open(&path).unwrap();
            repo.add_counter("PollCount", 4).await.unwrap();
            repo.ping().await.unwrap();
        }

        let repo = SqliteRepository::open(&path).unwrap();
        assert_eq!(repo.get_counter("PollCount").await.unwrap(), 4);
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(2), "(?1, ?2), (?3, ?4)");
    }
}
