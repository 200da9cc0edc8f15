//! SQLite-backed stats store
//!
//! One database file shared by every server process on the host. Counters
//! are bumped with a single UPSERT statement; latencies are appended and
//! trimmed inside one IMMEDIATE transaction.

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, TransactionBehavior};

use super::store::{Counter, CounterValues, StatsStore};
use super::StatsError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS flow_counters (
    name  TEXT PRIMARY KEY,
    value INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS flow_latencies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ms REAL NOT NULL
);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl From<rusqlite::Error> for StatsError {
    fn from(e: rusqlite::Error) -> Self {
        StatsError::Store(e.to_string())
    }
}

impl SqliteStore {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StatsError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StatsError::Store(format!("{}: {}", parent.display(), e)))?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;

        log::info!("Stats store opened at {} (journal_mode={})", path.display(), mode);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl StatsStore for SqliteStore {
    fn increment(&self, counter: Counter) -> Result<(), StatsError> {
        self.conn.lock().execute(
            "INSERT INTO flow_counters (name, value) VALUES (?1, 1)
             ON CONFLICT(name) DO UPDATE SET value = value + 1",
            params![counter.key()],
        )?;
        Ok(())
    }

    fn push_latency(&self, ms: f64, capacity: usize) -> Result<(), StatsError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute("INSERT INTO flow_latencies (ms) VALUES (?1)", params![ms])?;
        tx.execute(
            "DELETE FROM flow_latencies
             WHERE id NOT IN (SELECT id FROM flow_latencies ORDER BY id DESC LIMIT ?1)",
            params![capacity as i64],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn counters(&self) -> Result<CounterValues, StatsError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name, value FROM flow_counters")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut values = CounterValues::new();
        for row in rows {
            let (name, value) = row?;
            match Counter::from_key(&name) {
                Some(counter) => {
                    values.insert(counter, value.max(0) as u64);
                }
                None => log::debug!("Ignoring unknown stats counter {:?}", name),
            }
        }
        Ok(values)
    }

    fn latencies(&self, limit: usize) -> Result<Vec<f64>, StatsError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT ms FROM flow_latencies ORDER BY id DESC LIMIT ?1")?;
        let mut newest_first = stmt
            .query_map(params![limit as i64], |row| row.get::<_, f64>(0))?
            .collect::<Result<Vec<f64>, _>>()?;

        newest_first.reverse();
        Ok(newest_first)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn open(dir: &tempfile::TempDir) -> SqliteStore {
        SqliteStore::open(&dir.path().join("stats.db"), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_counters_start_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        assert!(store.counters().unwrap().is_empty());
        assert!(store.latencies(10).unwrap().is_empty());
    }

    #[test]
    fn test_increment_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);

        store.increment(Counter::Total).unwrap();
        store.increment(Counter::Total).unwrap();
        store.increment(Counter::Uncertain).unwrap();

        let values = store.counters().unwrap();
        assert_eq!(values[&Counter::Total], 2);
        assert_eq!(values[&Counter::Uncertain], 1);
        assert!(!values.contains_key(&Counter::High));
    }

    #[test]
    fn test_latency_window_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);

        for i in 0..8 {
            store.push_latency(i as f64, 3).unwrap();
        }
        assert_eq!(store.latencies(3).unwrap(), vec![5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_two_handles_share_counters() {
        // Two connections on one file stand in for two server processes
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(open(&dir));
        let b = Arc::new(open(&dir));

        let handles: Vec<_> = [a.clone(), b.clone()]
            .into_iter()
            .map(|store| {
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        store.increment(Counter::Total).unwrap();
                        store.push_latency(1.0, 10).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(a.counters().unwrap()[&Counter::Total], 100);
        assert_eq!(b.counters().unwrap()[&Counter::Total], 100);
        assert_eq!(b.latencies(100).unwrap().len(), 10);
    }

    #[test]
    fn test_reopen_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        open(&dir).increment(Counter::DnsDetections).unwrap();
        assert_eq!(open(&dir).counters().unwrap()[&Counter::DnsDetections], 1);
    }
}
