//! Shared broadcast bus
//!
//! Lets subscribers attached to different server processes see the same
//! messages. Publishers append to an outbox table in a SQLite file shared
//! by every process; each process runs a relay that tails the outbox and
//! hands new rows to its local router.
//!
//! The relay starts from the newest row at startup, so a process never
//! replays messages published before it came up.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tokio::task::JoinHandle;

use super::router::BroadcastRouter;
use super::BroadcastMessage;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS flow_broadcasts (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    topic      TEXT NOT NULL,
    payload    TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
";

/// Rows fetched per relay poll
const RELAY_BATCH: i64 = 256;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("bus payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("bus io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bus append timed out after {0:?}")]
    Timeout(Duration),

    #[error("bus task failed: {0}")]
    Task(String),
}

/// One relay poll worth of outbox rows
#[derive(Debug, Default)]
pub struct OutboxBatch {
    /// Highest id scanned, decodable or not; `after` when nothing was read
    pub scanned_to: i64,
    pub rows: Vec<(i64, BroadcastMessage)>,
}

pub struct SqliteBus {
    conn: Mutex<Connection>,
    /// Rows kept behind the newest one
    retention: i64,
}

impl SqliteBus {
    pub fn open(path: &Path, busy_timeout: Duration, retention: i64) -> Result<Self, BusError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let _mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;

        log::info!("Broadcast bus opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            retention: retention.max(1),
        })
    }

    /// Append one message; returns its row id.
    ///
    /// An `Err` means nothing was written. Trim failures after the insert
    /// are logged only.
    pub fn append(&self, message: &BroadcastMessage) -> Result<i64, BusError> {
        let payload = serde_json::to_string(message)?;
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO flow_broadcasts (topic, payload) VALUES (?1, ?2)",
            params![message.topic, payload],
        )?;
        let id = conn.last_insert_rowid();

        if id % 100 == 0 {
            match conn.execute("DELETE FROM flow_broadcasts WHERE id <= ?1", params![id - self.retention]) {
                Ok(0) => {}
                Ok(trimmed) => log::debug!("Trimmed {} broadcast rows", trimmed),
                Err(e) => log::warn!("Broadcast outbox trim failed: {}", e),
            }
        }

        Ok(id)
    }

    /// Newest row id, 0 when empty
    pub fn latest_id(&self) -> Result<i64, BusError> {
        let conn = self.conn.lock();
        let id: i64 = conn.query_row("SELECT COALESCE(MAX(id), 0) FROM flow_broadcasts", [], |row| row.get(0))?;
        Ok(id)
    }

    /// Rows with id > `after`, oldest first. Undecodable rows are skipped
    /// but still count towards `scanned_to`.
    pub fn read_after(&self, after: i64, limit: i64) -> Result<OutboxBatch, BusError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, payload FROM flow_broadcasts WHERE id > ?1 ORDER BY id LIMIT ?2")?;
        let rows = stmt.query_map(params![after, limit], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut batch = OutboxBatch {
            scanned_to: after,
            rows: Vec::new(),
        };
        for row in rows {
            let (id, payload) = row?;
            batch.scanned_to = id;
            match serde_json::from_str::<BroadcastMessage>(&payload) {
                Ok(message) => batch.rows.push((id, message)),
                Err(e) => log::warn!("Skipping broadcast row {}: {}", id, e),
            }
        }
        Ok(batch)
    }
}

/// Tail the outbox and deliver new rows to the local router.
///
/// The cursor is taken before the task starts.
pub fn spawn_relay(
    bus: Arc<SqliteBus>,
    router: Arc<BroadcastRouter>,
    poll: Duration,
) -> Result<JoinHandle<()>, BusError> {
    let start = bus.latest_id()?;
    log::info!("Broadcast relay starting after row {}", start);

    Ok(tokio::spawn(async move {
        let mut cursor = start;
        let mut ticker = tokio::time::interval(poll);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let reader = bus.clone();
            let after = cursor;
            let batch = match tokio::task::spawn_blocking(move || reader.read_after(after, RELAY_BATCH)).await {
                Ok(Ok(batch)) => batch,
                Ok(Err(e)) => {
                    log::error!("Broadcast relay read failed: {}", e);
                    continue;
                }
                Err(e) => {
                    log::error!("Broadcast relay task failed: {}", e);
                    continue;
                }
            };

            for (_, message) in &batch.rows {
                router.publish(&message.topic, message);
            }
            cursor = batch.scanned_to;
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::broadcast::subscriber::ChannelSubscriber;
    use crate::logic::broadcast::FLOW_UPDATES_TOPIC;
    use crate::logic::confidence::ConfidenceTier;
    use crate::logic::features::TrafficLabel;

    fn open(dir: &tempfile::TempDir) -> SqliteBus {
        SqliteBus::open(&dir.path().join("bus.db"), Duration::from_secs(5), 1_000).unwrap()
    }

    fn message(flow: &str) -> BroadcastMessage {
        BroadcastMessage::flow_update(flow, TrafficLabel::Streaming, ConfidenceTier::Low)
    }

    #[test]
    fn test_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let bus = open(&dir);
        assert_eq!(bus.latest_id().unwrap(), 0);

        let first = bus.append(&message("a")).unwrap();
        bus.append(&message("b")).unwrap();

        let batch = bus.read_after(0, 10).unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.rows[0].1.flow_id, "a");
        assert_eq!(batch.scanned_to, first + 1);

        let rest = bus.read_after(first, 10).unwrap();
        assert_eq!(rest.rows.len(), 1);
        assert_eq!(rest.rows[0].1.flow_id, "b");

        let empty = bus.read_after(first + 1, 10).unwrap();
        assert!(empty.rows.is_empty());
        assert_eq!(empty.scanned_to, first + 1);
    }

    #[test]
    fn test_retention_trims_old_rows() {
        let dir = tempfile::tempdir().unwrap();
        let bus = SqliteBus::open(&dir.path().join("bus.db"), Duration::from_secs(5), 10).unwrap();
        for i in 0..100 {
            bus.append(&message(&i.to_string())).unwrap();
        }
        let rows = bus.read_after(0, 1_000).unwrap().rows;
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0].0, 91);
    }

    #[tokio::test]
    async fn test_relay_crosses_processes_without_backlog() {
        let dir = tempfile::tempdir().unwrap();
        // Two handles on one file stand in for two server processes
        let publisher = Arc::new(open(&dir));
        publisher.append(&message("before-start")).unwrap();

        let remote_bus = Arc::new(open(&dir));
        let remote_router = Arc::new(BroadcastRouter::new());
        let (sub, mut rx) = ChannelSubscriber::new(8);
        remote_router.join(FLOW_UPDATES_TOPIC, sub);

        let relay = spawn_relay(remote_bus, remote_router, Duration::from_millis(10)).unwrap();
        publisher.append(&message("after-start")).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(got.flow_id, "after-start");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        relay.abort();
    }

    fn insert_raw(dir: &tempfile::TempDir, count: usize, payload: &str) {
        let conn = Connection::open(dir.path().join("bus.db")).unwrap();
        for _ in 0..count {
            conn.execute(
                "INSERT INTO flow_broadcasts (topic, payload) VALUES (?1, ?2)",
                params![FLOW_UPDATES_TOPIC, payload],
            )
            .unwrap();
        }
    }

    #[test]
    fn test_undecodable_rows_still_advance() {
        let dir = tempfile::tempdir().unwrap();
        let bus = open(&dir);
        insert_raw(&dir, 3, r#"{"v2":1}"#);

        let batch = bus.read_after(0, 10).unwrap();
        assert!(batch.rows.is_empty());
        assert_eq!(batch.scanned_to, 3);
    }

    #[tokio::test]
    async fn test_relay_moves_past_full_batch_of_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(open(&dir));
        let router = Arc::new(BroadcastRouter::new());
        let (sub, mut rx) = ChannelSubscriber::new(8);
        router.join(FLOW_UPDATES_TOPIC, sub);

        let relay = spawn_relay(bus.clone(), router, Duration::from_millis(10)).unwrap();

        // Rows written by a newer payload version
        insert_raw(&dir, RELAY_BATCH as usize + 44, r#"{"v2":1}"#);
        bus.append(&message("readable")).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(got.flow_id, "readable");
        relay.abort();
    }
}
