//! SQLite-backed queue store

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::types::{Batch, Event, Table};

use super::QueueStore;

/// Queue store handle (single connection behind a mutex)
pub struct SqliteQueueStore {
    conn: Mutex<Connection>,
    max_rows: usize,
}

impl SqliteQueueStore {
    /// Open or create a queue database at the given path
    pub fn open(path: &Path, max_rows: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        super::schema::run_migrations(&conn)?;

        tracing::debug!(path = %path.display(), max_rows, "Opened queue store");

        Ok(Self {
            conn: Mutex::new(conn),
            max_rows,
        })
    }

    /// Open an in-memory queue (for testing)
    pub fn open_in_memory(max_rows: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            max_rows,
        })
    }

    /// Row ceiling enforced by `insert`
    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl QueueStore for SqliteQueueStore {
    fn insert(&self, table: Table, event: &Event) -> Result<i64> {
        if !event.body().is_object() {
            return Err(Error::Data(format!(
                "event must be a JSON object, got {}",
                event.body()
            )));
        }
        let data = serde_json::to_string(event.body())?;

        let conn = self.conn();
        let pending: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue WHERE tbl = ?1",
            params![table.as_str()],
            |r| r.get(0),
        )?;
        if pending as usize >= self.max_rows {
            return Err(Error::StoreFull {
                limit: self.max_rows,
            });
        }

        conn.execute(
            "INSERT INTO queue (tbl, data, created_at) VALUES (?1, ?2, ?3)",
            params![table.as_str(), data, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn read_oldest(&self, table: Table, limit: usize) -> Result<Option<Batch>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, data FROM queue WHERE tbl = ?1 ORDER BY id ASC LIMIT ?2")?;
        let rows = stmt.query_map(params![table.as_str(), limit as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut max_id = None;
        let mut len = 0;
        let mut payload = String::from("[");
        for row in rows {
            let (id, data) = row?;
            if len > 0 {
                payload.push(',');
            }
            payload.push_str(&data);
            max_id = Some(id);
            len += 1;
        }
        payload.push(']');

        Ok(max_id.map(|max_id| Batch {
            max_id,
            len,
            payload,
        }))
    }

    fn purge(&self, table: Table, upto_id: i64) -> Result<usize> {
        let deleted = self.conn().execute(
            "DELETE FROM queue WHERE tbl = ?1 AND id <= ?2",
            params![table.as_str(), upto_id],
        )?;
        Ok(deleted)
    }

    fn count(&self, table: Table) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM queue WHERE tbl = ?1",
            params![table.as_str()],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    fn wipe_all(&self) -> Result<()> {
        self.conn().execute("DELETE FROM queue", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn event(name: &str) -> Event {
        Event::new(json!({ "e": name }))
    }

    fn store() -> SqliteQueueStore {
        SqliteQueueStore::open_in_memory(100).unwrap()
    }

    #[test]
    fn test_read_oldest_in_insertion_order() {
        let store = store();
        for name in ["a", "b", "c"] {
            store.insert(Table::Events, &event(name)).unwrap();
        }

        let batch = store.read_oldest(Table::Events, 10).unwrap().unwrap();
        assert_eq!(batch.len, 3);
        assert_eq!(batch.payload, r#"[{"e":"a"},{"e":"b"},{"e":"c"}]"#);
    }

    #[test]
    fn test_read_oldest_respects_limit() {
        let store = store();
        let first = store.insert(Table::Events, &event("a")).unwrap();
        let second = store.insert(Table::Events, &event("b")).unwrap();
        store.insert(Table::Events, &event("c")).unwrap();
        assert!(second > first);

        let batch = store.read_oldest(Table::Events, 2).unwrap().unwrap();
        assert_eq!(batch.len, 2);
        assert_eq!(batch.max_id, second);
        assert_eq!(batch.payload, r#"[{"e":"a"},{"e":"b"}]"#);
    }

    #[test]
    fn test_read_oldest_empty() {
        assert!(store().read_oldest(Table::Events, 10).unwrap().is_none());
    }

    #[test]
    fn test_purge_keeps_rows_after_snapshot() {
        let store = store();
        store.insert(Table::Events, &event("a")).unwrap();
        store.insert(Table::Events, &event("b")).unwrap();
        let batch = store.read_oldest(Table::Events, 10).unwrap().unwrap();

        // arrives while the batch is in flight
        store.insert(Table::Events, &event("late")).unwrap();

        assert_eq!(store.purge(Table::Events, batch.max_id).unwrap(), 2);
        assert_eq!(store.count(Table::Events).unwrap(), 1);
        let rest = store.read_oldest(Table::Events, 10).unwrap().unwrap();
        assert_eq!(rest.payload, r#"[{"e":"late"}]"#);
    }

    #[test]
    fn test_ceiling_reports_store_full() {
        let store = SqliteQueueStore::open_in_memory(2).unwrap();
        store.insert(Table::Events, &event("a")).unwrap();
        store.insert(Table::Events, &event("b")).unwrap();

        let err = store.insert(Table::Events, &event("c")).unwrap_err();
        assert!(matches!(err, Error::StoreFull { limit: 2 }));
        assert_eq!(store.count(Table::Events).unwrap(), 2);
    }

    #[test]
    fn test_non_object_is_malformed() {
        let store = store();
        let err = store
            .insert(Table::Events, &Event::new(json!(["not", "an", "object"])))
            .unwrap_err();
        assert!(matches!(err, Error::Data(_)));
        assert_eq!(store.count(Table::Events).unwrap(), 0);
    }

    #[test]
    fn test_wipe_all() {
        let store = store();
        store.insert(Table::Events, &event("a")).unwrap();
        store.wipe_all().unwrap();
        assert_eq!(store.count(Table::Events).unwrap(), 0);
    }

    #[test]
    fn test_ids_stay_monotonic_after_purge() {
        let store = store();
        let first = store.insert(Table::Events, &event("a")).unwrap();
        store.purge(Table::Events, first).unwrap();
        let second = store.insert(Table::Events, &event("b")).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_open_on_disk_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/app.queue.db");
        {
            let store = SqliteQueueStore::open(&path, 10).unwrap();
            store.insert(Table::Events, &event("a")).unwrap();
        }
        let store = SqliteQueueStore::open(&path, 10).unwrap();
        assert_eq!(store.count(Table::Events).unwrap(), 1);
    }
}
