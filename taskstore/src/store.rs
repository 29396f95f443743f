use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{StoreError, StoreResult};
use crate::filter::Filter;
use crate::record::{IndexValue, Record};

/// Opaque pagination cursor over a collection ordered by `(updated_at, id)`.
///
/// Encoded as `updated_at:id` and treated as opaque by callers per the
/// store's external contract - they pass it back verbatim to
/// [`Store::list_since`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub updated_at: i64,
    pub id: String,
}

impl Cursor {
    pub fn encode(&self) -> String {
        format!("{}:{}", self.updated_at, self.id)
    }

    pub fn decode(raw: &str) -> StoreResult<Self> {
        let (ts, id) = raw
            .split_once(':')
            .ok_or_else(|| StoreError::InvalidCursor(raw.to_string()))?;
        let updated_at = ts
            .parse()
            .map_err(|_| StoreError::InvalidCursor(raw.to_string()))?;
        Ok(Self {
            updated_at,
            id: id.to_string(),
        })
    }
}

/// The store: one SQLite file for indexes plus one JSONL log per
/// collection for durability.
pub struct Store {
    base_path: PathBuf,
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) a store rooted at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let base_path = path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        let conn = Connection::open(base_path.join("index.sqlite"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );
            CREATE TABLE IF NOT EXISTS record_index (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                field TEXT NOT NULL,
                str_value TEXT,
                int_value INTEGER,
                PRIMARY KEY (collection, id, field)
            );",
        )?;
        log::debug!("Store::open: base_path={:?}", base_path);
        Ok(Self { base_path, conn })
    }

    fn log_path(&self, collection: &str) -> PathBuf {
        self.base_path.join(format!("{collection}.jsonl"))
    }

    fn append_line(&self, collection: &str, line: &str) -> StoreResult<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(collection))?;
        file.lock_exclusive().map_err(|e| StoreError::Lock(e.to_string()))?;
        let result = (|| -> StoreResult<()> {
            let mut f = &file;
            writeln!(f, "{line}")?;
            f.flush()?;
            Ok(())
        })();
        let _ = file.unlock();
        result
    }

    fn exists(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    fn index_record<T: Record>(&self, record: &T, json: &str) -> StoreResult<()> {
        let collection = T::collection_name();
        self.conn.execute(
            "INSERT INTO records (collection, id, updated_at, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(collection, id) DO UPDATE SET updated_at = excluded.updated_at, data = excluded.data",
            params![collection, record.id(), record.updated_at(), json],
        )?;
        self.conn.execute(
            "DELETE FROM record_index WHERE collection = ?1 AND id = ?2",
            params![collection, record.id()],
        )?;
        for (field, value) in record.indexed_fields() {
            match value {
                IndexValue::Str(s) => self.conn.execute(
                    "INSERT INTO record_index (collection, id, field, str_value, int_value)
                     VALUES (?1, ?2, ?3, ?4, NULL)",
                    params![collection, record.id(), field, s],
                )?,
                IndexValue::Int(i) => self.conn.execute(
                    "INSERT INTO record_index (collection, id, field, str_value, int_value)
                     VALUES (?1, ?2, ?3, NULL, ?4)",
                    params![collection, record.id(), field, i],
                )?,
                IndexValue::Bool(b) => self.conn.execute(
                    "INSERT INTO record_index (collection, id, field, str_value, int_value)
                     VALUES (?1, ?2, ?3, NULL, ?4)",
                    params![collection, record.id(), field, b as i64],
                )?,
            };
        }
        Ok(())
    }

    /// Upsert a record: writes a new line to the collection's JSONL log
    /// and refreshes its SQLite projection.
    pub fn put<T: Record>(&self, record: &T) -> StoreResult<()> {
        let collection = T::collection_name();
        let json = serde_json::to_string(record)?;
        self.append_line(collection, &json)?;
        self.index_record(record, &json)?;
        Ok(())
    }

    /// Insert a record that must not already exist. Used for append-only
    /// collections such as task events, where overwriting an id would
    /// violate the "events are never mutated" invariant.
    pub fn append<T: Record>(&self, record: &T) -> StoreResult<()> {
        let collection = T::collection_name();
        if self.exists(collection, record.id())? {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: record.id().to_string(),
            });
        }
        self.put(record)
    }

    /// Point lookup by id.
    pub fn get<T: Record>(&self, id: &str) -> StoreResult<Option<T>> {
        let collection = T::collection_name();
        let row: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |r| r.get(0),
            )
            .optional()?;
        row.map(|s| serde_json::from_str(&s).map_err(Into::into)).transpose()
    }

    /// Same as [`Store::get`] but returns [`StoreError::NotFound`] for a
    /// missing record.
    pub fn get_required<T: Record>(&self, id: &str) -> StoreResult<T> {
        self.get(id)?.ok_or_else(|| StoreError::NotFound {
            collection: T::collection_name().to_string(),
            id: id.to_string(),
        })
    }

    /// List every record in a collection matching all `filters` (AND
    /// semantics). Evaluated in-process against each record's
    /// `indexed_fields`, so the result is always consistent with the
    /// record's own definition of its indexed fields.
    pub fn list<T: Record>(&self, filters: &[Filter]) -> StoreResult<Vec<T>> {
        let collection = T::collection_name();
        let mut stmt = self.conn.prepare("SELECT data FROM records WHERE collection = ?1")?;
        let rows = stmt.query_map(params![collection], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            let json = row?;
            let record: T = serde_json::from_str(&json)?;
            if filters.iter().all(|f| f.matches(&record.indexed_fields())) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Count of records matching `filters`, without materializing them.
    pub fn count<T: Record>(&self, filters: &[Filter]) -> StoreResult<usize> {
        Ok(self.list::<T>(filters)?.len())
    }

    /// Delete a record by id. Not used for append-only collections.
    pub fn delete<T: Record>(&self, id: &str) -> StoreResult<()> {
        let collection = T::collection_name();
        self.conn
            .execute("DELETE FROM records WHERE collection = ?1 AND id = ?2", params![collection, id])?;
        self.conn.execute(
            "DELETE FROM record_index WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        Ok(())
    }

    /// Paginated, globally ordered read of a collection by `(updated_at, id)`.
    ///
    /// Returns up to `limit` records strictly after `cursor`, plus the
    /// cursor to resume from next (`None` once the collection is
    /// exhausted). Every record is observed exactly once across a full
    /// walk, in per-collection order, which is what the event log's
    /// `listSince` contract requires.
    pub fn list_since<T: Record>(&self, cursor: Option<&Cursor>, limit: usize) -> StoreResult<(Vec<T>, Option<Cursor>)> {
        let mut all = self.list::<T>(&[])?;
        all.sort_by(|a, b| a.updated_at().cmp(&b.updated_at()).then_with(|| a.id().cmp(b.id())));

        let start = match cursor {
            None => 0,
            Some(c) => all
                .iter()
                .position(|r| (r.updated_at(), r.id()) > (c.updated_at, c.id.as_str()))
                .unwrap_or(all.len()),
        };

        let page: Vec<T> = all.into_iter().skip(start).take(limit).collect();
        let next_cursor = page.last().map(|r| Cursor {
            updated_at: r.updated_at(),
            id: r.id().to_string(),
        });
        Ok((page, next_cursor))
    }

    /// Replay a collection's JSONL log, keeping the last-written version
    /// of each id, and rebuild its SQLite projection from scratch. This is
    /// how a freshly started process (or one recovering from a crash)
    /// reconstructs queryable state from the durable log.
    pub fn rebuild_indexes<T: Record>(&self) -> StoreResult<usize> {
        let collection = T::collection_name();
        let path = self.log_path(collection);
        let mut latest: HashMap<String, T> = HashMap::new();

        if path.exists() {
            let file = File::open(&path)?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: T = serde_json::from_str(&line)?;
                latest.insert(record.id().to_string(), record);
            }
        }

        self.conn
            .execute("DELETE FROM records WHERE collection = ?1", params![collection])?;
        self.conn
            .execute("DELETE FROM record_index WHERE collection = ?1", params![collection])?;

        let count = latest.len();
        for record in latest.values() {
            let json = serde_json::to_string(record)?;
            self.index_record(record, &json)?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use tempfile::TempDir;

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
    struct Widget {
        id: String,
        status: String,
        updated_at: i64,
    }

    impl Record for Widget {
        fn id(&self) -> &str {
            &self.id
        }
        fn updated_at(&self) -> i64 {
            self.updated_at
        }
        fn collection_name() -> &'static str {
            "widgets"
        }
        fn indexed_fields(&self) -> Map<String, IndexValue> {
            let mut m = Map::new();
            m.insert("status".to_string(), IndexValue::Str(self.status.clone()));
            m
        }
    }

    fn widget(id: &str, status: &str, t: i64) -> Widget {
        Widget {
            id: id.to_string(),
            status: status.to_string(),
            updated_at: t,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.put(&widget("a", "open", 1)).unwrap();
        let got: Widget = store.get("a").unwrap().unwrap();
        assert_eq!(got.status, "open");
    }

    #[test]
    fn put_upserts_by_id() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.put(&widget("a", "open", 1)).unwrap();
        store.put(&widget("a", "closed", 2)).unwrap();
        let got: Widget = store.get("a").unwrap().unwrap();
        assert_eq!(got.status, "closed");
        assert_eq!(store.list::<Widget>(&[]).unwrap().len(), 1);
    }

    #[test]
    fn append_rejects_existing_id() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.append(&widget("a", "open", 1)).unwrap();
        let err = store.append(&widget("a", "open", 2)).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[test]
    fn list_filters_by_indexed_field() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.put(&widget("a", "open", 1)).unwrap();
        store.put(&widget("b", "closed", 2)).unwrap();
        let open = store
            .list::<Widget>(&[Filter::eq("status", IndexValue::Str("open".into()))])
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "a");
    }

    #[test]
    fn rebuild_indexes_replays_log_with_last_write_wins() {
        let dir = TempDir::new().unwrap();
        {
            let store = Store::open(dir.path()).unwrap();
            store.put(&widget("a", "open", 1)).unwrap();
            store.put(&widget("a", "closed", 2)).unwrap();
            store.put(&widget("b", "open", 3)).unwrap();
        }
        // Simulate a fresh process: open again and rebuild from the log.
        let store = Store::open(dir.path()).unwrap();
        let count = store.rebuild_indexes::<Widget>().unwrap();
        assert_eq!(count, 2);
        let a: Widget = store.get("a").unwrap().unwrap();
        assert_eq!(a.status, "closed");
    }

    #[test]
    fn list_since_paginates_in_order_without_gaps_or_dupes() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        for i in 0..5 {
            store.put(&widget(&format!("w{i}"), "open", i as i64)).unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let (page, next) = store.list_since::<Widget>(cursor.as_ref(), 2).unwrap();
            if page.is_empty() {
                break;
            }
            seen.extend(page.into_iter().map(|w| w.id));
            cursor = next;
        }
        assert_eq!(seen, vec!["w0", "w1", "w2", "w3", "w4"]);
    }

    #[test]
    fn delete_removes_record_and_index() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.put(&widget("a", "open", 1)).unwrap();
        store.delete::<Widget>("a").unwrap();
        assert!(store.get::<Widget>("a").unwrap().is_none());
        assert!(store.list::<Widget>(&[]).unwrap().is_empty());
    }
}
