//! # Asset Record Store
//!
//! Durable, transactional persistence of [`AssetRecord`]s in SQLite. This is
//! the authoritative copy of the library: the similarity index and the lookup
//! cache are always rebuilt from it.

mod retry;

pub use retry::RetryPolicy;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::error::{KuraError, Result};
use crate::types::{AssetId, AssetPatch, AssetRecord, NewAsset};

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS asset (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    image_path TEXT,
    mesh_path TEXT
);
";

const SELECT_COLUMNS: &str = "SELECT id, name, description, image_path, mesh_path FROM asset";

/// Failure inside a store transaction: either SQLite itself, or a rule the
/// store enforces (which must not be retried).
enum TxError {
    Sql(rusqlite::Error),
    Rejected(KuraError),
}

impl From<rusqlite::Error> for TxError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sql(err)
    }
}

/// SQLite-backed asset table. Every mutation runs in its own transaction.
pub struct AssetStore {
    conn: Mutex<Connection>,
    retry: RetryPolicy,
}

impl AssetStore {
    /// Open or create the store at `path` with the default retry policy.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_policy(path, RetryPolicy::default())
    }

    /// Open or create the store at `path`.
    pub fn open_with_policy(path: impl AsRef<Path>, retry: RetryPolicy) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(KuraError::store)?;
        }
        let conn = Connection::open(path).map_err(KuraError::store)?;
        let store = Self::from_connection(conn, retry)?;
        info!(path = %path.display(), "record store opened");
        Ok(store)
    }

    /// Create a store that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(KuraError::store)?;
        Self::from_connection(conn, RetryPolicy::default())
    }

    fn from_connection(conn: Connection, retry: RetryPolicy) -> Result<Self> {
        // Contention is handled by `RetryPolicy`; SQLite only waits briefly.
        conn.busy_timeout(retry.min_delay).map_err(KuraError::store)?;
        conn.execute_batch(SCHEMA_SQL).map_err(KuraError::store)?;
        Ok(Self {
            conn: Mutex::new(conn),
            retry,
        })
    }

    /// Insert a new record and return its freshly assigned id.
    ///
    /// # Errors
    ///
    /// `Validation` if the name is empty or already used (case-insensitive),
    /// `StoreIo` on SQLite failure.
    pub fn insert(&self, asset: &NewAsset) -> Result<AssetId> {
        if asset.name.trim().is_empty() {
            return Err(KuraError::Validation("asset name is empty".into()));
        }

        let id = self.run("insert", |conn| {
            let tx = conn.transaction()?;
            ensure_name_free(&tx, &asset.name, None)?;
            tx.execute(
                "INSERT INTO asset (name, description, image_path, mesh_path) VALUES (?1, ?2, ?3, ?4)",
                params![
                    asset.name,
                    asset.description,
                    asset.image_path,
                    asset.mesh_path
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(id)
        })?;

        debug!(id, name = %asset.name, "record inserted");
        Ok(id)
    }

    /// Fetch a record by id.
    pub fn get(&self, id: AssetId) -> Result<Option<AssetRecord>> {
        self.run("get", |conn| Ok(select_by_id(conn, id)?))
    }

    /// Fetch a record by name. Names are unique ignoring case, so this
    /// matches case-insensitively.
    pub fn get_by_name(&self, name: &str) -> Result<Option<AssetRecord>> {
        self.run("get_by_name", |conn| {
            let record = conn
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE LOWER(name) = LOWER(?1)"),
                    params![name],
                    decode_row,
                )
                .optional()?;
            Ok(record)
        })
    }

    /// Apply a partial update and return the resulting record.
    ///
    /// # Errors
    ///
    /// `NotFound` if `id` is absent, `Validation` for an empty patch, an empty
    /// name or a name clash.
    pub fn update(&self, id: AssetId, patch: &AssetPatch) -> Result<AssetRecord> {
        if patch.is_empty() {
            return Err(KuraError::Validation(format!(
                "no fields to update for asset {id}"
            )));
        }
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(KuraError::Validation("asset name is empty".into()));
        }

        self.run("update", |conn| {
            let tx = conn.transaction()?;
            let Some(current) = select_by_id(&tx, id)? else {
                return Err(TxError::Rejected(KuraError::NotFound(id)));
            };
            if let Some(ref name) = patch.name {
                ensure_name_free(&tx, name, Some(id))?;
            }
            let updated = current.patched(patch);
            write_record(&tx, &updated)?;
            tx.commit()?;
            Ok(updated)
        })
    }

    /// Overwrite every field of an existing record. Used to undo an update.
    pub(crate) fn restore(&self, record: &AssetRecord) -> Result<()> {
        self.run("restore", |conn| {
            let tx = conn.transaction()?;
            if write_record(&tx, record)? == 0 {
                return Err(TxError::Rejected(KuraError::NotFound(record.id)));
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Delete a record. Returns whether a row was removed.
    pub fn delete(&self, id: AssetId) -> Result<bool> {
        self.run("delete", |conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute("DELETE FROM asset WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(removed > 0)
        })
    }

    /// All records, in insertion order.
    pub fn list_all(&self) -> Result<Vec<AssetRecord>> {
        self.run("list_all", |conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id ASC"))?;
            let records = stmt
                .query_map([], decode_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
    }

    /// Remove every record. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        self.run("clear", |conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute("DELETE FROM asset", [])?;
            tx.commit()?;
            Ok(removed)
        })
    }

    /// Number of records.
    pub fn count(&self) -> Result<usize> {
        self.run("count", |conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM asset", [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
    }

    /// Run `op` against the connection, retrying while the database is busy.
    fn run<T>(
        &self,
        op: &'static str,
        mut f: impl FnMut(&mut Connection) -> std::result::Result<T, TxError>,
    ) -> Result<T> {
        let mut attempt = 1;
        loop {
            let outcome = {
                let mut conn = self
                    .conn
                    .lock()
                    .map_err(|_| KuraError::StoreIo("connection mutex poisoned".into()))?;
                f(&mut conn)
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(TxError::Rejected(err)) => return Err(err),
                Err(TxError::Sql(err)) if retry::is_busy(&err) && attempt < self.retry.attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(op, attempt, ?delay, "record store busy, retrying");
                    retry::pause(delay);
                    attempt += 1;
                }
                Err(TxError::Sql(err)) => return Err(KuraError::store(format!("{op}: {err}"))),
            }
        }
    }
}

fn decode_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AssetRecord> {
    Ok(AssetRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        image_path: row.get(3)?,
        mesh_path: row.get(4)?,
    })
}

fn select_by_id(conn: &Connection, id: AssetId) -> rusqlite::Result<Option<AssetRecord>> {
    conn.query_row(
        &format!("{SELECT_COLUMNS} WHERE id = ?1"),
        params![id],
        decode_row,
    )
    .optional()
}

fn write_record(conn: &Connection, record: &AssetRecord) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE asset SET name = ?2, description = ?3, image_path = ?4, mesh_path = ?5 WHERE id = ?1",
        params![
            record.id,
            record.name,
            record.description,
            record.image_path,
            record.mesh_path
        ],
    )
}

fn ensure_name_free(
    conn: &Connection,
    name: &str,
    except: Option<AssetId>,
) -> std::result::Result<(), TxError> {
    let taken: i64 = conn.query_row(
        "SELECT COUNT(*) FROM asset WHERE LOWER(name) = LOWER(?1) AND id != ?2",
        params![name, except.unwrap_or(-1)],
        |row| row.get(0),
    )?;
    if taken > 0 {
        return Err(TxError::Rejected(KuraError::Validation(format!(
            "asset name {name:?} already exists"
        ))));
    }
    Ok(())
}
