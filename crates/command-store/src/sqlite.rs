use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use protocol::{CommandId, CommandRecord, CommandStatus};
use rusqlite::{params, Connection, OptionalExtension};

use crate::{now_rfc3339, CommandRepository, StoreError};

const SELECT_COLUMNS: &str = "SELECT id, script, status, output, created_at FROM command";

/// SQLite-backed store: one row per command in the `command` table.
///
/// The connection lives behind a mutex and every statement runs on the
/// blocking pool, so callers on the async runtime never stall on disk I/O.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        migrate(&conn)?;
        tracing::info!(path = %path.display(), "command store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            op(&conn)
        })
        .await?
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;

        CREATE TABLE IF NOT EXISTS command (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          script TEXT NOT NULL,
          status TEXT NOT NULL,
          output TEXT NOT NULL DEFAULT '',
          created_at TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

struct RawRow {
    id: CommandId,
    script: String,
    status: String,
    output: String,
    created_at: String,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            script: row.get(1)?,
            status: row.get(2)?,
            output: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_record(self) -> Result<CommandRecord, StoreError> {
        let status = CommandStatus::parse(&self.status).ok_or_else(|| StoreError::Corrupt {
            id: self.id,
            message: format!("unknown status {:?}", self.status),
        })?;
        Ok(CommandRecord {
            id: self.id,
            script: self.script,
            status,
            output: self.output,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl CommandRepository for SqliteStore {
    async fn create(
        &self,
        script: &str,
        status: CommandStatus,
    ) -> Result<CommandRecord, StoreError> {
        let script = script.to_string();
        self.run(move |conn| {
            let created_at = now_rfc3339();
            conn.execute(
                "INSERT INTO command(script, status, output, created_at) VALUES (?1, ?2, '', ?3)",
                params![script, status.as_str(), created_at],
            )?;
            Ok(CommandRecord {
                id: conn.last_insert_rowid(),
                script,
                status,
                output: String::new(),
                created_at,
            })
        })
        .await
    }

    async fn update(&self, record: &CommandRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE command SET script = ?1, status = ?2, output = ?3 WHERE id = ?4",
                params![
                    record.script,
                    record.status.as_str(),
                    record.output,
                    record.id
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(record.id));
            }
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<CommandRecord>, StoreError> {
        self.run(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))?;
            let rows = stmt
                .query_map([], RawRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(RawRow::into_record).collect()
        })
        .await
    }

    async fn get(&self, id: CommandId) -> Result<CommandRecord, StoreError> {
        self.run(move |conn| {
            let row = conn
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                    params![id],
                    RawRow::from_row,
                )
                .optional()?;
            row.ok_or(StoreError::NotFound(id))?.into_record()
        })
        .await
    }
}
