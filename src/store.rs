//! SQLite persistence for mock definitions and event records.
//!
//! All public operations are async and run their SQL on the blocking
//! thread pool. Connections are opened per operation in WAL mode with a
//! busy timeout, so concurrent calls interleave at the I/O layer without
//! explicit locking.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};

const SCHEMA_VERSION: i32 = 1;

/// Handle to the on-disk mock store.
#[derive(Debug, Clone)]
pub struct MockStore {
    db_path: PathBuf,
}

/// A persisted mock definition, as stored.
///
/// `response` is the serialized JSON text exactly as it sits in the
/// `response` column; it is never re-parsed on the way out of a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockRow {
    pub id: i64,
    pub route: String,
    pub method: String,
    pub status: u16,
    pub response: String,
    pub created_at: String,
}

/// Fields accepted when registering or updating a mock.
///
/// `method` is taken case-sensitively as received and `status` is not
/// validated against any known range; the store persists what it is given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockFields {
    pub route: String,
    pub method: String,
    pub status: u16,
    pub response: serde_json::Value,
}

impl MockFields {
    /// Serialize the response to its stored text form. Objects, arrays,
    /// primitives, and strings all go through the same serialization.
    pub fn response_text(&self) -> anyhow::Result<String> {
        serde_json::to_string(&self.response).context("serialize mock response")
    }
}

impl MockStore {
    /// Open (creating if needed) the store at `db_path` and apply the
    /// schema idempotently.
    pub fn open(db_path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create store dir {}", parent.display()))?;
            }
        }

        let store = Self { db_path };
        let conn = open_connection(&store.db_path)?;
        migrate(&conn)?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Insert a new mock row and return its id.
    pub async fn insert_mock(&self, fields: MockFields) -> anyhow::Result<i64> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || insert_mock_blocking(&db_path, &fields))
            .await
            .context("join insert_mock task")?
    }

    /// List every stored mock in natural iteration order.
    pub async fn list_mocks(&self) -> anyhow::Result<Vec<MockRow>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || list_mocks_blocking(&db_path))
            .await
            .context("join list_mocks task")?
    }

    /// Replace the fields of the row with `id` in place. Returns whether
    /// a row matched. No new row is ever created.
    pub async fn update_mock(&self, id: i64, fields: MockFields) -> anyhow::Result<bool> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || update_mock_blocking(&db_path, id, &fields))
            .await
            .context("join update_mock task")?
    }

    /// Delete the row with `id`. Returns the affected-row count; zero is
    /// not an error.
    pub async fn delete_mock(&self, id: i64) -> anyhow::Result<usize> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || delete_mock_blocking(&db_path, id))
            .await
            .context("join delete_mock task")?
    }

    /// Insert or replace the event record for `id`.
    pub async fn upsert_event(&self, id: &str, data: String) -> anyhow::Result<()> {
        let db_path = self.db_path.clone();
        let id = id.to_owned();
        tokio::task::spawn_blocking(move || upsert_event_blocking(&db_path, &id, &data))
            .await
            .context("join upsert_event task")?
    }

    /// Fetch the stored JSON text for `id`, if any.
    pub async fn get_event(&self, id: &str) -> anyhow::Result<Option<String>> {
        let db_path = self.db_path.clone();
        let id = id.to_owned();
        tokio::task::spawn_blocking(move || get_event_blocking(&db_path, &id))
            .await
            .context("join get_event task")?
    }

    /// Delete the event record for `id`; idempotent.
    pub async fn delete_event(&self, id: &str) -> anyhow::Result<()> {
        let db_path = self.db_path.clone();
        let id = id.to_owned();
        tokio::task::spawn_blocking(move || delete_event_blocking(&db_path, &id))
            .await
            .context("join delete_event task")?
    }
}

fn open_connection(path: &Path) -> anyhow::Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)
        .with_context(|| format!("open sqlite {}", path.display()))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .context("set PRAGMA journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("set PRAGMA synchronous=NORMAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .context("set sqlite busy_timeout")?;

    Ok(conn)
}

fn migrate(conn: &Connection) -> anyhow::Result<()> {
    let user_version: i32 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .context("read PRAGMA user_version")?;

    match user_version {
        0 => {
            // (method, route) is deliberately not unique: duplicate
            // registrations shadow earlier ones at index rebuild time.
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS mocks (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  route TEXT NOT NULL,
                  method TEXT NOT NULL,
                  status INTEGER NOT NULL,
                  response TEXT NOT NULL,
                  created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS events (
                  id TEXT PRIMARY KEY,
                  data TEXT NOT NULL
                );
                "#,
            )
            .context("create sqlite schema v1")?;

            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .context("set PRAGMA user_version=1")?;
            Ok(())
        }
        SCHEMA_VERSION => Ok(()),
        _ => anyhow::bail!(
            "unsupported mock store schema version {user_version} (expected {SCHEMA_VERSION})"
        ),
    }
}

fn insert_mock_blocking(path: &Path, fields: &MockFields) -> anyhow::Result<i64> {
    let conn = open_connection(path)?;
    let response_text = fields.response_text()?;
    let created_at = chrono::Utc::now().to_rfc3339();

    conn.execute(
        r#"
        INSERT INTO mocks (route, method, status, response, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            fields.route,
            fields.method,
            i64::from(fields.status),
            response_text,
            created_at,
        ],
    )
    .context("insert mock")?;

    Ok(conn.last_insert_rowid())
}

fn list_mocks_blocking(path: &Path) -> anyhow::Result<Vec<MockRow>> {
    let conn = open_connection(path)?;
    let mut stmt = conn
        .prepare(
            r#"
            SELECT id, route, method, status, response, created_at
            FROM mocks
            ORDER BY id
            "#,
        )
        .context("prepare list mocks")?;

    let mut rows = stmt.query([]).context("query list mocks")?;
    let mut mocks = Vec::new();
    while let Some(row) = rows.next().context("iterate list mocks")? {
        mocks.push(deserialize_mock_row(row)?);
    }
    Ok(mocks)
}

fn deserialize_mock_row(row: &rusqlite::Row<'_>) -> anyhow::Result<MockRow> {
    let id = row.get::<_, i64>(0).context("deserialize mock id")?;
    let route = row.get::<_, String>(1).context("deserialize route")?;
    let method = row.get::<_, String>(2).context("deserialize method")?;
    let status = row.get::<_, i64>(3).context("deserialize status")?;
    let response = row.get::<_, String>(4).context("deserialize response")?;
    let created_at = row.get::<_, String>(5).context("deserialize created_at")?;

    Ok(MockRow {
        id,
        route,
        method,
        status: u16::try_from(status).context("deserialize status")?,
        response,
        created_at,
    })
}

fn update_mock_blocking(path: &Path, id: i64, fields: &MockFields) -> anyhow::Result<bool> {
    let conn = open_connection(path)?;
    let response_text = fields.response_text()?;

    let updated = conn
        .execute(
            r#"
            UPDATE mocks
            SET route = ?1, method = ?2, status = ?3, response = ?4
            WHERE id = ?5
            "#,
            params![
                fields.route,
                fields.method,
                i64::from(fields.status),
                response_text,
                id,
            ],
        )
        .context("update mock by id")?;

    Ok(updated == 1)
}

fn delete_mock_blocking(path: &Path, id: i64) -> anyhow::Result<usize> {
    let conn = open_connection(path)?;
    conn.execute("DELETE FROM mocks WHERE id = ?1", params![id])
        .context("delete mock by id")
}

fn upsert_event_blocking(path: &Path, id: &str, data: &str) -> anyhow::Result<()> {
    let conn = open_connection(path)?;
    conn.execute(
        r#"
        INSERT INTO events (id, data) VALUES (?1, ?2)
        ON CONFLICT(id) DO UPDATE SET data = excluded.data
        "#,
        params![id, data],
    )
    .context("upsert event record")?;
    Ok(())
}

fn get_event_blocking(path: &Path, id: &str) -> anyhow::Result<Option<String>> {
    let conn = open_connection(path)?;
    let mut stmt = conn
        .prepare("SELECT data FROM events WHERE id = ?1")
        .context("prepare select event")?;

    let mut rows = stmt.query(params![id]).context("query event by id")?;
    let Some(row) = rows.next().context("iterate event by id")? else {
        return Ok(None);
    };
    Ok(Some(row.get::<_, String>(0).context("deserialize event data")?))
}

fn delete_event_blocking(path: &Path, id: &str) -> anyhow::Result<()> {
    let conn = open_connection(path)?;
    conn.execute("DELETE FROM events WHERE id = ?1", params![id])
        .context("delete event by id")?;
    Ok(())
}
