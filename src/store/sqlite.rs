//! SQLite-backed lineage store.
//!
//! The database lives at `<data_dir>/tributary/lineage.db` unless a path is
//! configured.
//!
//! # Layout
//!
//! ```text
//! meta            key/value, holds the schema version
//! datasets        urn PRIMARY KEY
//! processes       urn PRIMARY KEY
//! lineage_edges   id, UNIQUE (source_urn, process_urn, target_urn, ingestion_id)
//! column_lineage  edge_id -> lineage_edges.id
//! audit_log       append-only
//! ```
//!
//! Timestamps are stored as microseconds since the epoch and JSON
//! attributes as text.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde_json::Value;
use tracing::debug;

use super::{
    close_audit, AttachReport, GraphBatch, LineageStore, ProcessWrite, StoreError, StoreResult,
};
use crate::model::{
    AuditLogEntry, ColumnLineage, Dataset, Direction, LineageEdge, NewColumnLineage, NewEdge,
    Process, TemporalFilter,
};

/// Current schema version. Bump this when the table layout changes.
const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS datasets (
        urn TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        dataset_type TEXT NOT NULL,
        catalog TEXT,
        schema_name TEXT,
        storage_descriptor TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS processes (
        urn TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        process_type TEXT NOT NULL,
        source_system TEXT,
        job_id TEXT,
        job_name TEXT,
        definition TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS lineage_edges (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_urn TEXT NOT NULL REFERENCES datasets(urn),
        process_urn TEXT NOT NULL REFERENCES processes(urn),
        target_urn TEXT NOT NULL REFERENCES datasets(urn),
        relationship_type TEXT NOT NULL,
        valid_from INTEGER NOT NULL,
        valid_to INTEGER,
        ingestion_id TEXT NOT NULL,
        metadata TEXT,
        UNIQUE (source_urn, process_urn, target_urn, ingestion_id)
    );

    CREATE INDEX IF NOT EXISTS idx_edges_source ON lineage_edges(source_urn);
    CREATE INDEX IF NOT EXISTS idx_edges_target ON lineage_edges(target_urn);
    CREATE INDEX IF NOT EXISTS idx_edges_process ON lineage_edges(process_urn);
    CREATE INDEX IF NOT EXISTS idx_edges_ingestion ON lineage_edges(ingestion_id);

    CREATE TABLE IF NOT EXISTS column_lineage (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        edge_id INTEGER NOT NULL REFERENCES lineage_edges(id),
        source_column TEXT NOT NULL,
        target_column TEXT NOT NULL,
        transformation_type TEXT NOT NULL,
        transformation_expression TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_column_lineage_edge ON column_lineage(edge_id);

    CREATE TABLE IF NOT EXISTS audit_log (
        id TEXT PRIMARY KEY,
        action TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        entity_urn TEXT NOT NULL,
        before_state TEXT,
        after_state TEXT,
        actor TEXT NOT NULL,
        ingestion_id TEXT,
        timestamp INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_log(entity_urn);
";

const EDGE_COLUMNS: &str = "id, source_urn, process_urn, target_urn, relationship_type, \
                            valid_from, valid_to, ingestion_id, metadata";

/// SQLite lineage store.
///
/// A single connection is shared behind a mutex; every write phase runs in
/// its own transaction. Store calls run on tokio's blocking pool, so the
/// executor keeps running (and timeouts keep firing) while SQLite works.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create the store at `path`.
    ///
    /// Fails with [`StoreError::SchemaVersion`] if the file was written by
    /// an incompatible version.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened lineage store");
        Self::with_connection(conn)
    }

    /// Open or create the store at [`SqliteStore::default_path`].
    pub fn open_default() -> StoreResult<Self> {
        Self::open(Self::default_path()?)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    /// `<data_dir>/tributary/lineage.db`.
    pub fn default_path() -> StoreResult<PathBuf> {
        let base = dirs::data_dir().ok_or(StoreError::NoDataDir)?;
        Ok(base.join("tributary").join("lineage.db"))
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        lock(&self.conn)
    }

    /// Run `f` against the connection on the blocking thread pool.
    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            f(&mut guard)
        })
        .await?
    }
}

fn lock(conn: &Mutex<Connection>) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| StoreError::Poisoned)
}

/// Create tables and check the schema version.
fn init(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(SCHEMA)?;

    let stored: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
            row.get(0)
        })
        .optional()?;

    match stored {
        Some(v) => {
            let found = v.parse().unwrap_or(0);
            if found != SCHEMA_VERSION {
                return Err(StoreError::SchemaVersion {
                    found,
                    expected: SCHEMA_VERSION,
                });
            }
        }
        None => {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('version', ?)",
                params![SCHEMA_VERSION.to_string()],
            )?;
        }
    }
    Ok(())
}

// =============================================================================
// Column Conversions
// =============================================================================

fn micros(t: DateTime<Utc>) -> i64 {
    t.timestamp_micros()
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let v: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(v).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, v))
}

fn opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => timestamp(row, idx).map(Some),
        None => Ok(None),
    }
}

fn json_text(value: &Option<Value>) -> StoreResult<Option<String>> {
    Ok(value.as_ref().map(serde_json::to_string).transpose()?)
}

fn json(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(s) => serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
    })
}

fn dataset_from_row(row: &Row<'_>) -> rusqlite::Result<Dataset> {
    Ok(Dataset {
        urn: row.get(0)?,
        name: row.get(1)?,
        dataset_type: row.get(2)?,
        catalog: row.get(3)?,
        schema_name: row.get(4)?,
        storage_descriptor: json(row, 5)?,
        created_at: timestamp(row, 6)?,
        updated_at: timestamp(row, 7)?,
    })
}

fn process_from_row(row: &Row<'_>) -> rusqlite::Result<Process> {
    Ok(Process {
        urn: row.get(0)?,
        name: row.get(1)?,
        process_type: row.get(2)?,
        source_system: row.get(3)?,
        job_id: row.get(4)?,
        job_name: row.get(5)?,
        definition: json(row, 6)?,
        created_at: timestamp(row, 7)?,
        updated_at: timestamp(row, 8)?,
    })
}

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<LineageEdge> {
    Ok(LineageEdge {
        id: row.get(0)?,
        source_urn: row.get(1)?,
        process_urn: row.get(2)?,
        target_urn: row.get(3)?,
        relationship_type: row.get(4)?,
        valid_from: timestamp(row, 5)?,
        valid_to: opt_timestamp(row, 6)?,
        ingestion_id: row.get(7)?,
        metadata: json(row, 8)?,
    })
}

fn column_from_row(row: &Row<'_>) -> rusqlite::Result<ColumnLineage> {
    Ok(ColumnLineage {
        id: row.get(0)?,
        edge_id: row.get(1)?,
        source_column: row.get(2)?,
        target_column: row.get(3)?,
        transformation_type: row.get(4)?,
        transformation_expression: row.get(5)?,
    })
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<AuditLogEntry> {
    let id: String = row.get(0)?;
    let id = uuid::Uuid::parse_str(&id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    Ok(AuditLogEntry {
        id,
        action: parsed(row, 1)?,
        entity_type: parsed(row, 2)?,
        entity_urn: row.get(3)?,
        before: json(row, 4)?,
        after: json(row, 5)?,
        actor: row.get(6)?,
        ingestion_id: row.get(7)?,
        timestamp: timestamp(row, 8)?,
    })
}

// =============================================================================
// Writes
// =============================================================================

fn insert_audit(tx: &Transaction<'_>, entry: &AuditLogEntry) -> StoreResult<()> {
    tx.execute(
        "INSERT INTO audit_log (id, action, entity_type, entity_urn, before_state, after_state, actor, ingestion_id, timestamp)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            entry.id.to_string(),
            entry.action.as_str(),
            entry.entity_type.as_str(),
            entry.entity_urn,
            json_text(&entry.before)?,
            json_text(&entry.after)?,
            entry.actor,
            entry.ingestion_id,
            micros(entry.timestamp),
        ],
    )?;
    Ok(())
}

fn upsert_process(tx: &Transaction<'_>, write: &ProcessWrite) -> StoreResult<()> {
    let p = &write.process;
    tx.execute(
        "INSERT INTO processes (urn, name, process_type, source_system, job_id, job_name, definition, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(urn) DO UPDATE SET
            name = excluded.name,
            process_type = excluded.process_type,
            source_system = COALESCE(excluded.source_system, processes.source_system),
            job_id = COALESCE(excluded.job_id, processes.job_id),
            job_name = COALESCE(excluded.job_name, processes.job_name),
            definition = COALESCE(excluded.definition, processes.definition),
            updated_at = excluded.updated_at",
        params![
            p.urn,
            p.name,
            p.process_type,
            p.source_system,
            p.job_id,
            p.job_name,
            json_text(&p.definition)?,
            micros(p.created_at),
            micros(p.updated_at),
        ],
    )?;
    insert_audit(tx, &write.audit)
}

/// Insert a dataset unless it exists; returns whether it was inserted.
fn insert_dataset(tx: &Transaction<'_>, d: &Dataset) -> StoreResult<bool> {
    let rows = tx.execute(
        "INSERT OR IGNORE INTO datasets (urn, name, dataset_type, catalog, schema_name, storage_descriptor, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            d.urn,
            d.name,
            d.dataset_type,
            d.catalog,
            d.schema_name,
            json_text(&d.storage_descriptor)?,
            micros(d.created_at),
            micros(d.updated_at),
        ],
    )?;
    Ok(rows > 0)
}

fn insert_edge(tx: &Transaction<'_>, edge: &NewEdge) -> StoreResult<i64> {
    let result = tx.execute(
        "INSERT INTO lineage_edges (source_urn, process_urn, target_urn, relationship_type, valid_from, valid_to, ingestion_id, metadata)
         VALUES (?, ?, ?, ?, ?, NULL, ?, ?)",
        params![
            edge.source_urn,
            edge.process_urn,
            edge.target_urn,
            edge.relationship_type,
            micros(edge.valid_from),
            edge.ingestion_id,
            json_text(&edge.metadata)?,
        ],
    );

    match result {
        Ok(_) => Ok(tx.last_insert_rowid()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Err(StoreError::DuplicateEdge {
                ingestion_id: edge.ingestion_id.clone(),
            })
        }
        Err(rusqlite::Error::SqliteFailure(e, msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(StoreError::Constraint(msg.unwrap_or_else(|| e.to_string())))
        }
        Err(e) => Err(e.into()),
    }
}

fn commit_graph(conn: &mut Connection, batch: &GraphBatch) -> StoreResult<Vec<LineageEdge>> {
    let tx = conn.transaction()?;

    upsert_process(&tx, &batch.process)?;
    for (dataset, audit) in &batch.datasets {
        if insert_dataset(&tx, dataset)? {
            insert_audit(&tx, audit)?;
        }
    }

    let mut created = Vec::with_capacity(batch.edges.len());
    for (edge, audit) in &batch.edges {
        let id = insert_edge(&tx, edge)?;
        insert_audit(&tx, audit)?;
        created.push(edge.clone().with_id(id));
    }

    tx.commit()?;
    Ok(created)
}

fn attach_column_lineage(
    conn: &mut Connection,
    rows: &[NewColumnLineage],
) -> StoreResult<AttachReport> {
    let tx = conn.transaction()?;
    let mut report = AttachReport::default();
    {
        let mut exists = tx.prepare("SELECT 1 FROM lineage_edges WHERE id = ?")?;
        let mut insert = tx.prepare(
            "INSERT INTO column_lineage (edge_id, source_column, target_column, transformation_type, transformation_expression)
             VALUES (?, ?, ?, ?, ?)",
        )?;

        for row in rows {
            if !exists.exists(params![row.edge_id])? {
                if !report.missing_edges.contains(&row.edge_id) {
                    report.missing_edges.push(row.edge_id);
                }
                continue;
            }
            insert.execute(params![
                row.edge_id,
                row.source_column,
                row.target_column,
                row.transformation_type,
                row.transformation_expression,
            ])?;
            report.inserted += 1;
        }
    }
    tx.commit()?;
    Ok(report)
}

fn close_active_edges(
    conn: &mut Connection,
    process_urn: &str,
    valid_to: DateTime<Utc>,
    actor: &str,
) -> StoreResult<Vec<LineageEdge>> {
    let tx = conn.transaction()?;
    let open = {
        let mut stmt = tx.prepare(&format!(
            "SELECT {} FROM lineage_edges WHERE process_urn = ? AND valid_to IS NULL ORDER BY id",
            EDGE_COLUMNS
        ))?;
        let edges = stmt
            .query_map(params![process_urn], edge_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        edges
    };

    let mut closed = Vec::with_capacity(open.len());
    for edge in open {
        tx.execute(
            "UPDATE lineage_edges SET valid_to = ? WHERE id = ?",
            params![micros(valid_to), edge.id],
        )?;
        let after = LineageEdge {
            valid_to: Some(valid_to),
            ..edge.clone()
        };
        insert_audit(&tx, &close_audit(&edge, &after, actor, valid_to)?)?;
        closed.push(after);
    }

    tx.commit()?;
    Ok(closed)
}

// =============================================================================
// Reads
// =============================================================================

fn edges_for(
    conn: &Connection,
    urn: &str,
    direction: Direction,
    filter: TemporalFilter,
) -> StoreResult<Vec<LineageEdge>> {
    let anchor = match direction {
        Direction::Upstream => "target_urn",
        Direction::Downstream => "source_urn",
    };
    let (window, at) = match filter {
        TemporalFilter::AsOf(t) => (
            "valid_from <= ?2 AND (valid_to IS NULL OR valid_to >= ?2)",
            t,
        ),
        TemporalFilter::Current(now) => ("(valid_to IS NULL OR valid_to > ?2)", now),
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM lineage_edges WHERE {} = ?1 AND {} ORDER BY id",
        EDGE_COLUMNS, anchor, window
    ))?;
    let edges = stmt
        .query_map(params![urn, micros(at)], edge_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(edges)
}

#[async_trait]
impl LineageStore for SqliteStore {
    async fn get_dataset(&self, urn: &str) -> StoreResult<Option<Dataset>> {
        let urn = urn.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT urn, name, dataset_type, catalog, schema_name, storage_descriptor, created_at, updated_at
                     FROM datasets WHERE urn = ?",
                    params![urn],
                    dataset_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn get_process(&self, urn: &str) -> StoreResult<Option<Process>> {
        let urn = urn.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT urn, name, process_type, source_system, job_id, job_name, definition, created_at, updated_at
                     FROM processes WHERE urn = ?",
                    params![urn],
                    process_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn count_edges_for_ingestion(&self, ingestion_id: &str) -> StoreResult<usize> {
        let ingestion_id = ingestion_id.to_string();
        self.run(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM lineage_edges WHERE ingestion_id = ?",
                params![ingestion_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    async fn edges_for(
        &self,
        urn: &str,
        direction: Direction,
        filter: TemporalFilter,
    ) -> StoreResult<Vec<LineageEdge>> {
        let urn = urn.to_string();
        self.run(move |conn| edges_for(conn, &urn, direction, filter))
            .await
    }

    async fn column_lineage(&self, edge_id: i64) -> StoreResult<Vec<ColumnLineage>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, edge_id, source_column, target_column, transformation_type, transformation_expression
                 FROM column_lineage WHERE edge_id = ? ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![edge_id], column_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn commit_graph(&self, batch: GraphBatch) -> StoreResult<Vec<LineageEdge>> {
        self.run(move |conn| commit_graph(conn, &batch)).await
    }

    async fn attach_column_lineage(
        &self,
        rows: Vec<NewColumnLineage>,
    ) -> StoreResult<AttachReport> {
        self.run(move |conn| attach_column_lineage(conn, &rows))
            .await
    }

    async fn close_active_edges(
        &self,
        process_urn: &str,
        valid_to: DateTime<Utc>,
        actor: &str,
    ) -> StoreResult<Vec<LineageEdge>> {
        let process_urn = process_urn.to_string();
        let actor = actor.to_string();
        self.run(move |conn| close_active_edges(conn, &process_urn, valid_to, &actor))
            .await
    }

    async fn audit_log(&self, entity_urn: &str) -> StoreResult<Vec<AuditLogEntry>> {
        let entity_urn = entity_urn.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, action, entity_type, entity_urn, before_state, after_state, actor, ingestion_id, timestamp
                 FROM audit_log WHERE entity_urn = ? ORDER BY timestamp, rowid",
            )?;
            let entries = stmt
                .query_map(params![entity_urn], audit_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
        .await
    }
}
