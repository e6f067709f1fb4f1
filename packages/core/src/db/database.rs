//! Database Connection Management
//!
//! This module provides the core database connection and initialization
//! functionality using libsql for the content graph's relational layout.
//!
//! # Architecture
//!
//! - **Path-agnostic**: Accepts any valid PathBuf
//! - **WAL mode**: Write-Ahead Logging so readers never block the single
//!   projection writer
//! - **Foreign keys**: Enabled for referential integrity
//! - **Idempotent schema**: CREATE TABLE IF NOT EXISTS throughout
//!
//! # Persisted relations
//!
//! - `node`: one row per materialized node variant, keyed by relation anchor
//! - `hierarchy_relation`: parent/child edges scoped by content stream and
//!   dimension point hash
//! - `reference_relation`: ordered references, anchor-scoped
//! - `dimension_space_points`: hash -> canonical JSON coordinates lookup
//! - `content_stream`, `workspace`: version lines and their stable names
//! - `checkpoint`: the last applied event sequence number
//!
//! # Connection pattern
//!
//! Use `connect_with_timeout()` in async contexts: the busy timeout makes
//! concurrent readers wait instead of failing immediately with
//! `SQLITE_BUSY` while the projector holds a write transaction.

use crate::db::error::DatabaseError;
use std::path::PathBuf;
use std::sync::Arc;

/// Database service for managing the libsql connection and schema
///
/// # Examples
///
/// ```no_run
/// use contentgraph_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db_path = PathBuf::from("/path/to/contentgraph.db");
///     let db_service = DatabaseService::new(db_path).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<libsql::Database>,

    /// Path to the database file
    pub db_path: PathBuf,
}

impl DatabaseService {
    /// Create a new DatabaseService with the specified database path
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Initialize the schema (CREATE TABLE IF NOT EXISTS)
    /// 4. Enable SQLite features (WAL mode, foreign keys, busy timeout)
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the parent directory cannot be created,
    /// the connection fails, or schema initialization fails.
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        let is_new_database = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DatabaseError::DirectoryCreationFailed)?;
            }
        }

        let db = libsql::Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
        };

        service.initialize_schema(is_new_database).await?;

        Ok(service)
    }

    /// Open a plain connection.
    ///
    /// Prefer [`Self::connect_with_timeout`] in async code.
    pub fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// Open a connection with a 5 second busy timeout so concurrent
    /// operations wait and retry instead of failing on a held write lock.
    pub async fn connect_with_timeout(&self) -> Result<libsql::Connection, DatabaseError> {
        let conn = self.db.connect().map_err(DatabaseError::LibsqlError)?;
        Self::execute_pragma(&conn, "PRAGMA busy_timeout = 5000").await?;
        Ok(conn)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of
    /// execute().
    async fn execute_pragma(
        conn: &libsql::Connection,
        pragma: &str,
    ) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    async fn execute_ddl(
        conn: &libsql::Connection,
        context: &str,
        sql: &str,
    ) -> Result<(), DatabaseError> {
        conn.execute(sql, ()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create {}: {}", context, e))
        })?;
        Ok(())
    }

    /// Initialize database schema and configuration
    ///
    /// Idempotent: safe to call on every startup.
    async fn initialize_schema(&self, is_new_database: bool) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        Self::execute_pragma(&conn, "PRAGMA journal_mode = WAL").await?;
        Self::execute_pragma(&conn, "PRAGMA foreign_keys = ON").await?;

        Self::execute_ddl(
            &conn,
            "node table",
            "CREATE TABLE IF NOT EXISTS node (
                relation_anchor_point TEXT PRIMARY KEY,
                node_aggregate_id TEXT NOT NULL,
                origin_dimension_space_point JSON NOT NULL,
                origin_dimension_space_point_hash TEXT NOT NULL,
                node_type_name TEXT NOT NULL,
                classification TEXT NOT NULL,
                node_name TEXT,
                properties JSON NOT NULL DEFAULT '{}',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                modified_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .await?;

        // No single-column primary key: a child anchor may appear in many
        // streams and dimension points, but only once per (stream, point).
        Self::execute_ddl(
            &conn,
            "hierarchy_relation table",
            "CREATE TABLE IF NOT EXISTS hierarchy_relation (
                parent_relation_anchor_point TEXT NOT NULL,
                child_relation_anchor_point TEXT NOT NULL,
                content_stream_id TEXT NOT NULL,
                dimension_space_point_hash TEXT NOT NULL,
                position INTEGER NOT NULL,
                subtree_tags JSON NOT NULL DEFAULT '{\"explicit\":[],\"inherited\":[]}',
                node_name TEXT,
                PRIMARY KEY (content_stream_id, dimension_space_point_hash, child_relation_anchor_point)
            )",
        )
        .await?;

        Self::execute_ddl(
            &conn,
            "reference_relation table",
            "CREATE TABLE IF NOT EXISTS reference_relation (
                source_relation_anchor_point TEXT NOT NULL,
                reference_name TEXT NOT NULL,
                position INTEGER NOT NULL,
                target_node_aggregate_id TEXT NOT NULL,
                properties JSON,
                PRIMARY KEY (reference_name, position, source_relation_anchor_point)
            )",
        )
        .await?;

        Self::execute_ddl(
            &conn,
            "dimension_space_points table",
            "CREATE TABLE IF NOT EXISTS dimension_space_points (
                hash TEXT PRIMARY KEY,
                coordinates JSON NOT NULL
            )",
        )
        .await?;

        Self::execute_ddl(
            &conn,
            "content_stream table",
            "CREATE TABLE IF NOT EXISTS content_stream (
                id TEXT PRIMARY KEY,
                source_content_stream_id TEXT,
                status TEXT NOT NULL DEFAULT 'open'
            )",
        )
        .await?;

        Self::execute_ddl(
            &conn,
            "workspace table",
            "CREATE TABLE IF NOT EXISTS workspace (
                name TEXT PRIMARY KEY,
                current_content_stream_id TEXT NOT NULL
            )",
        )
        .await?;

        Self::execute_ddl(
            &conn,
            "checkpoint table",
            "CREATE TABLE IF NOT EXISTS checkpoint (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                sequence_number INTEGER NOT NULL
            )",
        )
        .await?;

        conn.execute(
            "INSERT OR IGNORE INTO checkpoint (id, sequence_number) VALUES (0, 0)",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to seed checkpoint row: {}", e))
        })?;

        self.create_core_indexes(&conn).await?;

        // Flush the WAL for newly created databases so other connections see
        // the schema immediately.
        if is_new_database {
            Self::execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)").await?;
        }

        Ok(())
    }

    /// Create core indexes
    ///
    /// These cover the traversal patterns of the query engine: children of a
    /// parent in one subgraph, the incoming edge of a child anchor, node rows
    /// by aggregate id, and reference rows by source and target.
    async fn create_core_indexes(&self, conn: &libsql::Connection) -> Result<(), DatabaseError> {
        Self::execute_ddl(
            &conn,
            "index 'idx_hierarchy_parent'",
            "CREATE INDEX IF NOT EXISTS idx_hierarchy_parent
             ON hierarchy_relation(content_stream_id, dimension_space_point_hash, parent_relation_anchor_point, position)",
        )
        .await?;

        Self::execute_ddl(
            &conn,
            "index 'idx_hierarchy_child'",
            "CREATE INDEX IF NOT EXISTS idx_hierarchy_child
             ON hierarchy_relation(child_relation_anchor_point)",
        )
        .await?;

        Self::execute_ddl(
            &conn,
            "index 'idx_node_aggregate'",
            "CREATE INDEX IF NOT EXISTS idx_node_aggregate
             ON node(node_aggregate_id)",
        )
        .await?;

        Self::execute_ddl(
            &conn,
            "index 'idx_node_origin_hash'",
            "CREATE INDEX IF NOT EXISTS idx_node_origin_hash
             ON node(origin_dimension_space_point_hash)",
        )
        .await?;

        Self::execute_ddl(
            &conn,
            "index 'idx_reference_source'",
            "CREATE INDEX IF NOT EXISTS idx_reference_source
             ON reference_relation(source_relation_anchor_point, reference_name, position)",
        )
        .await?;

        Self::execute_ddl(
            &conn,
            "index 'idx_reference_target'",
            "CREATE INDEX IF NOT EXISTS idx_reference_target
             ON reference_relation(target_node_aggregate_id)",
        )
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn schema_initialization_is_idempotent() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("graph.db");

        let first = DatabaseService::new(db_path.clone()).await?;
        drop(first);

        // Re-opening an existing database must not fail.
        let second = DatabaseService::new(db_path).await?;
        let conn = second.connect_with_timeout().await?;

        let mut rows = conn
            .query("SELECT sequence_number FROM checkpoint WHERE id = 0", ())
            .await?;
        let row = rows.next().await?.expect("checkpoint row seeded");
        let sequence_number: i64 = row.get(0)?;
        assert_eq!(sequence_number, 0);

        Ok(())
    }
}
