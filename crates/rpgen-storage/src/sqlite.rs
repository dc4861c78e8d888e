//! SQLite implementation of [`CheckpointStore`].
//!
//! [`SqliteStore`] keeps one row per run, node and edge, with WAL mode,
//! atomic transactions on every multi-row write, and automatic schema
//! migrations. Node metadata is stored as a JSON TEXT column.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};

use rpgen_core::{Edge, EdgeKind, GraphSnapshot, Node, NodeId, NodeKind, NodeMetadata, NodeStatus};

use crate::error::StorageError;
use crate::hash::structure_digest;
use crate::traits::CheckpointStore;
use crate::types::{RunId, RunSummary};

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteStore { conn })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore { conn })
    }

    fn assert_run_exists(conn: &Connection, run: RunId) -> Result<(), StorageError> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM runs WHERE id = ?1)",
            params![run.0],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StorageError::RunNotFound(run.0));
        }
        Ok(())
    }

    /// Reads the stored graph without checking its digest.
    fn read_snapshot(conn: &Connection, run: RunId) -> Result<GraphSnapshot, StorageError> {
        let (version, metadata_json): (u32, String) = conn
            .query_row(
                "SELECT version, metadata_json FROM runs WHERE id = ?1",
                params![run.0],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run.0))?;
        let metadata: BTreeMap<String, serde_json::Value> = serde_json::from_str(&metadata_json)?;

        let nodes = {
            let mut stmt = conn.prepare_cached(
                "SELECT node_id, kind, name, status, metadata_json FROM nodes
                 WHERE run_id = ?1 ORDER BY seq",
            )?;
            let rows = stmt.query_map(params![run.0], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;
            let mut result = Vec::new();
            for row in rows {
                let (id, kind, name, status, metadata_json) = row?;
                let metadata: NodeMetadata = serde_json::from_str(&metadata_json)?;
                result.push(Node {
                    id: NodeId(id),
                    kind: parse_column::<NodeKind>(&kind)?,
                    name,
                    metadata,
                    status: parse_column::<NodeStatus>(&status)?,
                });
            }
            result
        };

        let edges = {
            let mut stmt = conn.prepare_cached(
                "SELECT source, target, kind, data_id, note FROM edges
                 WHERE run_id = ?1 ORDER BY seq",
            )?;
            let rows = stmt.query_map(params![run.0], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?;
            let mut result = Vec::new();
            for row in rows {
                let (source, target, kind, data_id, note) = row?;
                result.push(Edge {
                    source: NodeId(source),
                    target: NodeId(target),
                    kind: parse_column::<EdgeKind>(&kind)?,
                    data_id,
                    note,
                });
            }
            result
        };

        Ok(GraphSnapshot {
            version,
            metadata,
            nodes,
            edges,
        })
    }

    fn refresh_digest(conn: &Connection, run: RunId) -> Result<(), StorageError> {
        let snapshot = Self::read_snapshot(conn, run)?;
        conn.execute(
            "UPDATE runs SET digest = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![run.0, structure_digest(&snapshot).to_hex().to_string()],
        )?;
        Ok(())
    }

    fn node_missing(&self, run: RunId, node: &NodeId) -> StorageError {
        match Self::assert_run_exists(&self.conn, run) {
            Ok(()) => StorageError::NodeNotFound {
                run: run.0,
                node: node.to_string(),
            },
            Err(e) => e,
        }
    }
}

fn parse_column<T>(value: &str) -> Result<T, StorageError>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|reason| StorageError::ReconstructionError { reason })
}

impl CheckpointStore for SqliteStore {
    fn create_run(&mut self, name: &str) -> Result<RunId, StorageError> {
        let empty = GraphSnapshot {
            version: rpgen_core::SNAPSHOT_VERSION,
            metadata: BTreeMap::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
        };
        self.conn.execute(
            "INSERT INTO runs (name, digest) VALUES (?1, ?2)",
            params![name, structure_digest(&empty).to_hex().to_string()],
        )?;
        Ok(RunId(self.conn.last_insert_rowid()))
    }

    fn list_runs(&self) -> Result<Vec<RunSummary>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT r.id, r.name, r.digest,
                    (SELECT COUNT(*) FROM nodes n WHERE n.run_id = r.id)
             FROM runs r ORDER BY r.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RunSummary {
                id: RunId(row.get(0)?),
                name: row.get(1)?,
                digest: row.get(2)?,
                node_count: row.get::<_, i64>(3)? as usize,
            })
        })?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    fn delete_run(&mut self, run: RunId) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        Self::assert_run_exists(&tx, run)?;
        // Edges reference nodes, so they go first.
        tx.execute("DELETE FROM edges WHERE run_id = ?1", params![run.0])?;
        tx.execute("DELETE FROM nodes WHERE run_id = ?1", params![run.0])?;
        tx.execute("DELETE FROM runs WHERE id = ?1", params![run.0])?;
        tx.commit()?;
        Ok(())
    }

    fn save_snapshot(&mut self, run: RunId, snapshot: &GraphSnapshot) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        Self::assert_run_exists(&tx, run)?;

        tx.execute("DELETE FROM edges WHERE run_id = ?1", params![run.0])?;
        tx.execute("DELETE FROM nodes WHERE run_id = ?1", params![run.0])?;
        tx.execute(
            "UPDATE runs SET version = ?2, metadata_json = ?3, digest = ?4,
                             updated_at = datetime('now')
             WHERE id = ?1",
            params![
                run.0,
                snapshot.version,
                serde_json::to_string(&snapshot.metadata)?,
                structure_digest(snapshot).to_hex().to_string(),
            ],
        )?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO nodes (run_id, seq, node_id, kind, name, status, metadata_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (seq, node) in snapshot.nodes.iter().enumerate() {
                stmt.execute(params![
                    run.0,
                    seq as i64,
                    node.id.as_str(),
                    node.kind.as_str(),
                    node.name,
                    node.status.as_str(),
                    serde_json::to_string(&node.metadata)?,
                ])?;
            }
        }
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO edges (run_id, seq, source, target, kind, data_id, note)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (seq, edge) in snapshot.edges.iter().enumerate() {
                stmt.execute(params![
                    run.0,
                    seq as i64,
                    edge.source.as_str(),
                    edge.target.as_str(),
                    edge.kind.as_str(),
                    edge.data_id,
                    edge.note,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn load_snapshot(&self, run: RunId) -> Result<GraphSnapshot, StorageError> {
        let snapshot = Self::read_snapshot(&self.conn, run)?;
        let recorded: String = self.conn.query_row(
            "SELECT digest FROM runs WHERE id = ?1",
            params![run.0],
            |row| row.get(0),
        )?;
        let actual = structure_digest(&snapshot).to_hex().to_string();
        if actual != recorded {
            return Err(StorageError::IntegrityError {
                reason: format!("run {run}: digest {actual} does not match {recorded}"),
            });
        }
        Ok(snapshot)
    }

    fn update_status(
        &mut self,
        run: RunId,
        node: &NodeId,
        status: NodeStatus,
    ) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE nodes SET status = ?3 WHERE run_id = ?1 AND node_id = ?2",
            params![run.0, node.as_str(), status.as_str()],
        )?;
        if changed == 0 {
            return Err(self.node_missing(run, node));
        }
        Ok(())
    }

    fn update_node(&mut self, run: RunId, node: &Node) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE nodes SET status = ?3, metadata_json = ?4
             WHERE run_id = ?1 AND node_id = ?2",
            params![
                run.0,
                node.id.as_str(),
                node.status.as_str(),
                serde_json::to_string(&node.metadata)?,
            ],
        )?;
        if changed == 0 {
            return Err(self.node_missing(run, &node.id));
        }
        Ok(())
    }

    fn get_status(&self, run: RunId, node: &NodeId) -> Result<NodeStatus, StorageError> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM nodes WHERE run_id = ?1 AND node_id = ?2",
                params![run.0, node.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match status {
            Some(status) => parse_column(&status),
            None => Err(self.node_missing(run, node)),
        }
    }

    fn insert_edge(&mut self, run: RunId, edge: &Edge) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        Self::assert_run_exists(&tx, run)?;
        for endpoint in [&edge.source, &edge.target] {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM nodes WHERE run_id = ?1 AND node_id = ?2)",
                params![run.0, endpoint.as_str()],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(StorageError::NodeNotFound {
                    run: run.0,
                    node: endpoint.to_string(),
                });
            }
        }
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO edges (run_id, seq, source, target, kind, data_id, note)
             VALUES (?1, (SELECT COALESCE(MAX(seq) + 1, 0) FROM edges WHERE run_id = ?1),
                     ?2, ?3, ?4, ?5, ?6)",
            params![
                run.0,
                edge.source.as_str(),
                edge.target.as_str(),
                edge.kind.as_str(),
                edge.data_id,
                edge.note,
            ],
        )?;
        if inserted > 0 {
            Self::refresh_digest(&tx, run)?;
        }
        tx.commit()?;
        Ok(())
    }
}
