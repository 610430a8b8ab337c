use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::model::{Containment, Dir, EdgeRecord, Neighbor, PropertyMap, Vertex};
use crate::store::{GraphStore, GraphTx, PropertyFilter, Reindexer};
use crate::types::{DedupeError, EdgeId, PropValue, Result, VertexId};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS vertices (
    id INTEGER PRIMARY KEY,
    entity_type TEXT NOT NULL,
    properties TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_vertices_type ON vertices (entity_type);
CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY,
    out_id INTEGER NOT NULL,
    in_id INTEGER NOT NULL,
    label TEXT NOT NULL,
    containment TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_edges_out ON edges (out_id);
CREATE INDEX IF NOT EXISTS idx_edges_in ON edges (in_id);
CREATE TABLE IF NOT EXISTS uri_index (
    uri TEXT PRIMARY KEY,
    vertex_id INTEGER NOT NULL
);
";

/// Property graph persisted in a SQLite file.
///
/// Vertex properties are stored as a JSON object; the canonical-URI
/// uniqueness index lives in its own table and keeps the first vertex
/// inserted under each URI.
pub struct SqliteGraph {
    path: PathBuf,
    uri_property: String,
}

impl SqliteGraph {
    /// Opens (creating if needed) the graph file at `path`.
    pub fn open(path: impl AsRef<Path>, uri_property: impl Into<String>) -> Result<Self> {
        let graph = Self {
            path: path.as_ref().to_path_buf(),
            uri_property: uri_property.into(),
        };
        let conn = graph.connection()?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(graph)
    }

    fn connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Inserts a vertex, indexing its canonical URI when that URI is unclaimed.
    pub fn add_vertex(&self, entity_type: &str, properties: &PropertyMap) -> Result<VertexId> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let encoded = serde_json::to_string(properties)?;
        tx.execute(
            "INSERT INTO vertices (entity_type, properties) VALUES (?1, ?2)",
            params![entity_type, encoded],
        )?;
        let id = VertexId(tx.last_insert_rowid() as u64);
        if let Some(uri) = properties
            .get(&self.uri_property)
            .and_then(PropValue::as_str)
            .filter(|uri| !uri.is_empty())
        {
            tx.execute(
                "INSERT OR IGNORE INTO uri_index (uri, vertex_id) VALUES (?1, ?2)",
                params![uri, id.0 as i64],
            )?;
        }
        tx.commit()?;
        Ok(id)
    }

    /// Inserts an edge between two existing vertices.
    pub fn add_edge(
        &self,
        out_vertex: VertexId,
        in_vertex: VertexId,
        label: &str,
        containment: Containment,
    ) -> Result<EdgeId> {
        let conn = self.connection()?;
        for endpoint in [out_vertex, in_vertex] {
            if !vertex_exists(&conn, endpoint)? {
                return Err(DedupeError::MissingVertex(endpoint));
            }
        }
        conn.execute(
            "INSERT INTO edges (out_id, in_id, label, containment) VALUES (?1, ?2, ?3, ?4)",
            params![
                out_vertex.0 as i64,
                in_vertex.0 as i64,
                label,
                containment.as_str()
            ],
        )?;
        Ok(EdgeId(conn.last_insert_rowid() as u64))
    }

    /// Whether a committed vertex with `id` exists.
    pub fn contains(&self, id: VertexId) -> Result<bool> {
        vertex_exists(&self.connection()?, id)
    }

    /// Number of committed vertices.
    pub fn vertex_count(&self) -> Result<u64> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM vertices", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl GraphStore for SqliteGraph {
    fn begin(&self) -> Result<Box<dyn GraphTx + '_>> {
        let conn = self.connection()?;
        conn.execute_batch("BEGIN DEFERRED")?;
        Ok(Box::new(SqliteTx {
            conn,
            finished: false,
        }))
    }
}

impl Reindexer for SqliteGraph {
    fn reindex(&self, index_name: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch("REINDEX vertices; REINDEX uri_index;")?;
        info!(index_name, db_path = %self.path.display(), "sqlite_graph.reindex");
        Ok(())
    }
}

/// Transaction over a [`SqliteGraph`], owning its own connection.
pub struct SqliteTx {
    conn: Connection,
    finished: bool,
}

impl SqliteTx {
    fn edges_from(&self, id: VertexId, outgoing: bool) -> Result<Vec<Neighbor>> {
        let sql = if outgoing {
            "SELECT e.id, e.out_id, e.in_id, e.label, e.containment, v.id, v.entity_type
             FROM edges e JOIN vertices v ON v.id = e.in_id
             WHERE e.out_id = ?1 ORDER BY e.id"
        } else {
            "SELECT e.id, e.out_id, e.in_id, e.label, e.containment, v.id, v.entity_type
             FROM edges e JOIN vertices v ON v.id = e.out_id
             WHERE e.in_id = ?1 ORDER BY e.id"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([id.0 as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;
        let mut neighbors = Vec::new();
        for row in rows {
            let (edge_id, out_id, in_id, label, containment, other, entity_type) = row?;
            let containment = Containment::parse(&containment).ok_or_else(|| {
                DedupeError::Store(format!(
                    "edge {edge_id} has unknown containment '{containment}'"
                ))
            })?;
            neighbors.push(Neighbor {
                vertex: VertexId(other as u64),
                entity_type,
                edge: EdgeRecord {
                    id: EdgeId(edge_id as u64),
                    out_vertex: VertexId(out_id as u64),
                    in_vertex: VertexId(in_id as u64),
                    label,
                    containment,
                },
            });
        }
        Ok(neighbors)
    }

    fn finish(&mut self, statement: &str) -> Result<()> {
        self.finished = true;
        self.conn.execute_batch(statement)?;
        Ok(())
    }
}

impl GraphTx for SqliteTx {
    fn find_vertices(&self, entity_type: &str, filters: &[PropertyFilter]) -> Result<Vec<VertexId>> {
        let mut sql = String::from("SELECT id FROM vertices WHERE entity_type = ?1");
        let mut bound: Vec<Value> = vec![Value::Text(entity_type.to_string())];
        for filter in filters {
            let path = json_path(&filter.name)?;
            let n = bound.len();
            sql.push_str(&format!(
                " AND json_extract(properties, ?{}) = ?{}",
                n + 1,
                n + 2
            ));
            bound.push(Value::Text(path));
            bound.push(sql_value(&filter.value));
        }
        sql.push_str(" ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bound.iter()), |row| row.get::<_, i64>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(VertexId(row? as u64));
        }
        Ok(ids)
    }

    fn load_vertex(&self, id: VertexId) -> Result<Option<Vertex>> {
        let row = self
            .conn
            .query_row(
                "SELECT entity_type, properties FROM vertices WHERE id = ?1",
                [id.0 as i64],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        let Some((entity_type, encoded)) = row else {
            return Ok(None);
        };
        let properties: PropertyMap = serde_json::from_str(&encoded)?;
        Ok(Some(Vertex {
            id,
            entity_type,
            properties,
        }))
    }

    fn neighbors(&self, id: VertexId, dir: Dir) -> Result<Vec<Neighbor>> {
        let mut neighbors = Vec::new();
        if dir.includes_out() {
            neighbors.extend(self.edges_from(id, true)?);
        }
        if dir.includes_in() {
            let incoming = self.edges_from(id, false)?;
            let skip_loops = dir.includes_out();
            neighbors.extend(
                incoming
                    .into_iter()
                    .filter(|n| !(skip_loops && n.edge.out_vertex == n.edge.in_vertex)),
            );
        }
        Ok(neighbors)
    }

    fn vertices_by_uri(&self, uri: &str) -> Result<Vec<VertexId>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.vertex_id FROM uri_index u JOIN vertices v ON v.id = u.vertex_id
             WHERE u.uri = ?1",
        )?;
        let rows = stmt.query_map([uri], |row| row.get::<_, i64>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(VertexId(row? as u64));
        }
        Ok(ids)
    }

    fn remove_vertex(&mut self, id: VertexId) -> Result<()> {
        let raw = id.0 as i64;
        let deleted = self
            .conn
            .execute("DELETE FROM vertices WHERE id = ?1", [raw])?;
        if deleted == 0 {
            return Err(DedupeError::MissingVertex(id));
        }
        self.conn
            .execute("DELETE FROM edges WHERE out_id = ?1 OR in_id = ?1", [raw])?;
        self.conn
            .execute("DELETE FROM uri_index WHERE vertex_id = ?1", [raw])?;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.finish("COMMIT")
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK")
    }
}

impl Drop for SqliteTx {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            warn!(%err, "sqlite_graph.rollback_on_drop_failed");
        }
    }
}

fn vertex_exists(conn: &Connection, id: VertexId) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM vertices WHERE id = ?1",
            [id.0 as i64],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn json_path(name: &str) -> Result<String> {
    if name.is_empty() || name.contains('"') {
        return Err(DedupeError::InvalidFilter(format!(
            "property name '{name}' cannot be used as a filter"
        )));
    }
    Ok(format!("$.\"{name}\""))
}

fn sql_value(value: &PropValue) -> Value {
    match value {
        PropValue::Bool(flag) => Value::Integer(i64::from(*flag)),
        PropValue::Int(n) => Value::Integer(*n),
        PropValue::Float(f) => Value::Real(*f),
        PropValue::Str(s) => Value::Text(s.clone()),
    }
}
