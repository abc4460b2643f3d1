//! SQLite-backed graph store.
//!
//! Similarity search is a full scan over `graph_nodes` scored in Rust, which
//! is fine for the graph sizes a single SQLite file holds. The write path
//! (`add_nodes`, `add_edges`) exists for ingestion and the CLI loader; the
//! retrieval core only uses the [`GraphStore`] read operations.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, Row};

use crate::db::{migrate, Db};
use crate::graph::{Direction, Edge, Metadata, MetadataFilter, Node, NodeId};
use crate::search::similarity::{cosine_similarity, decode_embedding, encode_embedding};
use crate::store::{rank_scored, GraphStore, ScoredNode};
use crate::{KgragError, Result};

const EDGE_COLUMNS: &str = "source_name, source_type, target_name, target_type, label";

pub struct SqliteGraphStore {
    db: Db,
}

fn row_to_node(
    name: String,
    node_type: String,
    blob: Option<Vec<u8>>,
    metadata_json: Option<String>,
) -> Result<Node> {
    let mut node = Node::new(name, node_type);
    if let Some(blob) = blob {
        match decode_embedding(&blob) {
            Some(embedding) => node = node.with_embedding(embedding),
            None => log::warn!("Ignoring malformed embedding BLOB for {}", node.id()),
        }
    }
    if let Some(json) = metadata_json {
        let metadata: Metadata = serde_json::from_str(&json)?;
        node = node.with_metadata(metadata);
    }
    Ok(node)
}

fn row_to_edge(row: &Row<'_>) -> rusqlite::Result<Edge> {
    Ok(Edge::new(
        NodeId::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        NodeId::new(row.get::<_, String>(2)?, row.get::<_, String>(3)?),
        row.get::<_, String>(4)?,
    ))
}

impl SqliteGraphStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Open the database at `db_path` and bring its schema up to date.
    pub async fn open(db_path: impl AsRef<Path>, migrations_dir: impl AsRef<Path>) -> Result<Self> {
        let db = Db::new(db_path);
        let migrations_dir = migrations_dir.as_ref().to_path_buf();
        db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await?;
        Ok(Self::new(db))
    }

    /// Upsert nodes by identity. A replacement keeps the original insertion
    /// slot. Returns the number of rows written.
    pub async fn add_nodes(&self, nodes: Vec<Node>) -> Result<usize> {
        if nodes.is_empty() {
            return Ok(0);
        }
        let count = self
            .db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                let mut written = 0;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO graph_nodes (name, node_type, embedding, metadata_json) \
                         VALUES (?1, ?2, ?3, ?4) \
                         ON CONFLICT (name, node_type) DO UPDATE SET \
                         embedding = excluded.embedding, metadata_json = excluded.metadata_json",
                    )?;
                    for node in &nodes {
                        let blob = node.embedding().map(encode_embedding);
                        let metadata_json = if node.metadata().is_empty() {
                            None
                        } else {
                            Some(serde_json::to_string(node.metadata())?)
                        };
                        written += stmt.execute(params![
                            node.name(),
                            node.node_type(),
                            blob,
                            metadata_json
                        ])?;
                    }
                }
                tx.commit()?;
                Ok::<usize, KgragError>(written)
            })
            .await?;
        log::info!("Stored {} graph nodes", count);
        Ok(count)
    }

    /// Insert edges; an existing `(source, target, label)` triple is left as is.
    /// Returns the number of new edges.
    pub async fn add_edges(&self, edges: Vec<Edge>) -> Result<usize> {
        if edges.is_empty() {
            return Ok(0);
        }
        let count = self
            .db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0;
                {
                    let mut stmt = tx.prepare(&format!(
                        "INSERT OR IGNORE INTO graph_edges ({}) VALUES (?1, ?2, ?3, ?4, ?5)",
                        EDGE_COLUMNS
                    ))?;
                    for e in &edges {
                        inserted += stmt.execute(params![
                            e.source.name,
                            e.source.node_type,
                            e.target.name,
                            e.target.node_type,
                            e.label
                        ])?;
                    }
                }
                tx.commit()?;
                Ok::<usize, KgragError>(inserted)
            })
            .await?;
        log::info!("Stored {} graph edges", count);
        Ok(count)
    }

    /// `(nodes, edges)` row counts.
    pub async fn counts(&self) -> Result<(usize, usize)> {
        self.db
            .with_connection(|conn| {
                let count = |table: &str| -> rusqlite::Result<i64> {
                    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
                };
                let nodes = count("graph_nodes")?;
                let edges = count("graph_edges")?;
                Ok((nodes as usize, edges as usize))
            })
            .await
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn similarity_search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredNode>> {
        let rows = self
            .db
            .with_connection(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT seq, name, node_type, embedding, metadata_json \
                     FROM graph_nodes WHERE embedding IS NOT NULL ORDER BY seq",
                )?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<Vec<u8>>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ));
                }
                Ok::<_, KgragError>(out)
            })
            .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for (seq, name, node_type, blob, metadata_json) in rows {
            let node = row_to_node(name, node_type, blob, metadata_json)?;
            if !filter.matches(node.metadata()) {
                continue;
            }
            let Some(embedding) = node.embedding() else {
                continue;
            };
            let score = cosine_similarity(query_embedding, embedding);
            scored.push((seq as u64, node, score));
        }
        Ok(rank_scored(scored, limit))
    }

    async fn get_adjacent(&self, node: &NodeId, direction: Direction) -> Result<Vec<Edge>> {
        let where_clause = match direction {
            Direction::Outgoing => "source_name = ?1 AND source_type = ?2",
            Direction::Incoming => "target_name = ?1 AND target_type = ?2",
            Direction::Both => {
                "(source_name = ?1 AND source_type = ?2) OR (target_name = ?1 AND target_type = ?2)"
            }
        };
        let sql = format!(
            "SELECT {} FROM graph_edges WHERE {} ORDER BY rowid",
            EDGE_COLUMNS, where_clause
        );
        let id = node.clone();
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let edges = stmt
                    .query_map(params![id.name, id.node_type], row_to_edge)?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
                Ok(edges)
            })
            .await
    }

    async fn get_node(&self, id: &NodeId) -> Result<Node> {
        let key = id.clone();
        let row = self
            .db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT name, node_type, embedding, metadata_json \
                     FROM graph_nodes WHERE name = ?1 AND node_type = ?2",
                )?;
                let mut rows = stmt.query(params![key.name, key.node_type])?;
                let found = match rows.next()? {
                    Some(row) => Some((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<Vec<u8>>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    )),
                    None => None,
                };
                Ok::<_, KgragError>(found)
            })
            .await?;

        match row {
            Some((name, node_type, blob, metadata_json)) => {
                row_to_node(name, node_type, blob, metadata_json)
            }
            None => Err(KgragError::NotFound(id.to_string())),
        }
    }
}
