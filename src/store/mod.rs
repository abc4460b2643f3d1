//! Store Adapter: the read capabilities the retrieval core needs from a
//! backing graph store.
//!
//! The core never writes through this trait. Adapters are constructed
//! explicitly and handed to the [`crate::Retriever`]; there is no global
//! connection state.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryGraphStore;
pub use sqlite::SqliteGraphStore;

use async_trait::async_trait;

use crate::graph::{Direction, Edge, MetadataFilter, Node, NodeId};
use crate::Result;

/// A node returned by similarity search with its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredNode {
    pub node: Node,
    pub score: f32,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Nearest neighbours of `query_embedding`, highest score first, at most
    /// `limit`. Equal scores keep a stable store order (insertion order) so
    /// results are deterministic. Nodes without an embedding or failing
    /// `filter` are never returned.
    async fn similarity_search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredNode>>;

    /// Edges touching `node` in `direction`. A node without edges (or an
    /// unknown node) yields an empty list, not an error.
    async fn get_adjacent(&self, node: &NodeId, direction: Direction) -> Result<Vec<Edge>>;

    /// Fetch a node by identity; `KgragError::NotFound` if absent.
    async fn get_node(&self, id: &NodeId) -> Result<Node>;
}

/// Rank `(insertion order, node, score)` rows the way every adapter must:
/// score descending, insertion order ascending on ties.
pub(crate) fn rank_scored(mut rows: Vec<(u64, Node, f32)>, limit: usize) -> Vec<ScoredNode> {
    rows.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));
    rows.into_iter()
        .take(limit)
        .map(|(_, node, score)| ScoredNode { node, score })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_scored_orders_by_score_then_insertion() {
        let rows = vec![
            (0, Node::new("late_tie", "T"), 0.5),
            (1, Node::new("best", "T"), 0.9),
            (2, Node::new("nan", "T"), f32::NAN),
            (3, Node::new("tie", "T"), 0.5),
        ];
        let ranked = rank_scored(rows, 10);
        let finite: Vec<_> = ranked
            .iter()
            .filter(|s| !s.score.is_nan())
            .map(|s| s.node.name())
            .collect();
        assert_eq!(finite, vec!["best", "late_tie", "tie"]);
        assert_eq!(ranked.len(), 4);
    }
}
