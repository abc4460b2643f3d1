//! In-memory graph store with brute-force similarity search.
//!
//! Deterministic by construction (insertion order is the tie-break), which
//! makes it the fixture store for tests and a workable adapter for small
//! graphs held in process.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::graph::{Direction, Edge, MetadataFilter, Node, NodeId};
use crate::search::similarity::cosine_similarity;
use crate::store::{rank_scored, GraphStore, ScoredNode};
use crate::{KgragError, Result};

#[derive(Default)]
struct Inner {
    /// Node slots in insertion order; replacement keeps the slot.
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    edges: Vec<Edge>,
}

#[derive(Default)]
pub struct InMemoryGraphStore {
    inner: RwLock<Inner>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, replacing any node with the same identity in place.
    pub fn add_node(&self, node: Node) {
        let mut inner = self.inner.write().unwrap();
        match inner.index.get(node.id()).copied() {
            Some(slot) => inner.nodes[slot] = node,
            None => {
                let slot = inner.nodes.len();
                inner.index.insert(node.id().clone(), slot);
                inner.nodes.push(node);
            }
        }
    }

    /// Add an edge. Identical `(source, target, label)` triples are stored once.
    /// Endpoints need not exist; dangling edges are tolerated by traversal.
    pub fn add_edge(&self, edge: Edge) {
        let mut inner = self.inner.write().unwrap();
        if !inner.edges.contains(&edge) {
            inner.edges.push(edge);
        }
    }

    pub fn remove_edge(&self, edge: &Edge) {
        self.inner.write().unwrap().edges.retain(|e| e != edge);
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().unwrap().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().unwrap().edges.len()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn similarity_search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredNode>> {
        let inner = self.inner.read().unwrap();
        let rows = inner
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| filter.matches(node.metadata()))
            .filter_map(|(slot, node)| {
                let embedding = node.embedding()?;
                let score = cosine_similarity(query_embedding, embedding);
                Some((slot as u64, node.clone(), score))
            })
            .collect();
        Ok(rank_scored(rows, limit))
    }

    async fn get_adjacent(&self, node: &NodeId, direction: Direction) -> Result<Vec<Edge>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .edges
            .iter()
            .filter(|e| e.other_end(node, direction).is_some())
            .cloned()
            .collect())
    }

    async fn get_node(&self, id: &NodeId) -> Result<Node> {
        let inner = self.inner.read().unwrap();
        inner
            .index
            .get(id)
            .map(|&slot| inner.nodes[slot].clone())
            .ok_or_else(|| KgragError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Metadata;
    use serde_json::json;

    fn id(name: &str) -> NodeId {
        NodeId::new(name, "T")
    }

    fn store() -> InMemoryGraphStore {
        let store = InMemoryGraphStore::new();
        store.add_node(Node::new("a", "T").with_embedding(vec![1.0, 0.0]));
        store.add_node(Node::new("b", "T").with_embedding(vec![0.0, 1.0]));
        store.add_node(Node::new("c", "T").with_embedding(vec![1.0, 0.0]));
        store.add_node(Node::new("bare", "T"));
        store.add_edge(Edge::new(id("a"), id("b"), "LINKS"));
        store.add_edge(Edge::new(id("c"), id("a"), "LINKS"));
        store
    }

    #[tokio::test]
    async fn test_similarity_search_orders_and_breaks_ties_by_insertion() {
        let store = store();
        let hits = store
            .similarity_search(&[1.0, 0.0], 10, &MetadataFilter::new())
            .await
            .unwrap();
        let names: Vec<_> = hits.iter().map(|h| h.node.name()).collect();
        // a and c tie at 1.0; a was inserted first. bare has no embedding.
        assert_eq!(names, vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn test_similarity_search_limit() {
        let store = store();
        let hits = store
            .similarity_search(&[1.0, 0.0], 1, &MetadataFilter::new())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_similarity_search_metadata_filter() {
        let store = InMemoryGraphStore::new();
        let mut md = Metadata::new();
        md.insert("lang", json!("fr")).unwrap();
        store.add_node(Node::new("en", "T").with_embedding(vec![1.0]));
        store.add_node(Node::new("fr", "T").with_embedding(vec![1.0]).with_metadata(md));
        let filter = MetadataFilter::new().with("lang", json!("fr"));
        let hits = store.similarity_search(&[1.0], 10, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.name(), "fr");
    }

    #[tokio::test]
    async fn test_get_adjacent_directions() {
        let store = store();
        let out = store.get_adjacent(&id("a"), Direction::Outgoing).await.unwrap();
        assert_eq!(out, vec![Edge::new(id("a"), id("b"), "LINKS")]);
        let incoming = store.get_adjacent(&id("a"), Direction::Incoming).await.unwrap();
        assert_eq!(incoming, vec![Edge::new(id("c"), id("a"), "LINKS")]);
        let both = store.get_adjacent(&id("a"), Direction::Both).await.unwrap();
        assert_eq!(both.len(), 2);
        let none = store.get_adjacent(&id("bare"), Direction::Both).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_get_node_not_found() {
        let store = store();
        assert!(store.get_node(&id("a")).await.is_ok());
        let err = store.get_node(&id("zzz")).await.unwrap_err();
        assert!(matches!(err, KgragError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_replacement_keeps_slot() {
        let store = store();
        store.add_node(Node::new("a", "T").with_embedding(vec![0.0, 1.0]));
        assert_eq!(store.node_count(), 4);
        let hits = store
            .similarity_search(&[0.0, 1.0], 10, &MetadataFilter::new())
            .await
            .unwrap();
        let names: Vec<_> = hits.iter().map(|h| h.node.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_duplicate_edges_stored_once() {
        let store = store();
        store.add_edge(Edge::new(id("a"), id("b"), "LINKS"));
        store.add_edge(Edge::new(id("a"), id("b"), "OTHER"));
        assert_eq!(store.edge_count(), 3);
        store.remove_edge(&Edge::new(id("a"), id("b"), "OTHER"));
        assert_eq!(store.edge_count(), 2);
    }
}
