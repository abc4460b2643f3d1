//! Knowledge graph entity model: typed nodes, labelled directed edges and
//! the sub-graph shape returned by retrieval.
//!
//! Node identity is the `(name, type)` pair. Two nodes with the same identity
//! are the same node regardless of embedding or metadata; a content update is
//! a replacement node carrying the same identity.

pub mod render;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::{KgragError, Result};

/// Reserved metadata key linking a node back to its source text.
pub const CONTENT_ID: &str = "content_id";

/// Metadata keys with a typed slot on [`Metadata`]. They cannot be set through
/// the extension bag.
pub const RESERVED_METADATA_KEYS: &[&str] = &[CONTENT_ID];

/// Identity of a node: `(name, type)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
}

impl NodeId {
    pub fn new(name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_type: node_type.into(),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.node_type)
    }
}

/// Node metadata: reserved keys get typed fields, everything else lives in
/// an open extension bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_id: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    /// Set an extension key. Reserved keys are rejected; use the typed setter.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        if RESERVED_METADATA_KEYS.contains(&key.as_str()) {
            return Err(KgragError::InvalidParameter(format!(
                "metadata key '{}' is reserved",
                key
            )));
        }
        self.extra.insert(key, value);
        Ok(())
    }

    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    /// Look up any key, reserved or not.
    pub fn get(&self, key: &str) -> Option<Value> {
        if key == CONTENT_ID {
            return self.content_id.clone().map(Value::String);
        }
        self.extra.get(key).cloned()
    }

    pub fn extra(&self) -> &BTreeMap<String, Value> {
        &self.extra
    }

    pub fn is_empty(&self) -> bool {
        self.content_id.is_none() && self.extra.is_empty()
    }
}

/// Exact-match metadata filter. An empty filter matches every node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter(BTreeMap<String, Value>);

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.0
            .iter()
            .all(|(key, expected)| metadata.get(key).as_ref() == Some(expected))
    }
}

/// A typed entity. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    #[serde(flatten)]
    id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    metadata: Metadata,
}

impl Node {
    pub fn new(name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(name, node_type),
            embedding: None,
            metadata: Metadata::default(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn node_type(&self) -> &str {
        &self.id.node_type
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn content_id(&self) -> Option<&str> {
        self.metadata.content_id()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Which edges of a node to follow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
    Both,
}

impl std::str::FromStr for Direction {
    type Err = KgragError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "outgoing" => Ok(Direction::Outgoing),
            "incoming" => Ok(Direction::Incoming),
            "both" => Ok(Direction::Both),
            other => Err(KgragError::InvalidParameter(format!(
                "unknown direction '{}': expected outgoing, incoming or both",
                other
            ))),
        }
    }
}

/// A directed, labelled relationship (source --label--> target).
///
/// Edges with the same endpoints but different labels are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    /// Relationship type, e.g. `MARRIED_TO`.
    pub label: String,
}

impl Edge {
    pub fn new(source: NodeId, target: NodeId, label: impl Into<String>) -> Self {
        Self {
            source,
            target,
            label: label.into(),
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }

    /// The endpoint reached by following this edge from `from` in `direction`,
    /// or `None` if the edge cannot be followed that way.
    pub fn other_end(&self, from: &NodeId, direction: Direction) -> Option<&NodeId> {
        let forward = (self.source == *from).then_some(&self.target);
        let backward = (self.target == *from).then_some(&self.source);
        match direction {
            Direction::Outgoing => forward,
            Direction::Incoming => backward,
            Direction::Both => forward.or(backward),
        }
    }
}

/// An adjacency fetch that failed or timed out during traversal. The node is
/// treated as having no further edges; the rest of the result stands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialExpansionFailure {
    pub node: NodeId,
    pub reason: String,
}

/// A node in a retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedNode {
    pub node: Node,
    /// Cosine similarity to the query, when both embeddings are known.
    pub relevance: Option<f32>,
    /// Hops from the nearest seed at discovery time.
    pub depth: usize,
}

/// Nodes plus the edges actually traversed between them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubGraph {
    /// Selection order for MMR traversal, similarity/discovery order otherwise.
    pub nodes: Vec<RetrievedNode>,
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<PartialExpansionFailure>,
}

impl SubGraph {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when some adjacency fetches failed and the result may be incomplete.
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn node_ids(&self) -> Vec<&NodeId> {
        self.nodes.iter().map(|n| n.node.id()).collect()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.iter().any(|n| n.node.id() == id)
    }
}

/// Nodes and edges as written by ingestion: `{"nodes": [...], "edges": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl GraphDocument {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_node_identity_is_value_based() {
        let a = Node::new("Marie Curie", "Person").with_embedding(vec![1.0, 0.0]);
        let b = Node::new("Marie Curie", "Person")
            .with_metadata(Metadata::new().with_content_id("page-2"));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_same_name_different_type_is_distinct() {
        let person = Node::new("Curie", "Person");
        let unit = Node::new("Curie", "Unit");
        assert_ne!(person, unit);
    }

    #[test]
    fn test_metadata_rejects_reserved_key() {
        let mut md = Metadata::new();
        let err = md.insert(CONTENT_ID, json!("x")).unwrap_err();
        assert!(matches!(err, KgragError::InvalidParameter(_)));
        md.insert("source", json!("wiki")).unwrap();
        assert_eq!(md.get("source"), Some(json!("wiki")));
    }

    #[test]
    fn test_metadata_filter_matches_reserved_and_extra() {
        let mut md = Metadata::new().with_content_id("doc-1");
        md.insert("lang", json!("en")).unwrap();

        assert!(MetadataFilter::new().matches(&md));
        assert!(MetadataFilter::new().with(CONTENT_ID, json!("doc-1")).matches(&md));
        assert!(MetadataFilter::new()
            .with("lang", json!("en"))
            .with(CONTENT_ID, json!("doc-1"))
            .matches(&md));
        assert!(!MetadataFilter::new().with("lang", json!("fr")).matches(&md));
        assert!(!MetadataFilter::new().with("missing", json!(1)).matches(&md));
    }

    #[test]
    fn test_metadata_serializes_flat() {
        let mut md = Metadata::new().with_content_id("c1");
        md.insert("page", json!(3)).unwrap();
        let value = serde_json::to_value(&md).unwrap();
        assert_eq!(value, json!({"content_id": "c1", "page": 3}));
        let back: Metadata = serde_json::from_value(value).unwrap();
        assert_eq!(back.content_id(), Some("c1"));
        assert_eq!(back.get("page"), Some(json!(3)));
    }

    #[test]
    fn test_edge_other_end_respects_direction() {
        let a = NodeId::new("A", "T");
        let b = NodeId::new("B", "T");
        let edge = Edge::new(a.clone(), b.clone(), "KNOWS");

        assert_eq!(edge.other_end(&a, Direction::Outgoing), Some(&b));
        assert_eq!(edge.other_end(&b, Direction::Outgoing), None);
        assert_eq!(edge.other_end(&b, Direction::Incoming), Some(&a));
        assert_eq!(edge.other_end(&a, Direction::Incoming), None);
        assert_eq!(edge.other_end(&b, Direction::Both), Some(&a));
    }

    #[test]
    fn test_parallel_edges_with_different_labels_are_distinct() {
        let a = NodeId::new("A", "T");
        let b = NodeId::new("B", "T");
        let e1 = Edge::new(a.clone(), b.clone(), "MARRIED_TO");
        let e2 = Edge::new(a, b, "WORKED_WITH");
        assert_ne!(e1, e2);
    }

    #[test]
    fn test_direction_from_str() {
        assert_eq!("both".parse::<Direction>().unwrap(), Direction::Both);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn test_node_json_shape() {
        let node = Node::new("Paris", "City").with_embedding(vec![0.5]);
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value, json!({"name": "Paris", "type": "City", "embedding": [0.5]}));
    }

    #[test]
    fn test_graph_document_from_json() {
        let doc = GraphDocument::from_json(
            r#"{
                "nodes": [
                    {"name": "Marie Curie", "type": "Person", "embedding": [1.0, 0.0],
                     "metadata": {"content_id": "page-1", "born": 1867}},
                    {"name": "Pierre Curie", "type": "Person"}
                ],
                "edges": [
                    {"source": {"name": "Marie Curie", "type": "Person"},
                     "target": {"name": "Pierre Curie", "type": "Person"},
                     "label": "MARRIED_TO"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(doc.nodes.len(), 2);
        assert_eq!(doc.nodes[0].content_id(), Some("page-1"));
        assert_eq!(doc.nodes[0].metadata().get("born"), Some(json!(1867)));
        assert!(doc.nodes[1].embedding().is_none());
        assert_eq!(doc.edges[0].label, "MARRIED_TO");

        assert!(matches!(
            GraphDocument::from_json("{\"nodes\": 3}"),
            Err(KgragError::Serialization(_))
        ));
    }
}
