//! Traversal Engine: fixed-depth BFS and MMR-driven traversal over a
//! [`GraphStore`].
//!
//! Store calls made while expanding are bounded by a per-call timeout and a
//! fan-out limit. A failed or timed-out adjacency fetch is recorded as a
//! [`PartialExpansionFailure`] and the node is treated as having no edges.
//! Fan-out results are merged in input order and adjacency lists are sorted
//! by edge key, so a traversal over an unchanged store is reproducible.

pub mod fixed;
pub mod mmr;

pub use fixed::traverse;
pub use mmr::{mmr_traverse, MmrTraversalParams};

use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tokio::time::timeout;

use crate::graph::{Direction, Edge, MetadataFilter, Node, NodeId, PartialExpansionFailure};
use crate::store::GraphStore;
use crate::KgragError;

pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings shared by every traversal mode.
#[derive(Debug, Clone)]
pub struct TraversalOptions {
    pub direction: Direction,
    /// Max in-flight store calls during fan-out.
    pub concurrency: usize,
    /// Applied to each individual store call.
    pub store_timeout: Duration,
    /// Follow only these relationship labels; `None` follows all.
    pub edge_labels: Option<Vec<String>>,
    /// Nodes failing the filter are neither returned nor expanded.
    pub filter: MetadataFilter,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            direction: Direction::Outgoing,
            concurrency: DEFAULT_CONCURRENCY,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            edge_labels: None,
            filter: MetadataFilter::default(),
        }
    }
}

impl TraversalOptions {
    fn follows(&self, edge: &Edge) -> bool {
        self.edge_labels
            .as_ref()
            .map_or(true, |labels| labels.iter().any(|l| *l == edge.label))
    }
}

/// Result of looking up a node discovered through an edge.
#[derive(Debug)]
pub(crate) enum Resolved {
    Found(Node),
    /// Dangling edge endpoint, or filtered out.
    Skipped,
    Failed(PartialExpansionFailure),
}

/// Adjacent edges of `node` that the options allow following, sorted by edge key.
pub(crate) async fn fetch_adjacent(
    store: &dyn GraphStore,
    node: &NodeId,
    opts: &TraversalOptions,
) -> Result<Vec<Edge>, PartialExpansionFailure> {
    match timeout(opts.store_timeout, store.get_adjacent(node, opts.direction)).await {
        Ok(Ok(mut edges)) => {
            edges.retain(|e| opts.follows(e));
            edges.sort();
            Ok(edges)
        }
        Ok(Err(e)) => {
            log::warn!("Adjacency fetch for {} failed: {}", node, e);
            Err(PartialExpansionFailure {
                node: node.clone(),
                reason: e.to_string(),
            })
        }
        Err(_) => {
            log::warn!("Adjacency fetch for {} timed out after {:?}", node, opts.store_timeout);
            Err(PartialExpansionFailure {
                node: node.clone(),
                reason: format!("timed out after {:?}", opts.store_timeout),
            })
        }
    }
}

/// [`fetch_adjacent`] for many nodes, at most `concurrency` in flight,
/// results in input order.
pub(crate) async fn fetch_adjacent_many(
    store: &dyn GraphStore,
    nodes: &[NodeId],
    opts: &TraversalOptions,
) -> Vec<Result<Vec<Edge>, PartialExpansionFailure>> {
    stream::iter(nodes)
        .map(|node| fetch_adjacent(store, node, opts))
        .buffered(opts.concurrency.max(1))
        .collect()
        .await
}

async fn resolve_node(store: &dyn GraphStore, id: &NodeId, opts: &TraversalOptions) -> Resolved {
    match timeout(opts.store_timeout, store.get_node(id)).await {
        Ok(Ok(node)) if opts.filter.matches(node.metadata()) => Resolved::Found(node),
        Ok(Ok(_)) => Resolved::Skipped,
        Ok(Err(KgragError::NotFound(_))) => {
            log::warn!("Skipping dangling edge endpoint {}", id);
            Resolved::Skipped
        }
        Ok(Err(e)) => {
            log::warn!("Lookup of {} failed: {}", id, e);
            Resolved::Failed(PartialExpansionFailure {
                node: id.clone(),
                reason: e.to_string(),
            })
        }
        Err(_) => {
            log::warn!("Lookup of {} timed out after {:?}", id, opts.store_timeout);
            Resolved::Failed(PartialExpansionFailure {
                node: id.clone(),
                reason: format!("timed out after {:?}", opts.store_timeout),
            })
        }
    }
}

/// Resolve discovered endpoints, at most `concurrency` in flight, results in input order.
pub(crate) async fn resolve_nodes(
    store: &dyn GraphStore,
    ids: &[NodeId],
    opts: &TraversalOptions,
) -> Vec<Resolved> {
    stream::iter(ids)
        .map(|id| resolve_node(store, id, opts))
        .buffered(opts.concurrency.max(1))
        .collect()
        .await
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Store wrappers for exercising failure and timing paths.

    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::graph::{Direction, Edge, MetadataFilter, Node, NodeId};
    use crate::store::{GraphStore, InMemoryGraphStore, ScoredNode};
    use crate::{KgragError, Result};

    /// Delegates to an in-memory store, failing or stalling adjacency
    /// fetches for chosen nodes and counting every call.
    pub struct FlakyStore {
        pub inner: InMemoryGraphStore,
        pub failing: HashSet<NodeId>,
        pub stalling: HashSet<NodeId>,
        pub stall: Duration,
        pub adjacency_delay: Duration,
        pub search_delay: Duration,
        pub fail_search: bool,
        pub calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    /// Counts an adjacency fetch as in flight until dropped.
    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl FlakyStore {
        pub fn new(inner: InMemoryGraphStore) -> Self {
            Self {
                inner,
                failing: HashSet::new(),
                stalling: HashSet::new(),
                stall: Duration::from_secs(60),
                adjacency_delay: Duration::ZERO,
                search_delay: Duration::ZERO,
                fail_search: false,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Most adjacency fetches ever running at once.
        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GraphStore for FlakyStore {
        async fn similarity_search(
            &self,
            query_embedding: &[f32],
            limit: usize,
            filter: &MetadataFilter,
        ) -> Result<Vec<ScoredNode>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.search_delay.is_zero() {
                tokio::time::sleep(self.search_delay).await;
            }
            if self.fail_search {
                return Err(KgragError::StoreUnavailable("connection refused".to_string()));
            }
            self.inner.similarity_search(query_embedding, limit, filter).await
        }

        async fn get_adjacent(&self, node: &NodeId, direction: Direction) -> Result<Vec<Edge>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = InFlight(&self.in_flight);
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            if self.failing.contains(node) {
                return Err(KgragError::StoreUnavailable("adjacency read failed".to_string()));
            }
            if self.stalling.contains(node) {
                tokio::time::sleep(self.stall).await;
            }
            if !self.adjacency_delay.is_zero() {
                tokio::time::sleep(self.adjacency_delay).await;
            }
            self.inner.get_adjacent(node, direction).await
        }

        async fn get_node(&self, id: &NodeId) -> Result<Node> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.get_node(id).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FlakyStore;
    use super::*;
    use crate::store::InMemoryGraphStore;

    fn id(name: &str) -> NodeId {
        NodeId::new(name, "T")
    }

    fn store() -> InMemoryGraphStore {
        let store = InMemoryGraphStore::new();
        for name in ["a", "b", "c"] {
            store.add_node(Node::new(name, "T"));
        }
        store.add_edge(Edge::new(id("a"), id("c"), "Z_LABEL"));
        store.add_edge(Edge::new(id("a"), id("b"), "KNOWS"));
        store.add_edge(Edge::new(id("a"), id("b"), "A_LABEL"));
        store
    }

    #[tokio::test]
    async fn test_fetch_adjacent_sorted_and_label_filtered() {
        let store = store();
        let opts = TraversalOptions::default();
        let edges = fetch_adjacent(&store, &id("a"), &opts).await.unwrap();
        let labels: Vec<_> = edges.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["A_LABEL", "KNOWS", "Z_LABEL"]);

        let opts = TraversalOptions {
            edge_labels: Some(vec!["KNOWS".to_string()]),
            ..TraversalOptions::default()
        };
        let edges = fetch_adjacent(&store, &id("a"), &opts).await.unwrap();
        assert_eq!(edges, vec![Edge::new(id("a"), id("b"), "KNOWS")]);
    }

    #[tokio::test]
    async fn test_fetch_adjacent_failure_and_timeout_are_partial() {
        let mut flaky = FlakyStore::new(store());
        flaky.failing.insert(id("b"));
        flaky.stalling.insert(id("c"));
        let opts = TraversalOptions {
            store_timeout: Duration::from_millis(50),
            ..TraversalOptions::default()
        };

        let results = fetch_adjacent_many(&flaky, &[id("a"), id("b"), id("c")], &opts).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().len(), 3);
        assert_eq!(results[1].as_ref().unwrap_err().node, id("b"));
        let timed_out = results[2].as_ref().unwrap_err();
        assert!(timed_out.reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_fan_out_respects_concurrency() {
        let inner = InMemoryGraphStore::new();
        let ids: Vec<NodeId> = (0..10).map(|i| id(&format!("n{i}"))).collect();
        for i in 0..10 {
            inner.add_node(Node::new(format!("n{i}"), "T"));
        }
        let mut flaky = FlakyStore::new(inner);
        flaky.adjacency_delay = Duration::from_millis(20);
        let opts = TraversalOptions {
            concurrency: 2,
            ..TraversalOptions::default()
        };

        let results = fetch_adjacent_many(&flaky, &ids, &opts).await;
        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(flaky.calls(), 10);
        assert_eq!(flaky.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_resolve_nodes_skips_dangling() {
        let store = store();
        let opts = TraversalOptions::default();
        let resolved = resolve_nodes(&store, &[id("a"), id("ghost")], &opts).await;
        assert!(matches!(resolved[0], Resolved::Found(_)));
        assert!(matches!(resolved[1], Resolved::Skipped));
    }
}
