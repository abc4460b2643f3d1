//! Retriever: the single entry point that turns a query into a sub-graph.
//!
//! Parameters are validated before the embedder or the store is touched.
//! Only the initial similarity search (and the seed lookup) can fail a call;
//! everything after that degrades into warnings on the returned [`SubGraph`].

use std::sync::Arc;

use tokio::time::timeout;

use crate::embeddings::Embedder;
use crate::graph::{Node, NodeId, RetrievedNode, SubGraph};
use crate::store::{GraphStore, ScoredNode};
use crate::traversal::{mmr_traverse, traverse, MmrTraversalParams, TraversalOptions};
use crate::{KgragError, Result};

/// What to retrieve for.
#[derive(Debug, Clone)]
pub enum Query {
    /// Free text, embedded through the configured [`Embedder`].
    Text(String),
    /// A precomputed query vector.
    Embedding(Vec<f32>),
    /// Start from a known entity. An unknown identity yields an empty result.
    Seed(NodeId),
}

#[derive(Debug, Clone)]
pub enum SearchMode {
    /// Top `k` nodes by similarity, no expansion.
    Similarity { k: usize },
    /// The similarity result expanded breadth-first.
    Traversal { k: usize, depth: usize },
    /// MMR selection over similarity hits and the neighbourhoods of `roots`.
    MmrTraversal {
        params: MmrTraversalParams,
        roots: Vec<NodeId>,
    },
}

impl SearchMode {
    pub fn mmr(params: MmrTraversalParams) -> Self {
        SearchMode::MmrTraversal {
            params,
            roots: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SearchMode::Similarity { .. } => "similarity",
            SearchMode::Traversal { .. } => "traversal",
            SearchMode::MmrTraversal { .. } => "mmr_traversal",
        }
    }

    /// # Errors
    ///
    /// `KgragError::InvalidParameter` on `k == 0`, `fetch_k < k`, `lambda`
    /// outside [0, 1], or a NaN score threshold.
    pub fn validate(&self) -> Result<()> {
        match self {
            SearchMode::Similarity { k } | SearchMode::Traversal { k, .. } => check_k(*k),
            SearchMode::MmrTraversal { params, .. } => {
                check_k(params.k)?;
                if params.fetch_k < params.k {
                    return Err(KgragError::InvalidParameter(format!(
                        "fetch_k ({}) must be >= k ({})",
                        params.fetch_k, params.k
                    )));
                }
                if !(0.0..=1.0).contains(&params.lambda) {
                    return Err(KgragError::InvalidParameter(format!(
                        "lambda must be within [0, 1], got {}",
                        params.lambda
                    )));
                }
                if params.score_threshold.is_some_and(f32::is_nan) {
                    return Err(KgragError::InvalidParameter(
                        "score_threshold must be a number".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

fn check_k(k: usize) -> Result<()> {
    if k == 0 {
        return Err(KgragError::InvalidParameter("k must be at least 1".to_string()));
    }
    Ok(())
}

/// Convert a depth taken from user input.
///
/// # Errors
///
/// `KgragError::InvalidParameter` if `depth` is negative.
pub fn depth_from_signed(depth: i64) -> Result<usize> {
    usize::try_from(depth)
        .map_err(|_| KgragError::InvalidParameter(format!("depth must be >= 0, got {}", depth)))
}

fn check_options(options: &TraversalOptions) -> Result<()> {
    if options.concurrency == 0 {
        return Err(KgragError::InvalidParameter(
            "concurrency must be at least 1".to_string(),
        ));
    }
    if options.store_timeout.is_zero() {
        return Err(KgragError::InvalidParameter(
            "store timeout must be non-zero".to_string(),
        ));
    }
    Ok(())
}

/// Where retrieval starts once the query is resolved.
enum Start {
    Vector(Vec<f32>),
    Seed(Node),
}

/// Read-only retrieval over an explicitly supplied store.
///
/// Holds no per-call state, so one instance can serve concurrent queries.
/// Dropping a `retrieve` future stops further store calls.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn GraphStore>,
    embedder: Option<Arc<dyn Embedder>>,
    options: TraversalOptions,
}

impl Retriever {
    pub fn new(store: Arc<dyn GraphStore>, options: TraversalOptions) -> Self {
        Self {
            store,
            embedder: None,
            options,
        }
    }

    /// Required for [`Query::Text`].
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn options(&self) -> &TraversalOptions {
        &self.options
    }

    /// Retrieve a sub-graph for `query`.
    ///
    /// Nodes come back in similarity order, except in MMR mode where they
    /// are in selection order.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if the mode or options violate a constraint, or a
    ///   text query is given without an embedder
    /// - `EmbeddingUnavailable` if the query text cannot be embedded
    /// - `StoreUnavailable` if the seed lookup or initial similarity search
    ///   fails or times out
    pub async fn retrieve(&self, query: Query, mode: &SearchMode) -> Result<SubGraph> {
        mode.validate()?;
        check_options(&self.options)?;

        let start = match self.resolve_query(query).await? {
            Some(start) => start,
            None => return Ok(SubGraph::empty()),
        };
        log::debug!("Retrieving in {} mode", mode.name());

        let graph = match mode {
            SearchMode::Similarity { k } => self.seed_graph(start, *k).await?.0,
            SearchMode::Traversal { k, depth } => {
                let (seeds, q) = self.seed_graph(start, *k).await?;
                let store = self.store.as_ref();
                traverse(store, seeds.nodes, *depth, q.as_deref(), &self.options).await
            }
            SearchMode::MmrTraversal { params, roots } => {
                let q = match start {
                    Start::Vector(q) => q,
                    Start::Seed(seed) => match seed_vector(&seed) {
                        Some(q) => q,
                        None => {
                            return Err(KgragError::InvalidParameter(format!(
                                "seed {} has no embedding to rank candidates against",
                                seed.id()
                            )))
                        }
                    },
                };
                let initial = self.search(&q, params.fetch_k).await?;
                mmr_traverse(self.store.as_ref(), q, initial, roots, params, &self.options).await
            }
        };

        if graph.is_degraded() {
            log::warn!(
                "Retrieved {} node(s) with {} expansion failure(s)",
                graph.len(),
                graph.warnings.len()
            );
        } else {
            log::debug!("Retrieved {} node(s), {} edge(s)", graph.len(), graph.edges.len());
        }
        Ok(graph)
    }

    /// The top `k` similarity hits for the query, or for a seed's own
    /// embedding. A seed without an embedding stands alone. Also returns
    /// the vector neighbours are scored against.
    async fn seed_graph(&self, start: Start, k: usize) -> Result<(SubGraph, Option<Vec<f32>>)> {
        let q = match start {
            Start::Vector(q) => q,
            Start::Seed(seed) => match seed_vector(&seed) {
                Some(q) => q,
                None => {
                    let graph = SubGraph {
                        nodes: vec![RetrievedNode {
                            node: seed,
                            relevance: None,
                            depth: 0,
                        }],
                        ..SubGraph::empty()
                    };
                    return Ok((graph, None));
                }
            },
        };
        let graph = similarity_graph(self.search(&q, k).await?);
        Ok((graph, Some(q)))
    }

    /// `None` when a seed does not exist or is excluded by the filter.
    async fn resolve_query(&self, query: Query) -> Result<Option<Start>> {
        match query {
            Query::Text(text) => {
                let embedder = self.embedder.as_ref().ok_or_else(|| {
                    KgragError::InvalidParameter("text queries need an embedder".to_string())
                })?;
                let vector = embedder.embed(&text).await.map_err(|e| match e {
                    KgragError::EmbeddingUnavailable(_) => e,
                    other => KgragError::EmbeddingUnavailable(other.to_string()),
                })?;
                Ok(Some(Start::Vector(vector)))
            }
            Query::Embedding(vector) => {
                if vector.is_empty() {
                    return Err(KgragError::InvalidParameter(
                        "query embedding is empty".to_string(),
                    ));
                }
                Ok(Some(Start::Vector(vector)))
            }
            Query::Seed(id) => {
                match timeout(self.options.store_timeout, self.store.get_node(&id)).await {
                    Ok(Ok(node)) if self.options.filter.matches(node.metadata()) => {
                        Ok(Some(Start::Seed(node)))
                    }
                    Ok(Ok(_)) => {
                        log::debug!("Seed {} excluded by metadata filter", id);
                        Ok(None)
                    }
                    Ok(Err(KgragError::NotFound(_))) => {
                        log::info!("Seed {} not in graph, returning empty result", id);
                        Ok(None)
                    }
                    Ok(Err(e)) => Err(unavailable(e)),
                    Err(_) => Err(KgragError::StoreUnavailable(format!(
                        "seed lookup timed out after {:?}",
                        self.options.store_timeout
                    ))),
                }
            }
        }
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredNode>> {
        let search = self
            .store
            .similarity_search(query, limit, &self.options.filter);
        match timeout(self.options.store_timeout, search).await {
            Ok(Ok(hits)) => Ok(hits),
            Ok(Err(e)) => Err(unavailable(e)),
            Err(_) => Err(KgragError::StoreUnavailable(format!(
                "similarity search timed out after {:?}",
                self.options.store_timeout
            ))),
        }
    }
}

fn unavailable(e: KgragError) -> KgragError {
    match e {
        KgragError::StoreUnavailable(_) => e,
        other => KgragError::StoreUnavailable(other.to_string()),
    }
}

fn seed_vector(seed: &Node) -> Option<Vec<f32>> {
    seed.embedding().map(<[f32]>::to_vec)
}

fn similarity_graph(hits: Vec<ScoredNode>) -> SubGraph {
    SubGraph {
        nodes: hits
            .into_iter()
            .map(|hit| RetrievedNode {
                node: hit.node,
                relevance: Some(hit.score),
                depth: 0,
            })
            .collect(),
        ..SubGraph::empty()
    }
}
