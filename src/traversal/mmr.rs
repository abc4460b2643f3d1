//! MMR traversal: candidate discovery by graph expansion interleaved with
//! MMR selection.
//!
//! The pool starts from the neighbourhood of any root nodes and the
//! similarity hits. Every selected node shallower than `depth` is expanded
//! once; its unseen neighbours join the pool scored against the original
//! query, which lets structurally related but semantically distant nodes
//! compete for a slot.

use std::collections::HashSet;

use crate::graph::{Edge, Node, NodeId, PartialExpansionFailure, RetrievedNode, SubGraph};
use crate::search::mmr::{by_relevance_then_id, Admission, MmrSelector};
use crate::search::similarity::relevance;
use crate::store::{GraphStore, ScoredNode};
use crate::traversal::{
    fetch_adjacent, fetch_adjacent_many, resolve_nodes, Resolved, TraversalOptions,
};

pub const DEFAULT_LAMBDA: f32 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct MmrTraversalParams {
    /// Nodes to return.
    pub k: usize,
    /// Cap on unselected candidates held at once.
    pub fetch_k: usize,
    /// Max hops from a depth-0 candidate.
    pub depth: usize,
    /// 1.0 ranks purely by relevance, 0.0 purely by diversity.
    pub lambda: f32,
    pub score_threshold: Option<f32>,
    /// Max new neighbours admitted per expansion, most relevant first.
    pub adjacent_k: Option<usize>,
}

impl Default for MmrTraversalParams {
    fn default() -> Self {
        Self {
            k: 4,
            fetch_k: 100,
            depth: 2,
            lambda: DEFAULT_LAMBDA,
            score_threshold: None,
            adjacent_k: None,
        }
    }
}

/// Edges walked so far and expansion failures, shared by root and
/// selection-driven expansion.
struct Discovery<'a> {
    store: &'a dyn GraphStore,
    params: &'a MmrTraversalParams,
    opts: &'a TraversalOptions,
    traversed: Vec<Edge>,
    traversed_set: HashSet<Edge>,
    warnings: Vec<PartialExpansionFailure>,
}

impl Discovery<'_> {
    /// Offer the unseen neighbours of `from` to the pool at `depth`, most
    /// relevant first, at most `adjacent_k` of them.
    async fn offer_neighbours(
        &mut self,
        selector: &mut MmrSelector,
        from: &NodeId,
        edges: Vec<Edge>,
        depth: usize,
    ) {
        let mut fresh: Vec<NodeId> = Vec::new();
        for edge in edges {
            let Some(other) = edge.other_end(from, self.opts.direction).cloned() else {
                continue;
            };
            if &other == from {
                continue;
            }
            if selector.has_seen(&other) {
                selector.note_depth(&other, depth);
            } else if !fresh.contains(&other) {
                fresh.push(other);
            }
            if self.traversed_set.insert(edge.clone()) {
                self.traversed.push(edge);
            }
        }

        let mut discovered: Vec<(Node, f32)> = Vec::new();
        for resolved in resolve_nodes(self.store, &fresh, self.opts).await {
            match resolved {
                Resolved::Found(node) => {
                    let score = relevance(selector.query(), node.embedding()).unwrap_or(0.0);
                    discovered.push((node, score));
                }
                Resolved::Skipped => {}
                Resolved::Failed(failure) => self.warnings.push(failure),
            }
        }
        discovered.sort_by(by_relevance_then_id);
        if let Some(adjacent_k) = self.params.adjacent_k {
            discovered.truncate(adjacent_k);
        }

        let offered = discovered.len();
        let mut admitted = 0;
        for (node, score) in discovered {
            if selector.add_candidate(node, Some(score), depth) == Admission::Added {
                admitted += 1;
            }
        }
        log::debug!(
            "Expanded {} into depth {}: {} new neighbour(s), {} admitted, pool {}",
            from,
            depth,
            offered,
            admitted,
            selector.candidate_count()
        );
    }
}

/// Run MMR traversal from `initial` similarity hits and `roots`.
///
/// Roots are never candidates themselves: they are marked seen and their
/// neighbours enter the pool at depth 0, ahead of the similarity hits.
/// Unknown roots have no neighbours and contribute nothing.
///
/// Returns the selected nodes in selection order and every traversed edge
/// whose endpoints were both selected. Adjacency failures are recorded as
/// warnings and do not abort selection.
pub async fn mmr_traverse(
    store: &dyn GraphStore,
    query: Vec<f32>,
    initial: Vec<ScoredNode>,
    roots: &[NodeId],
    params: &MmrTraversalParams,
    opts: &TraversalOptions,
) -> SubGraph {
    let mut selector = MmrSelector::new(
        query,
        params.k,
        params.fetch_k,
        params.lambda,
        params.score_threshold,
    );
    let mut discovery = Discovery {
        store,
        params,
        opts,
        traversed: Vec::new(),
        traversed_set: HashSet::new(),
        warnings: Vec::new(),
    };

    for root in roots {
        selector.mark_seen(root.clone());
    }
    let root_edges = fetch_adjacent_many(store, roots, opts).await;
    for (root, fetched) in roots.iter().zip(root_edges) {
        match fetched {
            Ok(edges) => discovery.offer_neighbours(&mut selector, root, edges, 0).await,
            Err(failure) => discovery.warnings.push(failure),
        }
    }

    for hit in initial {
        selector.add_candidate(hit.node, Some(hit.score), 0);
    }

    let mut expanded: HashSet<NodeId> = HashSet::new();
    while let Some(selected) = selector.pop_best() {
        let from = selected.node.id().clone();
        let depth = selected.depth;
        if depth >= params.depth || !expanded.insert(from.clone()) {
            continue;
        }

        match fetch_adjacent(store, &from, opts).await {
            Ok(edges) => {
                discovery
                    .offer_neighbours(&mut selector, &from, edges, depth + 1)
                    .await
            }
            Err(failure) => discovery.warnings.push(failure),
        }
    }

    let selected = selector.into_selected();
    let ids: HashSet<&NodeId> = selected.iter().map(|s| s.node.id()).collect();
    let edges = discovery
        .traversed
        .into_iter()
        .filter(|e| ids.contains(&e.source) && ids.contains(&e.target))
        .collect();

    let nodes = selected
        .iter()
        .map(|s| RetrievedNode {
            node: s.node.clone(),
            relevance: Some(s.relevance),
            depth: s.depth,
        })
        .collect();

    SubGraph {
        nodes,
        edges,
        warnings: discovery.warnings,
    }
}
