//! Fixed-depth breadth-first traversal.

use std::collections::{HashMap, HashSet};

use crate::graph::{Edge, NodeId, RetrievedNode, SubGraph};
use crate::search::similarity::relevance;
use crate::store::GraphStore;
use crate::traversal::{fetch_adjacent_many, resolve_nodes, Resolved, TraversalOptions};

/// Expand `seeds` breadth-first up to `max_depth` hops.
///
/// Levels are expanded one at a time, so a node is always recorded at the
/// depth of its shortest path from a seed and expanded at most once. Only the
/// edge that first reached a node is reported. Discovered nodes are scored
/// against `query` when both embeddings are present.
///
/// Never fails: adjacency errors become warnings on the returned sub-graph.
pub async fn traverse(
    store: &dyn GraphStore,
    seeds: Vec<RetrievedNode>,
    max_depth: usize,
    query: Option<&[f32]>,
    opts: &TraversalOptions,
) -> SubGraph {
    let mut graph = SubGraph::empty();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut level: Vec<NodeId> = Vec::new();

    for seed in seeds {
        if visited.insert(seed.node.id().clone()) {
            level.push(seed.node.id().clone());
            graph.nodes.push(seed);
        }
    }

    for depth in 0..max_depth {
        if level.is_empty() {
            break;
        }
        log::debug!("Expanding {} node(s) at depth {}", level.len(), depth);

        let adjacency = fetch_adjacent_many(store, &level, opts).await;

        // Candidate (edge, endpoint) pairs in deterministic order, plus the
        // distinct endpoints that need a lookup.
        let mut discovered: Vec<(Edge, NodeId)> = Vec::new();
        let mut pending: Vec<NodeId> = Vec::new();
        let mut pending_set: HashSet<NodeId> = HashSet::new();

        for (from, result) in level.iter().zip(adjacency) {
            let edges = match result {
                Ok(edges) => edges,
                Err(failure) => {
                    graph.warnings.push(failure);
                    continue;
                }
            };
            for edge in edges {
                let Some(other) = edge.other_end(from, opts.direction).cloned() else {
                    continue;
                };
                if other == *from || visited.contains(&other) {
                    continue;
                }
                if pending_set.insert(other.clone()) {
                    pending.push(other.clone());
                }
                discovered.push((edge, other));
            }
        }

        let resolved = resolve_nodes(store, &pending, opts).await;
        let mut found = HashMap::new();
        for (id, resolved) in pending.into_iter().zip(resolved) {
            match resolved {
                Resolved::Found(node) => {
                    found.insert(id, node);
                }
                Resolved::Skipped => {}
                Resolved::Failed(failure) => graph.warnings.push(failure),
            }
        }

        let mut next = Vec::new();
        for (edge, other) in discovered {
            if visited.contains(&other) {
                continue;
            }
            let Some(node) = found.remove(&other) else {
                continue;
            };
            visited.insert(other.clone());
            graph.edges.push(edge);
            graph.nodes.push(RetrievedNode {
                relevance: query.and_then(|q| relevance(q, node.embedding())),
                node,
                depth: depth + 1,
            });
            next.push(other);
        }
        level = next;
    }

    graph
}
