//! Maximal Marginal Relevance selection over an incrementally grown pool.
//!
//! Each round picks the candidate maximising
//! `lambda * relevance - (1 - lambda) * max(similarity to selected)`.
//! Candidates may be added between rounds (graph discovery), so redundancy is
//! kept per candidate and refreshed on every selection instead of being
//! recomputed from scratch.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::graph::{Node, NodeId};
use crate::search::similarity::cosine_similarity;

/// Outcome of offering a node to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Added,
    /// Already pooled or selected.
    Duplicate,
    /// Relevance below `score_threshold`; dropped for good.
    BelowThreshold,
    /// Pool is at `fetch_k`.
    PoolFull,
}

#[derive(Debug, Clone)]
struct Candidate {
    node: Node,
    relevance: f32,
    depth: usize,
    order: usize,
    /// Max similarity to any selected node; `None` while nothing is selected.
    redundancy: Option<f32>,
}

impl Candidate {
    fn score(&self, lambda: f32) -> f32 {
        lambda * self.relevance - (1.0 - lambda) * self.redundancy.unwrap_or(0.0)
    }

    fn observe_selection(&mut self, selected: &Node) {
        let sim = pairwise_similarity(&self.node, selected);
        self.redundancy = Some(self.redundancy.map_or(sim, |r| r.max(sim)));
    }
}

fn pairwise_similarity(a: &Node, b: &Node) -> f32 {
    match (a.embedding(), b.embedding()) {
        (Some(x), Some(y)) => cosine_similarity(x, y),
        _ => 0.0,
    }
}

/// A node chosen by the selector, in selection order.
#[derive(Debug, Clone)]
pub struct Selection {
    pub node: Node,
    pub relevance: f32,
    pub depth: usize,
    /// MMR score at the moment of selection.
    pub score: f32,
}

pub struct MmrSelector {
    query: Vec<f32>,
    k: usize,
    pool_limit: usize,
    lambda: f32,
    score_threshold: Option<f32>,
    candidates: Vec<Candidate>,
    selected: Vec<Selection>,
    seen: HashSet<NodeId>,
    next_order: usize,
}

impl MmrSelector {
    /// `fetch_k` caps the number of unselected candidates held at any time.
    pub fn new(
        query: Vec<f32>,
        k: usize,
        fetch_k: usize,
        lambda: f32,
        score_threshold: Option<f32>,
    ) -> Self {
        Self {
            query,
            k,
            pool_limit: fetch_k,
            lambda,
            score_threshold,
            candidates: Vec::new(),
            selected: Vec::new(),
            seen: HashSet::new(),
            next_order: 0,
        }
    }

    pub fn query(&self) -> &[f32] {
        &self.query
    }

    /// Offer a node. `relevance` comes straight from a similarity search when
    /// known; otherwise it is computed against the query embedding (0.0 for
    /// nodes without an embedding).
    pub fn add_candidate(&mut self, node: Node, relevance: Option<f32>, depth: usize) -> Admission {
        if self.seen.contains(node.id()) {
            self.note_depth(node.id(), depth);
            return Admission::Duplicate;
        }

        let relevance = relevance.unwrap_or_else(|| {
            node.embedding()
                .map(|e| cosine_similarity(&self.query, e))
                .unwrap_or(0.0)
        });

        if let Some(threshold) = self.score_threshold {
            if relevance < threshold {
                self.seen.insert(node.id().clone());
                return Admission::BelowThreshold;
            }
        }

        if self.candidates.len() >= self.pool_limit {
            return Admission::PoolFull;
        }

        let mut candidate = Candidate {
            node,
            relevance,
            depth,
            order: self.next_order,
            redundancy: None,
        };
        for s in &self.selected {
            candidate.observe_selection(&s.node);
        }
        self.next_order += 1;
        self.seen.insert(candidate.node.id().clone());
        self.candidates.push(candidate);
        Admission::Added
    }

    /// Select the best remaining candidate. Ties go to higher relevance, then
    /// to earlier insertion. Returns `None` once `k` nodes are selected or the
    /// pool is empty.
    pub fn pop_best(&mut self) -> Option<&Selection> {
        if self.is_complete() {
            return None;
        }

        let lambda = self.lambda;
        let best = self
            .candidates
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.score(lambda)
                    .total_cmp(&b.score(lambda))
                    .then(a.relevance.total_cmp(&b.relevance))
                    .then(b.order.cmp(&a.order))
            })
            .map(|(idx, _)| idx)?;

        let chosen = self.candidates.remove(best);
        let score = chosen.score(lambda);
        for c in &mut self.candidates {
            c.observe_selection(&chosen.node);
        }

        log::debug!(
            "MMR selected {} (relevance {:.3}, score {:.3}, depth {})",
            chosen.node.id(),
            chosen.relevance,
            score,
            chosen.depth
        );

        self.selected.push(Selection {
            node: chosen.node,
            relevance: chosen.relevance,
            depth: chosen.depth,
            score,
        });
        self.selected.last()
    }

    /// Exclude `id` from the pool without offering it.
    pub fn mark_seen(&mut self, id: NodeId) {
        self.seen.insert(id);
    }

    /// Record a (possibly shorter) path to a pooled candidate.
    pub fn note_depth(&mut self, id: &NodeId, depth: usize) {
        if let Some(existing) = self.candidates.iter_mut().find(|c| c.node.id() == id) {
            existing.depth = existing.depth.min(depth);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.selected.len() >= self.k
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    /// Already pooled, selected or dropped by the threshold.
    pub fn has_seen(&self, id: &NodeId) -> bool {
        self.seen.contains(id)
    }

    pub fn selected(&self) -> &[Selection] {
        &self.selected
    }

    pub fn into_selected(self) -> Vec<Selection> {
        self.selected
    }
}

impl std::fmt::Debug for MmrSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmrSelector")
            .field("k", &self.k)
            .field("pool_limit", &self.pool_limit)
            .field("lambda", &self.lambda)
            .field("candidates", &self.candidates.len())
            .field("selected", &self.selected.len())
            .finish()
    }
}

/// Order helper for callers that need a stable pre-sort of discovered nodes
/// before offering them: highest relevance first, identity as tie-break.
pub fn by_relevance_then_id(a: &(Node, f32), b: &(Node, f32)) -> Ordering {
    b.1.total_cmp(&a.1)
        .then_with(|| a.0.id().cmp(b.0.id()))
}
