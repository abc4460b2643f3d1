//! Text and Graphviz DOT rendering of retrieval results.

use std::collections::HashMap;
use std::fmt::Write;

use super::{NodeId, SubGraph};

fn node_label(id: &NodeId) -> String {
    format!("{} [{}]", id.name, id.node_type)
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// One line per edge: `source [type] -> target [type]: LABEL`.
pub fn format_relationships(graph: &SubGraph) -> String {
    let mut out = String::new();
    for edge in &graph.edges {
        let _ = writeln!(
            out,
            "{} -> {}: {}",
            node_label(&edge.source),
            node_label(&edge.target),
            edge.label
        );
    }
    out
}

/// Render as a DOT digraph. Node ids are assigned in result order.
pub fn render_dot(graph: &SubGraph) -> String {
    let mut ids: HashMap<&NodeId, usize> = HashMap::new();
    let mut out = String::from("digraph {\n");

    for retrieved in &graph.nodes {
        let id = retrieved.node.id();
        if ids.contains_key(id) {
            continue;
        }
        let n = ids.len();
        ids.insert(id, n);
        let _ = writeln!(out, "    {} [label=\"{}\"]", n, escape(&node_label(id)));
    }

    for edge in &graph.edges {
        let (Some(s), Some(t)) = (ids.get(&edge.source), ids.get(&edge.target)) else {
            continue;
        };
        let _ = writeln!(out, "    {} -> {} [label=\"{}\"]", s, t, escape(&edge.label));
    }

    out.push_str("}\n");
    out
}
