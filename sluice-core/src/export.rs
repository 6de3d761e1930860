//! Graph Export
//!
//! Projects a call graph into a plain node/edge model for external graph
//! tooling. The projection is read-only and reflects the last rebuild.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::graph::{CallGraph, Mode, NodeHandle};

/// One node of the projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportNode {
    pub id: NodeHandle,
    pub label: String,
    pub mode: Mode,
    pub live: bool,
}

/// One producer → consumer edge of the projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEdge {
    pub from: NodeHandle,
    pub to: NodeHandle,
    pub names: SmallVec<[String; 1]>,
}

/// Node/edge snapshot of a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<ExportNode>,
    pub edges: Vec<ExportEdge>,
}

impl GraphExport {
    /// Project the graph. Edges only cover nodes that were registered at the
    /// last rebuild and are still registered.
    pub fn from_graph<V>(graph: &CallGraph<V>) -> Self {
        let nodes: Vec<ExportNode> = graph
            .nodes()
            .map(|node| ExportNode {
                id: node.handle(),
                label: node.name().to_string(),
                mode: node.mode(),
                live: graph.is_live(node.handle()),
            })
            .collect();

        let edges = graph
            .edges()
            .iter()
            .filter(|edge| graph.node(edge.producer).is_some() && graph.node(edge.consumer).is_some())
            .map(|edge| ExportEdge {
                from: edge.producer,
                to: edge.consumer,
                names: edge.names.clone(),
            })
            .collect();

        Self { nodes, edges }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Render as Graphviz DOT. Dormant nodes are drawn dashed, lazy ones as
    /// ellipses.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph CallGraph {\n");
        dot.push_str("  rankdir=LR;\n");
        dot.push_str("  node [shape=box];\n\n");

        for node in &self.nodes {
            let mut attrs = vec![format!("label=\"{}\"", escape(&node.label))];
            if node.mode == Mode::Lazy {
                attrs.push("shape=ellipse".to_string());
            }
            if !node.live {
                attrs.push("style=dashed".to_string());
            }
            dot.push_str(&format!("  \"{}\" [{}];\n", node.id, attrs.join(", ")));
        }

        dot.push('\n');

        for edge in &self.edges {
            dot.push_str(&format!(
                "  \"{}\" -> \"{}\" [label=\"{}\"];\n",
                edge.from,
                edge.to,
                escape(&edge.names.join(", "))
            ));
        }

        dot.push_str("}\n");
        dot
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Func, RegisterOptions};

    fn graph() -> CallGraph<i64> {
        let mut graph = CallGraph::new();
        graph
            .register(Func::new("a", ["x"], |a| Ok(*a.get("x")?)), RegisterOptions::new())
            .unwrap();
        graph
            .register(
                Func::new("b", ["a"], |a| Ok(*a.get("a")?)),
                RegisterOptions::new().as_needed(true),
            )
            .unwrap();
        graph
            .register(Func::new("c", ["a"], |a| Ok(*a.get("a")?)), RegisterOptions::new())
            .unwrap();
        graph.rebuild(true).unwrap();
        graph
    }

    #[test]
    fn export_lists_nodes_and_edges() {
        let export = GraphExport::from_graph(&graph());

        assert_eq!(export.nodes.len(), 3);
        assert!(!export.nodes[1].live);
        assert_eq!(export.nodes[1].mode, Mode::Lazy);
        assert_eq!(export.edges.len(), 2);
        assert_eq!(export.edges[0].from, export.nodes[0].id);
        assert_eq!(export.edges[0].names.as_slice(), &["a".to_string()]);
    }

    #[test]
    fn dot_output_marks_dormant_and_lazy_nodes() {
        let dot = GraphExport::from_graph(&graph()).to_dot();

        assert!(dot.starts_with("digraph CallGraph {"));
        assert!(dot.contains("\"#1\" [label=\"b\", shape=ellipse, style=dashed];"));
        assert!(dot.contains("\"#0\" -> \"#2\" [label=\"a\"];"));
    }

    #[test]
    fn json_round_trips() {
        let export = GraphExport::from_graph(&graph());
        let json = export.to_json().unwrap();
        let back: GraphExport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, export);
    }
}
