//! Dependency Index
//!
//! Derives the wiring of the graph from the names nodes read and write.
//!
//! # Algorithm
//!
//! 1. Collect, per name, the nodes producing it and the nodes consuming it.
//! 2. Emit an edge P → C for every producer P of a name C reads.
//! 3. Order the nodes with Kahn's algorithm. The ready set is a min-heap on
//!    the node handle, so ties resolve by registration order and the order is
//!    total and deterministic.
//! 4. Walk the order backwards to collect, per node, everything downstream
//!    of it; the per-name rolling caches are unions of those sets.
//!
//! The index is rebuilt from scratch; nothing here is patched incrementally.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, warn};

use super::node::{Node, NodeHandle};
use crate::error::{GraphError, Result};

/// A derived producer → consumer edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub producer: NodeHandle,
    pub consumer: NodeHandle,
    /// Names written by `producer` and read by `consumer`.
    pub names: SmallVec<[String; 1]>,
}

/// Edges, order and transitive caches for one set of nodes.
#[derive(Debug, Clone, Default)]
pub struct DependencyIndex {
    /// All producers of each name, in registration order.
    producers: IndexMap<String, SmallVec<[NodeHandle; 1]>>,

    /// All consumers of each name, in registration order.
    consumers: IndexMap<String, Vec<NodeHandle>>,

    edges: Vec<Edge>,

    /// Direct consumers of each node.
    dependents: HashMap<NodeHandle, Vec<NodeHandle>>,

    order: Vec<NodeHandle>,

    rolling_revdeps: IndexMap<String, BTreeSet<NodeHandle>>,
    rolling_output_deps: IndexMap<String, BTreeSet<NodeHandle>>,
}

impl DependencyIndex {
    /// Build the index for the given nodes.
    ///
    /// Fails with [`GraphError::Cycle`] when the wiring is cyclic.
    pub fn build<V>(nodes: &IndexMap<NodeHandle, Node<V>>) -> Result<Self> {
        let mut producers: IndexMap<String, SmallVec<[NodeHandle; 1]>> = IndexMap::new();
        let mut consumers: IndexMap<String, Vec<NodeHandle>> = IndexMap::new();

        for (&handle, node) in nodes {
            for input in node.inputs() {
                consumers.entry(input.clone()).or_default().push(handle);
            }
            for output in node.outputs() {
                producers.entry(output.clone()).or_default().push(handle);
            }
        }

        // Producer → consumer edges, keyed so several shared names collapse
        // into one edge.
        let mut edge_names: IndexMap<(NodeHandle, NodeHandle), SmallVec<[String; 1]>> =
            IndexMap::new();
        for (&producer, node) in nodes {
            for output in node.outputs() {
                for &consumer in consumers.get(output).into_iter().flatten() {
                    edge_names
                        .entry((producer, consumer))
                        .or_default()
                        .push(output.clone());
                }
            }
        }

        let mut dependents: HashMap<NodeHandle, Vec<NodeHandle>> = HashMap::new();
        let mut in_degree: HashMap<NodeHandle, usize> =
            nodes.keys().map(|&handle| (handle, 0)).collect();
        let edges: Vec<Edge> = edge_names
            .into_iter()
            .map(|((producer, consumer), names)| {
                dependents.entry(producer).or_default().push(consumer);
                *in_degree.entry(consumer).or_default() += 1;
                Edge {
                    producer,
                    consumer,
                    names,
                }
            })
            .collect();

        let order = topological_order(&in_degree, &dependents);
        if order.len() < nodes.len() {
            let cycle = cycle_members(nodes.keys().copied(), &order, &dependents);
            warn!(nodes = ?cycle, "dependency cycle rejected");
            return Err(GraphError::Cycle { nodes: cycle });
        }

        // Everything strictly downstream of each node.
        let mut downstream: HashMap<NodeHandle, BTreeSet<NodeHandle>> = HashMap::new();
        for &handle in order.iter().rev() {
            let mut reached = BTreeSet::new();
            for &dependent in dependents.get(&handle).into_iter().flatten() {
                reached.insert(dependent);
                if let Some(below) = downstream.get(&dependent) {
                    reached.extend(below.iter().copied());
                }
            }
            downstream.insert(handle, reached);
        }

        let names: IndexSet<&String> = consumers.keys().chain(producers.keys()).collect();
        let mut rolling_revdeps = IndexMap::with_capacity(names.len());
        let mut rolling_output_deps = IndexMap::with_capacity(names.len());
        for name in names {
            // Produced names reach everything below any of their producers,
            // including consumers of the producers' other outputs. Bare
            // inputs start from their consumers.
            let mut revdeps = BTreeSet::new();
            match producers.get(name) {
                Some(producing) => {
                    for producer in producing {
                        if let Some(below) = downstream.get(producer) {
                            revdeps.extend(below.iter().copied());
                        }
                    }
                }
                None => {
                    for &consumer in consumers.get(name).into_iter().flatten() {
                        revdeps.insert(consumer);
                        if let Some(below) = downstream.get(&consumer) {
                            revdeps.extend(below.iter().copied());
                        }
                    }
                }
            }

            let mut output_deps = revdeps.clone();
            if let Some(&producer) = producers.get(name).and_then(|p| p.last()) {
                output_deps.insert(producer);
            }

            rolling_revdeps.insert(name.clone(), revdeps);
            rolling_output_deps.insert(name.clone(), output_deps);
        }

        debug!(
            nodes = nodes.len(),
            edges = edges.len(),
            names = rolling_revdeps.len(),
            "dependency index built"
        );

        Ok(Self {
            producers,
            consumers,
            edges,
            dependents,
            order,
            rolling_revdeps,
            rolling_output_deps,
        })
    }

    /// All nodes in dependency order.
    pub fn order(&self) -> &[NodeHandle] {
        &self.order
    }

    /// Direct producer → consumer edges.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// The producer that owns `name` under the overwrite rule: the most
    /// recently registered one.
    pub fn producer(&self, name: &str) -> Option<NodeHandle> {
        self.producers.get(name).and_then(|p| p.last().copied())
    }

    /// Every registered producer of `name`, shadowed ones included.
    pub fn producers(&self, name: &str) -> &[NodeHandle] {
        self.producers.get(name).map(|p| p.as_slice()).unwrap_or(&[])
    }

    /// Nodes reading `name` directly.
    pub fn consumers(&self, name: &str) -> &[NodeHandle] {
        self.consumers.get(name).map(|c| c.as_slice()).unwrap_or(&[])
    }

    /// Nodes reading any output of `node` directly.
    pub fn dependents(&self, node: NodeHandle) -> &[NodeHandle] {
        self.dependents.get(&node).map(|d| d.as_slice()).unwrap_or(&[])
    }

    /// Whether no node produces `name`, so it can only be injected.
    pub fn is_bare_input(&self, name: &str) -> bool {
        self.consumers.contains_key(name) && !self.producers.contains_key(name)
    }

    /// Nodes strictly downstream of `name`.
    pub fn rolling_revdeps(&self, name: &str) -> Option<&BTreeSet<NodeHandle>> {
        self.rolling_revdeps.get(name)
    }

    /// Nodes to reconsider when `name` changes: the rolling reverse
    /// dependents plus the producer of `name`.
    pub fn rolling_output_deps(&self, name: &str) -> Option<&BTreeSet<NodeHandle>> {
        self.rolling_output_deps.get(name)
    }

    /// Every name read or written by some node.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rolling_revdeps.keys().map(String::as_str)
    }
}

/// Kahn's algorithm with registration order as the tie-break.
fn topological_order(
    in_degree: &HashMap<NodeHandle, usize>,
    dependents: &HashMap<NodeHandle, Vec<NodeHandle>>,
) -> Vec<NodeHandle> {
    let mut remaining = in_degree.clone();
    let mut ready: BinaryHeap<Reverse<NodeHandle>> = remaining
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&handle, _)| Reverse(handle))
        .collect();
    let mut order = Vec::with_capacity(remaining.len());

    while let Some(Reverse(handle)) = ready.pop() {
        order.push(handle);
        for dependent in dependents.get(&handle).into_iter().flatten() {
            if let Some(degree) = remaining.get_mut(dependent) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    ready.push(Reverse(*dependent));
                }
            }
        }
    }

    order
}

/// Narrow the nodes Kahn's algorithm could not order down to those on a
/// cycle (or on a path between cycles): repeatedly drop nodes with no
/// dependent left in the set.
fn cycle_members(
    all: impl Iterator<Item = NodeHandle>,
    ordered: &[NodeHandle],
    dependents: &HashMap<NodeHandle, Vec<NodeHandle>>,
) -> Vec<NodeHandle> {
    let ordered: HashSet<NodeHandle> = ordered.iter().copied().collect();
    let mut stuck: BTreeSet<NodeHandle> = all.filter(|h| !ordered.contains(h)).collect();

    loop {
        let sinks: Vec<NodeHandle> = stuck
            .iter()
            .copied()
            .filter(|handle| {
                !dependents
                    .get(handle)
                    .into_iter()
                    .flatten()
                    .any(|d| stuck.contains(d))
            })
            .collect();
        if sinks.is_empty() {
            break;
        }
        for sink in sinks {
            stuck.remove(&sink);
        }
    }

    stuck.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::{Func, RegisterOptions};

    fn node(raw: u64, params: &[&str], outputs: &[&str]) -> (NodeHandle, Node<i64>) {
        let handle = NodeHandle::new(raw);
        let func = Func::new(
            format!("n{}", raw),
            params.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            |_| Ok(0),
        );
        let options = RegisterOptions::new().outputs(outputs.iter().copied());
        (handle, Node::new(handle, Box::new(func), options).unwrap())
    }

    fn nodes(list: &[(&[&str], &[&str])]) -> IndexMap<NodeHandle, Node<i64>> {
        list.iter()
            .enumerate()
            .map(|(i, (params, outputs))| node(i as u64, params, outputs))
            .collect()
    }

    fn h(raw: u64) -> NodeHandle {
        NodeHandle::new(raw)
    }

    #[test]
    fn diamond_rolling_caches() {
        //  f   g
        //  | / |
        //  a   b
        //  |   |
        //  x   y
        let graph = nodes(&[
            (&["x"], &["a"]),
            (&["y"], &["b"]),
            (&["a", "b"], &["f"]),
            (&["a"], &["g"]),
        ]);
        let index = DependencyIndex::build(&graph).unwrap();

        let count = |name: &str| index.rolling_revdeps(name).unwrap().len();
        assert_eq!(count("x"), 3);
        assert_eq!(count("y"), 2);
        assert_eq!(count("a"), 2);
        assert_eq!(count("b"), 1);
        assert_eq!(count("f"), 0);
        assert_eq!(count("g"), 0);

        for name in ["a", "b", "f", "g", "x", "y"] {
            let mut expected = index.rolling_revdeps(name).unwrap().clone();
            if let Some(producer) = index.producer(name) {
                expected.insert(producer);
            }
            assert_eq!(index.rolling_output_deps(name), Some(&expected));
        }

        assert!(index.is_bare_input("x"));
        assert!(!index.is_bare_input("a"));
        assert_eq!(index.rolling_revdeps("x").unwrap(), &BTreeSet::from([h(0), h(2), h(3)]));
    }

    #[test]
    fn multi_output_producers_carry_their_whole_downstream() {
        // P(x) -> [a, b], C(b) -> c
        let graph = nodes(&[(&["x"], &["a", "b"]), (&["b"], &["c"])]);
        let index = DependencyIndex::build(&graph).unwrap();

        assert_eq!(index.rolling_revdeps("a").unwrap(), &BTreeSet::from([h(1)]));
        assert_eq!(index.rolling_output_deps("a").unwrap(), &BTreeSet::from([h(0), h(1)]));
        assert_eq!(index.rolling_revdeps("b").unwrap(), &BTreeSet::from([h(1)]));
        assert_eq!(index.rolling_revdeps("x").unwrap(), &BTreeSet::from([h(0), h(1)]));
        assert!(index.rolling_revdeps("c").unwrap().is_empty());
    }

    #[test]
    fn order_respects_edges_and_registration() {
        // Consumers registered before their producers.
        let graph = nodes(&[(&["b"], &["c"]), (&["a"], &["b"]), (&["x"], &["a"]), (&[], &["z"])]);
        let index = DependencyIndex::build(&graph).unwrap();

        assert_eq!(index.order(), &[h(2), h(1), h(0), h(3)]);
        for edge in index.edges() {
            let p = index.order().iter().position(|&n| n == edge.producer);
            let c = index.order().iter().position(|&n| n == edge.consumer);
            assert!(p < c);
        }
    }

    #[test]
    fn shared_names_collapse_into_one_edge() {
        let graph = nodes(&[(&[], &["a", "b"]), (&["a", "b"], &["c"])]);
        let index = DependencyIndex::build(&graph).unwrap();

        assert_eq!(index.edges().len(), 1);
        assert_eq!(index.edges()[0].names.as_slice(), &["a".to_string(), "b".to_string()]);
        assert_eq!(index.dependents(h(0)), &[h(1)]);
    }

    #[test]
    fn last_registered_producer_owns_the_name() {
        let graph = nodes(&[(&["bad_arg"], &["a"]), (&["x"], &["a"])]);
        let index = DependencyIndex::build(&graph).unwrap();

        assert_eq!(index.producer("a"), Some(h(1)));
        assert_eq!(index.producers("a"), &[h(0), h(1)]);
        assert_eq!(index.rolling_output_deps("a").unwrap(), &BTreeSet::from([h(1)]));
    }

    #[test]
    fn cycles_are_reported_without_downstream_nodes() {
        let graph = nodes(&[
            (&["c"], &["a"]),
            (&["a"], &["b"]),
            (&["b"], &["c"]),
            (&["c"], &["d"]),
            (&["x"], &["y"]),
        ]);

        match DependencyIndex::build(&graph) {
            Err(GraphError::Cycle { nodes }) => assert_eq!(nodes, vec![h(0), h(1), h(2)]),
            other => panic!("expected a cycle, got {:?}", other.map(|i| i.order().to_vec())),
        }
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let graph = nodes(&[(&["acc"], &["acc"])]);
        assert!(matches!(
            DependencyIndex::build(&graph),
            Err(GraphError::Cycle { .. })
        ));
    }
}
