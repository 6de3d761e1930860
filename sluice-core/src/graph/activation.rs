//! Activation
//!
//! Decides which nodes are live, i.e. considered by the scheduler, for the
//! epoch that starts with a rebuild.
//!
//! 1. Overwrite: a node is eligible only if it is the most recently
//!    registered producer of every name it writes. Shadowed nodes never run,
//!    whatever their mode.
//! 2. Push: on an active rebuild every eligible eager node is live.
//! 3. Pull: producers of marked outputs are live, and so is the producer of
//!    every input of a live node, transitively.
//!
//! Lazy nodes only ever become live through step 3.

use std::collections::BTreeSet;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, trace};

use super::index::DependencyIndex;
use super::node::{Mode, Node, NodeHandle};

/// Why a node is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Eager node seeded by an active rebuild.
    Pushed,
    /// Producer of a marked output.
    Marked,
    /// Producer of an input of another live node.
    Pulled,
}

/// The result of activation: live nodes in dependency order.
#[derive(Debug, Clone, Default)]
pub struct LiveSet {
    live: IndexMap<NodeHandle, Activation>,
    order: Vec<NodeHandle>,
    shadowed: BTreeSet<NodeHandle>,
}

impl LiveSet {
    /// Resolve the live set for `nodes` against a freshly built index.
    pub fn resolve<V>(
        nodes: &IndexMap<NodeHandle, Node<V>>,
        index: &DependencyIndex,
        marked: &IndexSet<String>,
        active: bool,
    ) -> Self {
        let shadowed: BTreeSet<NodeHandle> = nodes
            .values()
            .filter(|node| {
                node.outputs()
                    .iter()
                    .any(|output| index.producer(output) != Some(node.handle()))
            })
            .map(Node::handle)
            .collect();

        let mut frontier = Frontier {
            shadowed: &shadowed,
            live: IndexMap::new(),
            pending: Vec::new(),
        };

        if active {
            for node in nodes.values().filter(|n| n.mode() == Mode::Eager) {
                frontier.admit(node.handle(), Activation::Pushed);
            }
        }
        for name in marked {
            if let Some(producer) = index.producer(name) {
                frontier.admit(producer, Activation::Marked);
            }
        }

        while let Some(handle) = frontier.pending.pop() {
            let Some(node) = nodes.get(&handle) else {
                continue;
            };
            for input in node.inputs() {
                if let Some(producer) = index.producer(input) {
                    frontier.admit(producer, Activation::Pulled);
                }
            }
        }
        let live = frontier.live;

        let order: Vec<NodeHandle> = index
            .order()
            .iter()
            .copied()
            .filter(|handle| live.contains_key(handle))
            .collect();

        debug!(
            live = order.len(),
            shadowed = shadowed.len(),
            dormant = nodes.len() - order.len() - shadowed.len(),
            active,
            "live set resolved"
        );

        Self {
            live,
            order,
            shadowed,
        }
    }

    /// Live nodes in dependency order.
    pub fn order(&self) -> &[NodeHandle] {
        &self.order
    }

    pub fn is_live(&self, node: NodeHandle) -> bool {
        self.live.contains_key(&node)
    }

    /// How `node` became live, if it is.
    pub fn activation(&self, node: NodeHandle) -> Option<Activation> {
        self.live.get(&node).copied()
    }

    /// Whether `node` lost one of its outputs to a later producer.
    pub fn is_shadowed(&self, node: NodeHandle) -> bool {
        self.shadowed.contains(&node)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Worklist state while growing the live set.
struct Frontier<'a> {
    shadowed: &'a BTreeSet<NodeHandle>,
    live: IndexMap<NodeHandle, Activation>,
    pending: Vec<NodeHandle>,
}

impl Frontier<'_> {
    fn admit(&mut self, handle: NodeHandle, why: Activation) {
        if self.shadowed.contains(&handle) || self.live.contains_key(&handle) {
            return;
        }
        trace!(node = %handle, reason = ?why, "node activated");
        self.live.insert(handle, why);
        self.pending.push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::{Func, RegisterOptions};

    struct Fixture {
        nodes: IndexMap<NodeHandle, Node<i64>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                nodes: IndexMap::new(),
            }
        }

        fn add(&mut self, params: &[&str], options: RegisterOptions) -> NodeHandle {
            let handle = NodeHandle::new(self.nodes.len() as u64);
            let func = Func::new(
                format!("n{}", handle.raw()),
                params.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
                |_| Ok(0),
            );
            let node = Node::new(handle, Box::new(func), options).unwrap();
            self.nodes.insert(handle, node);
            handle
        }

        fn resolve(&self, marked: &[&str], active: bool) -> LiveSet {
            let index = DependencyIndex::build(&self.nodes).unwrap();
            let marked: IndexSet<String> = marked.iter().map(|m| m.to_string()).collect();
            LiveSet::resolve(&self.nodes, &index, &marked, active)
        }
    }

    fn outputs(names: &[&str]) -> RegisterOptions {
        RegisterOptions::new().outputs(names.iter().copied())
    }

    #[test]
    fn active_rebuild_pushes_eager_nodes() {
        let mut fx = Fixture::new();
        let f = fx.add(&["x"], outputs(&["f"]));
        let g = fx.add(&["f"], outputs(&["g"]));

        let live = fx.resolve(&[], true);
        assert_eq!(live.order(), &[f, g]);
        assert_eq!(live.activation(f), Some(Activation::Pushed));
    }

    #[test]
    fn passive_rebuild_only_follows_marks() {
        let mut fx = Fixture::new();
        let throws = fx.add(&["bad"], outputs(&["throws"]));
        let a = fx.add(&["x"], outputs(&["a"]));

        let live = fx.resolve(&["a"], false);
        assert!(live.is_live(a));
        assert!(!live.is_live(throws));
        assert_eq!(live.activation(a), Some(Activation::Marked));

        assert!(fx.resolve(&[], false).is_empty());
    }

    #[test]
    fn lazy_nodes_are_pulled_by_live_consumers() {
        let mut fx = Fixture::new();
        let lazy = fx.add(&["bad"], outputs(&["throws"]).as_needed(true));
        let unused = fx.add(&["x"], outputs(&["unused"]).as_needed(true));
        let consumer = fx.add(&["throws"], outputs(&["takes_throws"]));

        let live = fx.resolve(&[], true);
        assert_eq!(live.order(), &[lazy, consumer]);
        assert_eq!(live.activation(lazy), Some(Activation::Pulled));
        assert!(!live.is_live(unused));
    }

    #[test]
    fn pull_is_transitive_through_remaps() {
        let mut fx = Fixture::new();
        let first = fx.add(&["bad"], outputs(&["throws"]).as_needed(true));
        let second = fx.add(
            &["bad"],
            outputs(&["throws2"]).remap("bad", "throws").as_needed(true),
        );
        let a = fx.add(&["x"], outputs(&["a"]));
        let consumer = fx.add(&["throws2"], outputs(&["takes_throws2"]));

        let live = fx.resolve(&["a"], true);
        assert_eq!(live.order(), &[first, second, a, consumer]);
    }

    #[test]
    fn shadowed_producers_never_go_live() {
        let mut fx = Fixture::new();
        let shadowed = fx.add(&["bad_arg"], outputs(&["a"]));
        let winner = fx.add(&["x"], outputs(&["a"]));

        let live = fx.resolve(&["a"], false);
        assert_eq!(live.order(), &[winner]);
        assert!(live.is_shadowed(shadowed));

        // Eager pushing does not revive it either.
        let live = fx.resolve(&[], true);
        assert!(!live.is_live(shadowed));
    }

    #[test]
    fn last_registration_wins_even_when_the_winner_is_lazy() {
        let mut fx = Fixture::new();
        let eager = fx.add(&["x"], outputs(&["a"]));
        let lazy = fx.add(&["y"], outputs(&["a"]).as_needed(true));
        let consumer = fx.add(&["a"], outputs(&["b"]));

        let live = fx.resolve(&[], true);
        assert!(!live.is_live(eager));
        assert_eq!(live.order(), &[lazy, consumer]);
    }
}
