//! Dependency Graph
//!
//! This module implements the call graph: computations wired together by the
//! names of the values they read and write.
//!
//! # Overview
//!
//! - Nodes declare input and output names; there are no explicit links.
//! - An edge runs from P to C whenever C reads a name P writes.
//! - The scope holds the current value and revision of every name.
//!
//! The life cycle of a graph is: register nodes, [`CallGraph::rebuild`],
//! [`CallGraph::inject`] values, [`CallGraph::pump`] until quiescent.
//!
//! # Design Decisions
//!
//! 1. Nodes live in an arena keyed by [`NodeHandle`]; the wiring is a
//!    name → producer / consumer registry rebuilt from scratch on every
//!    rebuild. Nothing points at anything else, so unregistering a node is a
//!    single removal.
//!
//! 2. A rebuild either swaps in a complete new index and live set or leaves
//!    the previous ones untouched.
//!
//! 3. The pump cursor borrows the graph mutably, so rebuilding or injecting
//!    in the middle of a drain is rejected at compile time.

mod activation;
mod index;
mod node;
mod scheduler;
mod scope;

pub use activation::{Activation, LiveSet};
pub use index::{DependencyIndex, Edge};
pub use node::{Args, Computation, Func, Mode, Node, NodeHandle, Outputs, RegisterOptions};
pub use scheduler::{Pump, Step};
pub use scope::{Revision, Scope};

use std::collections::BTreeSet;

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::config::GraphConfig;
use crate::error::{GraphError, Result};

/// A graph of computations wired by shared value names.
pub struct CallGraph<V> {
    config: GraphConfig,

    /// All registered nodes, in registration order.
    nodes: IndexMap<NodeHandle, Node<V>>,
    next_handle: u64,

    scope: Scope<V>,
    marked: IndexSet<String>,

    /// Results of the last successful rebuild.
    index: DependencyIndex,
    live: LiveSet,
}

impl<V> CallGraph<V> {
    /// Create an empty graph with the default configuration.
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    pub fn with_config(config: GraphConfig) -> Self {
        Self {
            config,
            nodes: IndexMap::new(),
            next_handle: 0,
            scope: Scope::new(),
            marked: IndexSet::new(),
            index: DependencyIndex::default(),
            live: LiveSet::default(),
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Register a computation.
    ///
    /// The node's inputs are the computation's declared parameters (after
    /// remapping) and its outputs default to the computation's name. The
    /// node takes part in evaluation from the next rebuild on.
    pub fn register<C>(&mut self, computation: C, options: RegisterOptions) -> Result<NodeHandle>
    where
        C: Computation<V> + 'static,
    {
        self.register_boxed(Box::new(computation), options)
    }

    /// Register an already boxed computation.
    pub fn register_boxed(
        &mut self,
        computation: Box<dyn Computation<V>>,
        options: RegisterOptions,
    ) -> Result<NodeHandle> {
        let handle = NodeHandle::new(self.next_handle);
        let name = computation.name().to_string();
        let node = Node::new(handle, computation, options)
            .map_err(|source| GraphError::Registration { name, source })?;
        self.next_handle += 1;

        debug!(
            node = %handle,
            name = node.name(),
            inputs = ?node.inputs(),
            outputs = ?node.outputs(),
            mode = ?node.mode(),
            "node registered"
        );
        self.nodes.insert(handle, node);
        Ok(handle)
    }

    /// Remove a node. Values it wrote stay in the scope; it leaves the index
    /// and the live set on the next rebuild and never runs again.
    pub fn unregister(&mut self, handle: NodeHandle) -> Result<()> {
        let node = self
            .nodes
            .shift_remove(&handle)
            .ok_or(GraphError::UnknownNode(handle))?;
        debug!(node = %handle, name = node.name(), "node unregistered");
        Ok(())
    }

    /// Recompute the dependency index and the live set.
    ///
    /// With `active` every eager node is live; without it only nodes needed
    /// by marked outputs are. Every live node is due afterwards. On a cycle
    /// the previous index and live set stay in place.
    pub fn rebuild(&mut self, active: bool) -> Result<()> {
        let index = DependencyIndex::build(&self.nodes)?;
        let live = LiveSet::resolve(&self.nodes, &index, &self.marked, active);

        for node in self.nodes.values_mut() {
            node.reset();
        }
        self.index = index;
        self.live = live;

        debug!(
            nodes = self.nodes.len(),
            live = self.live.len(),
            active,
            "graph rebuilt"
        );
        Ok(())
    }

    /// Rebuild with the configured mode.
    pub fn rebuild_default(&mut self) -> Result<()> {
        self.rebuild(self.config.active)
    }

    /// Declare that `name` must be maintained. Takes effect on rebuild.
    pub fn mark_output(&mut self, name: impl Into<String>) {
        self.marked.insert(name.into());
    }

    /// Withdraw a mark. Returns whether it was present.
    pub fn unmark_output(&mut self, name: &str) -> bool {
        self.marked.shift_remove(name)
    }

    pub fn marked_outputs(&self) -> impl Iterator<Item = &str> {
        self.marked.iter().map(String::as_str)
    }

    /// Set values in the scope, bumping their revisions.
    ///
    /// Works for computed names too; the value stands until its producer
    /// runs again. No node runs here; consumers become due for the next
    /// pump.
    pub fn inject<I, K>(&mut self, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
    {
        for (name, value) in values {
            let name = name.into();
            let revision = self.scope.set(name.clone(), value);
            debug!(name = %name, revision = revision.raw(), "value injected");
        }
    }

    /// Start draining due work. See [`Pump`].
    pub fn pump(&mut self) -> Pump<'_, V> {
        Pump::new(self)
    }

    /// Drain until quiescent, returning the number of executed nodes.
    pub fn pump_all(&mut self) -> Result<usize> {
        self.pump().drain()
    }

    pub fn scope(&self) -> &Scope<V> {
        &self.scope
    }

    /// Current value of `name`.
    pub fn get(&self, name: &str) -> Option<&V> {
        self.scope.get(name)
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&Node<V>> {
        self.nodes.get(&handle)
    }

    /// Registered nodes in registration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node<V>> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The index of the last successful rebuild.
    pub fn index(&self) -> &DependencyIndex {
        &self.index
    }

    /// Direct producer → consumer edges as of the last rebuild.
    pub fn edges(&self) -> &[Edge] {
        self.index.edges()
    }

    /// Every node in dependency order as of the last rebuild.
    pub fn topological_order(&self) -> &[NodeHandle] {
        self.index.order()
    }

    /// The live set of the last rebuild.
    pub fn live(&self) -> &LiveSet {
        &self.live
    }

    pub fn is_live(&self, handle: NodeHandle) -> bool {
        self.live.is_live(handle)
    }

    /// Nodes strictly downstream of `name`.
    pub fn rolling_revdeps(&self, name: &str) -> Option<&BTreeSet<NodeHandle>> {
        self.index.rolling_revdeps(name)
    }

    /// Nodes affected by a change of `name`, its producer included.
    pub fn rolling_output_deps(&self, name: &str) -> Option<&BTreeSet<NodeHandle>> {
        self.index.rolling_output_deps(name)
    }
}

impl<V> Default for CallGraph<V> {
    fn default() -> Self {
        Self::new()
    }
}
