//! Pump Scheduler
//!
//! The pump drains pending recomputation for the live set. It ensures that
//! producers always run before their consumers within one drain.
//!
//! # Algorithm
//!
//! The live nodes are walked once, in the topological order fixed by the
//! last rebuild:
//!
//! 1. Skip nodes that are not due (they ran since the rebuild and none of
//!    their inputs was written since).
//! 2. Gather the inputs of a due node from the scope and invoke it.
//! 3. On success write every result to its output name. The revision bump
//!    makes consumers later in the order due, so one pass reaches
//!    quiescence.
//! 4. On failure stop the drain and hand the error to the caller. The node
//!    keeps its old revisions and stays due.
//!
//! The pump is a cursor: every executed node is yielded as a [`Step`] and
//! the caller decides whether to continue. Dropping the cursor leaves the
//! remaining work pending for the next pump.

use std::iter::FusedIterator;

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::node::NodeHandle;
use super::scope::{Revision, Scope};
use super::CallGraph;
use crate::error::{GraphError, Result};

/// One executed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub node: NodeHandle,
    /// The computation's name.
    pub name: String,
    /// Output names written, with their new revisions.
    pub written: SmallVec<[(String, Revision); 1]>,
}

/// Stepwise drain over the live nodes of a graph.
///
/// Created by [`CallGraph::pump`]. Yields `Ok(step)` per executed node and
/// at most one `Err`, after which it is exhausted.
pub struct Pump<'g, V> {
    graph: &'g mut CallGraph<V>,
    position: usize,
    executed: usize,
    budget: Option<usize>,
    finished: bool,
}

impl<'g, V> Pump<'g, V> {
    pub(crate) fn new(graph: &'g mut CallGraph<V>) -> Self {
        // A zero budget means no limit.
        let budget = graph.config().step_budget.filter(|&budget| budget > 0);
        Self {
            graph,
            position: 0,
            executed: 0,
            budget,
            finished: false,
        }
    }

    /// Read the scope between steps.
    pub fn scope(&self) -> &Scope<V> {
        self.graph.scope()
    }

    /// Number of nodes executed so far by this cursor.
    pub fn executed(&self) -> usize {
        self.executed
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Run to quiescence, returning the number of executed nodes.
    pub fn drain(mut self) -> Result<usize> {
        for step in self.by_ref() {
            step?;
        }
        Ok(self.executed)
    }

    fn step(&mut self) -> Option<Result<Step>> {
        let graph = &mut *self.graph;

        while let Some(&handle) = graph.live.order().get(self.position) {
            self.position += 1;

            // Unregistered since the last rebuild.
            let Some(node) = graph.nodes.get_mut(&handle) else {
                continue;
            };
            if !node.is_due(&graph.scope) {
                trace!(node = %handle, "not due");
                continue;
            }

            return match node.invoke(&graph.scope) {
                Ok((values, revisions)) => {
                    let written: SmallVec<[(String, Revision); 1]> = node
                        .outputs()
                        .iter()
                        .zip(values)
                        .map(|(output, value)| {
                            let revision = graph.scope.set(output.clone(), value);
                            (output.clone(), revision)
                        })
                        .collect();
                    node.mark_ran(revisions);
                    self.executed += 1;
                    debug!(node = %handle, name = node.name(), outputs = ?node.outputs(), "node executed");
                    Some(Ok(Step {
                        node: handle,
                        name: node.name().to_string(),
                        written,
                    }))
                }
                Err(source) => {
                    self.finished = true;
                    warn!(node = %handle, name = node.name(), error = %source, "node failed");
                    Some(Err(GraphError::NodeExecution {
                        node: handle,
                        name: node.name().to_string(),
                        source,
                    }))
                }
            };
        }

        self.finished = true;
        trace!(executed = self.executed, "pump quiescent");
        None
    }
}

impl<V> Iterator for Pump<'_, V> {
    type Item = Result<Step>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.budget.is_some_and(|budget| self.executed >= budget) {
            debug!(executed = self.executed, "step budget exhausted");
            self.finished = true;
            return None;
        }
        self.step()
    }
}

impl<V> FusedIterator for Pump<'_, V> {}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::config::GraphConfig;
    use crate::error::ComputeError;
    use crate::graph::{Func, RegisterOptions};

    fn chain() -> CallGraph<i64> {
        let mut graph = CallGraph::new();
        graph
            .register(
                Func::new("f", ["x"], |a| Ok(*a.get("x")? + 3)),
                RegisterOptions::new(),
            )
            .unwrap();
        graph
            .register(
                Func::new("g", ["f"], |a| Ok(*a.get("f")? * 7)),
                RegisterOptions::new(),
            )
            .unwrap();
        graph.rebuild(true).unwrap();
        graph
    }

    #[test]
    fn steps_follow_dependency_order() {
        let mut graph = chain();
        graph.inject([("x", 3)]);

        let names: Vec<String> = graph.pump().map(|step| step.unwrap().name).collect();
        assert_eq!(names, vec!["f", "g"]);
        assert_eq!(graph.scope().get("g"), Some(&42));
    }

    #[test]
    fn stopping_early_leaves_work_pending() {
        let mut graph = chain();
        graph.inject([("x", 1)]);

        {
            let mut pump = graph.pump();
            let first = pump.next().unwrap().unwrap();
            assert_eq!(first.name, "f");
            assert_eq!(pump.scope().get("f"), Some(&4));
            assert!(pump.scope().get("g").is_none());
        }

        // The next pump resumes with the consumer only.
        assert_eq!(graph.pump().drain().unwrap(), 1);
        assert_eq!(graph.scope().get("g"), Some(&28));
    }

    #[test]
    fn failure_fuses_the_cursor() {
        let mut graph = chain();

        let mut pump = graph.pump();
        let err = pump.next().unwrap().unwrap_err();
        assert_eq!(
            err.compute_error(),
            Some(&ComputeError::MissingInput("x".into()))
        );
        assert!(pump.is_finished());
        assert!(pump.next().is_none());
    }

    #[test]
    fn step_budget_limits_one_cursor() {
        let runs = Rc::new(Cell::new(0));
        let mut graph = CallGraph::with_config(GraphConfig {
            step_budget: Some(1),
            ..GraphConfig::default()
        });
        for name in ["a", "b", "c"] {
            let runs = runs.clone();
            graph
                .register(
                    Func::new(name, Vec::<String>::new(), move |_| {
                        runs.set(runs.get() + 1);
                        Ok(0)
                    }),
                    RegisterOptions::new(),
                )
                .unwrap();
        }
        graph.rebuild(true).unwrap();

        assert_eq!(graph.pump().drain().unwrap(), 1);
        assert_eq!(graph.pump().drain().unwrap(), 1);
        assert_eq!(graph.pump().drain().unwrap(), 1);
        assert_eq!(graph.pump().drain().unwrap(), 0);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn zero_step_budget_drains_fully() {
        let mut graph: CallGraph<i64> = CallGraph::with_config(GraphConfig {
            step_budget: Some(0),
            ..GraphConfig::default()
        });
        graph
            .register(
                Func::new("f", ["x"], |a| Ok(*a.get("x")? + 3)),
                RegisterOptions::new(),
            )
            .unwrap();
        graph.rebuild(true).unwrap();
        graph.inject([("x", 1)]);

        assert_eq!(graph.pump().drain().unwrap(), 1);
        assert_eq!(graph.scope().get("f"), Some(&4));
    }

    #[test]
    fn written_revisions_are_reported() {
        let mut graph = chain();
        graph.inject([("x", 0)]);

        let steps: Vec<Step> = graph.pump().collect::<Result<_>>().unwrap();
        let (name, revision) = &steps[1].written[0];
        assert_eq!(name, "g");
        assert_eq!(graph.scope().revision("g"), Some(*revision));
    }
}
