//! Graph Nodes
//!
//! This module defines the units of computation that live in the graph and
//! the declarations they are registered from.
//!
//! A node never holds references to other nodes. It names the scope values
//! it reads (`inputs`) and writes (`outputs`); the wiring between nodes is
//! derived from those names on every rebuild.

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use super::scope::{Revision, Scope};
use crate::error::{ComputeError, RegistrationError};

/// Stable identifier for a registered node.
///
/// Handles are handed out in registration order by the owning graph, so
/// comparing two handles compares their registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeHandle(u64);

impl NodeHandle {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw sequence number.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for NodeHandle {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a node becomes live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Push: live on an active rebuild unless shadowed.
    #[default]
    Eager,

    /// Pull ("as needed"): live only when a marked output or a live
    /// consumer needs one of its outputs.
    Lazy,
}

/// Values returned by one invocation, one per output name.
pub type Outputs<V> = SmallVec<[V; 1]>;

/// Arguments gathered from the scope for one invocation.
///
/// Values are addressed by the computation's own parameter names, even when
/// a parameter was remapped to a differently named scope value.
pub struct Args<'a, V> {
    params: &'a [String],
    values: Vec<&'a V>,
}

impl<'a, V> Args<'a, V> {
    pub(crate) fn new(params: &'a [String], values: Vec<&'a V>) -> Self {
        debug_assert_eq!(params.len(), values.len());
        Self { params, values }
    }

    /// Look up an argument by parameter name.
    pub fn get(&self, param: &str) -> Result<&'a V, ComputeError> {
        self.params
            .iter()
            .position(|p| p == param)
            .map(|i| self.values[i])
            .ok_or_else(|| ComputeError::UnknownParameter(param.to_string()))
    }

    /// Argument at a parameter position.
    pub fn at(&self, index: usize) -> Option<&'a V> {
        self.values.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate `(parameter, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a V)> + '_ {
        self.params
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}

/// A unit of computation that can be registered with a graph.
///
/// Implementors declare their parameter names up front; the graph reads
/// those names from the scope and hands them over as [`Args`].
pub trait Computation<V> {
    /// Identifying name, used as the default output name.
    fn name(&self) -> &str;

    /// Declared parameter names, in call order.
    fn params(&self) -> &[String];

    /// Run the computation. Must return one value per output of the node.
    fn call(&mut self, args: &Args<'_, V>) -> Result<Outputs<V>, ComputeError>;
}

type Body<V> = Box<dyn FnMut(&Args<'_, V>) -> Result<Outputs<V>, ComputeError>>;

/// A [`Computation`] backed by a closure.
///
/// # Example
///
/// ```rust
/// use sluice_core::graph::Func;
///
/// let add_three: Func<i64> = Func::new("f", ["x"], |args| Ok(*args.get("x")? + 3));
/// ```
pub struct Func<V> {
    name: String,
    params: Vec<String>,
    body: Body<V>,
}

impl<V: 'static> Func<V> {
    /// A single-output computation.
    pub fn new<N, P, F>(name: N, params: P, mut body: F) -> Self
    where
        N: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
        F: FnMut(&Args<'_, V>) -> Result<V, ComputeError> + 'static,
    {
        Self {
            name: name.into(),
            params: params.into_iter().map(Into::into).collect(),
            body: Box::new(move |args: &Args<'_, V>| body(args).map(|v| smallvec![v])),
        }
    }

    /// A computation producing one value per declared output, in order.
    pub fn multi<N, P, F>(name: N, params: P, mut body: F) -> Self
    where
        N: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
        F: FnMut(&Args<'_, V>) -> Result<Vec<V>, ComputeError> + 'static,
    {
        Self {
            name: name.into(),
            params: params.into_iter().map(Into::into).collect(),
            body: Box::new(move |args: &Args<'_, V>| body(args).map(SmallVec::from_vec)),
        }
    }
}

impl<V> Computation<V> for Func<V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> &[String] {
        &self.params
    }

    fn call(&mut self, args: &Args<'_, V>) -> Result<Outputs<V>, ComputeError> {
        (self.body)(args)
    }
}

impl<V> fmt::Debug for Func<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// Options accepted by [`CallGraph::register`](super::CallGraph::register).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterOptions {
    outputs: Option<Vec<String>>,
    as_needed: bool,
    remap: IndexMap<String, String>,
}

impl RegisterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit output names. Without this the node writes a single value
    /// named after the computation.
    pub fn outputs<I>(mut self, outputs: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.outputs = Some(outputs.into_iter().map(Into::into).collect());
        self
    }

    /// Register the node in [`Mode::Lazy`].
    pub fn as_needed(mut self, as_needed: bool) -> Self {
        self.as_needed = as_needed;
        self
    }

    /// Read parameter `param` from the scope value `name` instead.
    pub fn remap(mut self, param: impl Into<String>, name: impl Into<String>) -> Self {
        self.remap.insert(param.into(), name.into());
        self
    }
}

/// A registered node.
pub struct Node<V> {
    handle: NodeHandle,
    name: String,
    params: Vec<String>,
    inputs: Vec<String>,
    outputs: SmallVec<[String; 1]>,
    mode: Mode,
    computation: Box<dyn Computation<V>>,

    /// Input revisions used by the last successful run, aligned with
    /// `inputs`. `None` until the node has run since the last rebuild.
    last_seen: Option<Vec<Option<Revision>>>,
}

impl<V> Node<V> {
    /// Validate a declaration and build the node.
    pub(crate) fn new(
        handle: NodeHandle,
        computation: Box<dyn Computation<V>>,
        options: RegisterOptions,
    ) -> Result<Self, RegistrationError> {
        let name = computation.name().to_string();
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }

        let params = computation.params().to_vec();
        let mut seen = HashSet::new();
        for param in &params {
            if param.is_empty() {
                return Err(RegistrationError::EmptyParameter);
            }
            if !seen.insert(param.as_str()) {
                return Err(RegistrationError::DuplicateParameter(param.clone()));
            }
        }

        if let Some(unknown) = options.remap.keys().find(|p| !seen.contains(p.as_str())) {
            return Err(RegistrationError::RemapUnknownParameter(unknown.clone()));
        }

        let mut inputs: Vec<String> = Vec::with_capacity(params.len());
        for param in &params {
            let input = options.remap.get(param).unwrap_or(param);
            if input.is_empty() {
                return Err(RegistrationError::EmptyParameter);
            }
            if let Some(i) = inputs.iter().position(|existing| existing == input) {
                return Err(RegistrationError::RemapCollision {
                    first: params[i].clone(),
                    second: param.clone(),
                    name: input.clone(),
                });
            }
            inputs.push(input.clone());
        }

        let outputs: SmallVec<[String; 1]> = match options.outputs {
            Some(outputs) if outputs.is_empty() => return Err(RegistrationError::NoOutputs),
            Some(outputs) => SmallVec::from_vec(outputs),
            None => smallvec![name.clone()],
        };
        let mut seen_outputs = HashSet::new();
        for output in &outputs {
            if output.is_empty() {
                return Err(RegistrationError::EmptyOutput);
            }
            if !seen_outputs.insert(output.as_str()) {
                return Err(RegistrationError::DuplicateOutput(output.clone()));
            }
        }

        Ok(Self {
            handle,
            name,
            params,
            inputs,
            outputs,
            mode: if options.as_needed {
                Mode::Lazy
            } else {
                Mode::Eager
            },
            computation,
            last_seen: None,
        })
    }

    /// Get the node's handle.
    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    /// The computation's identifying name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scope names this node reads, after remapping.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Scope names this node writes.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Whether the node has completed a run since the last rebuild.
    pub fn has_run(&self) -> bool {
        self.last_seen.is_some()
    }

    /// Check whether the node must run against the given scope.
    ///
    /// A node is due when it has not run since the last rebuild, or when any
    /// input was written after the revision the last run consumed.
    pub fn is_due<T>(&self, scope: &Scope<T>) -> bool {
        match &self.last_seen {
            None => true,
            Some(seen) => self
                .inputs
                .iter()
                .zip(seen)
                .any(|(input, &seen)| scope.revision(input) > seen),
        }
    }

    /// Forget the last run so the node is due again.
    pub(crate) fn reset(&mut self) {
        self.last_seen = None;
    }

    /// Run the computation against the scope.
    ///
    /// Returns the produced values and the input revisions they were computed
    /// from. Nothing is recorded here; the caller commits a successful run
    /// with [`Node::mark_ran`].
    pub(crate) fn invoke(
        &mut self,
        scope: &Scope<V>,
    ) -> Result<(Outputs<V>, Vec<Option<Revision>>), ComputeError> {
        let mut values = Vec::with_capacity(self.inputs.len());
        let mut revisions = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let value = scope
                .get(input)
                .ok_or_else(|| ComputeError::MissingInput(input.clone()))?;
            values.push(value);
            revisions.push(scope.revision(input));
        }

        let args = Args::new(&self.params, values);
        let produced = self.computation.call(&args)?;
        if produced.len() != self.outputs.len() {
            return Err(ComputeError::OutputArity {
                expected: self.outputs.len(),
                actual: produced.len(),
            });
        }
        Ok((produced, revisions))
    }

    /// Record the input revisions of a successful run.
    pub(crate) fn mark_ran(&mut self, revisions: Vec<Option<Revision>>) {
        self.last_seen = Some(revisions);
    }
}

impl<V> fmt::Debug for Node<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("mode", &self.mode)
            .field("has_run", &self.has_run())
            .finish()
    }
}
