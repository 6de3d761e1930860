//! Modules
//!
//! A module is a reusable bundle of nodes plus the scope values that make up
//! its persistent state. Module lists keep an ordered set of modules on top
//! of one graph and rebuild it whenever the list changes.
//!
//! # Concepts
//!
//! ## Descriptions
//!
//! A [`ModuleDesc`] names a module `kind`, carries free-form parameters for
//! the factory and optionally a saved `state`. An ordered list of
//! descriptions is all a module list needs to recreate itself.
//!
//! ## Registry
//!
//! Modules are created by factories registered per kind in a
//! [`ModuleRegistry`]. Each instance gets a unique label from a process-wide
//! counter so log lines from repeated instances of one kind stay apart.
//!
//! ## State
//!
//! By default a module's state is the current value of every scope name it
//! lists in [`Module::autoserialize`]; restoring injects them back.

mod list;

pub use list::{ModuleList, SnapshotFormat};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::graph::{CallGraph, Computation, NodeHandle, RegisterOptions, Scope};

/// Values stored in the scope of a module-managed graph.
pub type Value = serde_json::Value;

/// Serialized module state: scope name → value.
pub type State = serde_json::Map<String, Value>;

/// Counter for generating unique module instance labels.
static MODULES_LOADED: AtomicU64 = AtomicU64::new(0);

fn next_instance() -> u64 {
    MODULES_LOADED.fetch_add(1, Ordering::Relaxed)
}

/// Description of one module in a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDesc {
    /// Factory to create the module with.
    pub kind: String,

    /// State saved by the module, restored when it is added.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,

    /// Any other fields, handed to the factory untouched.
    #[serde(flatten)]
    pub params: State,
}

impl ModuleDesc {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            state: None,
            params: State::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_state(mut self, state: State) -> Self {
        self.state = Some(state);
        self
    }

    /// A string parameter, or a module error naming the missing key.
    pub fn str_param(&self, key: &str) -> Result<&str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| GraphError::Module(format!("'{}' needs a string '{}'", self.kind, key)))
    }
}

/// Nodes and output marks a module added to the graph.
#[derive(Debug, Default)]
pub(crate) struct Owned {
    pub(crate) handles: Vec<NodeHandle>,
    pub(crate) marks: Vec<String>,
}

/// Handle through which a module wires itself into the graph.
///
/// Every node registered and every mark added here is recorded so the
/// owning list can withdraw them when the module goes away.
pub struct Registrar<'a> {
    graph: &'a mut CallGraph<Value>,
    owned: &'a mut Owned,
}

impl<'a> Registrar<'a> {
    pub(crate) fn new(graph: &'a mut CallGraph<Value>, owned: &'a mut Owned) -> Self {
        Self { graph, owned }
    }

    /// Register a node owned by the module.
    pub fn register<C>(&mut self, computation: C, options: RegisterOptions) -> Result<NodeHandle>
    where
        C: Computation<Value> + 'static,
    {
        let handle = self.graph.register(computation, options)?;
        self.owned.handles.push(handle);
        Ok(handle)
    }

    pub fn inject(&mut self, name: impl Into<String>, value: Value) {
        self.graph.inject([(name.into(), value)]);
    }

    /// Mark an output for as long as the module is in its list. Marks that
    /// were already present stay with whoever made them.
    pub fn mark_output(&mut self, name: impl Into<String>) {
        let name = name.into();
        if self.graph.marked_outputs().any(|marked| marked == name) {
            return;
        }
        self.graph.mark_output(name.clone());
        self.owned.marks.push(name);
    }

    pub fn scope(&self) -> &Scope<Value> {
        self.graph.scope()
    }

    /// Nodes registered through this registrar so far.
    pub fn handles(&self) -> &[NodeHandle] {
        &self.owned.handles
    }
}

/// A bundle of nodes managed by a [`ModuleList`].
pub trait Module {
    /// Human readable name.
    fn name(&self) -> &str;

    /// Scope names saved and restored by the default (de)serialization.
    fn autoserialize(&self) -> &[String] {
        &[]
    }

    /// Register the module's nodes.
    fn install(&mut self, registrar: &mut Registrar<'_>) -> Result<()>;

    /// Write the module's state.
    fn serialize(&self, scope: &Scope<Value>, state: &mut State) -> Result<()> {
        for name in self.autoserialize() {
            if let Some(value) = scope.get(name) {
                state.insert(name.clone(), value.clone());
            }
        }
        Ok(())
    }

    /// Restore state written by [`Module::serialize`].
    fn deserialize(&mut self, state: &State, registrar: &mut Registrar<'_>) -> Result<()> {
        for name in self.autoserialize() {
            if let Some(value) = state.get(name) {
                registrar.inject(name.clone(), value.clone());
            }
        }
        Ok(())
    }
}

type Factory = Box<dyn Fn(&ModuleDesc) -> Result<Box<dyn Module>>>;

/// Factories for every module kind a list can load.
#[derive(Default)]
pub struct ModuleRegistry {
    factories: IndexMap<String, Factory>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for `kind`, replacing any earlier one.
    pub fn register_kind<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ModuleDesc) -> Result<Box<dyn Module>> + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    /// Builder-style [`ModuleRegistry::register_kind`].
    pub fn with_kind<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ModuleDesc) -> Result<Box<dyn Module>> + 'static,
    {
        self.register_kind(kind, factory);
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Create a module from its description.
    ///
    /// Returns the module and its unique instance label.
    pub fn instantiate(&self, desc: &ModuleDesc) -> Result<(String, Box<dyn Module>)> {
        let factory = self
            .factories
            .get(&desc.kind)
            .ok_or_else(|| GraphError::Module(format!("unknown module kind '{}'", desc.kind)))?;
        let module = factory(desc)?;
        let label = format!("{}#{}", desc.kind, next_instance());
        debug!(label = %label, name = module.name(), "module instantiated");
        Ok((label, module))
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
