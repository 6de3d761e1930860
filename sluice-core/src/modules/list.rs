use std::fmt;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Module, ModuleDesc, ModuleRegistry, Owned, Registrar, Value};
use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use crate::graph::{CallGraph, NodeHandle};

/// Encoding of a saved module list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    #[default]
    Json,
    MessagePack,
}

struct Entry {
    label: String,
    desc: ModuleDesc,
    module: Box<dyn Module>,
    owned: Owned,
}

/// An ordered list of modules sharing one graph.
///
/// Every change to the list rebuilds the graph with the configured mode.
pub struct ModuleList {
    registry: ModuleRegistry,
    entries: Vec<Entry>,
    graph: CallGraph<Value>,
}

impl ModuleList {
    pub fn new(registry: ModuleRegistry) -> Self {
        Self::with_config(registry, GraphConfig::default())
    }

    pub fn with_config(registry: ModuleRegistry, config: GraphConfig) -> Self {
        Self {
            registry,
            entries: Vec::new(),
            graph: CallGraph::with_config(config),
        }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &CallGraph<Value> {
        &self.graph
    }

    /// The underlying graph, for injecting values and pumping.
    pub fn graph_mut(&mut self) -> &mut CallGraph<Value> {
        &mut self.graph
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn module(&self, index: usize) -> Option<&dyn Module> {
        self.entries.get(index).map(|entry| entry.module.as_ref())
    }

    /// Instance labels in list order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.label.as_str())
    }

    /// Nodes owned by the module at `index`.
    pub fn handles(&self, index: usize) -> Option<&[NodeHandle]> {
        self.entries.get(index).map(|entry| entry.owned.handles.as_slice())
    }

    /// Instantiate a module, wire it in, restore its saved state and rebuild.
    ///
    /// On failure the module's nodes are removed again and the list is left
    /// as it was.
    pub fn add(&mut self, desc: ModuleDesc) -> Result<usize> {
        let (label, mut module) = self.registry.instantiate(&desc)?;

        let mut owned = Owned::default();
        let installed = {
            let mut registrar = Registrar::new(&mut self.graph, &mut owned);
            install(module.as_mut(), &desc, &mut registrar)
        };
        if let Err(err) = installed {
            warn!(label = %label, error = %err, "module install failed");
            detach(&mut self.graph, &owned);
            return Err(err);
        }

        self.entries.push(Entry {
            label,
            desc,
            module,
            owned,
        });

        if let Err(err) = self.graph.rebuild_default() {
            if let Some(entry) = self.entries.pop() {
                warn!(label = %entry.label, error = %err, "module rejected by rebuild");
                detach(&mut self.graph, &entry.owned);
            }
            return Err(err);
        }

        let index = self.entries.len() - 1;
        debug!(index, label = %self.entries[index].label, "module added");
        Ok(index)
    }

    /// Remove the module at `index` and its nodes, returning it with its
    /// description and current state. Values it wrote stay in the scope.
    pub fn remove(&mut self, index: usize) -> Result<(Box<dyn Module>, ModuleDesc)> {
        self.check_index(index)?;
        let desc = self.describe(&self.entries[index])?;
        let entry = self.entries.remove(index);
        detach(&mut self.graph, &entry.owned);
        self.graph.rebuild_default()?;

        debug!(index, label = %entry.label, "module removed");
        Ok((entry.module, desc))
    }

    /// Move the module at `start` to position `target`.
    ///
    /// Every module from the lower of the two positions on is torn down and
    /// re-added with its current state, so later registrations keep winning
    /// overwrites in the new order.
    pub fn move_module(&mut self, start: usize, target: usize) -> Result<()> {
        self.check_index(start)?;
        self.check_index(target)?;
        if start == target {
            return Ok(());
        }

        let first = start.min(target);
        let mut descs = self.entries[first..]
            .iter()
            .map(|entry| self.describe(entry))
            .collect::<Result<Vec<_>>>()?;

        while self.entries.len() > first {
            if let Some(entry) = self.entries.pop() {
                detach(&mut self.graph, &entry.owned);
            }
        }
        self.graph.rebuild_default()?;

        let moved = descs.remove(start - first);
        descs.insert(target - first, moved);
        for desc in descs {
            self.add(desc)?;
        }

        debug!(start, target, "module moved");
        Ok(())
    }

    /// Remove every module.
    pub fn clear(&mut self) -> Result<()> {
        for entry in self.entries.drain(..) {
            detach(&mut self.graph, &entry.owned);
        }
        self.graph.rebuild_default()
    }

    /// Descriptions of all modules with their current state.
    pub fn snapshot(&self) -> Result<Vec<ModuleDesc>> {
        self.entries.iter().map(|entry| self.describe(entry)).collect()
    }

    /// Write [`ModuleList::snapshot`] to `writer`.
    pub fn save<W: Write>(&self, mut writer: W, format: SnapshotFormat) -> Result<()> {
        let descs = self.snapshot()?;
        match format {
            SnapshotFormat::Json => serde_json::to_writer_pretty(&mut writer, &descs)?,
            SnapshotFormat::MessagePack => rmp_serde::encode::write_named(&mut writer, &descs)?,
        }
        writer.flush()?;

        debug!(modules = descs.len(), ?format, "module list saved");
        Ok(())
    }

    /// Append the modules saved in `reader`. Returns how many were added.
    pub fn load<R: Read>(&mut self, reader: R, format: SnapshotFormat) -> Result<usize> {
        let descs: Vec<ModuleDesc> = match format {
            SnapshotFormat::Json => serde_json::from_reader(reader)?,
            SnapshotFormat::MessagePack => rmp_serde::from_read(reader)?,
        };

        let count = descs.len();
        for desc in descs {
            self.add(desc)?;
        }

        debug!(modules = count, ?format, "module list loaded");
        Ok(count)
    }

    fn describe(&self, entry: &Entry) -> Result<ModuleDesc> {
        let mut desc = entry.desc.clone();
        let mut state = desc.state.take().unwrap_or_default();
        Module::serialize(entry.module.as_ref(), self.graph.scope(), &mut state)?;
        desc.state = (!state.is_empty()).then_some(state);
        Ok(desc)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.entries.len() {
            Ok(())
        } else {
            Err(GraphError::Module(format!(
                "no module at index {} (list has {})",
                index,
                self.entries.len()
            )))
        }
    }
}

impl fmt::Debug for ModuleList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleList")
            .field("registry", &self.registry)
            .field("modules", &self.labels().collect::<Vec<_>>())
            .finish()
    }
}

fn install(module: &mut dyn Module, desc: &ModuleDesc, registrar: &mut Registrar<'_>) -> Result<()> {
    module.install(registrar)?;
    if let Some(state) = &desc.state {
        module.deserialize(state, registrar)?;
    }
    Ok(())
}

fn detach(graph: &mut CallGraph<Value>, owned: &Owned) {
    for &handle in &owned.handles {
        if let Err(err) = graph.unregister(handle) {
            warn!(node = %handle, error = %err, "module node already gone");
        }
    }
    for mark in &owned.marks {
        graph.unmark_output(mark);
    }
}
