//! Graph configuration.

use serde::{Deserialize, Serialize};

/// Tunables for a [`CallGraph`](crate::graph::CallGraph).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Rebuild mode used by [`CallGraph::rebuild_default`] and by module
    /// lists: `true` pushes every eager node, `false` only follows marked
    /// outputs.
    ///
    /// [`CallGraph::rebuild_default`]: crate::graph::CallGraph::rebuild_default
    pub active: bool,

    /// Maximum number of nodes one pump cursor executes before it reports
    /// quiescence early. `None` or `Some(0)` drains completely.
    pub step_budget: Option<usize>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            active: true,
            step_budget: None,
        }
    }
}

impl GraphConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_push_and_drain_fully() {
        let config = GraphConfig::default();
        assert!(config.active);
        assert_eq!(config.step_budget, None);
    }

    #[test]
    fn json_fills_missing_fields() {
        let config = GraphConfig::from_json(r#"{ "step_budget": 8 }"#).unwrap();
        assert!(config.active);
        assert_eq!(config.step_budget, Some(8));

        let config = GraphConfig::from_json(r#"{ "active": false }"#).unwrap();
        assert!(!config.active);
        assert!(GraphConfig::from_json("[1]").is_err());
    }
}
