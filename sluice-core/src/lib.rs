//! Sluice Core
//!
//! This crate provides an incremental dataflow engine. Computations are wired
//! together implicitly by the names of the values they read and write, and
//! the engine works out which of them must re-run, and in which order, when
//! values change.
//!
//! It implements:
//!
//! - Name-based wiring with transitive reverse-dependency caches
//! - Push (eager) and pull (as-needed) activation, with output marking and
//!   last-registration-wins overwrite resolution
//! - A stepwise scheduler ("pump") that re-runs only the nodes whose inputs
//!   changed
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: scope, nodes, dependency index, activation and the pump
//! - `modules`: ordered lists of reusable node bundles with saved state
//! - `export`: read-only node/edge projection for graph tooling
//! - `config` / `error`: configuration and error types
//!
//! # Example
//!
//! ```rust
//! use sluice_core::graph::{CallGraph, Func, RegisterOptions};
//!
//! let mut graph: CallGraph<i64> = CallGraph::new();
//! graph.register(Func::new("f", ["x"], |a| Ok(*a.get("x")? + 3)), RegisterOptions::new())?;
//! graph.register(Func::new("g", ["f"], |a| Ok(*a.get("f")? * 7)), RegisterOptions::new())?;
//! graph.rebuild(true)?;
//!
//! graph.inject([("x", 3)]);
//! graph.pump_all()?;
//! assert_eq!(graph.get("g"), Some(&42));
//! # Ok::<(), sluice_core::GraphError>(())
//! ```

pub mod config;
pub mod error;
pub mod export;
pub mod graph;
pub mod modules;

pub use config::GraphConfig;
pub use error::{ComputeError, GraphError, RegistrationError, Result};
pub use graph::{CallGraph, Func, Mode, NodeHandle, RegisterOptions};
