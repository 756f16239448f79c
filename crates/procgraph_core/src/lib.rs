// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node graph compiler for procedural functions.
//!
//! A document is a set of [`Function`] graphs. Each graph is built from typed
//! nodes joined by data and control connections, and can be:
//! - interpreted on the CPU, producing a [`Value`]
//! - compiled to a GLSL compute program and run through a [`ShaderBackend`]
//!
//! ## Architecture
//!
//! - [`graph`] owns nodes, connections, variables and parameters
//! - [`evaluation`] holds the contexts node kinds see while evaluating, typing and emitting
//! - [`schedule`] orders nodes along control flow and tracks dirty regions
//! - [`nodes`] is the built-in node library
//! - [`graphs`] layers functions, calls and code generation on top
//! - [`snapshot`] persists documents as RON

pub mod connection;
pub mod evaluation;
pub mod graph;
pub mod graphs;
pub mod node;
pub mod nodes;
pub mod parameter;
pub mod port;
pub mod schedule;
pub mod settings;
pub mod shader;
pub mod snapshot;
pub mod value;

pub use connection::Connection;
pub use evaluation::{CallStack, EmitContext, EvalContext, EvalEnv, SampleSource, TypeContext};
pub use graph::{ConnectionError, Graph, GraphError, GraphEvent};
pub use graphs::function::{Function, FunctionId, SharedFunction};
pub use graphs::glsl::OutputTarget;
pub use node::{Node, NodeId, NodeKind, NodeRegistry, NodeType, PropertyValue};
pub use port::{InputRef, OutputRef, PortLayout, PortType};
pub use settings::GraphSettings;
pub use shader::{BackendError, GpuContext, ShaderBackend, Uniform};
pub use snapshot::{FunctionSnapshot, GraphSnapshot};
pub use value::{Value, ValueError};

/// Result alias for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;
