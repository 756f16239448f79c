// SPDX-License-Identifier: MIT OR Apache-2.0
//! Serializable snapshots of graphs and functions.
//!
//! A snapshot stores node types and property values rather than node kinds, so
//! restoring goes back through the [`NodeRegistry`]. Library functions are
//! restored in two passes: every function's nodes first, then call binding,
//! then connections. Binding rebuilds a call node's argument inputs, so the
//! edges into those inputs can only be replayed afterwards.

use crate::connection::Connection;
use crate::graph::{Graph, GraphError};
use crate::graphs::function::{Function, FunctionId, SharedFunction};
use crate::node::{Node, NodeId, NodeRegistry, PropertyValue};
use crate::parameter::{ParameterData, ParameterValue};
use crate::port::PortType;
use crate::settings::GraphSettings;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A node's type and editable state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Instance ID
    pub id: NodeId,
    /// Registry identifier
    pub type_name: String,
    /// Display name
    pub name: String,
    /// Editor position
    pub position: [f32; 2],
    /// Property values in schema order
    pub properties: Vec<(String, PropertyValue)>,
}

impl NodeSnapshot {
    /// Capture a node
    pub fn capture(node: &Node) -> Self {
        Self {
            id: node.id,
            type_name: node.type_name().to_string(),
            name: node.name.clone(),
            position: node.position,
            properties: node
                .kind()
                .properties()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }
}

/// A parameter, with a function-valued parameter stored as its function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    /// Display name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Value type
    pub ty: PortType,
    /// Constant value
    #[serde(default)]
    pub value: Option<Value>,
    /// Driving function
    #[serde(default)]
    pub function: Option<Box<FunctionSnapshot>>,
    /// Editor range minimum
    pub min: f32,
    /// Editor range maximum
    pub max: f32,
}

impl ParameterSnapshot {
    /// Capture a parameter; a function that is busy is stored without its value
    pub fn capture(param: &ParameterValue) -> Self {
        let (value, function) = match &param.data {
            ParameterData::Constant(v) => (Some(*v), None),
            ParameterData::Function(f) => match f.try_lock() {
                Some(f) => (None, Some(Box::new(FunctionSnapshot::capture(&f)))),
                None => {
                    tracing::warn!("Parameter {:?} function is busy; not captured", param.name);
                    (None, None)
                }
            },
        };
        Self {
            name: param.name.clone(),
            description: param.description.clone(),
            ty: param.ty,
            value,
            function,
            min: param.min,
            max: param.max,
        }
    }

    /// Rebuild the parameter; calls inside a driving function bind against `library`
    pub fn restore(
        &self,
        registry: &Arc<NodeRegistry>,
        library: &[SharedFunction],
    ) -> Result<ParameterValue, GraphError> {
        let data = match &self.function {
            Some(function) => {
                ParameterData::Function(SharedFunction::new(function.restore(registry, library)?))
            }
            None => ParameterData::Constant(
                self.value
                    .map_or_else(|| Value::default_for(self.ty), |v| v.coerce_or_default(self.ty)),
            ),
        };
        Ok(ParameterValue {
            name: self.name.clone(),
            description: self.description.clone(),
            ty: self.ty,
            data,
            min: self.min,
            max: self.max,
        })
    }
}

/// A whole graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Graph name
    pub name: String,
    /// Settings
    #[serde(default)]
    pub settings: GraphSettings,
    /// Nodes in insertion order
    pub nodes: Vec<NodeSnapshot>,
    /// Edges with their downstream order
    pub connections: Vec<Connection>,
    /// Promoted parameters by key
    #[serde(default)]
    pub parameters: Vec<(String, ParameterSnapshot)>,
    /// Custom parameters
    #[serde(default)]
    pub custom_parameters: Vec<ParameterSnapshot>,
    /// Function library
    #[serde(default)]
    pub functions: Vec<FunctionSnapshot>,
}

impl GraphSnapshot {
    /// Capture a graph. Functions locked elsewhere are skipped with a warning.
    pub fn capture(graph: &Graph) -> Self {
        let functions = graph
            .functions()
            .iter()
            .filter_map(|shared| match shared.try_lock() {
                Some(f) => Some(FunctionSnapshot::capture(&f)),
                None => {
                    tracing::warn!("Function {} is busy; not captured", shared.id());
                    None
                }
            })
            .collect();
        Self {
            name: graph.name.clone(),
            settings: graph.settings().clone(),
            nodes: graph.nodes().map(NodeSnapshot::capture).collect(),
            connections: graph.connections(),
            parameters: graph
                .parameters()
                .map(|(key, p)| (key.clone(), ParameterSnapshot::capture(p)))
                .collect(),
            custom_parameters: graph
                .custom_parameters()
                .iter()
                .map(ParameterSnapshot::capture)
                .collect(),
            functions,
        }
    }

    /// Rebuild the graph with the built-in node library
    pub fn restore(&self) -> Result<Graph, GraphError> {
        self.restore_with(NodeRegistry::library())
    }

    /// Rebuild the graph with a custom node factory
    pub fn restore_with(&self, registry: Arc<NodeRegistry>) -> Result<Graph, GraphError> {
        let mut graph = Graph::with_registry(self.name.clone(), registry);
        self.restore_library(&mut graph)?;
        self.restore_nodes(&mut graph)?;
        let library = graph.functions().to_vec();
        self.restore_parameters(&mut graph, &library)?;
        self.restore_connections(&mut graph)?;
        graph.set_settings(self.settings.clone());
        Ok(graph)
    }

    /// Serialize to RON format
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }

    /// Deserialize from RON format
    pub fn from_ron(s: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(s)
    }

    fn restore_library(&self, graph: &mut Graph) -> Result<(), GraphError> {
        let mut added = Vec::with_capacity(self.functions.len());
        for snapshot in &self.functions {
            let function = snapshot.restore_unconnected(graph.registry())?;
            added.push(graph.add_function(function));
        }
        let unresolved = graph.rebind_calls();
        if !unresolved.is_empty() {
            tracing::warn!("{} restored call node(s) have no target", unresolved.len());
        }
        let library = graph.functions().to_vec();
        for (shared, snapshot) in added.iter().zip(&self.functions) {
            let mut function = shared.lock();
            snapshot.finish(&mut function, &library)?;
        }
        Ok(())
    }

    fn restore_nodes(&self, graph: &mut Graph) -> Result<(), GraphError> {
        for snapshot in &self.nodes {
            let mut node = graph
                .registry()
                .create_node(&snapshot.type_name)
                .ok_or_else(|| GraphError::UnknownNodeType(snapshot.type_name.clone()))?;
            node.id = snapshot.id;
            node.name = snapshot.name.clone();
            node.position = snapshot.position;
            let id = graph.insert_node(node)?;
            for (name, value) in &snapshot.properties {
                graph.set_property(id, name, value.clone())?;
            }
        }
        Ok(())
    }

    fn restore_parameters(
        &self,
        graph: &mut Graph,
        library: &[SharedFunction],
    ) -> Result<(), GraphError> {
        let registry = graph.registry().clone();
        for (key, snapshot) in &self.parameters {
            let param = snapshot.restore(&registry, library)?;
            graph.insert_parameter(key.clone(), param);
        }
        for snapshot in &self.custom_parameters {
            let param = snapshot.restore(&registry, library)?;
            graph.add_custom_parameter(param);
        }
        Ok(())
    }

    fn restore_connections(&self, graph: &mut Graph) -> Result<(), GraphError> {
        let mut connections = self.connections.clone();
        connections.sort_by_key(|c| c.order);
        for c in connections {
            graph.connect_ordered(c.from(), c.to(), c.order)?;
        }
        Ok(())
    }
}

/// A function: its graph plus identity and designated nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSnapshot {
    /// Stable function ID
    pub id: FunctionId,
    /// Function name
    pub name: String,
    /// Entry marker
    #[serde(default)]
    pub entry: Option<NodeId>,
    /// Output node
    #[serde(default)]
    pub output: Option<NodeId>,
    /// Body
    pub graph: GraphSnapshot,
}

impl FunctionSnapshot {
    /// Capture a function
    pub fn capture(function: &Function) -> Self {
        Self {
            id: function.id(),
            name: function.name().to_string(),
            entry: function.entry(),
            output: function.output(),
            graph: GraphSnapshot::capture(function.graph()),
        }
    }

    /// Rebuild a standalone function whose calls bind against `library`
    pub fn restore(
        &self,
        registry: &Arc<NodeRegistry>,
        library: &[SharedFunction],
    ) -> Result<Function, GraphError> {
        let mut function = self.restore_unconnected(registry)?;
        function.rebind_calls(library);
        self.finish(&mut function, library)?;
        Ok(function)
    }

    fn restore_unconnected(&self, registry: &Arc<NodeRegistry>) -> Result<Function, GraphError> {
        let mut function = Function::with_id(self.id, self.name.clone());
        let graph = function.graph_mut();
        *graph = Graph::with_registry(self.graph.name.clone(), registry.clone());
        self.graph.restore_library(graph)?;
        self.graph.restore_nodes(graph)?;
        Ok(function)
    }

    fn finish(&self, function: &mut Function, library: &[SharedFunction]) -> Result<(), GraphError> {
        let graph = function.graph_mut();
        self.graph.restore_parameters(graph, library)?;
        self.graph.restore_connections(graph)?;
        graph.set_settings(self.graph.settings.clone());
        function.set_output(self.output);
        if function.entry() != self.entry {
            tracing::warn!(
                "Function {:?} entry changed on restore: {:?} -> {:?}",
                self.name,
                self.entry,
                function.entry()
            );
        }
        Ok(())
    }
}
