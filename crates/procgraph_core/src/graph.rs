// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure containing nodes and connections.
//!
//! The graph is an arena: it owns every node, and nodes refer to each other only
//! through [`OutputRef`]/[`InputRef`] handles resolved here. Both sides of an edge
//! are stored (the input's upstream and the output's downstream list) and are
//! always updated together.

use crate::connection::Connection;
use crate::evaluation::{CallStack, EmitContext, EvalContext, EvalEnv, TypeContext};
use crate::graphs::function::{Function, FunctionId, SharedFunction};
use crate::node::{Node, NodeId, NodeKind, NodeRegistry, NodeRole, PropertyError, PropertyValue};
use crate::parameter::{
    parameter_key, ParameterData, ParameterScope, ParameterValue, ResolvedParameter,
    CUSTOM_PREFIX, PROMOTED_PREFIX,
};
use crate::port::{InputPort, InputRef, OutputRef, PortType};
use crate::schedule::{PollStatus, Scheduler, Topology};
use crate::settings::GraphSettings;
use crate::value::Value;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A scoped variable
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Declared type
    pub ty: PortType,
    /// Current value, absent until assigned
    pub value: Option<Value>,
}

/// Structural notification sent to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    /// A node was added
    NodeAdded(NodeId),
    /// A node was removed
    NodeRemoved(NodeId),
    /// An edge was formed
    Connected {
        /// Source output
        from: OutputRef,
        /// Target input
        to: InputRef,
    },
    /// An edge was removed
    Disconnected {
        /// Source output
        from: OutputRef,
        /// Target input
        to: InputRef,
    },
    /// An argument declaration was added
    ArgAdded(NodeId),
    /// An argument declaration was removed
    ArgRemoved(NodeId),
    /// A function's designated output changed
    OutputSet(Option<NodeId>),
    /// A parameter was created or changed
    ParameterChanged(String),
    /// A parameter was removed
    ParameterRemoved(String),
    /// A function was added to the library
    FunctionAdded(FunctionId),
    /// A function was removed from the library
    FunctionRemoved(FunctionId),
    /// A function-valued parameter was dropped; its GPU program can be released
    FunctionDisposed(FunctionId),
    /// A scheduled evaluation pass drained
    EvaluationFinished,
}

/// Error when creating a connection
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Output port not found
    #[error("Output port not found: {0:?}")]
    OutputNotFound(OutputRef),

    /// Input port not found
    #[error("Input port not found: {0:?}")]
    InputNotFound(InputRef),

    /// Port types do not intersect
    #[error("Incompatible port types: {output:?} -> {input:?}")]
    IncompatiblePorts {
        /// Output type
        output: PortType,
        /// Accepted input types
        input: PortType,
    },

    /// Self-loop not allowed
    #[error("Self-loop not allowed")]
    SelfLoop,
}

/// Error from graph operations
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Node ID already present
    #[error("Duplicate node: {0}")]
    DuplicateNode(NodeId),

    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Type ID not registered
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Property access failed
    #[error("Property error on {node}: {source}")]
    Property {
        /// Node ID
        node: NodeId,
        /// Cause
        source: PropertyError,
    },

    /// Property has no promotion metadata
    #[error("Property {property} of {node} can not be promoted")]
    NotPromotable {
        /// Node ID
        node: NodeId,
        /// Property name
        property: String,
    },

    /// No parameter under that key
    #[error("Parameter not found: {0}")]
    ParameterNotFound(String),

    /// Function not in the library
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    /// Function is locked by an evaluation in progress
    #[error("Function is busy: {0}")]
    FunctionBusy(String),

    /// Node is not a call node
    #[error("Node {0} is not a call node")]
    NotACall(NodeId),

    /// Connection failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Snapshot could not be read or written
    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

/// Owned evaluation environment for a root graph
#[derive(Debug)]
pub struct GraphEnv {
    library: Vec<SharedFunction>,
    settings: GraphSettings,
    params: ParameterScope,
    stack: CallStack,
}

impl GraphEnv {
    /// Borrow as an [`EvalEnv`]
    pub fn env(&self) -> EvalEnv<'_> {
        EvalEnv::new(&self.library, &self.settings, &self.params, &self.stack)
    }

    /// Resolved parameters
    pub fn params(&self) -> &ParameterScope {
        &self.params
    }
}

/// A node graph
#[derive(Debug)]
pub struct Graph {
    /// Graph name
    pub name: String,
    nodes: IndexMap<NodeId, Node>,
    variables: IndexMap<String, Variable>,
    parameters: IndexMap<String, ParameterValue>,
    custom_parameters: Vec<ParameterValue>,
    functions: Vec<SharedFunction>,
    settings: GraphSettings,
    registry: Arc<NodeRegistry>,
    subscribers: Vec<mpsc::UnboundedSender<GraphEvent>>,
    revision: u64,
    content_revision: u64,
    scheduler: Scheduler,
}

impl Graph {
    /// Create a new empty graph using the built-in node library
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_registry(name, NodeRegistry::library())
    }

    /// Create a new empty graph with a custom node factory
    pub fn with_registry(name: impl Into<String>, registry: Arc<NodeRegistry>) -> Self {
        Self {
            name: name.into(),
            nodes: IndexMap::new(),
            variables: IndexMap::new(),
            parameters: IndexMap::new(),
            custom_parameters: Vec::new(),
            functions: Vec::new(),
            settings: GraphSettings::default(),
            registry,
            subscribers: Vec::new(),
            revision: 0,
            content_revision: 0,
            scheduler: Scheduler::new(),
        }
    }

    /// Node factory bound to this graph
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Graph settings
    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    /// Replace the graph settings
    pub fn set_settings(&mut self, settings: GraphSettings) {
        self.settings = settings;
        self.content_revision += 1;
    }

    /// Counter bumped on every structural edit
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Counter bumped on every property or parameter edit
    pub fn content_revision(&self) -> u64 {
        self.content_revision
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Receive structural notifications
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<GraphEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub(crate) fn emit(&mut self, event: GraphEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Create a node from a registered type and add it
    pub fn create_node(&mut self, type_id: &str) -> Result<NodeId, GraphError> {
        let node = self
            .registry
            .create_node(type_id)
            .ok_or_else(|| GraphError::UnknownNodeType(type_id.to_string()))?;
        Ok(self.attach(node))
    }

    /// Add a node built from a kind
    pub fn add_node(&mut self, kind: impl NodeKind + 'static) -> NodeId {
        let name = self
            .registry
            .get(kind.type_name())
            .map_or_else(|| kind.type_name().to_string(), |t| t.name.clone());
        self.attach(Node::new(Box::new(kind)).with_name(name))
    }

    /// Add an existing node, e.g. one detached from another graph
    pub fn insert_node(&mut self, node: Node) -> Result<NodeId, GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        Ok(self.attach(node))
    }

    fn attach(&mut self, mut node: Node) -> NodeId {
        let id = node.id;
        node.scheduled = false;
        let role = node.role();
        self.nodes.insert(id, node);
        self.revision += 1;
        self.emit(GraphEvent::NodeAdded(id));
        if role == NodeRole::Argument {
            self.emit(GraphEvent::ArgAdded(id));
        }
        id
    }

    /// Remove a node, detaching its edges and promoted parameters
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        if !self.nodes.contains_key(&node_id) {
            return None;
        }
        self.disconnect_node(node_id);

        let prefix = format!("{node_id}.");
        let keys: Vec<String> = self
            .parameters
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in keys {
            self.remove_parameter(&key);
        }

        let node = self.nodes.shift_remove(&node_id)?;
        self.revision += 1;
        self.emit(GraphEvent::NodeRemoved(node_id));
        if node.role() == NodeRole::Argument {
            self.emit(GraphEvent::ArgRemoved(node_id));
        }
        Some(node)
    }

    /// Get a node by ID
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get all nodes, in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Get all node IDs
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph owns this node
    pub fn contains_node(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Mutable access to a node's concrete kind
    pub fn kind_mut<T: NodeKind + 'static>(&mut self, node_id: NodeId) -> Option<&mut T> {
        if self.nodes.get(&node_id)?.downcast::<T>().is_none() {
            return None;
        }
        self.content_revision += 1;
        self.nodes.get_mut(&node_id)?.downcast_mut::<T>()
    }

    /// Read a property
    pub fn property(&self, node_id: NodeId, name: &str) -> Option<PropertyValue> {
        self.nodes
            .get(&node_id)?
            .kind
            .properties()
            .into_iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    /// Write a property
    pub fn set_property(
        &mut self,
        node_id: NodeId,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        node.kind
            .set_property(name, value)
            .map_err(|source| GraphError::Property {
                node: node_id,
                source,
            })?;
        self.content_revision += 1;
        Ok(())
    }

    /// Rename a node
    pub fn rename_node(&mut self, node_id: NodeId, name: impl Into<String>) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.name = name.into();
        }
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Connect an output to an input, replacing the input's previous upstream
    pub fn connect(&mut self, from: OutputRef, to: InputRef) -> Result<(), ConnectionError> {
        self.connect_inner(from, to, None)
    }

    /// Connect, inserting at `order` in the output's downstream list
    pub fn connect_ordered(
        &mut self,
        from: OutputRef,
        to: InputRef,
        order: usize,
    ) -> Result<(), ConnectionError> {
        self.connect_inner(from, to, Some(order))
    }

    fn connect_inner(
        &mut self,
        from: OutputRef,
        to: InputRef,
        order: Option<usize>,
    ) -> Result<(), ConnectionError> {
        if from.node == to.node {
            return Err(ConnectionError::SelfLoop);
        }
        let source = self
            .nodes
            .get(&from.node)
            .ok_or(ConnectionError::NodeNotFound(from.node))?;
        let output = source
            .output(from.port)
            .ok_or(ConnectionError::OutputNotFound(from))?
            .declared();
        let target = self
            .nodes
            .get(&to.node)
            .ok_or(ConnectionError::NodeNotFound(to.node))?;
        let input = target
            .input(to.port)
            .ok_or(ConnectionError::InputNotFound(to))?;

        if !input.accepted.intersects(output) {
            return Err(ConnectionError::IncompatiblePorts {
                output,
                input: input.accepted,
            });
        }
        if input.upstream() == Some(from) {
            return Ok(());
        }
        if input.is_connected() {
            self.disconnect(to);
        }

        if let Some(port) = self
            .nodes
            .get_mut(&from.node)
            .and_then(|n| n.outputs.get_mut(from.port))
        {
            port.attach(to, order);
        }
        if let Some(port) = self
            .nodes
            .get_mut(&to.node)
            .and_then(|n| n.inputs.get_mut(to.port))
        {
            port.set_upstream(Some(from));
        }
        self.revision += 1;
        self.emit(GraphEvent::Connected { from, to });
        Ok(())
    }

    /// Remove the edge feeding an input
    pub fn disconnect(&mut self, to: InputRef) -> Option<OutputRef> {
        let from = self.nodes.get(&to.node)?.input(to.port)?.upstream()?;
        if let Some(port) = self
            .nodes
            .get_mut(&from.node)
            .and_then(|n| n.outputs.get_mut(from.port))
        {
            port.detach(to);
        }
        if let Some(port) = self
            .nodes
            .get_mut(&to.node)
            .and_then(|n| n.inputs.get_mut(to.port))
        {
            port.set_upstream(None);
        }
        self.revision += 1;
        self.emit(GraphEvent::Disconnected { from, to });
        Some(from)
    }

    /// Remove every edge touching a node
    pub fn disconnect_node(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.get(&node_id) else {
            return;
        };
        let inputs: Vec<InputRef> = (0..node.inputs.len())
            .map(|i| InputRef::new(node_id, i))
            .collect();
        let downstream: Vec<InputRef> = node
            .outputs
            .iter()
            .flat_map(|o| o.downstream().iter().copied())
            .collect();
        for input in inputs.into_iter().chain(downstream) {
            self.disconnect(input);
        }
    }

    /// Output feeding an input
    pub fn upstream(&self, to: InputRef) -> Option<OutputRef> {
        self.nodes.get(&to.node)?.input(to.port)?.upstream()
    }

    /// Resolved type of an output
    pub fn output_type(&self, from: OutputRef) -> Option<PortType> {
        Some(self.nodes.get(&from.node)?.output(from.port)?.ty())
    }

    /// Last value produced by an output
    pub fn output_value(&self, from: OutputRef) -> Option<&Value> {
        self.nodes.get(&from.node)?.output(from.port)?.value.as_ref()
    }

    pub(crate) fn set_output_value(&mut self, from: OutputRef, value: Option<Value>) {
        if let Some(port) = self
            .nodes
            .get_mut(&from.node)
            .and_then(|n| n.outputs.get_mut(from.port))
        {
            port.value = value;
        }
    }

    /// All edges as connection records, in downstream order
    pub fn connections(&self) -> Vec<Connection> {
        self.nodes
            .values()
            .flat_map(|node| {
                node.outputs.iter().enumerate().flat_map(move |(i, out)| {
                    out.downstream().iter().enumerate().map(move |(order, to)| {
                        Connection::new(node.id, i, to.node, to.port).with_order(order)
                    })
                })
            })
            .collect()
    }

    /// Nodes whose outputs feed nothing
    pub fn end_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.outputs.iter().all(|o| o.downstream().is_empty()))
            .map(|n| n.id)
            .collect()
    }

    /// Replace a node's inputs, keeping edges whose slot still accepts the upstream type
    pub(crate) fn rebuild_inputs(&mut self, node_id: NodeId, ports: Vec<InputPort>) {
        let Some(node) = self.nodes.get(&node_id) else {
            return;
        };
        let previous: Vec<Option<(OutputRef, usize)>> = node
            .inputs
            .iter()
            .enumerate()
            .map(|(i, input)| {
                let from = input.upstream()?;
                let order = self
                    .nodes
                    .get(&from.node)?
                    .output(from.port)?
                    .downstream()
                    .iter()
                    .position(|r| *r == InputRef::new(node_id, i))?;
                Some((from, order))
            })
            .collect();

        for i in 0..previous.len() {
            self.disconnect(InputRef::new(node_id, i));
        }
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.inputs = ports;
        }
        self.revision += 1;

        for (i, prev) in previous.into_iter().enumerate() {
            let Some((from, order)) = prev else {
                continue;
            };
            let to = InputRef::new(node_id, i);
            if let Err(e) = self.connect_ordered(from, to, order) {
                tracing::debug!("Dropping edge into {node_id} slot {i}: {e}");
            }
        }
    }

    /// Change an output's declared type, dropping edges it can no longer feed
    pub(crate) fn redeclare_output(&mut self, from: OutputRef, ty: PortType) {
        let Some(port) = self
            .nodes
            .get_mut(&from.node)
            .and_then(|n| n.outputs.get_mut(from.port))
        else {
            return;
        };
        if port.declared() == ty {
            return;
        }
        port.redeclare(ty);
        let downstream = port.downstream().to_vec();
        for to in downstream {
            let accepts = self
                .nodes
                .get(&to.node)
                .and_then(|n| n.input(to.port))
                .is_some_and(|i| i.accepted.intersects(ty));
            if !accepts {
                self.disconnect(to);
            }
        }
        self.revision += 1;
    }

    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    /// Scoped variables
    pub fn variables(&self) -> &IndexMap<String, Variable> {
        &self.variables
    }

    /// Look up a scoped variable
    pub fn var(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// Declare or update a scoped variable
    pub fn set_var(&mut self, name: impl Into<String>, ty: PortType, value: Option<Value>) {
        self.variables.insert(name.into(), Variable { ty, value });
    }

    /// Remove a scoped variable
    pub fn remove_var(&mut self, name: &str) -> Option<Variable> {
        self.variables.shift_remove(name)
    }

    /// Remove every scoped variable
    pub fn clear_vars(&mut self) {
        self.variables.clear();
    }

    // ------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------

    /// Lift a node property into a promoted parameter, returning its key
    pub fn promote(&mut self, node_id: NodeId, property: &str) -> Result<String, GraphError> {
        let key = parameter_key(node_id, property);
        if self.parameters.contains_key(&key) {
            return Ok(key);
        }
        let node = self
            .nodes
            .get(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        let node_type = self
            .registry
            .get(node.type_name())
            .ok_or_else(|| GraphError::UnknownNodeType(node.type_name().to_string()))?;
        let spec = node_type
            .property(property)
            .ok_or_else(|| GraphError::Property {
                node: node_id,
                source: PropertyError::Unknown(property.to_string()),
            })?;
        let ty = spec.promote_as.ok_or_else(|| GraphError::NotPromotable {
            node: node_id,
            property: property.to_string(),
        })?;
        let current = self
            .property(node_id, property)
            .and_then(|v| v.to_value(ty))
            .unwrap_or_else(|| Value::default_for(ty));

        let mut param = ParameterValue::constant(format!("{} {}", node.name, property), current);
        param.ty = ty;
        self.parameters.insert(key.clone(), param);
        self.content_revision += 1;
        self.emit(GraphEvent::ParameterChanged(key.clone()));
        Ok(key)
    }

    /// Insert a promoted parameter under an existing key, e.g. when restoring
    pub(crate) fn insert_parameter(&mut self, key: String, param: ParameterValue) {
        self.parameters.insert(key.clone(), param);
        self.content_revision += 1;
        self.emit(GraphEvent::ParameterChanged(key));
    }

    /// Drop a promoted property, returning the parameter it held
    pub fn demote(&mut self, node_id: NodeId, property: &str) -> Option<ParameterValue> {
        self.remove_parameter(&parameter_key(node_id, property))
    }

    /// Whether a property is promoted
    pub fn is_promoted(&self, node_id: NodeId, property: &str) -> bool {
        self.parameters
            .contains_key(&parameter_key(node_id, property))
    }

    /// Promoted parameter by key
    pub fn parameter(&self, key: &str) -> Option<&ParameterValue> {
        self.parameters.get(key)
    }

    /// Mutable promoted parameter by key
    pub fn parameter_mut(&mut self, key: &str) -> Option<&mut ParameterValue> {
        self.content_revision += 1;
        self.parameters.get_mut(key)
    }

    /// Promoted parameters by key
    pub fn parameters(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.parameters.iter()
    }

    /// Set a promoted parameter to a constant
    pub fn set_parameter_value(&mut self, key: &str, value: Value) -> Result<(), GraphError> {
        let param = self
            .parameters
            .get_mut(key)
            .ok_or_else(|| GraphError::ParameterNotFound(key.to_string()))?;
        let value = value.coerce_or_default(param.ty);
        let old = std::mem::replace(&mut param.data, ParameterData::Constant(value));
        self.dispose_data(old);
        self.content_revision += 1;
        self.emit(GraphEvent::ParameterChanged(key.to_string()));
        Ok(())
    }

    /// Drive a promoted parameter with a function
    pub fn set_parameter_function(
        &mut self,
        key: &str,
        function: Function,
    ) -> Result<SharedFunction, GraphError> {
        let param = self
            .parameters
            .get_mut(key)
            .ok_or_else(|| GraphError::ParameterNotFound(key.to_string()))?;
        let shared = SharedFunction::new(function);
        let old = std::mem::replace(&mut param.data, ParameterData::Function(shared.clone()));
        self.dispose_data(old);
        self.content_revision += 1;
        self.emit(GraphEvent::ParameterChanged(key.to_string()));
        Ok(shared)
    }

    /// Remove a promoted parameter by key
    pub fn remove_parameter(&mut self, key: &str) -> Option<ParameterValue> {
        let param = self.parameters.shift_remove(key)?;
        self.dispose_data(param.data.clone());
        self.content_revision += 1;
        self.emit(GraphEvent::ParameterRemoved(key.to_string()));
        Some(param)
    }

    /// Add a custom parameter, returning its index
    pub fn add_custom_parameter(&mut self, param: ParameterValue) -> usize {
        let name = param.code_name(CUSTOM_PREFIX);
        self.custom_parameters.push(param);
        self.content_revision += 1;
        self.emit(GraphEvent::ParameterChanged(name));
        self.custom_parameters.len() - 1
    }

    /// Custom parameters
    pub fn custom_parameters(&self) -> &[ParameterValue] {
        &self.custom_parameters
    }

    /// Remove a custom parameter
    pub fn remove_custom_parameter(&mut self, index: usize) -> Option<ParameterValue> {
        if index >= self.custom_parameters.len() {
            return None;
        }
        let param = self.custom_parameters.remove(index);
        self.dispose_data(param.data.clone());
        self.content_revision += 1;
        self.emit(GraphEvent::ParameterRemoved(param.code_name(CUSTOM_PREFIX)));
        Some(param)
    }

    fn dispose_data(&mut self, data: ParameterData) {
        let ParameterData::Function(function) = data else {
            return;
        };
        let disposed = match function.try_lock() {
            Some(mut f) => f.dispose(),
            None => vec![function.id()],
        };
        for id in disposed {
            self.emit(GraphEvent::FunctionDisposed(id));
        }
    }

    /// Dispose every function-valued parameter, returning the disposed function IDs
    pub(crate) fn dispose_parameters(&mut self) -> Vec<FunctionId> {
        let params: Vec<ParameterValue> = self
            .parameters
            .drain(..)
            .map(|(_, p)| p)
            .chain(self.custom_parameters.drain(..))
            .collect();
        let mut disposed = Vec::new();
        for param in params {
            if let ParameterData::Function(function) = param.data {
                match function.try_lock() {
                    Some(mut f) => disposed.extend(f.dispose()),
                    None => disposed.push(function.id()),
                }
            }
        }
        disposed
    }

    // ------------------------------------------------------------------
    // Function library
    // ------------------------------------------------------------------

    /// Add a function usable as a call target
    pub fn add_function(&mut self, function: Function) -> SharedFunction {
        let shared = SharedFunction::new(function);
        self.functions.push(shared.clone());
        self.content_revision += 1;
        self.emit(GraphEvent::FunctionAdded(shared.id()));
        shared
    }

    /// Call targets
    pub fn functions(&self) -> &[SharedFunction] {
        &self.functions
    }

    /// Find a function by name
    pub fn function_by_name(&self, name: &str) -> Option<&SharedFunction> {
        self.functions
            .iter()
            .find(|f| f.try_lock().is_some_and(|g| g.name() == name))
    }

    /// Remove a function and re-resolve call nodes that referenced the library by index
    pub fn remove_function(&mut self, index: usize) -> Option<SharedFunction> {
        if index >= self.functions.len() {
            return None;
        }
        let removed = self.functions.remove(index);
        let unresolved = self.rebind_calls();
        if !unresolved.is_empty() {
            tracing::warn!(
                "{} call node(s) lost their target after removing a function",
                unresolved.len()
            );
        }
        self.content_revision += 1;
        self.emit(GraphEvent::FunctionRemoved(removed.id()));
        Some(removed)
    }

    /// Re-resolve every call node in the library against the current function list.
    ///
    /// Returns the call nodes whose target could not be found.
    pub fn rebind_calls(&mut self) -> Vec<NodeId> {
        let library = self.functions.clone();
        let mut unresolved = Vec::new();
        for function in &library {
            let Some(mut f) = function.try_lock() else {
                tracing::warn!("Skipping busy function {:?} while rebinding calls", function.id());
                continue;
            };
            unresolved.extend(f.rebind_calls(&library));
        }
        unresolved
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Build the evaluation environment for this graph as a root
    pub fn environment(&self) -> GraphEnv {
        let stack = CallStack::new();
        let empty = ParameterScope::new();
        let params = {
            let env = EvalEnv::new(&self.functions, &self.settings, &empty, &stack);
            self.resolve_parameters(&env)
        };
        GraphEnv {
            library: self.functions.clone(),
            settings: self.settings.clone(),
            params,
            stack,
        }
    }

    /// Resolved value of a promoted parameter
    pub fn parameter_value(&self, key: &str) -> Option<Value> {
        self.environment().params().promoted.get(key)?.value
    }

    /// Resolve this graph's parameters, evaluating function-valued ones
    pub(crate) fn resolve_parameters(&self, env: &EvalEnv<'_>) -> ParameterScope {
        let mut scope = ParameterScope::new();
        for (key, param) in &self.parameters {
            if let Some(value) = param.constant_value() {
                scope.promoted.insert(
                    key.clone(),
                    ResolvedParameter {
                        code_name: param.code_name(PROMOTED_PREFIX),
                        ty: param.ty,
                        value: Some(value),
                    },
                );
            }
        }
        for param in &self.custom_parameters {
            if let Some(value) = param.constant_value() {
                scope.custom.push(ResolvedParameter {
                    code_name: param.code_name(CUSTOM_PREFIX),
                    ty: param.ty,
                    value: Some(value),
                });
            }
        }

        for (key, param) in &self.parameters {
            let ParameterData::Function(function) = &param.data else {
                continue;
            };
            let visible = env.params.layered(&scope);
            let args = self.owner_arguments(key);
            let value = function
                .evaluate(&env.with_params(&visible), &args)
                .map(|v| v.coerce_or_default(param.ty));
            scope.promoted.insert(
                key.clone(),
                ResolvedParameter {
                    code_name: param.code_name(PROMOTED_PREFIX),
                    ty: param.ty,
                    value,
                },
            );
        }
        for param in &self.custom_parameters {
            let ParameterData::Function(function) = &param.data else {
                continue;
            };
            let visible = env.params.layered(&scope);
            let value = function
                .evaluate(&env.with_params(&visible), &[])
                .map(|v| v.coerce_or_default(param.ty));
            scope.custom.push(ResolvedParameter {
                code_name: param.code_name(CUSTOM_PREFIX),
                ty: param.ty,
                value,
            });
        }
        scope
    }

    /// Properties of the node owning a promoted key, as call arguments
    fn owner_arguments(&self, key: &str) -> Vec<(String, Value)> {
        let Some(node) = key
            .split_once('.')
            .and_then(|(id, _)| Uuid::parse_str(id).ok())
            .and_then(|id| self.nodes.get(&NodeId(id)))
        else {
            return Vec::new();
        };
        node.kind
            .properties()
            .into_iter()
            .filter_map(|(name, value)| {
                let promoted = self
                    .parameters
                    .get(&parameter_key(node.id, name))
                    .and_then(ParameterValue::constant_value);
                Some((name.to_string(), promoted.or_else(|| value.as_value())?))
            })
            .collect()
    }

    fn pull_inputs(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.get(&node_id) else {
            return;
        };
        let values: Vec<Option<Value>> = node
            .inputs
            .iter()
            .map(|i| i.upstream().and_then(|u| self.output_value(u).copied()))
            .collect();
        if let Some(node) = self.nodes.get_mut(&node_id) {
            for (port, value) in node.inputs.iter_mut().zip(values) {
                port.value = value;
            }
        }
    }

    /// Pull input values and interpret one node
    pub(crate) fn evaluate_node(&mut self, node_id: NodeId, env: &EvalEnv<'_>) {
        self.pull_inputs(node_id);
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        let Node {
            inputs,
            outputs,
            kind,
            ..
        } = node;
        let mut cx = EvalContext::new(node_id, inputs, outputs, &mut self.variables, env);
        kind.evaluate(&mut cx);
    }

    /// Narrow one node's output types from its upstream types
    pub(crate) fn propagate_node(&mut self, node_id: NodeId, env: &EvalEnv<'_>) {
        let Some(node) = self.nodes.get(&node_id) else {
            return;
        };
        let upstream: Vec<Option<PortType>> = node.inputs[node.input_offset()..]
            .iter()
            .map(|i| i.upstream().and_then(|u| self.output_type(u)))
            .collect();
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        let Node { outputs, kind, .. } = node;
        let mut cx = TypeContext::new(upstream, outputs, &mut self.variables, env);
        kind.propagate_type(&mut cx);
    }

    /// Generate one node's fragment against the text accumulated so far
    pub(crate) fn emit_node(
        &self,
        node_id: NodeId,
        env: &EvalEnv<'_>,
        text: &str,
        body: Option<&str>,
    ) -> Option<String> {
        let node = self.nodes.get(&node_id)?;
        let cx = EmitContext::new(self, node, env, text, body);
        node.kind.emit(&cx)
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Request re-evaluation of everything affected by a node.
    ///
    /// Ordering runs on a background thread; [`Graph::poll`] applies it. Returns
    /// `false` when the request was dropped because a pass is already in flight.
    pub fn schedule(&mut self, node_id: NodeId) -> bool {
        let Some(node) = self.nodes.get(&node_id) else {
            return false;
        };
        if node.scheduled {
            return false;
        }
        if self.scheduler.is_processing() {
            tracing::debug!("Graph {} busy, dropping schedule of {node_id}", self.name);
            return false;
        }
        let topology = Topology::capture(self);
        self.scheduler.dispatch(topology, node_id);
        true
    }

    /// Whether a scheduled pass is running
    pub fn is_processing(&self) -> bool {
        self.scheduler.is_processing()
    }

    /// Evaluate at most one scheduled node
    pub fn poll(&mut self) -> PollStatus {
        for batch in self.scheduler.receive() {
            self.accept_batch(batch);
        }
        if let Some(node_id) = self.scheduler.next() {
            let owned = self.environment();
            let env = owned.env();
            self.propagate_node(node_id, &env);
            self.evaluate_node(node_id, &env);
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.scheduled = false;
            }
            return PollStatus::Evaluated(node_id);
        }
        if self.scheduler.in_flight() > 0 {
            return PollStatus::Waiting;
        }
        if self.scheduler.finish() {
            tracing::debug!("Graph {} finished evaluation pass", self.name);
            self.emit(GraphEvent::EvaluationFinished);
            return PollStatus::Finished;
        }
        PollStatus::Idle
    }

    /// Block until every scheduled pass has been ordered and evaluated
    pub fn run_scheduled(&mut self) -> Vec<NodeId> {
        let mut evaluated = Vec::new();
        loop {
            match self.poll() {
                PollStatus::Evaluated(id) => evaluated.push(id),
                PollStatus::Waiting => {
                    if let Some(batch) = self.scheduler.wait() {
                        self.accept_batch(batch);
                    }
                }
                PollStatus::Finished | PollStatus::Idle => return evaluated,
            }
        }
    }

    fn accept_batch(&mut self, batch: Vec<NodeId>) {
        tracing::debug!("Graph {} received {} scheduled node(s)", self.name, batch.len());
        for node_id in batch {
            let Some(node) = self.nodes.get_mut(&node_id) else {
                continue;
            };
            if node.scheduled {
                continue;
            }
            node.scheduled = true;
            self.scheduler.enqueue(node_id);
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::arithmetic::{BinaryMath, BinaryOp};
    use crate::nodes::constant::Constant;
    use crate::nodes::variable::GetVar;
    use glam::Vec2;

    fn pair(graph: &mut Graph) -> (NodeId, NodeId) {
        let a = graph.add_node(Constant::float(2.0));
        let m = graph.add_node(BinaryMath::new(BinaryOp::Multiply));
        (a, m)
    }

    #[test]
    fn test_connect_is_symmetric() {
        let mut graph = Graph::new("test");
        let (a, m) = pair(&mut graph);
        graph
            .connect(OutputRef::new(a, 0), InputRef::new(m, 1))
            .unwrap();
        assert_eq!(graph.upstream(InputRef::new(m, 1)), Some(OutputRef::new(a, 0)));
        assert_eq!(
            graph.node(a).unwrap().output(0).unwrap().downstream(),
            &[InputRef::new(m, 1)]
        );

        assert_eq!(graph.disconnect(InputRef::new(m, 1)), Some(OutputRef::new(a, 0)));
        assert!(graph.node(a).unwrap().output(0).unwrap().downstream().is_empty());
        assert_eq!(graph.upstream(InputRef::new(m, 1)), None);
    }

    #[test]
    fn test_connect_idempotent() {
        let mut graph = Graph::new("test");
        let (a, m) = pair(&mut graph);
        let from = OutputRef::new(a, 0);
        let to = InputRef::new(m, 1);
        graph.connect(from, to).unwrap();
        graph.connect(from, to).unwrap();
        assert_eq!(graph.connections().len(), 1);
    }

    #[test]
    fn test_all_intersecting_pairs_connect() {
        let singles = [
            PortType::COLOR,
            PortType::GRAY,
            PortType::FLOAT,
            PortType::FLOAT2,
            PortType::FLOAT3,
            PortType::FLOAT4,
            PortType::BOOL,
            PortType::MATRIX,
        ];
        let mut types: Vec<PortType> = singles.to_vec();
        types.extend([PortType::NUMERIC, PortType::ANY_DATA, PortType::VECTOR]);

        for &a in &types {
            for &b in &types {
                let mut graph = Graph::new("pairs");
                let src = graph.add_node(GetVar::new("x"));
                let dst = graph.add_node(GetVar::new("y"));
                // Reshape the ports so the pair under test is exercised directly.
                graph.redeclare_output(OutputRef::new(src, 0), a);
                graph.rebuild_inputs(dst, vec![InputPort::new("In", b)]);

                let result = graph.connect(OutputRef::new(src, 0), InputRef::new(dst, 0));
                if a.intersects(b) {
                    assert!(result.is_ok(), "{a:?} -> {b:?}");
                    graph
                        .connect(OutputRef::new(src, 0), InputRef::new(dst, 0))
                        .unwrap();
                    assert_eq!(graph.connections().len(), 1);
                } else {
                    assert!(result.is_err(), "{a:?} -> {b:?}");
                    assert!(graph.connections().is_empty());
                    assert_eq!(graph.upstream(InputRef::new(dst, 0)), None);
                }
            }
        }
    }

    #[test]
    fn test_reconnect_replaces_upstream() {
        let mut graph = Graph::new("test");
        let (a, m) = pair(&mut graph);
        let b = graph.add_node(Constant::float(3.0));
        graph.connect(OutputRef::new(a, 0), InputRef::new(m, 1)).unwrap();
        graph.connect(OutputRef::new(b, 0), InputRef::new(m, 1)).unwrap();
        assert!(graph.node(a).unwrap().output(0).unwrap().downstream().is_empty());
        assert_eq!(graph.upstream(InputRef::new(m, 1)), Some(OutputRef::new(b, 0)));
    }

    #[test]
    fn test_incompatible_connection_leaves_graph_untouched() {
        let mut graph = Graph::new("test");
        let (a, m) = pair(&mut graph);
        let before = graph.revision();
        let err = graph
            .connect(OutputRef::new(a, 0), InputRef::new(m, 0))
            .unwrap_err();
        assert!(matches!(err, ConnectionError::IncompatiblePorts { .. }));
        assert_eq!(graph.revision(), before);
        assert!(graph.connections().is_empty());
    }

    #[test]
    fn test_self_loop_rejected() {
        let mut graph = Graph::new("test");
        let m = graph.add_node(BinaryMath::new(BinaryOp::Multiply));
        let err = graph
            .connect(OutputRef::new(m, 1), InputRef::new(m, 1))
            .unwrap_err();
        assert_eq!(err, ConnectionError::SelfLoop);
    }

    #[test]
    fn test_remove_node_detaches_edges_and_parameters() {
        let mut graph = Graph::new("test");
        let (a, m) = pair(&mut graph);
        graph.connect(OutputRef::new(a, 0), InputRef::new(m, 1)).unwrap();
        let key = graph.promote(a, "value").unwrap();
        assert!(graph.parameter(&key).is_some());

        let removed = graph.remove_node(a).unwrap();
        assert_eq!(removed.id, a);
        assert!(graph.parameter(&key).is_none());
        assert_eq!(graph.upstream(InputRef::new(m, 1)), None);
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_reparent_node() {
        let mut first = Graph::new("first");
        let mut second = Graph::new("second");
        let (a, m) = pair(&mut first);
        first.connect(OutputRef::new(a, 0), InputRef::new(m, 1)).unwrap();

        let node = first.remove_node(a).unwrap();
        let id = second.insert_node(node).unwrap();
        assert_eq!(id, a);
        assert!(!first.contains_node(a));
        assert!(second.node(a).unwrap().output(0).unwrap().downstream().is_empty());

        let again = second.remove_node(a).unwrap();
        second.insert_node(again).unwrap();
        let duplicate = Node::with_id(a, Box::new(Constant::float(0.0)));
        assert!(matches!(
            second.insert_node(duplicate),
            Err(GraphError::DuplicateNode(_))
        ));
    }

    #[test]
    fn test_events() {
        let mut graph = Graph::new("test");
        let mut rx = graph.subscribe();
        let (a, m) = pair(&mut graph);
        graph.connect(OutputRef::new(a, 0), InputRef::new(m, 1)).unwrap();
        graph.disconnect(InputRef::new(m, 1));

        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        assert_eq!(
            events,
            vec![
                GraphEvent::NodeAdded(a),
                GraphEvent::NodeAdded(m),
                GraphEvent::Connected {
                    from: OutputRef::new(a, 0),
                    to: InputRef::new(m, 1)
                },
                GraphEvent::Disconnected {
                    from: OutputRef::new(a, 0),
                    to: InputRef::new(m, 1)
                },
            ]
        );
    }

    #[test]
    fn test_promote_and_set_value() {
        let mut graph = Graph::new("test");
        let c = graph.add_node(Constant::float2(Vec2::new(1.0, 2.0)));
        let key = graph.promote(c, "value").unwrap();
        let param = graph.parameter(&key).unwrap();
        assert_eq!(param.ty, PortType::FLOAT2);
        assert_eq!(param.constant_value(), Some(Value::Float2(Vec2::new(1.0, 2.0))));

        graph.set_parameter_value(&key, Value::Float(4.0)).unwrap();
        assert_eq!(graph.parameter_value(&key), Some(Value::Float2(Vec2::splat(4.0))));

        assert!(matches!(
            graph.promote(c, "missing"),
            Err(GraphError::Property { .. })
        ));
        assert!(graph.demote(c, "value").is_some());
        assert!(!graph.is_promoted(c, "value"));
    }

    #[test]
    fn test_property_edit_bumps_content_revision() {
        let mut graph = Graph::new("test");
        let c = graph.add_node(Constant::float(1.0));
        let structural = graph.revision();
        let content = graph.content_revision();
        graph.set_property(c, "value", PropertyValue::Float(5.0)).unwrap();
        assert_eq!(graph.revision(), structural);
        assert!(graph.content_revision() > content);
        assert_eq!(graph.property(c, "value"), Some(PropertyValue::Float(5.0)));
        assert!(graph
            .set_property(c, "value", PropertyValue::Text("x".into()))
            .is_err());
    }

    #[test]
    fn test_end_nodes() {
        let mut graph = Graph::new("test");
        let (a, m) = pair(&mut graph);
        graph.connect(OutputRef::new(a, 0), InputRef::new(m, 1)).unwrap();
        assert_eq!(graph.end_nodes(), vec![m]);
    }
}
