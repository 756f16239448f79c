// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the graph framework.
//!
//! A [`Node`] owns its ports and a boxed [`NodeKind`] that implements the three
//! per-kind contracts: `emit` (codegen), `evaluate` (interpretation) and
//! `propagate_type` (narrowing polymorphic outputs).

use crate::evaluation::{EmitContext, EvalContext, TypeContext};
use crate::port::{InputPort, OutputPort, PortType};
use crate::value::Value;
use glam::Vec4;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Identifier prefix used for this node's generated variables
    pub fn shader_id(&self) -> String {
        let simple = self.0.simple().to_string();
        format!("S{}", &simple[..8])
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the compiler treats a node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// Ordinary operation
    Plain,
    /// Constant or variable read; no control ports
    Source,
    /// Function entry marker
    Entry,
    /// Formal argument declaration
    Argument,
    /// Invokes another function
    Call,
    /// Owns a repeated inner branch
    Loop,
}

/// Node type category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeCategory {
    /// Constants, variables and arguments
    Input,
    /// Arithmetic
    Math,
    /// Trigonometry
    Trigonometry,
    /// Vector construction and geometry
    Vector,
    /// Comparisons and boolean logic
    Logic,
    /// Matrix builders
    Matrix,
    /// Control flow and calls
    Flow,
    /// Textures and noise
    Texture,
}

/// A property value as stored on a node kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Scalar
    Float(f32),
    /// Boolean
    Bool(bool),
    /// Up to four components
    Vector(Vec4),
    /// Integer
    Int(i32),
    /// Text (variable and function names)
    Text(String),
    /// Port type
    Type(PortType),
}

impl PropertyValue {
    /// Port value in the property's natural type, if the property is numeric
    pub fn as_value(&self) -> Option<Value> {
        match self {
            Self::Float(f) => Some(Value::Float(*f)),
            Self::Bool(b) => Some(Value::Bool(*b)),
            Self::Vector(v) => Some(Value::Float4(*v)),
            Self::Int(i) => Some(Value::Float(*i as f32)),
            Self::Text(_) | Self::Type(_) => None,
        }
    }

    /// Convert to a port value of the given type, if the property is numeric
    pub fn to_value(&self, ty: PortType) -> Option<Value> {
        self.as_value().map(|v| v.coerce_or_default(ty))
    }
}

/// Shape of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    /// [`PropertyValue::Float`]
    Float,
    /// [`PropertyValue::Bool`]
    Bool,
    /// [`PropertyValue::Vector`]
    Vector,
    /// [`PropertyValue::Int`]
    Int,
    /// [`PropertyValue::Text`]
    Text,
    /// [`PropertyValue::Type`]
    Type,
}

/// Schema entry for a node property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySpec {
    /// Property name
    pub name: &'static str,
    /// Value shape
    pub kind: PropertyKind,
    /// Port type used when the property is promoted to a graph parameter
    pub promote_as: Option<PortType>,
}

impl PropertySpec {
    /// A property that can not be promoted
    pub const fn fixed(name: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            kind,
            promote_as: None,
        }
    }

    /// A property that can be lifted to a graph parameter of the given type
    pub const fn promotable(name: &'static str, kind: PropertyKind, ty: PortType) -> Self {
        Self {
            name,
            kind,
            promote_as: Some(ty),
        }
    }
}

/// Error when reading or writing a node property
#[derive(Debug, thiserror::Error)]
pub enum PropertyError {
    /// No such property
    #[error("Unknown property: {0}")]
    Unknown(String),

    /// Value has the wrong shape
    #[error("Property {name} expects {expected:?}")]
    WrongKind {
        /// Property name
        name: String,
        /// Expected shape
        expected: PropertyKind,
    },
}

/// Behavior of a concrete node kind
pub trait NodeKind: fmt::Debug + Send {
    /// Registry identifier
    fn type_name(&self) -> &'static str;

    /// Ports for a freshly created node
    fn ports(&self) -> crate::port::PortLayout;

    /// How the compiler treats this kind
    fn role(&self) -> NodeRole {
        NodeRole::Plain
    }

    /// Generate this node's fragment, or `None` when an input is not ready
    fn emit(&self, cx: &EmitContext<'_>) -> Option<String>;

    /// Compute output values from the pulled input values
    fn evaluate(&mut self, cx: &mut EvalContext<'_>);

    /// Narrow polymorphic outputs from the resolved upstream types
    fn propagate_type(&self, _cx: &mut TypeContext<'_>) {}

    /// Current property values, in schema order
    fn properties(&self) -> Vec<(&'static str, PropertyValue)> {
        Vec::new()
    }

    /// Set a property value
    fn set_property(&mut self, name: &str, _value: PropertyValue) -> Result<(), PropertyError> {
        Err(PropertyError::Unknown(name.to_string()))
    }

    /// Loop range computed by the last `evaluate`, for loop kinds
    fn loop_range(&self) -> Option<crate::nodes::flow::LoopRange> {
        None
    }

    /// Downcast support
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast support
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A node instance in the graph
#[derive(Debug)]
pub struct Node {
    /// Unique instance ID
    pub id: NodeId,
    /// Display name (can be customized)
    pub name: String,
    /// Position in the editor
    pub position: [f32; 2],
    pub(crate) inputs: Vec<InputPort>,
    pub(crate) outputs: Vec<OutputPort>,
    pub(crate) kind: Box<dyn NodeKind>,
    pub(crate) scheduled: bool,
}

impl Node {
    /// Create a new node around a kind
    pub fn new(kind: Box<dyn NodeKind>) -> Self {
        Self::with_id(NodeId::new(), kind)
    }

    /// Create a node with a known ID (used when restoring snapshots)
    pub fn with_id(id: NodeId, kind: Box<dyn NodeKind>) -> Self {
        let layout = kind.ports();
        Self {
            id,
            name: kind.type_name().to_string(),
            position: [0.0, 0.0],
            inputs: layout.inputs,
            outputs: layout.outputs,
            kind,
            scheduled: false,
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the position
    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = [x, y];
        self
    }

    /// Node kind
    pub fn kind(&self) -> &dyn NodeKind {
        self.kind.as_ref()
    }

    /// Downcast the kind to a concrete type
    pub fn downcast<T: NodeKind + 'static>(&self) -> Option<&T> {
        self.kind.as_any().downcast_ref::<T>()
    }

    pub(crate) fn downcast_mut<T: NodeKind + 'static>(&mut self) -> Option<&mut T> {
        self.kind.as_any_mut().downcast_mut::<T>()
    }

    /// Registry identifier of the kind
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Compiler role of the kind
    pub fn role(&self) -> NodeRole {
        self.kind.role()
    }

    /// Input ports
    pub fn inputs(&self) -> &[InputPort] {
        &self.inputs
    }

    /// Output ports
    pub fn outputs(&self) -> &[OutputPort] {
        &self.outputs
    }

    /// Get an input port by index
    pub fn input(&self, index: usize) -> Option<&InputPort> {
        self.inputs.get(index)
    }

    /// Get an output port by index
    pub fn output(&self, index: usize) -> Option<&OutputPort> {
        self.outputs.get(index)
    }

    /// Whether any output sequences execution
    pub fn has_control_output(&self) -> bool {
        self.outputs.iter().any(OutputPort::is_control)
    }

    /// Index of the first data input
    pub fn input_offset(&self) -> usize {
        usize::from(self.inputs.first().is_some_and(InputPort::is_control))
    }

    /// Index of the first data output
    pub fn output_offset(&self) -> usize {
        usize::from(self.outputs.first().is_some_and(OutputPort::is_control))
    }

    /// Index of the output holding this node's result
    pub fn result_port(&self) -> Option<usize> {
        self.outputs.iter().position(|o| !o.is_control())
    }

    /// Generated identifier prefix
    pub fn shader_id(&self) -> String {
        self.id.shader_id()
    }

    /// Generated identifier of an output port
    pub fn ident(&self, output: usize) -> String {
        format!("{}{}", self.shader_id(), output)
    }

    /// Whether the node is queued for evaluation
    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }
}

/// Node type definition
#[derive(Debug, Clone)]
pub struct NodeType {
    /// Unique type identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Category
    pub category: NodeCategory,
    /// Description
    pub description: String,
    /// Editable properties
    pub properties: Vec<PropertySpec>,
    /// Constructor
    pub create: fn() -> Box<dyn NodeKind>,
}

impl NodeType {
    /// Find a property in the schema
    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// Registry of available node types
pub struct NodeRegistry {
    /// Registered node types by ID
    types: indexmap::IndexMap<String, NodeType>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            types: indexmap::IndexMap::new(),
        }
    }

    /// Registry holding the full built-in library, shared across graphs
    pub fn library() -> Arc<NodeRegistry> {
        static LIBRARY: OnceLock<Arc<NodeRegistry>> = OnceLock::new();
        LIBRARY
            .get_or_init(|| Arc::new(crate::nodes::create_library_registry()))
            .clone()
    }

    /// Register a node type
    pub fn register(&mut self, node_type: NodeType) {
        self.types.insert(node_type.id.clone(), node_type);
    }

    /// Get a node type by ID
    pub fn get(&self, id: &str) -> Option<&NodeType> {
        self.types.get(id)
    }

    /// Get all registered types
    pub fn types(&self) -> impl Iterator<Item = &NodeType> {
        self.types.values()
    }

    /// Get types by category
    pub fn types_in_category(&self, category: NodeCategory) -> impl Iterator<Item = &NodeType> {
        self.types.values().filter(move |t| t.category == category)
    }

    /// Create a node from a type ID
    pub fn create_node(&self, type_id: &str) -> Option<Node> {
        self.get(type_id)
            .map(|t| Node::new((t.create)()).with_name(t.name.clone()))
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .finish()
    }
}
