// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port definitions for node inputs/outputs.
//!
//! Ports carry a [`PortType`] bitset. A connection is legal when the bitsets of the
//! two ends intersect, which lets one port accept a union of types and lets an
//! output narrow to a single type once its inputs are known.

use crate::node::NodeId;
use crate::value::Value;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Data type (or union of data types) that can flow through a port
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PortType: u16 {
        /// RGBA color
        const COLOR = 1 << 0;
        /// Grayscale color
        const GRAY = 1 << 1;
        /// Scalar
        const FLOAT = 1 << 2;
        /// 2D vector
        const FLOAT2 = 1 << 3;
        /// 3D vector
        const FLOAT3 = 1 << 4;
        /// 4D vector
        const FLOAT4 = 1 << 5;
        /// Boolean
        const BOOL = 1 << 6;
        /// Execution flow
        const CONTROL = 1 << 7;
        /// 4x4 matrix
        const MATRIX = 1 << 8;

        /// Any vector width
        const VECTOR = Self::FLOAT2.bits() | Self::FLOAT3.bits() | Self::FLOAT4.bits();
        /// Scalars and vectors
        const NUMERIC = Self::FLOAT.bits() | Self::VECTOR.bits();
        /// Everything a variable can hold
        const ANY_DATA = Self::NUMERIC.bits() | Self::BOOL.bits() | Self::MATRIX.bits();
    }
}

impl PortType {
    /// Check whether this is an execution-flow port
    pub fn is_control(self) -> bool {
        self.contains(Self::CONTROL)
    }

    /// Check whether this type holds more than one concrete type
    pub fn is_union(self) -> bool {
        self.bits().count_ones() > 1
    }

    /// Pick a single concrete type out of a union.
    ///
    /// Unresolved unions fall back to the scalar-first order used by the backend mapping.
    pub fn resolved(self) -> PortType {
        const ORDER: [PortType; 9] = [
            PortType::FLOAT,
            PortType::BOOL,
            PortType::FLOAT2,
            PortType::FLOAT3,
            PortType::FLOAT4,
            PortType::COLOR,
            PortType::GRAY,
            PortType::MATRIX,
            PortType::CONTROL,
        ];
        ORDER
            .into_iter()
            .find(|t| self.contains(*t))
            .unwrap_or(PortType::FLOAT)
    }

    /// Backend type keyword
    pub fn glsl_type(self) -> &'static str {
        match self.resolved() {
            t if t == Self::FLOAT2 => "vec2",
            t if t == Self::FLOAT3 => "vec3",
            t if t == Self::FLOAT4 || t == Self::COLOR || t == Self::GRAY => "vec4",
            t if t == Self::MATRIX => "mat4",
            _ => "float",
        }
    }

    /// Number of float components a value of this type occupies
    pub fn components(self) -> usize {
        match self.resolved() {
            t if t == Self::FLOAT2 => 2,
            t if t == Self::FLOAT3 => 3,
            t if t == Self::FLOAT4 || t == Self::COLOR || t == Self::GRAY => 4,
            t if t == Self::MATRIX => 16,
            _ => 1,
        }
    }

    /// Vector type with the given width (1 is scalar)
    pub fn with_width(width: usize) -> PortType {
        match width {
            2 => Self::FLOAT2,
            3 => Self::FLOAT3,
            4 => Self::FLOAT4,
            _ => Self::FLOAT,
        }
    }

    /// Treat colors as plain 4D vectors
    pub fn normalized(self) -> PortType {
        let t = self.resolved();
        if t == Self::COLOR || t == Self::GRAY {
            Self::FLOAT4
        } else {
            t
        }
    }
}

/// Reference to an output port, resolved through the owning graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    /// Node owning the port
    pub node: NodeId,
    /// Output index on that node
    pub port: usize,
}

impl OutputRef {
    /// Create a new output reference
    pub fn new(node: NodeId, port: usize) -> Self {
        Self { node, port }
    }
}

/// Reference to an input port, resolved through the owning graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputRef {
    /// Node owning the port
    pub node: NodeId,
    /// Input index on that node
    pub port: usize,
}

impl InputRef {
    /// Create a new input reference
    pub fn new(node: NodeId, port: usize) -> Self {
        Self { node, port }
    }
}

/// An input pin: at most one upstream output
#[derive(Debug, Clone)]
pub struct InputPort {
    /// Port name
    pub name: String,
    /// Accepted types
    pub accepted: PortType,
    upstream: Option<OutputRef>,
    /// Last value pulled from upstream
    pub value: Option<Value>,
}

impl InputPort {
    /// Create a new unconnected input
    pub fn new(name: impl Into<String>, accepted: PortType) -> Self {
        Self {
            name: name.into(),
            accepted,
            upstream: None,
            value: None,
        }
    }

    /// Upstream output feeding this input
    pub fn upstream(&self) -> Option<OutputRef> {
        self.upstream
    }

    /// Whether an upstream output is attached
    pub fn is_connected(&self) -> bool {
        self.upstream.is_some()
    }

    /// Whether this input sequences execution instead of carrying data
    pub fn is_control(&self) -> bool {
        self.accepted.is_control()
    }

    pub(crate) fn set_upstream(&mut self, upstream: Option<OutputRef>) {
        self.upstream = upstream;
        if upstream.is_none() {
            self.value = None;
        }
    }
}

/// An output pin: fans out to any number of inputs
#[derive(Debug, Clone)]
pub struct OutputPort {
    /// Port name
    pub name: String,
    declared: PortType,
    ty: PortType,
    downstream: Vec<InputRef>,
    /// Last produced value
    pub value: Option<Value>,
}

impl OutputPort {
    /// Create a new output
    pub fn new(name: impl Into<String>, ty: PortType) -> Self {
        Self {
            name: name.into(),
            declared: ty,
            ty,
            downstream: Vec::new(),
            value: None,
        }
    }

    /// Current (possibly narrowed) type
    pub fn ty(&self) -> PortType {
        self.ty
    }

    /// Type declared by the node kind, before propagation
    pub fn declared(&self) -> PortType {
        self.declared
    }

    /// Inputs fed by this output, in call order
    pub fn downstream(&self) -> &[InputRef] {
        &self.downstream
    }

    /// Whether this output sequences execution instead of carrying data
    pub fn is_control(&self) -> bool {
        self.declared.is_control()
    }

    pub(crate) fn set_type(&mut self, ty: PortType) {
        self.ty = ty;
    }

    pub(crate) fn redeclare(&mut self, ty: PortType) {
        self.declared = ty;
        self.ty = ty;
    }

    pub(crate) fn attach(&mut self, input: InputRef, order: Option<usize>) {
        if self.downstream.contains(&input) {
            return;
        }
        match order {
            Some(i) if i < self.downstream.len() => self.downstream.insert(i, input),
            _ => self.downstream.push(input),
        }
    }

    pub(crate) fn detach(&mut self, input: InputRef) -> Option<usize> {
        let index = self.downstream.iter().position(|r| *r == input)?;
        self.downstream.remove(index);
        Some(index)
    }
}

/// Declared port lists for a node kind
#[derive(Debug, Clone, Default)]
pub struct PortLayout {
    /// Input ports
    pub inputs: Vec<InputPort>,
    /// Output ports
    pub outputs: Vec<OutputPort>,
}

impl PortLayout {
    /// Layout with no ports
    pub fn data() -> Self {
        Self::default()
    }

    /// Layout starting with the execute input/output pair
    pub fn control() -> Self {
        Self::data()
            .input("Execute", PortType::CONTROL)
            .output("Execute", PortType::CONTROL)
    }

    /// Append an input
    pub fn input(mut self, name: impl Into<String>, ty: PortType) -> Self {
        self.inputs.push(InputPort::new(name, ty));
        self
    }

    /// Append an output
    pub fn output(mut self, name: impl Into<String>, ty: PortType) -> Self {
        self.outputs.push(OutputPort::new(name, ty));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glsl_mapping() {
        assert_eq!(PortType::FLOAT.glsl_type(), "float");
        assert_eq!(PortType::BOOL.glsl_type(), "float");
        assert_eq!(PortType::FLOAT2.glsl_type(), "vec2");
        assert_eq!(PortType::FLOAT3.glsl_type(), "vec3");
        assert_eq!(PortType::FLOAT4.glsl_type(), "vec4");
        assert_eq!(PortType::COLOR.glsl_type(), "vec4");
        assert_eq!(PortType::GRAY.glsl_type(), "vec4");
        assert_eq!(PortType::MATRIX.glsl_type(), "mat4");
    }

    #[test]
    fn test_union_resolution() {
        let any = PortType::ANY_DATA;
        assert!(any.is_union());
        assert_eq!(any.resolved(), PortType::FLOAT);
        assert_eq!((PortType::FLOAT3 | PortType::MATRIX).resolved(), PortType::FLOAT3);
        assert!(any.intersects(PortType::FLOAT2));
        assert!(!any.intersects(PortType::CONTROL));
    }

    #[test]
    fn test_ordered_attach() {
        let node = NodeId::new();
        let mut out = OutputPort::new("Out", PortType::FLOAT);
        out.attach(InputRef::new(node, 1), None);
        out.attach(InputRef::new(node, 2), None);
        out.attach(InputRef::new(node, 0), Some(0));
        out.attach(InputRef::new(node, 2), None);
        let ports: Vec<usize> = out.downstream().iter().map(|r| r.port).collect();
        assert_eq!(ports, vec![0, 1, 2]);
        assert_eq!(out.detach(InputRef::new(node, 1)), Some(1));
        assert_eq!(out.detach(InputRef::new(node, 1)), None);
    }
}
