// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph evaluation and code generation contexts.
//!
//! Node kinds never see the graph directly while mutating. The graph splits its
//! borrows and hands each kind one of three contexts:
//! - [`EvalContext`] for CPU interpretation
//! - [`TypeContext`] for type propagation
//! - [`EmitContext`] for shader fragment generation

use crate::graph::{Graph, Variable};
use crate::graphs::function::{FunctionId, SharedFunction};
use crate::node::{Node, NodeId};
use crate::parameter::{resolve_var_name, ParameterScope};
use crate::port::{InputPort, OutputPort, PortType};
use crate::settings::GraphSettings;
use crate::value::Value;
use glam::{Vec2, Vec4};
use indexmap::IndexMap;
use std::cell::RefCell;

/// Source of texture samples for CPU evaluation of sampler nodes
pub trait SampleSource {
    /// Sample input texture `channel` at normalized position `uv`
    fn sample(&self, channel: usize, uv: Vec2) -> Vec4;
}

/// Functions currently being interpreted, innermost last
#[derive(Debug, Default)]
pub struct CallStack {
    frames: RefCell<Vec<FunctionId>>,
}

impl CallStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the function is already active
    pub fn contains(&self, id: FunctionId) -> bool {
        self.frames.borrow().contains(&id)
    }

    /// Number of active frames
    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    pub(crate) fn push(&self, id: FunctionId) {
        self.frames.borrow_mut().push(id);
    }

    pub(crate) fn pop(&self) {
        self.frames.borrow_mut().pop();
    }
}

/// Everything a node needs from outside its own graph
#[derive(Clone, Copy)]
pub struct EvalEnv<'a> {
    /// Call targets
    pub library: &'a [SharedFunction],
    /// Graph settings
    pub settings: &'a GraphSettings,
    /// Resolved ancestor parameters
    pub params: &'a ParameterScope,
    /// Active functions
    pub stack: &'a CallStack,
    /// Texture samples for sampler nodes
    pub sampler: Option<&'a dyn SampleSource>,
}

impl<'a> EvalEnv<'a> {
    /// Create a new environment
    pub fn new(
        library: &'a [SharedFunction],
        settings: &'a GraphSettings,
        params: &'a ParameterScope,
        stack: &'a CallStack,
    ) -> Self {
        Self {
            library,
            settings,
            params,
            stack,
            sampler: None,
        }
    }

    /// Attach a sample source
    pub fn with_sampler(mut self, sampler: &'a dyn SampleSource) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Same environment with a different parameter scope
    pub fn with_params<'b>(&self, params: &'b ParameterScope) -> EvalEnv<'b>
    where
        'a: 'b,
    {
        EvalEnv {
            library: self.library,
            settings: self.settings,
            params,
            stack: self.stack,
            sampler: self.sampler,
        }
    }

    /// Look up a call target by index, checking it is still the same function
    pub fn function(&self, index: usize, id: FunctionId) -> Option<&'a SharedFunction> {
        self.library
            .get(index)
            .filter(|f| f.id() == id)
            .or_else(|| self.library.iter().find(|f| f.id() == id))
    }
}

/// Context for interpreting one node
pub struct EvalContext<'a> {
    node: NodeId,
    inputs: &'a [InputPort],
    outputs: &'a mut [OutputPort],
    scope: &'a mut IndexMap<String, Variable>,
    env: &'a EvalEnv<'a>,
}

impl<'a> EvalContext<'a> {
    pub(crate) fn new(
        node: NodeId,
        inputs: &'a [InputPort],
        outputs: &'a mut [OutputPort],
        scope: &'a mut IndexMap<String, Variable>,
        env: &'a EvalEnv<'a>,
    ) -> Self {
        Self {
            node,
            inputs,
            outputs,
            scope,
            env,
        }
    }

    fn data_inputs(&self) -> &[InputPort] {
        let offset = usize::from(self.inputs.first().is_some_and(InputPort::is_control));
        &self.inputs[offset..]
    }

    fn output_index(&self, index: usize) -> usize {
        index + usize::from(self.outputs.first().is_some_and(OutputPort::is_control))
    }

    /// ID of the node being evaluated
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Value pulled into data input `index`
    pub fn input(&self, index: usize) -> Option<&Value> {
        self.data_inputs().get(index)?.value.as_ref()
    }

    /// Number of data inputs
    pub fn input_count(&self) -> usize {
        self.data_inputs().len()
    }

    /// Name of data input `index`
    pub fn input_name(&self, index: usize) -> Option<&str> {
        self.data_inputs().get(index).map(|p| p.name.as_str())
    }

    /// Write data output `index`
    pub fn set_output(&mut self, index: usize, value: Value) {
        let index = self.output_index(index);
        if let Some(port) = self.outputs.get_mut(index) {
            port.value = Some(value);
        }
    }

    /// Leave data output `index` unset
    pub fn clear_output(&mut self, index: usize) {
        let index = self.output_index(index);
        if let Some(port) = self.outputs.get_mut(index) {
            port.value = None;
        }
    }

    /// Resolved type of data output `index`
    pub fn output_type(&self, index: usize) -> PortType {
        let index = self.output_index(index);
        self.outputs
            .get(index)
            .map_or(PortType::FLOAT, OutputPort::ty)
    }

    /// Look up a scoped variable, falling back from promoted to custom naming
    pub fn var(&self, name: &str) -> Option<&Variable> {
        let name = resolve_var_name(&*self.scope, name)?;
        self.scope.get(name)
    }

    /// Declare or update a scoped variable
    pub fn set_var(&mut self, name: &str, ty: PortType, value: Option<Value>) {
        self.scope.insert(name.to_string(), Variable { ty, value });
    }

    /// Value of a promoted property of this node, if it is promoted
    pub fn promoted(&self, property: &str) -> Option<Value> {
        self.env.params.promoted_value(self.node, property)
    }

    /// Outer environment
    pub fn env(&self) -> &EvalEnv<'a> {
        self.env
    }
}

/// Context for narrowing one node's output types
pub struct TypeContext<'a> {
    upstream: Vec<Option<PortType>>,
    outputs: &'a mut [OutputPort],
    scope: &'a mut IndexMap<String, Variable>,
    env: &'a EvalEnv<'a>,
}

impl<'a> TypeContext<'a> {
    pub(crate) fn new(
        upstream: Vec<Option<PortType>>,
        outputs: &'a mut [OutputPort],
        scope: &'a mut IndexMap<String, Variable>,
        env: &'a EvalEnv<'a>,
    ) -> Self {
        Self {
            upstream,
            outputs,
            scope,
            env,
        }
    }

    fn output_index(&self, index: usize) -> usize {
        index + usize::from(self.outputs.first().is_some_and(OutputPort::is_control))
    }

    /// Resolved type of the output feeding data input `index`
    pub fn input_type(&self, index: usize) -> Option<PortType> {
        self.upstream.get(index).copied().flatten()
    }

    /// Type declared for data output `index`
    pub fn declared(&self, index: usize) -> PortType {
        let index = self.output_index(index);
        self.outputs
            .get(index)
            .map_or(PortType::FLOAT, OutputPort::declared)
    }

    /// Narrow data output `index`
    pub fn set_output_type(&mut self, index: usize, ty: PortType) {
        let index = self.output_index(index);
        if let Some(port) = self.outputs.get_mut(index) {
            port.set_type(ty);
        }
    }

    /// Restore data output `index` to its declared type
    pub fn reset_output_type(&mut self, index: usize) {
        let ty = self.declared(index);
        self.set_output_type(index, ty);
    }

    /// Type of a scoped variable, falling back from promoted to custom naming
    pub fn var_type(&self, name: &str) -> Option<PortType> {
        let name = resolve_var_name(&*self.scope, name)?;
        self.scope.get(name).map(|v| v.ty)
    }

    /// Record a variable's type without touching a stored value of the same type
    pub fn declare_var(&mut self, name: &str, ty: PortType) {
        match self.scope.get_mut(name) {
            Some(var) if var.ty == ty => {}
            Some(var) => {
                var.ty = ty;
                var.value = None;
            }
            None => {
                self.scope
                    .insert(name.to_string(), Variable { ty, value: None });
            }
        }
    }

    /// Outer environment
    pub fn env(&self) -> &EvalEnv<'a> {
        self.env
    }
}

/// Context for generating one node's fragment
pub struct EmitContext<'a> {
    graph: &'a Graph,
    node: &'a Node,
    env: &'a EvalEnv<'a>,
    text: &'a str,
    body: Option<&'a str>,
}

impl<'a> EmitContext<'a> {
    pub(crate) fn new(
        graph: &'a Graph,
        node: &'a Node,
        env: &'a EvalEnv<'a>,
        text: &'a str,
        body: Option<&'a str>,
    ) -> Self {
        Self {
            graph,
            node,
            env,
            text,
            body,
        }
    }

    /// The node being emitted
    pub fn node(&self) -> &Node {
        self.node
    }

    /// Text generated so far in this unit
    pub fn text(&self) -> &str {
        self.text
    }

    /// Generated body of a loop node
    pub fn body(&self) -> Option<&str> {
        self.body
    }

    /// Identifier of this node's data output `index`
    pub fn ident(&self, index: usize) -> String {
        self.node.ident(index + self.node.output_offset())
    }

    /// Resolved type of this node's data output `index`
    pub fn output_type(&self, index: usize) -> PortType {
        self.node
            .output(index + self.node.output_offset())
            .map_or(PortType::FLOAT, OutputPort::ty)
    }

    /// Number of data inputs
    pub fn input_count(&self) -> usize {
        self.node.inputs().len() - self.node.input_offset()
    }

    /// Name of data input `index`
    pub fn input_name(&self, index: usize) -> Option<&str> {
        self.node
            .input(index + self.node.input_offset())
            .map(|p| p.name.as_str())
    }

    /// Identifier of the output feeding data input `index`
    pub fn input(&self, index: usize) -> Option<String> {
        let upstream = self
            .node
            .input(index + self.node.input_offset())?
            .upstream()?;
        let source = self.graph.node(upstream.node)?;
        Some(source.ident(upstream.port))
    }

    /// Resolved type of the output feeding data input `index`
    pub fn input_type(&self, index: usize) -> Option<PortType> {
        let upstream = self
            .node
            .input(index + self.node.input_offset())?
            .upstream()?;
        self.graph.output_type(upstream)
    }

    /// Identifier and type of data input `index`
    pub fn operand(&self, index: usize) -> Option<(String, PortType)> {
        Some((self.input(index)?, self.input_type(index)?))
    }

    /// Type of a scoped variable
    pub fn var_type(&self, name: &str) -> Option<PortType> {
        let name = resolve_var_name(self.graph.variables(), name)?;
        self.graph.var(name).map(|v| v.ty)
    }

    /// Name a variable read resolves to, applying the promoted-to-custom fallback
    pub fn resolve_var<'n>(&'n self, name: &'n str) -> &'n str {
        resolve_var_name(self.graph.variables(), name).unwrap_or(name)
    }

    /// Code name of a promoted property of this node
    pub fn promoted_name(&self, property: &str) -> Option<String> {
        self.env.params.promoted_code_name(self.node.id, property)
    }

    /// Outer environment
    pub fn env(&self) -> &EvalEnv<'a> {
        self.env
    }
}
