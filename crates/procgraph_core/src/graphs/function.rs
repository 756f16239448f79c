// SPDX-License-Identifier: MIT OR Apache-2.0
//! Function graphs: reusable subroutines with one entry and one output.
//!
//! A [`Function`] wraps a [`Graph`] and compiles it two ways from the same
//! execution order: [`Function::interpret`] walks the order on the CPU, and
//! [`Function::function_source`] / [`Function::program_source`] lower it to
//! compute-shader text. Both the order and the source are memoized; the order
//! is invalidated by structural edits (`dirty`), the source by any edit
//! (`modified`).

use crate::evaluation::{CallStack, EvalEnv};
use crate::graph::{Graph, GraphError, GraphEvent};
use crate::graphs::flatten::flatten;
use crate::graphs::glsl::{self, OutputTarget};
use crate::node::{NodeId, NodeRole};
use crate::nodes::call::{CallBinding, CallNode};
use crate::nodes::variable::Arg;
use crate::parameter::{sanitize_identifier, ParameterScope};
use crate::port::{InputPort, InputRef, OutputRef, PortType};
use crate::settings::GraphSettings;
use crate::shader::{BackendError, GpuContext, ShaderBackend};
use crate::value::Value;
use glam::Vec2;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for a function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionId(pub Uuid);

impl FunctionId {
    /// Create a new random function ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FunctionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A function shared between a library, call nodes and parameters
#[derive(Clone)]
pub struct SharedFunction {
    id: FunctionId,
    inner: Arc<Mutex<Function>>,
}

impl SharedFunction {
    /// Wrap a function
    pub fn new(function: Function) -> Self {
        Self {
            id: function.id,
            inner: Arc::new(Mutex::new(function)),
        }
    }

    /// ID of the wrapped function
    pub fn id(&self) -> FunctionId {
        self.id
    }

    /// Lock the function, blocking
    pub fn lock(&self) -> MutexGuard<'_, Function> {
        self.inner.lock()
    }

    /// Lock the function if no one else holds it
    pub fn try_lock(&self) -> Option<MutexGuard<'_, Function>> {
        self.inner.try_lock()
    }

    /// Interpret the function, guarding against reference cycles.
    ///
    /// A function already on the call stack (directly or through parameter
    /// chains) resolves to absent instead of recursing.
    pub fn evaluate(&self, env: &EvalEnv<'_>, args: &[(String, Value)]) -> Option<Value> {
        if env.stack.contains(self.id) {
            tracing::error!("Reference cycle through function {}; result is absent", self.id);
            return None;
        }
        let Some(mut function) = self.try_lock() else {
            tracing::error!("Function {} is busy; result is absent", self.id);
            return None;
        };
        function.interpret(env, args)
    }
}

impl fmt::Debug for SharedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("SharedFunction");
        s.field("id", &self.id);
        if let Some(function) = self.try_lock() {
            s.field("name", &function.name);
        }
        s.finish()
    }
}

/// Name, arguments and result type of a function, as seen by call sites
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    /// Function ID
    pub id: FunctionId,
    /// Function name
    pub name: String,
    /// Formal arguments in declaration order
    pub args: Vec<(String, PortType)>,
    /// Result type, if an output is designated
    pub output: Option<PortType>,
}

/// Everything generated source depends on besides the graph itself
#[derive(Debug, Clone, PartialEq)]
struct SourceStamp {
    settings: GraphSettings,
    params: ParameterScope,
    callees: Vec<(FunctionId, u64, u64)>,
}

/// A reusable subroutine graph
#[derive(Debug)]
pub struct Function {
    id: FunctionId,
    name: String,
    graph: Graph,
    output: Option<NodeId>,
    dirty: bool,
    modified: bool,
    seen: (u64, u64),
    order: Vec<NodeId>,
    source: Option<(SourceStamp, String)>,
    result: Option<Value>,
}

impl Function {
    /// Create a new empty function
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(FunctionId::new(), name)
    }

    /// Create a function with a known ID (used when restoring snapshots)
    pub fn with_id(id: FunctionId, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            graph: Graph::new(name.clone()),
            name,
            output: None,
            dirty: true,
            modified: true,
            seen: (0, 0),
            order: Vec::new(),
            source: None,
            result: None,
        }
    }

    /// Function ID
    pub fn id(&self) -> FunctionId {
        self.id
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the function. Call sites re-resolve by name on the next rebind.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.graph.name = self.name.clone();
        self.modified = true;
    }

    /// Body graph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Mutable body graph; edits are picked up through the graph's revision counters
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Designated output node
    pub fn output(&self) -> Option<NodeId> {
        self.output
    }

    /// Designate the output node
    pub fn set_output(&mut self, node: Option<NodeId>) {
        let node = node.filter(|id| self.graph.contains_node(*id));
        self.output = node;
        self.dirty = true;
        self.modified = true;
        self.graph.emit(GraphEvent::OutputSet(node));
    }

    /// Last interpreted result
    pub fn result(&self) -> Option<Value> {
        self.result
    }

    /// Whether the cached execution order is stale
    pub fn is_dirty(&self) -> bool {
        self.dirty || self.graph.revision() != self.seen.0
    }

    /// Whether the cached source is stale
    pub fn is_modified(&self) -> bool {
        self.modified || self.is_dirty() || self.graph.content_revision() != self.seen.1
    }

    fn sync(&mut self) {
        let revision = (self.graph.revision(), self.graph.content_revision());
        if revision.0 != self.seen.0 {
            self.dirty = true;
            self.modified = true;
        }
        if revision.1 != self.seen.1 {
            self.modified = true;
        }
        self.seen = revision;
        if self.output.is_some_and(|id| !self.graph.contains_node(id)) {
            self.output = None;
        }
    }

    // ------------------------------------------------------------------
    // Role views
    // ------------------------------------------------------------------

    fn nodes_with_role(&self, role: NodeRole) -> Vec<NodeId> {
        self.graph
            .nodes()
            .filter(|n| n.role() == role)
            .map(|n| n.id)
            .collect()
    }

    /// Entry marker, if present
    pub fn entry(&self) -> Option<NodeId> {
        self.graph
            .nodes()
            .find(|n| n.role() == NodeRole::Entry)
            .map(|n| n.id)
    }

    /// Argument declarations in graph order
    pub fn args(&self) -> Vec<NodeId> {
        self.nodes_with_role(NodeRole::Argument)
    }

    /// Call nodes in graph order
    pub fn calls(&self) -> Vec<NodeId> {
        self.nodes_with_role(NodeRole::Call)
    }

    /// Loop nodes in graph order
    pub fn loops(&self) -> Vec<NodeId> {
        self.nodes_with_role(NodeRole::Loop)
    }

    /// Formal arguments as (name, type)
    pub fn arg_list(&self) -> Vec<(String, PortType)> {
        self.args()
            .into_iter()
            .filter_map(|id| self.graph.node(id)?.downcast::<Arg>())
            .map(|arg| (arg.name().to_string(), arg.ty()))
            .collect()
    }

    /// Call sites as (callee name, binding)
    pub fn call_targets(&self) -> Vec<(String, Option<CallBinding>)> {
        self.calls()
            .into_iter()
            .filter_map(|id| self.graph.node(id)?.downcast::<CallNode>())
            .map(|call| (call.function().to_string(), call.binding()))
            .collect()
    }

    /// Signature seen by call sites, with the output type settled by propagation
    pub fn signature(&mut self) -> FunctionSignature {
        self.settle_types();
        FunctionSignature {
            id: self.id,
            name: self.name.clone(),
            args: self.arg_list(),
            output: self.output_type(),
        }
    }

    /// Result type: the output node's first data output
    pub fn output_type(&self) -> Option<PortType> {
        let node = self.graph.node(self.output?)?;
        Some(node.output(node.result_port()?)?.ty())
    }

    /// Generated identifier holding the result
    pub fn result_ident(&self) -> Option<String> {
        let node = self.graph.node(self.output?)?;
        Some(node.ident(node.result_port()?))
    }

    // ------------------------------------------------------------------
    // Ordering
    // ------------------------------------------------------------------

    /// Linear execution order, recomputed only after structural edits
    pub fn execution_order(&mut self) -> &[NodeId] {
        self.sync();
        if self.dirty {
            self.order = self.compute_order();
            self.dirty = false;
            tracing::debug!("Function {} ordered {} node(s)", self.name, self.order.len());
        }
        &self.order
    }

    fn compute_order(&self) -> Vec<NodeId> {
        let Some(output) = self.output else {
            return Vec::new();
        };
        let entry = self.entry();
        let start = entry.unwrap_or_else(|| self.first_in_chain(output));

        let mut seen = HashSet::new();
        let mut order = self.travel_branch(start, &mut seen, Some(output));
        if let Some(entry) = entry {
            order.retain(|id| *id != entry);
        }
        order
    }

    /// Walk back from `node` along control input 0 to the head of its chain
    fn first_in_chain(&self, node: NodeId) -> NodeId {
        let mut visited = HashSet::from([node]);
        let mut current = node;
        while let Some(previous) = self.control_upstream(current) {
            if !visited.insert(previous) {
                break;
            }
            current = previous;
        }
        current
    }

    fn control_upstream(&self, node: NodeId) -> Option<NodeId> {
        let input = self.graph.node(node)?.input(0)?;
        if !input.is_control() {
            return None;
        }
        input.upstream().map(|u| u.node)
    }

    /// Forward traversal along control edges.
    ///
    /// Data producers without control outputs are placed inline before each
    /// consumer and are never marked seen. A loop's body output is skipped;
    /// the loop orders its own body.
    fn travel_branch(
        &self,
        start: NodeId,
        seen: &mut HashSet<NodeId>,
        stop: Option<NodeId>,
    ) -> Vec<NodeId> {
        let mut forward = Vec::new();
        let mut queue = std::collections::VecDeque::from([start]);

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let Some(node) = self.graph.node(id) else {
                continue;
            };

            for input in node.inputs() {
                let Some(upstream) = input.upstream() else {
                    continue;
                };
                if self
                    .graph
                    .node(upstream.node)
                    .is_some_and(|n| !n.has_control_output())
                {
                    forward.push(upstream.node);
                }
            }
            forward.push(id);

            if Some(id) == stop {
                continue;
            }

            let is_loop = node.role() == NodeRole::Loop;
            for (i, output) in node.outputs().iter().enumerate() {
                if (is_loop && i == 0) || !output.is_control() {
                    continue;
                }
                match output.downstream() {
                    [] => {}
                    [next] => queue.push_back(next.node),
                    targets => {
                        for target in targets {
                            forward.extend(self.travel_branch(target.node, seen, stop));
                        }
                    }
                }
            }
        }
        forward
    }

    /// Nodes run on each iteration of a loop, in order
    pub fn loop_body(&self, loop_node: NodeId) -> Vec<NodeId> {
        let Some(node) = self.graph.node(loop_node) else {
            return Vec::new();
        };
        let Some(body) = node.output(0).filter(|o| o.is_control()) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        body.downstream()
            .iter()
            .flat_map(|target| self.travel_branch(target.node, &mut seen, None))
            .collect()
    }

    // ------------------------------------------------------------------
    // Scope
    // ------------------------------------------------------------------

    /// Reset the variable scope to built-ins, parameters and arguments
    fn reset_scope(&mut self, env: &EvalEnv<'_>, args: &[(String, Value)]) {
        let graph = &mut self.graph;
        graph.clear_vars();
        let seed = env.settings.random_seed as f32;
        graph.set_var("PI", PortType::FLOAT, Some(Value::Float(std::f32::consts::PI)));
        graph.set_var("Rad2Deg", PortType::FLOAT, Some(Value::Float(180.0 / std::f32::consts::PI)));
        graph.set_var("Deg2Rad", PortType::FLOAT, Some(Value::Float(std::f32::consts::PI / 180.0)));
        graph.set_var("RandomSeed", PortType::FLOAT, Some(Value::Float(seed)));
        graph.set_var("size", PortType::FLOAT2, Some(Value::Float2(env.settings.size())));
        graph.set_var("pos", PortType::FLOAT2, Some(Value::Float2(Vec2::ZERO)));
        graph.set_var("uv", PortType::FLOAT2, Some(Value::Float2(Vec2::ZERO)));

        for param in env.params.variables() {
            graph.set_var(param.code_name.clone(), param.ty, param.value);
        }

        let declared = self.arg_list();
        for (name, ty) in &declared {
            self.graph
                .set_var(name.clone(), *ty, Some(Value::default_for(*ty)));
        }
        for (name, value) in args {
            let ty = declared
                .iter()
                .find(|(n, _)| n == name)
                .map_or_else(|| value.port_type(), |(_, ty)| *ty);
            self.graph
                .set_var(name.clone(), ty, Some(value.coerce_or_default(ty)));
        }
    }

    /// Run type propagation over the whole order outside of any call
    fn settle_types(&mut self) {
        if self.output.is_none() {
            return;
        }
        let settings = self.graph.settings().clone();
        let empty = ParameterScope::new();
        let stack = CallStack::new();
        let env = EvalEnv::new(&[], &settings, &empty, &stack);
        let scope = self.scope(&env);
        let env = env.with_params(&scope);

        self.reset_scope(&env, &[]);
        let order = self.execution_order().to_vec();
        self.propagate_sequence(&order, &env);
    }

    fn propagate_sequence(&mut self, nodes: &[NodeId], env: &EvalEnv<'_>) {
        for &id in nodes {
            self.graph.propagate_node(id, env);
            if self.graph.node(id).is_some_and(|n| n.role() == NodeRole::Loop) {
                let body = self.loop_body(id);
                self.propagate_sequence(&body, env);
            }
        }
    }

    // ------------------------------------------------------------------
    // Code generation
    // ------------------------------------------------------------------

    /// Propagate types and emit each node in `nodes`, appending to `text`.
    ///
    /// A fragment already present in the text is not repeated. Returns `None`
    /// when any node is not ready.
    fn emit_sequence(&mut self, nodes: &[NodeId], env: &EvalEnv<'_>, text: &mut String) -> bool {
        for &id in nodes {
            self.graph.propagate_node(id, env);

            let is_loop = self.graph.node(id).is_some_and(|n| n.role() == NodeRole::Loop);
            let body = if is_loop {
                let body_nodes = self.loop_body(id);
                let mut scratch = text.clone();
                let mark = scratch.len();
                if !self.emit_sequence(&body_nodes, env, &mut scratch) {
                    return false;
                }
                Some(scratch.split_off(mark))
            } else {
                None
            };

            let Some(part) = self.graph.emit_node(id, env, text, body.as_deref()) else {
                tracing::debug!("Node {id} in {} is not ready; no source generated", self.name);
                return false;
            };
            if !text.contains(&part) {
                text.push_str(&part);
            }
        }
        true
    }

    /// Parameters of this function's own graph layered over the inherited ones
    fn scope(&self, env: &EvalEnv<'_>) -> ParameterScope {
        let own = self.graph.resolve_parameters(env);
        env.params.layered(&own)
    }

    fn stamp(&self, env: &EvalEnv<'_>) -> SourceStamp {
        let callees = flatten(self, env.library)
            .iter()
            .filter_map(|f| {
                let f = f.try_lock()?;
                Some((f.id, f.graph.revision(), f.graph.content_revision()))
            })
            .collect();
        SourceStamp {
            settings: env.settings.clone(),
            params: env.params.clone(),
            callees,
        }
    }

    /// Source of this function as a callable definition, memoized.
    ///
    /// Returns `None` when there is no output, the output type is unknown or a
    /// node is not ready.
    pub fn function_source(&mut self, env: &EvalEnv<'_>) -> Option<String> {
        self.sync();
        let scope = self.scope(env);
        let env = env.with_params(&scope);
        let stamp = self.stamp(&env);

        if !self.modified {
            if let Some((cached, source)) = &self.source {
                if *cached == stamp {
                    return Some(source.clone());
                }
            }
        }

        let source = self.build_function_source(&env);
        self.source = source.clone().map(|s| (stamp, s));
        self.modified = false;
        source
    }

    fn build_function_source(&mut self, env: &EvalEnv<'_>) -> Option<String> {
        self.output?;
        self.reset_scope(env, &[]);
        let order = self.execution_order().to_vec();

        // Types must be settled before the signature is written.
        self.propagate_sequence(&order, env);
        let ty = self.output_type()?;

        let args: Vec<String> = self
            .arg_list()
            .iter()
            .map(|(name, ty)| format!("{} {name}", ty.glsl_type()))
            .collect();
        let mut text = format!(
            "{} {}({}) {{\n",
            ty.glsl_type(),
            sanitize_identifier(&self.name),
            args.join(", ")
        );

        if !self.emit_sequence(&order, env, &mut text) {
            return None;
        }
        let ident = self.result_ident()?;
        text.push_str(&format!("return {ident};\n}}\n\n"));
        Some(text)
    }

    /// Complete compute program with this function as the entry body
    pub fn program_source(&mut self, env: &EvalEnv<'_>, target: OutputTarget) -> Option<String> {
        self.sync();
        self.output?;
        let scope = self.scope(env);
        let env = env.with_params(&scope);

        let mut text = glsl::preamble(env.settings, target);
        text.push_str(&glsl::parameter_globals(env.params));

        for callee in flatten(self, env.library) {
            let Some(mut function) = callee.try_lock() else {
                tracing::warn!("Callee {} is busy; skipping its definition", callee.id());
                continue;
            };
            let Some(source) = function.function_source(&env) else {
                tracing::debug!("Callee {} produced no source", function.name);
                return None;
            };
            if !text.contains(&source) {
                text.push_str(&source);
            }
        }

        self.reset_scope(&env, &[]);
        let order = self.execution_order().to_vec();

        // Declarations and repeats are detected against `main` alone, never
        // against the callee definitions above it.
        let mut body = String::from("void main() {\n");
        body.push_str(glsl::main_setup(target));
        for (name, ty) in self.arg_list() {
            let value = Value::default_for(ty).to_glsl();
            body.push_str(&format!("{} {name} = {value};\n", ty.glsl_type()));
        }

        if !self.emit_sequence(&order, &env, &mut body) {
            return None;
        }
        let ty = self.output_type()?;
        let ident = self.result_ident()?;
        body.push_str(&glsl::write_result(target, &ident, ty));
        body.push_str("}\n");
        text.push_str(&body);
        Some(text)
    }

    // ------------------------------------------------------------------
    // Interpretation
    // ------------------------------------------------------------------

    /// Interpret the function on the CPU with the given argument values
    pub fn interpret(&mut self, env: &EvalEnv<'_>, args: &[(String, Value)]) -> Option<Value> {
        if env.stack.depth() >= env.settings.max_call_depth {
            tracing::error!(
                "Call depth {} exceeded while entering {}",
                env.settings.max_call_depth,
                self.name
            );
            return None;
        }
        env.stack.push(self.id);
        let result = self.interpret_inner(env, args);
        env.stack.pop();
        self.result = result;
        result
    }

    fn interpret_inner(&mut self, env: &EvalEnv<'_>, args: &[(String, Value)]) -> Option<Value> {
        let output = self.output?;
        let scope = self.scope(env);
        let env = env.with_params(&scope);

        self.reset_scope(&env, args);
        let order = self.execution_order().to_vec();
        let mut budget = env.settings.max_loop_iterations;
        self.run_nodes(&order, &env, &mut budget);

        let node = self.graph.node(output)?;
        let port = node.result_port()?;
        self.graph.output_value(OutputRef::new(output, port)).copied()
    }

    fn run_nodes(&mut self, nodes: &[NodeId], env: &EvalEnv<'_>, budget: &mut u32) {
        for &id in nodes {
            self.graph.propagate_node(id, env);
            self.graph.evaluate_node(id, env);
            if self.graph.node(id).is_some_and(|n| n.role() == NodeRole::Loop) {
                self.run_loop(id, env, budget);
            }
        }
    }

    fn run_loop(&mut self, id: NodeId, env: &EvalEnv<'_>, budget: &mut u32) {
        let Some(range) = self.graph.node(id).and_then(|n| n.kind().loop_range()) else {
            return;
        };
        let body = self.loop_body(id);
        let current = self
            .graph
            .node(id)
            .and_then(|n| n.result_port())
            .map(|port| OutputRef::new(id, port));

        for i in range.values() {
            if *budget == 0 {
                tracing::warn!(
                    "Loop {id} in {} hit the iteration limit of {}",
                    self.name,
                    env.settings.max_loop_iterations
                );
                return;
            }
            *budget -= 1;
            if let Some(current) = current {
                self.graph.set_output_value(current, Some(Value::Float(i)));
            }
            self.run_nodes(&body, env, budget);
        }
    }

    // ------------------------------------------------------------------
    // GPU
    // ------------------------------------------------------------------

    /// Compile (if needed) and run on the GPU, decoding the single result
    pub fn evaluate_gpu<B: ShaderBackend>(
        &mut self,
        gpu: &mut GpuContext<B>,
        env: &EvalEnv<'_>,
    ) -> Result<Option<Value>, BackendError> {
        let Some(source) = self.program_source(env, OutputTarget::Buffer) else {
            return Ok(None);
        };
        let Some(ty) = self.output_type() else {
            return Ok(None);
        };
        let data = gpu.run(self.id, &source, env.settings)?;
        let value = Value::from_components(ty, &data);
        self.result = value;
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Bind a call node to a library function, rebuilding its argument inputs.
    ///
    /// Existing edges survive where the slot still exists and its new type
    /// accepts the upstream; the rest are dropped.
    pub fn bind_call(
        &mut self,
        call: NodeId,
        index: usize,
        signature: &FunctionSignature,
    ) -> Result<(), GraphError> {
        let node = self
            .graph
            .node(call)
            .ok_or(GraphError::NodeNotFound(call))?;
        if node.downcast::<CallNode>().is_none() {
            return Err(GraphError::NotACall(call));
        }

        let mut ports = vec![InputPort::new("Execute", PortType::CONTROL)];
        ports.extend(
            signature
                .args
                .iter()
                .map(|(name, ty)| InputPort::new(name.clone(), *ty)),
        );
        self.graph.rebuild_inputs(call, ports);
        if let Some(ty) = signature.output {
            self.graph.redeclare_output(OutputRef::new(call, 1), ty);
        }
        if let Some(kind) = self.graph.kind_mut::<CallNode>(call) {
            kind.bind(
                signature.name.clone(),
                CallBinding {
                    index,
                    id: signature.id,
                },
            );
        }
        Ok(())
    }

    /// Re-resolve every call node by name against `library`.
    ///
    /// Returns the call nodes whose target no longer exists.
    pub fn rebind_calls(&mut self, library: &[SharedFunction]) -> Vec<NodeId> {
        let mut unresolved = Vec::new();
        let mut own: Option<FunctionSignature> = None;
        for call in self.calls() {
            let Some(name) = self
                .graph
                .node(call)
                .and_then(|n| n.downcast::<CallNode>())
                .map(|c| c.function().to_string())
            else {
                continue;
            };

            let mut found = None;
            for (index, f) in library.iter().enumerate() {
                if f.id() == self.id {
                    if self.name == name {
                        let signature = own.get_or_insert_with(|| self.signature()).clone();
                        found = Some((index, signature));
                        break;
                    }
                    continue;
                }
                let Some(mut f) = f.try_lock() else {
                    continue;
                };
                if f.name == name {
                    found = Some((index, f.signature()));
                    break;
                }
            }

            match found {
                Some((index, signature)) => {
                    if let Err(e) = self.bind_call(call, index, &signature) {
                        tracing::error!("Failed to bind call {call}: {e}");
                    }
                }
                None => {
                    tracing::error!("Call target {name:?} not found in {}", self.name);
                    if let Some(kind) = self.graph.kind_mut::<CallNode>(call) {
                        kind.unbind();
                    }
                    unresolved.push(call);
                }
            }
        }
        unresolved
    }

    /// Connect an input of a node in the body, for call-site convenience
    pub fn connect(&mut self, from: OutputRef, to: InputRef) -> Result<(), GraphError> {
        self.graph.connect(from, to)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Disposal
    // ------------------------------------------------------------------

    /// Drop caches and function-valued parameters, returning every disposed function ID
    pub fn dispose(&mut self) -> Vec<FunctionId> {
        let mut disposed = vec![self.id];
        disposed.extend(self.graph.dispose_parameters());
        for function in self.graph.functions() {
            if let Some(mut f) = function.try_lock() {
                disposed.extend(f.dispose());
            }
        }
        self.source = None;
        self.order.clear();
        self.dirty = true;
        self.modified = true;
        disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::arithmetic::{BinaryMath, BinaryOp};
    use crate::nodes::constant::Constant;
    use crate::nodes::flow::{Execute, ForLoop};
    use crate::nodes::variable::{GetVar, SetVar};
    use crate::parameter::ParameterValue;

    fn control(f: &mut Function, from: NodeId, from_port: usize, to: NodeId) {
        f.connect(OutputRef::new(from, from_port), InputRef::new(to, 0))
            .unwrap();
    }

    fn data(f: &mut Function, from: NodeId, from_port: usize, to: NodeId, to_port: usize) {
        f.connect(OutputRef::new(from, from_port), InputRef::new(to, to_port))
            .unwrap();
    }

    /// Execute -> Multiply(2, 3)
    fn multiply_function() -> (Function, [NodeId; 3]) {
        let mut f = Function::new("Product");
        let exec = f.graph_mut().add_node(Execute);
        let a = f.graph_mut().add_node(Constant::float(2.0));
        let b = f.graph_mut().add_node(Constant::float(3.0));
        let mul = f.graph_mut().add_node(BinaryMath::new(BinaryOp::Multiply));
        control(&mut f, exec, 0, mul);
        data(&mut f, a, 0, mul, 1);
        data(&mut f, b, 0, mul, 2);
        f.set_output(Some(mul));
        (f, [a, b, mul])
    }

    fn with_env<R>(f: impl FnOnce(&EvalEnv<'_>) -> R) -> R {
        let settings = GraphSettings::default();
        let params = ParameterScope::new();
        let stack = CallStack::new();
        let env = EvalEnv::new(&[], &settings, &params, &stack);
        f(&env)
    }

    #[test]
    fn test_multiply_interpret_and_source() {
        let (mut f, [a, b, mul]) = multiply_function();
        let result = with_env(|env| f.interpret(env, &[]));
        assert_eq!(result, Some(Value::Float(6.0)));
        assert_eq!(f.result(), Some(Value::Float(6.0)));

        let source = with_env(|env| f.function_source(env)).unwrap();
        let sa = f.graph().node(a).unwrap().ident(0);
        let sb = f.graph().node(b).unwrap().ident(0);
        let sm = f.graph().node(mul).unwrap().ident(1);
        assert!(source.starts_with("float Product() {\n"));
        assert!(source.contains(&format!("float {sa} = 2.0;")));
        assert!(source.contains(&format!("float {sm} = {sa} * {sb};")));
        assert!(source.ends_with(&format!("return {sm};\n}}\n\n")));
    }

    #[test]
    fn test_order_respects_control_edges() {
        let (mut f, [a, b, mul]) = multiply_function();
        let set = f.graph_mut().add_node(SetVar::new("out"));
        control(&mut f, mul, 0, set);
        data(&mut f, mul, 1, set, 1);
        f.set_output(Some(set));

        let order = f.execution_order().to_vec();
        let pos = |id| order.iter().position(|n| *n == id).unwrap();
        assert!(pos(a) < pos(mul));
        assert!(pos(b) < pos(mul));
        assert!(pos(mul) < pos(set));
        assert!(f.entry().is_some_and(|e| !order.contains(&e)));
    }

    #[test]
    fn test_order_without_entry_walks_back() {
        let mut f = Function::new("NoEntry");
        let first = f.graph_mut().add_node(SetVar::new("x"));
        let second = f.graph_mut().add_node(SetVar::new("y"));
        let c = f.graph_mut().add_node(Constant::float(1.0));
        control(&mut f, first, 0, second);
        data(&mut f, c, 0, first, 1);
        data(&mut f, first, 1, second, 1);
        f.set_output(Some(second));

        assert_eq!(f.execution_order(), &[c, first, second]);
    }

    #[test]
    fn test_loop_accumulates() {
        let mut f = Function::new("Accumulate");
        let exec = f.graph_mut().add_node(Execute);
        let zero = f.graph_mut().add_node(Constant::float(0.0));
        let init = f.graph_mut().add_node(SetVar::new("acc"));
        let start = f.graph_mut().add_node(Constant::float(0.0));
        let end = f.graph_mut().add_node(Constant::float(3.0));
        let step = f.graph_mut().add_node(Constant::float(1.0));
        let lp = f.graph_mut().add_node(ForLoop::default());
        let read = f.graph_mut().add_node(GetVar::new("acc"));
        let add = f.graph_mut().add_node(BinaryMath::new(BinaryOp::Add));
        let update = f.graph_mut().add_node(SetVar::new("acc"));
        let total_read = f.graph_mut().add_node(GetVar::new("acc"));
        let total = f.graph_mut().add_node(SetVar::new("total"));

        control(&mut f, exec, 0, init);
        data(&mut f, zero, 0, init, 1);
        control(&mut f, init, 0, lp);
        data(&mut f, start, 0, lp, 1);
        data(&mut f, end, 0, lp, 2);
        data(&mut f, step, 0, lp, 3);
        // body
        control(&mut f, lp, 0, add);
        data(&mut f, read, 0, add, 1);
        data(&mut f, lp, 1, add, 2);
        control(&mut f, add, 0, update);
        data(&mut f, add, 1, update, 1);
        // after the loop
        control(&mut f, lp, 2, total);
        data(&mut f, total_read, 0, total, 1);
        f.set_output(Some(total));

        assert_eq!(f.loop_body(lp), vec![read, add, update]);
        let result = with_env(|env| f.interpret(env, &[]));
        assert_eq!(result, Some(Value::Float(3.0)));

        let source = with_env(|env| f.function_source(env)).unwrap();
        let current = f.graph().node(lp).unwrap().ident(1);
        assert!(source.contains(&format!("for (float {current} = ")));
        assert!(source.contains(&format!("{current} -= ")));
        assert!(source.contains("float acc = "));
        assert!(source.contains("\nacc = "));
    }

    #[test]
    fn test_fan_out_orders_each_branch_after_its_head() {
        let mut f = Function::new("Fan");
        let exec = f.graph_mut().add_node(Execute);
        let one = f.graph_mut().add_node(Constant::float(1.0));
        let two = f.graph_mut().add_node(Constant::float(2.0));
        let x = f.graph_mut().add_node(SetVar::new("x"));
        let z = f.graph_mut().add_node(SetVar::new("z"));
        let y = f.graph_mut().add_node(SetVar::new("y"));
        let read_x = f.graph_mut().add_node(GetVar::new("x"));
        let read_y = f.graph_mut().add_node(GetVar::new("y"));
        let sum = f.graph_mut().add_node(BinaryMath::new(BinaryOp::Add));

        // exec fans out to x and y
        control(&mut f, exec, 0, x);
        control(&mut f, exec, 0, y);
        data(&mut f, one, 0, x, 1);
        control(&mut f, x, 0, z);
        data(&mut f, x, 1, z, 1);
        data(&mut f, two, 0, y, 1);
        control(&mut f, y, 0, sum);
        data(&mut f, read_x, 0, sum, 1);
        data(&mut f, read_y, 0, sum, 2);
        f.set_output(Some(sum));

        let order = f.execution_order().to_vec();
        assert_eq!(order, vec![one, x, z, two, y, read_x, read_y, sum]);
        let pos = |id: NodeId| order.iter().position(|o| *o == id).unwrap();
        for (from, to) in [(x, z), (y, sum)] {
            assert!(pos(from) < pos(to));
        }
        assert_eq!(with_env(|env| f.interpret(env, &[])), Some(Value::Float(3.0)));
    }

    #[test]
    fn test_nested_loop_owns_only_direct_body() {
        let mut f = Function::new("Nested");
        let exec = f.graph_mut().add_node(Execute);
        let zero = f.graph_mut().add_node(Constant::float(0.0));
        let one = f.graph_mut().add_node(Constant::float(1.0));
        let two = f.graph_mut().add_node(Constant::float(2.0));
        let three = f.graph_mut().add_node(Constant::float(3.0));
        let init = f.graph_mut().add_node(SetVar::new("acc"));
        let outer = f.graph_mut().add_node(ForLoop::default());
        let inner = f.graph_mut().add_node(ForLoop::default());
        let read = f.graph_mut().add_node(GetVar::new("acc"));
        let add = f.graph_mut().add_node(BinaryMath::new(BinaryOp::Add));
        let update = f.graph_mut().add_node(SetVar::new("acc"));
        let total_read = f.graph_mut().add_node(GetVar::new("acc"));
        let total = f.graph_mut().add_node(SetVar::new("total"));

        control(&mut f, exec, 0, init);
        data(&mut f, zero, 0, init, 1);
        control(&mut f, init, 0, outer);
        data(&mut f, zero, 0, outer, 1);
        data(&mut f, two, 0, outer, 2);
        data(&mut f, one, 0, outer, 3);
        // outer body: the inner loop
        control(&mut f, outer, 0, inner);
        data(&mut f, zero, 0, inner, 1);
        data(&mut f, three, 0, inner, 2);
        data(&mut f, one, 0, inner, 3);
        // inner body: acc += 1
        control(&mut f, inner, 0, add);
        data(&mut f, read, 0, add, 1);
        data(&mut f, one, 0, add, 2);
        control(&mut f, add, 0, update);
        data(&mut f, add, 1, update, 1);
        // after the outer loop
        control(&mut f, outer, 2, total);
        data(&mut f, total_read, 0, total, 1);
        f.set_output(Some(total));

        let outer_body = f.loop_body(outer);
        assert_eq!(outer_body, vec![zero, three, one, inner]);
        assert_eq!(f.loop_body(inner), vec![read, one, add, update]);
        let order = f.execution_order().to_vec();
        assert!(!order.contains(&inner));
        assert!(!order.contains(&add));

        assert_eq!(with_env(|env| f.interpret(env, &[])), Some(Value::Float(6.0)));

        let source = with_env(|env| f.function_source(env)).unwrap();
        for lp in [outer, inner] {
            let current = f.graph().node(lp).unwrap().ident(1);
            assert!(source.contains(&format!("for (float {current} = ")), "{source}");
        }
    }

    #[test]
    fn test_loop_iteration_limit() {
        let mut f = Function::new("Spin");
        let exec = f.graph_mut().add_node(Execute);
        let zero = f.graph_mut().add_node(Constant::float(0.0));
        let init = f.graph_mut().add_node(SetVar::new("n"));
        let start = f.graph_mut().add_node(Constant::float(0.0));
        let end = f.graph_mut().add_node(Constant::float(1000.0));
        let step = f.graph_mut().add_node(Constant::float(1.0));
        let lp = f.graph_mut().add_node(ForLoop::default());
        let count_read = f.graph_mut().add_node(GetVar::new("n"));
        let one = f.graph_mut().add_node(Constant::float(1.0));
        let add = f.graph_mut().add_node(BinaryMath::new(BinaryOp::Add));
        let count = f.graph_mut().add_node(SetVar::new("n"));
        let result_read = f.graph_mut().add_node(GetVar::new("n"));
        let result = f.graph_mut().add_node(SetVar::new("result"));

        control(&mut f, exec, 0, init);
        data(&mut f, zero, 0, init, 1);
        control(&mut f, init, 0, lp);
        data(&mut f, start, 0, lp, 1);
        data(&mut f, end, 0, lp, 2);
        data(&mut f, step, 0, lp, 3);
        control(&mut f, lp, 0, add);
        data(&mut f, count_read, 0, add, 1);
        data(&mut f, one, 0, add, 2);
        control(&mut f, add, 0, count);
        data(&mut f, add, 1, count, 1);
        control(&mut f, lp, 2, result);
        data(&mut f, result_read, 0, result, 1);
        f.set_output(Some(result));

        let settings = GraphSettings {
            max_loop_iterations: 10,
            ..Default::default()
        };
        let params = ParameterScope::new();
        let stack = CallStack::new();
        let env = EvalEnv::new(&[], &settings, &params, &stack);
        assert_eq!(f.interpret(&env, &[]), Some(Value::Float(10.0)));
    }

    #[test]
    fn test_source_memoized_and_invalidated() {
        let (mut f, _) = multiply_function();
        let first = with_env(|env| f.function_source(env)).unwrap();
        assert!(!f.is_modified());
        let second = with_env(|env| f.function_source(env)).unwrap();
        assert_eq!(first, second);

        f.graph_mut().add_node(Constant::float(9.0));
        assert!(f.is_modified());
        assert!(f.is_dirty());
        let third = with_env(|env| f.function_source(env)).unwrap();
        assert!(!f.is_modified());
        assert_eq!(first, third);
    }

    #[test]
    fn test_shared_producer_emitted_once() {
        let mut f = Function::new("Square");
        let exec = f.graph_mut().add_node(Execute);
        let c = f.graph_mut().add_node(Constant::float(4.0));
        let m1 = f.graph_mut().add_node(BinaryMath::new(BinaryOp::Multiply));
        let m2 = f.graph_mut().add_node(BinaryMath::new(BinaryOp::Add));
        control(&mut f, exec, 0, m1);
        control(&mut f, m1, 0, m2);
        data(&mut f, c, 0, m1, 1);
        data(&mut f, c, 0, m1, 2);
        data(&mut f, c, 0, m2, 1);
        data(&mut f, m1, 1, m2, 2);
        f.set_output(Some(m2));

        let order = f.execution_order().to_vec();
        assert!(order.iter().filter(|id| **id == c).count() >= 2);

        let source = with_env(|env| f.function_source(env)).unwrap();
        let decl = format!("float {}0 = 4.0;", f.graph().node(c).unwrap().shader_id());
        assert_eq!(source.matches(&decl).count(), 1);
        assert_eq!(with_env(|env| f.interpret(env, &[])), Some(Value::Float(20.0)));
    }

    #[test]
    fn test_not_ready_aborts_source() {
        let mut f = Function::new("Broken");
        let exec = f.graph_mut().add_node(Execute);
        let a = f.graph_mut().add_node(Constant::float(1.0));
        let mul = f.graph_mut().add_node(BinaryMath::new(BinaryOp::Multiply));
        control(&mut f, exec, 0, mul);
        data(&mut f, a, 0, mul, 1);
        f.set_output(Some(mul));

        assert_eq!(with_env(|env| f.function_source(env)), None);
        assert_eq!(with_env(|env| f.interpret(env, &[])), None);
    }

    #[test]
    fn test_arguments_in_signature_and_scope() {
        let mut f = Function::new("Scale It");
        f.graph_mut().add_node(Arg::new("x", PortType::FLOAT));
        let exec = f.graph_mut().add_node(Execute);
        let x = f.graph_mut().add_node(GetVar::new("x"));
        let two = f.graph_mut().add_node(Constant::float(2.0));
        let mul = f.graph_mut().add_node(BinaryMath::new(BinaryOp::Multiply));
        control(&mut f, exec, 0, mul);
        data(&mut f, x, 0, mul, 1);
        data(&mut f, two, 0, mul, 2);
        f.set_output(Some(mul));

        let sig = f.signature();
        assert_eq!(sig.args, vec![("x".to_string(), PortType::FLOAT)]);
        assert_eq!(sig.output, Some(PortType::FLOAT));

        let result = with_env(|env| f.interpret(env, &[("x".into(), Value::Float(5.0))]));
        assert_eq!(result, Some(Value::Float(10.0)));
        let source = with_env(|env| f.function_source(env)).unwrap();
        assert!(source.starts_with("float ScaleIt(float x) {\n"));
    }

    #[test]
    fn test_program_buffer_write() {
        let (mut f, [.., mul]) = multiply_function();
        let source = with_env(|env| f.program_source(env, OutputTarget::Buffer)).unwrap();
        let ident = f.graph().node(mul).unwrap().ident(1);
        assert!(source.starts_with("#version 430\n"));
        assert!(source.contains("void main() {\n"));
        assert!(source.contains(&format!("result[0] = {ident};")));
        assert!(source.trim_end().ends_with('}'));
    }

    #[test]
    fn test_gpu_result_decoded() {
        use crate::shader::tests::RecordingBackend;

        let (mut f, _) = multiply_function();
        let mut gpu = GpuContext::new(RecordingBackend {
            result: vec![6.0],
            ..Default::default()
        });
        let result = with_env(|env| f.evaluate_gpu(&mut gpu, env)).unwrap();
        assert_eq!(result, Some(Value::Float(6.0)));
        assert!(gpu.has_program(f.id()));
        assert!(gpu.backend().sources[0].contains("void main() {\n"));
    }

    /// `name() = a + b`
    fn sum_function(name: &str, a: f32, b: f32) -> Function {
        let mut f = Function::new(name);
        let exec = f.graph_mut().add_node(Execute);
        let ca = f.graph_mut().add_node(Constant::float(a));
        let cb = f.graph_mut().add_node(Constant::float(b));
        let add = f.graph_mut().add_node(BinaryMath::new(BinaryOp::Add));
        control(&mut f, exec, 0, add);
        data(&mut f, ca, 0, add, 1);
        data(&mut f, cb, 0, add, 2);
        f.set_output(Some(add));
        f
    }

    #[test]
    fn test_function_parameter_resolved() {
        let mut graph = Graph::new("Host");
        let c = graph.add_node(Constant::float(1.0));
        let key = graph.promote(c, "value").unwrap();
        assert_eq!(graph.parameter_value(&key), Some(Value::Float(1.0)));

        graph
            .set_parameter_function(&key, sum_function("Seven", 3.0, 4.0))
            .unwrap();
        assert_eq!(graph.parameter_value(&key), Some(Value::Float(7.0)));
    }

    #[test]
    fn test_parameter_cycle_resolves_absent() {
        let mut graph = Graph::new("Host");
        let c = graph.add_node(Constant::float(1.0));
        let key = graph.promote(c, "value").unwrap();
        let first = graph
            .set_parameter_function(&key, sum_function("First", 3.0, 4.0))
            .unwrap();

        // First -> Second -> First through custom parameters
        let mut second = sum_function("Second", 1.0, 1.0);
        second.graph_mut().add_custom_parameter(ParameterValue::function(
            "Back",
            PortType::FLOAT,
            first.clone(),
        ));
        let second = SharedFunction::new(second);
        first.lock().graph_mut().add_custom_parameter(ParameterValue::function(
            "Next",
            PortType::FLOAT,
            second.clone(),
        ));

        assert_eq!(graph.parameter_value(&key), Some(Value::Float(7.0)));

        let settings = GraphSettings::default();
        let params = ParameterScope::new();
        let stack = CallStack::new();
        let env = EvalEnv::new(&[], &settings, &params, &stack);
        assert_eq!(first.evaluate(&env, &[]), Some(Value::Float(7.0)));
        assert_eq!(stack.depth(), 0);

        // break the reference loop so both functions are freed
        first.lock().graph_mut().remove_custom_parameter(0);
    }

    #[test]
    fn test_dispose_collects_parameter_functions() {
        let mut f = Function::new("Outer");
        let inner = SharedFunction::new(Function::new("Inner"));
        let inner_id = inner.id();
        f.graph_mut()
            .add_custom_parameter(ParameterValue::function("Driven", PortType::FLOAT, inner));
        let disposed = f.dispose();
        assert_eq!(disposed, vec![f.id(), inner_id]);
        assert!(f.graph().custom_parameters().is_empty());
    }
}
