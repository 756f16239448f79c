// SPDX-License-Identifier: MIT OR Apache-2.0
//! Call node: invokes another function from the library.
//!
//! The node is bound to its target by library index and function ID, and keeps
//! the target's name so the binding can be re-resolved after the library
//! changes. Its data inputs mirror the target's arguments; they are rebuilt by
//! [`Function::bind_call`](crate::graphs::function::Function::bind_call).

use super::{cast, declare, impl_any, wrong_kind};
use crate::evaluation::{EmitContext, EvalContext};
use crate::graphs::function::FunctionId;
use crate::node::{NodeKind, NodeRole, PropertyError, PropertyKind, PropertyValue};
use crate::parameter::sanitize_identifier;
use crate::port::{PortLayout, PortType};
use crate::value::Value;

/// Resolved call target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallBinding {
    /// Index in the library at bind time
    pub index: usize,
    /// Target function
    pub id: FunctionId,
}

/// Invoke a library function by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallNode {
    function: String,
    binding: Option<CallBinding>,
}

impl CallNode {
    /// Call the function named `function`; unbound until rebinding
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            binding: None,
        }
    }

    /// Target name
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Current binding
    pub fn binding(&self) -> Option<CallBinding> {
        self.binding
    }

    pub(crate) fn bind(&mut self, function: String, binding: CallBinding) {
        self.function = function;
        self.binding = Some(binding);
    }

    pub(crate) fn unbind(&mut self) {
        self.binding = None;
    }
}

impl NodeKind for CallNode {
    fn type_name(&self) -> &'static str {
        "call"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control().output("Result", PortType::ANY_DATA)
    }

    fn role(&self) -> NodeRole {
        NodeRole::Call
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let Some(binding) = self.binding else {
            tracing::debug!("Call to {:?} is unbound", self.function);
            return None;
        };
        if cx.env().function(binding.index, binding.id).is_none() {
            tracing::error!("Call target {:?} is missing from the library", self.function);
            return None;
        }
        let mut args = Vec::with_capacity(cx.input_count());
        for i in 0..cx.input_count() {
            let (source, ty) = cx.operand(i)?;
            let accepted = cx
                .node()
                .input(i + cx.node().input_offset())
                .map_or(ty, |p| p.accepted);
            args.push(if accepted.is_union() {
                source
            } else {
                cast(&source, ty, accepted)
            });
        }
        let ty = cx.output_type(0);
        let expr = format!("{}({})", sanitize_identifier(&self.function), args.join(", "));
        Some(declare(ty, &cx.ident(0), &expr))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let Some(binding) = self.binding else {
            tracing::debug!("Call to {:?} is unbound", self.function);
            cx.clear_output(0);
            return;
        };
        let Some(target) = cx.env().function(binding.index, binding.id) else {
            tracing::error!("Call target {:?} is missing from the library", self.function);
            cx.clear_output(0);
            return;
        };

        let mut args: Vec<(String, Value)> = Vec::with_capacity(cx.input_count());
        for i in 0..cx.input_count() {
            let (Some(name), Some(value)) = (cx.input_name(i), cx.input(i)) else {
                tracing::debug!("Call to {:?} is missing argument {i}", self.function);
                cx.clear_output(0);
                return;
            };
            args.push((name.to_string(), *value));
        }

        let ty = cx.output_type(0);
        match target.evaluate(cx.env(), &args) {
            Some(value) => cx.set_output(0, value.coerce_or_default(ty)),
            None => cx.clear_output(0),
        }
    }

    fn properties(&self) -> Vec<(&'static str, PropertyValue)> {
        vec![("function", PropertyValue::Text(self.function.clone()))]
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        match (name, value) {
            ("function", PropertyValue::Text(text)) => {
                if text != self.function {
                    self.function = text;
                    self.binding = None;
                }
                Ok(())
            }
            ("function", _) => Err(wrong_kind(name, PropertyKind::Text)),
            _ => Err(PropertyError::Unknown(name.to_string())),
        }
    }

    impl_any!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{CallStack, EvalEnv};
    use crate::graphs::function::{Function, SharedFunction};
    use crate::nodes::arithmetic::{BinaryMath, BinaryOp};
    use crate::nodes::constant::Constant;
    use crate::nodes::flow::Execute;
    use crate::nodes::variable::{Arg, GetVar, SetVar};
    use crate::parameter::ParameterScope;
    use crate::port::{InputRef, OutputRef};
    use crate::settings::GraphSettings;

    /// `name(args...) = a * b` over the first two arguments, or `a * 2` with one
    fn product(name: &str, args: &[(&str, PortType)]) -> Function {
        let mut f = Function::new(name);
        for (arg, ty) in args {
            f.graph_mut().add_node(Arg::new(*arg, *ty));
        }
        let exec = f.graph_mut().add_node(Execute);
        let mul = f.graph_mut().add_node(BinaryMath::new(BinaryOp::Multiply));
        let a = f.graph_mut().add_node(GetVar::new(args[0].0));
        let b = match args.get(1) {
            Some((arg, _)) => f.graph_mut().add_node(GetVar::new(*arg)),
            None => f.graph_mut().add_node(Constant::float(2.0)),
        };
        f.connect(OutputRef::new(exec, 0), InputRef::new(mul, 0)).unwrap();
        f.connect(OutputRef::new(a, 0), InputRef::new(mul, 1)).unwrap();
        f.connect(OutputRef::new(b, 0), InputRef::new(mul, 2)).unwrap();
        f.set_output(Some(mul));
        f
    }

    #[test]
    fn test_call_interpret_and_emit() {
        let callee = SharedFunction::new(product(
            "Mul Two",
            &[("a", PortType::FLOAT), ("b", PortType::FLOAT)],
        ));
        let library = vec![callee.clone()];

        let mut caller = Function::new("Caller");
        let exec = caller.graph_mut().add_node(Execute);
        let call = caller.graph_mut().add_node(CallNode::new("Mul Two"));
        let x = caller.graph_mut().add_node(Constant::float(4.0));
        let y = caller.graph_mut().add_node(Constant::float(5.0));
        assert!(caller.rebind_calls(&library).is_empty());
        caller.connect(OutputRef::new(exec, 0), InputRef::new(call, 0)).unwrap();
        caller.connect(OutputRef::new(x, 0), InputRef::new(call, 1)).unwrap();
        caller.connect(OutputRef::new(y, 0), InputRef::new(call, 2)).unwrap();
        caller.set_output(Some(call));

        let settings = GraphSettings::default();
        let params = ParameterScope::new();
        let stack = CallStack::new();
        let env = EvalEnv::new(&library, &settings, &params, &stack);
        assert_eq!(caller.interpret(&env, &[]), Some(Value::Float(20.0)));
        assert_eq!(stack.depth(), 0);

        let program = caller
            .program_source(&env, crate::graphs::glsl::OutputTarget::Buffer)
            .unwrap();
        let sx = caller.graph().node(x).unwrap().ident(0);
        let sy = caller.graph().node(y).unwrap().ident(0);
        assert!(program.contains("float MulTwo(float a, float b) {\n"));
        assert!(program.contains(&format!("= MulTwo({sx}, {sy});")));
        let definition = program.find("float MulTwo(").unwrap();
        let main = program.find("void main()").unwrap();
        assert!(definition < main);
    }

    #[test]
    fn test_main_declares_variable_named_like_callee_argument() {
        let callee = SharedFunction::new(product("Sum", &[("acc", PortType::FLOAT)]));
        let library = vec![callee.clone()];

        let mut caller = Function::new("Caller");
        let exec = caller.graph_mut().add_node(Execute);
        let three = caller.graph_mut().add_node(Constant::float(3.0));
        let set = caller.graph_mut().add_node(SetVar::new("acc"));
        let call = caller.graph_mut().add_node(CallNode::new("Sum"));
        assert!(caller.rebind_calls(&library).is_empty());
        caller.connect(OutputRef::new(exec, 0), InputRef::new(set, 0)).unwrap();
        caller.connect(OutputRef::new(three, 0), InputRef::new(set, 1)).unwrap();
        caller.connect(OutputRef::new(set, 0), InputRef::new(call, 0)).unwrap();
        caller.connect(OutputRef::new(set, 1), InputRef::new(call, 1)).unwrap();
        caller.set_output(Some(call));

        let settings = GraphSettings::default();
        let params = ParameterScope::new();
        let stack = CallStack::new();
        let env = EvalEnv::new(&library, &settings, &params, &stack);
        assert_eq!(caller.interpret(&env, &[]), Some(Value::Float(6.0)));

        let program = caller
            .program_source(&env, crate::graphs::glsl::OutputTarget::Buffer)
            .unwrap();
        let main_start = program.find("void main() {").unwrap();
        let (definitions, main) = program.split_at(main_start);
        assert!(definitions.contains("float Sum(float acc) {\n"));
        assert!(main.contains("\nfloat acc = "), "{main}");
        assert!(!main.contains("\nacc = "), "{main}");
    }

    #[test]
    fn test_rebind_drops_incompatible_inputs() {
        let two = SharedFunction::new(product(
            "Two",
            &[("a", PortType::FLOAT), ("b", PortType::FLOAT)],
        ));
        let one = SharedFunction::new(product("One", &[("v", PortType::FLOAT2)]));

        let mut caller = Function::new("Caller");
        let call = caller.graph_mut().add_node(CallNode::new("Two"));
        let var = caller.graph_mut().add_node(GetVar::new("offset"));
        let c = caller.graph_mut().add_node(Constant::float(1.0));
        let other = caller.graph_mut().add_node(BinaryMath::new(BinaryOp::Add));
        caller.rebind_calls(&[two.clone(), one.clone()]);
        caller.connect(OutputRef::new(var, 0), InputRef::new(call, 1)).unwrap();
        caller.connect(OutputRef::new(c, 0), InputRef::new(call, 2)).unwrap();
        caller.connect(OutputRef::new(c, 0), InputRef::new(other, 1)).unwrap();

        let signature = one.lock().signature();
        caller.bind_call(call, 1, &signature).unwrap();

        let node = caller.graph().node(call).unwrap();
        assert_eq!(node.inputs().len(), 2);
        assert_eq!(node.input(1).unwrap().accepted, PortType::FLOAT2);
        assert_eq!(node.input(1).unwrap().name, "v");
        assert_eq!(node.input(1).unwrap().upstream(), Some(OutputRef::new(var, 0)));
        assert_eq!(
            caller.graph().node(c).unwrap().output(0).unwrap().downstream(),
            &[InputRef::new(other, 1)]
        );
        let binding = node.downcast::<CallNode>().unwrap().binding().unwrap();
        assert_eq!(binding.id, one.id());
        assert_eq!(node.downcast::<CallNode>().unwrap().function(), "One");
        assert_eq!(node.output(1).unwrap().declared(), PortType::FLOAT2);
    }

    #[test]
    fn test_unresolved_call_is_not_ready() {
        let mut caller = Function::new("Caller");
        let exec = caller.graph_mut().add_node(Execute);
        let call = caller.graph_mut().add_node(CallNode::new("Gone"));
        caller.connect(OutputRef::new(exec, 0), InputRef::new(call, 0)).unwrap();
        caller.set_output(Some(call));
        assert_eq!(caller.rebind_calls(&[]), vec![call]);

        let settings = GraphSettings::default();
        let params = ParameterScope::new();
        let stack = CallStack::new();
        let env = EvalEnv::new(&[], &settings, &params, &stack);
        assert_eq!(caller.interpret(&env, &[]), None);
        assert_eq!(caller.function_source(&env), None);
    }

    #[test]
    fn test_recursive_call_resolves_absent() {
        let shared = SharedFunction::new(Function::new("Loop"));
        {
            let mut f = shared.lock();
            let exec = f.graph_mut().add_node(Execute);
            let call = f.graph_mut().add_node(CallNode::new("Loop"));
            f.connect(OutputRef::new(exec, 0), InputRef::new(call, 0)).unwrap();
            f.set_output(Some(call));
            assert!(f.rebind_calls(&[shared.clone()]).is_empty());
        }
        let library = vec![shared.clone()];
        let settings = GraphSettings::default();
        let params = ParameterScope::new();
        let stack = CallStack::new();
        let env = EvalEnv::new(&library, &settings, &params, &stack);
        assert_eq!(shared.evaluate(&env, &[]), None);
        assert_eq!(stack.depth(), 0);
    }
}
