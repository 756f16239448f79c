// SPDX-License-Identifier: MIT OR Apache-2.0
//! Comparison and boolean nodes.
//!
//! Booleans travel as `float` in generated code, so every result is written
//! as `cond ? 1.0 : 0.0` and every operand is tested with `!= 0.0`.

use super::{declare, impl_any};
use crate::evaluation::{EmitContext, EvalContext};
use crate::node::NodeKind;
use crate::port::{PortLayout, PortType};
use crate::value::{Value, ValueError};

const CONDITION: PortType = PortType::FLOAT.union(PortType::BOOL);

fn declare_bool(cx: &EmitContext<'_>, condition: &str) -> String {
    declare(PortType::BOOL, &cx.ident(0), &format!("({condition}) ? 1.0 : 0.0"))
}

fn write_bool(cx: &mut EvalContext<'_>, result: Option<Result<bool, ValueError>>, what: &str) {
    match result {
        Some(Ok(b)) => cx.set_output(0, Value::Bool(b)),
        Some(Err(e)) => {
            tracing::warn!("{what}: {e}");
            cx.clear_output(0);
        }
        None => cx.clear_output(0),
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `a == b`
    Equal,
    /// `a != b`
    NotEqual,
    /// `a > b`
    Greater,
    /// `a >= b`
    GreaterEqual,
    /// `a < b`
    Less,
    /// `a <= b`
    LessEqual,
}

impl CompareOp {
    /// Every operator, in registry order
    pub const ALL: [CompareOp; 6] = [
        Self::Equal,
        Self::NotEqual,
        Self::Greater,
        Self::GreaterEqual,
        Self::Less,
        Self::LessEqual,
    ];

    /// Registry identifier
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Equal => "equal",
            Self::NotEqual => "not_equal",
            Self::Greater => "greater_than",
            Self::GreaterEqual => "greater_than_equal",
            Self::Less => "less_than",
            Self::LessEqual => "less_than_equal",
        }
    }

    /// Display name
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Equal => "Equal",
            Self::NotEqual => "Not Equal",
            Self::Greater => "Greater Than",
            Self::GreaterEqual => "Greater Than Or Equal",
            Self::Less => "Less Than",
            Self::LessEqual => "Less Than Or Equal",
        }
    }

    /// Backend operator
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::Less => "<",
            Self::LessEqual => "<=",
        }
    }

    fn apply(self, a: f32, b: f32) -> bool {
        match self {
            Self::Equal => a == b,
            Self::NotEqual => a != b,
            Self::Greater => a > b,
            Self::GreaterEqual => a >= b,
            Self::Less => a < b,
            Self::LessEqual => a <= b,
        }
    }
}

/// Compare two scalars
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compare {
    op: CompareOp,
}

impl Compare {
    /// Node applying `op`
    pub fn new(op: CompareOp) -> Self {
        Self { op }
    }
}

impl NodeKind for Compare {
    fn type_name(&self) -> &'static str {
        self.op.type_name()
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("A", CONDITION)
            .input("B", CONDITION)
            .output("Result", PortType::BOOL)
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let a = cx.input(0)?;
        let b = cx.input(1)?;
        Some(declare_bool(cx, &format!("{a} {} {b}", self.op.symbol())))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let result = match (cx.input(0), cx.input(1)) {
            (Some(a), Some(b)) => Some(
                a.as_float()
                    .and_then(|a| Ok(self.op.apply(a, b.as_float()?))),
            ),
            _ => None,
        };
        write_bool(cx, result, self.op.display_name());
    }

    impl_any!();
}

/// Binary boolean operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicOp {
    /// Both true
    And,
    /// Either true
    Or,
}

/// Combine two conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Logic {
    op: LogicOp,
}

impl Logic {
    /// Node applying `op`
    pub fn new(op: LogicOp) -> Self {
        Self { op }
    }
}

impl NodeKind for Logic {
    fn type_name(&self) -> &'static str {
        match self.op {
            LogicOp::And => "and",
            LogicOp::Or => "or",
        }
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("A", CONDITION)
            .input("B", CONDITION)
            .output("Result", PortType::BOOL)
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let a = cx.input(0)?;
        let b = cx.input(1)?;
        let joiner = match self.op {
            LogicOp::And => "&&",
            LogicOp::Or => "||",
        };
        Some(declare_bool(cx, &format!("{a} != 0.0 {joiner} {b} != 0.0")))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let result = match (cx.input(0), cx.input(1)) {
            (Some(a), Some(b)) => Some(a.as_bool().and_then(|a| {
                let b = b.as_bool()?;
                Ok(match self.op {
                    LogicOp::And => a && b,
                    LogicOp::Or => a || b,
                })
            })),
            _ => None,
        };
        write_bool(cx, result, "Logic");
    }

    impl_any!();
}

/// Negate a condition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Not;

impl NodeKind for Not {
    fn type_name(&self) -> &'static str {
        "not"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("Value", CONDITION)
            .output("Result", PortType::BOOL)
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let a = cx.input(0)?;
        Some(declare_bool(cx, &format!("{a} == 0.0")))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let result = cx.input(0).map(|v| v.as_bool().map(|b| !b));
        write_bool(cx, result, "Not");
    }

    impl_any!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{CallStack, EvalEnv};
    use crate::graph::Graph;
    use crate::nodes::constant::Constant;
    use crate::parameter::ParameterScope;
    use crate::port::{InputRef, OutputRef};
    use crate::settings::GraphSettings;

    #[test]
    fn test_compare_and_combine() {
        let mut graph = Graph::new("test");
        let a = graph.add_node(Constant::float(2.0));
        let b = graph.add_node(Constant::float(3.0));
        let less = graph.add_node(Compare::new(CompareOp::Less));
        let equal = graph.add_node(Compare::new(CompareOp::Equal));
        let and = graph.add_node(Logic::new(LogicOp::And));
        let not = graph.add_node(Not);
        graph.connect(OutputRef::new(a, 0), InputRef::new(less, 1)).unwrap();
        graph.connect(OutputRef::new(b, 0), InputRef::new(less, 2)).unwrap();
        graph.connect(OutputRef::new(a, 0), InputRef::new(equal, 1)).unwrap();
        graph.connect(OutputRef::new(b, 0), InputRef::new(equal, 2)).unwrap();
        graph.connect(OutputRef::new(less, 1), InputRef::new(and, 1)).unwrap();
        graph.connect(OutputRef::new(equal, 1), InputRef::new(not, 1)).unwrap();
        graph.connect(OutputRef::new(not, 1), InputRef::new(and, 2)).unwrap();

        let settings = GraphSettings::default();
        let params = ParameterScope::new();
        let stack = CallStack::new();
        let env = EvalEnv::new(&[], &settings, &params, &stack);
        for id in [a, b, less, equal, not, and] {
            graph.propagate_node(id, &env);
            graph.evaluate_node(id, &env);
        }
        assert_eq!(graph.output_value(OutputRef::new(less, 1)), Some(&Value::Bool(true)));
        assert_eq!(graph.output_value(OutputRef::new(equal, 1)), Some(&Value::Bool(false)));
        assert_eq!(graph.output_value(OutputRef::new(and, 1)), Some(&Value::Bool(true)));

        let sa = graph.node(a).unwrap().ident(0);
        let sb = graph.node(b).unwrap().ident(0);
        let code = graph.emit_node(less, &env, "", None).unwrap();
        assert!(code.starts_with("float "));
        assert!(code.ends_with(&format!(" = ({sa} < {sb}) ? 1.0 : 0.0;\n")), "{code}");
    }
}
