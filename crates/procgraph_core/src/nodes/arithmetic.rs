// SPDX-License-Identifier: MIT OR Apache-2.0
//! Arithmetic nodes.
//!
//! Binary operations derive their result type from a fixed table:
//!
//! | A        | B            | Result        |
//! |----------|--------------|---------------|
//! | scalar   | scalar       | scalar        |
//! | scalar   | vectorN      | vectorN       |
//! | vectorN  | vectorN      | vectorN       |
//! | matrix   | vector2/3/4  | same vector (multiply only, w = 1) |
//! | matrix   | matrix       | matrix        |
//! | matrix   | scalar       | matrix (component-wise ops only)  |
//!
//! Vectors of different widths do not combine.

use super::{cast, declare, impl_any};
use crate::evaluation::{EmitContext, EvalContext, TypeContext};
use crate::node::NodeKind;
use crate::port::{PortLayout, PortType};
use crate::value::{Value, ValueError};

/// Types accepted by math inputs
const MATH_INPUT: PortType = PortType::NUMERIC.union(PortType::BOOL).union(PortType::MATRIX);

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `a + b`
    Add,
    /// `a - b`
    Subtract,
    /// `a * b`, matrix products included
    Multiply,
    /// `a / b`
    Divide,
    /// `mod(a, b)`
    Modulo,
    /// `pow(a, b)`
    Pow,
    /// `min(a, b)`
    Min,
    /// `max(a, b)`
    Max,
}

impl BinaryOp {
    /// Every operator, in registry order
    pub const ALL: [BinaryOp; 8] = [
        Self::Add,
        Self::Subtract,
        Self::Multiply,
        Self::Divide,
        Self::Modulo,
        Self::Pow,
        Self::Min,
        Self::Max,
    ];

    /// Registry identifier
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Multiply => "multiply",
            Self::Divide => "divide",
            Self::Modulo => "modulo",
            Self::Pow => "pow",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    /// Display name
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Add => "Add",
            Self::Subtract => "Subtract",
            Self::Multiply => "Multiply",
            Self::Divide => "Divide",
            Self::Modulo => "Modulo",
            Self::Pow => "Power",
            Self::Min => "Minimum",
            Self::Max => "Maximum",
        }
    }

    /// Registry description
    pub fn description(self) -> &'static str {
        match self {
            Self::Add => "Add two values",
            Self::Subtract => "Subtract B from A",
            Self::Multiply => "Multiply two values, including matrix transforms",
            Self::Divide => "Divide A by B",
            Self::Modulo => "Remainder of A / B, floored",
            Self::Pow => "A raised to the power B",
            Self::Min => "Smaller of two values",
            Self::Max => "Larger of two values",
        }
    }

    fn allows_matrix(self) -> bool {
        matches!(self, Self::Add | Self::Subtract | Self::Multiply | Self::Divide)
    }

    fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Add => a + b,
            Self::Subtract => a - b,
            Self::Multiply => a * b,
            Self::Divide => a / b,
            Self::Modulo => a - b * (a / b).floor(),
            Self::Pow => a.powf(b),
            Self::Min => a.min(b),
            Self::Max => a.max(b),
        }
    }

    fn expression(self, a: &str, b: &str) -> String {
        match self {
            Self::Add => format!("{a} + {b}"),
            Self::Subtract => format!("{a} - {b}"),
            Self::Multiply => format!("{a} * {b}"),
            Self::Divide => format!("{a} / {b}"),
            Self::Modulo => format!("mod({a}, {b})"),
            Self::Pow => format!("pow({a}, {b})"),
            Self::Min => format!("min({a}, {b})"),
            Self::Max => format!("max({a}, {b})"),
        }
    }
}

/// Result type of `a op b`, or `None` when the operands do not combine
pub fn binary_result_type(op: BinaryOp, a: PortType, b: PortType) -> Option<PortType> {
    let scalar = |t: PortType| t == PortType::FLOAT || t == PortType::BOOL;
    let (a, b) = (a.normalized(), b.normalized());
    let matrix = PortType::MATRIX;

    if a == matrix || b == matrix {
        if !op.allows_matrix() {
            return None;
        }
        return match (a, b) {
            (x, y) if x == matrix && y == matrix => Some(matrix),
            (x, v) if x == matrix && op == BinaryOp::Multiply && PortType::VECTOR.contains(v) => {
                Some(v)
            }
            (x, s) if x == matrix && scalar(s) => Some(matrix),
            (s, x) if x == matrix && scalar(s) => Some(matrix),
            _ => None,
        };
    }
    match (scalar(a), scalar(b)) {
        (true, true) => Some(PortType::FLOAT),
        (true, false) => Some(b),
        (false, true) => Some(a),
        (false, false) if a == b => Some(a),
        (false, false) => None,
    }
}

/// Two-operand arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryMath {
    op: BinaryOp,
}

impl BinaryMath {
    /// Node applying `op`
    pub fn new(op: BinaryOp) -> Self {
        Self { op }
    }

    /// Operator
    pub fn op(&self) -> BinaryOp {
        self.op
    }

    fn compute(&self, a: &Value, b: &Value) -> Result<Value, ValueError> {
        match (self.op, a, b) {
            (BinaryOp::Multiply, Value::Matrix(m), Value::Float2(v)) => {
                Ok(Value::Float2(m.transform_point3(v.extend(0.0)).truncate()))
            }
            (BinaryOp::Multiply, Value::Matrix(m), Value::Float3(v)) => {
                Ok(Value::Float3(m.transform_point3(*v)))
            }
            (BinaryOp::Multiply, Value::Matrix(m), Value::Float4(v)) => {
                Ok(Value::Float4(*m * *v))
            }
            (BinaryOp::Multiply, Value::Matrix(m), Value::Matrix(n)) => {
                Ok(Value::Matrix(*m * *n))
            }
            (_, Value::Matrix(_), Value::Float2(_) | Value::Float3(_) | Value::Float4(_))
            | (_, Value::Float2(_) | Value::Float3(_) | Value::Float4(_), Value::Matrix(_)) => {
                Err(ValueError::Mismatched(a.port_type(), b.port_type()))
            }
            (op, _, _) => a.zip(b, |x, y| op.apply(x, y)),
        }
    }
}

impl NodeKind for BinaryMath {
    fn type_name(&self) -> &'static str {
        self.op.type_name()
    }

    fn ports(&self) -> PortLayout {
        let (input, output) = if self.op.allows_matrix() {
            (MATH_INPUT, PortType::NUMERIC | PortType::MATRIX)
        } else {
            (PortType::NUMERIC | PortType::BOOL, PortType::NUMERIC)
        };
        PortLayout::control()
            .input("A", input)
            .input("B", input)
            .output("Result", output)
    }

    fn propagate_type(&self, cx: &mut TypeContext<'_>) {
        let ty = match (cx.input_type(0), cx.input_type(1)) {
            (Some(a), Some(b)) => binary_result_type(self.op, a, b),
            (Some(t), None) | (None, Some(t)) => Some(t.normalized()),
            (None, None) => None,
        };
        match ty {
            Some(ty) => cx.set_output_type(0, ty),
            None => cx.reset_output_type(0),
        }
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let (a, ta) = cx.operand(0)?;
        let (b, tb) = cx.operand(1)?;
        let Some(ty) = binary_result_type(self.op, ta, tb) else {
            tracing::debug!("{:?} can not combine {ta:?} and {tb:?}", self.op);
            return None;
        };
        let matrix = PortType::MATRIX;
        let expr = match ta.normalized() {
            t if t == matrix && self.op == BinaryOp::Multiply && ty == PortType::FLOAT2 => {
                format!("({a} * vec4({b}, 0.0, 1.0)).xy")
            }
            t if t == matrix && self.op == BinaryOp::Multiply && ty == PortType::FLOAT3 => {
                format!("({a} * vec4({b}, 1.0)).xyz")
            }
            t if t == matrix || ty == matrix => self.op.expression(&a, &b),
            _ => self.op.expression(&cast(&a, ta, ty), &cast(&b, tb, ty)),
        };
        Some(declare(ty, &cx.ident(0), &expr))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let (Some(a), Some(b)) = (cx.input(0).copied(), cx.input(1).copied()) else {
            cx.clear_output(0);
            return;
        };
        let ty = cx.output_type(0);
        match self.compute(&a, &b) {
            Ok(value) => cx.set_output(0, value.coerce_or_default(ty)),
            Err(e) => {
                tracing::warn!("{:?}: {e}", self.op);
                cx.clear_output(0);
            }
        }
    }

    impl_any!();
}

/// Unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `-x`
    Negate,
    /// `abs(x)`
    Absolute,
    /// `floor(x)`
    Floor,
    /// `ceil(x)`
    Ceil,
    /// `round(x)`
    Round,
    /// `fract(x)`
    Fract,
    /// `sqrt(x)`
    Sqrt,
    /// `exp(x)`
    Exponential,
    /// `log(x)`
    Log,
    /// `log2(x)`
    Log2,
    /// `exp2(x)`
    Pow2,
}

impl UnaryOp {
    /// Every operator, in registry order
    pub const ALL: [UnaryOp; 11] = [
        Self::Negate,
        Self::Absolute,
        Self::Floor,
        Self::Ceil,
        Self::Round,
        Self::Fract,
        Self::Sqrt,
        Self::Exponential,
        Self::Log,
        Self::Log2,
        Self::Pow2,
    ];

    /// Registry identifier
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Negate => "negate",
            Self::Absolute => "absolute",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Round => "round",
            Self::Fract => "fract",
            Self::Sqrt => "sqrt",
            Self::Exponential => "exponential",
            Self::Log => "log",
            Self::Log2 => "log2",
            Self::Pow2 => "pow2",
        }
    }

    /// Display name
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Negate => "Negate",
            Self::Absolute => "Absolute",
            Self::Floor => "Floor",
            Self::Ceil => "Ceil",
            Self::Round => "Round",
            Self::Fract => "Fraction",
            Self::Sqrt => "Square Root",
            Self::Exponential => "Exponential",
            Self::Log => "Logarithm",
            Self::Log2 => "Logarithm 2",
            Self::Pow2 => "Power of 2",
        }
    }

    /// Registry description
    pub fn description(self) -> &'static str {
        match self {
            Self::Negate => "Flip the sign",
            Self::Absolute => "Absolute value",
            Self::Floor => "Round down",
            Self::Ceil => "Round up",
            Self::Round => "Round to nearest",
            Self::Fract => "Fractional part",
            Self::Sqrt => "Square root",
            Self::Exponential => "e raised to the value",
            Self::Log => "Natural logarithm",
            Self::Log2 => "Base 2 logarithm",
            Self::Pow2 => "2 raised to the value",
        }
    }

    fn apply(self, x: f32) -> f32 {
        match self {
            Self::Negate => -x,
            Self::Absolute => x.abs(),
            Self::Floor => x.floor(),
            Self::Ceil => x.ceil(),
            Self::Round => x.round(),
            Self::Fract => x - x.floor(),
            Self::Sqrt => x.sqrt(),
            Self::Exponential => x.exp(),
            Self::Log => x.ln(),
            Self::Log2 => x.log2(),
            Self::Pow2 => x.exp2(),
        }
    }

    fn expression(self, x: &str) -> String {
        match self {
            Self::Negate => format!("-{x}"),
            Self::Absolute => format!("abs({x})"),
            Self::Floor => format!("floor({x})"),
            Self::Ceil => format!("ceil({x})"),
            Self::Round => format!("round({x})"),
            Self::Fract => format!("fract({x})"),
            Self::Sqrt => format!("sqrt({x})"),
            Self::Exponential => format!("exp({x})"),
            Self::Log => format!("log({x})"),
            Self::Log2 => format!("log2({x})"),
            Self::Pow2 => format!("exp2({x})"),
        }
    }
}

/// One-operand arithmetic; the result mirrors the input type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnaryMath {
    op: UnaryOp,
}

impl UnaryMath {
    /// Node applying `op`
    pub fn new(op: UnaryOp) -> Self {
        Self { op }
    }
}

impl NodeKind for UnaryMath {
    fn type_name(&self) -> &'static str {
        self.op.type_name()
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("Value", PortType::NUMERIC | PortType::BOOL)
            .output("Result", PortType::NUMERIC)
    }

    fn propagate_type(&self, cx: &mut TypeContext<'_>) {
        match cx.input_type(0) {
            Some(ty) if ty.normalized() == PortType::BOOL => cx.set_output_type(0, PortType::FLOAT),
            Some(ty) => cx.set_output_type(0, ty.normalized()),
            None => cx.reset_output_type(0),
        }
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let (x, ty) = cx.operand(0)?;
        let ty = if ty.normalized() == PortType::BOOL {
            PortType::FLOAT
        } else {
            ty.normalized()
        };
        Some(declare(ty, &cx.ident(0), &self.op.expression(&x)))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let Some(x) = cx.input(0).copied() else {
            cx.clear_output(0);
            return;
        };
        match x.map(|v| self.op.apply(v)) {
            Ok(value) => cx.set_output(0, value),
            Err(e) => {
                tracing::warn!("{:?}: {e}", self.op);
                cx.clear_output(0);
            }
        }
    }

    impl_any!();
}

/// Common type of operands that must agree, allowing scalar broadcast
fn joined_type(types: &[PortType]) -> Option<PortType> {
    let mut joined = PortType::FLOAT;
    for ty in types {
        let ty = ty.normalized();
        let ty = if ty == PortType::BOOL { PortType::FLOAT } else { ty };
        if ty == PortType::FLOAT {
            continue;
        }
        if joined != PortType::FLOAT && joined != ty {
            return None;
        }
        joined = ty;
    }
    Some(joined)
}

/// Limit a value to `[min, max]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Clamp;

impl NodeKind for Clamp {
    fn type_name(&self) -> &'static str {
        "clamp"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("Value", PortType::NUMERIC)
            .input("Min", PortType::NUMERIC)
            .input("Max", PortType::NUMERIC)
            .output("Result", PortType::NUMERIC)
    }

    fn propagate_type(&self, cx: &mut TypeContext<'_>) {
        match cx.input_type(0) {
            Some(ty) => cx.set_output_type(0, ty.normalized()),
            None => cx.reset_output_type(0),
        }
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let (x, tx) = cx.operand(0)?;
        let (lo, tlo) = cx.operand(1)?;
        let (hi, thi) = cx.operand(2)?;
        let ty = joined_type(&[tx, tlo, thi])?;
        let expr = format!(
            "clamp({}, {}, {})",
            cast(&x, tx, ty),
            cast(&lo, tlo, ty),
            cast(&hi, thi, ty)
        );
        Some(declare(ty, &cx.ident(0), &expr))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let (Some(x), Some(lo), Some(hi)) =
            (cx.input(0).copied(), cx.input(1).copied(), cx.input(2).copied())
        else {
            cx.clear_output(0);
            return;
        };
        let ty = cx.output_type(0);
        match x.zip(&lo, f32::max).and_then(|v| v.zip(&hi, f32::min)) {
            Ok(value) => cx.set_output(0, value.coerce_or_default(ty)),
            Err(e) => {
                tracing::warn!("Clamp: {e}");
                cx.clear_output(0);
            }
        }
    }

    impl_any!();
}

/// Linear interpolation `a + (b - a) * t`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lerp;

impl NodeKind for Lerp {
    fn type_name(&self) -> &'static str {
        "lerp"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("A", PortType::NUMERIC)
            .input("B", PortType::NUMERIC)
            .input("T", PortType::NUMERIC)
            .output("Result", PortType::NUMERIC)
    }

    fn propagate_type(&self, cx: &mut TypeContext<'_>) {
        let types: Vec<PortType> = (0..3).filter_map(|i| cx.input_type(i)).collect();
        match joined_type(&types) {
            Some(ty) if !types.is_empty() => cx.set_output_type(0, ty),
            _ => cx.reset_output_type(0),
        }
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let (a, ta) = cx.operand(0)?;
        let (b, tb) = cx.operand(1)?;
        let (t, tt) = cx.operand(2)?;
        let ty = joined_type(&[ta, tb, tt])?;
        let weight = if tt.components() == 1 {
            t
        } else {
            cast(&t, tt, ty)
        };
        let expr = format!("mix({}, {}, {weight})", cast(&a, ta, ty), cast(&b, tb, ty));
        Some(declare(ty, &cx.ident(0), &expr))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let (Some(a), Some(b), Some(t)) =
            (cx.input(0).copied(), cx.input(1).copied(), cx.input(2).copied())
        else {
            cx.clear_output(0);
            return;
        };
        let ty = cx.output_type(0);
        let result = b
            .zip(&a, |b, a| b - a)
            .and_then(|d| d.zip(&t, |d, t| d * t))
            .and_then(|d| a.zip(&d, |a, d| a + d));
        match result {
            Ok(value) => cx.set_output(0, value.coerce_or_default(ty)),
            Err(e) => {
                tracing::warn!("Lerp: {e}");
                cx.clear_output(0);
            }
        }
    }

    impl_any!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{CallStack, EvalEnv};
    use crate::graph::Graph;
    use crate::node::NodeId;
    use crate::nodes::constant::Constant;
    use crate::nodes::matrix::{MatrixNode, Translate};
    use crate::parameter::ParameterScope;
    use crate::port::{InputRef, OutputRef};
    use crate::settings::GraphSettings;
    use glam::{Vec2, Vec3};

    #[test]
    fn test_result_table() {
        use BinaryOp::*;
        let f = PortType::FLOAT;
        assert_eq!(binary_result_type(Multiply, f, f), Some(f));
        assert_eq!(binary_result_type(Multiply, f, PortType::FLOAT3), Some(PortType::FLOAT3));
        assert_eq!(binary_result_type(Add, PortType::FLOAT2, f), Some(PortType::FLOAT2));
        assert_eq!(binary_result_type(Add, PortType::FLOAT2, PortType::FLOAT3), None);
        assert_eq!(
            binary_result_type(Multiply, PortType::MATRIX, PortType::FLOAT2),
            Some(PortType::FLOAT2)
        );
        assert_eq!(
            binary_result_type(Multiply, PortType::MATRIX, PortType::MATRIX),
            Some(PortType::MATRIX)
        );
        assert_eq!(binary_result_type(Add, PortType::MATRIX, PortType::FLOAT2), None);
        assert_eq!(binary_result_type(Pow, PortType::MATRIX, f), None);
        assert_eq!(binary_result_type(Multiply, PortType::FLOAT2, PortType::MATRIX), None);
        assert_eq!(binary_result_type(Min, PortType::COLOR, PortType::FLOAT4), Some(PortType::FLOAT4));
    }

    fn env_parts() -> (GraphSettings, ParameterScope, CallStack) {
        (GraphSettings::default(), ParameterScope::new(), CallStack::new())
    }

    fn run(graph: &mut Graph, nodes: &[NodeId]) {
        let (settings, params, stack) = env_parts();
        let env = EvalEnv::new(&[], &settings, &params, &stack);
        for &id in nodes {
            graph.propagate_node(id, &env);
            graph.evaluate_node(id, &env);
        }
    }

    #[test]
    fn test_matrix_times_vec2() {
        let mut graph = Graph::new("test");
        let offset = graph.add_node(Constant::float2(Vec2::new(1.0, 2.0)));
        let translate = graph.add_node(MatrixNode::<Translate>::default());
        let point = graph.add_node(Constant::float2(Vec2::new(3.0, 4.0)));
        let mul = graph.add_node(BinaryMath::new(BinaryOp::Multiply));
        graph.connect(OutputRef::new(offset, 0), InputRef::new(translate, 1)).unwrap();
        graph.connect(OutputRef::new(translate, 1), InputRef::new(mul, 1)).unwrap();
        graph.connect(OutputRef::new(point, 0), InputRef::new(mul, 2)).unwrap();

        run(&mut graph, &[offset, translate, point, mul]);
        assert_eq!(graph.output_type(OutputRef::new(mul, 1)), Some(PortType::FLOAT2));
        assert_eq!(
            graph.output_value(OutputRef::new(mul, 1)),
            Some(&Value::Float2(Vec2::new(4.0, 6.0)))
        );

        let (settings, params, stack) = env_parts();
        let env = EvalEnv::new(&[], &settings, &params, &stack);
        let code = graph.emit_node(mul, &env, "", None).unwrap();
        assert!(code.contains("vec4("), "{code}");
        assert!(code.contains(".xy;"), "{code}");
    }

    #[test]
    fn test_scalar_broadcast_and_modulo() {
        let mut graph = Graph::new("test");
        let v = graph.add_node(Constant::float3(Vec3::new(-1.0, 5.0, 7.5)));
        let s = graph.add_node(Constant::float(2.0));
        let m = graph.add_node(BinaryMath::new(BinaryOp::Modulo));
        graph.connect(OutputRef::new(v, 0), InputRef::new(m, 1)).unwrap();
        graph.connect(OutputRef::new(s, 0), InputRef::new(m, 2)).unwrap();
        run(&mut graph, &[v, s, m]);
        assert_eq!(
            graph.output_value(OutputRef::new(m, 1)),
            Some(&Value::Float3(Vec3::new(1.0, 1.0, 1.5)))
        );

        let (settings, params, stack) = env_parts();
        let env = EvalEnv::new(&[], &settings, &params, &stack);
        let sv = graph.node(v).unwrap().ident(0);
        let ss = graph.node(s).unwrap().ident(0);
        let code = graph.emit_node(m, &env, "", None).unwrap();
        assert!(code.starts_with("vec3 "));
        assert!(code.contains(&format!("mod({sv}, vec3({ss}))")), "{code}");
    }

    #[test]
    fn test_missing_input_clears_output() {
        let mut graph = Graph::new("test");
        let a = graph.add_node(Constant::float(1.0));
        let add = graph.add_node(BinaryMath::new(BinaryOp::Add));
        graph.connect(OutputRef::new(a, 0), InputRef::new(add, 1)).unwrap();
        run(&mut graph, &[a, add]);
        assert_eq!(graph.output_value(OutputRef::new(add, 1)), None);

        let (settings, params, stack) = env_parts();
        let env = EvalEnv::new(&[], &settings, &params, &stack);
        assert_eq!(graph.emit_node(add, &env, "", None), None);
    }

    #[test]
    fn test_unary_mirrors_type() {
        let mut graph = Graph::new("test");
        let v = graph.add_node(Constant::float2(Vec2::new(-1.5, 2.25)));
        let abs = graph.add_node(UnaryMath::new(UnaryOp::Absolute));
        let fract = graph.add_node(UnaryMath::new(UnaryOp::Fract));
        graph.connect(OutputRef::new(v, 0), InputRef::new(abs, 1)).unwrap();
        graph.connect(OutputRef::new(v, 0), InputRef::new(fract, 1)).unwrap();
        run(&mut graph, &[v, abs, fract]);
        assert_eq!(graph.output_type(OutputRef::new(abs, 1)), Some(PortType::FLOAT2));
        assert_eq!(
            graph.output_value(OutputRef::new(abs, 1)),
            Some(&Value::Float2(Vec2::new(1.5, 2.25)))
        );
        assert_eq!(
            graph.output_value(OutputRef::new(fract, 1)),
            Some(&Value::Float2(Vec2::new(0.5, 0.25)))
        );
    }

    #[test]
    fn test_clamp_and_lerp() {
        let mut graph = Graph::new("test");
        let x = graph.add_node(Constant::float2(Vec2::new(-1.0, 3.0)));
        let lo = graph.add_node(Constant::float(0.0));
        let hi = graph.add_node(Constant::float(1.0));
        let clamp = graph.add_node(Clamp);
        graph.connect(OutputRef::new(x, 0), InputRef::new(clamp, 1)).unwrap();
        graph.connect(OutputRef::new(lo, 0), InputRef::new(clamp, 2)).unwrap();
        graph.connect(OutputRef::new(hi, 0), InputRef::new(clamp, 3)).unwrap();

        let t = graph.add_node(Constant::float(0.25));
        let lerp = graph.add_node(Lerp);
        graph.connect(OutputRef::new(lo, 0), InputRef::new(lerp, 1)).unwrap();
        graph.connect(OutputRef::new(x, 0), InputRef::new(lerp, 2)).unwrap();
        graph.connect(OutputRef::new(t, 0), InputRef::new(lerp, 3)).unwrap();

        run(&mut graph, &[x, lo, hi, t, clamp, lerp]);
        assert_eq!(
            graph.output_value(OutputRef::new(clamp, 1)),
            Some(&Value::Float2(Vec2::new(0.0, 1.0)))
        );
        assert_eq!(
            graph.output_value(OutputRef::new(lerp, 1)),
            Some(&Value::Float2(Vec2::new(-0.25, 0.75)))
        );
    }
}
