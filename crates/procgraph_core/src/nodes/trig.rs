// SPDX-License-Identifier: MIT OR Apache-2.0
//! Trigonometry nodes. Angles are in radians.

use super::{cast, declare, impl_any};
use crate::evaluation::{EmitContext, EvalContext, TypeContext};
use crate::node::NodeKind;
use crate::port::{PortLayout, PortType};

/// Trigonometric function of one angle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrigOp {
    /// `sin(x)`
    Sine,
    /// `cos(x)`
    Cosine,
    /// `tan(x)`
    Tangent,
}

impl TrigOp {
    fn glsl(self) -> &'static str {
        match self {
            Self::Sine => "sin",
            Self::Cosine => "cos",
            Self::Tangent => "tan",
        }
    }

    fn apply(self, x: f32) -> f32 {
        match self {
            Self::Sine => x.sin(),
            Self::Cosine => x.cos(),
            Self::Tangent => x.tan(),
        }
    }
}

/// Component-wise trigonometric function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trig {
    op: TrigOp,
}

impl Trig {
    /// Node applying `op`
    pub fn new(op: TrigOp) -> Self {
        Self { op }
    }
}

impl NodeKind for Trig {
    fn type_name(&self) -> &'static str {
        match self.op {
            TrigOp::Sine => "sine",
            TrigOp::Cosine => "cosine",
            TrigOp::Tangent => "tangent",
        }
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("Angle", PortType::NUMERIC)
            .output("Result", PortType::NUMERIC)
    }

    fn propagate_type(&self, cx: &mut TypeContext<'_>) {
        match cx.input_type(0) {
            Some(ty) => cx.set_output_type(0, ty.normalized()),
            None => cx.reset_output_type(0),
        }
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let (x, ty) = cx.operand(0)?;
        let expr = format!("{}({x})", self.op.glsl());
        Some(declare(ty.normalized(), &cx.ident(0), &expr))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        match cx.input(0).map(|x| x.map(|v| self.op.apply(v))) {
            Some(Ok(value)) => cx.set_output(0, value),
            Some(Err(e)) => {
                tracing::warn!("{:?}: {e}", self.op);
                cx.clear_output(0);
            }
            None => cx.clear_output(0),
        }
    }

    impl_any!();
}

/// Two-argument arc tangent, `atan(y, x)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArcTangent;

impl NodeKind for ArcTangent {
    fn type_name(&self) -> &'static str {
        "arc_tangent"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("Y", PortType::NUMERIC)
            .input("X", PortType::NUMERIC)
            .output("Angle", PortType::NUMERIC)
    }

    fn propagate_type(&self, cx: &mut TypeContext<'_>) {
        let ty = match (cx.input_type(0), cx.input_type(1)) {
            (Some(y), Some(x)) if y.components() >= x.components() => Some(y.normalized()),
            (Some(_), Some(x)) | (None, Some(x)) => Some(x.normalized()),
            (Some(y), None) => Some(y.normalized()),
            (None, None) => None,
        };
        match ty {
            Some(ty) => cx.set_output_type(0, ty),
            None => cx.reset_output_type(0),
        }
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let (y, ty) = cx.operand(0)?;
        let (x, tx) = cx.operand(1)?;
        let out = cx.output_type(0).normalized();
        let expr = format!("atan({}, {})", cast(&y, ty, out), cast(&x, tx, out));
        Some(declare(out, &cx.ident(0), &expr))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let (Some(y), Some(x)) = (cx.input(0).copied(), cx.input(1).copied()) else {
            cx.clear_output(0);
            return;
        };
        let ty = cx.output_type(0);
        match y.zip(&x, f32::atan2) {
            Ok(value) => cx.set_output(0, value.coerce_or_default(ty)),
            Err(e) => {
                tracing::warn!("Arc tangent: {e}");
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
    use crate::nodes::constant::Constant;
    use crate::parameter::ParameterScope;
    use crate::port::{InputRef, OutputRef};
    use crate::settings::GraphSettings;
    use crate::value::Value;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_sine_and_atan() {
        let mut graph = Graph::new("test");
        let angle = graph.add_node(Constant::float(FRAC_PI_2));
        let sine = graph.add_node(Trig::new(TrigOp::Sine));
        let one = graph.add_node(Constant::float(1.0));
        let zero = graph.add_node(Constant::float(0.0));
        let atan = graph.add_node(ArcTangent);
        graph.connect(OutputRef::new(angle, 0), InputRef::new(sine, 1)).unwrap();
        graph.connect(OutputRef::new(one, 0), InputRef::new(atan, 1)).unwrap();
        graph.connect(OutputRef::new(zero, 0), InputRef::new(atan, 2)).unwrap();

        let settings = GraphSettings::default();
        let params = ParameterScope::new();
        let stack = CallStack::new();
        let env = EvalEnv::new(&[], &settings, &params, &stack);
        for id in [angle, sine, one, zero, atan] {
            graph.propagate_node(id, &env);
            graph.evaluate_node(id, &env);
        }

        let Some(Value::Float(s)) = graph.output_value(OutputRef::new(sine, 1)).copied() else {
            panic!("sine produced no scalar");
        };
        assert!((s - 1.0).abs() < 1e-6);
        let Some(Value::Float(a)) = graph.output_value(OutputRef::new(atan, 1)).copied() else {
            panic!("atan produced no scalar");
        };
        assert!((a - FRAC_PI_2).abs() < 1e-6);

        let sa = graph.node(angle).unwrap().ident(0);
        let code = graph.emit_node(sine, &env, "", None).unwrap();
        assert!(code.ends_with(&format!(" = sin({sa});\n")), "{code}");
        assert!(code.starts_with("float "));
    }
}
