// SPDX-License-Identifier: MIT OR Apache-2.0
//! Vector construction, decomposition and geometry.

use super::{cast, declare, impl_any};
use crate::evaluation::{EmitContext, EvalContext, TypeContext};
use crate::node::NodeKind;
use crate::port::{PortLayout, PortType};
use crate::value::{Value, ValueError};
use glam::{Vec2, Vec4};

const COMPONENTS: [&str; 4] = ["X", "Y", "Z", "W"];
const SWIZZLE: [&str; 4] = ["x", "y", "z", "w"];

/// Build a vector of `width` components from scalars
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MakeVector {
    width: usize,
}

impl MakeVector {
    /// Vector builder of the given width (2 to 4)
    pub fn new(width: usize) -> Self {
        Self {
            width: width.clamp(2, 4),
        }
    }
}

impl NodeKind for MakeVector {
    fn type_name(&self) -> &'static str {
        match self.width {
            2 => "make_float2",
            3 => "make_float3",
            _ => "make_float4",
        }
    }

    fn ports(&self) -> PortLayout {
        COMPONENTS[..self.width]
            .iter()
            .fold(PortLayout::control(), |layout, name| {
                layout.input(*name, PortType::FLOAT | PortType::BOOL)
            })
            .output("Vector", PortType::with_width(self.width))
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let args = (0..self.width)
            .map(|i| cx.input(i))
            .collect::<Option<Vec<_>>>()?;
        let ty = PortType::with_width(self.width);
        let expr = format!("{}({})", ty.glsl_type(), args.join(", "));
        Some(declare(ty, &cx.ident(0), &expr))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let components = (0..self.width)
            .map(|i| cx.input(i).map(Value::as_float))
            .collect::<Option<Result<Vec<f32>, _>>>();
        let value = match components {
            Some(Ok(c)) => Value::from_components(PortType::with_width(self.width), &c),
            Some(Err(e)) => {
                tracing::warn!("Make vector: {e}");
                None
            }
            None => None,
        };
        match value {
            Some(v) => cx.set_output(0, v),
            None => cx.clear_output(0),
        }
    }

    impl_any!();
}

/// Split a vector of `width` components into scalars
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakVector {
    width: usize,
}

impl BreakVector {
    /// Vector splitter of the given width (2 to 4)
    pub fn new(width: usize) -> Self {
        Self {
            width: width.clamp(2, 4),
        }
    }
}

impl NodeKind for BreakVector {
    fn type_name(&self) -> &'static str {
        match self.width {
            2 => "break_float2",
            3 => "break_float3",
            _ => "break_float4",
        }
    }

    fn ports(&self) -> PortLayout {
        COMPONENTS[..self.width].iter().fold(
            PortLayout::control().input("Vector", PortType::VECTOR | PortType::COLOR),
            |layout, name| layout.output(*name, PortType::FLOAT),
        )
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let (v, ty) = cx.operand(0)?;
        let source = cast(&v, ty, PortType::with_width(self.width));
        let source = if source == v { v } else { format!("({source})") };
        Some(
            SWIZZLE[..self.width]
                .iter()
                .enumerate()
                .map(|(i, c)| declare(PortType::FLOAT, &cx.ident(i), &format!("{source}.{c}")))
                .collect(),
        )
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let v = cx.input(0).map(Value::as_vec4);
        for i in 0..self.width {
            match &v {
                Some(Ok(v)) => cx.set_output(i, Value::Float(v[i])),
                Some(Err(e)) => {
                    tracing::warn!("Break vector: {e}");
                    cx.clear_output(i);
                }
                None => cx.clear_output(i),
            }
        }
    }

    impl_any!();
}

fn vector_input(cx: &EvalContext<'_>, index: usize) -> Option<Result<Vec4, ValueError>> {
    cx.input(index).map(Value::as_vec4)
}

/// Euclidean length of a scalar or vector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Length;

impl NodeKind for Length {
    fn type_name(&self) -> &'static str {
        "length"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("Vector", PortType::NUMERIC)
            .output("Length", PortType::FLOAT)
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let v = cx.input(0)?;
        Some(declare(PortType::FLOAT, &cx.ident(0), &format!("length({v})")))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        match vector_input(cx, 0) {
            Some(Ok(v)) => cx.set_output(0, Value::Float(v.length())),
            Some(Err(e)) => {
                tracing::warn!("Length: {e}");
                cx.clear_output(0);
            }
            None => cx.clear_output(0),
        }
    }

    impl_any!();
}

/// Unit vector in the direction of the input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Normalize;

impl NodeKind for Normalize {
    fn type_name(&self) -> &'static str {
        "normalize"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("Vector", PortType::NUMERIC)
            .output("Result", PortType::NUMERIC)
    }

    fn propagate_type(&self, cx: &mut TypeContext<'_>) {
        match cx.input_type(0) {
            Some(ty) => cx.set_output_type(0, ty.normalized()),
            None => cx.reset_output_type(0),
        }
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let (v, ty) = cx.operand(0)?;
        Some(declare(ty.normalized(), &cx.ident(0), &format!("normalize({v})")))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let ty = cx.output_type(0);
        match vector_input(cx, 0) {
            Some(Ok(v)) => {
                // Padding lanes are zero, so the length matches the source width.
                let n = v.normalize_or_zero();
                let n = if ty.components() == 1 { Vec4::splat(v.x.signum()) } else { n };
                cx.set_output(0, Value::Float4(n).coerce_or_default(ty));
            }
            Some(Err(e)) => {
                tracing::warn!("Normalize: {e}");
                cx.clear_output(0);
            }
            None => cx.clear_output(0),
        }
    }

    impl_any!();
}

/// Distance between two points of the same width
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Distance;

impl NodeKind for Distance {
    fn type_name(&self) -> &'static str {
        "distance"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("A", PortType::NUMERIC)
            .input("B", PortType::NUMERIC)
            .output("Distance", PortType::FLOAT)
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let (a, ta) = cx.operand(0)?;
        let (b, tb) = cx.operand(1)?;
        let ty = if ta.components() >= tb.components() { ta } else { tb };
        let expr = format!("distance({}, {})", cast(&a, ta, ty), cast(&b, tb, ty));
        Some(declare(PortType::FLOAT, &cx.ident(0), &expr))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let (Some(a), Some(b)) = (cx.input(0).copied(), cx.input(1).copied()) else {
            cx.clear_output(0);
            return;
        };
        match a.zip(&b, |x, y| x - y).and_then(|d| d.as_vec4()) {
            Ok(d) => cx.set_output(0, Value::Float(d.length())),
            Err(e) => {
                tracing::warn!("Distance: {e}");
                cx.clear_output(0);
            }
        }
    }

    impl_any!();
}

/// Dot product of two vectors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DotProduct;

impl NodeKind for DotProduct {
    fn type_name(&self) -> &'static str {
        "dot_product"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("A", PortType::NUMERIC)
            .input("B", PortType::NUMERIC)
            .output("Dot", PortType::FLOAT)
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let (a, ta) = cx.operand(0)?;
        let (b, tb) = cx.operand(1)?;
        let ty = if ta.components() >= tb.components() { ta } else { tb };
        let expr = format!("dot({}, {})", cast(&a, ta, ty), cast(&b, tb, ty));
        Some(declare(PortType::FLOAT, &cx.ident(0), &expr))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let (Some(a), Some(b)) = (cx.input(0).copied(), cx.input(1).copied()) else {
            cx.clear_output(0);
            return;
        };
        match a.zip(&b, |x, y| x * y).map(|p| p.components().into_iter().sum()) {
            Ok(dot) => cx.set_output(0, Value::Float(dot)),
            Err(e) => {
                tracing::warn!("Dot product: {e}");
                cx.clear_output(0);
            }
        }
    }

    impl_any!();
}

/// Polar coordinates (radius, angle) to Cartesian (x, y)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cartesian;

impl NodeKind for Cartesian {
    fn type_name(&self) -> &'static str {
        "cartesian"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("Radius", PortType::FLOAT)
            .input("Angle", PortType::FLOAT)
            .output("Point", PortType::FLOAT2)
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let r = cx.input(0)?;
        let a = cx.input(1)?;
        let expr = format!("vec2({r} * cos({a}), {r} * sin({a}))");
        Some(declare(PortType::FLOAT2, &cx.ident(0), &expr))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let r = cx.input(0).map(Value::as_float);
        let a = cx.input(1).map(Value::as_float);
        match (r, a) {
            (Some(Ok(r)), Some(Ok(a))) => {
                cx.set_output(0, Value::Float2(Vec2::new(r * a.cos(), r * a.sin())));
            }
            _ => cx.clear_output(0),
        }
    }

    impl_any!();
}

/// Cartesian point to polar coordinates `vec2(radius, angle)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Polar;

impl NodeKind for Polar {
    fn type_name(&self) -> &'static str {
        "polar"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("Point", PortType::FLOAT2)
            .output("Polar", PortType::FLOAT2)
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let p = cx.input(0)?;
        let expr = format!("vec2(length({p}), atan({p}.y, {p}.x))");
        Some(declare(PortType::FLOAT2, &cx.ident(0), &expr))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        match cx.input(0).map(Value::as_vec2) {
            Some(Ok(p)) => cx.set_output(0, Value::Float2(Vec2::new(p.length(), p.y.atan2(p.x)))),
            _ => cx.clear_output(0),
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
    use crate::parameter::ParameterScope;
    use crate::port::{InputRef, OutputRef};
    use crate::settings::GraphSettings;
    use glam::Vec3;

    fn run(graph: &mut Graph, nodes: &[NodeId]) {
        let settings = GraphSettings::default();
        let params = ParameterScope::new();
        let stack = CallStack::new();
        let env = EvalEnv::new(&[], &settings, &params, &stack);
        for &id in nodes {
            graph.propagate_node(id, &env);
            graph.evaluate_node(id, &env);
        }
    }

    #[test]
    fn test_make_and_break() {
        let mut graph = Graph::new("test");
        let x = graph.add_node(Constant::float(1.0));
        let y = graph.add_node(Constant::float(2.0));
        let z = graph.add_node(Constant::float(3.0));
        let make = graph.add_node(MakeVector::new(3));
        let split = graph.add_node(BreakVector::new(3));
        for (i, c) in [x, y, z].into_iter().enumerate() {
            graph.connect(OutputRef::new(c, 0), InputRef::new(make, i + 1)).unwrap();
        }
        graph.connect(OutputRef::new(make, 1), InputRef::new(split, 1)).unwrap();
        run(&mut graph, &[x, y, z, make, split]);

        assert_eq!(
            graph.output_value(OutputRef::new(make, 1)),
            Some(&Value::Float3(Vec3::new(1.0, 2.0, 3.0)))
        );
        assert_eq!(graph.output_value(OutputRef::new(split, 3)), Some(&Value::Float(3.0)));

        let settings = GraphSettings::default();
        let params = ParameterScope::new();
        let stack = CallStack::new();
        let env = EvalEnv::new(&[], &settings, &params, &stack);
        let sm = graph.node(make).unwrap().ident(1);
        let code = graph.emit_node(split, &env, "", None).unwrap();
        assert_eq!(code.lines().count(), 3);
        assert!(code.contains(&format!(" = {sm}.z;")), "{code}");
    }

    #[test]
    fn test_geometry() {
        let mut graph = Graph::new("test");
        let a = graph.add_node(Constant::float2(Vec2::new(3.0, 4.0)));
        let b = graph.add_node(Constant::float2(Vec2::ZERO));
        let len = graph.add_node(Length);
        let dist = graph.add_node(Distance);
        let dot = graph.add_node(DotProduct);
        let polar = graph.add_node(Polar);
        graph.connect(OutputRef::new(a, 0), InputRef::new(len, 1)).unwrap();
        graph.connect(OutputRef::new(a, 0), InputRef::new(dist, 1)).unwrap();
        graph.connect(OutputRef::new(b, 0), InputRef::new(dist, 2)).unwrap();
        graph.connect(OutputRef::new(a, 0), InputRef::new(dot, 1)).unwrap();
        graph.connect(OutputRef::new(a, 0), InputRef::new(dot, 2)).unwrap();
        graph.connect(OutputRef::new(a, 0), InputRef::new(polar, 1)).unwrap();
        run(&mut graph, &[a, b, len, dist, dot, polar]);

        assert_eq!(graph.output_value(OutputRef::new(len, 1)), Some(&Value::Float(5.0)));
        assert_eq!(graph.output_value(OutputRef::new(dist, 1)), Some(&Value::Float(5.0)));
        assert_eq!(graph.output_value(OutputRef::new(dot, 1)), Some(&Value::Float(25.0)));
        let Some(Value::Float2(p)) = graph.output_value(OutputRef::new(polar, 1)).copied() else {
            panic!("polar produced no vector");
        };
        assert_eq!(p.x, 5.0);
        assert!((p.y - 4.0f32.atan2(3.0)).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_keeps_width() {
        let mut graph = Graph::new("test");
        let a = graph.add_node(Constant::float2(Vec2::new(0.0, 2.0)));
        let n = graph.add_node(Normalize);
        graph.connect(OutputRef::new(a, 0), InputRef::new(n, 1)).unwrap();
        run(&mut graph, &[a, n]);
        assert_eq!(graph.output_type(OutputRef::new(n, 1)), Some(PortType::FLOAT2));
        assert_eq!(
            graph.output_value(OutputRef::new(n, 1)),
            Some(&Value::Float2(Vec2::new(0.0, 1.0)))
        );
    }
}
