// SPDX-License-Identifier: MIT OR Apache-2.0
//! Matrix builder nodes.
//!
//! Each builder supplies two hooks that must agree: a backend expression
//! constructing the matrix and a CPU function computing the same [`Mat4`].
//! Matrices are column-major on both sides.

use super::{declare, impl_any};
use crate::evaluation::{EmitContext, EvalContext};
use crate::node::NodeKind;
use crate::port::{PortLayout, PortType};
use crate::value::{Value, ValueError};
use glam::{Mat4, Vec3, Vec4};
use std::fmt::Debug;
use std::marker::PhantomData;

/// One way of building a transform matrix from its inputs
pub trait MatrixBuilder: Debug + Send + 'static {
    /// Registry identifier
    const TYPE_NAME: &'static str;

    /// Data inputs as (name, accepted types)
    fn inputs() -> Vec<(&'static str, PortType)>;

    /// Backend expression from input identifiers and their resolved types
    fn expression(args: &[(String, PortType)]) -> String;

    /// CPU matrix from input values
    fn build(args: &[Value]) -> Result<Mat4, ValueError>;
}

fn columns(c: [String; 4]) -> String {
    format!("mat4({}, {}, {}, {})", c[0], c[1], c[2], c[3])
}

/// Offset by a 2D or 3D vector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Translate;

impl MatrixBuilder for Translate {
    const TYPE_NAME: &'static str = "translate_matrix";

    fn inputs() -> Vec<(&'static str, PortType)> {
        vec![("Offset", PortType::FLOAT2 | PortType::FLOAT3)]
    }

    fn expression(args: &[(String, PortType)]) -> String {
        let (o, ty) = &args[0];
        let last = if ty.normalized() == PortType::FLOAT2 {
            format!("vec4({o}, 0.0, 1.0)")
        } else {
            format!("vec4({o}, 1.0)")
        };
        columns([
            "vec4(1.0, 0.0, 0.0, 0.0)".to_string(),
            "vec4(0.0, 1.0, 0.0, 0.0)".to_string(),
            "vec4(0.0, 0.0, 1.0, 0.0)".to_string(),
            last,
        ])
    }

    fn build(args: &[Value]) -> Result<Mat4, ValueError> {
        Ok(Mat4::from_translation(args[0].as_vec3()?))
    }
}

/// Rotation about Z, angle in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rotate;

impl MatrixBuilder for Rotate {
    const TYPE_NAME: &'static str = "rotate_matrix";

    fn inputs() -> Vec<(&'static str, PortType)> {
        vec![("Angle", PortType::FLOAT)]
    }

    fn expression(args: &[(String, PortType)]) -> String {
        let a = &args[0].0;
        let (c, s) = (format!("cos({a} * Deg2Rad)"), format!("sin({a} * Deg2Rad)"));
        columns([
            format!("vec4({c}, {s}, 0.0, 0.0)"),
            format!("vec4(-{s}, {c}, 0.0, 0.0)"),
            "vec4(0.0, 0.0, 1.0, 0.0)".to_string(),
            "vec4(0.0, 0.0, 0.0, 1.0)".to_string(),
        ])
    }

    fn build(args: &[Value]) -> Result<Mat4, ValueError> {
        Ok(Mat4::from_rotation_z(args[0].as_float()?.to_radians()))
    }
}

/// Uniform, 2D or 3D scale; a 2D scale leaves Z untouched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scale;

impl MatrixBuilder for Scale {
    const TYPE_NAME: &'static str = "scale_matrix";

    fn inputs() -> Vec<(&'static str, PortType)> {
        vec![("Scale", PortType::FLOAT | PortType::FLOAT2 | PortType::FLOAT3)]
    }

    fn expression(args: &[(String, PortType)]) -> String {
        let (s, ty) = &args[0];
        let v = match ty.components() {
            1 => format!("vec3({s})"),
            2 => format!("vec3({s}, 1.0)"),
            _ => s.clone(),
        };
        columns([
            format!("vec4({v}.x, 0.0, 0.0, 0.0)"),
            format!("vec4(0.0, {v}.y, 0.0, 0.0)"),
            format!("vec4(0.0, 0.0, {v}.z, 0.0)"),
            "vec4(0.0, 0.0, 0.0, 1.0)".to_string(),
        ])
    }

    fn build(args: &[Value]) -> Result<Mat4, ValueError> {
        let v = match args[0] {
            Value::Float2(v) => v.extend(1.0),
            Value::Float3(v) => v,
            ref other => Vec3::splat(other.as_float()?),
        };
        Ok(Mat4::from_scale(v))
    }
}

/// Shear: `x += sx * y`, `y += sy * x`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Shear;

impl MatrixBuilder for Shear {
    const TYPE_NAME: &'static str = "shear_matrix";

    fn inputs() -> Vec<(&'static str, PortType)> {
        vec![("X", PortType::FLOAT), ("Y", PortType::FLOAT)]
    }

    fn expression(args: &[(String, PortType)]) -> String {
        let (x, y) = (&args[0].0, &args[1].0);
        columns([
            format!("vec4(1.0, {y}, 0.0, 0.0)"),
            format!("vec4({x}, 1.0, 0.0, 0.0)"),
            "vec4(0.0, 0.0, 1.0, 0.0)".to_string(),
            "vec4(0.0, 0.0, 0.0, 1.0)".to_string(),
        ])
    }

    fn build(args: &[Value]) -> Result<Mat4, ValueError> {
        let (x, y) = (args[0].as_float()?, args[1].as_float()?);
        Ok(Mat4::from_cols(
            Vec4::new(1.0, y, 0.0, 0.0),
            Vec4::new(x, 1.0, 0.0, 0.0),
            Vec4::Z,
            Vec4::W,
        ))
    }
}

/// The identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Identity;

impl MatrixBuilder for Identity {
    const TYPE_NAME: &'static str = "identity_matrix";

    fn inputs() -> Vec<(&'static str, PortType)> {
        Vec::new()
    }

    fn expression(_args: &[(String, PortType)]) -> String {
        "mat4(1.0)".to_string()
    }

    fn build(_args: &[Value]) -> Result<Mat4, ValueError> {
        Ok(Mat4::IDENTITY)
    }
}

/// Node producing the matrix of builder `B`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixNode<B: MatrixBuilder> {
    builder: PhantomData<B>,
}

impl<B: MatrixBuilder> Default for MatrixNode<B> {
    fn default() -> Self {
        Self {
            builder: PhantomData,
        }
    }
}

impl<B: MatrixBuilder> NodeKind for MatrixNode<B> {
    fn type_name(&self) -> &'static str {
        B::TYPE_NAME
    }

    fn ports(&self) -> PortLayout {
        B::inputs()
            .into_iter()
            .fold(PortLayout::control(), |layout, (name, ty)| layout.input(name, ty))
            .output("Matrix", PortType::MATRIX)
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let args = (0..cx.input_count())
            .map(|i| cx.operand(i))
            .collect::<Option<Vec<_>>>()?;
        Some(declare(PortType::MATRIX, &cx.ident(0), &B::expression(&args)))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let args = (0..cx.input_count())
            .map(|i| cx.input(i).copied())
            .collect::<Option<Vec<_>>>();
        let Some(args) = args else {
            cx.clear_output(0);
            return;
        };
        match B::build(&args) {
            Ok(m) => cx.set_output(0, Value::Matrix(m)),
            Err(e) => {
                tracing::warn!("{}: {e}; using identity", B::TYPE_NAME);
                cx.set_output(0, Value::Matrix(Mat4::IDENTITY));
            }
        }
    }

    impl_any!();
}
