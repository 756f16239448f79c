// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pseudo-random nodes built on the shared `rand` hash.
//!
//! The CPU path computes the same hash as the generated `rand` helper, so both
//! paths agree up to float precision.

use super::{declare, impl_any};
use crate::evaluation::{EmitContext, EvalContext};
use crate::node::NodeKind;
use crate::port::{PortLayout, PortType};
use crate::value::Value;
use glam::Vec2;

/// CPU twin of the generated `rand(vec2)`, in `[-1, 1)`
pub fn rand(co: Vec2) -> f32 {
    let x = (co.dot(Vec2::new(12.9898, 78.233)).sin() * 43758.5453).fract();
    // `fract` in the backend is always non-negative.
    let x = if x < 0.0 { x + 1.0 } else { x };
    x * 2.0 - 1.0
}

fn seed(cx: &EvalContext<'_>) -> f32 {
    cx.env().settings.random_seed as f32
}

/// Hash a scalar or 2D seed with the graph's random seed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Random;

impl NodeKind for Random {
    fn type_name(&self) -> &'static str {
        "random"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("Seed", PortType::FLOAT | PortType::FLOAT2)
            .output("Value", PortType::FLOAT)
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let (s, ty) = cx.operand(0)?;
        let expr = if ty.normalized() == PortType::FLOAT2 {
            format!("rand({s} + vec2(RandomSeed))")
        } else {
            format!("rand(vec2({s}, RandomSeed))")
        };
        Some(declare(PortType::FLOAT, &cx.ident(0), &expr))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let seed = seed(cx);
        let co = match cx.input(0) {
            Some(Value::Float2(v)) => Some(*v + Vec2::splat(seed)),
            Some(v) => v.as_float().ok().map(|s| Vec2::new(s, seed)),
            None => None,
        };
        match co {
            Some(co) => cx.set_output(0, Value::Float(rand(co))),
            None => cx.clear_output(0),
        }
    }

    impl_any!();
}

/// Hash two scalar seeds: `rand(vec2(rand(vec2(a, RandomSeed)), b))`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Random2;

impl NodeKind for Random2 {
    fn type_name(&self) -> &'static str {
        "random2"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("A", PortType::FLOAT)
            .input("B", PortType::FLOAT)
            .output("Value", PortType::FLOAT)
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let a = cx.input(0)?;
        let b = cx.input(1)?;
        let expr = format!("rand(vec2(rand(vec2({a}, RandomSeed)), {b}))");
        Some(declare(PortType::FLOAT, &cx.ident(0), &expr))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let seed = seed(cx);
        let a = cx.input(0).and_then(|v| v.as_float().ok());
        let b = cx.input(1).and_then(|v| v.as_float().ok());
        match (a, b) {
            (Some(a), Some(b)) => {
                let inner = rand(Vec2::new(a, seed));
                cx.set_output(0, Value::Float(rand(Vec2::new(inner, b))));
            }
            _ => cx.clear_output(0),
        }
    }

    impl_any!();
}
