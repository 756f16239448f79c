// SPDX-License-Identifier: MIT OR Apache-2.0
//! Control-flow nodes: the entry marker, the loop and a data select.

use super::{cast, declare, impl_any};
use crate::evaluation::{EmitContext, EvalContext, TypeContext};
use crate::node::{NodeKind, NodeRole};
use crate::port::{PortLayout, PortType};
use crate::value::Value;

/// Entry marker of a function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Execute;

impl NodeKind for Execute {
    fn type_name(&self) -> &'static str {
        "execute"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::data().output("Execute", PortType::CONTROL)
    }

    fn role(&self) -> NodeRole {
        NodeRole::Entry
    }

    fn emit(&self, _cx: &EmitContext<'_>) -> Option<String> {
        Some(String::new())
    }

    fn evaluate(&mut self, _cx: &mut EvalContext<'_>) {}

    impl_any!();
}

/// Concrete bounds of one loop run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopRange {
    /// First value of `current`
    pub start: f32,
    /// Exclusive bound when ascending, inclusive when descending
    pub end: f32,
    /// Step size, applied towards `end`
    pub increment: f32,
}

impl LoopRange {
    /// Values taken by `current`, in order.
    ///
    /// Ascending when `start <= end`, descending otherwise. A step that is not
    /// positive and finite yields nothing.
    pub fn values(&self) -> LoopValues {
        let valid = self.increment > 0.0 && self.increment.is_finite();
        if !valid {
            tracing::warn!(
                "Loop increment {} is not positive; the body does not run",
                self.increment
            );
        }
        LoopValues {
            next: self.start,
            end: self.end,
            step: self.increment,
            ascending: self.start <= self.end,
            done: !valid || !self.start.is_finite() || !self.end.is_finite(),
        }
    }
}

/// Iterator over [`LoopRange::values`]
#[derive(Debug, Clone)]
pub struct LoopValues {
    next: f32,
    end: f32,
    step: f32,
    ascending: bool,
    done: bool,
}

impl Iterator for LoopValues {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.done {
            return None;
        }
        let current = self.next;
        let inside = if self.ascending {
            current < self.end
        } else {
            current >= self.end
        };
        if !inside {
            self.done = true;
            return None;
        }
        self.next = if self.ascending {
            current + self.step
        } else {
            current - self.step
        };
        Some(current)
    }
}

/// Counted loop.
///
/// Output 0 starts the body, output 1 holds the current value and output 2
/// continues after the loop. The function drives the body; this node only
/// records the range and generates the loop text around the body it is given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForLoop {
    range: Option<LoopRange>,
}

impl NodeKind for ForLoop {
    fn type_name(&self) -> &'static str {
        "for_loop"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::data()
            .input("Execute", PortType::CONTROL)
            .input("Start", PortType::FLOAT)
            .input("End", PortType::FLOAT)
            .input("Increment", PortType::FLOAT)
            .output("Loop", PortType::CONTROL)
            .output("Current", PortType::FLOAT)
            .output("Done", PortType::CONTROL)
    }

    fn role(&self) -> NodeRole {
        NodeRole::Loop
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let start = cx.input(0)?;
        let end = cx.input(1)?;
        let step = cx.input(2)?;
        let body = cx.body().unwrap_or_default();
        let current = cx.ident(0);
        Some(format!(
            "if ({start} <= {end}) {{\n\
             for (float {current} = {start}; {current} < {end}; {current} += {step}) {{\n\
             {body}}}\n\
             }} else {{\n\
             for (float {current} = {start}; {current} >= {end}; {current} -= {step}) {{\n\
             {body}}}\n\
             }}\n"
        ))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let bounds = (0..3)
            .map(|i| cx.input(i).map(Value::as_float))
            .collect::<Option<Result<Vec<f32>, _>>>();
        self.range = match bounds {
            Some(Ok(v)) => Some(LoopRange {
                start: v[0],
                end: v[1],
                increment: v[2],
            }),
            Some(Err(e)) => {
                tracing::warn!("Loop bounds: {e}");
                None
            }
            None => None,
        };
        match self.range {
            Some(range) => cx.set_output(0, Value::Float(range.start)),
            None => cx.clear_output(0),
        }
    }

    fn loop_range(&self) -> Option<LoopRange> {
        self.range
    }

    impl_any!();
}

/// Select between two values: `condition != 0 ? true : false`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IfElse;

impl IfElse {
    fn result_type(a: Option<PortType>, b: Option<PortType>) -> Option<PortType> {
        match (a.map(PortType::normalized), b.map(PortType::normalized)) {
            (Some(a), Some(b)) if a == b => Some(a),
            (Some(a), Some(b)) if a.components() == 1 => Some(b),
            (Some(a), Some(b)) if b.components() == 1 => Some(a),
            (Some(_), Some(_)) => None,
            (Some(t), None) | (None, Some(t)) => Some(t),
            (None, None) => None,
        }
    }
}

impl NodeKind for IfElse {
    fn type_name(&self) -> &'static str {
        "if_else"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("Condition", PortType::FLOAT | PortType::BOOL)
            .input("True", PortType::ANY_DATA)
            .input("False", PortType::ANY_DATA)
            .output("Result", PortType::ANY_DATA)
    }

    fn propagate_type(&self, cx: &mut TypeContext<'_>) {
        match Self::result_type(cx.input_type(1), cx.input_type(2)) {
            Some(ty) => cx.set_output_type(0, ty),
            None => cx.reset_output_type(0),
        }
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let condition = cx.input(0)?;
        let (a, ta) = cx.operand(1)?;
        let (b, tb) = cx.operand(2)?;
        let ty = Self::result_type(Some(ta), Some(tb))?;
        let expr = format!(
            "{condition} != 0.0 ? {} : {}",
            cast(&a, ta, ty),
            cast(&b, tb, ty)
        );
        Some(declare(ty, &cx.ident(0), &expr))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let ty = cx.output_type(0);
        let picked = cx.input(0).map(Value::as_bool).and_then(|c| match c {
            Ok(true) => cx.input(1).copied(),
            Ok(false) => cx.input(2).copied(),
            Err(e) => {
                tracing::warn!("Condition: {e}");
                None
            }
        });
        match picked {
            Some(v) => cx.set_output(0, v.coerce_or_default(ty)),
            None => cx.clear_output(0),
        }
    }

    impl_any!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(start: f32, end: f32, increment: f32) -> Vec<f32> {
        LoopRange {
            start,
            end,
            increment,
        }
        .values()
        .collect()
    }

    #[test]
    fn test_ascending_end_exclusive() {
        assert_eq!(collect(0.0, 3.0, 1.0), vec![0.0, 1.0, 2.0]);
        assert_eq!(collect(0.0, 0.0, 1.0), Vec::<f32>::new());
    }

    #[test]
    fn test_descending_end_inclusive() {
        assert_eq!(collect(3.0, 1.0, 1.0), vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_bad_increment_runs_nothing() {
        assert!(collect(0.0, 3.0, 0.0).is_empty());
        assert!(collect(0.0, 3.0, -1.0).is_empty());
        assert!(collect(0.0, 3.0, f32::NAN).is_empty());
    }

    #[test]
    fn test_if_else_types() {
        assert_eq!(
            IfElse::result_type(Some(PortType::FLOAT), Some(PortType::FLOAT3)),
            Some(PortType::FLOAT3)
        );
        assert_eq!(
            IfElse::result_type(Some(PortType::FLOAT2), Some(PortType::FLOAT3)),
            None
        );
        assert_eq!(
            IfElse::result_type(Some(PortType::COLOR), None),
            Some(PortType::FLOAT4)
        );
    }
}
