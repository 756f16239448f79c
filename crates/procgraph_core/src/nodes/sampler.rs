// SPDX-License-Identifier: MIT OR Apache-2.0
//! Texture sampler node.

use super::{declare, impl_any, wrong_kind};
use crate::evaluation::{EmitContext, EvalContext};
use crate::graphs::glsl::INPUT_SAMPLERS;
use crate::node::{NodeKind, PropertyError, PropertyKind, PropertyValue};
use crate::port::{PortLayout, PortType};
use crate::value::Value;
use glam::{Vec2, Vec4};

/// Read one of the bound input textures.
///
/// An unconnected position samples at the invocation's `uv`. On the CPU the
/// samples come from the environment's
/// [`SampleSource`](crate::evaluation::SampleSource); without one the result is
/// zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sampler {
    channel: usize,
}

impl Sampler {
    /// Sampler reading `Input{channel}`
    pub fn new(channel: usize) -> Self {
        Self {
            channel: channel.min(INPUT_SAMPLERS - 1),
        }
    }

    /// Bound texture index
    pub fn channel(&self) -> usize {
        self.channel
    }
}

impl NodeKind for Sampler {
    fn type_name(&self) -> &'static str {
        "sampler"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("Position", PortType::FLOAT2)
            .output("Color", PortType::FLOAT4)
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let position = cx.input(0).unwrap_or_else(|| "uv".to_string());
        let expr = format!("texture(Input{}, {position})", self.channel);
        Some(declare(PortType::FLOAT4, &cx.ident(0), &expr))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let uv = match cx.input(0).map(Value::as_vec2) {
            Some(Ok(uv)) => uv,
            Some(Err(e)) => {
                tracing::warn!("Sampler position: {e}");
                Vec2::ZERO
            }
            None => Vec2::ZERO,
        };
        let color = cx
            .env()
            .sampler
            .map_or(Vec4::ZERO, |source| source.sample(self.channel, uv));
        cx.set_output(0, Value::Float4(color));
    }

    fn properties(&self) -> Vec<(&'static str, PropertyValue)> {
        vec![("channel", PropertyValue::Int(self.channel as i32))]
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        match (name, value) {
            ("channel", PropertyValue::Int(i)) => {
                let channel = usize::try_from(i).unwrap_or(0).min(INPUT_SAMPLERS - 1);
                if channel as i32 != i {
                    tracing::warn!("Sampler channel {i} is out of range; using {channel}");
                }
                self.channel = channel;
                Ok(())
            }
            ("channel", _) => Err(wrong_kind(name, PropertyKind::Int)),
            _ => Err(PropertyError::Unknown(name.to_string())),
        }
    }

    impl_any!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{CallStack, EvalEnv, SampleSource};
    use crate::graph::Graph;
    use crate::nodes::constant::Constant;
    use crate::parameter::ParameterScope;
    use crate::port::{InputRef, OutputRef};
    use crate::settings::GraphSettings;

    struct Gradient;

    impl SampleSource for Gradient {
        fn sample(&self, channel: usize, uv: Vec2) -> Vec4 {
            Vec4::new(uv.x, uv.y, channel as f32, 1.0)
        }
    }

    #[test]
    fn test_sample_source() {
        let mut graph = Graph::new("test");
        let p = graph.add_node(Constant::float2(Vec2::new(0.25, 0.75)));
        let s = graph.add_node(Sampler::new(2));
        graph.connect(OutputRef::new(p, 0), InputRef::new(s, 1)).unwrap();

        let settings = GraphSettings::default();
        let params = ParameterScope::new();
        let stack = CallStack::new();
        let env = EvalEnv::new(&[], &settings, &params, &stack).with_sampler(&Gradient);
        graph.evaluate_node(p, &env);
        graph.evaluate_node(s, &env);
        assert_eq!(
            graph.output_value(OutputRef::new(s, 1)),
            Some(&Value::Float4(Vec4::new(0.25, 0.75, 2.0, 1.0)))
        );

        let sp = graph.node(p).unwrap().ident(0);
        let code = graph.emit_node(s, &env, "", None).unwrap();
        assert!(code.ends_with(&format!(" = texture(Input2, {sp});\n")), "{code}");
    }

    #[test]
    fn test_unconnected_reads_uv() {
        let mut graph = Graph::new("test");
        let s = graph.add_node(Sampler::default());
        let settings = GraphSettings::default();
        let params = ParameterScope::new();
        let stack = CallStack::new();
        let env = EvalEnv::new(&[], &settings, &params, &stack);
        let code = graph.emit_node(s, &env, "", None).unwrap();
        assert!(code.starts_with("vec4 "));
        assert!(code.ends_with(" = texture(Input0, uv);\n"));
        graph.evaluate_node(s, &env);
        assert_eq!(graph.output_value(OutputRef::new(s, 1)), Some(&Value::Float4(Vec4::ZERO)));
    }

    #[test]
    fn test_channel_clamped() {
        let mut s = Sampler::default();
        s.set_property("channel", PropertyValue::Int(9)).unwrap();
        assert_eq!(s.channel(), 3);
        assert!(s.set_property("channel", PropertyValue::Float(1.0)).is_err());
    }
}
