// SPDX-License-Identifier: MIT OR Apache-2.0
//! Constant value nodes.

use super::{declare, impl_any, wrong_kind};
use crate::evaluation::{EmitContext, EvalContext};
use crate::node::{NodeKind, NodeRole, PropertyError, PropertyKind, PropertyValue};
use crate::port::{PortLayout, PortType};
use crate::value::Value;
use glam::{Vec2, Vec3, Vec4};

/// A fixed value with no control ports.
///
/// The `value` property can be promoted; the node then reads the parameter
/// instead of its own literal.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    value: Value,
}

impl Constant {
    /// Scalar constant
    pub fn float(value: f32) -> Self {
        Self {
            value: Value::Float(value),
        }
    }

    /// 2D vector constant
    pub fn float2(value: Vec2) -> Self {
        Self {
            value: Value::Float2(value),
        }
    }

    /// 3D vector constant
    pub fn float3(value: Vec3) -> Self {
        Self {
            value: Value::Float3(value),
        }
    }

    /// 4D vector constant
    pub fn float4(value: Vec4) -> Self {
        Self {
            value: Value::Float4(value),
        }
    }

    /// Boolean constant
    pub fn boolean(value: bool) -> Self {
        Self {
            value: Value::Bool(value),
        }
    }

    /// Current literal
    pub fn value(&self) -> Value {
        self.value
    }

    fn ty(&self) -> PortType {
        self.value.port_type()
    }
}

impl NodeKind for Constant {
    fn type_name(&self) -> &'static str {
        match self.value {
            Value::Float2(_) => "float2_constant",
            Value::Float3(_) => "float3_constant",
            Value::Float4(_) => "float4_constant",
            Value::Bool(_) => "bool_constant",
            Value::Float(_) | Value::Matrix(_) => "float_constant",
        }
    }

    fn ports(&self) -> PortLayout {
        PortLayout::data().output("Value", self.ty())
    }

    fn role(&self) -> NodeRole {
        NodeRole::Source
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let expr = cx
            .promoted_name("value")
            .unwrap_or_else(|| self.value.to_glsl());
        Some(declare(self.ty(), &cx.ident(0), &expr))
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let value = cx
            .promoted("value")
            .map_or(self.value, |v| v.coerce_or_default(self.ty()));
        cx.set_output(0, value);
    }

    fn properties(&self) -> Vec<(&'static str, PropertyValue)> {
        let value = match self.value {
            Value::Float(f) => PropertyValue::Float(f),
            Value::Bool(b) => PropertyValue::Bool(b),
            other => PropertyValue::Vector(other.as_vec4().unwrap_or(Vec4::ZERO)),
        };
        vec![("value", value)]
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        if name != "value" {
            return Err(PropertyError::Unknown(name.to_string()));
        }
        let ty = self.ty();
        let expected = match self.value {
            Value::Float(_) => PropertyKind::Float,
            Value::Bool(_) => PropertyKind::Bool,
            _ => PropertyKind::Vector,
        };
        self.value = match value {
            PropertyValue::Float(_) | PropertyValue::Int(_) if expected == PropertyKind::Float => {
                value.to_value(ty)
            }
            PropertyValue::Bool(_) if expected == PropertyKind::Bool => value.to_value(ty),
            PropertyValue::Vector(_) if expected == PropertyKind::Vector => value.to_value(ty),
            _ => None,
        }
        .ok_or_else(|| wrong_kind(name, expected))?;
        Ok(())
    }

    impl_any!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::CallStack;
    use crate::evaluation::EvalEnv;
    use crate::graph::Graph;
    use crate::parameter::ParameterScope;
    use crate::port::OutputRef;
    use crate::settings::GraphSettings;

    #[test]
    fn test_emit_literal() {
        let mut graph = Graph::new("test");
        let c = graph.add_node(Constant::float2(Vec2::new(0.5, 1.0)));
        let settings = GraphSettings::default();
        let params = ParameterScope::new();
        let stack = CallStack::new();
        let env = EvalEnv::new(&[], &settings, &params, &stack);

        let ident = graph.node(c).unwrap().ident(0);
        assert_eq!(
            graph.emit_node(c, &env, "", None).unwrap(),
            format!("vec2 {ident} = vec2(0.5, 1.0);\n")
        );
        graph.evaluate_node(c, &env);
        assert_eq!(
            graph.output_value(OutputRef::new(c, 0)),
            Some(&Value::Float2(Vec2::new(0.5, 1.0)))
        );
    }

    #[test]
    fn test_promoted_value_used() {
        let mut graph = Graph::new("test");
        let c = graph.add_node(Constant::float(1.0));
        let key = graph.promote(c, "value").unwrap();
        graph.set_parameter_value(&key, Value::Float(7.0)).unwrap();

        let owned = graph.environment();
        let env = owned.env();
        graph.evaluate_node(c, &env);
        assert_eq!(graph.output_value(OutputRef::new(c, 0)), Some(&Value::Float(7.0)));

        let code = graph.emit_node(c, &env, "", None).unwrap();
        assert!(code.ends_with("= p_float_constantvalue;\n"), "{code}");
    }

    #[test]
    fn test_set_property_kinds() {
        let mut c = Constant::boolean(false);
        c.set_property("value", PropertyValue::Bool(true)).unwrap();
        assert_eq!(c.value(), Value::Bool(true));
        assert!(c.set_property("value", PropertyValue::Float(1.0)).is_err());
        assert!(c.set_property("other", PropertyValue::Bool(true)).is_err());

        let mut v = Constant::float3(Vec3::ZERO);
        v.set_property("value", PropertyValue::Vector(Vec4::new(1.0, 2.0, 3.0, 4.0)))
            .unwrap();
        assert_eq!(v.value(), Value::Float3(Vec3::new(1.0, 2.0, 3.0)));
    }
}
