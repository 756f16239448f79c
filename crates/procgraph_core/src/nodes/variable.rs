// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scoped variable nodes: reads, writes and argument declarations.

use super::{declare, impl_any, wrong_kind};
use crate::evaluation::{EmitContext, EvalContext, TypeContext};
use crate::node::{NodeKind, NodeRole, PropertyError, PropertyKind, PropertyValue};
use crate::port::{PortLayout, PortType};
use regex::Regex;

/// Read a variable from the nearest scope.
///
/// Names follow the parameter convention: a `p_` name that is not in scope
/// falls back to the matching `c_` custom parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetVar {
    name: String,
}

impl GetVar {
    /// Read `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Variable name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl NodeKind for GetVar {
    fn type_name(&self) -> &'static str {
        "get_var"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::data().output("Value", PortType::ANY_DATA)
    }

    fn role(&self) -> NodeRole {
        NodeRole::Source
    }

    fn propagate_type(&self, cx: &mut TypeContext<'_>) {
        match cx.var_type(&self.name) {
            Some(ty) => cx.set_output_type(0, ty),
            None => cx.reset_output_type(0),
        }
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let Some(ty) = cx.var_type(&self.name) else {
            tracing::debug!("Variable {:?} is not in scope", self.name);
            return None;
        };
        let ident = cx.ident(0);
        let source = cx.resolve_var(&self.name);
        let declaration = format!("{} {ident} = ", ty.glsl_type());
        if cx.text().contains(&declaration) {
            Some(format!("{ident} = {source};\n"))
        } else {
            Some(declare(ty, &ident, source))
        }
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let ty = cx.output_type(0);
        match cx.var(&self.name).and_then(|v| v.value) {
            Some(value) => cx.set_output(0, value.coerce_or_default(ty)),
            None => cx.clear_output(0),
        }
    }

    fn properties(&self) -> Vec<(&'static str, PropertyValue)> {
        vec![("name", PropertyValue::Text(self.name.clone()))]
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        match (name, value) {
            ("name", PropertyValue::Text(text)) => {
                self.name = text;
                Ok(())
            }
            ("name", _) => Err(wrong_kind(name, PropertyKind::Text)),
            _ => Err(PropertyError::Unknown(name.to_string())),
        }
    }

    impl_any!();
}

/// Declare or update a variable and pass its value through
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetVar {
    name: String,
}

impl SetVar {
    /// Write `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Variable name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `text` already declares the variable, either as a local or as
    /// a parameter of the enclosing function signature
    fn is_declared(&self, ty: PortType, text: &str) -> bool {
        let declaration = format!("{} {}", ty.glsl_type(), self.name);
        if text.contains(&format!("{declaration} = ")) {
            return true;
        }
        let pattern = format!(r"[A-Za-z0-9_]+\(.*{}\b.*\)", regex::escape(&declaration));
        match Regex::new(&pattern) {
            Ok(re) => re.is_match(text),
            Err(e) => {
                tracing::warn!("Invalid declaration pattern for {:?}: {e}", self.name);
                false
            }
        }
    }
}

impl NodeKind for SetVar {
    fn type_name(&self) -> &'static str {
        "set_var"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::control()
            .input("Value", PortType::ANY_DATA)
            .output("Value", PortType::ANY_DATA)
    }

    fn propagate_type(&self, cx: &mut TypeContext<'_>) {
        match cx.input_type(0) {
            Some(ty) => {
                cx.set_output_type(0, ty);
                cx.declare_var(&self.name, ty);
            }
            None => cx.reset_output_type(0),
        }
    }

    fn emit(&self, cx: &EmitContext<'_>) -> Option<String> {
        let (source, ty) = cx.operand(0)?;
        let ident = cx.ident(0);
        let mut code = if self.is_declared(ty, cx.text()) {
            format!("{} = {source};\n", self.name)
        } else {
            declare(ty, &self.name, &source)
        };
        code.push_str(&declare(ty, &ident, &source));
        Some(code)
    }

    fn evaluate(&mut self, cx: &mut EvalContext<'_>) {
        let Some(value) = cx.input(0).copied() else {
            tracing::debug!("Set {:?} has no value", self.name);
            cx.clear_output(0);
            return;
        };
        let ty = value.port_type();
        cx.set_var(&self.name, ty, Some(value));
        cx.set_output(0, value);
    }

    fn properties(&self) -> Vec<(&'static str, PropertyValue)> {
        vec![("name", PropertyValue::Text(self.name.clone()))]
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        match (name, value) {
            ("name", PropertyValue::Text(text)) => {
                self.name = text;
                Ok(())
            }
            ("name", _) => Err(wrong_kind(name, PropertyKind::Text)),
            _ => Err(PropertyError::Unknown(name.to_string())),
        }
    }

    impl_any!();
}

/// Formal argument of a function. Has no ports; the function declares it in
/// scope and in its generated signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    name: String,
    ty: PortType,
}

impl Arg {
    /// Argument `name` of type `ty`
    pub fn new(name: impl Into<String>, ty: PortType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    /// Argument name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Argument type
    pub fn ty(&self) -> PortType {
        self.ty
    }
}

impl Default for Arg {
    fn default() -> Self {
        Self::new("arg", PortType::FLOAT)
    }
}

impl NodeKind for Arg {
    fn type_name(&self) -> &'static str {
        "arg"
    }

    fn ports(&self) -> PortLayout {
        PortLayout::data()
    }

    fn role(&self) -> NodeRole {
        NodeRole::Argument
    }

    fn emit(&self, _cx: &EmitContext<'_>) -> Option<String> {
        Some(String::new())
    }

    fn evaluate(&mut self, _cx: &mut EvalContext<'_>) {}

    fn properties(&self) -> Vec<(&'static str, PropertyValue)> {
        vec![
            ("name", PropertyValue::Text(self.name.clone())),
            ("type", PropertyValue::Type(self.ty)),
        ]
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        match (name, value) {
            ("name", PropertyValue::Text(text)) => self.name = text,
            ("type", PropertyValue::Type(ty)) if !ty.is_union() && !ty.is_control() => {
                self.ty = ty;
            }
            ("name", _) => return Err(wrong_kind(name, PropertyKind::Text)),
            ("type", _) => return Err(wrong_kind(name, PropertyKind::Type)),
            _ => return Err(PropertyError::Unknown(name.to_string())),
        }
        Ok(())
    }

    impl_any!();
}
