// SPDX-License-Identifier: MIT OR Apache-2.0
//! Promoted and custom graph parameters.
//!
//! A promoted parameter lifts a node property into graph scope under the key
//! `"nodeId.property"`. A custom parameter is an unkeyed graph-level value.
//! Either kind can hold a constant or a [`Function`](crate::graphs::function::Function)
//! whose result becomes the parameter's value.

use crate::graph::Variable;
use crate::graphs::function::SharedFunction;
use crate::node::NodeId;
use crate::port::PortType;
use crate::value::Value;
use indexmap::IndexMap;

/// Code-name prefix of promoted parameters
pub const PROMOTED_PREFIX: &str = "p_";

/// Code-name prefix of custom parameters
pub const CUSTOM_PREFIX: &str = "c_";

/// Key of a promoted property
pub fn parameter_key(node: NodeId, property: &str) -> String {
    format!("{node}.{property}")
}

/// Strip characters the backend does not accept in identifiers
pub fn sanitize_identifier(name: &str) -> String {
    name.replace([' ', '\t'], "").replace('-', "_")
}

/// Resolve a variable name against a scope, falling back from `p_Name` to `c_Name`
pub fn resolve_var_name<'s>(scope: &'s IndexMap<String, Variable>, name: &str) -> Option<&'s str> {
    if let Some((key, _)) = scope.get_key_value(name) {
        return Some(key.as_str());
    }
    let rest = name.strip_prefix(PROMOTED_PREFIX)?;
    scope
        .get_key_value(format!("{CUSTOM_PREFIX}{rest}").as_str())
        .map(|(key, _)| key.as_str())
}

/// What a parameter holds
#[derive(Debug, Clone)]
pub enum ParameterData {
    /// Fixed value
    Constant(Value),
    /// Value computed by interpreting a function
    Function(SharedFunction),
}

/// A graph parameter
#[derive(Debug, Clone)]
pub struct ParameterValue {
    /// Display name
    pub name: String,
    /// Description
    pub description: String,
    /// Value type
    pub ty: PortType,
    /// Current value
    pub data: ParameterData,
    /// Editor range minimum
    pub min: f32,
    /// Editor range maximum
    pub max: f32,
}

impl ParameterValue {
    /// Create a constant parameter
    pub fn constant(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            ty: value.port_type(),
            data: ParameterData::Constant(value),
            min: 0.0,
            max: 1.0,
        }
    }

    /// Create a function-valued parameter
    pub fn function(name: impl Into<String>, ty: PortType, function: SharedFunction) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            ty,
            data: ParameterData::Function(function),
            min: 0.0,
            max: 1.0,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the editor range
    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Whether the value comes from a function
    pub fn is_function(&self) -> bool {
        matches!(self.data, ParameterData::Function(_))
    }

    /// Constant value, if not function-valued
    pub fn constant_value(&self) -> Option<Value> {
        match &self.data {
            ParameterData::Constant(v) => Some(*v),
            ParameterData::Function(_) => None,
        }
    }

    /// Identifier used in generated code and in the variable scope
    pub fn code_name(&self, prefix: &str) -> String {
        format!("{prefix}{}", sanitize_identifier(&self.name))
    }
}

/// A parameter after function-valued entries have been evaluated
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParameter {
    /// Identifier in generated code and scope
    pub code_name: String,
    /// Value type
    pub ty: PortType,
    /// Value, absent when evaluation failed
    pub value: Option<Value>,
}

/// Resolved parameters visible to a function
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterScope {
    /// Promoted parameters by key
    pub promoted: IndexMap<String, ResolvedParameter>,
    /// Custom parameters
    pub custom: Vec<ResolvedParameter>,
}

impl ParameterScope {
    /// Create an empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a promoted property
    pub fn promoted_value(&self, node: NodeId, property: &str) -> Option<Value> {
        self.promoted
            .get(&parameter_key(node, property))
            .and_then(|p| p.value)
    }

    /// Code name of a promoted property that has a value
    pub fn promoted_code_name(&self, node: NodeId, property: &str) -> Option<String> {
        self.promoted
            .get(&parameter_key(node, property))
            .filter(|p| p.value.is_some())
            .map(|p| p.code_name.clone())
    }

    /// All parameters as scope variables
    pub fn variables(&self) -> impl Iterator<Item = &ResolvedParameter> {
        self.promoted.values().chain(self.custom.iter())
    }

    /// This scope with `inner` entries overriding by key and code name
    pub fn layered(&self, inner: &ParameterScope) -> ParameterScope {
        if inner.promoted.is_empty() && inner.custom.is_empty() {
            return self.clone();
        }
        let mut scope = self.clone();
        for (key, param) in &inner.promoted {
            scope.promoted.insert(key.clone(), param.clone());
        }
        scope
            .custom
            .retain(|p| !inner.custom.iter().any(|i| i.code_name == p.code_name));
        scope.custom.extend(inner.custom.iter().cloned());
        scope
    }
}
