// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in node library.
//!
//! Each submodule holds one family of [`NodeKind`] implementations;
//! [`create_library_registry`] registers all of them with their property schemas.

pub mod arithmetic;
pub mod call;
pub mod constant;
pub mod flow;
pub mod logic;
pub mod matrix;
pub mod random;
pub mod sampler;
pub mod trig;
pub mod variable;
pub mod vector;

use crate::node::{NodeCategory, NodeKind, NodeRegistry, NodeType, PropertyError, PropertyKind, PropertySpec};
use crate::port::PortType;
use arithmetic::{BinaryMath, BinaryOp, Clamp, Lerp, UnaryMath, UnaryOp};
use call::CallNode;
use constant::Constant;
use flow::{Execute, ForLoop, IfElse};
use glam::{Vec2, Vec3, Vec4};
use logic::{Compare, CompareOp, Logic, LogicOp, Not};
use matrix::{Identity, MatrixNode, Rotate, Scale, Shear, Translate};
use random::{Random, Random2};
use sampler::Sampler;
use trig::{ArcTangent, Trig, TrigOp};
use variable::{Arg, GetVar, SetVar};
use vector::{BreakVector, Cartesian, Distance, DotProduct, Length, MakeVector, Normalize, Polar};

/// Implements the downcast plumbing of [`NodeKind`]
macro_rules! impl_any {
    () => {
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    };
}
pub(crate) use impl_any;

/// `T ident = expr;` with a trailing newline
pub(crate) fn declare(ty: PortType, ident: &str, expr: &str) -> String {
    format!("{} {ident} = {expr};\n", ty.glsl_type())
}

/// Expression converting `expr` from one backend type to another.
///
/// Scalars splat, wider vectors truncate and narrower vectors are zero-extended.
/// Matrices are passed through unchanged.
pub(crate) fn cast(expr: &str, from: PortType, to: PortType) -> String {
    let (from, to) = (from.normalized(), to.normalized());
    if from == to || from == PortType::MATRIX || to == PortType::MATRIX {
        return expr.to_string();
    }
    let (have, want) = (from.components(), to.components());
    if have == want {
        expr.to_string()
    } else if have == 1 || have > want {
        format!("{}({expr})", to.glsl_type())
    } else {
        let padding = ", 0.0".repeat(want - have);
        format!("{}({expr}{padding})", to.glsl_type())
    }
}

/// Error for a property set with the wrong value shape
pub(crate) fn wrong_kind(name: &str, expected: PropertyKind) -> PropertyError {
    PropertyError::WrongKind {
        name: name.to_string(),
        expected,
    }
}

/// Create the built-in node registry with all available node types
pub fn create_library_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    // ========================================================================
    // Input Nodes - Constants
    // ========================================================================

    registry.register(NodeType {
        id: "float_constant".to_string(),
        name: "Float".to_string(),
        category: NodeCategory::Input,
        description: "Constant scalar value".to_string(),
        properties: vec![PropertySpec::promotable("value", PropertyKind::Float, PortType::FLOAT)],
        create: || Box::new(Constant::float(0.0)),
    });

    registry.register(NodeType {
        id: "float2_constant".to_string(),
        name: "Float2".to_string(),
        category: NodeCategory::Input,
        description: "Constant 2D vector value".to_string(),
        properties: vec![PropertySpec::promotable("value", PropertyKind::Vector, PortType::FLOAT2)],
        create: || Box::new(Constant::float2(Vec2::ZERO)),
    });

    registry.register(NodeType {
        id: "float3_constant".to_string(),
        name: "Float3".to_string(),
        category: NodeCategory::Input,
        description: "Constant 3D vector value".to_string(),
        properties: vec![PropertySpec::promotable("value", PropertyKind::Vector, PortType::FLOAT3)],
        create: || Box::new(Constant::float3(Vec3::ZERO)),
    });

    registry.register(NodeType {
        id: "float4_constant".to_string(),
        name: "Float4".to_string(),
        category: NodeCategory::Input,
        description: "Constant 4D vector value".to_string(),
        properties: vec![PropertySpec::promotable("value", PropertyKind::Vector, PortType::FLOAT4)],
        create: || Box::new(Constant::float4(Vec4::ZERO)),
    });

    registry.register(NodeType {
        id: "bool_constant".to_string(),
        name: "Bool".to_string(),
        category: NodeCategory::Input,
        description: "Constant boolean value".to_string(),
        properties: vec![PropertySpec::promotable("value", PropertyKind::Bool, PortType::BOOL)],
        create: || Box::new(Constant::boolean(false)),
    });

    // ========================================================================
    // Input Nodes - Variables & Arguments
    // ========================================================================

    registry.register(NodeType {
        id: "get_var".to_string(),
        name: "Get Variable".to_string(),
        category: NodeCategory::Input,
        description: "Read a scoped variable or parameter".to_string(),
        properties: vec![PropertySpec::fixed("name", PropertyKind::Text)],
        create: || Box::new(GetVar::default()),
    });

    registry.register(NodeType {
        id: "set_var".to_string(),
        name: "Set Variable".to_string(),
        category: NodeCategory::Input,
        description: "Declare or update a scoped variable".to_string(),
        properties: vec![PropertySpec::fixed("name", PropertyKind::Text)],
        create: || Box::new(SetVar::default()),
    });

    registry.register(NodeType {
        id: "arg".to_string(),
        name: "Argument".to_string(),
        category: NodeCategory::Input,
        description: "Formal argument of the enclosing function".to_string(),
        properties: vec![
            PropertySpec::fixed("name", PropertyKind::Text),
            PropertySpec::fixed("type", PropertyKind::Type),
        ],
        create: || Box::new(Arg::default()),
    });

    // ========================================================================
    // Flow Nodes
    // ========================================================================

    registry.register(NodeType {
        id: "execute".to_string(),
        name: "Execute".to_string(),
        category: NodeCategory::Flow,
        description: "Entry point of a function".to_string(),
        properties: vec![],
        create: || Box::new(Execute),
    });

    registry.register(NodeType {
        id: "for_loop".to_string(),
        name: "For Loop".to_string(),
        category: NodeCategory::Flow,
        description: "Run the body for each step from start towards end".to_string(),
        properties: vec![],
        create: || Box::new(ForLoop::default()),
    });

    registry.register(NodeType {
        id: "call".to_string(),
        name: "Call".to_string(),
        category: NodeCategory::Flow,
        description: "Invoke a function from the library".to_string(),
        properties: vec![PropertySpec::fixed("function", PropertyKind::Text)],
        create: || Box::new(CallNode::default()),
    });

    registry.register(NodeType {
        id: "if_else".to_string(),
        name: "If Else".to_string(),
        category: NodeCategory::Flow,
        description: "Select one of two values by a condition".to_string(),
        properties: vec![],
        create: || Box::new(IfElse),
    });

    // ========================================================================
    // Math Nodes
    // ========================================================================

    for op in BinaryOp::ALL {
        registry.register(NodeType {
            id: op.type_name().to_string(),
            name: op.display_name().to_string(),
            category: NodeCategory::Math,
            description: op.description().to_string(),
            properties: vec![],
            create: binary_constructor(op),
        });
    }

    for op in UnaryOp::ALL {
        registry.register(NodeType {
            id: op.type_name().to_string(),
            name: op.display_name().to_string(),
            category: NodeCategory::Math,
            description: op.description().to_string(),
            properties: vec![],
            create: unary_constructor(op),
        });
    }

    registry.register(NodeType {
        id: "clamp".to_string(),
        name: "Clamp".to_string(),
        category: NodeCategory::Math,
        description: "Limit a value to a range".to_string(),
        properties: vec![],
        create: || Box::new(Clamp),
    });

    registry.register(NodeType {
        id: "lerp".to_string(),
        name: "Lerp".to_string(),
        category: NodeCategory::Math,
        description: "Linear interpolation between two values".to_string(),
        properties: vec![],
        create: || Box::new(Lerp),
    });

    // ========================================================================
    // Trigonometry Nodes
    // ========================================================================

    registry.register(NodeType {
        id: "sine".to_string(),
        name: "Sine".to_string(),
        category: NodeCategory::Trigonometry,
        description: "Sine of an angle in radians".to_string(),
        properties: vec![],
        create: || Box::new(Trig::new(TrigOp::Sine)),
    });

    registry.register(NodeType {
        id: "cosine".to_string(),
        name: "Cosine".to_string(),
        category: NodeCategory::Trigonometry,
        description: "Cosine of an angle in radians".to_string(),
        properties: vec![],
        create: || Box::new(Trig::new(TrigOp::Cosine)),
    });

    registry.register(NodeType {
        id: "tangent".to_string(),
        name: "Tangent".to_string(),
        category: NodeCategory::Trigonometry,
        description: "Tangent of an angle in radians".to_string(),
        properties: vec![],
        create: || Box::new(Trig::new(TrigOp::Tangent)),
    });

    registry.register(NodeType {
        id: "arc_tangent".to_string(),
        name: "Arc Tangent".to_string(),
        category: NodeCategory::Trigonometry,
        description: "Angle of the point (x, y)".to_string(),
        properties: vec![],
        create: || Box::new(ArcTangent),
    });

    // ========================================================================
    // Vector Nodes
    // ========================================================================

    registry.register(NodeType {
        id: "make_float2".to_string(),
        name: "Make Float2".to_string(),
        category: NodeCategory::Vector,
        description: "Build a 2D vector from components".to_string(),
        properties: vec![],
        create: || Box::new(MakeVector::new(2)),
    });

    registry.register(NodeType {
        id: "make_float3".to_string(),
        name: "Make Float3".to_string(),
        category: NodeCategory::Vector,
        description: "Build a 3D vector from components".to_string(),
        properties: vec![],
        create: || Box::new(MakeVector::new(3)),
    });

    registry.register(NodeType {
        id: "make_float4".to_string(),
        name: "Make Float4".to_string(),
        category: NodeCategory::Vector,
        description: "Build a 4D vector from components".to_string(),
        properties: vec![],
        create: || Box::new(MakeVector::new(4)),
    });

    registry.register(NodeType {
        id: "break_float2".to_string(),
        name: "Break Float2".to_string(),
        category: NodeCategory::Vector,
        description: "Split a 2D vector into components".to_string(),
        properties: vec![],
        create: || Box::new(BreakVector::new(2)),
    });

    registry.register(NodeType {
        id: "break_float3".to_string(),
        name: "Break Float3".to_string(),
        category: NodeCategory::Vector,
        description: "Split a 3D vector into components".to_string(),
        properties: vec![],
        create: || Box::new(BreakVector::new(3)),
    });

    registry.register(NodeType {
        id: "break_float4".to_string(),
        name: "Break Float4".to_string(),
        category: NodeCategory::Vector,
        description: "Split a 4D vector into components".to_string(),
        properties: vec![],
        create: || Box::new(BreakVector::new(4)),
    });

    registry.register(NodeType {
        id: "length".to_string(),
        name: "Length".to_string(),
        category: NodeCategory::Vector,
        description: "Euclidean length".to_string(),
        properties: vec![],
        create: || Box::new(Length),
    });

    registry.register(NodeType {
        id: "normalize".to_string(),
        name: "Normalize".to_string(),
        category: NodeCategory::Vector,
        description: "Unit vector in the same direction".to_string(),
        properties: vec![],
        create: || Box::new(Normalize),
    });

    registry.register(NodeType {
        id: "distance".to_string(),
        name: "Distance".to_string(),
        category: NodeCategory::Vector,
        description: "Distance between two points".to_string(),
        properties: vec![],
        create: || Box::new(Distance),
    });

    registry.register(NodeType {
        id: "dot_product".to_string(),
        name: "Dot Product".to_string(),
        category: NodeCategory::Vector,
        description: "Dot product of two vectors".to_string(),
        properties: vec![],
        create: || Box::new(DotProduct),
    });

    registry.register(NodeType {
        id: "cartesian".to_string(),
        name: "Cartesian".to_string(),
        category: NodeCategory::Vector,
        description: "Radius and angle to x and y".to_string(),
        properties: vec![],
        create: || Box::new(Cartesian),
    });

    registry.register(NodeType {
        id: "polar".to_string(),
        name: "Polar".to_string(),
        category: NodeCategory::Vector,
        description: "x and y to radius and angle".to_string(),
        properties: vec![],
        create: || Box::new(Polar),
    });

    // ========================================================================
    // Logic Nodes
    // ========================================================================

    for op in CompareOp::ALL {
        registry.register(NodeType {
            id: op.type_name().to_string(),
            name: op.display_name().to_string(),
            category: NodeCategory::Logic,
            description: format!("True when A {} B", op.symbol()),
            properties: vec![],
            create: compare_constructor(op),
        });
    }

    registry.register(NodeType {
        id: "and".to_string(),
        name: "And".to_string(),
        category: NodeCategory::Logic,
        description: "True when both inputs are true".to_string(),
        properties: vec![],
        create: || Box::new(Logic::new(LogicOp::And)),
    });

    registry.register(NodeType {
        id: "or".to_string(),
        name: "Or".to_string(),
        category: NodeCategory::Logic,
        description: "True when either input is true".to_string(),
        properties: vec![],
        create: || Box::new(Logic::new(LogicOp::Or)),
    });

    registry.register(NodeType {
        id: "not".to_string(),
        name: "Not".to_string(),
        category: NodeCategory::Logic,
        description: "Negate a condition".to_string(),
        properties: vec![],
        create: || Box::new(Not),
    });

    // ========================================================================
    // Matrix Nodes
    // ========================================================================

    registry.register(NodeType {
        id: "translate_matrix".to_string(),
        name: "Translate".to_string(),
        category: NodeCategory::Matrix,
        description: "Translation matrix".to_string(),
        properties: vec![],
        create: || Box::new(MatrixNode::<Translate>::default()),
    });

    registry.register(NodeType {
        id: "rotate_matrix".to_string(),
        name: "Rotate".to_string(),
        category: NodeCategory::Matrix,
        description: "Rotation about Z in degrees".to_string(),
        properties: vec![],
        create: || Box::new(MatrixNode::<Rotate>::default()),
    });

    registry.register(NodeType {
        id: "scale_matrix".to_string(),
        name: "Scale".to_string(),
        category: NodeCategory::Matrix,
        description: "Scale matrix".to_string(),
        properties: vec![],
        create: || Box::new(MatrixNode::<Scale>::default()),
    });

    registry.register(NodeType {
        id: "shear_matrix".to_string(),
        name: "Shear".to_string(),
        category: NodeCategory::Matrix,
        description: "Shear along X and Y".to_string(),
        properties: vec![],
        create: || Box::new(MatrixNode::<Shear>::default()),
    });

    registry.register(NodeType {
        id: "identity_matrix".to_string(),
        name: "Identity".to_string(),
        category: NodeCategory::Matrix,
        description: "Identity matrix".to_string(),
        properties: vec![],
        create: || Box::new(MatrixNode::<Identity>::default()),
    });

    // ========================================================================
    // Texture Nodes
    // ========================================================================

    registry.register(NodeType {
        id: "random".to_string(),
        name: "Random".to_string(),
        category: NodeCategory::Texture,
        description: "Hash a seed to a value in [-1, 1)".to_string(),
        properties: vec![],
        create: || Box::new(Random),
    });

    registry.register(NodeType {
        id: "random2".to_string(),
        name: "Random 2".to_string(),
        category: NodeCategory::Texture,
        description: "Hash two seeds to a value in [-1, 1)".to_string(),
        properties: vec![],
        create: || Box::new(Random2),
    });

    registry.register(NodeType {
        id: "sampler".to_string(),
        name: "Sampler".to_string(),
        category: NodeCategory::Texture,
        description: "Sample one of the bound input textures".to_string(),
        properties: vec![PropertySpec::fixed("channel", PropertyKind::Int)],
        create: || Box::new(Sampler::default()),
    });

    registry
}

fn binary_constructor(op: BinaryOp) -> fn() -> Box<dyn NodeKind> {
    match op {
        BinaryOp::Add => || Box::new(BinaryMath::new(BinaryOp::Add)),
        BinaryOp::Subtract => || Box::new(BinaryMath::new(BinaryOp::Subtract)),
        BinaryOp::Multiply => || Box::new(BinaryMath::new(BinaryOp::Multiply)),
        BinaryOp::Divide => || Box::new(BinaryMath::new(BinaryOp::Divide)),
        BinaryOp::Modulo => || Box::new(BinaryMath::new(BinaryOp::Modulo)),
        BinaryOp::Pow => || Box::new(BinaryMath::new(BinaryOp::Pow)),
        BinaryOp::Min => || Box::new(BinaryMath::new(BinaryOp::Min)),
        BinaryOp::Max => || Box::new(BinaryMath::new(BinaryOp::Max)),
    }
}

fn unary_constructor(op: UnaryOp) -> fn() -> Box<dyn NodeKind> {
    match op {
        UnaryOp::Negate => || Box::new(UnaryMath::new(UnaryOp::Negate)),
        UnaryOp::Absolute => || Box::new(UnaryMath::new(UnaryOp::Absolute)),
        UnaryOp::Floor => || Box::new(UnaryMath::new(UnaryOp::Floor)),
        UnaryOp::Ceil => || Box::new(UnaryMath::new(UnaryOp::Ceil)),
        UnaryOp::Round => || Box::new(UnaryMath::new(UnaryOp::Round)),
        UnaryOp::Fract => || Box::new(UnaryMath::new(UnaryOp::Fract)),
        UnaryOp::Sqrt => || Box::new(UnaryMath::new(UnaryOp::Sqrt)),
        UnaryOp::Exponential => || Box::new(UnaryMath::new(UnaryOp::Exponential)),
        UnaryOp::Log => || Box::new(UnaryMath::new(UnaryOp::Log)),
        UnaryOp::Log2 => || Box::new(UnaryMath::new(UnaryOp::Log2)),
        UnaryOp::Pow2 => || Box::new(UnaryMath::new(UnaryOp::Pow2)),
    }
}

fn compare_constructor(op: CompareOp) -> fn() -> Box<dyn NodeKind> {
    match op {
        CompareOp::Equal => || Box::new(Compare::new(CompareOp::Equal)),
        CompareOp::NotEqual => || Box::new(Compare::new(CompareOp::NotEqual)),
        CompareOp::Greater => || Box::new(Compare::new(CompareOp::Greater)),
        CompareOp::GreaterEqual => || Box::new(Compare::new(CompareOp::GreaterEqual)),
        CompareOp::Less => || Box::new(Compare::new(CompareOp::Less)),
        CompareOp::LessEqual => || Box::new(Compare::new(CompareOp::LessEqual)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cast() {
        assert_eq!(cast("a", PortType::FLOAT, PortType::FLOAT), "a");
        assert_eq!(cast("a", PortType::BOOL, PortType::FLOAT), "a");
        assert_eq!(cast("a", PortType::FLOAT, PortType::FLOAT3), "vec3(a)");
        assert_eq!(cast("a", PortType::FLOAT4, PortType::FLOAT2), "vec2(a)");
        assert_eq!(cast("a", PortType::FLOAT2, PortType::FLOAT4), "vec4(a, 0.0, 0.0)");
        assert_eq!(cast("m", PortType::MATRIX, PortType::FLOAT2), "m");
    }

    #[test]
    fn test_registry_creates_matching_kinds() {
        let registry = create_library_registry();
        for node_type in registry.types() {
            let kind = (node_type.create)();
            assert_eq!(kind.type_name(), node_type.id, "{}", node_type.id);
            let names: Vec<_> = kind.properties().into_iter().map(|(n, _)| n).collect();
            let schema: Vec<_> = node_type.properties.iter().map(|p| p.name).collect();
            assert_eq!(names, schema, "{}", node_type.id);
        }
        assert!(registry.types().count() >= 60);
    }
}
