// SPDX-License-Identifier: MIT OR Apache-2.0
//! Values produced and consumed by ports during CPU interpretation.

use crate::port::PortType;
use glam::{Mat4, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Error when a value cannot be converted to the requested type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    /// Conversion is not defined
    #[error("Cannot convert {from:?} to {to:?}")]
    Incompatible {
        /// Source type
        from: PortType,
        /// Requested type
        to: PortType,
    },

    /// Operand shapes do not line up
    #[error("Mismatched operands: {0:?} and {1:?}")]
    Mismatched(PortType, PortType),
}

/// A concrete port value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Scalar
    Float(f32),
    /// 2D vector
    Float2(Vec2),
    /// 3D vector
    Float3(Vec3),
    /// 4D vector (also colors)
    Float4(Vec4),
    /// 4x4 matrix
    Matrix(Mat4),
}

impl Value {
    /// Get the port type for this value
    pub fn port_type(&self) -> PortType {
        match self {
            Self::Bool(_) => PortType::BOOL,
            Self::Float(_) => PortType::FLOAT,
            Self::Float2(_) => PortType::FLOAT2,
            Self::Float3(_) => PortType::FLOAT3,
            Self::Float4(_) => PortType::FLOAT4,
            Self::Matrix(_) => PortType::MATRIX,
        }
    }

    /// Safe default for a type: `0`, `false`, the zero vector or the identity matrix
    pub fn default_for(ty: PortType) -> Value {
        match ty.normalized() {
            t if t == PortType::BOOL => Self::Bool(false),
            t if t == PortType::FLOAT2 => Self::Float2(Vec2::ZERO),
            t if t == PortType::FLOAT3 => Self::Float3(Vec3::ZERO),
            t if t == PortType::FLOAT4 => Self::Float4(Vec4::ZERO),
            t if t == PortType::MATRIX => Self::Matrix(Mat4::IDENTITY),
            _ => Self::Float(0.0),
        }
    }

    fn incompatible(&self, to: PortType) -> ValueError {
        ValueError::Incompatible {
            from: self.port_type(),
            to,
        }
    }

    /// Read as a scalar
    pub fn as_float(&self) -> Result<f32, ValueError> {
        match *self {
            Self::Float(f) => Ok(f),
            Self::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
            _ => Err(self.incompatible(PortType::FLOAT)),
        }
    }

    /// Read as a boolean; scalars are true when non-zero
    pub fn as_bool(&self) -> Result<bool, ValueError> {
        match *self {
            Self::Bool(b) => Ok(b),
            Self::Float(f) => Ok(f != 0.0),
            _ => Err(self.incompatible(PortType::BOOL)),
        }
    }

    /// Read as a 4D vector, splatting scalars and zero-extending narrower vectors
    pub fn as_vec4(&self) -> Result<Vec4, ValueError> {
        match *self {
            Self::Bool(_) | Self::Float(_) => Ok(Vec4::splat(self.as_float()?)),
            Self::Float2(v) => Ok(v.extend(0.0).extend(0.0)),
            Self::Float3(v) => Ok(v.extend(0.0)),
            Self::Float4(v) => Ok(v),
            Self::Matrix(_) => Err(self.incompatible(PortType::FLOAT4)),
        }
    }

    /// Read as a 2D vector
    pub fn as_vec2(&self) -> Result<Vec2, ValueError> {
        self.as_vec4().map(|v| v.truncate().truncate())
    }

    /// Read as a 3D vector
    pub fn as_vec3(&self) -> Result<Vec3, ValueError> {
        self.as_vec4().map(Vec4::truncate)
    }

    /// Read as a matrix
    pub fn as_mat4(&self) -> Result<Mat4, ValueError> {
        match *self {
            Self::Matrix(m) => Ok(m),
            _ => Err(self.incompatible(PortType::MATRIX)),
        }
    }

    /// Convert to the given type using best-effort numeric coercion
    pub fn coerce(&self, ty: PortType) -> Result<Value, ValueError> {
        let ty = ty.normalized();
        if self.port_type() == ty {
            return Ok(*self);
        }
        Ok(match ty {
            t if t == PortType::BOOL => Self::Bool(self.as_bool()?),
            t if t == PortType::FLOAT => Self::Float(self.as_float()?),
            t if t == PortType::FLOAT2 => Self::Float2(self.as_vec2()?),
            t if t == PortType::FLOAT3 => Self::Float3(self.as_vec3()?),
            t if t == PortType::FLOAT4 => Self::Float4(self.as_vec4()?),
            t if t == PortType::MATRIX => Self::Matrix(self.as_mat4()?),
            _ => return Err(self.incompatible(ty)),
        })
    }

    /// Coerce, logging failures and substituting the type's default
    pub fn coerce_or_default(&self, ty: PortType) -> Value {
        self.coerce(ty).unwrap_or_else(|e| {
            tracing::warn!("{e}; using default");
            Self::default_for(ty)
        })
    }

    /// Flatten to float components (column-major for matrices)
    pub fn components(&self) -> Vec<f32> {
        match *self {
            Self::Bool(b) => vec![if b { 1.0 } else { 0.0 }],
            Self::Float(f) => vec![f],
            Self::Float2(v) => v.to_array().to_vec(),
            Self::Float3(v) => v.to_array().to_vec(),
            Self::Float4(v) => v.to_array().to_vec(),
            Self::Matrix(m) => m.to_cols_array().to_vec(),
        }
    }

    /// Rebuild a value of the given type from float components
    pub fn from_components(ty: PortType, data: &[f32]) -> Option<Value> {
        let ty = ty.normalized();
        if data.len() < ty.components() {
            return None;
        }
        Some(match ty {
            t if t == PortType::BOOL => Self::Bool(data[0] != 0.0),
            t if t == PortType::FLOAT2 => Self::Float2(Vec2::from_slice(data)),
            t if t == PortType::FLOAT3 => Self::Float3(Vec3::from_slice(data)),
            t if t == PortType::FLOAT4 => Self::Float4(Vec4::from_slice(data)),
            t if t == PortType::MATRIX => Self::Matrix(Mat4::from_cols_slice(data)),
            _ => Self::Float(data[0]),
        })
    }

    /// Apply a scalar function to every component
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Result<Value, ValueError> {
        Ok(match *self {
            Self::Bool(_) => Self::Float(f(self.as_float()?)),
            Self::Float(x) => Self::Float(f(x)),
            Self::Float2(v) => Self::Float2(Vec2::from_array(v.to_array().map(&f))),
            Self::Float3(v) => Self::Float3(Vec3::from_array(v.to_array().map(&f))),
            Self::Float4(v) => Self::Float4(Vec4::from_array(v.to_array().map(&f))),
            Self::Matrix(m) => Self::Matrix(Mat4::from_cols_array(&m.to_cols_array().map(&f))),
        })
    }

    /// Combine two values component-wise, broadcasting a scalar operand
    pub fn zip(&self, other: &Value, f: impl Fn(f32, f32) -> f32) -> Result<Value, ValueError> {
        let (a, b) = (self.port_type(), other.port_type());
        let scalar = |v: &Value| matches!(v, Self::Float(_) | Self::Bool(_));
        let width = match (scalar(self), scalar(other)) {
            (true, true) => return Ok(Self::Float(f(self.as_float()?, other.as_float()?))),
            (true, false) => b,
            (false, true) => a,
            (false, false) if a == b => a,
            _ => return Err(ValueError::Mismatched(a, b)),
        };
        if width == PortType::MATRIX {
            let x = self.broadcast_matrix()?.to_cols_array();
            let y = other.broadcast_matrix()?.to_cols_array();
            let mut out = [0.0; 16];
            for (i, o) in out.iter_mut().enumerate() {
                *o = f(x[i], y[i]);
            }
            return Ok(Self::Matrix(Mat4::from_cols_array(&out)));
        }
        let x = self.as_vec4()?;
        let y = other.as_vec4()?;
        let v = Vec4::new(f(x.x, y.x), f(x.y, y.y), f(x.z, y.z), f(x.w, y.w));
        Self::Float4(v).coerce(width)
    }

    fn broadcast_matrix(&self) -> Result<Mat4, ValueError> {
        match *self {
            Self::Matrix(m) => Ok(m),
            _ => Ok(Mat4::from_cols_array(&[self.as_float()?; 16])),
        }
    }

    /// Backend literal for this value
    pub fn to_glsl(&self) -> String {
        match *self {
            Self::Bool(b) => float_literal(if b { 1.0 } else { 0.0 }),
            Self::Float(f) => float_literal(f),
            Self::Float2(v) => format!("vec2({})", join_literals(&v.to_array())),
            Self::Float3(v) => format!("vec3({})", join_literals(&v.to_array())),
            Self::Float4(v) => format!("vec4({})", join_literals(&v.to_array())),
            Self::Matrix(m) => format!("mat4({})", join_literals(&m.to_cols_array())),
        }
    }
}

/// Format a float so the backend parses it as a float literal
pub fn float_literal(f: f32) -> String {
    if f.is_finite() {
        format!("{f:?}")
    } else {
        "0.0".to_string()
    }
}

fn join_literals(values: &[f32]) -> String {
    values
        .iter()
        .map(|v| float_literal(*v))
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec2> for Value {
    fn from(v: Vec2) -> Self {
        Self::Float2(v)
    }
}

impl From<Vec3> for Value {
    fn from(v: Vec3) -> Self {
        Self::Float3(v)
    }
}

impl From<Vec4> for Value {
    fn from(v: Vec4) -> Self {
        Self::Float4(v)
    }
}

impl From<Mat4> for Value {
    fn from(v: Mat4) -> Self {
        Self::Matrix(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(Value::default_for(PortType::FLOAT), Value::Float(0.0));
        assert_eq!(Value::default_for(PortType::BOOL), Value::Bool(false));
        assert_eq!(Value::default_for(PortType::MATRIX), Value::Matrix(Mat4::IDENTITY));
        assert_eq!(Value::default_for(PortType::COLOR), Value::Float4(Vec4::ZERO));
    }

    #[test]
    fn test_coercion() {
        let v = Value::Float(2.0);
        assert_eq!(v.coerce(PortType::FLOAT3).unwrap(), Value::Float3(Vec3::splat(2.0)));
        assert_eq!(v.coerce(PortType::BOOL).unwrap(), Value::Bool(true));
        assert!(Value::Float2(Vec2::ONE).coerce(PortType::FLOAT).is_err());
        assert_eq!(
            Value::Float2(Vec2::ONE).coerce_or_default(PortType::MATRIX),
            Value::Matrix(Mat4::IDENTITY)
        );
    }

    #[test]
    fn test_zip_broadcast() {
        let a = Value::Float2(Vec2::new(1.0, 2.0));
        let b = Value::Float(3.0);
        assert_eq!(a.zip(&b, |x, y| x * y).unwrap(), Value::Float2(Vec2::new(3.0, 6.0)));
        let c = Value::Float3(Vec3::ONE);
        assert!(a.zip(&c, |x, y| x + y).is_err());
    }

    #[test]
    fn test_literals() {
        assert_eq!(Value::Float(2.0).to_glsl(), "2.0");
        assert_eq!(Value::Bool(true).to_glsl(), "1.0");
        assert_eq!(Value::Float2(Vec2::new(0.5, 1.0)).to_glsl(), "vec2(0.5, 1.0)");
        assert_eq!(float_literal(f32::NAN), "0.0");
    }

    #[test]
    fn test_components() {
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let data = Value::Matrix(m).components();
        assert_eq!(Value::from_components(PortType::MATRIX, &data), Some(Value::Matrix(m)));
        assert_eq!(Value::from_components(PortType::FLOAT3, &[1.0]), None);
    }
}
