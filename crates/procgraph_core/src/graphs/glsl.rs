// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fixed pieces of generated compute programs.
//!
//! Everything here is plain text assembly; the per-node fragments come from the
//! node kinds and the ordering from [`crate::graphs::function::Function`].

use crate::parameter::ParameterScope;
use crate::port::PortType;
use crate::settings::GraphSettings;
use crate::value::float_literal;

/// Number of bound input texture samplers
pub const INPUT_SAMPLERS: usize = 4;

/// Where `main` writes its result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputTarget {
    /// One texel per invocation into the `Output` image
    Image,
    /// A single packed result into the shared float buffer
    Buffer,
}

/// Deterministic hash in `[-1, 1)`
pub const RAND_FUNCTION: &str =
    "float rand(vec2 co) { return fract(sin(dot(co, vec2(12.9898, 78.233))) * 43758.5453) * 2.0 - 1.0; }\n";

/// Declarations shared by every program
pub fn preamble(settings: &GraphSettings, target: OutputTarget) -> String {
    let [x, y] = match target {
        OutputTarget::Image => settings.group_size,
        OutputTarget::Buffer => [1, 1],
    };

    let mut text = format!("#version {}\n", settings.glsl_version);
    text.push_str(&format!(
        "layout(local_size_x = {x}, local_size_y = {y}, local_size_z = 1) in;\n"
    ));
    for i in 0..INPUT_SAMPLERS {
        text.push_str(&format!("layout(binding = {i}) uniform sampler2D Input{i};\n"));
    }
    match target {
        OutputTarget::Image => {
            text.push_str("layout(rgba32f, binding = 0) uniform writeonly image2D Output;\n");
        }
        OutputTarget::Buffer => {
            text.push_str("layout(std430, binding = 1) buffer ResultBuffer { float result[]; };\n");
        }
    }
    text.push_str("uniform float RandomSeed;\n");
    text.push_str("uniform vec2 size;\n");
    text.push_str("vec2 pos;\nvec2 uv;\nivec2 opos;\n");
    text.push_str("const float PI = 3.14159265359;\n");
    text.push_str("const float Rad2Deg = 180.0 / PI;\n");
    text.push_str("const float Deg2Rad = PI / 180.0;\n");
    text.push_str(RAND_FUNCTION);
    text.push('\n');
    text
}

/// Globals for every resolved parameter that has a value
pub fn parameter_globals(params: &ParameterScope) -> String {
    let mut text = String::new();
    for param in params.variables() {
        let Some(value) = param.value else {
            tracing::debug!("Parameter {} has no value; not declared", param.code_name);
            continue;
        };
        let line = format!(
            "{} {} = {};\n",
            param.ty.glsl_type(),
            param.code_name,
            value.coerce_or_default(param.ty).to_glsl()
        );
        if !text.contains(&line) {
            text.push_str(&line);
        }
    }
    text
}

/// Statements opening `main`
pub fn main_setup(target: OutputTarget) -> &'static str {
    match target {
        OutputTarget::Image => {
            "opos = ivec2(gl_GlobalInvocationID.xy);\nuv = (vec2(opos) + 0.5) / size;\npos = uv;\n"
        }
        OutputTarget::Buffer => "opos = ivec2(0);\nuv = vec2(0.0);\npos = vec2(0.0);\n",
    }
}

/// Statements storing `ident` of type `ty` to the target
pub fn write_result(target: OutputTarget, ident: &str, ty: PortType) -> String {
    let ty = ty.normalized();
    match target {
        OutputTarget::Buffer => {
            if ty == PortType::MATRIX {
                let mut text = String::new();
                for c in 0..4 {
                    for r in 0..4 {
                        text.push_str(&format!("result[{}] = {ident}[{c}][{r}];\n", c * 4 + r));
                    }
                }
                text
            } else if ty.components() == 1 {
                format!("result[0] = {ident};\n")
            } else {
                (0..ty.components())
                    .map(|i| format!("result[{i}] = {ident}[{i}];\n"))
                    .collect()
            }
        }
        OutputTarget::Image => {
            let color = match ty.components() {
                2 => format!("vec4({ident}, 0.0, 1.0)"),
                3 => format!("vec4({ident}, 1.0)"),
                4 => ident.to_string(),
                16 => format!("{ident} * vec4(pos, 0.0, 1.0)"),
                _ => format!("vec4(vec3({ident}), {})", float_literal(1.0)),
            };
            format!("imageStore(Output, opos, {color});\n")
        }
    }
}
