// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph settings shared by interpretation and code generation.

use serde::{Deserialize, Serialize};

/// Default evaluation size in pixels
pub const DEFAULT_SIZE: u32 = 256;

/// Per-graph configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    /// Evaluation width in pixels
    pub width: u32,
    /// Evaluation height in pixels
    pub height: u32,
    /// Seed mixed into random nodes
    pub random_seed: i32,
    /// Compute invocation group size for image output
    pub group_size: [u32; 2],
    /// `#version` of generated programs
    pub glsl_version: u32,
    /// Iteration cap for interpreted loops
    pub max_loop_iterations: u32,
    /// Nesting cap for interpreted calls
    pub max_call_depth: usize,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_SIZE,
            height: DEFAULT_SIZE,
            random_seed: 0,
            group_size: [8, 8],
            glsl_version: 430,
            max_loop_iterations: 1_000_000,
            max_call_depth: 64,
        }
    }
}

impl GraphSettings {
    /// Serialize to RON format
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }

    /// Deserialize from RON format
    pub fn from_ron(s: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(s)
    }

    /// Evaluation size as floats
    pub fn size(&self) -> glam::Vec2 {
        glam::Vec2::new(self.width as f32, self.height as f32)
    }
}
