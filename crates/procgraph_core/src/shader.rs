// SPDX-License-Identifier: MIT OR Apache-2.0
//! GPU execution of generated compute programs.
//!
//! The compiler only produces text; running it goes through a
//! [`ShaderBackend`] supplied by the host. [`GpuContext`] owns the backend,
//! caches one compiled program per function and drives the
//! compile/bind/dispatch/read-back sequence. Taking `&mut GpuContext` keeps
//! GPU evaluation single-flight.

use crate::graph::GraphEvent;
use crate::graphs::function::FunctionId;
use crate::settings::GraphSettings;
use indexmap::IndexMap;

/// Floats read back after a buffer dispatch (one 4x4 matrix)
pub const RESULT_FLOATS: usize = 16;

/// Uniform value passed to a program
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Uniform {
    /// `float`
    Float(f32),
    /// `vec2`
    Vec2([f32; 2]),
    /// `vec3`
    Vec3([f32; 3]),
    /// `vec4`
    Vec4([f32; 4]),
}

/// Errors raised by a shader backend
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// Program did not compile or link
    #[error("Shader compile failed: {0}")]
    Compile(String),

    /// No program is bound
    #[error("No program bound")]
    NoProgram,

    /// Result buffer could not be read
    #[error("Read-back failed: {0}")]
    ReadBack(String),
}

/// Host graphics API seam.
///
/// Implementations wrap a real device; tests use a recording double.
pub trait ShaderBackend {
    /// Compiled program handle
    type Program;

    /// Compile and link a compute program
    fn compile(&mut self, source: &str) -> Result<Self::Program, BackendError>;

    /// Make a program current
    fn use_program(&mut self, program: &Self::Program);

    /// Set a named uniform on the current program
    fn set_uniform(&mut self, name: &str, value: Uniform);

    /// Bind the shared result buffer, sized for `floats` values
    fn bind_result_buffer(&mut self, floats: usize);

    /// Dispatch `x * y * z` groups of the current program
    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), BackendError>;

    /// Wait for submitted work to finish
    fn block_until_complete(&mut self);

    /// Copy `floats` values out of the result buffer
    fn read_back(&mut self, floats: usize) -> Result<Vec<f32>, BackendError>;

    /// Free a program
    fn release(&mut self, program: Self::Program);
}

/// Compiled program and the source it came from
struct CachedProgram<P> {
    source: String,
    program: P,
}

/// Backend plus per-function program cache
pub struct GpuContext<B: ShaderBackend> {
    backend: B,
    programs: IndexMap<FunctionId, CachedProgram<B::Program>>,
}

impl<B: ShaderBackend> GpuContext<B> {
    /// Wrap a backend
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            programs: IndexMap::new(),
        }
    }

    /// Underlying backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the underlying backend
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Whether a program is cached for the function
    pub fn has_program(&self, id: FunctionId) -> bool {
        self.programs.contains_key(&id)
    }

    /// Number of cached programs
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Compile `source` unless the cached program for `id` already matches it
    fn ensure_program(&mut self, id: FunctionId, source: &str) -> Result<(), BackendError> {
        let stale = self
            .programs
            .get(&id)
            .map_or(true, |cached| cached.source != source);
        if stale {
            tracing::debug!("Compiling program for function {id}");
            let program = self.backend.compile(source)?;
            let cached = CachedProgram {
                source: source.to_string(),
                program,
            };
            if let Some(old) = self.programs.insert(id, cached) {
                self.backend.release(old.program);
            }
        }
        Ok(())
    }

    /// Run a buffer-target program once and read back the packed result
    pub fn run(
        &mut self,
        id: FunctionId,
        source: &str,
        settings: &GraphSettings,
    ) -> Result<Vec<f32>, BackendError> {
        self.ensure_program(id, source)?;
        let Some(cached) = self.programs.get(&id) else {
            return Err(BackendError::NoProgram);
        };
        self.backend.use_program(&cached.program);
        self.backend
            .set_uniform("RandomSeed", Uniform::Float(settings.random_seed as f32));
        self.backend.set_uniform(
            "size",
            Uniform::Vec2([settings.width as f32, settings.height as f32]),
        );
        self.backend.bind_result_buffer(RESULT_FLOATS);
        self.backend.dispatch(1, 1, 1)?;
        self.backend.block_until_complete();
        self.backend.read_back(RESULT_FLOATS)
    }

    /// Drop the cached program of a function
    pub fn release_function(&mut self, id: FunctionId) -> bool {
        match self.programs.shift_remove(&id) {
            Some(cached) => {
                self.backend.release(cached.program);
                true
            }
            None => false,
        }
    }

    /// React to a graph event, releasing programs of disposed functions
    pub fn handle_event(&mut self, event: &GraphEvent) {
        if let GraphEvent::FunctionDisposed(id) = event {
            if self.release_function(*id) {
                tracing::debug!("Released program of disposed function {id}");
            }
        }
    }
}

impl<B: ShaderBackend> Drop for GpuContext<B> {
    fn drop(&mut self) {
        for (_, cached) in self.programs.drain(..) {
            self.backend.release(cached.program);
        }
    }
}
