//! Stencil - a template compiler and rendering VM
//!
//! This library compiles serialized templates into a linked bytecode program
//! and renders them to HTML with a stack-based interpreter.

pub mod compiler;
pub mod config;
pub mod registry;
pub mod vm;

// Re-export commonly used types
pub use compiler::{CompileOptions, CompiledBundle, Strategy, compile_bundle, render_bundle};
pub use config::{CompilerConfig, RuntimeConfig, StencilConfig};
pub use registry::{Bundle, Registry};
pub use vm::{Program, VM, VMHandle, Value};
