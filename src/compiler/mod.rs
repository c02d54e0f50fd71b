mod builder;
mod component;
pub mod dump;
mod encoder;
mod error;
mod labels;
mod lookup;
mod strategy;
mod syntax;
mod template;
pub mod wire;

pub use builder::{CompileOptions, OpcodeBuilder};
pub use dump::{Disassembler, format_program};
pub use encoder::INSTRUCTION_WIDTH;
pub use error::CompileError;
pub use labels::relative_offset;
pub use lookup::{CompileTimeLookup, ComponentCapabilities};
pub use strategy::Strategy;
pub use syntax::Macros;
pub use template::{
    AttrMode, BlockSymbolTable, CompilableTemplate, ParsedLayout, ProgramSymbolTable, SymbolTable,
};

use std::rc::Rc;

use serde_json::Value as Json;
use tracing::info;

use crate::config::{CompilerConfig, StencilConfig};
use crate::registry::{Bundle, Registry};
use crate::vm::{Program, ReferenceRc, RootReference, VMHandle, Verifier, VM};

/// A bundle compiled into a fresh program, ready to render.
pub struct CompiledBundle {
    pub program: Program,
    pub entry: VMHandle,
    pub options: CompileOptions,
    pub registry: Rc<Registry>,
}

/// Compile the entry template of `bundle` (and, eagerly, everything it reaches).
pub fn compile_bundle(bundle: &Bundle, config: &CompilerConfig) -> Result<CompiledBundle, String> {
    let registry = Rc::new(Registry::from_bundle(bundle).map_err(|e| e.to_string())?);
    let options = CompileOptions::new(registry.clone(), config.strategy);

    let mut program = Program::new();
    let entry = bundle
        .entry()
        .compile(&mut program, &options)
        .map_err(|e| format!("compile error: {}", e))?;

    if config.verify {
        let instructions = Verifier::new()
            .verify_all(&program)
            .map_err(|e| format!("verification failed: {}", e))?;
        info!(instructions, "program verified");
    }

    info!(
        strategy = %config.strategy,
        entry = %entry,
        words = program.heap.words().len(),
        blocks = program.heap.handles().count(),
        "compiled bundle"
    );

    Ok(CompiledBundle {
        program,
        entry,
        options,
        registry,
    })
}

/// Compile `bundle` and render its entry template with `data` as `this`.
pub fn render_bundle(bundle: &Bundle, data: Json, config: &StencilConfig) -> Result<String, String> {
    let CompiledBundle {
        mut program,
        entry,
        options,
        registry,
    } = compile_bundle(bundle, &config.compiler)?;

    let this: ReferenceRc = RootReference::new(data);
    let vm = VM::new(&mut program, options, registry, &config.runtime);
    let result = vm
        .render(entry, this)
        .map_err(|e| format!("runtime error: {}", e))?;
    info!(destructors = result.destructor_count(), "rendered");

    Ok(result.destroy())
}
