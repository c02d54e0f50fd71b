//! Compilable templates and symbol tables.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use super::builder::{CompileOptions, OpcodeBuilder};
use super::error::Result;
use super::syntax;
use super::wire::{SerializedInlineBlock, SerializedTemplateBlock, Statement};
use crate::vm::{Program, VMHandle};

/// Symbols of a top-level template or component layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramSymbolTable {
    pub symbols: Vec<String>,
    pub has_eval: bool,
    pub referer: String,
}

/// Parameters of a nested block, as scope slots of the enclosing layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockSymbolTable {
    pub parameters: Vec<u32>,
    pub referer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolTable {
    Program(ProgramSymbolTable),
    Block(BlockSymbolTable),
}

impl SymbolTable {
    pub fn referer(&self) -> &str {
        match self {
            SymbolTable::Program(t) => &t.referer,
            SymbolTable::Block(t) => &t.referer,
        }
    }

    /// Block parameters; empty for program tables.
    pub fn parameters(&self) -> &[u32] {
        match self {
            SymbolTable::Program(_) => &[],
            SymbolTable::Block(t) => &t.parameters,
        }
    }

    pub fn as_program(&self) -> Option<&ProgramSymbolTable> {
        match self {
            SymbolTable::Program(t) => Some(t),
            SymbolTable::Block(_) => None,
        }
    }
}

/// A parsed template together with the module it was defined in.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLayout {
    pub block: SerializedTemplateBlock,
    pub referer: String,
}

impl ParsedLayout {
    pub fn new(block: SerializedTemplateBlock, referer: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            block,
            referer: referer.into(),
        })
    }
}

/// How attribute statements in a block are emitted.
///
/// Statements of a component's attrs block are captured as component
/// attributes; everywhere else attributes apply to the element under
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttrMode {
    #[default]
    Element,
    Component,
}

/// A template fragment that can be compiled into a heap handle on demand.
///
/// Immutable after creation. The compiled handle is cached per program so
/// that a block referenced from many places is only linked once.
pub struct CompilableTemplate {
    statements: Rc<[Statement]>,
    layout: Rc<ParsedLayout>,
    table: SymbolTable,
    attr_mode: AttrMode,
    compiled: Cell<Option<(u32, VMHandle)>>,
}

impl fmt::Debug for CompilableTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilableTemplate")
            .field("statements", &self.statements.len())
            .field("table", &self.table)
            .field("attr_mode", &self.attr_mode)
            .finish()
    }
}

impl CompilableTemplate {
    /// The whole of `layout`, with a program symbol table.
    pub fn program(layout: Rc<ParsedLayout>) -> Rc<Self> {
        let table = SymbolTable::Program(ProgramSymbolTable {
            symbols: layout.block.symbols.clone(),
            has_eval: layout.block.has_eval,
            referer: layout.referer.clone(),
        });
        Rc::new(Self {
            statements: layout.block.statements.clone().into(),
            layout,
            table,
            attr_mode: AttrMode::Element,
            compiled: Cell::new(None),
        })
    }

    /// A nested block of `layout`.
    pub fn inline(layout: Rc<ParsedLayout>, block: &SerializedInlineBlock) -> Rc<Self> {
        Self::block(layout, &block.statements, block.parameters.clone(), AttrMode::Element)
    }

    /// A synthesized block of component attributes.
    pub fn attrs(layout: Rc<ParsedLayout>, statements: &[Statement]) -> Rc<Self> {
        Self::block(layout, statements, Vec::new(), AttrMode::Component)
    }

    fn block(
        layout: Rc<ParsedLayout>,
        statements: &[Statement],
        parameters: Vec<u32>,
        attr_mode: AttrMode,
    ) -> Rc<Self> {
        let table = SymbolTable::Block(BlockSymbolTable {
            parameters,
            referer: layout.referer.clone(),
        });
        Rc::new(Self {
            statements: statements.into(),
            layout,
            table,
            attr_mode,
            compiled: Cell::new(None),
        })
    }

    pub fn symbol_table(&self) -> &SymbolTable {
        &self.table
    }

    pub fn containing_layout(&self) -> &Rc<ParsedLayout> {
        &self.layout
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Compile into `program`, or return the handle from an earlier compile.
    ///
    /// The handle is reserved and cached before the body is built, so a
    /// template that reaches itself while compiling eagerly (a recursive
    /// component) gets its own handle back instead of compiling again.
    pub fn compile(&self, program: &mut Program, options: &CompileOptions) -> Result<VMHandle> {
        if let Some((id, handle)) = self.compiled.get() {
            if id == program.id() {
                return Ok(handle);
            }
        }

        let program_id = program.id();
        let handle = program.heap.reserve();
        self.compiled.set(Some((program_id, handle)));

        match self.build(program, options, handle) {
            Ok(handle) => {
                debug!(%handle, referer = %self.table.referer(), "compiled template");
                Ok(handle)
            }
            Err(e) => {
                self.compiled.set(None);
                Err(e)
            }
        }
    }

    fn build(
        &self,
        program: &mut Program,
        options: &CompileOptions,
        handle: VMHandle,
    ) -> Result<VMHandle> {
        let mut builder = OpcodeBuilder::new(program, options, self.layout.clone());
        for statement in self.statements.iter() {
            syntax::statement(statement, &mut builder, self.attr_mode)?;
        }
        builder.commit_reserved(handle)
    }
}
