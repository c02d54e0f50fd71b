//! The opcode builder: the compiler driver that turns statements into a
//! linear instruction stream and commits it to the shared heap.

use std::rc::Rc;

use tracing::debug;

use super::encoder::InstructionEncoder;
use super::error::{CompileError, Result};
use super::labels::{Label, Labels};
use super::lookup::CompileTimeLookup;
use super::strategy::{BuilderStrategy, Strategy};
use super::syntax::{self, Macros};
use super::template::{AttrMode, CompilableTemplate, ParsedLayout, SymbolTable};
use super::wire::{Expression, Hash, SerializedInlineBlock, Statement};
use crate::vm::{Constants, Op, Primitive, Program, Register, VMHandle};

/// Everything a compilation pipeline shares across builders.
#[derive(Clone)]
pub struct CompileOptions {
    pub lookup: Rc<dyn CompileTimeLookup>,
    pub macros: Rc<Macros>,
    pub strategy: Strategy,
}

impl CompileOptions {
    pub fn new(lookup: Rc<dyn CompileTimeLookup>, strategy: Strategy) -> Self {
        Self {
            lookup,
            macros: Rc::new(Macros::new()),
            strategy,
        }
    }
}

pub struct OpcodeBuilder<'a> {
    program: &'a mut Program,
    options: &'a CompileOptions,
    containing_layout: Rc<ParsedLayout>,
    encoder: InstructionEncoder,
    labels_stack: Vec<Labels>,
}

impl<'a> OpcodeBuilder<'a> {
    pub fn new(
        program: &'a mut Program,
        options: &'a CompileOptions,
        containing_layout: Rc<ParsedLayout>,
    ) -> Self {
        Self {
            program,
            options,
            containing_layout,
            encoder: InstructionEncoder::new(),
            labels_stack: Vec::new(),
        }
    }

    pub fn lookup(&self) -> &dyn CompileTimeLookup {
        self.options.lookup.as_ref()
    }

    pub fn macros(&self) -> Rc<Macros> {
        self.options.macros.clone()
    }

    pub fn strategy(&self) -> Strategy {
        self.options.strategy
    }

    pub fn referer(&self) -> &str {
        &self.containing_layout.referer
    }

    pub fn words(&self) -> &[u32] {
        self.encoder.words()
    }

    pub fn push(&mut self, op: Op, op1: u32, op2: u32, op3: u32) {
        self.encoder.push(op, op1, op2, op3);
    }

    /// Push `other` as an opaque constant (a lazily compiled block).
    pub fn push_other(&mut self, other: Rc<CompilableTemplate>) {
        let index = self.program.constants.other(other);
        self.push(Op::Constant, index, 0, 0);
    }

    /// Compile a nested block into the same program right now.
    pub fn compile_nested(&mut self, block: &Rc<CompilableTemplate>) -> Result<VMHandle> {
        block.compile(self.program, self.options)
    }

    pub fn constants_mut(&mut self) -> &mut Constants {
        &mut self.program.constants
    }

    pub fn string(&mut self, value: &str) -> u32 {
        self.program.constants.string(value)
    }

    fn optional_string(&mut self, value: Option<&str>) -> u32 {
        value.map_or(0, |v| self.string(v))
    }

    /// Nested block `index` of the containing layout.
    pub fn inline_block(&self, index: usize) -> Result<Rc<CompilableTemplate>> {
        let block: &SerializedInlineBlock = self
            .containing_layout
            .block
            .blocks
            .get(index)
            .ok_or(CompileError::UnknownBlockIndex(index))?;
        Ok(CompilableTemplate::inline(self.containing_layout.clone(), block))
    }

    pub fn optional_block(&self, index: Option<usize>) -> Result<Option<Rc<CompilableTemplate>>> {
        index.map(|i| self.inline_block(i)).transpose()
    }

    pub fn attrs_block(&self, statements: &[Statement]) -> Rc<CompilableTemplate> {
        CompilableTemplate::attrs(self.containing_layout.clone(), statements)
    }

    // ========================================
    // Labels
    // ========================================

    pub fn start_labels(&mut self) {
        self.labels_stack.push(Labels::new());
    }

    /// Close the innermost label scope and patch its targets.
    pub fn stop_labels(&mut self) -> Result<()> {
        let labels = self
            .labels_stack
            .pop()
            .ok_or(CompileError::UnbalancedLabels("stop_labels without start_labels"))?;
        labels.patch(self.encoder.words_mut())
    }

    fn labels(&mut self) -> Result<&mut Labels> {
        self.labels_stack
            .last_mut()
            .ok_or(CompileError::UnbalancedLabels("label used outside a label scope"))
    }

    pub fn label(&mut self, name: Label) -> Result<()> {
        let at = self.encoder.next_pos();
        self.labels()?.label(name, at);
        Ok(())
    }

    fn reserve_target(&mut self, op: Op, name: Label) -> Result<()> {
        self.encoder.reserve(op);
        let at = self.encoder.pos();
        self.labels()?.target(at, op, name);
        Ok(())
    }

    pub fn jump(&mut self, target: Label) -> Result<()> {
        self.reserve_target(Op::Jump, target)
    }

    pub fn jump_if(&mut self, target: Label) -> Result<()> {
        self.reserve_target(Op::JumpIf, target)
    }

    pub fn jump_unless(&mut self, target: Label) -> Result<()> {
        self.reserve_target(Op::JumpUnless, target)
    }

    pub fn return_to(&mut self, target: Label) -> Result<()> {
        self.reserve_target(Op::ReturnTo, target)
    }

    // ========================================
    // Lists
    // ========================================

    pub fn put_iterator(&mut self) {
        self.push(Op::PutIterator, 0, 0, 0);
    }

    pub fn enter_list(&mut self, start: Label) -> Result<()> {
        self.reserve_target(Op::EnterList, start)
    }

    pub fn exit_list(&mut self) {
        self.push(Op::ExitList, 0, 0, 0);
    }

    pub fn iterate(&mut self, breaks: Label) -> Result<()> {
        self.reserve_target(Op::Iterate, breaks)
    }

    // ========================================
    // DOM
    // ========================================

    pub fn text(&mut self, text: &str) {
        let index = self.string(text);
        self.push(Op::Text, index, 0, 0);
    }

    pub fn comment(&mut self, comment: &str) {
        let index = self.string(comment);
        self.push(Op::Comment, index, 0, 0);
    }

    pub fn open_element(&mut self, tag: &str) {
        let index = self.string(tag);
        self.push(Op::OpenElement, index, 0, 0);
    }

    pub fn flush_element(&mut self) {
        self.push(Op::FlushElement, 0, 0, 0);
    }

    pub fn close_element(&mut self) {
        self.push(Op::CloseElement, 0, 0, 0);
    }

    /// `name="value"`. In component mode the value is captured as a constant
    /// reference for the component's attribute operations.
    pub fn static_attr(&mut self, name: &str, namespace: Option<&str>, value: &str, mode: AttrMode) {
        let name = self.string(name);
        let namespace = self.optional_string(namespace);
        match mode {
            AttrMode::Component => {
                self.primitive_reference(&Primitive::String(value.to_string()));
                self.push(Op::ComponentAttr, name, 1, namespace);
            }
            AttrMode::Element => {
                let value = self.string(value);
                self.push(Op::StaticAttr, name, value, namespace);
            }
        }
    }

    /// Attribute whose value reference is on top of the stack.
    pub fn dynamic_attr(&mut self, name: &str, namespace: Option<&str>, trusting: bool, mode: AttrMode) {
        let name = self.string(name);
        let namespace = self.optional_string(namespace);
        let op = match mode {
            AttrMode::Component => Op::ComponentAttr,
            AttrMode::Element => Op::DynamicAttr,
        };
        self.push(op, name, trusting as u32, namespace);
    }

    pub fn modifier(&mut self, handle: u32) {
        let index = self.program.constants.handle(handle);
        self.push(Op::Modifier, index, 0, 0);
    }

    pub fn dynamic_content(&mut self, trusting: bool) {
        self.push(Op::DynamicContent, trusting as u32, 0, 0);
    }

    // ========================================
    // Values
    // ========================================

    pub fn primitive(&mut self, primitive: &Primitive) {
        let word = primitive.encode(&mut self.program.constants);
        self.push(Op::Primitive, word, 0, 0);
    }

    pub fn primitive_reference(&mut self, primitive: &Primitive) {
        self.primitive(primitive);
        self.push(Op::PrimitiveReference, 0, 0, 0);
    }

    pub fn helper(&mut self, handle: u32) {
        let index = self.program.constants.handle(handle);
        self.push(Op::Helper, index, 0, 0);
    }

    pub fn concat(&mut self, size: u32) {
        self.push(Op::Concat, size, 0, 0);
    }

    pub fn to_boolean(&mut self) {
        self.push(Op::ToBoolean, 0, 0, 0);
    }

    // ========================================
    // Registers and stack
    // ========================================

    pub fn fetch(&mut self, register: Register) {
        self.push(Op::Fetch, register as u32, 0, 0);
    }

    pub fn load(&mut self, register: Register) {
        self.push(Op::Load, register as u32, 0, 0);
    }

    pub fn dup(&mut self, register: Register, offset: u32) {
        self.push(Op::Dup, register as u32, offset, 0);
    }

    pub fn pop(&mut self, count: u32) {
        self.push(Op::Pop, count, 0, 0);
    }

    // ========================================
    // Scopes
    // ========================================

    pub fn get_variable(&mut self, symbol: u32) {
        self.push(Op::GetVariable, symbol, 0, 0);
    }

    pub fn get_property(&mut self, key: &str) {
        let index = self.string(key);
        self.push(Op::GetProperty, index, 0, 0);
    }

    pub fn get_block(&mut self, symbol: u32) {
        self.push(Op::GetBlock, symbol, 0, 0);
    }

    pub fn has_block(&mut self, symbol: u32) {
        self.push(Op::HasBlock, symbol, 0, 0);
    }

    pub fn has_block_params(&mut self, symbol: u32) {
        self.get_block(symbol);
        self.resolve_block();
        self.push(Op::HasBlockParams, 0, 0, 0);
    }

    pub fn set_variable(&mut self, symbol: u32) {
        self.push(Op::SetVariable, symbol, 0, 0);
    }

    pub fn set_block(&mut self, symbol: u32) {
        self.push(Op::SetBlock, symbol, 0, 0);
    }

    pub fn root_scope(&mut self, size: u32, bind_caller: bool) {
        self.push(Op::RootScope, size, bind_caller as u32, 0);
    }

    pub fn child_scope(&mut self) {
        self.push(Op::ChildScope, 0, 0, 0);
    }

    pub fn pop_scope(&mut self) {
        self.push(Op::PopScope, 0, 0, 0);
    }

    pub fn push_dynamic_scope(&mut self) {
        self.push(Op::PushDynamicScope, 0, 0, 0);
    }

    pub fn pop_dynamic_scope(&mut self) {
        self.push(Op::PopDynamicScope, 0, 0, 0);
    }

    // ========================================
    // Frames and calls
    // ========================================

    pub fn push_frame(&mut self) {
        self.push(Op::PushFrame, 0, 0, 0);
    }

    pub fn pop_frame(&mut self) {
        self.push(Op::PopFrame, 0, 0, 0);
    }

    pub fn return_(&mut self) {
        self.push(Op::Return, 0, 0, 0);
    }

    pub fn enter(&mut self, args: u32) {
        self.push(Op::Enter, args, 0, 0);
    }

    pub fn exit(&mut self) {
        self.push(Op::Exit, 0, 0, 0);
    }

    pub fn invoke_virtual(&mut self) {
        self.push(Op::InvokeVirtual, 0, 0, 0);
    }

    pub fn invoke_yield(&mut self) {
        self.push(Op::InvokeYield, 0, 0, 0);
    }

    pub fn push_symbol_table(&mut self, table: Option<&SymbolTable>) {
        match table {
            Some(table) => {
                let index = self.program.constants.table(table);
                self.push(Op::PushSymbolTable, index, 0, 0);
            }
            None => self.primitive(&Primitive::Null),
        }
    }

    /// Push a block's symbol table and the block itself (or two nulls).
    pub fn push_yieldable_block(&mut self, block: Option<&Rc<CompilableTemplate>>) -> Result<()> {
        self.push_symbol_table(block.map(|b| b.symbol_table()));
        self.push_block(block)
    }

    pub fn push_block(&mut self, block: Option<&Rc<CompilableTemplate>>) -> Result<()> {
        let strategy = self.strategy();
        strategy.push_block(self, block)
    }

    pub fn resolve_block(&mut self) {
        let strategy = self.strategy();
        strategy.resolve_block(self)
    }

    pub fn push_layout(&mut self, layout: Option<&Rc<CompilableTemplate>>) -> Result<()> {
        let strategy = self.strategy();
        strategy.push_layout(self, layout)
    }

    pub fn resolve_layout(&mut self) {
        let strategy = self.strategy();
        strategy.resolve_layout(self)
    }

    pub fn invoke_static(&mut self, block: &Rc<CompilableTemplate>) -> Result<()> {
        let strategy = self.strategy();
        strategy.invoke_static(self, block)
    }

    /// Invoke `block`, binding up to `caller_count` values sitting just
    /// below the new frame to the block's parameters.
    ///
    /// Caller values beyond the block's declared parameters are dropped.
    pub fn invoke_static_block(
        &mut self,
        block: &Rc<CompilableTemplate>,
        caller_count: u32,
    ) -> Result<()> {
        let parameters = block.symbol_table().parameters().to_vec();
        let count = caller_count.min(parameters.len() as u32);

        self.push_frame();

        if count > 0 {
            self.child_scope();
            for (i, &symbol) in parameters.iter().take(count as usize).enumerate() {
                self.dup(Register::Fp, caller_count - i as u32);
                self.set_variable(symbol);
            }
        }

        self.push_block(Some(block))?;
        self.resolve_block();
        self.invoke_virtual();

        if count > 0 {
            self.pop_scope();
        }

        self.pop_frame();
        Ok(())
    }

    /// `{{yield}}` / `{{yield to="inverse"}}`.
    pub fn yield_(&mut self, to: u32, params: Option<&[Expression]>) -> Result<()> {
        self.compile_args(params, None, false)?;
        self.get_block(to);
        self.resolve_block();
        self.invoke_yield();
        self.pop_scope();
        self.pop_frame();
        Ok(())
    }

    // ========================================
    // Expressions and arguments
    // ========================================

    pub fn expr(&mut self, expression: &Expression) -> Result<()> {
        syntax::expr(expression, self)
    }

    pub fn params(&mut self, params: Option<&[Expression]>) -> Result<u32> {
        let params = params.unwrap_or(&[]);
        for param in params {
            self.expr(param)?;
        }
        Ok(params.len() as u32)
    }

    /// Push positional values, then hash values, then an arguments object.
    ///
    /// `synthetic` arguments come from curly invocations and carry hash
    /// names without the `@` sigil.
    pub fn compile_args(
        &mut self,
        params: Option<&[Expression]>,
        hash: Option<&Hash>,
        synthetic: bool,
    ) -> Result<()> {
        let count = self.params(params)?;
        let names = match hash {
            Some(hash) => {
                for value in hash.values() {
                    self.expr(value)?;
                }
                hash.names().to_vec()
            }
            None => Vec::new(),
        };
        let names = self.program.constants.string_array(&names);
        let flags = (count << 4) | ((synthetic as u32) << 3);
        self.push(Op::PushArgs, names, flags, 0);
        Ok(())
    }

    // ========================================
    // Commit
    // ========================================

    /// Terminate the sequence with `Return` and link it into the heap.
    pub fn commit(self) -> Result<VMHandle> {
        self.commit_to(None)
    }

    /// Commit into a handle taken earlier with [`Heap::reserve`](crate::vm::Heap::reserve).
    pub fn commit_reserved(self, handle: VMHandle) -> Result<VMHandle> {
        self.commit_to(Some(handle))
    }

    fn commit_to(mut self, reserved: Option<VMHandle>) -> Result<VMHandle> {
        if !self.labels_stack.is_empty() {
            return Err(CompileError::UnbalancedLabels("label scope open at commit"));
        }
        self.return_();

        let scope_size = self.containing_layout.block.symbols.len() as u32;
        let words = self.encoder.into_words();
        let heap = &mut self.program.heap;
        let handle = match reserved {
            Some(handle) => {
                heap.malloc_reserved(handle);
                handle
            }
            None => heap.malloc(),
        };
        for &word in &words {
            heap.push(word);
        }
        heap.finish_malloc(handle, scope_size);

        debug!(%handle, words = words.len(), scope_size, "commit");
        Ok(handle)
    }
}
