//! The reference interpreter.
//!
//! A render walks the linked heap from one entry handle until the outermost
//! frame returns. Block handles arrive either linked (`Handle`), as numbers
//! pushed by the eager strategy, or as templates that `CompileBlock` links
//! on first use; the interpreter treats the three identically.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde_json::Value as Json;
use tracing::{debug, trace, warn};

use super::Program;
use super::component::{
    Arguments, ComponentInstance, ComponentManager, ComponentState, CurriedDefinition, Destructor,
};
use super::element::ElementBuilder;
use super::error::{Result, RuntimeError};
use super::heap::VMHandle;
use super::ops::{Op, Register};
use super::primitive::Primitive;
use super::reference::{self, ComputedReference, ConstReference, Opaque, ReferenceRc};
use super::scope::{DynamicScope, Scope, ScopeBlock, ScopeRef, ScopeSlot};
use super::value::Value;
use crate::compiler::{CompileOptions, INSTRUCTION_WIDTH, relative_offset};
use crate::config::RuntimeConfig;

/// `$ra` of the outermost frame; returning to it ends the render.
pub const HALT: usize = usize::MAX;

pub type Helper = Rc<dyn Fn(&Arguments) -> std::result::Result<Opaque, String>>;

/// A modifier returns the attributes it sets on the element being built.
pub type Modifier = Rc<dyn Fn(&Arguments) -> std::result::Result<Vec<(String, String)>, String>>;

pub struct ComponentDefinition {
    pub name: String,
    pub manager: Rc<dyn ComponentManager>,
}

/// Runtime side of the host: resolves the handles the compiler baked into
/// the program.
pub trait RuntimeResolver {
    fn component(&self, handle: u32) -> Option<ComponentDefinition>;
    fn lookup_component(&self, name: &str, referer: &str) -> Option<u32>;
    fn helper(&self, handle: u32) -> Option<Helper>;
    fn modifier(&self, handle: u32) -> Option<Modifier>;
}

/// Output of a successful render. Destructors registered by components run
/// when the result is destroyed, most recent first.
pub struct RenderResult {
    html: String,
    destructors: Vec<Destructor>,
}

impl RenderResult {
    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn destructor_count(&self) -> usize {
        self.destructors.len()
    }

    pub fn destroy(self) -> String {
        for destructor in self.destructors.into_iter().rev() {
            destructor();
        }
        self.html
    }
}

impl fmt::Debug for RenderResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderResult")
            .field("html", &self.html)
            .field("destructors", &self.destructors.len())
            .finish()
    }
}

/// Result of executing a single instruction.
enum ControlFlow {
    Continue,
    Exit,
}

pub struct VM<'a> {
    program: &'a mut Program,
    options: CompileOptions,
    resolver: Rc<dyn RuntimeResolver>,
    max_stack: usize,
    trace_ops: bool,
    pub(super) stack: Vec<Value>,
    pub(super) pc: usize,
    ra: usize,
    fp: usize,
    /// `$s0`, `$s1`, `$t0`, `$t1`.
    registers: [Value; 4],
    scopes: Vec<ScopeRef>,
    dynamic_scopes: Vec<DynamicScope>,
    elements: ElementBuilder,
    /// Destructors of component invocations still in progress.
    transactions: Vec<Vec<Destructor>>,
    destructors: Vec<Destructor>,
    pub(super) block_depth: usize,
    /// Stack depth recorded by each open `EnterList`.
    pub(super) list_marks: Vec<usize>,
    /// Instruction being executed, for error reports.
    pub(super) current: (usize, Op),
}

impl<'a> VM<'a> {
    pub fn new(
        program: &'a mut Program,
        options: CompileOptions,
        resolver: Rc<dyn RuntimeResolver>,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            program,
            options,
            resolver,
            max_stack: config.max_stack,
            trace_ops: config.trace_ops,
            stack: Vec::new(),
            pc: 0,
            ra: HALT,
            fp: 0,
            registers: std::array::from_fn(|_| Value::null()),
            scopes: Vec::new(),
            dynamic_scopes: Vec::new(),
            elements: ElementBuilder::new(),
            transactions: Vec::new(),
            destructors: Vec::new(),
            block_depth: 0,
            list_marks: Vec::new(),
            current: (0, Op::Return),
        }
    }

    /// Render the block `handle` with `this` bound to symbol 0.
    ///
    /// On failure every destructor registered so far runs before the error
    /// is returned: open transactions first, innermost first, then the
    /// committed ones.
    pub fn render(mut self, handle: VMHandle, this: ReferenceRc) -> Result<RenderResult> {
        let addr = self
            .program
            .heap
            .get_addr(handle)
            .ok_or(RuntimeError::InvalidHandle(handle.0))?;
        let symbols = self.program.heap.scope_size(handle).unwrap_or(0);

        let scope = Scope::root(symbols + 1, None);
        scope.borrow_mut().bind(0, ScopeSlot::Value(this));
        self.scopes.push(scope);
        self.dynamic_scopes.push(DynamicScope::default());

        self.pc = addr;
        self.ra = HALT;
        debug!(handle = %handle, addr, "render");

        match self.run() {
            Ok(()) => {
                debug!(
                    destructors = self.destructors.len(),
                    leftover = self.stack.len(),
                    "render finished"
                );
                Ok(RenderResult {
                    html: self.elements.finish(),
                    destructors: self.destructors,
                })
            }
            Err(err) => {
                warn!(error = %err, addr = self.current.0, "render failed");
                self.unwind();
                Err(err)
            }
        }
    }

    fn unwind(&mut self) {
        while let Some(transaction) = self.transactions.pop() {
            for destructor in transaction.into_iter().rev() {
                destructor();
            }
        }
        for destructor in self.destructors.drain(..).rev() {
            destructor();
        }
        self.dynamic_scopes.clear();
        self.scopes.clear();
    }

    fn run(&mut self) -> Result<()> {
        loop {
            let start = self.pc;
            let word = self.word(start)?;
            let op = Op::from_word(word).ok_or(RuntimeError::UnknownOpcode { addr: start, word })?;
            let operands = [
                self.word(start + 1)?,
                self.word(start + 2)?,
                self.word(start + 3)?,
            ];
            self.pc = start + INSTRUCTION_WIDTH;
            self.current = (start, op);

            if self.trace_ops {
                debug!(
                    target: "stencil::ops",
                    "{:04}: {} {} {} {} (depth {})",
                    start,
                    op.name(),
                    operands[0],
                    operands[1],
                    operands[2],
                    self.stack.len()
                );
            }

            match self.execute_op(op, start, operands)? {
                ControlFlow::Continue => {}
                ControlFlow::Exit => return Ok(()),
            }

            if self.stack.len() > self.max_stack {
                return Err(RuntimeError::StackOverflow {
                    depth: self.stack.len(),
                    max: self.max_stack,
                });
            }
        }
    }

    fn execute_op(&mut self, op: Op, start: usize, operands: [u32; 3]) -> Result<ControlFlow> {
        let [op1, op2, op3] = operands;
        match op {
            // ========================================
            // Expressions
            // ========================================
            Op::Helper => {
                let handle = self.handle_constant(op1)?;
                let helper = self
                    .resolver
                    .helper(handle)
                    .ok_or(RuntimeError::UnknownHelper(handle))?;
                let args = self.pop_args()?;
                let value = helper(&args).map_err(RuntimeError::HelperFailed)?;
                self.stack.push(Value::Ref(ConstReference::new(value)));
            }
            Op::SetVariable => {
                let value = self.pop_ref()?;
                self.scope()?
                    .borrow_mut()
                    .bind(op1, ScopeSlot::Value(value));
            }
            Op::SetBlock => {
                let block = self.pop_block()?;
                self.scope()?.borrow_mut().bind(op1, ScopeSlot::Block(block));
            }
            Op::GetVariable => {
                let slot = self.scope()?.borrow().get(op1);
                let value = match slot {
                    ScopeSlot::Value(value) => value,
                    ScopeSlot::Empty | ScopeSlot::Block(_) => ConstReference::new(Json::Null),
                };
                self.stack.push(Value::Ref(value));
            }
            Op::GetProperty => {
                let key = self.string_constant(op1)?;
                let parent = self.pop_ref()?;
                self.stack.push(Value::Ref(reference::property(parent, &key)));
            }
            Op::GetBlock => {
                let slot = self.scope()?.borrow().get(op1);
                match slot {
                    ScopeSlot::Block(block) => {
                        self.stack.push(block.table);
                        self.stack.push(block.block);
                    }
                    _ => {
                        self.stack.push(Value::null());
                        self.stack.push(Value::null());
                    }
                }
            }
            Op::HasBlock => {
                let present = match self.scope()?.borrow().get(op1) {
                    ScopeSlot::Block(block) => block.is_present(),
                    _ => false,
                };
                self.push_bool(present);
            }
            Op::HasBlockParams => {
                let block = self.pop()?;
                let table = self.pop()?;
                let has_params = match table {
                    Value::Table(table) => !block.is_null() && !table.parameters().is_empty(),
                    _ => false,
                };
                self.push_bool(has_params);
            }
            Op::Concat => {
                let mut parts = Vec::with_capacity(op1 as usize);
                for _ in 0..op1 {
                    parts.push(self.pop_ref()?);
                }
                parts.reverse();
                self.stack.push(Value::Ref(reference::concat(parts)));
            }
            Op::Constant => {
                let template = self
                    .program
                    .constants
                    .get_other(op1)
                    .ok_or(RuntimeError::InvalidConstant { kind: "other", index: op1 })?;
                self.stack.push(Value::Template(template));
            }
            Op::Primitive => {
                let primitive = Primitive::decode(op1, &self.program.constants)
                    .ok_or(RuntimeError::InvalidConstant { kind: "primitive", index: op1 })?;
                self.stack.push(Value::Primitive(primitive));
            }
            Op::PrimitiveReference => match self.pop()? {
                Value::Primitive(primitive) => {
                    self.stack.push(Value::Ref(ConstReference::new(primitive)));
                }
                _ => return Err(self.mismatch("primitive")),
            },
            Op::Dup => {
                let base = match register(op1)? {
                    Register::Sp => self.stack.len().checked_sub(1),
                    Register::Fp => Some(self.fp),
                    other => return Err(RuntimeError::InvalidRegister(other as u32)),
                };
                let value = base
                    .and_then(|base| base.checked_sub(op2 as usize))
                    .and_then(|index| self.stack.get(index))
                    .cloned()
                    .ok_or_else(|| self.underflow())?;
                self.stack.push(value);
            }
            Op::Pop => {
                for _ in 0..op1 {
                    self.pop()?;
                }
            }
            Op::Load => {
                let value = self.pop()?;
                let slot = saved_slot(register(op1)?)?;
                self.registers[slot] = value;
            }
            Op::Fetch => {
                let value = match register(op1)? {
                    Register::Pc => Value::Addr(self.pc),
                    Register::Ra => Value::Addr(self.ra),
                    Register::Fp => Value::Addr(self.fp),
                    Register::Sp => Value::Addr(self.stack.len().saturating_sub(1)),
                    other => self.registers[saved_slot(other)?].clone(),
                };
                self.stack.push(value);
            }
            Op::ToBoolean => {
                let inner = self.pop_ref()?;
                self.stack.push(Value::Ref(reference::to_boolean(inner)));
            }

            // ========================================
            // Scopes and frames
            // ========================================
            Op::RootScope => {
                let caller = if op2 != 0 {
                    self.scopes.last().cloned()
                } else {
                    None
                };
                self.scopes.push(Scope::root(op1 as usize, caller));
            }
            Op::ChildScope => {
                let child = self.scope()?.borrow().child();
                self.scopes.push(child);
            }
            Op::PopScope => {
                self.scopes
                    .pop()
                    .ok_or(RuntimeError::ScopeUnderflow("pop scope"))?;
            }
            Op::PushDynamicScope => {
                let scope = self.dynamic_scopes.last().cloned().unwrap_or_default();
                self.dynamic_scopes.push(scope);
            }
            Op::PopDynamicScope => {
                self.dynamic_scopes
                    .pop()
                    .ok_or(RuntimeError::ScopeUnderflow("pop dynamic scope"))?;
            }
            Op::PushFrame => self.push_frame(),
            Op::PopFrame => self.pop_frame()?,

            // ========================================
            // Control flow
            // ========================================
            Op::Jump => self.pc = self.target(start, op1)?,
            Op::JumpIf => {
                if self.pop_ref()?.value().is_truthy() {
                    self.pc = self.target(start, op1)?;
                }
            }
            Op::JumpUnless => {
                if !self.pop_ref()?.value().is_truthy() {
                    self.pc = self.target(start, op1)?;
                }
            }
            Op::ReturnTo => self.ra = self.target(start, op1)?,
            Op::Return => {
                self.pc = self.ra;
                if self.ra == HALT {
                    return Ok(ControlFlow::Exit);
                }
            }
            Op::InvokeVirtual => {
                let value = self.pop()?;
                let handle = value.as_handle().ok_or_else(|| self.mismatch("block handle"))?;
                self.call(handle)?;
            }
            Op::InvokeStatic => self.call(VMHandle(op1))?,
            Op::InvokeYield => self.invoke_yield()?,
            Op::Enter => self.block_depth += 1,
            Op::Exit => {
                self.block_depth = self
                    .block_depth
                    .checked_sub(1)
                    .ok_or(RuntimeError::ScopeUnderflow("exit block"))?;
            }
            Op::CompileBlock => {
                let value = self.pop()?;
                let compiled = match value {
                    Value::Template(template) => {
                        let handle = template.compile(self.program, &self.options)?;
                        trace!(handle = %handle, "compiled block at runtime");
                        Value::Handle(handle)
                    }
                    value if value.is_null() || value.as_handle().is_some() => value,
                    _ => return Err(self.mismatch("template")),
                };
                self.stack.push(compiled);
            }
            Op::PushSymbolTable => {
                let table = self
                    .program
                    .constants
                    .get_table(op1)
                    .cloned()
                    .ok_or(RuntimeError::InvalidConstant { kind: "table", index: op1 })?;
                self.stack.push(Value::Table(table));
            }
            Op::PushArgs => self.push_args(op1, op2)?,

            // ========================================
            // DOM
            // ========================================
            Op::Text => {
                let text = self.string_constant(op1)?;
                self.elements.append_text(&text);
            }
            Op::Comment => {
                let comment = self.string_constant(op1)?;
                self.elements.append_comment(&comment);
            }
            Op::DynamicContent => {
                let value = self.pop_ref()?.value();
                if let Some(content) = value.to_content() {
                    if op1 != 0 {
                        self.elements.append_trusted(&content);
                    } else {
                        self.elements.append_text(&content);
                    }
                }
            }
            Op::OpenElement => {
                let tag = self.string_constant(op1)?;
                self.elements.open_element(&tag);
            }
            Op::FlushElement => self.elements.flush_element()?,
            Op::CloseElement => self.elements.close_element()?,
            Op::StaticAttr => {
                let name = self.string_constant(op1)?;
                let value = self.string_constant(op2)?;
                let namespace = self.namespace(op3)?;
                self.elements
                    .set_attribute(&name, Some(value), namespace.as_deref())?;
            }
            Op::DynamicAttr | Op::ComponentAttr => {
                let name = self.string_constant(op1)?;
                let namespace = self.namespace(op3)?;
                let value = attribute_value(&self.pop_ref()?.value());
                if op == Op::ComponentAttr {
                    self.elements
                        .set_component_attribute(&name, value, namespace.as_deref())?;
                } else {
                    self.elements
                        .set_attribute(&name, value, namespace.as_deref())?;
                }
            }
            Op::Modifier => {
                let handle = self.handle_constant(op1)?;
                let modifier = self
                    .resolver
                    .modifier(handle)
                    .ok_or(RuntimeError::UnknownModifier(handle))?;
                let args = self.pop_args()?;
                let attributes = modifier(&args).map_err(RuntimeError::HelperFailed)?;
                for (name, value) in attributes {
                    self.elements.set_attribute(&name, Some(value), None)?;
                }
            }

            // ========================================
            // Lists
            // ========================================
            Op::PutIterator => self.put_iterator()?,
            Op::EnterList => self.enter_list(start, op1)?,
            Op::ExitList => self.exit_list()?,
            Op::Iterate => self.iterate(start, op1)?,

            // ========================================
            // Components
            // ========================================
            Op::IsComponent => {
                let inner = self.pop_ref()?;
                let tag = inner.tag();
                let is_component = ComputedReference::new(tag, move || {
                    Opaque::Data(Json::Bool(inner.value().is_component()))
                });
                self.stack.push(Value::Ref(is_component));
            }
            Op::CurryComponent => self.curry_component(op1)?,
            Op::PushComponentSpec => {
                let handle = self.handle_constant(op1)?;
                let state = self.component_spec(handle, None)?;
                self.stack.push(Value::Component(state));
            }
            Op::PushDynamicComponentManager => self.push_dynamic_component_manager(op1)?,
            Op::PrepareArgs => {
                let state = self.component_state(op1)?;
                let curried = state.borrow_mut().curried.take();
                if let Some(curried) = curried {
                    let args = self.pop_args()?;
                    self.stack.push(Value::Args(Rc::new(curried.merge(&args))));
                }
            }
            Op::CreateComponent => self.create_component(op1, op2)?,
            Op::RegisterComponentDestructor => {
                let state = self.component_state(op1)?;
                let destructor = {
                    let state = state.borrow();
                    state
                        .instance
                        .as_ref()
                        .and_then(|instance| state.manager.destructor(instance))
                };
                if let Some(destructor) = destructor {
                    self.transactions
                        .last_mut()
                        .ok_or(RuntimeError::NoTransaction)?
                        .push(destructor);
                }
            }
            Op::BeginComponentTransaction => self.transactions.push(Vec::new()),
            Op::CommitComponentTransaction => {
                let transaction = self
                    .transactions
                    .pop()
                    .ok_or(RuntimeError::NoTransaction)?;
                self.destructors.extend(transaction);
            }
            Op::GetComponentSelf => {
                let state = self.component_state(op1)?;
                let state = state.borrow();
                let instance = created(&state)?;
                let this = state.manager.self_ref(instance);
                self.stack.push(Value::Ref(this));
            }
            Op::GetComponentLayout => {
                let state = self.component_state(op1)?;
                let (definition, name) = {
                    let state = state.borrow();
                    (state.definition, state.name.clone())
                };
                let layout = self
                    .options
                    .lookup
                    .layout(definition)
                    .ok_or(RuntimeError::UnknownComponent(name))?;
                let handle = layout.compile(self.program, &self.options)?;
                self.stack.push(Value::Table(layout.symbol_table().clone()));
                self.stack.push(Value::Handle(handle));
            }
            Op::InvokeComponentLayout => self.invoke_component_layout()?,
            Op::DidCreateElement => {
                if let Value::Component(state) = &self.registers[saved_slot(register(op1)?)?] {
                    let state = state.clone();
                    let state = state.borrow();
                    if let Some(instance) = &state.instance {
                        state.manager.did_create_element(instance, &mut self.elements);
                    }
                }
            }
            Op::DidRenderLayout => {
                let state = self.component_state(op1)?;
                let state = state.borrow();
                state.manager.did_render_layout(created(&state)?);
            }
        }
        Ok(ControlFlow::Continue)
    }

    // ========================================
    // Stack
    // ========================================

    fn word(&self, addr: usize) -> Result<u32> {
        self.program
            .heap
            .word(addr)
            .ok_or(RuntimeError::PcOutOfBounds(addr))
    }

    pub(super) fn underflow(&self) -> RuntimeError {
        RuntimeError::StackUnderflow {
            addr: self.current.0,
            op: self.current.1.name(),
        }
    }

    pub(super) fn mismatch(&self, expected: &'static str) -> RuntimeError {
        RuntimeError::TypeMismatch {
            addr: self.current.0,
            op: self.current.1.name(),
            expected,
        }
    }

    pub(super) fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or_else(|| self.underflow())
    }

    pub(super) fn pop_ref(&mut self) -> Result<ReferenceRc> {
        match self.pop()? {
            Value::Ref(reference) => Ok(reference),
            _ => Err(self.mismatch("reference")),
        }
    }

    fn pop_args(&mut self) -> Result<Rc<Arguments>> {
        match self.pop()? {
            Value::Args(args) => Ok(args),
            _ => Err(self.mismatch("arguments")),
        }
    }

    /// Pop a `[table, block]` pair.
    fn pop_block(&mut self) -> Result<ScopeBlock> {
        let block = self.pop()?;
        let table = self.pop()?;
        Ok(ScopeBlock { table, block })
    }

    fn push_bool(&mut self, value: bool) {
        self.stack
            .push(Value::Ref(ConstReference::new(Json::Bool(value))));
    }

    pub(super) fn target(&self, start: usize, offset: u32) -> Result<usize> {
        let offset = relative_offset(offset);
        usize::try_from(start as i64 + offset)
            .ok()
            .filter(|&addr| addr < self.program.heap.words().len())
            .ok_or(RuntimeError::InvalidTarget { addr: start, offset })
    }

    // ========================================
    // Constants
    // ========================================

    fn string_constant(&self, index: u32) -> Result<String> {
        self.program
            .constants
            .get_string(index)
            .map(str::to_string)
            .ok_or(RuntimeError::InvalidConstant { kind: "string", index })
    }

    /// String index 0 is the empty string and means "no namespace".
    fn namespace(&self, index: u32) -> Result<Option<String>> {
        if index == 0 {
            return Ok(None);
        }
        self.string_constant(index).map(Some)
    }

    fn handle_constant(&self, index: u32) -> Result<u32> {
        self.program
            .constants
            .get_handle(index)
            .ok_or(RuntimeError::InvalidConstant { kind: "handle", index })
    }

    fn referer_constant(&self, index: u32) -> Result<String> {
        self.program
            .constants
            .get_serializable(index)
            .map(str::to_string)
            .ok_or(RuntimeError::InvalidConstant { kind: "serializable", index })
    }

    // ========================================
    // Frames and calls
    // ========================================

    fn scope(&self) -> Result<&ScopeRef> {
        self.scopes
            .last()
            .ok_or(RuntimeError::ScopeUnderflow("read scope"))
    }

    fn push_frame(&mut self) {
        self.stack.push(Value::Addr(self.ra));
        self.stack.push(Value::Addr(self.fp));
        self.fp = self.stack.len() - 2;
    }

    fn pop_frame(&mut self) -> Result<()> {
        let (Some(Value::Addr(ra)), Some(Value::Addr(fp))) =
            (self.stack.get(self.fp), self.stack.get(self.fp + 1))
        else {
            return Err(self.mismatch("frame"));
        };
        let (ra, fp) = (*ra, *fp);
        self.stack.truncate(self.fp);
        self.ra = ra;
        self.fp = fp;
        Ok(())
    }

    fn call(&mut self, handle: VMHandle) -> Result<()> {
        let addr = self
            .program
            .heap
            .get_addr(handle)
            .ok_or(RuntimeError::InvalidHandle(handle.0))?;
        self.ra = self.pc;
        self.pc = addr;
        Ok(())
    }

    /// `[args, table, block] -> [ra, fp]`: run the block in its caller's
    /// scope with positional args bound to its parameters. A missing block
    /// only opens the frame and scope that the caller will pop.
    fn invoke_yield(&mut self) -> Result<()> {
        let block = self.pop()?;
        let table = self.pop()?;
        let args = self.pop_args()?;
        let current = self.scope()?.clone();

        let (Some(handle), Value::Table(table)) = (block.as_handle(), &table) else {
            self.push_frame();
            self.scopes.push(current);
            return Ok(());
        };

        let caller = current
            .borrow()
            .caller()
            .ok_or(RuntimeError::NoCallerScope)?;
        let parameters = table.parameters();
        let scope = if parameters.is_empty() {
            caller
        } else {
            let child = caller.borrow().child();
            {
                let mut child = child.borrow_mut();
                for (i, &symbol) in parameters.iter().enumerate() {
                    let value = args
                        .at(i)
                        .cloned()
                        .unwrap_or_else(|| ConstReference::new(Json::Null));
                    child.bind(symbol, ScopeSlot::Value(value));
                }
            }
            child
        };

        self.push_frame();
        self.scopes.push(scope);
        self.call(handle)
    }

    fn push_args(&mut self, names: u32, flags: u32) -> Result<()> {
        let names = self
            .program
            .constants
            .get_string_array(names)
            .ok_or(RuntimeError::InvalidConstant { kind: "string array", index: names })?;
        let positional_count = (flags >> 4) as usize;

        let mut named = Vec::with_capacity(names.len());
        for _ in 0..names.len() {
            named.push(self.pop_ref()?);
        }
        named.reverse();

        let mut positional = Vec::with_capacity(positional_count);
        for _ in 0..positional_count {
            positional.push(self.pop_ref()?);
        }
        positional.reverse();

        let names = names
            .into_iter()
            .map(|name| name.strip_prefix('@').map(str::to_string).unwrap_or(name))
            .collect();
        self.stack.push(Value::Args(Rc::new(Arguments {
            positional,
            names,
            named,
        })));
        Ok(())
    }

    // ========================================
    // Components
    // ========================================

    fn component_state(&self, register_word: u32) -> Result<Rc<RefCell<ComponentState>>> {
        match &self.registers[saved_slot(register(register_word)?)?] {
            Value::Component(state) => Ok(state.clone()),
            _ => Err(self.mismatch("component")),
        }
    }

    fn component_spec(
        &self,
        handle: u32,
        curried: Option<Arguments>,
    ) -> Result<Rc<RefCell<ComponentState>>> {
        let definition = self
            .resolver
            .component(handle)
            .ok_or_else(|| RuntimeError::UnknownComponent(format!("#{}", handle)))?;
        let capabilities = definition.manager.capabilities();
        Ok(Rc::new(RefCell::new(ComponentState {
            definition: handle,
            name: definition.name,
            manager: definition.manager,
            capabilities,
            curried,
            instance: None,
        })))
    }

    /// Resolve a definition name against the referer it was written in.
    fn lookup_component(&self, name: &str, referer: &str) -> Result<u32> {
        self.resolver
            .lookup_component(name, referer)
            .ok_or_else(|| RuntimeError::UnknownComponent(name.to_string()))
    }

    fn push_dynamic_component_manager(&mut self, referer: u32) -> Result<()> {
        let referer = self.referer_constant(referer)?;
        let state = match self.pop_ref()?.value() {
            Opaque::Component(curried) => {
                self.component_spec(curried.definition, Some(curried.args.clone()))?
            }
            Opaque::Data(Json::String(name)) => {
                let handle = self.lookup_component(&name, &referer)?;
                self.component_spec(handle, None)?
            }
            other => {
                let shown = other.to_content().unwrap_or_else(|| "null".to_string());
                return Err(RuntimeError::NotAComponent(shown));
            }
        };
        trace!(component = %state.borrow().name, "dynamic component");
        self.stack.push(Value::Component(state));
        Ok(())
    }

    fn curry_component(&mut self, referer: u32) -> Result<()> {
        let referer = self.referer_constant(referer)?;
        let args = self.pop_args()?;
        let curried = match self.pop_ref()?.value() {
            Opaque::Component(inner) => Some(CurriedDefinition {
                definition: inner.definition,
                args: inner.args.merge(&args),
            }),
            Opaque::Data(Json::String(name)) => Some(CurriedDefinition {
                definition: self.lookup_component(&name, &referer)?,
                args: (*args).clone(),
            }),
            Opaque::Data(Json::Null) => None,
            other => {
                let shown = other.to_content().unwrap_or_default();
                return Err(RuntimeError::NotAComponent(shown));
            }
        };
        let value = curried
            .map(|curried| Opaque::Component(Rc::new(curried)))
            .unwrap_or_else(Opaque::null);
        self.stack.push(Value::Ref(ConstReference::new(value)));
        Ok(())
    }

    fn create_component(&mut self, flags: u32, register_word: u32) -> Result<()> {
        let state = self.component_state(register_word)?;
        let args = if state.borrow().capabilities.create_args {
            match self.stack.last() {
                Some(Value::Args(args)) => Some(args.clone()),
                _ => None,
            }
        } else {
            None
        };

        let mut state = state.borrow_mut();
        let instance = state
            .manager
            .create(&state.name, args, flags & 1 != 0, flags & 2 != 0)
            .map_err(RuntimeError::ManagerFailed)?;
        debug!(component = %state.name, "created");
        state.instance = Some(instance);
        Ok(())
    }

    /// `[blocks * 6, args, self, table, handle] -> [ra, fp]`: bind the
    /// layout's declared symbols in a fresh root scope and call it.
    fn invoke_component_layout(&mut self) -> Result<()> {
        let handle = self
            .pop()?
            .as_handle()
            .ok_or_else(|| self.mismatch("layout handle"))?;
        let table = match self.pop()? {
            Value::Table(table) => table,
            _ => return Err(self.mismatch("symbol table")),
        };
        let this = self.pop_ref()?;
        let args = self.pop_args()?;
        let attrs = self.pop_block()?;
        let inverse = self.pop_block()?;
        let default = self.pop_block()?;

        let symbols = &table
            .as_program()
            .ok_or_else(|| self.mismatch("layout symbol table"))?
            .symbols;
        let scope = Scope::root(symbols.len() + 1, self.scopes.last().cloned());
        {
            let mut scope = scope.borrow_mut();
            scope.bind(0, ScopeSlot::Value(this));
            for (i, symbol) in symbols.iter().enumerate() {
                let slot = match symbol.as_str() {
                    "&default" => ScopeSlot::Block(default.clone()),
                    "&inverse" => ScopeSlot::Block(inverse.clone()),
                    "&attrs" => ScopeSlot::Block(attrs.clone()),
                    name => match name.strip_prefix('@').and_then(|name| args.named(name)) {
                        Some(value) => ScopeSlot::Value(value.clone()),
                        None => continue,
                    },
                };
                scope.bind(i as u32 + 1, slot);
            }
        }

        self.push_frame();
        self.scopes.push(scope);
        self.call(handle)
    }
}

fn register(word: u32) -> Result<Register> {
    Register::from_word(word).ok_or(RuntimeError::InvalidRegister(word))
}

/// Index into the general-purpose register file.
fn saved_slot(register: Register) -> Result<usize> {
    match register {
        Register::S0 => Ok(0),
        Register::S1 => Ok(1),
        Register::T0 => Ok(2),
        Register::T1 => Ok(3),
        other => Err(RuntimeError::InvalidRegister(other as u32)),
    }
}

fn created(state: &ComponentState) -> Result<&ComponentInstance> {
    state
        .instance
        .as_ref()
        .ok_or_else(|| RuntimeError::ManagerFailed(format!("{} was never created", state.name)))
}

/// `false` and null remove the attribute.
fn attribute_value(value: &Opaque) -> Option<String> {
    match value {
        Opaque::Data(Json::Bool(false)) => None,
        other => other.to_content(),
    }
}
