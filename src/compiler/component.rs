//! Component invocation emission: the calling convention shared by every
//! component manager, its static specialization, and the runtime-typed
//! append and dynamic component paths.

use std::rc::Rc;

use tracing::trace;

use super::builder::OpcodeBuilder;
use super::error::{CompileError, Result};
use super::lookup::ComponentCapabilities;
use super::template::CompilableTemplate;
use super::wire::{Expression, Hash};
use crate::vm::{Op, Register};

const DEFAULT_BLOCK: &str = "&default";
const INVERSE_BLOCK: &str = "&inverse";
const ATTRS_BLOCK: &str = "&attrs";

/// Arguments and blocks passed to a component at one call site.
#[derive(Debug, Default, Clone)]
pub struct Invocation<'s> {
    pub attrs: Option<Rc<CompilableTemplate>>,
    pub params: Option<&'s [Expression]>,
    pub hash: Option<&'s Hash>,
    /// Curly invocation: hash names carry no `@` sigil.
    pub synthetic: bool,
    pub block: Option<Rc<CompilableTemplate>>,
    pub inverse: Option<Rc<CompilableTemplate>>,
}

impl Invocation<'_> {
    fn has_blocks(&self) -> bool {
        self.block.is_some() || self.inverse.is_some() || self.attrs.is_some()
    }

    fn block_flags(&self) -> u32 {
        (self.block.is_some() as u32) | ((self.inverse.is_some() as u32) << 1)
    }
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    symbol: u32,
    is_block: bool,
}

impl OpcodeBuilder<'_> {
    pub fn push_component_spec(&mut self, handle: u32) {
        let index = self.constants_mut().handle(handle);
        self.push(Op::PushComponentSpec, index, 0, 0);
    }

    pub fn push_dynamic_component_manager(&mut self) {
        let referer = self.referer().to_string();
        let index = self.constants_mut().serializable(&referer);
        self.push(Op::PushDynamicComponentManager, index, 0, 0);
    }

    /// Invoke the statically known component `handle`, leaving the stack as
    /// it was.
    pub fn component(&mut self, handle: u32, invocation: &Invocation<'_>) -> Result<()> {
        let capabilities = self.lookup().capabilities(handle);
        let layout = if capabilities.dynamic_layout {
            None
        } else {
            self.lookup().layout(handle)
        };

        self.push_component_spec(handle);
        match layout {
            Some(layout) => self.invoke_static_component(capabilities, &layout, invocation)?,
            None => self.invoke_component(invocation, None)?,
        }
        self.pop(1);
        Ok(())
    }

    /// The generic calling convention. Expects the component definition on
    /// top of the stack and leaves it there.
    pub fn invoke_component(
        &mut self,
        invocation: &Invocation<'_>,
        layout: Option<&Rc<CompilableTemplate>>,
    ) -> Result<()> {
        self.fetch(Register::S0);
        self.dup(Register::Sp, 1);
        self.load(Register::S0);

        self.push_yieldable_block(invocation.block.as_ref())?;
        self.push_yieldable_block(invocation.inverse.as_ref())?;
        self.push_yieldable_block(invocation.attrs.as_ref())?;

        self.compile_args(invocation.params, invocation.hash, invocation.synthetic)?;
        self.push(Op::PrepareArgs, Register::S0 as u32, 0, 0);

        self.push(Op::BeginComponentTransaction, 0, 0, 0);
        self.push_dynamic_scope();
        self.push(Op::CreateComponent, invocation.block_flags(), Register::S0 as u32, 0);
        self.push(Op::RegisterComponentDestructor, Register::S0 as u32, 0, 0);
        self.push(Op::GetComponentSelf, Register::S0 as u32, 0, 0);

        match layout {
            Some(layout) => {
                self.push_symbol_table(Some(layout.symbol_table()));
                self.push_layout(Some(layout))?;
                self.resolve_layout();
            }
            None => self.push(Op::GetComponentLayout, Register::S0 as u32, 0, 0),
        }

        self.push(Op::InvokeComponentLayout, Register::S0 as u32, 0, 0);
        self.push(Op::DidRenderLayout, Register::S0 as u32, 0, 0);

        self.pop_frame();
        self.pop_scope();
        self.pop_dynamic_scope();
        self.push(Op::CommitComponentTransaction, 0, 0, 0);

        self.load(Register::S0);
        Ok(())
    }

    /// Specialized invocation that binds exactly the symbols `layout`
    /// declares. Falls back to [`OpcodeBuilder::invoke_component`] when the
    /// layout can evaluate names at runtime or the manager rewrites its
    /// arguments.
    pub fn invoke_static_component(
        &mut self,
        capabilities: ComponentCapabilities,
        layout: &Rc<CompilableTemplate>,
        invocation: &Invocation<'_>,
    ) -> Result<()> {
        let table = layout
            .symbol_table()
            .as_program()
            .ok_or(CompileError::NotALayout)?
            .clone();

        if table.has_eval || capabilities.prepare_args {
            trace!(referer = %table.referer, "static component bails out to dynamic path");
            return self.invoke_component(invocation, Some(layout));
        }

        self.fetch(Register::S0);
        self.dup(Register::Sp, 1);
        self.load(Register::S0);

        if capabilities.create_args {
            self.push_frame();
            self.compile_args(invocation.params, invocation.hash, invocation.synthetic)?;
        }

        self.push(Op::BeginComponentTransaction, 0, 0, 0);
        self.push_dynamic_scope();
        self.push(Op::CreateComponent, invocation.block_flags(), Register::S0 as u32, 0);

        if capabilities.create_args {
            self.pop_frame();
        }

        self.push(Op::RegisterComponentDestructor, Register::S0 as u32, 0, 0);

        let mut bindings = vec![Binding {
            symbol: 0,
            is_block: false,
        }];
        self.push(Op::GetComponentSelf, Register::S0 as u32, 0, 0);

        for (i, symbol) in table.symbols.iter().enumerate() {
            let slot = i as u32 + 1;
            if symbol.starts_with('&') {
                let caller_block = match symbol.as_str() {
                    DEFAULT_BLOCK => invocation.block.as_ref(),
                    INVERSE_BLOCK => invocation.inverse.as_ref(),
                    ATTRS_BLOCK => invocation.attrs.as_ref(),
                    other => return Err(CompileError::UnreachableSymbol(other.to_string())),
                };
                self.push_yieldable_block(caller_block)?;
                bindings.push(Binding {
                    symbol: slot,
                    is_block: true,
                });
            } else if let Some(name) = symbol.strip_prefix('@') {
                let Some(hash) = invocation.hash else {
                    continue;
                };
                let lookup = if invocation.synthetic { name } else { symbol.as_str() };
                if let Some(value) = hash.get(lookup) {
                    self.expr(value)?;
                    bindings.push(Binding {
                        symbol: slot,
                        is_block: false,
                    });
                }
            }
        }

        self.root_scope(table.symbols.len() as u32 + 1, invocation.has_blocks());

        // SetBlock/SetVariable consume in stack order, so the last pushed
        // binding is written first.
        for binding in bindings.iter().rev() {
            if binding.is_block {
                self.set_block(binding.symbol);
            } else {
                self.set_variable(binding.symbol);
            }
        }

        self.push_frame();
        self.invoke_static(layout)?;
        self.push(Op::DidRenderLayout, Register::S0 as u32, 0, 0);
        self.pop_frame();
        self.pop_scope();
        self.pop_dynamic_scope();
        self.push(Op::CommitComponentTransaction, 0, 0, 0);

        self.load(Register::S0);
        Ok(())
    }

    /// Append a value that may turn out to be a curried component.
    pub fn guarded_append(&mut self, expression: &Expression, trusting: bool) -> Result<()> {
        self.start_labels();
        self.push_frame();
        self.return_to("END")?;

        self.expr(expression)?;
        self.dup(Register::Sp, 0);
        self.push(Op::IsComponent, 0, 0, 0);

        self.enter(2);
        self.jump_unless("ELSE")?;

        self.push_dynamic_component_manager();
        self.invoke_component(&Invocation::default(), None)?;

        self.exit();
        self.return_();

        self.label("ELSE")?;
        self.dynamic_content(trusting);

        self.exit();
        self.return_();

        self.label("END")?;
        self.pop_frame();
        self.stop_labels()
    }

    /// `{{#component definition ...}}`: invoke whatever `definition`
    /// evaluates to; renders nothing when it is empty.
    pub fn dynamic_component(
        &mut self,
        definition: &Expression,
        invocation: &Invocation<'_>,
    ) -> Result<()> {
        self.start_labels();
        self.push_frame();
        self.return_to("END")?;

        self.expr(definition)?;
        self.dup(Register::Sp, 0);

        self.enter(2);
        self.jump_unless("ELSE")?;

        self.push_dynamic_component_manager();
        self.invoke_component(invocation, None)?;

        self.label("ELSE")?;
        self.exit();
        self.return_();

        self.label("END")?;
        self.pop_frame();
        self.stop_labels()
    }

    /// `(component definition ...)`: capture a definition with arguments as
    /// a value.
    pub fn curry_component(
        &mut self,
        definition: &Expression,
        params: Option<&[Expression]>,
        hash: Option<&Hash>,
        synthetic: bool,
    ) -> Result<()> {
        self.expr(definition)?;
        self.compile_args(params, hash, synthetic)?;
        let referer = self.referer().to_string();
        let index = self.constants_mut().serializable(&referer);
        self.push(Op::CurryComponent, index, 0, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::builder::CompileOptions;
    use crate::compiler::lookup::CompileTimeLookup;
    use crate::compiler::strategy::Strategy;
    use crate::compiler::template::ParsedLayout;
    use crate::compiler::wire::{SerializedTemplateBlock, Statement};
    use crate::vm::Program;

    struct OneComponent {
        layout: Rc<CompilableTemplate>,
        capabilities: ComponentCapabilities,
    }

    impl CompileTimeLookup for OneComponent {
        fn capabilities(&self, _: u32) -> ComponentCapabilities {
            self.capabilities
        }
        fn layout(&self, _: u32) -> Option<Rc<CompilableTemplate>> {
            Some(self.layout.clone())
        }
        fn partial(&self, _: u32) -> Option<Rc<CompilableTemplate>> {
            None
        }
        fn lookup_helper(&self, _: &str, _: &str) -> Option<u32> {
            None
        }
        fn lookup_modifier(&self, _: &str, _: &str) -> Option<u32> {
            None
        }
        fn lookup_component_spec(&self, name: &str, _: &str) -> Option<u32> {
            (name == "Card").then_some(0)
        }
        fn lookup_partial(&self, _: &str, _: &str) -> Option<u32> {
            None
        }
    }

    fn layout_with(symbols: &[&str], has_eval: bool) -> Rc<CompilableTemplate> {
        CompilableTemplate::program(ParsedLayout::new(
            SerializedTemplateBlock {
                statements: vec![Statement::Text("card".into())],
                symbols: symbols.iter().map(|s| s.to_string()).collect(),
                has_eval,
                blocks: vec![],
            },
            "card",
        ))
    }

    fn caller() -> Rc<ParsedLayout> {
        ParsedLayout::new(
            SerializedTemplateBlock {
                statements: vec![],
                symbols: vec![],
                has_eval: false,
                blocks: vec![],
            },
            "app",
        )
    }

    fn ops(words: &[u32]) -> Vec<Op> {
        words
            .chunks(4)
            .map(|w| Op::from_word(w[0]).unwrap())
            .collect()
    }

    fn compile_component(
        lookup: OneComponent,
        hash: &Hash,
    ) -> (Vec<u32>, Program) {
        let mut program = Program::new();
        let options = CompileOptions::new(Rc::new(lookup), Strategy::Lazy);
        let mut builder = OpcodeBuilder::new(&mut program, &options, caller());
        let invocation = Invocation {
            hash: Some(hash),
            ..Default::default()
        };
        builder.component(0, &invocation).unwrap();
        let words = builder.words().to_vec();
        (words, program)
    }

    fn title_hash() -> Hash {
        Hash(
            vec!["@title".into(), "@unused".into()],
            vec![
                Expression::Value(serde_json::json!("hello")),
                Expression::Value(serde_json::json!(1)),
            ],
        )
    }

    #[test]
    fn test_static_path_binds_only_declared_symbols() {
        let lookup = OneComponent {
            layout: layout_with(&["@title", "&default"], false),
            capabilities: ComponentCapabilities::default(),
        };
        let (words, _) = compile_component(lookup, &title_hash());
        let ops = ops(&words);

        assert!(!ops.contains(&Op::PushArgs));
        assert!(!ops.contains(&Op::InvokeComponentLayout));
        // Only `@title` is evaluated: one primitive reference.
        assert_eq!(ops.iter().filter(|op| **op == Op::PrimitiveReference).count(), 1);

        let root = ops.iter().position(|op| *op == Op::RootScope).unwrap();
        assert_eq!(
            &ops[root + 1..root + 4],
            &[Op::SetBlock, Op::SetVariable, Op::SetVariable]
        );
        // Reverse order: &default (slot 2), @title (slot 1), self (slot 0).
        let at = (root + 1) * 4;
        assert_eq!(words[at + 1], 2);
        assert_eq!(words[at + 5], 1);
        assert_eq!(words[at + 9], 0);
        assert_eq!(words[root * 4 + 1], 3);

        assert_eq!(ops.first(), Some(&Op::PushComponentSpec));
        assert_eq!(ops.last(), Some(&Op::Pop));
    }

    #[test]
    fn test_eval_layout_uses_dynamic_path() {
        let lookup = OneComponent {
            layout: layout_with(&["@title"], true),
            capabilities: ComponentCapabilities::default(),
        };
        let (words, _) = compile_component(lookup, &title_hash());
        let ops = ops(&words);
        assert!(ops.contains(&Op::PushArgs));
        assert!(ops.contains(&Op::PrepareArgs));
        assert!(ops.contains(&Op::InvokeComponentLayout));
    }

    #[test]
    fn test_prepare_args_capability_uses_dynamic_path() {
        let lookup = OneComponent {
            layout: layout_with(&["@title"], false),
            capabilities: ComponentCapabilities {
                prepare_args: true,
                ..Default::default()
            },
        };
        let (words, _) = compile_component(lookup, &title_hash());
        assert!(ops(&words).contains(&Op::InvokeComponentLayout));
    }

    #[test]
    fn test_unknown_block_sigil_is_unreachable() {
        let lookup = OneComponent {
            layout: layout_with(&["&else"], false),
            capabilities: ComponentCapabilities::default(),
        };
        let mut program = Program::new();
        let options = CompileOptions::new(Rc::new(lookup), Strategy::Lazy);
        let mut builder = OpcodeBuilder::new(&mut program, &options, caller());
        assert_eq!(
            builder.component(0, &Invocation::default()),
            Err(CompileError::UnreachableSymbol("&else".into()))
        );
    }

    #[test]
    fn test_dynamic_path_protocol_order() {
        let lookup = OneComponent {
            layout: layout_with(&["@title"], true),
            capabilities: ComponentCapabilities::default(),
        };
        let (words, _) = compile_component(lookup, &title_hash());
        let ops = ops(&words);
        let order = [
            Op::PrepareArgs,
            Op::BeginComponentTransaction,
            Op::PushDynamicScope,
            Op::CreateComponent,
            Op::RegisterComponentDestructor,
            Op::GetComponentSelf,
            Op::InvokeComponentLayout,
            Op::DidRenderLayout,
            Op::PopFrame,
            Op::PopScope,
            Op::PopDynamicScope,
            Op::CommitComponentTransaction,
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|op| ops.iter().position(|o| o == op).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }
}
