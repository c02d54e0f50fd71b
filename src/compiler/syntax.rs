//! Statement and expression compilation, and the macro table.
//!
//! Block macros (`{{#if}}`, `{{#each}}`, ...) and inline macros
//! (`{{component}}`, `{{partial}}`) expand into control flow built from the
//! builder's primitive emitters. Names with no macro fall back to component
//! lookup.

use std::collections::HashMap;
use std::rc::Rc;

use super::builder::OpcodeBuilder;
use super::component::Invocation;
use super::error::{CompileError, Result};
use super::template::{AttrMode, CompilableTemplate};
use super::wire::{Expression, Hash, Statement};
use crate::vm::{Op, Primitive, Register};

/// A `{{#name ...}}` call site.
pub struct BlockCall<'s> {
    pub name: &'s str,
    pub params: Option<&'s [Expression]>,
    pub hash: Option<&'s Hash>,
    pub template: Option<Rc<CompilableTemplate>>,
    pub inverse: Option<Rc<CompilableTemplate>>,
}

impl BlockCall<'_> {
    fn single_param(&self, expected: &'static str) -> Result<&Expression> {
        match self.params {
            Some([param]) => Ok(param),
            _ => Err(CompileError::MacroArity {
                name: self.name.to_string(),
                expected,
            }),
        }
    }

    fn template(&self) -> Result<&Rc<CompilableTemplate>> {
        self.template.as_ref().ok_or_else(|| CompileError::MacroArity {
            name: self.name.to_string(),
            expected: "a block",
        })
    }
}

/// A `{{name ...}}` call site in append position.
pub struct InlineCall<'s> {
    pub name: &'s str,
    pub params: Option<&'s [Expression]>,
    pub hash: Option<&'s Hash>,
}

pub type BlockMacro = fn(&BlockCall<'_>, &mut OpcodeBuilder<'_>) -> Result<()>;

/// Returns `false` to decline the call and let it compile as an expression.
pub type InlineMacro = fn(&InlineCall<'_>, &mut OpcodeBuilder<'_>) -> Result<bool>;

pub struct Macros {
    blocks: HashMap<&'static str, BlockMacro>,
    inlines: HashMap<&'static str, InlineMacro>,
}

impl Default for Macros {
    fn default() -> Self {
        Self::new()
    }
}

impl Macros {
    pub fn new() -> Self {
        let mut macros = Self {
            blocks: HashMap::new(),
            inlines: HashMap::new(),
        };
        macros.add_block("if", if_block);
        macros.add_block("unless", unless_block);
        macros.add_block("with", with_block);
        macros.add_block("each", each_block);
        macros.add_block("component", component_block);
        macros.add_inline("component", component_inline);
        macros.add_inline("partial", partial_inline);
        macros
    }

    pub fn add_block(&mut self, name: &'static str, f: BlockMacro) {
        self.blocks.insert(name, f);
    }

    pub fn add_inline(&mut self, name: &'static str, f: InlineMacro) {
        self.inlines.insert(name, f);
    }

    pub fn compile_block(&self, call: &BlockCall<'_>, builder: &mut OpcodeBuilder<'_>) -> Result<()> {
        if let Some(f) = self.blocks.get(call.name) {
            return f(call, builder);
        }

        let handle = builder
            .lookup()
            .lookup_component_spec(call.name, builder.referer())
            .ok_or_else(|| CompileError::UnknownBlock(call.name.to_string()))?;
        let invocation = Invocation {
            params: call.params,
            hash: call.hash,
            synthetic: true,
            block: call.template.clone(),
            inverse: call.inverse.clone(),
            ..Default::default()
        };
        builder.component(handle, &invocation)
    }

    pub fn compile_inline(&self, call: &InlineCall<'_>, builder: &mut OpcodeBuilder<'_>) -> Result<bool> {
        if let Some(f) = self.inlines.get(call.name) {
            return f(call, builder);
        }

        match builder.lookup().lookup_component_spec(call.name, builder.referer()) {
            Some(handle) => {
                let invocation = Invocation {
                    params: call.params,
                    hash: call.hash,
                    synthetic: true,
                    ..Default::default()
                };
                builder.component(handle, &invocation)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ========================================
// Statements
// ========================================

pub fn statement(statement: &Statement, builder: &mut OpcodeBuilder<'_>, mode: AttrMode) -> Result<()> {
    match statement {
        Statement::Text(text) => builder.text(text),
        Statement::Comment(comment) => builder.comment(comment),
        Statement::Append { value, trusted } => append(value, *trusted, builder)?,
        Statement::OpenElement { tag } => builder.open_element(tag),
        Statement::FlushElement => builder.flush_element(),
        Statement::CloseElement => builder.close_element(),
        Statement::StaticAttr {
            name,
            value,
            namespace,
        } => builder.static_attr(name, namespace.as_deref(), value, mode),
        Statement::DynamicAttr {
            name,
            value,
            namespace,
            trusting,
        } => {
            builder.expr(value)?;
            builder.dynamic_attr(name, namespace.as_deref(), *trusting, mode);
        }
        Statement::Modifier { name, params, hash } => {
            let handle = builder
                .lookup()
                .lookup_modifier(name, builder.referer())
                .ok_or_else(|| CompileError::UnknownModifier(name.clone()))?;
            builder.compile_args(params.as_deref(), hash.as_ref(), true)?;
            builder.modifier(handle);
        }
        Statement::Block {
            name,
            params,
            hash,
            template,
            inverse,
        } => {
            let call = BlockCall {
                name,
                params: params.as_deref(),
                hash: hash.as_ref(),
                template: builder.optional_block(*template)?,
                inverse: builder.optional_block(*inverse)?,
            };
            builder.macros().compile_block(&call, builder)?;
        }
        Statement::Component {
            tag,
            attrs,
            hash,
            block,
        } => component_statement(tag, attrs, hash.as_ref(), *block, builder)?,
        Statement::Yield { to, params } => builder.yield_(*to, params.as_deref())?,
        Statement::AttrSplat { to } => {
            builder.yield_(*to, None)?;
            builder.push(Op::DidCreateElement, Register::S0 as u32, 0, 0);
        }
    }
    Ok(())
}

fn append(value: &Expression, trusted: bool, builder: &mut OpcodeBuilder<'_>) -> Result<()> {
    let call = match value {
        Expression::Unknown { name } => Some(InlineCall {
            name,
            params: None,
            hash: None,
        }),
        Expression::Helper { name, params, hash } => Some(InlineCall {
            name,
            params: params.as_deref(),
            hash: hash.as_ref(),
        }),
        _ => None,
    };
    if let Some(call) = call {
        if builder.macros().compile_inline(&call, builder)? {
            return Ok(());
        }
    }

    if trusted || value.is_get() {
        builder.guarded_append(value, trusted)
    } else {
        builder.expr(value)?;
        builder.dynamic_content(false);
        Ok(())
    }
}

fn component_statement(
    tag: &str,
    attrs: &[Statement],
    hash: Option<&Hash>,
    block: Option<usize>,
    builder: &mut OpcodeBuilder<'_>,
) -> Result<()> {
    let block = builder.optional_block(block)?;

    match builder.lookup().lookup_component_spec(tag, builder.referer()) {
        Some(handle) => {
            let invocation = Invocation {
                attrs: Some(builder.attrs_block(attrs)),
                hash,
                synthetic: false,
                block,
                ..Default::default()
            };
            builder.component(handle, &invocation)
        }
        None => {
            builder.open_element(tag);
            for attr in attrs {
                statement(attr, builder, AttrMode::Element)?;
            }
            builder.flush_element();
            if let Some(block) = block {
                builder.invoke_static_block(&block, 0)?;
            }
            builder.close_element();
            Ok(())
        }
    }
}

// ========================================
// Expressions
// ========================================

pub fn expr(expression: &Expression, builder: &mut OpcodeBuilder<'_>) -> Result<()> {
    match expression {
        Expression::Value(value) => {
            let primitive = Primitive::try_from(value)?;
            builder.primitive_reference(&primitive);
        }
        Expression::Undefined => builder.primitive_reference(&Primitive::Undefined),
        Expression::Get { head, path } => {
            builder.get_variable(*head);
            for key in path {
                builder.get_property(key);
            }
        }
        Expression::Unknown { name } => {
            match builder.lookup().lookup_helper(name, builder.referer()) {
                Some(handle) => {
                    builder.compile_args(None, None, true)?;
                    builder.helper(handle);
                }
                None => {
                    builder.get_variable(0);
                    builder.get_property(name);
                }
            }
        }
        Expression::Helper { name, params, hash } => {
            if name == "component" {
                let (definition, rest) = params
                    .as_deref()
                    .and_then(|p| p.split_first())
                    .ok_or_else(|| CompileError::MacroArity {
                        name: name.clone(),
                        expected: "a component definition",
                    })?;
                return builder.curry_component(definition, Some(rest), hash.as_ref(), true);
            }
            let handle = builder
                .lookup()
                .lookup_helper(name, builder.referer())
                .ok_or_else(|| CompileError::UnknownHelper(name.clone()))?;
            builder.compile_args(params.as_deref(), hash.as_ref(), true)?;
            builder.helper(handle);
        }
        Expression::Concat(parts) => {
            for part in parts {
                builder.expr(part)?;
            }
            builder.concat(parts.len() as u32);
        }
        Expression::HasBlock(symbol) => builder.has_block(*symbol),
        Expression::HasBlockParams(symbol) => builder.has_block_params(*symbol),
    }
    Ok(())
}

// ========================================
// Block macros
// ========================================

fn conditional(call: &BlockCall<'_>, builder: &mut OpcodeBuilder<'_>, negate: bool) -> Result<()> {
    let condition = call.single_param("exactly one parameter")?;
    let template = call.template()?;

    builder.start_labels();
    builder.push_frame();
    builder.return_to("END")?;

    builder.expr(condition)?;
    builder.to_boolean();

    builder.enter(1);
    if negate {
        builder.jump_if("ELSE")?;
    } else {
        builder.jump_unless("ELSE")?;
    }

    builder.invoke_static_block(template, 0)?;
    else_branch(call.inverse.as_ref(), builder, 0)?;

    builder.label("END")?;
    builder.pop_frame();
    builder.stop_labels()
}

/// Shared tail of the conditional macros: optional inverse, then exit.
fn else_branch(
    inverse: Option<&Rc<CompilableTemplate>>,
    builder: &mut OpcodeBuilder<'_>,
    caller_count: u32,
) -> Result<()> {
    match inverse {
        Some(inverse) => {
            builder.jump("EXIT")?;
            builder.label("ELSE")?;
            builder.invoke_static_block(inverse, caller_count)?;
            builder.label("EXIT")?;
        }
        None => builder.label("ELSE")?,
    }
    builder.exit();
    builder.return_();
    Ok(())
}

fn if_block(call: &BlockCall<'_>, builder: &mut OpcodeBuilder<'_>) -> Result<()> {
    conditional(call, builder, false)
}

fn unless_block(call: &BlockCall<'_>, builder: &mut OpcodeBuilder<'_>) -> Result<()> {
    conditional(call, builder, true)
}

fn with_block(call: &BlockCall<'_>, builder: &mut OpcodeBuilder<'_>) -> Result<()> {
    let value = call.single_param("exactly one parameter")?;
    let template = call.template()?;

    builder.start_labels();
    builder.push_frame();
    builder.return_to("END")?;

    builder.expr(value)?;
    builder.dup(Register::Sp, 0);
    builder.to_boolean();

    builder.enter(2);
    builder.jump_unless("ELSE")?;

    builder.invoke_static_block(template, 1)?;
    else_branch(call.inverse.as_ref(), builder, 0)?;

    builder.label("END")?;
    builder.pop_frame();
    builder.stop_labels()
}

fn each_block(call: &BlockCall<'_>, builder: &mut OpcodeBuilder<'_>) -> Result<()> {
    let list = call.single_param("exactly one parameter")?;
    let template = call.template()?;

    builder.start_labels();
    builder.push_frame();
    builder.return_to("END")?;

    match call.hash.and_then(|h| h.get("key")) {
        Some(key) => builder.expr(key)?,
        None => builder.primitive_reference(&Primitive::Null),
    }
    builder.expr(list)?;

    builder.enter(2);
    builder.put_iterator();
    builder.jump_unless("ELSE")?;

    builder.push_frame();
    builder.return_to("ITER")?;
    builder.dup(Register::Fp, 1);
    builder.enter_list("BODY")?;

    builder.label("ITER")?;
    builder.iterate("BREAK")?;

    builder.label("BODY")?;
    builder.invoke_static_block(template, 2)?;
    builder.pop(2);
    builder.exit();
    builder.return_();

    builder.label("BREAK")?;
    builder.exit_list();
    builder.pop_frame();

    else_branch(call.inverse.as_ref(), builder, 0)?;

    builder.label("END")?;
    builder.pop_frame();
    builder.stop_labels()
}

fn component_block(call: &BlockCall<'_>, builder: &mut OpcodeBuilder<'_>) -> Result<()> {
    let (definition, rest) = call
        .params
        .and_then(|p| p.split_first())
        .ok_or_else(|| CompileError::MacroArity {
            name: call.name.to_string(),
            expected: "a component definition",
        })?;
    let invocation = Invocation {
        params: Some(rest),
        hash: call.hash,
        synthetic: true,
        block: call.template.clone(),
        inverse: call.inverse.clone(),
        ..Default::default()
    };
    if let Some(handle) = static_component_name(definition, builder) {
        return builder.component(handle, &invocation);
    }
    builder.dynamic_component(definition, &invocation)
}

// ========================================
// Inline macros
// ========================================

fn component_inline(call: &InlineCall<'_>, builder: &mut OpcodeBuilder<'_>) -> Result<bool> {
    let (definition, rest) = call
        .params
        .and_then(|p| p.split_first())
        .ok_or_else(|| CompileError::MacroArity {
            name: call.name.to_string(),
            expected: "a component definition",
        })?;
    let invocation = Invocation {
        params: Some(rest),
        hash: call.hash,
        synthetic: true,
        ..Default::default()
    };
    match static_component_name(definition, builder) {
        Some(handle) => builder.component(handle, &invocation)?,
        None => builder.dynamic_component(definition, &invocation)?,
    }
    Ok(true)
}

/// `{{partial "name"}}` with a literal name. The partial runs in a fresh
/// root scope that shares only `self` with the caller.
fn partial_inline(call: &InlineCall<'_>, builder: &mut OpcodeBuilder<'_>) -> Result<bool> {
    let name = match call.params {
        Some([Expression::Value(serde_json::Value::String(name))]) => name,
        _ => {
            return Err(CompileError::MacroArity {
                name: call.name.to_string(),
                expected: "a single string literal",
            })
        }
    };

    let lookup = builder.lookup();
    let partial = lookup
        .lookup_partial(name, builder.referer())
        .and_then(|handle| lookup.partial(handle))
        .ok_or_else(|| CompileError::UnknownPartial(name.clone()))?;
    let symbols = partial
        .symbol_table()
        .as_program()
        .ok_or(CompileError::NotALayout)?
        .symbols
        .len() as u32;

    builder.get_variable(0);
    builder.root_scope(symbols + 1, false);
    builder.set_variable(0);
    builder.push_frame();
    builder.invoke_static(&partial)?;
    builder.pop_frame();
    builder.pop_scope();
    Ok(true)
}

/// A string literal that names a known component.
fn static_component_name(definition: &Expression, builder: &OpcodeBuilder<'_>) -> Option<u32> {
    match definition {
        Expression::Value(serde_json::Value::String(name)) => builder
            .lookup()
            .lookup_component_spec(name, builder.referer()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::builder::CompileOptions;
    use crate::compiler::lookup::{CompileTimeLookup, ComponentCapabilities};
    use crate::compiler::strategy::Strategy;
    use crate::compiler::template::ParsedLayout;
    use crate::compiler::wire::{SerializedInlineBlock, SerializedTemplateBlock};
    use crate::vm::{Op, Program};

    struct Helpers;

    impl CompileTimeLookup for Helpers {
        fn capabilities(&self, _: u32) -> ComponentCapabilities {
            ComponentCapabilities::default()
        }
        fn layout(&self, _: u32) -> Option<Rc<CompilableTemplate>> {
            None
        }
        fn partial(&self, _: u32) -> Option<Rc<CompilableTemplate>> {
            None
        }
        fn lookup_helper(&self, name: &str, _: &str) -> Option<u32> {
            (name == "upper").then_some(7)
        }
        fn lookup_modifier(&self, _: &str, _: &str) -> Option<u32> {
            None
        }
        fn lookup_component_spec(&self, _: &str, _: &str) -> Option<u32> {
            None
        }
        fn lookup_partial(&self, _: &str, _: &str) -> Option<u32> {
            None
        }
    }

    fn compile(statements: Vec<Statement>, blocks: Vec<SerializedInlineBlock>) -> Result<Vec<Op>> {
        let layout = ParsedLayout::new(
            SerializedTemplateBlock {
                statements: statements.clone(),
                symbols: vec!["item".into()],
                has_eval: false,
                blocks,
            },
            "test",
        );
        let mut program = Program::new();
        let options = CompileOptions::new(Rc::new(Helpers), Strategy::Lazy);
        let mut builder = OpcodeBuilder::new(&mut program, &options, layout);
        for s in &statements {
            statement(s, &mut builder, AttrMode::Element)?;
        }
        Ok(builder
            .words()
            .chunks(4)
            .map(|w| Op::from_word(w[0]).unwrap())
            .collect())
    }

    fn block(statements: Vec<Statement>, parameters: Vec<u32>) -> SerializedInlineBlock {
        SerializedInlineBlock {
            statements,
            parameters,
        }
    }

    #[test]
    fn test_each_emits_balanced_list_region() {
        let ops = compile(
            vec![Statement::Block {
                name: "each".into(),
                params: Some(vec![Expression::Get {
                    head: 0,
                    path: vec!["items".into()],
                }]),
                hash: None,
                template: Some(0),
                inverse: None,
            }],
            vec![block(vec![], vec![1])],
        )
        .unwrap();

        let count = |op: Op| ops.iter().filter(|o| **o == op).count();
        assert_eq!(count(Op::EnterList), 1);
        assert_eq!(count(Op::ExitList), 1);
        assert_eq!(count(Op::Iterate), 1);
        assert_eq!(count(Op::PushFrame), count(Op::PopFrame));
        // Each item's scope is closed by the body's exit.
        assert_eq!(count(Op::Enter) + count(Op::Iterate), count(Op::Exit));
    }

    #[test]
    fn test_if_without_block_is_an_error() {
        let result = compile(
            vec![Statement::Block {
                name: "if".into(),
                params: Some(vec![]),
                hash: None,
                template: Some(0),
                inverse: None,
            }],
            vec![block(vec![], vec![])],
        );
        assert!(matches!(result, Err(CompileError::MacroArity { .. })));
    }

    #[test]
    fn test_unknown_block_is_an_error() {
        let result = compile(
            vec![Statement::Block {
                name: "frobnicate".into(),
                params: None,
                hash: None,
                template: None,
                inverse: None,
            }],
            vec![],
        );
        assert_eq!(result, Err(CompileError::UnknownBlock("frobnicate".into())));
    }

    #[test]
    fn test_unknown_name_prefers_helper() {
        let ops = compile(
            vec![Statement::Append {
                value: Expression::Unknown {
                    name: "upper".into(),
                },
                trusted: false,
            }],
            vec![],
        )
        .unwrap();
        assert!(ops.contains(&Op::Helper));
        assert!(!ops.contains(&Op::GetProperty));
    }

    #[test]
    fn test_unknown_name_falls_back_to_self_property() {
        let ops = compile(
            vec![Statement::Append {
                value: Expression::Unknown {
                    name: "title".into(),
                },
                trusted: false,
            }],
            vec![],
        )
        .unwrap();
        assert!(ops.contains(&Op::GetProperty));
        assert!(ops.contains(&Op::IsComponent));
    }

    #[test]
    fn test_literal_append_skips_component_guard() {
        let ops = compile(
            vec![Statement::Append {
                value: Expression::Value(serde_json::json!("hi")),
                trusted: false,
            }],
            vec![],
        )
        .unwrap();
        assert_eq!(
            ops,
            vec![Op::Primitive, Op::PrimitiveReference, Op::DynamicContent]
        );
    }

    #[test]
    fn test_invalid_primitive_is_an_error() {
        let result = compile(
            vec![Statement::Append {
                value: Expression::Value(serde_json::json!([1, 2])),
                trusted: false,
            }],
            vec![],
        );
        assert!(matches!(result, Err(CompileError::InvalidPrimitive(_))));
    }

    #[test]
    fn test_unknown_helper_and_modifier() {
        let helper = compile(
            vec![Statement::Append {
                value: Expression::Helper {
                    name: "nope".into(),
                    params: None,
                    hash: None,
                },
                trusted: false,
            }],
            vec![],
        );
        assert_eq!(helper, Err(CompileError::UnknownHelper("nope".into())));

        let modifier = compile(
            vec![Statement::Modifier {
                name: "on".into(),
                params: None,
                hash: None,
            }],
            vec![],
        );
        assert_eq!(modifier, Err(CompileError::UnknownModifier("on".into())));
    }

    #[test]
    fn test_unresolved_tag_is_a_plain_element() {
        let ops = compile(
            vec![Statement::Component {
                tag: "section".into(),
                attrs: vec![Statement::StaticAttr {
                    name: "id".into(),
                    value: "main".into(),
                    namespace: None,
                }],
                hash: None,
                block: None,
            }],
            vec![],
        )
        .unwrap();
        assert_eq!(
            ops,
            vec![
                Op::OpenElement,
                Op::StaticAttr,
                Op::FlushElement,
                Op::CloseElement
            ]
        );
    }
}
