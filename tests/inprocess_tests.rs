//! In-process integration tests.
//!
//! These call the library API directly: bundles from tests/fixtures/ are
//! compiled and rendered without spawning the binary.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use serde_json::{Value as Json, json};

use stencil::compiler::wire::SerializedTemplateBlock;
use stencil::compiler::{
    CompilableTemplate, CompileOptions, CompiledBundle, ComponentCapabilities, ParsedLayout,
    Strategy, compile_bundle, format_program, render_bundle,
};
use stencil::config::{CompilerConfig, RuntimeConfig, StencilConfig};
use stencil::registry::{Bundle, ManagerKind, Registry};
use stencil::vm::bytecode::{self, BytecodeError};
use stencil::vm::{
    Arguments, ComponentInstance, ComponentManager, ConstReference, Destructor, Opaque, Program,
    Reference, ReferenceRc, RenderResult, RootReference, RuntimeError, VM, Verifier,
};

fn fixture(name: &str) -> Bundle {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    Bundle::load(&path).unwrap()
}

fn data(name: &str) -> Json {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn config(strategy: Strategy) -> StencilConfig {
    StencilConfig {
        compiler: CompilerConfig {
            strategy,
            verify: true,
        },
        ..Default::default()
    }
}

fn render(bundle: &Bundle, input: Json, strategy: Strategy) -> Result<String, String> {
    render_bundle(bundle, input, &config(strategy))
}

/// Render with both strategies and check they agree.
fn render_both(bundle: &Bundle, input: Json) -> String {
    let lazy = render(bundle, input.clone(), Strategy::Lazy).unwrap();
    let eager = render(bundle, input, Strategy::Eager).unwrap();
    assert_eq!(lazy, eager, "lazy and eager output differ");
    lazy
}

fn block(json: Json) -> SerializedTemplateBlock {
    serde_json::from_value(json).unwrap()
}

// ============================================================================
// Rendering
// ============================================================================

#[test]
fn test_greeting() {
    let html = render_both(&fixture("greeting.json"), data("greeting_data.json"));
    assert_eq!(html, r#"<p class="greeting">Hello, World!</p>"#);
}

#[test]
fn test_text_is_escaped() {
    let html = render_both(&fixture("greeting.json"), json!({ "name": "<b>&</b>" }));
    assert_eq!(
        html,
        r#"<p class="greeting">Hello, &lt;b&gt;&amp;&lt;/b&gt;!</p>"#
    );
}

#[test]
fn test_each_with_items() {
    let html = render_both(&fixture("list.json"), data("list_data.json"));
    assert_eq!(html, "<ul><li>0: a</li><li>1: b</li></ul>");
}

#[test]
fn test_each_with_one_item() {
    let html = render_both(&fixture("list.json"), json!({ "items": ["only"] }));
    assert_eq!(html, "<ul><li>0: only</li></ul>");
}

#[test]
fn test_each_empty_renders_inverse() {
    let bundle = fixture("list.json");
    assert_eq!(render_both(&bundle, json!({ "items": [] })), "<ul>empty</ul>");
    assert_eq!(render_both(&bundle, json!({})), "<ul>empty</ul>");
}

#[test]
fn test_static_component_with_attrs_and_block_params() {
    let html = render_both(&fixture("components.json"), data("components_data.json"));
    assert_eq!(
        html,
        r#"<div class="card highlighted"><h2>Hello</h2>status: ok</div><span>new</span>"#
    );
}

#[test]
fn test_dynamic_path_matches_static_path() {
    let bundle = fixture("components.json");
    let static_html = render_both(&bundle, data("components_data.json"));

    let mut eval = bundle.clone();
    for component in eval.components.values_mut() {
        component.layout.has_eval = true;
    }
    let dynamic_html = render_both(&eval, data("components_data.json"));
    assert_eq!(static_html, dynamic_html);

    // The dynamic path really is taken.
    let compiled = compile_bundle(&eval, &CompilerConfig::default()).unwrap();
    let listing = format_program(&compiled.program);
    assert!(listing.contains("InvokeComponentLayout"));
}

#[test]
fn test_helpers_modifiers_conditionals_and_partials() {
    let bundle = fixture("helpers.json");
    let html = render_both(&bundle, data("helpers_data.json"));
    assert_eq!(
        html,
        r#"<section data-id="7">STENCIL vm | html [admin] (c) 2024</section>"#
    );

    let mut guest = data("helpers_data.json");
    guest["admin"] = json!(false);
    let html = render_both(&bundle, guest);
    assert!(html.contains(" [guest]"));
    assert!(!html.contains("[admin]"));
}

#[test]
fn test_curried_component() {
    let mut bundle = fixture("components.json");
    // {{component (component "Badge" label="curried")}}
    bundle.template = block(json!({
        "statements": [{
            "Append": { "value": { "Helper": {
                "name": "component",
                "params": [{ "Helper": {
                    "name": "component",
                    "params": [{ "Value": "Badge" }],
                    "hash": [["label"], [{ "Value": "curried" }]]
                }}]
            }}}
        }]
    }));
    assert_eq!(render_both(&bundle, json!({})), "<span>curried</span>");
}

#[test]
fn test_dynamic_component_from_data() {
    let mut bundle = fixture("components.json");
    // {{#component this.which label="from data"}}{{/component}}
    bundle.template = block(json!({
        "statements": [{
            "Block": {
                "name": "component",
                "params": [{ "Get": { "head": 0, "path": ["which"] } }],
                "hash": [["label"], [{ "Value": "from data" }]]
            }
        }]
    }));
    assert_eq!(
        render_both(&bundle, json!({ "which": "Badge" })),
        "<span>from data</span>"
    );
    // Nothing to invoke renders nothing.
    assert_eq!(render_both(&bundle, json!({})), "");

    let err = render(&bundle, json!({ "which": "Nope" }), Strategy::Lazy).unwrap_err();
    assert!(err.contains("unknown component `Nope`"), "{}", err);
}

#[test]
fn test_with_binds_value() {
    let mut bundle = fixture("greeting.json");
    bundle.template = block(json!({
        "symbols": ["user"],
        "statements": [{
            "Block": {
                "name": "with",
                "params": [{ "Get": { "head": 0, "path": ["user"] } }],
                "template": 0,
                "inverse": 1
            }
        }],
        "blocks": [
            { "parameters": [1], "statements": [
                { "Append": { "value": { "Get": { "head": 1, "path": ["name"] } } } }
            ]},
            { "statements": [{ "Text": "anonymous" }] }
        ]
    }));
    assert_eq!(render_both(&bundle, json!({ "user": { "name": "ada" } })), "ada");
    assert_eq!(render_both(&bundle, json!({})), "anonymous");
}

#[test]
fn test_unknown_helper_is_a_compile_error() {
    let err = render(&fixture("unknown_helper.json"), json!({}), Strategy::Lazy).unwrap_err();
    assert!(err.contains("unknown helper `missing`"), "{}", err);
}

#[test]
fn test_stack_limit() {
    let mut config = config(Strategy::Lazy);
    config.runtime.max_stack = 1;
    let err = render_bundle(&fixture("greeting.json"), json!({ "name": "x" }), &config)
        .unwrap_err();
    assert!(err.contains("stack overflow"), "{}", err);
}

// ============================================================================
// Programs
// ============================================================================

#[test]
fn test_every_fixture_verifies() {
    for name in ["greeting.json", "list.json", "components.json", "helpers.json"] {
        for strategy in [Strategy::Lazy, Strategy::Eager] {
            let compiled = compile_bundle(
                &fixture(name),
                &CompilerConfig {
                    strategy,
                    verify: false,
                },
            )
            .unwrap();
            let count = Verifier::new().verify_all(&compiled.program).unwrap();
            assert!(count > 0, "{} ({})", name, strategy);
        }
    }
}

#[test]
fn test_eager_program_roundtrip() {
    let bundle = fixture("components.json");
    let compiled = compile_bundle(
        &bundle,
        &CompilerConfig {
            strategy: Strategy::Eager,
            verify: true,
        },
    )
    .unwrap();

    let bytes = bytecode::serialize(&compiled.program).unwrap();
    let mut restored = bytecode::deserialize(&bytes).unwrap();
    assert_eq!(format_program(&restored), format_program(&compiled.program));

    // The restored program renders the same as a fresh compile.
    let this: ReferenceRc = RootReference::new(data("components_data.json"));
    let vm = VM::new(
        &mut restored,
        compiled.options.clone(),
        compiled.registry.clone(),
        &RuntimeConfig::default(),
    );
    let html = vm.render(compiled.entry, this).unwrap().destroy();
    assert_eq!(
        html,
        render_both(&bundle, data("components_data.json"))
    );
}

#[test]
fn test_lazy_program_cannot_be_serialized() {
    let compiled = compile_bundle(&fixture("list.json"), &CompilerConfig::default()).unwrap();
    assert!(matches!(
        bytecode::serialize(&compiled.program),
        Err(BytecodeError::LazyConstant(_))
    ));
}

#[test]
fn test_lazy_blocks_compile_on_first_use() {
    let CompiledBundle {
        mut program,
        entry,
        options,
        registry,
    } = compile_bundle(&fixture("list.json"), &CompilerConfig::default()).unwrap();
    assert_eq!(program.heap.handles().count(), 1);

    let this: ReferenceRc = RootReference::new(data("list_data.json"));
    let vm = VM::new(&mut program, options, registry, &RuntimeConfig::default());
    vm.render(entry, this).unwrap();
    // The item block is compiled once and reused for every item; the
    // inverse is never reached.
    assert_eq!(program.heap.handles().count(), 2);
}

// ============================================================================
// Component destructors
// ============================================================================

/// Records the name of every destroyed instance.
struct Recording {
    log: Rc<RefCell<Vec<String>>>,
}

impl ComponentManager for Recording {
    fn capabilities(&self) -> ComponentCapabilities {
        ComponentCapabilities::default()
    }

    fn self_ref(&self, _instance: &ComponentInstance) -> ReferenceRc {
        ConstReference::new(Json::Null)
    }

    fn destructor(&self, instance: &ComponentInstance) -> Option<Destructor> {
        let log = self.log.clone();
        let name = instance.name.clone();
        Some(Box::new(move || log.borrow_mut().push(name)))
    }
}

fn recording_registry(log: &Rc<RefCell<Vec<String>>>) -> Rc<Registry> {
    let mut registry = Registry::new();
    let manager = Rc::new(Recording { log: log.clone() });
    registry.register_component_with_manager(
        "First",
        block(json!({ "statements": [{ "Text": "1" }] })),
        manager.clone(),
    );
    registry.register_component_with_manager(
        "Second",
        block(json!({ "statements": [
            { "Append": { "value": { "Helper": { "name": "boom", "params": [{ "Get": { "head": 0 } }] } } } }
        ]})),
        manager,
    );
    registry.register_helper(
        "boom",
        Rc::new(|args: &Arguments| match args.at(0).map(|r| r.value()) {
            Some(Opaque::Data(Json::Null)) | None => Ok(Opaque::Data(Json::from("2"))),
            Some(_) => Err("boom".to_string()),
        }),
    );
    Rc::new(registry)
}

fn render_with(
    registry: Rc<Registry>,
    template: Json,
) -> Result<RenderResult, RuntimeError> {
    let options = CompileOptions::new(registry.clone(), Strategy::Lazy);
    let entry = CompilableTemplate::program(ParsedLayout::new(block(template), "main"));
    let mut program = Program::new();
    let handle = entry.compile(&mut program, &options).unwrap();
    let this: ReferenceRc = RootReference::new(json!({}));
    VM::new(&mut program, options, registry, &RuntimeConfig::default()).render(handle, this)
}

fn two_components() -> Json {
    json!({ "statements": [
        { "Component": { "tag": "First" } },
        { "Component": { "tag": "Second" } }
    ]})
}

#[test]
fn test_destructors_run_in_reverse_on_destroy() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let result = render_with(recording_registry(&log), two_components()).unwrap();
    assert_eq!(result.html(), "12");
    assert_eq!(result.destructor_count(), 2);
    assert!(log.borrow().is_empty());

    assert_eq!(result.destroy(), "12");
    assert_eq!(*log.borrow(), vec!["Second", "First"]);
}

#[test]
fn test_destructors_run_when_render_fails() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let registry = recording_registry(&log);

    // `Second` passes its self (template-only: null) to `boom`; a non-null
    // argument makes it fail. Call the helper directly with a value instead.
    let failing = json!({ "statements": [
        { "Component": { "tag": "First" } },
        { "Component": { "tag": "Second" } },
        { "Append": { "value": { "Helper": { "name": "boom", "params": [{ "Value": 1 }] } } } }
    ]});
    let err = render_with(registry, failing).unwrap_err();
    assert_eq!(err, RuntimeError::HelperFailed("boom".into()));
    // Both components had committed; destroyed newest first.
    assert_eq!(*log.borrow(), vec!["Second", "First"]);
}

#[test]
fn test_open_transaction_is_unwound_first() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut registry = Registry::new();
    let manager = Rc::new(Recording { log: log.clone() });
    registry.register_component_with_manager(
        "First",
        block(json!({ "statements": [{ "Text": "1" }] })),
        manager.clone(),
    );
    registry.register_component_with_manager(
        "Failing",
        block(json!({ "statements": [
            { "Append": { "value": { "Helper": { "name": "fail" } } } }
        ]})),
        manager,
    );
    registry.register_helper(
        "fail",
        Rc::new(|_: &Arguments| Err::<Opaque, String>("layout failed".to_string())),
    );

    let template = json!({ "statements": [
        { "Component": { "tag": "First" } },
        { "Component": { "tag": "Failing" } }
    ]});
    let err = render_with(Rc::new(registry), template).unwrap_err();
    assert_eq!(err, RuntimeError::HelperFailed("layout failed".into()));
    assert_eq!(*log.borrow(), vec!["Failing", "First"]);
}

#[test]
fn test_registry_from_bundle_rejects_unknown_builtins() {
    let mut bundle = fixture("greeting.json");
    bundle.helpers.push("frobnicate".into());
    assert!(Registry::from_bundle(&bundle).is_err());

    let mut registry = Registry::new();
    let handle = registry.register_component(
        "Plain",
        block(json!({ "statements": [] })),
        ManagerKind::TemplateOnly,
    );
    assert_eq!(handle, 0);
}

// ============================================================================
// Component invocation paths
// ============================================================================

/// A layout that reports which blocks it received and echoes its title.
fn panel_layout(has_eval: bool) -> Json {
    json!({
        "symbols": ["@title", "&default", "&inverse", "&attrs"],
        "has_eval": has_eval,
        "statements": [
            { "OpenElement": { "tag": "div" } },
            { "AttrSplat": { "to": 4 } },
            "FlushElement",
            { "Append": { "value": { "HasBlock": 2 } } },
            { "Text": "|" },
            { "Append": { "value": { "HasBlock": 3 } } },
            { "Text": "|" },
            { "Yield": { "to": 2 } },
            { "Text": "|" },
            { "Yield": { "to": 3 } },
            { "Text": "|" },
            { "Append": { "value": { "Get": { "head": 1 } } } },
            { "Text": "|" },
            { "Append": { "value": { "Get": { "head": 0, "path": ["title"] } } } },
            "CloseElement"
        ]
    })
}

fn panel_bundle(manager: &str, has_eval: bool, template: Json) -> Bundle {
    serde_json::from_value(json!({
        "template": template,
        "components": {
            "Panel": { "manager": manager, "layout": panel_layout(has_eval) }
        }
    }))
    .unwrap()
}

fn invocation_shapes() -> Vec<(&'static str, Json)> {
    let blocks = json!([
        { "statements": [{ "Text": "B" }] },
        { "statements": [{ "Text": "I" }] }
    ]);
    vec![
        (
            "attrs, block and argument",
            json!({
                "statements": [{ "Component": {
                    "tag": "Panel",
                    "attrs": [{ "StaticAttr": { "name": "class", "value": "x" } }],
                    "hash": [["@title"], [{ "Value": "T" }]],
                    "block": 0
                }}],
                "blocks": blocks.clone()
            }),
        ),
        (
            "bare angle invocation",
            json!({ "statements": [{ "Component": { "tag": "Panel" } }] }),
        ),
        (
            "block, inverse and argument",
            json!({
                "statements": [{ "Block": {
                    "name": "Panel",
                    "hash": [["title"], [{ "Value": "T" }]],
                    "template": 0,
                    "inverse": 1
                }}],
                "blocks": blocks.clone()
            }),
        ),
        (
            "block without argument",
            json!({
                "statements": [{ "Block": { "name": "Panel", "template": 0 } }],
                "blocks": blocks
            }),
        ),
        (
            "inline without block or argument",
            json!({ "statements": [{ "Append": { "value": { "Helper": { "name": "Panel" } } } }] }),
        ),
    ]
}

#[test]
fn test_static_and_dynamic_paths_agree_for_every_invocation_shape() {
    for manager in ["template-only", "args"] {
        for (shape, template) in invocation_shapes() {
            let static_html =
                render_both(&panel_bundle(manager, false, template.clone()), json!({}));
            let dynamic_html = render_both(&panel_bundle(manager, true, template), json!({}));
            assert_eq!(static_html, dynamic_html, "{} ({})", shape, manager);
        }
    }
}

#[test]
fn test_invocation_shapes_render_expected_blocks() {
    let shapes = invocation_shapes();

    let html = render_both(&panel_bundle("template-only", false, shapes[0].1.clone()), json!({}));
    assert_eq!(html, r#"<div class="x">true|false|B||T|</div>"#);

    let html = render_both(&panel_bundle("args", false, shapes[0].1.clone()), json!({}));
    assert_eq!(html, r#"<div class="x">true|false|B||T|T</div>"#);

    let html = render_both(&panel_bundle("template-only", false, shapes[2].1.clone()), json!({}));
    assert_eq!(html, "<div>true|true|B|I|T|</div>");

    let html = render_both(&panel_bundle("template-only", false, shapes[4].1.clone()), json!({}));
    assert_eq!(html, "<div>false|false||||</div>");
}

fn tree_bundle(has_eval: bool) -> Bundle {
    serde_json::from_value(json!({
        "template": {
            "statements": [{ "Component": {
                "tag": "Tree",
                "hash": [["@node"], [{ "Get": { "head": 0, "path": ["root"] } }]]
            }}]
        },
        "components": {
            "Tree": { "layout": {
                "symbols": ["@node"],
                "has_eval": has_eval,
                "statements": [
                    { "Append": { "value": { "Get": { "head": 1, "path": ["name"] } } } },
                    { "Block": {
                        "name": "if",
                        "params": [{ "Get": { "head": 1, "path": ["child"] } }],
                        "template": 0
                    }}
                ],
                "blocks": [{ "statements": [{ "Component": {
                    "tag": "Tree",
                    "hash": [["@node"], [{ "Get": { "head": 1, "path": ["child"] } }]]
                }}]}]
            }}
        }
    }))
    .unwrap()
}

#[test]
fn test_recursive_component_compiles_eagerly() {
    let data = json!({ "root": { "name": "a", "child": { "name": "b", "child": { "name": "c" } } } });
    for has_eval in [false, true] {
        assert_eq!(render_both(&tree_bundle(has_eval), data.clone()), "abc");
    }

    let compiled = compile_bundle(
        &tree_bundle(false),
        &CompilerConfig {
            strategy: Strategy::Eager,
            verify: true,
        },
    )
    .unwrap();
    // Entry, the layout (compiled once) and its `if` block.
    assert_eq!(compiled.program.heap.handles().count(), 3);
    assert!(bytecode::serialize(&compiled.program).is_ok());
}

/// Exposes the positional arguments it was created with as `this`.
struct PositionalEcho;

impl ComponentManager for PositionalEcho {
    fn capabilities(&self) -> ComponentCapabilities {
        ComponentCapabilities {
            create_args: true,
            ..Default::default()
        }
    }

    fn self_ref(&self, instance: &ComponentInstance) -> ReferenceRc {
        let positional: Vec<String> = instance
            .args
            .iter()
            .flat_map(|args| args.positional.iter())
            .map(|arg| arg.value().to_content().unwrap_or_default())
            .collect();
        ConstReference::new(Json::String(positional.join(",")))
    }
}

#[test]
fn test_created_args_keep_positional_params_on_both_paths() {
    // {{component "Echo" "x" 2 label="l"}}
    let template = json!({ "statements": [{ "Append": { "value": { "Helper": {
        "name": "component",
        "params": [{ "Value": "Echo" }, { "Value": "x" }, { "Value": 2 }],
        "hash": [["label"], [{ "Value": "l" }]]
    }}}}]});

    for has_eval in [false, true] {
        let mut registry = Registry::new();
        registry.register_component_with_manager(
            "Echo",
            block(json!({
                "has_eval": has_eval,
                "statements": [{ "Append": { "value": { "Get": { "head": 0 } } } }]
            })),
            Rc::new(PositionalEcho),
        );
        let result = render_with(Rc::new(registry), template.clone()).unwrap();
        assert_eq!(result.html(), "x,2", "has_eval = {}", has_eval);
    }
}
