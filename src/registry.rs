//! Template bundles and the name registry they populate.
//!
//! A bundle is the JSON input of the CLI: the entry template plus the
//! components, partials, helpers and modifiers it may refer to. The
//! [`Registry`] answers both compile-time lookups and runtime resolution.
//! Names are global to a bundle; referers are accepted but not consulted.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::rc::Rc;

use serde::Deserialize;
use serde_json::Value as Json;
use thiserror::Error;
use tracing::debug;

use crate::compiler::wire::SerializedTemplateBlock;
use crate::compiler::{CompilableTemplate, CompileTimeLookup, ComponentCapabilities, ParsedLayout};
use crate::vm::{
    ArgsComponentManager, Arguments, ComponentDefinition, ComponentManager, Helper, Modifier,
    Opaque, RuntimeResolver, TemplateOnlyManager,
};

fn default_referer() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Bundle {
    #[serde(default = "default_referer")]
    pub referer: String,
    pub template: SerializedTemplateBlock,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentSource>,
    #[serde(default)]
    pub partials: BTreeMap<String, SerializedTemplateBlock>,
    /// Names of built-in helpers made available to the templates.
    #[serde(default)]
    pub helpers: Vec<String>,
    #[serde(default)]
    pub modifiers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComponentSource {
    pub layout: SerializedTemplateBlock,
    #[serde(default)]
    pub manager: ManagerKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManagerKind {
    #[default]
    TemplateOnly,
    Args,
}

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid bundle: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown builtin helper `{0}`")]
    UnknownHelper(String),
    #[error("unknown builtin modifier `{0}`")]
    UnknownModifier(String),
}

impl Bundle {
    pub fn from_json(json: &str) -> Result<Self, BundleError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, BundleError> {
        let json = fs::read_to_string(path).map_err(|source| BundleError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// The entry template, ready to compile.
    pub fn entry(&self) -> Rc<CompilableTemplate> {
        CompilableTemplate::program(ParsedLayout::new(
            self.template.clone(),
            self.referer.clone(),
        ))
    }
}

struct RegisteredComponent {
    name: String,
    layout: Rc<CompilableTemplate>,
    manager: Rc<dyn ComponentManager>,
}

/// Handles are indices into per-kind tables, in registration order.
#[derive(Default)]
pub struct Registry {
    components: Vec<RegisteredComponent>,
    partials: Vec<(String, Rc<CompilableTemplate>)>,
    helpers: Vec<(String, Helper)>,
    modifiers: Vec<(String, Modifier)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bundle(bundle: &Bundle) -> Result<Self, BundleError> {
        let mut registry = Self::new();
        for (name, source) in &bundle.components {
            registry.register_component(name, source.layout.clone(), source.manager);
        }
        for (name, block) in &bundle.partials {
            registry.register_partial(name, block.clone());
        }
        for name in &bundle.helpers {
            registry.register_builtin_helper(name)?;
        }
        for name in &bundle.modifiers {
            registry.register_builtin_modifier(name)?;
        }
        debug!(
            components = registry.components.len(),
            partials = registry.partials.len(),
            helpers = registry.helpers.len(),
            modifiers = registry.modifiers.len(),
            "registry built"
        );
        Ok(registry)
    }

    pub fn register_component(
        &mut self,
        name: &str,
        layout: SerializedTemplateBlock,
        kind: ManagerKind,
    ) -> u32 {
        let manager: Rc<dyn ComponentManager> = match kind {
            ManagerKind::TemplateOnly => Rc::new(TemplateOnlyManager),
            ManagerKind::Args => Rc::new(ArgsComponentManager),
        };
        self.register_component_with_manager(name, layout, manager)
    }

    pub fn register_component_with_manager(
        &mut self,
        name: &str,
        layout: SerializedTemplateBlock,
        manager: Rc<dyn ComponentManager>,
    ) -> u32 {
        let layout = CompilableTemplate::program(ParsedLayout::new(layout, name));
        self.components.push(RegisteredComponent {
            name: name.to_string(),
            layout,
            manager,
        });
        self.components.len() as u32 - 1
    }

    pub fn register_partial(&mut self, name: &str, block: SerializedTemplateBlock) -> u32 {
        let partial = CompilableTemplate::program(ParsedLayout::new(block, name));
        self.partials.push((name.to_string(), partial));
        self.partials.len() as u32 - 1
    }

    pub fn register_helper(&mut self, name: &str, helper: Helper) -> u32 {
        self.helpers.push((name.to_string(), helper));
        self.helpers.len() as u32 - 1
    }

    pub fn register_builtin_helper(&mut self, name: &str) -> Result<u32, BundleError> {
        let helper = builtin_helper(name).ok_or_else(|| BundleError::UnknownHelper(name.to_string()))?;
        Ok(self.register_helper(name, helper))
    }

    pub fn register_modifier(&mut self, name: &str, modifier: Modifier) -> u32 {
        self.modifiers.push((name.to_string(), modifier));
        self.modifiers.len() as u32 - 1
    }

    pub fn register_builtin_modifier(&mut self, name: &str) -> Result<u32, BundleError> {
        let modifier =
            builtin_modifier(name).ok_or_else(|| BundleError::UnknownModifier(name.to_string()))?;
        Ok(self.register_modifier(name, modifier))
    }

    fn registered(&self, handle: u32) -> Option<&RegisteredComponent> {
        self.components.get(handle as usize)
    }
}

fn position<T>(entries: &[T], name: &str, key: impl Fn(&T) -> &str) -> Option<u32> {
    entries
        .iter()
        .position(|entry| key(entry) == name)
        .map(|i| i as u32)
}

impl CompileTimeLookup for Registry {
    fn capabilities(&self, handle: u32) -> ComponentCapabilities {
        self.registered(handle)
            .map(|c| c.manager.capabilities())
            .unwrap_or_default()
    }

    fn layout(&self, handle: u32) -> Option<Rc<CompilableTemplate>> {
        self.registered(handle).map(|c| c.layout.clone())
    }

    fn partial(&self, handle: u32) -> Option<Rc<CompilableTemplate>> {
        self.partials.get(handle as usize).map(|(_, p)| p.clone())
    }

    fn lookup_helper(&self, name: &str, _referer: &str) -> Option<u32> {
        position(&self.helpers, name, |(n, _)| n.as_str())
    }

    fn lookup_modifier(&self, name: &str, _referer: &str) -> Option<u32> {
        position(&self.modifiers, name, |(n, _)| n.as_str())
    }

    fn lookup_component_spec(&self, name: &str, _referer: &str) -> Option<u32> {
        position(&self.components, name, |c| c.name.as_str())
    }

    fn lookup_partial(&self, name: &str, _referer: &str) -> Option<u32> {
        position(&self.partials, name, |(n, _)| n.as_str())
    }
}

impl RuntimeResolver for Registry {
    fn component(&self, handle: u32) -> Option<ComponentDefinition> {
        self.registered(handle).map(|c| ComponentDefinition {
            name: c.name.clone(),
            manager: c.manager.clone(),
        })
    }

    fn lookup_component(&self, name: &str, referer: &str) -> Option<u32> {
        self.lookup_component_spec(name, referer)
    }

    fn helper(&self, handle: u32) -> Option<Helper> {
        self.helpers.get(handle as usize).map(|(_, h)| h.clone())
    }

    fn modifier(&self, handle: u32) -> Option<Modifier> {
        self.modifiers.get(handle as usize).map(|(_, m)| m.clone())
    }
}

// ============================================================================
// Built-ins
// ============================================================================

fn value_at(args: &Arguments, index: usize) -> Opaque {
    args.at(index)
        .map(|r| r.value())
        .unwrap_or_else(Opaque::null)
}

fn json_at(args: &Arguments, index: usize) -> Json {
    value_at(args, index).as_json().cloned().unwrap_or(Json::Null)
}

fn text_at(args: &Arguments, index: usize) -> String {
    value_at(args, index).to_content().unwrap_or_default()
}

fn helper(f: impl Fn(&Arguments) -> Result<Json, String> + 'static) -> Helper {
    Rc::new(move |args: &Arguments| f(args).map(Opaque::Data))
}

pub fn builtin_helper(name: &str) -> Option<Helper> {
    Some(match name {
        "upper" => helper(|args| Ok(Json::String(text_at(args, 0).to_uppercase()))),
        "lower" => helper(|args| Ok(Json::String(text_at(args, 0).to_lowercase()))),
        "eq" => helper(|args| Ok(Json::Bool(json_at(args, 0) == json_at(args, 1)))),
        "not" => helper(|args| Ok(Json::Bool(!value_at(args, 0).is_truthy()))),
        "array" => helper(|args| {
            Ok(Json::Array(
                (0..args.positional.len()).map(|i| json_at(args, i)).collect(),
            ))
        }),
        "hash" => helper(|args| Ok(args.named_json())),
        "join" => helper(|args| {
            let separator = args
                .named("separator")
                .and_then(|r| r.value().to_content())
                .unwrap_or_else(|| ",".to_string());
            let Json::Array(items) = json_at(args, 0) else {
                return Err("join expects an array".to_string());
            };
            let parts: Vec<String> = items
                .into_iter()
                .map(|item| Opaque::Data(item).to_content().unwrap_or_default())
                .collect();
            Ok(Json::String(parts.join(&separator)))
        }),
        _ => return None,
    })
}

fn modifier(
    f: impl Fn(&Arguments) -> Result<Vec<(String, String)>, String> + 'static,
) -> Modifier {
    Rc::new(f)
}

pub fn builtin_modifier(name: &str) -> Option<Modifier> {
    Some(match name {
        // {{attr "name" value}}
        "attr" => modifier(|args| {
            let name = text_at(args, 0);
            if name.is_empty() {
                return Err("attr needs an attribute name".to_string());
            }
            Ok(vec![(name, text_at(args, 1))])
        }),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::ConstReference;
    use serde_json::json;

    fn positional(values: &[Json]) -> Arguments {
        Arguments {
            positional: values.iter().cloned().map(ConstReference::new).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_bundle_defaults() {
        let bundle = Bundle::from_json(
            r#"{"template": {"statements": [], "symbols": [], "has_eval": false, "blocks": []}}"#,
        )
        .unwrap();
        assert_eq!(bundle.referer, "main");
        assert!(bundle.components.is_empty());
    }

    #[test]
    fn test_lookup_by_name() {
        let block = SerializedTemplateBlock {
            statements: vec![],
            symbols: vec![],
            has_eval: false,
            blocks: vec![],
        };
        let mut registry = Registry::new();
        let a = registry.register_component("A", block.clone(), ManagerKind::TemplateOnly);
        let b = registry.register_component("B", block, ManagerKind::Args);
        assert_eq!(registry.lookup_component_spec("B", "main"), Some(b));
        assert_eq!(registry.lookup_component_spec("C", "main"), None);
        assert!(!registry.capabilities(a).create_args);
        assert!(registry.capabilities(b).create_args);
        assert_eq!(
            RuntimeResolver::component(&registry, b).map(|d| d.name),
            Some("B".to_string())
        );
    }

    #[test]
    fn test_builtin_helpers() {
        let upper = builtin_helper("upper").unwrap();
        assert_eq!(upper(&positional(&[json!("hi")])), Ok(Opaque::Data(json!("HI"))));

        let eq = builtin_helper("eq").unwrap();
        assert_eq!(eq(&positional(&[json!(1), json!(1)])), Ok(Opaque::Data(json!(true))));

        let join = builtin_helper("join").unwrap();
        assert_eq!(
            join(&positional(&[json!(["a", 2])])),
            Ok(Opaque::Data(json!("a,2")))
        );
        assert!(join(&positional(&[json!("nope")])).is_err());
        assert!(builtin_helper("missing").is_none());
    }

    #[test]
    fn test_unknown_builtin_is_rejected() {
        let mut registry = Registry::new();
        assert!(matches!(
            registry.register_builtin_helper("frobnicate"),
            Err(BundleError::UnknownHelper(_))
        ));
        assert!(registry.register_builtin_modifier("attr").is_ok());
    }
}
