//! Component managers, arguments and curried definitions.

use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value as Json};
use tracing::debug;

use super::element::ElementBuilder;
use super::reference::{ConstReference, Opaque, Reference, ReferenceRc, Tag};
use crate::compiler::ComponentCapabilities;

/// Evaluated arguments of one invocation. Named argument names never carry
/// the `@` sigil.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    pub positional: Vec<ReferenceRc>,
    pub names: Vec<String>,
    pub named: Vec<ReferenceRc>,
}

impl Arguments {
    pub fn at(&self, index: usize) -> Option<&ReferenceRc> {
        self.positional.get(index)
    }

    pub fn named(&self, name: &str) -> Option<&ReferenceRc> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.named.get(i))
    }

    /// `self`'s values come first; named values in `overrides` replace them.
    pub fn merge(&self, overrides: &Arguments) -> Arguments {
        let mut merged = self.clone();
        merged.positional.extend(overrides.positional.iter().cloned());
        for (name, value) in overrides.names.iter().zip(&overrides.named) {
            match merged.names.iter().position(|n| n == name) {
                Some(i) => merged.named[i] = value.clone(),
                None => {
                    merged.names.push(name.clone());
                    merged.named.push(value.clone());
                }
            }
        }
        merged
    }

    /// Snapshot of the named arguments as a JSON object.
    pub fn named_json(&self) -> Json {
        let map: Map<String, Json> = self
            .names
            .iter()
            .zip(&self.named)
            .map(|(name, value)| {
                let json = value.value().as_json().cloned().unwrap_or(Json::Null);
                (name.clone(), json)
            })
            .collect();
        Json::Object(map)
    }
}

/// A component definition captured with arguments by `(component ...)`.
pub struct CurriedDefinition {
    pub definition: u32,
    pub args: Arguments,
}

impl fmt::Debug for CurriedDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurriedDefinition")
            .field("definition", &self.definition)
            .field("positional", &self.args.positional.len())
            .field("named", &self.args.names)
            .finish()
    }
}

/// Cleanup registered by a component; run when its transaction unwinds or
/// when the render result is destroyed.
pub type Destructor = Box<dyn FnOnce()>;

/// Per-invocation component instance.
#[derive(Debug, Clone, Default)]
pub struct ComponentInstance {
    pub name: String,
    pub args: Option<Rc<Arguments>>,
    pub has_default: bool,
    pub has_inverse: bool,
}

pub trait ComponentManager {
    fn capabilities(&self) -> ComponentCapabilities;

    fn create(
        &self,
        name: &str,
        args: Option<Rc<Arguments>>,
        has_default: bool,
        has_inverse: bool,
    ) -> Result<ComponentInstance, String> {
        Ok(ComponentInstance {
            name: name.to_string(),
            args,
            has_default,
            has_inverse,
        })
    }

    fn self_ref(&self, instance: &ComponentInstance) -> ReferenceRc;

    fn did_create_element(&self, _instance: &ComponentInstance, _element: &mut ElementBuilder) {}

    fn did_render_layout(&self, _instance: &ComponentInstance) {}

    fn destructor(&self, _instance: &ComponentInstance) -> Option<Destructor> {
        None
    }
}

/// State carried in a register for the duration of one invocation.
pub struct ComponentState {
    pub definition: u32,
    pub name: String,
    pub manager: Rc<dyn ComponentManager>,
    pub capabilities: ComponentCapabilities,
    /// Arguments captured by currying, merged in by `PrepareArgs`.
    pub curried: Option<Arguments>,
    pub instance: Option<ComponentInstance>,
}

impl fmt::Debug for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentState")
            .field("definition", &self.definition)
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("instance", &self.instance)
            .finish()
    }
}

// ============================================================================
// Built-in managers
// ============================================================================

/// A component that is only a template: no arguments object, no state.
#[derive(Debug, Default)]
pub struct TemplateOnlyManager;

impl ComponentManager for TemplateOnlyManager {
    fn capabilities(&self) -> ComponentCapabilities {
        ComponentCapabilities::default()
    }

    fn self_ref(&self, _instance: &ComponentInstance) -> ReferenceRc {
        ConstReference::new(Json::Null)
    }
}

/// A component whose `this` exposes its named arguments.
#[derive(Debug, Default)]
pub struct ArgsComponentManager;

impl ComponentManager for ArgsComponentManager {
    fn capabilities(&self) -> ComponentCapabilities {
        ComponentCapabilities {
            create_args: true,
            ..Default::default()
        }
    }

    fn self_ref(&self, instance: &ComponentInstance) -> ReferenceRc {
        Rc::new(ArgsSelfReference {
            args: instance.args.clone().unwrap_or_default(),
            tag: Tag::new(),
        })
    }

    fn destructor(&self, instance: &ComponentInstance) -> Option<Destructor> {
        let name = instance.name.clone();
        Some(Box::new(move || debug!(component = %name, "destroyed")))
    }
}

struct ArgsSelfReference {
    args: Rc<Arguments>,
    tag: Tag,
}

impl Reference for ArgsSelfReference {
    fn value(&self) -> Opaque {
        Opaque::Data(self.args.named_json())
    }

    fn tag(&self) -> Tag {
        self.tag.clone()
    }
}
