//! References: opaque values paired with a revision tag.
//!
//! The interpreter only reads references; invalidation is driven from the
//! outside by dirtying a root's tag.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::Value as Json;

use super::component::CurriedDefinition;
use super::primitive::{format_number, Primitive};

/// Monotonic revision counter shared by a reference and everything derived
/// from it.
#[derive(Debug, Clone, Default)]
pub struct Tag(Rc<Cell<u64>>);

impl Tag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revision(&self) -> u64 {
        self.0.get()
    }

    pub fn dirty(&self) {
        self.0.set(self.0.get() + 1);
    }

    /// Whether nothing changed since `snapshot` was taken.
    pub fn validate(&self, snapshot: u64) -> bool {
        self.revision() == snapshot
    }
}

/// A value a template can see.
#[derive(Debug, Clone)]
pub enum Opaque {
    Data(Json),
    Component(Rc<CurriedDefinition>),
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Opaque::Data(a), Opaque::Data(b)) => a == b,
            (Opaque::Component(a), Opaque::Component(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Opaque {
    pub fn null() -> Self {
        Opaque::Data(Json::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Opaque::Data(Json::Null) => false,
            Opaque::Data(Json::Bool(b)) => *b,
            Opaque::Data(Json::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
            Opaque::Data(Json::String(s)) => !s.is_empty(),
            Opaque::Data(Json::Array(items)) => !items.is_empty(),
            Opaque::Data(Json::Object(_)) => true,
            Opaque::Component(_) => true,
        }
    }

    pub fn is_component(&self) -> bool {
        matches!(self, Opaque::Component(_))
    }

    pub fn as_json(&self) -> Option<&Json> {
        match self {
            Opaque::Data(json) => Some(json),
            Opaque::Component(_) => None,
        }
    }

    /// Text for content and attribute positions; `None` renders nothing.
    pub fn to_content(&self) -> Option<String> {
        match self {
            Opaque::Data(Json::Null) | Opaque::Component(_) => None,
            Opaque::Data(Json::String(s)) => Some(s.clone()),
            Opaque::Data(Json::Number(n)) => n.as_f64().map(format_number),
            Opaque::Data(Json::Bool(b)) => Some(b.to_string()),
            Opaque::Data(other) => Some(other.to_string()),
        }
    }

    /// Property lookup; missing keys and non-containers yield null.
    pub fn get(&self, key: &str) -> Opaque {
        let Opaque::Data(json) = self else {
            return Opaque::null();
        };
        let found = match json {
            Json::Object(map) => map.get(key).cloned(),
            Json::Array(items) => match key {
                "length" => Some(Json::from(items.len())),
                _ => key.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
            },
            Json::String(s) if key == "length" => Some(Json::from(s.chars().count())),
            _ => None,
        };
        Opaque::Data(found.unwrap_or(Json::Null))
    }
}

impl From<Primitive> for Opaque {
    fn from(primitive: Primitive) -> Self {
        match primitive {
            Primitive::Undefined => Opaque::null(),
            other => Opaque::Data(other.to_json()),
        }
    }
}

impl From<Json> for Opaque {
    fn from(json: Json) -> Self {
        Opaque::Data(json)
    }
}

pub trait Reference {
    fn value(&self) -> Opaque;
    fn tag(&self) -> Tag;
}

impl fmt::Debug for dyn Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({:?})", self.value())
    }
}

pub type ReferenceRc = Rc<dyn Reference>;

// ============================================================================
// Reference kinds
// ============================================================================

/// A value that never changes.
pub struct ConstReference {
    value: Opaque,
    tag: Tag,
}

impl ConstReference {
    pub fn new(value: impl Into<Opaque>) -> ReferenceRc {
        Rc::new(Self {
            value: value.into(),
            tag: Tag::new(),
        })
    }
}

impl Reference for ConstReference {
    fn value(&self) -> Opaque {
        self.value.clone()
    }

    fn tag(&self) -> Tag {
        self.tag.clone()
    }
}

/// Mutable input data, such as the `self` of a top-level render.
pub struct RootReference {
    value: RefCell<Json>,
    tag: Tag,
}

impl RootReference {
    pub fn new(value: Json) -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(value),
            tag: Tag::new(),
        })
    }

    pub fn update(&self, value: Json) {
        *self.value.borrow_mut() = value;
        self.tag.dirty();
    }
}

impl Reference for RootReference {
    fn value(&self) -> Opaque {
        Opaque::Data(self.value.borrow().clone())
    }

    fn tag(&self) -> Tag {
        self.tag.clone()
    }
}

/// `parent.key`, re-read on every access and sharing the parent's tag.
pub struct PropertyReference {
    parent: ReferenceRc,
    key: String,
}

impl Reference for PropertyReference {
    fn value(&self) -> Opaque {
        self.parent.value().get(&self.key)
    }

    fn tag(&self) -> Tag {
        self.parent.tag()
    }
}

pub fn property(parent: ReferenceRc, key: &str) -> ReferenceRc {
    Rc::new(PropertyReference {
        parent,
        key: key.to_string(),
    })
}

/// A value derived from other references.
pub struct ComputedReference {
    compute: Box<dyn Fn() -> Opaque>,
    tag: Tag,
}

impl ComputedReference {
    pub fn new(tag: Tag, compute: impl Fn() -> Opaque + 'static) -> ReferenceRc {
        Rc::new(Self {
            compute: Box::new(compute),
            tag,
        })
    }
}

impl Reference for ComputedReference {
    fn value(&self) -> Opaque {
        (self.compute)()
    }

    fn tag(&self) -> Tag {
        self.tag.clone()
    }
}

pub fn to_boolean(inner: ReferenceRc) -> ReferenceRc {
    let tag = inner.tag();
    ComputedReference::new(tag, move || Opaque::Data(Json::Bool(inner.value().is_truthy())))
}

pub fn concat(parts: Vec<ReferenceRc>) -> ReferenceRc {
    let tag = Tag::new();
    ComputedReference::new(tag, move || {
        let text: String = parts
            .iter()
            .filter_map(|p| p.value().to_content())
            .collect();
        Opaque::Data(Json::String(text))
    })
}
