//! Serialized template form produced by the template parser.
//!
//! Scope slot 0 is always `self`; a template's `symbols[i]` lives in slot
//! `i + 1`. Nested blocks are referenced by index into the owning template's
//! `blocks` table.

use serde::{Deserialize, Serialize};

/// A complete template (top-level template or component layout).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedTemplateBlock {
    pub statements: Vec<Statement>,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub has_eval: bool,
    #[serde(default)]
    pub blocks: Vec<SerializedInlineBlock>,
}

/// A nested block; `parameters` are scope slots bound by the invoker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedInlineBlock {
    pub statements: Vec<Statement>,
    #[serde(default)]
    pub parameters: Vec<u32>,
}

/// Ordered hash arguments: parallel name and value lists.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Hash(pub Vec<String>, pub Vec<Expression>);

impl Hash {
    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn values(&self) -> &[Expression] {
        &self.1
    }

    pub fn get(&self, name: &str) -> Option<&Expression> {
        self.0.iter().position(|n| n == name).and_then(|i| self.1.get(i))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Text(String),
    Comment(String),
    Append {
        value: Expression,
        #[serde(default)]
        trusted: bool,
    },
    OpenElement {
        tag: String,
    },
    FlushElement,
    CloseElement,
    StaticAttr {
        name: String,
        value: String,
        #[serde(default)]
        namespace: Option<String>,
    },
    DynamicAttr {
        name: String,
        value: Expression,
        #[serde(default)]
        namespace: Option<String>,
        #[serde(default)]
        trusting: bool,
    },
    Modifier {
        name: String,
        #[serde(default)]
        params: Option<Vec<Expression>>,
        #[serde(default)]
        hash: Option<Hash>,
    },
    Block {
        name: String,
        #[serde(default)]
        params: Option<Vec<Expression>>,
        #[serde(default)]
        hash: Option<Hash>,
        #[serde(default)]
        template: Option<usize>,
        #[serde(default)]
        inverse: Option<usize>,
    },
    /// Angle-bracket invocation; falls back to a plain element when `tag`
    /// does not resolve to a component.
    Component {
        tag: String,
        #[serde(default)]
        attrs: Vec<Statement>,
        #[serde(default)]
        hash: Option<Hash>,
        #[serde(default)]
        block: Option<usize>,
    },
    Yield {
        to: u32,
        #[serde(default)]
        params: Option<Vec<Expression>>,
    },
    AttrSplat {
        to: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// A literal; must be a JSON primitive.
    Value(serde_json::Value),
    Undefined,
    Get {
        head: u32,
        #[serde(default)]
        path: Vec<String>,
    },
    /// A bare name: a helper if one resolves, otherwise a property of `self`.
    Unknown {
        name: String,
    },
    Helper {
        name: String,
        #[serde(default)]
        params: Option<Vec<Expression>>,
        #[serde(default)]
        hash: Option<Hash>,
    },
    Concat(Vec<Expression>),
    HasBlock(u32),
    HasBlockParams(u32),
}

impl Expression {
    /// Whether this is a path lookup, which may evaluate to a component definition.
    pub fn is_get(&self) -> bool {
        matches!(self, Expression::Get { .. } | Expression::Unknown { .. })
    }
}
