//! Compile errors.
//!
//! Every compile error is fatal for the current compilation unit; a
//! half-built instruction buffer is never committed.

use thiserror::Error;

use crate::vm::primitive::InvalidPrimitive;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error(transparent)]
    InvalidPrimitive(#[from] InvalidPrimitive),

    #[error("unknown helper `{0}`")]
    UnknownHelper(String),

    #[error("unknown modifier `{0}`")]
    UnknownModifier(String),

    #[error("unknown block `{0}`")]
    UnknownBlock(String),

    #[error("unknown partial `{0}`")]
    UnknownPartial(String),

    #[error("block index {0} is out of range")]
    UnknownBlockIndex(usize),

    #[error("`{name}` expects {expected}")]
    MacroArity { name: String, expected: &'static str },

    #[error("unreachable symbol `{0}` in component layout")]
    UnreachableSymbol(String),

    #[error("component layout is not a program template")]
    NotALayout,

    #[error("unbalanced label scopes: {0}")]
    UnbalancedLabels(&'static str),

    #[error("internal error: unresolved label `{0}`")]
    UnresolvedLabel(String),
}
