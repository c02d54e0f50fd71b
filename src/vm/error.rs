//! Runtime errors raised by the interpreter.

use thiserror::Error;

use crate::compiler::CompileError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// A lazily compiled block or layout failed to compile.
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("unknown opcode {word} at {addr:04}")]
    UnknownOpcode { addr: usize, word: u32 },

    #[error("program counter {0:04} is outside the heap")]
    PcOutOfBounds(usize),

    #[error("jump at {addr:04} by {offset} leaves the heap")]
    InvalidTarget { addr: usize, offset: i64 },

    #[error("invalid register {0}")]
    InvalidRegister(u32),

    #[error("invalid handle {0}")]
    InvalidHandle(u32),

    #[error("invalid constant {kind}[{index}]")]
    InvalidConstant { kind: &'static str, index: u32 },

    #[error("stack underflow at {addr:04} ({op})")]
    StackUnderflow { addr: usize, op: &'static str },

    #[error("stack overflow: depth {depth} exceeds max_stack {max}")]
    StackOverflow { depth: usize, max: usize },

    #[error("type mismatch at {addr:04}: {op} expected {expected}")]
    TypeMismatch {
        addr: usize,
        op: &'static str,
        expected: &'static str,
    },

    #[error("no scope to {0}")]
    ScopeUnderflow(&'static str),

    #[error("yield outside of a component layout")]
    NoCallerScope,

    #[error("`{0}` is not a component")]
    NotAComponent(String),

    #[error("unknown component `{0}`")]
    UnknownComponent(String),

    #[error("unknown helper handle {0}")]
    UnknownHelper(u32),

    #[error("unknown modifier handle {0}")]
    UnknownModifier(u32),

    #[error("helper failed: {0}")]
    HelperFailed(String),

    #[error("component manager failed: {0}")]
    ManagerFailed(String),

    #[error("element operation `{0}` without an open element")]
    NoOpenElement(&'static str),

    #[error("list region unbalanced: depth {actual} after ExitList, {expected} before EnterList")]
    UnbalancedList { expected: usize, actual: usize },

    #[error("no component transaction to commit")]
    NoTransaction,
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
