//! Label table: named positions and pending forward references for one
//! label scope. Offsets are relative to the jump instruction itself, so a
//! patched block can be linked anywhere in the heap.

use std::collections::HashMap;

use tracing::trace;

use super::error::{CompileError, Result};
use crate::vm::Op;

pub type Label = &'static str;

/// A jump-family instruction waiting for its label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Word offset of the instruction whose first operand gets patched.
    pub at: usize,
    pub op: Op,
    pub name: Label,
}

#[derive(Debug, Default)]
pub struct Labels {
    labels: HashMap<Label, usize>,
    targets: Vec<Target>,
}

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a definition point. A later definition of the same name wins.
    pub fn label(&mut self, name: Label, index: usize) {
        self.labels.insert(name, index);
    }

    pub fn target(&mut self, at: usize, op: Op, name: Label) {
        self.targets.push(Target { at, op, name });
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Write `label - at` into operand 1 of every recorded target.
    pub fn patch(&self, buffer: &mut [u32]) -> Result<()> {
        for target in &self.targets {
            let position = *self
                .labels
                .get(target.name)
                .ok_or_else(|| CompileError::UnresolvedLabel(target.name.to_string()))?;
            let offset = position as i64 - target.at as i64;
            trace!(label = target.name, at = target.at, offset, op = target.op.name(), "patch");
            buffer[target.at + 1] = offset as i32 as u32;
        }
        Ok(())
    }
}

/// Decode a patched relative offset operand.
pub fn relative_offset(word: u32) -> i64 {
    word as i32 as i64
}
