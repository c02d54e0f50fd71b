//! Fixed-width instruction buffer.

use crate::vm::Op;

/// Words per instruction: opcode plus three operands.
pub const INSTRUCTION_WIDTH: usize = 4;

#[derive(Debug, Default)]
pub struct InstructionEncoder {
    buffer: Vec<u32>,
}

impl InstructionEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: Op, op1: u32, op2: u32, op3: u32) {
        self.buffer.extend_from_slice(&[op as u32, op1, op2, op3]);
    }

    /// Emit `op` with zeroed operands, to be patched later.
    pub fn reserve(&mut self, op: Op) {
        self.push(op, 0, 0, 0);
    }

    /// Word offset of the most recently emitted instruction.
    pub fn pos(&self) -> usize {
        self.buffer.len() - INSTRUCTION_WIDTH
    }

    /// Word offset the next instruction will occupy.
    pub fn next_pos(&self) -> usize {
        self.buffer.len()
    }

    pub fn instruction_count(&self) -> usize {
        self.buffer.len() / INSTRUCTION_WIDTH
    }

    pub fn words(&self) -> &[u32] {
        &self.buffer
    }

    pub fn words_mut(&mut self) -> &mut [u32] {
        &mut self.buffer
    }

    pub fn into_words(self) -> Vec<u32> {
        self.buffer
    }
}
