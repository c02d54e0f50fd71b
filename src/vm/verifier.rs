//! Linked-program verifier.
//!
//! Checks a committed handle before it is executed or serialized:
//! - every word group decodes to a known opcode
//! - jump-family offsets are non-zero and land on an instruction boundary
//!   inside the same handle
//! - the sequence ends with `Return`
//! - (strict mode) operands name constants and handles that exist

use thiserror::Error;
use tracing::trace;

use super::heap::VMHandle;
use super::ops::{Op, Register};
use super::primitive::Primitive;
use super::Program;
use crate::compiler::{INSTRUCTION_WIDTH, relative_offset};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("{0} is not a committed handle")]
    BadHandle(VMHandle),

    #[error("{handle} is {size} words, not a whole number of instructions")]
    Truncated { handle: VMHandle, size: usize },

    #[error("unknown opcode {word} at {addr:04}")]
    UnknownOpcode { addr: usize, word: u32 },

    #[error("{op} at {addr:04} has a zero offset")]
    ZeroOffset { addr: usize, op: &'static str },

    #[error("{op} at {addr:04} targets {target}, outside its block")]
    TargetOutOfBounds {
        addr: usize,
        op: &'static str,
        target: i64,
    },

    #[error("{op} at {addr:04} targets {target}, which is not an instruction boundary")]
    MisalignedTarget {
        addr: usize,
        op: &'static str,
        target: i64,
    },

    #[error("{0} does not end with Return")]
    MissingReturn(VMHandle),

    #[error("{op} at {addr:04} refers to missing {kind} {index}")]
    BadOperand {
        addr: usize,
        op: &'static str,
        kind: &'static str,
        index: u32,
    },
}

/// Linked-program verifier
pub struct Verifier {
    /// Also check constant-pool and register operands.
    pub strict: bool,
}

impl Default for Verifier {
    fn default() -> Self {
        Self { strict: true }
    }
}

impl Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify one handle, returning its instruction count.
    pub fn verify(&self, program: &Program, handle: VMHandle) -> Result<usize, VerifyError> {
        let heap = &program.heap;
        let (Some(start), Some(size)) = (heap.get_addr(handle), heap.size_of(handle)) else {
            return Err(VerifyError::BadHandle(handle));
        };
        if size == 0 || size % INSTRUCTION_WIDTH != 0 {
            return Err(VerifyError::Truncated { handle, size });
        }
        let words = heap
            .words()
            .get(start..start + size)
            .ok_or(VerifyError::Truncated { handle, size })?;

        let mut last = None;
        for (i, instruction) in words.chunks_exact(INSTRUCTION_WIDTH).enumerate() {
            let addr = start + i * INSTRUCTION_WIDTH;
            let op = Op::from_word(instruction[0]).ok_or(VerifyError::UnknownOpcode {
                addr,
                word: instruction[0],
            })?;
            let operands = [instruction[1], instruction[2], instruction[3]];

            if op.is_target() {
                check_target(op, addr, operands[0], start, size)?;
            }
            if self.strict {
                check_operands(program, op, addr, operands)?;
            }
            last = Some(op);
        }

        if last != Some(Op::Return) {
            return Err(VerifyError::MissingReturn(handle));
        }

        let count = size / INSTRUCTION_WIDTH;
        trace!(handle = %handle, instructions = count, "verified");
        Ok(count)
    }

    /// Verify every committed handle of `program`.
    pub fn verify_all(&self, program: &Program) -> Result<usize, VerifyError> {
        let mut total = 0;
        for handle in program.heap.handles() {
            total += self.verify(program, handle)?;
        }
        Ok(total)
    }
}

fn check_target(
    op: Op,
    addr: usize,
    offset: u32,
    start: usize,
    size: usize,
) -> Result<(), VerifyError> {
    let offset = relative_offset(offset);
    if offset == 0 {
        return Err(VerifyError::ZeroOffset {
            addr,
            op: op.name(),
        });
    }
    let target = addr as i64 + offset;
    let relative = target - start as i64;
    if relative < 0 || relative >= size as i64 {
        return Err(VerifyError::TargetOutOfBounds {
            addr,
            op: op.name(),
            target,
        });
    }
    if relative % INSTRUCTION_WIDTH as i64 != 0 {
        return Err(VerifyError::MisalignedTarget {
            addr,
            op: op.name(),
            target,
        });
    }
    Ok(())
}

fn check_operands(
    program: &Program,
    op: Op,
    addr: usize,
    [op1, op2, op3]: [u32; 3],
) -> Result<(), VerifyError> {
    let constants = &program.constants;
    let missing = |kind: &'static str, index: u32| VerifyError::BadOperand {
        addr,
        op: op.name(),
        kind,
        index,
    };
    let string = |index: u32| {
        constants
            .get_string(index)
            .map(|_| ())
            .ok_or_else(|| missing("string", index))
    };

    match op {
        Op::Text | Op::Comment | Op::OpenElement | Op::GetProperty => string(op1)?,
        Op::StaticAttr => {
            string(op1)?;
            string(op2)?;
            string(op3)?;
        }
        Op::DynamicAttr | Op::ComponentAttr => {
            string(op1)?;
            string(op3)?;
        }
        Op::Helper | Op::Modifier | Op::PushComponentSpec => {
            constants
                .get_handle(op1)
                .ok_or_else(|| missing("handle", op1))?;
        }
        Op::PushSymbolTable => {
            constants.get_table(op1).ok_or_else(|| missing("table", op1))?;
        }
        Op::Constant => {
            constants
                .get_other(op1)
                .ok_or_else(|| missing("template", op1))?;
        }
        Op::PushArgs => {
            constants
                .get_string_array(op1)
                .ok_or_else(|| missing("string array", op1))?;
        }
        Op::PushDynamicComponentManager | Op::CurryComponent => {
            constants
                .get_serializable(op1)
                .ok_or_else(|| missing("referer", op1))?;
        }
        Op::Primitive => {
            Primitive::decode(op1, constants).ok_or_else(|| missing("primitive", op1))?;
        }
        Op::InvokeStatic => {
            program
                .heap
                .get_addr(VMHandle(op1))
                .ok_or_else(|| missing("block", op1))?;
        }
        Op::Dup => match Register::from_word(op1) {
            Some(Register::Sp | Register::Fp) => {}
            _ => return Err(missing("register", op1)),
        },
        Op::Fetch => {
            Register::from_word(op1).ok_or_else(|| missing("register", op1))?;
        }
        Op::Load
        | Op::PrepareArgs
        | Op::RegisterComponentDestructor
        | Op::GetComponentSelf
        | Op::GetComponentLayout
        | Op::DidCreateElement
        | Op::DidRenderLayout => saved_register(op1).ok_or_else(|| missing("register", op1))?,
        Op::CreateComponent => saved_register(op2).ok_or_else(|| missing("register", op2))?,
        _ => {}
    }
    Ok(())
}

fn saved_register(word: u32) -> Option<()> {
    match Register::from_word(word)? {
        Register::S0 | Register::S1 | Register::T0 | Register::T1 => Some(()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(program: &mut Program, instructions: &[[u32; 4]]) -> VMHandle {
        let handle = program.heap.malloc();
        for word in instructions.iter().flatten() {
            program.heap.push(*word);
        }
        program.heap.finish_malloc(handle, 0);
        handle
    }

    #[test]
    fn test_valid_block() {
        let mut program = Program::new();
        let text = program.constants.string("hi");
        let handle = commit(
            &mut program,
            &[
                [Op::Jump as u32, 8, 0, 0],
                [Op::Text as u32, text, 0, 0],
                [Op::Return as u32, 0, 0, 0],
            ],
        );
        assert_eq!(Verifier::new().verify(&program, handle), Ok(3));
    }

    #[test]
    fn test_zero_offset() {
        let mut program = Program::new();
        let handle = commit(
            &mut program,
            &[[Op::Jump as u32, 0, 0, 0], [Op::Return as u32, 0, 0, 0]],
        );
        assert_eq!(
            Verifier::new().verify(&program, handle),
            Err(VerifyError::ZeroOffset { addr: 0, op: "Jump" })
        );
    }

    #[test]
    fn test_target_leaves_block() {
        let mut program = Program::new();
        commit(&mut program, &[[Op::Return as u32, 0, 0, 0]]);
        let handle = commit(
            &mut program,
            &[
                [Op::ReturnTo as u32, (-4i32) as u32, 0, 0],
                [Op::Return as u32, 0, 0, 0],
            ],
        );
        assert_eq!(
            Verifier::new().verify(&program, handle),
            Err(VerifyError::TargetOutOfBounds {
                addr: 4,
                op: "ReturnTo",
                target: 0
            })
        );
    }

    #[test]
    fn test_misaligned_target() {
        let mut program = Program::new();
        let handle = commit(
            &mut program,
            &[
                [Op::Iterate as u32, 6, 0, 0],
                [Op::Exit as u32, 0, 0, 0],
                [Op::Return as u32, 0, 0, 0],
            ],
        );
        assert!(matches!(
            Verifier::new().verify(&program, handle),
            Err(VerifyError::MisalignedTarget { target: 6, .. })
        ));
    }

    #[test]
    fn test_missing_return() {
        let mut program = Program::new();
        let handle = commit(&mut program, &[[Op::FlushElement as u32, 0, 0, 0]]);
        assert_eq!(
            Verifier::new().verify(&program, handle),
            Err(VerifyError::MissingReturn(handle))
        );
    }

    #[test]
    fn test_strict_operands() {
        let mut program = Program::new();
        let handle = commit(
            &mut program,
            &[[Op::Text as u32, 99, 0, 0], [Op::Return as u32, 0, 0, 0]],
        );
        assert!(matches!(
            Verifier::new().verify(&program, handle),
            Err(VerifyError::BadOperand { kind: "string", index: 99, .. })
        ));
        let lenient = Verifier { strict: false };
        assert_eq!(lenient.verify(&program, handle), Ok(2));
    }

    #[test]
    fn test_unknown_handle() {
        let program = Program::new();
        assert_eq!(
            Verifier::new().verify(&program, VMHandle(4)),
            Err(VerifyError::BadHandle(VMHandle(4)))
        );
    }
}
