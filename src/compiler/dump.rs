//! Disassembler for linked programs.
//!
//! Prints every committed block in the heap with decoded operands: constant
//! pool entries are shown by value, registers by name and relative jumps as
//! absolute word addresses.

use crate::compiler::labels::relative_offset;
use crate::compiler::SymbolTable;
use crate::vm::{Op, Primitive, Program, Register, VMHandle};

// ============================================================================
// Bytecode Disassembler
// ============================================================================

pub struct Disassembler<'a> {
    program: &'a Program,
    output: String,
}

impl<'a> Disassembler<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self {
            program,
            output: String::new(),
        }
    }

    pub fn disassemble(&mut self) -> &str {
        let strings = self.program.constants.strings();
        if strings.len() > 1 {
            self.output.push_str("== String Constants ==\n");
            for (i, s) in strings.iter().enumerate().skip(1) {
                self.output
                    .push_str(&format!("  [{:04}] \"{}\"\n", i, escape(s)));
            }
            self.output.push('\n');
        }

        let handles: Vec<VMHandle> = self.program.heap.handles().collect();
        for handle in handles {
            self.disassemble_handle(handle);
            self.output.push('\n');
        }

        &self.output
    }

    pub fn disassemble_handle(&mut self, handle: VMHandle) {
        let heap = &self.program.heap;
        let (Some(start), Some(size)) = (heap.get_addr(handle), heap.size_of(handle)) else {
            self.output.push_str(&format!("== Block {}: <unallocated> ==\n", handle));
            return;
        };
        self.output.push_str(&format!(
            "== Block {} (addr: {:04}, words: {}, scope: {}) ==\n",
            handle,
            start,
            size,
            heap.scope_size(handle).unwrap_or(0)
        ));

        let words = &heap.words()[start..start + size];
        for (i, chunk) in words.chunks(4).enumerate() {
            let addr = start + i * 4;
            self.output.push_str(&format!("{:04}: ", addr));
            match chunk {
                [op, op1, op2, op3] => self.disassemble_op(addr, *op, [*op1, *op2, *op3]),
                _ => self.output.push_str("<truncated>"),
            }
            self.output.push('\n');
        }
    }

    fn disassemble_op(&mut self, addr: usize, word: u32, operands: [u32; 3]) {
        let Some(op) = Op::from_word(word) else {
            self.output.push_str(&format!("<unknown opcode {}>", word));
            return;
        };
        let [op1, op2, op3] = operands;
        let detail = match op {
            // Operand 1 is a string constant
            Op::Text | Op::Comment | Op::OpenElement | Op::GetProperty => self.string(op1),

            Op::StaticAttr => format!(
                "{}={}{}",
                self.string(op1),
                self.string(op2),
                self.namespace(op3)
            ),
            Op::DynamicAttr | Op::ComponentAttr => format!(
                "{} trusting={}{}",
                self.string(op1),
                op2,
                self.namespace(op3)
            ),

            Op::Primitive => match Primitive::decode(op1, &self.program.constants) {
                Some(Primitive::String(s)) => format!("\"{}\"", escape(&s)),
                Some(p) => p.to_string(),
                None => format!("<bad primitive {:#x}>", op1),
            },

            // Relative targets
            Op::Jump | Op::JumpIf | Op::JumpUnless | Op::ReturnTo | Op::EnterList | Op::Iterate => {
                let offset = relative_offset(op1);
                format!("{:+} -> {:04}", offset, addr as i64 + offset)
            }

            Op::Fetch
            | Op::Load
            | Op::PrepareArgs
            | Op::RegisterComponentDestructor
            | Op::GetComponentSelf
            | Op::GetComponentLayout
            | Op::InvokeComponentLayout
            | Op::DidCreateElement
            | Op::DidRenderLayout => register(op1),
            Op::Dup => format!("{} {}", register(op1), op2),
            Op::CreateComponent => format!("flags={:#04b} {}", op1, register(op2)),

            Op::Helper | Op::Modifier | Op::PushComponentSpec => {
                match self.program.constants.get_handle(op1) {
                    Some(handle) => format!("handle={}", handle),
                    None => format!("<bad handle constant {}>", op1),
                }
            }
            Op::PushDynamicComponentManager | Op::CurryComponent => {
                match self.program.constants.get_serializable(op1) {
                    Some(referer) => format!("referer=\"{}\"", referer),
                    None => format!("<bad referer {}>", op1),
                }
            }
            Op::PushSymbolTable => match self.program.constants.get_table(op1) {
                Some(SymbolTable::Program(t)) => format!("program{:?}", t.symbols),
                Some(SymbolTable::Block(t)) => format!("block{:?}", t.parameters),
                None => format!("<bad table {}>", op1),
            },
            Op::PushArgs => {
                let names = self
                    .program
                    .constants
                    .get_string_array(op1)
                    .unwrap_or_default();
                format!("positional={} named={:?} synthetic={}", op2 >> 4, names, (op2 >> 3) & 1)
            }
            Op::Constant => format!("other[{}]", op1),
            Op::InvokeStatic => format!("{}", VMHandle(op1)),
            Op::RootScope => format!("size={} bind_caller={}", op1, op2),
            Op::DynamicContent => format!("trusting={}", op1),

            Op::SetVariable
            | Op::SetBlock
            | Op::GetVariable
            | Op::GetBlock
            | Op::HasBlock
            | Op::Concat
            | Op::Pop
            | Op::Enter => format!("{}", op1),

            _ => String::new(),
        };

        self.output.push_str(op.name());
        if !detail.is_empty() {
            self.output.push(' ');
            self.output.push_str(&detail);
        }
    }

    fn string(&self, index: u32) -> String {
        match self.program.constants.get_string(index) {
            Some(s) => format!("\"{}\"", escape(s)),
            None => format!("<bad string {}>", index),
        }
    }

    fn namespace(&self, index: u32) -> String {
        if index == 0 {
            String::new()
        } else {
            format!(" ns={}", self.string(index))
        }
    }
}

fn register(word: u32) -> String {
    match Register::from_word(word) {
        Some(register) => register.name().to_string(),
        None => format!("<bad register {}>", word),
    }
}

fn escape(s: &str) -> String {
    s.replace('\n', "\\n").replace('\t', "\\t")
}

/// Format every block in `program` as disassembly.
pub fn format_program(program: &Program) -> String {
    let mut disassembler = Disassembler::new(program);
    disassembler.disassemble().to_string()
}
