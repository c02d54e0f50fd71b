/// Opcodes for the stencil VM.
///
/// Every instruction is a fixed 4-word record `[op, op1, op2, op3]`. The
/// instruction at index `i` of a compiled block lives at word offset `i * 4`.
/// Operands are raw immediates, register ids, constant-pool indices or
/// relative jump offsets depending on the opcode.
///
/// Stack effect notation: `[..., a, b] -> [..., c]` (top of stack on the right).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    // ========================================
    // Expressions
    // ========================================
    /// (handle) `[args] -> [ref]`
    Helper = 0,
    /// (symbol) `[ref] -> []`
    SetVariable,
    /// (symbol) `[table, block] -> []`
    SetBlock,
    /// (symbol) `[] -> [ref]`
    GetVariable,
    /// (string) `[ref] -> [ref]`
    GetProperty,
    /// (symbol) `[] -> [table, block]`
    GetBlock,
    /// (symbol) `[] -> [ref]`
    HasBlock,
    /// `[table, handle] -> [ref]`
    HasBlockParams,
    /// (count) `[ref * count] -> [ref]`
    Concat,
    /// (other) `[] -> [template]`
    Constant,
    /// (encoded primitive) `[] -> [primitive]`
    Primitive,
    /// `[primitive] -> [ref]`
    PrimitiveReference,
    /// (register, offset) `[] -> [value]`
    Dup,
    /// (count) `[value * count] -> []`
    Pop,
    /// (register) `[value] -> []`
    Load,
    /// (register) `[] -> [value]`
    Fetch,
    /// `[ref] -> [ref]`
    ToBoolean,

    // ========================================
    // Scopes and frames
    // ========================================
    /// (size, bind caller)
    RootScope,
    ChildScope,
    PopScope,
    PushDynamicScope,
    PopDynamicScope,
    /// `[] -> [ra, fp]`
    PushFrame,
    /// Truncates the stack to the frame base and restores `ra`/`fp`.
    PopFrame,

    // ========================================
    // Control flow
    // ========================================
    /// (offset)
    Jump,
    /// (offset) `[ref] -> []`
    JumpIf,
    /// (offset) `[ref] -> []`
    JumpUnless,
    /// (offset) sets `ra`
    ReturnTo,
    Return,
    /// `[handle] -> []`
    InvokeVirtual,
    /// (handle)
    InvokeStatic,
    /// `[args, table, handle] -> []`
    InvokeYield,
    /// (args) begins a tracked block
    Enter,
    Exit,
    /// `[template | null] -> [handle | null]`
    CompileBlock,
    /// (table) `[] -> [table]`
    PushSymbolTable,
    /// (names, positional count, synthetic) `[ref * n] -> [args]`
    PushArgs,

    // ========================================
    // DOM
    // ========================================
    /// (string)
    Text,
    /// (string)
    Comment,
    /// (trusting) `[ref] -> []`
    DynamicContent,
    /// (tag)
    OpenElement,
    FlushElement,
    CloseElement,
    /// (name, value, namespace)
    StaticAttr,
    /// (name, trusting, namespace) `[ref] -> []`
    DynamicAttr,
    /// (name, trusting, namespace) `[ref] -> []`
    ComponentAttr,
    /// (handle) `[args] -> []`
    Modifier,

    // ========================================
    // Lists
    // ========================================
    /// `[key, list] -> [iterator, presence]`
    PutIterator,
    /// (offset)
    EnterList,
    ExitList,
    /// (offset) `[iterator] -> [iterator, value, memo]` or jump when exhausted
    Iterate,

    // ========================================
    // Components
    // ========================================
    /// `[ref] -> [ref]`
    IsComponent,
    /// (referer) `[ref, args] -> [ref]`
    CurryComponent,
    /// (handle) `[] -> [state]`
    PushComponentSpec,
    /// (referer) `[ref] -> [state]`
    PushDynamicComponentManager,
    /// (register) `[args] -> [args]`
    PrepareArgs,
    /// (flags, register)
    CreateComponent,
    /// (register)
    RegisterComponentDestructor,
    BeginComponentTransaction,
    CommitComponentTransaction,
    /// (register) `[] -> [ref]`
    GetComponentSelf,
    /// (register) `[] -> [table, handle]`
    GetComponentLayout,
    /// `[blocks * 6, args, self, table, handle] -> [ra, fp]`
    InvokeComponentLayout,
    /// (register)
    DidCreateElement,
    /// (register)
    DidRenderLayout,
}

/// All opcodes, indexed by their discriminant.
const ALL_OPS: [Op; 65] = [
    Op::Helper,
    Op::SetVariable,
    Op::SetBlock,
    Op::GetVariable,
    Op::GetProperty,
    Op::GetBlock,
    Op::HasBlock,
    Op::HasBlockParams,
    Op::Concat,
    Op::Constant,
    Op::Primitive,
    Op::PrimitiveReference,
    Op::Dup,
    Op::Pop,
    Op::Load,
    Op::Fetch,
    Op::ToBoolean,
    Op::RootScope,
    Op::ChildScope,
    Op::PopScope,
    Op::PushDynamicScope,
    Op::PopDynamicScope,
    Op::PushFrame,
    Op::PopFrame,
    Op::Jump,
    Op::JumpIf,
    Op::JumpUnless,
    Op::ReturnTo,
    Op::Return,
    Op::InvokeVirtual,
    Op::InvokeStatic,
    Op::InvokeYield,
    Op::Enter,
    Op::Exit,
    Op::CompileBlock,
    Op::PushSymbolTable,
    Op::PushArgs,
    Op::Text,
    Op::Comment,
    Op::DynamicContent,
    Op::OpenElement,
    Op::FlushElement,
    Op::CloseElement,
    Op::StaticAttr,
    Op::DynamicAttr,
    Op::ComponentAttr,
    Op::Modifier,
    Op::PutIterator,
    Op::EnterList,
    Op::ExitList,
    Op::Iterate,
    Op::IsComponent,
    Op::CurryComponent,
    Op::PushComponentSpec,
    Op::PushDynamicComponentManager,
    Op::PrepareArgs,
    Op::CreateComponent,
    Op::RegisterComponentDestructor,
    Op::BeginComponentTransaction,
    Op::CommitComponentTransaction,
    Op::GetComponentSelf,
    Op::GetComponentLayout,
    Op::InvokeComponentLayout,
    Op::DidCreateElement,
    Op::DidRenderLayout,
];

const OP_COUNT: u32 = ALL_OPS.len() as u32;

impl Op {
    /// Decode an opcode word.
    pub fn from_word(word: u32) -> Option<Op> {
        if word < OP_COUNT {
            Some(ALL_OPS[word as usize])
        } else {
            None
        }
    }

    /// Whether the first operand is a relative jump offset patched by the label table.
    pub fn is_target(self) -> bool {
        matches!(
            self,
            Op::Jump | Op::JumpIf | Op::JumpUnless | Op::EnterList | Op::Iterate | Op::ReturnTo
        )
    }

    /// Returns the name of the opcode for disassembly and tracing.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Helper => "Helper",
            Op::SetVariable => "SetVariable",
            Op::SetBlock => "SetBlock",
            Op::GetVariable => "GetVariable",
            Op::GetProperty => "GetProperty",
            Op::GetBlock => "GetBlock",
            Op::HasBlock => "HasBlock",
            Op::HasBlockParams => "HasBlockParams",
            Op::Concat => "Concat",
            Op::Constant => "Constant",
            Op::Primitive => "Primitive",
            Op::PrimitiveReference => "PrimitiveReference",
            Op::Dup => "Dup",
            Op::Pop => "Pop",
            Op::Load => "Load",
            Op::Fetch => "Fetch",
            Op::ToBoolean => "ToBoolean",
            Op::RootScope => "RootScope",
            Op::ChildScope => "ChildScope",
            Op::PopScope => "PopScope",
            Op::PushDynamicScope => "PushDynamicScope",
            Op::PopDynamicScope => "PopDynamicScope",
            Op::PushFrame => "PushFrame",
            Op::PopFrame => "PopFrame",
            Op::Jump => "Jump",
            Op::JumpIf => "JumpIf",
            Op::JumpUnless => "JumpUnless",
            Op::ReturnTo => "ReturnTo",
            Op::Return => "Return",
            Op::InvokeVirtual => "InvokeVirtual",
            Op::InvokeStatic => "InvokeStatic",
            Op::InvokeYield => "InvokeYield",
            Op::Enter => "Enter",
            Op::Exit => "Exit",
            Op::CompileBlock => "CompileBlock",
            Op::PushSymbolTable => "PushSymbolTable",
            Op::PushArgs => "PushArgs",
            Op::Text => "Text",
            Op::Comment => "Comment",
            Op::DynamicContent => "DynamicContent",
            Op::OpenElement => "OpenElement",
            Op::FlushElement => "FlushElement",
            Op::CloseElement => "CloseElement",
            Op::StaticAttr => "StaticAttr",
            Op::DynamicAttr => "DynamicAttr",
            Op::ComponentAttr => "ComponentAttr",
            Op::Modifier => "Modifier",
            Op::PutIterator => "PutIterator",
            Op::EnterList => "EnterList",
            Op::ExitList => "ExitList",
            Op::Iterate => "Iterate",
            Op::IsComponent => "IsComponent",
            Op::CurryComponent => "CurryComponent",
            Op::PushComponentSpec => "PushComponentSpec",
            Op::PushDynamicComponentManager => "PushDynamicComponentManager",
            Op::PrepareArgs => "PrepareArgs",
            Op::CreateComponent => "CreateComponent",
            Op::RegisterComponentDestructor => "RegisterComponentDestructor",
            Op::BeginComponentTransaction => "BeginComponentTransaction",
            Op::CommitComponentTransaction => "CommitComponentTransaction",
            Op::GetComponentSelf => "GetComponentSelf",
            Op::GetComponentLayout => "GetComponentLayout",
            Op::InvokeComponentLayout => "InvokeComponentLayout",
            Op::DidCreateElement => "DidCreateElement",
            Op::DidRenderLayout => "DidRenderLayout",
        }
    }
}

/// Machine registers. The compiler only ever names registers in operands.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// program counter
    Pc = 0,
    /// return address
    Ra = 1,
    /// frame pointer
    Fp = 2,
    /// stack pointer
    Sp = 3,
    // saved
    S0 = 4,
    S1 = 5,
    // temporaries
    T0 = 6,
    T1 = 7,
}

impl Register {
    pub fn from_word(word: u32) -> Option<Register> {
        Some(match word {
            0 => Register::Pc,
            1 => Register::Ra,
            2 => Register::Fp,
            3 => Register::Sp,
            4 => Register::S0,
            5 => Register::S1,
            6 => Register::T0,
            7 => Register::T1,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::Pc => "$pc",
            Register::Ra => "$ra",
            Register::Fp => "$fp",
            Register::Sp => "$sp",
            Register::S0 => "$s0",
            Register::S1 => "$s1",
            Register::T0 => "$t0",
            Register::T1 => "$t1",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_word_roundtrip() {
        for word in 0..OP_COUNT {
            let op = Op::from_word(word).unwrap();
            assert_eq!(op as u32, word, "{} is out of place", op.name());
        }
        assert_eq!(Op::from_word(OP_COUNT), None);
    }

    #[test]
    fn test_target_family() {
        assert!(Op::Jump.is_target());
        assert!(Op::Iterate.is_target());
        assert!(Op::ReturnTo.is_target());
        assert!(!Op::InvokeStatic.is_target());
    }

    #[test]
    fn test_register_roundtrip() {
        for word in 0..8 {
            assert_eq!(Register::from_word(word).unwrap() as u32, word);
        }
        assert_eq!(Register::from_word(8), None);
    }
}
