pub mod bytecode;
pub mod component;
mod constants;
pub mod element;
mod error;
mod heap;
pub mod iterable;
mod lists;
mod ops;
pub mod primitive;
pub mod reference;
pub mod scope;
mod value;
pub mod verifier;
mod vm;

use std::sync::atomic::{AtomicU32, Ordering};

pub use component::{
    Arguments, ArgsComponentManager, ComponentInstance, ComponentManager, Destructor,
    TemplateOnlyManager,
};
pub use constants::Constants;
pub use error::RuntimeError;
pub use heap::{Heap, VMHandle};
pub use ops::{Op, Register};
pub use primitive::Primitive;
pub use reference::{ConstReference, Opaque, Reference, ReferenceRc, RootReference};
pub use value::Value;
pub use verifier::{Verifier, VerifyError};
pub use vm::{ComponentDefinition, HALT, Helper, Modifier, RenderResult, RuntimeResolver, VM};

static NEXT_PROGRAM_ID: AtomicU32 = AtomicU32::new(1);

/// A linked program: the shared instruction heap plus its constant pool.
///
/// Every program gets a process-unique id so a template compiled into one
/// program is never mistaken for compiled in another.
#[derive(Debug)]
pub struct Program {
    id: u32,
    pub heap: Heap,
    pub constants: Constants,
}

impl Program {
    pub fn new() -> Self {
        Self::from_parts(Heap::new(), Constants::new())
    }

    pub(crate) fn from_parts(heap: Heap, constants: Constants) -> Self {
        Self {
            id: NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed),
            heap,
            constants,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}
