use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::component::{Arguments, ComponentState};
use super::heap::VMHandle;
use super::iterable::ReferenceIterator;
use super::primitive::Primitive;
use super::reference::ReferenceRc;
use crate::compiler::{CompilableTemplate, SymbolTable};

/// An operand stack or register value.
#[derive(Clone)]
pub enum Value {
    Primitive(Primitive),
    Ref(ReferenceRc),
    Handle(VMHandle),
    Table(SymbolTable),
    /// A block not compiled yet.
    Template(Rc<CompilableTemplate>),
    Iterator(Rc<RefCell<ReferenceIterator>>),
    Args(Rc<Arguments>),
    Component(Rc<RefCell<ComponentState>>),
    /// A saved `$ra` or `$fp`.
    Addr(usize),
}

impl Value {
    pub fn null() -> Self {
        Value::Primitive(Primitive::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(
            self,
            Value::Primitive(Primitive::Null) | Value::Primitive(Primitive::Undefined)
        )
    }

    /// Short name of the variant, for type errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Primitive(_) => "primitive",
            Value::Ref(_) => "reference",
            Value::Handle(_) => "handle",
            Value::Table(_) => "symbol table",
            Value::Template(_) => "template",
            Value::Iterator(_) => "iterator",
            Value::Args(_) => "arguments",
            Value::Component(_) => "component",
            Value::Addr(_) => "address",
        }
    }

    /// A block handle: a linked handle, or a number pushed by the eager
    /// strategy. Null means no block.
    pub fn as_handle(&self) -> Option<VMHandle> {
        match self {
            Value::Handle(handle) => Some(*handle),
            Value::Primitive(Primitive::Number(n)) if *n >= 0.0 => Some(VMHandle(*n as u32)),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Primitive(p) => write!(f, "Primitive({:?})", p),
            Value::Ref(r) => write!(f, "{:?}", r),
            Value::Handle(h) => write!(f, "Handle({})", h),
            Value::Table(t) => write!(f, "Table({:?})", t),
            Value::Template(t) => write!(f, "Template({:?})", t.symbol_table()),
            Value::Iterator(_) => write!(f, "Iterator"),
            Value::Args(a) => write!(f, "Args({} positional, {:?})", a.positional.len(), a.names),
            Value::Component(c) => write!(f, "Component({})", c.borrow().name),
            Value::Addr(a) => write!(f, "Addr({})", a),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_from_eager_number() {
        assert_eq!(
            Value::Primitive(Primitive::Number(3.0)).as_handle(),
            Some(VMHandle(3))
        );
        assert_eq!(Value::Handle(VMHandle(1)).as_handle(), Some(VMHandle(1)));
        assert_eq!(Value::null().as_handle(), None);
        assert!(Value::Primitive(Primitive::Undefined).is_null());
    }
}
