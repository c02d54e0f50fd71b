//! Lexical scopes.
//!
//! Slot 0 is `self`. A root scope created with `bind_caller` remembers the
//! scope it was created from, which is where yielded blocks run.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::reference::ReferenceRc;
use super::value::Value;

/// A block bound in a scope: its symbol table and its (possibly unresolved)
/// body, exactly as they were pushed.
#[derive(Debug, Clone)]
pub struct ScopeBlock {
    pub table: Value,
    pub block: Value,
}

impl ScopeBlock {
    pub fn is_present(&self) -> bool {
        !self.block.is_null()
    }
}

#[derive(Debug, Clone, Default)]
pub enum ScopeSlot {
    #[default]
    Empty,
    Value(ReferenceRc),
    Block(ScopeBlock),
}

pub type ScopeRef = Rc<RefCell<Scope>>;

#[derive(Debug, Clone, Default)]
pub struct Scope {
    slots: Vec<ScopeSlot>,
    caller: Option<ScopeRef>,
}

impl Scope {
    pub fn root(size: usize, caller: Option<ScopeRef>) -> ScopeRef {
        Rc::new(RefCell::new(Self {
            slots: vec![ScopeSlot::Empty; size],
            caller,
        }))
    }

    /// A copy of `self` sharing its caller; bindings made in the child are
    /// invisible to the parent.
    pub fn child(&self) -> ScopeRef {
        Rc::new(RefCell::new(self.clone()))
    }

    pub fn caller(&self) -> Option<ScopeRef> {
        self.caller.clone()
    }

    pub fn get(&self, symbol: u32) -> ScopeSlot {
        self.slots.get(symbol as usize).cloned().unwrap_or_default()
    }

    pub fn bind(&mut self, symbol: u32, slot: ScopeSlot) {
        let index = symbol as usize;
        if index >= self.slots.len() {
            self.slots.resize(index + 1, ScopeSlot::Empty);
        }
        self.slots[index] = slot;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Dynamically scoped values, visible to everything rendered below the
/// component that pushed them.
#[derive(Debug, Clone, Default)]
pub struct DynamicScope {
    values: HashMap<String, ReferenceRc>,
}

impl DynamicScope {
    pub fn get(&self, key: &str) -> Option<&ReferenceRc> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: &str, value: ReferenceRc) {
        self.values.insert(key.to_string(), value);
    }
}
