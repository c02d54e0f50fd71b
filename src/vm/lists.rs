//! `{{#each}}` instructions.
//!
//! `EnterList` records the stack depth of the list frame and `ExitList`
//! checks it: every pass through the body has to leave the stack exactly as
//! `Iterate` found it.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use super::error::{Result, RuntimeError};
use super::iterable::{IterablePresenceReference, IterationArtifacts, IterationKey, ReferenceIterator};
use super::value::Value;
use super::vm::VM;

impl VM<'_> {
    /// `[key, list] -> [iterator, presence]`
    pub(super) fn put_iterator(&mut self) -> Result<()> {
        let list = self.pop_ref()?;
        let key = IterationKey::parse(&self.pop_ref()?.value());
        let artifacts = IterationArtifacts::new(list, key);
        let iterator = ReferenceIterator::new(artifacts.clone());
        trace!(empty = iterator.is_empty(), "put iterator");

        self.stack.push(Value::Iterator(Rc::new(RefCell::new(iterator))));
        self.stack
            .push(Value::Ref(IterablePresenceReference::new(artifacts)));
        Ok(())
    }

    pub(super) fn enter_list(&mut self, start: usize, offset: u32) -> Result<()> {
        self.iterator()?;
        let body = self.target(start, offset)?;
        trace!(body, depth = self.stack.len(), "enter list");
        self.list_marks.push(self.stack.len());
        Ok(())
    }

    pub(super) fn exit_list(&mut self) -> Result<()> {
        let expected = self.list_marks.pop().ok_or(RuntimeError::UnbalancedList {
            expected: 0,
            actual: self.stack.len(),
        })?;
        if self.stack.len() != expected {
            return Err(RuntimeError::UnbalancedList {
                expected,
                actual: self.stack.len(),
            });
        }
        trace!(depth = expected, "exit list");
        Ok(())
    }

    /// `[iterator] -> [iterator, value, memo]`, entering a block; jumps to
    /// `offset` once the iterator is exhausted.
    pub(super) fn iterate(&mut self, start: usize, offset: u32) -> Result<()> {
        let next = self.iterator()?.borrow_mut().next();
        match next {
            Some(item) => {
                trace!(key = %item.key, "iterate");
                self.stack.push(Value::Ref(item.value));
                self.stack.push(Value::Ref(item.memo));
                self.block_depth += 1;
            }
            None => self.pc = self.target(start, offset)?,
        }
        Ok(())
    }

    fn iterator(&self) -> Result<Rc<RefCell<ReferenceIterator>>> {
        match self.stack.last() {
            Some(Value::Iterator(iterator)) => Ok(iterator.clone()),
            Some(_) => Err(self.mismatch("iterator")),
            None => Err(self.underflow()),
        }
    }
}
