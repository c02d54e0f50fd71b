//! Shared instruction heap.
//!
//! Compiled blocks are appended here by `OpcodeBuilder::commit`. The heap
//! owns the final linear address of every block; builders only append
//! words between `malloc` and `finish_malloc` and never read them back.

use std::fmt;

/// Stable reference to a committed instruction sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VMHandle(pub u32);

impl fmt::Display for VMHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeapEntry {
    pub offset: u32,
    pub size: u32,
    pub scope_size: u32,
    pub finished: bool,
}

#[derive(Debug, Default)]
pub struct Heap {
    words: Vec<u32>,
    table: Vec<HeapEntry>,
    /// Handle currently being written, if any.
    open: Option<VMHandle>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a handle for the words pushed until [`Heap::finish_malloc`].
    pub fn malloc(&mut self) -> VMHandle {
        debug_assert!(self.open.is_none(), "nested malloc on the shared heap");
        let handle = VMHandle(self.table.len() as u32);
        self.table.push(HeapEntry {
            offset: self.words.len() as u32,
            size: 0,
            scope_size: 0,
            finished: false,
        });
        self.open = Some(handle);
        handle
    }

    /// Reserve a handle without opening it. Its words are written later,
    /// between [`Heap::malloc_reserved`] and [`Heap::finish_malloc`].
    pub fn reserve(&mut self) -> VMHandle {
        let handle = VMHandle(self.table.len() as u32);
        self.table.push(HeapEntry {
            offset: 0,
            size: 0,
            scope_size: 0,
            finished: false,
        });
        handle
    }

    /// Open a reserved handle at the current end of the heap.
    pub fn malloc_reserved(&mut self, handle: VMHandle) {
        debug_assert!(self.open.is_none(), "nested malloc on the shared heap");
        let offset = self.words.len() as u32;
        if let Some(entry) = self.table.get_mut(handle.0 as usize) {
            entry.offset = offset;
        }
        self.open = Some(handle);
    }

    pub fn push(&mut self, word: u32) {
        self.words.push(word);
    }

    pub fn finish_malloc(&mut self, handle: VMHandle, scope_size: u32) {
        let len = self.words.len() as u32;
        if let Some(entry) = self.table.get_mut(handle.0 as usize) {
            entry.size = len - entry.offset;
            entry.scope_size = scope_size;
            entry.finished = true;
        }
        self.open = None;
    }

    /// Word address of the first instruction of `handle`.
    pub fn get_addr(&self, handle: VMHandle) -> Option<usize> {
        self.entry(handle).map(|e| e.offset as usize)
    }

    /// Number of words in `handle`.
    pub fn size_of(&self, handle: VMHandle) -> Option<usize> {
        self.entry(handle).map(|e| e.size as usize)
    }

    pub fn scope_size(&self, handle: VMHandle) -> Option<usize> {
        self.entry(handle).map(|e| e.scope_size as usize)
    }

    pub fn word(&self, addr: usize) -> Option<u32> {
        self.words.get(addr).copied()
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Handles in allocation order.
    pub fn handles(&self) -> impl Iterator<Item = VMHandle> + '_ {
        self.table
            .iter()
            .enumerate()
            .filter(|(_, e)| e.finished)
            .map(|(i, _)| VMHandle(i as u32))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn entry(&self, handle: VMHandle) -> Option<&HeapEntry> {
        self.table.get(handle.0 as usize).filter(|e| e.finished)
    }

    pub(crate) fn entries(&self) -> &[HeapEntry] {
        &self.table
    }

    pub(crate) fn from_parts(words: Vec<u32>, table: Vec<HeapEntry>) -> Self {
        Self {
            words,
            table,
            open: None,
        }
    }
}
