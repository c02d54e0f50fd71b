//! Constant pool shared by the compiler and the interpreter.
//!
//! Every pool dedupes by value and hands out stable `u32` indices. String
//! index 0 is always the empty string, so a `0` operand doubles as "absent"
//! for optional strings such as attribute namespaces.

use std::collections::HashMap;
use std::rc::Rc;

use crate::compiler::{CompilableTemplate, SymbolTable};

#[derive(Debug, Default)]
pub struct Constants {
    strings: Vec<String>,
    string_index: HashMap<String, u32>,
    floats: Vec<f64>,
    float_index: HashMap<u64, u32>,
    arrays: Vec<Vec<u32>>,
    array_index: HashMap<Vec<u32>, u32>,
    string_arrays: Vec<Vec<u32>>,
    string_array_index: HashMap<Vec<u32>, u32>,
    tables: Vec<SymbolTable>,
    table_index: HashMap<SymbolTable, u32>,
    handles: Vec<u32>,
    handle_index: HashMap<u32, u32>,
    serializables: Vec<String>,
    serializable_index: HashMap<String, u32>,
    others: Vec<Rc<CompilableTemplate>>,
}

fn intern<K: std::hash::Hash + Eq + Clone>(
    pool: &mut Vec<K>,
    index: &mut HashMap<K, u32>,
    value: K,
) -> u32 {
    if let Some(&i) = index.get(&value) {
        return i;
    }
    let i = pool.len() as u32;
    pool.push(value.clone());
    index.insert(value, i);
    i
}

impl Constants {
    pub fn new() -> Self {
        let mut constants = Self::default();
        constants.string("");
        constants
    }

    pub fn string(&mut self, value: &str) -> u32 {
        if let Some(&i) = self.string_index.get(value) {
            return i;
        }
        let i = self.strings.len() as u32;
        self.strings.push(value.to_string());
        self.string_index.insert(value.to_string(), i);
        i
    }

    pub fn float(&mut self, value: f64) -> u32 {
        if let Some(&i) = self.float_index.get(&value.to_bits()) {
            return i;
        }
        let i = self.floats.len() as u32;
        self.floats.push(value);
        self.float_index.insert(value.to_bits(), i);
        i
    }

    /// Numeric array (symbol lists, string index lists).
    pub fn array(&mut self, values: &[u32]) -> u32 {
        intern(&mut self.arrays, &mut self.array_index, values.to_vec())
    }

    pub fn string_array(&mut self, values: &[String]) -> u32 {
        let indices: Vec<u32> = values.iter().map(|v| self.string(v)).collect();
        intern(&mut self.string_arrays, &mut self.string_array_index, indices)
    }

    pub fn table(&mut self, table: &SymbolTable) -> u32 {
        intern(&mut self.tables, &mut self.table_index, table.clone())
    }

    /// A name-resolution handle (helper, modifier, component spec or partial).
    pub fn handle(&mut self, handle: u32) -> u32 {
        intern(&mut self.handles, &mut self.handle_index, handle)
    }

    /// A referer; used to re-run name resolution at runtime.
    pub fn serializable(&mut self, referer: &str) -> u32 {
        intern(
            &mut self.serializables,
            &mut self.serializable_index,
            referer.to_string(),
        )
    }

    /// A lazily compiled template, deduped by identity.
    pub fn other(&mut self, template: Rc<CompilableTemplate>) -> u32 {
        if let Some(i) = self.others.iter().position(|t| Rc::ptr_eq(t, &template)) {
            return i as u32;
        }
        self.others.push(template);
        (self.others.len() - 1) as u32
    }

    pub fn get_string(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(|s| s.as_str())
    }

    pub fn get_float(&self, index: u32) -> Option<f64> {
        self.floats.get(index as usize).copied()
    }

    pub fn get_array(&self, index: u32) -> Option<&[u32]> {
        self.arrays.get(index as usize).map(|a| a.as_slice())
    }

    pub fn get_string_array(&self, index: u32) -> Option<Vec<String>> {
        let indices = self.string_arrays.get(index as usize)?;
        indices
            .iter()
            .map(|&i| self.get_string(i).map(|s| s.to_string()))
            .collect()
    }

    pub fn get_table(&self, index: u32) -> Option<&SymbolTable> {
        self.tables.get(index as usize)
    }

    pub fn get_handle(&self, index: u32) -> Option<u32> {
        self.handles.get(index as usize).copied()
    }

    pub fn get_serializable(&self, index: u32) -> Option<&str> {
        self.serializables.get(index as usize).map(|s| s.as_str())
    }

    pub fn get_other(&self, index: u32) -> Option<Rc<CompilableTemplate>> {
        self.others.get(index as usize).cloned()
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    pub fn floats(&self) -> &[f64] {
        &self.floats
    }

    pub fn float_count(&self) -> usize {
        self.floats.len()
    }

    pub fn arrays(&self) -> &[Vec<u32>] {
        &self.arrays
    }

    pub fn raw_string_arrays(&self) -> &[Vec<u32>] {
        &self.string_arrays
    }

    pub fn tables(&self) -> &[SymbolTable] {
        &self.tables
    }

    pub fn handles(&self) -> &[u32] {
        &self.handles
    }

    pub fn serializables(&self) -> &[String] {
        &self.serializables
    }

    pub fn other_count(&self) -> usize {
        self.others.len()
    }

    /// Rebuild a pool from deserialized parts. Indices are preserved.
    pub(crate) fn from_parts(parts: ConstantParts) -> Self {
        let mut constants = Self::default();
        for s in parts.strings {
            constants.string(&s);
        }
        for f in parts.floats {
            constants.float(f);
        }
        for a in parts.arrays {
            intern(&mut constants.arrays, &mut constants.array_index, a);
        }
        for a in parts.string_arrays {
            intern(
                &mut constants.string_arrays,
                &mut constants.string_array_index,
                a,
            );
        }
        for t in parts.tables {
            constants.table(&t);
        }
        for h in parts.handles {
            constants.handle(h);
        }
        for s in parts.serializables {
            constants.serializable(&s);
        }
        constants
    }
}

/// Plain pool contents, in index order.
#[derive(Debug, Default)]
pub(crate) struct ConstantParts {
    pub strings: Vec<String>,
    pub floats: Vec<f64>,
    pub arrays: Vec<Vec<u32>>,
    pub string_arrays: Vec<Vec<u32>>,
    pub tables: Vec<SymbolTable>,
    pub handles: Vec<u32>,
    pub serializables: Vec<String>,
}
