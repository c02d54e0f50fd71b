//! Binary format for linked programs.
//!
//! Binary format:
//! - Magic: "STCL" (4 bytes)
//! - Version: u32 (little-endian)
//! - Heap: word count + words, then handle count + handle entries
//! - Constant pools, each count-prefixed, in this order: strings, floats,
//!   arrays, string arrays, symbol tables, handles, serializables
//!
//! Templates held for lazy compilation have no binary form, so only programs
//! built with the eager strategy can be written.

use std::io::{self, Read, Write};

use thiserror::Error;

use super::Program;
use super::constants::{ConstantParts, Constants};
use super::heap::{Heap, HeapEntry};
use crate::compiler::{BlockSymbolTable, ProgramSymbolTable, SymbolTable};

/// Magic bytes for stencil program files
pub const MAGIC: &[u8; 4] = b"STCL";

/// Current program format version
pub const VERSION: u32 = 1;

const TABLE_PROGRAM: u8 = 0;
const TABLE_BLOCK: u8 = 1;

#[derive(Debug, Error)]
pub enum BytecodeError {
    #[error("invalid magic number")]
    InvalidMagic,
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),
    #[error("unexpected end of file")]
    UnexpectedEof,
    #[error("invalid symbol table tag: {0}")]
    InvalidTableTag(u8),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid UTF-8 string")]
    InvalidUtf8,
    #[error("program holds {0} uncompiled template(s); use the eager strategy to serialize")]
    LazyConstant(usize),
}

/// Serialize a Program to bytes
pub fn serialize(program: &Program) -> Result<Vec<u8>, BytecodeError> {
    let mut buf = Vec::new();
    write_program(&mut buf, program)?;
    Ok(buf)
}

/// Deserialize a Program from bytes
pub fn deserialize(data: &[u8]) -> Result<Program, BytecodeError> {
    let mut cursor = io::Cursor::new(data);
    read_program(&mut cursor)
}

/// Write a Program to a writer
pub fn write_program<W: Write>(w: &mut W, program: &Program) -> Result<(), BytecodeError> {
    let constants = &program.constants;
    if constants.other_count() > 0 {
        return Err(BytecodeError::LazyConstant(constants.other_count()));
    }

    w.write_all(MAGIC)?;
    write_u32(w, VERSION)?;

    // Heap
    let words = program.heap.words();
    write_u32(w, words.len() as u32)?;
    for &word in words {
        write_u32(w, word)?;
    }
    let entries = program.heap.entries();
    write_u32(w, entries.len() as u32)?;
    for entry in entries {
        write_u32(w, entry.offset)?;
        write_u32(w, entry.size)?;
        write_u32(w, entry.scope_size)?;
        w.write_all(&[entry.finished as u8])?;
    }

    // Constant pools
    write_u32(w, constants.strings().len() as u32)?;
    for s in constants.strings() {
        write_string(w, s)?;
    }
    write_u32(w, constants.floats().len() as u32)?;
    for &f in constants.floats() {
        write_f64(w, f)?;
    }
    write_u32(w, constants.arrays().len() as u32)?;
    for array in constants.arrays() {
        write_u32_list(w, array)?;
    }
    write_u32(w, constants.raw_string_arrays().len() as u32)?;
    for array in constants.raw_string_arrays() {
        write_u32_list(w, array)?;
    }
    write_u32(w, constants.tables().len() as u32)?;
    for table in constants.tables() {
        write_table(w, table)?;
    }
    write_u32_list(w, constants.handles())?;
    write_u32(w, constants.serializables().len() as u32)?;
    for s in constants.serializables() {
        write_string(w, s)?;
    }

    Ok(())
}

/// Read a Program from a reader
pub fn read_program<R: Read>(r: &mut R) -> Result<Program, BytecodeError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)
        .map_err(|_| BytecodeError::UnexpectedEof)?;
    if &magic != MAGIC {
        return Err(BytecodeError::InvalidMagic);
    }

    let version = read_u32(r)?;
    if version != VERSION {
        return Err(BytecodeError::UnsupportedVersion(version));
    }

    // Heap
    let words = read_u32_list(r)?;
    let entry_count = read_u32(r)? as usize;
    let mut entries = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        entries.push(HeapEntry {
            offset: read_u32(r)?,
            size: read_u32(r)?,
            scope_size: read_u32(r)?,
            finished: read_u8(r)? != 0,
        });
    }
    let heap = Heap::from_parts(words, entries);

    // Constant pools
    let mut parts = ConstantParts::default();
    for _ in 0..read_u32(r)? {
        parts.strings.push(read_string(r)?);
    }
    for _ in 0..read_u32(r)? {
        parts.floats.push(read_f64(r)?);
    }
    for _ in 0..read_u32(r)? {
        parts.arrays.push(read_u32_list(r)?);
    }
    for _ in 0..read_u32(r)? {
        parts.string_arrays.push(read_u32_list(r)?);
    }
    for _ in 0..read_u32(r)? {
        parts.tables.push(read_table(r)?);
    }
    parts.handles = read_u32_list(r)?;
    for _ in 0..read_u32(r)? {
        parts.serializables.push(read_string(r)?);
    }

    Ok(Program::from_parts(heap, Constants::from_parts(parts)))
}

fn write_table<W: Write>(w: &mut W, table: &SymbolTable) -> io::Result<()> {
    match table {
        SymbolTable::Program(table) => {
            w.write_all(&[TABLE_PROGRAM])?;
            write_u32(w, table.symbols.len() as u32)?;
            for symbol in &table.symbols {
                write_string(w, symbol)?;
            }
            w.write_all(&[table.has_eval as u8])?;
            write_string(w, &table.referer)
        }
        SymbolTable::Block(table) => {
            w.write_all(&[TABLE_BLOCK])?;
            write_u32_list(w, &table.parameters)?;
            write_string(w, &table.referer)
        }
    }
}

fn read_table<R: Read>(r: &mut R) -> Result<SymbolTable, BytecodeError> {
    match read_u8(r)? {
        TABLE_PROGRAM => {
            let count = read_u32(r)? as usize;
            let mut symbols = Vec::with_capacity(count);
            for _ in 0..count {
                symbols.push(read_string(r)?);
            }
            let has_eval = read_u8(r)? != 0;
            let referer = read_string(r)?;
            Ok(SymbolTable::Program(ProgramSymbolTable {
                symbols,
                has_eval,
                referer,
            }))
        }
        TABLE_BLOCK => {
            let parameters = read_u32_list(r)?;
            let referer = read_string(r)?;
            Ok(SymbolTable::Block(BlockSymbolTable {
                parameters,
                referer,
            }))
        }
        tag => Err(BytecodeError::InvalidTableTag(tag)),
    }
}

// ============================================================================
// Primitive helpers
// ============================================================================

fn read_u8<R: Read>(r: &mut R) -> Result<u8, BytecodeError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)
        .map_err(|_| BytecodeError::UnexpectedEof)?;
    Ok(buf[0])
}

fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, BytecodeError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)
        .map_err(|_| BytecodeError::UnexpectedEof)?;
    Ok(u32::from_le_bytes(buf))
}

fn write_u32_list<W: Write>(w: &mut W, values: &[u32]) -> io::Result<()> {
    write_u32(w, values.len() as u32)?;
    for &v in values {
        write_u32(w, v)?;
    }
    Ok(())
}

fn read_u32_list<R: Read>(r: &mut R) -> Result<Vec<u32>, BytecodeError> {
    let len = read_u32(r)? as usize;
    let mut values = Vec::with_capacity(len.min(1 << 16));
    for _ in 0..len {
        values.push(read_u32(r)?);
    }
    Ok(values)
}

fn write_f64<W: Write>(w: &mut W, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_f64<R: Read>(r: &mut R) -> Result<f64, BytecodeError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)
        .map_err(|_| BytecodeError::UnexpectedEof)?;
    Ok(f64::from_le_bytes(buf))
}

fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_u32(w, s.len() as u32)?;
    w.write_all(s.as_bytes())
}

fn read_string<R: Read>(r: &mut R) -> Result<String, BytecodeError> {
    let len = read_u32(r)? as usize;
    let mut buf = Vec::new();
    r.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(BytecodeError::UnexpectedEof);
    }
    String::from_utf8(buf).map_err(|_| BytecodeError::InvalidUtf8)
}
