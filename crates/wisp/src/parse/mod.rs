//! The binary decoder.
//!
//! Framing: 4-byte magic, 4-byte version, then `(id, size, contents)`
//! sections. Each section parser reads through a [`Reader`] that stamps
//! every error with its byte position. Custom sections are skipped;
//! unknown ids are an error. A parser that consumes less than the
//! declared section size leaves the remainder behind (the reader skips to
//! the declared end); consuming more is an error.

mod body;
mod reader;

use std::path::Path;

use log::debug;

use crate::error::{DecoderError, DecoderErrorKind};
use crate::runtime::module::{
    DataSegment, ElemSegment, Export, ExternalKind, Func, GlobalDef, Import, ImportKind, Module,
    TableType,
};
use crate::value::FuncType;
use body::{decode_body, decode_const_expr, BodyContext, DecodedBody};
use reader::Reader;

const WASM_MAGIC: u32 = 0x6D73_6100; // "\0asm" little-endian
const WASM_VERSION: u32 = 1;

/// Function type form byte.
const TYPE_FORM_FUNC: u8 = 0x60;
/// Table element type byte (funcref), the only MVP element type.
const ELEM_TYPE_FUNCREF: u8 = 0x70;

/// Guard against run-length local declarations ballooning allocation.
const MAX_LOCALS: u64 = 1_000_000;

// Section IDs per the WebAssembly 1.0 binary format.
const SEC_CUSTOM: u8 = 0;
const SEC_TYPE: u8 = 1;
const SEC_IMPORT: u8 = 2;
const SEC_FUNCTION: u8 = 3;
const SEC_TABLE: u8 = 4;
const SEC_MEMORY: u8 = 5;
const SEC_GLOBAL: u8 = 6;
const SEC_EXPORT: u8 = 7;
const SEC_START: u8 = 8;
const SEC_ELEMENT: u8 = 9;
const SEC_CODE: u8 = 10;
const SEC_DATA: u8 = 11;

/// Decoder entry points. Produces an immutable [`Module`] or a
/// [`DecoderError`] naming the failing byte.
pub struct Decoder;

impl Decoder {
    /// Read and decode a module from a file.
    pub fn parse(path: impl AsRef<Path>) -> Result<Module, DecoderError> {
        let bytes = std::fs::read(path.as_ref()).map_err(|e| DecoderError {
            offset: 0,
            kind: DecoderErrorKind::Io(format!(
                "failed to read {}: {e}",
                path.as_ref().display()
            )),
        })?;
        Self::parse_bytes(&bytes)
    }

    /// Decode a module from an in-memory buffer.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Module, DecoderError> {
        let mut r = Reader::new(bytes);

        let magic = r.u32_le()?;
        if magic != WASM_MAGIC {
            return Err(r.err(DecoderErrorKind::BadMagic));
        }
        let version = r.u32_le()?;
        if version != WASM_VERSION {
            return Err(r.err(DecoderErrorKind::UnsupportedVersion(version)));
        }

        let mut builder = ModuleBuilder::default();
        while r.has_more() {
            let id = r.byte()?;
            let size = r.var_u32()?;
            let start = r.pos();
            let end = start
                .checked_add(size as usize)
                .filter(|&end| end <= r.len())
                .ok_or_else(|| r.err(DecoderErrorKind::TruncatedInput))?;

            builder.parse_section(&mut r, id, end)?;

            if r.pos() > end {
                return Err(r.err(DecoderErrorKind::TruncatedInput));
            }
            r.skip_to(end);
        }

        builder.build(&r)
    }
}

/// Accumulates parsed sections, then validates cross-section invariants
/// in `build`.
#[derive(Default)]
struct ModuleBuilder {
    module: Module,
    /// Code-section entry count, checked against the function section.
    code_count: Option<u32>,
}

impl ModuleBuilder {
    fn parse_section(
        &mut self,
        r: &mut Reader<'_>,
        id: u8,
        end: usize,
    ) -> Result<(), DecoderError> {
        match id {
            SEC_CUSTOM => {
                // Custom sections (names, producers, ...) carry no
                // executable content.
                debug!("skipping custom section ({} bytes)", end - r.pos());
            }
            SEC_TYPE => self.parse_type_section(r)?,
            SEC_IMPORT => self.parse_import_section(r)?,
            SEC_FUNCTION => self.parse_function_section(r)?,
            SEC_TABLE => self.parse_table_section(r)?,
            SEC_MEMORY => self.parse_memory_section(r)?,
            SEC_GLOBAL => self.parse_global_section(r)?,
            SEC_EXPORT => self.parse_export_section(r)?,
            SEC_START => self.parse_start_section(r)?,
            SEC_ELEMENT => self.parse_element_section(r)?,
            SEC_CODE => self.parse_code_section(r)?,
            SEC_DATA => self.parse_data_section(r)?,
            _ => return Err(r.err(DecoderErrorKind::UnknownSection(id))),
        }
        Ok(())
    }

    fn parse_type_section(&mut self, r: &mut Reader<'_>) -> Result<(), DecoderError> {
        let count = r.var_u32()?;
        for _ in 0..count {
            let form = r.byte()?;
            if form != TYPE_FORM_FUNC {
                return Err(r.err(DecoderErrorKind::BadTypeForm(form)));
            }
            let mut ty = FuncType::default();
            let param_count = r.var_u32()?;
            for _ in 0..param_count {
                ty.params.push(r.concrete_value_type()?);
            }
            let result_count = r.var_u32()?;
            for _ in 0..result_count {
                ty.results.push(r.concrete_value_type()?);
            }
            self.module.types.push(ty);
        }
        debug!("type section: {} entries", count);
        Ok(())
    }

    fn parse_import_section(&mut self, r: &mut Reader<'_>) -> Result<(), DecoderError> {
        let count = r.var_u32()?;
        for _ in 0..count {
            let module = r.name()?;
            let field = r.name()?;
            let kind = match external_kind(r)? {
                ExternalKind::Func => {
                    let type_idx = r.var_u32()?;
                    self.check_type_index(r, type_idx)?;
                    self.module.func_types.push(type_idx);
                    self.module.num_func_imports += 1;
                    ImportKind::Func(type_idx)
                }
                ExternalKind::Table => {
                    let table = table_type(r)?;
                    self.module.tables.push(table);
                    ImportKind::Table(table)
                }
                ExternalKind::Memory => {
                    let limits = r.limits()?;
                    self.module.memories.push(limits);
                    ImportKind::Memory(limits)
                }
                ExternalKind::Global => {
                    let ty = r.concrete_value_type()?;
                    let mutable = r.byte()? != 0;
                    self.module.num_global_imports += 1;
                    ImportKind::Global { ty, mutable }
                }
            };
            self.module.imports.push(Import { module, field, kind });
        }
        debug!("import section: {} entries", count);
        Ok(())
    }

    fn parse_function_section(&mut self, r: &mut Reader<'_>) -> Result<(), DecoderError> {
        let count = r.var_u32()?;
        for _ in 0..count {
            let type_idx = r.var_u32()?;
            self.check_type_index(r, type_idx)?;
            self.module.func_types.push(type_idx);
        }
        Ok(())
    }

    fn parse_table_section(&mut self, r: &mut Reader<'_>) -> Result<(), DecoderError> {
        let count = r.var_u32()?;
        for _ in 0..count {
            let table = table_type(r)?;
            self.module.tables.push(table);
        }
        Ok(())
    }

    fn parse_memory_section(&mut self, r: &mut Reader<'_>) -> Result<(), DecoderError> {
        let count = r.var_u32()?;
        for _ in 0..count {
            let limits = r.limits()?;
            self.module.memories.push(limits);
        }
        Ok(())
    }

    fn parse_global_section(&mut self, r: &mut Reader<'_>) -> Result<(), DecoderError> {
        let count = r.var_u32()?;
        for _ in 0..count {
            let ty = r.concrete_value_type()?;
            let mutable = r.byte()? != 0;
            // Init expressions may reference previously declared globals
            // only; the limit below is the count seen so far.
            let visible = self.module.num_global_imports + self.module.globals.len() as u32;
            let init = decode_const_expr(r, visible)?;
            self.module.globals.push(GlobalDef { ty, mutable, init });
        }
        Ok(())
    }

    fn parse_export_section(&mut self, r: &mut Reader<'_>) -> Result<(), DecoderError> {
        let count = r.var_u32()?;
        for _ in 0..count {
            let name = r.name()?;
            let kind = external_kind(r)?;
            let index = r.var_u32()?;
            let limit = match kind {
                ExternalKind::Func => self.module.func_types.len() as u32,
                ExternalKind::Table => self.module.tables.len() as u32,
                ExternalKind::Memory => self.module.memories.len() as u32,
                ExternalKind::Global => {
                    self.module.num_global_imports + self.module.globals.len() as u32
                }
            };
            if index >= limit {
                return Err(r.err(DecoderErrorKind::OutOfRangeIndex {
                    space: "export",
                    index,
                    limit,
                }));
            }
            self.module.exports.push(Export { name, kind, index });
        }
        debug!("export section: {} entries", count);
        Ok(())
    }

    fn parse_start_section(&mut self, r: &mut Reader<'_>) -> Result<(), DecoderError> {
        let index = r.var_u32()?;
        let limit = self.module.func_types.len() as u32;
        if index >= limit {
            return Err(r.err(DecoderErrorKind::OutOfRangeIndex {
                space: "function",
                index,
                limit,
            }));
        }
        self.module.start = Some(index);
        Ok(())
    }

    fn parse_element_section(&mut self, r: &mut Reader<'_>) -> Result<(), DecoderError> {
        let count = r.var_u32()?;
        for _ in 0..count {
            let table_index = r.var_u32()?;
            let table_limit = self.module.tables.len() as u32;
            if table_index >= table_limit {
                return Err(r.err(DecoderErrorKind::OutOfRangeIndex {
                    space: "table",
                    index: table_index,
                    limit: table_limit,
                }));
            }
            let globals = self.module.num_global_imports + self.module.globals.len() as u32;
            let offset = decode_const_expr(r, globals)?;
            let elem_count = r.var_u32()?;
            let mut funcs = Vec::with_capacity(elem_count.min(1024) as usize);
            let func_limit = self.module.func_types.len() as u32;
            for _ in 0..elem_count {
                let func_idx = r.var_u32()?;
                if func_idx >= func_limit {
                    return Err(r.err(DecoderErrorKind::OutOfRangeIndex {
                        space: "function",
                        index: func_idx,
                        limit: func_limit,
                    }));
                }
                funcs.push(func_idx);
            }
            self.module.elements.push(ElemSegment { table_index, offset, funcs });
        }
        Ok(())
    }

    fn parse_code_section(&mut self, r: &mut Reader<'_>) -> Result<(), DecoderError> {
        let count = r.var_u32()?;
        let declared = self.module.func_types.len() as u32 - self.module.num_func_imports;
        if count != declared {
            return Err(r.err(DecoderErrorKind::CodeFunctionCountMismatch {
                code: count,
                funcs: declared,
            }));
        }
        self.code_count = Some(count);

        let ctx = BodyContext {
            num_types: self.module.types.len() as u32,
            num_funcs: self.module.func_types.len() as u32,
            num_globals: self.module.num_global_imports + self.module.globals.len() as u32,
        };

        for i in 0..count {
            let body_size = r.var_u32()?;
            let body_start = r.pos();
            let body_end = body_start
                .checked_add(body_size as usize)
                .filter(|&end| end <= r.len())
                .ok_or_else(|| r.err(DecoderErrorKind::TruncatedInput))?;

            // Locals: (count, type) runs, expanded flat.
            let mut locals = Vec::new();
            let decl_count = r.var_u32()?;
            let mut total: u64 = 0;
            for _ in 0..decl_count {
                let run = r.var_u32()?;
                let ty = r.concrete_value_type()?;
                total += run as u64;
                if total > MAX_LOCALS {
                    return Err(r.err(DecoderErrorKind::OutOfRangeIndex {
                        space: "local",
                        index: total.min(u32::MAX as u64) as u32,
                        limit: MAX_LOCALS as u32,
                    }));
                }
                locals.extend(std::iter::repeat(ty).take(run as usize));
            }

            let (body, bad_opcode) = match decode_body(r, body_end, &ctx)? {
                DecodedBody::Ops(ops) => (ops, None),
                DecodedBody::BadOpcode(byte) => (Vec::new(), Some(byte)),
            };
            let type_idx = self.module.func_types[(self.module.num_func_imports + i) as usize];
            self.module.funcs.push(Func { type_idx, locals, body, bad_opcode });
        }
        debug!("code section: {} bodies", count);
        Ok(())
    }

    fn parse_data_section(&mut self, r: &mut Reader<'_>) -> Result<(), DecoderError> {
        let count = r.var_u32()?;
        for _ in 0..count {
            let memory_index = r.var_u32()?;
            let mem_limit = self.module.memories.len() as u32;
            if memory_index >= mem_limit {
                return Err(r.err(DecoderErrorKind::OutOfRangeIndex {
                    space: "memory",
                    index: memory_index,
                    limit: mem_limit,
                }));
            }
            let globals = self.module.num_global_imports + self.module.globals.len() as u32;
            let offset = decode_const_expr(r, globals)?;
            let len = r.var_u32()?;
            let data = r.bytes_vec(len as usize)?;
            self.module.data_segments.push(DataSegment { memory_index, offset, data });
        }
        Ok(())
    }

    fn check_type_index(&self, r: &Reader<'_>, type_idx: u32) -> Result<(), DecoderError> {
        let limit = self.module.types.len() as u32;
        if type_idx >= limit {
            return Err(r.err(DecoderErrorKind::OutOfRangeIndex {
                space: "type",
                index: type_idx,
                limit,
            }));
        }
        Ok(())
    }

    fn build(self, r: &Reader<'_>) -> Result<Module, DecoderError> {
        // A function section with no matching code section (or vice
        // versa) is only detectable once all sections are in.
        let declared = self.module.func_types.len() as u32 - self.module.num_func_imports;
        let code = self.code_count.unwrap_or(0);
        if code != declared {
            return Err(DecoderError {
                offset: r.len(),
                kind: DecoderErrorKind::CodeFunctionCountMismatch { code, funcs: declared },
            });
        }
        debug!(
            "decoded module: {} types, {} functions ({} imported), {} exports",
            self.module.types.len(),
            self.module.func_types.len(),
            self.module.num_func_imports,
            self.module.exports.len()
        );
        Ok(self.module)
    }
}

fn external_kind(r: &mut Reader<'_>) -> Result<ExternalKind, DecoderError> {
    let byte = r.byte()?;
    match byte {
        0x00 => Ok(ExternalKind::Func),
        0x01 => Ok(ExternalKind::Table),
        0x02 => Ok(ExternalKind::Memory),
        0x03 => Ok(ExternalKind::Global),
        _ => Err(r.err(DecoderErrorKind::OutOfRangeIndex {
            space: "external kind",
            index: byte as u32,
            limit: 4,
        })),
    }
}

fn table_type(r: &mut Reader<'_>) -> Result<TableType, DecoderError> {
    let elem_type = r.byte()?;
    if elem_type != ELEM_TYPE_FUNCREF {
        return Err(r.err(DecoderErrorKind::BadTypeForm(elem_type)));
    }
    Ok(TableType { limits: r.limits()? })
}
