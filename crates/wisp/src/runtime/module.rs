//! The decoded module — types, functions, memories, segments, exports.
//! This is the immutable "code" side. Instance state lives in `Store`.

use crate::runtime::instruction::Instruction;
use crate::value::{FuncType, Limits, ValueType};

/// An immutable WebAssembly module, produced by the decoder. Imported
/// items occupy the low end of each index space.
#[derive(Debug, Default)]
pub struct Module {
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    /// `func_types[i]` = index into `self.types` for function `i`,
    /// including imports (imports come first).
    pub func_types: Vec<u32>,
    /// Locally defined functions; function index space offset by
    /// `num_func_imports`.
    pub funcs: Vec<Func>,
    pub tables: Vec<TableType>,
    pub memories: Vec<Limits>,
    /// Locally defined globals; the global index space additionally
    /// includes `num_global_imports` imported slots before these.
    pub globals: Vec<GlobalDef>,
    pub exports: Vec<Export>,
    pub data_segments: Vec<DataSegment>,
    pub elements: Vec<ElemSegment>,
    pub start: Option<u32>,
    pub num_func_imports: u32,
    pub num_global_imports: u32,
}

#[derive(Debug, Clone)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub kind: ImportKind,
}

#[derive(Debug, Clone)]
pub enum ImportKind {
    /// Type index of the imported function.
    Func(u32),
    Table(TableType),
    Memory(Limits),
    Global { ty: ValueType, mutable: bool },
}

#[derive(Debug, Clone, Copy)]
pub struct TableType {
    /// Element type is always funcref in MVP; only the limits vary.
    pub limits: Limits,
}

#[derive(Debug)]
pub struct Func {
    pub type_idx: u32,
    /// Declared (non-parameter) locals, expanded from the run-length
    /// encoding of the code section.
    pub locals: Vec<ValueType>,
    pub body: Vec<Instruction>,
    /// Set when the body contains a byte outside the MVP opcode set.
    /// The body is empty then, and invoking the function reports the
    /// byte as a runtime error.
    pub bad_opcode: Option<u8>,
}

#[derive(Debug)]
pub struct GlobalDef {
    pub ty: ValueType,
    pub mutable: bool,
    pub init: Vec<Instruction>,
}

#[derive(Debug, Clone)]
pub struct Export {
    pub name: String,
    pub kind: ExternalKind,
    pub index: u32,
}

/// Export/import kind, binary `0x00..0x03`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalKind {
    Func,
    Table,
    Memory,
    Global,
}

#[derive(Debug)]
pub struct DataSegment {
    pub memory_index: u32,
    pub offset: Vec<Instruction>,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct ElemSegment {
    pub table_index: u32,
    pub offset: Vec<Instruction>,
    pub funcs: Vec<u32>,
}

impl Module {
    /// Total function count across imports and local definitions.
    pub fn total_funcs(&self) -> u32 {
        self.num_func_imports + self.funcs.len() as u32
    }

    /// Total global count across imports and local definitions.
    pub fn total_globals(&self) -> u32 {
        self.num_global_imports + self.globals.len() as u32
    }

    /// Whether a function index refers to an import.
    pub fn is_import(&self, func_idx: u32) -> bool {
        func_idx < self.num_func_imports
    }

    /// Get a local function by its index in the shared function index
    /// space. `None` for imports and invalid indices.
    pub fn get_func(&self, func_idx: u32) -> Option<&Func> {
        if func_idx < self.num_func_imports {
            None
        } else {
            self.funcs.get((func_idx - self.num_func_imports) as usize)
        }
    }

    /// Signature of any function — imported or local.
    pub fn func_type(&self, func_idx: u32) -> Option<&FuncType> {
        let type_idx = *self.func_types.get(func_idx as usize)?;
        self.types.get(type_idx as usize)
    }

    /// The `idx`-th function import's (module, field) names.
    pub(crate) fn func_import_names(&self, func_idx: u32) -> Option<(&str, &str)> {
        self.imports
            .iter()
            .filter(|i| matches!(i.kind, ImportKind::Func(_)))
            .nth(func_idx as usize)
            .map(|i| (i.module.as_str(), i.field.as_str()))
    }

    pub fn find_export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|e| e.name == name)
    }
}
