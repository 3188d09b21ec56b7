//! Mutable runtime state for an instantiated module.
//!
//! Instantiation order: resolve imports, build the memory, initialize
//! globals in declaration order, apply data segments, build and fill the
//! funcref table from element segments. The start function (if any) is
//! invoked by the interpreter once the store exists.

use log::debug;

use crate::error::{InterpreterError, RuntimeError, Trap};
use crate::memory::Memory;
use crate::runtime::host::{HostFunc, HostRegistry};
use crate::runtime::instruction::Instruction;
use crate::runtime::module::{ImportKind, Module};
use crate::value::Value;

/// Instance state: the single linear memory (if any), current global
/// values, the funcref table, and resolved host functions (one slot per
/// function import; `None` = unresolved, fails on invocation).
pub struct Store {
    pub(crate) memory: Option<Memory>,
    pub(crate) globals: Vec<Value>,
    pub(crate) globals_mutable: Vec<bool>,
    pub(crate) tables: Vec<Vec<Option<u32>>>,
    pub(crate) host_funcs: Vec<Option<HostFunc>>,
}

impl Store {
    pub(crate) fn instantiate(
        module: &Module,
        registry: &HostRegistry,
    ) -> Result<Self, RuntimeError> {
        // 1. Imports. Function imports resolve against the registry;
        // imported globals get typed zero placeholders; imported
        // memories/tables have no backing instance to share.
        let mut host_funcs = Vec::new();
        let mut globals = Vec::new();
        let mut globals_mutable = Vec::new();
        for import in &module.imports {
            match &import.kind {
                ImportKind::Func(type_idx) => {
                    let declared = module.types.get(*type_idx as usize);
                    let resolved = registry
                        .lookup(&import.module, &import.field)
                        .filter(|(sig, _)| Some(sig) == declared)
                        .map(|(_, f)| f.clone());
                    if resolved.is_some() {
                        debug!("resolved import {}::{}", import.module, import.field);
                    }
                    host_funcs.push(resolved);
                }
                ImportKind::Global { ty, mutable } => {
                    globals.push(Value::zero(*ty));
                    globals_mutable.push(*mutable);
                }
                ImportKind::Memory(_) | ImportKind::Table(_) => {
                    return Err(InterpreterError::UnsupportedImport {
                        module: import.module.clone(),
                        field: import.field.clone(),
                    }
                    .into());
                }
            }
        }

        // 2. Memory.
        let memory = match module.memories.first() {
            Some(limits) => Some(Memory::new(*limits)?),
            None => None,
        };
        let mut store = Store {
            memory,
            globals,
            globals_mutable,
            tables: Vec::new(),
            host_funcs,
        };

        // 3. Globals, in declaration order; inits may read previously
        // initialized globals via global.get.
        for def in &module.globals {
            let value = eval_const_expr(&def.init, &store.globals)?;
            store.globals.push(value);
            store.globals_mutable.push(def.mutable);
        }

        // 4. Data segments.
        for seg in &module.data_segments {
            let offset = eval_const_expr_u32(&seg.offset, &store.globals)?;
            let mem = store
                .memory
                .as_mut()
                .ok_or(InterpreterError::NoMemory)?;
            mem.initialize(offset, &seg.data)?;
        }

        // 5. Tables, then element segments. A segment that does not fit
        // its table makes the instance unusable, so it traps here.
        for table in &module.tables {
            store.tables.push(vec![None; table.limits.min as usize]);
        }
        for seg in &module.elements {
            let offset = eval_const_expr_u32(&seg.offset, &store.globals)? as usize;
            let table = store
                .tables
                .get_mut(seg.table_index as usize)
                .ok_or(Trap::UndefinedElement)?;
            let end = offset
                .checked_add(seg.funcs.len())
                .ok_or(Trap::UndefinedElement)?;
            if end > table.len() {
                return Err(Trap::UndefinedElement.into());
            }
            for (i, &func_idx) in seg.funcs.iter().enumerate() {
                table[offset + i] = Some(func_idx);
            }
        }

        debug!(
            "instantiated: memory={} pages, {} globals, {} table entries",
            store.memory.as_ref().map_or(0, Memory::size_pages),
            store.globals.len(),
            store.tables.first().map_or(0, Vec::len),
        );
        Ok(store)
    }
}

/// Evaluate a decoded constant expression. The decoder restricts these
/// to the four `*.const` ops plus `global.get`; the final top-of-stack
/// value is the result.
pub(crate) fn eval_const_expr(
    ops: &[Instruction],
    globals: &[Value],
) -> Result<Value, RuntimeError> {
    let mut stack: Vec<Value> = Vec::new();
    for op in ops {
        match op {
            Instruction::I32Const(v) => stack.push(Value::I32(*v)),
            Instruction::I64Const(v) => stack.push(Value::I64(*v)),
            Instruction::F32Const(v) => stack.push(Value::F32(*v)),
            Instruction::F64Const(v) => stack.push(Value::F64(*v)),
            Instruction::GlobalGet(idx) => {
                let value = globals
                    .get(*idx as usize)
                    .copied()
                    .ok_or(InterpreterError::GlobalOutOfBounds(*idx))?;
                stack.push(value);
            }
            _ => return Err(InterpreterError::BadInitExpression.into()),
        }
    }
    stack.pop().ok_or_else(|| InterpreterError::BadInitExpression.into())
}

/// Evaluate a constant expression that must produce an i32 offset.
fn eval_const_expr_u32(ops: &[Instruction], globals: &[Value]) -> Result<u32, RuntimeError> {
    match eval_const_expr(ops, globals)? {
        Value::I32(v) => Ok(v as u32),
        _ => Err(InterpreterError::BadInitExpression.into()),
    }
}
