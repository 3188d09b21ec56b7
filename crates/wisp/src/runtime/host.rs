//! Host functions.
//!
//! Instantiation resolves each function import against a registry keyed
//! by `(module, field)`. The only built-in is
//! `wasi_snapshot_preview1.fd_write`; embedders may register more before
//! instantiating. An import with no matching entry (or a mismatched
//! signature) is tolerated — it fails when first invoked.

use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use log::trace;

use crate::error::{InterpreterError, RuntimeError, StackError};
use crate::memory::Memory;
use crate::value::{FuncType, Value, ValueType};

/// A host-provided function. Receives the call arguments in order and
/// the instance's linear memory (if any); returns the result values.
pub type HostFunc = Rc<dyn Fn(&[Value], &mut Option<Memory>) -> Result<Vec<Value>, RuntimeError>>;

/// `(module, field) → (signature, callable)`.
pub struct HostRegistry {
    funcs: HashMap<(String, String), (FuncType, HostFunc)>,
}

impl HostRegistry {
    /// An empty registry, recognizing no imports.
    pub fn new() -> Self {
        HostRegistry { funcs: HashMap::new() }
    }

    /// The default registry: WASI `fd_write` only.
    pub fn with_wasi() -> Self {
        let mut registry = Self::new();
        registry.register(
            "wasi_snapshot_preview1",
            "fd_write",
            FuncType {
                params: vec![ValueType::I32; 4],
                results: vec![ValueType::I32],
            },
            fd_write,
        );
        registry
    }

    pub fn register(
        &mut self,
        module: &str,
        field: &str,
        signature: FuncType,
        f: impl Fn(&[Value], &mut Option<Memory>) -> Result<Vec<Value>, RuntimeError> + 'static,
    ) {
        self.funcs
            .insert((module.to_string(), field.to_string()), (signature, Rc::new(f)));
    }

    pub(crate) fn lookup(&self, module: &str, field: &str) -> Option<&(FuncType, HostFunc)> {
        self.funcs.get(&(module.to_string(), field.to_string()))
    }
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::with_wasi()
    }
}

fn arg_i32(args: &[Value], idx: usize) -> Result<i32, RuntimeError> {
    match args.get(idx) {
        Some(Value::I32(v)) => Ok(*v),
        Some(other) => Err(StackError::TypeMismatch {
            expected: ValueType::I32,
            found: other.ty(),
        }
        .into()),
        None => Err(StackError::Underflow.into()),
    }
}

/// WASI `fd_write(fd, iovs_ptr, iovs_len, nwritten_ptr) → errno`.
///
/// Walks `iovs_len` 8-byte iovecs at `iovs_ptr` (u32 buf pointer, u32
/// buf length), writes each buffer to stdout (fd 1) or stderr (fd 2),
/// ignores other fds, stores the byte total at `nwritten_ptr` and
/// returns 0. Every memory access is bounds-checked like any other.
fn fd_write(args: &[Value], memory: &mut Option<Memory>) -> Result<Vec<Value>, RuntimeError> {
    let mem = memory.as_mut().ok_or(InterpreterError::NoMemory)?;

    let fd = arg_i32(args, 0)?;
    let iovs_ptr = arg_i32(args, 1)? as u32;
    let iovs_len = arg_i32(args, 2)? as u32;
    let nwritten_ptr = arg_i32(args, 3)? as u32;

    trace!("fd_write fd={fd} iovs={iovs_ptr:#x}+{iovs_len}");

    let mut total: u32 = 0;
    for i in 0..iovs_len as u64 {
        let iovec_addr = iovs_ptr as u64 + i * 8;
        let buf_ptr = u32::from_le_bytes(mem.load::<4>(iovec_addr)?);
        let buf_len = u32::from_le_bytes(mem.load::<4>(iovec_addr + 4)?);
        let bytes = mem.slice(buf_ptr as u64, buf_len as u64)?;

        match fd {
            1 => {
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                let _ = out.write_all(bytes);
            }
            2 => {
                let stderr = std::io::stderr();
                let mut out = stderr.lock();
                let _ = out.write_all(bytes);
            }
            _ => {}
        }
        total = total.wrapping_add(buf_len);
    }

    match fd {
        1 => {
            let _ = std::io::stdout().flush();
        }
        2 => {
            let _ = std::io::stderr().flush();
        }
        _ => {}
    }

    mem.store(nwritten_ptr as u64, &total.to_le_bytes())?;
    Ok(vec![Value::I32(0)])
}
