//! A WebAssembly MVP 1.0 interpreter.
//!
//! `Decoder` parses a binary module into an immutable [`Module`];
//! `Interpreter` instantiates it and invokes exported functions:
//!
//! ```no_run
//! use wisp::{Decoder, Interpreter, Value};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let module = Decoder::parse("module.wasm")?;
//! let mut interp = Interpreter::new();
//! interp.instantiate(module)?;
//! let results = interp.call("add", &[Value::I32(7), Value::I32(35)])?;
//! assert_eq!(results, vec![Value::I32(42)]);
//! # Ok(())
//! # }
//! ```

mod error;
mod memory;
mod parse;
mod runtime;
mod value;

pub use error::{
    DecoderError, DecoderErrorKind, InterpreterError, MemoryError, RuntimeError, StackError, Trap,
};
pub use memory::{Memory, MAX_PAGES, PAGE_SIZE};
pub use parse::Decoder;
pub use runtime::host::{HostFunc, HostRegistry};
pub use runtime::interpreter::Interpreter;
pub use runtime::module::{Export, ExternalKind, Module};
pub use value::{FuncType, Limits, Value, ValueType};
