//! The embedding facade: `decode → instantiate → invoke`.

use log::debug;

use crate::error::{InterpreterError, RuntimeError};
use crate::runtime::exec;
use crate::runtime::host::HostRegistry;
use crate::runtime::module::Module;
use crate::runtime::store::Store;
use crate::value::Value;

/// Owns a decoded [`Module`] and its runtime [`Store`] once
/// instantiated. One interpreter runs one function at a time; after a
/// trap it remains usable for fresh invocations (memory and globals keep
/// their trap-time contents, the operand stack is rebuilt per call).
pub struct Interpreter {
    module: Option<Module>,
    store: Option<Store>,
    host: HostRegistry,
}

impl Interpreter {
    /// An interpreter with the default host registry (WASI `fd_write`).
    pub fn new() -> Self {
        Self::with_registry(HostRegistry::with_wasi())
    }

    /// An interpreter with a caller-provided host registry.
    pub fn with_registry(host: HostRegistry) -> Self {
        Interpreter { module: None, store: None, host }
    }

    /// Access the registry to add host functions before instantiation.
    pub fn host_registry_mut(&mut self) -> &mut HostRegistry {
        &mut self.host
    }

    /// Instantiate a module: materialize memory, globals, data and
    /// element segments, then run the start function if one is declared.
    /// Replaces any previously instantiated module.
    pub fn instantiate(&mut self, module: Module) -> Result<(), RuntimeError> {
        let store = Store::instantiate(&module, &self.host)?;
        let start = module.start;
        self.module = Some(module);
        self.store = Some(store);
        if let Some(start) = start {
            debug!("running start function {start}");
            self.call_function(start, &[])?;
        }
        Ok(())
    }

    /// Call an exported function by name.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
        let module = self.module.as_ref().ok_or(InterpreterError::NoModule)?;
        let store = self.store.as_mut().ok_or(InterpreterError::NoModule)?;
        exec::invoke(module, store, name, args)
    }

    /// Call a function by index in the shared function index space
    /// (imports first).
    pub fn call_function(&mut self, func_idx: u32, args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
        let module = self.module.as_ref().ok_or(InterpreterError::NoModule)?;
        let store = self.store.as_mut().ok_or(InterpreterError::NoModule)?;
        if func_idx >= module.total_funcs() {
            return Err(InterpreterError::FunctionIndexOutOfBounds(func_idx).into());
        }
        exec::call(module, store, func_idx, args)
    }

    /// The instantiated module, if any.
    pub fn module(&self) -> Option<&Module> {
        self.module.as_ref()
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}
