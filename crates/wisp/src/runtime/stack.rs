//! The typed operand stack.
//!
//! There is no separate validation pass, so every pop checks the tag the
//! opcode requires; a mismatch surfaces as `StackError::TypeMismatch`
//! instead of misinterpreted bits. Frame locals live on the same stack
//! (between a frame's `locals_start` and its base), so slot accessors are
//! provided alongside push/pop.

use crate::error::StackError;
use crate::value::{Value, ValueType};

pub(crate) struct OperandStack {
    values: Vec<Value>,
}

impl OperandStack {
    pub(crate) fn new() -> Self {
        OperandStack { values: Vec::with_capacity(256) }
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn push(&mut self, v: Value) {
        self.values.push(v);
    }

    pub(crate) fn push_i32(&mut self, v: i32) {
        self.values.push(Value::I32(v));
    }

    pub(crate) fn push_i64(&mut self, v: i64) {
        self.values.push(Value::I64(v));
    }

    pub(crate) fn push_f32(&mut self, v: f32) {
        self.values.push(Value::F32(v));
    }

    pub(crate) fn push_f64(&mut self, v: f64) {
        self.values.push(Value::F64(v));
    }

    pub(crate) fn pop(&mut self) -> Result<Value, StackError> {
        self.values.pop().ok_or(StackError::Underflow)
    }

    pub(crate) fn pop_i32(&mut self) -> Result<i32, StackError> {
        match self.pop()? {
            Value::I32(v) => Ok(v),
            other => Err(self.mismatch(ValueType::I32, other)),
        }
    }

    pub(crate) fn pop_i64(&mut self) -> Result<i64, StackError> {
        match self.pop()? {
            Value::I64(v) => Ok(v),
            other => Err(self.mismatch(ValueType::I64, other)),
        }
    }

    pub(crate) fn pop_f32(&mut self) -> Result<f32, StackError> {
        match self.pop()? {
            Value::F32(v) => Ok(v),
            other => Err(self.mismatch(ValueType::F32, other)),
        }
    }

    pub(crate) fn pop_f64(&mut self) -> Result<f64, StackError> {
        match self.pop()? {
            Value::F64(v) => Ok(v),
            other => Err(self.mismatch(ValueType::F64, other)),
        }
    }

    /// Pop a value that must carry the given tag (typed results, args).
    pub(crate) fn pop_typed(&mut self, expected: ValueType) -> Result<Value, StackError> {
        let v = self.pop()?;
        if v.ty() != expected {
            return Err(self.mismatch(expected, v));
        }
        Ok(v)
    }

    /// Restore the popped value so the stack is left as found, then
    /// report the mismatch.
    fn mismatch(&mut self, expected: ValueType, found: Value) -> StackError {
        self.values.push(found);
        StackError::TypeMismatch { expected, found: found.ty() }
    }

    pub(crate) fn peek(&self) -> Result<Value, StackError> {
        self.values.last().copied().ok_or(StackError::Underflow)
    }

    /// Direct slot access for frame locals.
    pub(crate) fn get(&self, idx: usize) -> Value {
        self.values[idx]
    }

    pub(crate) fn set(&mut self, idx: usize, v: Value) {
        self.values[idx] = v;
    }

    /// Truncate to `height`, preserving the top `arity` values — the
    /// branch/return primitive. In-place copy, no allocation.
    pub(crate) fn unwind(&mut self, height: usize, arity: usize) -> Result<(), StackError> {
        if self.values.len() < height + arity {
            return Err(StackError::Underflow);
        }
        if arity == 0 {
            self.values.truncate(height);
        } else if self.values.len() - arity > height {
            let src = self.values.len() - arity;
            self.values.copy_within(src.., height);
            self.values.truncate(height + arity);
        }
        Ok(())
    }

    /// Move results down over a frame's locals area on return.
    pub(crate) fn collapse_frame(&mut self, locals_start: usize, arity: usize) {
        let results_start = self.values.len() - arity;
        if arity > 0 && results_start > locals_start {
            self.values.copy_within(results_start.., locals_start);
        }
        self.values.truncate(locals_start + arity);
    }

    /// Pop the top `n` values, preserving their order.
    pub(crate) fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, StackError> {
        if self.values.len() < n {
            return Err(StackError::Underflow);
        }
        Ok(self.values.split_off(self.values.len() - n))
    }
}
