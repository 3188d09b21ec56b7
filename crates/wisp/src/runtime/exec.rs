//! The dispatch loop.
//!
//! One shared operand stack carries every frame's locals and operands;
//! a `Frame` records where its locals start and where its labels begin.
//! Calls push the caller's frame and continue in the same loop — there
//! is no Rust-level recursion, so the 1024-frame limit is the only
//! depth bound.

use crate::error::{InterpreterError, RuntimeError, StackError, Trap};
use crate::memory::Memory;
use crate::runtime::instruction::Instruction;
use crate::runtime::module::{Func, Module};
use crate::runtime::stack::OperandStack;
use crate::runtime::store::Store;
use crate::value::{FuncType, Value};

const MAX_CALL_DEPTH: usize = 1024;

struct Frame<'m> {
    pc: usize,
    /// Index into the shared stack where this frame's locals begin.
    locals_start: usize,
    /// Stack height at frame entry, after locals are allocated.
    stack_height: usize,
    /// Index into the shared label stack where this frame's labels begin.
    labels_start: usize,
    arity: usize,
    body: &'m [Instruction],
}

impl Frame<'_> {
    fn locals_len(&self) -> usize {
        self.stack_height - self.locals_start
    }
}

/// A control-flow target: where a branch lands, the stack height to
/// unwind to, how many values flow, and whether re-entering a loop.
struct Label {
    target: usize,
    stack_height: usize,
    arity: usize,
    is_loop: bool,
}

// --- Operand helpers -------------------------------------------------------

macro_rules! binop_i32 {
    ($stack:expr, $op:expr) => {{
        let b = $stack.pop_i32()?;
        let a = $stack.pop_i32()?;
        $stack.push_i32($op(a, b));
    }};
}

macro_rules! binop_i64 {
    ($stack:expr, $op:expr) => {{
        let b = $stack.pop_i64()?;
        let a = $stack.pop_i64()?;
        $stack.push_i64($op(a, b));
    }};
}

macro_rules! binop_f32 {
    ($stack:expr, $op:expr) => {{
        let b = $stack.pop_f32()?;
        let a = $stack.pop_f32()?;
        $stack.push_f32($op(a, b));
    }};
}

macro_rules! binop_f64 {
    ($stack:expr, $op:expr) => {{
        let b = $stack.pop_f64()?;
        let a = $stack.pop_f64()?;
        $stack.push_f64($op(a, b));
    }};
}

macro_rules! unop_i32 {
    ($stack:expr, $op:expr) => {{
        let a = $stack.pop_i32()?;
        $stack.push_i32($op(a));
    }};
}

macro_rules! unop_i64 {
    ($stack:expr, $op:expr) => {{
        let a = $stack.pop_i64()?;
        $stack.push_i64($op(a));
    }};
}

macro_rules! unop_f32 {
    ($stack:expr, $op:expr) => {{
        let a = $stack.pop_f32()?;
        $stack.push_f32($op(a));
    }};
}

macro_rules! unop_f64 {
    ($stack:expr, $op:expr) => {{
        let a = $stack.pop_f64()?;
        $stack.push_f64($op(a));
    }};
}

macro_rules! cmpop_i32 {
    ($stack:expr, $op:expr) => {{
        let b = $stack.pop_i32()?;
        let a = $stack.pop_i32()?;
        $stack.push_i32(if $op(a, b) { 1 } else { 0 });
    }};
}

macro_rules! cmpop_i64 {
    ($stack:expr, $op:expr) => {{
        let b = $stack.pop_i64()?;
        let a = $stack.pop_i64()?;
        $stack.push_i32(if $op(a, b) { 1 } else { 0 });
    }};
}

macro_rules! cmpop_f32 {
    ($stack:expr, $op:expr) => {{
        let b = $stack.pop_f32()?;
        let a = $stack.pop_f32()?;
        $stack.push_i32(if $op(a, b) { 1 } else { 0 });
    }};
}

macro_rules! cmpop_f64 {
    ($stack:expr, $op:expr) => {{
        let b = $stack.pop_f64()?;
        let a = $stack.pop_f64()?;
        $stack.push_i32(if $op(a, b) { 1 } else { 0 });
    }};
}

macro_rules! mem_load {
    ($stack:expr, $store:expr, $offset:expr, $N:literal, $conv:expr) => {{
        let base = $stack.pop_i32()? as u32;
        let addr = effective_address(base, $offset)?;
        let mem = memory_ref($store)?;
        let bytes = mem.load::<$N>(addr)?;
        $stack.push($conv(bytes));
    }};
}

macro_rules! mem_store {
    ($stack:expr, $store:expr, $offset:expr, $pop:ident, $conv:expr) => {{
        let val = $stack.$pop()?;
        let base = $stack.pop_i32()? as u32;
        let addr = effective_address(base, $offset)?;
        let mem = memory_mut($store)?;
        mem.store(addr, &$conv(val))?;
    }};
}

/// Trapping float → int truncation: NaN and ±∞ trap, as does any value
/// whose truncation falls outside the destination range.
macro_rules! trunc_op {
    ($stack:expr, $pop:ident, $push:ident, $int_ty:ty, $max:expr, $min:expr) => {{
        let a = $stack.$pop()?;
        if a.is_nan() {
            return Err(Trap::InvalidConversionToInteger.into());
        }
        if a.is_infinite() {
            return Err(Trap::IntegerOverflow.into());
        }
        let t = a.trunc();
        if t >= $max || t < $min {
            return Err(Trap::IntegerOverflow.into());
        }
        $stack.$push(t as $int_ty);
    }};
}

macro_rules! trunc_op_u {
    ($stack:expr, $pop:ident, $push:ident, $uint_ty:ty, $int_ty:ty, $max:expr) => {{
        let a = $stack.$pop()?;
        if a.is_nan() {
            return Err(Trap::InvalidConversionToInteger.into());
        }
        if a.is_infinite() {
            return Err(Trap::IntegerOverflow.into());
        }
        let t = a.trunc();
        if t >= $max || t < 0.0 {
            return Err(Trap::IntegerOverflow.into());
        }
        $stack.$push(t as $uint_ty as $int_ty);
    }};
}

// --- Float semantics -------------------------------------------------------

/// Generates the float helpers for one width.
///
/// `min`/`max` follow fmin/fmax: a single NaN operand loses, and the
/// zeros are ordered -0 below +0. Operands that compare equal can only
/// differ in their sign bit, so the zero rule folds into the equality
/// tie-break. `nearest` rounds half-way cases to the even neighbor.
macro_rules! float_helpers {
    ($min:ident, $max:ident, $nearest:ident, $ty:ty) => {
        fn $min(a: $ty, b: $ty) -> $ty {
            if a.is_nan() {
                return b;
            }
            if b.is_nan() {
                return a;
            }
            if a == b {
                // +0 == -0 compares equal; take the negative one.
                return if a.is_sign_negative() { a } else { b };
            }
            if a < b { a } else { b }
        }

        fn $max(a: $ty, b: $ty) -> $ty {
            if a.is_nan() {
                return b;
            }
            if b.is_nan() {
                return a;
            }
            if a == b {
                return if a.is_sign_negative() { b } else { a };
            }
            if a > b { a } else { b }
        }

        /// `round()` breaks ties away from zero; pull those back to the
        /// even neighbor. A result of zero keeps the input's sign.
        fn $nearest(x: $ty) -> $ty {
            let mut r = x.round();
            if (x - r).abs() == 0.5 && r % 2.0 != 0.0 {
                r -= x.signum();
            }
            if r == 0.0 { r.copysign(x) } else { r }
        }
    };
}

float_helpers!(f32_min, f32_max, f32_nearest, f32);
float_helpers!(f64_min, f64_max, f64_nearest, f64);

// --- Memory helpers --------------------------------------------------------

/// `base + static_offset` widened to u64; a sum that does not fit in u32
/// traps before the bounds check ever runs.
fn effective_address(base: u32, offset: u32) -> Result<u64, RuntimeError> {
    let addr = base as u64 + offset as u64;
    if addr > u32::MAX as u64 {
        return Err(Trap::AddressOverflow.into());
    }
    Ok(addr)
}

fn memory_ref(store: &Store) -> Result<&Memory, RuntimeError> {
    store
        .memory
        .as_ref()
        .ok_or_else(|| InterpreterError::NoMemory.into())
}

fn memory_mut(store: &mut Store) -> Result<&mut Memory, RuntimeError> {
    store
        .memory
        .as_mut()
        .ok_or_else(|| InterpreterError::NoMemory.into())
}

// --- Frames ----------------------------------------------------------------

/// Look up a function's signature, which decode guarantees exists.
fn signature<'m>(module: &'m Module, func_idx: u32) -> Result<&'m FuncType, RuntimeError> {
    module
        .func_type(func_idx)
        .ok_or_else(|| InterpreterError::FunctionIndexOutOfBounds(func_idx).into())
}

fn local_func<'m>(module: &'m Module, func_idx: u32) -> Result<&'m Func, RuntimeError> {
    module
        .get_func(func_idx)
        .ok_or_else(|| InterpreterError::FunctionIndexOutOfBounds(func_idx).into())
}

/// Build a callee frame. The callee's parameters are the top
/// `param_count` stack values (pushed by the caller); declared locals
/// are zero-initialized on top of them, and the frame's base label is
/// pushed.
fn push_frame<'m>(
    module: &'m Module,
    func_idx: u32,
    stack: &mut OperandStack,
    labels: &mut Vec<Label>,
) -> Result<Frame<'m>, RuntimeError> {
    let func = local_func(module, func_idx)?;
    if let Some(byte) = func.bad_opcode {
        return Err(InterpreterError::InvalidOpcode(byte).into());
    }
    let ty = signature(module, func_idx)?;
    let param_count = ty.params.len();
    if stack.len() < param_count {
        return Err(StackError::Underflow.into());
    }
    let locals_start = stack.len() - param_count;
    for &local_ty in &func.locals {
        stack.push(Value::zero(local_ty));
    }
    let stack_height = stack.len();
    let labels_start = labels.len();
    let arity = ty.results.len();
    labels.push(Label {
        target: func.body.len().saturating_sub(1),
        stack_height,
        arity,
        is_loop: false,
    });
    Ok(Frame {
        pc: 0,
        locals_start,
        stack_height,
        labels_start,
        arity,
        body: &func.body,
    })
}

/// Unwind the returning frame: keep `arity` results, collapse them over
/// the locals area, drop the frame's labels.
fn do_return(
    frame: &Frame<'_>,
    stack: &mut OperandStack,
    labels: &mut Vec<Label>,
) -> Result<(), RuntimeError> {
    stack.unwind(frame.stack_height, frame.arity)?;
    stack.collapse_frame(frame.locals_start, frame.arity);
    labels.truncate(frame.labels_start);
    Ok(())
}

/// Branch to relative depth `depth`: unwind to the target label's entry
/// height keeping its arity, jump, and drop inner labels (a loop target
/// label survives — the loop has been re-entered).
fn do_br(
    frame: &mut Frame<'_>,
    stack: &mut OperandStack,
    labels: &mut [Label],
    depth: u32,
) -> Result<usize, RuntimeError> {
    let label_idx = labels
        .len()
        .checked_sub(1 + depth as usize)
        .filter(|&idx| idx >= frame.labels_start)
        .ok_or(InterpreterError::LabelOutOfBounds(depth))?;
    let label = &labels[label_idx];

    stack.unwind(label.stack_height, label.arity)?;
    frame.pc = label.target + 1;
    Ok(if label.is_loop { label_idx + 1 } else { label_idx })
}

/// Pop a host call's arguments, run it, push its results.
fn call_host(
    module: &Module,
    store: &mut Store,
    func_idx: u32,
    stack: &mut OperandStack,
) -> Result<(), RuntimeError> {
    let ty = signature(module, func_idx)?;
    let args = stack.pop_n(ty.params.len())?;
    let results = invoke_host(module, store, func_idx, &args)?;
    for v in results {
        stack.push(v);
    }
    Ok(())
}

/// Resolve and run a host function with already-popped arguments.
fn invoke_host(
    module: &Module,
    store: &mut Store,
    func_idx: u32,
    args: &[Value],
) -> Result<Vec<Value>, RuntimeError> {
    let unresolved = || {
        let (m, f) = module
            .func_import_names(func_idx)
            .unwrap_or(("?", "?"));
        RuntimeError::Interpreter(InterpreterError::UnresolvedImport {
            module: m.to_string(),
            field: f.to_string(),
        })
    };
    // Split borrow: the closure gets the memory while we hold the
    // host-function slot.
    let Store { host_funcs, memory, .. } = store;
    let host = host_funcs
        .get(func_idx as usize)
        .and_then(|slot| slot.clone())
        .ok_or_else(unresolved)?;
    host(args, memory)
}

// --- Entry points ----------------------------------------------------------

/// Call an exported function by name.
pub(crate) fn invoke(
    module: &Module,
    store: &mut Store,
    name: &str,
    args: &[Value],
) -> Result<Vec<Value>, RuntimeError> {
    let export = module
        .find_export(name)
        .ok_or_else(|| InterpreterError::ExportNotFound(name.to_string()))?;
    if export.kind != crate::runtime::module::ExternalKind::Func {
        return Err(InterpreterError::ExportKindMismatch(name.to_string()).into());
    }
    call(module, store, export.index, args)
}

/// Call a function by index: push the arguments, run the dispatch loop
/// to completion, pop the declared results.
pub(crate) fn call(
    module: &Module,
    store: &mut Store,
    func_idx: u32,
    args: &[Value],
) -> Result<Vec<Value>, RuntimeError> {
    let ty = signature(module, func_idx)?;
    if args.len() != ty.params.len() {
        return Err(InterpreterError::ArgumentCountMismatch {
            expected: ty.params.len(),
            given: args.len(),
        }
        .into());
    }
    let result_types = ty.results.clone();

    // An imported function invoked from the embedder runs directly.
    if module.is_import(func_idx) {
        return invoke_host(module, store, func_idx, args);
    }

    let mut stack = OperandStack::new();
    let mut labels: Vec<Label> = Vec::with_capacity(64);
    let mut call_stack: Vec<Frame<'_>> = Vec::with_capacity(64);

    for &arg in args {
        stack.push(arg);
    }
    let mut frame = push_frame(module, func_idx, &mut stack, &mut labels)?;

    loop {
        if frame.pc >= frame.body.len() {
            do_return(&frame, &mut stack, &mut labels)?;
            match call_stack.pop() {
                Some(caller) => {
                    frame = caller;
                    continue;
                }
                None => {
                    let mut results = Vec::with_capacity(result_types.len());
                    for &ty in result_types.iter().rev() {
                        results.push(stack.pop_typed(ty)?);
                    }
                    results.reverse();
                    return Ok(results);
                }
            }
        }

        let body = frame.body;
        let instr = &body[frame.pc];
        frame.pc += 1;

        match instr {
            Instruction::Unreachable => return Err(Trap::Unreachable.into()),
            Instruction::Nop => {}

            // --- Control flow ---
            Instruction::Block { ty, end_pc } => {
                labels.push(Label {
                    target: *end_pc,
                    stack_height: stack.len(),
                    arity: ty.arity(),
                    is_loop: false,
                });
            }
            Instruction::Loop { .. } => {
                // Branching to a loop re-enters at its start with no
                // results, so the label arity is always 0.
                labels.push(Label {
                    target: frame.pc - 1,
                    stack_height: stack.len(),
                    arity: 0,
                    is_loop: true,
                });
            }
            Instruction::If { ty, end_pc, else_pc } => {
                let cond = stack.pop_i32()?;
                labels.push(Label {
                    target: *end_pc,
                    stack_height: stack.len(),
                    arity: ty.arity(),
                    is_loop: false,
                });
                if cond == 0 {
                    match else_pc {
                        Some(else_pc) => frame.pc = else_pc + 1,
                        None => {
                            frame.pc = end_pc + 1;
                            labels.pop();
                        }
                    }
                }
            }
            Instruction::Else => {
                // The then-branch ran to its `else`: skip the
                // else-branch entirely.
                let label = labels.last().ok_or(InterpreterError::LabelOutOfBounds(0))?;
                frame.pc = label.target + 1;
                labels.pop();
            }
            Instruction::End => {
                if labels.len() > frame.labels_start + 1 {
                    labels.pop();
                }
            }
            Instruction::Br(depth) => {
                let keep = do_br(&mut frame, &mut stack, &mut labels, *depth)?;
                labels.truncate(keep);
            }
            Instruction::BrIf(depth) => {
                let cond = stack.pop_i32()?;
                if cond != 0 {
                    let keep = do_br(&mut frame, &mut stack, &mut labels, *depth)?;
                    labels.truncate(keep);
                }
            }
            Instruction::BrTable { targets, default } => {
                let idx = stack.pop_i32()? as u32 as usize;
                let depth = *targets.get(idx).unwrap_or(default);
                let keep = do_br(&mut frame, &mut stack, &mut labels, depth)?;
                labels.truncate(keep);
            }
            Instruction::Return => {
                do_return(&frame, &mut stack, &mut labels)?;
                match call_stack.pop() {
                    Some(caller) => frame = caller,
                    None => {
                        let mut results = Vec::with_capacity(result_types.len());
                        for &ty in result_types.iter().rev() {
                            results.push(stack.pop_typed(ty)?);
                        }
                        results.reverse();
                        return Ok(results);
                    }
                }
            }
            Instruction::Call(idx) => {
                let idx = *idx;
                if module.is_import(idx) {
                    call_host(module, store, idx, &mut stack)?;
                } else {
                    if call_stack.len() >= MAX_CALL_DEPTH {
                        return Err(Trap::CallStackExhausted.into());
                    }
                    let callee = push_frame(module, idx, &mut stack, &mut labels)?;
                    call_stack.push(std::mem::replace(&mut frame, callee));
                }
            }
            Instruction::CallIndirect { type_idx } => {
                let elem_idx = stack.pop_i32()? as u32;
                let table = store
                    .tables
                    .first()
                    .ok_or(Trap::UndefinedElement)?;
                let func_idx = table
                    .get(elem_idx as usize)
                    .copied()
                    .flatten()
                    .ok_or(Trap::UndefinedElement)?;
                let expected = module
                    .types
                    .get(*type_idx as usize)
                    .ok_or(InterpreterError::TypeIndexOutOfBounds(*type_idx))?;
                if signature(module, func_idx)? != expected {
                    return Err(Trap::IndirectCallSignatureMismatch.into());
                }
                if module.is_import(func_idx) {
                    call_host(module, store, func_idx, &mut stack)?;
                } else {
                    if call_stack.len() >= MAX_CALL_DEPTH {
                        return Err(Trap::CallStackExhausted.into());
                    }
                    let callee = push_frame(module, func_idx, &mut stack, &mut labels)?;
                    call_stack.push(std::mem::replace(&mut frame, callee));
                }
            }

            // --- Parametric ---
            Instruction::Drop => {
                stack.pop()?;
            }
            Instruction::Select => {
                let cond = stack.pop_i32()?;
                let b = stack.pop()?;
                let a = stack.pop_typed(b.ty())?;
                stack.push(if cond != 0 { a } else { b });
            }

            // --- Variable access ---
            Instruction::LocalGet(idx) => {
                let slot = local_slot(&frame, *idx)?;
                let v = stack.get(slot);
                stack.push(v);
            }
            Instruction::LocalSet(idx) => {
                let slot = local_slot(&frame, *idx)?;
                let v = stack.pop()?;
                stack.set(slot, v);
            }
            Instruction::LocalTee(idx) => {
                let slot = local_slot(&frame, *idx)?;
                let v = stack.peek()?;
                stack.set(slot, v);
            }
            Instruction::GlobalGet(idx) => {
                let v = store
                    .globals
                    .get(*idx as usize)
                    .copied()
                    .ok_or(InterpreterError::GlobalOutOfBounds(*idx))?;
                stack.push(v);
            }
            Instruction::GlobalSet(idx) => {
                let i = *idx as usize;
                let current = store
                    .globals
                    .get(i)
                    .copied()
                    .ok_or(InterpreterError::GlobalOutOfBounds(*idx))?;
                if !store.globals_mutable[i] {
                    return Err(InterpreterError::ImmutableGlobal(*idx).into());
                }
                let v = stack.pop_typed(current.ty())?;
                store.globals[i] = v;
            }

            // --- Memory loads ---
            Instruction::I32Load(off) => mem_load!(stack, store, *off, 4, |b: [u8; 4]| {
                Value::I32(i32::from_le_bytes(b))
            }),
            Instruction::I64Load(off) => mem_load!(stack, store, *off, 8, |b: [u8; 8]| {
                Value::I64(i64::from_le_bytes(b))
            }),
            Instruction::F32Load(off) => mem_load!(stack, store, *off, 4, |b: [u8; 4]| {
                Value::F32(f32::from_le_bytes(b))
            }),
            Instruction::F64Load(off) => mem_load!(stack, store, *off, 8, |b: [u8; 8]| {
                Value::F64(f64::from_le_bytes(b))
            }),
            Instruction::I32Load8S(off) => mem_load!(stack, store, *off, 1, |b: [u8; 1]| {
                Value::I32(b[0] as i8 as i32)
            }),
            Instruction::I32Load8U(off) => mem_load!(stack, store, *off, 1, |b: [u8; 1]| {
                Value::I32(b[0] as i32)
            }),
            Instruction::I32Load16S(off) => mem_load!(stack, store, *off, 2, |b: [u8; 2]| {
                Value::I32(i16::from_le_bytes(b) as i32)
            }),
            Instruction::I32Load16U(off) => mem_load!(stack, store, *off, 2, |b: [u8; 2]| {
                Value::I32(u16::from_le_bytes(b) as i32)
            }),
            Instruction::I64Load8S(off) => mem_load!(stack, store, *off, 1, |b: [u8; 1]| {
                Value::I64(b[0] as i8 as i64)
            }),
            Instruction::I64Load8U(off) => mem_load!(stack, store, *off, 1, |b: [u8; 1]| {
                Value::I64(b[0] as i64)
            }),
            Instruction::I64Load16S(off) => mem_load!(stack, store, *off, 2, |b: [u8; 2]| {
                Value::I64(i16::from_le_bytes(b) as i64)
            }),
            Instruction::I64Load16U(off) => mem_load!(stack, store, *off, 2, |b: [u8; 2]| {
                Value::I64(u16::from_le_bytes(b) as i64)
            }),
            Instruction::I64Load32S(off) => mem_load!(stack, store, *off, 4, |b: [u8; 4]| {
                Value::I64(i32::from_le_bytes(b) as i64)
            }),
            Instruction::I64Load32U(off) => mem_load!(stack, store, *off, 4, |b: [u8; 4]| {
                Value::I64(u32::from_le_bytes(b) as i64)
            }),

            // --- Memory stores (narrow stores keep the low bytes) ---
            Instruction::I32Store(off) => {
                mem_store!(stack, store, *off, pop_i32, |v: i32| v.to_le_bytes())
            }
            Instruction::I64Store(off) => {
                mem_store!(stack, store, *off, pop_i64, |v: i64| v.to_le_bytes())
            }
            Instruction::F32Store(off) => {
                mem_store!(stack, store, *off, pop_f32, |v: f32| v.to_le_bytes())
            }
            Instruction::F64Store(off) => {
                mem_store!(stack, store, *off, pop_f64, |v: f64| v.to_le_bytes())
            }
            Instruction::I32Store8(off) => {
                mem_store!(stack, store, *off, pop_i32, |v: i32| (v as u8).to_le_bytes())
            }
            Instruction::I32Store16(off) => {
                mem_store!(stack, store, *off, pop_i32, |v: i32| (v as u16).to_le_bytes())
            }
            Instruction::I64Store8(off) => {
                mem_store!(stack, store, *off, pop_i64, |v: i64| (v as u8).to_le_bytes())
            }
            Instruction::I64Store16(off) => {
                mem_store!(stack, store, *off, pop_i64, |v: i64| (v as u16).to_le_bytes())
            }
            Instruction::I64Store32(off) => {
                mem_store!(stack, store, *off, pop_i64, |v: i64| (v as u32).to_le_bytes())
            }

            Instruction::MemorySize => {
                let pages = memory_ref(store)?.size_pages();
                stack.push_i32(pages as i32);
            }
            Instruction::MemoryGrow => {
                let delta = stack.pop_i32()? as u32;
                let result = memory_mut(store)?.grow(delta);
                stack.push_i32(result);
            }

            // --- Constants ---
            Instruction::I32Const(v) => stack.push_i32(*v),
            Instruction::I64Const(v) => stack.push_i64(*v),
            Instruction::F32Const(v) => stack.push_f32(*v),
            Instruction::F64Const(v) => stack.push_f64(*v),

            // --- i32 comparison ---
            Instruction::I32Eqz => unop_i32!(stack, |a: i32| (a == 0) as i32),
            Instruction::I32Eq => cmpop_i32!(stack, |a, b| a == b),
            Instruction::I32Ne => cmpop_i32!(stack, |a, b| a != b),
            Instruction::I32LtS => cmpop_i32!(stack, |a, b| a < b),
            Instruction::I32LtU => cmpop_i32!(stack, |a: i32, b: i32| (a as u32) < (b as u32)),
            Instruction::I32GtS => cmpop_i32!(stack, |a, b| a > b),
            Instruction::I32GtU => cmpop_i32!(stack, |a: i32, b: i32| (a as u32) > (b as u32)),
            Instruction::I32LeS => cmpop_i32!(stack, |a, b| a <= b),
            Instruction::I32LeU => cmpop_i32!(stack, |a: i32, b: i32| (a as u32) <= (b as u32)),
            Instruction::I32GeS => cmpop_i32!(stack, |a, b| a >= b),
            Instruction::I32GeU => cmpop_i32!(stack, |a: i32, b: i32| (a as u32) >= (b as u32)),

            // --- i64 comparison ---
            Instruction::I64Eqz => {
                let a = stack.pop_i64()?;
                stack.push_i32((a == 0) as i32);
            }
            Instruction::I64Eq => cmpop_i64!(stack, |a, b| a == b),
            Instruction::I64Ne => cmpop_i64!(stack, |a, b| a != b),
            Instruction::I64LtS => cmpop_i64!(stack, |a, b| a < b),
            Instruction::I64LtU => cmpop_i64!(stack, |a: i64, b: i64| (a as u64) < (b as u64)),
            Instruction::I64GtS => cmpop_i64!(stack, |a, b| a > b),
            Instruction::I64GtU => cmpop_i64!(stack, |a: i64, b: i64| (a as u64) > (b as u64)),
            Instruction::I64LeS => cmpop_i64!(stack, |a, b| a <= b),
            Instruction::I64LeU => cmpop_i64!(stack, |a: i64, b: i64| (a as u64) <= (b as u64)),
            Instruction::I64GeS => cmpop_i64!(stack, |a, b| a >= b),
            Instruction::I64GeU => cmpop_i64!(stack, |a: i64, b: i64| (a as u64) >= (b as u64)),

            // --- float comparison (IEEE ordered: any NaN → 0 except ne) ---
            Instruction::F32Eq => cmpop_f32!(stack, |a, b| a == b),
            Instruction::F32Ne => cmpop_f32!(stack, |a, b| a != b),
            Instruction::F32Lt => cmpop_f32!(stack, |a, b| a < b),
            Instruction::F32Gt => cmpop_f32!(stack, |a, b| a > b),
            Instruction::F32Le => cmpop_f32!(stack, |a, b| a <= b),
            Instruction::F32Ge => cmpop_f32!(stack, |a, b| a >= b),
            Instruction::F64Eq => cmpop_f64!(stack, |a, b| a == b),
            Instruction::F64Ne => cmpop_f64!(stack, |a, b| a != b),
            Instruction::F64Lt => cmpop_f64!(stack, |a, b| a < b),
            Instruction::F64Gt => cmpop_f64!(stack, |a, b| a > b),
            Instruction::F64Le => cmpop_f64!(stack, |a, b| a <= b),
            Instruction::F64Ge => cmpop_f64!(stack, |a, b| a >= b),

            // --- i32 arithmetic ---
            Instruction::I32Clz => unop_i32!(stack, |a: i32| a.leading_zeros() as i32),
            Instruction::I32Ctz => unop_i32!(stack, |a: i32| a.trailing_zeros() as i32),
            Instruction::I32Popcnt => unop_i32!(stack, |a: i32| a.count_ones() as i32),
            Instruction::I32Add => binop_i32!(stack, |a: i32, b: i32| a.wrapping_add(b)),
            Instruction::I32Sub => binop_i32!(stack, |a: i32, b: i32| a.wrapping_sub(b)),
            Instruction::I32Mul => binop_i32!(stack, |a: i32, b: i32| a.wrapping_mul(b)),
            Instruction::I32DivS => {
                let b = stack.pop_i32()?;
                let a = stack.pop_i32()?;
                if b == 0 {
                    return Err(Trap::IntegerDivideByZero.into());
                }
                if a == i32::MIN && b == -1 {
                    return Err(Trap::IntegerOverflow.into());
                }
                stack.push_i32(a.wrapping_div(b));
            }
            Instruction::I32DivU => {
                let b = stack.pop_i32()? as u32;
                let a = stack.pop_i32()? as u32;
                if b == 0 {
                    return Err(Trap::IntegerDivideByZero.into());
                }
                stack.push_i32((a / b) as i32);
            }
            Instruction::I32RemS => {
                let b = stack.pop_i32()?;
                let a = stack.pop_i32()?;
                if b == 0 {
                    return Err(Trap::IntegerDivideByZero.into());
                }
                // INT_MIN % -1 is 0, not a trap.
                stack.push_i32(if a == i32::MIN && b == -1 { 0 } else { a.wrapping_rem(b) });
            }
            Instruction::I32RemU => {
                let b = stack.pop_i32()? as u32;
                let a = stack.pop_i32()? as u32;
                if b == 0 {
                    return Err(Trap::IntegerDivideByZero.into());
                }
                stack.push_i32((a % b) as i32);
            }
            Instruction::I32And => binop_i32!(stack, |a, b| a & b),
            Instruction::I32Or => binop_i32!(stack, |a, b| a | b),
            Instruction::I32Xor => binop_i32!(stack, |a, b| a ^ b),
            Instruction::I32Shl => binop_i32!(stack, |a: i32, b: i32| a.wrapping_shl(b as u32)),
            Instruction::I32ShrS => binop_i32!(stack, |a: i32, b: i32| a.wrapping_shr(b as u32)),
            Instruction::I32ShrU => {
                let b = stack.pop_i32()? as u32;
                let a = stack.pop_i32()? as u32;
                stack.push_i32(a.wrapping_shr(b) as i32);
            }
            Instruction::I32Rotl => binop_i32!(stack, |a: i32, b: i32| a.rotate_left(b as u32)),
            Instruction::I32Rotr => binop_i32!(stack, |a: i32, b: i32| a.rotate_right(b as u32)),

            // --- i64 arithmetic ---
            Instruction::I64Clz => unop_i64!(stack, |a: i64| a.leading_zeros() as i64),
            Instruction::I64Ctz => unop_i64!(stack, |a: i64| a.trailing_zeros() as i64),
            Instruction::I64Popcnt => unop_i64!(stack, |a: i64| a.count_ones() as i64),
            Instruction::I64Add => binop_i64!(stack, |a: i64, b: i64| a.wrapping_add(b)),
            Instruction::I64Sub => binop_i64!(stack, |a: i64, b: i64| a.wrapping_sub(b)),
            Instruction::I64Mul => binop_i64!(stack, |a: i64, b: i64| a.wrapping_mul(b)),
            Instruction::I64DivS => {
                let b = stack.pop_i64()?;
                let a = stack.pop_i64()?;
                if b == 0 {
                    return Err(Trap::IntegerDivideByZero.into());
                }
                if a == i64::MIN && b == -1 {
                    return Err(Trap::IntegerOverflow.into());
                }
                stack.push_i64(a.wrapping_div(b));
            }
            Instruction::I64DivU => {
                let b = stack.pop_i64()? as u64;
                let a = stack.pop_i64()? as u64;
                if b == 0 {
                    return Err(Trap::IntegerDivideByZero.into());
                }
                stack.push_i64((a / b) as i64);
            }
            Instruction::I64RemS => {
                let b = stack.pop_i64()?;
                let a = stack.pop_i64()?;
                if b == 0 {
                    return Err(Trap::IntegerDivideByZero.into());
                }
                stack.push_i64(if a == i64::MIN && b == -1 { 0 } else { a.wrapping_rem(b) });
            }
            Instruction::I64RemU => {
                let b = stack.pop_i64()? as u64;
                let a = stack.pop_i64()? as u64;
                if b == 0 {
                    return Err(Trap::IntegerDivideByZero.into());
                }
                stack.push_i64((a % b) as i64);
            }
            Instruction::I64And => binop_i64!(stack, |a, b| a & b),
            Instruction::I64Or => binop_i64!(stack, |a, b| a | b),
            Instruction::I64Xor => binop_i64!(stack, |a, b| a ^ b),
            Instruction::I64Shl => binop_i64!(stack, |a: i64, b: i64| a.wrapping_shl(b as u32)),
            Instruction::I64ShrS => binop_i64!(stack, |a: i64, b: i64| a.wrapping_shr(b as u32)),
            Instruction::I64ShrU => {
                let b = stack.pop_i64()? as u64;
                let a = stack.pop_i64()? as u64;
                stack.push_i64(a.wrapping_shr(b as u32) as i64);
            }
            Instruction::I64Rotl => {
                binop_i64!(stack, |a: i64, b: i64| a.rotate_left((b & 63) as u32))
            }
            Instruction::I64Rotr => {
                binop_i64!(stack, |a: i64, b: i64| a.rotate_right((b & 63) as u32))
            }

            // --- f32 arithmetic ---
            Instruction::F32Abs => unop_f32!(stack, |a: f32| a.abs()),
            Instruction::F32Neg => unop_f32!(stack, |a: f32| -a),
            Instruction::F32Ceil => unop_f32!(stack, |a: f32| a.ceil()),
            Instruction::F32Floor => unop_f32!(stack, |a: f32| a.floor()),
            Instruction::F32Trunc => unop_f32!(stack, |a: f32| a.trunc()),
            Instruction::F32Nearest => unop_f32!(stack, f32_nearest),
            Instruction::F32Sqrt => unop_f32!(stack, |a: f32| a.sqrt()),
            Instruction::F32Add => binop_f32!(stack, |a, b| a + b),
            Instruction::F32Sub => binop_f32!(stack, |a, b| a - b),
            Instruction::F32Mul => binop_f32!(stack, |a, b| a * b),
            Instruction::F32Div => binop_f32!(stack, |a, b| a / b),
            Instruction::F32Min => binop_f32!(stack, f32_min),
            Instruction::F32Max => binop_f32!(stack, f32_max),
            Instruction::F32Copysign => binop_f32!(stack, |a: f32, b: f32| a.copysign(b)),

            // --- f64 arithmetic ---
            Instruction::F64Abs => unop_f64!(stack, |a: f64| a.abs()),
            Instruction::F64Neg => unop_f64!(stack, |a: f64| -a),
            Instruction::F64Ceil => unop_f64!(stack, |a: f64| a.ceil()),
            Instruction::F64Floor => unop_f64!(stack, |a: f64| a.floor()),
            Instruction::F64Trunc => unop_f64!(stack, |a: f64| a.trunc()),
            Instruction::F64Nearest => unop_f64!(stack, f64_nearest),
            Instruction::F64Sqrt => unop_f64!(stack, |a: f64| a.sqrt()),
            Instruction::F64Add => binop_f64!(stack, |a, b| a + b),
            Instruction::F64Sub => binop_f64!(stack, |a, b| a - b),
            Instruction::F64Mul => binop_f64!(stack, |a, b| a * b),
            Instruction::F64Div => binop_f64!(stack, |a, b| a / b),
            Instruction::F64Min => binop_f64!(stack, f64_min),
            Instruction::F64Max => binop_f64!(stack, f64_max),
            Instruction::F64Copysign => binop_f64!(stack, |a: f64, b: f64| a.copysign(b)),

            // --- Width and reinterpret conversions ---
            Instruction::I32WrapI64 => {
                let a = stack.pop_i64()?;
                stack.push_i32(a as i32);
            }
            Instruction::I64ExtendI32S => {
                let a = stack.pop_i32()?;
                stack.push_i64(a as i64);
            }
            Instruction::I64ExtendI32U => {
                let a = stack.pop_i32()?;
                stack.push_i64(a as u32 as i64);
            }
            Instruction::F32DemoteF64 => {
                let a = stack.pop_f64()?;
                stack.push_f32(a as f32);
            }
            Instruction::F64PromoteF32 => {
                let a = stack.pop_f32()?;
                stack.push_f64(a as f64);
            }
            Instruction::I32ReinterpretF32 => {
                let a = stack.pop_f32()?;
                stack.push_i32(a.to_bits() as i32);
            }
            Instruction::I64ReinterpretF64 => {
                let a = stack.pop_f64()?;
                stack.push_i64(a.to_bits() as i64);
            }
            Instruction::F32ReinterpretI32 => {
                let a = stack.pop_i32()?;
                stack.push_f32(f32::from_bits(a as u32));
            }
            Instruction::F64ReinterpretI64 => {
                let a = stack.pop_i64()?;
                stack.push_f64(f64::from_bits(a as u64));
            }

            // --- int → float conversions ---
            Instruction::F32ConvertI32S => {
                let a = stack.pop_i32()?;
                stack.push_f32(a as f32);
            }
            Instruction::F32ConvertI32U => {
                let a = stack.pop_i32()?;
                stack.push_f32(a as u32 as f32);
            }
            Instruction::F32ConvertI64S => {
                let a = stack.pop_i64()?;
                stack.push_f32(a as f32);
            }
            Instruction::F32ConvertI64U => {
                let a = stack.pop_i64()?;
                stack.push_f32(a as u64 as f32);
            }
            Instruction::F64ConvertI32S => {
                let a = stack.pop_i32()?;
                stack.push_f64(a as f64);
            }
            Instruction::F64ConvertI32U => {
                let a = stack.pop_i32()?;
                stack.push_f64(a as u32 as f64);
            }
            Instruction::F64ConvertI64S => {
                let a = stack.pop_i64()?;
                stack.push_f64(a as f64);
            }
            Instruction::F64ConvertI64U => {
                let a = stack.pop_i64()?;
                stack.push_f64(a as u64 as f64);
            }

            // --- Trapping float → int truncation ---
            Instruction::I32TruncF32S => {
                trunc_op!(stack, pop_f32, push_i32, i32, 2147483648.0_f32, -2147483648.0_f32)
            }
            Instruction::I32TruncF32U => {
                trunc_op_u!(stack, pop_f32, push_i32, u32, i32, 4294967296.0_f32)
            }
            Instruction::I32TruncF64S => {
                trunc_op!(stack, pop_f64, push_i32, i32, 2147483648.0_f64, -2147483648.0_f64)
            }
            Instruction::I32TruncF64U => {
                trunc_op_u!(stack, pop_f64, push_i32, u32, i32, 4294967296.0_f64)
            }
            Instruction::I64TruncF32S => trunc_op!(
                stack,
                pop_f32,
                push_i64,
                i64,
                9223372036854775808.0_f32,
                -9223372036854775808.0_f32
            ),
            Instruction::I64TruncF32U => {
                trunc_op_u!(stack, pop_f32, push_i64, u64, i64, 18446744073709551616.0_f32)
            }
            Instruction::I64TruncF64S => trunc_op!(
                stack,
                pop_f64,
                push_i64,
                i64,
                9223372036854775808.0_f64,
                -9223372036854775808.0_f64
            ),
            Instruction::I64TruncF64U => {
                trunc_op_u!(stack, pop_f64, push_i64, u64, i64, 18446744073709551616.0_f64)
            }

            // --- Saturating truncation: NaN → 0, out-of-range clamps ---
            Instruction::I32TruncSatF32S => {
                let a = stack.pop_f32()?;
                stack.push_i32(if a.is_nan() {
                    0
                } else if a >= 2147483648.0_f32 {
                    i32::MAX
                } else if a < -2147483648.0_f32 {
                    i32::MIN
                } else {
                    a as i32
                });
            }
            Instruction::I32TruncSatF32U => {
                let a = stack.pop_f32()?;
                stack.push_i32(if a.is_nan() || a <= -1.0 {
                    0
                } else if a >= 4294967296.0_f32 {
                    u32::MAX as i32
                } else {
                    a as u32 as i32
                });
            }
            Instruction::I32TruncSatF64S => {
                let a = stack.pop_f64()?;
                stack.push_i32(if a.is_nan() {
                    0
                } else if a >= 2147483648.0_f64 {
                    i32::MAX
                } else if a <= -2147483649.0_f64 {
                    i32::MIN
                } else {
                    a as i32
                });
            }
            Instruction::I32TruncSatF64U => {
                let a = stack.pop_f64()?;
                stack.push_i32(if a.is_nan() || a <= -1.0 {
                    0
                } else if a >= 4294967296.0_f64 {
                    u32::MAX as i32
                } else {
                    a as u32 as i32
                });
            }
            Instruction::I64TruncSatF32S => {
                let a = stack.pop_f32()?;
                stack.push_i64(if a.is_nan() {
                    0
                } else if a >= 9223372036854775808.0_f32 {
                    i64::MAX
                } else if a < -9223372036854775808.0_f32 {
                    i64::MIN
                } else {
                    a as i64
                });
            }
            Instruction::I64TruncSatF32U => {
                let a = stack.pop_f32()?;
                stack.push_i64(if a.is_nan() || a <= -1.0 {
                    0
                } else if a >= 18446744073709551616.0_f32 {
                    u64::MAX as i64
                } else {
                    a as u64 as i64
                });
            }
            Instruction::I64TruncSatF64S => {
                let a = stack.pop_f64()?;
                stack.push_i64(if a.is_nan() {
                    0
                } else if a >= 9223372036854775808.0_f64 {
                    i64::MAX
                } else if a < -9223372036854775808.0_f64 {
                    i64::MIN
                } else {
                    a as i64
                });
            }
            Instruction::I64TruncSatF64U => {
                let a = stack.pop_f64()?;
                stack.push_i64(if a.is_nan() || a <= -1.0 {
                    0
                } else if a >= 18446744073709551616.0_f64 {
                    u64::MAX as i64
                } else {
                    a as u64 as i64
                });
            }
        }
    }
}

fn local_slot(frame: &Frame<'_>, idx: u32) -> Result<usize, RuntimeError> {
    if (idx as usize) < frame.locals_len() {
        Ok(frame.locals_start + idx as usize)
    } else {
        Err(InterpreterError::LocalOutOfBounds(idx).into())
    }
}
