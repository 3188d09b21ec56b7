//! End-to-end execution: decode a WAT-built binary, instantiate, invoke.

use wisp::{
    Decoder, FuncType, HostRegistry, Interpreter, InterpreterError, RuntimeError, Trap, Value,
    ValueType,
};

fn instantiate(wat_src: &str) -> Interpreter {
    let bytes = wat::parse_str(wat_src).unwrap();
    let module = Decoder::parse_bytes(&bytes).unwrap();
    let mut interp = Interpreter::new();
    interp.instantiate(module).unwrap();
    interp
}

fn call_i32(interp: &mut Interpreter, name: &str, args: &[i32]) -> Vec<Value> {
    let args: Vec<Value> = args.iter().map(|&v| Value::I32(v)).collect();
    interp.call(name, &args).unwrap()
}

// --- The eight canonical scenarios ---

#[test]
fn scenario_add() {
    let mut interp = instantiate(
        r#"(module (func (export "add") (param i32 i32) (result i32)
            local.get 0 local.get 1 i32.add))"#,
    );
    assert_eq!(call_i32(&mut interp, "add", &[7, 35]), vec![Value::I32(42)]);
}

#[test]
fn scenario_divide_by_zero() {
    let mut interp = instantiate(
        r#"(module (func (export "divz") (result i32)
            i32.const 1 i32.const 0 i32.div_s))"#,
    );
    let err = interp.call("divz", &[]).unwrap_err();
    assert_eq!(err, RuntimeError::Trap(Trap::IntegerDivideByZero));
}

#[test]
fn scenario_divide_overflow() {
    let mut interp = instantiate(
        r#"(module (func (export "overflow") (result i32)
            i32.const -2147483648 i32.const -1 i32.div_s))"#,
    );
    let err = interp.call("overflow", &[]).unwrap_err();
    assert_eq!(err, RuntimeError::Trap(Trap::IntegerOverflow));
}

#[test]
fn scenario_data_segment_load() {
    let mut interp = instantiate(
        r#"(module (memory 1) (data (i32.const 0) "Hi!")
            (func (export "r") (result i32) i32.const 0 i32.load8_u))"#,
    );
    assert_eq!(call_i32(&mut interp, "r", &[]), vec![Value::I32(0x48)]);
}

const INDIRECT_MODULE: &str = r#"
(module
    (table 2 funcref)
    (type $t (func (result i32)))
    (elem (i32.const 0) $f $g)
    (func $f (result i32) i32.const 11)
    (func $g (result i32) i32.const 22)
    (func (export "ci") (param i32) (result i32)
        local.get 0
        call_indirect (type $t)))
"#;

#[test]
fn scenario_call_indirect() {
    let mut interp = instantiate(INDIRECT_MODULE);
    assert_eq!(call_i32(&mut interp, "ci", &[1]), vec![Value::I32(22)]);
    assert_eq!(call_i32(&mut interp, "ci", &[0]), vec![Value::I32(11)]);
}

#[test]
fn scenario_call_indirect_out_of_range() {
    let mut interp = instantiate(INDIRECT_MODULE);
    let err = interp.call("ci", &[Value::I32(5)]).unwrap_err();
    assert_eq!(err, RuntimeError::Trap(Trap::UndefinedElement));
    // The interpreter stays usable after a trap.
    assert_eq!(call_i32(&mut interp, "ci", &[1]), vec![Value::I32(22)]);
}

#[test]
fn scenario_trunc_sat_nan() {
    let mut interp = instantiate(
        r#"(module (func (export "sat") (result i32)
            f32.const nan i32.trunc_sat_f32_s))"#,
    );
    assert_eq!(call_i32(&mut interp, "sat", &[]), vec![Value::I32(0)]);
}

#[test]
fn scenario_memory_grow() {
    let mut interp = instantiate(
        r#"(module (memory 1 4) (func (export "gr") (result i32)
            i32.const 1 memory.grow))"#,
    );
    assert_eq!(call_i32(&mut interp, "gr", &[]), vec![Value::I32(1)]);
    assert_eq!(call_i32(&mut interp, "gr", &[]), vec![Value::I32(2)]);
}

// --- Control flow ---

#[test]
fn recursion_factorial_and_fibonacci() {
    let mut interp = instantiate(
        r#"
        (module
            (func $fact (export "fact") (param i32) (result i32)
                local.get 0
                i32.const 1
                i32.le_s
                if (result i32)
                    i32.const 1
                else
                    local.get 0
                    local.get 0
                    i32.const 1
                    i32.sub
                    call $fact
                    i32.mul
                end)
            (func $fib (export "fib") (param i32) (result i32)
                local.get 0
                i32.const 2
                i32.lt_s
                if (result i32)
                    local.get 0
                else
                    local.get 0
                    i32.const 1
                    i32.sub
                    call $fib
                    local.get 0
                    i32.const 2
                    i32.sub
                    call $fib
                    i32.add
                end))
    "#,
    );
    let fact_expect = [1, 1, 2, 6, 24, 120, 720, 5040, 40320, 362880, 3628800, 39916800, 479001600];
    let fib_expect = [0, 1, 1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144];
    for n in 0..=12 {
        assert_eq!(
            call_i32(&mut interp, "fact", &[n]),
            vec![Value::I32(fact_expect[n as usize])],
            "fact({n})"
        );
        assert_eq!(
            call_i32(&mut interp, "fib", &[n]),
            vec![Value::I32(fib_expect[n as usize])],
            "fib({n})"
        );
    }
}

#[test]
fn branch_preserves_block_results() {
    // The block produces one value; `br 0` must carry the top value out
    // past the operands accumulated inside the block.
    let mut interp = instantiate(
        r#"(module (func (export "f") (result i32)
            (block (result i32)
                i32.const 1
                i32.const 2
                i32.const 3
                br 0)))"#,
    );
    assert_eq!(call_i32(&mut interp, "f", &[]), vec![Value::I32(3)]);
}

#[test]
fn loop_with_conditional_branch() {
    // Sum 1..=10 with a loop/br_if.
    let mut interp = instantiate(
        r#"
        (module
            (func (export "sum10") (result i32)
                (local $i i32) (local $acc i32)
                (loop $l
                    local.get $i
                    i32.const 1
                    i32.add
                    local.tee $i
                    local.get $acc
                    i32.add
                    local.set $acc
                    local.get $i
                    i32.const 10
                    i32.lt_s
                    br_if $l)
                local.get $acc))
    "#,
    );
    assert_eq!(call_i32(&mut interp, "sum10", &[]), vec![Value::I32(55)]);
}

#[test]
fn br_table_selects_targets_and_defaults() {
    let mut interp = instantiate(
        r#"
        (module
            (func (export "pick") (param i32) (result i32)
                (block $b2
                    (block $b1
                        (block $b0
                            local.get 0
                            br_table $b0 $b1 $b2
                        )
                        ;; case 0
                        i32.const 100
                        return
                    )
                    ;; case 1
                    i32.const 200
                    return
                )
                ;; default (selector out of range)
                i32.const 300))
    "#,
    );
    assert_eq!(call_i32(&mut interp, "pick", &[0]), vec![Value::I32(100)]);
    assert_eq!(call_i32(&mut interp, "pick", &[1]), vec![Value::I32(200)]);
    assert_eq!(call_i32(&mut interp, "pick", &[7]), vec![Value::I32(300)]);
    assert_eq!(call_i32(&mut interp, "pick", &[-1]), vec![Value::I32(300)]);
}

#[test]
fn early_return_skips_rest() {
    let mut interp = instantiate(
        r#"(module (func (export "f") (result i32)
            i32.const 5
            return
            unreachable))"#,
    );
    assert_eq!(call_i32(&mut interp, "f", &[]), vec![Value::I32(5)]);
}

#[test]
fn if_without_else_and_nested_blocks() {
    let mut interp = instantiate(
        r#"
        (module
            (func (export "clamp") (param i32) (result i32)
                local.get 0
                i32.const 100
                i32.gt_s
                if
                    i32.const 100
                    return
                end
                local.get 0))
    "#,
    );
    assert_eq!(call_i32(&mut interp, "clamp", &[42]), vec![Value::I32(42)]);
    assert_eq!(call_i32(&mut interp, "clamp", &[250]), vec![Value::I32(100)]);
}

// --- Variables, globals, select ---

#[test]
fn locals_default_to_typed_zero() {
    let mut interp = instantiate(
        r#"(module (func (export "f") (result i64)
            (local i32 i64)
            local.get 1))"#,
    );
    assert_eq!(interp.call("f", &[]).unwrap(), vec![Value::I64(0)]);
}

#[test]
fn select_picks_by_condition() {
    let mut interp = instantiate(
        r#"(module (func (export "sel") (param i32) (result i32)
            i32.const 10
            i32.const 20
            local.get 0
            select))"#,
    );
    assert_eq!(call_i32(&mut interp, "sel", &[1]), vec![Value::I32(10)]);
    assert_eq!(call_i32(&mut interp, "sel", &[0]), vec![Value::I32(20)]);
}

#[test]
fn mutable_global_set_and_get() {
    let mut interp = instantiate(
        r#"
        (module
            (global $g (mut i32) (i32.const 10))
            (func (export "bump") (result i32)
                global.get $g
                i32.const 1
                i32.add
                global.set $g
                global.get $g))
    "#,
    );
    assert_eq!(call_i32(&mut interp, "bump", &[]), vec![Value::I32(11)]);
    assert_eq!(call_i32(&mut interp, "bump", &[]), vec![Value::I32(12)]);
}

#[test]
fn immutable_global_set_is_rejected() {
    let mut interp = instantiate(
        r#"
        (module
            (global $g i32 (i32.const 10))
            (func (export "f")
                i32.const 5
                global.set $g))
    "#,
    );
    let err = interp.call("f", &[]).unwrap_err();
    assert_eq!(
        err,
        RuntimeError::Interpreter(InterpreterError::ImmutableGlobal(0))
    );
}

#[test]
fn global_init_can_reference_earlier_globals() {
    let mut interp = instantiate(
        r#"
        (module
            (global $a i32 (i32.const 5))
            (global $b i32 (global.get $a))
            (func (export "b") (result i32) global.get $b))
    "#,
    );
    assert_eq!(call_i32(&mut interp, "b", &[]), vec![Value::I32(5)]);
}

#[test]
fn start_function_runs_at_instantiation() {
    let mut interp = instantiate(
        r#"
        (module
            (global $g (mut i32) (i32.const 0))
            (func $init i32.const 42 global.set $g)
            (start $init)
            (func (export "get") (result i32) global.get $g))
    "#,
    );
    assert_eq!(call_i32(&mut interp, "get", &[]), vec![Value::I32(42)]);
}

// --- Memory ---

#[test]
fn store_then_load_round_trips_through_memory() {
    let mut interp = instantiate(
        r#"
        (module
            (memory 1)
            (func (export "put") (param i32 i64) (local.get 0) (local.get 1) (i64.store))
            (func (export "get") (param i32) (result i64) (local.get 0) (i64.load)))
    "#,
    );
    interp
        .call("put", &[Value::I32(16), Value::I64(-77)])
        .unwrap();
    assert_eq!(
        interp.call("get", &[Value::I32(16)]).unwrap(),
        vec![Value::I64(-77)]
    );
}

#[test]
fn narrow_loads_extend_as_declared() {
    let mut interp = instantiate(
        r#"
        (module
            (memory 1)
            (data (i32.const 0) "\ff")
            (func (export "s") (result i32) i32.const 0 i32.load8_s)
            (func (export "u") (result i32) i32.const 0 i32.load8_u))
    "#,
    );
    assert_eq!(call_i32(&mut interp, "s", &[]), vec![Value::I32(-1)]);
    assert_eq!(call_i32(&mut interp, "u", &[]), vec![Value::I32(255)]);
}

#[test]
fn memory_size_tracks_grow() {
    let mut interp = instantiate(
        r#"
        (module
            (memory 2)
            (func (export "size") (result i32) memory.size)
            (func (export "grow") (param i32) (result i32) local.get 0 memory.grow))
    "#,
    );
    assert_eq!(call_i32(&mut interp, "size", &[]), vec![Value::I32(2)]);
    assert_eq!(call_i32(&mut interp, "grow", &[3]), vec![Value::I32(2)]);
    assert_eq!(call_i32(&mut interp, "size", &[]), vec![Value::I32(5)]);
    // Unbounded memory still stops at the 4 GiB ceiling.
    assert_eq!(call_i32(&mut interp, "grow", &[65536]), vec![Value::I32(-1)]);
}

// --- Host calls ---

#[test]
fn fd_write_writes_and_reports_count() {
    let mut interp = instantiate(
        r#"
        (module
            (import "wasi_snapshot_preview1" "fd_write"
                (func $fd_write (param i32 i32 i32 i32) (result i32)))
            (memory 1)
            (data (i32.const 8) "hi\n")
            (func (export "say") (result i32)
                ;; iovec at 0: buf_ptr=8, buf_len=3
                i32.const 0
                i32.const 8
                i32.store
                i32.const 4
                i32.const 3
                i32.store
                i32.const 1
                i32.const 0
                i32.const 1
                i32.const 16
                call $fd_write)
            (func (export "nwritten") (result i32) i32.const 16 i32.load))
    "#,
    );
    assert_eq!(call_i32(&mut interp, "say", &[]), vec![Value::I32(0)]);
    assert_eq!(call_i32(&mut interp, "nwritten", &[]), vec![Value::I32(3)]);
}

#[test]
fn registered_host_function_is_callable() {
    let bytes = wat::parse_str(
        r#"
        (module
            (import "env" "add3" (func $add3 (param i32) (result i32)))
            (func (export "f") (param i32) (result i32)
                local.get 0
                call $add3))
    "#,
    )
    .unwrap();
    let module = Decoder::parse_bytes(&bytes).unwrap();

    let mut registry = HostRegistry::new();
    registry.register(
        "env",
        "add3",
        FuncType { params: vec![ValueType::I32], results: vec![ValueType::I32] },
        |args, _memory| match args[0] {
            Value::I32(v) => Ok(vec![Value::I32(v + 3)]),
            other => Ok(vec![other]),
        },
    );
    let mut interp = Interpreter::with_registry(registry);
    interp.instantiate(module).unwrap();
    assert_eq!(call_i32(&mut interp, "f", &[39]), vec![Value::I32(42)]);
}

#[test]
fn unresolved_import_fails_only_when_invoked() {
    // Instantiation tolerates the unknown import.
    let mut interp = instantiate(
        r#"
        (module
            (import "env" "missing" (func $m))
            (func (export "touch") call $m)
            (func (export "ok") (result i32) i32.const 1))
    "#,
    );
    assert_eq!(call_i32(&mut interp, "ok", &[]), vec![Value::I32(1)]);
    let err = interp.call("touch", &[]).unwrap_err();
    assert_eq!(
        err,
        RuntimeError::Interpreter(InterpreterError::UnresolvedImport {
            module: "env".into(),
            field: "missing".into(),
        })
    );
}

// --- Embedder errors ---

#[test]
fn call_without_module_is_rejected() {
    let mut interp = Interpreter::new();
    let err = interp.call("f", &[]).unwrap_err();
    assert_eq!(err, RuntimeError::Interpreter(InterpreterError::NoModule));
}

#[test]
fn unknown_export_and_wrong_kind() {
    let mut interp = instantiate(
        r#"(module (memory (export "mem") 1)
            (func (export "f") (result i32) i32.const 1))"#,
    );
    assert_eq!(
        interp.call("nope", &[]).unwrap_err(),
        RuntimeError::Interpreter(InterpreterError::ExportNotFound("nope".into()))
    );
    assert_eq!(
        interp.call("mem", &[]).unwrap_err(),
        RuntimeError::Interpreter(InterpreterError::ExportKindMismatch("mem".into()))
    );
}

#[test]
fn argument_count_is_checked() {
    let mut interp = instantiate(
        r#"(module (func (export "f") (param i32) (result i32) local.get 0))"#,
    );
    let err = interp.call("f", &[]).unwrap_err();
    assert_eq!(
        err,
        RuntimeError::Interpreter(InterpreterError::ArgumentCountMismatch {
            expected: 1,
            given: 0,
        })
    );
}

#[test]
fn call_function_by_index() {
    let mut interp = instantiate(
        r#"(module
            (func $a (result i32) i32.const 1)
            (func (export "b") (result i32) i32.const 2))"#,
    );
    // Index 0 is $a even though it is not exported.
    assert_eq!(interp.call_function(0, &[]).unwrap(), vec![Value::I32(1)]);
    assert_eq!(interp.call_function(1, &[]).unwrap(), vec![Value::I32(2)]);
    assert_eq!(
        interp.call_function(9, &[]).unwrap_err(),
        RuntimeError::Interpreter(InterpreterError::FunctionIndexOutOfBounds(9))
    );
}

// --- Larger programs ---

#[test]
fn memory_summing_loop() {
    // Write i32 slots 0..n with their squares, then sum them back — a
    // loop, memory traffic and address arithmetic in one program.
    let mut interp = instantiate(
        r#"
        (module
            (memory 1)
            (func (export "fill") (param $n i32)
                (local $i i32)
                (block $done
                    (loop $l
                        local.get $i
                        local.get $n
                        i32.ge_u
                        br_if $done
                        ;; mem[4*i] = i*i
                        local.get $i
                        i32.const 4
                        i32.mul
                        local.get $i
                        local.get $i
                        i32.mul
                        i32.store
                        local.get $i
                        i32.const 1
                        i32.add
                        local.set $i
                        br $l)))
            (func (export "sum") (param $n i32) (result i32)
                (local $i i32) (local $acc i32)
                (block $done
                    (loop $l
                        local.get $i
                        local.get $n
                        i32.ge_u
                        br_if $done
                        local.get $acc
                        local.get $i
                        i32.const 4
                        i32.mul
                        i32.load
                        i32.add
                        local.set $acc
                        local.get $i
                        i32.const 1
                        i32.add
                        local.set $i
                        br $l))
                local.get $acc))
    "#,
    );
    interp.call("fill", &[Value::I32(10)]).unwrap();
    // 0² + 1² + ... + 9² = 285
    assert_eq!(call_i32(&mut interp, "sum", &[10]), vec![Value::I32(285)]);
}

#[test]
fn deeply_nested_blocks_branch_to_outer() {
    let mut interp = instantiate(
        r#"
        (module
            (func (export "f") (result i32)
                (block $out (result i32)
                    (block
                        (block
                            (block
                                i32.const 99
                                br $out)
                            unreachable)
                        unreachable)
                    unreachable)))
    "#,
    );
    assert_eq!(call_i32(&mut interp, "f", &[]), vec![Value::I32(99)]);
}

#[test]
fn callee_locals_do_not_leak_into_caller() {
    // The callee mutates its own locals; the caller's locals (below it
    // on the shared stack) must be untouched.
    let mut interp = instantiate(
        r#"
        (module
            (func $scramble (param i32) (result i32)
                (local i32)
                i32.const 1234
                local.set 1
                local.get 0
                local.get 1
                i32.add)
            (func (export "f") (result i32)
                (local $mine i32)
                i32.const 7
                local.set $mine
                i32.const 1
                call $scramble
                drop
                local.get $mine))
    "#,
    );
    assert_eq!(call_i32(&mut interp, "f", &[]), vec![Value::I32(7)]);
}

#[test]
fn mixed_type_signature_round_trip() {
    let mut interp = instantiate(
        r#"
        (module
            (func (export "blend") (param i32 f64 i64) (result f64)
                local.get 1
                local.get 0
                f64.convert_i32_s
                f64.add
                local.get 2
                f64.convert_i64_s
                f64.add))
    "#,
    );
    let results = interp
        .call("blend", &[Value::I32(1), Value::F64(0.5), Value::I64(2)])
        .unwrap();
    assert_eq!(results, vec![Value::F64(3.5)]);
}

#[test]
fn i64_arguments_and_results() {
    let mut interp = instantiate(
        r#"(module (func (export "add") (param i64 i64) (result i64)
            local.get 0 local.get 1 i64.add))"#,
    );
    assert_eq!(
        interp
            .call("add", &[Value::I64(1 << 40), Value::I64(5)])
            .unwrap(),
        vec![Value::I64((1 << 40) + 5)]
    );
}

#[test]
fn argument_order_is_preserved() {
    let mut interp = instantiate(
        r#"(module (func (export "sub") (param i32 i32) (result i32)
            local.get 0 local.get 1 i32.sub))"#,
    );
    assert_eq!(call_i32(&mut interp, "sub", &[10, 3]), vec![Value::I32(7)]);
}
