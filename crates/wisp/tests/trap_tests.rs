//! One test per canonical trap, plus the instantiation-time failures a
//! module can cause.

use wisp::{Decoder, Interpreter, MemoryError, RuntimeError, Trap, Value};

fn instantiate(wat_src: &str) -> Interpreter {
    let bytes = wat::parse_str(wat_src).unwrap();
    let module = Decoder::parse_bytes(&bytes).unwrap();
    let mut interp = Interpreter::new();
    interp.instantiate(module).unwrap();
    interp
}

fn expect_trap(wat_src: &str, name: &str, args: &[Value], trap: Trap) {
    let mut interp = instantiate(wat_src);
    let err = interp.call(name, args).unwrap_err();
    assert_eq!(err, RuntimeError::Trap(trap), "{name}");
}

#[test]
fn unreachable() {
    expect_trap(
        r#"(module (func (export "f") unreachable))"#,
        "f",
        &[],
        Trap::Unreachable,
    );
}

#[test]
fn integer_divide_by_zero() {
    for op in ["i32.div_s", "i32.div_u", "i32.rem_s", "i32.rem_u"] {
        expect_trap(
            &format!(
                r#"(module (func (export "f") (result i32)
                    i32.const 7 i32.const 0 {op}))"#
            ),
            "f",
            &[],
            Trap::IntegerDivideByZero,
        );
    }
    expect_trap(
        r#"(module (func (export "f") (result i64)
            i64.const 7 i64.const 0 i64.div_u))"#,
        "f",
        &[],
        Trap::IntegerDivideByZero,
    );
}

#[test]
fn integer_overflow_on_div_min_by_minus_one() {
    expect_trap(
        r#"(module (func (export "f") (result i64)
            i64.const -9223372036854775808 i64.const -1 i64.div_s))"#,
        "f",
        &[],
        Trap::IntegerOverflow,
    );
}

#[test]
fn out_of_bounds_memory_access() {
    // One byte past the last valid 4-byte slot of a single page.
    expect_trap(
        r#"(module (memory 1) (func (export "f") (result i32)
            i32.const 65533 i32.load))"#,
        "f",
        &[],
        Trap::OutOfBoundsMemoryAccess,
    );
    expect_trap(
        r#"(module (memory 1) (func (export "f")
            i32.const 65536 i32.const 0 i32.store8))"#,
        "f",
        &[],
        Trap::OutOfBoundsMemoryAccess,
    );
}

#[test]
fn address_overflow_on_widened_sum() {
    // base 0xFFFF_FFFF + static offset 8 exceeds u32: a distinct trap,
    // raised before the bounds check.
    expect_trap(
        r#"(module (memory 1) (func (export "f") (result i32)
            i32.const -1 i32.load offset=8))"#,
        "f",
        &[],
        Trap::AddressOverflow,
    );
    // Without the offset the sum fits in u32 and it is a plain OOB.
    expect_trap(
        r#"(module (memory 1) (func (export "f") (result i32)
            i32.const -1 i32.load))"#,
        "f",
        &[],
        Trap::OutOfBoundsMemoryAccess,
    );
}

#[test]
fn invalid_conversion_to_integer() {
    expect_trap(
        r#"(module (func (export "f") (result i32)
            f32.const nan i32.trunc_f32_s))"#,
        "f",
        &[],
        Trap::InvalidConversionToInteger,
    );
    expect_trap(
        r#"(module (func (export "f") (result i64)
            f64.const nan i64.trunc_f64_u))"#,
        "f",
        &[],
        Trap::InvalidConversionToInteger,
    );
}

#[test]
fn integer_overflow_on_trunc() {
    // Infinity.
    expect_trap(
        r#"(module (func (export "f") (result i32)
            f32.const inf i32.trunc_f32_s))"#,
        "f",
        &[],
        Trap::IntegerOverflow,
    );
    // Finite but out of range.
    expect_trap(
        r#"(module (func (export "f") (result i32)
            f64.const 3e9 i32.trunc_f64_s))"#,
        "f",
        &[],
        Trap::IntegerOverflow,
    );
    // Negative into an unsigned destination.
    expect_trap(
        r#"(module (func (export "f") (result i32)
            f32.const -2.5 i32.trunc_f32_u))"#,
        "f",
        &[],
        Trap::IntegerOverflow,
    );
}

#[test]
fn undefined_element() {
    let src = r#"
        (module
            (table 2 funcref)
            (type $t (func (result i32)))
            (elem (i32.const 1) $f)
            (func $f (result i32) i32.const 1)
            (func (export "ci") (param i32) (result i32)
                local.get 0
                call_indirect (type $t)))
    "#;
    // Out of table range.
    expect_trap(src, "ci", &[Value::I32(2)], Trap::UndefinedElement);
    // Negative index.
    expect_trap(src, "ci", &[Value::I32(-1)], Trap::UndefinedElement);
    // In range but never initialized by any segment.
    expect_trap(src, "ci", &[Value::I32(0)], Trap::UndefinedElement);
}

#[test]
fn indirect_call_signature_mismatch() {
    expect_trap(
        r#"
        (module
            (table 1 funcref)
            (type $takes (func (param i32)))
            (type $gives (func (result i32)))
            (elem (i32.const 0) $f)
            (func $f (type $takes))
            (func (export "ci") (result i32)
                i32.const 0
                call_indirect (type $gives)))
    "#,
        "ci",
        &[],
        Trap::IndirectCallSignatureMismatch,
    );
}

#[test]
fn call_stack_exhausted() {
    expect_trap(
        r#"(module (func $f (export "f") call $f))"#,
        "f",
        &[],
        Trap::CallStackExhausted,
    );
}

// --- Instantiation-time failures ---

#[test]
fn element_segment_outside_table_fails_instantiation() {
    let bytes = wat::parse_str(
        r#"
        (module
            (table 1 funcref)
            (elem (i32.const 1) $f)
            (func $f))
    "#,
    )
    .unwrap();
    let module = Decoder::parse_bytes(&bytes).unwrap();
    let mut interp = Interpreter::new();
    let err = interp.instantiate(module).unwrap_err();
    assert_eq!(err, RuntimeError::Trap(Trap::UndefinedElement));
}

#[test]
fn data_segment_outside_memory_fails_instantiation() {
    let bytes = wat::parse_str(
        r#"(module (memory 1) (data (i32.const 65535) "ab"))"#,
    )
    .unwrap();
    let module = Decoder::parse_bytes(&bytes).unwrap();
    let mut interp = Interpreter::new();
    let err = interp.instantiate(module).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Memory(MemoryError::OutOfBounds { .. })
    ));
}

#[test]
fn start_function_trap_propagates() {
    let bytes = wat::parse_str(
        r#"(module (func $boom unreachable) (start $boom))"#,
    )
    .unwrap();
    let module = Decoder::parse_bytes(&bytes).unwrap();
    let mut interp = Interpreter::new();
    let err = interp.instantiate(module).unwrap_err();
    assert_eq!(err, RuntimeError::Trap(Trap::Unreachable));
}
