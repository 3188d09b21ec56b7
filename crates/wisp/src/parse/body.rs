//! Function-body and constant-expression decoding.
//!
//! Bodies are decoded eagerly into [`Instruction`] values and their
//! block targets resolved in one pass, so the dispatch loop never scans
//! for a matching `end` at runtime. Structural balance and the indices
//! an instruction references are checked here, at the byte where they
//! appear.

use crate::error::{DecoderError, DecoderErrorKind};
use crate::parse::reader::Reader;
use crate::runtime::instruction::{link_block_ends, BlockType, Instruction};
use crate::value::ValueType;

const OP_END: u8 = 0x0B;
/// Init expressions are capped so a missing `end` cannot run away.
const MAX_INIT_EXPR_BYTES: usize = 1024;

/// Index-space sizes the body decoder validates against.
pub(crate) struct BodyContext {
    pub(crate) num_types: u32,
    pub(crate) num_funcs: u32,
    pub(crate) num_globals: u32,
}

/// What `decode_body` produced for one code-section entry.
pub(crate) enum DecodedBody {
    Ops(Vec<Instruction>),
    /// The body contains a byte outside the MVP opcode set (or a
    /// nonzero reserved immediate). Nothing past it can be decoded;
    /// the function is kept and the failure is reported as a runtime
    /// error on its first invocation, where dispatch would have hit it.
    BadOpcode(u8),
}

/// One decoded instruction, or the opcode byte that stopped decoding.
enum Decoded {
    Op(Instruction),
    Unknown(u8),
}

/// Decode one function body ending at byte offset `end` (exclusive).
/// The final `end` opcode is kept as the last instruction.
pub(crate) fn decode_body(
    r: &mut Reader<'_>,
    end: usize,
    ctx: &BodyContext,
) -> Result<DecodedBody, DecoderError> {
    let mut body = Vec::new();
    // Depth 1 is the function frame itself; the `end` that takes depth
    // to 0 terminates the body.
    let mut depth: u32 = 1;

    while r.pos() < end {
        let instr = match decode_instr(r, ctx, depth)? {
            Decoded::Op(op) => op,
            Decoded::Unknown(byte) => {
                if r.pos() < end {
                    r.skip_to(end);
                }
                return Ok(DecodedBody::BadOpcode(byte));
            }
        };
        match instr {
            Instruction::Block { .. } | Instruction::Loop { .. } | Instruction::If { .. } => {
                depth += 1;
            }
            Instruction::End => {
                depth -= 1;
            }
            _ => {}
        }
        body.push(instr);
        if depth == 0 {
            break;
        }
    }
    if depth != 0 || r.pos() != end {
        // Unterminated construct, or bytes left past the closing `end`.
        return Err(r.err(DecoderErrorKind::TruncatedInput));
    }

    link_block_ends(&mut body);
    Ok(DecodedBody::Ops(body))
}

/// Decode a constant expression: `i32.const`, `i64.const`, `f32.const`,
/// `f64.const` and `global.get`, terminated by `end` (which is dropped).
///
/// Any other opcode makes the expression non-constant. The remaining
/// bytes are consumed up to the terminating `end` and an empty
/// expression is returned; evaluation rejects it at instantiation,
/// which is where the failure belongs.
pub(crate) fn decode_const_expr(
    r: &mut Reader<'_>,
    num_globals: u32,
) -> Result<Vec<Instruction>, DecoderError> {
    let start = r.pos();
    let mut ops = Vec::new();
    loop {
        if r.pos() - start > MAX_INIT_EXPR_BYTES {
            return Err(r.err(DecoderErrorKind::InitExpressionTooLarge));
        }
        let opcode = r.byte()?;
        let op = match opcode {
            OP_END => return Ok(ops),
            0x41 => Instruction::I32Const(r.var_i32()?),
            0x42 => Instruction::I64Const(r.var_i64()?),
            0x43 => Instruction::F32Const(r.f32_le()?),
            0x44 => Instruction::F64Const(r.f64_le()?),
            0x23 => {
                let idx = r.var_u32()?;
                check_index(r, "global", idx, num_globals)?;
                Instruction::GlobalGet(idx)
            }
            _ => {
                loop {
                    if r.pos() - start > MAX_INIT_EXPR_BYTES {
                        return Err(r.err(DecoderErrorKind::InitExpressionTooLarge));
                    }
                    if r.byte()? == OP_END {
                        return Ok(Vec::new());
                    }
                }
            }
        };
        ops.push(op);
    }
}

fn check_index(
    r: &Reader<'_>,
    space: &'static str,
    index: u32,
    limit: u32,
) -> Result<(), DecoderError> {
    if index >= limit {
        return Err(r.err(DecoderErrorKind::OutOfRangeIndex { space, index, limit }));
    }
    Ok(())
}

fn block_type(r: &mut Reader<'_>) -> Result<BlockType, DecoderError> {
    match r.value_type()? {
        ValueType::Void => Ok(BlockType::Empty),
        ty => Ok(BlockType::Val(ty)),
    }
}

/// A reserved immediate that MVP fixes at zero (`call_indirect` table,
/// `memory.size`/`memory.grow` memory index).
fn reserved_is_zero(r: &mut Reader<'_>) -> Result<bool, DecoderError> {
    Ok(r.byte()? == 0)
}

/// The `(align, offset)` immediate pair on loads and stores. The
/// alignment is a hint per spec and discarded.
fn memarg(r: &mut Reader<'_>) -> Result<u32, DecoderError> {
    let _align = r.var_u32()?;
    r.var_u32()
}

fn decode_instr(
    r: &mut Reader<'_>,
    ctx: &BodyContext,
    depth: u32,
) -> Result<Decoded, DecoderError> {
    use Instruction::*;

    let opcode = r.byte()?;
    let instr = match opcode {
        // --- Control flow ---
        0x00 => Unreachable,
        0x01 => Nop,
        0x02 => Block { ty: block_type(r)?, end_pc: 0 },
        0x03 => Loop { ty: block_type(r)? },
        0x04 => If { ty: block_type(r)?, end_pc: 0, else_pc: None },
        0x05 => Else,
        0x0B => End,
        0x0C => {
            let d = r.var_u32()?;
            check_index(r, "label", d, depth)?;
            Br(d)
        }
        0x0D => {
            let d = r.var_u32()?;
            check_index(r, "label", d, depth)?;
            BrIf(d)
        }
        0x0E => {
            let count = r.var_u32()?;
            let mut targets = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                let d = r.var_u32()?;
                check_index(r, "label", d, depth)?;
                targets.push(d);
            }
            let default = r.var_u32()?;
            check_index(r, "label", default, depth)?;
            BrTable { targets, default }
        }
        0x0F => Return,
        0x10 => {
            let idx = r.var_u32()?;
            check_index(r, "function", idx, ctx.num_funcs)?;
            Call(idx)
        }
        0x11 => {
            let type_idx = r.var_u32()?;
            check_index(r, "type", type_idx, ctx.num_types)?;
            if !reserved_is_zero(r)? {
                return Ok(Decoded::Unknown(opcode));
            }
            CallIndirect { type_idx }
        }

        // --- Parametric ---
        0x1A => Drop,
        0x1B => Select,

        // --- Variable access (local bounds are checked at runtime,
        //     where the frame's locals length is known) ---
        0x20 => LocalGet(r.var_u32()?),
        0x21 => LocalSet(r.var_u32()?),
        0x22 => LocalTee(r.var_u32()?),
        0x23 => {
            let idx = r.var_u32()?;
            check_index(r, "global", idx, ctx.num_globals)?;
            GlobalGet(idx)
        }
        0x24 => {
            let idx = r.var_u32()?;
            check_index(r, "global", idx, ctx.num_globals)?;
            GlobalSet(idx)
        }

        // --- Memory ---
        0x28 => I32Load(memarg(r)?),
        0x29 => I64Load(memarg(r)?),
        0x2A => F32Load(memarg(r)?),
        0x2B => F64Load(memarg(r)?),
        0x2C => I32Load8S(memarg(r)?),
        0x2D => I32Load8U(memarg(r)?),
        0x2E => I32Load16S(memarg(r)?),
        0x2F => I32Load16U(memarg(r)?),
        0x30 => I64Load8S(memarg(r)?),
        0x31 => I64Load8U(memarg(r)?),
        0x32 => I64Load16S(memarg(r)?),
        0x33 => I64Load16U(memarg(r)?),
        0x34 => I64Load32S(memarg(r)?),
        0x35 => I64Load32U(memarg(r)?),
        0x36 => I32Store(memarg(r)?),
        0x37 => I64Store(memarg(r)?),
        0x38 => F32Store(memarg(r)?),
        0x39 => F64Store(memarg(r)?),
        0x3A => I32Store8(memarg(r)?),
        0x3B => I32Store16(memarg(r)?),
        0x3C => I64Store8(memarg(r)?),
        0x3D => I64Store16(memarg(r)?),
        0x3E => I64Store32(memarg(r)?),
        0x3F => {
            if !reserved_is_zero(r)? {
                return Ok(Decoded::Unknown(opcode));
            }
            MemorySize
        }
        0x40 => {
            if !reserved_is_zero(r)? {
                return Ok(Decoded::Unknown(opcode));
            }
            MemoryGrow
        }

        // --- Constants ---
        0x41 => I32Const(r.var_i32()?),
        0x42 => I64Const(r.var_i64()?),
        0x43 => F32Const(r.f32_le()?),
        0x44 => F64Const(r.f64_le()?),

        // --- i32 comparison ---
        0x45 => I32Eqz,
        0x46 => I32Eq,
        0x47 => I32Ne,
        0x48 => I32LtS,
        0x49 => I32LtU,
        0x4A => I32GtS,
        0x4B => I32GtU,
        0x4C => I32LeS,
        0x4D => I32LeU,
        0x4E => I32GeS,
        0x4F => I32GeU,

        // --- i64 comparison ---
        0x50 => I64Eqz,
        0x51 => I64Eq,
        0x52 => I64Ne,
        0x53 => I64LtS,
        0x54 => I64LtU,
        0x55 => I64GtS,
        0x56 => I64GtU,
        0x57 => I64LeS,
        0x58 => I64LeU,
        0x59 => I64GeS,
        0x5A => I64GeU,

        // --- float comparison ---
        0x5B => F32Eq,
        0x5C => F32Ne,
        0x5D => F32Lt,
        0x5E => F32Gt,
        0x5F => F32Le,
        0x60 => F32Ge,
        0x61 => F64Eq,
        0x62 => F64Ne,
        0x63 => F64Lt,
        0x64 => F64Gt,
        0x65 => F64Le,
        0x66 => F64Ge,

        // --- i32 arithmetic ---
        0x67 => I32Clz,
        0x68 => I32Ctz,
        0x69 => I32Popcnt,
        0x6A => I32Add,
        0x6B => I32Sub,
        0x6C => I32Mul,
        0x6D => I32DivS,
        0x6E => I32DivU,
        0x6F => I32RemS,
        0x70 => I32RemU,
        0x71 => I32And,
        0x72 => I32Or,
        0x73 => I32Xor,
        0x74 => I32Shl,
        0x75 => I32ShrS,
        0x76 => I32ShrU,
        0x77 => I32Rotl,
        0x78 => I32Rotr,

        // --- i64 arithmetic ---
        0x79 => I64Clz,
        0x7A => I64Ctz,
        0x7B => I64Popcnt,
        0x7C => I64Add,
        0x7D => I64Sub,
        0x7E => I64Mul,
        0x7F => I64DivS,
        0x80 => I64DivU,
        0x81 => I64RemS,
        0x82 => I64RemU,
        0x83 => I64And,
        0x84 => I64Or,
        0x85 => I64Xor,
        0x86 => I64Shl,
        0x87 => I64ShrS,
        0x88 => I64ShrU,
        0x89 => I64Rotl,
        0x8A => I64Rotr,

        // --- f32 arithmetic ---
        0x8B => F32Abs,
        0x8C => F32Neg,
        0x8D => F32Ceil,
        0x8E => F32Floor,
        0x8F => F32Trunc,
        0x90 => F32Nearest,
        0x91 => F32Sqrt,
        0x92 => F32Add,
        0x93 => F32Sub,
        0x94 => F32Mul,
        0x95 => F32Div,
        0x96 => F32Min,
        0x97 => F32Max,
        0x98 => F32Copysign,

        // --- f64 arithmetic ---
        0x99 => F64Abs,
        0x9A => F64Neg,
        0x9B => F64Ceil,
        0x9C => F64Floor,
        0x9D => F64Trunc,
        0x9E => F64Nearest,
        0x9F => F64Sqrt,
        0xA0 => F64Add,
        0xA1 => F64Sub,
        0xA2 => F64Mul,
        0xA3 => F64Div,
        0xA4 => F64Min,
        0xA5 => F64Max,
        0xA6 => F64Copysign,

        // --- Conversions ---
        0xA7 => I32WrapI64,
        0xA8 => I32TruncF32S,
        0xA9 => I32TruncF32U,
        0xAA => I32TruncF64S,
        0xAB => I32TruncF64U,
        0xAC => I64ExtendI32S,
        0xAD => I64ExtendI32U,
        0xAE => I64TruncF32S,
        0xAF => I64TruncF32U,
        0xB0 => I64TruncF64S,
        0xB1 => I64TruncF64U,
        0xB2 => F32ConvertI32S,
        0xB3 => F32ConvertI32U,
        0xB4 => F32ConvertI64S,
        0xB5 => F32ConvertI64U,
        0xB6 => F32DemoteF64,
        0xB7 => F64ConvertI32S,
        0xB8 => F64ConvertI32U,
        0xB9 => F64ConvertI64S,
        0xBA => F64ConvertI64U,
        0xBB => F64PromoteF32,
        0xBC => I32ReinterpretF32,
        0xBD => I64ReinterpretF64,
        0xBE => F32ReinterpretI32,
        0xBF => F64ReinterpretI64,

        // --- 0xFC prefix: only the saturating truncations are MVP+ here ---
        0xFC => {
            let sub = r.var_u32()?;
            match sub {
                0x00 => I32TruncSatF32S,
                0x01 => I32TruncSatF32U,
                0x02 => I32TruncSatF64S,
                0x03 => I32TruncSatF64U,
                0x04 => I64TruncSatF32S,
                0x05 => I64TruncSatF32U,
                0x06 => I64TruncSatF64S,
                0x07 => I64TruncSatF64U,
                _ => return Ok(Decoded::Unknown(opcode)),
            }
        }

        _ => return Ok(Decoded::Unknown(opcode)),
    };
    Ok(Decoded::Op(instr))
}
