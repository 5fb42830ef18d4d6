//! Type conversion operations
//!
//! Width conversions, float/integer conversions, saturating truncations,
//! sign extensions, and bit reinterpretation (WebAssembly specification
//! section 4.4.1.6). Trapping truncations reject NaN and out-of-range
//! inputs; the `trunc_sat` family saturates instead (NaN becomes 0).

use crate::ast::instruction::Instruction;
use crate::runtime::{StackManager, Trap, Value};

// ===== Integer width conversions =====

pub fn i32_wrap_i64(stack: &mut StackManager) -> Result<(), Trap> {
    let c = stack.pop_i64()?;
    stack.push(Value::I32(c as i32));
    Ok(())
}

pub fn i64_extend_i32_s(stack: &mut StackManager) -> Result<(), Trap> {
    let c = stack.pop_i32()?;
    stack.push(Value::I64(c as i64));
    Ok(())
}

pub fn i64_extend_i32_u(stack: &mut StackManager) -> Result<(), Trap> {
    let c = stack.pop_i32()?;
    stack.push(Value::I64(c as u32 as i64));
    Ok(())
}

// ===== Sign extensions =====

pub fn i32_extend8_s(stack: &mut StackManager) -> Result<(), Trap> {
    let c = stack.pop_i32()?;
    stack.push(Value::I32(c as i8 as i32));
    Ok(())
}

pub fn i32_extend16_s(stack: &mut StackManager) -> Result<(), Trap> {
    let c = stack.pop_i32()?;
    stack.push(Value::I32(c as i16 as i32));
    Ok(())
}

pub fn i64_extend8_s(stack: &mut StackManager) -> Result<(), Trap> {
    let c = stack.pop_i64()?;
    stack.push(Value::I64(c as i8 as i64));
    Ok(())
}

pub fn i64_extend16_s(stack: &mut StackManager) -> Result<(), Trap> {
    let c = stack.pop_i64()?;
    stack.push(Value::I64(c as i16 as i64));
    Ok(())
}

pub fn i64_extend32_s(stack: &mut StackManager) -> Result<(), Trap> {
    let c = stack.pop_i64()?;
    stack.push(Value::I64(c as i32 as i64));
    Ok(())
}

// ===== Reinterpretation (bit-exact) =====

pub fn i32_reinterpret_f32(stack: &mut StackManager) -> Result<(), Trap> {
    let c = stack.pop_f32()?;
    stack.push(Value::I32(c.to_bits() as i32));
    Ok(())
}

pub fn i64_reinterpret_f64(stack: &mut StackManager) -> Result<(), Trap> {
    let c = stack.pop_f64()?;
    stack.push(Value::I64(c.to_bits() as i64));
    Ok(())
}

pub fn f32_reinterpret_i32(stack: &mut StackManager) -> Result<(), Trap> {
    let c = stack.pop_i32()?;
    stack.push(Value::F32(f32::from_bits(c as u32)));
    Ok(())
}

pub fn f64_reinterpret_i64(stack: &mut StackManager) -> Result<(), Trap> {
    let c = stack.pop_i64()?;
    stack.push(Value::F64(f64::from_bits(c as u64)));
    Ok(())
}

// ===== Float width conversions =====

/// Demotion follows IEEE-754 round-to-nearest, ties-to-even (the `as`
/// cast semantics).
pub fn f32_demote_f64(stack: &mut StackManager) -> Result<(), Trap> {
    let c = stack.pop_f64()?;
    stack.push(Value::F32(c as f32));
    Ok(())
}

pub fn f64_promote_f32(stack: &mut StackManager) -> Result<(), Trap> {
    let c = stack.pop_f32()?;
    stack.push(Value::F64(c as f64));
    Ok(())
}

// ===== Integer to float =====

macro_rules! convert {
    ($name:ident, $pop:ident, $mid:ty, $variant:ident, $out:ty) => {
        pub fn $name(stack: &mut StackManager) -> Result<(), Trap> {
            let c = stack.$pop()?;
            stack.push(Value::$variant(c as $mid as $out));
            Ok(())
        }
    };
}

convert!(f32_convert_i32_s, pop_i32, i32, F32, f32);
convert!(f32_convert_i32_u, pop_i32, u32, F32, f32);
convert!(f32_convert_i64_s, pop_i64, i64, F32, f32);
convert!(f32_convert_i64_u, pop_i64, u64, F32, f32);
convert!(f64_convert_i32_s, pop_i32, i32, F64, f64);
convert!(f64_convert_i32_u, pop_i32, u32, F64, f64);
convert!(f64_convert_i64_s, pop_i64, i64, F64, f64);
convert!(f64_convert_i64_u, pop_i64, u64, F64, f64);

// ===== Trapping float to integer =====

/// Shared range discipline of the trapping truncations: NaN is an
/// invalid conversion, a truncated value outside [lo, hi] overflows.
macro_rules! trunc {
    ($name:ident, $pop:ident, $float:ty, $variant:ident, $int:ty, $lo:expr, $hi:expr) => {
        pub fn $name(stack: &mut StackManager) -> Result<(), Trap> {
            let c = stack.$pop()?;
            if c.is_nan() {
                return Err(Trap::InvalidConvToInt);
            }
            let t = c.trunc();
            if t < $lo || t >= $hi {
                return Err(Trap::IntegerOverflow);
            }
            stack.push(Value::$variant(t as $int as _));
            Ok(())
        }
    };
}

trunc!(i32_trunc_f32_s, pop_f32, f32, I32, i32, -2147483648.0f32, 2147483648.0f32);
trunc!(i32_trunc_f32_u, pop_f32, f32, I32, u32, -0.99999994f32, 4294967296.0f32);
trunc!(i32_trunc_f64_s, pop_f64, f64, I32, i32, -2147483648.0f64, 2147483648.0f64);
trunc!(i32_trunc_f64_u, pop_f64, f64, I32, u32, -0.9999999999999999f64, 4294967296.0f64);
trunc!(i64_trunc_f32_s, pop_f32, f32, I64, i64, -9223372036854775808.0f32, 9223372036854775808.0f32);
trunc!(i64_trunc_f32_u, pop_f32, f32, I64, u64, -0.99999994f32, 18446744073709551616.0f32);
trunc!(i64_trunc_f64_s, pop_f64, f64, I64, i64, -9223372036854775808.0f64, 9223372036854775808.0f64);
trunc!(i64_trunc_f64_u, pop_f64, f64, I64, u64, -0.9999999999999999f64, 18446744073709551616.0f64);

// ===== Saturating float to integer =====

/// The trunc_sat family never traps: NaN becomes 0, infinities and
/// out-of-range values clamp to the integer range.
macro_rules! trunc_sat {
    ($name:ident, $pop:ident, $variant:ident, $int:ty) => {
        pub fn $name(stack: &mut StackManager) -> Result<(), Trap> {
            let c = stack.$pop()?;
            // `as` performs exactly the saturating conversion.
            stack.push(Value::$variant(c as $int as _));
            Ok(())
        }
    };
}

trunc_sat!(i32_trunc_sat_f32_s, pop_f32, I32, i32);
trunc_sat!(i32_trunc_sat_f32_u, pop_f32, I32, u32);
trunc_sat!(i32_trunc_sat_f64_s, pop_f64, I32, i32);
trunc_sat!(i32_trunc_sat_f64_u, pop_f64, I32, u32);
trunc_sat!(i64_trunc_sat_f32_s, pop_f32, I64, i64);
trunc_sat!(i64_trunc_sat_f32_u, pop_f32, I64, u64);
trunc_sat!(i64_trunc_sat_f64_s, pop_f64, I64, i64);
trunc_sat!(i64_trunc_sat_f64_u, pop_f64, I64, u64);

/// Dispatch a conversion instruction, or `None` if `instr` is outside
/// this family.
pub fn run(instr: &Instruction, stack: &mut StackManager) -> Option<Result<(), Trap>> {
    use Instruction::*;
    Some(match instr {
        I32WrapI64 => i32_wrap_i64(stack),
        I64ExtendI32S => i64_extend_i32_s(stack),
        I64ExtendI32U => i64_extend_i32_u(stack),
        I32Extend8S => i32_extend8_s(stack),
        I32Extend16S => i32_extend16_s(stack),
        I64Extend8S => i64_extend8_s(stack),
        I64Extend16S => i64_extend16_s(stack),
        I64Extend32S => i64_extend32_s(stack),
        I32ReinterpretF32 => i32_reinterpret_f32(stack),
        I64ReinterpretF64 => i64_reinterpret_f64(stack),
        F32ReinterpretI32 => f32_reinterpret_i32(stack),
        F64ReinterpretI64 => f64_reinterpret_i64(stack),
        F32DemoteF64 => f32_demote_f64(stack),
        F64PromoteF32 => f64_promote_f32(stack),
        F32ConvertI32S => f32_convert_i32_s(stack),
        F32ConvertI32U => f32_convert_i32_u(stack),
        F32ConvertI64S => f32_convert_i64_s(stack),
        F32ConvertI64U => f32_convert_i64_u(stack),
        F64ConvertI32S => f64_convert_i32_s(stack),
        F64ConvertI32U => f64_convert_i32_u(stack),
        F64ConvertI64S => f64_convert_i64_s(stack),
        F64ConvertI64U => f64_convert_i64_u(stack),
        I32TruncF32S => i32_trunc_f32_s(stack),
        I32TruncF32U => i32_trunc_f32_u(stack),
        I32TruncF64S => i32_trunc_f64_s(stack),
        I32TruncF64U => i32_trunc_f64_u(stack),
        I64TruncF32S => i64_trunc_f32_s(stack),
        I64TruncF32U => i64_trunc_f32_u(stack),
        I64TruncF64S => i64_trunc_f64_s(stack),
        I64TruncF64U => i64_trunc_f64_u(stack),
        I32TruncSatF32S => i32_trunc_sat_f32_s(stack),
        I32TruncSatF32U => i32_trunc_sat_f32_u(stack),
        I32TruncSatF64S => i32_trunc_sat_f64_s(stack),
        I32TruncSatF64U => i32_trunc_sat_f64_u(stack),
        I64TruncSatF32S => i64_trunc_sat_f32_s(stack),
        I64TruncSatF32U => i64_trunc_sat_f32_u(stack),
        I64TruncSatF64S => i64_trunc_sat_f64_s(stack),
        I64TruncSatF64U => i64_trunc_sat_f64_u(stack),
        _ => return None,
    })
}
