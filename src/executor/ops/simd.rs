//! SIMD (v128) operations
//!
//! Lane-wise vector instructions over the 16-byte v128 representation.
//! The repetitive lane-wise bodies are generated from small macro tables;
//! the irregular ops (shuffle, swizzle, narrowing, dot products, the
//! conversion family, and the relaxed subset) are written out.

use crate::ast::instruction::{Instruction, MemArg};
use crate::executor::ops::memory::effective_address;
use crate::executor::ops::numeric::{wasm_fmax32, wasm_fmax64, wasm_fmin32, wasm_fmin64};
use crate::runtime::{MemoryInstance, ModuleInstance, StackManager, Trap, Value};

type V128 = [u8; 16];

// ===== Lane accessors =====

fn get_i8(v: V128) -> [i8; 16] {
    v.map(|b| b as i8)
}

fn set_i8(l: [i8; 16]) -> V128 {
    l.map(|b| b as u8)
}

fn get_u8(v: V128) -> [u8; 16] {
    v
}

fn set_u8(l: [u8; 16]) -> V128 {
    l
}

fn get_i16(v: V128) -> [i16; 8] {
    std::array::from_fn(|i| i16::from_le_bytes([v[i * 2], v[i * 2 + 1]]))
}

fn set_i16(l: [i16; 8]) -> V128 {
    let mut out = [0u8; 16];
    for (i, lane) in l.iter().enumerate() {
        out[i * 2..i * 2 + 2].copy_from_slice(&lane.to_le_bytes());
    }
    out
}

fn get_u16(v: V128) -> [u16; 8] {
    std::array::from_fn(|i| u16::from_le_bytes([v[i * 2], v[i * 2 + 1]]))
}

fn set_u16(l: [u16; 8]) -> V128 {
    let mut out = [0u8; 16];
    for (i, lane) in l.iter().enumerate() {
        out[i * 2..i * 2 + 2].copy_from_slice(&lane.to_le_bytes());
    }
    out
}

fn get_i32(v: V128) -> [i32; 4] {
    std::array::from_fn(|i| i32::from_le_bytes([v[i * 4], v[i * 4 + 1], v[i * 4 + 2], v[i * 4 + 3]]))
}

fn set_i32(l: [i32; 4]) -> V128 {
    let mut out = [0u8; 16];
    for (i, lane) in l.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&lane.to_le_bytes());
    }
    out
}

fn get_u32(v: V128) -> [u32; 4] {
    get_i32(v).map(|l| l as u32)
}

fn set_u32(l: [u32; 4]) -> V128 {
    set_i32(l.map(|l| l as i32))
}

fn get_i64(v: V128) -> [i64; 2] {
    std::array::from_fn(|i| {
        i64::from_le_bytes([
            v[i * 8],
            v[i * 8 + 1],
            v[i * 8 + 2],
            v[i * 8 + 3],
            v[i * 8 + 4],
            v[i * 8 + 5],
            v[i * 8 + 6],
            v[i * 8 + 7],
        ])
    })
}

fn set_i64(l: [i64; 2]) -> V128 {
    let mut out = [0u8; 16];
    for (i, lane) in l.iter().enumerate() {
        out[i * 8..i * 8 + 8].copy_from_slice(&lane.to_le_bytes());
    }
    out
}

fn get_u64(v: V128) -> [u64; 2] {
    get_i64(v).map(|l| l as u64)
}

fn set_u64(l: [u64; 2]) -> V128 {
    set_i64(l.map(|l| l as i64))
}

fn get_f32(v: V128) -> [f32; 4] {
    get_u32(v).map(f32::from_bits)
}

fn set_f32(l: [f32; 4]) -> V128 {
    set_u32(l.map(|f| f.to_bits()))
}

fn get_f64(v: V128) -> [f64; 2] {
    get_u64(v).map(f64::from_bits)
}

fn set_f64(l: [f64; 2]) -> V128 {
    set_u64(l.map(|f| f.to_bits()))
}

// ===== Saturation helpers =====

fn sat_i8(v: i16) -> i8 {
    v.clamp(i8::MIN as i16, i8::MAX as i16) as i8
}

fn sat_u8(v: i16) -> u8 {
    v.clamp(0, u8::MAX as i16) as u8
}

fn sat_i16(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn sat_u16(v: i32) -> u16 {
    v.clamp(0, u16::MAX as i32) as u16
}

// ===== Macro-generated lane-wise families =====

macro_rules! v_binop {
    ($name:ident, $get:ident, $set:ident, $f:expr) => {
        pub fn $name(stack: &mut StackManager) -> Result<(), Trap> {
            let b = stack.pop_v128()?;
            let a = stack.pop_v128()?;
            let (la, lb) = ($get(a), $get(b));
            let mut out = la;
            for i in 0..out.len() {
                out[i] = $f(la[i], lb[i]);
            }
            stack.push(Value::V128($set(out)));
            Ok(())
        }
    };
}

macro_rules! v_unop {
    ($name:ident, $get:ident, $set:ident, $f:expr) => {
        pub fn $name(stack: &mut StackManager) -> Result<(), Trap> {
            let a = stack.pop_v128()?;
            let mut out = $get(a);
            for lane in out.iter_mut() {
                *lane = $f(*lane);
            }
            stack.push(Value::V128($set(out)));
            Ok(())
        }
    };
}

// Comparisons produce an all-ones or all-zeros mask per lane.
macro_rules! v_cmp {
    ($name:ident, $get:ident, $setmask:ident, $mask:ty, $f:expr) => {
        pub fn $name(stack: &mut StackManager) -> Result<(), Trap> {
            let b = stack.pop_v128()?;
            let a = stack.pop_v128()?;
            let (la, lb) = ($get(a), $get(b));
            let mut out = [0 as $mask; { 16 / std::mem::size_of::<$mask>() }];
            for i in 0..out.len() {
                out[i] = if $f(la[i], lb[i]) { !0 } else { 0 };
            }
            stack.push(Value::V128($setmask(out)));
            Ok(())
        }
    };
}

// Shift counts are taken modulo the lane width.
macro_rules! v_shift {
    ($name:ident, $get:ident, $set:ident, $bits:expr, $f:expr) => {
        pub fn $name(stack: &mut StackManager) -> Result<(), Trap> {
            let count = stack.pop_i32()? as u32 % $bits;
            let a = stack.pop_v128()?;
            let mut out = $get(a);
            for lane in out.iter_mut() {
                *lane = $f(*lane, count);
            }
            stack.push(Value::V128($set(out)));
            Ok(())
        }
    };
}

macro_rules! v_splat {
    ($name:ident, $pop:ident, $set:ident, $lanes:expr, $conv:expr) => {
        pub fn $name(stack: &mut StackManager) -> Result<(), Trap> {
            let v = stack.$pop()?;
            stack.push(Value::V128($set([$conv(v); $lanes])));
            Ok(())
        }
    };
}

// ===== Bitwise =====

pub fn v128_not(stack: &mut StackManager) -> Result<(), Trap> {
    let a = stack.pop_v128()?;
    stack.push(Value::V128(a.map(|b| !b)));
    Ok(())
}

v_binop!(v128_and, get_u8, set_u8, |a, b| a & b);
v_binop!(v128_andnot, get_u8, set_u8, |a: u8, b: u8| a & !b);
v_binop!(v128_or, get_u8, set_u8, |a, b| a | b);
v_binop!(v128_xor, get_u8, set_u8, |a, b| a ^ b);

pub fn v128_bitselect(stack: &mut StackManager) -> Result<(), Trap> {
    let c = stack.pop_v128()?;
    let b = stack.pop_v128()?;
    let a = stack.pop_v128()?;
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = (a[i] & c[i]) | (b[i] & !c[i]);
    }
    stack.push(Value::V128(out));
    Ok(())
}

pub fn v128_any_true(stack: &mut StackManager) -> Result<(), Trap> {
    let a = stack.pop_v128()?;
    stack.push(Value::I32(if a.iter().any(|&b| b != 0) { 1 } else { 0 }));
    Ok(())
}

macro_rules! v_all_true {
    ($name:ident, $get:ident) => {
        pub fn $name(stack: &mut StackManager) -> Result<(), Trap> {
            let a = stack.pop_v128()?;
            let all = $get(a).iter().all(|&l| l != 0);
            stack.push(Value::I32(if all { 1 } else { 0 }));
            Ok(())
        }
    };
}

v_all_true!(i8x16_all_true, get_u8);
v_all_true!(i16x8_all_true, get_u16);
v_all_true!(i32x4_all_true, get_u32);
v_all_true!(i64x2_all_true, get_u64);

macro_rules! v_bitmask {
    ($name:ident, $get:ident) => {
        pub fn $name(stack: &mut StackManager) -> Result<(), Trap> {
            let a = stack.pop_v128()?;
            let mut mask = 0i32;
            for (i, lane) in $get(a).iter().enumerate() {
                if *lane < 0 {
                    mask |= 1 << i;
                }
            }
            stack.push(Value::I32(mask));
            Ok(())
        }
    };
}

v_bitmask!(i8x16_bitmask, get_i8);
v_bitmask!(i16x8_bitmask, get_i16);
v_bitmask!(i32x4_bitmask, get_i32);
v_bitmask!(i64x2_bitmask, get_i64);

// ===== Shuffle, swizzle, splat =====

/// i8x16.shuffle: the immediate selects from the 32 bytes of both
/// operands (lane indices are validated statically).
pub fn i8x16_shuffle(stack: &mut StackManager, lanes: &[u8; 16]) -> Result<(), Trap> {
    let b = stack.pop_v128()?;
    let a = stack.pop_v128()?;
    let mut out = [0u8; 16];
    for (i, &sel) in lanes.iter().enumerate() {
        out[i] = if sel < 16 { a[sel as usize] } else { b[(sel - 16) as usize] };
    }
    stack.push(Value::V128(out));
    Ok(())
}

/// i8x16.swizzle: dynamic byte selection; out-of-range indices produce 0.
pub fn i8x16_swizzle(stack: &mut StackManager) -> Result<(), Trap> {
    let s = stack.pop_v128()?;
    let a = stack.pop_v128()?;
    let mut out = [0u8; 16];
    for i in 0..16 {
        let idx = s[i] as usize;
        out[i] = if idx < 16 { a[idx] } else { 0 };
    }
    stack.push(Value::V128(out));
    Ok(())
}

v_splat!(i8x16_splat, pop_i32, set_u8, 16, |v: i32| v as u8);
v_splat!(i16x8_splat, pop_i32, set_u16, 8, |v: i32| v as u16);
v_splat!(i32x4_splat, pop_i32, set_i32, 4, |v: i32| v);
v_splat!(i64x2_splat, pop_i64, set_i64, 2, |v: i64| v);
v_splat!(f32x4_splat, pop_f32, set_f32, 4, |v: f32| v);
v_splat!(f64x2_splat, pop_f64, set_f64, 2, |v: f64| v);

// ===== Extract and replace =====

macro_rules! v_extract {
    ($name:ident, $get:ident, $variant:ident, $conv:ty) => {
        pub fn $name(stack: &mut StackManager, lane: u8) -> Result<(), Trap> {
            let a = stack.pop_v128()?;
            let lanes = $get(a);
            stack.push(Value::$variant(lanes[lane as usize] as $conv as _));
            Ok(())
        }
    };
}

macro_rules! v_replace {
    ($name:ident, $get:ident, $set:ident, $pop:ident, $conv:expr) => {
        pub fn $name(stack: &mut StackManager, lane: u8) -> Result<(), Trap> {
            let v = stack.$pop()?;
            let a = stack.pop_v128()?;
            let mut lanes = $get(a);
            lanes[lane as usize] = $conv(v);
            stack.push(Value::V128($set(lanes)));
            Ok(())
        }
    };
}

v_extract!(i8x16_extract_lane_s, get_i8, I32, i8);
v_extract!(i8x16_extract_lane_u, get_u8, I32, u8);
v_extract!(i16x8_extract_lane_s, get_i16, I32, i16);
v_extract!(i16x8_extract_lane_u, get_u16, I32, u16);
v_extract!(i32x4_extract_lane, get_i32, I32, i32);
v_extract!(i64x2_extract_lane, get_i64, I64, i64);

pub fn f32x4_extract_lane(stack: &mut StackManager, lane: u8) -> Result<(), Trap> {
    let a = stack.pop_v128()?;
    stack.push(Value::F32(get_f32(a)[lane as usize]));
    Ok(())
}

pub fn f64x2_extract_lane(stack: &mut StackManager, lane: u8) -> Result<(), Trap> {
    let a = stack.pop_v128()?;
    stack.push(Value::F64(get_f64(a)[lane as usize]));
    Ok(())
}

v_replace!(i8x16_replace_lane, get_u8, set_u8, pop_i32, |v: i32| v as u8);
v_replace!(i16x8_replace_lane, get_u16, set_u16, pop_i32, |v: i32| v as u16);
v_replace!(i32x4_replace_lane, get_i32, set_i32, pop_i32, |v: i32| v);
v_replace!(i64x2_replace_lane, get_i64, set_i64, pop_i64, |v: i64| v);
v_replace!(f32x4_replace_lane, get_f32, set_f32, pop_f32, |v: f32| v);
v_replace!(f64x2_replace_lane, get_f64, set_f64, pop_f64, |v: f64| v);

// ===== Integer comparisons =====

v_cmp!(i8x16_eq, get_i8, set_u8, u8, |a, b| a == b);
v_cmp!(i8x16_ne, get_i8, set_u8, u8, |a, b| a != b);
v_cmp!(i8x16_lt_s, get_i8, set_u8, u8, |a, b| a < b);
v_cmp!(i8x16_lt_u, get_u8, set_u8, u8, |a, b| a < b);
v_cmp!(i8x16_gt_s, get_i8, set_u8, u8, |a, b| a > b);
v_cmp!(i8x16_gt_u, get_u8, set_u8, u8, |a, b| a > b);
v_cmp!(i8x16_le_s, get_i8, set_u8, u8, |a, b| a <= b);
v_cmp!(i8x16_le_u, get_u8, set_u8, u8, |a, b| a <= b);
v_cmp!(i8x16_ge_s, get_i8, set_u8, u8, |a, b| a >= b);
v_cmp!(i8x16_ge_u, get_u8, set_u8, u8, |a, b| a >= b);

v_cmp!(i16x8_eq, get_i16, set_u16, u16, |a, b| a == b);
v_cmp!(i16x8_ne, get_i16, set_u16, u16, |a, b| a != b);
v_cmp!(i16x8_lt_s, get_i16, set_u16, u16, |a, b| a < b);
v_cmp!(i16x8_lt_u, get_u16, set_u16, u16, |a, b| a < b);
v_cmp!(i16x8_gt_s, get_i16, set_u16, u16, |a, b| a > b);
v_cmp!(i16x8_gt_u, get_u16, set_u16, u16, |a, b| a > b);
v_cmp!(i16x8_le_s, get_i16, set_u16, u16, |a, b| a <= b);
v_cmp!(i16x8_le_u, get_u16, set_u16, u16, |a, b| a <= b);
v_cmp!(i16x8_ge_s, get_i16, set_u16, u16, |a, b| a >= b);
v_cmp!(i16x8_ge_u, get_u16, set_u16, u16, |a, b| a >= b);

v_cmp!(i32x4_eq, get_i32, set_u32, u32, |a, b| a == b);
v_cmp!(i32x4_ne, get_i32, set_u32, u32, |a, b| a != b);
v_cmp!(i32x4_lt_s, get_i32, set_u32, u32, |a, b| a < b);
v_cmp!(i32x4_lt_u, get_u32, set_u32, u32, |a, b| a < b);
v_cmp!(i32x4_gt_s, get_i32, set_u32, u32, |a, b| a > b);
v_cmp!(i32x4_gt_u, get_u32, set_u32, u32, |a, b| a > b);
v_cmp!(i32x4_le_s, get_i32, set_u32, u32, |a, b| a <= b);
v_cmp!(i32x4_le_u, get_u32, set_u32, u32, |a, b| a <= b);
v_cmp!(i32x4_ge_s, get_i32, set_u32, u32, |a, b| a >= b);
v_cmp!(i32x4_ge_u, get_u32, set_u32, u32, |a, b| a >= b);

v_cmp!(i64x2_eq, get_i64, set_u64, u64, |a, b| a == b);
v_cmp!(i64x2_ne, get_i64, set_u64, u64, |a, b| a != b);
v_cmp!(i64x2_lt_s, get_i64, set_u64, u64, |a, b| a < b);
v_cmp!(i64x2_gt_s, get_i64, set_u64, u64, |a, b| a > b);
v_cmp!(i64x2_le_s, get_i64, set_u64, u64, |a, b| a <= b);
v_cmp!(i64x2_ge_s, get_i64, set_u64, u64, |a, b| a >= b);

v_cmp!(f32x4_eq, get_f32, set_u32, u32, |a, b| a == b);
v_cmp!(f32x4_ne, get_f32, set_u32, u32, |a, b| a != b);
v_cmp!(f32x4_lt, get_f32, set_u32, u32, |a, b| a < b);
v_cmp!(f32x4_gt, get_f32, set_u32, u32, |a, b| a > b);
v_cmp!(f32x4_le, get_f32, set_u32, u32, |a, b| a <= b);
v_cmp!(f32x4_ge, get_f32, set_u32, u32, |a, b| a >= b);

v_cmp!(f64x2_eq, get_f64, set_u64, u64, |a, b| a == b);
v_cmp!(f64x2_ne, get_f64, set_u64, u64, |a, b| a != b);
v_cmp!(f64x2_lt, get_f64, set_u64, u64, |a, b| a < b);
v_cmp!(f64x2_gt, get_f64, set_u64, u64, |a, b| a > b);
v_cmp!(f64x2_le, get_f64, set_u64, u64, |a, b| a <= b);
v_cmp!(f64x2_ge, get_f64, set_u64, u64, |a, b| a >= b);

// ===== Integer arithmetic =====

v_unop!(i8x16_abs, get_i8, set_i8, |l: i8| l.wrapping_abs());
v_unop!(i8x16_neg, get_i8, set_i8, |l: i8| l.wrapping_neg());
v_unop!(i8x16_popcnt, get_u8, set_u8, |l: u8| l.count_ones() as u8);
v_unop!(i16x8_abs, get_i16, set_i16, |l: i16| l.wrapping_abs());
v_unop!(i16x8_neg, get_i16, set_i16, |l: i16| l.wrapping_neg());
v_unop!(i32x4_abs, get_i32, set_i32, |l: i32| l.wrapping_abs());
v_unop!(i32x4_neg, get_i32, set_i32, |l: i32| l.wrapping_neg());
v_unop!(i64x2_abs, get_i64, set_i64, |l: i64| l.wrapping_abs());
v_unop!(i64x2_neg, get_i64, set_i64, |l: i64| l.wrapping_neg());

v_binop!(i8x16_add, get_i8, set_i8, |a: i8, b: i8| a.wrapping_add(b));
v_binop!(i8x16_sub, get_i8, set_i8, |a: i8, b: i8| a.wrapping_sub(b));
v_binop!(i8x16_add_sat_s, get_i8, set_i8, |a: i8, b: i8| a.saturating_add(b));
v_binop!(i8x16_add_sat_u, get_u8, set_u8, |a: u8, b: u8| a.saturating_add(b));
v_binop!(i8x16_sub_sat_s, get_i8, set_i8, |a: i8, b: i8| a.saturating_sub(b));
v_binop!(i8x16_sub_sat_u, get_u8, set_u8, |a: u8, b: u8| a.saturating_sub(b));
v_binop!(i8x16_min_s, get_i8, set_i8, |a: i8, b: i8| a.min(b));
v_binop!(i8x16_min_u, get_u8, set_u8, |a: u8, b: u8| a.min(b));
v_binop!(i8x16_max_s, get_i8, set_i8, |a: i8, b: i8| a.max(b));
v_binop!(i8x16_max_u, get_u8, set_u8, |a: u8, b: u8| a.max(b));
v_binop!(i8x16_avgr_u, get_u8, set_u8, |a: u8, b: u8| {
    ((a as u16 + b as u16 + 1) / 2) as u8
});

v_binop!(i16x8_add, get_i16, set_i16, |a: i16, b: i16| a.wrapping_add(b));
v_binop!(i16x8_sub, get_i16, set_i16, |a: i16, b: i16| a.wrapping_sub(b));
v_binop!(i16x8_mul, get_i16, set_i16, |a: i16, b: i16| a.wrapping_mul(b));
v_binop!(i16x8_add_sat_s, get_i16, set_i16, |a: i16, b: i16| a.saturating_add(b));
v_binop!(i16x8_add_sat_u, get_u16, set_u16, |a: u16, b: u16| a.saturating_add(b));
v_binop!(i16x8_sub_sat_s, get_i16, set_i16, |a: i16, b: i16| a.saturating_sub(b));
v_binop!(i16x8_sub_sat_u, get_u16, set_u16, |a: u16, b: u16| a.saturating_sub(b));
v_binop!(i16x8_min_s, get_i16, set_i16, |a: i16, b: i16| a.min(b));
v_binop!(i16x8_min_u, get_u16, set_u16, |a: u16, b: u16| a.min(b));
v_binop!(i16x8_max_s, get_i16, set_i16, |a: i16, b: i16| a.max(b));
v_binop!(i16x8_max_u, get_u16, set_u16, |a: u16, b: u16| a.max(b));
v_binop!(i16x8_avgr_u, get_u16, set_u16, |a: u16, b: u16| {
    ((a as u32 + b as u32 + 1) / 2) as u16
});
// Q15 fixed-point rounding multiply, saturated.
v_binop!(i16x8_q15mulr_sat_s, get_i16, set_i16, |a: i16, b: i16| {
    sat_i16(((a as i32 * b as i32 + 0x4000) >> 15).clamp(i16::MIN as i32 - 1, i16::MAX as i32 + 1))
});

v_binop!(i32x4_add, get_i32, set_i32, |a: i32, b: i32| a.wrapping_add(b));
v_binop!(i32x4_sub, get_i32, set_i32, |a: i32, b: i32| a.wrapping_sub(b));
v_binop!(i32x4_mul, get_i32, set_i32, |a: i32, b: i32| a.wrapping_mul(b));
v_binop!(i32x4_min_s, get_i32, set_i32, |a: i32, b: i32| a.min(b));
v_binop!(i32x4_min_u, get_u32, set_u32, |a: u32, b: u32| a.min(b));
v_binop!(i32x4_max_s, get_i32, set_i32, |a: i32, b: i32| a.max(b));
v_binop!(i32x4_max_u, get_u32, set_u32, |a: u32, b: u32| a.max(b));

v_binop!(i64x2_add, get_i64, set_i64, |a: i64, b: i64| a.wrapping_add(b));
v_binop!(i64x2_sub, get_i64, set_i64, |a: i64, b: i64| a.wrapping_sub(b));
v_binop!(i64x2_mul, get_i64, set_i64, |a: i64, b: i64| a.wrapping_mul(b));

// ===== Shifts =====

v_shift!(i8x16_shl, get_u8, set_u8, 8, |l: u8, c: u32| l.wrapping_shl(c));
v_shift!(i8x16_shr_s, get_i8, set_i8, 8, |l: i8, c: u32| l.wrapping_shr(c));
v_shift!(i8x16_shr_u, get_u8, set_u8, 8, |l: u8, c: u32| l.wrapping_shr(c));
v_shift!(i16x8_shl, get_u16, set_u16, 16, |l: u16, c: u32| l.wrapping_shl(c));
v_shift!(i16x8_shr_s, get_i16, set_i16, 16, |l: i16, c: u32| l.wrapping_shr(c));
v_shift!(i16x8_shr_u, get_u16, set_u16, 16, |l: u16, c: u32| l.wrapping_shr(c));
v_shift!(i32x4_shl, get_u32, set_u32, 32, |l: u32, c: u32| l.wrapping_shl(c));
v_shift!(i32x4_shr_s, get_i32, set_i32, 32, |l: i32, c: u32| l.wrapping_shr(c));
v_shift!(i32x4_shr_u, get_u32, set_u32, 32, |l: u32, c: u32| l.wrapping_shr(c));
v_shift!(i64x2_shl, get_u64, set_u64, 64, |l: u64, c: u32| l.wrapping_shl(c));
v_shift!(i64x2_shr_s, get_i64, set_i64, 64, |l: i64, c: u32| l.wrapping_shr(c));
v_shift!(i64x2_shr_u, get_u64, set_u64, 64, |l: u64, c: u32| l.wrapping_shr(c));

// ===== Narrowing, widening, pairwise, extended multiplies =====

pub fn i8x16_narrow_i16x8_s(stack: &mut StackManager) -> Result<(), Trap> {
    let b = stack.pop_v128()?;
    let a = stack.pop_v128()?;
    let (la, lb) = (get_i16(a), get_i16(b));
    let mut out = [0i8; 16];
    for i in 0..8 {
        out[i] = sat_i8(la[i]);
        out[i + 8] = sat_i8(lb[i]);
    }
    stack.push(Value::V128(set_i8(out)));
    Ok(())
}

pub fn i8x16_narrow_i16x8_u(stack: &mut StackManager) -> Result<(), Trap> {
    let b = stack.pop_v128()?;
    let a = stack.pop_v128()?;
    let (la, lb) = (get_i16(a), get_i16(b));
    let mut out = [0u8; 16];
    for i in 0..8 {
        out[i] = sat_u8(la[i]);
        out[i + 8] = sat_u8(lb[i]);
    }
    stack.push(Value::V128(set_u8(out)));
    Ok(())
}

pub fn i16x8_narrow_i32x4_s(stack: &mut StackManager) -> Result<(), Trap> {
    let b = stack.pop_v128()?;
    let a = stack.pop_v128()?;
    let (la, lb) = (get_i32(a), get_i32(b));
    let mut out = [0i16; 8];
    for i in 0..4 {
        out[i] = sat_i16(la[i]);
        out[i + 4] = sat_i16(lb[i]);
    }
    stack.push(Value::V128(set_i16(out)));
    Ok(())
}

pub fn i16x8_narrow_i32x4_u(stack: &mut StackManager) -> Result<(), Trap> {
    let b = stack.pop_v128()?;
    let a = stack.pop_v128()?;
    let (la, lb) = (get_i32(a), get_i32(b));
    let mut out = [0u16; 8];
    for i in 0..4 {
        out[i] = sat_u16(la[i]);
        out[i + 4] = sat_u16(lb[i]);
    }
    stack.push(Value::V128(set_u16(out)));
    Ok(())
}

macro_rules! v_extend {
    ($name:ident, $get:ident, $set:ident, $half:expr, $offset:expr, $wide:ty) => {
        pub fn $name(stack: &mut StackManager) -> Result<(), Trap> {
            let a = stack.pop_v128()?;
            let lanes = $get(a);
            let out = std::array::from_fn(|i| lanes[i + $offset] as $wide);
            stack.push(Value::V128($set(out)));
            Ok(())
        }
    };
}

v_extend!(i16x8_extend_low_i8x16_s, get_i8, set_i16, 8, 0, i16);
v_extend!(i16x8_extend_high_i8x16_s, get_i8, set_i16, 8, 8, i16);
v_extend!(i16x8_extend_low_i8x16_u, get_u8, set_u16, 8, 0, u16);
v_extend!(i16x8_extend_high_i8x16_u, get_u8, set_u16, 8, 8, u16);
v_extend!(i32x4_extend_low_i16x8_s, get_i16, set_i32, 4, 0, i32);
v_extend!(i32x4_extend_high_i16x8_s, get_i16, set_i32, 4, 4, i32);
v_extend!(i32x4_extend_low_i16x8_u, get_u16, set_u32, 4, 0, u32);
v_extend!(i32x4_extend_high_i16x8_u, get_u16, set_u32, 4, 4, u32);
v_extend!(i64x2_extend_low_i32x4_s, get_i32, set_i64, 2, 0, i64);
v_extend!(i64x2_extend_high_i32x4_s, get_i32, set_i64, 2, 2, i64);
v_extend!(i64x2_extend_low_i32x4_u, get_u32, set_u64, 2, 0, u64);
v_extend!(i64x2_extend_high_i32x4_u, get_u32, set_u64, 2, 2, u64);

macro_rules! v_extadd_pairwise {
    ($name:ident, $get:ident, $set:ident, $wide:ty) => {
        pub fn $name(stack: &mut StackManager) -> Result<(), Trap> {
            let a = stack.pop_v128()?;
            let lanes = $get(a);
            let out = std::array::from_fn(|i| lanes[i * 2] as $wide + lanes[i * 2 + 1] as $wide);
            stack.push(Value::V128($set(out)));
            Ok(())
        }
    };
}

v_extadd_pairwise!(i16x8_extadd_pairwise_i8x16_s, get_i8, set_i16, i16);
v_extadd_pairwise!(i16x8_extadd_pairwise_i8x16_u, get_u8, set_u16, u16);
v_extadd_pairwise!(i32x4_extadd_pairwise_i16x8_s, get_i16, set_i32, i32);
v_extadd_pairwise!(i32x4_extadd_pairwise_i16x8_u, get_u16, set_u32, u32);

macro_rules! v_extmul {
    ($name:ident, $get:ident, $set:ident, $offset:expr, $wide:ty) => {
        pub fn $name(stack: &mut StackManager) -> Result<(), Trap> {
            let b = stack.pop_v128()?;
            let a = stack.pop_v128()?;
            let (la, lb) = ($get(a), $get(b));
            let out = std::array::from_fn(|i| la[i + $offset] as $wide * lb[i + $offset] as $wide);
            stack.push(Value::V128($set(out)));
            Ok(())
        }
    };
}

v_extmul!(i16x8_extmul_low_i8x16_s, get_i8, set_i16, 0, i16);
v_extmul!(i16x8_extmul_high_i8x16_s, get_i8, set_i16, 8, i16);
v_extmul!(i16x8_extmul_low_i8x16_u, get_u8, set_u16, 0, u16);
v_extmul!(i16x8_extmul_high_i8x16_u, get_u8, set_u16, 8, u16);
v_extmul!(i32x4_extmul_low_i16x8_s, get_i16, set_i32, 0, i32);
v_extmul!(i32x4_extmul_high_i16x8_s, get_i16, set_i32, 4, i32);
v_extmul!(i32x4_extmul_low_i16x8_u, get_u16, set_u32, 0, u32);
v_extmul!(i32x4_extmul_high_i16x8_u, get_u16, set_u32, 4, u32);
v_extmul!(i64x2_extmul_low_i32x4_s, get_i32, set_i64, 0, i64);
v_extmul!(i64x2_extmul_high_i32x4_s, get_i32, set_i64, 2, i64);
v_extmul!(i64x2_extmul_low_i32x4_u, get_u32, set_u64, 0, u64);
v_extmul!(i64x2_extmul_high_i32x4_u, get_u32, set_u64, 2, u64);

/// i32x4.dot_i16x8_s: pairwise products summed into the wider lanes.
pub fn i32x4_dot_i16x8_s(stack: &mut StackManager) -> Result<(), Trap> {
    let b = stack.pop_v128()?;
    let a = stack.pop_v128()?;
    let (la, lb) = (get_i16(a), get_i16(b));
    let out = std::array::from_fn(|i| {
        la[i * 2] as i32 * lb[i * 2] as i32 + la[i * 2 + 1] as i32 * lb[i * 2 + 1] as i32
    });
    stack.push(Value::V128(set_i32(out)));
    Ok(())
}

// ===== Float arithmetic =====

v_unop!(f32x4_ceil, get_f32, set_f32, |l: f32| l.ceil());
v_unop!(f32x4_floor, get_f32, set_f32, |l: f32| l.floor());
v_unop!(f32x4_trunc, get_f32, set_f32, |l: f32| l.trunc());
v_unop!(f32x4_nearest, get_f32, set_f32, |l: f32| l.round_ties_even());
v_unop!(f32x4_abs, get_f32, set_f32, |l: f32| l.abs());
v_unop!(f32x4_neg, get_f32, set_f32, |l: f32| -l);
v_unop!(f32x4_sqrt, get_f32, set_f32, |l: f32| l.sqrt());
v_unop!(f64x2_ceil, get_f64, set_f64, |l: f64| l.ceil());
v_unop!(f64x2_floor, get_f64, set_f64, |l: f64| l.floor());
v_unop!(f64x2_trunc, get_f64, set_f64, |l: f64| l.trunc());
v_unop!(f64x2_nearest, get_f64, set_f64, |l: f64| l.round_ties_even());
v_unop!(f64x2_abs, get_f64, set_f64, |l: f64| l.abs());
v_unop!(f64x2_neg, get_f64, set_f64, |l: f64| -l);
v_unop!(f64x2_sqrt, get_f64, set_f64, |l: f64| l.sqrt());

v_binop!(f32x4_add, get_f32, set_f32, |a: f32, b: f32| a + b);
v_binop!(f32x4_sub, get_f32, set_f32, |a: f32, b: f32| a - b);
v_binop!(f32x4_mul, get_f32, set_f32, |a: f32, b: f32| a * b);
v_binop!(f32x4_div, get_f32, set_f32, |a: f32, b: f32| a / b);
v_binop!(f32x4_min, get_f32, set_f32, wasm_fmin32);
v_binop!(f32x4_max, get_f32, set_f32, wasm_fmax32);
// Pseudo-min/max: a plain comparison select, no NaN canonicalisation.
v_binop!(f32x4_pmin, get_f32, set_f32, |a: f32, b: f32| if b < a { b } else { a });
v_binop!(f32x4_pmax, get_f32, set_f32, |a: f32, b: f32| if a < b { b } else { a });

v_binop!(f64x2_add, get_f64, set_f64, |a: f64, b: f64| a + b);
v_binop!(f64x2_sub, get_f64, set_f64, |a: f64, b: f64| a - b);
v_binop!(f64x2_mul, get_f64, set_f64, |a: f64, b: f64| a * b);
v_binop!(f64x2_div, get_f64, set_f64, |a: f64, b: f64| a / b);
v_binop!(f64x2_min, get_f64, set_f64, wasm_fmin64);
v_binop!(f64x2_max, get_f64, set_f64, wasm_fmax64);
v_binop!(f64x2_pmin, get_f64, set_f64, |a: f64, b: f64| if b < a { b } else { a });
v_binop!(f64x2_pmax, get_f64, set_f64, |a: f64, b: f64| if a < b { b } else { a });

// ===== Conversions =====

pub fn i32x4_trunc_sat_f32x4_s(stack: &mut StackManager) -> Result<(), Trap> {
    let a = stack.pop_v128()?;
    stack.push(Value::V128(set_i32(get_f32(a).map(|l| l as i32))));
    Ok(())
}

pub fn i32x4_trunc_sat_f32x4_u(stack: &mut StackManager) -> Result<(), Trap> {
    let a = stack.pop_v128()?;
    stack.push(Value::V128(set_u32(get_f32(a).map(|l| l as u32))));
    Ok(())
}

pub fn f32x4_convert_i32x4_s(stack: &mut StackManager) -> Result<(), Trap> {
    let a = stack.pop_v128()?;
    stack.push(Value::V128(set_f32(get_i32(a).map(|l| l as f32))));
    Ok(())
}

pub fn f32x4_convert_i32x4_u(stack: &mut StackManager) -> Result<(), Trap> {
    let a = stack.pop_v128()?;
    stack.push(Value::V128(set_f32(get_u32(a).map(|l| l as f32))));
    Ok(())
}

pub fn i32x4_trunc_sat_f64x2_s_zero(stack: &mut StackManager) -> Result<(), Trap> {
    let a = stack.pop_v128()?;
    let lanes = get_f64(a);
    stack.push(Value::V128(set_i32([lanes[0] as i32, lanes[1] as i32, 0, 0])));
    Ok(())
}

pub fn i32x4_trunc_sat_f64x2_u_zero(stack: &mut StackManager) -> Result<(), Trap> {
    let a = stack.pop_v128()?;
    let lanes = get_f64(a);
    stack.push(Value::V128(set_u32([lanes[0] as u32, lanes[1] as u32, 0, 0])));
    Ok(())
}

pub fn f64x2_convert_low_i32x4_s(stack: &mut StackManager) -> Result<(), Trap> {
    let a = stack.pop_v128()?;
    let lanes = get_i32(a);
    stack.push(Value::V128(set_f64([lanes[0] as f64, lanes[1] as f64])));
    Ok(())
}

pub fn f64x2_convert_low_i32x4_u(stack: &mut StackManager) -> Result<(), Trap> {
    let a = stack.pop_v128()?;
    let lanes = get_u32(a);
    stack.push(Value::V128(set_f64([lanes[0] as f64, lanes[1] as f64])));
    Ok(())
}

pub fn f32x4_demote_f64x2_zero(stack: &mut StackManager) -> Result<(), Trap> {
    let a = stack.pop_v128()?;
    let lanes = get_f64(a);
    stack.push(Value::V128(set_f32([lanes[0] as f32, lanes[1] as f32, 0.0, 0.0])));
    Ok(())
}

pub fn f64x2_promote_low_f32x4(stack: &mut StackManager) -> Result<(), Trap> {
    let a = stack.pop_v128()?;
    let lanes = get_f32(a);
    stack.push(Value::V128(set_f64([lanes[0] as f64, lanes[1] as f64])));
    Ok(())
}

// ===== Relaxed SIMD =====
//
// The relaxed ops are implemented with their deterministic fallback
// semantics: laneselect behaves as bitselect, the dot products compute
// the exact widened sums.

pub fn relaxed_laneselect(stack: &mut StackManager) -> Result<(), Trap> {
    v128_bitselect(stack)
}

pub fn i16x8_relaxed_dot_i8x16_i7x16_s(stack: &mut StackManager) -> Result<(), Trap> {
    let b = stack.pop_v128()?;
    let a = stack.pop_v128()?;
    let (la, lb) = (get_i8(a), get_i8(b));
    let out = std::array::from_fn(|i| {
        (la[i * 2] as i16 * lb[i * 2] as i16).wrapping_add(la[i * 2 + 1] as i16 * lb[i * 2 + 1] as i16)
    });
    stack.push(Value::V128(set_i16(out)));
    Ok(())
}

pub fn i32x4_relaxed_dot_i8x16_i7x16_add_s(stack: &mut StackManager) -> Result<(), Trap> {
    let c = stack.pop_v128()?;
    let b = stack.pop_v128()?;
    let a = stack.pop_v128()?;
    let (la, lb, lc) = (get_i8(a), get_i8(b), get_i32(c));
    let out = std::array::from_fn(|i| {
        let mut sum = 0i32;
        for j in 0..4 {
            sum = sum.wrapping_add(la[i * 4 + j] as i32 * lb[i * 4 + j] as i32);
        }
        sum.wrapping_add(lc[i])
    });
    stack.push(Value::V128(set_i32(out)));
    Ok(())
}

// ===== SIMD memory =====

pub fn v128_load(stack: &mut StackManager, mem: &MemoryInstance, memarg: &MemArg) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let ea = effective_address(base, memarg)?;
    stack.push(Value::V128(mem.read_array::<16>(ea)?));
    Ok(())
}

pub fn v128_store(stack: &mut StackManager, mem: &MemoryInstance, memarg: &MemArg) -> Result<(), Trap> {
    let v = stack.pop_v128()?;
    let base = stack.pop_i32()?;
    let ea = effective_address(base, memarg)?;
    mem.write_array(ea, v)
}

macro_rules! v_load_extend {
    ($name:ident, $narrow:ty, $wide:ty, $set:ident, $lanes:expr) => {
        pub fn $name(stack: &mut StackManager, mem: &MemoryInstance, memarg: &MemArg) -> Result<(), Trap> {
            let base = stack.pop_i32()?;
            let ea = effective_address(base, memarg)?;
            let bytes = mem.read_array::<8>(ea)?;
            let width = std::mem::size_of::<$narrow>();
            let out: [$wide; $lanes] = std::array::from_fn(|i| {
                let mut lane = [0u8; std::mem::size_of::<$narrow>()];
                lane.copy_from_slice(&bytes[i * width..(i + 1) * width]);
                <$narrow>::from_le_bytes(lane) as $wide
            });
            stack.push(Value::V128($set(out)));
            Ok(())
        }
    };
}

v_load_extend!(v128_load8x8_s, i8, i16, set_i16, 8);
v_load_extend!(v128_load8x8_u, u8, u16, set_u16, 8);
v_load_extend!(v128_load16x4_s, i16, i32, set_i32, 4);
v_load_extend!(v128_load16x4_u, u16, u32, set_u32, 4);
v_load_extend!(v128_load32x2_s, i32, i64, set_i64, 2);
v_load_extend!(v128_load32x2_u, u32, u64, set_u64, 2);

macro_rules! v_load_splat {
    ($name:ident, $narrow:ty, $set:ident, $lanes:expr) => {
        pub fn $name(stack: &mut StackManager, mem: &MemoryInstance, memarg: &MemArg) -> Result<(), Trap> {
            let base = stack.pop_i32()?;
            let ea = effective_address(base, memarg)?;
            let bytes = mem.read_array::<{ std::mem::size_of::<$narrow>() }>(ea)?;
            let lane = <$narrow>::from_le_bytes(bytes);
            stack.push(Value::V128($set([lane; $lanes])));
            Ok(())
        }
    };
}

v_load_splat!(v128_load8_splat, u8, set_u8, 16);
v_load_splat!(v128_load16_splat, u16, set_u16, 8);
v_load_splat!(v128_load32_splat, u32, set_u32, 4);
v_load_splat!(v128_load64_splat, u64, set_u64, 2);

pub fn v128_load32_zero(stack: &mut StackManager, mem: &MemoryInstance, memarg: &MemArg) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let ea = effective_address(base, memarg)?;
    let lane = mem.read_u32(ea)?;
    stack.push(Value::V128(set_u32([lane, 0, 0, 0])));
    Ok(())
}

pub fn v128_load64_zero(stack: &mut StackManager, mem: &MemoryInstance, memarg: &MemArg) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let ea = effective_address(base, memarg)?;
    let lane = mem.read_u64(ea)?;
    stack.push(Value::V128(set_u64([lane, 0])));
    Ok(())
}

macro_rules! v_load_lane {
    ($name:ident, $width:expr) => {
        pub fn $name(
            stack: &mut StackManager,
            mem: &MemoryInstance,
            memarg: &MemArg,
            lane: u8,
        ) -> Result<(), Trap> {
            let mut v = stack.pop_v128()?;
            let base = stack.pop_i32()?;
            let ea = effective_address(base, memarg)?;
            let bytes = mem.read_array::<$width>(ea)?;
            let start = lane as usize * $width;
            v[start..start + $width].copy_from_slice(&bytes);
            stack.push(Value::V128(v));
            Ok(())
        }
    };
}

macro_rules! v_store_lane {
    ($name:ident, $width:expr) => {
        pub fn $name(
            stack: &mut StackManager,
            mem: &MemoryInstance,
            memarg: &MemArg,
            lane: u8,
        ) -> Result<(), Trap> {
            let v = stack.pop_v128()?;
            let base = stack.pop_i32()?;
            let ea = effective_address(base, memarg)?;
            let start = lane as usize * $width;
            let mut bytes = [0u8; $width];
            bytes.copy_from_slice(&v[start..start + $width]);
            mem.write_array(ea, bytes)
        }
    };
}

v_load_lane!(v128_load8_lane, 1);
v_load_lane!(v128_load16_lane, 2);
v_load_lane!(v128_load32_lane, 4);
v_load_lane!(v128_load64_lane, 8);
v_store_lane!(v128_store8_lane, 1);
v_store_lane!(v128_store16_lane, 2);
v_store_lane!(v128_store32_lane, 4);
v_store_lane!(v128_store64_lane, 8);

fn resolve(module: &ModuleInstance, memarg: &MemArg) -> Result<std::sync::Arc<MemoryInstance>, Trap> {
    module.memory(memarg.memory).ok_or(Trap::OutOfBoundsMemAccess)
}

/// Dispatch a SIMD instruction, or `None` if `instr` is outside this
/// family.
pub fn run(instr: &Instruction, stack: &mut StackManager, module: &ModuleInstance) -> Option<Result<(), Trap>> {
    use Instruction::*;
    let result = match instr {
        V128Const { value } => {
            stack.push(Value::V128(*value));
            Ok(())
        }
        I8x16Shuffle { lanes } => i8x16_shuffle(stack, lanes),
        I8x16Swizzle => i8x16_swizzle(stack),
        I8x16Splat => i8x16_splat(stack),
        I16x8Splat => i16x8_splat(stack),
        I32x4Splat => i32x4_splat(stack),
        I64x2Splat => i64x2_splat(stack),
        F32x4Splat => f32x4_splat(stack),
        F64x2Splat => f64x2_splat(stack),
        I8x16ExtractLaneS { lane } => i8x16_extract_lane_s(stack, *lane),
        I8x16ExtractLaneU { lane } => i8x16_extract_lane_u(stack, *lane),
        I8x16ReplaceLane { lane } => i8x16_replace_lane(stack, *lane),
        I16x8ExtractLaneS { lane } => i16x8_extract_lane_s(stack, *lane),
        I16x8ExtractLaneU { lane } => i16x8_extract_lane_u(stack, *lane),
        I16x8ReplaceLane { lane } => i16x8_replace_lane(stack, *lane),
        I32x4ExtractLane { lane } => i32x4_extract_lane(stack, *lane),
        I32x4ReplaceLane { lane } => i32x4_replace_lane(stack, *lane),
        I64x2ExtractLane { lane } => i64x2_extract_lane(stack, *lane),
        I64x2ReplaceLane { lane } => i64x2_replace_lane(stack, *lane),
        F32x4ExtractLane { lane } => f32x4_extract_lane(stack, *lane),
        F32x4ReplaceLane { lane } => f32x4_replace_lane(stack, *lane),
        F64x2ExtractLane { lane } => f64x2_extract_lane(stack, *lane),
        F64x2ReplaceLane { lane } => f64x2_replace_lane(stack, *lane),

        I8x16Eq => i8x16_eq(stack),
        I8x16Ne => i8x16_ne(stack),
        I8x16LtS => i8x16_lt_s(stack),
        I8x16LtU => i8x16_lt_u(stack),
        I8x16GtS => i8x16_gt_s(stack),
        I8x16GtU => i8x16_gt_u(stack),
        I8x16LeS => i8x16_le_s(stack),
        I8x16LeU => i8x16_le_u(stack),
        I8x16GeS => i8x16_ge_s(stack),
        I8x16GeU => i8x16_ge_u(stack),
        I16x8Eq => i16x8_eq(stack),
        I16x8Ne => i16x8_ne(stack),
        I16x8LtS => i16x8_lt_s(stack),
        I16x8LtU => i16x8_lt_u(stack),
        I16x8GtS => i16x8_gt_s(stack),
        I16x8GtU => i16x8_gt_u(stack),
        I16x8LeS => i16x8_le_s(stack),
        I16x8LeU => i16x8_le_u(stack),
        I16x8GeS => i16x8_ge_s(stack),
        I16x8GeU => i16x8_ge_u(stack),
        I32x4Eq => i32x4_eq(stack),
        I32x4Ne => i32x4_ne(stack),
        I32x4LtS => i32x4_lt_s(stack),
        I32x4LtU => i32x4_lt_u(stack),
        I32x4GtS => i32x4_gt_s(stack),
        I32x4GtU => i32x4_gt_u(stack),
        I32x4LeS => i32x4_le_s(stack),
        I32x4LeU => i32x4_le_u(stack),
        I32x4GeS => i32x4_ge_s(stack),
        I32x4GeU => i32x4_ge_u(stack),
        I64x2Eq => i64x2_eq(stack),
        I64x2Ne => i64x2_ne(stack),
        I64x2LtS => i64x2_lt_s(stack),
        I64x2GtS => i64x2_gt_s(stack),
        I64x2LeS => i64x2_le_s(stack),
        I64x2GeS => i64x2_ge_s(stack),
        F32x4Eq => f32x4_eq(stack),
        F32x4Ne => f32x4_ne(stack),
        F32x4Lt => f32x4_lt(stack),
        F32x4Gt => f32x4_gt(stack),
        F32x4Le => f32x4_le(stack),
        F32x4Ge => f32x4_ge(stack),
        F64x2Eq => f64x2_eq(stack),
        F64x2Ne => f64x2_ne(stack),
        F64x2Lt => f64x2_lt(stack),
        F64x2Gt => f64x2_gt(stack),
        F64x2Le => f64x2_le(stack),
        F64x2Ge => f64x2_ge(stack),

        V128Not => v128_not(stack),
        V128And => v128_and(stack),
        V128AndNot => v128_andnot(stack),
        V128Or => v128_or(stack),
        V128Xor => v128_xor(stack),
        V128Bitselect => v128_bitselect(stack),
        V128AnyTrue => v128_any_true(stack),

        I8x16Abs => i8x16_abs(stack),
        I8x16Neg => i8x16_neg(stack),
        I8x16Popcnt => i8x16_popcnt(stack),
        I8x16AllTrue => i8x16_all_true(stack),
        I8x16Bitmask => i8x16_bitmask(stack),
        I8x16NarrowI16x8S => i8x16_narrow_i16x8_s(stack),
        I8x16NarrowI16x8U => i8x16_narrow_i16x8_u(stack),
        I8x16Shl => i8x16_shl(stack),
        I8x16ShrS => i8x16_shr_s(stack),
        I8x16ShrU => i8x16_shr_u(stack),
        I8x16Add => i8x16_add(stack),
        I8x16AddSatS => i8x16_add_sat_s(stack),
        I8x16AddSatU => i8x16_add_sat_u(stack),
        I8x16Sub => i8x16_sub(stack),
        I8x16SubSatS => i8x16_sub_sat_s(stack),
        I8x16SubSatU => i8x16_sub_sat_u(stack),
        I8x16MinS => i8x16_min_s(stack),
        I8x16MinU => i8x16_min_u(stack),
        I8x16MaxS => i8x16_max_s(stack),
        I8x16MaxU => i8x16_max_u(stack),
        I8x16AvgrU => i8x16_avgr_u(stack),

        I16x8ExtAddPairwiseI8x16S => i16x8_extadd_pairwise_i8x16_s(stack),
        I16x8ExtAddPairwiseI8x16U => i16x8_extadd_pairwise_i8x16_u(stack),
        I16x8Abs => i16x8_abs(stack),
        I16x8Neg => i16x8_neg(stack),
        I16x8Q15MulrSatS => i16x8_q15mulr_sat_s(stack),
        I16x8AllTrue => i16x8_all_true(stack),
        I16x8Bitmask => i16x8_bitmask(stack),
        I16x8NarrowI32x4S => i16x8_narrow_i32x4_s(stack),
        I16x8NarrowI32x4U => i16x8_narrow_i32x4_u(stack),
        I16x8ExtendLowI8x16S => i16x8_extend_low_i8x16_s(stack),
        I16x8ExtendHighI8x16S => i16x8_extend_high_i8x16_s(stack),
        I16x8ExtendLowI8x16U => i16x8_extend_low_i8x16_u(stack),
        I16x8ExtendHighI8x16U => i16x8_extend_high_i8x16_u(stack),
        I16x8Shl => i16x8_shl(stack),
        I16x8ShrS => i16x8_shr_s(stack),
        I16x8ShrU => i16x8_shr_u(stack),
        I16x8Add => i16x8_add(stack),
        I16x8AddSatS => i16x8_add_sat_s(stack),
        I16x8AddSatU => i16x8_add_sat_u(stack),
        I16x8Sub => i16x8_sub(stack),
        I16x8SubSatS => i16x8_sub_sat_s(stack),
        I16x8SubSatU => i16x8_sub_sat_u(stack),
        I16x8Mul => i16x8_mul(stack),
        I16x8MinS => i16x8_min_s(stack),
        I16x8MinU => i16x8_min_u(stack),
        I16x8MaxS => i16x8_max_s(stack),
        I16x8MaxU => i16x8_max_u(stack),
        I16x8AvgrU => i16x8_avgr_u(stack),
        I16x8ExtMulLowI8x16S => i16x8_extmul_low_i8x16_s(stack),
        I16x8ExtMulHighI8x16S => i16x8_extmul_high_i8x16_s(stack),
        I16x8ExtMulLowI8x16U => i16x8_extmul_low_i8x16_u(stack),
        I16x8ExtMulHighI8x16U => i16x8_extmul_high_i8x16_u(stack),

        I32x4ExtAddPairwiseI16x8S => i32x4_extadd_pairwise_i16x8_s(stack),
        I32x4ExtAddPairwiseI16x8U => i32x4_extadd_pairwise_i16x8_u(stack),
        I32x4Abs => i32x4_abs(stack),
        I32x4Neg => i32x4_neg(stack),
        I32x4AllTrue => i32x4_all_true(stack),
        I32x4Bitmask => i32x4_bitmask(stack),
        I32x4ExtendLowI16x8S => i32x4_extend_low_i16x8_s(stack),
        I32x4ExtendHighI16x8S => i32x4_extend_high_i16x8_s(stack),
        I32x4ExtendLowI16x8U => i32x4_extend_low_i16x8_u(stack),
        I32x4ExtendHighI16x8U => i32x4_extend_high_i16x8_u(stack),
        I32x4Shl => i32x4_shl(stack),
        I32x4ShrS => i32x4_shr_s(stack),
        I32x4ShrU => i32x4_shr_u(stack),
        I32x4Add => i32x4_add(stack),
        I32x4Sub => i32x4_sub(stack),
        I32x4Mul => i32x4_mul(stack),
        I32x4MinS => i32x4_min_s(stack),
        I32x4MinU => i32x4_min_u(stack),
        I32x4MaxS => i32x4_max_s(stack),
        I32x4MaxU => i32x4_max_u(stack),
        I32x4DotI16x8S => i32x4_dot_i16x8_s(stack),
        I32x4ExtMulLowI16x8S => i32x4_extmul_low_i16x8_s(stack),
        I32x4ExtMulHighI16x8S => i32x4_extmul_high_i16x8_s(stack),
        I32x4ExtMulLowI16x8U => i32x4_extmul_low_i16x8_u(stack),
        I32x4ExtMulHighI16x8U => i32x4_extmul_high_i16x8_u(stack),

        I64x2Abs => i64x2_abs(stack),
        I64x2Neg => i64x2_neg(stack),
        I64x2AllTrue => i64x2_all_true(stack),
        I64x2Bitmask => i64x2_bitmask(stack),
        I64x2ExtendLowI32x4S => i64x2_extend_low_i32x4_s(stack),
        I64x2ExtendHighI32x4S => i64x2_extend_high_i32x4_s(stack),
        I64x2ExtendLowI32x4U => i64x2_extend_low_i32x4_u(stack),
        I64x2ExtendHighI32x4U => i64x2_extend_high_i32x4_u(stack),
        I64x2Shl => i64x2_shl(stack),
        I64x2ShrS => i64x2_shr_s(stack),
        I64x2ShrU => i64x2_shr_u(stack),
        I64x2Add => i64x2_add(stack),
        I64x2Sub => i64x2_sub(stack),
        I64x2Mul => i64x2_mul(stack),
        I64x2ExtMulLowI32x4S => i64x2_extmul_low_i32x4_s(stack),
        I64x2ExtMulHighI32x4S => i64x2_extmul_high_i32x4_s(stack),
        I64x2ExtMulLowI32x4U => i64x2_extmul_low_i32x4_u(stack),
        I64x2ExtMulHighI32x4U => i64x2_extmul_high_i32x4_u(stack),

        F32x4Ceil => f32x4_ceil(stack),
        F32x4Floor => f32x4_floor(stack),
        F32x4Trunc => f32x4_trunc(stack),
        F32x4Nearest => f32x4_nearest(stack),
        F32x4Abs => f32x4_abs(stack),
        F32x4Neg => f32x4_neg(stack),
        F32x4Sqrt => f32x4_sqrt(stack),
        F32x4Add => f32x4_add(stack),
        F32x4Sub => f32x4_sub(stack),
        F32x4Mul => f32x4_mul(stack),
        F32x4Div => f32x4_div(stack),
        F32x4Min => f32x4_min(stack),
        F32x4Max => f32x4_max(stack),
        F32x4Pmin => f32x4_pmin(stack),
        F32x4Pmax => f32x4_pmax(stack),

        F64x2Ceil => f64x2_ceil(stack),
        F64x2Floor => f64x2_floor(stack),
        F64x2Trunc => f64x2_trunc(stack),
        F64x2Nearest => f64x2_nearest(stack),
        F64x2Abs => f64x2_abs(stack),
        F64x2Neg => f64x2_neg(stack),
        F64x2Sqrt => f64x2_sqrt(stack),
        F64x2Add => f64x2_add(stack),
        F64x2Sub => f64x2_sub(stack),
        F64x2Mul => f64x2_mul(stack),
        F64x2Div => f64x2_div(stack),
        F64x2Min => f64x2_min(stack),
        F64x2Max => f64x2_max(stack),
        F64x2Pmin => f64x2_pmin(stack),
        F64x2Pmax => f64x2_pmax(stack),

        I32x4TruncSatF32x4S => i32x4_trunc_sat_f32x4_s(stack),
        I32x4TruncSatF32x4U => i32x4_trunc_sat_f32x4_u(stack),
        F32x4ConvertI32x4S => f32x4_convert_i32x4_s(stack),
        F32x4ConvertI32x4U => f32x4_convert_i32x4_u(stack),
        I32x4TruncSatF64x2SZero => i32x4_trunc_sat_f64x2_s_zero(stack),
        I32x4TruncSatF64x2UZero => i32x4_trunc_sat_f64x2_u_zero(stack),
        F64x2ConvertLowI32x4S => f64x2_convert_low_i32x4_s(stack),
        F64x2ConvertLowI32x4U => f64x2_convert_low_i32x4_u(stack),
        F32x4DemoteF64x2Zero => f32x4_demote_f64x2_zero(stack),
        F64x2PromoteLowF32x4 => f64x2_promote_low_f32x4(stack),

        I8x16RelaxedLaneselect | I16x8RelaxedLaneselect | I32x4RelaxedLaneselect | I64x2RelaxedLaneselect => {
            relaxed_laneselect(stack)
        }
        I16x8RelaxedDotI8x16I7x16S => i16x8_relaxed_dot_i8x16_i7x16_s(stack),
        I32x4RelaxedDotI8x16I7x16AddS => i32x4_relaxed_dot_i8x16_i7x16_add_s(stack),

        V128Load { memarg } => resolve(module, memarg).and_then(|m| v128_load(stack, &m, memarg)),
        V128Store { memarg } => resolve(module, memarg).and_then(|m| v128_store(stack, &m, memarg)),
        V128Load8x8S { memarg } => resolve(module, memarg).and_then(|m| v128_load8x8_s(stack, &m, memarg)),
        V128Load8x8U { memarg } => resolve(module, memarg).and_then(|m| v128_load8x8_u(stack, &m, memarg)),
        V128Load16x4S { memarg } => resolve(module, memarg).and_then(|m| v128_load16x4_s(stack, &m, memarg)),
        V128Load16x4U { memarg } => resolve(module, memarg).and_then(|m| v128_load16x4_u(stack, &m, memarg)),
        V128Load32x2S { memarg } => resolve(module, memarg).and_then(|m| v128_load32x2_s(stack, &m, memarg)),
        V128Load32x2U { memarg } => resolve(module, memarg).and_then(|m| v128_load32x2_u(stack, &m, memarg)),
        V128Load8Splat { memarg } => resolve(module, memarg).and_then(|m| v128_load8_splat(stack, &m, memarg)),
        V128Load16Splat { memarg } => resolve(module, memarg).and_then(|m| v128_load16_splat(stack, &m, memarg)),
        V128Load32Splat { memarg } => resolve(module, memarg).and_then(|m| v128_load32_splat(stack, &m, memarg)),
        V128Load64Splat { memarg } => resolve(module, memarg).and_then(|m| v128_load64_splat(stack, &m, memarg)),
        V128Load32Zero { memarg } => resolve(module, memarg).and_then(|m| v128_load32_zero(stack, &m, memarg)),
        V128Load64Zero { memarg } => resolve(module, memarg).and_then(|m| v128_load64_zero(stack, &m, memarg)),
        V128Load8Lane { memarg, lane } => {
            resolve(module, memarg).and_then(|m| v128_load8_lane(stack, &m, memarg, *lane))
        }
        V128Load16Lane { memarg, lane } => {
            resolve(module, memarg).and_then(|m| v128_load16_lane(stack, &m, memarg, *lane))
        }
        V128Load32Lane { memarg, lane } => {
            resolve(module, memarg).and_then(|m| v128_load32_lane(stack, &m, memarg, *lane))
        }
        V128Load64Lane { memarg, lane } => {
            resolve(module, memarg).and_then(|m| v128_load64_lane(stack, &m, memarg, *lane))
        }
        V128Store8Lane { memarg, lane } => {
            resolve(module, memarg).and_then(|m| v128_store8_lane(stack, &m, memarg, *lane))
        }
        V128Store16Lane { memarg, lane } => {
            resolve(module, memarg).and_then(|m| v128_store16_lane(stack, &m, memarg, *lane))
        }
        V128Store32Lane { memarg, lane } => {
            resolve(module, memarg).and_then(|m| v128_store32_lane(stack, &m, memarg, *lane))
        }
        V128Store64Lane { memarg, lane } => {
            resolve(module, memarg).and_then(|m| v128_store64_lane(stack, &m, memarg, *lane))
        }

        _ => return None,
    };
    Some(result)
}
