//! Atomic operations
//!
//! The threads-proposal opcode family: sequentially consistent loads,
//! stores, read-modify-writes, compare-exchange, fence, and the
//! wait/notify rendezvous. Every access must be naturally aligned or it
//! traps, including on non-shared memory where the data operations are
//! otherwise permitted (and merely degrade to non-atomic). `atomic.wait`
//! additionally requires a shared memory.

use crate::ast::instruction::{Instruction, MemArg};
use crate::executor::ops::memory::effective_address;
use crate::executor::Executor;
use crate::runtime::{MemoryInstance, ModuleInstance, StackManager, Trap, Value};
use std::sync::Arc;
use std::time::Duration;

/// Natural-alignment check for an atomic access of `width` bytes.
#[inline]
fn check_align(ea: u32, width: u32) -> Result<(), Trap> {
    if ea % width != 0 {
        return Err(Trap::Unaligned);
    }
    Ok(())
}

fn resolve(module: &ModuleInstance, memarg: &MemArg) -> Result<Arc<MemoryInstance>, Trap> {
    module.memory(memarg.memory).ok_or(Trap::OutOfBoundsMemAccess)
}

fn pop_address(stack: &mut StackManager, memarg: &MemArg, width: u32) -> Result<u32, Trap> {
    let base = stack.pop_i32()?;
    let ea = effective_address(base, memarg)?;
    check_align(ea, width)?;
    Ok(ea)
}

// ===== Atomic loads and stores =====
//
// The memory's interior lock serializes every access, which yields the
// sequentially consistent ordering the proposal requires.

macro_rules! atomic_load {
    ($name:ident, $read:ident, $width:expr, $variant:ident, $conv:ty) => {
        pub fn $name(stack: &mut StackManager, mem: &MemoryInstance, memarg: &MemArg) -> Result<(), Trap> {
            let ea = pop_address(stack, memarg, $width)?;
            let raw = mem.$read(ea)?;
            stack.push(Value::$variant(raw as $conv as _));
            Ok(())
        }
    };
}

atomic_load!(i32_atomic_load, read_u32, 4, I32, u32);
atomic_load!(i64_atomic_load, read_u64, 8, I64, u64);
atomic_load!(i32_atomic_load8_u, read_u8, 1, I32, u8);
atomic_load!(i32_atomic_load16_u, read_u16, 2, I32, u16);
atomic_load!(i64_atomic_load8_u, read_u8, 1, I64, u8);
atomic_load!(i64_atomic_load16_u, read_u16, 2, I64, u16);
atomic_load!(i64_atomic_load32_u, read_u32, 4, I64, u32);

macro_rules! atomic_store {
    ($name:ident, $pop:ident, $write:ident, $width:expr, $narrow:ty) => {
        pub fn $name(stack: &mut StackManager, mem: &MemoryInstance, memarg: &MemArg) -> Result<(), Trap> {
            let value = stack.$pop()?;
            let ea = pop_address(stack, memarg, $width)?;
            mem.$write(ea, value as $narrow)
        }
    };
}

atomic_store!(i32_atomic_store, pop_i32, write_u32, 4, u32);
atomic_store!(i64_atomic_store, pop_i64, write_u64, 8, u64);
atomic_store!(i32_atomic_store8, pop_i32, write_u8, 1, u8);
atomic_store!(i32_atomic_store16, pop_i32, write_u16, 2, u16);
atomic_store!(i64_atomic_store8, pop_i64, write_u8, 1, u8);
atomic_store!(i64_atomic_store16, pop_i64, write_u16, 2, u16);
atomic_store!(i64_atomic_store32, pop_i64, write_u32, 4, u32);

// ===== Read-modify-write =====
//
// Each op pushes the value the cell held before the update.

macro_rules! rmw_add {
    ($v:expr, $o:expr) => {
        $v.wrapping_add($o)
    };
}
macro_rules! rmw_sub {
    ($v:expr, $o:expr) => {
        $v.wrapping_sub($o)
    };
}
macro_rules! rmw_and {
    ($v:expr, $o:expr) => {
        $v & $o
    };
}
macro_rules! rmw_or {
    ($v:expr, $o:expr) => {
        $v | $o
    };
}
macro_rules! rmw_xor {
    ($v:expr, $o:expr) => {
        $v ^ $o
    };
}
macro_rules! rmw_xchg {
    ($v:expr, $o:expr) => {
        $o
    };
}

macro_rules! atomic_rmw {
    ($name:ident, $pop:ident, $rmw:ident, $width:expr, $narrow:ty, $variant:ident, $f:ident) => {
        pub fn $name(stack: &mut StackManager, mem: &MemoryInstance, memarg: &MemArg) -> Result<(), Trap> {
            let operand = stack.$pop()? as $narrow;
            let ea = pop_address(stack, memarg, $width)?;
            let old = mem.$rmw(ea, |v: $narrow| $f!(v, operand))?;
            stack.push(Value::$variant(old as _));
            Ok(())
        }
    };
}

macro_rules! atomic_rmw_family {
    ($op:ident;
     $n32:ident, $n64:ident, $n32_8:ident, $n32_16:ident, $n64_8:ident, $n64_16:ident, $n64_32:ident) => {
        atomic_rmw!($n32, pop_i32, atomic_rmw_u32, 4, u32, I32, $op);
        atomic_rmw!($n64, pop_i64, atomic_rmw_u64, 8, u64, I64, $op);
        atomic_rmw!($n32_8, pop_i32, atomic_rmw_u8, 1, u8, I32, $op);
        atomic_rmw!($n32_16, pop_i32, atomic_rmw_u16, 2, u16, I32, $op);
        atomic_rmw!($n64_8, pop_i64, atomic_rmw_u8, 1, u8, I64, $op);
        atomic_rmw!($n64_16, pop_i64, atomic_rmw_u16, 2, u16, I64, $op);
        atomic_rmw!($n64_32, pop_i64, atomic_rmw_u32, 4, u32, I64, $op);
    };
}

atomic_rmw_family!(rmw_add;
    i32_atomic_rmw_add, i64_atomic_rmw_add,
    i32_atomic_rmw8_add_u, i32_atomic_rmw16_add_u,
    i64_atomic_rmw8_add_u, i64_atomic_rmw16_add_u, i64_atomic_rmw32_add_u);

atomic_rmw_family!(rmw_sub;
    i32_atomic_rmw_sub, i64_atomic_rmw_sub,
    i32_atomic_rmw8_sub_u, i32_atomic_rmw16_sub_u,
    i64_atomic_rmw8_sub_u, i64_atomic_rmw16_sub_u, i64_atomic_rmw32_sub_u);

atomic_rmw_family!(rmw_and;
    i32_atomic_rmw_and, i64_atomic_rmw_and,
    i32_atomic_rmw8_and_u, i32_atomic_rmw16_and_u,
    i64_atomic_rmw8_and_u, i64_atomic_rmw16_and_u, i64_atomic_rmw32_and_u);

atomic_rmw_family!(rmw_or;
    i32_atomic_rmw_or, i64_atomic_rmw_or,
    i32_atomic_rmw8_or_u, i32_atomic_rmw16_or_u,
    i64_atomic_rmw8_or_u, i64_atomic_rmw16_or_u, i64_atomic_rmw32_or_u);

atomic_rmw_family!(rmw_xor;
    i32_atomic_rmw_xor, i64_atomic_rmw_xor,
    i32_atomic_rmw8_xor_u, i32_atomic_rmw16_xor_u,
    i64_atomic_rmw8_xor_u, i64_atomic_rmw16_xor_u, i64_atomic_rmw32_xor_u);

atomic_rmw_family!(rmw_xchg;
    i32_atomic_rmw_xchg, i64_atomic_rmw_xchg,
    i32_atomic_rmw8_xchg_u, i32_atomic_rmw16_xchg_u,
    i64_atomic_rmw8_xchg_u, i64_atomic_rmw16_xchg_u, i64_atomic_rmw32_xchg_u);

// ===== Compare-exchange =====
//
// Replacement happens only when the cell equals the expected value
// (wrapped to the access width); the old value is pushed either way.

macro_rules! atomic_cmpxchg {
    ($name:ident, $pop:ident, $rmw:ident, $width:expr, $narrow:ty, $variant:ident) => {
        pub fn $name(stack: &mut StackManager, mem: &MemoryInstance, memarg: &MemArg) -> Result<(), Trap> {
            let replacement = stack.$pop()? as $narrow;
            let expected = stack.$pop()? as $narrow;
            let ea = pop_address(stack, memarg, $width)?;
            let old = mem.$rmw(ea, |v| if v == expected { replacement } else { v })?;
            stack.push(Value::$variant(old as _));
            Ok(())
        }
    };
}

atomic_cmpxchg!(i32_atomic_rmw_cmpxchg, pop_i32, atomic_rmw_u32, 4, u32, I32);
atomic_cmpxchg!(i64_atomic_rmw_cmpxchg, pop_i64, atomic_rmw_u64, 8, u64, I64);
atomic_cmpxchg!(i32_atomic_rmw8_cmpxchg_u, pop_i32, atomic_rmw_u8, 1, u8, I32);
atomic_cmpxchg!(i32_atomic_rmw16_cmpxchg_u, pop_i32, atomic_rmw_u16, 2, u16, I32);
atomic_cmpxchg!(i64_atomic_rmw8_cmpxchg_u, pop_i64, atomic_rmw_u8, 1, u8, I64);
atomic_cmpxchg!(i64_atomic_rmw16_cmpxchg_u, pop_i64, atomic_rmw_u16, 2, u16, I64);
atomic_cmpxchg!(i64_atomic_rmw32_cmpxchg_u, pop_i64, atomic_rmw_u32, 4, u32, I64);

// ===== Wait and notify =====

fn wait_timeout(timeout_ns: i64) -> Option<Duration> {
    if timeout_ns < 0 {
        None
    } else {
        Some(Duration::from_nanos(timeout_ns as u64))
    }
}

/// memory.atomic.wait32: block while the cell holds the expected value.
/// Pushes 0 on wake, 1 when the value differed, 2 on timeout.
pub fn memory_atomic_wait32(
    ex: &Executor,
    stack: &mut StackManager,
    mem: &Arc<MemoryInstance>,
    memarg: &MemArg,
) -> Result<(), Trap> {
    let timeout_ns = stack.pop_i64()?;
    let expected = stack.pop_i32()? as u32;
    let ea = pop_address(stack, memarg, 4)?;
    if !mem.is_shared() {
        return Err(Trap::ExpectSharedMemory);
    }
    // Validate the address before blocking.
    mem.read_u32(ea)?;
    ex.check_stop()?;
    let outcome = ex.waiters.wait(
        &ex.stop_token,
        mem,
        ea,
        || Ok(mem.read_u32(ea)? == expected),
        wait_timeout(timeout_ns),
    )?;
    stack.push(Value::I32(outcome as i32));
    Ok(())
}

/// memory.atomic.wait64: 64-bit variant of the wait.
pub fn memory_atomic_wait64(
    ex: &Executor,
    stack: &mut StackManager,
    mem: &Arc<MemoryInstance>,
    memarg: &MemArg,
) -> Result<(), Trap> {
    let timeout_ns = stack.pop_i64()?;
    let expected = stack.pop_i64()? as u64;
    let ea = pop_address(stack, memarg, 8)?;
    if !mem.is_shared() {
        return Err(Trap::ExpectSharedMemory);
    }
    mem.read_u64(ea)?;
    ex.check_stop()?;
    let outcome = ex.waiters.wait(
        &ex.stop_token,
        mem,
        ea,
        || Ok(mem.read_u64(ea)? == expected),
        wait_timeout(timeout_ns),
    )?;
    stack.push(Value::I32(outcome as i32));
    Ok(())
}

/// memory.atomic.notify: wake up to `count` waiters on the cell and push
/// the number actually woken. A non-shared memory can have no waiters.
pub fn memory_atomic_notify(
    ex: &Executor,
    stack: &mut StackManager,
    mem: &Arc<MemoryInstance>,
    memarg: &MemArg,
) -> Result<(), Trap> {
    let count = stack.pop_i32()? as u32;
    let ea = pop_address(stack, memarg, 4)?;
    mem.read_u32(ea)?;
    let woken = if mem.is_shared() {
        ex.waiters.notify(mem, ea, count)
    } else {
        0
    };
    stack.push(Value::I32(woken as i32));
    Ok(())
}

/// atomic.fence: a full sequentially consistent fence.
pub fn atomic_fence() -> Result<(), Trap> {
    std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    Ok(())
}

/// Dispatch an atomic instruction, or `None` if `instr` is outside this
/// family.
pub fn run(
    ex: &Executor,
    instr: &Instruction,
    stack: &mut StackManager,
    module: &ModuleInstance,
) -> Option<Result<(), Trap>> {
    use Instruction::*;
    let result = match instr {
        AtomicFence => atomic_fence(),
        MemoryAtomicNotify { memarg } => {
            resolve(module, memarg).and_then(|m| memory_atomic_notify(ex, stack, &m, memarg))
        }
        MemoryAtomicWait32 { memarg } => {
            resolve(module, memarg).and_then(|m| memory_atomic_wait32(ex, stack, &m, memarg))
        }
        MemoryAtomicWait64 { memarg } => {
            resolve(module, memarg).and_then(|m| memory_atomic_wait64(ex, stack, &m, memarg))
        }
        I32AtomicLoad { memarg } => resolve(module, memarg).and_then(|m| i32_atomic_load(stack, &m, memarg)),
        I64AtomicLoad { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_load(stack, &m, memarg)),
        I32AtomicLoad8U { memarg } => resolve(module, memarg).and_then(|m| i32_atomic_load8_u(stack, &m, memarg)),
        I32AtomicLoad16U { memarg } => resolve(module, memarg).and_then(|m| i32_atomic_load16_u(stack, &m, memarg)),
        I64AtomicLoad8U { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_load8_u(stack, &m, memarg)),
        I64AtomicLoad16U { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_load16_u(stack, &m, memarg)),
        I64AtomicLoad32U { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_load32_u(stack, &m, memarg)),
        I32AtomicStore { memarg } => resolve(module, memarg).and_then(|m| i32_atomic_store(stack, &m, memarg)),
        I64AtomicStore { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_store(stack, &m, memarg)),
        I32AtomicStore8 { memarg } => resolve(module, memarg).and_then(|m| i32_atomic_store8(stack, &m, memarg)),
        I32AtomicStore16 { memarg } => resolve(module, memarg).and_then(|m| i32_atomic_store16(stack, &m, memarg)),
        I64AtomicStore8 { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_store8(stack, &m, memarg)),
        I64AtomicStore16 { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_store16(stack, &m, memarg)),
        I64AtomicStore32 { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_store32(stack, &m, memarg)),
        I32AtomicRmwAdd { memarg } => resolve(module, memarg).and_then(|m| i32_atomic_rmw_add(stack, &m, memarg)),
        I64AtomicRmwAdd { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_rmw_add(stack, &m, memarg)),
        I32AtomicRmw8AddU { memarg } => resolve(module, memarg).and_then(|m| i32_atomic_rmw8_add_u(stack, &m, memarg)),
        I32AtomicRmw16AddU { memarg } => {
            resolve(module, memarg).and_then(|m| i32_atomic_rmw16_add_u(stack, &m, memarg))
        }
        I64AtomicRmw8AddU { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_rmw8_add_u(stack, &m, memarg)),
        I64AtomicRmw16AddU { memarg } => {
            resolve(module, memarg).and_then(|m| i64_atomic_rmw16_add_u(stack, &m, memarg))
        }
        I64AtomicRmw32AddU { memarg } => {
            resolve(module, memarg).and_then(|m| i64_atomic_rmw32_add_u(stack, &m, memarg))
        }
        I32AtomicRmwSub { memarg } => resolve(module, memarg).and_then(|m| i32_atomic_rmw_sub(stack, &m, memarg)),
        I64AtomicRmwSub { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_rmw_sub(stack, &m, memarg)),
        I32AtomicRmw8SubU { memarg } => resolve(module, memarg).and_then(|m| i32_atomic_rmw8_sub_u(stack, &m, memarg)),
        I32AtomicRmw16SubU { memarg } => {
            resolve(module, memarg).and_then(|m| i32_atomic_rmw16_sub_u(stack, &m, memarg))
        }
        I64AtomicRmw8SubU { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_rmw8_sub_u(stack, &m, memarg)),
        I64AtomicRmw16SubU { memarg } => {
            resolve(module, memarg).and_then(|m| i64_atomic_rmw16_sub_u(stack, &m, memarg))
        }
        I64AtomicRmw32SubU { memarg } => {
            resolve(module, memarg).and_then(|m| i64_atomic_rmw32_sub_u(stack, &m, memarg))
        }
        I32AtomicRmwAnd { memarg } => resolve(module, memarg).and_then(|m| i32_atomic_rmw_and(stack, &m, memarg)),
        I64AtomicRmwAnd { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_rmw_and(stack, &m, memarg)),
        I32AtomicRmw8AndU { memarg } => resolve(module, memarg).and_then(|m| i32_atomic_rmw8_and_u(stack, &m, memarg)),
        I32AtomicRmw16AndU { memarg } => {
            resolve(module, memarg).and_then(|m| i32_atomic_rmw16_and_u(stack, &m, memarg))
        }
        I64AtomicRmw8AndU { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_rmw8_and_u(stack, &m, memarg)),
        I64AtomicRmw16AndU { memarg } => {
            resolve(module, memarg).and_then(|m| i64_atomic_rmw16_and_u(stack, &m, memarg))
        }
        I64AtomicRmw32AndU { memarg } => {
            resolve(module, memarg).and_then(|m| i64_atomic_rmw32_and_u(stack, &m, memarg))
        }
        I32AtomicRmwOr { memarg } => resolve(module, memarg).and_then(|m| i32_atomic_rmw_or(stack, &m, memarg)),
        I64AtomicRmwOr { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_rmw_or(stack, &m, memarg)),
        I32AtomicRmw8OrU { memarg } => resolve(module, memarg).and_then(|m| i32_atomic_rmw8_or_u(stack, &m, memarg)),
        I32AtomicRmw16OrU { memarg } => resolve(module, memarg).and_then(|m| i32_atomic_rmw16_or_u(stack, &m, memarg)),
        I64AtomicRmw8OrU { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_rmw8_or_u(stack, &m, memarg)),
        I64AtomicRmw16OrU { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_rmw16_or_u(stack, &m, memarg)),
        I64AtomicRmw32OrU { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_rmw32_or_u(stack, &m, memarg)),
        I32AtomicRmwXor { memarg } => resolve(module, memarg).and_then(|m| i32_atomic_rmw_xor(stack, &m, memarg)),
        I64AtomicRmwXor { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_rmw_xor(stack, &m, memarg)),
        I32AtomicRmw8XorU { memarg } => resolve(module, memarg).and_then(|m| i32_atomic_rmw8_xor_u(stack, &m, memarg)),
        I32AtomicRmw16XorU { memarg } => {
            resolve(module, memarg).and_then(|m| i32_atomic_rmw16_xor_u(stack, &m, memarg))
        }
        I64AtomicRmw8XorU { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_rmw8_xor_u(stack, &m, memarg)),
        I64AtomicRmw16XorU { memarg } => {
            resolve(module, memarg).and_then(|m| i64_atomic_rmw16_xor_u(stack, &m, memarg))
        }
        I64AtomicRmw32XorU { memarg } => {
            resolve(module, memarg).and_then(|m| i64_atomic_rmw32_xor_u(stack, &m, memarg))
        }
        I32AtomicRmwXchg { memarg } => resolve(module, memarg).and_then(|m| i32_atomic_rmw_xchg(stack, &m, memarg)),
        I64AtomicRmwXchg { memarg } => resolve(module, memarg).and_then(|m| i64_atomic_rmw_xchg(stack, &m, memarg)),
        I32AtomicRmw8XchgU { memarg } => {
            resolve(module, memarg).and_then(|m| i32_atomic_rmw8_xchg_u(stack, &m, memarg))
        }
        I32AtomicRmw16XchgU { memarg } => {
            resolve(module, memarg).and_then(|m| i32_atomic_rmw16_xchg_u(stack, &m, memarg))
        }
        I64AtomicRmw8XchgU { memarg } => {
            resolve(module, memarg).and_then(|m| i64_atomic_rmw8_xchg_u(stack, &m, memarg))
        }
        I64AtomicRmw16XchgU { memarg } => {
            resolve(module, memarg).and_then(|m| i64_atomic_rmw16_xchg_u(stack, &m, memarg))
        }
        I64AtomicRmw32XchgU { memarg } => {
            resolve(module, memarg).and_then(|m| i64_atomic_rmw32_xchg_u(stack, &m, memarg))
        }
        I32AtomicRmwCmpxchg { memarg } => {
            resolve(module, memarg).and_then(|m| i32_atomic_rmw_cmpxchg(stack, &m, memarg))
        }
        I64AtomicRmwCmpxchg { memarg } => {
            resolve(module, memarg).and_then(|m| i64_atomic_rmw_cmpxchg(stack, &m, memarg))
        }
        I32AtomicRmw8CmpxchgU { memarg } => {
            resolve(module, memarg).and_then(|m| i32_atomic_rmw8_cmpxchg_u(stack, &m, memarg))
        }
        I32AtomicRmw16CmpxchgU { memarg } => {
            resolve(module, memarg).and_then(|m| i32_atomic_rmw16_cmpxchg_u(stack, &m, memarg))
        }
        I64AtomicRmw8CmpxchgU { memarg } => {
            resolve(module, memarg).and_then(|m| i64_atomic_rmw8_cmpxchg_u(stack, &m, memarg))
        }
        I64AtomicRmw16CmpxchgU { memarg } => {
            resolve(module, memarg).and_then(|m| i64_atomic_rmw16_cmpxchg_u(stack, &m, memarg))
        }
        I64AtomicRmw32CmpxchgU { memarg } => {
            resolve(module, memarg).and_then(|m| i64_atomic_rmw32_cmpxchg_u(stack, &m, memarg))
        }
        _ => return None,
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::types::{Limits, MemoryType};

    fn mem() -> MemoryInstance {
        MemoryInstance::new(
            MemoryType {
                limits: Limits::new(1, None),
            },
            65536,
        )
        .unwrap()
    }

    fn stack_with(values: &[Value]) -> StackManager {
        let mut stack = StackManager::new();
        stack.push_all(values.iter().cloned());
        stack
    }

    #[test]
    fn test_misaligned_access_traps() {
        let m = mem();
        let mut s = stack_with(&[Value::I32(2)]);
        assert_eq!(
            i32_atomic_load(&mut s, &m, &MemArg::new(2, 0)),
            Err(Trap::Unaligned)
        );
        // The offset participates in the alignment check.
        let mut s = stack_with(&[Value::I32(0)]);
        assert_eq!(
            i64_atomic_load(&mut s, &m, &MemArg::new(3, 4)),
            Err(Trap::Unaligned)
        );
    }

    #[test]
    fn test_rmw_add_returns_old_value() {
        let m = mem();
        m.write_u32(0, 40).unwrap();
        let mut s = stack_with(&[Value::I32(0), Value::I32(2)]);
        i32_atomic_rmw_add(&mut s, &m, &MemArg::new(2, 0)).unwrap();
        assert_eq!(s.pop_i32().unwrap(), 40);
        assert_eq!(m.read_u32(0).unwrap(), 42);
    }

    #[test]
    fn test_cmpxchg() {
        let m = mem();
        m.write_u32(0, 5).unwrap();

        // Mismatched expectation: no replacement
        let mut s = stack_with(&[Value::I32(0), Value::I32(4), Value::I32(9)]);
        i32_atomic_rmw_cmpxchg(&mut s, &m, &MemArg::new(2, 0)).unwrap();
        assert_eq!(s.pop_i32().unwrap(), 5);
        assert_eq!(m.read_u32(0).unwrap(), 5);

        // Matching expectation: replaced
        let mut s = stack_with(&[Value::I32(0), Value::I32(5), Value::I32(9)]);
        i32_atomic_rmw_cmpxchg(&mut s, &m, &MemArg::new(2, 0)).unwrap();
        assert_eq!(s.pop_i32().unwrap(), 5);
        assert_eq!(m.read_u32(0).unwrap(), 9);
    }

    #[test]
    fn test_narrow_rmw_zero_extends() {
        let m = mem();
        m.write_u8(1, 0xFF).unwrap();
        let mut s = stack_with(&[Value::I32(1), Value::I32(1)]);
        i32_atomic_rmw8_add_u(&mut s, &m, &MemArg::new(0, 0)).unwrap();
        assert_eq!(s.pop_i32().unwrap(), 0xFF);
        assert_eq!(m.read_u8(1).unwrap(), 0);
    }

    #[test]
    fn test_wait_on_unshared_memory_traps() {
        let ex = Executor::default();
        let m = Arc::new(mem());
        let mut s = stack_with(&[Value::I32(0), Value::I32(0), Value::I64(-1)]);
        assert_eq!(
            memory_atomic_wait32(&ex, &mut s, &m, &MemArg::new(2, 0)),
            Err(Trap::ExpectSharedMemory)
        );
    }

    #[test]
    fn test_notify_on_unshared_memory_wakes_nothing() {
        let ex = Executor::default();
        let m = Arc::new(mem());
        let mut s = stack_with(&[Value::I32(0), Value::I32(5)]);
        memory_atomic_notify(&ex, &mut s, &m, &MemArg::new(2, 0)).unwrap();
        assert_eq!(s.pop_i32().unwrap(), 0);
    }
}
