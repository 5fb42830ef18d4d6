//! AOT intrinsics bridge
//!
//! Ahead-of-time compiled functions re-enter the runtime through a fixed
//! table of C-ABI function pointers. The table's ordinal layout is the
//! engine/AOT ABI: reordering entries is a breaking change.
//!
//! Per-thread context (the current executor, the current stack manager,
//! and raw pointers to the accounting counters and the stop token) is
//! installed by a scoped guard before entering compiled code and restored
//! on every exit path, which makes recursive entry safe.
//!
//! Error channel: every intrinsic returns 0 on success; on a trap it
//! stores the trap in a thread-local slot and returns -1. Compiled code
//! must unwind to its epilogue and return non-zero after an intrinsic
//! reports failure; it never continues past one.

use crate::runtime::value::ValRaw;
use crate::runtime::{FunctionInstance, ModuleInstance, StackManager, Trap, Value};
use crate::executor::Executor;
use std::cell::RefCell;
use std::ffi::c_void;
use std::sync::atomic::{AtomicU32, AtomicU64};
use std::sync::Arc;
use std::time::Duration;

/// The execution context compiled code receives as its first argument.
/// The counter and token pointers let generated code inline its hot
/// checks; everything else goes through the intrinsics.
#[repr(C)]
pub struct ExecutionContext {
    pub stop_token: *const AtomicU32,
    pub instr_count: *const AtomicU64,
    pub gas: *const AtomicU64,
    pub gas_limit: u64,
}

struct ThreadCtx {
    executor: *const Executor,
    stack: *mut StackManager,
    module: Arc<ModuleInstance>,
    context: ExecutionContext,
    trap: Option<Trap>,
}

thread_local! {
    // Boxed so the ExecutionContext address handed to compiled code
    // stays stable when nested installs move the saved slot around.
    static CURRENT: RefCell<Option<Box<ThreadCtx>>> = const { RefCell::new(None) };
}

/// Scoped save/restore of the thread-local context. Installing a new
/// context snapshots the previous one; dropping the guard restores it,
/// on every exit path.
pub struct SavedThreadLocal {
    saved: Option<Box<ThreadCtx>>,
}

impl SavedThreadLocal {
    fn install(ex: &Executor, stack: &mut StackManager, module: Arc<ModuleInstance>) -> SavedThreadLocal {
        let gas_limit = ex.config.cost_limit.unwrap_or(u64::MAX);
        let ctx = Box::new(ThreadCtx {
            executor: ex as *const Executor,
            stack: stack as *mut StackManager,
            module,
            context: ExecutionContext {
                stop_token: &ex.stop_token as *const AtomicU32,
                instr_count: &ex.stats.instr_count as *const AtomicU64,
                gas: &ex.stats.gas as *const AtomicU64,
                gas_limit,
            },
            trap: None,
        });
        let saved = CURRENT.with(|c| c.borrow_mut().replace(ctx));
        SavedThreadLocal { saved }
    }
}

impl Drop for SavedThreadLocal {
    fn drop(&mut self) {
        let saved = self.saved.take();
        CURRENT.with(|c| *c.borrow_mut() = saved);
    }
}

/// Run `f` against the installed context, translating a trap into the
/// sentinel return and the thread-local error slot. The borrow on the
/// slot is released before `f` runs so a proxy can recursively enter
/// compiled code.
fn with_ctx(f: impl FnOnce(&Executor, &mut StackManager, &Arc<ModuleInstance>) -> Result<(), Trap>) -> i32 {
    let installed = CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .map(|ctx| (ctx.executor, ctx.stack, ctx.module.clone()))
    });
    let Some((ex_ptr, stack_ptr, module)) = installed else {
        return -1;
    };
    // The pointers were installed by the guard on this thread and stay
    // valid for the duration of the compiled call.
    let ex = unsafe { &*ex_ptr };
    let stack = unsafe { &mut *stack_ptr };
    match f(ex, stack, &module) {
        Ok(()) => 0,
        Err(trap) => {
            CURRENT.with(|c| {
                if let Some(ctx) = c.borrow_mut().as_mut() {
                    ctx.trap = Some(trap);
                }
            });
            -1
        }
    }
}

fn take_trap() -> Trap {
    CURRENT.with(|c| {
        c.borrow_mut()
            .as_mut()
            .and_then(|ctx| ctx.trap.take())
            .unwrap_or(Trap::Unreachable)
    })
}

/// Marshal raw arguments into values using the callee's parameter types.
fn raw_args(func: &FunctionInstance, args: *const ValRaw) -> Result<Vec<Value>, Trap> {
    let ty = func.ty();
    let raw = unsafe { std::slice::from_raw_parts(args, ty.params.len()) };
    raw.iter()
        .zip(&ty.params)
        .map(|(r, t)| r.to_value(*t).ok_or(Trap::Unreachable))
        .collect()
}

/// Marshal result values back into the raw return buffer.
fn write_rets(values: &[Value], rets: *mut ValRaw) -> Result<(), Trap> {
    let out = unsafe { std::slice::from_raw_parts_mut(rets, values.len()) };
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = ValRaw::from_value(value).ok_or(Trap::Unreachable)?;
    }
    Ok(())
}

fn call_function_raw(
    ex: &Executor,
    stack: &mut StackManager,
    func: &Arc<FunctionInstance>,
    args: *const ValRaw,
    rets: *mut ValRaw,
) -> Result<(), Trap> {
    let argv = raw_args(func, args)?;
    let arity = func.ty().results.len();
    ex.run_function(stack, func, argv)?;
    let results = stack.pop_n(arity)?;
    write_rets(&results, rets)
}

// ===== Proxy entry points =====

unsafe extern "C" fn proxy_trap(code: u32) -> i32 {
    with_ctx(|_, _, _| {
        Err(match code {
            1 => Trap::IntegerDivByZero,
            2 => Trap::IntegerOverflow,
            3 => Trap::InvalidConvToInt,
            4 => Trap::OutOfBoundsMemAccess,
            5 => Trap::OutOfBoundsTableAccess,
            6 => Trap::IndirectCallTypeMismatch,
            7 => Trap::CostLimitExceeded,
            8 => Trap::Interrupted,
            _ => Trap::Unreachable,
        })
    })
}

unsafe extern "C" fn proxy_call(func_idx: u32, args: *const ValRaw, rets: *mut ValRaw) -> i32 {
    with_ctx(|ex, stack, module| {
        let f = module.func(func_idx).ok_or(Trap::Unreachable)?;
        call_function_raw(ex, stack, &f, args, rets)
    })
}

unsafe extern "C" fn proxy_call_indirect(
    table_idx: u32,
    type_idx: u32,
    slot: u32,
    args: *const ValRaw,
    rets: *mut ValRaw,
) -> i32 {
    with_ctx(|ex, stack, module| {
        let table = module.table(table_idx).ok_or(Trap::Unreachable)?;
        let r = table.get(slot).map_err(|_| Trap::UndefinedElement)?;
        let f = match r {
            crate::runtime::Ref::Null(_) => return Err(Trap::UninitializedElement),
            crate::runtime::Ref::Func(f) => f,
            _ => return Err(Trap::UninitializedElement),
        };
        if !crate::runtime::typing::func_matches_expected(&f, type_idx, module.types()) {
            return Err(Trap::IndirectCallTypeMismatch);
        }
        call_function_raw(ex, stack, &f, args, rets)
    })
}

/// Resolve a function reference for compiled code. The returned pointer
/// borrows the defining module's ownership of the instance; it stays
/// valid while that module is alive.
unsafe extern "C" fn proxy_ref_func(func_idx: u32, out: *mut *const c_void) -> i32 {
    with_ctx(|_, _, module| {
        let f = module.func(func_idx).ok_or(Trap::Unreachable)?;
        unsafe { *out = Arc::as_ptr(&f) as *const c_void };
        Ok(())
    })
}

unsafe extern "C" fn proxy_call_ref(func: *const c_void, args: *const ValRaw, rets: *mut ValRaw) -> i32 {
    with_ctx(|ex, stack, _| {
        if func.is_null() {
            return Err(Trap::AccessNullRef);
        }
        let ptr = func as *const FunctionInstance;
        // Reconstruct a borrowed Arc: bump the count, rebuild, and let
        // the local clone drop at the end of the call.
        let f = unsafe {
            Arc::increment_strong_count(ptr);
            Arc::from_raw(ptr)
        };
        call_function_raw(ex, stack, &f, args, rets)
    })
}

unsafe extern "C" fn proxy_mem_size(mem_idx: u32) -> u32 {
    CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .and_then(|ctx| ctx.module.memory(mem_idx))
            .map(|m| m.size())
            .unwrap_or(u32::MAX)
    })
}

unsafe extern "C" fn proxy_mem_grow(mem_idx: u32, delta: u32) -> u32 {
    CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .and_then(|ctx| ctx.module.memory(mem_idx))
            .and_then(|m| m.grow(delta))
            .unwrap_or(u32::MAX)
    })
}

unsafe extern "C" fn proxy_mem_init(mem_idx: u32, data_idx: u32, dst: u32, src: u32, len: u32) -> i32 {
    with_ctx(|_, _, module| {
        let mem = module.memory(mem_idx).ok_or(Trap::OutOfBoundsMemAccess)?;
        let data = module.data(data_idx).ok_or(Trap::OutOfBoundsMemAccess)?;
        let bytes = data.slice(src, len)?;
        mem.write_bytes(dst, &bytes)
    })
}

unsafe extern "C" fn proxy_data_drop(data_idx: u32) -> i32 {
    with_ctx(|_, _, module| {
        module
            .data(data_idx)
            .ok_or(Trap::OutOfBoundsMemAccess)?
            .drop_data();
        Ok(())
    })
}

unsafe extern "C" fn proxy_mem_copy(dst_mem: u32, src_mem: u32, dst: u32, src: u32, len: u32) -> i32 {
    with_ctx(|_, _, module| {
        let d = module.memory(dst_mem).ok_or(Trap::OutOfBoundsMemAccess)?;
        let s = module.memory(src_mem).ok_or(Trap::OutOfBoundsMemAccess)?;
        crate::runtime::MemoryInstance::copy_between(&d, dst, &s, src, len as usize)
    })
}

unsafe extern "C" fn proxy_mem_fill(mem_idx: u32, dst: u32, value: u8, len: u32) -> i32 {
    with_ctx(|_, _, module| {
        module
            .memory(mem_idx)
            .ok_or(Trap::OutOfBoundsMemAccess)?
            .fill(dst, value, len as usize)
    })
}

unsafe extern "C" fn proxy_table_size(table_idx: u32) -> u32 {
    CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .and_then(|ctx| ctx.module.table(table_idx))
            .map(|t| t.size())
            .unwrap_or(u32::MAX)
    })
}

unsafe extern "C" fn proxy_table_grow(table_idx: u32, delta: u32) -> u32 {
    CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .and_then(|ctx| ctx.module.table(table_idx))
            .and_then(|t| t.grow(delta, crate::runtime::Ref::null_func()))
            .unwrap_or(u32::MAX)
    })
}

unsafe extern "C" fn proxy_table_init(table_idx: u32, elem_idx: u32, dst: u32, src: u32, len: u32) -> i32 {
    with_ctx(|_, _, module| {
        let table = module.table(table_idx).ok_or(Trap::OutOfBoundsTableAccess)?;
        let elem = module.elem(elem_idx).ok_or(Trap::OutOfBoundsTableAccess)?;
        let refs = elem.slice(src, len)?;
        table.init(dst, &refs)
    })
}

unsafe extern "C" fn proxy_elem_drop(elem_idx: u32) -> i32 {
    with_ctx(|_, _, module| {
        module
            .elem(elem_idx)
            .ok_or(Trap::OutOfBoundsTableAccess)?
            .drop_elem();
        Ok(())
    })
}

unsafe extern "C" fn proxy_table_copy(dst_table: u32, src_table: u32, dst: u32, src: u32, len: u32) -> i32 {
    with_ctx(|_, _, module| {
        let d = module.table(dst_table).ok_or(Trap::OutOfBoundsTableAccess)?;
        let s = module.table(src_table).ok_or(Trap::OutOfBoundsTableAccess)?;
        d.copy(dst, &s, src, len)
    })
}

unsafe extern "C" fn proxy_global_get(global_idx: u32, out: *mut ValRaw) -> i32 {
    with_ctx(|_, _, module| {
        let g = module.global(global_idx).ok_or(Trap::Unreachable)?;
        let raw = ValRaw::from_value(&g.get()).ok_or(Trap::Unreachable)?;
        unsafe { *out = raw };
        Ok(())
    })
}

unsafe extern "C" fn proxy_global_set(global_idx: u32, value: *const ValRaw) -> i32 {
    with_ctx(|_, _, module| {
        let g = module.global(global_idx).ok_or(Trap::Unreachable)?;
        let raw = unsafe { *value };
        let v = raw.to_value(g.ty().value).ok_or(Trap::Unreachable)?;
        g.set(v);
        Ok(())
    })
}

unsafe extern "C" fn proxy_atomic_wait(mem_idx: u32, addr: u32, expected: u64, timeout_ns: i64, bit_width: u32) -> i32 {
    let mut outcome = -1i32;
    let status = with_ctx(|ex, _, module| {
        let mem = module.memory(mem_idx).ok_or(Trap::OutOfBoundsMemAccess)?;
        if !mem.is_shared() {
            return Err(Trap::ExpectSharedMemory);
        }
        if addr % (bit_width / 8) != 0 {
            return Err(Trap::Unaligned);
        }
        ex.check_stop()?;
        let timeout = if timeout_ns < 0 {
            None
        } else {
            Some(Duration::from_nanos(timeout_ns as u64))
        };
        let r = match bit_width {
            32 => ex.waiters.wait(
                &ex.stop_token,
                &mem,
                addr,
                || Ok(mem.read_u32(addr)? as u64 == expected),
                timeout,
            )?,
            64 => ex.waiters.wait(
                &ex.stop_token,
                &mem,
                addr,
                || Ok(mem.read_u64(addr)? == expected),
                timeout,
            )?,
            _ => return Err(Trap::Unaligned),
        };
        outcome = r as i32;
        Ok(())
    });
    if status != 0 {
        return -1;
    }
    outcome
}

unsafe extern "C" fn proxy_atomic_notify(mem_idx: u32, addr: u32, count: u32) -> i32 {
    let mut woken = 0i32;
    let status = with_ctx(|ex, _, module| {
        let mem = module.memory(mem_idx).ok_or(Trap::OutOfBoundsMemAccess)?;
        if addr % 4 != 0 {
            return Err(Trap::Unaligned);
        }
        if mem.is_shared() {
            woken = ex.waiters.notify(&mem, addr, count) as i32;
        }
        Ok(())
    });
    if status != 0 {
        return -1;
    }
    woken
}

/// The fixed intrinsics table. Field order is the stable ordinal layout
/// compiled modules link against; changing it is a breaking ABI change.
#[repr(C)]
pub struct IntrinsicsTable {
    pub trap: unsafe extern "C" fn(u32) -> i32,
    pub call: unsafe extern "C" fn(u32, *const ValRaw, *mut ValRaw) -> i32,
    pub call_indirect: unsafe extern "C" fn(u32, u32, u32, *const ValRaw, *mut ValRaw) -> i32,
    pub call_ref: unsafe extern "C" fn(*const c_void, *const ValRaw, *mut ValRaw) -> i32,
    pub ref_func: unsafe extern "C" fn(u32, *mut *const c_void) -> i32,
    pub mem_size: unsafe extern "C" fn(u32) -> u32,
    pub mem_grow: unsafe extern "C" fn(u32, u32) -> u32,
    pub mem_init: unsafe extern "C" fn(u32, u32, u32, u32, u32) -> i32,
    pub data_drop: unsafe extern "C" fn(u32) -> i32,
    pub mem_copy: unsafe extern "C" fn(u32, u32, u32, u32, u32) -> i32,
    pub mem_fill: unsafe extern "C" fn(u32, u32, u8, u32) -> i32,
    pub table_size: unsafe extern "C" fn(u32) -> u32,
    pub table_grow: unsafe extern "C" fn(u32, u32) -> u32,
    pub table_init: unsafe extern "C" fn(u32, u32, u32, u32, u32) -> i32,
    pub elem_drop: unsafe extern "C" fn(u32) -> i32,
    pub table_copy: unsafe extern "C" fn(u32, u32, u32, u32, u32) -> i32,
    pub global_get: unsafe extern "C" fn(u32, *mut ValRaw) -> i32,
    pub global_set: unsafe extern "C" fn(u32, *const ValRaw) -> i32,
    pub atomic_wait: unsafe extern "C" fn(u32, u32, u64, i64, u32) -> i32,
    pub atomic_notify: unsafe extern "C" fn(u32, u32, u32) -> i32,
}

/// The process-wide intrinsics table compiled modules link against.
pub static INTRINSICS: IntrinsicsTable = IntrinsicsTable {
    trap: proxy_trap,
    call: proxy_call,
    call_indirect: proxy_call_indirect,
    call_ref: proxy_call_ref,
    ref_func: proxy_ref_func,
    mem_size: proxy_mem_size,
    mem_grow: proxy_mem_grow,
    mem_init: proxy_mem_init,
    data_drop: proxy_data_drop,
    mem_copy: proxy_mem_copy,
    mem_fill: proxy_mem_fill,
    table_size: proxy_table_size,
    table_grow: proxy_table_grow,
    table_init: proxy_table_init,
    elem_drop: proxy_elem_drop,
    table_copy: proxy_table_copy,
    global_get: proxy_global_get,
    global_set: proxy_global_set,
    atomic_wait: proxy_atomic_wait,
    atomic_notify: proxy_atomic_notify,
};

/// Invoke a compiled entry point: install the thread-local context,
/// marshal arguments, call the symbol, and either collect results or
/// surface the trap left in the error slot.
pub(crate) fn call_compiled(ex: &Executor, func: &Arc<FunctionInstance>, params: Vec<Value>) -> Result<Vec<Value>, Trap> {
    let symbol = func.aot_symbol().ok_or(Trap::Unreachable)?;
    let module = func.defining_module().ok_or(Trap::AccessNullRef)?;
    let ty = func.ty().clone();

    // The stack the proxies use when compiled code re-enters the
    // interpreter (host calls, cold paths).
    let mut bridge_stack = StackManager::new();
    let guard = SavedThreadLocal::install(ex, &mut bridge_stack, module);

    let args: Vec<ValRaw> = params
        .iter()
        .map(|v| ValRaw::from_value(v).ok_or(Trap::Unreachable))
        .collect::<Result<_, _>>()?;
    let mut rets = vec![ValRaw::zero(); ty.results.len().max(1)];

    let context = CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .map(|ctx| &ctx.context as *const ExecutionContext as *mut c_void)
            .unwrap_or(std::ptr::null_mut())
    });
    let status = unsafe { symbol(context, args.as_ptr(), rets.as_mut_ptr()) };
    // Read the error slot before the guard restores the outer context.
    let trap = if status != 0 { Some(take_trap()) } else { None };
    drop(guard);

    if let Some(trap) = trap {
        return Err(trap);
    }
    ty.results
        .iter()
        .zip(rets)
        .map(|(t, r)| r.to_value(*t).ok_or(Trap::Unreachable))
        .collect()
}

/// Run a compiled function against an existing stack, pushing its
/// results like an interpreted call would.
pub(crate) fn run_compiled(
    ex: &Executor,
    stack: &mut StackManager,
    func: &Arc<FunctionInstance>,
    params: Vec<Value>,
) -> Result<(), Trap> {
    let results = call_compiled(ex, func, params)?;
    stack.push_all(results);
    Ok(())
}
