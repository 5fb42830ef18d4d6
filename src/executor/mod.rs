//! The executor
//!
//! Flow control for the engine: instantiation entry points, synchronous
//! and asynchronous invocation, cooperative cancellation, host-function
//! hooks, and the statistics counters the dispatch loop feeds.

pub mod aot;
pub mod component;
pub mod engine;
pub mod instantiate;
pub mod invoke_async;
pub mod ops;
pub mod sync;

pub use invoke_async::AsyncInvocation;

use crate::ast::types::ValueType;
use crate::ast::Module;
use crate::runtime::{
    FunctionInstance, InstantiateError, ModuleInstance, StackManager, Store, Trap, Value,
};
use log::debug;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Hard resource caps and accounting limits.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum linear memory size in pages
    pub max_memory_pages: u32,
    /// Maximum table size in slots
    pub max_table_size: u32,
    /// Maximum GC array length in elements
    pub max_array_size: u32,
    /// Gas budget; exceeding it traps with `CostLimitExceeded`
    pub cost_limit: Option<u64>,
    /// Executed-instruction budget
    pub instruction_limit: Option<u64>,
    /// Maximum call frame depth
    pub max_call_depth: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_memory_pages: 65536,
            max_table_size: 10_000_000,
            max_array_size: 67_108_864,
            cost_limit: None,
            instruction_limit: None,
            max_call_depth: 1000,
        }
    }
}

/// Counters the dispatch loop feeds. Accumulation is monotonic across
/// invocations; [`Statistics::reset`] starts a new measurement window.
#[derive(Debug, Default)]
pub struct Statistics {
    instr_count: AtomicU64,
    gas: AtomicU64,
}

impl Statistics {
    pub fn instr_count(&self) -> u64 {
        self.instr_count.load(Ordering::Relaxed)
    }

    pub fn gas(&self) -> u64 {
        self.gas.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.instr_count.store(0, Ordering::Relaxed);
        self.gas.store(0, Ordering::Relaxed);
    }
}

/// A registered host hook.
type HostHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Hooks {
    pre: Option<HostHook>,
    post: Option<HostHook>,
}

/// Pre-/post-host-function callbacks. Registration takes the write side
/// of the lock, invocation the read side; at most one hook of each kind
/// is installed and later registrations replace earlier ones.
#[derive(Default)]
pub struct HostFuncHandler {
    inner: std::sync::RwLock<Hooks>,
}

impl HostFuncHandler {
    pub fn set_pre(&self, hook: HostHook) {
        self.inner.write().unwrap().pre = Some(hook);
    }

    pub fn set_post(&self, hook: HostHook) {
        self.inner.write().unwrap().post = Some(hook);
    }

    pub fn invoke_pre(&self) {
        let hooks = self.inner.read().unwrap();
        if let Some(pre) = &hooks.pre {
            pre();
        }
    }

    pub fn invoke_post(&self) {
        let hooks = self.inner.read().unwrap();
        if let Some(post) = &hooks.post {
            post();
        }
    }
}

thread_local! {
    /// Bounded stack trace of the most recent trap on this thread.
    static STACK_TRACE: RefCell<Vec<u32>> = const { RefCell::new(Vec::new()) };
}

/// Maximum number of frames recorded in a trap's stack trace.
const MAX_TRACE_FRAMES: usize = 256;

/// Executor flow control.
///
/// An executor is shared freely between threads; concurrent invocations
/// share the immutable module structure and mutate only per-thread stacks
/// and (possibly shared) memories.
pub struct Executor {
    pub(crate) config: Config,
    pub(crate) stats: Statistics,
    pub(crate) stop_token: AtomicU32,
    pub(crate) waiters: sync::WaiterMap,
    pub(crate) hooks: HostFuncHandler,
}

impl Default for Executor {
    fn default() -> Executor {
        Executor::new(Config::default())
    }
}

impl Executor {
    pub fn new(config: Config) -> Executor {
        Executor {
            config,
            stats: Statistics::default(),
            stop_token: AtomicU32::new(0),
            waiters: sync::WaiterMap::new(),
            hooks: HostFuncHandler::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// Instantiate a module into an anonymous instance. The caller owns
    /// the returned instance; on failure the store is unchanged.
    pub fn instantiate_module(
        &self,
        store: &mut Store,
        module: &Module,
    ) -> Result<Arc<ModuleInstance>, InstantiateError> {
        let resolver = |m: &str, f: &str| store.resolve(m, f);
        instantiate::instantiate(self, &resolver, module)
    }

    /// Instantiate a module and register it under `name`.
    pub fn register_module(
        &self,
        store: &mut Store,
        module: &Module,
        name: &str,
    ) -> Result<Arc<ModuleInstance>, InstantiateError> {
        if store.module(name).is_some() {
            return Err(InstantiateError::ModuleNameConflict(name.to_string()));
        }
        let inst = self.instantiate_module(store, module)?;
        store.register_module(name, inst.clone())?;
        Ok(inst)
    }

    /// Register a pre-instantiated instance under the name it carries.
    pub fn register_module_instance(
        &self,
        store: &mut Store,
        inst: Arc<ModuleInstance>,
    ) -> Result<(), InstantiateError> {
        let name = inst
            .name()
            .ok_or_else(|| InstantiateError::ValidationFailed("instance has no name".to_string()))?;
        store.register_module(&name, inst)
    }

    /// Register a host function which runs immediately before every host
    /// function invocation. Replaces any previous registration.
    pub fn register_pre_host_function(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.hooks.set_pre(Box::new(hook));
    }

    /// Register a host function which runs immediately after every host
    /// function invocation. Replaces any previous registration.
    pub fn register_post_host_function(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.hooks.set_post(Box::new(hook));
    }

    /// Invoke a function instance synchronously.
    ///
    /// Validates the parameter count and the type compatibility of each
    /// parameter against the declared signature, then either interprets
    /// the bytecode or enters the attached compiled entry point.
    ///
    /// # Errors
    /// Returns the trap that aborted execution. The per-thread stack
    /// trace of the trap is available from [`Executor::last_stack_trace`].
    pub fn invoke(
        &self,
        func: &Arc<FunctionInstance>,
        params: &[Value],
        param_types: &[ValueType],
    ) -> Result<Vec<(Value, ValueType)>, Trap> {
        let ty = func.ty().clone();
        if params.len() != ty.params.len() || param_types.len() != ty.params.len() {
            return Err(Trap::IndirectCallTypeMismatch);
        }
        for ((value, given), want) in params.iter().zip(param_types).zip(&ty.params) {
            if given != want || !value.matches_type(want) {
                return Err(Trap::IndirectCallTypeMismatch);
            }
        }

        // A fresh invocation clears any stale cancellation request.
        self.stop_token.store(0, Ordering::Relaxed);
        debug!("invoke: {} param(s), {} result(s)", ty.params.len(), ty.results.len());

        let mut stack = StackManager::new();
        match self.run_function(&mut stack, func, params.to_vec()) {
            Ok(()) => {
                let values = stack.pop_n(ty.results.len())?;
                Ok(values.into_iter().zip(ty.results.iter().copied()).collect())
            }
            Err(trap) => {
                let mut trace = stack.frame_trace();
                trace.truncate(MAX_TRACE_FRAMES);
                STACK_TRACE.with(|t| *t.borrow_mut() = trace);
                debug!("invoke trapped: {trap}");
                Err(trap)
            }
        }
    }

    /// The stack trace (function indices, innermost first) recorded by
    /// the most recent trap on this thread.
    pub fn last_stack_trace() -> Vec<u32> {
        STACK_TRACE.with(|t| t.borrow().clone())
    }

    /// Run a function against an existing stack: host functions are
    /// called directly, compiled functions enter through the intrinsics
    /// bridge, everything else is interpreted.
    pub(crate) fn run_function(
        &self,
        stack: &mut StackManager,
        func: &Arc<FunctionInstance>,
        params: Vec<Value>,
    ) -> Result<(), Trap> {
        self.check_stop()?;
        if func.is_host() {
            let results = self.call_host(func, params)?;
            stack.push_all(results);
            return Ok(());
        }
        if func.aot_symbol().is_some() {
            return aot::run_compiled(self, stack, func, params);
        }
        stack.push_all(params);
        let entry_depth = stack.frame_count() + 1;
        engine::enter_function(self, stack, func, false)?;
        engine::execute(self, stack, entry_depth)
    }

    /// Call a host function with the pre/post hooks around it.
    pub(crate) fn call_host(&self, func: &FunctionInstance, args: Vec<Value>) -> Result<Vec<Value>, Trap> {
        let callable = func.host_callable().ok_or(Trap::Unreachable)?;
        self.hooks.invoke_pre();
        let result = callable(args);
        self.hooks.invoke_post();
        result
    }

    /// Stop execution: every checkpoint in the dispatch loop and every
    /// atomic waiter observes the token and traps with `Interrupted`.
    pub fn stop(&self) {
        self.stop_token.store(1, Ordering::Relaxed);
        self.waiters.notify_all();
    }

    /// Cancellation checkpoint, hit at function entry, loop back-edges,
    /// calls, and before atomic waits.
    #[inline]
    pub(crate) fn check_stop(&self) -> Result<(), Trap> {
        if self.stop_token.load(Ordering::Relaxed) != 0 {
            return Err(Trap::Interrupted);
        }
        Ok(())
    }

    /// Account one executed instruction against the configured budgets.
    #[inline]
    pub(crate) fn count_instruction(&self, cost: u64) -> Result<(), Trap> {
        let executed = self.stats.instr_count.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(limit) = self.config.instruction_limit {
            if executed > limit {
                return Err(Trap::CostLimitExceeded);
            }
        }
        let spent = self.stats.gas.fetch_add(cost, Ordering::Relaxed) + cost;
        if let Some(limit) = self.config.cost_limit {
            if spent > limit {
                return Err(Trap::CostLimitExceeded);
            }
        }
        Ok(())
    }

    /// Collect garbage, tracing from every instance registered in
    /// `store` plus `extra_roots` (values the host still holds). Only
    /// call between invocations; live stacks are not scanned.
    pub fn collect_garbage(&self, store: &Store, extra_roots: &[Value]) {
        let mut roots: Vec<Value> = extra_roots.to_vec();
        for module in store.modules() {
            module.gc_roots(&mut roots);
        }
        crate::runtime::gc::heap().collect(roots);
    }
}
