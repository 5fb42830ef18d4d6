//! Asynchronous invocation
//!
//! `async_invoke` runs an invocation on a worker thread and hands back a
//! future-like handle with `wait`, `wait_for`, and `cancel`. Cancelling
//! raises the executor's stop token, so a running invocation observes
//! `Interrupted` at its next checkpoint and blocked atomic waiters are
//! woken.

use crate::ast::types::ValueType;
use crate::executor::Executor;
use crate::runtime::{FunctionInstance, Trap, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

type InvokeResult = Result<Vec<(Value, ValueType)>, Trap>;

/// A pending asynchronous invocation.
pub struct AsyncInvocation {
    receiver: mpsc::Receiver<InvokeResult>,
    handle: Option<JoinHandle<()>>,
    executor: Arc<Executor>,
    cancelled: Arc<AtomicBool>,
}

impl Executor {
    /// Invoke a function on a worker thread, returning immediately.
    pub fn async_invoke(
        self: &Arc<Self>,
        func: &Arc<FunctionInstance>,
        params: &[Value],
        param_types: &[ValueType],
    ) -> AsyncInvocation {
        let (sender, receiver) = mpsc::channel();
        let executor = self.clone();
        let func = func.clone();
        let params = params.to_vec();
        let param_types = param_types.to_vec();
        let cancelled = Arc::new(AtomicBool::new(false));

        let worker_executor = executor.clone();
        let worker_cancelled = cancelled.clone();
        let handle = std::thread::spawn(move || {
            let result = if worker_cancelled.load(Ordering::Acquire) {
                Err(Trap::Interrupted)
            } else {
                worker_executor.invoke(&func, &params, &param_types)
            };
            // The receiver may already be gone; nothing to do then.
            let _ = sender.send(result);
        });

        AsyncInvocation {
            receiver,
            handle: Some(handle),
            executor,
            cancelled,
        }
    }
}

impl AsyncInvocation {
    /// Block until the invocation completes and return its result.
    pub fn wait(mut self) -> InvokeResult {
        let result = self.receiver.recv().unwrap_or(Err(Trap::Interrupted));
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        result
    }

    /// Wait up to `timeout` for completion. `None` means the invocation
    /// is still running; calling again later is fine.
    pub fn wait_for(&self, timeout: Duration) -> Option<InvokeResult> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(Err(Trap::Interrupted)),
        }
    }

    /// Cancel the invocation: raises the stop token so the running code
    /// traps with `Interrupted` at its next checkpoint. An invocation
    /// that has not started yet never runs.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.executor.stop();
    }
}

impl Drop for AsyncInvocation {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
