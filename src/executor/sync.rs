//! Atomic wait/notify rendezvous
//!
//! A process-wide waiter map keyed by the waited-on cell: memory-instance
//! identity plus address, so independent memories never share waiters
//! even at equal offsets. Each waiter owns its own mutex/condvar pair;
//! the map mutex only guards membership.
//!
//! Lock order is map -> waiter. The wait path drops the waiter lock
//! before touching the map again, so notify (map then waiter) cannot
//! deadlock against it.

use crate::runtime::{MemoryInstance, Trap};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// A single blocked thread.
struct Waiter {
    state: Mutex<bool>,
    cond: Condvar,
}

impl Waiter {
    fn new() -> Waiter {
        Waiter {
            state: Mutex::new(false),
            cond: Condvar::new(),
        }
    }
}

type WaitKey = (usize, u32);

/// The process-wide waiter registry.
#[derive(Default)]
pub struct WaiterMap {
    inner: Mutex<HashMap<WaitKey, Vec<Arc<Waiter>>>>,
}

/// Outcome codes of `atomic.wait`, as pushed to the operand stack.
pub const WAIT_OK: u32 = 0;
pub const WAIT_NOT_EQUAL: u32 = 1;
pub const WAIT_TIMED_OUT: u32 = 2;

impl WaiterMap {
    pub fn new() -> WaiterMap {
        WaiterMap::default()
    }

    fn key(mem: &Arc<MemoryInstance>, addr: u32) -> WaitKey {
        (Arc::as_ptr(mem) as usize, addr)
    }

    fn remove(&self, key: WaitKey, waiter: &Arc<Waiter>) {
        let mut map = self.inner.lock().unwrap();
        if let Some(list) = map.get_mut(&key) {
            list.retain(|w| !Arc::ptr_eq(w, waiter));
            if list.is_empty() {
                map.remove(&key);
            }
        }
    }

    /// Block until notified, until the timeout elapses, or until the stop
    /// token is raised. `still_expected` re-loads the cell; a changed
    /// value after registration returns `WAIT_NOT_EQUAL` without
    /// sleeping.
    pub fn wait(
        &self,
        stop_token: &AtomicU32,
        mem: &Arc<MemoryInstance>,
        addr: u32,
        still_expected: impl Fn() -> Result<bool, Trap>,
        timeout: Option<Duration>,
    ) -> Result<u32, Trap> {
        let key = Self::key(mem, addr);
        let waiter = Arc::new(Waiter::new());
        self.inner.lock().unwrap().entry(key).or_default().push(waiter.clone());

        let mut notified = waiter.state.lock().unwrap();
        if !still_expected()? {
            drop(notified);
            self.remove(key, &waiter);
            return Ok(WAIT_NOT_EQUAL);
        }

        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            if stop_token.load(Ordering::Relaxed) != 0 {
                drop(notified);
                self.remove(key, &waiter);
                return Err(Trap::Interrupted);
            }
            if *notified {
                drop(notified);
                self.remove(key, &waiter);
                return Ok(WAIT_OK);
            }
            match deadline {
                None => {
                    notified = waiter.cond.wait(notified).unwrap();
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        drop(notified);
                        self.remove(key, &waiter);
                        return Ok(WAIT_TIMED_OUT);
                    }
                    let (guard, _) = waiter.cond.wait_timeout(notified, deadline - now).unwrap();
                    notified = guard;
                }
            }
        }
    }

    /// Wake up to `count` waiters on the cell, returning how many were
    /// actually woken.
    pub fn notify(&self, mem: &Arc<MemoryInstance>, addr: u32, count: u32) -> u32 {
        let key = Self::key(mem, addr);
        let mut woken = 0u32;
        let mut map = self.inner.lock().unwrap();
        if let Some(list) = map.get_mut(&key) {
            while woken < count && !list.is_empty() {
                let waiter = list.remove(0);
                *waiter.state.lock().unwrap() = true;
                waiter.cond.notify_one();
                woken += 1;
            }
            if list.is_empty() {
                map.remove(&key);
            }
        }
        woken
    }

    /// Wake every waiter in the map without marking them notified: each
    /// one re-checks the stop token and its own state. Used by `stop()`.
    pub fn notify_all(&self) {
        let map = self.inner.lock().unwrap();
        for waiters in map.values() {
            for waiter in waiters {
                waiter.cond.notify_all();
            }
        }
    }

    /// Number of registered waiters, for tests.
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().unwrap().values().map(|v| v.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::types::{Limits, MemoryType};
    use std::thread;

    fn shared_mem() -> Arc<MemoryInstance> {
        Arc::new(
            MemoryInstance::new(
                MemoryType {
                    limits: Limits::shared(1, 1),
                },
                65536,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_wait_not_equal_returns_immediately() {
        let map = WaiterMap::new();
        let stop = AtomicU32::new(0);
        let mem = shared_mem();
        mem.write_u32(0, 5).unwrap();
        let r = map
            .wait(&stop, &mem, 0, || Ok(mem.read_u32(0)? == 0), None)
            .unwrap();
        assert_eq!(r, WAIT_NOT_EQUAL);
        assert_eq!(map.waiter_count(), 0);
    }

    #[test]
    fn test_wait_timeout() {
        let map = WaiterMap::new();
        let stop = AtomicU32::new(0);
        let mem = shared_mem();
        let r = map
            .wait(
                &stop,
                &mem,
                0,
                || Ok(mem.read_u32(0)? == 0),
                Some(Duration::from_millis(10)),
            )
            .unwrap();
        assert_eq!(r, WAIT_TIMED_OUT);
        assert_eq!(map.waiter_count(), 0);
    }

    #[test]
    fn test_notify_wakes_waiter() {
        let map = Arc::new(WaiterMap::new());
        let mem = shared_mem();
        let stop = Arc::new(AtomicU32::new(0));

        let waiter_map = map.clone();
        let waiter_mem = mem.clone();
        let waiter_stop = stop.clone();
        let handle = thread::spawn(move || {
            waiter_map
                .wait(
                    &waiter_stop,
                    &waiter_mem,
                    8,
                    || Ok(waiter_mem.read_u32(8)? == 0),
                    None,
                )
                .unwrap()
        });

        // Wait until the waiter is registered, then notify.
        while map.waiter_count() == 0 {
            thread::yield_now();
        }
        assert_eq!(map.notify(&mem, 8, 1), 1);
        assert_eq!(handle.join().unwrap(), WAIT_OK);
        // A second notify has nobody to wake.
        assert_eq!(map.notify(&mem, 8, 1), 0);
    }

    #[test]
    fn test_distinct_memories_do_not_share_waiters() {
        let map = Arc::new(WaiterMap::new());
        let mem_a = shared_mem();
        let mem_b = shared_mem();
        let stop = Arc::new(AtomicU32::new(0));

        let waiter_map = map.clone();
        let waiter_mem = mem_a.clone();
        let waiter_stop = stop.clone();
        let handle = thread::spawn(move || {
            waiter_map
                .wait(
                    &waiter_stop,
                    &waiter_mem,
                    0,
                    || Ok(waiter_mem.read_u32(0)? == 0),
                    Some(Duration::from_millis(200)),
                )
                .unwrap()
        });

        while map.waiter_count() == 0 {
            thread::yield_now();
        }
        // Same offset, different memory: nothing to wake.
        assert_eq!(map.notify(&mem_b, 0, 1), 0);
        // The waiter eventually times out rather than being woken.
        assert_eq!(handle.join().unwrap(), WAIT_TIMED_OUT);
    }

    #[test]
    fn test_stop_interrupts_waiters() {
        let map = Arc::new(WaiterMap::new());
        let mem = shared_mem();
        let stop = Arc::new(AtomicU32::new(0));

        let waiter_map = map.clone();
        let waiter_mem = mem.clone();
        let waiter_stop = stop.clone();
        let handle = thread::spawn(move || {
            waiter_map.wait(
                &waiter_stop,
                &waiter_mem,
                0,
                || Ok(waiter_mem.read_u32(0)? == 0),
                None,
            )
        });

        while map.waiter_count() == 0 {
            thread::yield_now();
        }
        stop.store(1, Ordering::Relaxed);
        map.notify_all();
        assert_eq!(handle.join().unwrap(), Err(Trap::Interrupted));
    }
}
