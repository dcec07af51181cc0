//! Services the PnP core borrows from the surrounding kernel.
//!
//! - [KernelHooks] covers execution-context facilities: thread identity, yielding while a lock is
//!   contended, local interrupt masking (through [IrqControl]), critical regions and the fatal
//!   stop path.
//! - [WorkQueue] is the deferred executor used to run the enumeration worker off the caller's
//!   context.
//!
//! With the `std` feature the [host] module provides implementations backed by OS threads, which
//! is what the test suite runs on.
use alloc::boxed::Box;
use core::sync::atomic::{AtomicUsize, Ordering};

use utils::{impl_conversion, impl_deref, irq::IrqControl};

use crate::error::BugCheck;

/// Identity of the execution context that owns a lock hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId {
    inner: usize,
}
impl_deref!(ThreadId, usize);
impl_conversion!(ThreadId, usize);

pub trait KernelHooks: IrqControl + Send + Sync + 'static {
    fn current_thread(&self) -> ThreadId;
    /// Give the CPU away while waiting for a contended lock or event.
    fn relax(&self);
    /// Keep the current thread from being suspended by asynchronous kernel callbacks.
    /// Nests; each call is paired with [KernelHooks::leave_critical_region].
    fn enter_critical_region(&self);
    fn leave_critical_region(&self);
    /// Halt the system. Never returns.
    fn bug_check(&self, check: BugCheck) -> !;
}

/// RAII pairing of [KernelHooks::enter_critical_region] and
/// [KernelHooks::leave_critical_region].
pub struct CriticalRegion<'a, K: KernelHooks + ?Sized> {
    hooks: &'a K,
}

impl<'a, K: KernelHooks + ?Sized> CriticalRegion<'a, K> {
    pub fn enter(hooks: &'a K) -> CriticalRegion<'a, K> {
        hooks.enter_critical_region();
        CriticalRegion { hooks }
    }
}

impl<K: KernelHooks + ?Sized> Drop for CriticalRegion<'_, K> {
    fn drop(&mut self) {
        self.hooks.leave_critical_region();
    }
}

/// Nesting counter for critical regions, one per thread.
///
/// Kernels that keep the count in their thread control block can embed this directly;
/// the host implementation keeps one in thread-local storage.
#[derive(Debug)]
pub struct RegionCounter {
    counter: AtomicUsize,
}

impl RegionCounter {
    pub const fn new() -> RegionCounter {
        RegionCounter {
            counter: AtomicUsize::new(0),
        }
    }

    pub fn enter(&self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn leave(&self) {
        let prev = self.counter.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "critical region left more often than entered");
    }

    pub fn is_inside(&self) -> bool {
        self.get_count() != 0
    }

    pub fn get_count(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Default for RegionCounter {
    fn default() -> Self {
        Self::new()
    }
}

// region: Deferred work

/// A run-once closure handed to a [WorkQueue].
pub struct WorkItem {
    inner: Box<dyn FnOnce() + Send + 'static>,
}

impl WorkItem {
    pub fn new(f: impl FnOnce() + Send + 'static) -> WorkItem {
        WorkItem { inner: Box::new(f) }
    }

    pub fn run(self) {
        (self.inner)()
    }
}

impl core::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("WorkItem")
    }
}

/// Fire-and-forget executor. Every queued item runs exactly once, never on the caller's stack.
pub trait WorkQueue: Send + Sync {
    fn queue_work(&self, item: WorkItem);
}

// endregion

#[cfg(any(test, feature = "std"))]
pub mod host {
    //! Hosted implementations of the kernel services.
    use super::*;
    use log::error;
    use std::{
        cell::Cell,
        sync::Mutex,
        thread::{self, JoinHandle},
        vec::Vec,
    };
    use utils::irq::IrqState;

    static NEXT_THREAD: AtomicUsize = AtomicUsize::new(1);

    std::thread_local! {
        static THREAD_ID: usize = NEXT_THREAD.fetch_add(1, Ordering::Relaxed);
        static REGION: RegionCounter = const { RegionCounter::new() };
        static IRQ_DEPTH: Cell<usize> = const { Cell::new(0) };
    }

    /// [KernelHooks] for a hosted process: OS threads stand in for kernel threads and
    /// interrupt masking is only tracked, not enforced.
    #[derive(Debug, Default)]
    pub struct HostKernel;

    impl HostKernel {
        pub fn new() -> HostKernel {
            HostKernel
        }

        /// Critical region nesting of the calling thread.
        pub fn critical_region_depth(&self) -> usize {
            REGION.with(|r| r.get_count())
        }

        /// Whether the calling thread currently runs with interrupts "masked".
        pub fn interrupts_masked(&self) -> bool {
            IRQ_DEPTH.with(|d| d.get() != 0)
        }
    }

    impl IrqControl for HostKernel {
        fn disable_local(&self) -> IrqState {
            IRQ_DEPTH.with(|d| {
                let prev = d.get();
                d.set(prev + 1);
                IrqState::from(prev)
            })
        }

        fn restore_local(&self, state: IrqState) {
            IRQ_DEPTH.with(|d| d.set(usize::from(state)));
        }
    }

    impl KernelHooks for HostKernel {
        fn current_thread(&self) -> ThreadId {
            ThreadId::from(THREAD_ID.with(|id| *id))
        }

        fn relax(&self) {
            thread::yield_now();
        }

        fn enter_critical_region(&self) {
            REGION.with(|r| r.enter());
        }

        fn leave_critical_region(&self) {
            REGION.with(|r| r.leave());
        }

        fn bug_check(&self, check: BugCheck) -> ! {
            error!("{}", check);
            panic!("{}", check);
        }
    }

    /// [WorkQueue] that runs every item on a fresh OS thread.
    #[derive(Debug, Default)]
    pub struct ThreadWorkQueue {
        spawned: Mutex<Vec<JoinHandle<()>>>,
        queued: AtomicUsize,
    }

    impl ThreadWorkQueue {
        pub fn new() -> ThreadWorkQueue {
            ThreadWorkQueue::default()
        }

        /// Number of items queued since creation.
        pub fn queued(&self) -> usize {
            self.queued.load(Ordering::SeqCst)
        }

        /// Join every thread spawned so far, including ones spawned while joining.
        pub fn join_all(&self) {
            loop {
                let batch: Vec<_> = match self.spawned.lock() {
                    Ok(mut spawned) => spawned.drain(..).collect(),
                    Err(poisoned) => poisoned.into_inner().drain(..).collect(),
                };
                if batch.is_empty() {
                    return;
                }
                for handle in batch {
                    if handle.join().is_err() {
                        error!("PnP work item panicked");
                    }
                }
            }
        }
    }

    impl WorkQueue for ThreadWorkQueue {
        fn queue_work(&self, item: WorkItem) {
            self.queued.fetch_add(1, Ordering::SeqCst);
            let handle = thread::spawn(move || item.run());
            match self.spawned.lock() {
                Ok(mut spawned) => spawned.push(handle),
                Err(poisoned) => poisoned.into_inner().push(handle),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::sync::Arc;

        #[test]
        fn thread_ids_are_distinct() {
            let hooks = HostKernel::new();
            let here = hooks.current_thread();
            assert_eq!(here, hooks.current_thread());
            let there = thread::spawn(|| HostKernel::new().current_thread())
                .join()
                .unwrap();
            assert_ne!(here, there);
        }

        #[test]
        fn critical_region_guard_nests() {
            let hooks = HostKernel::new();
            assert_eq!(hooks.critical_region_depth(), 0);
            {
                let _outer = CriticalRegion::enter(&hooks);
                let _inner = CriticalRegion::enter(&hooks);
                assert_eq!(hooks.critical_region_depth(), 2);
            }
            assert_eq!(hooks.critical_region_depth(), 0);
        }

        #[test]
        fn irq_state_restores_previous_depth() {
            let hooks = HostKernel::new();
            let a = hooks.disable_local();
            let b = hooks.disable_local();
            assert!(hooks.interrupts_masked());
            hooks.restore_local(b);
            assert!(hooks.interrupts_masked());
            hooks.restore_local(a);
            assert!(!hooks.interrupts_masked());
        }

        #[test]
        fn work_queue_runs_items_off_thread() {
            let wq = ThreadWorkQueue::new();
            let ran = Arc::new(AtomicUsize::new(0));
            let caller = HostKernel::new().current_thread();
            for _ in 0..3 {
                let ran = ran.clone();
                wq.queue_work(WorkItem::new(move || {
                    assert_ne!(HostKernel::new().current_thread(), caller);
                    ran.fetch_add(1, Ordering::SeqCst);
                }));
            }
            wq.join_all();
            assert_eq!(wq.queued(), 3);
            assert_eq!(ran.load(Ordering::SeqCst), 3);
        }

        #[test]
        #[should_panic(expected = "STOP")]
        fn bug_check_panics_on_host() {
            HostKernel::new().bug_check(BugCheck::invalid_device_object(0));
        }
    }
}
