//! Multi-level locking protocol for the device tree.
//!
//! Two [Resource]s protect the tree: the *engine* lock serializes enumeration activity and the
//! *tree-shape* lock protects node presence and parent/child edges. Callers pick one of four
//! acquisition levels:
//!
//! | Level | Operation | Holds |
//! |---|---|---|
//! | 0 | [TreeLock::acquire_read] | tree-shape shared (queues behind writers) |
//! | 1 | [TreeLock::acquire_read_under_engine] | engine exclusive, then tree-shape shared |
//! | 2 | [TreeLock::acquire_write] | engine exclusive, then tree-shape exclusive |
//! | 3 | [EngineReadGuard::escalate_to_write] | converts a level-1 tree-shape hold to exclusive |
//!
//! The engine lock is always taken before the tree-shape lock and released after it. Every
//! acquisition runs inside a critical region which is left only after the release.
use alloc::sync::Arc;
use num_enum::IntoPrimitive;

use crate::{
    error::BugCheck,
    kernel::{CriticalRegion, KernelHooks},
    logging::debug_ex,
    resource::Resource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum LockLevel {
    Read = 0,
    ReadUnderEngine = 1,
    Write = 2,
    Escalated = 3,
}

mod sealed {
    pub trait Sealed {}
}

/// Proof that the tree-shape lock is held at some level.
pub trait TreeAccess: sealed::Sealed {
    fn level(&self) -> LockLevel;
}

/// Proof that the tree-shape lock is held exclusively (level 2, or level 3 after escalation).
pub trait TreeMutation: TreeAccess {}

pub struct TreeLock<K: KernelHooks> {
    hooks: Arc<K>,
    engine: Resource,
    tree: Resource,
}

impl<K: KernelHooks> TreeLock<K> {
    pub fn new(hooks: Arc<K>, spin_before_relax: usize) -> TreeLock<K> {
        TreeLock {
            hooks,
            engine: Resource::new("engine", spin_before_relax),
            tree: Resource::new("tree-shape", spin_before_relax),
        }
    }

    pub fn hooks(&self) -> &K {
        &self.hooks
    }

    /// Level 0: read-only walk. Never touches the engine lock.
    pub fn acquire_read(&self) -> TreeReadGuard<'_, K> {
        debug_ex!("Locking tree at level {:?}", LockLevel::Read);
        let region = CriticalRegion::enter(&*self.hooks);
        self.tree.acquire_shared_wait_for_exclusive(&*self.hooks);
        TreeReadGuard {
            lock: self,
            _region: region,
        }
    }

    /// Level 1: serialize with other enumeration activity while reading the tree shape.
    pub fn acquire_read_under_engine(&self) -> EngineReadGuard<'_, K> {
        debug_ex!("Locking tree at level {:?}", LockLevel::ReadUnderEngine);
        let region = CriticalRegion::enter(&*self.hooks);
        self.check_engine_order(LockLevel::ReadUnderEngine);
        self.engine.acquire_exclusive(&*self.hooks);
        self.tree.acquire_shared_wait_for_exclusive(&*self.hooks);
        EngineReadGuard {
            lock: self,
            _region: region,
        }
    }

    /// Level 2: full tree mutation.
    pub fn acquire_write(&self) -> TreeWriteGuard<'_, K> {
        debug_ex!("Locking tree at level {:?}", LockLevel::Write);
        let region = CriticalRegion::enter(&*self.hooks);
        self.check_engine_order(LockLevel::Write);
        self.engine.acquire_exclusive(&*self.hooks);
        self.tree.acquire_exclusive(&*self.hooks);
        TreeWriteGuard {
            lock: self,
            _region: region,
        }
    }

    /// Whether the calling thread owns the engine lock.
    pub fn engine_held_exclusive(&self) -> bool {
        self.engine.is_acquired_exclusive(&*self.hooks)
    }

    /// Tree-shape hold depth of the calling thread, shared or exclusive.
    pub fn tree_hold_depth(&self) -> usize {
        self.tree.shared_count(&*self.hooks)
    }

    pub fn tree_held_exclusive(&self) -> bool {
        self.tree.is_acquired_exclusive(&*self.hooks)
    }

    /// No thread holds either lock.
    pub fn is_idle(&self) -> bool {
        !self.engine.is_held() && !self.tree.is_held()
    }

    fn check_engine_order(&self, level: LockLevel) {
        if self.tree.shared_count(&*self.hooks) != 0 {
            let thread = self.hooks.current_thread();
            self.hooks
                .bug_check(BugCheck::lock_order_violation(*thread, level.into()));
        }
    }
}

// region: Guards

pub struct TreeReadGuard<'a, K: KernelHooks> {
    lock: &'a TreeLock<K>,
    _region: CriticalRegion<'a, K>,
}

impl<K: KernelHooks> Drop for TreeReadGuard<'_, K> {
    fn drop(&mut self) {
        self.lock.tree.release(&*self.lock.hooks);
        debug_ex!("Unlocked tree at level {:?}", LockLevel::Read);
    }
}

/// Level-1 hold. The enumeration worker keeps one of these for a whole drain and lends it to
/// the tree enumerator, which escalates it when it needs to reshape the tree.
pub struct EngineReadGuard<'a, K: KernelHooks> {
    lock: &'a TreeLock<K>,
    _region: CriticalRegion<'a, K>,
}

impl<'a, K: KernelHooks> EngineReadGuard<'a, K> {
    /// Level 3: upgrade the tree-shape hold to exclusive without letting go of the engine lock.
    /// Dropping the returned guard converts the hold back to shared.
    pub fn escalate_to_write<'g>(&'g mut self) -> EscalatedGuard<'g, 'a, K> {
        let lock = self.lock;
        let hooks = &*lock.hooks;
        debug_ex!("Locking tree at level {:?}", LockLevel::Escalated);
        let region = CriticalRegion::enter(hooks);
        let held = lock.tree.shared_count(hooks);
        if !lock.engine.is_acquired_exclusive(hooks)
            || held == 0
            || lock.tree.is_acquired_exclusive(hooks)
        {
            hooks.bug_check(BugCheck::bad_escalation(*hooks.current_thread(), held));
        }
        for _ in 0..held {
            lock.tree.release(hooks);
        }
        for _ in 0..held {
            lock.tree.acquire_exclusive(hooks);
        }
        EscalatedGuard {
            guard: self,
            _region: region,
        }
    }

    pub fn tree_lock(&self) -> &'a TreeLock<K> {
        self.lock
    }
}

impl<K: KernelHooks> Drop for EngineReadGuard<'_, K> {
    fn drop(&mut self) {
        self.lock.tree.release(&*self.lock.hooks);
        self.lock.engine.release(&*self.lock.hooks);
        debug_ex!("Unlocked tree at level {:?}", LockLevel::ReadUnderEngine);
    }
}

pub struct TreeWriteGuard<'a, K: KernelHooks> {
    lock: &'a TreeLock<K>,
    _region: CriticalRegion<'a, K>,
}

impl<K: KernelHooks> Drop for TreeWriteGuard<'_, K> {
    fn drop(&mut self) {
        self.lock.tree.release(&*self.lock.hooks);
        self.lock.engine.release(&*self.lock.hooks);
        debug_ex!("Unlocked tree at level {:?}", LockLevel::Write);
    }
}

pub struct EscalatedGuard<'g, 'a, K: KernelHooks> {
    guard: &'g mut EngineReadGuard<'a, K>,
    _region: CriticalRegion<'a, K>,
}

impl<K: KernelHooks> Drop for EscalatedGuard<'_, '_, K> {
    fn drop(&mut self) {
        let lock = self.guard.lock;
        debug_assert!(lock.engine.is_acquired_exclusive(&*lock.hooks));
        lock.tree.convert_exclusive_to_shared(&*lock.hooks);
        debug_ex!("Unlocked tree at level {:?}", LockLevel::Escalated);
    }
}

impl<K: KernelHooks> sealed::Sealed for TreeReadGuard<'_, K> {}
impl<K: KernelHooks> sealed::Sealed for EngineReadGuard<'_, K> {}
impl<K: KernelHooks> sealed::Sealed for TreeWriteGuard<'_, K> {}
impl<K: KernelHooks> sealed::Sealed for EscalatedGuard<'_, '_, K> {}

impl<K: KernelHooks> TreeAccess for TreeReadGuard<'_, K> {
    fn level(&self) -> LockLevel {
        LockLevel::Read
    }
}
impl<K: KernelHooks> TreeAccess for EngineReadGuard<'_, K> {
    fn level(&self) -> LockLevel {
        LockLevel::ReadUnderEngine
    }
}
impl<K: KernelHooks> TreeAccess for TreeWriteGuard<'_, K> {
    fn level(&self) -> LockLevel {
        LockLevel::Write
    }
}
impl<K: KernelHooks> TreeAccess for EscalatedGuard<'_, '_, K> {
    fn level(&self) -> LockLevel {
        LockLevel::Escalated
    }
}

impl<K: KernelHooks> TreeMutation for TreeWriteGuard<'_, K> {}
impl<K: KernelHooks> TreeMutation for EscalatedGuard<'_, '_, K> {}

// endregion
