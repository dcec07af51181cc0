//! Reader/writer lock with per-thread ownership, in the style of an executive resource.
//!
//! Unlike a plain RW spin lock, a [Resource] remembers *who* holds it:
//! - exclusive ownership is recursive for the owning thread;
//! - shared holds are counted per thread, so a reader can re-enter;
//! - exclusive waiters are counted, and [Resource::acquire_shared_wait_for_exclusive] queues new
//!   readers behind them (writer preference);
//! - an exclusive hold can be converted to a shared one in place.
//!
//! The ownership queries ([Resource::is_acquired_exclusive], [Resource::shared_count]) are what
//! the tree lock uses to check its acquisition order.
use alloc::vec::Vec;
use log::error;
use spin::Mutex;

use crate::kernel::{KernelHooks, ThreadId};

#[derive(Debug)]
struct SharedHold {
    thread: ThreadId,
    count: usize,
}

#[derive(Debug, Default)]
struct ResourceState {
    owner: Option<ThreadId>,
    exclusive_depth: usize,
    shared: Vec<SharedHold>,
    exclusive_waiters: usize,
}

impl ResourceState {
    fn is_free(&self) -> bool {
        self.owner.is_none() && self.shared.is_empty()
    }

    fn grant_exclusive(&mut self, thread: ThreadId) {
        self.owner = Some(thread);
        self.exclusive_depth = 1;
    }

    fn shared_hold(&mut self, thread: ThreadId) -> Option<&mut SharedHold> {
        self.shared.iter_mut().find(|hold| hold.thread == thread)
    }

    fn add_shared(&mut self, thread: ThreadId, count: usize) {
        match self.shared_hold(thread) {
            Some(hold) => hold.count += count,
            None => self.shared.push(SharedHold { thread, count }),
        }
    }

    /// Grant a shared hold without waiting if that keeps writer preference intact.
    fn try_grant_shared(&mut self, thread: ThreadId) -> bool {
        if self.owner == Some(thread) {
            self.exclusive_depth += 1;
            return true;
        }
        if let Some(hold) = self.shared_hold(thread) {
            hold.count += 1;
            return true;
        }
        if self.owner.is_none() && self.exclusive_waiters == 0 {
            self.shared.push(SharedHold { thread, count: 1 });
            return true;
        }
        false
    }
}

#[derive(Debug)]
pub struct Resource {
    name: &'static str,
    state: Mutex<ResourceState>,
    spin_before_relax: usize,
}

impl Resource {
    pub fn new(name: &'static str, spin_before_relax: usize) -> Resource {
        Resource {
            name,
            state: Mutex::new(ResourceState::default()),
            spin_before_relax,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Take the resource exclusively, waiting for every other holder to leave.
    pub fn acquire_exclusive<K: KernelHooks + ?Sized>(&self, hooks: &K) {
        let me = hooks.current_thread();
        {
            let mut state = self.state.lock();
            if state.owner == Some(me) {
                state.exclusive_depth += 1;
                return;
            }
            debug_assert!(
                state.shared_hold(me).is_none(),
                "{}: shared holder asked for exclusive access",
                self.name
            );
            if state.is_free() {
                state.grant_exclusive(me);
                return;
            }
            state.exclusive_waiters += 1;
        }
        self.wait_until(hooks, |state| {
            if state.is_free() {
                state.exclusive_waiters -= 1;
                state.grant_exclusive(me);
                true
            } else {
                false
            }
        });
    }

    /// Take a shared hold. Succeeds at once for a thread that already holds the resource;
    /// otherwise waits while a writer owns it or is waiting for it.
    pub fn acquire_shared_wait_for_exclusive<K: KernelHooks + ?Sized>(&self, hooks: &K) {
        let me = hooks.current_thread();
        if self.state.lock().try_grant_shared(me) {
            return;
        }
        self.wait_until(hooks, |state| state.try_grant_shared(me));
    }

    /// Drop one level of whatever hold the calling thread has.
    pub fn release<K: KernelHooks + ?Sized>(&self, hooks: &K) {
        let me = hooks.current_thread();
        let mut state = self.state.lock();
        if state.owner == Some(me) {
            state.exclusive_depth -= 1;
            if state.exclusive_depth == 0 {
                state.owner = None;
            }
            return;
        }
        let Some(index) = state.shared.iter().position(|hold| hold.thread == me) else {
            error!("{}: released by thread {} which holds nothing", self.name, *me);
            debug_assert!(false, "{}: release without a hold", self.name);
            return;
        };
        state.shared[index].count -= 1;
        if state.shared[index].count == 0 {
            state.shared.swap_remove(index);
        }
    }

    /// Turn the calling thread's exclusive hold into a shared hold of the same depth.
    /// Waiting readers may enter as soon as this returns.
    pub fn convert_exclusive_to_shared<K: KernelHooks + ?Sized>(&self, hooks: &K) {
        let me = hooks.current_thread();
        let mut state = self.state.lock();
        debug_assert_eq!(state.owner, Some(me), "{}: convert without exclusive hold", self.name);
        if state.owner != Some(me) {
            error!("{}: thread {} converted a hold it does not own", self.name, *me);
            return;
        }
        let depth = state.exclusive_depth;
        state.owner = None;
        state.exclusive_depth = 0;
        state.add_shared(me, depth);
    }

    pub fn is_acquired_exclusive<K: KernelHooks + ?Sized>(&self, hooks: &K) -> bool {
        self.state.lock().owner == Some(hooks.current_thread())
    }

    /// Hold depth of the calling thread. An exclusive hold counts too, as it grants read access.
    pub fn shared_count<K: KernelHooks + ?Sized>(&self, hooks: &K) -> usize {
        let me = hooks.current_thread();
        let mut state = self.state.lock();
        if state.owner == Some(me) {
            return state.exclusive_depth;
        }
        state.shared_hold(me).map_or(0, |hold| hold.count)
    }

    /// Whether any thread holds the resource.
    pub fn is_held(&self) -> bool {
        !self.state.lock().is_free()
    }

    pub fn exclusive_waiters(&self) -> usize {
        self.state.lock().exclusive_waiters
    }

    fn wait_until<K: KernelHooks + ?Sized>(
        &self,
        hooks: &K,
        mut try_grant: impl FnMut(&mut ResourceState) -> bool,
    ) {
        let mut spins = 0;
        loop {
            if try_grant(&mut *self.state.lock()) {
                return;
            }
            if spins < self.spin_before_relax {
                spins += 1;
                core::hint::spin_loop();
            } else {
                spins = 0;
                hooks.relax();
            }
        }
    }
}
