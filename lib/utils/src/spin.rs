use core::{
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
};

use ::spin::{Mutex, MutexGuard};

use crate::irq::{IrqControl, IrqState};

/// Spin lock whose critical sections must stay short and never block.
///
/// [SpinLock::lock_irqsave] masks local interrupts for as long as the guard lives, which makes
/// the lock safe to share with producers running in interrupt context.
pub struct SpinLock<T: ?Sized> {
    inner: Mutex<T>,
}

impl<T: ?Sized> SpinLock<T> {
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }
    pub fn lock_irqsave<'a, I: IrqControl + ?Sized>(&'a self, irq: &'a I) -> IrqSpinLockGuard<'a, T, I> {
        IrqSpinLockGuard::new(&self.inner, irq)
    }
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> SpinLock<T> {
        SpinLock {
            inner: Mutex::new(value),
        }
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SpinLock").field("inner", &self.inner).finish()
    }
}

// region: IrqSpinLockGuard

pub struct IrqSpinLockGuard<'a, T: ?Sized, I: IrqControl + ?Sized> {
    inner: ManuallyDrop<MutexGuard<'a, T>>,
    irq: &'a I,
    saved: IrqState,
}

impl<'a, T: ?Sized, I: IrqControl + ?Sized> IrqSpinLockGuard<'a, T, I> {
    fn new(mutex: &'a Mutex<T>, irq: &'a I) -> IrqSpinLockGuard<'a, T, I> {
        let saved = irq.disable_local();
        IrqSpinLockGuard {
            inner: ManuallyDrop::new(mutex.lock()),
            irq,
            saved,
        }
    }
}
impl<T: ?Sized, I: IrqControl + ?Sized> Drop for IrqSpinLockGuard<'_, T, I> {
    fn drop(&mut self) {
        // Unlock before interrupts come back.
        unsafe { ManuallyDrop::drop(&mut self.inner) };
        self.irq.restore_local(self.saved);
    }
}
impl<T: ?Sized, I: IrqControl + ?Sized> Deref for IrqSpinLockGuard<'_, T, I> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        self.inner.deref()
    }
}

impl<T: ?Sized, I: IrqControl + ?Sized> DerefMut for IrqSpinLockGuard<'_, T, I> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.deref_mut()
    }
}

// endregion
