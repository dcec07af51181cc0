//! Local interrupt masking.
//!
//! The kernel side implements [IrqControl] for whatever owns the interrupt enable bit of the
//! current hart. Locks that may be taken from interrupt context save the previous state on
//! acquisition and hand it back on release, so nested masking restores correctly.
use crate::impl_conversion;

/// Opaque interrupt-enable state returned by [IrqControl::disable_local].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqState {
    inner: usize,
}
impl_conversion!(IrqState, usize);

pub trait IrqControl {
    /// Mask interrupts on the current hart and return the state to restore later.
    fn disable_local(&self) -> IrqState;
    /// Restore a state previously returned by [IrqControl::disable_local].
    fn restore_local(&self, state: IrqState);
}
