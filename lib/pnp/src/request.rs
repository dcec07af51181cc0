//! Enumeration request records.
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    device::DeviceHandle,
    error::PnpResult,
    event::{Event, StatusSlot},
};

/// Re-enumeration requests, handed to the tree enumerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReenumerateScope {
    /// Only the target device's direct bus relations.
    DeviceOnly,
    /// The whole subtree below the target.
    DeviceTree,
    /// Boot-time enumeration of the root devices.
    RootDevices,
    /// Re-evaluate after the system hive size limit changed.
    SystemHiveLimitChange,
}

/// Request kinds the engine knows about but does not carry out yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredAction {
    AddBootDevices,
    AssignResources,
    GetSetDeviceStatus,
    ClearProblem,
    InvalidateRelationsInList,
    HaltDevice,
    BootDevices,
    InvalidateDeviceState,
    ResetDevice,
    IoResourceChanged,
    SetProblem,
    ShutdownPnpDevices,
    StartDevice,
    StartSystemDevices,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumAction {
    Reenumerate(ReenumerateScope),
    Deferred(DeferredAction),
}

impl EnumAction {
    pub const DEVICE_TREE: EnumAction = EnumAction::Reenumerate(ReenumerateScope::DeviceTree);
    pub const DEVICE_ONLY: EnumAction = EnumAction::Reenumerate(ReenumerateScope::DeviceOnly);
    pub const ROOT_DEVICES: EnumAction = EnumAction::Reenumerate(ReenumerateScope::RootDevices);

    /// Early-boot kinds. They are submitted before any work queue exists, so the submitter runs
    /// the worker itself.
    pub fn is_bulk_boot(&self) -> bool {
        matches!(
            self,
            EnumAction::Reenumerate(ReenumerateScope::RootDevices)
                | EnumAction::Deferred(DeferredAction::AddBootDevices)
                | EnumAction::Deferred(DeferredAction::BootDevices)
        )
    }
}

// region: Completion

/// How a submitter learns the outcome of its request. Both halves are optional; whichever is
/// present is satisfied exactly once, status first.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    event: Option<Arc<Event>>,
    status: Option<Arc<StatusSlot>>,
}

impl Completion {
    /// Fire-and-forget.
    pub fn none() -> Completion {
        Completion::default()
    }

    pub fn new(event: Option<Arc<Event>>, status: Option<Arc<StatusSlot>>) -> Completion {
        Completion { event, status }
    }

    pub fn is_none(&self) -> bool {
        self.event.is_none() && self.status.is_none()
    }

    /// Publish `status`, then raise the signal. Consuming `self` keeps it to a single call.
    pub(crate) fn complete(self, status: PnpResult) {
        if let Some(slot) = self.status {
            slot.write(status);
        }
        if let Some(event) = self.event {
            event.set();
        }
    }
}

// endregion

// region: Record allocation

/// Bounded allocator for request records.
#[derive(Debug)]
pub struct RequestQuota {
    outstanding: AtomicUsize,
    limit: usize,
}

impl RequestQuota {
    pub fn new(limit: usize) -> Arc<RequestQuota> {
        Arc::new(RequestQuota {
            outstanding: AtomicUsize::new(0),
            limit,
        })
    }

    /// Reserve room for one record, or `None` if the limit is reached.
    pub fn try_allocate(self: &Arc<Self>) -> Option<QuotaToken> {
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .ok()?;
        Some(QuotaToken {
            quota: self.clone(),
        })
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// One allocated record's share of the quota; given back on drop.
#[derive(Debug)]
pub struct QuotaToken {
    quota: Arc<RequestQuota>,
}

impl Drop for QuotaToken {
    fn drop(&mut self) {
        self.quota.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

// endregion

/// One pending action on the device tree.
#[derive(Debug)]
pub struct Request {
    target: DeviceHandle,
    action: EnumAction,
    /// Reserved for ordering constraints between batched requests; carried, not enforced.
    ordering_barrier: bool,
    argument: usize,
    completion: Completion,
    slot: QuotaToken,
}

/// A request taken apart by the worker for dispatch.
pub(crate) struct RequestParts {
    pub target: DeviceHandle,
    pub action: EnumAction,
    pub completion: Completion,
    pub slot: QuotaToken,
}

impl Request {
    pub fn new(
        slot: QuotaToken,
        target: DeviceHandle,
        action: EnumAction,
        ordering_barrier: bool,
        argument: usize,
        completion: Completion,
    ) -> Request {
        Request {
            target,
            action,
            ordering_barrier,
            argument,
            completion,
            slot,
        }
    }

    pub fn target(&self) -> &DeviceHandle {
        &self.target
    }

    pub fn action(&self) -> EnumAction {
        self.action
    }

    pub fn ordering_barrier(&self) -> bool {
        self.ordering_barrier
    }

    pub fn argument(&self) -> usize {
        self.argument
    }

    pub(crate) fn into_parts(self) -> RequestParts {
        RequestParts {
            target: self.target,
            action: self.action,
            completion: self.completion,
            slot: self.slot,
        }
    }
}
