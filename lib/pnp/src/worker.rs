//! The enumeration worker: drains the request queue under a level-1 tree hold.
use log::{error, warn};

use crate::{
    device::{DeviceHandle, NodeState},
    error::{PnpError, PnpResult},
    kernel::KernelHooks,
    logging::debug_ex,
    manager::PnpManager,
    request::{EnumAction, RequestParts},
    tree_lock::EngineReadGuard,
};

/// Discovers children and assigns resources for one device. Implemented by the bus layer.
pub trait DeviceEnumerator<K: KernelHooks>: Send + Sync {
    /// Enumerate `device`. The enumerator owns the reference in `device` from here on.
    ///
    /// `tree` is the worker's level-1 hold; escalate it with
    /// [EngineReadGuard::escalate_to_write] before reshaping the tree. Requests submitted from
    /// here join the current worker run, so waiting on their completion would deadlock.
    fn enumerate_device(&self, device: DeviceHandle, tree: &mut EngineReadGuard<'_, K>)
    -> PnpResult;
}

/// Who holds the target reference after dispatch.
#[derive(Debug)]
pub enum HandleDisposition {
    /// The dispatched operation took the reference over.
    Transferred,
    /// The reference came back; the worker releases it.
    Retained(DeviceHandle),
}

#[derive(Debug)]
pub struct DispatchOutcome {
    pub status: PnpResult,
    pub handle: HandleDisposition,
}

impl DispatchOutcome {
    fn retained(status: PnpResult, handle: DeviceHandle) -> DispatchOutcome {
        DispatchOutcome {
            status,
            handle: HandleDisposition::Retained(handle),
        }
    }
}

impl<K: KernelHooks> PnpManager<K> {
    /// Run the worker loop on the calling thread until the queue is empty.
    ///
    /// The caller must have claimed the run (the in-progress flag is set by whoever starts it).
    pub(crate) fn enumeration_worker(&self) {
        let mut tree = self.tree_lock().acquire_read_under_engine();
        while let Some(request) = self.queue().pop_or_finish(self.hooks()) {
            let RequestParts {
                target,
                action,
                completion,
                slot,
            } = request.into_parts();
            let outcome = self.dispatch(target, action, &mut tree);
            completion.complete(outcome.status);
            if let HandleDisposition::Retained(handle) = outcome.handle {
                drop(handle);
            }
            drop(slot);
        }
        drop(tree);
        debug_ex!("Enumeration run finished");
    }

    fn dispatch(
        &self,
        target: DeviceHandle,
        action: EnumAction,
        tree: &mut EngineReadGuard<'_, K>,
    ) -> DispatchOutcome {
        let state = target.device_node().map(|node| node.state());
        match state {
            None => {
                error!("Request for device '{}' without a device node", target.name());
                return DispatchOutcome::retained(Err(PnpError::Unsuccessful), target);
            }
            Some(NodeState::Deleted) => {
                debug_ex!("Device '{}' is deleted; skipping {:?}", target.name(), action);
                return DispatchOutcome::retained(Err(PnpError::Unsuccessful), target);
            }
            Some(_) => {}
        }
        if self.is_shutting_down() {
            debug_ex!("Shutting down; dropping {:?} for '{}'", action, target.name());
            return DispatchOutcome::retained(Err(PnpError::Unsuccessful), target);
        }

        debug_ex!("Dispatching {:?} for device '{}'", action, target.name());
        match action {
            EnumAction::Reenumerate(scope) => {
                debug_ex!("Reenumeration ({:?}) of '{}'", scope, target.name());
                let status = self.enumerator().enumerate_device(target, tree);
                if let Err(err) = status {
                    warn!("Enumeration {:?} failed: {}", scope, err);
                }
                DispatchOutcome {
                    status,
                    handle: HandleDisposition::Transferred,
                }
            }
            EnumAction::Deferred(kind) => {
                warn!("Request type {:?} is NOT IMPLEMENTED", kind);
                DispatchOutcome::retained(Err(PnpError::NotImplemented), target)
            }
        }
    }
}
