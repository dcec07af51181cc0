//! The PnP manager: one coordinator object for the request queue, the tree lock and the
//! single-flight enumeration worker.
//!
//! Callers reach it through an [Arc], so any producer (a bus driver's interrupt path, a rescan
//! thread, the boot sequence) can submit work concurrently:
//! - [PnpManager::invalidate_relations] is the bus-relation change notification;
//! - [PnpManager::request_device_action] is the submission protocol underneath it;
//! - [PnpManager::request_device_action_and_wait] is its blocking form.
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use log::{info, warn};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use spin::Once;

use crate::{
    device::{DeviceHandle, NodeFlags},
    error::{BugCheck, PnpError, PnpResult},
    event::{Event, StatusSlot},
    kernel::{KernelHooks, WorkItem, WorkQueue},
    logging::debug_ex,
    params::PnpConfig,
    queue::{Claim, RequestQueue},
    request::{Completion, EnumAction, Request, RequestQuota},
    tree_lock::TreeLock,
    worker::DeviceEnumerator,
};

/// Kinds of device relations a driver can report as changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum RelationKind {
    Bus = 0,
    Ejection = 1,
    Power = 2,
    Removal = 3,
    TargetDevice = 4,
    SingleBus = 5,
    Transport = 6,
}

pub struct PnpManager<K: KernelHooks> {
    hooks: Arc<K>,
    tree_lock: TreeLock<K>,
    queue: RequestQueue,
    quota: Arc<RequestQuota>,
    enumerator: Arc<dyn DeviceEnumerator<K>>,
    work_queue: Once<Arc<dyn WorkQueue>>,
    root: DeviceHandle,
    shutting_down: AtomicBool,
    config: PnpConfig,
}

impl<K: KernelHooks> PnpManager<K> {
    /// `root` is the physical device of the tree root; requests without a target go there.
    pub fn new(
        hooks: Arc<K>,
        enumerator: Arc<dyn DeviceEnumerator<K>>,
        root: DeviceHandle,
        config: PnpConfig,
    ) -> Arc<PnpManager<K>> {
        info!(
            "PnP manager up: root '{}', {} request records",
            root.name(),
            config.max_pending_requests
        );
        Arc::new(PnpManager {
            tree_lock: TreeLock::new(hooks.clone(), config.lock_spin_before_relax),
            hooks,
            queue: RequestQueue::with_capacity(config.max_pending_requests),
            quota: RequestQuota::new(config.max_pending_requests),
            enumerator,
            work_queue: Once::new(),
            root,
            shutting_down: AtomicBool::new(false),
            config,
        })
    }

    /// Attach the deferred executor once it exists. Only the first call takes effect.
    ///
    /// Until then, a submission that starts a worker run executes it on the caller's thread.
    pub fn attach_work_queue(&self, work_queue: Arc<dyn WorkQueue>) -> bool {
        let mut attached = false;
        self.work_queue.call_once(|| {
            attached = true;
            work_queue
        });
        attached
    }

    pub fn hooks(&self) -> &K {
        &self.hooks
    }

    pub fn tree_lock(&self) -> &TreeLock<K> {
        &self.tree_lock
    }

    pub fn root_device(&self) -> &DeviceHandle {
        &self.root
    }

    pub fn config(&self) -> &PnpConfig {
        &self.config
    }

    pub(crate) fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub(crate) fn enumerator(&self) -> &dyn DeviceEnumerator<K> {
        &*self.enumerator
    }

    /// Records submitted but not yet dispatched.
    pub fn pending_requests(&self) -> usize {
        self.queue.len(&*self.hooks)
    }

    /// Records allocated and not yet freed, including the one being dispatched.
    pub fn outstanding_requests(&self) -> usize {
        self.quota.outstanding()
    }

    pub fn is_enumeration_in_progress(&self) -> bool {
        self.queue.in_progress(&*self.hooks)
    }

    /// Block until no worker run is in progress.
    pub fn wait_for_enumeration(&self) {
        self.queue.finished().wait(&*self.hooks);
    }

    /// Stop accepting requests. Records still queued complete as unsuccessful.
    pub fn begin_shutdown(&self) {
        info!("PnP manager shutting down");
        self.shutting_down.store(true, Ordering::Release);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    // region: Submission

    /// Queue `action` for `device` (the root device if `None`) and make sure a worker run will
    /// dispatch it.
    ///
    /// Bulk boot kinds run the worker to completion on the calling thread before returning.
    /// Otherwise the call returns at once: it either joins the run in progress or starts one on
    /// the work queue.
    pub fn request_device_action(
        self: &Arc<Self>,
        device: Option<&DeviceHandle>,
        action: EnumAction,
        ordering_barrier: bool,
        argument: usize,
        completion: Completion,
    ) -> PnpResult {
        if self.is_shutting_down() {
            return Err(PnpError::ShuttingDown);
        }
        let slot = self.quota.try_allocate().ok_or_else(|| {
            warn!("Cannot allocate a request record for {:?}", action);
            PnpError::InsufficientResources
        })?;
        let target = device.unwrap_or(&self.root).clone();
        debug_ex!("Requesting {:?} for device '{}'", action, target.name());

        let request = Request::new(slot, target, action, ordering_barrier, argument, completion);
        let bulk_boot = action.is_bulk_boot();
        match self.queue.enqueue_and_claim(&*self.hooks, request, bulk_boot) {
            Claim::Joined => {
                debug_ex!("Enumeration in progress; request joins the current run");
            }
            Claim::Started if bulk_boot => self.enumeration_worker(),
            Claim::Started => self.start_worker(),
        }
        Ok(())
    }

    /// Submit `action` and block until the worker has dispatched it; returns its status.
    ///
    /// Must not be called from a [DeviceEnumerator]: the request would wait behind the
    /// caller's own run.
    pub fn request_device_action_and_wait(
        self: &Arc<Self>,
        device: Option<&DeviceHandle>,
        action: EnumAction,
        argument: usize,
    ) -> PnpResult {
        let event = Arc::new(Event::new(false));
        let slot = Arc::new(StatusSlot::new());
        let completion = Completion::new(Some(event.clone()), Some(slot.clone()));
        self.request_device_action(device, action, false, argument, completion)?;
        event.wait(&*self.hooks);
        slot.status().unwrap_or(Err(PnpError::Unsuccessful))
    }

    fn start_worker(self: &Arc<Self>) {
        match self.work_queue.get() {
            Some(work_queue) => {
                let manager = self.clone();
                work_queue.queue_work(WorkItem::new(move || manager.enumeration_worker()));
                debug_ex!("Queued the enumeration worker");
            }
            None => {
                warn!("No work queue attached; enumerating on the caller's thread");
                self.enumeration_worker();
            }
        }
    }

    // endregion

    // region: Relation invalidation

    /// A driver reports that the relations of `device` changed.
    ///
    /// A missing device, a device without a node, or a legacy resource node stops the system:
    /// going on would corrupt the tree.
    pub fn invalidate_relations(self: &Arc<Self>, device: Option<&DeviceHandle>, kind: RelationKind) {
        let device = self.validate_invalidation_target(device);
        let action = match kind {
            RelationKind::Bus => EnumAction::DEVICE_TREE,
            RelationKind::SingleBus => EnumAction::DEVICE_ONLY,
            RelationKind::Power => {
                warn!("PowerRelations invalidation is NOT IMPLEMENTED");
                return;
            }
            other => {
                warn!("Relation type {:?} invalidation is NOT IMPLEMENTED", other);
                return;
            }
        };
        if let Err(err) =
            self.request_device_action(Some(device), action, false, 0, Completion::none())
        {
            warn!("Invalidation of '{}' dropped: {}", device.name(), err);
        }
    }

    /// [PnpManager::invalidate_relations] for a raw relation code; unknown codes are ignored.
    pub fn invalidate_relations_raw(self: &Arc<Self>, device: Option<&DeviceHandle>, kind: u32) {
        match RelationKind::try_from(kind) {
            Ok(kind) => self.invalidate_relations(device, kind),
            Err(_) => {
                self.validate_invalidation_target(device);
                warn!("Relation type {} is NOT IMPLEMENTED", kind);
            }
        }
    }

    /// Blocking relation invalidation. Not implemented: the target is checked like
    /// [PnpManager::invalidate_relations], then [PnpError::NotImplemented] is reported without
    /// queueing anything.
    pub fn synchronous_invalidate_relations(
        self: &Arc<Self>,
        device: Option<&DeviceHandle>,
        kind: RelationKind,
    ) -> PnpResult {
        let device = self.validate_invalidation_target(device);
        warn!(
            "Synchronous {:?} invalidation of {:?} is NOT IMPLEMENTED",
            kind,
            device.name()
        );
        Err(PnpError::NotImplemented)
    }

    fn validate_invalidation_target<'d>(&self, device: Option<&'d DeviceHandle>) -> &'d DeviceHandle {
        let Some(device) = device else {
            self.hooks.bug_check(BugCheck::invalid_device_object(0));
        };
        match device.device_node() {
            Some(node) if !node.flags().contains(NodeFlags::LEGACY_RESOURCE_DEVICENODE) => device,
            _ => self
                .hooks
                .bug_check(BugCheck::invalid_device_object(device.address())),
        }
    }

    // endregion
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::{DeviceObject, NodeState},
        kernel::host::{HostKernel, ThreadWorkQueue},
        request::{DeferredAction, ReenumerateScope},
        tree_lock::EngineReadGuard,
    };
    use alloc::{string::String, vec::Vec};
    use spin::Mutex;

    /// Records which devices were enumerated and keeps their references.
    #[derive(Default)]
    struct RecordingEnumerator {
        seen: Mutex<Vec<DeviceHandle>>,
    }

    impl RecordingEnumerator {
        fn names(&self) -> Vec<String> {
            self.seen.lock().iter().map(|d| String::from(d.name())).collect()
        }
    }

    impl DeviceEnumerator<HostKernel> for RecordingEnumerator {
        fn enumerate_device(
            &self,
            device: DeviceHandle,
            tree: &mut EngineReadGuard<'_, HostKernel>,
        ) -> PnpResult {
            assert!(tree.tree_lock().engine_held_exclusive());
            self.seen.lock().push(device);
            Ok(())
        }
    }

    fn manager(
        limit: usize,
    ) -> (Arc<PnpManager<HostKernel>>, Arc<RecordingEnumerator>) {
        let enumerator = Arc::new(RecordingEnumerator::default());
        let manager = PnpManager::new(
            Arc::new(HostKernel::new()),
            enumerator.clone(),
            DeviceObject::new("HTREE\\ROOT\\0"),
            PnpConfig::default().with_max_pending_requests(limit),
        );
        (manager, enumerator)
    }

    #[test]
    fn bus_relations_enqueue_whole_subtree_request() {
        let (manager, enumerator) = manager(8);
        let dev = DeviceObject::new("PCI\\VEN_8086");
        manager.invalidate_relations(Some(&dev), RelationKind::Bus);
        assert_eq!(enumerator.names(), ["PCI\\VEN_8086"]);
        assert!(!manager.is_enumeration_in_progress());
        assert!(manager.tree_lock().is_idle());
    }

    /// Keeps queued work items instead of running them, so a claimed run stays open.
    #[derive(Default)]
    struct ParkedWorkQueue {
        items: Mutex<Vec<WorkItem>>,
    }

    impl WorkQueue for ParkedWorkQueue {
        fn queue_work(&self, item: WorkItem) {
            self.items.lock().push(item);
        }
    }

    #[test]
    fn relation_kinds_map_to_reenumeration_scopes() {
        let (manager, enumerator) = manager(8);
        let parked = Arc::new(ParkedWorkQueue::default());
        manager.attach_work_queue(parked.clone());
        let dev = DeviceObject::new("PCI\\VEN_10EC");

        manager.invalidate_relations(Some(&dev), RelationKind::Bus);
        manager.invalidate_relations(Some(&dev), RelationKind::SingleBus);
        assert!(manager.is_enumeration_in_progress());
        assert_eq!(parked.items.lock().len(), 1);

        let hooks = manager.hooks();
        let first = manager.queue().pop_front(hooks).unwrap();
        let second = manager.queue().pop_front(hooks).unwrap();
        assert!(manager.queue().pop_front(hooks).is_none());
        assert_eq!(first.action(), EnumAction::DEVICE_TREE);
        assert_eq!(second.action(), EnumAction::DEVICE_ONLY);
        assert!(first.target().ptr_eq(&dev));
        assert!(second.target().ptr_eq(&dev));
        drop((first, second));

        // The parked run finds the queue empty and ends.
        let items: Vec<_> = parked.items.lock().drain(..).collect();
        for item in items {
            item.run();
        }
        assert!(!manager.is_enumeration_in_progress());
        assert!(enumerator.names().is_empty());
        assert_eq!(manager.outstanding_requests(), 0);
        assert_eq!(dev.reference_count(), 1);
    }

    #[test]
    fn power_and_unknown_relations_are_no_ops() {
        let (manager, enumerator) = manager(8);
        let dev = DeviceObject::new("ACPI\\PNP0A03");
        manager.invalidate_relations(Some(&dev), RelationKind::Power);
        manager.invalidate_relations(Some(&dev), RelationKind::Removal);
        manager.invalidate_relations_raw(Some(&dev), 42);
        assert_eq!(manager.outstanding_requests(), 0);
        assert!(enumerator.names().is_empty());
        assert_eq!(dev.reference_count(), 1);
        manager.invalidate_relations_raw(Some(&dev), 5);
        assert_eq!(enumerator.names(), ["ACPI\\PNP0A03"]);
    }

    #[test]
    fn synchronous_invalidation_is_not_implemented() {
        let (manager, _) = manager(8);
        let dev = DeviceObject::new("USB\\ROOT_HUB");
        assert_eq!(
            manager.synchronous_invalidate_relations(Some(&dev), RelationKind::Bus),
            Err(PnpError::NotImplemented)
        );
        assert_eq!(manager.outstanding_requests(), 0);
    }

    #[test]
    #[should_panic(expected = "STOP: 0x000000CA (0x2")]
    fn null_device_stops_the_system() {
        let (manager, _) = manager(8);
        manager.invalidate_relations(None, RelationKind::Bus);
    }

    #[test]
    #[should_panic(expected = "STOP: 0x000000CA (0x2")]
    fn synchronous_invalidation_of_null_device_stops_the_system() {
        let (manager, _) = manager(8);
        let _ = manager.synchronous_invalidate_relations(None, RelationKind::Bus);
    }

    #[test]
    #[should_panic(expected = "STOP: 0x000000CA (0x2")]
    fn synchronous_invalidation_of_legacy_node_stops_the_system() {
        let (manager, _) = manager(8);
        let legacy = DeviceObject::with_node(
            "LEGACY",
            NodeState::Started,
            NodeFlags::LEGACY_RESOURCE_DEVICENODE,
        );
        let _ = manager.synchronous_invalidate_relations(Some(&legacy), RelationKind::Bus);
    }

    #[test]
    #[should_panic(expected = "STOP: 0x000000CA (0x2")]
    fn device_without_node_stops_the_system() {
        let (manager, _) = manager(8);
        manager.invalidate_relations(Some(&DeviceObject::without_node("ghost")), RelationKind::Bus);
    }

    #[test]
    #[should_panic(expected = "STOP: 0x000000CA (0x2")]
    fn legacy_resource_node_stops_the_system() {
        let (manager, _) = manager(8);
        let legacy = DeviceObject::with_node(
            "LEGACY",
            NodeState::Started,
            NodeFlags::LEGACY_RESOURCE_DEVICENODE,
        );
        manager.invalidate_relations(Some(&legacy), RelationKind::SingleBus);
    }

    #[test]
    fn missing_target_means_root_device() {
        let (manager, enumerator) = manager(8);
        manager
            .request_device_action(None, EnumAction::DEVICE_ONLY, false, 0, Completion::none())
            .unwrap();
        assert_eq!(enumerator.names(), ["HTREE\\ROOT\\0"]);
    }

    #[test]
    fn allocation_failure_leaves_state_untouched() {
        let (manager, _) = manager(0);
        let dev = DeviceObject::new("PCI\\0");
        assert_eq!(
            manager.request_device_action(
                Some(&dev),
                EnumAction::DEVICE_TREE,
                false,
                0,
                Completion::none()
            ),
            Err(PnpError::InsufficientResources)
        );
        assert_eq!(manager.pending_requests(), 0);
        assert!(!manager.is_enumeration_in_progress());
        assert!(manager.queue().finished().is_set());
        assert_eq!(dev.reference_count(), 1);
    }

    #[test]
    fn deleted_node_is_never_enumerated() {
        let (manager, enumerator) = manager(8);
        let dev = DeviceObject::with_node("gone", NodeState::Deleted, NodeFlags::DELETED);
        let status = manager.request_device_action_and_wait(Some(&dev), EnumAction::DEVICE_TREE, 0);
        assert_eq!(status, Err(PnpError::Unsuccessful));
        assert!(enumerator.names().is_empty());
        assert_eq!(dev.reference_count(), 1);
    }

    #[test]
    fn deferred_actions_report_not_implemented_and_release_reference() {
        let (manager, enumerator) = manager(8);
        let dev = DeviceObject::new("PCI\\1");
        for kind in [
            DeferredAction::StartDevice,
            DeferredAction::ResetDevice,
            DeferredAction::AssignResources,
        ] {
            let status =
                manager.request_device_action_and_wait(Some(&dev), EnumAction::Deferred(kind), 0);
            assert_eq!(status, Err(PnpError::NotImplemented));
            assert_eq!(dev.reference_count(), 1);
        }
        assert!(enumerator.names().is_empty());
        assert_eq!(manager.outstanding_requests(), 0);
    }

    #[test]
    fn reenumeration_transfers_reference_to_enumerator() {
        let (manager, enumerator) = manager(8);
        let dev = DeviceObject::new("PCI\\2");
        let status = manager.request_device_action_and_wait(
            Some(&dev),
            EnumAction::Reenumerate(ReenumerateScope::SystemHiveLimitChange),
            0,
        );
        assert_eq!(status, Ok(()));
        assert_eq!(dev.reference_count(), 2);
        enumerator.seen.lock().clear();
        assert_eq!(dev.reference_count(), 1);
    }

    #[test]
    fn shutdown_refuses_new_requests() {
        let (manager, _) = manager(8);
        manager.begin_shutdown();
        assert!(manager.is_shutting_down());
        assert_eq!(
            manager.request_device_action(None, EnumAction::DEVICE_TREE, false, 0, Completion::none()),
            Err(PnpError::ShuttingDown)
        );
    }

    #[test]
    fn work_queue_runs_worker_off_thread() {
        let (manager, enumerator) = manager(8);
        let wq = Arc::new(ThreadWorkQueue::new());
        assert!(manager.attach_work_queue(wq.clone()));
        assert!(!manager.attach_work_queue(Arc::new(ThreadWorkQueue::new())));
        let dev = DeviceObject::new("PCI\\3");
        manager.invalidate_relations(Some(&dev), RelationKind::SingleBus);
        manager.wait_for_enumeration();
        wq.join_all();
        assert_eq!(wq.queued(), 1);
        assert_eq!(enumerator.names(), ["PCI\\3"]);
        assert!(!manager.is_enumeration_in_progress());
    }
}
