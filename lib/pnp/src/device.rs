//! Device objects and the device nodes that place them in the tree.
//!
//! A [DeviceObject] is what drivers and callers hold on to; its [DeviceNode] is the tree
//! bookkeeping (lifecycle state, flags, parent and children). Structural changes to the tree
//! take a [TreeMutation] proof, so they cannot happen without an exclusive tree-shape hold.
use alloc::{boxed::Box, vec::Vec};
use bitflags::bitflags;
use core::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use spin::RwLock;

use crate::{
    handle::{Handle, HandleRef},
    tree_lock::{TreeAccess, TreeMutation},
};

pub type DeviceHandle = Handle<DeviceObject>;
pub type DeviceRef = HandleRef<DeviceObject>;

/// Lifecycle of a device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum NodeState {
    Unspecified = 0,
    Uninitialized,
    Initialized,
    DriversAdded,
    ResourcesAssigned,
    StartPending,
    StartCompletion,
    StartPostWork,
    Started,
    QueryStopped,
    Stopped,
    RestartCompletion,
    EnumeratePending,
    EnumerateCompletion,
    AwaitingQueuedDeletion,
    AwaitingQueuedRemoval,
    QueryRemoved,
    RemovePendingCloses,
    Removed,
    DeletePendingCloses,
    Deleted,
}

bitflags! {
    pub struct NodeFlags: u32 {
        const PROCESSED                  = 0x0000_0001;
        const STARTED                    = 0x0000_0002;
        const START_FAILED               = 0x0000_0004;
        const ENUMERATED                 = 0x0000_0008;
        const DELETED                    = 0x0000_0010;
        const ADDED                      = 0x0000_0020;
        const HAS_BOOT_CONFIG            = 0x0000_0040;
        const NO_RESOURCE_REQUIRED       = 0x0000_0100;
        const LEGACY_DRIVER              = 0x0000_1000;
        const HAS_PROBLEM                = 0x0000_2000;
        const DEVICE_GONE                = 0x0001_0000;
        /// Node fabricated to carry resources of a legacy driver; never re-enumerated.
        const LEGACY_RESOURCE_DEVICENODE = 0x0002_0000;
    }
}

#[derive(Debug)]
pub struct DeviceNode {
    state: AtomicU8,
    flags: AtomicU32,
    parent: RwLock<Option<DeviceRef>>,
    children: RwLock<Vec<DeviceHandle>>,
}

impl DeviceNode {
    fn new(state: NodeState, flags: NodeFlags) -> DeviceNode {
        DeviceNode {
            state: AtomicU8::new(state.into()),
            flags: AtomicU32::new(flags.bits()),
            parent: RwLock::new(None),
            children: RwLock::new(Vec::new()),
        }
    }

    pub fn state(&self) -> NodeState {
        NodeState::try_from(self.state.load(Ordering::Acquire)).unwrap_or(NodeState::Unspecified)
    }

    /// Move the node to `state`. Deletion goes through [Handle::mark_deleted] instead.
    pub fn set_state(&self, state: NodeState) {
        debug_assert_ne!(state, NodeState::Deleted);
        self.state.store(state.into(), Ordering::Release);
    }

    pub fn flags(&self) -> NodeFlags {
        NodeFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn set_flags(&self, flags: NodeFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn clear_flags(&self, flags: NodeFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    pub fn parent(&self) -> Option<DeviceHandle> {
        self.parent.read().as_ref().and_then(|parent| parent.get_handle())
    }

    /// Snapshot of the children; each entry is a new reference.
    pub fn children(&self, _tree: &impl TreeAccess) -> Vec<DeviceHandle> {
        self.children.read().clone()
    }

    pub fn child_count(&self, _tree: &impl TreeAccess) -> usize {
        self.children.read().len()
    }
}

#[derive(Debug)]
pub struct DeviceObject {
    name: Box<str>,
    node: Option<DeviceNode>,
}

impl DeviceObject {
    /// New device with a node in the `Initialized` state.
    pub fn new(name: impl AsRef<str>) -> DeviceHandle {
        DeviceObject::with_node(name, NodeState::Initialized, NodeFlags::empty())
    }

    pub fn with_node(name: impl AsRef<str>, state: NodeState, flags: NodeFlags) -> DeviceHandle {
        DeviceHandle::from(DeviceObject {
            name: Box::from(name.as_ref()),
            node: Some(DeviceNode::new(state, flags)),
        })
    }

    /// Device that was never given a node, e.g. one created by a driver but not yet reported.
    pub fn without_node(name: impl AsRef<str>) -> DeviceHandle {
        DeviceHandle::from(DeviceObject {
            name: Box::from(name.as_ref()),
            node: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_node(&self) -> Option<&DeviceNode> {
        self.node.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTreeError {
    /// One of the devices involved has no node.
    NoDeviceNode,
    /// The child is not linked under this parent.
    NotAChild,
}

impl DeviceHandle {
    /// Link `child` under this device.
    pub fn attach_child(
        &self,
        child: DeviceHandle,
        _tree: &impl TreeMutation,
    ) -> Result<(), DeviceTreeError> {
        let parent_node = self.device_node().ok_or(DeviceTreeError::NoDeviceNode)?;
        let child_node = child.device_node().ok_or(DeviceTreeError::NoDeviceNode)?;
        *child_node.parent.write() = Some(self.create_ref());
        parent_node.children.write().push(child);
        Ok(())
    }

    /// Unlink `child`, handing back the reference the tree held on it.
    pub fn detach_child(
        &self,
        child: &DeviceHandle,
        _tree: &impl TreeMutation,
    ) -> Result<DeviceHandle, DeviceTreeError> {
        let parent_node = self.device_node().ok_or(DeviceTreeError::NoDeviceNode)?;
        let mut children = parent_node.children.write();
        let index = children
            .iter()
            .position(|c| c.ptr_eq(child))
            .ok_or(DeviceTreeError::NotAChild)?;
        let detached = children.remove(index);
        drop(children);
        if let Some(node) = detached.device_node() {
            *node.parent.write() = None;
        }
        Ok(detached)
    }

    /// Mark the node deleted. The worker will not re-enumerate it again.
    pub fn mark_deleted(&self, _tree: &impl TreeMutation) -> Result<(), DeviceTreeError> {
        let node = self.device_node().ok_or(DeviceTreeError::NoDeviceNode)?;
        node.state.store(NodeState::Deleted.into(), Ordering::Release);
        node.set_flags(NodeFlags::DELETED);
        Ok(())
    }
}
