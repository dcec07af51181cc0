//! Device enumeration and device-tree synchronization for the Plug-and-Play manager.
//!
//! Every request that walks or reshapes the device tree goes through [PnpManager]: callers submit
//! [request::Request] records from any context, and a single enumeration worker drains them in
//! FIFO order while holding the [tree_lock::TreeLock].
#![no_std]

extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod logging;

pub mod device;
pub mod error;
pub mod event;
pub mod handle;
pub mod kernel;
pub mod manager;
pub mod params;
pub mod queue;
pub mod request;
pub mod resource;
pub mod tree_lock;
pub mod worker;

pub use device::{DeviceHandle, DeviceNode, DeviceObject, NodeFlags, NodeState};
pub use error::{BugCheck, PnpError, PnpResult};
pub use kernel::{KernelHooks, WorkItem, WorkQueue};
pub use manager::{PnpManager, RelationKind};
pub use params::PnpConfig;
pub use request::{Completion, DeferredAction, EnumAction, ReenumerateScope};
pub use tree_lock::{EngineReadGuard, TreeLock};
pub use worker::DeviceEnumerator;
