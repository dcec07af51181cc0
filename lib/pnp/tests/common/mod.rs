#![allow(dead_code)]

use pnp::{
    DeviceEnumerator, DeviceHandle, DeviceObject, EngineReadGuard, EnumAction, PnpConfig,
    PnpError, PnpManager, PnpResult, kernel::host::HostKernel,
};
use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
};

/// Bus-layer stand-in driven by per-device scripts.
#[derive(Default)]
pub struct ScriptedEnumerator {
    manager: Mutex<Weak<PnpManager<HostKernel>>>,
    /// Names in dispatch order.
    pub log: Mutex<Vec<String>>,
    /// References handed over by the worker.
    pub owned: Mutex<Vec<DeviceHandle>>,
    /// Devices whose enumeration fails.
    pub failing: Mutex<HashSet<String>>,
    /// Children to create, attach and queue when the named device is enumerated.
    pub children: Mutex<Vec<(String, Vec<String>)>>,
    /// While set, enumeration of a device named "gate" spins.
    pub hold_gate: AtomicBool,
    pub gate_entered: AtomicBool,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl ScriptedEnumerator {
    pub fn names(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn fail_on(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn spawn_children(&self, parent: &str, children: &[&str]) {
        self.children.lock().unwrap().push((
            parent.to_string(),
            children.iter().map(|c| c.to_string()).collect(),
        ));
    }

    pub fn wait_for_gate(&self) {
        while !self.gate_entered.load(Ordering::SeqCst) {
            thread::yield_now();
        }
    }

    pub fn open_gate(&self) {
        self.hold_gate.store(false, Ordering::SeqCst);
    }
}

impl DeviceEnumerator<HostKernel> for ScriptedEnumerator {
    fn enumerate_device(
        &self,
        device: DeviceHandle,
        tree: &mut EngineReadGuard<'_, HostKernel>,
    ) -> PnpResult {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        assert!(tree.tree_lock().engine_held_exclusive());

        let name = device.name().to_string();
        if name == "gate" {
            self.gate_entered.store(true, Ordering::SeqCst);
            while self.hold_gate.load(Ordering::SeqCst) {
                thread::yield_now();
            }
        }
        self.log.lock().unwrap().push(name.clone());

        let spawn = self
            .children
            .lock()
            .unwrap()
            .iter()
            .find(|(parent, _)| *parent == name)
            .map(|(_, kids)| kids.clone());
        if let Some(kids) = spawn {
            let kids: Vec<_> = kids.iter().map(DeviceObject::new).collect();
            {
                let escalated = tree.escalate_to_write();
                for kid in &kids {
                    device.attach_child(kid.clone(), &escalated).unwrap();
                }
            }
            let manager = self.manager.lock().unwrap().upgrade().unwrap();
            for kid in &kids {
                manager
                    .request_device_action(
                        Some(kid),
                        EnumAction::DEVICE_ONLY,
                        false,
                        0,
                        pnp::Completion::none(),
                    )
                    .unwrap();
            }
        }

        let failed = self.failing.lock().unwrap().contains(&name);
        self.owned.lock().unwrap().push(device);
        self.active.fetch_sub(1, Ordering::SeqCst);
        if failed {
            Err(PnpError::Enumeration("scripted failure"))
        } else {
            Ok(())
        }
    }
}

pub fn setup(
    config: PnpConfig,
) -> (Arc<PnpManager<HostKernel>>, Arc<ScriptedEnumerator>) {
    let enumerator = Arc::new(ScriptedEnumerator::default());
    let manager = PnpManager::new(
        Arc::new(HostKernel::new()),
        enumerator.clone(),
        DeviceObject::new("HTREE\\ROOT\\0"),
        config,
    );
    *enumerator.manager.lock().unwrap() = Arc::downgrade(&manager);
    (manager, enumerator)
}
