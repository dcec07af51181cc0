//! Run-time parameters of the PnP manager. Defaults come from the build-time flags.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PnpConfig {
    /// Request records that may exist at once; further submissions fail with
    /// [crate::PnpError::InsufficientResources].
    pub max_pending_requests: usize,
    /// Busy-wait iterations on a contended tree lock before calling
    /// [crate::KernelHooks::relax].
    pub lock_spin_before_relax: usize,
}

impl Default for PnpConfig {
    fn default() -> Self {
        PnpConfig {
            max_pending_requests: config::MAX_PENDING_REQUESTS,
            lock_spin_before_relax: config::LOCK_SPIN_BEFORE_RELAX,
        }
    }
}

impl PnpConfig {
    pub fn with_max_pending_requests(mut self, max_pending_requests: usize) -> PnpConfig {
        self.max_pending_requests = max_pending_requests;
        self
    }

    pub fn with_lock_spin_before_relax(mut self, spins: usize) -> PnpConfig {
        self.lock_spin_before_relax = spins;
        self
    }
}
