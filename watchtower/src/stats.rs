use std::sync::atomic::{AtomicUsize, Ordering};

/// Statistics for a RegionMonitor
#[derive(Debug, Default)]
pub(crate) struct MonitorStats {
    /// Total number of probes performed
    probes: AtomicUsize,
    /// Total number of failed probes
    failed_probes: AtomicUsize,
    /// Number of up/down liveness transitions
    transitions: AtomicUsize,
}

impl MonitorStats {
    pub(crate) fn probes(&self) -> usize {
        self.probes.load(Ordering::Relaxed)
    }

    pub(crate) fn increment_probes(&self) {
        self.probes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed_probes(&self) -> usize {
        self.failed_probes.load(Ordering::Relaxed)
    }

    pub(crate) fn increment_failed_probes(&self) {
        self.failed_probes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn transitions(&self) -> usize {
        self.transitions.load(Ordering::Relaxed)
    }

    pub(crate) fn increment_transitions(&self) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }
}
