use crate::bootstrap::phase::BootstrapPhase;
use parking_lot::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// Shared view of the node lifecycle, read by the health endpoint and
/// written by the bootstrap service and the packet handler. The counters
/// only ever go up while a run is in progress.
pub struct NodeStatus {
    phase: RwLock<BootstrapPhase>,
    peer_count: AtomicU64,
    channel_count: AtomicU64,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStatus {
    pub fn new() -> Self {
        NodeStatus {
            phase: RwLock::new(BootstrapPhase::Init),
            peer_count: AtomicU64::new(0),
            channel_count: AtomicU64::new(0),
        }
    }

    pub fn phase(&self) -> BootstrapPhase {
        *self.phase.read()
    }

    /// Advance the phase. Regressions are ignored so the observable phase
    /// stays monotonic; `Failed` is always reachable.
    pub fn advance_phase(&self, next: BootstrapPhase) -> bool {
        let mut phase = self.phase.write();
        if next <= *phase && next != BootstrapPhase::Failed {
            return false;
        }
        *phase = next;
        true
    }

    pub fn peer_count(&self) -> u64 {
        self.peer_count.load(Ordering::Relaxed)
    }

    pub fn channel_count(&self) -> u64 {
        self.channel_count.load(Ordering::Relaxed)
    }

    pub fn record_peer(&self) {
        self.peer_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_channel(&self) {
        self.channel_count.fetch_add(1, Ordering::Relaxed);
    }
}
