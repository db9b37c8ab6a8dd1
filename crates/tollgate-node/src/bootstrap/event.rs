use crate::bootstrap::phase::BootstrapPhase;
use tokio::sync::broadcast;
use tokio::sync::broadcast::Receiver;

const CHANNEL_CAPACITY: usize = 256;

/// Observability record for the bootstrap lifecycle. Fan-out only; never
/// read back by the emitting code.
#[derive(Debug, Clone)]
pub enum BootstrapEvent {
    PhaseChanged {
        phase: BootstrapPhase,
    },
    PeerDiscovered {
        pubkey: String,
    },
    PeerRegistered {
        pubkey: String,
    },
    ChannelOpened {
        pubkey: String,
        channel_id: String,
    },
    HandshakeFailed {
        pubkey: String,
        reason: String,
    },
    /// `target` is the peer the advertisement went to; `None` means the
    /// genesis path, where it went to the local store.
    Announced {
        target: Option<String>,
    },
    AnnounceFailed {
        target: String,
        reason: String,
    },
    PeerDeregistered {
        pubkey: String,
    },
    Ready {
        peer_count: u64,
        channel_count: u64,
    },
}

/// Single-writer, many-reader broadcast of bootstrap events. Subscribers
/// observe events exactly once, in publish order.
#[derive(Clone)]
pub struct BootstrapEventHub {
    sender: broadcast::Sender<BootstrapEvent>,
}

impl Default for BootstrapEventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapEventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);

        BootstrapEventHub { sender }
    }

    pub fn subscribe(&self) -> Receiver<BootstrapEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: BootstrapEvent) {
        tracing::debug!(?event, "Bootstrap event");
        // Send only fails when nobody is subscribed.
        let _ = self.sender.send(event);
    }
}
