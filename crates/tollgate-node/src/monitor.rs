//! Watches the local relay for peer advertisements and follow-list
//! updates after the initial bootstrap run, and feeds newcomers through
//! the same handshake pipeline.

use crate::bootstrap::BootstrapEvent;
use crate::bootstrap::BootstrapService;
use crate::bootstrap::KnownPeer;
use crate::bootstrap::PeerOutcome;
use relay_events::codec;
use relay_events::kind::FOLLOW_LIST_KIND;
use relay_events::kind::PEER_INFO_KIND;
use relay_events::Event;
use relay_store::RelayStore;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

pub const DEFAULT_MAX_FOLLOW_CANDIDATES: usize = 10;

pub struct RelayMonitor {
    service: Arc<BootstrapService>,
    store: Arc<RelayStore>,
    /// Pubkeys never handled here, typically those the initial bootstrap
    /// run already took care of, plus the node itself.
    ignore: HashSet<String>,
    /// Upper bound on candidates taken from a single follow-list event.
    max_follow_candidates: usize,
}

/// Handle to a running monitor; dropping it does not stop the task.
pub struct MonitorHandle {
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop the subscription. In-flight handshakes are cancelled at their
    /// next suspension point.
    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl RelayMonitor {
    pub fn new(
        service: Arc<BootstrapService>,
        store: Arc<RelayStore>,
        ignore: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut ignore: HashSet<String> = ignore.into_iter().collect();
        ignore.insert(service.local_pubkey());

        RelayMonitor {
            service,
            store,
            ignore,
            max_follow_candidates: DEFAULT_MAX_FOLLOW_CANDIDATES,
        }
    }

    pub fn with_max_follow_candidates(mut self, max: usize) -> Self {
        self.max_follow_candidates = max;
        self
    }

    /// Subscribe to the relay feed and run until unsubscribed.
    pub fn start(self) -> MonitorHandle {
        let mut feed = self.store.subscribe();

        let task = tokio::spawn(async move {
            // Peers this monitor has registered itself.
            let mut registered: HashSet<String> = HashSet::new();

            loop {
                let event = match feed.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Relay feed lagged; some events were missed");
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("Relay feed closed; stopping monitor");
                        break;
                    }
                };

                match event.kind {
                    PEER_INFO_KIND => self.on_peer_info(&event, &mut registered).await,
                    FOLLOW_LIST_KIND => self.on_follow_list(&event, &mut registered).await,
                    _ => {}
                }
            }
        });

        MonitorHandle { task }
    }

    async fn on_peer_info(&self, event: &Event, registered: &mut HashSet<String>) {
        if self.ignore.contains(&event.pubkey) {
            return;
        }

        let info = match codec::parse_peer_info(event) {
            Ok(info) => info,
            Err(e) => {
                tracing::debug!(pubkey = %event.pubkey, "Ignoring invalid advertisement: {e}");
                return;
            }
        };
        let peer = KnownPeer::from(&info);

        if registered.contains(&event.pubkey) {
            // A registered peer re-announced itself; refresh the
            // registration, and drop it if the peer no longer handshakes.
            match self.service.handshake_peer(&peer).await {
                PeerOutcome::Registered { .. } => {}
                PeerOutcome::Failed { .. } => {
                    registered.remove(&event.pubkey);
                    if let Err(e) = self.service.deregister_peer(&event.pubkey).await {
                        tracing::warn!(peer = %event.pubkey, "Deregistration failed: {e:#}");
                    }
                }
            }
            return;
        }

        self.service
            .events()
            .publish(BootstrapEvent::PeerDiscovered {
                pubkey: event.pubkey.clone(),
            });

        if let PeerOutcome::Registered { .. } = self.service.handshake_peer(&peer).await {
            registered.insert(event.pubkey.clone());
        }
    }

    /// Follow lists only carry pubkeys. A candidate becomes actionable
    /// once its advertisement is in the local store; everyone else is
    /// skipped until they announce themselves.
    async fn on_follow_list(&self, event: &Event, registered: &mut HashSet<String>) {
        let candidates: Vec<String> = event
            .tag_values("p")
            .filter(|pubkey| !self.ignore.contains(*pubkey) && !registered.contains(*pubkey))
            .take(self.max_follow_candidates)
            .map(|pubkey| pubkey.to_string())
            .collect();

        for pubkey in candidates {
            let advertisement = self
                .store
                .query(&relay_store::Filter {
                    authors: Some(vec![pubkey.clone()]),
                    kinds: Some(vec![PEER_INFO_KIND]),
                    ..Default::default()
                })
                .into_iter()
                .next();

            let Some(advertisement) = advertisement else {
                tracing::debug!(pubkey = %pubkey, "Followed peer has not announced itself yet");
                continue;
            };

            let info = match codec::parse_peer_info(&advertisement) {
                Ok(info) => info,
                Err(e) => {
                    tracing::debug!(pubkey = %pubkey, "Ignoring invalid advertisement: {e}");
                    continue;
                }
            };

            self.service
                .events()
                .publish(BootstrapEvent::PeerDiscovered {
                    pubkey: pubkey.clone(),
                });

            if let PeerOutcome::Registered { .. } =
                self.service.handshake_peer(&KnownPeer::from(&info)).await
            {
                registered.insert(pubkey);
            }
        }
    }
}
