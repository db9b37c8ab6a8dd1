//! The event log shared between the packet handler (writer) and the relay
//! server (reader). Events are deduplicated by id and retained according
//! to their kind class; every accepted event is also pushed onto a live
//! feed that subscriptions consume.

use parking_lot::RwLock;
use relay_events::Event;
use std::collections::HashMap;
use std::collections::HashSet;
use tokio::sync::broadcast;

const FEED_CAPACITY: usize = 256;

/// What happened to an event handed to [`RelayStore::store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Newly retained (or, for ephemeral kinds, newly fed to the feed).
    Stored,
    /// An event with this id was seen before; nothing changed.
    Duplicate,
    /// A newer replaceable event from the same author already exists.
    Shadowed,
}

/// Filter over retained events, in the shape relay subscriptions use.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub ids: Option<Vec<String>>,
    pub authors: Option<Vec<String>>,
    pub kinds: Option<Vec<u32>>,
    pub since: Option<i64>,
    pub limit: Option<usize>,
}

impl Filter {
    pub fn kinds(kinds: impl Into<Vec<u32>>) -> Self {
        Filter {
            kinds: Some(kinds.into()),
            ..Default::default()
        }
    }

    fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|id| *id == event.id) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.iter().any(|a| *a == event.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        true
    }
}

#[derive(Default)]
struct Inner {
    /// Retained events in store order.
    events: Vec<Event>,
    /// Ids of every event ever accepted, ephemeral included.
    seen: HashSet<String>,
    /// `(pubkey, kind)` → index into `events` for replaceable kinds.
    replaceable: HashMap<(String, u32), usize>,
    /// `(pubkey, kind, d-tag)` → index for parameterized-replaceable kinds.
    param_replaceable: HashMap<(String, u32, String), usize>,
}

pub struct RelayStore {
    inner: RwLock<Inner>,
    feed: broadcast::Sender<Event>,
}

impl Default for RelayStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);

        RelayStore {
            inner: RwLock::new(Inner::default()),
            feed,
        }
    }

    /// Live feed of accepted events, in store order. Ephemeral events are
    /// delivered here even though they are never retained.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.feed.subscribe()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.inner.read().seen.contains(id)
    }

    pub fn store(&self, event: Event) -> StoreOutcome {
        let outcome = {
            let mut inner = self.inner.write();

            if inner.seen.contains(&event.id) {
                return StoreOutcome::Duplicate;
            }
            inner.seen.insert(event.id.clone());

            if event.is_ephemeral() {
                StoreOutcome::Stored
            } else if event.is_replaceable() {
                let key = (event.pubkey.clone(), event.kind);
                match inner.replaceable.get(&key).copied() {
                    Some(idx) if !supersedes(&event, &inner.events[idx]) => {
                        return StoreOutcome::Shadowed;
                    }
                    Some(idx) => {
                        inner.events[idx] = event.clone();
                        StoreOutcome::Stored
                    }
                    None => {
                        inner.events.push(event.clone());
                        let idx = inner.events.len() - 1;
                        inner.replaceable.insert(key, idx);
                        StoreOutcome::Stored
                    }
                }
            } else if event.is_parameterized_replaceable() {
                let d_tag = event.identifier().unwrap_or_default().to_string();
                let key = (event.pubkey.clone(), event.kind, d_tag);
                match inner.param_replaceable.get(&key).copied() {
                    Some(idx) if !supersedes(&event, &inner.events[idx]) => {
                        return StoreOutcome::Shadowed;
                    }
                    Some(idx) => {
                        inner.events[idx] = event.clone();
                        StoreOutcome::Stored
                    }
                    None => {
                        inner.events.push(event.clone());
                        let idx = inner.events.len() - 1;
                        inner.param_replaceable.insert(key, idx);
                        StoreOutcome::Stored
                    }
                }
            } else {
                inner.events.push(event.clone());
                StoreOutcome::Stored
            }
        };

        // Send fails only when nobody is subscribed, which is fine.
        let _ = self.feed.send(event);

        outcome
    }

    pub fn query(&self, filter: &Filter) -> Vec<Event> {
        let inner = self.inner.read();

        let mut matched: Vec<Event> = inner
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();

        if let Some(limit) = filter.limit {
            // Newest first when limited, as relay queries expect.
            matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            matched.truncate(limit);
        }

        matched
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }
}

/// Newer `created_at` wins; ties break towards the lower id.
fn supersedes(candidate: &Event, incumbent: &Event) -> bool {
    (candidate.created_at, &incumbent.id) > (incumbent.created_at, &candidate.id)
}
