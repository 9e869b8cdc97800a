#![deny(missing_docs)]
//! # fleet-events — the durable, subscribable event log
//!
//! One append-only JSONL file per creature under
//! `<creatures_dir>/<name>/.sys/events.jsonl`, a bounded in-memory tail per
//! creature for fast reads, and a bus of independent bounded subscriber
//! queues for `/api/events` and the narrator to drain.
//!
//! Grounded on `neuron-state-fs`'s scope-rooted directory-per-entity
//! persistence (generalized here from one file per key to one append-only
//! file per creature) and `neuron-hooks`'s dispatch-loop shape.

mod error;
mod queue;

pub use error::EventStoreError;

use fleet_core::Event;
use queue::SubscriberQueue;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// Default number of events kept in memory per creature.
pub const DEFAULT_TAIL_CAPACITY: usize = 500;

/// Default per-subscriber queue capacity.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

struct Subscriber {
    id: u64,
    queue: Arc<SubscriberQueue>,
}

/// A handle returned by [`EventStore::subscribe`]; dropping or calling
/// [`Unsubscribe::unsubscribe`] stops delivery.
pub struct Unsubscribe {
    id: u64,
    store: EventStore,
}

impl Unsubscribe {
    /// Remove this subscription from the bus.
    pub async fn unsubscribe(self) {
        let mut subs = self.store.inner.subscribers.write().await;
        subs.retain(|s| s.id != self.id);
    }
}

struct Inner {
    creatures_dir: PathBuf,
    tail_capacity: usize,
    subscriber_capacity: usize,
    tails: RwLock<HashMap<String, VecDeque<Event>>>,
    subscribers: RwLock<Vec<Subscriber>>,
    next_subscriber_id: std::sync::atomic::AtomicU64,
}

/// The event store. Cheaply clonable; clones share the same backing state.
#[derive(Clone)]
pub struct EventStore {
    inner: Arc<Inner>,
}

impl EventStore {
    /// Build a store rooted at `creatures_dir`, with the default tail and
    /// subscriber queue capacities.
    pub fn new(creatures_dir: impl Into<PathBuf>) -> Self {
        Self::with_capacities(creatures_dir, DEFAULT_TAIL_CAPACITY, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Build a store with explicit tail/subscriber capacities.
    pub fn with_capacities(
        creatures_dir: impl Into<PathBuf>,
        tail_capacity: usize,
        subscriber_capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                creatures_dir: creatures_dir.into(),
                tail_capacity,
                subscriber_capacity,
                tails: RwLock::new(HashMap::new()),
                subscribers: RwLock::new(Vec::new()),
                next_subscriber_id: std::sync::atomic::AtomicU64::new(0),
            }),
        }
    }

    fn events_path(&self, creature: &str) -> PathBuf {
        self.inner.creatures_dir.join(creature).join(".sys").join("events.jsonl")
    }

    /// Append an event for `creature`. Never fails the caller: a write
    /// failure is logged and the event still lands in the in-memory tail
    /// and reaches subscribers, since a creature's events matter more than
    /// the durability of any single line.
    pub async fn append(&self, creature: &str, mut event: Event) {
        event.creature = creature.to_string();

        if let Err(e) = self.append_line(creature, &event).await {
            tracing::warn!(creature, error = %e, "failed to persist event to disk");
        }

        {
            let mut tails = self.inner.tails.write().await;
            let dq = tails.entry(creature.to_string()).or_default();
            dq.push_back(event.clone());
            while dq.len() > self.inner.tail_capacity {
                dq.pop_front();
            }
        }

        let subs = self.inner.subscribers.read().await;
        for sub in subs.iter() {
            if sub.queue.push(event.clone()) {
                tracing::debug!(subscriber_id = sub.id, "dropped oldest queued event, subscriber fell behind");
            }
        }
    }

    async fn append_line(&self, creature: &str, event: &Event) -> std::io::Result<()> {
        let path = self.events_path(creature);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_vec(event).expect("Event always serializes");
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(&line).await?;
        Ok(())
    }

    /// Return the last `n` events recorded for `creature`, oldest first.
    /// Empty if the creature has no recorded events.
    ///
    /// Reads the durable log in full and tops it up with anything in the
    /// in-memory tail that didn't make it to disk (a failed write), so a
    /// caller never sees less than what's actually been appended. The two
    /// sources are deduped against each other in full — not just against a
    /// last-`n` slice of the disk log — then sorted by timestamp before the
    /// last `n` are taken, so an in-memory event that happens to also be
    /// persisted further back than `n` lines never gets double-counted.
    pub async fn read_recent(&self, creature: &str, n: usize) -> Result<Vec<Event>, EventStoreError> {
        let mut events = self.read_all_from_disk(creature).await?;
        let seen: std::collections::HashSet<_> = events.iter().map(|e| e.id).collect();

        let tails = self.inner.tails.read().await;
        if let Some(tail) = tails.get(creature) {
            for event in tail.iter() {
                if !seen.contains(&event.id) {
                    events.push(event.clone());
                }
            }
        }
        drop(tails);

        events.sort_by_key(|e| e.t);
        if events.len() > n {
            let skip = events.len() - n;
            events.drain(0..skip);
        }
        Ok(events)
    }

    async fn read_all_from_disk(&self, creature: &str) -> Result<Vec<Event>, EventStoreError> {
        let path = self.events_path(creature);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(EventStoreError::Read {
                    creature: creature.to_string(),
                    source,
                })
            }
        };

        contents
            .lines()
            .filter(|l| !l.is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|source| EventStoreError::Decode {
                    creature: creature.to_string(),
                    source,
                })
            })
            .collect()
    }

    /// Register a handler to be invoked for every appended event, across
    /// all creatures. The handler runs on its own task, reading from a
    /// bounded queue, so a slow or panicking handler can't block `append`
    /// or other subscribers.
    pub async fn subscribe<F>(&self, handler: F) -> Unsubscribe
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(self.inner.subscriber_capacity));

        {
            let mut subs = self.inner.subscribers.write().await;
            subs.push(Subscriber { id, queue: queue.clone() });
        }

        let store = self.clone();
        tokio::spawn(async move {
            loop {
                let still_subscribed = store
                    .inner
                    .subscribers
                    .read()
                    .await
                    .iter()
                    .any(|s| s.id == id);
                if !still_subscribed {
                    return;
                }
                let event = queue.recv().await;
                handler(event);
            }
        });

        Unsubscribe { id, store: self.clone() }
    }

    /// Root directory this store persists under.
    pub fn creatures_dir(&self) -> &Path {
        &self.inner.creatures_dir
    }
}
