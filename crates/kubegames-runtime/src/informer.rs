//! Watch a resource type and turn its events into queued keys
//!
//! An [`Informer`] owns a kube-rs watcher and reflector. Every watch event is
//! folded into the local cache and passed through a [`ChangeTracker`], which
//! decides whether the event is a real change: an update that did not move the
//! resource version is dropped, and objects that disappeared while the watch
//! was re-listing are reported as deleted.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::reflector::{self, Store};
use kube::runtime::watcher::{self, watcher};
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource, ResourceExt};
use kubegames_common::Error;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::key::ObjectKey;
use crate::queue::WorkQueue;

/// What happened to an object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// Seen for the first time
    Added,
    /// Resource version moved
    Updated,
    /// Removed from the cluster
    Deleted,
}

/// A change notification for one object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceChange {
    /// Which object changed
    pub key: ObjectKey,
    /// How it changed
    pub kind: ChangeKind,
}

/// Derives [`ResourceChange`]s from raw watch events
#[derive(Debug, Default)]
pub struct ChangeTracker {
    versions: HashMap<ObjectKey, String>,
    relisting: Option<HashSet<ObjectKey>>,
}

impl ChangeTracker {
    /// Fold one watch event into the tracker and return the resulting changes
    ///
    /// Objects without a namespace or name cannot be reconciled; they are
    /// logged and dropped.
    pub fn observe<K: Resource>(&mut self, event: &watcher::Event<K>) -> Vec<ResourceChange> {
        match event {
            watcher::Event::Apply(obj) => self.applied(obj).into_iter().collect(),
            watcher::Event::InitApply(obj) => {
                let key = ObjectKey::for_resource(obj);
                if let (Some(seen), Some(key)) = (self.relisting.as_mut(), key) {
                    seen.insert(key);
                }
                self.applied(obj).into_iter().collect()
            }
            watcher::Event::Delete(obj) => {
                let Some(key) = key_of(obj) else {
                    return Vec::new();
                };
                self.versions.remove(&key);
                vec![ResourceChange {
                    key,
                    kind: ChangeKind::Deleted,
                }]
            }
            watcher::Event::Init => {
                self.relisting = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitDone => {
                let Some(seen) = self.relisting.take() else {
                    return Vec::new();
                };
                let gone: Vec<ObjectKey> = self
                    .versions
                    .keys()
                    .filter(|key| !seen.contains(*key))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .map(|key| {
                        self.versions.remove(&key);
                        ResourceChange {
                            key,
                            kind: ChangeKind::Deleted,
                        }
                    })
                    .collect()
            }
        }
    }

    /// Number of objects currently known
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Whether no object is known
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    fn applied<K: Resource>(&mut self, obj: &K) -> Option<ResourceChange> {
        let key = key_of(obj)?;
        let version = obj.resource_version().unwrap_or_default();
        let kind = match self.versions.insert(key.clone(), version.clone()) {
            None => ChangeKind::Added,
            Some(previous) if previous == version => return None,
            Some(_) => ChangeKind::Updated,
        };
        Some(ResourceChange { key, kind })
    }
}

fn key_of<K: Resource>(obj: &K) -> Option<ObjectKey> {
    let key = ObjectKey::for_resource(obj);
    if key.is_none() {
        warn!(
            name = ?obj.meta().name,
            namespace = ?obj.meta().namespace,
            "object has no usable key, dropping"
        );
    }
    key
}

/// Watch + local cache for one resource type
pub struct Informer<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    name: &'static str,
    api: Api<K>,
    config: watcher::Config,
    reader: Store<K>,
    writer: reflector::store::Writer<K>,
}

impl<K> Informer<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    /// Informer over `api`, restricted by `config` (label selectors etc.)
    pub fn new(name: &'static str, api: Api<K>, config: watcher::Config) -> Self {
        let (reader, writer) = reflector::store();
        Self {
            name,
            api,
            config,
            reader,
            writer,
        }
    }

    /// Read handle on the local cache
    pub fn reader(&self) -> Store<K> {
        self.reader.clone()
    }

    /// Watch until `shutdown` fires, adding the key of every changed object to `queue`
    ///
    /// Watch errors are logged; the watcher re-establishes itself with backoff.
    pub async fn run(self, queue: WorkQueue<ObjectKey>, shutdown: CancellationToken) {
        let name = self.name;
        let mut tracker = ChangeTracker::default();
        let mut events = watcher(self.api, self.config)
            .default_backoff()
            .reflect(self.writer)
            .boxed();

        info!(informer = name, "watch started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.next() => match event {
                    Some(Ok(event)) => {
                        for change in tracker.observe(&event) {
                            enqueue(name, &queue, change);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(informer = name, error = %e, "watch error, retrying");
                    }
                    None => {
                        warn!(informer = name, "watch stream ended");
                        break;
                    }
                }
            }
        }
        info!(informer = name, "watch stopped");
    }
}

/// Hand a change to the workers
///
/// Deletions are logged at info level since they start cleanup work (config
/// map removal, status pruning); adds and updates only at debug.
fn enqueue(informer: &str, queue: &WorkQueue<ObjectKey>, change: ResourceChange) {
    match change.kind {
        ChangeKind::Deleted => info!(informer, key = %change.key, "object deleted"),
        ChangeKind::Added | ChangeKind::Updated => {
            debug!(informer, key = %change.key, kind = ?change.kind, "change observed")
        }
    }
    queue.add(change.key);
}

/// Wait until `store` has been populated by the initial list
///
/// Startup must not proceed on an empty cache; exceeding `timeout` is an error.
pub async fn wait_for_cache_sync<K>(name: &str, store: &Store<K>, timeout: Duration) -> Result<(), Error>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    match tokio::time::timeout(timeout, store.wait_until_ready()).await {
        Ok(Ok(())) => {
            info!(informer = name, objects = store.state().len(), "cache synced");
            Ok(())
        }
        Ok(Err(e)) => Err(Error::internal_with_context(
            "cache_sync",
            format!("{name} informer stopped before syncing: {e}"),
        )),
        Err(_) => Err(Error::internal_with_context(
            "cache_sync",
            format!("timed out after {timeout:?} waiting for {name} cache to sync"),
        )),
    }
}
