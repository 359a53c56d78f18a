//! Local mirror of Foo objects fed by a kube watcher.

use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{StreamExt, pin_mut};
use kube::{
    Api, ResourceExt,
    runtime::{WatchStreamExt, reflector::ObjectRef, watcher},
};
use kube_runtime::reflector::{self, store::Writer};
use tracing::{debug, error, info, warn};

use crate::crd::Foo;
use crate::key::ObjectKey;
use crate::metrics::Metrics;
use crate::translator::{DeletedObject, EventTranslator, Notification, meta_namespace_key};

/// Point-in-time reads of primary resources.
#[async_trait]
pub trait ResourceCache: Send + Sync {
    fn get(&self, key: &ObjectKey) -> Option<Arc<Foo>>;

    /// Resolves once the first full listing has been loaded.
    /// Returns `false` if the cache stops before that happens.
    async fn wait_for_initial_sync(&self) -> bool;
}

/// Reflector store that also reports what each watcher event changed.
pub struct Store {
    reader: reflector::Store<Foo>,
    writer: Mutex<Writer<Foo>>,
    synced: AtomicBool,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        let (reader, writer) = reflector::store();
        Self {
            reader,
            writer: Mutex::new(writer),
            synced: AtomicBool::new(false),
        }
    }

    fn writer(&self) -> MutexGuard<'_, Writer<Foo>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.reader.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reader.is_empty()
    }

    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Applies a watcher event and returns the notifications it produces.
    pub fn apply(&self, event: watcher::Event<Foo>) -> Vec<Notification> {
        let mut writer = self.writer();
        match &event {
            watcher::Event::Apply(foo) => {
                if keyed(foo).is_none() {
                    return Vec::new();
                }
                let obj_ref = ObjectRef::from_obj(foo);
                let old = self.reader.get(&obj_ref);
                writer.apply_watcher_event(&event);
                let new = self
                    .reader
                    .get(&obj_ref)
                    .unwrap_or_else(|| Arc::new(foo.clone()));
                vec![match old {
                    Some(old) => Notification::Updated { old, new },
                    None => Notification::Added(new),
                }]
            }
            watcher::Event::Delete(foo) => {
                writer.apply_watcher_event(&event);
                match keyed(foo) {
                    Some(_) => vec![Notification::Deleted(DeletedObject::Object(Arc::new(
                        foo.clone(),
                    )))],
                    None => Vec::new(),
                }
            }
            watcher::Event::Init | watcher::Event::InitApply(_) => {
                writer.apply_watcher_event(&event);
                Vec::new()
            }
            watcher::Event::InitDone => {
                let previous = by_key(self.reader.state());
                writer.apply_watcher_event(&event);
                let listed = by_key(self.reader.state());
                self.synced.store(true, Ordering::Release);
                relisted(previous, listed)
            }
        }
    }

    /// Re-announces every cached object as updated.
    pub fn resync(&self) -> Vec<Notification> {
        self.reader
            .state()
            .into_iter()
            .map(|foo| Notification::Updated {
                old: Arc::clone(&foo),
                new: foo,
            })
            .collect()
    }
}

fn keyed(foo: &Foo) -> Option<String> {
    match meta_namespace_key(foo) {
        Ok(key) => Some(key),
        Err(err) => {
            warn!(error = %err, name = %foo.name_any(), "dropping object without a usable key");
            None
        }
    }
}

fn by_key(objects: Vec<Arc<Foo>>) -> HashMap<String, Arc<Foo>> {
    objects
        .into_iter()
        .filter_map(|foo| keyed(&foo).map(|key| (key, foo)))
        .collect()
}

/// Diffs two complete listings. Keys that disappeared become tombstones,
/// since their delete events were never observed.
fn relisted(
    previous: HashMap<String, Arc<Foo>>,
    listed: HashMap<String, Arc<Foo>>,
) -> Vec<Notification> {
    let mut notifications = Vec::with_capacity(listed.len());
    for (key, last_known) in &previous {
        if !listed.contains_key(key) {
            notifications.push(Notification::Deleted(DeletedObject::Tombstone {
                key: key.clone(),
                last_known: Some(Arc::clone(last_known)),
            }));
        }
    }
    for (key, new) in listed {
        notifications.push(match previous.get(&key) {
            Some(old) => Notification::Updated {
                old: Arc::clone(old),
                new,
            },
            None => Notification::Added(new),
        });
    }
    notifications
}

#[async_trait]
impl ResourceCache for Store {
    fn get(&self, key: &ObjectKey) -> Option<Arc<Foo>> {
        self.reader
            .get(&ObjectRef::new(&key.name).within(&key.namespace))
    }

    async fn wait_for_initial_sync(&self) -> bool {
        self.reader.wait_until_ready().await.is_ok()
    }
}

/// Delivers notifications to the translator, containing any panic to this batch.
pub fn deliver(translator: &EventTranslator, notifications: &[Notification]) {
    for notification in notifications {
        if catch_unwind(AssertUnwindSafe(|| translator.handle(notification))).is_err() {
            error!(?notification, "panic while handling notification");
        }
    }
}

/// Keeps `store` in sync with the cluster until the watch stream ends.
///
/// Watch errors are retried with the watcher's default backoff. Every
/// `resync_period` all cached objects are re-announced so each key is
/// reconciled periodically even without changes.
pub async fn run_watcher(
    api: Api<Foo>,
    store: Arc<Store>,
    translator: EventTranslator,
    metrics: Arc<Metrics>,
    resync_period: Option<Duration>,
) {
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    pin_mut!(stream);

    let mut resync = resync_period.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    });

    info!("starting Foo watcher");
    loop {
        let resync_tick = async {
            match resync.as_mut() {
                Some(interval) => {
                    interval.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            event = stream.next() => match event {
                Some(Ok(event)) => {
                    metrics.watch_event();
                    let notifications = store.apply(event);
                    deliver(&translator, &notifications);
                    metrics.set_cached_objects(store.len());
                }
                Some(Err(err)) => {
                    metrics.watch_error();
                    warn!(error = %err, "Foo watch failed, retrying");
                }
                None => {
                    info!("Foo watch stream ended");
                    return;
                }
            },
            _ = resync_tick, if store.has_synced() => {
                let notifications = store.resync();
                debug!(objects = notifications.len(), "resyncing");
                deliver(&translator, &notifications);
            }
        }
    }
}
