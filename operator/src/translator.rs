//! Turns cache notifications into work queue keys.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::crd::Foo;
use crate::error::Error;
use crate::key::ObjectKey;
use crate::queue::WorkQueue;

/// Final state of a deleted object as seen by the cache.
#[derive(Debug, Clone)]
pub enum DeletedObject {
    /// The object as it was when the delete was observed.
    Object(Arc<Foo>),
    /// The delete was missed (e.g. during a relist); only the key is certain.
    Tombstone {
        key: String,
        last_known: Option<Arc<Foo>>,
    },
}

#[derive(Debug, Clone)]
pub enum Notification {
    Added(Arc<Foo>),
    Updated { old: Arc<Foo>, new: Arc<Foo> },
    Deleted(DeletedObject),
}

pub fn meta_namespace_key(foo: &Foo) -> Result<String, Error> {
    ObjectKey::for_object(foo).map(|key| key.to_string())
}

/// Key of a deleted object, falling back to the tombstone's key.
pub fn deletion_handling_key(deleted: &DeletedObject) -> Result<String, Error> {
    match deleted {
        DeletedObject::Object(foo) => meta_namespace_key(foo),
        DeletedObject::Tombstone { key, .. } => Ok(key.clone()),
    }
}

#[derive(Clone)]
pub struct EventTranslator {
    queue: WorkQueue<String>,
}

impl EventTranslator {
    pub fn new(queue: WorkQueue<String>) -> Self {
        Self { queue }
    }

    pub fn on_add(&self, foo: &Foo) {
        self.enqueue("added", meta_namespace_key(foo));
    }

    pub fn on_update(&self, _old: &Foo, new: &Foo) {
        self.enqueue("updated", meta_namespace_key(new));
    }

    pub fn on_delete(&self, deleted: &DeletedObject) {
        self.enqueue("deleted", deletion_handling_key(deleted));
    }

    pub fn handle(&self, notification: &Notification) {
        match notification {
            Notification::Added(foo) => self.on_add(foo),
            Notification::Updated { old, new } => self.on_update(old, new),
            Notification::Deleted(deleted) => self.on_delete(deleted),
        }
    }

    fn enqueue(&self, kind: &str, key: Result<String, Error>) {
        match key {
            Ok(key) => {
                debug!(%key, kind, "enqueueing");
                self.queue.add(key);
            }
            Err(err) => warn!(error = %err, kind, "ignoring notification without a usable key"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::FooSpec;
    use crate::queue::ItemExponentialFailureRateLimiter;
    use std::time::Duration;

    fn foo(name: &str) -> Arc<Foo> {
        let mut foo = Foo::new(name, FooSpec::default());
        foo.metadata.namespace = Some("default".into());
        Arc::new(foo)
    }

    fn translator() -> (EventTranslator, WorkQueue<String>) {
        let queue = WorkQueue::new(ItemExponentialFailureRateLimiter::new(
            Duration::from_millis(5),
            Duration::from_secs(1),
        ));
        (EventTranslator::new(queue.clone()), queue)
    }

    #[tokio::test]
    async fn every_notification_kind_enqueues_its_key() {
        let (translator, queue) = translator();
        translator.handle(&Notification::Added(foo("a")));
        translator.handle(&Notification::Updated {
            old: foo("b"),
            new: foo("b"),
        });
        translator.handle(&Notification::Deleted(DeletedObject::Object(foo("c"))));

        let mut keys = Vec::new();
        while !queue.is_empty() {
            keys.push(queue.get().await.unwrap());
        }
        assert_eq!(keys, ["default/a", "default/b", "default/c"]);
    }

    #[tokio::test]
    async fn tombstone_key_is_enqueued() {
        let (translator, queue) = translator();
        translator.on_delete(&DeletedObject::Tombstone {
            key: "default/gone".into(),
            last_known: None,
        });
        assert_eq!(queue.get().await.as_deref(), Some("default/gone"));
    }

    #[test]
    fn objects_without_namespace_are_skipped() {
        let (translator, queue) = translator();
        translator.on_add(&Foo::new("orphan", FooSpec::default()));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn repeated_updates_coalesce() {
        let (translator, queue) = translator();
        let a = foo("a");
        for _ in 0..5 {
            translator.on_update(&a, &a);
        }
        assert_eq!(queue.len(), 1);
    }
}
