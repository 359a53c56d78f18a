use async_trait::async_trait;
use kube::runtime::events::{Event, EventType};
use kube::{Client, Resource};
use kube_runtime::events::{Recorder, Reporter};
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use crate::crd::Foo;
use crate::error::Error;

/// What a reconcile pass changed in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    NoOp,
    FinalizerAdded,
    Created,
    Updated,
    Finalized,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::NoOp => "noop",
            Outcome::FinalizerAdded => "finalizer_added",
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Finalized => "finalized",
        }
    }
}

pub fn make_reporter() -> Reporter {
    Reporter {
        controller: "foo-operator".into(),
        instance: std::env::var("POD_NAME").ok(),
    }
}

/// Publishes Kubernetes Events against a Foo.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        foo: &Foo,
        reason: &str,
        note: &str,
        event_type: EventType,
    ) -> Result<(), Error>;
}

pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: Client, reporter: Reporter) -> Self {
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        foo: &Foo,
        reason: &str,
        note: &str,
        event_type: EventType,
    ) -> Result<(), Error> {
        self.recorder
            .publish(
                &Event {
                    type_: event_type,
                    reason: reason.into(),
                    note: Some(note.into()),
                    action: reason.into(),
                    secondary: None,
                },
                &foo.object_ref(&()),
            )
            .await?;
        Ok(())
    }
}

/// Drops every event. Used when `--disable-events` is set.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _: &Foo, _: &str, _: &str, _: EventType) -> Result<(), Error> {
        Ok(())
    }
}

/// Runs `op` and records a Normal event for changes or a Warning event for failures.
///
/// Publishing is best-effort: a failed publish is logged and never replaces the
/// result of `op`.
pub async fn with_event(
    events: &dyn EventPublisher,
    foo: &Foo,
    success_reason: &str,
    success_msg: &str,
    fail_reason: &str,
    op: impl std::future::Future<Output = Result<Outcome, Error>>,
) -> Result<Outcome, Error> {
    let result = op.await;
    let published = match &result {
        Ok(Outcome::NoOp) => Ok(()),
        Ok(_) => {
            events
                .publish(foo, success_reason, success_msg, EventType::Normal)
                .await
        }
        Err(err) => {
            events
                .publish(foo, fail_reason, &err.to_string(), EventType::Warning)
                .await
        }
    };
    if let Err(err) = published {
        warn!(error = %err, "failed to publish event");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::FooSpec;

    fn foo() -> Foo {
        Foo::new("test-foo", FooSpec::default())
    }

    #[tokio::test]
    async fn noop_is_silent() {
        let events = MockEventPublisher::new();
        let outcome = with_event(&events, &foo(), "Created", "ok", "Failed", async {
            Ok(Outcome::NoOp)
        })
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::NoOp);
    }

    #[tokio::test]
    async fn failure_emits_warning_and_keeps_error() {
        let mut events = MockEventPublisher::new();
        events
            .expect_publish()
            .withf(|_, reason, _, event_type| {
                reason == "CreateFailed" && *event_type == EventType::Warning
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let err = with_event(&events, &foo(), "Created", "ok", "CreateFailed", async {
            Err(Error::Conflict("default/test-foo".into()))
        })
        .await
        .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn publish_errors_do_not_mask_success() {
        let mut events = MockEventPublisher::new();
        events
            .expect_publish()
            .times(1)
            .returning(|_, _, _, _| Err(Error::NotFound("event".into())));

        let outcome = with_event(&events, &foo(), "Created", "ok", "Failed", async {
            Ok(Outcome::Created)
        })
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Created);
    }
}
