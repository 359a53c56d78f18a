use kube::{Resource, ResourceExt};
use tracing::info;

use crate::client::FooClient;
use crate::crd::Foo;
use crate::error::Error;
use crate::event::Outcome;

pub const FINALIZER: &str = "finalizer.foo.example.com";

pub fn is_deleting(foo: &Foo) -> bool {
    foo.meta().deletion_timestamp.is_some()
}

pub fn has_finalizer(foo: &Foo, finalizer: &str) -> bool {
    foo.finalizers().iter().any(|x| x == finalizer)
}

/// Copy of `foo` with `finalizer` appended after any existing markers.
pub fn with_finalizer(foo: &Foo, finalizer: &str) -> Foo {
    let mut updated = foo.clone();
    let finalizers = updated.meta_mut().finalizers.get_or_insert_with(Vec::new);
    if !finalizers.iter().any(|x| x == finalizer) {
        finalizers.push(finalizer.into());
    }
    updated
}

/// Copy of `foo` with every occurrence of `finalizer` removed.
pub fn without_finalizer(foo: &Foo, finalizer: &str) -> Foo {
    let mut updated = foo.clone();
    if let Some(finalizers) = updated.meta_mut().finalizers.as_mut() {
        finalizers.retain(|x| x != finalizer);
    }
    updated
}

pub async fn ensure_finalizer_present(
    client: &dyn FooClient,
    foo: &Foo,
    finalizer: &str,
) -> Result<Outcome, Error> {
    if has_finalizer(foo, finalizer) {
        return Ok(Outcome::NoOp);
    }

    info!(
        namespace = %foo.namespace().unwrap_or_default(),
        name = %foo.name_any(),
        "adding finalizer"
    );
    client.replace(&with_finalizer(foo, finalizer)).await?;
    Ok(Outcome::FinalizerAdded)
}

pub async fn remove_finalizer(
    client: &dyn FooClient,
    foo: &Foo,
    finalizer: &str,
) -> Result<Outcome, Error> {
    if !has_finalizer(foo, finalizer) {
        return Ok(Outcome::NoOp);
    }

    info!(
        namespace = %foo.namespace().unwrap_or_default(),
        name = %foo.name_any(),
        "removing finalizer"
    );
    match client.replace(&without_finalizer(foo, finalizer)).await {
        // The object is already gone, nothing left to release.
        Err(err) if err.is_not_found() => Ok(Outcome::Finalized),
        Err(err) => Err(err),
        Ok(_) => Ok(Outcome::Finalized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockFooClient;
    use crate::crd::FooSpec;

    fn foo_with(finalizers: &[&str]) -> Foo {
        let mut foo = Foo::new("test-foo", FooSpec::default());
        foo.metadata.namespace = Some("default".into());
        foo.metadata.resource_version = Some("7".into());
        foo.metadata.finalizers = Some(finalizers.iter().map(|f| f.to_string()).collect());
        foo
    }

    #[test]
    fn appends_without_reordering() {
        let foo = foo_with(&["other.io/guard"]);
        let updated = with_finalizer(&foo, FINALIZER);
        assert_eq!(updated.finalizers(), ["other.io/guard", FINALIZER]);
        assert_eq!(with_finalizer(&updated, FINALIZER).finalizers().len(), 2);
    }

    #[test]
    fn removal_keeps_foreign_markers() {
        let foo = foo_with(&["a.io/x", FINALIZER, "b.io/y"]);
        let updated = without_finalizer(&foo, FINALIZER);
        assert_eq!(updated.finalizers(), ["a.io/x", "b.io/y"]);
        assert!(!has_finalizer(&updated, FINALIZER));
    }

    #[tokio::test]
    async fn ensure_persists_against_fetched_version() {
        let mut client = MockFooClient::new();
        client
            .expect_replace()
            .withf(|foo| {
                foo.metadata.resource_version.as_deref() == Some("7")
                    && has_finalizer(foo, FINALIZER)
            })
            .times(1)
            .returning(|foo| Ok(foo.clone()));

        let outcome = ensure_finalizer_present(&client, &foo_with(&[]), FINALIZER)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::FinalizerAdded);
    }

    #[tokio::test]
    async fn ensure_is_noop_when_present() {
        let client = MockFooClient::new();
        let outcome = ensure_finalizer_present(&client, &foo_with(&[FINALIZER]), FINALIZER)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::NoOp);
    }

    #[tokio::test]
    async fn conflict_on_removal_is_surfaced() {
        let mut client = MockFooClient::new();
        client
            .expect_replace()
            .returning(|_| Err(Error::Conflict("default/test-foo".into())));

        let err = remove_finalizer(&client, &foo_with(&[FINALIZER]), FINALIZER)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }
}
