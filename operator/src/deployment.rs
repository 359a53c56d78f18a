use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{Container, PodSpec, PodTemplateSpec},
    },
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use kube::{Resource, ResourceExt, api::ObjectMeta};

use crate::crd::Foo;
use crate::error::Error;
use crate::key::ObjectKey;

pub const CONTAINER_NAME: &str = "app";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "foo-operator";

/// Name of the Deployment owned by the Foo called `foo_name`.
pub fn child_name(foo_name: &str) -> String {
    format!("{foo_name}-deployment")
}

fn selector_labels(foo_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), foo_name.to_string())])
}

pub fn desired_deployment(foo: &Foo) -> Result<Deployment, Error> {
    let key = ObjectKey::for_object(foo)?;
    if foo.spec.replicas < 0 {
        return Err(Error::InvalidSpec {
            key: key.to_string(),
            reason: format!("replicas must not be negative, got {}", foo.spec.replicas),
        });
    }

    let labels = selector_labels(&key.name);
    let mut metadata_labels = labels.clone();
    metadata_labels.insert(MANAGED_BY_LABEL.into(), MANAGED_BY.into());

    let container = Container {
        name: CONTAINER_NAME.into(),
        image: Some(foo.spec.image.clone()),
        ..Default::default()
    };

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(child_name(&key.name)),
            namespace: Some(key.namespace.clone()),
            labels: Some(metadata_labels),
            owner_references: foo.controller_owner_ref(&()).map(|owner| vec![owner]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(foo.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

// apps/v1 defaults an omitted replica count to 1.
fn replicas(deployment: &Deployment) -> i32 {
    deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1)
}

fn image(deployment: &Deployment) -> Option<&str> {
    deployment
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .first()?
        .image
        .as_deref()
}

/// Compares only the fields this controller owns: replica count and image.
pub fn owned_fields_match(existing: &Deployment, desired: &Deployment) -> bool {
    replicas(existing) == replicas(desired) && image(existing) == image(desired)
}

/// The update payload: the live object's metadata with the spec replaced in full.
pub fn with_desired_spec(existing: &Deployment, desired: &Deployment) -> Deployment {
    let mut updated = existing.clone();
    updated.spec = desired.spec.clone();
    updated.status = None;
    if updated.owner_references().is_empty() {
        updated.metadata.owner_references = desired.metadata.owner_references.clone();
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::FooSpec;

    fn foo(replicas: i32, image: &str) -> Foo {
        let mut foo = Foo::new(
            "test-foo",
            FooSpec {
                replicas,
                image: image.into(),
            },
        );
        foo.metadata.namespace = Some("default".into());
        foo.metadata.uid = Some("3f1c".into());
        foo
    }

    #[test]
    fn desired_deployment_is_derived_from_foo() {
        let d = desired_deployment(&foo(3, "nginx:1.27")).unwrap();
        assert_eq!(d.name_any(), "test-foo-deployment");
        assert_eq!(d.namespace().as_deref(), Some("default"));
        assert_eq!(replicas(&d), 3);
        assert_eq!(image(&d), Some("nginx:1.27"));

        let spec = d.spec.as_ref().unwrap();
        let selector = spec.selector.match_labels.as_ref().unwrap();
        assert_eq!(selector.get("app").map(String::as_str), Some("test-foo"));
        let pod_labels = spec.template.metadata.as_ref().unwrap().labels.as_ref().unwrap();
        assert_eq!(pod_labels, selector);

        let owner = &d.owner_references()[0];
        assert_eq!(owner.kind, "Foo");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn negative_replicas_are_rejected() {
        let err = desired_deployment(&foo(-1, "nginx")).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn replica_drift_is_detected() {
        let desired = desired_deployment(&foo(3, "nginx")).unwrap();
        let observed = desired_deployment(&foo(2, "nginx")).unwrap();
        assert!(!owned_fields_match(&observed, &desired));
    }

    #[test]
    fn image_drift_is_detected() {
        let desired = desired_deployment(&foo(3, "nginx:1.27")).unwrap();
        let observed = desired_deployment(&foo(3, "nginx:1.25")).unwrap();
        assert!(!owned_fields_match(&observed, &desired));
    }

    #[test]
    fn unowned_fields_are_ignored() {
        let desired = desired_deployment(&foo(3, "nginx")).unwrap();
        let mut observed = desired.clone();
        let spec = observed.spec.as_mut().unwrap();
        spec.min_ready_seconds = Some(30);
        spec.revision_history_limit = Some(2);
        observed
            .labels_mut()
            .insert("team".into(), "payments".into());
        assert!(owned_fields_match(&observed, &desired));
    }

    #[test]
    fn missing_replicas_means_one() {
        let desired = desired_deployment(&foo(1, "nginx")).unwrap();
        let mut observed = desired.clone();
        observed.spec.as_mut().unwrap().replicas = None;
        assert!(owned_fields_match(&observed, &desired));
    }

    #[test]
    fn update_keeps_live_metadata() {
        let desired = desired_deployment(&foo(3, "nginx")).unwrap();
        let mut existing = desired_deployment(&foo(2, "busybox")).unwrap();
        existing.metadata.resource_version = Some("42".into());
        existing.spec.as_mut().unwrap().paused = Some(true);

        let updated = with_desired_spec(&existing, &desired);
        assert_eq!(updated.resource_version().as_deref(), Some("42"));
        assert_eq!(updated.spec, desired.spec);
        assert!(owned_fields_match(&updated, &desired));
    }
}
