//! Level-triggered reconcile of one Foo against its Deployment.
//!
//! Each pass reads the Foo from the cache and takes at most one step:
//! tear down, attach the finalizer, or converge the Deployment. Attaching the
//! finalizer always ends the pass, so the Deployment is only ever created for
//! a Foo whose finalizer is already persisted.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::cache::ResourceCache;
use crate::client::{DeploymentClient, FooClient};
use crate::crd::Foo;
use crate::deployment::{child_name, desired_deployment, owned_fields_match, with_desired_spec};
use crate::error::Error;
use crate::event::{EventPublisher, Outcome, with_event};
use crate::finalizer::{
    FINALIZER, ensure_finalizer_present, has_finalizer, is_deleting, remove_finalizer,
};
use crate::key::ObjectKey;

/// Where a Foo sits in the reconcile state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Absent,
    MarkedForDeletion,
    MissingFinalizer,
    Steady,
}

pub fn observe(foo: Option<&Foo>, finalizer: &str) -> State {
    match foo {
        None => State::Absent,
        Some(foo) if is_deleting(foo) => State::MarkedForDeletion,
        Some(foo) if !has_finalizer(foo, finalizer) => State::MissingFinalizer,
        Some(_) => State::Steady,
    }
}

pub struct Reconciler {
    cache: Arc<dyn ResourceCache>,
    foos: Arc<dyn FooClient>,
    deployments: Arc<dyn DeploymentClient>,
    events: Arc<dyn EventPublisher>,
    finalizer: String,
}

impl Reconciler {
    pub fn new(
        cache: Arc<dyn ResourceCache>,
        foos: Arc<dyn FooClient>,
        deployments: Arc<dyn DeploymentClient>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            cache,
            foos,
            deployments,
            events,
            finalizer: FINALIZER.to_owned(),
        }
    }

    pub fn with_finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.finalizer = finalizer.into();
        self
    }

    /// Runs one pass for `key`. Errors are left to the caller to retry or drop.
    pub async fn reconcile(&self, key: &str) -> Result<Outcome, Error> {
        let key: ObjectKey = key.parse()?;
        let foo = self.cache.get(&key);

        match (observe(foo.as_deref(), &self.finalizer), foo.as_deref()) {
            (State::Absent, _) | (_, None) => {
                info!(%key, "Foo no longer exists");
                Ok(Outcome::NoOp)
            }
            (State::MarkedForDeletion, Some(foo)) => {
                info!(%key, "Foo is marked for deletion");
                self.finalize(&key, foo).await
            }
            (State::MissingFinalizer, Some(foo)) => {
                ensure_finalizer_present(self.foos.as_ref(), foo, &self.finalizer).await
            }
            (State::Steady, Some(foo)) => {
                info!(%key, replicas = foo.spec.replicas, "reconciling Foo");
                self.apply(&key, foo).await
            }
        }
    }

    async fn finalize(&self, key: &ObjectKey, foo: &Foo) -> Result<Outcome, Error> {
        if !has_finalizer(foo, &self.finalizer) {
            debug!(%key, "teardown already completed");
            return Ok(Outcome::NoOp);
        }

        let name = child_name(&key.name);
        let deleted = with_event(
            self.events.as_ref(),
            foo,
            "DeletedDeployment",
            &format!("Deleted Deployment {name}"),
            "DeleteDeploymentFailed",
            self.delete_child(&key.namespace, &name),
        )
        .await?;
        if deleted == Outcome::NoOp {
            debug!(%key, deployment = %name, "deployment already absent");
        }

        remove_finalizer(self.foos.as_ref(), foo, &self.finalizer).await
    }

    async fn delete_child(&self, namespace: &str, name: &str) -> Result<Outcome, Error> {
        info!(deployment = %format!("{namespace}/{name}"), "deleting deployment");
        match self.deployments.delete(namespace, name).await {
            Ok(()) => Ok(Outcome::Finalized),
            Err(err) if err.is_not_found() => Ok(Outcome::NoOp),
            Err(err) => Err(err),
        }
    }

    async fn apply(&self, key: &ObjectKey, foo: &Foo) -> Result<Outcome, Error> {
        let desired = desired_deployment(foo)?;
        let name = desired.name_any();

        match self.deployments.get(&key.namespace, &name).await? {
            None => {
                with_event(
                    self.events.as_ref(),
                    foo,
                    "CreatedDeployment",
                    &format!("Created Deployment {name}"),
                    "CreateDeploymentFailed",
                    self.create_child(key, &desired),
                )
                .await
            }
            Some(existing) if owned_fields_match(&existing, &desired) => {
                info!(%key, deployment = %name, "deployment is up-to-date");
                Ok(Outcome::NoOp)
            }
            Some(existing) => {
                with_event(
                    self.events.as_ref(),
                    foo,
                    "UpdatedDeployment",
                    &format!("Updated Deployment {name}"),
                    "UpdateDeploymentFailed",
                    self.update_child(key, &existing, &desired),
                )
                .await
            }
        }
    }

    async fn create_child(&self, key: &ObjectKey, desired: &Deployment) -> Result<Outcome, Error> {
        info!(%key, "creating deployment");
        self.deployments.create(desired).await?;
        Ok(Outcome::Created)
    }

    async fn update_child(
        &self,
        key: &ObjectKey,
        existing: &Deployment,
        desired: &Deployment,
    ) -> Result<Outcome, Error> {
        info!(%key, "updating deployment");
        self.deployments
            .replace(&with_desired_spec(existing, desired))
            .await?;
        Ok(Outcome::Updated)
    }
}
