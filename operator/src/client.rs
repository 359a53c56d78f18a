use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    Api, Client, ResourceExt,
    api::{DeleteParams, PostParams},
};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::Foo;
use crate::error::Error;
use crate::key::ObjectKey;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeploymentClient: Send + Sync {
    /// `None` when the Deployment does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, Error>;

    async fn create(&self, deployment: &Deployment) -> Result<Deployment, Error>;

    /// Full replace guarded by the `resourceVersion` carried in `deployment`.
    async fn replace(&self, deployment: &Deployment) -> Result<Deployment, Error>;

    /// Fails with [`Error::NotFound`] when the Deployment is already gone.
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

// Only used to change finalizers.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FooClient: Send + Sync {
    /// Fails with [`Error::Conflict`] when `foo` was read at a stale version.
    async fn replace(&self, foo: &Foo) -> Result<Foo, Error>;
}

#[derive(Clone)]
pub struct KubeDeploymentClient {
    client: Client,
}

impl KubeDeploymentClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl DeploymentClient for KubeDeploymentClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, Error> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(|err| Error::from_kube(err, format!("deployment {namespace}/{name}")))
    }

    async fn create(&self, deployment: &Deployment) -> Result<Deployment, Error> {
        let key = ObjectKey::for_object(deployment)?;
        debug!(deployment = %key, "creating deployment");
        self.api(&key.namespace)
            .create(&PostParams::default(), deployment)
            .await
            .map_err(|err| Error::from_kube(err, format!("deployment {key}")))
    }

    async fn replace(&self, deployment: &Deployment) -> Result<Deployment, Error> {
        let key = ObjectKey::for_object(deployment)?;
        debug!(deployment = %key, resource_version = ?deployment.resource_version(), "replacing deployment");
        self.api(&key.namespace)
            .replace(&key.name, &PostParams::default(), deployment)
            .await
            .map_err(|err| Error::from_kube(err, format!("deployment {key}")))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
        debug!(deployment = %format!("{namespace}/{name}"), "deleting deployment");
        self.api(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|err| Error::from_kube(err, format!("deployment {namespace}/{name}")))
    }
}

#[derive(Clone)]
pub struct KubeFooClient {
    client: Client,
}

impl KubeFooClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FooClient for KubeFooClient {
    async fn replace(&self, foo: &Foo) -> Result<Foo, Error> {
        let key = ObjectKey::for_object(foo)?;
        let api: Api<Foo> = Api::namespaced(self.client.clone(), &key.namespace);
        api.replace(&key.name, &PostParams::default(), foo)
            .await
            .map_err(|err| Error::from_kube(err, format!("foo {key}")))
    }
}
