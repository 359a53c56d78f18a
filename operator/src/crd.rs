use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_IMAGE: &str = "nginx:latest";

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "example.com",
    version = "v1",
    kind = "Foo",
    plural = "foos",
    derive = "Default",
    derive = "PartialEq",
    shortname = "foo",
    namespaced
)]
pub struct FooSpec {
    /// Desired number of workload replicas.
    #[schemars(range(min = 0))]
    pub replicas: i32,

    /// Container image run by the managed Deployment.
    #[serde(default = "default_image")]
    pub image: String,
}

fn default_image() -> String {
    DEFAULT_IMAGE.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn image_defaults_when_omitted() {
        let spec: FooSpec = serde_json::from_value(serde_json::json!({ "replicas": 3 })).unwrap();
        assert_eq!(spec.replicas, 3);
        assert_eq!(spec.image, DEFAULT_IMAGE);
    }

    #[test]
    fn crd_is_namespaced_foos() {
        let crd = Foo::crd();
        assert_eq!(crd.spec.group, "example.com");
        assert_eq!(crd.spec.names.plural, "foos");
        assert_eq!(crd.spec.scope, "Namespaced");
    }
}
