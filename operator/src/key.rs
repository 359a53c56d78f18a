use std::{fmt, str::FromStr};

use kube::{Resource, ResourceExt};

use crate::error::Error;

/// Namespace and name of a namespaced object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn for_object<K: Resource>(obj: &K) -> Result<Self, Error> {
        let name = obj.meta().name.clone().unwrap_or_default();
        let namespace = obj.namespace().unwrap_or_default();
        if name.is_empty() || namespace.is_empty() {
            return Err(Error::InvalidKey(format!("{namespace}/{name}")));
        }
        Ok(Self { namespace, name })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        match key.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(ObjectKey::new(namespace, name))
            }
            _ => Err(Error::InvalidKey(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Foo, FooSpec};
    use kube::api::ObjectMeta;

    #[test]
    fn parses_namespace_and_name() {
        let key: ObjectKey = "default/test-foo".parse().unwrap();
        assert_eq!(key, ObjectKey::new("default", "test-foo"));
        assert_eq!(key.to_string(), "default/test-foo");
    }

    #[test]
    fn rejects_malformed_keys() {
        for bad in ["", "test-foo", "/test-foo", "default/", "a/b/c"] {
            let err = bad.parse::<ObjectKey>().unwrap_err();
            assert!(matches!(err, Error::InvalidKey(_)), "{bad:?} parsed");
        }
    }

    #[test]
    fn key_from_metadata() {
        let mut foo = Foo::new("test-foo", FooSpec::default());
        assert!(ObjectKey::for_object(&foo).is_err());

        foo.metadata = ObjectMeta {
            name: Some("test-foo".into()),
            namespace: Some("default".into()),
            ..Default::default()
        };
        assert_eq!(
            ObjectKey::for_object(&foo).unwrap(),
            ObjectKey::new("default", "test-foo")
        );
    }
}
