//! Work-queue keys

use std::fmt;

use kube::{Resource, ResourceExt};

/// Identity of a namespaced object: `namespace/name`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Object namespace
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Create a key from its parts
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced resource
    ///
    /// `None` when the object lacks a namespace or a name; such objects cannot
    /// be looked up again and are never queued.
    pub fn for_resource<K: Resource>(obj: &K) -> Option<Self> {
        let namespace = obj.namespace().filter(|ns| !ns.is_empty())?;
        let name = obj.meta().name.clone().filter(|name| !name.is_empty())?;
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;
    use kube::api::ObjectMeta;
    use rstest::rstest;

    #[test]
    fn key_displays_as_namespace_slash_name() {
        assert_eq!(ObjectKey::new("games", "poker").to_string(), "games/poker");
    }

    fn pod(namespace: Option<&str>, name: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: name.map(str::to_string),
                namespace: namespace.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn key_from_resource_metadata() {
        assert_eq!(
            ObjectKey::for_resource(&pod(Some("games"), Some("poker-0"))),
            Some(ObjectKey::new("games", "poker-0"))
        );
    }

    #[rstest]
    #[case(None, Some("poker-0"))]
    #[case(Some(""), Some("poker-0"))]
    #[case(Some("games"), None)]
    #[case(Some("games"), Some(""))]
    fn objects_without_identity_have_no_key(
        #[case] namespace: Option<&str>,
        #[case] name: Option<&str>,
    ) {
        assert_eq!(ObjectKey::for_resource(&pod(namespace, name)), None);
    }
}
