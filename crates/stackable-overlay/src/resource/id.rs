use std::fmt::Display;

/// The namespace assumed for resources which don't declare one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// The identity triple of a [`Resource`](super::Resource).
///
/// Within one composed [`ResourceSet`](super::ResourceSet) no two resources
/// share the same identity. Ordering is lexicographic over kind, namespace and
/// name, which is the order the [emitter](crate::emitter) uses by default.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId {
    kind: String,
    namespace: String,
    name: String,
}

impl ResourceId {
    /// Creates a new identity. A missing namespace is replaced by
    /// [`DEFAULT_NAMESPACE`].
    pub fn new(kind: impl Into<String>, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.unwrap_or(DEFAULT_NAMESPACE).to_owned(),
            name: name.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_namespace_defaults() {
        let id = ResourceId::new("Deployment", None, "web");
        assert_eq!(id.namespace(), DEFAULT_NAMESPACE);
        assert_eq!(id, ResourceId::new("Deployment", Some("default"), "web"));
        assert_eq!(id.to_string(), "Deployment/default/web");
    }

    #[test]
    fn ordering_is_kind_namespace_name() {
        let mut ids = vec![
            ResourceId::new("Service", Some("a"), "web"),
            ResourceId::new("Deployment", Some("b"), "web"),
            ResourceId::new("Deployment", Some("a"), "zeta"),
            ResourceId::new("Deployment", Some("a"), "alpha"),
        ];
        ids.sort();

        assert_eq!(
            ids.iter().map(ToString::to_string).collect::<Vec<_>>(),
            [
                "Deployment/a/alpha",
                "Deployment/a/zeta",
                "Deployment/b/web",
                "Service/a/web",
            ]
        );
    }
}
