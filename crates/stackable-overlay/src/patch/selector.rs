use std::fmt::Display;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::resource::ResourceId;

/// Selects the resources a [`Patch`](super::Patch) applies to.
///
/// Kind and name always have to match. The namespace only has to match if the
/// selector specifies one, otherwise resources of every namespace are selected.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    pub kind: String,
    pub name: String,

    #[serde(default)]
    pub namespace: Option<String>,
}

impl Selector {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: None,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Infers the selector from the identity fields of a (partial) document.
    pub fn from_document(document: &Map<String, Value>) -> Option<Self> {
        let kind = document.get("kind")?.as_str()?;
        let metadata = document.get("metadata")?;
        let name = metadata.get("name")?.as_str()?;
        let namespace = metadata.get("namespace").and_then(Value::as_str);

        Some(Self {
            kind: kind.to_owned(),
            name: name.to_owned(),
            namespace: namespace.map(str::to_owned),
        })
    }

    pub fn matches(&self, id: &ResourceId) -> bool {
        self.kind == id.kind()
            && self.name == id.name()
            && self
                .namespace
                .as_deref()
                .is_none_or(|namespace| namespace == id.namespace())
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{namespace}/{}", self.kind, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case(Selector::new("Deployment", "web"), true)]
    #[case(Selector::new("Deployment", "web").in_namespace("prod"), true)]
    #[case(Selector::new("Deployment", "web").in_namespace("default"), false)]
    #[case(Selector::new("Deployment", "api"), false)]
    #[case(Selector::new("StatefulSet", "web"), false)]
    fn matches(#[case] selector: Selector, #[case] expected: bool) {
        let id = ResourceId::new("Deployment", Some("prod"), "web");
        assert_eq!(selector.matches(&id), expected);
    }

    #[test]
    fn from_document() {
        let document = json!({"kind": "Service", "metadata": {"name": "web", "namespace": "prod"}});
        assert_eq!(
            Selector::from_document(document.as_object().unwrap()),
            Some(Selector::new("Service", "web").in_namespace("prod"))
        );

        let anonymous = json!({"kind": "Service", "spec": {}});
        assert_eq!(Selector::from_document(anonymous.as_object().unwrap()), None);
    }
}
