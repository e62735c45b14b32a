//! The in-memory model of Kubernetes-style documents.
//!
//! A [`Resource`] is an arbitrary mapping with a `kind` and a `metadata.name`,
//! identified by its [`ResourceId`]. Field order is preserved (via the
//! `preserve_order` feature of [`serde_json`]), so documents re-serialize in the
//! order they were written. Resources are never mutated in place: merging,
//! patching and transforming all produce new values.
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use snafu::{OptionExt, Snafu, ensure};

use crate::{
    error::{ClassifyError, ErrorKind},
    merge::{self, MergeKeys},
};

mod id;
mod path;
mod set;

pub use id::*;
pub use path::{Error as FieldPathError, FieldPath, Segment};
pub use set::*;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("document must be a mapping, found {found}"))]
    NotAMapping { found: &'static str },

    #[snafu(display("document has no string field \"kind\""))]
    MissingKind,

    #[snafu(display("{kind} document has no string field \"metadata.name\""))]
    MissingName { kind: String },

    #[snafu(display("{kind} {name:?} has a non-string \"metadata.namespace\""))]
    InvalidNamespace { kind: String, name: String },

    #[snafu(display("cannot merge a {overlay_kind} into {id}: kinds differ"))]
    KindMismatch { id: ResourceId, overlay_kind: String },

    #[snafu(display("cannot merge {overlay} into {base}: identities differ"))]
    IdentityMismatch {
        base: ResourceId,
        overlay: ResourceId,
    },
}

impl ClassifyError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAMapping { .. }
            | Self::MissingKind
            | Self::MissingName { .. }
            | Self::InvalidNamespace { .. } => ErrorKind::ParseError,
            Self::KindMismatch { .. } | Self::IdentityMismatch { .. } => {
                ErrorKind::SchemaMismatch
            }
        }
    }
}

/// A single structured document with a known identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    id: ResourceId,
    body: Map<String, Value>,
}

impl Resource {
    /// Validates `value` and computes its identity.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(body) => Self::from_map(body),
            other => NotAMappingSnafu {
                found: type_name(&other),
            }
            .fail(),
        }
    }

    /// Like [`Resource::from_value`], for a document which is known to be a
    /// mapping.
    pub fn from_map(body: Map<String, Value>) -> Result<Self> {
        let kind = body
            .get("kind")
            .and_then(Value::as_str)
            .context(MissingKindSnafu)?;
        let metadata = body.get("metadata");
        let name = metadata
            .and_then(|metadata| metadata.get("name"))
            .and_then(Value::as_str)
            .context(MissingNameSnafu { kind })?;
        let namespace = match metadata.and_then(|metadata| metadata.get("namespace")) {
            None | Some(Value::Null) => None,
            Some(Value::String(namespace)) => Some(namespace.as_str()),
            Some(_) => return InvalidNamespaceSnafu { kind, name }.fail(),
        };

        Ok(Self {
            id: ResourceId::new(kind, namespace, name),
            body,
        })
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn kind(&self) -> &str {
        self.id.kind()
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }

    /// The namespace of this resource, [`DEFAULT_NAMESPACE`] if the document
    /// doesn't declare one.
    pub fn namespace(&self) -> &str {
        self.id.namespace()
    }

    pub fn api_version(&self) -> Option<&str> {
        self.body.get("apiVersion").and_then(Value::as_str)
    }

    /// Reads the nested field addressed by `path`.
    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        path.get_in(&self.body)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.body.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }

    /// Strategically merges `overlay` into `self` and returns the result.
    ///
    /// Both resources need to share the same identity. See the [`merge`]
    /// module for the merge semantics.
    pub fn merge(&self, overlay: &Self, keys: &MergeKeys) -> Result<Self> {
        ensure!(
            self.kind() == overlay.kind(),
            KindMismatchSnafu {
                id: self.id.clone(),
                overlay_kind: overlay.kind(),
            }
        );
        ensure!(
            self.id == overlay.id,
            IdentityMismatchSnafu {
                base: self.id.clone(),
                overlay: overlay.id.clone(),
            }
        );

        self.merge_partial(&overlay.body, keys)
    }

    /// Strategically merges a partial document into `self`.
    ///
    /// The partial document doesn't need to carry an identity. If it declares
    /// a `kind`, it has to match the kind of `self`.
    pub fn merge_partial(&self, overlay: &Map<String, Value>, keys: &MergeKeys) -> Result<Self> {
        if let Some(overlay_kind) = overlay.get("kind").and_then(Value::as_str) {
            ensure!(
                overlay_kind == self.kind(),
                KindMismatchSnafu {
                    id: self.id.clone(),
                    overlay_kind,
                }
            );
        }

        Self::from_map(merge::merge_maps(&self.body, overlay, keys))
    }
}

impl Serialize for Resource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}

impl TryFrom<Value> for Resource {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn deployment(replicas: u32) -> Resource {
        Resource::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "labels": {"app": "web"}},
            "spec": {"replicas": replicas},
        }))
        .expect("valid deployment")
    }

    #[test]
    fn identity_and_accessors() {
        let resource = deployment(2);

        assert_eq!(resource.id(), &ResourceId::new("Deployment", None, "web"));
        assert_eq!(resource.api_version(), Some("apps/v1"));
        assert_eq!(resource.namespace(), DEFAULT_NAMESPACE);
        assert_eq!(
            resource.get(&"spec.replicas".parse().unwrap()),
            Some(&json!(2))
        );
        assert_eq!(
            resource.get(&"metadata.labels.app".parse().unwrap()),
            Some(&json!("web"))
        );
    }

    #[test]
    fn field_order_is_preserved() {
        let resource = Resource::from_value(json!({
            "kind": "ConfigMap",
            "metadata": {"name": "settings"},
            "data": {"zeta": "1", "alpha": "2", "mid": "3"},
        }))
        .unwrap();

        let keys: Vec<_> = resource.as_map().keys().cloned().collect();
        assert_eq!(keys, ["kind", "metadata", "data"]);

        let data_keys: Vec<_> = resource.as_map()["data"]
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        assert_eq!(data_keys, ["zeta", "alpha", "mid"]);
    }

    #[rstest]
    #[case(json!([1, 2]), Error::NotAMapping { found: "sequence" })]
    #[case(json!({"metadata": {"name": "x"}}), Error::MissingKind)]
    #[case(json!({"kind": "Service"}), Error::MissingName { kind: "Service".to_owned() })]
    #[case(
        json!({"kind": "Service", "metadata": {"name": "x", "namespace": 3}}),
        Error::InvalidNamespace { kind: "Service".to_owned(), name: "x".to_owned() }
    )]
    fn invalid_documents(#[case] document: Value, #[case] expected: Error) {
        let error = Resource::from_value(document).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ParseError);
        assert_eq!(error, expected);
    }

    #[test]
    fn merge_replaces_scalars() {
        let merged = deployment(2)
            .merge(&deployment(3), &MergeKeys::default())
            .unwrap();
        assert_eq!(merged, deployment(3));
    }

    #[test]
    fn merge_rejects_other_kind() {
        let base = deployment(2);
        let overlay = Resource::from_value(json!({
            "kind": "StatefulSet",
            "metadata": {"name": "web"},
        }))
        .unwrap();

        let error = base.merge(&overlay, &MergeKeys::default()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::SchemaMismatch);
        assert!(matches!(error, Error::KindMismatch { .. }));

        let partial = overlay.as_map().clone();
        let error = base
            .merge_partial(&partial, &MergeKeys::default())
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::SchemaMismatch);
    }

    #[test]
    fn merge_rejects_other_identity() {
        let base = deployment(2);
        let overlay = Resource::from_value(json!({
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "prod"},
        }))
        .unwrap();

        let error = base.merge(&overlay, &MergeKeys::default()).unwrap_err();
        assert_eq!(
            error,
            Error::IdentityMismatch {
                base: ResourceId::new("Deployment", None, "web"),
                overlay: ResourceId::new("Deployment", Some("prod"), "web"),
            }
        );
    }

    #[rstest]
    #[case::scalar(
        json!({"replicas": 2}),
        json!({"kind": "Deployment", "metadata": {"name": "web"}, "spec": {"replicas": 5}})
    )]
    #[case::null_removes_label(
        json!({"replicas": 2}),
        json!({
            "kind": "Deployment",
            "metadata": {"name": "web", "labels": {"tier": "frontend", "app": null}},
        })
    )]
    #[case::keyed_containers(
        json!({"replicas": 2}),
        json!({
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "spec": {"template": {"spec": {"containers": [
                {"name": "web", "image": "nginx:1.25"},
                {"name": "sidecar", "image": "envoy"},
            ]}}},
        })
    )]
    #[case::replace_directive(
        json!({"replicas": 2}),
        json!({
            "kind": "Deployment",
            "metadata": {"name": "web", "labels": {"$patch": "replace", "only": "this"}},
        })
    )]
    #[case::merge_key_repeated_in_overlay(
        json!({"ports": [{"port": 80}]}),
        json!({
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "spec": {"ports": [{"port": 80, "containerPort": 9}, {"port": 90, "containerPort": 9}]},
        })
    )]
    fn merge_is_idempotent(#[case] base_spec: Value, #[case] overlay: Value) {
        let keys = MergeKeys::default();
        let base = Resource::from_value(json!({
            "kind": "Deployment",
            "metadata": {"name": "web", "labels": {"app": "web"}},
            "spec": base_spec,
        }))
        .unwrap();
        let overlay = Resource::from_value(overlay).unwrap();

        let once = base.merge(&overlay, &keys).unwrap();
        let twice = once.merge(&overlay, &keys).unwrap();
        assert_eq!(once, twice);
    }
}
