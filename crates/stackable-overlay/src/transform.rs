//! Built-in transformers, applied to the resources of a directory after its
//! patches.
use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{debug, instrument};

use crate::{
    error::{ClassifyError, ErrorKind},
    iter::TryFromIterator,
    resource::{self, DuplicateResourceError, Resource, ResourceId, ResourceSet},
};

type Result<T, E = Error> = std::result::Result<T, E>;

/// Kinds which don't live in a namespace.
pub const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "PersistentVolume",
    "StorageClass",
    "PriorityClass",
    "APIService",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
];

/// Kinds which keep their name when a prefix or suffix is configured.
const FIXED_NAME_KINDS: &[&str] = &["Namespace", "CustomResourceDefinition"];

/// Kinds with a pod template at `spec.template`.
const WORKLOAD_KINDS: &[&str] = &["Deployment", "StatefulSet", "DaemonSet", "ReplicaSet", "Job"];

/// Kinds with a `spec.replicas` field.
const SCALABLE_KINDS: &[&str] = &["Deployment", "StatefulSet", "ReplicaSet"];

const CONTAINER_FIELDS: &[&str] = &["containers", "initContainers"];

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{id} holds a non-mapping value at {field}"))]
    NotAMapping { id: ResourceId, field: String },

    #[snafu(display("transforming {id} did not produce a valid resource"))]
    InvalidResult { id: ResourceId, source: resource::Error },

    #[snafu(display("transformed resource collides with another one"))]
    Collision { source: DuplicateResourceError },
}

impl ClassifyError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAMapping { .. } | Self::InvalidResult { .. } => ErrorKind::SchemaMismatch,
            Self::Collision { source } => source.kind(),
        }
    }
}

/// Sets `spec.replicas` of the scalable resource called `name`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ReplicaCount {
    pub name: String,
    pub count: u32,
}

/// Rewrites container images whose name (without tag and digest) is `name`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageOverride {
    pub name: String,

    #[serde(default)]
    pub new_name: Option<String>,

    #[serde(default)]
    pub new_tag: Option<String>,

    /// Takes precedence over `new_tag`.
    #[serde(default)]
    pub digest: Option<String>,
}

impl ImageOverride {
    /// Returns the rewritten image, or [`None`] if `image` is not affected.
    pub fn apply(&self, image: &str) -> Option<String> {
        let (name, tag, digest) = split_image(image);
        if name != self.name {
            return None;
        }

        let name = self.new_name.as_deref().unwrap_or(name);
        let image = match (&self.digest, &self.new_tag) {
            (Some(digest), _) => format!("{name}@{digest}"),
            (None, Some(tag)) => format!("{name}:{tag}"),
            (None, None) => {
                let mut image = name.to_owned();
                if let Some(tag) = tag {
                    image = format!("{image}:{tag}");
                }
                if let Some(digest) = digest {
                    image = format!("{image}@{digest}");
                }
                image
            }
        };
        Some(image)
    }
}

/// Splits an image reference into name, tag and digest.
fn split_image(image: &str) -> (&str, Option<&str>, Option<&str>) {
    let (reference, digest) = match image.split_once('@') {
        Some((reference, digest)) => (reference, Some(digest)),
        None => (image, None),
    };

    // A colon before the last slash belongs to a registry port.
    let last_segment = reference.rfind('/').map_or(0, |slash| slash + 1);
    match reference[last_segment..].rfind(':') {
        Some(colon) => {
            let colon = last_segment + colon;
            (&reference[..colon], Some(&reference[colon + 1..]), digest)
        }
        None => (reference, None, digest),
    }
}

/// The transformer settings of one directory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transformers {
    pub namespace: Option<String>,
    pub name_prefix: String,
    pub name_suffix: String,
    pub common_labels: BTreeMap<String, String>,
    pub common_annotations: BTreeMap<String, String>,
    pub replicas: Vec<ReplicaCount>,
    pub images: Vec<ImageOverride>,
}

impl Transformers {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Runs all transformers on every resource of `resources`.
    ///
    /// Replica counts and images are matched before any renaming takes place.
    /// Resources keep their position in the set.
    #[instrument(skip_all, fields(resources = resources.len()))]
    pub fn apply(&self, resources: &ResourceSet) -> Result<ResourceSet> {
        if self.is_empty() {
            return Ok(resources.clone());
        }

        let transformed = resources
            .iter()
            .map(|resource| self.transform(resource))
            .collect::<Result<Vec<_>>>()?;
        ResourceSet::try_from_iter(transformed).context(CollisionSnafu)
    }

    fn transform(&self, resource: &Resource) -> Result<Resource> {
        let id = resource.id();
        let kind = resource.kind();
        let mut body = resource.as_map().clone();

        if SCALABLE_KINDS.contains(&kind) {
            if let Some(replicas) = self.replicas.iter().find(|r| r.name == resource.name()) {
                mapping_at(&mut body, &["spec"], id)?
                    .insert("replicas".to_owned(), Value::from(replicas.count));
            }
        }

        if !self.images.is_empty() {
            rewrite_images(&mut body, &self.images);
        }

        if !self.common_labels.is_empty() {
            insert_all(&mut body, &["metadata", "labels"], &self.common_labels, id)?;
            if kind == "Service" {
                insert_all(&mut body, &["spec", "selector"], &self.common_labels, id)?;
            }
            if WORKLOAD_KINDS.contains(&kind) {
                // Jobs generate their own selector unless one is given.
                let has_selector = body
                    .get("spec")
                    .and_then(|spec| spec.get("selector"))
                    .is_some();
                if kind != "Job" || has_selector {
                    let path = ["spec", "selector", "matchLabels"];
                    insert_all(&mut body, &path, &self.common_labels, id)?;
                }
                let path = ["spec", "template", "metadata", "labels"];
                insert_all(&mut body, &path, &self.common_labels, id)?;
            }
        }

        if !self.common_annotations.is_empty() {
            insert_all(&mut body, &["metadata", "annotations"], &self.common_annotations, id)?;
            if WORKLOAD_KINDS.contains(&kind) {
                let path = ["spec", "template", "metadata", "annotations"];
                insert_all(&mut body, &path, &self.common_annotations, id)?;
            }
        }

        let metadata = mapping_at(&mut body, &["metadata"], id)?;
        if let Some(namespace) = &self.namespace {
            if !CLUSTER_SCOPED_KINDS.contains(&kind) {
                metadata.insert("namespace".to_owned(), Value::from(namespace.as_str()));
            }
        }
        if !FIXED_NAME_KINDS.contains(&kind)
            && !(self.name_prefix.is_empty() && self.name_suffix.is_empty())
        {
            let name = format!("{}{}{}", self.name_prefix, resource.name(), self.name_suffix);
            metadata.insert("name".to_owned(), Value::from(name));
        }

        let transformed = Resource::from_map(body).context(InvalidResultSnafu { id: id.clone() })?;
        if transformed.id() != id {
            debug!(from = %id, to = %transformed.id(), "changed identity");
        }
        Ok(transformed)
    }
}

/// Returns the mapping at `path`, creating missing (or null) levels.
fn mapping_at<'a>(
    mut map: &'a mut Map<String, Value>,
    path: &[&str],
    id: &ResourceId,
) -> Result<&'a mut Map<String, Value>> {
    for (depth, key) in path.iter().enumerate() {
        let value = map
            .entry(*key)
            .or_insert_with(|| Value::Object(Map::new()));
        if value.is_null() {
            *value = Value::Object(Map::new());
        }
        map = value.as_object_mut().context(NotAMappingSnafu {
            id: id.clone(),
            field: path[..=depth].join("."),
        })?;
    }
    Ok(map)
}

fn insert_all(
    body: &mut Map<String, Value>,
    path: &[&str],
    entries: &BTreeMap<String, String>,
    id: &ResourceId,
) -> Result<()> {
    let map = mapping_at(body, path, id)?;
    for (key, value) in entries {
        map.insert(key.clone(), Value::from(value.as_str()));
    }
    Ok(())
}

/// Rewrites the `image` of every container list found anywhere in `value`.
fn rewrite_images(body: &mut Map<String, Value>, overrides: &[ImageOverride]) {
    for (key, value) in body.iter_mut() {
        match value {
            Value::Array(containers) if CONTAINER_FIELDS.contains(&key.as_str()) => {
                for container in containers.iter_mut().filter_map(Value::as_object_mut) {
                    let Some(Value::String(image)) = container.get_mut("image") else {
                        continue;
                    };
                    if let Some(rewritten) = overrides.iter().find_map(|o| o.apply(image)) {
                        *image = rewritten;
                    }
                    rewrite_images(container, overrides);
                }
            }
            Value::Object(nested) => rewrite_images(nested, overrides),
            Value::Array(items) => {
                for nested in items.iter_mut().filter_map(Value::as_object_mut) {
                    rewrite_images(nested, overrides);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn resources(yaml: &str) -> ResourceSet {
        let resources = crate::loader::parse_resources(std::path::Path::new("test.yaml"), yaml)
            .expect("fixture is valid");
        ResourceSet::try_from_iter(resources).unwrap()
    }

    fn fixture() -> ResourceSet {
        resources(indoc! {"
            apiVersion: apps/v1
            kind: Deployment
            metadata:
              name: web
            spec:
              replicas: 1
              selector:
                matchLabels: {app: web}
              template:
                metadata:
                  labels: {app: web}
                spec:
                  initContainers:
                    - name: init
                      image: busybox
                  containers:
                    - name: web
                      image: nginx:1.24
                    - name: proxy
                      image: registry.example.com:5000/envoy@sha256:abc
            ---
            kind: Service
            metadata:
              name: web
            spec:
              selector: {app: web}
            ---
            kind: Namespace
            metadata:
              name: web
            ---
            kind: ClusterRole
            metadata:
              name: reader
        "})
    }

    fn field<'a>(set: &'a ResourceSet, index: usize, path: &str) -> Option<&'a Value> {
        set.iter().nth(index)?.get(&path.parse().unwrap())
    }

    #[test]
    fn no_transformers_is_identity() {
        assert_eq!(Transformers::default().apply(&fixture()).unwrap(), fixture());
    }

    #[test]
    fn namespace_skips_cluster_scoped_kinds() {
        let transformers = Transformers {
            namespace: Some("staging".to_owned()),
            ..Default::default()
        };
        let set = transformers.apply(&fixture()).unwrap();

        let namespaces: Vec<_> = set.iter().map(Resource::namespace).collect();
        assert_eq!(namespaces, ["staging", "staging", "default", "default"]);
    }

    #[test]
    fn prefix_and_suffix() {
        let transformers = Transformers {
            name_prefix: "staging-".to_owned(),
            name_suffix: "-v2".to_owned(),
            ..Default::default()
        };
        let set = transformers.apply(&fixture()).unwrap();

        let names: Vec<_> = set.iter().map(Resource::name).collect();
        assert_eq!(
            names,
            ["staging-web-v2", "staging-web-v2", "web", "staging-reader-v2"]
        );
    }

    #[test]
    fn common_labels_reach_selectors_and_templates() {
        let transformers = Transformers {
            common_labels: BTreeMap::from([("env".to_owned(), "staging".to_owned())]),
            common_annotations: BTreeMap::from([("owner".to_owned(), "team-a".to_owned())]),
            ..Default::default()
        };
        let set = transformers.apply(&fixture()).unwrap();

        let labels = json!({"app": "web", "env": "staging"});
        assert_eq!(field(&set, 0, "spec.selector.matchLabels"), Some(&labels));
        assert_eq!(field(&set, 0, "spec.template.metadata.labels"), Some(&labels));
        assert_eq!(
            field(&set, 0, "spec.template.metadata.annotations"),
            Some(&json!({"owner": "team-a"}))
        );
        assert_eq!(field(&set, 1, "spec.selector"), Some(&labels));
        assert_eq!(
            field(&set, 3, "metadata.labels"),
            Some(&json!({"env": "staging"}))
        );
        assert_eq!(field(&set, 3, "spec.selector"), None);
    }

    #[test]
    fn replicas_and_images() {
        let transformers = Transformers {
            replicas: vec![
                ReplicaCount {
                    name: "web".to_owned(),
                    count: 3,
                },
                ReplicaCount {
                    name: "unknown".to_owned(),
                    count: 7,
                },
            ],
            images: vec![
                ImageOverride {
                    name: "nginx".to_owned(),
                    new_name: Some("registry.example.com/nginx".to_owned()),
                    new_tag: Some("1.25".to_owned()),
                    digest: None,
                },
                ImageOverride {
                    name: "registry.example.com:5000/envoy".to_owned(),
                    new_name: None,
                    new_tag: Some("1.31".to_owned()),
                    digest: None,
                },
            ],
            ..Default::default()
        };
        let set = transformers.apply(&fixture()).unwrap();

        assert_eq!(field(&set, 0, "spec.replicas"), Some(&json!(3)));
        assert_eq!(
            field(&set, 0, "spec.template.spec.containers"),
            Some(&json!([
                {"name": "web", "image": "registry.example.com/nginx:1.25"},
                {"name": "proxy", "image": "registry.example.com:5000/envoy:1.31"},
            ]))
        );
        assert_eq!(
            field(&set, 0, "spec.template.spec.initContainers[0].image"),
            Some(&json!("busybox"))
        );
        assert_eq!(field(&set, 1, "spec.replicas"), None);
    }

    #[test]
    fn colliding_identities_fail() {
        let set = resources(indoc! {"
            kind: ConfigMap
            metadata: {name: settings, namespace: a}
            ---
            kind: ConfigMap
            metadata: {name: settings, namespace: b}
        "});
        let transformers = Transformers {
            namespace: Some("c".to_owned()),
            ..Default::default()
        };

        let error = transformers.apply(&set).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::DuplicateResource);
    }

    #[rstest]
    #[case("nginx", ("nginx", None, None))]
    #[case("nginx:1.25", ("nginx", Some("1.25"), None))]
    #[case("nginx@sha256:abc", ("nginx", None, Some("sha256:abc")))]
    #[case("nginx:1.25@sha256:abc", ("nginx", Some("1.25"), Some("sha256:abc")))]
    #[case("host:5000/team/app", ("host:5000/team/app", None, None))]
    #[case("host:5000/team/app:v1", ("host:5000/team/app", Some("v1"), None))]
    fn split_images(
        #[case] image: &str,
        #[case] expected: (&str, Option<&str>, Option<&str>),
    ) {
        assert_eq!(split_image(image), expected);
    }

    #[rstest]
    #[case("nginx:1.24", Some("nginx@sha256:def"))]
    #[case("nginx:1.24@sha256:abc", Some("nginx@sha256:def"))]
    #[case("nginx-unprivileged:1.24", None)]
    fn digest_replaces_tag(#[case] image: &str, #[case] expected: Option<&str>) {
        let image_override = ImageOverride {
            name: "nginx".to_owned(),
            new_name: None,
            new_tag: Some("ignored".to_owned()),
            digest: Some("sha256:def".to_owned()),
        };
        assert_eq!(image_override.apply(image).as_deref(), expected);
    }
}
