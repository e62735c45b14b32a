use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Deserializer, de};
use serde_json::{Value, json};
use snafu::{ResultExt, Snafu};

use crate::resource::{FieldPath, FieldPathError};

#[derive(Debug, Snafu)]
pub enum OperationError {
    #[snafu(display("failed to resolve field path"))]
    ResolvePath { source: FieldPathError },

    #[snafu(display("failed to build JSON patch operation"))]
    BuildOperation { source: serde_json::Error },
}

/// The location an [`Operation`] works on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationPath {
    /// An RFC 6901 JSON pointer, e.g. `/spec/replicas`.
    Pointer(String),

    /// A [`FieldPath`], e.g. `spec.template.spec.containers[name=web].image`.
    Field(FieldPath),
}

impl OperationPath {
    /// Resolves this path into a JSON pointer for `document`.
    pub fn resolve(&self, document: &Value) -> Result<String, FieldPathError> {
        match self {
            Self::Pointer(pointer) => Ok(pointer.clone()),
            Self::Field(path) => path.to_pointer(document),
        }
    }
}

impl FromStr for OperationPath {
    type Err = FieldPathError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.is_empty() || input.starts_with('/') {
            Ok(Self::Pointer(input.to_owned()))
        } else {
            input.parse().map(Self::Field)
        }
    }
}

impl Display for OperationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pointer(pointer) => f.write_str(pointer),
            Self::Field(path) => path.fmt(f),
        }
    }
}

impl<'de> Deserialize<'de> for OperationPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let input = String::deserialize(deserializer)?;
        input.parse().map_err(de::Error::custom)
    }
}

/// A single field-path operation, in the shape of a JSON patch (RFC 6902)
/// operation.
///
/// ```yaml
/// - op: replace
///   path: /spec/replicas
///   value: 3
/// - op: add
///   path: spec.template.spec.containers[name=web].args
///   value: ["--verbose"]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    Add { path: OperationPath, value: Value },
    Remove { path: OperationPath },
    Replace { path: OperationPath, value: Value },
    Move { from: OperationPath, path: OperationPath },
    Copy { from: OperationPath, path: OperationPath },
    Test { path: OperationPath, value: Value },
}

impl Operation {
    pub fn path(&self) -> &OperationPath {
        match self {
            Self::Add { path, .. }
            | Self::Remove { path }
            | Self::Replace { path, .. }
            | Self::Move { path, .. }
            | Self::Copy { path, .. }
            | Self::Test { path, .. } => path,
        }
    }

    /// Resolves all paths against `document` and returns the equivalent
    /// [`json_patch::PatchOperation`].
    ///
    /// `add` on a location that already exists becomes a `replace`, so an
    /// existing sequence element is overwritten instead of shifted.
    pub fn to_json_patch(
        &self,
        document: &Value,
    ) -> Result<json_patch::PatchOperation, OperationError> {
        let resolve = |path: &OperationPath| path.resolve(document).context(ResolvePathSnafu);

        let raw = match self {
            Self::Add { path, value } => {
                let pointer = resolve(path)?;
                let op = if document.pointer(&pointer).is_some() {
                    "replace"
                } else {
                    "add"
                };
                json!({"op": op, "path": pointer, "value": value})
            }
            Self::Remove { path } => json!({"op": "remove", "path": resolve(path)?}),
            Self::Replace { path, value } => {
                json!({"op": "replace", "path": resolve(path)?, "value": value})
            }
            Self::Move { from, path } => {
                json!({"op": "move", "from": resolve(from)?, "path": resolve(path)?})
            }
            Self::Copy { from, path } => {
                json!({"op": "copy", "from": resolve(from)?, "path": resolve(path)?})
            }
            Self::Test { path, value } => {
                json!({"op": "test", "path": resolve(path)?, "value": value})
            }
        };

        serde_json::from_value(raw).context(BuildOperationSnafu)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    #[test]
    fn deserialize_pointer_and_field_paths() {
        let operations: Vec<Operation> = serde_yaml::from_str(indoc! {"
            - op: replace
              path: /spec/replicas
              value: 3
            - op: remove
              path: metadata.labels.tier
            - op: move
              from: /spec/a
              path: spec.b
        "})
        .expect("operations are valid");

        assert_eq!(
            operations[0],
            Operation::Replace {
                path: OperationPath::Pointer("/spec/replicas".to_owned()),
                value: json!(3),
            }
        );
        assert_eq!(
            operations[1].path(),
            &OperationPath::Field("metadata.labels.tier".parse().unwrap())
        );
        assert!(matches!(operations[2], Operation::Move { .. }));
    }

    #[test]
    fn unknown_operations_are_rejected() {
        let result: Result<Vec<Operation>, _> = serde_yaml::from_str("- op: frobnicate\n  path: /a");
        assert!(result.is_err());
    }

    #[test]
    fn field_paths_resolve_against_document() {
        let document = json!({"spec": {"containers": [{"name": "a"}, {"name": "web"}]}});
        let operation: Operation = serde_json::from_value(json!({
            "op": "add",
            "path": "spec.containers[name=web].image",
            "value": "nginx",
        }))
        .unwrap();

        let resolved = operation.to_json_patch(&document).unwrap();
        let mut patched = document.clone();
        json_patch::patch(&mut patched, &[resolved]).unwrap();

        assert_eq!(
            patched,
            json!({"spec": {"containers": [{"name": "a"}, {"name": "web", "image": "nginx"}]}})
        );
    }

    #[rstest]
    #[case::existing_sequence_element("spec.args[0]", json!("--x"), json!({"args": ["--x", "--b"], "replicas": 1}))]
    #[case::existing_scalar("/spec/replicas", json!(2), json!({"args": ["--a", "--b"], "replicas": 2}))]
    #[case::new_field("spec.paused", json!(true), json!({"args": ["--a", "--b"], "replicas": 1, "paused": true}))]
    #[case::sequence_end("/spec/args/-", json!("--x"), json!({"args": ["--a", "--b", "--x"], "replicas": 1}))]
    fn add_overwrites_existing_locations(
        #[case] path: &str,
        #[case] value: Value,
        #[case] expected: Value,
    ) {
        let mut document = json!({"spec": {"args": ["--a", "--b"], "replicas": 1}});
        let operation = Operation::Add {
            path: path.parse().unwrap(),
            value,
        };

        let resolved = operation.to_json_patch(&document).unwrap();
        json_patch::patch(&mut document, &[resolved]).unwrap();

        assert_eq!(document["spec"], expected);
    }
}
