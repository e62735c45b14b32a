//! Targeted modifications of resources.
//!
//! A [`Patch`] selects resources by kind and name (see [`Selector`]) and
//! modifies them either by strategically merging a partial document
//! ([`PatchBody::StrategicMerge`]) or by running a list of field-path
//! operations ([`PatchBody::Operations`]).
use std::{fmt::Display, path::PathBuf};

use serde_json::{Map, Value};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{debug, instrument};

use crate::{
    error::{ClassifyError, ErrorKind},
    merge::MergeKeys,
    resource::{self, DuplicateResourceError, Resource, ResourceId, ResourceSet, type_name},
};

mod operation;
mod selector;

pub use operation::*;
pub use selector::*;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("patch target {selector} does not match any resource"))]
    TargetNotFound { selector: Selector },

    #[snafu(display("failed to merge patch into {id}"))]
    Merge { id: ResourceId, source: resource::Error },

    #[snafu(display("failed to prepare operation {operation} for {id}"))]
    PrepareOperation {
        id: ResourceId,
        operation: usize,
        source: OperationError,
    },

    #[snafu(display("operation {operation} failed on {id}"))]
    ApplyOperation {
        id: ResourceId,
        operation: usize,
        source: json_patch::PatchError,
    },

    #[snafu(display("patching {id} did not produce a valid resource"))]
    InvalidResult { id: ResourceId, source: resource::Error },

    #[snafu(display("patched resource collides with an existing one"))]
    Collision { source: DuplicateResourceError },
}

impl ClassifyError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::TargetNotFound { .. } => ErrorKind::PatchTargetNotFound,
            Self::Merge { source, .. } => source.kind(),
            Self::PrepareOperation { .. } | Self::ApplyOperation { .. } => ErrorKind::InvalidPath,
            Self::InvalidResult { .. } => ErrorKind::SchemaMismatch,
            Self::Collision { source } => source.kind(),
        }
    }
}

#[derive(Debug, Snafu)]
pub enum ParsePatchError {
    #[snafu(display("a patch must be a mapping or a sequence, found {found}"))]
    UnsupportedDocument { found: &'static str },

    #[snafu(display("invalid patch operations"))]
    InvalidOperations { source: serde_json::Error },

    #[snafu(display("a field-path patch requires an explicit target"))]
    MissingOperationsTarget,

    #[snafu(display(
        "patch has no target and does not declare \"kind\" and \"metadata.name\""
    ))]
    MissingTarget,
}

impl ClassifyError for ParsePatchError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::ParseError
    }
}

/// Where a [`Patch`] was declared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatchOrigin {
    Inline,
    File(PathBuf),
}

impl Display for PatchOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inline => f.write_str("inline"),
            Self::File(path) => path.display().fmt(f),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatchBody {
    /// A partial document merged into every target, see [`crate::merge`].
    StrategicMerge(Map<String, Value>),

    /// Operations applied in order, each one to the output of its predecessor.
    Operations(Vec<Operation>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Patch {
    pub selector: Selector,
    pub body: PatchBody,
    pub origin: PatchOrigin,
}

impl Patch {
    /// Interprets a parsed patch document.
    ///
    /// Sequences are read as field-path operations and require a `target`.
    /// Mappings are strategic merge patches. Without a `target`, they select
    /// the resource named by their own `kind` and `metadata`.
    pub fn from_document(
        document: Value,
        target: Option<Selector>,
        origin: PatchOrigin,
    ) -> Result<Self, ParsePatchError> {
        let (selector, body) = match document {
            Value::Array(_) => {
                let operations =
                    serde_json::from_value(document).context(InvalidOperationsSnafu)?;
                let selector = target.context(MissingOperationsTargetSnafu)?;
                (selector, PatchBody::Operations(operations))
            }
            Value::Object(body) => {
                let selector = match target {
                    Some(selector) => selector,
                    None => Selector::from_document(&body).context(MissingTargetSnafu)?,
                };
                (selector, PatchBody::StrategicMerge(body))
            }
            other => {
                return UnsupportedDocumentSnafu {
                    found: type_name(&other),
                }
                .fail();
            }
        };

        Ok(Self {
            selector,
            body,
            origin,
        })
    }
}

/// Applies `patch` to every resource of `resources` its selector matches and
/// returns the patched set.
///
/// Resources keep their position in the set, even if the patch changes their
/// identity.
#[instrument(skip_all, fields(selector = %patch.selector, origin = %patch.origin))]
pub fn apply(resources: &ResourceSet, patch: &Patch, keys: &MergeKeys) -> Result<ResourceSet> {
    let targets: Vec<&Resource> = resources
        .iter()
        .filter(|resource| patch.selector.matches(resource.id()))
        .collect();
    ensure!(
        !targets.is_empty(),
        TargetNotFoundSnafu {
            selector: patch.selector.clone()
        }
    );

    let mut patched = resources.clone();
    for target in targets {
        let result = match &patch.body {
            PatchBody::StrategicMerge(body) => merge_into(target, body, keys)?,
            PatchBody::Operations(operations) => run_operations(target, operations)?,
        };
        debug!(target = %target.id(), result = %result.id(), "patched resource");
        patched
            .replace(target.id(), result)
            .context(CollisionSnafu)?;
    }

    Ok(patched)
}

fn merge_into(target: &Resource, body: &Map<String, Value>, keys: &MergeKeys) -> Result<Resource> {
    // The body may name its target, that name must not rename anything.
    let mut body = body.clone();
    if let Some(Value::Object(metadata)) = body.get_mut("metadata") {
        metadata.shift_remove("name");
        metadata.shift_remove("namespace");
    }

    target.merge_partial(&body, keys).context(MergeSnafu {
        id: target.id().clone(),
    })
}

fn run_operations(target: &Resource, operations: &[Operation]) -> Result<Resource> {
    let id = target.id();
    let mut document = target.to_value();

    for (index, operation) in operations.iter().enumerate() {
        let resolved = operation
            .to_json_patch(&document)
            .context(PrepareOperationSnafu {
                id: id.clone(),
                operation: index,
            })?;
        json_patch::patch(&mut document, std::slice::from_ref(&resolved)).context(
            ApplyOperationSnafu {
                id: id.clone(),
                operation: index,
            },
        )?;
    }

    Resource::from_value(document).context(InvalidResultSnafu { id: id.clone() })
}
