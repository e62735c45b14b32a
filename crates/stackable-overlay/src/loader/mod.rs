//! Reads single source directories.
//!
//! The [`Loader`] reads the declaration file of a directory together with the
//! resource documents and patches it references. Bases are only recorded,
//! resolving them is the job of the [`resolver`](crate::resolver).
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, instrument, trace};

use crate::{
    error::{ClassifyError, ErrorKind},
    fs::{FileSystem, normalize},
    patch::{ParsePatchError, Patch, PatchOrigin, Selector},
    resource::{self, DuplicateResourceError, Resource, ResourceSet},
    transform::Transformers,
};

mod kustomization;

pub use kustomization::*;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("directory {} does not exist", directory.display()))]
    DirectoryNotFound { directory: PathBuf },

    #[snafu(display(
        "directory {} has no declaration file (expected one of {DECLARATION_FILE_NAMES:?})",
        directory.display()
    ))]
    MissingDeclaration { directory: PathBuf },

    #[snafu(display("{} referenced by {} does not exist", path.display(), declaration.display()))]
    MissingFile { path: PathBuf, declaration: PathBuf },

    #[snafu(display("failed to read {}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse declaration file {}", path.display()))]
    ParseDeclaration {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[snafu(display("failed to parse document {index} of {}", path.display()))]
    ParseDocument {
        path: PathBuf,
        index: usize,
        source: serde_yaml::Error,
    },

    #[snafu(display("document {index} of {} is not a valid resource", path.display()))]
    InvalidResource {
        path: PathBuf,
        index: usize,
        source: resource::Error,
    },

    #[snafu(display("{} declares a resource which already exists in {}", path.display(), directory.display()))]
    DuplicateResource {
        path: PathBuf,
        directory: PathBuf,
        source: DuplicateResourceError,
    },

    #[snafu(display("{field} entry {index} in {} must set exactly one of \"patch\" and \"path\"", declaration.display()))]
    AmbiguousPatchSource {
        declaration: PathBuf,
        field: &'static str,
        index: usize,
    },

    #[snafu(display("{field} entry {index} in {} has no target", declaration.display()))]
    MissingPatchTarget {
        declaration: PathBuf,
        field: &'static str,
        index: usize,
    },

    #[snafu(display("invalid patch in {field} entry {index} of {}", declaration.display()))]
    InvalidPatch {
        declaration: PathBuf,
        field: &'static str,
        index: usize,
        source: ParsePatchError,
    },
}

impl ClassifyError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::DirectoryNotFound { .. }
            | Self::MissingDeclaration { .. }
            | Self::MissingFile { .. }
            | Self::ReadFile { .. } => ErrorKind::NotFound,
            Self::ParseDeclaration { .. }
            | Self::ParseDocument { .. }
            | Self::AmbiguousPatchSource { .. }
            | Self::MissingPatchTarget { .. }
            | Self::InvalidPatch { .. } => ErrorKind::ParseError,
            Self::InvalidResource { source, .. } => source.kind(),
            Self::DuplicateResource { source, .. } => source.kind(),
        }
    }
}

/// Everything a single source directory declares.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedDirectory {
    /// The normalized path of the directory.
    pub path: PathBuf,

    /// The path of the declaration file.
    pub declaration: PathBuf,

    /// The resources declared by the directory itself, in declaration order.
    pub resources: ResourceSet,

    /// Normalized paths of the referenced base directories, in declaration
    /// order. Their existence is not checked.
    pub bases: Vec<PathBuf>,

    /// Patches in the order they are applied.
    pub patches: Vec<Patch>,

    pub transformers: Transformers,
}

pub struct Loader<F> {
    fs: F,
}

impl<F: FileSystem> Loader<F> {
    pub fn new(fs: F) -> Self {
        Self { fs }
    }

    pub fn file_system(&self) -> &F {
        &self.fs
    }

    /// Loads `directory` without descending into its bases.
    ///
    /// Entries of `resources` are treated as files if they exist as a file
    /// or carry a YAML or JSON file extension. Everything else is a base.
    ///
    /// Patches are ordered by list first (`patchesStrategicMerge`,
    /// `patchesJson6902`, then `patches`) and by position within each list.
    #[instrument(skip(self), fields(directory = %directory.display()))]
    pub fn load(&self, directory: &Path) -> Result<LoadedDirectory> {
        let directory = normalize(directory);
        ensure!(
            self.fs.is_dir(&directory),
            DirectoryNotFoundSnafu {
                directory: directory.clone()
            }
        );

        let declaration = DECLARATION_FILE_NAMES
            .iter()
            .map(|name| directory.join(name))
            .find(|path| self.fs.is_file(path))
            .ok_or_else(|| {
                MissingDeclarationSnafu {
                    directory: directory.clone(),
                }
                .build()
            })?;
        let kustomization = self.read_declaration(&declaration)?;

        let mut resources = ResourceSet::new();
        let mut bases = Vec::new();
        for entry in &kustomization.resources {
            let path = normalize(&directory.join(entry));
            if self.fs.is_dir(&path) || !(self.fs.is_file(&path) || has_document_extension(&path)) {
                trace!(base = %path.display(), "found base in resources");
                bases.push(path);
                continue;
            }

            let contents = self.read(&path, &declaration)?;
            for resource in parse_resources(&path, &contents)? {
                resources
                    .insert(resource)
                    .context(DuplicateResourceSnafu {
                        path: path.clone(),
                        directory: directory.clone(),
                    })?;
            }
        }
        bases.extend(
            kustomization
                .bases
                .iter()
                .map(|base| normalize(&directory.join(base))),
        );

        let patches = self.load_patches(&directory, &declaration, &kustomization)?;

        debug!(
            resources = resources.len(),
            bases = bases.len(),
            patches = patches.len(),
            "loaded directory"
        );
        Ok(LoadedDirectory {
            transformers: kustomization.transformers(),
            path: directory,
            declaration,
            resources,
            bases,
            patches,
        })
    }

    fn read_declaration(&self, path: &Path) -> Result<Kustomization> {
        let contents = self.read(path, path)?;
        if contents.trim().is_empty() {
            return Ok(Kustomization::default());
        }
        serde_yaml::from_str(&contents).context(ParseDeclarationSnafu { path })
    }

    fn read(&self, path: &Path, declaration: &Path) -> Result<String> {
        ensure!(
            self.fs.is_file(path),
            MissingFileSnafu {
                path,
                declaration
            }
        );
        self.fs.read_to_string(path).context(ReadFileSnafu { path })
    }

    fn load_patches(
        &self,
        directory: &Path,
        declaration: &Path,
        kustomization: &Kustomization,
    ) -> Result<Vec<Patch>> {
        let mut patches = Vec::new();

        for (index, source) in kustomization.patches_strategic_merge.iter().enumerate() {
            let field = "patchesStrategicMerge";
            let source = match source {
                PatchSource::Text(path) if !path.contains('\n') => {
                    ResolvedSource::File(normalize(&directory.join(path)))
                }
                other => ResolvedSource::Inline(other.clone()),
            };
            patches.extend(self.resolve_patches(source, None, declaration, field, index)?);
        }

        let declared = [
            ("patchesJson6902", &kustomization.patches_json6902, true),
            ("patches", &kustomization.patches, false),
        ];
        for (field, declarations, target_required) in declared {
            for (index, entry) in declarations.iter().enumerate() {
                ensure!(
                    entry.target.is_some() || !target_required,
                    MissingPatchTargetSnafu {
                        declaration,
                        field,
                        index
                    }
                );
                let source = match (&entry.patch, &entry.path) {
                    (Some(inline), None) => ResolvedSource::Inline(inline.clone()),
                    (None, Some(path)) => ResolvedSource::File(normalize(&directory.join(path))),
                    _ => {
                        return AmbiguousPatchSourceSnafu {
                            declaration,
                            field,
                            index,
                        }
                        .fail();
                    }
                };
                patches.extend(self.resolve_patches(
                    source,
                    entry.target.clone(),
                    declaration,
                    field,
                    index,
                )?);
            }
        }

        Ok(patches)
    }

    /// Turns one patch declaration into patches. Multi-document sources
    /// produce one patch per document.
    fn resolve_patches(
        &self,
        source: ResolvedSource,
        target: Option<Selector>,
        declaration: &Path,
        field: &'static str,
        index: usize,
    ) -> Result<Vec<Patch>> {
        let (documents, origin) = match source {
            ResolvedSource::Inline(PatchSource::Document(document)) => {
                (vec![document], PatchOrigin::Inline)
            }
            ResolvedSource::Inline(PatchSource::Text(text)) => {
                (parse_documents(declaration, &text)?, PatchOrigin::Inline)
            }
            ResolvedSource::File(path) => {
                let contents = self.read(&path, declaration)?;
                (parse_documents(&path, &contents)?, PatchOrigin::File(path))
            }
        };

        documents
            .into_iter()
            .map(|document| {
                Patch::from_document(document, target.clone(), origin.clone()).context(
                    InvalidPatchSnafu {
                        declaration,
                        field,
                        index,
                    },
                )
            })
            .collect()
    }
}

enum ResolvedSource {
    Inline(PatchSource),
    File(PathBuf),
}

fn has_document_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| matches!(extension, "yaml" | "yml" | "json"))
}

/// Parses multi-document YAML, skipping empty documents.
pub fn parse_documents(path: &Path, contents: &str) -> Result<Vec<Value>> {
    let mut documents = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(contents).enumerate() {
        let value = Value::deserialize(document).context(ParseDocumentSnafu { path, index })?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

/// Parses multi-document YAML into resources.
///
/// Documents of a `*List` kind carrying an `items` sequence are replaced by
/// their items.
pub fn parse_resources(path: &Path, contents: &str) -> Result<Vec<Resource>> {
    let mut resources = Vec::new();
    for (index, document) in parse_documents(path, contents)?.into_iter().enumerate() {
        let items = match document {
            Value::Object(mut map) if is_list(&map) => match map.shift_remove("items") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            other => vec![other],
        };

        for item in items {
            resources.push(
                Resource::from_value(item).context(InvalidResourceSnafu { path, index })?,
            );
        }
    }
    Ok(resources)
}

fn is_list(document: &serde_json::Map<String, Value>) -> bool {
    document
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.ends_with("List"))
        && document.get("items").is_some_and(Value::is_array)
}
