//! Serialization of composed resources as YAML.
use std::{
    collections::{HashMap, hash_map::Entry},
    io::Write,
    path::{Path, PathBuf},
};

use snafu::{ResultExt, Snafu};
use strum::{Display, EnumString};
use tracing::debug;

use crate::resource::{Resource, ResourceId, ResourceSet};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize {id} as YAML"))]
    SerializeYaml {
        id: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("failed to write YAML document separator"))]
    WriteDocumentSeparator { source: std::io::Error },

    #[snafu(display("failed to write YAML document"))]
    WriteDocument { source: std::io::Error },

    #[snafu(display("failed to create output directory {}", path.display()))]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to write {}", path.display()))]
    WriteToFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("resources {first} and {second} both map to file name {file_name}"))]
    FileNameCollision {
        file_name: String,
        first: String,
        second: String,
    },
}

/// The order in which resources are written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum EmitOrder {
    /// Sorted by kind, then namespace, then name.
    #[default]
    Identity,

    /// The order in which the resources were composed.
    Composition,
}

impl EmitOrder {
    fn arrange(self, resources: &ResourceSet) -> Vec<&Resource> {
        match self {
            Self::Identity => resources.sorted(),
            Self::Composition => resources.iter().collect(),
        }
    }
}

/// Provides configurable options during emission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmitOptions {
    pub order: EmitOrder,

    /// Adds leading triple dashes (`---`) to the first document as well.
    pub explicit_document: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            order: EmitOrder::default(),
            explicit_document: true,
        }
    }
}

/// Writes every resource as its own YAML document, separated by `---`.
pub fn emit<W: Write>(resources: &ResourceSet, mut writer: W, options: &EmitOptions) -> Result<()> {
    for (index, resource) in options.order.arrange(resources).into_iter().enumerate() {
        if index > 0 || options.explicit_document {
            writer
                .write_all(b"---\n")
                .context(WriteDocumentSeparatorSnafu)?;
        }
        let document = to_document(resource)?;
        writer
            .write_all(document.as_bytes())
            .context(WriteDocumentSnafu)?;
    }
    Ok(())
}

pub fn to_yaml_string(resources: &ResourceSet, options: &EmitOptions) -> Result<String> {
    let mut buffer = Vec::new();
    emit(resources, &mut buffer, options)?;
    // serde_yaml only produces UTF-8.
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Writes one file per resource into `directory`, creating it if needed.
///
/// Files are named `{namespace}_{kind}_{name}.yaml`, lowercased. Returns the
/// written paths in emission order. Nothing is written if two resources map to
/// the same file name or any resource fails to serialize.
pub fn write_itemized(
    resources: &ResourceSet,
    directory: &Path,
    options: &EmitOptions,
) -> Result<Vec<PathBuf>> {
    let arranged = options.order.arrange(resources);

    // File name to the resource which claimed it.
    let mut seen: HashMap<String, &ResourceId> = HashMap::new();
    let mut files = Vec::with_capacity(arranged.len());
    for resource in arranged {
        let file_name = file_name(resource);
        match seen.entry(file_name.clone()) {
            Entry::Occupied(first) => {
                return FileNameCollisionSnafu {
                    file_name,
                    first: first.get().to_string(),
                    second: resource.id().to_string(),
                }
                .fail();
            }
            Entry::Vacant(entry) => {
                entry.insert(resource.id());
            }
        }

        let mut contents = String::new();
        if options.explicit_document {
            contents.push_str("---\n");
        }
        contents.push_str(&to_document(resource)?);
        files.push((directory.join(file_name), contents));
    }

    std::fs::create_dir_all(directory).context(CreateDirectorySnafu { path: directory })?;

    let mut written = Vec::with_capacity(files.len());
    for (path, contents) in files {
        std::fs::write(&path, contents).context(WriteToFileSnafu { path: &path })?;
        debug!(path = %path.display(), "wrote resource");
        written.push(path);
    }
    Ok(written)
}

fn file_name(resource: &Resource) -> String {
    format!(
        "{}_{}_{}.yaml",
        resource.namespace(),
        resource.kind(),
        resource.name()
    )
    .to_lowercase()
}

fn to_document(resource: &Resource) -> Result<String> {
    serde_yaml::to_string(resource).context(SerializeYamlSnafu {
        id: resource.id().to_string(),
    })
}
