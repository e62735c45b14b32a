//! Drives a composition from the root directory to the final resource set.
use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};
use tracing::{debug, info, instrument};

use crate::{
    error::{ClassifyError, ErrorKind},
    fs::FileSystem,
    merge::MergeKeys,
    patch::{self, PatchOrigin},
    resolver::{self, BuildPlan, Resolver},
    resource::ResourceSet,
    transform,
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to resolve the directories referenced by {}", root.display()))]
    Resolve {
        root: PathBuf,
        source: resolver::Error,
    },

    #[snafu(display("failed to collect the inherited resources of {}", directory.display()))]
    Inherit {
        directory: PathBuf,
        source: resolver::Error,
    },

    #[snafu(display("failed to apply patch {index} ({origin}) of {}", directory.display()))]
    ApplyPatch {
        directory: PathBuf,
        index: usize,
        origin: PatchOrigin,
        source: patch::Error,
    },

    #[snafu(display("failed to run the transformers of {}", directory.display()))]
    Transform {
        directory: PathBuf,
        source: transform::Error,
    },
}

impl ClassifyError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Resolve { source, .. } | Self::Inherit { source, .. } => source.kind(),
            Self::ApplyPatch { source, .. } => source.kind(),
            Self::Transform { source, .. } => source.kind(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComposeOptions {
    /// Merge keys used by strategic merge patches.
    pub merge_keys: MergeKeys,
}

/// Composes source directories read from a [`FileSystem`].
///
/// A `Composer` holds no state between compositions.
pub struct Composer<F> {
    resolver: Resolver<F>,
    options: ComposeOptions,
}

impl<F: FileSystem> Composer<F> {
    pub fn new(fs: F, options: ComposeOptions) -> Self {
        Self {
            resolver: Resolver::new(fs),
            options,
        }
    }

    /// Resolves the [`BuildPlan`] of `root` without composing it.
    pub fn plan(&self, root: impl AsRef<Path>) -> Result<BuildPlan> {
        let root = root.as_ref();
        self.resolver.resolve(root).context(ResolveSnafu { root })
    }

    /// Composes `root` and returns its final resource set.
    ///
    /// Every directory of the plan starts from its inherited resources (see
    /// [`BuildPlan::inherited`]), applies its own patches in order and finally
    /// runs its transformers. The first failure aborts the composition.
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub fn compose(&self, root: impl AsRef<Path>) -> Result<ResourceSet> {
        let plan = self.plan(root)?;

        let mut finals: Vec<ResourceSet> = Vec::with_capacity(plan.len());
        for (index, step) in plan.steps().iter().enumerate() {
            let directory = &step.directory;
            let mut resources = plan
                .inherited(index, &finals)
                .context(InheritSnafu {
                    directory: &directory.path,
                })?;

            for (patch_index, patch) in directory.patches.iter().enumerate() {
                resources = patch::apply(&resources, patch, &self.options.merge_keys).context(
                    ApplyPatchSnafu {
                        directory: &directory.path,
                        index: patch_index,
                        origin: patch.origin.clone(),
                    },
                )?;
            }

            let resources = directory
                .transformers
                .apply(&resources)
                .context(TransformSnafu {
                    directory: &directory.path,
                })?;

            debug!(
                directory = %directory.path.display(),
                resources = resources.len(),
                "composed directory"
            );
            finals.push(resources);
        }

        let composed = finals.pop().unwrap_or_default();
        info!(
            directories = plan.len(),
            resources = composed.len(),
            "composition finished"
        );
        Ok(composed)
    }
}
