//! Resolution of the base/overlay graph into a [`BuildPlan`].
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{debug, instrument, trace};

use crate::{
    error::{ClassifyError, ErrorKind},
    fs::{FileSystem, normalize},
    loader::{self, LoadedDirectory, Loader},
    resource::{DuplicateResourceError, ResourceSet},
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to load directory {}", directory.display()))]
    Load {
        directory: PathBuf,
        source: loader::Error,
    },

    #[snafu(display(
        "base {} referenced by {} does not exist",
        base.display(),
        referenced_by.display()
    ))]
    MissingBase {
        base: PathBuf,
        referenced_by: PathBuf,
    },

    #[snafu(display("cyclic reference {}", format_cycle(cycle)))]
    CyclicReference { cycle: Vec<PathBuf> },

    #[snafu(display("build plan has no step {index}"))]
    UnknownStep { index: usize },

    #[snafu(display(
        "base step {base} of {} has no final resource set yet",
        directory.display()
    ))]
    UnresolvedBase { directory: PathBuf, base: usize },

    #[snafu(display("{} inherits a resource more than once", directory.display()))]
    DuplicateResource {
        directory: PathBuf,
        source: DuplicateResourceError,
    },
}

impl ClassifyError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Load { source, .. } => source.kind(),
            Self::MissingBase { .. } => ErrorKind::MissingBase,
            Self::CyclicReference { .. } => ErrorKind::CyclicReference,
            Self::UnknownStep { .. } | Self::UnresolvedBase { .. } => ErrorKind::NotFound,
            Self::DuplicateResource { source, .. } => source.kind(),
        }
    }
}

fn format_cycle(cycle: &[PathBuf]) -> String {
    cycle
        .iter()
        .map(|directory| directory.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// One directory of a [`BuildPlan`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanStep {
    pub directory: LoadedDirectory,

    /// Indices of the steps of the directory's bases, in declaration order.
    pub bases: Vec<usize>,
}

/// The directories taking part in a composition, in post-order: every
/// directory comes after all of its bases, the root comes last.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildPlan {
    steps: Vec<PlanStep>,
}

impl BuildPlan {
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The step of the root directory.
    pub fn root(&self) -> Option<&PlanStep> {
        self.steps.last()
    }

    /// Computes the set a directory starts from before its own patches run.
    ///
    /// `finals` holds the final sets of all previous steps, indexed like
    /// [`BuildPlan::steps`]. The result contains the final sets of the bases
    /// of step `index`, in declaration order, followed by the directory's own
    /// resources.
    pub fn inherited(&self, index: usize, finals: &[ResourceSet]) -> Result<ResourceSet> {
        let step = self.steps.get(index).context(UnknownStepSnafu { index })?;
        let context = || DuplicateResourceSnafu {
            directory: step.directory.path.clone(),
        };

        let mut inherited = ResourceSet::new();
        for &base in &step.bases {
            let base_final = finals.get(base).with_context(|| UnresolvedBaseSnafu {
                directory: step.directory.path.clone(),
                base,
            })?;
            inherited.extend_from(base_final).with_context(|_| context())?;
        }
        inherited
            .extend_from(&step.directory.resources)
            .with_context(|_| context())?;

        Ok(inherited)
    }
}

/// State of one resolution run.
#[derive(Debug, Default)]
struct ResolutionContext {
    /// Directories currently being resolved, outermost first.
    in_progress: Vec<PathBuf>,

    /// Step index of every directory resolved so far.
    resolved: HashMap<PathBuf, usize>,

    steps: Vec<PlanStep>,
}

pub struct Resolver<F> {
    loader: Loader<F>,
}

impl<F: FileSystem> Resolver<F> {
    pub fn new(fs: F) -> Self {
        Self {
            loader: Loader::new(fs),
        }
    }

    /// Loads `root` and everything it transitively references.
    ///
    /// Directories referenced more than once are loaded once and shared by
    /// index.
    #[instrument(skip(self), fields(root = %root.display()))]
    pub fn resolve(&self, root: &Path) -> Result<BuildPlan> {
        let mut context = ResolutionContext::default();
        self.visit(&normalize(root), &mut context)?;

        debug!(directories = context.steps.len(), "resolved build plan");
        Ok(BuildPlan {
            steps: context.steps,
        })
    }

    fn visit(&self, directory: &Path, context: &mut ResolutionContext) -> Result<usize> {
        if let Some(&index) = context.resolved.get(directory) {
            trace!(directory = %directory.display(), index, "directory already resolved");
            return Ok(index);
        }
        if let Some(start) = context.in_progress.iter().position(|d| d == directory) {
            let mut cycle = context.in_progress[start..].to_vec();
            cycle.push(directory.to_path_buf());
            return CyclicReferenceSnafu { cycle }.fail();
        }

        let loaded = self.loader.load(directory).context(LoadSnafu { directory })?;

        context.in_progress.push(directory.to_path_buf());
        let mut bases = Vec::with_capacity(loaded.bases.len());
        for base in &loaded.bases {
            ensure!(
                self.loader.file_system().is_dir(base),
                MissingBaseSnafu {
                    base,
                    referenced_by: directory,
                }
            );
            bases.push(self.visit(base, context)?);
        }
        context.in_progress.pop();

        let index = context.steps.len();
        trace!(directory = %directory.display(), index, "planned directory");
        context.steps.push(PlanStep {
            directory: loaded,
            bases,
        });
        context.resolved.insert(directory.to_path_buf(), index);
        Ok(index)
    }
}
