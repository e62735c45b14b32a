use std::{io::Write, path::PathBuf};

use clap::Parser;
use snafu::{ResultExt, Snafu};
use stackable_overlay::{
    ClassifyError,
    composer::{self, ComposeOptions, Composer},
    emitter::{self, EmitOptions},
    fs::DiskFileSystem,
    merge::MergeKeys,
};
use tracing::info;

use crate::cli::{BuildArguments, Cli, Command, PlanArguments};

mod cli;
mod logging;

const APP_NAME: &str = "stackable-overlay";
const LOG_ENV: &str = "STACKABLE_OVERLAY_LOG";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to compose {} ({kind})", directory.display()))]
    Compose {
        directory: PathBuf,
        kind: stackable_overlay::ErrorKind,
        source: composer::Error,
    },

    #[snafu(display("failed to plan {} ({kind})", directory.display()))]
    Plan {
        directory: PathBuf,
        kind: stackable_overlay::ErrorKind,
        source: composer::Error,
    },

    #[snafu(display("failed to render manifests"))]
    RenderOutput { source: emitter::Error },

    #[snafu(display("failed to write manifests to {}", path.display()))]
    WriteOutput {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to write itemized manifests to {}", path.display()))]
    WriteItemized {
        path: PathBuf,
        source: emitter::Error,
    },

    #[snafu(display("failed to write manifests to stdout"))]
    WriteStdout { source: std::io::Error },

    #[snafu(display("failed to write the build plan to stdout"))]
    WritePlan { source: std::io::Error },
}

#[snafu::report]
fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    logging::initialize_logging(LOG_ENV, APP_NAME).context(InitializeLoggingSnafu)?;

    match cli.command {
        Command::Build(arguments) => build(arguments),
        Command::Plan(arguments) => plan(&arguments),
    }
}

fn build(arguments: BuildArguments) -> Result<(), Error> {
    let mut merge_keys = MergeKeys::default();
    merge_keys.extend(arguments.merge_keys);

    let composer = Composer::new(DiskFileSystem, ComposeOptions { merge_keys });
    let resources = composer
        .compose(&arguments.directory)
        .map_err(|source| Error::Compose {
            directory: arguments.directory.clone(),
            kind: source.kind(),
            source,
        })?;

    let options = EmitOptions {
        order: arguments.order,
        explicit_document: !arguments.no_document_marker,
    };
    match (arguments.output, arguments.itemize) {
        (Some(directory), true) => {
            let written = emitter::write_itemized(&resources, &directory, &options)
                .context(WriteItemizedSnafu { path: &directory })?;
            info!(directory = %directory.display(), files = written.len(), "wrote itemized manifests");
        }
        // The output file is only touched once rendering succeeded.
        (Some(path), false) => {
            let yaml = emitter::to_yaml_string(&resources, &options).context(RenderOutputSnafu)?;
            std::fs::write(&path, yaml).context(WriteOutputSnafu { path: &path })?;
            info!(path = %path.display(), resources = resources.len(), "wrote manifests");
        }
        (None, _) => {
            let yaml = emitter::to_yaml_string(&resources, &options).context(RenderOutputSnafu)?;
            std::io::stdout()
                .lock()
                .write_all(yaml.as_bytes())
                .context(WriteStdoutSnafu)?;
        }
    }
    Ok(())
}

fn plan(arguments: &PlanArguments) -> Result<(), Error> {
    let composer = Composer::new(DiskFileSystem, ComposeOptions::default());
    let plan = composer
        .plan(&arguments.directory)
        .map_err(|source| Error::Plan {
            directory: arguments.directory.clone(),
            kind: source.kind(),
            source,
        })?;

    let mut stdout = std::io::stdout().lock();
    for step in plan.steps() {
        let directory = &step.directory;
        writeln!(
            stdout,
            "{}\t{} resources\t{} patches",
            directory.path.display(),
            directory.resources.len(),
            directory.patches.len()
        )
        .context(WritePlanSnafu)?;
    }
    Ok(())
}
