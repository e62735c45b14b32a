use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use stackable_overlay::{emitter::EmitOrder, merge::MergeKeyRule};

#[derive(Debug, Parser)]
#[command(
    name = "stackable-overlay",
    author,
    version,
    about = "Composes base and overlay directories into Kubernetes manifests"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Composes a directory and writes the resulting manifests.
    Build(BuildArguments),

    /// Prints the directories taking part in a composition, bases first.
    Plan(PlanArguments),
}

#[derive(Debug, Args)]
pub struct BuildArguments {
    /// The directory to compose.
    pub directory: PathBuf,

    /// Writes to this file instead of stdout. With --itemize, this is a
    /// directory receiving one file per resource.
    #[arg(long, short, env = "STACKABLE_OVERLAY_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Writes one file per resource into the --output directory.
    #[arg(long, requires = "output")]
    pub itemize: bool,

    /// The order of the emitted resources, either identity or composition.
    #[arg(long, default_value_t, env = "STACKABLE_OVERLAY_ORDER")]
    pub order: EmitOrder,

    /// Declares an additional merge key for sequences stored under FIELD.
    /// Can be given multiple times.
    #[arg(
        long = "merge-key",
        value_name = "FIELD=KEY[,KEY]",
        env = "STACKABLE_OVERLAY_MERGE_KEYS",
        value_delimiter = ';'
    )]
    pub merge_keys: Vec<MergeKeyRule>,

    /// Omits the `---` marker in front of the first document.
    #[arg(long)]
    pub no_document_marker: bool,
}

#[derive(Debug, Args)]
pub struct PlanArguments {
    /// The directory to plan.
    pub directory: PathBuf,
}
