use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::catalog::SortOrder;
use crate::config::Overrides;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    #[clap(long, global = true, help = "Config file (default ~/.tierlift/config.json)")]
    pub config: Option<PathBuf>,
    #[clap(short, long, global = true, help = "Write a debug log to <log_dir>/tierlift.log")]
    pub verbose: bool,
    #[clap(subcommand)]
    pub command: Commands,
}

/// Values that override the config file for one invocation.
#[derive(Args, Debug, Clone, Default)]
pub struct OverrideArgs {
    #[clap(long, help = "Source root, e.g. onedrive:Work")]
    pub source: Option<String>,
    #[clap(long, help = "Destination root, e.g. gdrive:Migration/")]
    pub dest: Option<String>,
    #[clap(short = 'j', long = "parallel", help = "Concurrent transfers (1 = sequential)")]
    pub parallel: Option<usize>,
    #[clap(long, value_enum, help = "Job ordering")]
    pub order: Option<SortOrder>,
    #[clap(long, help = "Mirror the source base folder under the destination")]
    pub mirror_base: bool,
}

impl OverrideArgs {
    pub fn to_overrides(&self) -> Overrides {
        Overrides {
            source: self.source.clone(),
            dest: self.dest.clone(),
            parallel: self.parallel,
            order: self.order,
            mirror_base: self.mirror_base,
            ..Overrides::default()
        }
    }
}

/// Where jobs come from: a saved listing, a job list file, or a live listing.
#[derive(Args, Debug, Clone, Default)]
pub struct JobSourceArgs {
    #[clap(long, conflicts_with = "from_file", help = "Use a saved listing instead of listing the remote")]
    pub listing: Option<PathBuf>,
    #[clap(long, help = "Execute a job list written by `tl plan`")]
    pub from_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[clap(about = "Write a default config file", display_order = 1)]
    Init {
        #[clap(long, help = "Overwrite an existing file")]
        force: bool,
    },
    #[clap(about = "Show the size tier table", display_order = 2)]
    Tiers {},
    #[clap(about = "List the source remote and show a per-tier breakdown", name = "ls", display_order = 3)]
    List {
        #[clap(flatten)]
        overrides: OverrideArgs,
        #[clap(long, help = "Read a saved listing instead of the remote")]
        listing: Option<PathBuf>,
        #[clap(long, help = "Save the listing as `<size> <path>` lines")]
        save: Option<PathBuf>,
    },
    #[clap(about = "Build jobs and write job list files", display_order = 4)]
    Plan {
        #[clap(flatten)]
        overrides: OverrideArgs,
        #[clap(long, help = "Use a saved listing instead of listing the remote")]
        listing: Option<PathBuf>,
        #[clap(short, long, default_value = ".", help = "Output directory for the job lists")]
        out: PathBuf,
    },
    #[clap(about = "Run the migration", display_order = 5)]
    Run {
        #[clap(flatten)]
        overrides: OverrideArgs,
        #[clap(flatten)]
        jobs: JobSourceArgs,
        #[clap(long, help = "Re-run every job even if its log shows it finished")]
        no_resume: bool,
        #[clap(long, help = "Exit nonzero when any job fails")]
        strict: bool,
        #[clap(long, value_name = "ORDINAL", help = "Skip jobs numbered below ORDINAL")]
        start_from: Option<usize>,
        #[clap(long, help = "Print a single-line JSON summary at the end")]
        json: bool,
        #[clap(short, long, help = "Only print the final summary")]
        quiet: bool,
    },
    #[clap(about = "Show which jobs are already done without running anything", display_order = 6)]
    Status {
        #[clap(flatten)]
        overrides: OverrideArgs,
        #[clap(flatten)]
        jobs: JobSourceArgs,
        #[clap(long, value_name = "ORDINAL", help = "Ignore jobs numbered below ORDINAL")]
        start_from: Option<usize>,
    },
}
