// src/cli.rs

use crate::diff::HashIdsRange;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Full and incremental coverage reports for Go profiles", long_about = None)]
pub struct Args {
    /// Path inside the git repository (and Go module) to work on
    #[arg(short, long, global = true, default_value = ".")]
    pub repo: PathBuf,

    /// How version control is queried
    #[arg(long, value_enum, global = true, default_value_t = Backend::Git)]
    pub backend: Backend,

    /// Upper bound, in seconds, on every git invocation
    #[arg(long, global = true, default_value_t = 60)]
    pub git_timeout: u64,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Convert coverage profiles into full and diff coverage
    Convert {
        /// Coverage profiles written by `go test -coverprofile`
        #[arg(required = true)]
        profiles: Vec<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = OutputMode::All)]
        output_mode: OutputMode,

        /// Diff file written by the `diff` command, used instead of querying git
        #[arg(short, long)]
        diff: Option<PathBuf>,

        #[command(flatten)]
        branches: BranchArgs,

        /// Directory receiving full.json and diff.json
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Print the lines changed on the current branch
    Diff {
        #[command(flatten)]
        branches: BranchArgs,
    },

    /// Narrow a coverage document to the lines of a diff file
    Trim {
        coverage: PathBuf,

        #[arg(short, long)]
        diff: PathBuf,
    },

    /// Sum several coverage documents ("-" reads stdin)
    Merge {
        #[arg(required = true)]
        coverage: Vec<PathBuf>,
    },
}

/// Which branches, and which of their commits, a diff covers.
#[derive(ClapArgs, Debug, Clone)]
pub struct BranchArgs {
    /// The current branch under test; defaults to the checked-out branch
    #[arg(short, long)]
    pub current_branch: Option<String>,

    /// The branch that was compared to find the difference
    #[arg(short, long, default_value = "master")]
    pub target_branch: String,

    /// The range of commits to keep, format: 'start-hash-id,end-hash-id'
    #[arg(short = 'i', long)]
    pub hash_ids_range: Option<HashIdsRange>,
}

#[derive(clap::ValueEnum, Clone, Debug, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Full and diff coverage
    All,
    FullOnly,
    DiffOnly,
    /// Full coverage JSON on stdout, nothing else
    JsonOnly,
}

impl OutputMode {
    pub fn wants_full(self) -> bool {
        matches!(self, OutputMode::All | OutputMode::FullOnly)
    }

    pub fn wants_diff(self) -> bool {
        matches!(self, OutputMode::All | OutputMode::DiffOnly)
    }
}

#[derive(clap::ValueEnum, Clone, Debug, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Run the git executable
    Git,
    /// Read the repository through libgit2
    Libgit2,
}
