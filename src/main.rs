// src/main.rs

mod cli;
mod diff;
mod error;
mod mapper;
mod model;
mod profile;
mod repo;
mod report;
mod reserved;
mod syntax;
mod trim;
mod vcs;

use anyhow::Context;
use clap::Parser;
use cli::{Args, Backend, BranchArgs, Command, OutputMode};
use diff::BranchDiff;
use log::{error, info};
use mapper::{Converter, PackageResolver};
use model::{BranchesInfo, Packages, ReservedInfo};
use report::Summary;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use vcs::{GitCommand, VcsProvider};

const FULL_JSON: &str = "full.json";
const DIFF_JSON: &str = "diff.json";

fn main() {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let start_time = Instant::now();
    if let Err(e) = run(&args) {
        error!("{e:#}");
        std::process::exit(1);
    }
    info!("Total time: {:.2?}", start_time.elapsed());
}

fn run(args: &Args) -> anyhow::Result<()> {
    match &args.command {
        Command::Convert {
            profiles,
            output_mode,
            diff,
            branches,
            out_dir,
        } => convert(args, profiles, *output_mode, diff.as_deref(), branches, out_dir),
        Command::Diff { branches } => {
            let vcs = open_vcs(args)?;
            let diff = compute_diff(vcs.as_ref(), branches)?;
            diff.write_to(io::stdout().lock())?;
            Ok(())
        }
        Command::Trim { coverage, diff } => {
            let trimmed = trim::trim_file(coverage, diff)
                .with_context(|| format!("trimming {} with {}", coverage.display(), diff.display()))?;
            trimmed.to_writer(io::stdout().lock())?;
            Ok(())
        }
        Command::Merge { coverage } => {
            let merged = Packages::read_files(coverage).context("merging coverage documents")?;
            merged.to_writer(io::stdout().lock())?;
            Ok(())
        }
    }
}

fn open_vcs(args: &Args) -> anyhow::Result<Box<dyn VcsProvider>> {
    Ok(match args.backend {
        Backend::Git => Box::new(
            GitCommand::open(&args.repo, Duration::from_secs(args.git_timeout))
                .with_context(|| format!("finding the work tree of {}", args.repo.display()))?,
        ),
        Backend::Libgit2 => Box::new(
            repo::GitRepository::open(&args.repo)
                .with_context(|| format!("opening repository at {}", args.repo.display()))?,
        ),
    })
}

fn compute_diff(vcs: &dyn VcsProvider, branches: &BranchArgs) -> anyhow::Result<BranchDiff> {
    let diff_start = Instant::now();
    let diff = BranchDiff::compute(
        vcs,
        branches.current_branch.as_deref(),
        &branches.target_branch,
        branches.hash_ids_range.as_ref(),
    )
    .context("computing branch diff")?;
    info!(
        "Diff finished in {:.2?}. Found {} changed files in {} commits.",
        diff_start.elapsed(),
        diff.files.values().filter(|lines| !lines.is_empty()).count(),
        diff.commits.len()
    );
    Ok(diff)
}

fn convert(
    args: &Args,
    profiles: &[PathBuf],
    output_mode: OutputMode,
    artifact: Option<&Path>,
    branches: &BranchArgs,
    out_dir: &Path,
) -> anyhow::Result<()> {
    let convert_start = Instant::now();
    let mut converter = Converter::new(PackageResolver::new(&args.repo))?;
    let packages = converter
        .convert_files(profiles)
        .context("converting coverage profiles")?;
    info!(
        "Conversion finished in {:.2?}. Found {} packages, {} statements.",
        convert_start.elapsed(),
        packages.len(),
        packages.statement_count()
    );

    if output_mode == OutputMode::JsonOnly {
        packages.to_writer(io::stdout().lock())?;
        return Ok(());
    }
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;

    if output_mode.wants_full() {
        let current = open_vcs(args)?.current_branch_name()?;
        let info = BranchesInfo {
            current_branch_name: current,
            ..Default::default()
        };
        write_json(&packages, &out_dir.join(FULL_JSON))?;
        Summary::new("full coverage", &packages, Some(&info)).write_to(io::stdout().lock(), chrono::Utc::now())?;
    }

    if output_mode.wants_diff() {
        let reserved = match artifact {
            Some(path) => ReservedInfo::load(path).with_context(|| format!("loading {}", path.display()))?,
            None => {
                let diff = compute_diff(open_vcs(args)?.as_ref(), branches)?;
                ReservedInfo {
                    branches: diff.branches_info(),
                    rules: diff.to_reserved_rules(),
                }
            }
        };
        let trimmed = trim::trim_packages(&packages, &reserved.rules)?;
        write_json(&trimmed, &out_dir.join(DIFF_JSON))?;
        Summary::new("diff coverage", &trimmed, Some(&reserved.branches))
            .write_to(io::stdout().lock(), chrono::Utc::now())?;
    }
    Ok(())
}

fn write_json(packages: &Packages, path: &Path) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    packages.to_writer(&mut writer)?;
    writer.flush()?;
    info!("Wrote {}", path.display());
    Ok(())
}
