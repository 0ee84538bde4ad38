// src/profile.rs

use crate::error::{CoverError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

static BLOCK_LINE: OnceLock<Regex> = OnceLock::new();

fn block_line() -> &'static Regex {
    BLOCK_LINE.get_or_init(|| {
        Regex::new(r"^(.+):([0-9]+)\.([0-9]+),([0-9]+)\.([0-9]+) ([0-9]+) ([0-9]+)$")
            .expect("block line pattern is valid")
    })
}

/// How the instrumented binary counted executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Set,
    Count,
    Atomic,
}

impl Mode {
    fn parse(value: &str) -> Option<Mode> {
        match value {
            "set" => Some(Mode::Set),
            "count" => Some(Mode::Count),
            "atomic" => Some(Mode::Atomic),
            _ => None,
        }
    }
}

/// A contiguous source range and its execution count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileBlock {
    pub start_line: usize,
    pub start_col: usize,
    pub end_line: usize,
    pub end_col: usize,
    pub num_stmt: usize,
    /// Execution count; never negative.
    pub count: i64,
}

impl ProfileBlock {
    fn position(&self) -> (usize, usize, usize, usize) {
        (self.start_line, self.start_col, self.end_line, self.end_col)
    }
}

/// All blocks recorded for one source file, sorted by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Import path of the file as written by the coverage tool.
    pub file_name: String,
    pub mode: Mode,
    pub blocks: Vec<ProfileBlock>,
}

/// Reads a coverage profile from disk.
pub fn parse_profiles(path: &Path) -> Result<Vec<Profile>> {
    let content = std::fs::read_to_string(path).map_err(|e| CoverError::FileNotFound {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_profile_content(path, &content)
}

/// Parses the text of a coverage profile. `path` is only used in errors.
///
/// Profiles are returned ordered by file name. Blocks covering the same range
/// are merged: in `set` mode the block is hit if either record was, otherwise
/// the counts are summed.
pub fn parse_profile_content(path: &Path, content: &str) -> Result<Vec<Profile>> {
    let format_error = |line: usize, message: String| CoverError::ProfileFormat {
        path: path.to_path_buf(),
        line,
        message,
    };

    let mut mode = None;
    let mut files: BTreeMap<String, Vec<ProfileBlock>> = BTreeMap::new();

    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        if let Some(value) = line.strip_prefix("mode: ") {
            let parsed = Mode::parse(value.trim())
                .ok_or_else(|| format_error(line_no, format!("unknown mode {value:?}")))?;
            // Concatenated profiles repeat the header.
            mode.get_or_insert(parsed);
            continue;
        }
        if mode.is_none() {
            return Err(format_error(line_no, "missing mode line".to_string()));
        }

        let captures = block_line()
            .captures(line)
            .ok_or_else(|| format_error(line_no, format!("line {line:?} doesn't match expected format")))?;
        let number = |group: usize| -> Result<usize> {
            captures[group]
                .parse::<usize>()
                .map_err(|e| format_error(line_no, format!("{}: {e}", &captures[group])))
        };
        let count = captures[7]
            .parse::<i64>()
            .map_err(|e| format_error(line_no, format!("count {}: {e}", &captures[7])))?;
        let block = ProfileBlock {
            start_line: number(2)?,
            start_col: number(3)?,
            end_line: number(4)?,
            end_col: number(5)?,
            num_stmt: number(6)?,
            count,
        };
        files.entry(captures[1].to_string()).or_default().push(block);
    }

    let Some(mode) = mode else {
        return Err(format_error(0, "empty profile".to_string()));
    };

    files
        .into_iter()
        .map(|(file_name, mut blocks)| {
            blocks.sort_by_key(ProfileBlock::position);
            let blocks = merge_duplicates(blocks, mode)
                .map_err(|message| format_error(0, format!("{file_name}: {message}")))?;
            Ok(Profile {
                file_name,
                mode,
                blocks,
            })
        })
        .collect()
}

fn merge_duplicates(blocks: Vec<ProfileBlock>, mode: Mode) -> std::result::Result<Vec<ProfileBlock>, String> {
    let mut merged: Vec<ProfileBlock> = Vec::with_capacity(blocks.len());
    for block in blocks {
        match merged.last_mut() {
            Some(last) if last.position() == block.position() => {
                if last.num_stmt != block.num_stmt {
                    return Err(format!(
                        "inconsistent NumStmt at {}.{}: changed from {} to {}",
                        block.start_line, block.start_col, last.num_stmt, block.num_stmt
                    ));
                }
                if mode == Mode::Set {
                    last.count |= block.count;
                } else {
                    last.count = last.count.checked_add(block.count).ok_or_else(|| {
                        format!("count overflow at {}.{}", block.start_line, block.start_col)
                    })?;
                }
            }
            _ => merged.push(block),
        }
    }
    Ok(merged)
}
