// src/vcs.rs

use crate::error::{CoverError, Result};
use log::debug;
use process_control::{ChildExt, Control};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Length of the commit ids used to attribute lines.
pub const SHORT_ID_LEN: usize = 7;

/// Abbreviates a commit id to [`SHORT_ID_LEN`] characters.
pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

/// What the diff engine needs from version control.
///
/// Paths are relative to the repository work tree.
pub trait VcsProvider: Sync {
    /// Commits reachable from `current` but not from `target`, newest first.
    fn list_commits_between(&self, target: &str, current: &str) -> Result<Vec<String>>;

    /// Files touched by a commit.
    fn list_changed_files(&self, commit_id: &str) -> Result<Vec<String>>;

    /// `(line number, commit id)` for every line of the file, in file order,
    /// ignoring whitespace-only changes. Files missing from the work tree
    /// have no lines.
    fn blame_lines(&self, path: &str) -> Result<Vec<(usize, String)>>;

    fn current_branch_name(&self) -> Result<String>;
}

/// [`VcsProvider`] running the `git` executable with a bounded wait.
///
/// Commands run at the top level of the work tree, where `git show` paths
/// are rooted.
#[derive(Debug, Clone)]
pub struct GitCommand {
    workdir: PathBuf,
    timeout: Duration,
}

impl GitCommand {
    /// Runs in `workdir` as given; it must be the top of the work tree.
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        GitCommand {
            workdir: workdir.into(),
            timeout,
        }
    }

    /// Finds the top of the work tree containing `path`.
    pub fn open(path: &Path, timeout: Duration) -> Result<Self> {
        let output = GitCommand::new(path, timeout).run(&["rev-parse", "--show-toplevel"])?;
        let toplevel = output.lines().next().map(str::trim).unwrap_or_default();
        if toplevel.is_empty() {
            return Err(CoverError::Subprocess {
                command: "git rev-parse --show-toplevel".to_string(),
                status: "exit status: 0".to_string(),
                output: format!("{} is not inside a work tree", path.display()),
            });
        }
        debug!("work tree of {} is {toplevel}", path.display());
        Ok(GitCommand::new(toplevel, timeout))
    }

    /// Runs `git <args>` and returns its stdout.
    fn run(&self, args: &[&str]) -> Result<String> {
        let mut command = Command::new("git");
        command.args(args).current_dir(&self.workdir);
        debug!("running `git {}` in {}", args.join(" "), self.workdir.display());
        run_with_timeout(command, &format!("git {}", args.join(" ")), self.timeout)
    }
}

/// Runs `command` to completion, killing it once `timeout` elapses.
fn run_with_timeout(mut command: Command, description: &str, timeout: Duration) -> Result<String> {
    let failure = |status: String, output: String| CoverError::Subprocess {
        command: description.to_string(),
        status,
        output,
    };

    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| failure("failed to start".to_string(), e.to_string()))?;
    let output = child
        .controlled_with_output()
        .time_limit(timeout)
        .terminate_for_timeout()
        .wait()
        .map_err(|e| failure("wait failed".to_string(), e.to_string()))?
        .ok_or_else(|| failure(format!("timed out after {timeout:?}"), "process terminated".to_string()))?;

    if !output.status.success() {
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(failure(output.status.to_string(), text.trim_end().to_string()));
    }
    String::from_utf8(output.stdout)
        .map_err(|e| failure(output.status.to_string(), format!("unreadable output: {e}")))
}

impl VcsProvider for GitCommand {
    fn list_commits_between(&self, target: &str, current: &str) -> Result<Vec<String>> {
        let range = format!("{target}..{current}");
        let output = self.run(&["log", "--no-color", "--format=%H", &range])?;
        Ok(parse_log(&output))
    }

    fn list_changed_files(&self, commit_id: &str) -> Result<Vec<String>> {
        let output = self.run(&["show", "--no-color", "--name-only", "--format=", commit_id])?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    fn blame_lines(&self, path: &str) -> Result<Vec<(usize, String)>> {
        if !self.workdir.join(path).is_file() {
            debug!("{path} is gone from the work tree, nothing to blame");
            return Ok(Vec::new());
        }
        let output = self.run(&["blame", "-w", "--porcelain", "--", path])?;
        parse_blame_porcelain(&output).map_err(|message| CoverError::Subprocess {
            command: format!("git blame -w --porcelain -- {path}"),
            status: "unreadable output".to_string(),
            output: message,
        })
    }

    fn current_branch_name(&self) -> Result<String> {
        let output = self.run(&["branch", "--show-current"])?;
        match output.lines().next().map(str::trim) {
            Some(name) if !name.is_empty() => Ok(name.to_string()),
            _ => Err(CoverError::Subprocess {
                command: "git branch --show-current".to_string(),
                status: "exit status: 0".to_string(),
                output: "current branch-name is empty".to_string(),
            }),
        }
    }
}

/// First token of every non-empty line of `git log` output.
fn parse_log(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(String::from)
        .collect()
}

fn is_object_id(token: &str) -> bool {
    matches!(token.len(), 40 | 64) && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Extracts `(final line, short id)` pairs from `git blame --porcelain`.
///
/// Each blamed line starts with a header `<id> <orig line> <final line> [<count>]`,
/// optionally followed by commit details, then the content prefixed by a tab.
fn parse_blame_porcelain(output: &str) -> std::result::Result<Vec<(usize, String)>, String> {
    let mut lines = Vec::new();
    for line in output.lines() {
        if line.starts_with('\t') {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let Some(id) = tokens.next().filter(|t| is_object_id(t)) else {
            continue;
        };
        let final_line = tokens
            .nth(1)
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| format!("malformed blame header {line:?}"))?;
        lines.push((final_line, short_id(id)));
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::BranchDiff;
    use crate::repo::tests::fixture;
    use std::collections::BTreeSet;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "b1b2b3b4b5b6b7b8b9b0b1b2b3b4b5b6b7b8b9b0";

    #[test]
    fn blame_porcelain_headers() {
        let output = format!(
            "{A} 1 1 2\n\
             author Dev\n\
             author-mail <dev@example.com>\n\
             summary first\n\
             filename main.go\n\
             \tpackage main\n\
             {A} 2 2\n\
             \t\n\
             {B} 2 3 1\n\
             author Other\n\
             previous {A} main.go\n\
             filename main.go\n\
             \tfunc main() {{}}\n"
        );
        let lines = parse_blame_porcelain(&output).unwrap();
        assert_eq!(
            lines,
            vec![
                (1, "aaaaaaa".to_string()),
                (2, "aaaaaaa".to_string()),
                (3, "b1b2b3b".to_string()),
            ]
        );
    }

    #[test]
    fn blame_content_looking_like_headers_is_ignored() {
        let output = format!("{A} 1 1 1\nfilename x.go\n\t{B} 9 9\n");
        assert_eq!(parse_blame_porcelain(&output).unwrap(), vec![(1, "aaaaaaa".to_string())]);
    }

    #[test]
    fn malformed_blame_header_is_an_error() {
        assert!(parse_blame_porcelain(&format!("{A} 1\n")).is_err());
    }

    #[test]
    fn log_ids() {
        assert_eq!(parse_log("abc\n\ndef extra\n"), vec!["abc", "def"]);
    }

    #[test]
    fn short_ids() {
        assert_eq!(short_id(A), "aaaaaaa");
        assert_eq!(short_id("c1"), "c1");
    }

    #[test]
    fn missing_files_have_no_blame() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitCommand::new(dir.path(), Duration::from_secs(5));
        assert!(git.blame_lines("gone.go").unwrap().is_empty());
    }

    #[test]
    fn failing_commands_report_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitCommand::new(dir.path().join("missing"), Duration::from_secs(5));
        match git.list_commits_between("origin/master", "origin/feature") {
            Err(CoverError::Subprocess { command, .. }) => {
                assert_eq!(command, "git log --no-color --format=%H origin/master..origin/feature")
            }
            other => panic!("expected a subprocess error, got {other:?}"),
        }
    }

    #[test]
    fn slow_commands_are_killed() {
        let mut command = Command::new("sleep");
        command.arg("5");
        let started = std::time::Instant::now();
        match run_with_timeout(command, "sleep 5", Duration::from_millis(100)) {
            Err(CoverError::Subprocess { command, status, .. }) => {
                assert_eq!(command, "sleep 5");
                assert!(status.starts_with("timed out"), "{status}");
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn history_of_a_scratch_repository() {
        let (dir, [c1, c2, c3]) = fixture();
        let git = GitCommand::open(dir.path(), Duration::from_secs(30)).unwrap();

        assert_eq!(git.current_branch_name().unwrap(), "feature");
        assert_eq!(
            git.list_commits_between("origin/master", "origin/feature").unwrap(),
            vec![c3, c2.clone()]
        );
        assert_eq!(git.list_changed_files(&short_id(&c2)).unwrap(), vec!["pkg/a.go", "pkg/b.go"]);
        let (c1, c2) = (short_id(&c1), short_id(&c2));
        assert_eq!(
            git.blame_lines("pkg/a.go").unwrap(),
            vec![(1, c1.clone()), (2, c1), (3, c2.clone()), (4, c2)]
        );
    }

    #[test]
    fn subdirectories_resolve_to_the_work_tree() {
        let (dir, _) = fixture();
        let git = GitCommand::open(&dir.path().join("pkg"), Duration::from_secs(30)).unwrap();
        let diff = BranchDiff::compute(&git, None, "master", None).unwrap();

        assert_eq!(diff.files["pkg/a.go"], BTreeSet::from([3, 4]));
        assert_eq!(diff.files["pkg/b.go"], BTreeSet::from([1, 2, 3]));
    }

    #[test]
    fn opening_outside_a_work_tree_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            GitCommand::open(&dir.path().join("missing"), Duration::from_secs(5)),
            Err(CoverError::Subprocess { .. })
        ));
    }
}
