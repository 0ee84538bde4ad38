// src/diff.rs

use crate::error::{CoverError, Result};
use crate::model::{BranchesInfo, ReservedRules, Rule};
use crate::vcs::{short_id, VcsProvider};
use indicatif::{ParallelProgressIterator, ProgressBar};
use log::{debug, info};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

/// Extension of the source files whose lines are tracked.
pub const SOURCE_EXTENSION: &str = "go";

/// Inclusive `start,end` bound on the commits to keep, newest first as
/// listed by `git log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashIdsRange {
    pub start: String,
    pub end: String,
}

impl FromStr for HashIdsRange {
    type Err = String;

    fn from_str(source: &str) -> std::result::Result<Self, Self::Err> {
        match source.split(',').collect::<Vec<_>>()[..] {
            [start, end] if !start.is_empty() && !end.is_empty() => Ok(HashIdsRange {
                start: start.to_string(),
                end: end.to_string(),
            }),
            _ => Err(format!("invalid hash-ids range format [{source}], expected 'start-hash-id,end-hash-id'")),
        }
    }
}

/// Makes sure a branch name refers to the remote-tracking branch.
pub fn fix_branch(branch: &str) -> String {
    if branch.starts_with("origin/") {
        branch.to_string()
    } else {
        format!("origin/{branch}")
    }
}

/// Lines changed on the current branch relative to the target branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchDiff {
    pub current_branch: String,
    pub target_branch: String,
    /// First and last commit of the selected range, in log order.
    pub commit_hash_id_range: [String; 2],
    /// Selected commits (short ids), newest first.
    pub commits: Vec<String>,
    /// Retained line numbers per repository-relative file.
    pub files: BTreeMap<String, BTreeSet<usize>>,
}

impl BranchDiff {
    /// Diffs `current` (the checked-out branch when `None`) against `target`.
    ///
    /// Any failing version-control call aborts the whole computation.
    pub fn compute(
        vcs: &dyn VcsProvider,
        current: Option<&str>,
        target: &str,
        range: Option<&HashIdsRange>,
    ) -> Result<BranchDiff> {
        let current = match current.filter(|c| !c.is_empty()) {
            Some(branch) => branch.to_string(),
            None => vcs.current_branch_name()?,
        };
        let current_branch = fix_branch(&current);
        let target_branch = fix_branch(target);

        let log: Vec<String> = vcs
            .list_commits_between(&target_branch, &current_branch)?
            .iter()
            .map(|id| short_id(id))
            .collect();
        let (commits, commit_hash_id_range) = select_commits(&log, range)?;
        info!(
            "{} commits between {target_branch} and {current_branch} ({} selected)",
            log.len(),
            commits.len()
        );

        let changed: Vec<Vec<String>> = commits
            .par_iter()
            .progress_with(progress(commits.len(), "listing changed files"))
            .map(|id| vcs.list_changed_files(id))
            .collect::<Result<_>>()?;
        let candidates: BTreeSet<String> = changed
            .into_iter()
            .flatten()
            .filter(|path| Path::new(path).extension().is_some_and(|ext| ext == SOURCE_EXTENSION))
            .collect();
        debug!("{} candidate files", candidates.len());

        let commit_set: HashSet<&str> = commits.iter().map(String::as_str).collect();
        let candidates: Vec<String> = candidates.into_iter().collect();
        let files = candidates
            .par_iter()
            .progress_with(progress(candidates.len(), "blaming files"))
            .map(|path| {
                let lines = vcs
                    .blame_lines(path)?
                    .into_iter()
                    .filter(|(_, id)| commit_set.contains(short_id(id).as_str()))
                    .map(|(line, _)| line)
                    .collect::<BTreeSet<usize>>();
                Ok((path.clone(), lines))
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .collect();

        Ok(BranchDiff {
            current_branch,
            target_branch,
            commit_hash_id_range,
            commits,
            files,
        })
    }

    pub fn branches_info(&self) -> BranchesInfo {
        BranchesInfo {
            target_branch_name: self.target_branch.clone(),
            current_branch_name: self.current_branch.clone(),
            start_hash_id: self.commit_hash_id_range[0].clone(),
            end_hash_id: self.commit_hash_id_range[1].clone(),
        }
    }

    /// Diff artifact lines: the branches header, then `path l1,l2,...` for
    /// every file with retained lines.
    pub fn to_output_lines(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.files.len() + 1);
        out.push(self.branches_info().to_string());
        for (path, lines) in &self.files {
            if lines.is_empty() {
                continue;
            }
            let joined: Vec<String> = lines.iter().map(usize::to_string).collect();
            out.push(format!("{path} {}", joined.join(",")));
        }
        out
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        for line in self.to_output_lines() {
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn to_reserved_rules(&self) -> ReservedRules {
        self.files
            .iter()
            .filter_map(|(path, lines)| Some((path.clone(), Rule::from_lines(lines.iter().copied())?)))
            .collect()
    }
}

fn progress(len: usize, message: &'static str) -> ProgressBar {
    ProgressBar::new(len as u64).with_message(message)
}

/// Picks the commits to keep from a newest-first log.
///
/// Without a range every commit is kept. With one, commits are kept from the
/// one matching `range.start` up to and including `range.end`; both must be
/// seen in that order.
fn select_commits(log: &[String], range: Option<&HashIdsRange>) -> Result<(Vec<String>, [String; 2])> {
    let Some(range) = range else {
        let bounds = [
            log.first().cloned().unwrap_or_default(),
            log.last().cloned().unwrap_or_default(),
        ];
        return Ok((log.to_vec(), bounds));
    };

    let start = short_id(&range.start);
    let end = short_id(&range.end);
    let mut selected = Vec::new();
    let mut bounds = [String::new(), String::new()];
    let (mut hit_start, mut hit_end) = (false, false);
    for id in log {
        if *id == start {
            bounds[0] = id.clone();
            hit_start = true;
        }
        if hit_start {
            selected.push(id.clone());
        }
        if *id == end {
            bounds[1] = id.clone();
            hit_end = true;
            break;
        }
    }

    if !hit_start || !hit_end {
        return Err(CoverError::RangeNotFound {
            requested: [range.start.clone(), range.end.clone()],
            observed: log.to_vec(),
        });
    }
    Ok((selected, bounds))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Canned repository history.
    #[derive(Default)]
    pub(crate) struct FakeVcs {
        pub log: Vec<String>,
        pub changed: HashMap<String, Vec<String>>,
        pub blame: HashMap<String, Vec<(usize, String)>>,
        pub branch: String,
    }

    fn failure(command: String) -> CoverError {
        CoverError::Subprocess {
            command,
            status: "exit status: 128".to_string(),
            output: "fatal: bad revision".to_string(),
        }
    }

    impl VcsProvider for FakeVcs {
        fn list_commits_between(&self, target: &str, current: &str) -> Result<Vec<String>> {
            if target != "origin/master" || current != "origin/feature" {
                return Err(failure(format!("git log {target}..{current}")));
            }
            Ok(self.log.clone())
        }

        fn list_changed_files(&self, commit_id: &str) -> Result<Vec<String>> {
            self.changed
                .get(commit_id)
                .cloned()
                .ok_or_else(|| failure(format!("git show {commit_id}")))
        }

        fn blame_lines(&self, path: &str) -> Result<Vec<(usize, String)>> {
            self.blame
                .get(path)
                .cloned()
                .ok_or_else(|| failure(format!("git blame {path}")))
        }

        fn current_branch_name(&self) -> Result<String> {
            Ok(self.branch.clone())
        }
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn history() -> FakeVcs {
        let mut vcs = FakeVcs {
            log: ids(&["c3", "c2", "c1"]),
            branch: "feature".to_string(),
            ..Default::default()
        };
        vcs.changed.insert("c3".into(), ids(&["pkg/a.go", "README.md"]));
        vcs.changed.insert("c2".into(), ids(&["pkg/b.go", "pkg/a.go"]));
        vcs.changed.insert("c1".into(), ids(&["cmd/main.go"]));
        vcs.blame.insert(
            "pkg/a.go".into(),
            vec![(1, "0000000".into()), (2, "c3".into()), (3, "old".into()), (4, "c1".into())],
        );
        vcs.blame.insert("pkg/b.go".into(), vec![(1, "c2".into()), (2, "c2".into())]);
        vcs.blame.insert("cmd/main.go".into(), vec![(1, "old".into())]);
        vcs
    }

    fn range(text: &str) -> HashIdsRange {
        text.parse().unwrap()
    }

    #[test]
    fn whole_history_without_range() {
        let diff = BranchDiff::compute(&history(), None, "master", None).unwrap();
        assert_eq!(diff.current_branch, "origin/feature");
        assert_eq!(diff.target_branch, "origin/master");
        assert_eq!(diff.commit_hash_id_range, ["c3".to_string(), "c1".to_string()]);
        let set: BTreeSet<&str> = diff.commits.iter().map(String::as_str).collect();
        assert_eq!(set, BTreeSet::from(["c1", "c2", "c3"]));

        assert_eq!(diff.files["pkg/a.go"], BTreeSet::from([2, 4]));
        assert_eq!(diff.files["pkg/b.go"], BTreeSet::from([1, 2]));
        assert!(diff.files["cmd/main.go"].is_empty());
        assert!(!diff.files.contains_key("README.md"));
    }

    #[test]
    fn output_lines_and_rules() {
        let diff = BranchDiff::compute(&history(), Some("origin/feature"), "origin/master", None).unwrap();
        assert_eq!(
            diff.to_output_lines(),
            ["origin/master,origin/feature:c3,c1", "pkg/a.go 2,4", "pkg/b.go 1,2"]
        );

        let rules = diff.to_reserved_rules();
        assert_eq!(rules.len(), 2);
        assert_eq!((rules["pkg/a.go"].start_line, rules["pkg/a.go"].end_line), (2, 4));
        assert_eq!(rules["pkg/a.go"].lines_set, BTreeSet::from([2, 4]));

        let mut buffer = Vec::new();
        diff.write_to(&mut buffer).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "origin/master,origin/feature:c3,c1\npkg/a.go 2,4\npkg/b.go 1,2\n"
        );
    }

    #[test]
    fn bounded_range_keeps_inner_commits() {
        let diff = BranchDiff::compute(&history(), Some("feature"), "master", Some(&range("c3,c2"))).unwrap();
        assert_eq!(diff.commits, ids(&["c3", "c2"]));
        assert_eq!(diff.commit_hash_id_range, ["c3".to_string(), "c2".to_string()]);
        assert_eq!(diff.files["pkg/a.go"], BTreeSet::from([2]));
        assert!(!diff.files.contains_key("cmd/main.go"));
    }

    #[test]
    fn long_ids_are_abbreviated() {
        let mut vcs = history();
        vcs.log = ids(&["abcdef0123456789", "1234567aaaa"]);
        vcs.changed.insert("abcdef0".into(), ids(&["pkg/b.go"]));
        vcs.blame.insert(
            "pkg/b.go".into(),
            vec![(7, "abcdef0123456789abcdef0123456789abcdef01".into()), (8, "fffffff".into())],
        );
        let diff = BranchDiff::compute(&vcs, None, "master", Some(&range("abcdef0999,abcdef0"))).unwrap();
        assert_eq!(diff.commits, ids(&["abcdef0"]));
        assert_eq!(diff.files["pkg/b.go"], BTreeSet::from([7]));
    }

    #[test]
    fn missing_range_end_is_an_error() {
        let mut vcs = history();
        vcs.log = ids(&["c3", "c2"]);
        match BranchDiff::compute(&vcs, None, "master", Some(&range("c2,c1"))) {
            Err(CoverError::RangeNotFound { requested, observed }) => {
                assert_eq!(requested, ["c2".to_string(), "c1".to_string()]);
                assert_eq!(observed, ids(&["c3", "c2"]));
            }
            other => panic!("expected RangeNotFound, got {other:?}"),
        }
    }

    #[test]
    fn reversed_range_is_an_error() {
        let err = BranchDiff::compute(&history(), None, "master", Some(&range("c1,c3"))).unwrap_err();
        assert!(matches!(err, CoverError::RangeNotFound { .. }));
    }

    #[test]
    fn empty_history_is_an_empty_diff() {
        let vcs = FakeVcs {
            branch: "feature".to_string(),
            ..Default::default()
        };
        let diff = BranchDiff::compute(&vcs, None, "master", None).unwrap();
        assert!(diff.commits.is_empty());
        assert!(diff.files.is_empty());
        assert_eq!(diff.to_output_lines(), ["origin/master,origin/feature:,"]);
    }

    #[test]
    fn failing_blame_aborts() {
        let mut vcs = history();
        vcs.blame.remove("pkg/b.go");
        let err = BranchDiff::compute(&vcs, None, "master", None).unwrap_err();
        assert!(matches!(err, CoverError::Subprocess { .. }));
    }

    #[test]
    fn hash_ids_range_format() {
        assert_eq!(range("a,b"), HashIdsRange { start: "a".into(), end: "b".into() });
        assert!("a".parse::<HashIdsRange>().is_err());
        assert!("a,b,c".parse::<HashIdsRange>().is_err());
        assert!(",b".parse::<HashIdsRange>().is_err());
    }

    #[test]
    fn branch_names_are_remote() {
        assert_eq!(fix_branch("master"), "origin/master");
        assert_eq!(fix_branch("origin/dev"), "origin/dev");
    }
}
