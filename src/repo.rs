// src/repo.rs

use crate::error::Result;
use crate::vcs::{short_id, VcsProvider};
use git2::{BlameOptions, DiffOptions, Oid, Repository};
use log::debug;
use std::path::{Path, PathBuf};

/// [`VcsProvider`] backed by libgit2.
///
/// `git2::Repository` is not `Sync`, so every call opens its own handle on
/// the work tree found at construction.
#[derive(Debug, Clone)]
pub struct GitRepository {
    workdir: PathBuf,
}

impl GitRepository {
    /// Finds the repository containing `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path)?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| git2::Error::from_str("bare repositories have no work tree"))?
            .to_path_buf();
        debug!("opened repository at {}", workdir.display());
        Ok(GitRepository { workdir })
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::open(&self.workdir)?)
    }
}

fn resolve_commit(repo: &Repository, spec: &str) -> Result<Oid> {
    Ok(repo.revparse_single(spec)?.peel_to_commit()?.id())
}

impl VcsProvider for GitRepository {
    fn list_commits_between(&self, target: &str, current: &str) -> Result<Vec<String>> {
        let repo = self.repo()?;
        let mut revwalk = repo.revwalk()?;
        revwalk.push(resolve_commit(&repo, current)?)?;
        revwalk.hide(resolve_commit(&repo, target)?)?;
        revwalk.set_sorting(git2::Sort::TIME)?;

        let mut commits = Vec::new();
        for oid in revwalk {
            commits.push(oid?.to_string());
        }
        Ok(commits)
    }

    fn list_changed_files(&self, commit_id: &str) -> Result<Vec<String>> {
        let repo = self.repo()?;
        let commit = repo.find_commit(resolve_commit(&repo, commit_id)?)?;
        let parent_tree = match commit.parents().next() {
            Some(parent) => Some(parent.tree()?),
            None => None,
        };
        let current_tree = commit.tree()?;

        let mut diff_opts = DiffOptions::new();
        diff_opts.include_untracked(false);
        diff_opts.ignore_filemode(true);
        let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&current_tree), Some(&mut diff_opts))?;

        Ok(diff
            .deltas()
            .filter_map(|delta| delta.new_file().path().or_else(|| delta.old_file().path()))
            .filter_map(|path| path.to_str())
            .map(String::from)
            .collect())
    }

    fn blame_lines(&self, path: &str) -> Result<Vec<(usize, String)>> {
        if !self.workdir.join(path).is_file() {
            debug!("{path} is gone from the work tree, nothing to blame");
            return Ok(Vec::new());
        }
        let repo = self.repo()?;
        let mut opts = BlameOptions::new();
        opts.ignore_whitespace(true);
        let blame = repo.blame_file(Path::new(path), Some(&mut opts))?;

        let mut lines = Vec::new();
        for hunk in blame.iter() {
            let id = short_id(&hunk.final_commit_id().to_string());
            let start = hunk.final_start_line();
            lines.extend((0..hunk.lines_in_hunk()).map(|offset| (start + offset, id.clone())));
        }
        Ok(lines)
    }

    fn current_branch_name(&self) -> Result<String> {
        let repo = self.repo()?;
        if repo.head_detached()? {
            return Err(git2::Error::from_str("HEAD is detached, current branch-name is empty").into());
        }
        let head = repo.head()?;
        match head.shorthand() {
            Some(name) if !name.is_empty() => Ok(name.to_string()),
            _ => Err(git2::Error::from_str("current branch-name is empty").into()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::diff::BranchDiff;
    use git2::{Commit, Signature, Time};
    use std::collections::BTreeSet;
    use std::fs;

    fn commit<'r>(repo: &'r Repository, time: i64, files: &[(&str, &str)], parents: &[&Commit<'r>]) -> Commit<'r> {
        let root = repo.workdir().unwrap();
        let mut index = repo.index().unwrap();
        for (path, content) in files {
            let full = root.join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(&full, content).unwrap();
            index.add_path(Path::new(path)).unwrap();
        }
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::new("Dev", "dev@example.com", &Time::new(time, 0)).unwrap();
        let oid = repo
            .commit(Some("HEAD"), &sig, &sig, &format!("commit at {time}"), &tree, parents)
            .unwrap();
        repo.find_commit(oid).unwrap()
    }

    /// master: c1. feature: c1 <- c2 <- c3, checked out.
    pub(crate) fn fixture() -> (tempfile::TempDir, [String; 3]) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();

        let c1 = commit(
            &repo,
            1_000,
            &[("pkg/a.go", "package a\n\nfunc A() {}\n"), ("README.md", "demo\n")],
            &[],
        );
        repo.reference("refs/remotes/origin/master", c1.id(), true, "fixture").unwrap();

        let c2 = commit(
            &repo,
            2_000,
            &[
                ("pkg/a.go", "package a\n\nfunc A() { x() }\nfunc B() {}\n"),
                ("pkg/b.go", "package a\n"),
            ],
            &[&c1],
        );
        let c3 = commit(&repo, 3_000, &[("pkg/b.go", "package a\n\nvar b = 1\n")], &[&c2]);

        repo.branch("feature", &c3, true).unwrap();
        repo.set_head("refs/heads/feature").unwrap();
        repo.reference("refs/remotes/origin/feature", c3.id(), true, "fixture").unwrap();

        let ids = [c1.id().to_string(), c2.id().to_string(), c3.id().to_string()];
        (dir, ids)
    }

    #[test]
    fn commits_between_branches() {
        let (dir, [_, c2, c3]) = fixture();
        let repo = GitRepository::open(dir.path()).unwrap();
        assert_eq!(repo.list_commits_between("origin/master", "origin/feature").unwrap(), vec![c3, c2]);
        assert_eq!(repo.current_branch_name().unwrap(), "feature");
    }

    #[test]
    fn changed_files_per_commit() {
        let (dir, [c1, c2, _]) = fixture();
        let repo = GitRepository::open(dir.path()).unwrap();
        assert_eq!(repo.list_changed_files(&short_id(&c2)).unwrap(), vec!["pkg/a.go", "pkg/b.go"]);
        assert_eq!(repo.list_changed_files(&c1).unwrap(), vec!["README.md", "pkg/a.go"]);
    }

    #[test]
    fn blame_attributes_lines() {
        let (dir, [c1, c2, _]) = fixture();
        let repo = GitRepository::open(dir.path()).unwrap();
        let (c1, c2) = (short_id(&c1), short_id(&c2));
        assert_eq!(
            repo.blame_lines("pkg/a.go").unwrap(),
            vec![(1, c1.clone()), (2, c1), (3, c2.clone()), (4, c2)]
        );
        assert!(repo.blame_lines("pkg/gone.go").unwrap().is_empty());
    }

    #[test]
    fn branch_diff_over_libgit2() {
        let (dir, [_, c2, c3]) = fixture();
        let repo = GitRepository::open(&dir.path().join("pkg")).unwrap();
        let diff = BranchDiff::compute(&repo, None, "master", None).unwrap();

        assert_eq!(diff.current_branch, "origin/feature");
        assert_eq!(diff.commit_hash_id_range, [short_id(&c3), short_id(&c2)]);
        assert_eq!(diff.files["pkg/a.go"], BTreeSet::from([3, 4]));
        assert_eq!(diff.files["pkg/b.go"], BTreeSet::from([1, 2, 3]));
        assert!(!diff.files.contains_key("README.md"));
    }

    #[test]
    fn unknown_revisions_fail() {
        let (dir, _) = fixture();
        let repo = GitRepository::open(dir.path()).unwrap();
        assert!(repo.list_commits_between("origin/nope", "origin/feature").is_err());
    }
}
