// src/mapper.rs

use crate::error::{CoverError, Result};
use crate::model::{Function, Package, Packages, Statement};
use crate::profile::{parse_profiles, Profile, ProfileBlock};
use crate::syntax::{Extent, SyntaxWalker};
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// A profile file name resolved to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: PathBuf,
    /// Import path of the package containing the file.
    pub package: String,
}

#[derive(Debug, Clone)]
struct BuildRoot {
    dir: PathBuf,
    module: String,
}

#[derive(Debug, Clone)]
struct ResolvedDir {
    dir: PathBuf,
    import_path: String,
}

/// Maps profile file names onto source files and package import paths.
///
/// Lookups are cached per directory for the lifetime of the resolver, so one
/// resolver should serve exactly one conversion run.
pub struct PackageResolver {
    root: PathBuf,
    gopath: Vec<PathBuf>,
    build_roots: HashMap<PathBuf, Option<BuildRoot>>,
    dirs: HashMap<String, ResolvedDir>,
}

impl PackageResolver {
    /// Resolver for a project whose work tree contains `root`. `$GOPATH`
    /// (or `~/go`) is consulted for packages outside the module.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let gopath = match std::env::var_os("GOPATH") {
            Some(value) => std::env::split_paths(&value).collect(),
            None => std::env::var_os("HOME")
                .map(|home| vec![PathBuf::from(home).join("go")])
                .unwrap_or_default(),
        };
        PackageResolver::with_gopath(root, gopath)
    }

    pub fn with_gopath(root: impl Into<PathBuf>, gopath: Vec<PathBuf>) -> Self {
        PackageResolver {
            root: root.into(),
            gopath,
            build_roots: HashMap::new(),
            dirs: HashMap::new(),
        }
    }

    /// Resolves a profile file name such as `example.com/mod/pkg/file.go`.
    pub fn resolve(&mut self, file_name: &str) -> Result<ResolvedFile> {
        let (dir, file) = match file_name.rsplit_once('/') {
            Some((dir, file)) => (dir, file),
            None => ("", file_name),
        };
        let resolved = self.resolve_dir(dir)?;
        Ok(ResolvedFile {
            path: resolved.dir.join(file),
            package: resolved.import_path,
        })
    }

    fn resolve_dir(&mut self, dir: &str) -> Result<ResolvedDir> {
        if let Some(hit) = self.dirs.get(dir) {
            return Ok(hit.clone());
        }

        let resolved = if dir.is_empty() || dir.starts_with('.') || Path::new(dir).is_absolute() {
            self.resolve_local(dir)?
        } else {
            self.resolve_import(dir)?
        };
        debug!("resolved {dir:?} to {}", resolved.dir.display());
        self.dirs.insert(dir.to_string(), resolved.clone());
        Ok(resolved)
    }

    fn resolve_local(&mut self, dir: &str) -> Result<ResolvedDir> {
        let abs = self.root.join(dir.trim_start_matches("./"));
        if !abs.is_dir() {
            return Err(CoverError::FileNotFound {
                path: dir.to_string(),
                reason: format!("{} is not a directory", abs.display()),
            });
        }
        let import_path = match self.build_root(&abs) {
            Some(root) => {
                let rel = abs.strip_prefix(&root.dir).unwrap_or(Path::new(""));
                join_import_path(&root.module, rel)
            }
            None => dir.to_string(),
        };
        Ok(ResolvedDir { dir: abs, import_path })
    }

    fn resolve_import(&mut self, dir: &str) -> Result<ResolvedDir> {
        let root_dir = self.root.clone();
        let mut candidates = Vec::new();
        if let Some(root) = self.build_root(&root_dir) {
            if dir == root.module {
                candidates.push(root.dir.clone());
            } else if let Some(rest) = dir.strip_prefix(&format!("{}/", root.module)) {
                candidates.push(root.dir.join(rest));
            }
            candidates.push(root.dir.join("vendor").join(dir));
        }
        candidates.extend(self.gopath.iter().map(|p| p.join("src").join(dir)));

        candidates
            .into_iter()
            .find(|candidate| candidate.is_dir())
            .map(|found| ResolvedDir {
                dir: found,
                import_path: dir.to_string(),
            })
            .ok_or_else(|| CoverError::FileNotFound {
                path: dir.to_string(),
                reason: format!("no module, vendor or GOPATH directory provides it (searched from {})", self.root.display()),
            })
    }

    /// Nearest directory at or above `start` containing a `go.mod`.
    fn build_root(&mut self, start: &Path) -> Option<BuildRoot> {
        if let Some(cached) = self.build_roots.get(start) {
            return cached.clone();
        }
        let found = start.ancestors().find_map(|dir| {
            let content = std::fs::read_to_string(dir.join("go.mod")).ok()?;
            let module = module_path(&content)?;
            Some(BuildRoot {
                dir: dir.to_path_buf(),
                module,
            })
        });
        self.build_roots.insert(start.to_path_buf(), found.clone());
        found
    }
}

fn join_import_path(module: &str, rel: &Path) -> String {
    let mut path = module.to_string();
    for component in rel.components() {
        path.push('/');
        path.push_str(&component.as_os_str().to_string_lossy());
    }
    path
}

fn module_path(go_mod: &str) -> Option<String> {
    go_mod.lines().find_map(|line| {
        let line = line.split("//").next().unwrap_or_default().trim();
        let rest = line.strip_prefix("module")?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let module = rest.trim().trim_matches('"');
        (!module.is_empty()).then(|| module.to_string())
    })
}

/// Reached counts for `statements` given the blocks of the same file.
///
/// Each statement takes the count of the first block touching it. Blocks must
/// be sorted by position; statements are swept in position order with a
/// cursor that only moves forward.
pub fn attribute_blocks(statements: &[Extent], blocks: &[ProfileBlock]) -> Vec<i64> {
    let mut reached = vec![0i64; statements.len()];
    let mut order: Vec<usize> = (0..statements.len()).collect();
    order.sort_by_key(|&i| (statements[i].start_line, statements[i].start_col));

    let mut cursor = 0;
    for i in order {
        let s = &statements[i];
        for (offset, b) in blocks[cursor..].iter().enumerate() {
            if b.start_line > s.end_line || (b.start_line == s.end_line && b.start_col >= s.end_col) {
                // past the end of the statement
                cursor += offset;
                break;
            }
            if b.end_line < s.start_line || (b.end_line == s.start_line && b.end_col <= s.start_col) {
                // before the beginning of the statement
                continue;
            }
            reached[i] = b.count;
            break;
        }
    }
    reached
}

/// Turns coverage profiles into a [`Packages`] model.
pub struct Converter {
    walker: SyntaxWalker,
    resolver: PackageResolver,
}

impl Converter {
    pub fn new(resolver: PackageResolver) -> Result<Self> {
        Ok(Converter {
            walker: SyntaxWalker::new()?,
            resolver,
        })
    }

    /// Converts and merges several profile files.
    pub fn convert_files(&mut self, paths: &[PathBuf]) -> Result<Packages> {
        let mut packages = Packages::new();
        for path in paths {
            packages.merge(self.convert_file(path)?)?;
        }
        Ok(packages)
    }

    pub fn convert_file(&mut self, path: &Path) -> Result<Packages> {
        let profiles = parse_profiles(path)?;
        info!("converting {} ({} files)", path.display(), profiles.len());

        let mut by_name: BTreeMap<String, Package> = BTreeMap::new();
        for profile in &profiles {
            self.convert_profile(&mut by_name, profile)?;
        }

        let mut packages = Packages::new();
        for package in by_name.into_values() {
            packages.append_package(package)?;
        }
        Ok(packages)
    }

    fn convert_profile(&mut self, packages: &mut BTreeMap<String, Package>, profile: &Profile) -> Result<()> {
        let resolved = self.resolver.resolve(&profile.file_name)?;
        let extents = self.walker.parse_functions(&resolved.path)?;
        let file = resolved.path.display().to_string();

        let flat: Vec<Extent> = extents.iter().flat_map(|f| f.statements.iter().copied()).collect();
        let mut reached = attribute_blocks(&flat, &profile.blocks).into_iter();

        let package = packages
            .entry(resolved.package.clone())
            .or_insert_with(|| Package::new(resolved.package.clone()));
        let control_blocks: usize = extents.iter().map(|f| f.blocks.len()).sum();
        for extent in extents {
            let statements = extent
                .statements
                .iter()
                .map(|s| Statement {
                    start: s.start_offset,
                    end: s.end_offset,
                    start_line: s.start_line,
                    end_line: s.end_line,
                    reached: reached.next().unwrap_or_default(),
                })
                .collect();
            package.functions.push(Function {
                name: extent.name,
                file: file.clone(),
                start: extent.extent.start_offset,
                end: extent.extent.end_offset,
                start_line: extent.extent.start_line,
                end_line: extent.extent.end_line,
                statements,
                new_line_set: Default::default(),
            });
        }
        debug!(
            "mapped {} {:?} blocks onto {} ({} functions, {} control blocks)",
            profile.blocks.len(),
            profile.mode,
            file,
            package.functions.len(),
            control_blocks
        );
        Ok(())
    }
}
