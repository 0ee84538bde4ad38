// src/model.rs

use crate::error::{CoverError, Result};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

fn is_zero<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// A single non-compound executable statement and how often it ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Statement {
    /// Byte offset of the first character of the statement.
    #[serde(skip_serializing_if = "is_zero")]
    pub start: usize,
    /// Byte offset just past the statement.
    #[serde(skip_serializing_if = "is_zero")]
    pub end: usize,
    #[serde(skip_serializing_if = "is_zero")]
    pub start_line: usize,
    #[serde(skip_serializing_if = "is_zero")]
    pub end_line: usize,
    /// Number of times the statement was executed.
    #[serde(skip_serializing_if = "is_zero")]
    pub reached: i64,
}

impl Statement {
    /// Adds the hits recorded in `other` to this statement.
    pub fn accumulate(&mut self, other: &Statement) -> Result<()> {
        if self.start != other.start || self.end != other.end {
            return Err(CoverError::ShapeMismatch(format!(
                "source ranges do not match: {}-{} != {}-{}",
                self.start, self.end, other.start, other.end
            )));
        }
        self.reached = self.reached.checked_add(other.reached).ok_or_else(|| {
            CoverError::ShapeMismatch(format!(
                "reached count of {}-{} overflows: {} + {}",
                self.start, self.end, self.reached, other.reached
            ))
        })?;
        Ok(())
    }
}

/// Set of line numbers, persisted as a JSON object keyed by line (`{"12":{}}`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineSet(BTreeSet<usize>);

#[derive(Serialize)]
struct Present {}

impl LineSet {
    pub fn insert(&mut self, line: usize) -> bool {
        self.0.insert(line)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<usize> for LineSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        LineSet(iter.into_iter().collect())
    }
}

impl Serialize for LineSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|line| (line, Present {})))
    }
}

impl<'de> Deserialize<'de> for LineSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let map = BTreeMap::<usize, IgnoredAny>::deserialize(deserializer)?;
        Ok(LineSet(map.into_keys().collect()))
    }
}

/// A function (declaration or literal) and the statements registered with it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Function {
    /// `Name`, `Receiver.Name` for methods, or `@line:col` for literals.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Absolute path of the file defining the function.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub file: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub start: usize,
    #[serde(skip_serializing_if = "is_zero")]
    pub end: usize,
    #[serde(skip_serializing_if = "is_zero")]
    pub start_line: usize,
    #[serde(skip_serializing_if = "is_zero")]
    pub end_line: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub statements: Vec<Statement>,
    /// Lines retained by trimming; empty on a full model.
    #[serde(skip_serializing_if = "LineSet::is_empty")]
    pub new_line_set: LineSet,
}

impl Function {
    /// Adds the hits recorded in `other` to this function.
    ///
    /// Both records must describe the same source: equal name, file, byte
    /// range and statement layout.
    pub fn accumulate(&mut self, other: &Function) -> Result<()> {
        if self.name != other.name {
            return Err(CoverError::ShapeMismatch(format!(
                "names do not match: {:?} != {:?}",
                self.name, other.name
            )));
        }
        if self.file != other.file {
            return Err(CoverError::ShapeMismatch(format!(
                "files do not match: {:?} != {:?}",
                self.file, other.file
            )));
        }
        if self.start != other.start || self.end != other.end {
            return Err(CoverError::ShapeMismatch(format!(
                "source ranges of {} do not match: {}-{} != {}-{}",
                self.name, self.start, self.end, other.start, other.end
            )));
        }
        if self.statements.len() != other.statements.len() {
            return Err(CoverError::ShapeMismatch(format!(
                "number of statements of {} do not match: {} != {}",
                self.name,
                self.statements.len(),
                other.statements.len()
            )));
        }
        for (stmt, other_stmt) in self.statements.iter_mut().zip(&other.statements) {
            stmt.accumulate(other_stmt)?;
        }
        Ok(())
    }
}

/// Coverage for one Go package, keyed by its import path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Package {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<Function>,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Package {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    /// Adds the hits recorded in `other` to this package.
    pub fn accumulate(&mut self, other: &Package) -> Result<()> {
        if self.name != other.name {
            return Err(CoverError::ShapeMismatch(format!(
                "names do not match: {:?} != {:?}",
                self.name, other.name
            )));
        }
        if self.functions.len() != other.functions.len() {
            return Err(CoverError::ShapeMismatch(format!(
                "function counts of {} do not match: {} != {}",
                self.name,
                self.functions.len(),
                other.functions.len()
            )));
        }
        for (function, other_function) in self.functions.iter_mut().zip(&other.functions) {
            function.accumulate(other_function)?;
        }
        Ok(())
    }

    pub fn statement_count(&self) -> usize {
        self.functions.iter().map(|f| f.statements.len()).sum()
    }
}

/// Packages kept sorted by name; the unit persisted as coverage JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packages(Vec<Package>);

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Document<P> {
    packages: P,
}

impl Packages {
    pub fn new() -> Self {
        Packages(Vec::new())
    }

    /// Merges `package` into the collection, keeping it sorted by name.
    pub fn append_package(&mut self, package: Package) -> Result<()> {
        match self.0.binary_search_by(|p| p.name.as_str().cmp(&package.name)) {
            Ok(i) => self.0[i].accumulate(&package),
            Err(i) => {
                self.0.insert(i, package);
                Ok(())
            }
        }
    }

    /// Merges every package of `other` into the collection.
    pub fn merge(&mut self, other: Packages) -> Result<()> {
        for package in other.0 {
            self.append_package(package)?;
        }
        Ok(())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Package> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn statement_count(&self) -> usize {
        self.0.iter().map(Package::statement_count).sum()
    }

    /// Writes the `{"Packages":[...]}` document followed by a newline.
    pub fn to_writer<W: Write>(&self, mut writer: W) -> Result<()> {
        serde_json::to_writer(&mut writer, &Document { packages: &self.0 })?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn from_slice(data: &[u8]) -> Result<Packages> {
        let document: Document<Option<Vec<Package>>> = serde_json::from_slice(data)?;
        let mut packages = Packages::new();
        for package in document.packages.unwrap_or_default() {
            packages.append_package(package)?;
        }
        Ok(packages)
    }

    pub fn load(path: &Path) -> Result<Packages> {
        let data = std::fs::read(path).map_err(|e| CoverError::FileNotFound {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Packages::from_slice(&data)
    }

    /// Reads and accumulates several coverage documents. `-` reads stdin;
    /// repeated file names are read once.
    pub fn read_files(paths: &[PathBuf]) -> Result<Packages> {
        let unique: BTreeSet<&PathBuf> = paths.iter().collect();
        let mut packages = Packages::new();
        for path in unique {
            let part = if path.as_os_str() == "-" {
                let mut data = Vec::new();
                std::io::stdin().read_to_end(&mut data)?;
                Packages::from_slice(&data)?
            } else {
                Packages::load(path)?
            };
            packages.merge(part)?;
        }
        Ok(packages)
    }
}

impl From<Packages> for Vec<Package> {
    fn from(packages: Packages) -> Self {
        packages.0
    }
}

impl<'a> IntoIterator for &'a Packages {
    type Item = &'a Package;
    type IntoIter = std::slice::Iter<'a, Package>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Which branches and commit range a diff covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchesInfo {
    pub target_branch_name: String,
    pub current_branch_name: String,
    pub start_hash_id: String,
    pub end_hash_id: String,
}

impl fmt::Display for BranchesInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{}:{},{}",
            self.target_branch_name, self.current_branch_name, self.start_hash_id, self.end_hash_id
        )
    }
}

impl FromStr for BranchesInfo {
    type Err = CoverError;

    fn from_str(source: &str) -> Result<Self> {
        let (branches, hash_ids) = match source.split(':').collect::<Vec<_>>()[..] {
            [branches, hash_ids] => (branches, hash_ids),
            _ => return Err(CoverError::DiffFormat(format!("invalid branches info [{source}]"))),
        };
        let (target, current) = branches
            .split_once(',')
            .filter(|(_, rest)| !rest.contains(','))
            .ok_or_else(|| CoverError::DiffFormat(format!("invalid branches [{branches}]")))?;
        let (start, end) = hash_ids
            .split_once(',')
            .filter(|(_, rest)| !rest.contains(','))
            .ok_or_else(|| CoverError::DiffFormat(format!("invalid commit ids [{hash_ids}]")))?;
        Ok(BranchesInfo {
            target_branch_name: target.to_string(),
            current_branch_name: current.to_string(),
            start_hash_id: start.to_string(),
            end_hash_id: end.to_string(),
        })
    }
}

/// Lines of one file to keep when trimming.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rule {
    /// Smallest retained line; a fast-reject bound.
    pub start_line: usize,
    /// Largest retained line.
    pub end_line: usize,
    pub lines_set: BTreeSet<usize>,
}

impl Rule {
    /// Builds a rule bounded by the smallest and largest of `lines`.
    /// Returns `None` when `lines` is empty.
    pub fn from_lines(lines: impl IntoIterator<Item = usize>) -> Option<Rule> {
        let lines_set: BTreeSet<usize> = lines.into_iter().collect();
        let start_line = *lines_set.first()?;
        let end_line = *lines_set.last()?;
        Some(Rule {
            start_line,
            end_line,
            lines_set,
        })
    }
}

/// Retain rules keyed by repository-relative file path.
pub type ReservedRules = BTreeMap<String, Rule>;

/// A loaded diff artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservedInfo {
    pub branches: BranchesInfo,
    pub rules: ReservedRules,
}
