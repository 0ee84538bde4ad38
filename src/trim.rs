// src/trim.rs

use crate::error::Result;
use crate::model::{Function, LineSet, Package, Packages, ReservedInfo, ReservedRules, Rule, Statement};
use log::debug;
use std::path::Path;

/// Closed-interval overlap of `[a, b]` and `[c, d]`.
pub fn overlaps(a: usize, b: usize, c: usize, d: usize) -> bool {
    c <= b && d >= a
}

fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// Whether `rule_path` names `file`: a component-wise suffix match, so
/// `a.go` matches `/src/pkg/a.go` but not `/src/pkg/data.go`.
pub fn file_matches(file: &str, rule_path: &str) -> bool {
    let file = normalize_separators(file);
    let rule_path = normalize_separators(rule_path);
    !rule_path.is_empty() && Path::new(&file).ends_with(Path::new(&rule_path))
}

fn touched_lines<'r>(statement: &Statement, rule: &'r Rule) -> impl Iterator<Item = usize> + 'r {
    let range = statement.start_line..=statement.end_line.max(statement.start_line);
    rule.lines_set.range(range).copied()
}

fn trim_function(function: &Function, rules: &ReservedRules) -> Option<Function> {
    let mut retained = vec![false; function.statements.len()];
    let mut new_line_set = LineSet::default();

    let matching = rules.iter().filter(|(path, rule)| {
        file_matches(&function.file, path)
            && overlaps(rule.start_line, rule.end_line, function.start_line, function.end_line)
    });
    for (_, rule) in matching {
        for (keep, statement) in retained.iter_mut().zip(&function.statements) {
            for line in touched_lines(statement, rule) {
                *keep = true;
                new_line_set.insert(line);
            }
        }
    }

    let statements: Vec<Statement> = function
        .statements
        .iter()
        .zip(&retained)
        .filter(|(_, keep)| **keep)
        .map(|(statement, _)| statement.clone())
        .collect();
    if statements.is_empty() {
        return None;
    }
    Some(Function {
        statements,
        new_line_set,
        ..function.clone()
    })
}

/// Narrows `packages` to the statements touching lines kept by `rules`.
///
/// Functions and packages left without statements are dropped; the input is
/// never modified and document order is preserved.
pub fn trim_packages(packages: &Packages, rules: &ReservedRules) -> Result<Packages> {
    let mut trimmed = Packages::new();
    for package in packages {
        let functions: Vec<Function> = package
            .functions
            .iter()
            .filter_map(|function| trim_function(function, rules))
            .collect();
        if functions.is_empty() {
            debug!("package {} has no changed statements", package.name);
            continue;
        }
        trimmed.append_package(Package {
            name: package.name.clone(),
            functions,
        })?;
    }
    Ok(trimmed)
}

/// Trims a persisted coverage document with a diff artifact.
pub fn trim_file(coverage: &Path, artifact: &Path) -> Result<Packages> {
    let packages = Packages::load(coverage)?;
    let reserved = ReservedInfo::load(artifact)?;
    trim_packages(&packages, &reserved.rules)
}
