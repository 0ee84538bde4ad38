// src/report.rs

use crate::error::Result;
use crate::model::{BranchesInfo, Function, Package, Packages};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSummary {
    pub name: String,
    pub file: String,
    pub start_line: usize,
    pub reached: usize,
    pub total: usize,
    /// Lines marked new by trimming.
    pub new_lines: usize,
}

impl FunctionSummary {
    fn new(function: &Function) -> Self {
        FunctionSummary {
            name: function.name.clone(),
            file: function.file.clone(),
            start_line: function.start_line,
            reached: function.statements.iter().filter(|s| s.reached > 0).count(),
            total: function.statements.len(),
            new_lines: function.new_line_set.len(),
        }
    }

    /// Percentage of statements reached; a function without statements is
    /// fully covered.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.reached as f64 / self.total as f64 * 100.0
        }
    }
}

fn percent_of(reached: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        reached as f64 / total as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackageSummary {
    pub name: String,
    /// Best covered first; ties put the larger function first.
    pub functions: Vec<FunctionSummary>,
    pub reached: usize,
    pub total: usize,
}

impl PackageSummary {
    fn new(package: &Package) -> Self {
        let mut functions: Vec<FunctionSummary> = package.functions.iter().map(FunctionSummary::new).collect();
        functions.sort_by(|a, b| {
            b.percent()
                .partial_cmp(&a.percent())
                .unwrap_or(Ordering::Equal)
                .then(b.total.cmp(&a.total))
        });
        PackageSummary {
            name: package.name.clone(),
            reached: functions.iter().map(|f| f.reached).sum(),
            total: functions.iter().map(|f| f.total).sum(),
            functions,
        }
    }

    pub fn percent(&self) -> f64 {
        percent_of(self.reached, self.total)
    }
}

/// Coverage statistics of one model, ready to print.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub title: String,
    pub branches: Option<BranchesInfo>,
    pub packages: Vec<PackageSummary>,
}

impl Summary {
    pub fn new(title: impl Into<String>, packages: &Packages, branches: Option<&BranchesInfo>) -> Self {
        Summary {
            title: title.into(),
            branches: branches.cloned(),
            packages: packages.iter().map(PackageSummary::new).collect(),
        }
    }

    pub fn reached(&self) -> usize {
        self.packages.iter().map(|p| p.reached).sum()
    }

    pub fn total(&self) -> usize {
        self.packages.iter().map(|p| p.total).sum()
    }

    pub fn percent(&self) -> f64 {
        percent_of(self.reached(), self.total())
    }

    pub fn write_to<W: Write>(&self, mut out: W, generated: DateTime<Utc>) -> Result<()> {
        writeln!(out, "{}", self.title)?;
        if let Some(branches) = &self.branches {
            writeln!(
                out,
                "branches: {} <- {} (commits {}..{})",
                branches.target_branch_name,
                branches.current_branch_name,
                branches.start_hash_id,
                branches.end_hash_id
            )?;
        }
        writeln!(out, "generated: {}", generated.to_rfc2822())?;

        for package in &self.packages {
            writeln!(out)?;
            writeln!(
                out,
                "{} {:.2}% ({}/{})",
                package.name,
                package.percent(),
                package.reached,
                package.total
            )?;
            for function in &package.functions {
                let file = Path::new(&function.file)
                    .file_name()
                    .map(|name| name.to_string_lossy())
                    .unwrap_or_default();
                write!(
                    out,
                    "    {:>7.2}% {:>4}/{:<4} {} ({}:{})",
                    function.percent(),
                    function.reached,
                    function.total,
                    function.name,
                    file,
                    function.start_line
                )?;
                if function.new_lines > 0 {
                    write!(out, " +{} new", function.new_lines)?;
                }
                writeln!(out)?;
            }
        }

        if self.packages.len() > 1 {
            writeln!(out)?;
            writeln!(out, "total {:.2}% ({}/{})", self.percent(), self.reached(), self.total())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LineSet, Statement};
    use chrono::TimeZone;

    fn function(name: &str, reached: &[i64]) -> Function {
        Function {
            name: name.to_string(),
            file: "/work/app/main.go".to_string(),
            start: 10,
            end: 90,
            start_line: 3,
            end_line: 9,
            statements: reached
                .iter()
                .enumerate()
                .map(|(i, &r)| Statement {
                    start: 11 + i,
                    end: 12 + i,
                    start_line: 4 + i,
                    end_line: 4 + i,
                    reached: r,
                })
                .collect(),
            new_line_set: LineSet::default(),
        }
    }

    fn packages() -> Packages {
        let mut packages = Packages::new();
        packages
            .append_package(Package {
                name: "example.com/app".to_string(),
                functions: vec![
                    function("half", &[1, 0]),
                    function("empty", &[]),
                    function("small", &[0]),
                    function("quarter", &[3, 0, 0, 0]),
                    function("halfBig", &[1, 1, 0, 0]),
                ],
            })
            .unwrap();
        packages
            .append_package(Package {
                name: "example.com/app/util".to_string(),
                functions: vec![function("Split", &[1, 1])],
            })
            .unwrap();
        packages
    }

    #[test]
    fn functions_are_ordered_by_coverage() {
        let summary = Summary::new("full", &packages(), None);
        let names: Vec<&str> = summary.packages[0].functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["empty", "halfBig", "half", "quarter", "small"]);
        assert_eq!(summary.packages[0].functions[0].percent(), 100.0);
    }

    #[test]
    fn totals() {
        let summary = Summary::new("full", &packages(), None);
        assert_eq!((summary.packages[0].reached, summary.packages[0].total), (4, 11));
        assert_eq!((summary.reached(), summary.total()), (6, 13));
        assert_eq!(summary.packages[1].percent(), 100.0);
        assert_eq!(Summary::new("empty", &Packages::new(), None).percent(), 0.0);
    }

    #[test]
    fn written_summary() {
        let branches: BranchesInfo = "origin/master,origin/feature:c3,c1".parse().unwrap();
        let summary = Summary::new("diff", &packages(), Some(&branches));
        let generated = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let mut out = Vec::new();
        summary.write_to(&mut out, generated).unwrap();
        let text = String::from_utf8(out).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "diff");
        assert_eq!(lines[1], "branches: origin/master <- origin/feature (commits c3..c1)");
        assert_eq!(lines[2], "generated: Tue, 2 Jan 2024 03:04:05 +0000");
        assert!(text.contains("example.com/app 36.36% (4/11)"));
        assert!(text.contains("  100.00%    0/0    empty (main.go:3)"));
        assert!(text.ends_with("total 46.15% (6/13)\n"));
        assert!(!text.contains(" new"));
    }

    #[test]
    fn new_lines_are_counted() {
        let mut packages = Packages::new();
        let mut changed = function("changed", &[1, 0]);
        changed.new_line_set = [4, 5].into_iter().collect();
        packages
            .append_package(Package {
                name: "example.com/app".to_string(),
                functions: vec![changed],
            })
            .unwrap();
        let summary = Summary::new("diff", &packages, None);
        assert_eq!(summary.packages[0].functions[0].new_lines, 2);

        let mut out = Vec::new();
        summary.write_to(&mut out, Utc::now()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("changed (main.go:3) +2 new\n"));
        assert!(!text.contains("total"));
    }
}
