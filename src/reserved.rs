// src/reserved.rs

use crate::error::{CoverError, Result};
use crate::model::{BranchesInfo, ReservedInfo, ReservedRules, Rule};
use log::warn;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

impl ReservedInfo {
    /// Reads a diff artifact: the branches header, then `path l1,l2,...` lines.
    ///
    /// Lines that do not have exactly two columns, or carry no parsable line
    /// number, are skipped.
    pub fn parse<R: BufRead>(reader: R) -> Result<ReservedInfo> {
        let mut lines = reader.lines();
        let header = match lines.next() {
            Some(line) => line?,
            None => return Err(CoverError::DiffFormat("empty diff info".to_string())),
        };
        let branches: BranchesInfo = header.trim().parse()?;

        let mut rules = ReservedRules::new();
        for (index, line) in lines.enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let columns: Vec<&str> = line.split_whitespace().collect();
            let [path, numbers] = columns[..] else {
                warn!("diff info line {}: invalid column length {}, skipped", index + 2, columns.len());
                continue;
            };

            let mut parsed = Vec::new();
            for number in numbers.split(',') {
                match number.parse::<usize>() {
                    Ok(n) => parsed.push(n),
                    Err(e) => warn!("diff info line {}: invalid line number {number:?}: {e}", index + 2),
                }
            }
            match Rule::from_lines(parsed) {
                Some(rule) => {
                    rules.insert(path.to_string(), rule);
                }
                None => warn!("diff info line {}: no line numbers for {path}, skipped", index + 2),
            }
        }

        Ok(ReservedInfo { branches, rules })
    }

    pub fn load(path: &Path) -> Result<ReservedInfo> {
        let file = File::open(path).map_err(|e| CoverError::FileNotFound {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        ReservedInfo::parse(BufReader::new(file))
    }
}
