//! Accumulated findings, keyed by work, line and part.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::checker::Finding;
use crate::error::Result;
use crate::source::LineId;

/// Findings per part of one line.
pub type LineFindings = BTreeMap<String, Vec<Finding>>;

/// A hard fault met while processing a work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub work: String,
    pub line: Option<LineId>,
    pub part: Option<String>,
    pub message: String,
}

/// Append-only record of everything the checker found.
///
/// Keys are disjoint between works, so reports built by independent
/// workers can be merged without coordination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub works: BTreeMap<String, BTreeMap<LineId, LineFindings>>,
    #[serde(default)]
    pub faults: Vec<Fault>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add findings for a part of a line. Empty lists are not recorded.
    pub fn record(&mut self, work: &str, line: LineId, part: &str, findings: Vec<Finding>) {
        if findings.is_empty() {
            return;
        }
        self.works
            .entry(work.to_string())
            .or_default()
            .entry(line)
            .or_default()
            .entry(part.to_string())
            .or_default()
            .extend(findings);
    }

    pub fn record_fault(&mut self, fault: Fault) {
        self.faults.push(fault);
    }

    /// Findings recorded for one part of one line.
    pub fn findings(&self, work: &str, line: LineId, part: &str) -> &[Finding] {
        self.line_findings(work, line)
            .and_then(|parts| parts.get(part))
            .map_or(&[][..], Vec::as_slice)
    }

    /// Findings of every part of one line.
    pub fn line_findings(&self, work: &str, line: LineId) -> Option<&LineFindings> {
        self.works.get(work).and_then(|lines| lines.get(&line))
    }

    /// Every line of a work with findings, in line order.
    pub fn lines(&self, work: &str) -> impl Iterator<Item = (&LineId, &LineFindings)> {
        self.works.get(work).into_iter().flat_map(|lines| lines.iter())
    }

    pub fn merge(&mut self, other: Report) {
        for (work, lines) in other.works {
            for (line, parts) in lines {
                for (part, findings) in parts {
                    self.record(&work, line, &part, findings);
                }
            }
        }
        self.faults.extend(other.faults);
    }

    /// Total number of findings.
    pub fn error_count(&self) -> usize {
        self.works
            .values()
            .flat_map(|lines| lines.values())
            .flat_map(|parts| parts.values())
            .map(Vec::len)
            .sum()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}
