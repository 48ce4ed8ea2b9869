//! Per-work control flow.
//!
//! Lines are walked in ascending order and each one is checked against the
//! line before it. A line that could not be fetched or walked is treated as
//! absent, so the line after it is not compared with anything. Repairs run
//! once every line of the work has been checked.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::checker::check_lines;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::parser::scan_musicxml;
use crate::read_musicxml;
use crate::repair::{normalize_duplicates, propagate_neighbors, CorrectedDocument, LineDocument, Strategy};
use crate::report::{Fault, Report};
use crate::source::{DocumentSource, LineId, Session};

/// Everything produced for one work.
#[derive(Debug, Clone, Default)]
pub struct WorkOutcome {
    pub work: String,
    pub report: Report,
    pub corrections: Vec<CorrectedDocument>,
    /// Lines that were walked without a line-level fault
    pub lines_walked: usize,
}

impl WorkOutcome {
    fn new(work: &str) -> Self {
        Self {
            work: work.to_string(),
            ..Default::default()
        }
    }

    fn fault(&mut self, line: Option<LineId>, part: Option<&str>, err: &Error) {
        error!(work = %self.work, line, part, error = %err, "hard fault");
        self.report.record_fault(Fault {
            work: self.work.clone(),
            line,
            part: part.map(str::to_string),
            message: err.to_string(),
        });
    }
}

/// A line slot in listing order; `doc` is `None` for skipped lines.
struct Slot {
    line: LineId,
    doc: Option<LineDocument>,
}

/// Runs the checker and the repair passes over works of a source.
pub struct Validator<'a, S: DocumentSource + ?Sized> {
    source: &'a S,
    session: &'a Session,
    config: &'a Config,
}

impl<'a, S: DocumentSource + ?Sized> Validator<'a, S> {
    pub fn new(source: &'a S, session: &'a Session, config: &'a Config) -> Self {
        Self {
            source,
            session,
            config,
        }
    }

    /// Validate the selected works, or every work when `selected` is empty.
    pub fn validate_works(&self, selected: &[String]) -> Result<Vec<WorkOutcome>> {
        let catalog = self.source.list_works(self.session)?;
        let works: Vec<String> = if selected.is_empty() {
            catalog.into_keys().collect()
        } else {
            for work in selected.iter().filter(|w| !catalog.contains_key(*w)) {
                warn!(work = %work, "work not in catalog");
            }
            selected.to_vec()
        };
        Ok(works.iter().map(|work| self.validate_work(work)).collect())
    }

    /// Check every line of a work and run the enabled repairs.
    pub fn validate_work(&self, work: &str) -> WorkOutcome {
        info!(work, "validating work");
        let mut outcome = WorkOutcome::new(work);

        let listing = match self.source.list_lines(self.session, work) {
            Ok(listing) => listing,
            Err(err) => {
                outcome.fault(None, None, &err);
                return outcome;
            }
        };

        let options = self.config.check_options();
        let mut slots: Vec<Slot> = Vec::with_capacity(listing.line_ids.len());
        for &line in &listing.line_ids {
            let doc = self.load_line(work, line, &mut outcome);
            if let Some(doc) = &doc {
                outcome.lines_walked += 1;
                match adjacent_previous(&slots, line) {
                    Some(previous) => {
                        for (part, findings) in check_lines(&previous.scan, &doc.scan, &options) {
                            debug!(work, line, part = %part, count = findings.len(), "findings");
                            outcome.report.record(work, line, &part, findings);
                        }
                    }
                    None => debug!(work, line, "no adjacent previous line, not checked"),
                }
            }
            slots.push(Slot { line, doc });
        }

        if self.config.repairs_enabled() {
            let (corrections, faults) = self.repair(work, &slots, &outcome.report);
            outcome.corrections = corrections;
            for (line, err) in faults {
                outcome.fault(Some(line), None, &err);
            }
        }

        info!(
            work,
            lines = listing.line_ids.len(),
            walked = outcome.lines_walked,
            findings = outcome.report.error_count(),
            corrections = outcome.corrections.len(),
            "work validated"
        );
        outcome
    }

    fn load_line(&self, work: &str, line: LineId, outcome: &mut WorkOutcome) -> Option<LineDocument> {
        let data = match self.source.fetch_document(self.session, work, line) {
            Ok(data) => data,
            Err(err) => {
                warn!(work, line, error = %err, "could not fetch line, skipped");
                return None;
            }
        };

        let xml = match read_musicxml(&data, None) {
            Ok(xml) => xml,
            Err(err) => {
                outcome.fault(Some(line), None, &err);
                return None;
            }
        };

        match scan_musicxml(&xml) {
            Ok(scan) => {
                for fault in &scan.faults {
                    outcome.fault(Some(line), Some(&fault.part_id), &fault.error);
                }
                Some(LineDocument { line, xml, scan })
            }
            Err(err) => {
                outcome.fault(Some(line), None, &err);
                None
            }
        }
    }

    fn repair(
        &self,
        work: &str,
        slots: &[Slot],
        report: &Report,
    ) -> (Vec<CorrectedDocument>, Vec<(LineId, Error)>) {
        let options = self.config.check_options();
        let mut corrections = Vec::new();
        let mut faults = Vec::new();

        if self.config.repair.duplicate_declarations {
            for slot in slots {
                let (Some(doc), Some(findings)) = (&slot.doc, report.line_findings(work, slot.line)) else {
                    continue;
                };
                match normalize_duplicates(&doc.xml, findings, &options) {
                    Ok(Some(xml)) => corrections.push(CorrectedDocument {
                        work: work.to_string(),
                        line: slot.line,
                        strategy: Strategy::DuplicateDeclarations,
                        xml,
                    }),
                    Ok(None) => {}
                    Err(err) => faults.push((slot.line, err)),
                }
            }
        }

        if self.config.repair.neighbor_propagation {
            for window in slots.windows(3) {
                let [a, b, c] = window else {
                    continue;
                };
                if b.line != a.line + 1 || c.line != b.line + 1 {
                    continue;
                }
                let (Some(before), Some(faulty), Some(after)) = (&a.doc, &b.doc, &c.doc) else {
                    continue;
                };
                let (Some(faulty_findings), Some(after_findings)) = (
                    report.line_findings(work, b.line),
                    report.line_findings(work, c.line),
                ) else {
                    continue;
                };
                match propagate_neighbors(before, faulty, after, faulty_findings, after_findings, &options) {
                    Ok(Some(xml)) => corrections.push(CorrectedDocument {
                        work: work.to_string(),
                        line: b.line,
                        strategy: Strategy::NeighborPropagation,
                        xml,
                    }),
                    Ok(None) => {}
                    Err(err) => faults.push((b.line, err)),
                }
            }
        }

        (corrections, faults)
    }
}

/// The previous slot, if it holds the line immediately before `line`.
fn adjacent_previous(slots: &[Slot], line: LineId) -> Option<&LineDocument> {
    let last = slots.last()?;
    if last.line + 1 != line {
        return None;
    }
    last.doc.as_ref()
}

/// Write corrected copies under `root`. Returns the written paths.
pub fn write_corrections(root: &Path, corrections: &[CorrectedDocument]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(corrections.len());
    for doc in corrections {
        let path = doc.path_under(root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &doc.xml)?;
        info!(path = %path.display(), strategy = %doc.strategy, "wrote corrected line");
        written.push(path);
    }
    Ok(written)
}

/// Combine per-work outcomes into one report and one list of corrections.
pub fn combine(outcomes: Vec<WorkOutcome>) -> (Report, Vec<CorrectedDocument>) {
    let mut report = Report::new();
    let mut corrections = Vec::new();
    for outcome in outcomes {
        report.merge(outcome.report);
        corrections.extend(outcome.corrections);
    }
    (report, corrections)
}

/// Number of corrections per strategy.
pub fn corrections_by_strategy(corrections: &[CorrectedDocument]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for doc in corrections {
        *counts.entry(doc.strategy.as_str()).or_insert(0) += 1;
    }
    counts
}
