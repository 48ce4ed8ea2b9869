//! Repair passes over flagged lines.
//!
//! Both passes produce a corrected copy of a line document and leave the
//! original alone. They never invent values: duplicate normalization only
//! toggles visibility, and neighbor propagation only copies a value that two
//! surrounding lines agree on.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checker::{matching, rebase_keys, Agreement, CheckOptions, Finding};
use crate::error::Result;
use crate::model::{Category, Clef, Key, KeySignature, Staff, TimeSignature, TimeSymbol};
use crate::parser::{attribute_blocks, AttributeBlock, LineScan, PartTimeline};
use crate::patch::{self, Patch};
use crate::report::LineFindings;
use crate::source::LineId;

/// Which pass produced a correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Show the first declaration of a flagged category, hide equal repeats
    DuplicateDeclarations,
    /// Overwrite an outlier line with the value its neighbors agree on
    NeighborPropagation,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::DuplicateDeclarations => "duplicate-declarations",
            Strategy::NeighborPropagation => "neighbor-propagation",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line document as it was checked.
#[derive(Debug)]
pub struct LineDocument {
    pub line: LineId,
    pub xml: String,
    pub scan: LineScan,
}

/// Corrected copy of one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectedDocument {
    pub work: String,
    pub line: LineId,
    pub strategy: Strategy,
    pub xml: String,
}

impl CorrectedDocument {
    pub fn file_name(&self) -> String {
        format!("{}.{:02}.musicxml", self.work, self.line)
    }

    /// `<root>/<strategy>/<work>/<work>.<NN>.musicxml`
    pub fn path_under(&self, root: &Path) -> PathBuf {
        root.join(self.strategy.as_str())
            .join(&self.work)
            .join(self.file_name())
    }
}

/// Serialized form of a declaration element.
pub trait Rewrite: Agreement {
    /// Child elements
    fn content(&self) -> String;

    /// Start-tag attributes that carry part of the value; `None` removes one.
    fn tag_attributes(&self) -> Vec<(&'static str, Option<&'static str>)> {
        Vec::new()
    }
}

impl Rewrite for Clef {
    fn content(&self) -> String {
        let mut out = format!("<sign>{}</sign>", self.sign.as_str());
        if let Some(line) = self.line {
            out.push_str(&format!("<line>{line}</line>"));
        }
        if let Some(shift) = self.octave_change.filter(|&s| s != 0) {
            out.push_str(&format!("<clef-octave-change>{shift}</clef-octave-change>"));
        }
        out
    }
}

impl Rewrite for Key {
    fn content(&self) -> String {
        match self.restated() {
            KeySignature::Fifths { fifths, .. } => {
                let mut out = format!("<fifths>{fifths}</fifths>");
                if let Some(mode) = &self.mode {
                    out.push_str(&format!("<mode>{mode}</mode>"));
                }
                out
            }
            KeySignature::Alterations(list) => list
                .iter()
                .map(|a| format!("<key-step>{}</key-step><key-alter>{}</key-alter>", a.step, a.alter))
                .collect(),
        }
    }
}

impl Rewrite for TimeSignature {
    fn content(&self) -> String {
        self.beats
            .iter()
            .map(|b| format!("<beats>{}</beats><beat-type>{}</beat-type>", b.beats, b.beat_type))
            .collect()
    }

    fn tag_attributes(&self) -> Vec<(&'static str, Option<&'static str>)> {
        let symbol = match self.symbol {
            TimeSymbol::Normal => None,
            other => Some(other.as_str()),
        };
        vec![("symbol", symbol)]
    }
}

// ─── Duplicate declarations ──────────────────────────────────────────

/// Normalize the printed flags of every flagged category in a line.
///
/// For each part with a silent-change finding, the first declaration of the
/// category on the flagged staff is made visible and later declarations with
/// the same value are hidden. Returns `None` when nothing had to change.
pub fn normalize_duplicates(
    xml: &str,
    findings: &LineFindings,
    options: &CheckOptions,
) -> Result<Option<String>> {
    let blocks = attribute_blocks(xml)?;
    let mut patches = Vec::new();
    let mut touched = HashSet::new();

    for (part, part_findings) in findings {
        let Some(part_blocks) = blocks.get(part) else {
            debug!(part = %part, "flagged part not found in document");
            continue;
        };
        for finding in part_findings.iter().filter(|f| f.kind.is_silent_change()) {
            let mut pass = Normalize {
                xml,
                blocks: part_blocks,
                staff: finding.staff,
                options,
                patches: &mut patches,
                touched: &mut touched,
            };
            match finding.kind.category() {
                Category::Clef => pass.run::<Clef>(),
                Category::Key => pass.run::<Key>(),
                Category::Timesig => pass.run::<TimeSignature>(),
            }
        }
    }

    if patches.is_empty() {
        return Ok(None);
    }
    debug!(patches = patches.len(), "normalized printed flags");
    patch::apply(xml, patches).map(Some)
}

struct Normalize<'a> {
    xml: &'a str,
    blocks: &'a [AttributeBlock],
    staff: Staff,
    options: &'a CheckOptions,
    patches: &'a mut Vec<Patch>,
    touched: &'a mut HashSet<usize>,
}

impl Normalize<'_> {
    fn run<T: Agreement>(&mut self) {
        let (blocks, staff, options) = (self.blocks, self.staff, self.options);
        let mut first: Option<&T> = None;
        for block in blocks {
            let entries = T::entries(&block.attributes)
                .iter()
                .filter(|e| e.staff().matches(staff));
            for entry in entries {
                let wanted = match first {
                    None => {
                        first = Some(entry);
                        true
                    }
                    Some(shown) if entry.agrees(shown, options) => false,
                    Some(_) => continue,
                };
                let node = entry.node();
                if entry.printed() != wanted && self.touched.insert(node.start) {
                    self.patches.push(patch::set_print_object(self.xml, &node, wanted));
                }
            }
        }
    }
}

// ─── Neighbor propagation ────────────────────────────────────────────

/// Rewrite `faulty` with the values its neighbors agree on.
///
/// A category on a staff is rewritten only when it is flagged both on the
/// faulty line and on the line after it, and the attributes in force at the
/// end of `before` equal those at the start of `after`. Every declaration
/// of that category in the faulty part is then overwritten with the agreed
/// value. Returns `None` when the condition holds nowhere.
pub fn propagate_neighbors(
    before: &LineDocument,
    faulty: &LineDocument,
    after: &LineDocument,
    faulty_findings: &LineFindings,
    after_findings: &LineFindings,
    options: &CheckOptions,
) -> Result<Option<String>> {
    let mut patches = Vec::new();
    let mut touched = HashSet::new();

    for (part, flagged) in faulty_findings {
        let (Some(prev), Some(mid), Some(next)) = (
            before.scan.part(part),
            faulty.scan.part(part),
            after.scan.part(part),
        ) else {
            continue;
        };
        let confirmed = after_findings.get(part).map_or(&[][..], Vec::as_slice);

        for finding in flagged.iter().filter(|f| f.kind.is_silent_change()) {
            if !confirmed.iter().any(|c| flagged_together(finding, c)) {
                continue;
            }
            let mut pass = Propagate {
                xml: &faulty.xml,
                before: prev,
                faulty: mid,
                after: next,
                staff: finding.staff,
                options,
                patches: &mut patches,
                touched: &mut touched,
            };
            let applied = match finding.kind.category() {
                Category::Clef => pass.run::<Clef>(),
                Category::Key => pass.run::<Key>(),
                Category::Timesig => pass.run::<TimeSignature>(),
            };
            if !applied {
                debug!(
                    line = faulty.line,
                    part = %part,
                    category = %finding.kind.category(),
                    "neighbors disagree, left for review"
                );
            }
        }
    }

    if patches.is_empty() {
        return Ok(None);
    }
    patch::apply(&faulty.xml, patches).map(Some)
}

fn flagged_together(a: &Finding, b: &Finding) -> bool {
    a.kind == b.kind && a.staff.matches(b.staff)
}

struct Propagate<'a> {
    xml: &'a str,
    before: &'a PartTimeline,
    faulty: &'a PartTimeline,
    after: &'a PartTimeline,
    staff: Staff,
    options: &'a CheckOptions,
    patches: &'a mut Vec<Patch>,
    touched: &'a mut HashSet<usize>,
}

impl Propagate<'_> {
    /// Returns whether the neighbors proved a value.
    fn run<T: Rewrite>(&mut self) -> bool {
        let (before, faulty, after) = (self.before, self.faulty, self.after);
        let (staff, options) = (self.staff, self.options);

        let after_initial = rebase_keys(&before.final_attributes, &after.initial);
        let from_before = matching(T::entries(&before.final_attributes), staff);
        let from_after = matching(T::entries(&after_initial), staff);
        let correct = match (from_before.as_slice(), from_after.as_slice()) {
            ([correct], [confirm]) if correct.agrees(confirm, options) => *correct,
            _ => return false,
        };

        let content = correct.content();
        let attributes = correct.tag_attributes();
        for block in &faulty.blocks {
            let entries = T::entries(&block.attributes)
                .iter()
                .filter(|e| e.staff().matches(staff));
            for entry in entries {
                let node = entry.node();
                if !entry.agrees(correct, options) && self.touched.insert(node.start) {
                    self.patches.push(patch::replace_content(self.xml, &node, &attributes, &content));
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Alteration, ClefSign, NodeRef, Step, TimeBeat, TimeSymbol};
    use pretty_assertions::assert_eq;

    fn key(absolute: Vec<Alteration>, mode: Option<&str>) -> Key {
        Key {
            node: NodeRef::default(),
            staff: Staff::All,
            printed: true,
            signature: KeySignature::Alterations(absolute.clone()),
            mode: mode.map(str::to_string),
            absolute,
        }
    }

    #[test]
    fn clef_content_keeps_line_and_octave() {
        let clef = Clef {
            node: NodeRef::default(),
            sign: ClefSign::G,
            line: Some(2),
            octave_change: Some(-1),
            staff: Staff::Specific(1),
            printed: true,
        };
        assert_eq!(
            clef.content(),
            "<sign>G</sign><line>2</line><clef-octave-change>-1</clef-octave-change>"
        );
    }

    #[test]
    fn traditional_key_is_restated_as_fifths() {
        let d_major = key(
            vec![Alteration::new(Step::C, 1), Alteration::new(Step::F, 1)],
            Some("major"),
        );
        assert_eq!(d_major.content(), "<fifths>2</fifths><mode>major</mode>");
    }

    #[test]
    fn unusual_key_is_restated_as_steps() {
        let odd = key(vec![Alteration::new(Step::B, -1), Alteration::new(Step::F, 1)], None);
        assert_eq!(
            odd.content(),
            "<key-step>B</key-step><key-alter>-1</key-alter><key-step>F</key-step><key-alter>1</key-alter>"
        );
    }

    #[test]
    fn compound_time_content() {
        let time = TimeSignature {
            node: NodeRef::default(),
            beats: vec![TimeBeat { beats: 3, beat_type: 8 }, TimeBeat { beats: 2, beat_type: 4 }],
            staff: Staff::All,
            symbol: TimeSymbol::Normal,
            printed: true,
        };
        assert_eq!(
            time.content(),
            "<beats>3</beats><beat-type>8</beat-type><beats>2</beats><beat-type>4</beat-type>"
        );
    }

    #[test]
    fn time_symbol_travels_in_the_start_tag() {
        let mut time = TimeSignature {
            node: NodeRef::default(),
            beats: vec![TimeBeat { beats: 2, beat_type: 2 }],
            staff: Staff::All,
            symbol: TimeSymbol::Cut,
            printed: true,
        };
        assert_eq!(time.tag_attributes(), vec![("symbol", Some("cut"))]);
        time.symbol = TimeSymbol::Normal;
        assert_eq!(time.tag_attributes(), vec![("symbol", None)]);
    }

    #[test]
    fn correction_path_layout() {
        let doc = CorrectedDocument {
            work: "w7".into(),
            line: 3,
            strategy: Strategy::NeighborPropagation,
            xml: String::new(),
        };
        assert_eq!(
            doc.path_under(Path::new("out")),
            Path::new("out/neighbor-propagation/w7/w7.03.musicxml")
        );
    }
}
