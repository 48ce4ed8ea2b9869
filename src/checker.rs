//! Cross-line consistency checks.
//!
//! The attributes left in force at the end of one line are compared with the
//! attributes declared at the start of the next one, category by category
//! and staff by staff.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Attributes, Category, Clef, Declaration, Key, Staff, TimeSignature};
use crate::parser::LineScan;

/// What a cross-line check can find.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No clef declared at the start of the line
    NoClef,
    /// No key declared at the start of the line
    NoKey,
    /// No time signature declared at the start of the line
    NoTimesig,
    /// The clef changed across the line break without being printed
    #[serde(rename = "ClefChangeNoPrintError")]
    ClefChangeNoPrint,
    /// The key changed across the line break without being printed
    #[serde(rename = "KeyChangeNoPrintError")]
    KeyChangeNoPrint,
    /// The time signature changed across the line break without being printed
    #[serde(rename = "TimesigChangeNoPrintError")]
    TimesigChangeNoPrint,
}

impl ErrorKind {
    pub fn missing(category: Category) -> Self {
        match category {
            Category::Clef => ErrorKind::NoClef,
            Category::Key => ErrorKind::NoKey,
            Category::Timesig => ErrorKind::NoTimesig,
        }
    }

    pub fn silent_change(category: Category) -> Self {
        match category {
            Category::Clef => ErrorKind::ClefChangeNoPrint,
            Category::Key => ErrorKind::KeyChangeNoPrint,
            Category::Timesig => ErrorKind::TimesigChangeNoPrint,
        }
    }

    pub fn category(self) -> Category {
        match self {
            ErrorKind::NoClef | ErrorKind::ClefChangeNoPrint => Category::Clef,
            ErrorKind::NoKey | ErrorKind::KeyChangeNoPrint => Category::Key,
            ErrorKind::NoTimesig | ErrorKind::TimesigChangeNoPrint => Category::Timesig,
        }
    }

    pub fn is_silent_change(self) -> bool {
        matches!(
            self,
            ErrorKind::ClefChangeNoPrint | ErrorKind::KeyChangeNoPrint | ErrorKind::TimesigChangeNoPrint
        )
    }
}

/// One finding on one staff of a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Finding {
    pub kind: ErrorKind,
    pub staff: Staff,
}

/// Comparison policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOptions {
    /// Treat time signatures with equal measure length (2/2 and 4/4) as equal
    pub time_equivalence: bool,
}

/// Value comparison for one attribute category.
pub trait Agreement: Declaration {
    fn agrees(&self, other: &Self, options: &CheckOptions) -> bool;
}

impl Agreement for Clef {
    fn agrees(&self, other: &Self, _options: &CheckOptions) -> bool {
        self.same_value(other)
    }
}

impl Agreement for Key {
    fn agrees(&self, other: &Self, _options: &CheckOptions) -> bool {
        self.compare(other)
    }
}

impl Agreement for TimeSignature {
    fn agrees(&self, other: &Self, options: &CheckOptions) -> bool {
        if options.time_equivalence {
            self.equivalent(other)
        } else {
            self.same_value(other)
        }
    }
}

/// Entries applying to `staff`: the exact staff if declared, otherwise every
/// entry whose scope matches through a wildcard.
pub fn matching<T: Declaration>(entries: &[T], staff: Staff) -> Vec<&T> {
    if let Some(exact) = entries.iter().find(|e| e.staff() == staff) {
        return vec![exact];
    }
    entries.iter().filter(|e| e.staff().matches(staff)).collect()
}

/// Compare the end of one line with the start of the next.
pub fn check_transition(previous: &Attributes, next: &Attributes, options: &CheckOptions) -> Vec<Finding> {
    let next = rebase_keys(previous, next);
    let mut findings = Vec::new();
    check_category::<Clef>(previous, &next, options, &mut findings);
    check_category::<Key>(previous, &next, options, &mut findings);
    check_category::<TimeSignature>(previous, &next, options, &mut findings);
    findings
}

/// Compose keys that cancel onto the key `previous` leaves in force.
///
/// A line is walked on its own, so a relative key at its start was resolved
/// against nothing. Keys that cannot be composed keep their walked value.
pub fn rebase_keys<'a>(previous: &Attributes, next: &'a Attributes) -> Cow<'a, Attributes> {
    if !next.keys.iter().any(|k| k.signature.has_cancellation()) {
        return Cow::Borrowed(next);
    }
    let mut rebased = next.clone();
    for key in rebased.keys.iter_mut().filter(|k| k.signature.has_cancellation()) {
        match key.signature.resolve(previous.key_for(key.staff)) {
            Ok(absolute) => key.absolute = absolute,
            Err(err) => debug!(staff = %key.staff, error = %err, "key not composed across the line break"),
        }
    }
    Cow::Owned(rebased)
}

fn check_category<T: Agreement>(
    previous: &Attributes,
    next: &Attributes,
    options: &CheckOptions,
    findings: &mut Vec<Finding>,
) {
    let declared = T::entries(next);
    if declared.is_empty() {
        findings.push(Finding {
            kind: ErrorKind::missing(T::CATEGORY),
            staff: Staff::All,
        });
        return;
    }

    let before = T::entries(previous);
    for entry in declared {
        let matches = matching(before, entry.staff());
        if matches.is_empty() {
            findings.push(Finding {
                kind: ErrorKind::missing(T::CATEGORY),
                staff: entry.staff(),
            });
            continue;
        }

        let changed = matches.iter().any(|m| !entry.agrees(m, options));
        if changed && !entry.printed() {
            findings.push(Finding {
                kind: ErrorKind::silent_change(T::CATEGORY),
                staff: entry.staff(),
            });
        }
    }
}

/// Check every part of `next` against the same part of `previous`.
///
/// Parts absent from the previous line have nothing to be compared with and
/// are skipped. Parts without findings are omitted.
pub fn check_lines(previous: &LineScan, next: &LineScan, options: &CheckOptions) -> Vec<(String, Vec<Finding>)> {
    let mut out = Vec::new();
    for part in &next.parts {
        let Some(before) = previous.part(&part.id) else {
            debug!(part = %part.id, "part has no predecessor, not checked");
            continue;
        };
        let findings = check_transition(&before.final_attributes, &part.initial, options);
        if !findings.is_empty() {
            out.push((part.id.clone(), findings));
        }
    }
    out
}
