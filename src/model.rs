//! Data model for the notation state declared by MusicXML attribute blocks.
//!
//! Every declaration keeps a back-reference to the element it was read from
//! ([`NodeRef`]), the staff it applies to and whether the engraving shows it.

use std::collections::BTreeMap;
use std::fmt;

use num_rational::Ratio;
use serde::{Deserialize, Serialize};

/// Staff scope of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Staff {
    /// Applies to every staff of the part
    All,
    /// A single staff (1-based)
    Specific(u32),
}

impl Staff {
    /// Two scopes match when they are equal or either one is the wildcard.
    pub fn matches(self, other: Staff) -> bool {
        self == other || self == Staff::All || other == Staff::All
    }
}

impl fmt::Display for Staff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Staff::All => f.write_str("all"),
            Staff::Specific(n) => write!(f, "{n}"),
        }
    }
}

/// Diatonic step letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Step {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
}

impl Step {
    pub fn parse(text: &str) -> Option<Step> {
        match text.trim() {
            "A" => Some(Step::A),
            "B" => Some(Step::B),
            "C" => Some(Step::C),
            "D" => Some(Step::D),
            "E" => Some(Step::E),
            "F" => Some(Step::F),
            "G" => Some(Step::G),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Step::A => "A",
            Step::B => "B",
            Step::C => "C",
            Step::D => "D",
            Step::E => "E",
            Step::F => "F",
            Step::G => "G",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of a source element inside the line's XML text (byte offsets).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeRef {
    /// Start of the element (the `<` of its start tag)
    pub start: usize,
    /// One past the end of the element
    pub end: usize,
    /// One past the `>` closing the start tag
    pub tag_end: usize,
}

impl NodeRef {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    pub fn tag_range(&self) -> std::ops::Range<usize> {
        self.start..self.tag_end
    }
}

/// The three attribute categories the checker tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Clef,
    Key,
    Timesig,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Clef => f.write_str("clef"),
            Category::Key => f.write_str("key"),
            Category::Timesig => f.write_str("time"),
        }
    }
}

// ─── Clef ────────────────────────────────────────────────────────────

/// Clef sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClefSign {
    G,
    F,
    C,
    Tab,
    Jianpu,
    None,
}

impl ClefSign {
    /// Percussion clefs are read as treble clefs.
    pub fn parse(text: &str) -> Option<ClefSign> {
        match text.trim() {
            "G" | "percussion" => Some(ClefSign::G),
            "F" => Some(ClefSign::F),
            "C" => Some(ClefSign::C),
            "TAB" => Some(ClefSign::Tab),
            "jianpu" => Some(ClefSign::Jianpu),
            "none" => Some(ClefSign::None),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClefSign::G => "G",
            ClefSign::F => "F",
            ClefSign::C => "C",
            ClefSign::Tab => "TAB",
            ClefSign::Jianpu => "jianpu",
            ClefSign::None => "none",
        }
    }
}

/// Clef declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clef {
    pub node: NodeRef,
    pub sign: ClefSign,
    /// Staff line the clef sits on
    pub line: Option<i32>,
    /// Octave transposition (e.g., -1 for an octave-lower treble clef)
    pub octave_change: Option<i32>,
    pub staff: Staff,
    pub printed: bool,
}

impl Clef {
    /// Same sign and octave shift. The staff line is not part of the value.
    pub fn same_value(&self, other: &Clef) -> bool {
        self.sign == other.sign
            && self.octave_change.unwrap_or(0) == other.octave_change.unwrap_or(0)
    }
}

// ─── Time signature ──────────────────────────────────────────────────

/// Time signature symbol kinds the engine models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeSymbol {
    Normal,
    Common,
    Cut,
    SingleNumber,
}

impl TimeSymbol {
    pub fn parse(text: &str) -> Option<TimeSymbol> {
        match text.trim() {
            "normal" => Some(TimeSymbol::Normal),
            "common" => Some(TimeSymbol::Common),
            "cut" => Some(TimeSymbol::Cut),
            "single-number" => Some(TimeSymbol::SingleNumber),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeSymbol::Normal => "normal",
            TimeSymbol::Common => "common",
            TimeSymbol::Cut => "cut",
            TimeSymbol::SingleNumber => "single-number",
        }
    }
}

/// One `beats`/`beat-type` pair of a (possibly compound) signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeBeat {
    pub beats: u32,
    pub beat_type: u32,
}

/// Time signature declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub node: NodeRef,
    pub beats: Vec<TimeBeat>,
    pub staff: Staff,
    pub symbol: TimeSymbol,
    pub printed: bool,
}

impl TimeSignature {
    /// Same beat structure, pair by pair.
    pub fn same_value(&self, other: &TimeSignature) -> bool {
        self.beats == other.beats
    }

    /// Length of a measure in whole notes.
    pub fn measure_length(&self) -> Ratio<i64> {
        self.beats
            .iter()
            .filter(|b| b.beat_type != 0)
            .map(|b| Ratio::new(i64::from(b.beats), i64::from(b.beat_type)))
            .fold(Ratio::from_integer(0), |acc, r| acc + r)
    }

    /// Numerically equivalent: equal measure length (e.g. 2/2 and 4/4).
    pub fn equivalent(&self, other: &TimeSignature) -> bool {
        self.measure_length() == other.measure_length()
    }
}

// ─── Key signature ───────────────────────────────────────────────────

/// A single step alteration: +1 sharp, -1 flat, 0 natural.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Alteration {
    pub step: Step,
    pub alter: i32,
}

impl Alteration {
    pub fn new(step: Step, alter: i32) -> Self {
        Self { step, alter }
    }

    pub fn is_natural(&self) -> bool {
        self.alter == 0
    }
}

/// The two equivalent encodings of a key signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeySignature {
    /// Traditional key: signed count on the circle of fifths
    Fifths { fifths: i32, cancel: Option<i32> },
    /// Non-traditional key: explicit alterations in declaration order
    Alterations(Vec<Alteration>),
}

/// Key signature declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    pub node: NodeRef,
    pub staff: Staff,
    pub printed: bool,
    pub signature: KeySignature,
    /// Mode (e.g., "major", "minor")
    pub mode: Option<String>,
    /// Sharps and flats in force once this key applies, sorted by step
    pub absolute: Vec<Alteration>,
}

// ─── Attributes ──────────────────────────────────────────────────────

/// A declaration scoped to a staff and possibly hidden in the engraving.
pub trait Declaration: Clone {
    const CATEGORY: Category;

    fn staff(&self) -> Staff;
    fn printed(&self) -> bool;
    fn node(&self) -> NodeRef;
    fn entries(attrs: &Attributes) -> &[Self];
}

impl Declaration for Clef {
    const CATEGORY: Category = Category::Clef;

    fn staff(&self) -> Staff {
        self.staff
    }
    fn printed(&self) -> bool {
        self.printed
    }
    fn node(&self) -> NodeRef {
        self.node
    }
    fn entries(attrs: &Attributes) -> &[Self] {
        &attrs.clefs
    }
}

impl Declaration for Key {
    const CATEGORY: Category = Category::Key;

    fn staff(&self) -> Staff {
        self.staff
    }
    fn printed(&self) -> bool {
        self.printed
    }
    fn node(&self) -> NodeRef {
        self.node
    }
    fn entries(attrs: &Attributes) -> &[Self] {
        &attrs.keys
    }
}

impl Declaration for TimeSignature {
    const CATEGORY: Category = Category::Timesig;

    fn staff(&self) -> Staff {
        self.staff
    }
    fn printed(&self) -> bool {
        self.printed
    }
    fn node(&self) -> NodeRef {
        self.node
    }
    fn entries(attrs: &Attributes) -> &[Self] {
        &attrs.times
    }
}

/// Musical attributes declared by one attribute block, or the composition of
/// several of them. Each category holds at most one entry per staff scope
/// once merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    /// The `<attributes>` element this was read from
    pub node: Option<NodeRef>,
    /// Divisions per quarter note
    pub divisions: Option<i64>,
    /// Number of staves in the part
    pub staves: Option<u32>,
    pub clefs: Vec<Clef>,
    pub keys: Vec<Key>,
    pub times: Vec<TimeSignature>,
}

impl Attributes {
    pub fn is_empty(&self) -> bool {
        self.clefs.is_empty() && self.keys.is_empty() && self.times.is_empty()
    }

    /// Overlay `other` on top of `self`, staff by staff.
    ///
    /// A key for all staves in `other` discards every earlier key first;
    /// clefs and time signatures only replace the staves they name.
    pub fn merge(&self, other: &Attributes) -> Attributes {
        Attributes {
            node: self.node.or(other.node),
            divisions: other.divisions.or(self.divisions),
            staves: other.staves.or(self.staves),
            clefs: overlay(&self.clefs, &other.clefs, false),
            keys: overlay(&self.keys, &other.keys, true),
            times: overlay(&self.times, &other.times, false),
        }
    }

    pub fn has_category(&self, category: Category) -> bool {
        match category {
            Category::Clef => !self.clefs.is_empty(),
            Category::Key => !self.keys.is_empty(),
            Category::Timesig => !self.times.is_empty(),
        }
    }

    /// Key in force for `staff`: the exact staff first, then the wildcard.
    pub fn key_for(&self, staff: Staff) -> Option<&Key> {
        self.keys
            .iter()
            .find(|k| k.staff == staff)
            .or_else(|| self.keys.iter().find(|k| k.staff.matches(staff)))
    }
}

fn overlay<T: Declaration>(base: &[T], over: &[T], reset_on_all: bool) -> Vec<T> {
    let mut by_staff: BTreeMap<Staff, T> = BTreeMap::new();
    let reset = reset_on_all && over.iter().any(|item| item.staff() == Staff::All);
    if !reset {
        for item in base {
            by_staff.insert(item.staff(), item.clone());
        }
    }
    for item in over {
        by_staff.insert(item.staff(), item.clone());
    }
    by_staff.into_values().collect()
}
