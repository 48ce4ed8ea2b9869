//! Document walker. Follows a line's parts through notes, backups, forwards
//! and attribute blocks, building one attribute timeline per part.

use std::collections::HashMap;

use roxmltree::{Document, Node};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::*;
use crate::patch::start_tag_end;
use crate::state::{ScoreState, Time};

/// Everything the walker learned from one line document.
#[derive(Debug, Default)]
pub struct LineScan {
    /// Parts that were walked to the end, in document order
    pub parts: Vec<PartTimeline>,
    /// Parts whose walk hit a hard fault
    pub faults: Vec<PartFault>,
}

impl LineScan {
    pub fn part(&self, id: &str) -> Option<&PartTimeline> {
        self.parts.iter().find(|p| p.id == id)
    }
}

/// A part that could not be walked.
#[derive(Debug)]
pub struct PartFault {
    pub part_id: String,
    pub error: Error,
}

/// Attribute state of one part across one line.
#[derive(Debug, Clone)]
pub struct PartTimeline {
    /// Part identifier (e.g., "P1")
    pub id: String,
    /// Part name from the part list
    pub name: String,
    pub staff_count: u32,
    /// Attributes in force at the start of the line
    pub initial: Attributes,
    /// Attributes in force at the end of the line
    pub final_attributes: Attributes,
    /// Every attribute block, in document order
    pub blocks: Vec<AttributeBlock>,
}

/// One `<attributes>` element and where it sits on the clock.
#[derive(Debug, Clone)]
pub struct AttributeBlock {
    /// Number of the enclosing measure
    pub measure: String,
    pub time: Time,
    pub attributes: Attributes,
}

/// Walk a MusicXML line document.
///
/// Errors here concern the whole document; faults confined to a part are
/// collected in [`LineScan::faults`].
pub fn scan_musicxml(xml: &str) -> Result<LineScan> {
    // MusicXML files include a DOCTYPE declaration, so we must allow DTDs
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let doc = Document::parse_with_options(xml, options)?;
    let root = doc.root_element();

    if root.tag_name().name() != "score-partwise" {
        return Err(Error::UnsupportedRoot(root.tag_name().name().to_string()));
    }

    let names = root
        .children()
        .find(|n| n.has_tag_name("part-list"))
        .map(|n| parse_part_list(&n))
        .unwrap_or_default();

    let mut scan = LineScan::default();
    for part in root.children().filter(|n| n.has_tag_name("part")) {
        let id = part.attribute("id").unwrap_or("").to_string();
        let name = names.get(&id).cloned().unwrap_or_default();
        match walk_part(xml, &part) {
            Ok((state, blocks)) => {
                debug!(part = %id, blocks = blocks.len(), "walked part");
                scan.parts.push(PartTimeline {
                    id,
                    name,
                    staff_count: state.staff_count(),
                    initial: state.initial_attributes(),
                    final_attributes: state.final_attributes(),
                    blocks,
                });
            }
            Err(error) => {
                warn!(part = %id, %error, "part walk aborted");
                scan.faults.push(PartFault { part_id: id, error });
            }
        }
    }

    Ok(scan)
}

/// Every attribute block of every part, without building timelines.
///
/// Used by the repair passes to re-walk a raw document.
pub fn attribute_blocks(xml: &str) -> Result<HashMap<String, Vec<AttributeBlock>>> {
    Ok(scan_musicxml(xml)?
        .parts
        .into_iter()
        .map(|p| (p.id, p.blocks))
        .collect())
}

// ─── Part List ───────────────────────────────────────────────────────

fn parse_part_list(node: &Node) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for child in node.children().filter(|n| n.has_tag_name("score-part")) {
        let id = child.attribute("id").unwrap_or("").to_string();
        let name = child
            .children()
            .find(|n| n.has_tag_name("part-name"))
            .and_then(|n| n.text())
            .map(|t| t.trim().to_string())
            .unwrap_or_default();
        names.insert(id, name);
    }
    names
}

// ─── Part (measures) ─────────────────────────────────────────────────

fn walk_part(xml: &str, node: &Node) -> Result<(ScoreState, Vec<AttributeBlock>)> {
    let mut state = ScoreState::new();
    let mut blocks = Vec::new();

    for measure in node.children().filter(|n| n.has_tag_name("measure")) {
        state.new_measure()?;
        let number = measure.attribute("number").unwrap_or("").to_string();

        for child in measure.children().filter(|n| n.is_element()) {
            match child.tag_name().name() {
                "note" => visit_note(&child, &mut state)?,
                "backup" => visit_shift(&child, &mut state, false)?,
                "forward" => visit_shift(&child, &mut state, true)?,
                "attributes" => {
                    let attributes = visit_attributes(xml, &child, &mut state)?;
                    blocks.push(AttributeBlock {
                        measure: number.clone(),
                        time: state.current_time(),
                        attributes,
                    });
                }
                _ => {}
            }
        }
    }
    state.move_buffer()?;

    Ok((state, blocks))
}

// ─── Note / Backup / Forward ─────────────────────────────────────────

/// Chord members share the onset of the note before them and grace notes
/// take no time, so neither touches the clock. A regular note settles the
/// previous note's duration and leaves its own pending.
fn visit_note(node: &Node, state: &mut ScoreState) -> Result<()> {
    let is_chord = node.children().any(|n| n.has_tag_name("chord"));
    let duration = node.children().find(|n| n.has_tag_name("duration"));
    let duration = match (is_chord, duration) {
        (false, Some(d)) => required_i64(&d)?,
        _ => return Ok(()),
    };
    state.move_buffer()?;
    let advance = state.to_time(duration);
    state.set_buffer(advance);
    Ok(())
}

fn visit_shift(node: &Node, state: &mut ScoreState, forward: bool) -> Result<()> {
    let duration = node
        .children()
        .find(|n| n.has_tag_name("duration"))
        .ok_or_else(|| Error::malformed(node.tag_name().name(), "missing <duration>"))?;
    let value = required_i64(&duration)?;
    let increment = state.to_time(value);
    state.increment_time(if forward { increment } else { -increment })
}

// ─── Attributes ──────────────────────────────────────────────────────

fn visit_attributes(xml: &str, node: &Node, state: &mut ScoreState) -> Result<Attributes> {
    state.move_buffer()?;

    let mut attrs = Attributes {
        node: Some(node_ref(xml, node)),
        ..Default::default()
    };
    let mut key_nodes = Vec::new();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "divisions" => {
                let divisions = required_i64(&child)?;
                state.set_divisions(divisions)?;
                attrs.divisions = Some(divisions);
            }
            "staves" => {
                let staves = required_u32(&child)?;
                state.change_staves(staves)?;
                attrs.staves = Some(staves);
            }
            "clef" => attrs.clefs.push(parse_clef(xml, &child)?),
            "time" => attrs.times.push(parse_time(xml, &child)?),
            "key" => key_nodes.push(child),
            _ => {}
        }
    }

    // Relative keys compose onto whatever key is in force for their staff.
    for key_node in key_nodes {
        let mut key = parse_key(xml, &key_node)?;
        key.absolute = key.signature.resolve(state.current_attributes().key_for(key.staff))?;
        attrs.keys.push(key);
    }

    if !attrs.is_empty() {
        state.record(attrs.clone())?;
    }

    Ok(attrs)
}

fn parse_clef(xml: &str, node: &Node) -> Result<Clef> {
    let staff = Staff::Specific(number_attribute(node)?.unwrap_or(1));
    let mut sign = None;
    let mut line = None;
    let mut octave_change = None;

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "sign" => {
                let text = child.text().unwrap_or("");
                sign = Some(
                    ClefSign::parse(text)
                        .ok_or_else(|| Error::malformed("sign", format!("unknown clef sign '{text}'")))?,
                );
            }
            "line" => line = Some(required_i32(&child)?),
            "clef-octave-change" => octave_change = Some(required_i32(&child)?),
            _ => {}
        }
    }

    Ok(Clef {
        node: node_ref(xml, node),
        sign: sign.ok_or_else(|| Error::malformed("clef", "missing <sign>"))?,
        line,
        octave_change,
        staff,
        printed: printed(node),
    })
}

fn parse_time(xml: &str, node: &Node) -> Result<TimeSignature> {
    let staff = number_attribute(node)?.map_or(Staff::All, Staff::Specific);
    let symbol = match node.attribute("symbol") {
        None => TimeSymbol::Normal,
        Some(s) => TimeSymbol::parse(s).ok_or_else(|| Error::UnsupportedTimeSymbol(s.to_string()))?,
    };

    let mut beats = Vec::new();
    let mut pending: Option<u32> = None;
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "senza-misura" => return Err(Error::UnsupportedTimeSymbol("senza-misura".to_string())),
            "beats" => {
                if pending.is_some() {
                    return Err(Error::malformed("time", "<beats> without <beat-type>"));
                }
                pending = Some(parse_beats(&child)?);
            }
            "beat-type" => {
                let beat_type = required_u32(&child)?;
                let count = pending
                    .take()
                    .ok_or_else(|| Error::malformed("time", "<beat-type> without <beats>"))?;
                beats.push(TimeBeat {
                    beats: count,
                    beat_type,
                });
            }
            _ => {}
        }
    }

    if pending.is_some() || beats.is_empty() {
        return Err(Error::malformed("time", "unpaired or missing beats"));
    }

    Ok(TimeSignature {
        node: node_ref(xml, node),
        beats,
        staff,
        symbol,
        printed: printed(node),
    })
}

/// `<beats>` may hold a composite numerator such as `3+2`.
fn parse_beats(node: &Node) -> Result<u32> {
    let text = node.text().unwrap_or("").trim();
    text.split('+').try_fold(0u32, |total, part| {
        let count = part
            .trim()
            .parse::<u32>()
            .map_err(|_| Error::malformed("beats", format!("'{text}' is not a beat count")))?;
        total
            .checked_add(count)
            .ok_or_else(|| Error::malformed("beats", format!("'{text}' is too large")))
    })
}

fn parse_key(xml: &str, node: &Node) -> Result<Key> {
    let staff = number_attribute(node)?.map_or(Staff::All, Staff::Specific);
    let mut fifths = None;
    let mut cancel = None;
    let mut mode = None;
    let mut steps = Vec::new();
    let mut alters = Vec::new();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "fifths" => fifths = Some(required_i32(&child)?),
            "cancel" => cancel = Some(required_i32(&child)?),
            "mode" => mode = child.text().map(|t| t.trim().to_string()),
            "key-step" => {
                let text = child.text().unwrap_or("");
                steps.push(
                    Step::parse(text)
                        .ok_or_else(|| Error::malformed("key-step", format!("unknown step '{text}'")))?,
                );
            }
            "key-alter" => alters.push(parse_alter(&child)?),
            _ => {}
        }
    }

    let signature = match fifths {
        Some(fifths) => KeySignature::Fifths { fifths, cancel },
        None if !steps.is_empty() || !alters.is_empty() => {
            if steps.len() != alters.len() {
                return Err(Error::MismatchedKeyAlterations {
                    steps: steps.len(),
                    alters: alters.len(),
                });
            }
            KeySignature::Alterations(
                steps
                    .into_iter()
                    .zip(alters)
                    .map(|(step, alter)| Alteration::new(step, alter))
                    .collect(),
            )
        }
        None => return Err(Error::malformed("key", "neither <fifths> nor <key-step>")),
    };

    Ok(Key {
        node: node_ref(xml, node),
        staff,
        printed: printed(node),
        signature,
        mode,
        absolute: Vec::new(),
    })
}

/// Whole-semitone alterations only; microtonal keys are not modelled.
fn parse_alter(node: &Node) -> Result<i32> {
    let text = node.text().unwrap_or("").trim();
    let value: f64 = text
        .parse()
        .map_err(|_| Error::malformed("key-alter", format!("'{text}' is not a number")))?;
    if value.fract() != 0.0 {
        return Err(Error::malformed("key-alter", format!("microtonal alteration '{text}'")));
    }
    Ok(value as i32)
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn node_ref(xml: &str, node: &Node) -> NodeRef {
    let range = node.range();
    NodeRef {
        start: range.start,
        end: range.end,
        tag_end: start_tag_end(xml, range.start),
    }
}

fn printed(node: &Node) -> bool {
    node.attribute("print-object") != Some("no")
}

fn number_attribute(node: &Node) -> Result<Option<u32>> {
    node.attribute("number")
        .map(|n| {
            n.trim().parse::<u32>().map_err(|_| {
                Error::malformed(node.tag_name().name(), format!("staff number '{n}'"))
            })
        })
        .transpose()
}

fn required_i64(node: &Node) -> Result<i64> {
    let text = node.text().unwrap_or("").trim();
    text.parse()
        .map_err(|_| Error::malformed(node.tag_name().name(), format!("'{text}' is not an integer")))
}

fn required_i32(node: &Node) -> Result<i32> {
    let text = node.text().unwrap_or("").trim();
    text.parse()
        .map_err(|_| Error::malformed(node.tag_name().name(), format!("'{text}' is not an integer")))
}

fn required_u32(node: &Node) -> Result<u32> {
    let text = node.text().unwrap_or("").trim();
    text.parse()
        .map_err(|_| Error::malformed(node.tag_name().name(), format!("'{text}' is not a count")))
}
