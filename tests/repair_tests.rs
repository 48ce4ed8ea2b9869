//! Integration tests: both repair passes over the kyrie fixture work, whose
//! middle line silently switches to a bass clef, and over small inline lines.

use std::path::PathBuf;

use pretty_assertions::assert_eq;
use scoreline::report::LineFindings;
use scoreline::repair::{normalize_duplicates, propagate_neighbors, LineDocument};
use scoreline::{
    check_lines, scan_musicxml, CheckOptions, ClefSign, ErrorKind, Finding, Staff, TimeSymbol,
};

fn load(line: u32) -> LineDocument {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join(format!("fixtures/works/kyrie/kyrie.{line:02}.musicxml"));
    let xml = std::fs::read_to_string(&path).expect("fixture should exist");
    let scan = scan_musicxml(&xml).expect("fixture should walk");
    LineDocument { line, xml, scan }
}

fn findings(previous: &LineDocument, next: &LineDocument) -> LineFindings {
    check_lines(&previous.scan, &next.scan, &CheckOptions::default())
        .into_iter()
        .collect()
}

#[test]
fn both_sides_of_the_outlier_are_flagged() {
    let (l1, l2, l3) = (load(1), load(2), load(3));
    let silent_clef = vec![Finding {
        kind: ErrorKind::ClefChangeNoPrint,
        staff: Staff::Specific(1),
    }];
    assert_eq!(findings(&l1, &l2)["P1"], silent_clef);
    assert_eq!(findings(&l2, &l3)["P1"], silent_clef);
}

#[test]
fn duplicate_declarations_show_first_and_hide_repeats() {
    let (l1, l2) = (load(1), load(2));
    let flagged = findings(&l1, &l2);

    let fixed = normalize_duplicates(&l2.xml, &flagged, &CheckOptions::default())
        .unwrap()
        .expect("line 2 needs a repair");

    assert!(fixed.contains(
        "<clef print-object=\"yes\">\n          <sign>F</sign>\n          <line>4</line>\n        </clef>"
    ));
    assert!(fixed.contains(
        "<clef print-object=\"no\">\n          <sign>F</sign>\n          <line>4</line>\n        </clef>"
    ));
    // Key and time were not flagged and keep their markup
    assert!(fixed.contains("<key print-object=\"no\">"));
    assert!(fixed.contains("<time print-object=\"no\">"));
    assert_eq!(fixed.len(), l2.xml.len() + " print-object=\"no\"".len() + 1);

    let rescanned = scan_musicxml(&fixed).unwrap();
    let blocks = &rescanned.parts[0].blocks;
    assert!(blocks[0].attributes.clefs[0].printed);
    assert!(!blocks[1].attributes.clefs[0].printed);
}

#[test]
fn normalizing_is_idempotent() {
    let (l1, l2) = (load(1), load(2));
    let flagged = findings(&l1, &l2);
    let options = CheckOptions::default();

    let once = normalize_duplicates(&l2.xml, &flagged, &options).unwrap().unwrap();
    assert_eq!(normalize_duplicates(&once, &flagged, &options).unwrap(), None);
}

#[test]
fn unflagged_line_is_left_alone() {
    let l1 = load(1);
    assert_eq!(
        normalize_duplicates(&l1.xml, &LineFindings::new(), &CheckOptions::default()).unwrap(),
        None
    );
}

#[test]
fn neighbors_overwrite_the_middle_line() {
    let (l1, l2, l3) = (load(1), load(2), load(3));
    let options = CheckOptions::default();

    let fixed = propagate_neighbors(&l1, &l2, &l3, &findings(&l1, &l2), &findings(&l2, &l3), &options)
        .unwrap()
        .expect("neighbors agree on a treble clef");

    assert!(fixed.contains("<clef print-object=\"no\"><sign>G</sign><line>2</line></clef>"));
    assert!(fixed.contains("<clef><sign>G</sign><line>2</line></clef>"));
    assert!(!fixed.contains("<sign>F</sign>"));

    let repaired = LineDocument {
        line: 2,
        scan: scan_musicxml(&fixed).unwrap(),
        xml: fixed,
    };
    for clef in repaired.scan.parts[0].blocks.iter().flat_map(|b| &b.attributes.clefs) {
        assert_eq!(clef.sign, ClefSign::G);
    }
    assert!(findings(&l1, &repaired).is_empty());
    assert!(findings(&repaired, &l3).is_empty());
}

#[test]
fn no_rewrite_when_neighbors_disagree() {
    let (l2, l3) = (load(2), load(3));
    let options = CheckOptions::default();
    // With line 2 as its own "before", the end of line 2 (bass clef) does not
    // match the start of line 3 (treble clef), so nothing is proven.
    let faulty = load(3);
    let result = propagate_neighbors(&l2, &faulty, &l3, &findings(&l2, &l3), &findings(&l2, &l3), &options)
        .unwrap();
    assert_eq!(result, None);
}

#[test]
fn no_rewrite_without_a_finding_after_the_line() {
    let (l1, l2, l3) = (load(1), load(2), load(3));
    let result = propagate_neighbors(
        &l1,
        &l2,
        &l3,
        &findings(&l1, &l2),
        &LineFindings::new(),
        &CheckOptions::default(),
    )
    .unwrap();
    assert_eq!(result, None);
}

// ─── Inline lines ───────────────────────────────────────────────────

const CLEF: &str = "<clef><sign>G</sign><line>2</line></clef>";
const KEY: &str = "<key><fifths>0</fifths></key>";
const TIME: &str = "<time><beats>4</beats><beat-type>4</beat-type></time>";

/// A one-part line with one measure per attributes block.
fn inline(line: u32, measures: &[&str]) -> LineDocument {
    let body: String = measures
        .iter()
        .enumerate()
        .map(|(i, attributes)| {
            format!(
                r#"<measure number="{}"><attributes>{attributes}</attributes><note><duration>4</duration></note></measure>"#,
                i + 1
            )
        })
        .collect();
    let xml = format!(
        r#"<?xml version="1.0"?>
<score-partwise version="4.0">
  <part-list><score-part id="P1"><part-name>Alto</part-name></score-part></part-list>
  <part id="P1">{body}</part>
</score-partwise>"#
    );
    let scan = scan_musicxml(&xml).expect("line should walk");
    LineDocument { line, xml, scan }
}

#[test]
fn neighbors_overwrite_a_time_signature_and_its_symbol() {
    let before = inline(1, &[&format!("<divisions>1</divisions>{CLEF}{KEY}<time><beats>3</beats><beat-type>4</beat-type></time>")]);
    let faulty = inline(2, &[&format!(
        r#"<divisions>1</divisions>{CLEF}{KEY}<time symbol="cut" print-object="no"><beats>2</beats><beat-type>2</beat-type></time>"#
    )]);
    let after = inline(3, &[&format!(
        r#"<divisions>1</divisions>{CLEF}{KEY}<time print-object="no"><beats>3</beats><beat-type>4</beat-type></time>"#
    )]);
    let options = CheckOptions::default();

    let fixed = propagate_neighbors(
        &before,
        &faulty,
        &after,
        &findings(&before, &faulty),
        &findings(&faulty, &after),
        &options,
    )
    .unwrap()
    .expect("neighbors agree on 3/4");

    assert!(fixed.contains(r#"<time print-object="no"><beats>3</beats><beat-type>4</beat-type></time>"#));
    assert!(!fixed.contains("cut"));

    let rescanned = scan_musicxml(&fixed).unwrap();
    let time = &rescanned.parts[0].initial.times[0];
    assert_eq!(time.symbol, TimeSymbol::Normal);
    assert_eq!(time.beats[0].beats, 3);
    assert_eq!(time.beats[0].beat_type, 4);
}

#[test]
fn neighbors_restore_a_symbol_the_outlier_dropped() {
    let common = r#"<time symbol="common"><beats>4</beats><beat-type>4</beat-type></time>"#;
    let before = inline(1, &[&format!("<divisions>1</divisions>{CLEF}{KEY}{common}")]);
    let faulty = inline(2, &[&format!(
        r#"<divisions>1</divisions>{CLEF}{KEY}<time print-object="no"><beats>3</beats><beat-type>4</beat-type></time>"#
    )]);
    let after = inline(3, &[&format!(
        r#"<divisions>1</divisions>{CLEF}{KEY}<time symbol="common" print-object="no"><beats>4</beats><beat-type>4</beat-type></time>"#
    )]);

    let fixed = propagate_neighbors(
        &before,
        &faulty,
        &after,
        &findings(&before, &faulty),
        &findings(&faulty, &after),
        &CheckOptions::default(),
    )
    .unwrap()
    .expect("neighbors agree on common time");

    assert!(fixed.contains(r#"<time print-object="no" symbol="common"><beats>4</beats><beat-type>4</beat-type></time>"#));
    let rescanned = scan_musicxml(&fixed).unwrap();
    assert_eq!(rescanned.parts[0].initial.times[0].symbol, TimeSymbol::Common);
}

#[test]
fn neighbors_overwrite_a_key() {
    let before = inline(1, &[&format!("<divisions>1</divisions>{CLEF}<key><fifths>-2</fifths></key>{TIME}")]);
    let opening = format!(r#"<divisions>1</divisions>{CLEF}<key print-object="no"><fifths>-3</fifths></key>{TIME}"#);
    let faulty = inline(2, &[opening.as_str(), r#"<key print-object="no"><fifths>-3</fifths></key>"#]);
    let after = inline(3, &[&format!(
        r#"<divisions>1</divisions>{CLEF}<key print-object="no"><fifths>-2</fifths></key>{TIME}"#
    )]);

    let flagged = findings(&before, &faulty);
    assert_eq!(
        flagged["P1"],
        vec![Finding {
            kind: ErrorKind::KeyChangeNoPrint,
            staff: Staff::All,
        }]
    );

    let fixed = propagate_neighbors(
        &before,
        &faulty,
        &after,
        &flagged,
        &findings(&faulty, &after),
        &CheckOptions::default(),
    )
    .unwrap()
    .expect("neighbors agree on two flats");

    assert_eq!(fixed.matches(r#"<key print-object="no"><fifths>-2</fifths></key>"#).count(), 2);
    assert!(!fixed.contains("<fifths>-3</fifths>"));
}

#[test]
fn duplicate_normalization_leaves_a_later_different_clef_alone() {
    let before = inline(1, &[&format!("<divisions>1</divisions>{CLEF}{KEY}{TIME}")]);
    let opening = format!(r#"<divisions>1</divisions><clef print-object="no"><sign>F</sign><line>4</line></clef>{KEY}{TIME}"#);
    let faulty = inline(2, &[opening.as_str(), "<clef><sign>C</sign><line>3</line></clef>"]);

    let fixed = normalize_duplicates(&faulty.xml, &findings(&before, &faulty), &CheckOptions::default())
        .unwrap()
        .expect("the bass clef should be shown");

    assert!(fixed.contains(r#"<clef print-object="yes"><sign>F</sign><line>4</line></clef>"#));
    assert!(fixed.contains("<clef><sign>C</sign><line>3</line></clef>"));
    assert_eq!(fixed.len(), faulty.xml.len() + 1);
}

#[test]
fn wildcard_finding_over_per_staff_keys_is_not_propagated() {
    let staves = r#"<divisions>1</divisions><staves>2</staves><clef number="1"><sign>G</sign></clef><clef number="2"><sign>F</sign></clef>"#;
    let before = inline(1, &[&format!(
        r#"{staves}<key number="1"><fifths>0</fifths></key><key number="2"><fifths>0</fifths></key>{TIME}"#
    )]);
    let faulty = inline(2, &[&format!(r#"{staves}<key print-object="no"><fifths>1</fifths></key>{TIME}"#)]);
    let after = inline(3, &[&format!(r#"{staves}<key print-object="no"><fifths>0</fifths></key>{TIME}"#)]);

    let flagged = findings(&before, &faulty);
    assert_eq!(flagged["P1"][0].staff, Staff::All);
    assert_eq!(flagged["P1"][0].kind, ErrorKind::KeyChangeNoPrint);

    // Two per-staff keys end the line before; neither is the single proven value.
    let result = propagate_neighbors(
        &before,
        &faulty,
        &after,
        &flagged,
        &findings(&faulty, &after),
        &CheckOptions::default(),
    )
    .unwrap();
    assert_eq!(result, None);
}
