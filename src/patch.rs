//! Textual rewrites of a line document.
//!
//! The walker records where every declaration sits in the original text
//! ([`NodeRef`]); repairs are expressed as replacements of those byte ranges
//! so everything they do not touch is preserved exactly.

use std::ops::Range;

use crate::error::{Error, Result};
use crate::model::NodeRef;

/// Replace `range` of the document with `replacement`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub range: Range<usize>,
    pub replacement: String,
}

/// Apply non-overlapping patches to `xml`.
pub fn apply(xml: &str, mut patches: Vec<Patch>) -> Result<String> {
    patches.sort_by_key(|p| p.range.start);
    for pair in patches.windows(2) {
        if pair[0].range.end > pair[1].range.start {
            return Err(Error::OverlappingPatch(pair[1].range.start));
        }
    }

    let mut out = String::with_capacity(xml.len());
    let mut cursor = 0;
    for patch in &patches {
        out.push_str(&xml[cursor..patch.range.start]);
        out.push_str(&patch.replacement);
        cursor = patch.range.end;
    }
    out.push_str(&xml[cursor..]);
    Ok(out)
}

/// Offset one past the `>` that closes the start tag beginning at `start`.
pub fn start_tag_end(xml: &str, start: usize) -> usize {
    let mut quote: Option<u8> = None;
    for (offset, &byte) in xml.as_bytes()[start..].iter().enumerate() {
        match quote {
            Some(q) if byte == q => quote = None,
            Some(_) => {}
            None if byte == b'"' || byte == b'\'' => quote = Some(byte),
            None if byte == b'>' => return start + offset + 1,
            None => {}
        }
    }
    xml.len()
}

/// Set `print-object` on the element's start tag, adding it if absent.
pub fn set_print_object(xml: &str, node: &NodeRef, printed: bool) -> Patch {
    let value = if printed { "yes" } else { "no" };
    Patch {
        range: node.tag_range(),
        replacement: with_attribute(&xml[node.tag_range()], "print-object", Some(value)),
    }
}

/// Replace the children of an element. `attributes` are set on its start
/// tag, or removed when their value is `None`; other attributes are kept.
pub fn replace_content(xml: &str, node: &NodeRef, attributes: &[(&str, Option<&str>)], content: &str) -> Patch {
    let tag = attributes
        .iter()
        .fold(xml[node.tag_range()].to_string(), |tag, (name, value)| {
            with_attribute(&tag, name, *value)
        });

    if tag.ends_with("/>") {
        let name = element_name(&tag);
        let open = tag[..tag.len() - 2].trim_end();
        return Patch {
            range: node.range(),
            replacement: format!("{open}>{content}</{name}>"),
        };
    }

    let element = &xml[node.range()];
    let close = element.rfind("</").map_or(node.end, |pos| node.start + pos);
    Patch {
        range: node.start..close,
        replacement: format!("{tag}{content}"),
    }
}

/// A start tag with attribute `name` set to `value`, or removed for `None`.
fn with_attribute(tag: &str, name: &str, value: Option<&str>) -> String {
    match (find_attribute(tag, name), value) {
        (Some(found), Some(value)) => {
            let mut rewritten = tag.to_string();
            rewritten.replace_range(found.value, value);
            rewritten
        }
        (Some(found), None) => {
            let mut rewritten = tag.to_string();
            rewritten.replace_range(found.whole, "");
            rewritten
        }
        (None, Some(value)) => {
            let close = if tag.ends_with("/>") { tag.len() - 2 } else { tag.len() - 1 };
            let head = tag[..close].trim_end();
            format!("{head} {name}=\"{value}\"{}", &tag[close..])
        }
        (None, None) => tag.to_string(),
    }
}

fn element_name(tag: &str) -> &str {
    let body = tag.trim_start_matches('<');
    let end = body
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(body.len());
    &body[..end]
}

/// Where an attribute sits inside a start tag.
struct AttributeSpan {
    /// Leading whitespace through the closing quote
    whole: Range<usize>,
    /// The value, quotes excluded
    value: Range<usize>,
}

fn find_attribute(tag: &str, name: &str) -> Option<AttributeSpan> {
    let mut search = 0;
    while let Some(pos) = tag[search..].find(name) {
        let at = search + pos;
        search = at + name.len();

        if !tag[..at].ends_with(char::is_whitespace) {
            continue;
        }
        let rest = tag[search..].trim_start();
        let Some(after_eq) = rest.strip_prefix('=') else {
            continue;
        };
        let after_eq = after_eq.trim_start();
        let quote = after_eq.chars().next()?;
        if quote != '"' && quote != '\'' {
            return None;
        }
        let value_start = tag.len() - after_eq.len() + 1;
        let value_len = tag[value_start..].find(quote)?;
        let lead = tag[..at].trim_end().len();
        return Some(AttributeSpan {
            whole: lead..value_start + value_len + 1,
            value: value_start..value_start + value_len,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn whole(xml: &str, element: &str) -> NodeRef {
        let start = xml.find(&format!("<{element}")).unwrap();
        let close = format!("</{element}>");
        let end = xml[start..]
            .find(&close)
            .map(|p| start + p + close.len())
            .unwrap_or_else(|| start_tag_end(xml, start));
        NodeRef {
            start,
            end,
            tag_end: start_tag_end(xml, start),
        }
    }

    #[test]
    fn start_tag_end_skips_quoted_brackets() {
        let xml = r#"<clef id="a>b" number="1"><sign>G</sign></clef>"#;
        assert_eq!(&xml[..start_tag_end(xml, 0)], r#"<clef id="a>b" number="1">"#);
    }

    #[test]
    fn print_object_is_inserted() {
        let xml = r#"<m><clef number="2"><sign>F</sign></clef></m>"#;
        let node = whole(xml, "clef");
        let out = apply(xml, vec![set_print_object(xml, &node, false)]).unwrap();
        assert_eq!(out, r#"<m><clef number="2" print-object="no"><sign>F</sign></clef></m>"#);
    }

    #[test]
    fn print_object_is_replaced() {
        let xml = r#"<time print-object='no' symbol="common"><beats>4</beats></time>"#;
        let node = whole(xml, "time");
        let out = apply(xml, vec![set_print_object(xml, &node, true)]).unwrap();
        assert_eq!(out, r#"<time print-object='yes' symbol="common"><beats>4</beats></time>"#);
    }

    #[test]
    fn print_object_on_self_closing_tag() {
        let xml = r#"<a><key number="1"/></a>"#;
        let node = whole(xml, "key");
        let out = apply(xml, vec![set_print_object(xml, &node, false)]).unwrap();
        assert_eq!(out, r#"<a><key number="1" print-object="no"/></a>"#);
    }

    #[test]
    fn content_is_replaced_between_tags() {
        let xml = "<m><clef number=\"1\">\n  <sign>F</sign>\n  <line>4</line>\n</clef></m>";
        let node = whole(xml, "clef");
        let patch = replace_content(xml, &node, &[], "<sign>G</sign><line>2</line>");
        let out = apply(xml, vec![patch]).unwrap();
        assert_eq!(out, "<m><clef number=\"1\"><sign>G</sign><line>2</line></clef></m>");
    }

    #[test]
    fn content_replacement_sets_and_removes_attributes() {
        let xml = r#"<m><time symbol="cut" print-object="no"><beats>2</beats><beat-type>2</beat-type></time></m>"#;
        let node = whole(xml, "time");

        let plain = replace_content(xml, &node, &[("symbol", None)], "<beats>3</beats><beat-type>4</beat-type>");
        assert_eq!(
            apply(xml, vec![plain]).unwrap(),
            r#"<m><time print-object="no"><beats>3</beats><beat-type>4</beat-type></time></m>"#
        );

        let common = replace_content(xml, &node, &[("symbol", Some("common"))], "<beats>4</beats><beat-type>4</beat-type>");
        assert_eq!(
            apply(xml, vec![common]).unwrap(),
            r#"<m><time symbol="common" print-object="no"><beats>4</beats><beat-type>4</beat-type></time></m>"#
        );
    }

    #[test]
    fn removing_an_absent_attribute_keeps_the_tag() {
        let xml = "<m><time><beats>6</beats><beat-type>8</beat-type></time></m>";
        let node = whole(xml, "time");
        let patch = replace_content(xml, &node, &[("symbol", None)], "<beats>3</beats><beat-type>4</beat-type>");
        assert_eq!(
            apply(xml, vec![patch]).unwrap(),
            "<m><time><beats>3</beats><beat-type>4</beat-type></time></m>"
        );
    }

    #[test]
    fn overlapping_patches_are_rejected() {
        let patches = vec![
            Patch { range: 0..5, replacement: String::new() },
            Patch { range: 3..7, replacement: String::new() },
        ];
        assert!(matches!(apply("0123456789", patches), Err(Error::OverlappingPatch(3))));
    }

    #[test]
    fn untouched_text_is_preserved() {
        let xml = "<a>  <b x='1'/>  <!-- keep --> </a>";
        let patches = vec![Patch { range: 5..15, replacement: "<b/>".into() }];
        assert_eq!(apply(xml, patches).unwrap(), "<a>  <b/>  <!-- keep --> </a>");
    }
}
