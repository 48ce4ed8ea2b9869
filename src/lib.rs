//! scoreline: cross-line consistency checker for line-split MusicXML transcriptions.
//!
//! A work transcribed one system (line) at a time is checked line by line:
//! the clefs, keys and time signatures in force at the end of a line must be
//! restated, or visibly changed, at the start of the next one. Flagged lines
//! can be repaired into corrected copies.
//!
//! Supports both uncompressed MusicXML (.musicxml) and compressed MXL (.mxl) files.
//!
//! # Example
//! ```no_run
//! use scoreline::{check_lines, scan_file, CheckOptions};
//!
//! let first = scan_file("mass/mass.01.musicxml").unwrap();
//! let second = scan_file("mass/mass.02.musicxml").unwrap();
//! for (part, findings) in check_lines(&first, &second, &CheckOptions::default()) {
//!     println!("{part}: {findings:?}");
//! }
//! ```

pub mod checker;
pub mod config;
pub mod error;
pub mod keys;
pub mod model;
pub mod mxl;
pub mod parser;
pub mod patch;
pub mod pipeline;
pub mod repair;
pub mod report;
pub mod source;
pub mod state;

use std::path::Path;

pub use checker::{check_lines, check_transition, CheckOptions, ErrorKind, Finding};
pub use config::Config;
pub use error::{Error, Result};
pub use model::*;
pub use mxl::scan_mxl;
pub use parser::{scan_musicxml, LineScan, PartTimeline};
pub use pipeline::Validator;
pub use repair::{CorrectedDocument, Strategy};
pub use report::{Fault, Report};
pub use source::{DirectorySource, DocumentSource, LineId, Session};

/// Walk a line document from a file path.
/// Automatically detects format based on file extension:
/// - `.musicxml` or `.xml` → uncompressed MusicXML
/// - `.mxl` → compressed MXL (ZIP archive)
pub fn scan_file<P: AsRef<Path>>(path: P) -> Result<LineScan> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    scan_bytes(&data, path.extension().and_then(|e| e.to_str()))
}

/// Walk a line document from raw bytes with an optional format hint.
pub fn scan_bytes(data: &[u8], extension: Option<&str>) -> Result<LineScan> {
    let xml = read_musicxml(data, extension)?;
    scan_musicxml(&xml)
}

/// The MusicXML text of a line document, unpacking `.mxl` archives.
/// If `extension` is None, the format is detected from the bytes.
pub fn read_musicxml(data: &[u8], extension: Option<&str>) -> Result<String> {
    let compressed = match extension {
        Some("mxl") => true,
        Some("musicxml") | Some("xml") => false,
        _ => mxl::is_mxl(data),
    };
    if compressed {
        return mxl::extract_musicxml_from_mxl(data);
    }
    let xml = std::str::from_utf8(data)
        .map_err(|e| Error::malformed("document", format!("invalid UTF-8: {e}")))?;
    Ok(xml.to_string())
}
