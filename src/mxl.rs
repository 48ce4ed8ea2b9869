//! Compressed MusicXML (.mxl) line documents.
//!
//! An .mxl file is a ZIP archive containing:
//!   - META-INF/container.xml: declares the root MusicXML file path
//!   - <rootfile>.xml: the actual MusicXML content
//!   - (optional) other files: images, sounds, etc.

use std::io::{Cursor, Read};

use tracing::debug;
use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::parser::{self, LineScan};

/// Local file header signature that starts every ZIP archive.
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Whether the bytes look like a ZIP archive.
pub fn is_mxl(data: &[u8]) -> bool {
    data.starts_with(ZIP_MAGIC)
}

/// Read and walk a .mxl file from raw bytes.
pub fn scan_mxl(data: &[u8]) -> Result<LineScan> {
    let xml = extract_musicxml_from_mxl(data)?;
    parser::scan_musicxml(&xml)
}

/// Extract the MusicXML content string from .mxl bytes.
pub fn extract_musicxml_from_mxl(data: &[u8]) -> Result<String> {
    let cursor = Cursor::new(data);
    let mut archive = ZipArchive::new(cursor)
        .map_err(|e| Error::Archive(format!("failed to open archive: {e}")))?;

    let root_file_path = read_container_xml(&mut archive)?;
    debug!(root = %root_file_path, "reading MusicXML from archive");

    let mut root_file = archive
        .by_name(&root_file_path)
        .map_err(|e| Error::Archive(format!("root file '{root_file_path}' not found: {e}")))?;

    let mut xml = String::new();
    root_file
        .read_to_string(&mut xml)
        .map_err(|e| Error::Archive(format!("failed to read '{root_file_path}': {e}")))?;

    Ok(xml)
}

/// Find the root MusicXML file: the container's rootfile, or else the
/// first .xml/.musicxml entry outside META-INF.
fn read_container_xml(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<String> {
    let container_xml = match archive.by_name("META-INF/container.xml") {
        Ok(mut container_file) => {
            let mut xml = String::new();
            container_file
                .read_to_string(&mut xml)
                .map_err(|e| Error::Archive(format!("failed to read container.xml: {e}")))?;
            Some(xml)
        }
        Err(_) => None,
    };

    if let Some(xml) = container_xml {
        let doc = roxmltree::Document::parse(&xml)?;
        return doc
            .descendants()
            .filter(|n| n.has_tag_name("rootfile"))
            .find_map(|n| n.attribute("full-path"))
            .map(str::to_string)
            .ok_or_else(|| Error::Archive("no rootfile in container.xml".to_string()));
    }

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names
        .iter()
        .find(|name| {
            !name.starts_with("META-INF/") && (name.ends_with(".xml") || name.ends_with(".musicxml"))
        })
        .cloned()
        .ok_or_else(|| Error::Archive(format!("no MusicXML file in archive, files: {names:?}")))
}
