//! Where line documents come from.
//!
//! The checker only needs three things from a catalog: the works, the lines
//! of a work and the bytes of a line. [`DirectorySource`] serves them from a
//! directory tree; remote catalogs implement [`DocumentSource`] themselves.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Line number inside a work, starting at 1.
pub type LineId = u32;

/// Name of the optional coordinates file inside a work directory.
pub const COORDS_FILE: &str = "lines.json";

/// Prefix of superseded transcriptions.
const OLD_PREFIX: &str = "OLD_";

const LINE_EXTENSIONS: [&str; 3] = ["musicxml", "xml", "mxl"];

/// Credentials handed to every source call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub token: Option<String>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }
}

/// Bounding box of a line on the page image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineCoords {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Lines available for a work.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineListing {
    /// Line numbers in ascending order
    pub line_ids: Vec<LineId>,
    pub line_coords: BTreeMap<LineId, LineCoords>,
}

/// A catalog of works split into line documents.
pub trait DocumentSource {
    /// Work identifiers mapped to display names.
    fn list_works(&self, session: &Session) -> Result<BTreeMap<String, String>>;

    fn list_lines(&self, session: &Session, work: &str) -> Result<LineListing>;

    /// Raw bytes of a line: uncompressed MusicXML or an `.mxl` archive.
    fn fetch_document(&self, session: &Session, work: &str, line: LineId) -> Result<Vec<u8>>;
}

/// Works stored as directories of line files.
///
/// ```text
/// root/
///   work-a/
///     work-a.01.musicxml
///     work-a.02.mxl
///     lines.json          (optional)
/// ```
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn work_dir(&self, work: &str) -> Result<PathBuf> {
        let dir = self.root.join(work);
        if !dir.is_dir() {
            return Err(Error::Source(format!("no such work '{work}'")));
        }
        Ok(dir)
    }

    /// Line files of a work by line number.
    pub fn line_files(&self, work: &str) -> Result<BTreeMap<LineId, PathBuf>> {
        let dir = self.work_dir(work)?;
        let mut files: BTreeMap<LineId, PathBuf> = BTreeMap::new();

        let mut entries: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        entries.sort();

        for path in entries {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == COORDS_FILE {
                continue;
            }
            if name.starts_with(OLD_PREFIX) {
                debug!(file = %path.display(), "skipping superseded file");
                continue;
            }
            let Some(line) = parse_line_file_name(name) else {
                info!(file = %path.display(), "file name does not follow <name>.<NN>.<ext>, skipped");
                continue;
            };
            if let Some(existing) = files.get(&line) {
                warn!(
                    line,
                    kept = %existing.display(),
                    ignored = %path.display(),
                    "two files for the same line"
                );
                continue;
            }
            files.insert(line, path);
        }

        if let Some(&last) = files.keys().next_back() {
            for missing in (1..last).filter(|n| !files.contains_key(n)) {
                warn!(work, line = missing, "line transcription is missing");
            }
        }

        Ok(files)
    }

    fn line_coords(&self, dir: &Path) -> Result<BTreeMap<LineId, LineCoords>> {
        let path = dir.join(COORDS_FILE);
        if !path.is_file() {
            return Ok(BTreeMap::new());
        }
        let raw: BTreeMap<String, LineCoords> = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        let mut coords = BTreeMap::new();
        for (key, value) in raw {
            match key.trim().parse::<LineId>() {
                Ok(line) => {
                    coords.insert(line, value);
                }
                Err(_) => warn!(file = %path.display(), key = %key, "coordinates for a non-numeric line"),
            }
        }
        Ok(coords)
    }
}

impl DocumentSource for DirectorySource {
    fn list_works(&self, _session: &Session) -> Result<BTreeMap<String, String>> {
        let mut works = BTreeMap::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                works.insert(name.to_string(), name.to_string());
            }
        }
        Ok(works)
    }

    fn list_lines(&self, _session: &Session, work: &str) -> Result<LineListing> {
        let files = self.line_files(work)?;
        let line_coords = self.line_coords(&self.work_dir(work)?)?;
        Ok(LineListing {
            line_ids: files.into_keys().collect(),
            line_coords,
        })
    }

    fn fetch_document(&self, _session: &Session, work: &str, line: LineId) -> Result<Vec<u8>> {
        let files = self.line_files(work)?;
        let path = files
            .get(&line)
            .ok_or_else(|| Error::Source(format!("work '{work}' has no line {line}")))?;
        Ok(std::fs::read(path)?)
    }
}

/// Line number of a file named `<name>.<NN>.<ext>` with a known extension.
pub fn parse_line_file_name(file_name: &str) -> Option<LineId> {
    let (stem, extension) = file_name.rsplit_once('.')?;
    if !LINE_EXTENSIONS.contains(&extension) {
        return None;
    }
    let (name, number) = stem.rsplit_once('.')?;
    if name.is_empty() || number.len() != 2 || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    number.parse().ok()
}
