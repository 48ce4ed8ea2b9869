//! Hard faults: documents or inputs the engine cannot reason about safely.
//!
//! These are distinct from findings ([`crate::checker::ErrorKind`]), which are
//! ordinary results of a check and never travel through `Err`.

use thiserror::Error;

use crate::model::Step;

/// Main error type for scoreline.
#[derive(Error, Debug)]
pub enum Error {
    /// The document is not well-formed XML
    #[error("XML parse error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// Root element other than `score-partwise`
    #[error("Unsupported root element: '{0}'. Only 'score-partwise' is supported.")]
    UnsupportedRoot(String),

    /// An element whose content cannot be interpreted
    #[error("Malformed <{element}>: {reason}")]
    Malformed { element: String, reason: String },

    /// `<key-step>`/`<key-alter>` lists of different lengths
    #[error("Key declares {steps} steps but {alters} alterations")]
    MismatchedKeyAlterations { steps: usize, alters: usize },

    /// Time signature symbol the engine does not model
    #[error("Unsupported time signature symbol: '{0}'")]
    UnsupportedTimeSymbol(String),

    /// A sharp composed over a flat (or the reverse) without cancellation
    #[error("Cannot compose key: {step} altered by {new} over {previous} without cancellation")]
    InconsistentKey { step: Step, previous: i32, new: i32 },

    /// `<staves>` outside the very start of a measure
    #[error("Staff count changed to {0} after the start of the measure")]
    StaffChangeMidMeasure(u32),

    /// A `<backup>` that rewinds before the beginning of the line
    #[error("Time moved before the start of the line")]
    NegativeTime,

    /// Overlapping rewrites of the same document region
    #[error("Overlapping patches at byte {0}")]
    OverlappingPatch(usize),

    /// Compressed MusicXML container problems
    #[error("MXL archive error: {0}")]
    Archive(String),

    /// Retrieval collaborator failures
    #[error("Document source error: {0}")]
    Source(String),

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Report serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn malformed(element: &str, reason: impl Into<String>) -> Self {
        Error::Malformed {
            element: element.to_string(),
            reason: reason.into(),
        }
    }
}

/// Convenience Result type using the scoreline Error
pub type Result<T> = std::result::Result<T, Error>;
