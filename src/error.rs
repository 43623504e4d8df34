use std::{fmt, io};
use thiserror::Error;

/// Failures of the read-and-store pipeline.
///
/// None of these escape the reader or the store: they are logged where they
/// are detected and turned into an absent result.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("Failed accessing preferences file")]
    AccessDenied,
    #[error("Failed reading content from preferences file: {0}")]
    Unreadable(#[source] io::Error),
    #[error("Failed decoding preferences file: {0}")]
    Decode(#[source] plist::Error),
    #[error("Preferences file root is not a dictionary")]
    NotADictionary,
    #[error("{problem} `{field}` attribute in preferences file")]
    StructuralInvalid {
        field: &'static str,
        problem: FieldProblem,
    },
    #[error("Failed serializing preferences: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("Failed writing preferences slot: {0}")]
    SlotWrite(#[source] io::Error),
    #[error("Failed reading preferences slot: {0}")]
    SlotRead(#[source] io::Error),
    #[error("Failed decoding preferences slot: {0}")]
    SlotCorrupt(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldProblem {
    Missing,
    InvalidType,
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "Missing"),
            Self::InvalidType => write!(f, "Invalid type for"),
        }
    }
}
