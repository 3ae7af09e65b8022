use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot copy {from} to {to}: addresses have different depths")]
    ShapeMismatch { from: String, to: String },

    #[error(
        "{entity}: {slices} slice(s) do not form a complete, duplicate-free \
         {cells}-cell coordinate grid"
    )]
    IncompleteGrid {
        entity: String,
        slices: usize,
        cells: usize,
    },

    #[error("{entity}: not all pages share the same spatial coordinates ({detail})")]
    GeometryInconsistency { entity: String, detail: String },

    #[error("{0}: slices have inconsistent pixel dimensions")]
    InconsistentDimensions(String),

    #[error("{0} has no instances")]
    NoInstances(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("DICOM error: {0}")]
    Read(#[from] dicom::object::ReadError),

    #[error("DICOM codec error: {0}")]
    Codec(String),

    #[error("cannot persist catalog snapshot: {0}")]
    Snapshot(String),
}

/// A recovered fault that did not abort the operation but that callers
/// should be able to inspect, such as a multiframe file that could not be
/// converted and was dropped from the index.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub file: PathBuf,
    pub message: String,
}
