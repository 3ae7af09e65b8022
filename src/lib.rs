//! # DICOM-archive library
//!
//! This crate serves a high-level API for managing a folder of DICOM files
//! as a patient/study/series/instance catalog.
//!
//! The folder is indexed into a catalog persisted as a snapshot file next to
//! the data, so that reopening the folder is cheap; a missing or unreadable
//! snapshot is recovered by rescanning every file. Entities are addressed
//! hierarchically and can be queried, copied, moved and deleted; mutations
//! are staged in memory and only reach the disk on commit, with rollback
//! restoring the last committed state. A series can be read into a dense
//! 3-D or N-D volume from its slice coordinates, and a volume can be
//! written back as a new set of ordered single-frame instances.
//!
//! Assumptions made about the indexed folder:
//!  - Multiframe files are converted to single-frame files at load time
//!  - Series holding several SOP classes are split into homogeneous series
//!    at load time
//!  - Slices of one series share their pixel dimensions
//!
//! Opening the same folder from two processes at once is not guarded
//! against: both sessions commit their own view of the index and the last
//! writer wins. Keep one session per folder at a time.
//!
//! # Examples
//!
//! Read all series of a patient and assemble the first one into a volume:
//!
//! ```no_run
//! # use dicom_archive::{Label, Selector};
//! # fn main() -> dicom_archive::Result<()> {
//! let mut archive = dicom_archive::open("dicom")?;
//! let patient = archive.root_entity().child(Label::name("Doe^John"));
//! let series = archive.series(&patient, &Selector::any())?;
//! let volume = archive.volume(&series[0], &[], false)?;
//! println!("{:?}", volume.shape());
//! archive.close()?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

pub mod catalog;
pub mod dataset;
pub mod entity;
pub mod error;
pub mod mesh;
mod ops;
pub mod record;
pub mod volume;

pub use catalog::Catalog;
pub use entity::{Entity, Label, Selector};
pub use error::{Diagnostic, Error, Result};
pub use record::{CatalogRecord, RecordStatus};
pub use volume::{Slice, Volume};

/// Open a DICOM folder, creating it if needed.
///
/// # Errors
///
/// Returns an error if the folder cannot be created or scanned.
pub fn open(path: impl AsRef<Path>) -> Result<Catalog> {
    Catalog::open(path)
}
