//! A CLI tool and library for splitting a binary student roster into one text
//! file per group.
//!
//! A roster file is a sequence of fixed-layout binary records (see
//! [`binary`]). Each record is decoded into a [`Student`], the records are
//! partitioned by their group in order of first appearance, and every group is
//! written to `<group>.txt` in an output directory.
//!
//! See the [`split_roster`] function, which is used by the CLI, for the main
//! entry point into the library.
//!
//! # Feature flags
//!
//! - `cli` enables the additional dependencies needed by the CLI

pub mod binary;
pub mod group;
pub mod prompt;
pub mod types;

use std::path::Path;

pub use binary::{BinaryDecodeError, BinaryEncodeError, RecordError};
pub use group::{GroupWriteError, GroupWriterOptions, LineEnding, WrittenGroup};
use thiserror::Error;
use tracing::info;
pub use types::Student;

use crate::group::{GroupSet, GroupWriter};

#[derive(Error, Debug)]
pub enum RosterSplitError {
    #[error("Roster decoding error")]
    Decode(#[from] BinaryDecodeError),
    #[error("Group output error")]
    Write(#[from] GroupWriteError),
}

pub type Result<T> = std::result::Result<T, RosterSplitError>;

/// Information about a completed split.
#[derive(Clone, PartialEq, Debug)]
pub struct SplitInfo {
    /// Number of records decoded from the roster.
    pub num_students: usize,

    /// The files written, in order.
    pub groups: Vec<WrittenGroup>,
}

/// Split the roster file at `input` into per-group text files in `output_dir`.
///
/// The whole roster is decoded before anything is written, so a decoding
/// error leaves the output directory untouched. A write error stops at the
/// failing group and leaves earlier files in place.
#[tracing::instrument(level = "debug", skip(options))]
pub fn split_roster(
    input: &Path,
    output_dir: &Path,
    options: GroupWriterOptions,
) -> Result<SplitInfo> {
    let students = binary::read_students_from_path(input)?;
    let num_students = students.len();
    info!("Read {} students from {:?}", num_students, input);

    let group_set = GroupSet::from_students(students);
    let groups = GroupWriter::new(output_dir, options).write(&group_set)?;
    info!("Wrote {} group files to {:?}", groups.len(), output_dir);

    Ok(SplitInfo {
        num_students,
        groups,
    })
}
