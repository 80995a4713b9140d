//! Grouping of student records and per-group text output
//!
//! Records are partitioned by [`GroupSet::from_students`], which keeps groups
//! in order of first appearance and students in their original order within
//! each group. A [`GroupWriter`] then writes every group to its own
//! `<group>.txt` file.
//!
//! Group keys are used verbatim as file stems. Keys containing path
//! separators or characters reserved by the filesystem are not sanitized, so
//! they may fail to write or land outside the output directory.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use strum::Display;
use thiserror::Error;
use tracing::debug;

use crate::types::Student;

/// An error writing group files
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GroupWriteError {
    #[error("creating output directory {0:?}")]
    CreateDir(PathBuf, #[source] io::Error),
    #[error("writing group file {0:?}")]
    WriteFile(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, GroupWriteError>;

/// Students sharing a group key, in input order.
#[derive(Clone, PartialEq, Debug)]
pub struct Group {
    key: String,
    students: Vec<Student>,
}

impl Group {
    /// The group key, exactly as it appeared in the input.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }
}

/// A stable partition of student records by group.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct GroupSet {
    groups: Vec<Group>,
}

impl GroupSet {
    pub fn from_students<I>(students: I) -> Self
    where
        I: IntoIterator<Item = Student>,
    {
        let mut builder = GroupSetBuilder::new();
        for student in students {
            builder.add_student(student);
        }
        builder.build()
    }

    /// Groups in order of first appearance.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of students across all groups.
    pub fn num_students(&self) -> usize {
        self.groups.iter().map(Group::len).sum()
    }
}

pub struct GroupSetBuilder {
    groups: Vec<Group>,
    index: HashMap<String, usize>,
}

#[allow(clippy::new_without_default)]
impl GroupSetBuilder {
    pub fn new() -> Self {
        Self {
            groups: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn add_student(&mut self, student: Student) {
        match self.index.get(&student.group) {
            Some(&i) => self.groups[i].students.push(student),
            None => {
                self.index.insert(student.group.clone(), self.groups.len());
                self.groups.push(Group {
                    key: student.group.clone(),
                    students: vec![student],
                });
            }
        }
    }

    pub fn build(self) -> GroupSet {
        debug!("Partitioned students into {} groups", self.groups.len());
        GroupSet {
            groups: self.groups,
        }
    }
}

/// Format one output line for `student`, without a line terminator.
///
/// The line is `<name>, <YYYY-MM-DD>, <score>`, where the score keeps the
/// scale it was stored with.
pub fn format_line(student: &Student) -> String {
    format!(
        "{}, {}, {}",
        student.name,
        student.date_of_birth.format("%Y-%m-%d"),
        student.average_score
    )
}

/// Line terminators for group files
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Display)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[strum(serialize_all = "lowercase")]
#[cfg_attr(feature = "cli", clap(rename_all = "lowercase"))]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

/// Options for writing group files
#[derive(Clone, Debug)]
pub struct GroupWriterOptions {
    extension: String,
    line_ending: LineEnding,
}

impl GroupWriterOptions {
    /// Set the file extension appended to each group key
    ///
    /// Defaults to `txt`.
    pub fn with_extension(mut self, extension: String) -> Self {
        self.extension = extension;
        self
    }

    /// Set the terminator written after every line
    ///
    /// Defaults to [`LineEnding::Lf`].
    pub fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }
}

impl Default for GroupWriterOptions {
    fn default() -> Self {
        Self {
            extension: "txt".to_owned(),
            line_ending: LineEnding::Lf,
        }
    }
}

/// A group file that was written successfully.
#[derive(Clone, PartialEq, Debug)]
pub struct WrittenGroup {
    pub key: String,
    pub path: PathBuf,
    pub num_lines: usize,
}

/// Writes each group of a [`GroupSet`] to its own text file
pub struct GroupWriter {
    dir: PathBuf,
    options: GroupWriterOptions,
}

impl GroupWriter {
    pub fn new(dir: impl Into<PathBuf>, options: GroupWriterOptions) -> Self {
        Self {
            dir: dir.into(),
            options,
        }
    }

    /// The path a group's file is written to.
    pub fn group_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, self.options.extension))
    }

    /// Create the output directory if needed, then write every group.
    ///
    /// Groups are written one at a time in order. The first failure stops the
    /// run; files written before it are left in place.
    #[tracing::instrument(name = "write_groups", level = "debug", skip_all)]
    pub fn write(&self, group_set: &GroupSet) -> Result<Vec<WrittenGroup>> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| GroupWriteError::CreateDir(self.dir.clone(), e))?;

        let mut written = Vec::with_capacity(group_set.len());
        for group in group_set.groups() {
            let path = self.group_path(group.key());
            self.write_group(group, &path)
                .map_err(|e| GroupWriteError::WriteFile(path.clone(), e))?;
            debug!("Wrote {} lines to {:?}", group.len(), path);
            written.push(WrittenGroup {
                key: group.key().to_owned(),
                path,
                num_lines: group.len(),
            });
        }
        Ok(written)
    }

    fn write_group(&self, group: &Group, path: &Path) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        for student in group.students() {
            w.write_all(format_line(student).as_bytes())?;
            w.write_all(self.options.line_ending.as_str().as_bytes())?;
        }
        w.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::Result;
    use quickcheck_macros::quickcheck;
    use tempfile::TempDir;

    use super::{
        GroupSet, GroupWriteError, GroupWriter, GroupWriterOptions, LineEnding, format_line,
    };
    use crate::students;
    use crate::types::Student;

    fn scenario() -> Result<Vec<Student>> {
        Ok(students![
            ("Alice", "G1", (1990, 1, 1), "4.50"),
            ("Bob", "G2", (1991, 2, 2), "3.75"),
            ("Carol", "G1", (1992, 3, 3), "5.00"),
        ])
    }

    #[test]
    fn test_format_line() -> Result<()> {
        let students = scenario()?;
        assert_eq!(format_line(&students[0]), "Alice, 1990-01-01, 4.50");
        Ok(())
    }

    #[test]
    fn test_format_line_pads_year() -> Result<()> {
        let students = students![("Old", "G", (33, 4, 5), "1")];
        assert_eq!(format_line(&students[0]), "Old, 0033-04-05, 1");
        Ok(())
    }

    #[test]
    fn test_group_set_empty() {
        let set = GroupSet::from_students(vec![]);
        assert!(set.is_empty());
        assert_eq!(set.num_students(), 0);
    }

    #[test]
    fn test_group_set_first_seen_order() -> Result<()> {
        let set = GroupSet::from_students(students![
            ("a", "Z", (2000, 1, 1), "1"),
            ("b", "A", (2000, 1, 1), "1"),
            ("c", "Z", (2000, 1, 1), "1"),
            ("d", "M", (2000, 1, 1), "1"),
            ("e", "A", (2000, 1, 1), "1"),
        ]);
        let keys = set.groups().iter().map(|g| g.key()).collect::<Vec<_>>();
        assert_eq!(keys, vec!["Z", "A", "M"]);

        let names = |i: usize| {
            set.groups()[i]
                .students()
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(0), vec!["a", "c"]);
        assert_eq!(names(1), vec!["b", "e"]);
        assert_eq!(names(2), vec!["d"]);
        Ok(())
    }

    #[test]
    fn test_group_keys_are_case_sensitive() -> Result<()> {
        let set = GroupSet::from_students(students![
            ("a", "g1", (2000, 1, 1), "1"),
            ("b", "G1", (2000, 1, 1), "1"),
        ]);
        assert_eq!(set.len(), 2);
        Ok(())
    }

    #[test]
    fn test_write_scenario() -> Result<()> {
        let dir = TempDir::new()?;
        let out = dir.path().join("Students");
        let writer = GroupWriter::new(&out, GroupWriterOptions::default());
        let written = writer.write(&GroupSet::from_students(scenario()?))?;

        assert_eq!(written.len(), 2);
        assert_eq!(written[0].key, "G1");
        assert_eq!(written[0].num_lines, 2);
        assert_eq!(
            fs::read_to_string(out.join("G1.txt"))?,
            "Alice, 1990-01-01, 4.50\nCarol, 1992-03-03, 5.00\n"
        );
        assert_eq!(
            fs::read_to_string(out.join("G2.txt"))?,
            "Bob, 1991-02-02, 3.75\n"
        );
        Ok(())
    }

    #[test]
    fn test_line_ending_names() {
        // The CLI shows these as the default value and parses them back.
        assert_eq!(LineEnding::Lf.to_string(), "lf");
        assert_eq!(LineEnding::CrLf.to_string(), "crlf");
        assert_eq!(LineEnding::default(), LineEnding::Lf);
    }

    #[test]
    fn test_write_crlf_and_extension() -> Result<()> {
        let dir = TempDir::new()?;
        let options = GroupWriterOptions::default()
            .with_extension("csv".to_owned())
            .with_line_ending(LineEnding::CrLf);
        let writer = GroupWriter::new(dir.path(), options);
        writer.write(&GroupSet::from_students(scenario()?))?;

        assert_eq!(
            fs::read_to_string(dir.path().join("G2.csv"))?,
            "Bob, 1991-02-02, 3.75\r\n"
        );
        Ok(())
    }

    #[test]
    fn test_overwrites_and_keeps_stale_files() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("G1.txt"), "old contents\nmore\nlines\n")?;
        fs::write(dir.path().join("Stale.txt"), "from an earlier run\n")?;

        let writer = GroupWriter::new(dir.path(), GroupWriterOptions::default());
        writer.write(&GroupSet::from_students(scenario()?))?;

        assert_eq!(
            fs::read_to_string(dir.path().join("G1.txt"))?,
            "Alice, 1990-01-01, 4.50\nCarol, 1992-03-03, 5.00\n"
        );
        assert!(dir.path().join("Stale.txt").exists());
        Ok(())
    }

    #[test]
    fn test_empty_set_writes_nothing() -> Result<()> {
        let dir = TempDir::new()?;
        let out = dir.path().join("out");
        let written = GroupWriter::new(&out, GroupWriterOptions::default())
            .write(&GroupSet::default())?;
        assert!(written.is_empty());
        assert_eq!(fs::read_dir(&out)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_failure_keeps_earlier_files() -> Result<()> {
        let dir = TempDir::new()?;
        let set = GroupSet::from_students(students![
            ("a", "first", (2000, 1, 1), "1"),
            ("b", "missing/second", (2000, 1, 1), "1"),
            ("c", "third", (2000, 1, 1), "1"),
        ]);
        let result = GroupWriter::new(dir.path(), GroupWriterOptions::default()).write(&set);

        assert!(matches!(result, Err(GroupWriteError::WriteFile(_, _))));
        assert!(dir.path().join("first.txt").exists());
        assert!(!dir.path().join("third.txt").exists());
        Ok(())
    }

    #[test]
    fn test_create_dir_failure() -> Result<()> {
        let dir = TempDir::new()?;
        let blocker = dir.path().join("file");
        fs::write(&blocker, "")?;
        let result = GroupWriter::new(blocker.join("out"), GroupWriterOptions::default())
            .write(&GroupSet::from_students(scenario()?));
        assert!(matches!(result, Err(GroupWriteError::CreateDir(_, _))));
        Ok(())
    }

    #[quickcheck]
    fn qc_partition_is_stable_and_complete(keys: Vec<u8>) -> bool {
        // Small key space so groups repeat.
        let input = keys
            .iter()
            .enumerate()
            .map(|(i, k)| {
                Student::new(
                    i.to_string(),
                    format!("G{}", k % 4),
                    chrono::NaiveDateTime::default(),
                    rust_decimal::Decimal::ZERO,
                )
            })
            .collect::<Vec<_>>();
        let set = GroupSet::from_students(input.clone());

        let complete = set.num_students() == input.len();
        let stable = set.groups().iter().all(|g| {
            let expected = input
                .iter()
                .filter(|s| s.group == g.key())
                .collect::<Vec<_>>();
            g.students().iter().collect::<Vec<_>>() == expected
        });
        complete && stable
    }
}
