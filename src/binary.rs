//! Binary roster reader and writer
//!
//! # Format
//!
//! A roster file is a plain sequence of student records with no header,
//! trailer, record count or checksum. Each record is, in order:
//!
//! 1. the name, as a 7-bit length-prefixed UTF-8 string
//! 2. the group, encoded the same way
//! 3. the date of birth, as a little-endian `i64` holding a 62-bit tick count
//!    (100 ns since 0001-01-01T00:00:00) and a 2-bit kind tag
//! 4. the average score, as a 128-bit decimal: three little-endian `u32`
//!    words of magnitude followed by a flags word with the scale and sign
//!
//! # Usage
//!
//! [`StudentReader`] iterates over the records of any [`BufRead`], stopping
//! at the first record boundary where the input is exhausted. [`StudentWriter`]
//! produces the same format.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use std::sync::LazyLock;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Local, NaiveDate, NaiveDateTime, TimeDelta, TimeZone};
use rust_decimal::Decimal;
use strum::Display;
use thiserror::Error;
use tracing::debug;

use crate::types::Student;

/// An error decoding a roster file
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BinaryDecodeError {
    #[error("I/O error")]
    Io(#[from] io::Error),
    #[error("decoding record {index}")]
    Record {
        /// Zero-based index of the record that failed to decode.
        index: usize,
        #[source]
        source: RecordError,
    },
}

impl BinaryDecodeError {
    /// Whether decoding failed because the input ended partway into a record.
    pub fn is_truncated(&self) -> bool {
        matches!(
            self,
            BinaryDecodeError::Record {
                source: RecordError::Truncated,
                ..
            }
        )
    }
}

/// The reason a single record could not be decoded.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RecordError {
    #[error("unexpected end of file")]
    Truncated,
    #[error("I/O error")]
    Io(#[source] io::Error),
    #[error("7-bit encoded length is longer than five bytes")]
    LengthOverflow,
    #[error("negative string length {0}")]
    NegativeLength(i32),
    #[error("date_time value {0:#018x} is out of range")]
    DateTimeRange(i64),
    #[error("invalid decimal flags {0:#010x}")]
    DecimalFlags(u32),
}

impl From<io::Error> for RecordError {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            io::ErrorKind::UnexpectedEof => RecordError::Truncated,
            _ => RecordError::Io(value),
        }
    }
}

/// An error encoding a roster file
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BinaryEncodeError {
    #[error("I/O error")]
    Io(#[from] io::Error),
    #[error("Error encoding string length")]
    StringLength(#[from] std::num::TryFromIntError),
    #[error("date_time {0} is outside the representable range")]
    DateTimeRange(NaiveDateTime),
}

type Result<T> = std::result::Result<T, BinaryDecodeError>;
type RecordResult<T> = std::result::Result<T, RecordError>;
type EncodeResult<T> = std::result::Result<T, BinaryEncodeError>;

const TICKS_PER_SECOND: i64 = 10_000_000;
const NANOS_PER_TICK: i64 = 100;
const TICKS_PER_DAY: i64 = 86_400 * TICKS_PER_SECOND;

// Ticks at 9999-12-31T23:59:59.9999999, the last representable instant.
const MAX_TICKS: i64 = 3_155_378_975_999_999_999;

const TICKS_MASK: i64 = 0x3FFF_FFFF_FFFF_FFFF;
const KIND_SHIFT: u32 = 62;

// Local values whose UTC instant falls just before the epoch are wrapped
// modulo 2^62 by the writer.
const LOCAL_TICKS_CEILING: i64 = 0x4000_0000_0000_0000;

static TICKS_EPOCH: LazyLock<NaiveDateTime> = LazyLock::new(|| {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap()
});

const DECIMAL_SIGN_MASK: u32 = 0x8000_0000;
const DECIMAL_SCALE_MASK: u32 = 0x00FF_0000;
const DECIMAL_SCALE_SHIFT: u32 = 16;
const DECIMAL_MAX_SCALE: u32 = 28;

/// The kind tag stored in the top two bits of a serialized date_time.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[strum(serialize_all = "snake_case")]
enum DateTimeKind {
    Unspecified,
    Utc,
    Local,
}

/// A date_time value as represented in a roster file.
#[derive(Debug, Clone, Copy)]
struct BinaryDateTime {
    value: i64,
}

impl BinaryDateTime {
    fn kind(self) -> DateTimeKind {
        match (self.value as u64) >> KIND_SHIFT {
            0 => DateTimeKind::Unspecified,
            1 => DateTimeKind::Utc,
            _ => DateTimeKind::Local,
        }
    }

    fn ticks(self) -> i64 {
        self.value & TICKS_MASK
    }
}

fn naive_from_ticks(ticks: i64) -> Option<NaiveDateTime> {
    let secs = ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = ticks.rem_euclid(TICKS_PER_SECOND) * NANOS_PER_TICK;
    let delta = TimeDelta::new(secs, u32::try_from(nanos).ok()?)?;
    TICKS_EPOCH.checked_add_signed(delta)
}

/// Offset of the machine's local zone from UTC at `utc`, in ticks.
fn local_offset_ticks(utc: NaiveDateTime) -> i64 {
    i64::from(Local.offset_from_utc_datetime(&utc).local_minus_utc()) * TICKS_PER_SECOND
}

/// Converts the stored ticks of a local-kind value to local wall-clock ticks.
///
/// The stored ticks are the UTC instant. `utc_offset` gives the zone's offset
/// in ticks at that instant, clamped to the representable range. A negative
/// result is moved forward one day; anything past [`MAX_TICKS`] is rejected.
fn local_ticks_from_utc<F>(stored_ticks: i64, utc_offset: F) -> Option<i64>
where
    F: FnOnce(NaiveDateTime) -> i64,
{
    let utc_ticks = if stored_ticks > LOCAL_TICKS_CEILING - TICKS_PER_DAY {
        stored_ticks - LOCAL_TICKS_CEILING
    } else {
        stored_ticks
    };
    let offset = utc_offset(naive_from_ticks(utc_ticks.clamp(0, MAX_TICKS))?);

    let mut ticks = utc_ticks.checked_add(offset)?;
    if ticks < 0 {
        ticks += TICKS_PER_DAY;
    }
    (0..=MAX_TICKS).contains(&ticks).then_some(ticks)
}

impl TryFrom<BinaryDateTime> for NaiveDateTime {
    type Error = RecordError;

    fn try_from(value: BinaryDateTime) -> RecordResult<Self> {
        let out_of_range = || RecordError::DateTimeRange(value.value);
        let ticks = match value.kind() {
            DateTimeKind::Unspecified | DateTimeKind::Utc => {
                Some(value.ticks()).filter(|t| *t <= MAX_TICKS)
            }

            // Stored as the UTC instant; shown in the local zone.
            DateTimeKind::Local => local_ticks_from_utc(value.ticks(), local_offset_ticks),
        }
        .ok_or_else(out_of_range)?;
        naive_from_ticks(ticks).ok_or_else(out_of_range)
    }
}

impl TryFrom<NaiveDateTime> for BinaryDateTime {
    type Error = BinaryEncodeError;

    /// Encodes with the unspecified kind. Precision below one tick is dropped.
    fn try_from(value: NaiveDateTime) -> EncodeResult<Self> {
        let delta = value.signed_duration_since(*TICKS_EPOCH);
        let ticks = delta
            .num_seconds()
            .checked_mul(TICKS_PER_SECOND)
            .and_then(|t| t.checked_add(i64::from(delta.subsec_nanos()) / NANOS_PER_TICK))
            .filter(|t| (0..=MAX_TICKS).contains(t))
            .ok_or(BinaryEncodeError::DateTimeRange(value))?;
        Ok(Self { value: ticks })
    }
}

/// Reads a 7-bit encoded unsigned 32-bit integer, least significant group
/// first.
fn read_7bit_encoded_u32<R: Read>(r: &mut R) -> RecordResult<u32> {
    let mut result = 0u32;
    for shift in (0..28).step_by(7) {
        let byte = r.read_u8()?;
        result |= u32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }

    // The fifth byte may only carry the top four bits.
    let byte = r.read_u8()?;
    if byte > 0b1111 {
        return Err(RecordError::LengthOverflow);
    }
    Ok(result | (u32::from(byte) << 28))
}

fn write_7bit_encoded_u32<W: Write>(mut value: u32, w: &mut W) -> io::Result<()> {
    while value >= 0x80 {
        w.write_u8((value as u8) | 0x80)?;
        value >>= 7;
    }
    w.write_u8(value as u8)
}

fn read_string<R: Read>(r: &mut R) -> RecordResult<String> {
    let length = read_7bit_encoded_u32(r)? as i32;
    if length < 0 {
        return Err(RecordError::NegativeLength(length));
    }

    // Read through `take` so a corrupt length can't force a huge allocation.
    let mut buf = Vec::new();
    r.by_ref().take(length as u64).read_to_end(&mut buf)?;
    if buf.len() != length as usize {
        return Err(RecordError::Truncated);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn write_string<W: Write>(s: &str, w: &mut W) -> EncodeResult<()> {
    let length = i32::try_from(s.len())?;
    write_7bit_encoded_u32(length as u32, w)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_decimal<R: Read>(r: &mut R) -> RecordResult<Decimal> {
    let lo = r.read_u32::<LittleEndian>()?;
    let mid = r.read_u32::<LittleEndian>()?;
    let hi = r.read_u32::<LittleEndian>()?;
    let flags = r.read_u32::<LittleEndian>()?;

    let scale = (flags & DECIMAL_SCALE_MASK) >> DECIMAL_SCALE_SHIFT;
    if flags & !(DECIMAL_SIGN_MASK | DECIMAL_SCALE_MASK) != 0 || scale > DECIMAL_MAX_SCALE {
        return Err(RecordError::DecimalFlags(flags));
    }
    Ok(Decimal::from_parts(
        lo,
        mid,
        hi,
        flags & DECIMAL_SIGN_MASK != 0,
        scale,
    ))
}

fn write_decimal<W: Write>(value: &Decimal, w: &mut W) -> io::Result<()> {
    let magnitude = value.mantissa().unsigned_abs();
    w.write_u32::<LittleEndian>(magnitude as u32)?;
    w.write_u32::<LittleEndian>((magnitude >> 32) as u32)?;
    w.write_u32::<LittleEndian>((magnitude >> 64) as u32)?;

    let mut flags = value.scale() << DECIMAL_SCALE_SHIFT;
    if value.is_sign_negative() {
        flags |= DECIMAL_SIGN_MASK;
    }
    w.write_u32::<LittleEndian>(flags)
}

/// A reader for binary roster files
///
/// Implements an Iterator that emits the file's student records in order.
/// Iteration ends when the input is exhausted at a record boundary; an input
/// that ends partway into a record yields a truncation error instead. The
/// iterator is fused after the first error.
pub struct StudentReader<R>
where
    R: BufRead,
{
    reader: R,
    num_read: usize,
    done: bool,
}

impl<R: BufRead> StudentReader<R> {
    pub fn from_reader(reader: R) -> StudentReader<R> {
        Self {
            reader,
            num_read: 0,
            done: false,
        }
    }

    /// The number of records successfully decoded so far.
    pub fn num_read(&self) -> usize {
        self.num_read
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn at_end(&mut self) -> io::Result<bool> {
        Ok(self.reader.fill_buf()?.is_empty())
    }

    fn read_student(&mut self) -> RecordResult<Student> {
        let name = read_string(&mut self.reader)?;
        let group = read_string(&mut self.reader)?;
        let date_of_birth = BinaryDateTime {
            value: self.reader.read_i64::<LittleEndian>()?,
        };
        if date_of_birth.kind() != DateTimeKind::Unspecified {
            debug!(
                "Record {} has a date_time of kind {}",
                self.num_read,
                date_of_birth.kind()
            );
        }
        let date_of_birth = NaiveDateTime::try_from(date_of_birth)?;
        let average_score = read_decimal(&mut self.reader)?;

        Ok(Student {
            name,
            group,
            date_of_birth,
            average_score,
        })
    }
}

impl<R> Iterator for StudentReader<R>
where
    R: BufRead,
{
    type Item = Result<Student>;

    fn next(&mut self) -> Option<Result<Student>> {
        if self.done {
            return None;
        }

        match self.at_end() {
            Err(err) => {
                self.done = true;
                Some(Err(BinaryDecodeError::Io(err)))
            }

            Ok(true) => {
                debug!("StudentReader reached end of input after {} records", self.num_read);
                self.done = true;
                None
            }

            Ok(false) => match self.read_student() {
                Ok(student) => {
                    self.num_read += 1;
                    Some(Ok(student))
                }
                Err(source) => {
                    self.done = true;
                    Some(Err(BinaryDecodeError::Record {
                        index: self.num_read,
                        source,
                    }))
                }
            },
        }
    }
}

/// Decode every record from `reader`.
///
/// Either the whole input decodes or an error is returned; no partial list is
/// produced.
pub fn read_students<R: BufRead>(reader: R) -> Result<Vec<Student>> {
    StudentReader::from_reader(reader).collect()
}

/// Open the roster file at `path` and decode every record from it.
///
/// The file is closed before this returns, whether or not decoding succeeds.
#[tracing::instrument(level = "debug", skip_all)]
pub fn read_students_from_path(path: &Path) -> Result<Vec<Student>> {
    let file = BufReader::new(File::open(path)?);
    let students = read_students(file)?;
    debug!("Decoded {} records from {:?}", students.len(), path);
    Ok(students)
}

/// A writer for binary roster files
pub struct StudentWriter<W: Write> {
    w: W,
    num_written: usize,
}

impl<W: Write> StudentWriter<W> {
    pub fn new(w: W) -> Self {
        Self { w, num_written: 0 }
    }

    /// Encode and write a single record.
    pub fn write_student(&mut self, student: &Student) -> EncodeResult<()> {
        // Validate the date first so a failure doesn't leave half a record.
        let date_of_birth = BinaryDateTime::try_from(student.date_of_birth)?;
        write_string(&student.name, &mut self.w)?;
        write_string(&student.group, &mut self.w)?;
        self.w.write_i64::<LittleEndian>(date_of_birth.value)?;
        write_decimal(&student.average_score, &mut self.w)?;
        self.num_written += 1;
        Ok(())
    }

    /// Flush the underlying writer and return it, along with the number of
    /// records written.
    pub fn finish(mut self) -> EncodeResult<(W, usize)> {
        self.w.flush()?;
        debug!("Wrote {} roster records", self.num_written);
        Ok((self.w, self.num_written))
    }
}

/// Encode all of `students` into `w`, returning the number of records written.
#[tracing::instrument(level = "debug", skip_all)]
pub fn write_students<'a, I, W>(students: I, w: W) -> EncodeResult<usize>
where
    I: IntoIterator<Item = &'a Student>,
    W: Write,
{
    let mut writer = StudentWriter::new(w);
    for student in students {
        writer.write_student(student)?;
    }
    let (_, num_written) = writer.finish()?;
    Ok(num_written)
}
