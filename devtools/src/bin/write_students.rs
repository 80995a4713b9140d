use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::Parser;
use rostersplit::Student;
use rostersplit::binary::write_students;
use rust_decimal::Decimal;
use serde::Deserialize;

/// Writes a binary student roster from a JSON description
///
/// The JSON input is an array of objects with `name`, `group`,
/// `date_of_birth` (YYYY-MM-DD, or an RFC 3339 date-time without offset) and
/// `average_score` (a string, so its exact decimal digits are kept).
#[derive(Parser)]
struct Args {
    /// Path to the JSON roster spec file
    #[clap(long)]
    spec: PathBuf,

    /// Binary roster output path
    #[clap(long)]
    out: PathBuf,
}

#[derive(Deserialize)]
struct JsonStudent {
    name: String,
    group: String,
    date_of_birth: String,
    average_score: String,
}

fn parse_date_of_birth(s: &str) -> Result<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::from_str(s) {
        return Ok(dt);
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Parsing date of birth {s:?}"))?;
    Ok(date.and_time(Default::default()))
}

impl TryFrom<JsonStudent> for Student {
    type Error = anyhow::Error;

    fn try_from(value: JsonStudent) -> Result<Self> {
        Ok(Student::new(
            value.name,
            value.group,
            parse_date_of_birth(&value.date_of_birth)?,
            Decimal::from_str(&value.average_score)
                .with_context(|| format!("Parsing average score {:?}", value.average_score))?,
        ))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let spec_file = BufReader::new(File::open(&args.spec).context("Opening the spec file")?);
    let spec: Vec<JsonStudent> = serde_json::from_reader(spec_file)?;
    let students = spec
        .into_iter()
        .map(Student::try_from)
        .collect::<Result<Vec<_>>>()?;

    let out = BufWriter::new(File::create(&args.out).context("Creating the output file")?);
    let n = write_students(&students, out)?;
    eprintln!("Wrote {n} records to {}", args.out.display());
    Ok(())
}
