use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rostersplit::binary::StudentReader;

/// Prints every record of a binary student roster
///
/// Records decoded before an error are still printed, which helps locate the
/// damaged part of a file.
#[derive(Parser)]
struct Args {
    /// Binary roster input path
    input: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let file = BufReader::new(File::open(&args.input).context("Opening the roster file")?);
    for (i, student) in StudentReader::from_reader(file).enumerate() {
        let student = student?;
        println!(
            "{i}\t{:?}\t{:?}\t{}\t{}",
            student.name, student.group, student.date_of_birth, student.average_score
        );
    }
    Ok(())
}
