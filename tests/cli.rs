#![cfg(feature = "cli")]

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::BufWriter;
use std::process::{Command, Output};

use anyhow::Result;
use rostersplit::binary::write_students;
use rostersplit::students;
use tempfile::TempDir;

fn rostersplit(args: &[&OsStr]) -> Result<Output> {
    Ok(Command::new(env!("CARGO_BIN_EXE_rostersplit"))
        .args(args)
        .env_remove("RUST_BACKTRACE")
        .env_remove("RUST_LIB_BACKTRACE")
        .output()?)
}

#[test]
fn test_truncated_roster_prints_one_error_line() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("truncated.bin");
    let output = dir.path().join("out");
    write_students(
        &students![("Alice", "G1", (1990, 1, 1), "4.50")],
        BufWriter::new(File::create(&input)?),
    )?;
    let mut bytes = fs::read(&input)?;
    bytes.extend_from_slice(&[0x0a, b'B', b'o', b'b']);
    fs::write(&input, bytes)?;

    let out = rostersplit(&[input.as_os_str(), OsStr::new("-o"), output.as_os_str()])?;

    assert_eq!(out.status.code(), Some(1));
    let stdout = String::from_utf8(out.stdout)?;
    let errors = stdout
        .lines()
        .filter(|l| l.starts_with("Error:"))
        .collect::<Vec<_>>();
    assert_eq!(errors.len(), 1, "{stdout}");
    assert!(errors[0].ends_with("unexpected end of file"), "{stdout}");
    assert!(!errors[0].contains(".:"), "{stdout}");
    assert!(stdout.ends_with("\nDone.\n"));
    assert_eq!(String::from_utf8(out.stderr)?, "");
    assert!(!output.exists());
    Ok(())
}

#[test]
fn test_no_prompt_missing_file_fails() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("missing.bin");
    let output = dir.path().join("out");

    let out = rostersplit(&[
        OsStr::new("--no-prompt"),
        input.as_os_str(),
        OsStr::new("-o"),
        output.as_os_str(),
    ])?;

    assert_eq!(out.status.code(), Some(1));
    let stdout = String::from_utf8(out.stdout)?;
    assert_eq!(
        stdout,
        format!("Error: File \"{}\" not found\n\nDone.\n", input.display())
    );
    assert_eq!(String::from_utf8(out.stderr)?, "");
    Ok(())
}

#[test]
fn test_no_prompt_splits_existing_file() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("students.bin");
    let output = dir.path().join("out");
    write_students(
        &students![
            ("Alice", "G1", (1990, 1, 1), "4.50"),
            ("Bob", "G2", (1991, 2, 2), "3.75"),
        ],
        BufWriter::new(File::create(&input)?),
    )?;

    let out = rostersplit(&[
        OsStr::new("--no-prompt"),
        input.as_os_str(),
        OsStr::new("-o"),
        output.as_os_str(),
    ])?;

    assert!(out.status.success());
    assert!(String::from_utf8(out.stdout)?.starts_with("Data processed and saved successfully."));
    assert_eq!(
        fs::read_to_string(output.join("G2.txt"))?,
        "Bob, 1991-02-02, 3.75\n"
    );
    Ok(())
}
