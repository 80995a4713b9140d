use std::fmt::Write;
use std::fs::File;
use std::path::{PathBuf, absolute};
use std::process::ExitCode;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use clap::builder::styling::Styles;
use clap::{ColorChoice, Parser, crate_version};
use clap_cargo::style::{ERROR, HEADER, INVALID, LITERAL, PLACEHOLDER, USAGE, VALID};
use rostersplit::prompt::{NoPrompt, Prompt, Resolution, TerminalPrompt, resolve_input_path};
use rostersplit::{
    BinaryDecodeError, GroupWriteError, GroupWriterOptions, LineEnding, RosterSplitError,
    SplitInfo,
};
use tracing::level_filters::LevelFilter;
use tracing::{Level, debug, info, instrument};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, Registry, fmt};

pub const CLAP_STYLING: Styles = Styles::styled()
    .header(HEADER)
    .usage(USAGE)
    .literal(LITERAL)
    .placeholder(PLACEHOLDER)
    .error(ERROR)
    .valid(VALID)
    .invalid(INVALID);

static LONG_VERSION: LazyLock<String> =
    LazyLock::new(|| format!("{} (rustc {})", crate_version!(), env!("RUSTC_VERSION")));

/// Name of the folder created on the desktop when no output directory is given.
const OUTPUT_FOLDER: &str = "Students";

/// Split a binary student roster into one text file per group
///
/// Reads the student records from INPUT and writes each group's students, one
/// per line, to <GROUP>.txt in the output directory. If INPUT is missing or
/// doesn't exist, asks for a path on the terminal; an empty answer cancels.
#[derive(Parser)]
#[command(
    name = "rostersplit",
    version,
    long_version = LONG_VERSION.as_str(),
    about,
    color = ColorChoice::Auto,
    styles = CLAP_STYLING,
)]
struct Cli {
    /// Student roster input path
    input: Option<PathBuf>,

    /// Directory to write group files to
    ///
    /// If unspecified, defaults to a "Students" folder on your desktop.
    #[clap(long, short)]
    output_dir: Option<PathBuf>,

    /// Never ask for an input path; fail if INPUT isn't an existing file.
    #[clap(long, action)]
    no_prompt: bool,

    /// Line terminator for group files.
    #[clap(long, default_value_t = LineEnding::Lf)]
    line_ending: LineEnding,

    /// Configure diagnostic logging level
    ///
    /// Set to DEBUG to see a performance summary following execution.
    #[clap(long, short = 'L', default_value_t = Level::ERROR)]
    log_level: Level,

    /// Log to a file
    #[clap(long)]
    log_file: Option<PathBuf>,
}

/// How a run ended, short of a fatal error.
enum Outcome {
    Completed(String),
    Cancelled,
}

fn default_output_dir() -> Result<PathBuf> {
    let desktop = dirs::desktop_dir().ok_or_else(|| {
        anyhow!("Could not find a desktop folder on this system. Use --output-dir instead.")
    })?;
    Ok(desktop.join(OUTPUT_FOLDER))
}

#[instrument(level = "trace", skip_all)]
fn split_cmd(args: &Cli) -> Result<Outcome> {
    let mut prompt: Box<dyn Prompt> = if args.no_prompt {
        Box::new(NoPrompt::default())
    } else {
        Box::new(TerminalPrompt::stdio())
    };
    let res = resolve_input_path(args.input.clone(), prompt.as_mut());
    let resolution = if args.no_prompt {
        // The error already reads `File "…" not found`.
        res.map_err(anyhow::Error::from)
    } else {
        res.context("Reading the <INPUT> path from the terminal")
    }?;
    let input = match resolution {
        Resolution::Path(p) => p,
        Resolution::Cancelled => return Ok(Outcome::Cancelled),
    };
    info!("Using roster input file: {:?}", absolute(&input)?);

    let output_dir = match &args.output_dir {
        Some(p) => p.clone(),
        None => default_output_dir()?,
    };
    debug!("Output directory: {:?}", output_dir);

    let options = GroupWriterOptions::default().with_line_ending(args.line_ending);
    let info = with_split_context(rostersplit::split_roster(&input, &output_dir, options))?;

    Ok(Outcome::Completed(generate_split_report(&info)?))
}

/// Attach a hint for the user to a failed split, by the kind of failure.
fn with_split_context(res: rostersplit::Result<SplitInfo>) -> Result<SplitInfo> {
    match &res {
        Err(RosterSplitError::Decode(BinaryDecodeError::Io(_))) => {
            res.context("Opening the <INPUT> file. Check that it exists and can be accessed")
        }

        Err(RosterSplitError::Decode(_)) => res.context(
            "The <INPUT> is not a valid student roster. Check that it is complete and correct",
        ),

        Err(RosterSplitError::Write(GroupWriteError::CreateDir(..))) => res.context(
            "Creating the output directory. Check that you have permission to write there",
        ),

        Err(RosterSplitError::Write(_)) => res.context(concat!(
            "Writing a group file. Files for earlier groups were kept; ",
            "group names containing path separators can't be written"
        )),

        _ => res.map_err(anyhow::Error::from),
    }
}

/// The single line printed for a fatal error, with its causes joined by ": ".
fn error_line(e: &anyhow::Error) -> String {
    format!("Error: {e:#}")
}

fn generate_split_report(info: &SplitInfo) -> Result<String> {
    let mut r = String::new();
    writeln!(&mut r, "Data processed and saved successfully.")?;
    writeln!(
        &mut r,
        "{} students in {} groups:",
        info.num_students,
        info.groups.len()
    )?;
    for group in &info.groups {
        writeln!(
            &mut r,
            "  {} ({} students) -> {}",
            group.key,
            group.num_lines,
            absolute(&group.path)
                .unwrap_or(group.path.clone())
                .to_string_lossy()
        )?;
    }
    Ok(r)
}

fn init_logging(args: &Cli) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_w: Box<dyn std::io::Write + Send> = match &args.log_file {
        Some(path) => Box::new(File::create(path).context("Creating the log file")?),
        None => Box::new(std::io::stderr()),
    };
    let (appender, guard) = tracing_appender::non_blocking(log_w);

    // Enable the TRACE-level span tree layer for fmt logging level DEBUG.
    let fmt_layer = fmt::Layer::new()
        .with_writer(appender)
        .with_ansi(args.log_file.is_none())
        .with_target(false)
        .with_span_events(FmtSpan::ENTER | FmtSpan::CLOSE)
        .with_filter(LevelFilter::from_level(args.log_level));
    if args.log_level >= Level::DEBUG {
        let span_tree_layer = tracing_span_tree::SpanTree::default().aggregate(true);
        tracing::subscriber::set_global_default(
            Registry::default().with(fmt_layer).with(span_tree_layer),
        )?;
    } else {
        tracing::subscriber::set_global_default(Registry::default().with(fmt_layer))?;
    }
    Ok(guard)
}

fn main() -> ExitCode {
    // Intentionally avoid wrapping argument parsing errors in anyhow::Result so
    // we preserve Clap's pretty formatting of usage info.
    let args = Cli::parse();

    let _guard = match init_logging(&args) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    debug!("rostersplit {}", crate_version!());

    let code = match split_cmd(&args) {
        Ok(Outcome::Completed(report)) => {
            print!("{report}");
            ExitCode::SUCCESS
        }
        Ok(Outcome::Cancelled) => ExitCode::SUCCESS,
        Err(e) => {
            debug!("{e:?}");
            println!("{}", error_line(&e));
            ExitCode::FAILURE
        }
    };

    println!("\nDone.");
    code
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::PathBuf;

    use anyhow::Result;
    use rostersplit::binary::read_students;
    use rostersplit::prompt::{NoPrompt, resolve_input_path};
    use rostersplit::{GroupWriteError, RosterSplitError};

    use super::{error_line, with_split_context};

    #[test]
    fn test_decode_error_is_one_line() -> Result<()> {
        // A name that claims ten bytes but has only three.
        let decode_err = read_students(&[0x0a, b'B', b'o', b'b'][..]).unwrap_err();
        let e = with_split_context(Err(RosterSplitError::Decode(decode_err))).unwrap_err();

        let line = error_line(&e);
        assert!(!line.contains('\n'));
        assert!(!line.contains(".:"));
        assert_eq!(
            line,
            "Error: The <INPUT> is not a valid student roster. Check that it is complete \
             and correct: Roster decoding error: decoding record 0: unexpected end of file"
        );
        Ok(())
    }

    #[test]
    fn test_context_strings_do_not_end_in_periods() {
        let errors = [
            RosterSplitError::Decode(io::Error::other("x").into()),
            RosterSplitError::Write(GroupWriteError::CreateDir(
                PathBuf::from("out"),
                io::Error::other("x"),
            )),
            RosterSplitError::Write(GroupWriteError::WriteFile(
                PathBuf::from("out/G1.txt"),
                io::Error::other("x"),
            )),
        ];
        for err in errors {
            let e = with_split_context(Err(err)).unwrap_err();
            assert!(!e.to_string().ends_with('.'), "{e}");
            assert!(!error_line(&e).contains('\n'));
        }
    }

    #[test]
    fn test_no_prompt_missing_file_message() {
        let res = resolve_input_path(
            Some(PathBuf::from("/no/such/file.bin")),
            &mut NoPrompt::default(),
        );
        let e = res.map_err(anyhow::Error::from).unwrap_err();
        assert_eq!(error_line(&e), "Error: File \"/no/such/file.bin\" not found");
    }
}
