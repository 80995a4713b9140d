//! Input path resolution
//!
//! [`resolve_input_path`] validates the path given on the command line and,
//! while it doesn't name an existing file, asks for another one through a
//! [`Prompt`]. An empty answer cancels. Without a prompt ([`NoPrompt`]), a
//! missing file is an error.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

pub const PATH_REQUEST: &str =
    "Path to the student database file (leave empty to cancel): ";

/// A source of answers for [`resolve_input_path`].
pub trait Prompt {
    /// Show `message` and return the answer, without its line terminator.
    ///
    /// End of input is reported as an empty answer.
    fn ask(&mut self, message: &str) -> io::Result<String>;

    /// Tell the user something without expecting an answer.
    fn notify(&mut self, message: &str) -> io::Result<()>;
}

/// Prompts on a terminal, or anything else that reads lines and writes text.
pub struct TerminalPrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl TerminalPrompt<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> Prompt for TerminalPrompt<R, W> {
    fn ask(&mut self, message: &str) -> io::Result<String> {
        write!(self.output, "{message}")?;
        self.output.flush()?;

        let mut line = String::new();
        self.input.read_line(&mut line)?;
        let answer = line.strip_suffix('\n').unwrap_or(&line);
        let answer = answer.strip_suffix('\r').unwrap_or(answer);
        Ok(answer.to_owned())
    }

    fn notify(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.output, "{message}")
    }
}

/// A prompt for argument-only runs.
///
/// Never asks. A question fails with [`io::ErrorKind::NotFound`], carrying the
/// last notice (such as `File "…" not found`) as its message.
#[derive(Default)]
pub struct NoPrompt {
    notice: Option<String>,
}

impl Prompt for NoPrompt {
    fn ask(&mut self, message: &str) -> io::Result<String> {
        debug!("Not prompting in argument-only mode: {message:?}");
        let notice = self
            .notice
            .take()
            .unwrap_or_else(|| "No <INPUT> file was given".to_owned());
        Err(io::Error::new(io::ErrorKind::NotFound, notice))
    }

    fn notify(&mut self, message: &str) -> io::Result<()> {
        self.notice = Some(message.to_owned());
        Ok(())
    }
}

/// The outcome of input path resolution.
#[derive(Clone, PartialEq, Debug)]
pub enum Resolution {
    /// An existing file to read.
    Path(PathBuf),

    /// The user gave an empty answer.
    Cancelled,
}

fn is_existing_file(path: &Path) -> bool {
    path.is_file()
}

/// Resolve the input file path, asking through `prompt` until an existing
/// file is named or the user cancels with an empty answer.
pub fn resolve_input_path<P: Prompt + ?Sized>(
    initial: Option<PathBuf>,
    prompt: &mut P,
) -> io::Result<Resolution> {
    let mut candidate = initial.unwrap_or_default();
    loop {
        if !candidate.as_os_str().is_empty() {
            if is_existing_file(&candidate) {
                debug!("Resolved input path: {:?}", candidate);
                return Ok(Resolution::Path(candidate));
            }
            prompt.notify(&format!("File \"{}\" not found", candidate.display()))?;
        }

        let answer = prompt.ask(PATH_REQUEST)?;
        if answer.is_empty() {
            debug!("Input path prompt cancelled");
            return Ok(Resolution::Cancelled);
        }
        candidate = PathBuf::from(answer);
    }
}
