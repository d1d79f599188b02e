use std::fmt;
use std::iter::Fuse;
use std::ops::Deref;

use tracing::error;

use crate::error::{Error, Result};

use super::execution::Running;
use super::stage::LineStream;
use super::state::Encoding;

/// The materialized result of one run: decoded output plus how it went.
///
/// Derefs to the output text, so a `Stdout` can be used wherever a `&str` is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Stdout {
    text: String,
    stderr: String,
    returncodes: Vec<i32>,
    command_line: String,
}

impl Stdout {
    pub(crate) fn new(text: String, stderr: String, returncodes: Vec<i32>, command_line: String) -> Self {
        Stdout { text, stderr, returncodes, command_line }
    }

    pub fn stdout(&self) -> &str {
        &self.text
    }

    /// Standard error of every stage, joined.
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Nonzero exit codes; empty on success.
    pub fn returncodes(&self) -> &[i32] {
        &self.returncodes
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn failed(&self) -> bool {
        !self.returncodes.is_empty()
    }

    pub fn succeeded(&self) -> bool {
        self.returncodes.is_empty()
    }

    pub fn into_string(self) -> String {
        self.text
    }

    pub fn into_error(self) -> Error {
        Error::Pipeline {
            command_line: self.command_line,
            stderr: self.stderr,
            returncodes: self.returncodes,
        }
    }

    /// Turn a failed run into an error.
    pub fn check(self) -> Result<Self> {
        if self.succeeded() {
            return Ok(self);
        }
        error!(
            command = %self.command_line,
            returncodes = ?self.returncodes,
            stderr = %self.stderr,
            "command failed"
        );
        Err(self.into_error())
    }
}

impl Deref for Stdout {
    type Target = str;

    fn deref(&self) -> &str {
        &self.text
    }
}

impl AsRef<str> for Stdout {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Stdout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq<str> for Stdout {
    fn eq(&self, other: &str) -> bool {
        self.text == other
    }
}

impl PartialEq<&str> for Stdout {
    fn eq(&self, other: &&str) -> bool {
        self.text == *other
    }
}

/// Decoded output lines of a run, newline stripped.
///
/// Once the output is exhausted the run is waited for; a failed run yields
/// one final `Err(Error::Pipeline)` before the iterator ends.
pub struct Lines {
    lines: Fuse<LineStream>,
    running: Option<Running>,
    failure: Option<Error>,
    encoding: Encoding,
}

impl Lines {
    pub(crate) fn new(lines: LineStream, running: Running, encoding: Encoding) -> Self {
        Lines { lines: lines.fuse(), running: Some(running), failure: None, encoding }
    }

    /// Replay an already materialized result.
    pub(crate) fn replay(result: &Stdout) -> Self {
        let lines: Vec<Vec<u8>> = if result.text.is_empty() {
            Vec::new()
        } else {
            result.text.split('\n').map(|l| format!("{l}\n").into_bytes()).collect()
        };
        let failure = result.failed().then(|| result.clone().into_error());
        Lines {
            lines: (Box::new(lines.into_iter()) as LineStream).fuse(),
            running: None,
            failure,
            encoding: Encoding::Utf8,
        }
    }
}

impl Iterator for Lines {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Result<String>> {
        if let Some(mut line) = self.lines.next() {
            if line.last() == Some(&b'\n') {
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
            }
            return Some(Ok(self.encoding.decode(&line)));
        }

        if let Some(running) = self.running.take() {
            let result = running.conclude(String::new());
            if result.failed() {
                return Some(Err(result.into_error()));
            }
        }
        self.failure.take().map(Err)
    }
}

impl fmt::Debug for Lines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.running {
            Some(running) => write!(f, "Lines({})", running.command_line()),
            None => write!(f, "Lines"),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
