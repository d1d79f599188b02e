//! The pieces a pipeline is made of.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::parser::split_words;

use super::alias::Aliases;
use super::env::Environ;
use super::redirect::Redirect;
use super::state::Encoding;

/// Byte lines (newline included) flowing into or out of a transform stage.
pub type LineStream = Box<dyn Iterator<Item = Vec<u8>> + Send>;

/// An in-process stage: consumes the previous stage's lines, yields new ones.
pub type TransformFn = dyn Fn(LineStream) -> LineStream + Send + Sync;

/// When a pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    /// Nothing runs until the pipeline is consumed; every consumption re-runs.
    #[default]
    Deferred,
    /// Runs once while being built; later consumption returns that result.
    RunImmediately,
}

/// Per-stage settings for a process stage.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Run the joined command line through `/bin/sh -c`.
    pub shell: bool,
    /// Send stderr wherever stdout goes.
    pub combine_stderr: bool,
    pub encoding: Option<Encoding>,
    pub stdout: Option<Redirect>,
    pub stderr: Option<Redirect>,
    /// Environment for this stage instead of the context's.
    pub env: Option<Environ>,
    pub cwd: Option<PathBuf>,
    /// `Some(true)` forces [`ExecMode::RunImmediately`], `Some(false)` forces
    /// [`ExecMode::Deferred`], `None` keeps the binary's policy.
    pub run_now: Option<bool>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    pub fn combine_stderr(mut self, combine: bool) -> Self {
        self.combine_stderr = combine;
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn stdout(mut self, target: Redirect) -> Self {
        self.stdout = Some(target);
        self
    }

    pub fn stderr(mut self, target: Redirect) -> Self {
        self.stderr = Some(target);
        self
    }

    pub fn env(mut self, env: Environ) -> Self {
        self.env = Some(env);
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn run_now(mut self, now: bool) -> Self {
        self.run_now = Some(now);
        self
    }
}

/// An external process invocation.
#[derive(Debug, Clone)]
pub struct CommandStage {
    pub(crate) name: String,
    pub(crate) binary: String,
    /// Wrapper words placed before the binary (`sudo -s`, `ssh host`, `test -e`).
    pub(crate) prefix: Vec<String>,
    pub(crate) args: Vec<String>,
    pub(crate) options: Options,
}

impl CommandStage {
    pub fn new(binary: impl Into<String>, args: Vec<String>) -> Self {
        let binary = binary.into();
        CommandStage {
            name: binary.clone(),
            binary,
            prefix: Vec::new(),
            args,
            options: Options::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn prefix(&self) -> &[String] {
        &self.prefix
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn is_sudo(&self) -> bool {
        self.prefix.first().map(String::as_str) == Some("sudo")
    }

    pub fn is_remote(&self) -> bool {
        self.prefix.first().map(String::as_str) == Some("ssh")
    }

    /// The argv this stage runs as when no shell is involved.
    pub fn argv(&self, aliases: &Aliases) -> Vec<String> {
        self.render(false, aliases)
    }

    /// The single string handed to `sh -c` (also used for display).
    pub fn shell_line(&self, aliases: &Aliases) -> String {
        self.render(true, aliases).join(" ")
    }

    pub fn command_line(&self, shell: bool, aliases: &Aliases) -> String {
        if shell {
            self.shell_line(aliases)
        } else {
            self.argv(aliases).join(" ")
        }
    }

    fn render(&self, shell: bool, aliases: &Aliases) -> Vec<String> {
        let mut words: Vec<String> = self.prefix.clone();
        if let Some(first) = words.first_mut() {
            *first = aliases.resolve(first);
        }

        if self.is_remote() {
            // Everything after `ssh host` travels as one remote command.
            let mut remote = self.binary.clone();
            for arg in &self.args {
                remote.push(' ');
                remote.push_str(arg);
            }
            let remote = remote.trim().to_string();
            if remote.split_whitespace().any(|w| w == "sudo") {
                words.insert(1, "-t".to_string());
            }
            if shell {
                words.push(shell_quote(&remote));
            } else {
                words.push(remote);
            }
        } else if shell {
            words.push(self.binary.clone());
            words.extend(self.args.iter().cloned());
        } else {
            words.extend(split_words(&self.binary));
            for arg in &self.args {
                words.extend(split_words(arg));
            }
        }

        words.retain(|w| !w.is_empty());
        words
    }
}

/// Quote `s` for `/bin/sh` when it holds anything the shell would interpret.
pub fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%~".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

/// Where injected data comes from, chosen when the stage is built.
#[derive(Clone)]
pub enum StdinSource {
    /// A fixed buffer, replayed on every run.
    Bytes(Arc<[u8]>),
    /// A one-shot reader; later runs see whatever is left.
    Readable(Arc<Mutex<Box<dyn Read + Send>>>),
    /// A file, rewound and handed to the next stage by descriptor.
    Seekable(Arc<Mutex<File>>),
}

impl StdinSource {
    pub fn reader(reader: impl Read + Send + 'static) -> Self {
        StdinSource::Readable(Arc::new(Mutex::new(Box::new(reader))))
    }

    pub fn file(file: File) -> Self {
        StdinSource::Seekable(Arc::new(Mutex::new(file)))
    }
}

impl fmt::Debug for StdinSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StdinSource::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            StdinSource::Readable(_) => write!(f, "Readable"),
            StdinSource::Seekable(file) => match file.lock() {
                Ok(file) => write!(f, "Seekable({:?})", file),
                Err(_) => write!(f, "Seekable"),
            },
        }
    }
}

impl From<Vec<u8>> for StdinSource {
    fn from(bytes: Vec<u8>) -> Self {
        StdinSource::Bytes(bytes.into())
    }
}

impl From<&[u8]> for StdinSource {
    fn from(bytes: &[u8]) -> Self {
        StdinSource::Bytes(bytes.into())
    }
}

impl<const N: usize> From<&[u8; N]> for StdinSource {
    fn from(bytes: &[u8; N]) -> Self {
        StdinSource::Bytes(bytes.as_slice().into())
    }
}

impl From<&str> for StdinSource {
    fn from(text: &str) -> Self {
        StdinSource::Bytes(text.as_bytes().into())
    }
}

impl From<String> for StdinSource {
    fn from(text: String) -> Self {
        StdinSource::Bytes(text.into_bytes().into())
    }
}

impl From<File> for StdinSource {
    fn from(file: File) -> Self {
        StdinSource::file(file)
    }
}

/// A data-injection stage.
#[derive(Debug, Clone)]
pub struct StdinStage {
    pub(crate) source: StdinSource,
}

impl StdinStage {
    pub fn source(&self) -> &StdinSource {
        &self.source
    }
}

/// A function spliced into the pipeline as if it were a command.
#[derive(Clone)]
pub struct TransformStage {
    pub(crate) name: String,
    pub(crate) func: Arc<TransformFn>,
}

impl TransformStage {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for TransformStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransformStage({})", self.name)
    }
}

/// One element of a pipeline.
#[derive(Debug, Clone)]
pub enum Stage {
    Command(CommandStage),
    Stdin(StdinStage),
    Transform(TransformStage),
}

impl Stage {
    pub fn as_command(&self) -> Option<&CommandStage> {
        match self {
            Stage::Command(c) => Some(c),
            _ => None,
        }
    }

    /// How the stage shows up in `a | b | c` renderings.
    pub fn describe(&self, aliases: &Aliases) -> String {
        match self {
            Stage::Command(c) => c.shell_line(aliases),
            Stage::Stdin(_) => "stdin".to_string(),
            Stage::Transform(t) => format!("{}()", t.name),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(binary: &str, prefix: &[&str], args: &[&str]) -> CommandStage {
        let mut stage = CommandStage::new(binary, args.iter().map(|a| a.to_string()).collect());
        stage.prefix = prefix.iter().map(|p| p.to_string()).collect();
        stage
    }

    #[test]
    fn test_args_are_word_split() {
        let aliases = Aliases::default();
        let s = stage("head", &[], &["-n 1", "file"]);
        assert_eq!(s.argv(&aliases), vec!["head", "-n", "1", "file"]);
        assert_eq!(s.shell_line(&aliases), "head -n 1 file");
    }

    #[test]
    fn test_shell_line_keeps_quotes() {
        let aliases = Aliases::default();
        let s = stage("sed", &[], &["-e 's/a b/c/'"]);
        assert_eq!(s.shell_line(&aliases), "sed -e 's/a b/c/'");
        assert_eq!(s.argv(&aliases), vec!["sed", "-e", "s/a b/c/"]);
    }

    #[test]
    fn test_sudo_prefix_is_aliased() {
        let aliases = Aliases::default();
        let s = stage("ls", &["sudo", "-s"], &["."]);
        assert!(s.is_sudo());
        assert_eq!(s.argv(&aliases), vec!["/usr/bin/sudo", "-s", "ls", "."]);
    }

    #[test]
    fn test_flag_command_has_no_binary() {
        let aliases = Aliases::default();
        let s = stage("", &["test", "-e"], &["/tmp"]);
        assert_eq!(s.argv(&aliases), vec!["test", "-e", "/tmp"]);
    }

    #[test]
    fn test_ssh_remote_command_is_one_token() {
        let aliases = Aliases::default();
        let s = stage("ls", &["ssh", "example.com"], &["-l", "/tmp"]);
        assert_eq!(s.argv(&aliases), vec!["ssh", "example.com", "ls -l /tmp"]);
        assert_eq!(s.shell_line(&aliases), "ssh example.com 'ls -l /tmp'");
    }

    #[test]
    fn test_ssh_sudo_gets_pty() {
        let aliases = Aliases::default();
        let s = stage("sudo", &["ssh", "example.com"], &["apt-get update"]);
        assert_eq!(
            s.argv(&aliases),
            vec!["ssh", "-t", "example.com", "sudo apt-get update"]
        );
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain-word"), "plain-word");
        assert_eq!(shell_quote("a | b"), "'a | b'");
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_describe() {
        let aliases = Aliases::default();
        let stdin = Stage::Stdin(StdinStage { source: StdinSource::from("x") });
        assert_eq!(stdin.describe(&aliases), "stdin");
        let upper = Stage::Transform(TransformStage {
            name: "upper".to_string(),
            func: Arc::new(|lines: LineStream| lines),
        });
        assert_eq!(upper.describe(&aliases), "upper()");
    }
}
