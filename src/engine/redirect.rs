use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::process::Stdio;

use super::path::expand_home;

/// Where a stage's (or a whole pipeline's) output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// `> file`, or `>> file` when `append` is set.
    File { path: PathBuf, append: bool },
    /// `1`: the host's own standard output.
    Stdout,
    /// `2`: the host's own standard error.
    Stderr,
    /// Discard everything.
    Null,
}

impl Redirect {
    pub fn truncate(path: impl Into<PathBuf>) -> Self {
        Redirect::File { path: path.into(), append: false }
    }

    pub fn append(path: impl Into<PathBuf>) -> Self {
        Redirect::File { path: path.into(), append: true }
    }

    /// Numbered streams the way a shell spells them: `1` and `2`.
    pub fn fd(n: u8) -> Option<Self> {
        match n {
            1 => Some(Redirect::Stdout),
            2 => Some(Redirect::Stderr),
            _ => None,
        }
    }

    /// Open the target as a writable file.
    pub fn open(&self) -> io::Result<File> {
        match self {
            Redirect::File { path, append } => {
                let path = expand_home(&path.to_string_lossy());
                let file = if *append {
                    OpenOptions::new().create(true).append(true).open(&path)
                } else {
                    File::create(&path)
                };
                file.map_err(|e| io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))
            }
            Redirect::Stdout => Ok(File::from(io::stdout().as_fd().try_clone_to_owned()?)),
            Redirect::Stderr => Ok(File::from(io::stderr().as_fd().try_clone_to_owned()?)),
            Redirect::Null => OpenOptions::new().write(true).open("/dev/null"),
        }
    }

    /// The target as a child's stderr slot. Inheriting there means fd 2,
    /// so the host's stdout is handed over as a duplicate of fd 1.
    pub fn stderr_stdio(&self) -> io::Result<Stdio> {
        match self {
            Redirect::Stderr => Ok(Stdio::inherit()),
            Redirect::Null => Ok(Stdio::null()),
            _ => self.open().map(Stdio::from),
        }
    }
}
