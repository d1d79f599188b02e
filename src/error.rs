use std::io;

use thiserror::Error;

/// Everything that can go wrong while building or running a pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// The binary could not be launched (not found, not executable, ...).
    #[error("sluice: error executing '{command_line}': {source}")]
    Spawn {
        command_line: String,
        #[source]
        source: io::Error,
    },

    /// One or more stages exited with a nonzero code.
    #[error("sluice: '{command_line}' failed with {returncodes:?}: {stderr}")]
    Pipeline {
        command_line: String,
        stderr: String,
        returncodes: Vec<i32>,
    },

    /// The sudo pre-flight check did not pass.
    #[error("sluice: {0}")]
    Privilege(String),

    /// The caller asked for something the API cannot express.
    #[error("sluice: {0}")]
    Usage(String),

    /// The operation is not available on this execution root.
    #[error("sluice: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Exit codes attached to a failed run, empty for every other kind.
    pub fn returncodes(&self) -> &[i32] {
        match self {
            Error::Pipeline { returncodes, .. } => returncodes,
            _ => &[],
        }
    }

    /// Captured standard error attached to a failed run.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Error::Pipeline { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
