use std::env;
use std::io;
use std::path::{Path, PathBuf};

use crate::engine::{expand_home, Environ};

/// Change the process working directory and keep `PWD` in step.
pub(crate) fn cd(environ: &Environ, dir: &Path) -> io::Result<PathBuf> {
    let target = expand_home(&dir.to_string_lossy());
    env::set_current_dir(&target).map_err(|e| {
        io::Error::new(e.kind(), format!("cd: no such file or directory: {}", target.display()))
    })?;
    let current = env::current_dir()?;
    environ.set("PWD", current.to_string_lossy());
    Ok(current)
}

pub(crate) fn pwd() -> io::Result<PathBuf> {
    env::current_dir()
}

/// Returns to the directory (and `PWD`) in effect before
/// [`Namespace::pushd`](super::Namespace::pushd) when dropped.
#[must_use = "the previous directory is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct DirGuard {
    environ: Environ,
    previous: PathBuf,
    previous_pwd: Option<String>,
}

impl DirGuard {
    /// The directory that will be restored.
    pub fn previous(&self) -> &Path {
        &self.previous
    }
}

pub(crate) fn pushd(environ: &Environ, dir: &Path) -> io::Result<DirGuard> {
    let previous = env::current_dir()?;
    let previous_pwd = environ.get("PWD");
    cd(environ, dir)?;
    Ok(DirGuard { environ: environ.clone(), previous, previous_pwd })
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        let _ = env::set_current_dir(&self.previous);
        match self.previous_pwd.take() {
            Some(pwd) => self.environ.set("PWD", pwd),
            None => {
                self.environ.remove("PWD");
            }
        }
    }
}
