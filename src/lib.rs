//! Build and run external-process pipelines with Rust operators.
//!
//! ```no_run
//! let sh = sluice::sh();
//! let p = sh.command("cat").call(["/etc/hosts"]) | sh.command("grep").call(["-v '#'"]);
//! for line in p.lines()? {
//!     println!("{}", line?);
//! }
//! # Ok::<(), sluice::Error>(())
//! ```
//!
//! Pipelines are values: composing or selecting never runs anything, and
//! every `run`, `lines` or `write_to` starts the processes afresh. Commands
//! that only act on the filesystem (`rm`, `mkdir`, `cp`, ...) run as soon as
//! they are called.
//!
//! The library logs through `tracing` and installs no subscriber.

#![cfg(unix)]

pub mod engine;
pub mod error;
pub mod namespace;
pub mod parser;
pub mod signals;

use std::sync::LazyLock;

pub use engine::{
    CallOptions, Context, Encoding, Environ, ExecMode, LineStream, Lines, MapOptions, MapResults,
    Options, Pipeline, Prototype, Redirect, Running, Stdout, StdinSource,
};
pub use error::{Error, Result};
pub use namespace::{DirGuard, Namespace, Root};

static SH: LazyLock<Namespace> = LazyLock::new(Namespace::sh);
static SUDO: LazyLock<Namespace> = LazyLock::new(Namespace::sudo);
static TEST: LazyLock<Namespace> = LazyLock::new(Namespace::test);

/// Local commands on the process-wide [`Context`].
pub fn sh() -> &'static Namespace {
    &SH
}

/// Local commands under `sudo -s`.
pub fn sudo() -> &'static Namespace {
    &SUDO
}

/// `test` flags: `sluice::test().command("f").call([path])`.
pub fn test() -> &'static Namespace {
    &TEST
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_namespaces() {
        assert_eq!(sh().to_string(), "<sh>");
        assert_eq!(sudo().to_string(), "<sudo>");
        assert_eq!(test().to_string(), "<test>");
        assert_eq!(sh().command("echo").call(["global"]).run().unwrap(), "global");
    }

    #[test]
    fn test_global_environment_scope() {
        let env = &sh().context().env;
        {
            let _guard = env.scoped([("SLUICE_LIB_TEST", Some("scoped".to_string()))]);
            let out = sh().command("sh").call(["-c 'echo $SLUICE_LIB_TEST'"]).run().unwrap();
            assert_eq!(out, "scoped");
        }
        assert!(!env.contains("SLUICE_LIB_TEST"));
        let out = sh().command("sh").call(["-c 'echo x$SLUICE_LIB_TEST'"]).run().unwrap();
        assert_eq!(out, "x");
    }
}
