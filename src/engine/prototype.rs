use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;

use tracing::debug;

use crate::error::Error;

use super::batch::{MapOptions, MapResults};
use super::path::find_executable;
use super::pipeline::Pipeline;
use super::stage::{CommandStage, ExecMode, Options, Stage};
use super::state::Context;

/// A reusable command bound to one binary. Calling it builds a
/// one-stage [`Pipeline`].
#[derive(Debug, Clone)]
pub struct Prototype {
    name: String,
    binary: String,
    prefix: Vec<String>,
    mode: ExecMode,
    ctx: Context,
}

impl Prototype {
    pub(crate) fn new(
        ctx: Context,
        name: impl Into<String>,
        binary: impl Into<String>,
        prefix: Vec<String>,
        mode: ExecMode,
    ) -> Self {
        Prototype { name: name.into(), binary: binary.into(), prefix, mode, ctx }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Whether calls run on the spot or wait to be consumed.
    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    fn stage<I, S>(&self, args: I, options: Options) -> CommandStage
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut stage = CommandStage::new(self.binary.clone(), args.into_iter().map(Into::into).collect());
        stage.name = self.name.clone();
        stage.prefix = self.prefix.clone();
        stage.options = options;
        stage
    }

    /// `grep(["-v", "x"])`. Each argument is word-split, so `"-n 1"` is two.
    pub fn call<I, S>(&self, args: I) -> Pipeline
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.call_with(args, Options::default())
    }

    pub fn call_with<I, S>(&self, args: I, options: Options) -> Pipeline
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mode = match options.run_now {
            Some(true) => ExecMode::RunImmediately,
            Some(false) => ExecMode::Deferred,
            None => self.mode,
        };
        let stage = self.stage(args, options);
        Pipeline::new(self.ctx.clone(), Stage::Command(stage), mode)
    }

    /// The command with no arguments.
    pub fn pipeline(&self) -> Pipeline {
        self.call(Vec::<String>::new())
    }

    /// Run the command once per argument set, a bounded number at a time.
    /// Results come back in the order the batches were given.
    pub fn map<B, I, S>(&self, batches: B, options: MapOptions) -> MapResults
    where
        B: IntoIterator<Item = I>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let batches = batches
            .into_iter()
            .map(|args| args.into_iter().map(Into::into).collect())
            .collect();
        MapResults::start(self.clone(), batches, options)
    }

    /// Replace the current process with this command.
    ///
    /// Only returns if that could not happen.
    pub fn execv<I, S>(&self, args: I) -> Error
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv = self.stage(args, Options::default()).argv(&self.ctx.aliases);
        let command_line = argv.join(" ");
        let Some((program, rest)) = argv.split_first() else {
            return Error::Usage(format!("nothing to execute for {}", self.name));
        };

        let search = self.ctx.search_path();
        let Some(path) = find_executable(program, search.as_deref()) else {
            return Error::Spawn {
                command_line,
                source: io::Error::new(io::ErrorKind::NotFound, format!("{}: command not found", program)),
            };
        };

        debug!(command = %command_line, path = %path.display(), "exec");
        let source = Command::new(&path)
            .arg0(program)
            .args(rest)
            .env_clear()
            .envs(self.ctx.env.vars())
            .exec();
        Error::Spawn { command_line, source }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
