use std::fmt;
use std::io::{self, Write};
use std::ops::{BitOr, Range, RangeFrom, RangeFull, RangeInclusive, RangeTo};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::error::{Error, Result};

use super::execution::{self, Running};
use super::output::{Lines, Stdout};
use super::redirect::Redirect;
use super::stage::{ExecMode, LineStream, Stage, StdinSource, StdinStage, TransformStage};
use super::state::{Context, Encoding};

/// A chain of stages, head first.
///
/// Stage `i` reads what stage `i - 1` wrote. Building never runs anything
/// unless the pipeline was created in [`ExecMode::RunImmediately`]; every
/// other consumption (`run`, `lines`, `write_to`) starts a fresh run.
#[derive(Clone)]
pub struct Pipeline {
    ctx: Context,
    stages: Vec<Stage>,
    mode: ExecMode,
    cached: Option<Stdout>,
}

/// Settings applied to every process stage for one run only.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    pub shell: Option<bool>,
    pub combine_stderr: Option<bool>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shell(mut self, shell: bool) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn combine_stderr(mut self, combine: bool) -> Self {
        self.combine_stderr = Some(combine);
        self
    }
}

/// Which stages [`Pipeline::select`] keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Range { start: Option<usize>, end: Option<usize> },
    /// A single position. Always rejected; kept so the mistake is reported.
    Index(usize),
}

impl From<Range<usize>> for Selection {
    fn from(r: Range<usize>) -> Self {
        Selection::Range { start: Some(r.start), end: Some(r.end) }
    }
}

impl From<RangeFrom<usize>> for Selection {
    fn from(r: RangeFrom<usize>) -> Self {
        Selection::Range { start: Some(r.start), end: None }
    }
}

impl From<RangeTo<usize>> for Selection {
    fn from(r: RangeTo<usize>) -> Self {
        Selection::Range { start: None, end: Some(r.end) }
    }
}

impl From<RangeInclusive<usize>> for Selection {
    fn from(r: RangeInclusive<usize>) -> Self {
        Selection::Range { start: Some(*r.start()), end: Some(r.end().saturating_add(1)) }
    }
}

impl From<RangeFull> for Selection {
    fn from(_: RangeFull) -> Self {
        Selection::Range { start: None, end: None }
    }
}

impl From<usize> for Selection {
    fn from(i: usize) -> Self {
        Selection::Index(i)
    }
}

impl Pipeline {
    /// A one-stage pipeline. In [`ExecMode::RunImmediately`] the stage runs
    /// right here and its result is kept.
    pub(crate) fn new(ctx: Context, stage: Stage, mode: ExecMode) -> Self {
        let mut pipeline = Pipeline { ctx, stages: vec![stage], mode, cached: None };
        if mode == ExecMode::RunImmediately {
            pipeline.cached = Some(pipeline.run_once());
        }
        pipeline
    }

    /// A pipeline that only injects `source`.
    pub fn stdin(ctx: Context, source: impl Into<StdinSource>) -> Self {
        let stage = Stage::Stdin(StdinStage { source: source.into() });
        Pipeline::new(ctx, stage, ExecMode::Deferred)
    }

    /// A pipeline made of one in-process function.
    pub fn transform<F>(ctx: Context, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(LineStream) -> LineStream + Send + Sync + 'static,
    {
        let stage = Stage::Transform(TransformStage { name: name.into(), func: Arc::new(func) });
        Pipeline::new(ctx, stage, ExecMode::Deferred)
    }

    /// Fire-and-forget: failures are reported, never raised.
    fn run_once(&self) -> Stdout {
        let result = match self.bg().and_then(Running::finish) {
            Ok(result) => result,
            Err(err) => {
                let code = if matches!(err, Error::Spawn { .. }) { 127 } else { 1 };
                Stdout::new(String::new(), err.to_string(), vec![code], self.commands_line())
            }
        };
        if result.failed() {
            warn!(command = %result.command_line(), returncodes = ?result.returncodes(), "command failed");
            if !result.stderr().is_empty() {
                eprintln!("{}", result.stderr());
            }
        }
        result
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    /// Every stage, head to tail.
    pub fn commands(&self) -> &[Stage] {
        &self.stages
    }

    /// The stage feeding stage `index`, `None` for the head.
    pub fn previous(&self, index: usize) -> Option<&Stage> {
        index.checked_sub(1).and_then(|i| self.stages.get(i))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Codec used for this pipeline's output.
    pub fn encoding(&self) -> Encoding {
        execution::chain_encoding(&self.ctx, &self.stages)
    }

    /// `stdin | cat - | upper()`.
    pub fn commands_line(&self) -> String {
        execution::commands_line(&self.stages, &self.ctx.aliases)
    }

    /// A new pipeline running `self` into `other`. Neither input changes.
    pub fn pipe(&self, other: &Pipeline) -> Pipeline {
        // Injected data carries no context of its own.
        let stdin_only = self.stages.iter().all(|s| matches!(s, Stage::Stdin(_)));
        let ctx = if stdin_only { other.ctx.clone() } else { self.ctx.clone() };

        let mut stages = Vec::with_capacity(self.stages.len() + other.stages.len());
        stages.extend(self.stages.iter().cloned());
        stages.extend(other.stages.iter().cloned());
        Pipeline { ctx, stages, mode: ExecMode::Deferred, cached: None }
    }

    /// A new pipeline made of a contiguous run of stages.
    ///
    /// Bounds clamp to the pipeline length; an empty result or a single
    /// index is a usage error.
    pub fn select(&self, selection: impl Into<Selection>) -> Result<Pipeline> {
        let (start, end) = match selection.into() {
            Selection::Range { start, end } => (start, end),
            Selection::Index(_) => {
                return Err(Error::Usage("only ranges can select stages".to_string()));
            }
        };
        let len = self.stages.len();
        let end = end.unwrap_or(len).min(len);
        let start = start.unwrap_or(0).min(end);
        if start == end {
            return Err(Error::Usage(format!("empty selection {start}..{end} of {len} stages")));
        }
        Ok(Pipeline {
            ctx: self.ctx.clone(),
            stages: self.stages[start..end].to_vec(),
            mode: ExecMode::Deferred,
            cached: None,
        })
    }

    /// Start every stage and hand back the live run.
    pub fn bg(&self) -> Result<Running> {
        execution::spawn(&self.ctx, &self.stages, None)
    }

    /// Run to completion and return the decoded output.
    ///
    /// A run-immediately pipeline returns its kept result without running
    /// again.
    pub fn run(&self) -> Result<Stdout> {
        match &self.cached {
            Some(result) => Ok(result.clone()),
            None => self.bg()?.finish(),
        }
    }

    /// [`Pipeline::run`] with `options` forced on every process stage.
    pub fn run_with(&self, options: CallOptions) -> Result<Stdout> {
        if let Some(result) = &self.cached {
            return Ok(result.clone());
        }
        let mut stages = self.stages.clone();
        for stage in &mut stages {
            if let Stage::Command(command) = stage {
                if let Some(shell) = options.shell {
                    command.options.shell = shell;
                }
                if let Some(combine) = options.combine_stderr {
                    command.options.combine_stderr = combine;
                }
            }
        }
        execution::spawn(&self.ctx, &stages, None)?.finish()
    }

    pub fn succeeded(&self) -> Result<bool> {
        Ok(self.run()?.succeeded())
    }

    pub fn failed(&self) -> Result<bool> {
        Ok(self.run()?.failed())
    }

    /// Stream output lines as they arrive.
    pub fn lines(&self) -> Result<Lines> {
        match &self.cached {
            Some(result) => Ok(Lines::replay(result)),
            None => Ok(self.bg()?.lines()),
        }
    }

    /// Run with the output sent to `target` instead of captured.
    ///
    /// A failed run is an error.
    pub fn write_to(&self, target: Redirect) -> Result<Stdout> {
        let result = if let Some(cached) = &self.cached {
            let mut file = target.open()?;
            if !cached.is_empty() {
                let mut bytes = self.encoding().encode(cached.stdout());
                bytes.push(b'\n');
                file.write_all(&bytes)?;
            }
            cached.clone()
        } else if matches!(self.stages.last(), Some(Stage::Command(_))) {
            execution::spawn(&self.ctx, &self.stages, Some(&target))?.finish()?
        } else {
            // A transform or stdin tail has no descriptor to hand over.
            let mut running = self.bg()?;
            let mut reader = running.take_output().into_reader();
            let copied = target.open().and_then(|mut file| io::copy(&mut reader, &mut file));
            drop(reader);
            let result = running.conclude(String::new());
            copied?;
            result
        };
        result.check()
    }

    /// `> path`
    pub fn save(&self, path: impl Into<PathBuf>) -> Result<Stdout> {
        self.write_to(Redirect::truncate(path))
    }

    /// `>> path`
    pub fn append(&self, path: impl Into<PathBuf>) -> Result<Stdout> {
        self.write_to(Redirect::append(path))
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.commands_line())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("commands", &self.commands_line())
            .field("mode", &self.mode)
            .field("ran", &self.cached.is_some())
            .finish()
    }
}

impl BitOr<&Pipeline> for &Pipeline {
    type Output = Pipeline;

    fn bitor(self, rhs: &Pipeline) -> Pipeline {
        self.pipe(rhs)
    }
}

impl BitOr<Pipeline> for &Pipeline {
    type Output = Pipeline;

    fn bitor(self, rhs: Pipeline) -> Pipeline {
        self.pipe(&rhs)
    }
}

impl BitOr<&Pipeline> for Pipeline {
    type Output = Pipeline;

    fn bitor(self, rhs: &Pipeline) -> Pipeline {
        self.pipe(rhs)
    }
}

impl BitOr for Pipeline {
    type Output = Pipeline;

    fn bitor(self, rhs: Pipeline) -> Pipeline {
        self.pipe(&rhs)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
