use std::fs::File;
use std::io::{self, BufRead, BufReader, PipeWriter, Read, Seek, SeekFrom, Write};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::error::{Error, Result};
use crate::signals;

use super::alias::Aliases;
use super::output::{Lines, Stdout};
use super::path::find_executable;
use super::redirect::Redirect;
use super::stage::{CommandStage, LineStream, Stage, StdinSource};
use super::state::{Context, Encoding};

// ── Stage outputs ─────────────────────────────────────────────────────────

/// What the most recent stage produced; becomes the next stage's input.
pub(crate) enum Source {
    /// The host's own standard input (nothing ran before).
    Inherit,
    /// Output went somewhere else (a redirect).
    Null,
    Child(ChildStdout),
    Pipe(io::PipeReader),
    File(File),
    Lines(LineStream),
}

impl Source {
    /// Hand this output to a child process as its stdin.
    fn into_stdio(self, pumps: &mut Vec<JoinHandle<()>>) -> io::Result<Stdio> {
        Ok(match self {
            Source::Inherit => Stdio::inherit(),
            Source::Null => Stdio::null(),
            Source::Child(out) => Stdio::from(out),
            Source::Pipe(reader) => Stdio::from(reader),
            Source::File(file) => Stdio::from(file),
            Source::Lines(lines) => {
                // A transform has no descriptor; feed it through a pipe.
                let (reader, writer) = io::pipe()?;
                pumps.push(pump_lines(lines, writer));
                Stdio::from(reader)
            }
        })
    }

    pub(crate) fn into_reader(self) -> Box<dyn Read + Send> {
        match self {
            Source::Inherit => Box::new(io::stdin()),
            Source::Null => Box::new(io::empty()),
            Source::Child(out) => Box::new(out),
            Source::Pipe(reader) => Box::new(reader),
            Source::File(file) => Box::new(file),
            Source::Lines(lines) => Box::new(LinesReader { lines, buf: Vec::new(), pos: 0 }),
        }
    }

    pub(crate) fn into_lines(self) -> LineStream {
        match self {
            Source::Lines(lines) => lines,
            other => Box::new(ReadLines { reader: BufReader::new(other.into_reader()) }),
        }
    }

    pub(crate) fn read_all(self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.into_reader().read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Byte lines of a reader, newline kept.
struct ReadLines<R> {
    reader: BufReader<R>,
}

impl<R: Read> Iterator for ReadLines<R> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            match self.reader.read_until(b'\n', &mut line) {
                Ok(0) => return None,
                Ok(_) => return Some(line),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return None,
            }
        }
    }
}

/// A line iterator seen as a byte reader.
struct LinesReader {
    lines: LineStream,
    buf: Vec<u8>,
    pos: usize,
}

impl Read for LinesReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.buf.len() {
            match self.lines.next() {
                Some(line) => {
                    self.buf = line;
                    self.pos = 0;
                }
                None => return Ok(0),
            }
        }
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn pump_lines(lines: LineStream, mut writer: PipeWriter) -> JoinHandle<()> {
    thread::spawn(move || {
        for line in lines {
            if writer.write_all(&line).is_err() {
                break;
            }
        }
    })
}

fn spill(bytes: Arc<[u8]>, pumps: &mut Vec<JoinHandle<()>>) -> io::Result<Source> {
    let (reader, mut writer) = io::pipe()?;
    pumps.push(thread::spawn(move || {
        // The reader may stop early (`head`); a broken pipe is fine.
        let _ = writer.write_all(&bytes);
    }));
    Ok(Source::Pipe(reader))
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Produce the injected data for one run.
fn open_stdin(source: &StdinSource, pumps: &mut Vec<JoinHandle<()>>) -> io::Result<Source> {
    match source {
        StdinSource::Bytes(bytes) => spill(bytes.clone(), pumps),
        StdinSource::Readable(reader) => {
            let mut buf = Vec::new();
            lock(reader).read_to_end(&mut buf)?;
            spill(buf.into(), pumps)
        }
        StdinSource::Seekable(file) => {
            let mut file = lock(file);
            file.seek(SeekFrom::Start(0))?;
            Ok(Source::File(file.try_clone()?))
        }
    }
}

// ── Running pipeline ──────────────────────────────────────────────────────

/// The processes one stage spawned during one run.
#[derive(Debug)]
pub struct StageRun {
    index: usize,
    processes: Vec<Child>,
    stderr: Vec<JoinHandle<Vec<u8>>>,
}

impl StageRun {
    /// Position of the stage in its pipeline.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pids(&self) -> Vec<u32> {
        self.processes.iter().map(Child::id).collect()
    }
}

/// A started pipeline whose final output has not been consumed yet.
pub struct Running {
    command_line: String,
    encoding: Encoding,
    output: Source,
    stages: Vec<StageRun>,
    pumps: Vec<JoinHandle<()>>,
}

impl Running {
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn stages(&self) -> &[StageRun] {
        &self.stages
    }

    pub fn pids(&self) -> Vec<u32> {
        self.stages.iter().flat_map(StageRun::pids).collect()
    }

    pub(crate) fn take_output(&mut self) -> Source {
        std::mem::replace(&mut self.output, Source::Null)
    }

    /// Read the final output to the end, wait for every process, and
    /// classify the run.
    pub fn finish(mut self) -> Result<Stdout> {
        let bytes = match self.take_output().read_all() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.conclude(String::new());
                return Err(e.into());
            }
        };
        let text = self.encoding.decode(&bytes).trim_end().to_string();
        Ok(self.conclude(text))
    }

    /// Decoded lines of the final output, checked for failure at the end.
    pub fn lines(mut self) -> Lines {
        let lines = self.take_output().into_lines();
        let encoding = self.encoding;
        Lines::new(lines, self, encoding)
    }

    /// Wait for everything and build the result around `text`.
    pub(crate) fn conclude(mut self, text: String) -> Stdout {
        // Unread output would keep a writer blocked forever.
        drop(self.take_output());

        let mut codes = Vec::new();
        let mut errors = Vec::new();
        for run in &mut self.stages {
            for child in &mut run.processes {
                codes.push(exit_code(child.wait()));
            }
            for handle in run.stderr.drain(..) {
                if let Ok(buf) = handle.join() {
                    errors.push(buf);
                }
            }
        }
        for pump in self.pumps.drain(..) {
            let _ = pump.join();
        }

        let stderr = join_stderr(&errors, self.encoding);
        let returncodes = codes.into_iter().filter(|&c| c != 0).collect();
        Stdout::new(text, stderr, returncodes, std::mem::take(&mut self.command_line))
    }
}

impl Drop for Running {
    /// Close the output and reap every child. Ones still running are left
    /// to a background thread so dropping never blocks.
    fn drop(&mut self) {
        drop(self.take_output());
        let mut left = Vec::new();
        for run in &mut self.stages {
            for mut child in run.processes.drain(..) {
                if !matches!(child.try_wait(), Ok(Some(_))) {
                    left.push(child);
                }
            }
        }
        if !left.is_empty() {
            thread::spawn(move || {
                for mut child in left {
                    let _ = child.wait();
                }
            });
        }
    }
}

/// Exit code the way a shell reports it: `128 + signo` for signal deaths.
fn exit_code(status: io::Result<ExitStatus>) -> i32 {
    match status {
        Ok(s) => s
            .code()
            .or_else(|| s.signal().map(|sig| 128 + sig))
            .unwrap_or(1),
        Err(_) => 1,
    }
}

fn join_stderr(chunks: &[Vec<u8>], encoding: Encoding) -> String {
    let joined = chunks
        .iter()
        .filter(|c| !c.is_empty())
        .map(Vec::as_slice)
        .collect::<Vec<_>>()
        .join(&b'\n');
    encoding.decode(&joined).trim().to_string()
}

fn collect_stderr(mut stderr: ChildStderr) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf);
        buf
    })
}

// ── Spawning ──────────────────────────────────────────────────────────────

/// `stdin | cat - | upper()`.
pub(crate) fn commands_line(stages: &[Stage], aliases: &Aliases) -> String {
    stages
        .iter()
        .map(|s| s.describe(aliases))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// The codec of the tail process stage, else the context's.
pub(crate) fn chain_encoding(ctx: &Context, stages: &[Stage]) -> Encoding {
    stages
        .iter()
        .rev()
        .filter_map(Stage::as_command)
        .find_map(|c| c.options.encoding)
        .unwrap_or(ctx.encoding)
}

/// Make sure `sudo` exists and actually grants root, before anything runs.
pub fn check_sudo(ctx: &Context) -> Result<()> {
    let sudo = ctx.aliases.resolve("sudo");
    let search = ctx.search_path();
    let Some(path) = find_executable(&sudo, search.as_deref()) else {
        return Err(Error::Privilege("sudo is not installed".to_string()));
    };

    debug!(sudo = %path.display(), "checking sudo");
    let output = Command::new(&path)
        .args(["-s", "whoami"])
        .env_clear()
        .envs(ctx.env.vars())
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::Privilege(format!("not able to run sudo: {}", e)))?;

    let mut text = output.stdout;
    text.extend(output.stderr);
    let whoami = String::from_utf8_lossy(&text).trim().to_string();
    if whoami != "root" {
        return Err(Error::Privilege(format!("not able to run sudo (whoami: {})", whoami)));
    }
    Ok(())
}

/// Launch every stage head to tail, wiring each one's input to the
/// previous stage's output. `target` redirects the tail process stage.
///
/// Stages started before a spawn failure keep running and are reaped in
/// the background.
pub(crate) fn spawn(ctx: &Context, stages: &[Stage], target: Option<&Redirect>) -> Result<Running> {
    if stages.iter().filter_map(Stage::as_command).any(CommandStage::is_sudo) {
        check_sudo(ctx)?;
    }

    let last = stages.len().saturating_sub(1);
    // Built up front so an early return still reaps what was started.
    let mut running = Running {
        command_line: commands_line(stages, &ctx.aliases),
        encoding: chain_encoding(ctx, stages),
        output: Source::Inherit,
        stages: Vec::new(),
        pumps: Vec::new(),
    };

    for (index, stage) in stages.iter().enumerate() {
        match stage {
            Stage::Stdin(stdin) => {
                running.output = open_stdin(&stdin.source, &mut running.pumps)?;
            }
            Stage::Transform(transform) => {
                let input = running.take_output().into_lines();
                running.output = Source::Lines((transform.func)(input));
            }
            Stage::Command(command) => {
                let stdin = running.take_output().into_stdio(&mut running.pumps)?;
                let target = if index == last { target } else { None };
                let (child, output, stderr) = spawn_stage(ctx, command, index, stdin, target)?;
                running.output = output;
                running.stages.push(StageRun {
                    index,
                    processes: vec![child],
                    stderr: stderr.into_iter().collect(),
                });
            }
        }
    }

    Ok(running)
}

fn spawn_stage(
    ctx: &Context,
    stage: &CommandStage,
    index: usize,
    stdin: Stdio,
    target: Option<&Redirect>,
) -> Result<(Child, Source, Option<JoinHandle<Vec<u8>>>)> {
    let opts = &stage.options;

    let (mut command, rendered) = if opts.shell {
        let line = stage.shell_line(&ctx.aliases);
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(&line);
        (command, line)
    } else {
        let argv = stage.argv(&ctx.aliases);
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::Usage(format!("stage {} has nothing to run", index)));
        };
        let mut command = Command::new(program);
        command.args(args);
        (command, argv.join(" "))
    };

    let env = opts.env.as_ref().unwrap_or(&ctx.env);
    command.env_clear().envs(env.vars());
    if let Some(dir) = &opts.cwd {
        command.current_dir(dir);
    }
    command.stdin(stdin);

    let mut output = Source::Null;
    match opts.stdout.as_ref().or(target) {
        Some(Redirect::Stdout) => {
            command.stdout(Stdio::inherit());
            if opts.combine_stderr {
                command.stderr(Redirect::Stdout.open()?);
            }
        }
        Some(redirect) => {
            let file = redirect.open()?;
            if opts.combine_stderr {
                command.stderr(file.try_clone()?);
            }
            command.stdout(file);
        }
        None if opts.combine_stderr => {
            let (reader, writer) = io::pipe()?;
            command.stderr(writer.try_clone()?);
            command.stdout(writer);
            output = Source::Pipe(reader);
        }
        None => {
            command.stdout(Stdio::piped());
        }
    }
    if !opts.combine_stderr {
        match &opts.stderr {
            Some(redirect) => {
                command.stderr(redirect.stderr_stdio()?);
            }
            None => {
                command.stderr(Stdio::piped());
            }
        }
    }

    debug!(stage = index, command = %rendered, shell = opts.shell, "spawning");
    let result = unsafe { command.pre_exec(signals::restore_default).spawn() };
    let mut child = result.map_err(|source| Error::Spawn { command_line: rendered, source })?;
    // Our copies of the pipe ends live in `command`; close them now.
    drop(command);

    if let Some(out) = child.stdout.take() {
        output = Source::Child(out);
    }
    let stderr = child.stderr.take().map(collect_stderr);
    Ok((child, output, stderr))
}

// ── Tests ──────────────────────────────────────────────────────────────────
