//! Command namespaces: where prototypes come from.
//!
//! A namespace hands out one [`Prototype`] per binary name and keeps it for
//! its own lifetime. The root decides how every command it makes is spawned:
//! directly, under `sudo -s`, on a remote host through `ssh`, or as a flag of
//! a single binary (`test -e`).

mod registry;
mod workdir;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::engine::{
    Context, ExecMode, LineStream, Options, Pipeline, Prototype, StdinSource,
};
use crate::error::{Error, Result};

pub use registry::{default_mode, is_not_piped, NOT_PIPED};
pub use workdir::DirGuard;

/// How a namespace runs its commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Root {
    Local,
    /// Every command wrapped in `sudo -s`, after a privilege check.
    Sudo,
    /// Every command shipped to `host` as one `ssh` argument.
    Remote { host: String },
    /// Commands are flags of `command`: `test.command("e")` is `test -e`.
    Flags { command: String },
}

pub struct Namespace {
    name: String,
    root: Root,
    ctx: Context,
    commands: Mutex<HashMap<String, Prototype>>,
}

impl Namespace {
    fn with_root(name: impl Into<String>, root: Root, ctx: Context) -> Self {
        Namespace { name: name.into(), root, ctx, commands: Mutex::new(HashMap::new()) }
    }

    /// Plain local commands on the process-wide context.
    pub fn sh() -> Self {
        Self::sh_in(Context::global())
    }

    pub fn sh_in(ctx: Context) -> Self {
        Self::with_root("sh", Root::Local, ctx)
    }

    /// Local commands run as root.
    pub fn sudo() -> Self {
        Self::sudo_in(Context::global())
    }

    pub fn sudo_in(ctx: Context) -> Self {
        Self::with_root("sudo", Root::Sudo, ctx)
    }

    /// Flags of the `test` binary.
    pub fn test() -> Self {
        Self::test_in(Context::global())
    }

    pub fn test_in(ctx: Context) -> Self {
        Self::with_root("test", Root::Flags { command: "test".to_string() }, ctx)
    }

    /// Commands run on `host`, sharing this namespace's context.
    pub fn ssh(&self, host: impl Into<String>) -> Namespace {
        let host = host.into();
        Namespace::with_root(format!("ssh {}", host), Root::Remote { host }, self.ctx.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, Prototype>> {
        self.commands.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The prototype for `name`, created on first use.
    pub fn command(&self, name: &str) -> Prototype {
        let mut cache = self.cache();
        if let Some(prototype) = cache.get(name) {
            return prototype.clone();
        }
        let prototype = self.make(name);
        cache.insert(name.to_string(), prototype.clone());
        prototype
    }

    fn make(&self, name: &str) -> Prototype {
        let mode = default_mode(name);
        let words = |w: &[&str]| w.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let (binary, prefix) = match &self.root {
            Root::Local => (self.ctx.aliases.resolve(name), Vec::new()),
            Root::Sudo => (self.ctx.aliases.resolve(name), words(&["sudo", "-s"])),
            Root::Remote { host } => (name.to_string(), words(&["ssh", host.as_str()])),
            Root::Flags { command } => (String::new(), vec![command.clone(), format!("-{}", name)]),
        };
        Prototype::new(self.ctx.clone(), name, binary, prefix, mode)
    }

    /// `sh[binary](args)`: build a command whose name is only known at runtime.
    pub fn pipe<I, S>(&self, binary: &str, args: I, options: Options) -> Pipeline
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command(binary).call_with(args, options)
    }

    /// A pipeline head that feeds `source` to the next stage.
    pub fn stdin(&self, source: impl Into<StdinSource>) -> Pipeline {
        Pipeline::stdin(self.ctx.clone(), source)
    }

    /// Splice `func` into pipelines as if it were a command called `name`.
    pub fn wraps<F>(&self, name: impl Into<String>, func: F) -> Pipeline
    where
        F: Fn(LineStream) -> LineStream + Send + Sync + 'static,
    {
        Pipeline::transform(self.ctx.clone(), name, func)
    }

    fn require_local(&self, what: &str) -> Result<()> {
        match self.root {
            Root::Local | Root::Sudo => Ok(()),
            _ => Err(Error::Unsupported(format!("{} is not available on {}", what, self))),
        }
    }

    /// Change the working directory for good.
    pub fn cd(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        self.require_local("cd")?;
        Ok(workdir::cd(&self.ctx.env, dir.as_ref())?)
    }

    /// Change the working directory until the guard is dropped.
    pub fn pushd(&self, dir: impl AsRef<Path>) -> Result<DirGuard> {
        self.require_local("pushd")?;
        Ok(workdir::pushd(&self.ctx.env, dir.as_ref())?)
    }

    pub fn pwd(&self) -> Result<PathBuf> {
        self.require_local("pwd")?;
        Ok(workdir::pwd()?)
    }

    /// `host:path`, the way `scp` and `rsync` name remote files.
    pub fn join(&self, path: &str) -> Result<String> {
        match &self.root {
            Root::Remote { host } => Ok(format!("{}:{}", host, path)),
            _ => Err(Error::Unsupported(format!("join is not available on {}", self))),
        }
    }

    /// Ship a locally built pipeline to the remote host as one command line.
    pub fn run(&self, pipeline: &Pipeline) -> Result<Pipeline> {
        let Root::Remote { host } = &self.root else {
            return Err(Error::Unsupported(format!("run is not available on {}", self)));
        };
        let ssh = Prototype::new(
            self.ctx.clone(),
            "ssh",
            String::new(),
            vec!["ssh".to_string(), host.clone()],
            ExecMode::Deferred,
        );
        Ok(ssh.call([pipeline.commands_line()]))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.name)
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("cached", &self.cache().len())
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Aliases, Environ, Redirect};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn sh() -> Namespace {
        Namespace::sh_in(Context::from_env())
    }

    /// A context whose `sudo` is a script that claims to be root and then
    /// just runs its arguments.
    fn fake_sudo(dir: &Path, whoami: &str) -> Context {
        let script = dir.join("sudo");
        let body = format!(
            "#!/bin/sh\n[ \"$1\" = \"-s\" ] && shift\nif [ \"$1\" = \"whoami\" ]; then echo {}; exit 0; fi\nexec \"$@\"\n",
            whoami
        );
        fs::write(&script, body).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let ctx = Context::from_env();
        ctx.aliases.set("sudo", script.to_string_lossy());
        ctx
    }

    #[test]
    fn test_prototypes_are_memoized() {
        let sh = sh();
        let a = sh.command("grep");
        sh.context().aliases.set("grep", "/bin/grep-elsewhere");
        let b = sh.command("grep");
        assert_eq!(a.binary(), "grep");
        assert_eq!(b.binary(), "grep");
        assert_eq!(Namespace::sh_in(sh.context().clone()).command("grep").binary(), "/bin/grep-elsewhere");
    }

    #[test]
    fn test_policy_modes() {
        let sh = sh();
        assert_eq!(sh.command("rm").mode(), ExecMode::RunImmediately);
        assert_eq!(sh.command("cat").mode(), ExecMode::Deferred);
    }

    #[test]
    fn test_alias_applies_to_binary() {
        let sh = sh();
        assert_eq!(sh.command("ifconfig").binary(), "/sbin/ifconfig");
    }

    #[test]
    fn test_pipe_by_dynamic_name() {
        let sh = sh();
        let p = sh.pipe("echo", ["dynamic"], Options::new());
        assert_eq!(p.run().unwrap(), "dynamic");
    }

    #[test]
    fn test_stdin_and_wraps() {
        let sh = sh();
        let upper = sh.wraps("upper", |lines: LineStream| {
            Box::new(lines.map(|l| l.to_ascii_uppercase())) as LineStream
        });
        let p = sh.stdin("abc\n") | sh.command("cat").call(["-"]) | upper;
        assert_eq!(p.commands_line(), "stdin | cat - | upper()");
        assert_eq!(p.run().unwrap(), "ABC");
    }

    #[test]
    fn test_rm_runs_on_call() {
        let dir = tempfile::tempdir().unwrap();
        let victim = dir.path().join("victim");
        fs::write(&victim, "x").unwrap();

        let sh = sh();
        let done = sh.command("rm").call([victim.to_string_lossy()]);
        assert!(!victim.exists());
        assert!(done.run().unwrap().succeeded());
    }

    #[test]
    fn test_run_now_failure_does_not_raise() {
        let dir = tempfile::tempdir().unwrap();
        let sh = sh();
        let out = sh
            .command("rm")
            .call([dir.path().join("missing").to_string_lossy()])
            .run()
            .unwrap();
        assert!(out.failed());
        assert!(out.stderr().contains("missing"));
    }

    #[test]
    fn test_flag_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let test = Namespace::test_in(Context::from_env());
        let dir_str = dir.path().to_string_lossy().to_string();

        let is_dir = test.command("d").call([dir_str.clone()]);
        assert_eq!(is_dir.commands_line(), format!("test -d {}", dir_str));
        assert!(is_dir.succeeded().unwrap());
        assert!(!test.command("f").call([dir_str]).succeeded().unwrap());
    }

    #[test]
    fn test_sudo_prefix_with_fake_sudo() {
        let dir = tempfile::tempdir().unwrap();
        let sudo = Namespace::sudo_in(fake_sudo(dir.path(), "root"));
        let p = sudo.command("echo").call(["elevated"]);
        assert!(p.commands_line().ends_with("sudo -s echo elevated"));
        assert_eq!(p.run().unwrap(), "elevated");
    }

    #[test]
    fn test_sudo_check_fails_before_any_stage() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let sudo = Namespace::sudo_in(fake_sudo(dir.path(), "nobody"));
        let sh = Namespace::sh_in(sudo.context().clone());

        let p = sh.command("touch").call_with([marker.to_string_lossy()], Options::new().run_now(false))
            | sudo.command("cat").pipeline();
        let err = p.run().unwrap_err();
        assert!(matches!(err, Error::Privilege(_)));
        assert!(!marker.exists());
    }

    #[test]
    fn test_remote_rendering() {
        let sh = sh();
        let remote = sh.ssh("example.com");
        assert_eq!(remote.to_string(), "<ssh example.com>");
        assert_eq!(sh.to_string(), "<sh>");

        let ls = remote.command("ls").call(["-l", "/tmp"]);
        assert_eq!(ls.commands_line(), "ssh example.com 'ls -l /tmp'");
        assert_eq!(remote.join("/etc/hosts").unwrap(), "example.com:/etc/hosts");

        let local = sh.command("cat").call(["/etc/hosts"]) | sh.command("grep").call(["local"]);
        let shipped = remote.run(&local).unwrap();
        assert_eq!(shipped.commands_line(), "ssh example.com 'cat /etc/hosts | grep local'");
    }

    #[test]
    fn test_remote_rejects_directory_control() {
        let remote = sh().ssh("example.com");
        assert!(matches!(remote.cd("/tmp"), Err(Error::Unsupported(_))));
        assert!(matches!(remote.pwd(), Err(Error::Unsupported(_))));
        assert!(matches!(remote.pushd("/tmp"), Err(Error::Unsupported(_))));
        assert!(matches!(sh().join("x"), Err(Error::Unsupported(_))));
        assert!(matches!(sh().run(&sh().command("ls").pipeline()), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_pushd_restores_directory_and_pwd() {
        let dir = tempfile::tempdir().unwrap();
        let target = fs::canonicalize(dir.path()).unwrap();
        let env = Environ::from_vars([("PATH", "/usr/bin:/bin"), ("PWD", "/before")]);
        let sh = Namespace::sh_in(Context::new(env, Aliases::default()));
        let before = sh.pwd().unwrap();
        {
            let guard = sh.pushd(&target).unwrap();
            assert_eq!(guard.previous(), before.as_path());
            assert_eq!(sh.pwd().unwrap(), target);
            assert_eq!(sh.context().env.get("PWD"), Some(target.to_string_lossy().to_string()));
        }
        assert_eq!(sh.pwd().unwrap(), before);
        assert_eq!(sh.context().env.get("PWD").as_deref(), Some("/before"));
    }

    #[test]
    fn test_stage_redirect_option() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("side");
        let sh = sh();
        let p = sh.command("echo").call_with(["aside"], Options::new().stdout(Redirect::truncate(&path)))
            | sh.command("cat").pipeline();
        assert_eq!(p.run().unwrap(), "");
        assert_eq!(fs::read_to_string(&path).unwrap(), "aside\n");
    }
}
