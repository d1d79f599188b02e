use std::sync::LazyLock;

use super::alias::Aliases;
use super::env::Environ;

/// Text codec used to decode captured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
}

impl Encoding {
    /// Pick the codec named by the usual locale variables.
    pub fn from_locale(env: &Environ) -> Self {
        let locale = ["LC_ALL", "LC_CTYPE", "LANG"]
            .iter()
            .filter_map(|key| env.get(key))
            .find(|v| !v.is_empty())
            .unwrap_or_default()
            .to_lowercase();
        if locale.contains("8859-1") || locale.contains("latin1") {
            Encoding::Latin1
        } else {
            Encoding::Utf8
        }
    }

    /// Undecodable bytes are replaced, never an error.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }

    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            Encoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }
}

/// Configuration threaded through pipeline construction and execution.
///
/// Cloning is cheap; clones share the environment and alias table.
#[derive(Debug, Clone)]
pub struct Context {
    pub env: Environ,
    pub aliases: Aliases,
    pub encoding: Encoding,
}

static GLOBAL: LazyLock<Context> = LazyLock::new(Context::from_env);

impl Context {
    /// Snapshot the process environment, filling in defaults for missing ones.
    pub fn from_env() -> Self {
        let env = init_env_vars();
        let encoding = Encoding::from_locale(&env);
        Context { env, aliases: Aliases::default(), encoding }
    }

    pub fn new(env: Environ, aliases: Aliases) -> Self {
        let encoding = Encoding::from_locale(&env);
        Context { env, aliases, encoding }
    }

    /// The process-wide default shared by [`crate::sh`] and friends.
    pub fn global() -> Context {
        GLOBAL.clone()
    }

    /// `PATH` as seen by spawned stages.
    pub fn search_path(&self) -> Option<String> {
        self.env.get("PATH")
    }
}

/// Initialize variables from the OS environment and set defaults for missing ones.
fn init_env_vars() -> Environ {
    let env = Environ::from_process();

    // 1. Ensure HOME is set
    if !env.contains("HOME") {
        if let Some(home_path) = dirs::home_dir() {
            env.set("HOME", home_path.to_string_lossy());
        }
    }

    // 2. Ensure PATH is set
    if !env.contains("PATH") {
        env.set("PATH", "/usr/local/bin:/usr/bin:/bin");
    }

    env
}
