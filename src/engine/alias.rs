use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Binary name → executable substitution (`sudo` → `/usr/bin/sudo`).
///
/// Shared between every namespace built on the same [`Context`](super::Context);
/// cloning yields another handle on the same table.
#[derive(Debug, Clone)]
pub struct Aliases {
    table: Arc<RwLock<HashMap<String, String>>>,
}

impl Default for Aliases {
    fn default() -> Self {
        Aliases { table: Arc::new(RwLock::new(init_default_aliases())) }
    }
}

impl Aliases {
    /// An empty table, without the default substitutions.
    pub fn empty() -> Self {
        Aliases { table: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.table.read().unwrap_or_else(|e| e.into_inner()).get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, target: impl Into<String>) {
        self.table
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), target.into());
    }

    pub fn remove(&self, name: &str) -> Option<String> {
        self.table.write().unwrap_or_else(|e| e.into_inner()).remove(name)
    }

    /// `name` after substitution; unknown names resolve to themselves.
    pub fn resolve(&self, name: &str) -> String {
        self.get(name).unwrap_or_else(|| name.to_string())
    }
}

fn init_default_aliases() -> HashMap<String, String> {
    let mappings = [
        ("ifconfig", "/sbin/ifconfig"),
        ("sudo", "/usr/bin/sudo"),
        ("ssh", "ssh"),
    ];
    mappings
        .into_iter()
        .map(|(name, target)| (name.to_string(), target.to_string()))
        .collect()
}
