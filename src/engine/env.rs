use std::collections::BTreeMap;
use std::ffi::OsString;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A mutable snapshot of environment variables handed to spawned stages.
///
/// Keys are upper-cased on every access, so `env.get("path")` and
/// `env.get("PATH")` are the same entry. Cloning an `Environ` yields a second
/// handle on the same map; [`Environ::copy`] makes an independent one.
#[derive(Debug, Clone, Default)]
pub struct Environ {
    vars: Arc<RwLock<BTreeMap<String, String>>>,
}

impl Environ {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current process environment.
    pub fn from_process() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Environ { vars: Arc::new(RwLock::new(vars)) }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.vars.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, String>> {
        self.vars.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.read().get(&key.to_uppercase()).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(&key.to_uppercase())
    }

    pub fn set(&self, key: &str, value: impl Into<String>) {
        self.write().insert(key.to_uppercase(), value.into());
    }

    /// Store a list joined with the platform path separator (`PATH` style).
    pub fn set_list<I, S>(&self, key: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let values: Vec<OsString> = values.into_iter().map(Into::into).collect();
        let joined = std::env::join_paths(&values)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|_| {
                values
                    .iter()
                    .map(|v| v.to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join(":")
            });
        self.set(key, joined);
    }

    /// Split a path-list entry back into its parts.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                std::env::split_paths(&v)
                    .map(|p| p.to_string_lossy().into_owned())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.write().remove(&key.to_uppercase())
    }

    pub fn vars(&self) -> Vec<(String, String)> {
        self.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// An independent snapshot with `overrides` applied. `None` removes a key.
    pub fn copy<I, K>(&self, overrides: I) -> Environ
    where
        I: IntoIterator<Item = (K, Option<String>)>,
        K: AsRef<str>,
    {
        let copy = Environ { vars: Arc::new(RwLock::new(self.read().clone())) };
        for (key, value) in overrides {
            match value {
                Some(v) => copy.set(key.as_ref(), v),
                None => {
                    copy.remove(key.as_ref());
                }
            }
        }
        copy
    }

    /// Apply `overrides` in place until the returned guard is dropped.
    ///
    /// On drop every touched key gets its previous value back, and keys that
    /// did not exist before are removed. `None` removes a key for the scope.
    pub fn scoped<I, K>(&self, overrides: I) -> EnvGuard
    where
        I: IntoIterator<Item = (K, Option<String>)>,
        K: AsRef<str>,
    {
        let mut saved: Vec<(String, Option<String>)> = Vec::new();
        let mut vars = self.write();
        for (key, value) in overrides {
            let key = key.as_ref().to_uppercase();
            // Only the first occurrence of a key holds the pre-scope value.
            if !saved.iter().any(|(k, _)| *k == key) {
                saved.push((key.clone(), vars.get(&key).cloned()));
            }
            match value {
                Some(v) => {
                    vars.insert(key, v);
                }
                None => {
                    vars.remove(&key);
                }
            }
        }
        drop(vars);
        EnvGuard { env: self.clone(), saved }
    }
}

/// Restores an [`Environ`] to its state before [`Environ::scoped`].
#[must_use = "the overrides are reverted as soon as the guard is dropped"]
#[derive(Debug)]
pub struct EnvGuard {
    env: Environ,
    saved: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        let mut vars = self.env.write();
        for (key, previous) in self.saved.drain(..).rev() {
            match previous {
                Some(v) => {
                    vars.insert(key, v);
                }
                None => {
                    vars.remove(&key);
                }
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environ {
        Environ::from_vars([("PATH", "/usr/bin:/bin"), ("HOME", "/home/me")])
    }

    #[test]
    fn test_keys_are_uppercased() {
        let env = env();
        env.set("tmp", "x");
        assert_eq!(env.get("TMP").as_deref(), Some("x"));
        assert_eq!(env.get("tmp").as_deref(), Some("x"));
        assert_eq!(env.get("path").as_deref(), Some("/usr/bin:/bin"));
    }

    #[test]
    fn test_list_values_joined() {
        let env = env();
        env.set_list("path", ["/opt/bin", "/usr/bin"]);
        assert_eq!(env.get("PATH").as_deref(), Some("/opt/bin:/usr/bin"));
        assert_eq!(env.get_list("PATH"), vec!["/opt/bin", "/usr/bin"]);
        env.set_list("path", Vec::<String>::new());
        assert_eq!(env.get("PATH").as_deref(), Some(""));
        assert!(env.get_list("PATH").is_empty());
    }

    #[test]
    fn test_copy_is_independent() {
        let env = env();
        let copy = env.copy([("tmp", Some("tmp".to_string()))]);
        assert_eq!(copy.get("tmp").as_deref(), Some("tmp"));
        assert_eq!(env.get("tmp"), None);
        copy.remove("tmp");
        assert_eq!(copy.get("tmp"), None);
    }

    #[test]
    fn test_clone_shares_state() {
        let env = env();
        let handle = env.clone();
        handle.set("shared", "yes");
        assert_eq!(env.get("SHARED").as_deref(), Some("yes"));
    }

    #[test]
    fn test_scope_removes_new_key() {
        let env = env();
        {
            let _guard = env.scoped([("tmp", Some("tmp".to_string()))]);
            assert_eq!(env.get("tmp").as_deref(), Some("tmp"));
        }
        assert!(!env.contains("tmp"));
    }

    #[test]
    fn test_nested_scopes_restore_outer_value() {
        let env = env();
        let outer = env.scoped([("tmp", Some("outer".to_string()))]);
        {
            let _inner = env.scoped([("tmp", Some("inner".to_string()))]);
            assert_eq!(env.get("tmp").as_deref(), Some("inner"));
        }
        assert_eq!(env.get("tmp").as_deref(), Some("outer"));
        {
            let _inner = env.scoped([("tmp", None::<String>)]);
            assert_eq!(env.get("tmp"), None);
        }
        assert_eq!(env.get("tmp").as_deref(), Some("outer"));
        drop(outer);
        assert!(!env.contains("tmp"));
    }

    #[test]
    fn test_scope_restores_removed_key() {
        let env = env();
        let before = env.vars();
        {
            let _guard = env.scoped([
                ("home", None),
                ("path", Some("/nowhere".to_string())),
                ("path", Some("/twice".to_string())),
            ]);
            assert_eq!(env.get("HOME"), None);
            assert_eq!(env.get("PATH").as_deref(), Some("/twice"));
        }
        assert_eq!(env.vars(), before);
    }
}
