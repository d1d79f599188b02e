use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

/// Normalize a path logically (resolving . and ..) without hitting the disk.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                match normalized.components().next_back() {
                    Some(Component::Normal(_)) => {
                        normalized.pop();
                    }
                    Some(Component::RootDir) | Some(Component::Prefix(_)) => {
                        // At root, .. does nothing
                    }
                    _ => {
                        normalized.push(Component::ParentDir);
                    }
                }
            }
            _ => normalized.push(component),
        }
    }

    if normalized.as_os_str().is_empty() {
        normalized.push(Component::CurDir);
    }

    normalized
}

/// Expand `~` to the home directory and normalize the resulting path.
pub fn expand_home(path_str: &str) -> PathBuf {
    if path_str == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return normalize_path(&home.join(rest));
        }
    }
    normalize_path(Path::new(path_str))
}

/// Locate `cmd` the way `execvp` would, using `search_path` instead of the
/// process `PATH` so a pipeline's own environment decides.
pub fn find_executable(cmd: &str, search_path: Option<&str>) -> Option<PathBuf> {
    if cmd.is_empty() {
        return None;
    }

    // 1. If it has a separator, check it directly
    if cmd.contains('/') || cmd.starts_with('~') {
        return check_path(expand_home(cmd));
    }

    // 2. Search the given PATH
    let paths = search_path?;
    std::env::split_paths(paths)
        .filter(|dir| !dir.as_os_str().is_empty())
        .find_map(|dir| check_path(dir.join(cmd)))
}

fn check_path(p: PathBuf) -> Option<PathBuf> {
    let meta = p.metadata().ok()?;
    if meta.is_file() && meta.permissions().mode() & 0o111 != 0 {
        Some(p)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_normalize_parent_dirs() {
        assert_eq!(normalize_path(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize_path(Path::new("/..")), PathBuf::from("/"));
        assert_eq!(normalize_path(Path::new("")), PathBuf::from("."));
    }

    #[test]
    fn test_find_on_search_path() {
        let found = find_executable("sh", Some("/nonexistent:/bin:/usr/bin")).unwrap();
        assert!(found.ends_with("sh"));
    }

    #[test]
    fn test_empty_search_path_finds_nothing() {
        assert_eq!(find_executable("sh", Some("")), None);
        assert_eq!(find_executable("sh", None), None);
    }

    #[test]
    fn test_explicit_path_needs_exec_bit() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("tool");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        let as_str = script.to_str().unwrap();
        assert_eq!(find_executable(as_str, None), None);

        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(find_executable(as_str, None), Some(script.clone()));
    }
}
