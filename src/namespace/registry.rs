use crate::engine::ExecMode;

/// Commands that act on the filesystem and print nothing worth piping.
/// Calling one runs it on the spot. Kept sorted.
pub const NOT_PIPED: &[&str] = &[
    "chmod", "cp", "mkdir", "mv", "rm", "rmdir", "rsync", "scp", "touch",
];

pub fn is_not_piped(name: &str) -> bool {
    NOT_PIPED.binary_search(&name).is_ok()
}

/// Execution policy for a binary looked up by name.
pub fn default_mode(name: &str) -> ExecMode {
    if is_not_piped(name) {
        ExecMode::RunImmediately
    } else {
        ExecMode::Deferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destructive_commands_run_now() {
        for name in ["rm", "mkdir", "mv", "cp", "touch", "scp", "rsync", "chmod", "rmdir"] {
            assert_eq!(default_mode(name), ExecMode::RunImmediately, "{name}");
        }
        assert_eq!(default_mode("grep"), ExecMode::Deferred);
        assert_eq!(default_mode("RM"), ExecMode::Deferred);
    }

    #[test]
    fn test_registry_is_sorted() {
        let mut sorted = NOT_PIPED.to_vec();
        sorted.sort_unstable();
        assert_eq!(NOT_PIPED, sorted.as_slice());
    }
}
