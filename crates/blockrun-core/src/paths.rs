//! Temp file layout and path translation.
//!
//! Every one-shot invocation writes its block to a temp file:
//!
//! ```text
//! <OS temp dir>/
//! ├── temp_<token>.<ext>   # block source
//! └── temp_<token>.out     # compiled binary (two-stage compile only)
//! ```

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Extension of binaries produced by the two-stage compile route.
pub const BINARY_EXTENSION: &str = "out";

/// Token naming the temp files of one top-level invocation.
///
/// Created fresh for every `run` and threaded through all of that run's
/// stages, so a later run can never pick up a finished run's files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvocationToken(String);

impl InvocationToken {
    /// Create a token from the current time plus a random suffix.
    ///
    /// The token only contains ASCII digits, hex letters and `_`, so it is
    /// also usable inside a C identifier.
    pub fn new() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let random = Uuid::new_v4().simple().to_string();
        Self(format!("{}_{}", millis, &random[..8]))
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File stem shared by every temp file of this invocation.
    pub fn stem(&self) -> String {
        format!("temp_{}", self.0)
    }

    /// Temp file path for the given extension.
    pub fn temp_file(&self, extension: &str) -> PathBuf {
        self.temp_file_in(&std::env::temp_dir(), extension)
    }

    /// Temp file path for the given extension under `dir`.
    pub fn temp_file_in(&self, dir: &Path, extension: &str) -> PathBuf {
        let name = if extension.is_empty() {
            self.stem()
        } else {
            format!("{}.{}", self.stem(), extension)
        };
        dir.join(name)
    }
}

impl Default for InvocationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Sibling path for the binary compiled from `source`.
pub fn binary_path_for(source: &Path) -> PathBuf {
    source.with_extension(BINARY_EXTENSION)
}

/// Translate a Windows path into its WSL mount path.
///
/// `C:\Users\me\file.py` becomes `/mnt/c/Users/me/file.py`. Paths without a
/// drive letter only have their separators flipped.
pub fn windows_path_to_wsl(path: &str) -> String {
    let mut chars = path.chars();
    match (chars.next(), chars.next()) {
        (Some(drive), Some(':')) if drive.is_ascii_alphabetic() => {
            let rest = chars.as_str().replace('\\', "/");
            let rest = rest.trim_start_matches('/');
            format!("/mnt/{}/{}", drive.to_ascii_lowercase(), rest)
        }
        _ => path.replace('\\', "/"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_differ() {
        let a = InvocationToken::new();
        let b = InvocationToken::new();
        assert_ne!(a, b);
        assert!(
            a.as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        );
    }

    #[test]
    fn test_temp_file_layout() {
        let token = InvocationToken::new();
        let path = token.temp_file_in(Path::new("/tmp"), "py");
        assert_eq!(
            path,
            PathBuf::from(format!("/tmp/temp_{}.py", token.as_str()))
        );
        assert_eq!(token.temp_file("py"), token.temp_file("py"));
    }

    #[test]
    fn test_binary_path() {
        let source = PathBuf::from("/tmp/temp_1_abc.c");
        assert_eq!(binary_path_for(&source), PathBuf::from("/tmp/temp_1_abc.out"));
    }

    #[test]
    fn test_windows_path_to_wsl() {
        assert_eq!(
            windows_path_to_wsl(r"C:\Users\me\AppData\Local\Temp\temp_1.py"),
            "/mnt/c/Users/me/AppData/Local/Temp/temp_1.py"
        );
        assert_eq!(windows_path_to_wsl("/tmp/temp_1.py"), "/tmp/temp_1.py");
        assert_eq!(windows_path_to_wsl(r"relative\file.sh"), "relative/file.sh");
    }
}
