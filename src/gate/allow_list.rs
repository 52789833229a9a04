//! Static allow-list of identities permitted to open sessions.
//!
//! The source is line oriented: one identity per line, anything after `#`
//! is a comment, blank lines are skipped. Matching is case-insensitive.
//!
//! A missing or unreadable file fails closed: the resulting list is empty
//! and every identity is denied until the file is provided.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::identity::Identity;

pub const DEFAULT_ALLOW_LIST_FILE: &str = "allowlist.txt";

#[derive(Clone, Debug, Default)]
pub struct AllowList {
    identities: HashSet<Identity>,
}

impl AllowList {
    #[must_use]
    pub fn from_lines(text: &str) -> Self {
        let identities = text
            .lines()
            .filter_map(|line| line.split('#').next())
            .filter_map(Identity::parse)
            .collect();
        Self { identities }
    }

    /// Read and parse the allow-list file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read allow-list at {}", path.display()))?;
        let list = Self::from_lines(&text);
        info!(
            path = %path.display(),
            entries = list.len(),
            "allow-list loaded"
        );
        Ok(list)
    }

    /// Load the allow-list, denying everyone when it cannot be read.
    #[must_use]
    pub fn load_or_deny_all(path: &Path) -> Self {
        match Self::load(path) {
            Ok(list) => list,
            Err(err) => {
                warn!("{err:#}; no identities are permitted until the file is readable");
                Self::default()
            }
        }
    }

    /// Explicit path if given, otherwise `allowlist.txt` in the working directory.
    #[must_use]
    pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
        explicit.unwrap_or_else(|| {
            std::env::current_dir()
                .map(|dir| dir.join(DEFAULT_ALLOW_LIST_FILE))
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_ALLOW_LIST_FILE))
        })
    }

    #[must_use]
    pub fn contains(&self, identity: &Identity) -> bool {
        self.identities.contains(identity)
    }

    #[must_use]
    pub fn is_allowed(&self, raw: &str) -> bool {
        Identity::parse(raw).is_some_and(|identity| self.contains(&identity))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn allows_listed_identities() {
        let list = AllowList::from_lines("user@example.com\nadmin@example.com\n");
        assert!(list.is_allowed("user@example.com"));
        assert!(list.is_allowed("admin@example.com"));
        assert!(!list.is_allowed("hacker@example.com"));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn matching_is_case_insensitive_and_trimmed() {
        let list = AllowList::from_lines("  User@Example.com  \n");
        assert!(list.is_allowed("USER@EXAMPLE.COM"));
        assert!(list.is_allowed(" user@example.com"));
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let list = AllowList::from_lines(
            "# team accounts\nuser@example.com # inline comment\n\n   \n#other@example.com\n",
        );
        assert_eq!(list.len(), 1);
        assert!(list.is_allowed("user@example.com"));
        assert!(!list.is_allowed("other@example.com"));
    }

    #[test]
    fn blank_identity_is_never_allowed() {
        let list = AllowList::from_lines("user@example.com\n");
        assert!(!list.is_allowed(""));
        assert!(!list.is_allowed("   "));
    }

    #[test]
    fn load_reads_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "user@example.com")?;
        let list = AllowList::load(file.path())?;
        assert!(list.is_allowed("user@example.com"));
        Ok(())
    }

    #[test]
    fn missing_file_fails_closed() {
        let path = Path::new("/nonexistent/path/to/allowlist.txt");
        assert!(AllowList::load(path).is_err());

        let list = AllowList::load_or_deny_all(path);
        assert!(list.is_empty());
        assert!(!list.is_allowed("user@example.com"));
    }

    #[test]
    fn resolve_path_prefers_explicit() {
        let explicit = PathBuf::from("/etc/sessiongate/allow.txt");
        assert_eq!(AllowList::resolve_path(Some(explicit.clone())), explicit);
        assert!(AllowList::resolve_path(None).ends_with(DEFAULT_ALLOW_LIST_FILE));
    }
}
