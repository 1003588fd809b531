//! Filesystem jail rooted at the sandbox directory.
//!
//! Every path a plugin or HTTP handler touches goes through
//! [`PathJail::resolve`]. Resolution is lexical first (so `..` cannot climb
//! out), then the longest existing prefix is canonicalized so that symlinks
//! pointing outside the root are caught even for files that do not exist yet.

use std::{
    ffi::OsString,
    path::{Component, Path, PathBuf},
};

use tracing::debug;

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct PathJail {
    root: PathBuf,
}

impl PathJail {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self { root }
    }

    /// The root as configured (absolute, not canonicalized).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The root with symlinks resolved through its longest existing prefix.
    pub fn canonical_root(&self) -> Result<PathBuf> {
        resolve_existing_prefix(&self.root).map_err(|source| Error::RootUnavailable { source })
    }

    /// Resolve `requested` against the root.
    ///
    /// `""` and `"."` yield the root itself. Absolute paths are accepted only
    /// when they already point inside the root.
    pub fn resolve(&self, requested: impl AsRef<Path>) -> Result<PathBuf> {
        let requested = requested.as_ref();
        let root = self.canonical_root()?;

        if requested.as_os_str().as_encoded_bytes().contains(&0) {
            debug!("jail denied path containing NUL");
            return Err(Error::PathDenied);
        }

        let joined = root.join(requested);
        let Some(lexical) = normalize_lexically(&joined) else {
            debug!(requested = %requested.display(), "jail denied path above filesystem root");
            return Err(Error::PathDenied);
        };

        // A lexical escape is final; no need to touch the filesystem.
        if !lexical.starts_with(&root) {
            debug!(requested = %requested.display(), "jail denied lexical escape");
            return Err(Error::PathDenied);
        }

        let resolved = resolve_existing_prefix(&lexical).map_err(|_| Error::PathDenied)?;
        if !resolved.starts_with(&root) {
            debug!(requested = %requested.display(), "jail denied symlink escape");
            return Err(Error::PathDenied);
        }

        Ok(resolved)
    }

    /// Express an absolute path as relative to the root, if it is inside.
    pub fn relativize(&self, path: &Path) -> Option<PathBuf> {
        let root = self.canonical_root().ok()?;
        path.strip_prefix(&root)
            .or_else(|_| path.strip_prefix(&self.root))
            .ok()
            .map(Path::to_path_buf)
    }
}

/// Remove `.` and fold `..` without touching the filesystem.
///
/// Returns `None` when `..` would climb above the filesystem root.
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {},
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            },
            Component::Normal(part) => out.push(part),
        }
    }
    Some(out)
}

/// Canonicalize the longest existing prefix of `path` and re-append the rest.
fn resolve_existing_prefix(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<OsString> = Vec::new();

    while !existing.exists() {
        let Some(name) = existing.file_name() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no existing ancestor",
            ));
        };
        tail.push(name.to_os_string());
        if !existing.pop() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no existing ancestor",
            ));
        }
    }

    let mut resolved = existing.canonicalize()?;
    for part in tail.into_iter().rev() {
        resolved.push(part);
    }
    Ok(resolved)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn agent_home_contract() {
        let jail = PathJail::new("/home/agent");
        let root = jail.canonical_root().unwrap();

        assert!(matches!(
            jail.resolve("../etc/passwd"),
            Err(Error::PathDenied)
        ));

        let page = jail.resolve("apps/foo.html").unwrap();
        assert_eq!(page, root.join("apps/foo.html"));
        assert!(page.ends_with("agent/apps/foo.html"));

        assert_eq!(jail.resolve("").unwrap(), root);
    }

    #[rstest]
    #[case("..")]
    #[case("../")]
    #[case("a/../../b")]
    #[case("./../../etc")]
    #[case("/etc/passwd")]
    #[case("../../../../../../../../../../../../etc")]
    fn escapes_are_denied(#[case] requested: &str) {
        let tmp = tempfile::tempdir().unwrap();
        let jail = PathJail::new(tmp.path());
        assert!(matches!(jail.resolve(requested), Err(Error::PathDenied)));
    }

    #[rstest]
    #[case(".", "")]
    #[case("a/./b", "a/b")]
    #[case("a/b/../c", "a/c")]
    #[case("notes/../notes/today.md", "notes/today.md")]
    fn inside_paths_resolve(#[case] requested: &str, #[case] expected: &str) {
        let tmp = tempfile::tempdir().unwrap();
        let jail = PathJail::new(tmp.path());
        let root = jail.canonical_root().unwrap();
        let want = if expected.is_empty() {
            root.clone()
        } else {
            root.join(expected)
        };
        assert_eq!(jail.resolve(requested).unwrap(), want);
    }

    #[test]
    fn absolute_path_inside_root_allowed() {
        let tmp = tempfile::tempdir().unwrap();
        let jail = PathJail::new(tmp.path());
        let root = jail.canonical_root().unwrap();
        let inside = root.join("data/x.json");
        assert_eq!(jail.resolve(&inside).unwrap(), inside);
    }

    #[test]
    fn error_message_does_not_leak_path() {
        let tmp = tempfile::tempdir().unwrap();
        let jail = PathJail::new(tmp.path());
        let err = jail.resolve("../secret-dir/key").unwrap_err();
        assert!(!err.to_string().contains("secret-dir"));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_root_denied() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("passwd"), "x").unwrap();

        let tmp = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("link")).unwrap();

        let jail = PathJail::new(tmp.path());
        assert!(matches!(
            jail.resolve("link/passwd"),
            Err(Error::PathDenied)
        ));
        // Not-yet-existing files below the link are caught too.
        assert!(matches!(
            jail.resolve("link/new/file.txt"),
            Err(Error::PathDenied)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_within_root_allowed() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("real")).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("real"), tmp.path().join("alias")).unwrap();

        let jail = PathJail::new(tmp.path());
        let root = jail.canonical_root().unwrap();
        assert_eq!(
            jail.resolve("alias/f.txt").unwrap(),
            root.join("real/f.txt")
        );
    }

    #[test]
    fn relativize_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let jail = PathJail::new(tmp.path());
        let abs = jail.resolve("a/b.txt").unwrap();
        assert_eq!(jail.relativize(&abs).unwrap(), PathBuf::from("a/b.txt"));
    }
}
