use crate::config::FsConfig;
use crate::dir::{self, DOT, NAME_MAX};
use crate::error::{FsError, FsResult};
use crate::inode::{InodeTable, LockedInode, ROOT_INODE};
use crate::perm::{self, Access};
use crate::process::Process;

/// Splits `path` into its parent part and leaf name.
///
/// Trailing slashes are ignored. A path made only of slashes names the root,
/// which is reported as the `.` entry of the root itself.
///
/// ```
/// use inodefs::path::split;
///
/// assert_eq!(split("/usr/bin"), ("/usr", "bin"));
/// assert_eq!(split("bin/"), ("", "bin"));
/// assert_eq!(split("/"), ("/", "."));
/// ```
pub fn split(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.starts_with('/') { ("/", DOT) } else { ("", "") };
    }
    match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => ("", trimmed),
    }
}

/// Walks paths down to the directory that holds their leaf.
pub struct PathResolver<'a> {
    table: &'a InodeTable,
    config: &'a FsConfig,
}

impl<'a> PathResolver<'a> {
    pub fn new(table: &'a InodeTable, config: &'a FsConfig) -> Self {
        Self { table, config }
    }

    /// Resolves every component but the last one. The parent directory comes
    /// back locked together with the leaf name.
    pub fn resolve_parent<'p>(
        &self,
        proc: &Process,
        path: &'p str,
    ) -> FsResult<(LockedInode, &'p str)> {
        if path.is_empty() {
            return Err(FsError::NoSuchEntry);
        }
        if path.len() > self.config.max_path_len {
            return Err(FsError::NameTooLong);
        }

        let (parent_path, leaf) = split(path);
        if leaf.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        let start = if path.starts_with('/') {
            ROOT_INODE
        } else {
            proc.cwd
        };

        let mut dir = self.table.retrieve(self.config.device, start)?;
        for name in parent_path.split('/').filter(|name| !name.is_empty()) {
            dir = self.step(proc, dir, name)?;
        }
        self.check_searchable(proc, &dir)?;
        Ok((dir, leaf))
    }

    /// Moves from `dir` to its entry `name`, giving up `dir` first.
    fn step(&self, proc: &Process, dir: LockedInode, name: &str) -> FsResult<LockedInode> {
        self.check_searchable(proc, &dir)?;
        if name.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        let num = dir::search(&dir, name).ok_or(FsError::NoSuchEntry)?;
        let dev = dir.device();
        // "." and ".." would deadlock if the walk kept holding this lock.
        drop(dir);
        self.table.retrieve(dev, num)
    }

    fn check_searchable(&self, proc: &Process, dir: &LockedInode) -> FsResult<()> {
        if !dir.is_dir() {
            return Err(FsError::NotADirectory);
        }
        perm::check(
            dir.mode(),
            dir.uid(),
            dir.gid(),
            &proc.cred,
            Access::EXEC,
            self.config.superuser_bypass,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_separates_leaf_from_parent() {
        assert_eq!(split("/a/b/c"), ("/a/b", "c"));
        assert_eq!(split("/a"), ("/", "a"));
        assert_eq!(split("a"), ("", "a"));
        assert_eq!(split("a/b"), ("a", "b"));
    }

    #[test]
    fn split_ignores_trailing_slashes() {
        assert_eq!(split("/a/b//"), ("/a", "b"));
        assert_eq!(split("///"), ("/", "."));
    }

    #[test]
    fn split_keeps_dot_components() {
        assert_eq!(split("/a/.."), ("/a", ".."));
        assert_eq!(split("./x"), (".", "x"));
    }
}
