use std::sync::Arc;

use crate::config::FsConfig;
use crate::dir::{self, DirEntry};
use crate::error::{FsError, FsResult};
use crate::flags::{AccessMode, OpenFlags};
use crate::inode::{Inode, InodeData, InodeNumber, InodeTable, LockedInode, ROOT_INODE};
use crate::mode::{make_mode, DIR_PERMISSIONS, S_IFDIR, S_IFREG};
use crate::path::PathResolver;
use crate::perm::{self, required_access, Credentials};
use crate::process::Process;

/// What a create-or-open call makes when the entry is missing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Regular,
    Directory,
}

/// A formatted filesystem: one device worth of inodes under a root directory.
///
/// Cloning is cheap and every clone works on the same inodes, so a
/// `FileSystem` can be handed to as many threads as needed.
#[derive(Clone)]
pub struct FileSystem {
    pub(crate) inodes: InodeTable,
    pub(crate) config: Arc<FsConfig>,
}

impl FileSystem {
    /// Builds an empty filesystem holding only the root directory.
    ///
    /// # Layout
    /// ==========================================================
    /// | 0: null inode | 1: root directory | 2..: free inodes   |
    /// ==========================================================
    pub fn format(config: FsConfig) -> FsResult<Self> {
        let inodes = InodeTable::new();
        inodes.add_device(config.device, config.inode_count)?;

        let mut root = inodes.allocate(config.device)?;
        debug_assert_eq!(root.number(), ROOT_INODE);
        root.initialize(make_mode(S_IFDIR, DIR_PERMISSIONS), &Credentials::root());
        dir::link_self(&mut root, config.max_entries)?;
        dir::link_root_parent(&mut root, config.max_entries)?;
        drop(root);

        info!(
            "formatted device {} with {} inodes, {} entries per directory",
            config.device, config.inode_count, config.max_entries
        );
        Ok(Self {
            inodes,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    /// A reference to the root directory.
    pub fn root(&self) -> FsResult<Inode> {
        Ok(self.inodes.retrieve(self.config.device, ROOT_INODE)?.unlock())
    }

    /// Creates the directory at `path`, or opens it read-only if an entry of
    /// that name already exists. New directories are always rwxr-xr-x; only
    /// the type of `mode` matters.
    pub fn mkdir(&self, proc: &Process, path: &str, mode: u16) -> FsResult<Inode> {
        self.create_or_open(proc, path, OpenFlags::CREAT, mode, NodeKind::Directory)
    }

    /// Opens the entry at `path`, creating a regular file when `flags`
    /// include `CREAT` and the entry is missing.
    pub fn open(&self, proc: &Process, path: &str, flags: OpenFlags, mode: u16) -> FsResult<Inode> {
        self.create_or_open(proc, path, flags, mode, NodeKind::Regular)
    }

    /// Lists the live entries of the directory at `path`.
    pub fn read_dir(&self, proc: &Process, path: &str) -> FsResult<Vec<DirEntry>> {
        let dir = self.open(proc, path, OpenFlags::RDONLY, 0)?.lock();
        if !dir.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let entries = dir::entries(&dir).copied().collect();
        Ok(entries)
    }

    /// Resolves `path` and either creates its leaf or opens what is there.
    ///
    /// On success the caller owns one reference to the returned inode, which
    /// is unlocked. On failure nothing stays allocated, linked or referenced.
    pub fn create_or_open(
        &self,
        proc: &Process,
        path: &str,
        flags: OpenFlags,
        mode: u16,
        kind: NodeKind,
    ) -> FsResult<Inode> {
        let resolver = PathResolver::new(&self.inodes, &self.config);
        let (parent, leaf) = resolver.resolve_parent(proc, path)?;

        let found = dir::search(&parent, leaf);
        match found {
            None => self.create(proc, parent, leaf, flags, mode, kind),
            Some(num) => self.open_existing(proc, parent, num, flags),
        }
    }

    fn create(
        &self,
        proc: &Process,
        mut parent: LockedInode,
        leaf: &str,
        flags: OpenFlags,
        mode: u16,
        kind: NodeKind,
    ) -> FsResult<Inode> {
        if !flags.wants_create() {
            return Err(FsError::NoSuchEntry);
        }

        let mut inode = self.inodes.allocate(parent.device())?;
        let mode = match kind {
            NodeKind::Directory => make_mode(S_IFDIR, DIR_PERMISSIONS),
            NodeKind::Regular => make_mode(S_IFREG, mode & 0o777 & !proc.umask),
        };
        inode.initialize(mode, &proc.cred);

        // Until the entry exists the new inode has no links, so dropping it on
        // any early return hands its number back to the free map.
        let capacity = self.config.max_entries;
        dir::insert(&mut parent, &mut inode, leaf, capacity)?;

        if kind == NodeKind::Directory {
            attach_directory(&mut inode, &mut parent, leaf, capacity)?;
        }

        debug!(
            "created {:?} as inode {} in directory {}",
            leaf,
            inode.number(),
            parent.number()
        );
        let inode = inode.unlock();
        drop(parent);
        Ok(inode)
    }

    fn open_existing(
        &self,
        proc: &Process,
        parent: LockedInode,
        num: InodeNumber,
        flags: OpenFlags,
    ) -> FsResult<Inode> {
        if flags.is_exclusive() {
            return Err(FsError::DuplicateEntry);
        }

        let dev = parent.device();
        drop(parent);

        let inode = self.inodes.retrieve(dev, num)?;
        perm::check(
            inode.mode(),
            inode.uid(),
            inode.gid(),
            &proc.cred,
            required_access(flags),
            self.config.superuser_bypass,
        )?;
        if inode.is_dir() && flags.access_mode() != AccessMode::ReadOnly {
            return Err(FsError::IsADirectory);
        }

        Ok(inode.unlock())
    }
}

/// Finishes a directory already entered in `parent` as `leaf`. On failure the
/// parent entry is removed again, leaving `dir` with no links.
///
/// With at least two entries per directory the links cannot run out of room,
/// so the unwinding here only runs for smaller capacities.
fn attach_directory(
    dir: &mut InodeData,
    parent: &mut InodeData,
    leaf: &str,
    capacity: usize,
) -> FsResult<()> {
    if let Err(err) = link_new_directory(dir, parent, capacity) {
        warn!(
            "rolling back directory {:?} (inode {}): {}",
            leaf,
            dir.number(),
            err
        );
        dir::remove(parent, dir, leaf)?;
        return Err(err);
    }
    Ok(())
}

/// Gives a new directory its `.` and `..` entries, leaving neither behind if
/// either fails.
fn link_new_directory(dir: &mut InodeData, parent: &mut InodeData, capacity: usize) -> FsResult<()> {
    dir::link_self(dir, capacity)?;
    if let Err(err) = dir::link_parent(dir, parent, capacity) {
        dir::unlink_self(dir)?;
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir::{DOT, DOT_DOT};
    use crate::error::Resource;
    use crate::mode;

    fn create_test_fs() -> FileSystem {
        FileSystem::format(FsConfig::default()).expect("could not format filesystem")
    }

    #[test]
    fn root_dir_returns_root_inode() {
        let fs = create_test_fs();
        let root = fs.open(&Process::root(), "/", OpenFlags::RDONLY, 0).unwrap();
        assert_eq!(root.number(), ROOT_INODE);
        assert!(root.is_dir());
    }

    #[test]
    fn file_not_found_without_create_returns_error() {
        let fs = create_test_fs();

        let result = fs.open(&Process::root(), "/foo", OpenFlags::RDONLY, 0);
        match result.unwrap_err() {
            FsError::NoSuchEntry => (),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(fs.read_dir(&Process::root(), "/").unwrap().len(), 2);
    }

    #[test]
    fn file_not_found_with_create_returns_handle() {
        let fs = create_test_fs();

        let file = fs
            .open(&Process::root(), "/foo", OpenFlags::CREAT | OpenFlags::WRONLY, 0o644)
            .unwrap();

        assert_eq!(file.number(), 2);
        assert!(mode::is_reg(file.mode()));
        assert_eq!(mode::permissions(file.mode()), 0o644);
    }

    #[test]
    fn umask_clears_requested_permission_bits() {
        let fs = create_test_fs();
        let proc = Process::root().with_umask(0o027);

        let file = fs.open(&proc, "/log", OpenFlags::CREAT, 0o666).unwrap();

        assert_eq!(mode::permissions(file.mode()), 0o640);
    }

    #[test]
    fn new_directories_ignore_requested_permissions() {
        let fs = create_test_fs();

        let dir = fs.mkdir(&Process::root(), "/d", 0o700).unwrap();

        assert_eq!(dir.mode(), mode::S_IFDIR | 0o755);
    }

    #[test]
    fn handle_holds_exactly_one_reference() {
        let fs = create_test_fs();

        let dir = fs.mkdir(&Process::root(), "/d", 0).unwrap();
        assert_eq!(dir.stat().refs, 1);
        assert_eq!(dir.stat().nlinks, 2);

        let num = dir.number();
        drop(dir);
        assert_eq!(fs.inodes().ref_count(0, num), Some(0));
        assert_eq!(fs.inodes().ref_count(0, ROOT_INODE), Some(0));
    }

    #[test]
    fn exclusive_create_of_existing_entry_fails() {
        let fs = create_test_fs();
        let proc = Process::root();
        fs.open(&proc, "/f", OpenFlags::CREAT, 0o644).unwrap();

        let result = fs.open(&proc, "/f", OpenFlags::CREAT | OpenFlags::EXCL, 0o644);

        assert!(matches!(result, Err(FsError::DuplicateEntry)));
    }

    #[test]
    fn full_parent_rolls_back_the_allocation() {
        let config = FsConfig::builder().with_max_entries(2).build().unwrap();
        let fs = FileSystem::format(config).unwrap();
        let free = fs.inodes().free_count(0).unwrap();

        let result = fs.mkdir(&Process::root(), "/d", 0);

        assert!(matches!(
            result,
            Err(FsError::ResourceExhausted(Resource::DirectoryEntries))
        ));
        assert_eq!(fs.inodes().free_count(0).unwrap(), free);
        assert!(!fs.inodes().is_allocated(0, 2));
        assert_eq!(fs.inodes().ref_count(0, ROOT_INODE), Some(0));
    }

    #[test]
    fn failed_parent_link_removes_the_self_link() {
        let fs = create_test_fs();
        let mut parent = fs.inodes().retrieve(0, ROOT_INODE).unwrap();
        let mut child = fs.inodes().allocate(0).unwrap();
        child.initialize(make_mode(S_IFDIR, DIR_PERMISSIONS), &Credentials::root());
        let parent_links = parent.nlinks();

        // Room for "." only.
        let result = link_new_directory(&mut child, &mut parent, 1);

        assert!(matches!(
            result,
            Err(FsError::ResourceExhausted(Resource::DirectoryEntries))
        ));
        assert_eq!(dir::len(&child), 0);
        assert_eq!(dir::search(&child, DOT), None);
        assert_eq!(child.nlinks(), 0);
        assert_eq!(parent.nlinks(), parent_links);
    }

    #[test]
    fn failed_directory_links_unwind_the_parent_entry() {
        let fs = create_test_fs();
        let free = fs.inodes().free_count(0).unwrap();
        let mut parent = fs.inodes().retrieve(0, ROOT_INODE).unwrap();
        let parent_links = parent.nlinks();
        let mut child = fs.inodes().allocate(0).unwrap();
        child.initialize(make_mode(S_IFDIR, DIR_PERMISSIONS), &Credentials::root());
        let num = child.number();
        dir::insert(&mut parent, &mut child, "d", fs.config().max_entries).unwrap();

        // Room for "." only.
        let result = attach_directory(&mut child, &mut parent, "d", 1);

        assert!(matches!(
            result,
            Err(FsError::ResourceExhausted(Resource::DirectoryEntries))
        ));
        assert_eq!(dir::search(&parent, "d"), None);
        assert_eq!(dir::len(&child), 0);
        assert_eq!(child.nlinks(), 0);
        assert_eq!(parent.nlinks(), parent_links);

        drop(child);
        drop(parent);
        assert!(!fs.inodes().is_allocated(0, num));
        assert_eq!(fs.inodes().free_count(0).unwrap(), free);
    }

    #[test]
    fn dot_entries_resolve_inside_paths() {
        let fs = create_test_fs();
        let proc = Process::root();
        let a = fs.mkdir(&proc, "/a", 0).unwrap();
        let b = fs.mkdir(&proc, "/a/b", 0).unwrap();

        let via_dots = fs.open(&proc, "/a/b/../b/.", OpenFlags::RDONLY, 0).unwrap();
        let parent = fs.open(&proc, "/a/b/..", OpenFlags::RDONLY, 0).unwrap();

        assert_eq!(via_dots.number(), b.number());
        assert_eq!(parent.number(), a.number());
    }

    #[test]
    fn relative_paths_start_at_the_working_directory() {
        let fs = create_test_fs();
        let root = Process::root();
        let home = fs.mkdir(&root, "/home", 0).unwrap();
        let proc = Process::root().with_cwd(home.number());

        let notes = fs.open(&proc, "notes", OpenFlags::CREAT, 0o600).unwrap();
        let same = fs.open(&root, "/home/notes", OpenFlags::RDONLY, 0).unwrap();

        assert_eq!(notes.number(), same.number());
    }

    #[test]
    fn walking_through_a_regular_file_is_not_a_directory() {
        let fs = create_test_fs();
        let proc = Process::root();
        fs.open(&proc, "/f", OpenFlags::CREAT, 0o644).unwrap();

        let result = fs.mkdir(&proc, "/f/d", 0);

        assert!(matches!(result, Err(FsError::NotADirectory)));
    }

    #[test]
    fn listing_a_regular_file_is_not_a_directory() {
        let fs = create_test_fs();
        let proc = Process::root();
        fs.open(&proc, "/f", OpenFlags::CREAT, 0o644).unwrap();

        assert!(matches!(
            fs.read_dir(&proc, "/f"),
            Err(FsError::NotADirectory)
        ));
    }

    #[test]
    fn overlong_names_are_rejected_before_allocation() {
        let fs = create_test_fs();
        let free = fs.inodes().free_count(0).unwrap();

        let result = fs.mkdir(&Process::root(), "/a-very-long-directory-name", 0);

        assert!(matches!(result, Err(FsError::NameTooLong)));
        assert_eq!(fs.inodes().free_count(0).unwrap(), free);
    }

    #[test]
    fn empty_path_is_no_such_entry() {
        let fs = create_test_fs();
        assert!(matches!(
            fs.mkdir(&Process::root(), "", 0),
            Err(FsError::NoSuchEntry)
        ));
    }

    #[test]
    fn root_parent_link_names_the_root() {
        let fs = create_test_fs();
        let entries = fs.read_dir(&Process::root(), "/").unwrap();
        let dot_dot = entries
            .iter()
            .find(|entry| entry.name() == Some(DOT_DOT))
            .unwrap();
        assert_eq!(dot_dot.ino(), ROOT_INODE);
    }
}
