//! Directory entry lists.
//!
//! A directory's contents are a sequence of fixed-size [`DirEntry`] slots. A
//! slot whose inode number is [`INODE_NULL`] is free and gets reused by the
//! next insertion. All functions here work on the data of an inode the caller
//! already holds locked.

use std::str;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::{FsError, FsResult, Resource};
use crate::inode::{InodeData, InodeNumber, INODE_NULL};

/// Longest name a directory entry can hold, in bytes.
pub const NAME_MAX: usize = 14;

pub const DOT: &str = ".";
pub const DOT_DOT: &str = "..";

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirEntry {
    ino: InodeNumber,
    /// NUL padded, not NUL terminated when the name is NAME_MAX long.
    name: [u8; NAME_MAX],
}

impl DirEntry {
    pub fn new(name: &str, ino: InodeNumber) -> FsResult<Self> {
        validate_name(name)?;
        let mut buf = [0; NAME_MAX];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self { ino, name: buf })
    }

    pub fn ino(&self) -> InodeNumber {
        self.ino
    }

    pub fn is_free(&self) -> bool {
        self.ino == INODE_NULL
    }

    pub fn name_bytes(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_MAX);
        &self.name[..len]
    }

    /// The entry's name, `None` if the stored bytes are not UTF-8.
    pub fn name(&self) -> Option<&str> {
        str::from_utf8(self.name_bytes()).ok()
    }

    /// Reads one record from a buffer of exactly `size_of::<DirEntry>()` bytes.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        Self::read_from(buf)
    }

    pub fn serialize(&self) -> &[u8] {
        self.as_bytes()
    }

    /// Checks a record read back from storage: it must be in use and carry a
    /// name [`DirEntry::new`] would have accepted.
    pub(crate) fn validate(&self) -> FsResult<()> {
        if self.is_free() {
            return Err(FsError::InvalidArgument("free entry slot".to_string()));
        }
        let name = self.name().ok_or_else(|| {
            FsError::InvalidArgument(format!("entry name {:?} is not UTF-8", self.name_bytes()))
        })?;
        validate_name(name)
    }

    fn clear(&mut self) {
        *self = Self::new_zeroed();
    }
}

fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name.contains('/') || name.contains('\0') {
        return Err(FsError::InvalidArgument(format!(
            "invalid entry name {:?}",
            name
        )));
    }
    if name.len() > NAME_MAX {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

/// Looks `name` up in `dir`. `None` is the ordinary "not there" outcome.
pub fn search(dir: &InodeData, name: &str) -> Option<InodeNumber> {
    debug_assert!(dir.is_dir(), "search in non-directory {}", dir.number());
    dir.entries
        .iter()
        .find(|entry| !entry.is_free() && entry.name_bytes() == name.as_bytes())
        .map(|entry| entry.ino)
}

/// Live entries of `dir` in slot order.
pub fn entries(dir: &InodeData) -> impl Iterator<Item = &DirEntry> {
    dir.entries.iter().filter(|entry| !entry.is_free())
}

pub fn len(dir: &InodeData) -> usize {
    entries(dir).count()
}

/// Writes the slot without touching any link count.
fn add_entry(dir: &mut InodeData, name: &str, ino: InodeNumber, capacity: usize) -> FsResult<()> {
    if !dir.is_dir() {
        return Err(FsError::NotADirectory);
    }
    let entry = DirEntry::new(name, ino)?;
    if search(dir, name).is_some() {
        return Err(FsError::DuplicateEntry);
    }

    if let Some(slot) = dir.entries.iter_mut().find(|slot| slot.is_free()) {
        *slot = entry;
        return Ok(());
    }
    if dir.entries.len() >= capacity {
        return Err(FsError::ResourceExhausted(Resource::DirectoryEntries));
    }
    dir.entries.push(entry);
    Ok(())
}

fn remove_entry(dir: &mut InodeData, name: &str) -> FsResult<InodeNumber> {
    let slot = dir
        .entries
        .iter_mut()
        .find(|slot| !slot.is_free() && slot.name_bytes() == name.as_bytes())
        .ok_or(FsError::NoSuchEntry)?;
    let ino = slot.ino;
    slot.clear();
    Ok(ino)
}

/// Adds `name -> target` to `dir` and counts the new link on `target`.
pub fn insert(
    dir: &mut InodeData,
    target: &mut InodeData,
    name: &str,
    capacity: usize,
) -> FsResult<()> {
    add_entry(dir, name, target.number(), capacity)?;
    target.nlinks += 1;
    Ok(())
}

/// Undoes [`insert`].
pub fn remove(dir: &mut InodeData, target: &mut InodeData, name: &str) -> FsResult<()> {
    let ino = remove_entry(dir, name)?;
    debug_assert_eq!(ino, target.number());
    target.nlinks = target.nlinks.saturating_sub(1);
    Ok(())
}

/// Creates the `.` entry of a new directory.
pub fn link_self(dir: &mut InodeData, capacity: usize) -> FsResult<()> {
    let ino = dir.number();
    add_entry(dir, DOT, ino, capacity)?;
    dir.nlinks += 1;
    Ok(())
}

/// Creates the `..` entry of a new directory.
pub fn link_parent(dir: &mut InodeData, parent: &mut InodeData, capacity: usize) -> FsResult<()> {
    insert(dir, parent, DOT_DOT, capacity)
}

/// Creates the `..` entry of a root directory, which names the root itself.
pub fn link_root_parent(dir: &mut InodeData, capacity: usize) -> FsResult<()> {
    let ino = dir.number();
    add_entry(dir, DOT_DOT, ino, capacity)?;
    dir.nlinks += 1;
    Ok(())
}

/// Undoes [`link_self`].
pub fn unlink_self(dir: &mut InodeData) -> FsResult<()> {
    remove_entry(dir, DOT)?;
    dir.nlinks = dir.nlinks.saturating_sub(1);
    Ok(())
}

/// Undoes [`link_parent`].
pub fn unlink_parent(dir: &mut InodeData, parent: &mut InodeData) -> FsResult<()> {
    remove(dir, parent, DOT_DOT)
}
