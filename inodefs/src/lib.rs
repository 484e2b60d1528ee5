//! An in-memory inode and directory layer.
//!
//! A [`FileSystem`] owns one device worth of inodes rooted at [`ROOT_INODE`].
//! Its create-or-open calls resolve a path to the directory holding the leaf,
//! then either link a new regular file or directory under that name or open
//! what is already there after checking the caller's credentials. Callers get
//! back a counted [`Inode`] handle; everything a failed call touched is rolled
//! back before the error is returned.
//!
//! ```
//! use inodefs::{FileSystem, FsConfig, OpenFlags, Process};
//!
//! let fs = FileSystem::format(FsConfig::default()).unwrap();
//! let proc = Process::root();
//!
//! let dir = fs.mkdir(&proc, "/tmp", 0).unwrap();
//! let file = fs.open(&proc, "/tmp/notes", OpenFlags::CREAT, 0o644).unwrap();
//! assert_ne!(dir.number(), file.number());
//! ```

#[macro_use]
extern crate log;

mod alloc;
pub mod config;
pub mod dir;
pub mod error;
pub mod flags;
mod fs;
mod image;
pub mod inode;
pub mod mode;
pub mod path;
pub mod perm;
pub mod process;
pub mod syscall;

pub use crate::config::{FsConfig, FsConfigBuilder};
pub use crate::dir::DirEntry;
pub use crate::error::{FsError, FsResult, Resource};
pub use crate::flags::{AccessMode, OpenFlags};
pub use crate::fs::{FileSystem, NodeKind};
pub use crate::inode::{
    DeviceId, Inode, InodeNumber, InodeTable, LockedInode, Stat, ROOT_INODE,
};
pub use crate::perm::{Access, Credentials};
pub use crate::process::Process;
