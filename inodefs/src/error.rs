use std::fmt;

use thiserror::Error;

use crate::inode::DeviceId;

/// The resource that ran out when an operation fails with
/// [`FsError::ResourceExhausted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// The device has no free inode left.
    Inodes,
    /// The directory holds as many entries as it may.
    DirectoryEntries,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Inodes => f.write_str("no free inodes"),
            Resource::DirectoryEntries => f.write_str("directory is full"),
        }
    }
}

#[derive(Error, Debug)]
pub enum FsError {
    #[error("no such file or directory")]
    NoSuchEntry,
    #[error("permission denied")]
    PermissionDenied,
    #[error("is a directory")]
    IsADirectory,
    #[error("not a directory")]
    NotADirectory,
    #[error("no space left: {0}")]
    ResourceExhausted(Resource),
    #[error("entry already exists")]
    DuplicateEntry,
    #[error("file name too long")]
    NameTooLong,
    #[error("no such device: {0}")]
    NoSuchDevice(DeviceId),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid filesystem image")]
    InvalidImage(#[from] std::io::Error),
    #[error("corrupt filesystem image: {0}")]
    CorruptImage(String),
}

impl FsError {
    /// The POSIX error number reported to callers of the syscall layer.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NoSuchEntry => libc::ENOENT,
            FsError::PermissionDenied => libc::EACCES,
            FsError::IsADirectory => libc::EISDIR,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::ResourceExhausted(_) => libc::ENOSPC,
            FsError::DuplicateEntry => libc::EEXIST,
            FsError::NameTooLong => libc::ENAMETOOLONG,
            FsError::NoSuchDevice(_) => libc::ENXIO,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::InvalidImage(_) | FsError::CorruptImage(_) => libc::EIO,
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
