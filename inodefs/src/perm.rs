use bitflags::bitflags;

use crate::error::{FsError, FsResult};
use crate::flags::{AccessMode, OpenFlags};

bitflags! {
    /// Rights a caller needs on an inode. The values line up with the
    /// per-class rwx triplets in a mode word.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Access: u16 {
        const READ = 0o4;
        const WRITE = 0o2;
        const EXEC = 0o1;
    }
}

/// Effective identity of a caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u16,
    pub gid: u16,
}

impl Credentials {
    pub fn new(uid: u16, gid: u16) -> Self {
        Self { uid, gid }
    }

    pub fn root() -> Self {
        Self { uid: 0, gid: 0 }
    }

    pub fn is_superuser(&self) -> bool {
        self.uid == 0
    }
}

/// Minimal rights implied by a set of open flags.
///
/// Truncating a file opened read-only still modifies it, so `TRUNC` adds the
/// write right in that case.
pub fn required_access(flags: OpenFlags) -> Access {
    match flags.access_mode() {
        AccessMode::ReadWrite => Access::READ | Access::WRITE,
        AccessMode::WriteOnly => Access::WRITE,
        AccessMode::ReadOnly if flags.contains(OpenFlags::TRUNC) => Access::READ | Access::WRITE,
        AccessMode::ReadOnly => Access::READ,
    }
}

/// Evaluates `required` against the owner, group or other class of `mode`.
///
/// Only one class is ever consulted: the owner class when the caller owns the
/// inode, the group class when the groups match, the other class otherwise.
pub fn check(
    mode: u16,
    owner_uid: u16,
    owner_gid: u16,
    cred: &Credentials,
    required: Access,
    superuser_bypass: bool,
) -> FsResult<()> {
    if superuser_bypass && cred.is_superuser() {
        return Ok(());
    }

    let shift = if cred.uid == owner_uid {
        6
    } else if cred.gid == owner_gid {
        3
    } else {
        0
    };
    let granted = Access::from_bits_truncate((mode >> shift) & 0o7);

    if granted.contains(required) {
        Ok(())
    } else {
        Err(FsError::PermissionDenied)
    }
}
