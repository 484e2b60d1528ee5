use crate::inode::{InodeNumber, ROOT_INODE};
use crate::perm::Credentials;

/// Caller context threaded through every filesystem call.
#[derive(Clone, Debug)]
pub struct Process {
    pub cred: Credentials,
    /// Permission bits cleared from the mode of newly created regular files.
    pub umask: u16,
    /// Inode number relative paths are resolved from.
    pub cwd: InodeNumber,
    errno: i32,
}

impl Process {
    pub fn new(cred: Credentials) -> Self {
        Self {
            cred,
            umask: 0o022,
            cwd: ROOT_INODE,
            errno: 0,
        }
    }

    pub fn root() -> Self {
        Self::new(Credentials::root())
    }

    pub fn with_umask(mut self, umask: u16) -> Self {
        self.umask = umask & 0o777;
        self
    }

    pub fn with_cwd(mut self, cwd: InodeNumber) -> Self {
        self.cwd = cwd;
        self
    }

    /// Error number left behind by the last failed syscall, 0 if none failed.
    pub fn errno(&self) -> i32 {
        self.errno
    }

    pub(crate) fn set_errno(&mut self, errno: i32) {
        self.errno = errno;
    }
}
