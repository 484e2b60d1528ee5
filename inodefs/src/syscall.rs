//! Integer-returning entry points in the shape of kernel system calls.
//!
//! Failures come back as a negated error number, which is also left in the
//! calling process. Successful calls leave the process' errno untouched.

use crate::error::FsResult;
use crate::flags::OpenFlags;
use crate::fs::FileSystem;
use crate::process::Process;

fn complete<T, F>(proc: &mut Process, call: &str, result: FsResult<T>, ok: F) -> i32
where
    F: FnOnce(T) -> i32,
{
    match result {
        Ok(value) => ok(value),
        Err(err) => {
            debug!("{} failed: {}", call, err);
            let errno = err.errno();
            proc.set_errno(errno);
            -errno
        }
    }
}

/// Creates (or opens) the directory at `path` and returns its mode bits.
pub fn sys_mkdir(fs: &FileSystem, proc: &mut Process, path: &str, mode: u16) -> i32 {
    let result = fs.mkdir(proc, path, mode);
    complete(proc, "mkdir", result, |dir| i32::from(dir.mode()))
}

/// Opens `path` and returns its inode number. Unknown flag bits are ignored.
pub fn sys_open(fs: &FileSystem, proc: &mut Process, path: &str, flags: u32, mode: u16) -> i32 {
    let flags = OpenFlags::from_bits_truncate(flags);
    let result = fs.open(proc, path, flags, mode);
    complete(proc, "open", result, |inode| i32::from(inode.number()))
}
