//! POSIX file mode bits, in the 16-bit layout stored on every inode.

pub const S_IFMT: u16 = 0o170_000;
pub const S_IFREG: u16 = 0o100_000;
pub const S_IFDIR: u16 = 0o040_000;

pub const S_IRWXU: u16 = 0o700;
pub const S_IRUSR: u16 = 0o400;
pub const S_IWUSR: u16 = 0o200;
pub const S_IXUSR: u16 = 0o100;
pub const S_IRWXG: u16 = 0o070;
pub const S_IRGRP: u16 = 0o040;
pub const S_IWGRP: u16 = 0o020;
pub const S_IXGRP: u16 = 0o010;
pub const S_IRWXO: u16 = 0o007;
pub const S_IROTH: u16 = 0o004;
pub const S_IWOTH: u16 = 0o002;
pub const S_IXOTH: u16 = 0o001;

/// Permission bits every directory receives on creation: rwxr-xr-x.
pub const DIR_PERMISSIONS: u16 = S_IRWXU | S_IRGRP | S_IXGRP | S_IROTH | S_IXOTH;

#[inline]
pub const fn is_dir(mode: u16) -> bool {
    (mode & S_IFMT) == S_IFDIR
}

#[inline]
pub const fn is_reg(mode: u16) -> bool {
    (mode & S_IFMT) == S_IFREG
}

/// Extract just the file type from mode.
#[inline]
pub const fn file_type(mode: u16) -> u16 {
    mode & S_IFMT
}

/// Extract just the permission bits from mode.
#[inline]
pub const fn permissions(mode: u16) -> u16 {
    mode & 0o7777
}

#[inline]
pub const fn make_mode(file_type: u16, perms: u16) -> u16 {
    (file_type & S_IFMT) | (perms & 0o7777)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_mode_splits_into_type_and_permissions() {
        let mode = make_mode(S_IFDIR, DIR_PERMISSIONS);
        assert!(is_dir(mode));
        assert!(!is_reg(mode));
        assert_eq!(file_type(mode), S_IFDIR);
        assert_eq!(permissions(mode), 0o755);
    }
}
