use bitflags::bitflags;

bitflags! {
    /// Flags accepted by create-or-open calls. The two low bits hold the
    /// access mode; read-only is the absence of both.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const WRONLY = 0o1;
        const RDWR = 0o2;
        const ACCMODE = 0o3;
        const CREAT = 0o100;
        const EXCL = 0o200;
        const TRUNC = 0o1000;
    }
}

/// The access mode field of [`OpenFlags`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl OpenFlags {
    pub const RDONLY: OpenFlags = OpenFlags::empty();

    pub fn access_mode(self) -> AccessMode {
        match (self & OpenFlags::ACCMODE).bits() {
            0 => AccessMode::ReadOnly,
            1 => AccessMode::WriteOnly,
            // 0o3 is not a valid access mode; it demands both rights.
            _ => AccessMode::ReadWrite,
        }
    }

    pub fn wants_create(self) -> bool {
        self.contains(OpenFlags::CREAT)
    }

    pub fn is_exclusive(self) -> bool {
        self.contains(OpenFlags::CREAT | OpenFlags::EXCL)
    }
}
