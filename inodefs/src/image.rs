use std::convert::TryFrom;
use std::io::{Read, Write};
use std::mem::size_of;
use std::sync::Arc;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::alloc::{Bitmap, State, BITMAP_BYTES};
use crate::config::FsConfig;
use crate::dir::{self, DirEntry};
use crate::error::{FsError, FsResult};
use crate::fs::FileSystem;
use crate::inode::{InodeData, InodeNumber, InodeTable, INODE_NULL, ROOT_INODE};
use crate::mode;
use crate::perm::Credentials;

const IMAGE_MAGIC: u32 = 0x4946_5342; // IFSB

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy, Debug)]
struct ImageHeader {
    magic: u32,
    device: u16,
    inode_count: u16,
    /// Number of inode records following the bitmap.
    stored: u16,
    max_entries: u16,
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy, Debug)]
struct InodeRecord {
    num: InodeNumber,
    mode: u16,
    uid: u16,
    gid: u16,
    nlinks: u16,
    /// Number of directory entry records following this one.
    nentries: u16,
}

fn read_record<R: Read, T: FromBytes>(reader: &mut R, buf: &mut Vec<u8>) -> FsResult<T> {
    buf.resize(size_of::<T>(), 0);
    reader.read_exact(buf)?;
    T::read_from(&buf[..]).ok_or_else(|| FsError::CorruptImage("short record".to_string()))
}

impl FileSystem {
    /// Writes every linked inode of the device to `writer`.
    ///
    /// # Layout
    /// ==========================================================================
    /// | Header | Bitmap (inodes) | Inode record | Entries | Inode record | ... |
    /// ==========================================================================
    ///
    /// Records are written in host byte order. Each inode is locked while it is
    /// copied, so the caller must not hold any inode locked itself. Inodes that
    /// are still being created (no links yet) are left out.
    pub fn save<W: Write>(&self, mut writer: W) -> FsResult<()> {
        let dev = self.config.device;
        let mut map = Bitmap::new();
        map.set_reserved(INODE_NULL as usize);
        let mut records = Vec::new();

        for num in self.inodes.allocated(dev)? {
            let inode = match self.inodes.retrieve(dev, num) {
                Ok(inode) => inode,
                // Released and freed after the listing was taken.
                Err(FsError::NoSuchEntry) => continue,
                Err(err) => return Err(err),
            };
            if inode.nlinks() == 0 {
                continue;
            }
            let entries: Vec<DirEntry> = dir::entries(&inode).copied().collect();
            let record = InodeRecord {
                num,
                mode: inode.mode(),
                uid: inode.uid(),
                gid: inode.gid(),
                nlinks: inode.nlinks(),
                nentries: entries.len() as u16,
            };
            map.set_reserved(num as usize);
            records.push((record, entries));
        }

        let header = ImageHeader {
            magic: IMAGE_MAGIC,
            device: dev,
            inode_count: self.config.inode_count,
            stored: records.len() as u16,
            max_entries: u16::try_from(self.config.max_entries).map_err(|_| {
                FsError::InvalidArgument(format!(
                    "{} entries per directory do not fit an image",
                    self.config.max_entries
                ))
            })?,
        };
        writer.write_all(header.as_bytes())?;
        writer.write_all(map.serialize())?;
        for (record, entries) in records.iter() {
            writer.write_all(record.as_bytes())?;
            for entry in entries {
                writer.write_all(entry.serialize())?;
            }
        }
        writer.flush()?;

        info!("saved {} inodes of device {}", records.len(), dev);
        Ok(())
    }

    /// Reads an image written by [`FileSystem::save`]. Device geometry comes
    /// from the image; path limits and permission policy from `config`.
    pub fn load<R: Read>(mut reader: R, config: FsConfig) -> FsResult<Self> {
        let mut buf = Vec::new();
        let header: ImageHeader = read_record(&mut reader, &mut buf)?;
        if header.magic != IMAGE_MAGIC {
            return Err(FsError::CorruptImage(format!(
                "invalid magic {:#x}",
                header.magic
            )));
        }
        let config = FsConfig::builder()
            .with_device(header.device)
            .with_inode_count(header.inode_count)
            .with_max_entries(header.max_entries as usize)
            .with_max_path_len(config.max_path_len)
            .with_superuser_bypass(config.superuser_bypass)
            .build()
            .map_err(|err| FsError::CorruptImage(err.to_string()))?;

        buf.resize(BITMAP_BYTES, 0);
        reader.read_exact(&mut buf)?;
        let map = Bitmap::parse(&buf)
            .ok_or_else(|| FsError::CorruptImage("short inode bitmap".to_string()))?;

        let inodes = InodeTable::new();
        inodes.add_device(config.device, config.inode_count)?;
        let mut targets = Vec::new();
        for _ in 0..header.stored {
            let record: InodeRecord = read_record(&mut reader, &mut buf)?;
            if record.num == INODE_NULL || record.num >= config.inode_count {
                return Err(FsError::CorruptImage(format!(
                    "inode {} outside device capacity {}",
                    record.num, config.inode_count
                )));
            }
            if record.nentries as usize > config.max_entries {
                return Err(FsError::CorruptImage(format!(
                    "inode {} holds {} entries",
                    record.num, record.nentries
                )));
            }
            if map.get(record.num as usize) != State::Used {
                return Err(FsError::CorruptImage(format!(
                    "inode {} is not marked allocated",
                    record.num
                )));
            }

            let mut entries: Vec<DirEntry> = Vec::with_capacity(record.nentries as usize);
            for _ in 0..record.nentries {
                let entry: DirEntry = read_record(&mut reader, &mut buf)?;
                entry.validate().map_err(|err| {
                    FsError::CorruptImage(format!("inode {}: {}", record.num, err))
                })?;
                if entries.iter().any(|prev| prev.name_bytes() == entry.name_bytes()) {
                    return Err(FsError::CorruptImage(format!(
                        "inode {} holds {:?} twice",
                        record.num,
                        entry.name()
                    )));
                }
                targets.push(entry.ino());
                entries.push(entry);
            }

            inodes.install(InodeData::restore(
                config.device,
                record.num,
                record.mode,
                Credentials::new(record.uid, record.gid),
                record.nlinks,
                entries,
            ))?;
        }

        if let Some(missing) = targets
            .into_iter()
            .find(|&num| !inodes.is_allocated(config.device, num))
        {
            return Err(FsError::CorruptImage(format!(
                "entry names missing inode {}",
                missing
            )));
        }

        let fs = FileSystem {
            inodes,
            config: Arc::new(config),
        };
        let root = match fs.root() {
            Ok(root) => root,
            Err(FsError::NoSuchEntry) => {
                return Err(FsError::CorruptImage(format!(
                    "root inode {} is missing",
                    ROOT_INODE
                )))
            }
            Err(err) => return Err(err),
        };
        if !mode::is_dir(root.mode()) {
            return Err(FsError::CorruptImage(format!(
                "inode {} is not a directory",
                ROOT_INODE
            )));
        }
        drop(root);

        info!(
            "loaded {} inodes for device {}",
            header.stored, fs.config.device
        );
        Ok(fs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::OpenFlags;
    use crate::process::Process;
    use std::io::Cursor;

    fn sample_fs() -> FileSystem {
        let fs = FileSystem::format(FsConfig::default()).unwrap();
        let proc = Process::root();
        fs.mkdir(&proc, "/etc", 0).unwrap();
        fs.open(&proc, "/etc/motd", OpenFlags::CREAT, 0o644).unwrap();
        fs
    }

    #[test]
    fn header_and_records_have_fixed_sizes() {
        assert_eq!(size_of::<ImageHeader>(), 12);
        assert_eq!(size_of::<InodeRecord>(), 12);
    }

    #[test]
    fn saved_tree_loads_back() {
        let fs = sample_fs();
        let mut image = Vec::new();
        fs.save(&mut image).unwrap();

        let loaded = FileSystem::load(Cursor::new(image), FsConfig::default()).unwrap();
        let motd = loaded
            .open(&Process::root(), "/etc/motd", OpenFlags::RDONLY, 0)
            .unwrap();

        assert_eq!(motd.number(), 3);
        assert_eq!(motd.stat().nlinks, 1);
        assert_eq!(
            loaded.inodes().free_count(0).unwrap(),
            fs.inodes().free_count(0).unwrap()
        );
    }

    #[test]
    fn inodes_still_being_created_are_skipped() {
        let fs = sample_fs();
        let pending = fs.inodes().allocate(0).unwrap().unlock();
        let mut image = Vec::new();
        fs.save(&mut image).unwrap();
        drop(pending);

        let loaded = FileSystem::load(Cursor::new(image), FsConfig::default()).unwrap();
        assert!(!loaded.inodes().is_allocated(0, 4));
    }

    const RECORDS_START: usize = size_of::<ImageHeader>() + BITMAP_BYTES;

    fn saved_image() -> Vec<u8> {
        let mut image = Vec::new();
        sample_fs().save(&mut image).unwrap();
        image
    }

    fn rewrite_header<F: FnOnce(&mut ImageHeader)>(image: &mut [u8], change: F) {
        let len = size_of::<ImageHeader>();
        let mut header = ImageHeader::read_from(&image[..len]).unwrap();
        change(&mut header);
        image[..len].copy_from_slice(header.as_bytes());
    }

    /// Renames the first entry called `from`, wherever it is stored.
    fn rename_entry(image: &mut [u8], from: &str, to: &[u8]) {
        let entry = DirEntry::new(from, 0).unwrap();
        let name = &entry.serialize()[size_of::<InodeNumber>()..];
        let at = image[RECORDS_START..]
            .windows(name.len())
            .position(|window| window == name)
            .unwrap()
            + RECORDS_START;
        image[at..at + to.len()].copy_from_slice(to);
    }

    fn load(image: Vec<u8>) -> FsResult<FileSystem> {
        FileSystem::load(Cursor::new(image), FsConfig::default())
    }

    #[test]
    fn out_of_range_inode_number_is_corrupt() {
        for &num in &[INODE_NULL, 80, 40000] {
            let mut image = saved_image();
            let len = size_of::<InodeRecord>();
            let at = RECORDS_START;
            let mut record = InodeRecord::read_from(&image[at..at + len]).unwrap();
            record.num = num;
            image[at..at + len].copy_from_slice(record.as_bytes());

            assert!(matches!(load(image), Err(FsError::CorruptImage(_))));
        }
    }

    #[test]
    fn image_without_root_is_corrupt() {
        let mut image = saved_image();
        rewrite_header(&mut image, |header| header.stored = 0);
        image.truncate(RECORDS_START);

        assert!(matches!(load(image), Err(FsError::CorruptImage(_))));
    }

    #[test]
    fn entry_names_with_slashes_are_corrupt() {
        let mut image = saved_image();
        rename_entry(&mut image, "motd", b"mo/d");

        assert!(matches!(load(image), Err(FsError::CorruptImage(_))));
    }

    #[test]
    fn duplicate_entry_names_are_corrupt() {
        let fs = sample_fs();
        fs.open(&Process::root(), "/etc/issue", OpenFlags::CREAT, 0o644)
            .unwrap();
        let mut image = Vec::new();
        fs.save(&mut image).unwrap();
        rename_entry(&mut image, "issue", b"motd\0");

        assert!(matches!(load(image), Err(FsError::CorruptImage(_))));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut image = Vec::new();
        sample_fs().save(&mut image).unwrap();
        image[0] ^= 0xff;

        let result = FileSystem::load(Cursor::new(image), FsConfig::default());
        assert!(matches!(result, Err(FsError::CorruptImage(_))));
    }

    #[test]
    fn truncated_image_is_an_io_error() {
        let mut image = Vec::new();
        sample_fs().save(&mut image).unwrap();
        image.truncate(image.len() - 4);

        let result = FileSystem::load(Cursor::new(image), FsConfig::default());
        assert!(matches!(result, Err(FsError::InvalidImage(_))));
    }
}
