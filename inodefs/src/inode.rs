//! In-core inode table.
//!
//! Every allocated inode lives in the table for as long as a directory entry
//! names it or a caller holds a handle to it. Handles are the only way to
//! touch an inode:
//!
//! * [`Inode`] is a counted reference. Cloning it takes another reference,
//!   dropping it gives one back.
//! * [`LockedInode`] is a counted reference that also holds the inode's
//!   exclusive lock and derefs to its [`InodeData`].
//!
//! When the last reference to an inode with no links goes away its number is
//! returned to the device's allocation bitmap.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use crate::alloc::{Bitmap, NextAvailableAllocation, State};
use crate::dir::DirEntry;
use crate::error::{FsError, FsResult, Resource};
use crate::mode;
use crate::perm::Credentials;

pub type DeviceId = u16;
pub type InodeNumber = u16;

/// Never handed out; marks a free directory entry slot.
pub const INODE_NULL: InodeNumber = 0;
/// The root directory of every device.
pub const ROOT_INODE: InodeNumber = 1;

/// Lock-protected state of an inode.
pub struct InodeData {
    dev: DeviceId,
    num: InodeNumber,
    mode: u16,
    uid: u16,
    gid: u16,
    /// Number of directory entries naming this inode.
    pub(crate) nlinks: u16,
    /// Entry slots, only used by directories.
    pub(crate) entries: Vec<DirEntry>,
}

impl InodeData {
    fn new(dev: DeviceId, num: InodeNumber) -> Self {
        Self {
            dev,
            num,
            mode: 0,
            uid: 0,
            gid: 0,
            nlinks: 0,
            entries: Vec::new(),
        }
    }

    /// Rebuilds the state of a linked inode read back from an image.
    pub(crate) fn restore(
        dev: DeviceId,
        num: InodeNumber,
        mode: u16,
        owner: Credentials,
        nlinks: u16,
        entries: Vec<DirEntry>,
    ) -> Self {
        Self {
            dev,
            num,
            mode,
            uid: owner.uid,
            gid: owner.gid,
            nlinks,
            entries,
        }
    }

    pub fn device(&self) -> DeviceId {
        self.dev
    }

    pub fn number(&self) -> InodeNumber {
        self.num
    }

    pub fn mode(&self) -> u16 {
        self.mode
    }

    pub fn uid(&self) -> u16 {
        self.uid
    }

    pub fn gid(&self) -> u16 {
        self.gid
    }

    pub fn nlinks(&self) -> u16 {
        self.nlinks
    }

    pub fn is_dir(&self) -> bool {
        mode::is_dir(self.mode)
    }

    /// Gives a freshly allocated inode its mode and owner. The type bits of an
    /// inode are written exactly once.
    pub(crate) fn initialize(&mut self, mode: u16, owner: &Credentials) {
        debug_assert_eq!(
            mode::file_type(self.mode),
            0,
            "inode {} initialized twice",
            self.num
        );
        self.mode = mode;
        self.uid = owner.uid;
        self.gid = owner.gid;
    }
}

/// Point-in-time copy of an inode's attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stat {
    pub dev: DeviceId,
    pub ino: InodeNumber,
    pub mode: u16,
    pub uid: u16,
    pub gid: u16,
    pub nlinks: u16,
    pub refs: u32,
}

struct MemInode {
    dev: DeviceId,
    num: InodeNumber,
    /// Outstanding handles. Only changed with the table lock held.
    refs: AtomicU32,
    data: Arc<Mutex<InodeData>>,
}

impl MemInode {
    fn new(data: InodeData, refs: u32) -> Self {
        Self {
            dev: data.dev,
            num: data.num,
            refs: AtomicU32::new(refs),
            data: Arc::new(Mutex::new(data)),
        }
    }
}

struct DeviceInodes {
    /// Inode numbers `0..capacity` exist on this device.
    capacity: u16,
    map: Bitmap,
    nodes: BTreeMap<InodeNumber, Arc<MemInode>>,
}

struct TableInner {
    devices: Mutex<BTreeMap<DeviceId, DeviceInodes>>,
}

impl TableInner {
    /// Hands back one reference. The caller must not hold the inode's lock.
    fn put(&self, node: &MemInode) {
        let mut devices = self.devices.lock();
        let prev = node.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "inode {} released too often", node.num);
        if prev != 1 {
            return;
        }

        // No handle is left, so nobody holds or waits for this lock.
        let unlinked = node.data.lock().nlinks == 0;
        if !unlinked {
            return;
        }
        if let Some(device) = devices.get_mut(&node.dev) {
            device.nodes.remove(&node.num);
            device.map.set_free(node.num as usize);
            debug!("freed inode {} on device {}", node.num, node.dev);
        }
    }
}

/// The inode manager: allocation, counted retrieval, locking and release.
#[derive(Clone)]
pub struct InodeTable {
    inner: Arc<TableInner>,
}

impl InodeTable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TableInner {
                devices: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Registers a device providing inode numbers `1..capacity`.
    pub fn add_device(&self, dev: DeviceId, capacity: u16) -> FsResult<()> {
        let mut devices = self.inner.devices.lock();
        if devices.contains_key(&dev) {
            return Err(FsError::InvalidArgument(format!(
                "device {} is already registered",
                dev
            )));
        }
        let mut map = Bitmap::new();
        map.set_reserved(INODE_NULL as usize);
        devices.insert(
            dev,
            DeviceInodes {
                capacity,
                map,
                nodes: BTreeMap::new(),
            },
        );
        info!("registered device {} with {} inodes", dev, capacity);
        Ok(())
    }

    /// Reserves the lowest free inode on `dev`. The inode comes back locked,
    /// with one reference held by the caller and mode 0.
    pub fn allocate(&self, dev: DeviceId) -> FsResult<LockedInode> {
        let node = {
            let mut devices = self.inner.devices.lock();
            let device = devices.get_mut(&dev).ok_or(FsError::NoSuchDevice(dev))?;
            let num = NextAvailableAllocation::new(&device.map, 1, Some(device.capacity as usize))
                .next()
                .ok_or(FsError::ResourceExhausted(Resource::Inodes))?;
            device.map.set_reserved(num);

            let num = num as InodeNumber;
            let node = Arc::new(MemInode::new(InodeData::new(dev, num), 1));
            device.nodes.insert(num, Arc::clone(&node));
            node
        };
        debug!("allocated inode {} on device {}", node.num, dev);

        Ok(self.handle(node).lock())
    }

    /// Takes a reference to inode `num` on `dev` and waits for its lock.
    pub fn retrieve(&self, dev: DeviceId, num: InodeNumber) -> FsResult<LockedInode> {
        let node = {
            let devices = self.inner.devices.lock();
            let device = devices.get(&dev).ok_or(FsError::NoSuchDevice(dev))?;
            let node = device.nodes.get(&num).ok_or(FsError::NoSuchEntry)?;
            node.refs.fetch_add(1, Ordering::AcqRel);
            Arc::clone(node)
        };

        // The table lock is gone before blocking on the inode.
        Ok(self.handle(node).lock())
    }

    /// Gives up the caller's reference. Works on locked and unlocked handles.
    pub fn release<H: Into<Inode>>(&self, inode: H) {
        drop(inode.into());
    }

    /// Drops the exclusive lock and keeps the reference.
    pub fn unlock(&self, inode: LockedInode) -> Inode {
        inode.unlock()
    }

    pub fn free_count(&self, dev: DeviceId) -> FsResult<usize> {
        let devices = self.inner.devices.lock();
        let device = devices.get(&dev).ok_or(FsError::NoSuchDevice(dev))?;
        Ok(device.map.count_free(device.capacity as usize))
    }

    pub fn is_allocated(&self, dev: DeviceId, num: InodeNumber) -> bool {
        let devices = self.inner.devices.lock();
        devices
            .get(&dev)
            .map(|device| num < device.capacity && device.map.get(num as usize) == State::Used)
            .unwrap_or(false)
    }

    /// Current reference count of an in-core inode.
    pub fn ref_count(&self, dev: DeviceId, num: InodeNumber) -> Option<u32> {
        let devices = self.inner.devices.lock();
        devices
            .get(&dev)
            .and_then(|device| device.nodes.get(&num))
            .map(|node| node.refs.load(Ordering::Acquire))
    }

    pub fn capacity(&self, dev: DeviceId) -> FsResult<u16> {
        let devices = self.inner.devices.lock();
        devices
            .get(&dev)
            .map(|device| device.capacity)
            .ok_or(FsError::NoSuchDevice(dev))
    }

    /// Numbers of every inode currently allocated on `dev`, in order.
    pub fn allocated(&self, dev: DeviceId) -> FsResult<Vec<InodeNumber>> {
        let devices = self.inner.devices.lock();
        let device = devices.get(&dev).ok_or(FsError::NoSuchDevice(dev))?;
        Ok(device.nodes.keys().copied().collect())
    }

    /// Installs a linked inode read back from an image. No reference is taken.
    pub(crate) fn install(&self, data: InodeData) -> FsResult<()> {
        let mut devices = self.inner.devices.lock();
        let dev = data.dev;
        let num = data.num;
        let device = devices.get_mut(&dev).ok_or(FsError::NoSuchDevice(dev))?;
        if num == INODE_NULL || num >= device.capacity {
            return Err(FsError::CorruptImage(format!(
                "inode {} outside device {} capacity {}",
                num, dev, device.capacity
            )));
        }
        if device.map.get(num as usize) == State::Used {
            return Err(FsError::CorruptImage(format!("inode {} stored twice", num)));
        }
        device.map.set_reserved(num as usize);
        device.nodes.insert(num, Arc::new(MemInode::new(data, 0)));
        Ok(())
    }

    fn handle(&self, node: Arc<MemInode>) -> Inode {
        Inode {
            table: Arc::clone(&self.inner),
            node,
        }
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A counted, unlocked reference to an inode.
pub struct Inode {
    table: Arc<TableInner>,
    node: Arc<MemInode>,
}

impl Inode {
    pub fn device(&self) -> DeviceId {
        self.node.dev
    }

    pub fn number(&self) -> InodeNumber {
        self.node.num
    }

    /// Waits for the inode's exclusive lock.
    pub fn lock(self) -> LockedInode {
        let guard = self.node.data.lock_arc();
        LockedInode { guard, inode: self }
    }

    pub fn stat(&self) -> Stat {
        let data = self.node.data.lock();
        Stat {
            dev: data.dev,
            ino: data.num,
            mode: data.mode,
            uid: data.uid,
            gid: data.gid,
            nlinks: data.nlinks,
            refs: self.node.refs.load(Ordering::Acquire),
        }
    }

    pub fn mode(&self) -> u16 {
        self.node.data.lock().mode
    }

    pub fn is_dir(&self) -> bool {
        mode::is_dir(self.mode())
    }

    pub fn release(self) {}
}

impl Clone for Inode {
    fn clone(&self) -> Self {
        let _devices = self.table.devices.lock();
        self.node.refs.fetch_add(1, Ordering::AcqRel);
        Self {
            table: Arc::clone(&self.table),
            node: Arc::clone(&self.node),
        }
    }
}

impl Drop for Inode {
    fn drop(&mut self) {
        self.table.put(&self.node);
    }
}

impl fmt::Debug for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("dev", &self.node.dev)
            .field("num", &self.node.num)
            .finish()
    }
}

/// A counted reference holding the inode's exclusive lock.
pub struct LockedInode {
    // Declared first so the lock is dropped before the reference.
    guard: ArcMutexGuard<RawMutex, InodeData>,
    inode: Inode,
}

impl LockedInode {
    pub fn unlock(self) -> Inode {
        let LockedInode { guard, inode } = self;
        drop(guard);
        inode
    }

    pub fn release(self) {}
}

impl From<LockedInode> for Inode {
    fn from(locked: LockedInode) -> Inode {
        locked.unlock()
    }
}

impl Deref for LockedInode {
    type Target = InodeData;

    fn deref(&self) -> &InodeData {
        &self.guard
    }
}

impl DerefMut for LockedInode {
    fn deref_mut(&mut self) -> &mut InodeData {
        &mut self.guard
    }
}

impl fmt::Debug for LockedInode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedInode")
            .field("dev", &self.inode.node.dev)
            .field("num", &self.inode.node.num)
            .finish()
    }
}
