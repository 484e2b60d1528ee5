use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Size in bytes of one allocation bitmap.
pub const BITMAP_BYTES: usize = 4096;
/// Number of objects a single bitmap can track.
pub const BITMAP_BITS: usize = BITMAP_BYTES * 8;

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy)]
pub struct Bitmap {
    /// Stores 4096 bytes mapping each bit to one inode number on a device. A
    /// single bitmap supports tracking up to 4096 * 8 inodes.
    bitmap: [u64; BITMAP_BYTES / 8],
}

impl Bitmap {
    pub fn new() -> Self {
        Self {
            bitmap: [0; BITMAP_BYTES / 8],
        }
    }

    /// Reads a bitmap back from a buffer of exactly `BITMAP_BYTES` bytes.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        Self::read_from(buf)
    }

    pub fn serialize(&self) -> &[u8] {
        self.as_bytes()
    }

    pub fn get(&self, nr: usize) -> State {
        assert!(nr < BITMAP_BITS);
        // Grab the u64 containing the significant bit.
        let outer_offset = self.bitmap[nr / 64];

        let inner_offset = nr % 64;
        let mask = 0b01_u64 << inner_offset;
        match (outer_offset & mask) >> inner_offset {
            0 => State::Free,
            1 => State::Used,
            _ => unreachable!("bit state returned a non 0 or 1 value"),
        }
    }

    pub fn set_reserved(&mut self, nr: usize) {
        assert!(nr < BITMAP_BITS);
        self.bitmap[nr / 64] |= 0b01_u64 << (nr % 64);
    }

    pub fn set_free(&mut self, nr: usize) {
        assert!(nr < BITMAP_BITS);
        self.bitmap[nr / 64] &= !(0b01_u64 << (nr % 64));
    }

    /// Counts the free bits in `0..cap`.
    pub fn count_free(&self, cap: usize) -> usize {
        (0..cap.min(BITMAP_BITS))
            .filter(|&nr| self.get(nr) == State::Free)
            .count()
    }
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

/// Implements a naive allocation policy: hand out the lowest free number at or
/// after the starting marker, then keep scanning forward on each call.
pub struct NextAvailableAllocation<'a> {
    /// Keeps track of the next starting place for looking for free bits.
    marker: usize,
    bitmap: &'a Bitmap,
    /// The maximum allocatable value available on the device. For example, if
    /// a device holds 80 inodes this value would be 80.
    cap: usize,
}

impl<'a> NextAvailableAllocation<'a> {
    pub fn new(bitmap: &'a Bitmap, start: usize, cap: Option<usize>) -> Self {
        let cap = cap.unwrap_or(BITMAP_BITS).min(BITMAP_BITS);
        Self {
            marker: start,
            bitmap,
            cap,
        }
    }
}

impl<'a> Iterator for NextAvailableAllocation<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        for i in self.marker..self.cap {
            if let State::Free = self.bitmap.get(i) {
                self.marker = i + 1;
                return Some(i);
            }
        }
        self.marker = self.cap;
        None
    }
}
