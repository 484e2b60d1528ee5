use crate::alloc::BITMAP_BITS;
use crate::error::{FsError, FsResult};
use crate::inode::DeviceId;

/// Geometry and policy of a formatted filesystem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsConfig {
    /// Device the root directory lives on.
    pub device: DeviceId,
    /// Inode numbers available on the device, including the reserved null
    /// inode 0.
    pub inode_count: u16,
    /// Live entries a single directory may hold, `.` and `..` included.
    pub max_entries: usize,
    /// Longest path accepted by path resolution, in bytes.
    pub max_path_len: usize,
    /// Whether uid 0 skips permission checks.
    pub superuser_bypass: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            device: 0,
            // Five blocks of sixteen 256 byte inodes.
            inode_count: 80,
            max_entries: 64,
            max_path_len: 255,
            superuser_bypass: true,
        }
    }
}

impl FsConfig {
    pub fn builder() -> FsConfigBuilder {
        FsConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct FsConfigBuilder {
    config: FsConfig,
}

impl FsConfigBuilder {
    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.config.device = device;
        self
    }

    /// Sets how many inode numbers the device provides. Number 0 is never
    /// handed out and number 1 is taken by the root directory.
    pub fn with_inode_count(mut self, count: u16) -> Self {
        self.config.inode_count = count;
        self
    }

    pub fn with_max_entries(mut self, entries: usize) -> Self {
        self.config.max_entries = entries;
        self
    }

    pub fn with_max_path_len(mut self, len: usize) -> Self {
        self.config.max_path_len = len;
        self
    }

    pub fn with_superuser_bypass(mut self, bypass: bool) -> Self {
        self.config.superuser_bypass = bypass;
        self
    }

    pub fn build(self) -> FsResult<FsConfig> {
        let config = self.config;
        if config.inode_count < 2 || config.inode_count as usize > BITMAP_BITS {
            return Err(FsError::InvalidArgument(format!(
                "inode count must be within 2..={}, got {}",
                BITMAP_BITS, config.inode_count
            )));
        }
        // Every directory needs room for its own "." and "..".
        if config.max_entries < 2 {
            return Err(FsError::InvalidArgument(format!(
                "directories need at least 2 entries, got {}",
                config.max_entries
            )));
        }
        if config.max_path_len == 0 {
            return Err(FsError::InvalidArgument(
                "maximum path length must be positive".to_string(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_cleanly() {
        let config = FsConfig::builder().build().unwrap();
        assert_eq!(config, FsConfig::default());
    }

    #[test]
    fn too_small_directories_are_rejected() {
        let result = FsConfig::builder().with_max_entries(1).build();
        assert!(matches!(result, Err(FsError::InvalidArgument(_))));
    }

    #[test]
    fn device_needs_room_for_the_root() {
        let result = FsConfig::builder().with_inode_count(1).build();
        assert!(matches!(result, Err(FsError::InvalidArgument(_))));
    }
}
