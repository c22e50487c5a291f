//! Filesystem capability catalog
//!
//! Static per-filesystem table of supported operations (resize, label,
//! ...). Used by the planner to refuse requests a filesystem cannot honor.

mod catalog;

use serde::Deserialize;

use crate::volume::FsType;

pub use catalog::FS_CAPABILITIES;

/// Capabilities of one filesystem type.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct FsCapabilities {
    pub fs: FsType,
    pub is_extendable: bool,
    pub is_extendable_while_mounted: bool,
    pub is_reduceable: bool,
    pub is_reduceable_while_mounted: bool,
    pub supports_uuid: bool,
    pub supports_label: bool,
    pub label_while_mounted: bool,
    pub label_length: u32,
    pub minimal_fs_size_k: u64,
    /// The resize tool operates on a mounted filesystem only
    #[serde(default)]
    pub resize_needs_mount: bool,
}

impl FsCapabilities {
    /// Look up the catalog entry for `fs`.
    pub fn for_fs(fs: FsType) -> Option<FsCapabilities> {
        FS_CAPABILITIES.iter().find(|caps| caps.fs == fs).copied()
    }

    /// Whether a resize in the given direction is possible in the given
    /// mount state.
    pub fn can_resize(&self, grow: bool, mounted: bool) -> bool {
        let (offline, online) = if grow {
            (self.is_extendable, self.is_extendable_while_mounted)
        } else {
            (self.is_reduceable, self.is_reduceable_while_mounted)
        };
        if mounted {
            online
        } else {
            offline && !self.resize_needs_mount
        }
    }

    pub fn can_label(&self, mounted: bool) -> bool {
        self.supports_label && (!mounted || self.label_while_mounted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_covers_every_real_filesystem() {
        for fs in FsType::ALL {
            let caps = FsCapabilities::for_fs(fs);
            assert_eq!(caps.is_some(), fs.has_filesystem(), "{fs}");
        }
    }

    #[test]
    fn xfs_cannot_shrink_and_grows_online_only() {
        let xfs = FsCapabilities::for_fs(FsType::Xfs).expect("xfs entry");
        assert!(!xfs.can_resize(false, false));
        assert!(!xfs.can_resize(true, false));
        assert!(xfs.can_resize(true, true));
    }

    #[test]
    fn vfat_label_rules() {
        let vfat = FsCapabilities::for_fs(FsType::Vfat).expect("vfat entry");
        assert_eq!(vfat.label_length, 11);
        assert!(vfat.can_label(false));
        assert!(!vfat.can_label(true));
        assert!(!vfat.supports_uuid);
    }
}
