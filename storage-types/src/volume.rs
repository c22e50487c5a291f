//! Attributes shared by every formattable, mountable volume
//!
//! Partitions and LVM logical volumes carry the same filesystem, mount and
//! encryption attributes; both embed a [`Volume`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::fstab::{FstabOptions, MountEntry};

/// Filesystem types known to the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsType {
    #[default]
    Unknown,
    Reiserfs,
    Ext2,
    Ext3,
    Ext4,
    Btrfs,
    Vfat,
    Xfs,
    Jfs,
    Ntfs,
    Swap,
    /// No filesystem at all (raw volume, LVM member, ...)
    None,
}

impl FsType {
    pub const ALL: [FsType; 12] = [
        FsType::Unknown,
        FsType::Reiserfs,
        FsType::Ext2,
        FsType::Ext3,
        FsType::Ext4,
        FsType::Btrfs,
        FsType::Vfat,
        FsType::Xfs,
        FsType::Jfs,
        FsType::Ntfs,
        FsType::Swap,
        FsType::None,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FsType::Unknown => "unknown",
            FsType::Reiserfs => "reiserfs",
            FsType::Ext2 => "ext2",
            FsType::Ext3 => "ext3",
            FsType::Ext4 => "ext4",
            FsType::Btrfs => "btrfs",
            FsType::Vfat => "vfat",
            FsType::Xfs => "xfs",
            FsType::Jfs => "jfs",
            FsType::Ntfs => "ntfs",
            FsType::Swap => "swap",
            FsType::None => "none",
        }
    }

    /// Whether data lives on the volume that a tool must preserve
    pub fn has_filesystem(self) -> bool {
        !matches!(self, FsType::Unknown | FsType::None)
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FsType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reiserfs" => Ok(FsType::Reiserfs),
            "ext2" => Ok(FsType::Ext2),
            "ext3" => Ok(FsType::Ext3),
            "ext4" => Ok(FsType::Ext4),
            "btrfs" => Ok(FsType::Btrfs),
            "vfat" | "fat" | "fat16" | "fat32" => Ok(FsType::Vfat),
            "xfs" => Ok(FsType::Xfs),
            "jfs" => Ok(FsType::Jfs),
            "ntfs" | "ntfs3" => Ok(FsType::Ntfs),
            "swap" => Ok(FsType::Swap),
            "" | "none" => Ok(FsType::None),
            "unknown" => Ok(FsType::Unknown),
            other => Err(format!("unknown filesystem type: {other}")),
        }
    }
}

/// How the mount table identifies a volume
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountBy {
    #[default]
    Device,
    Uuid,
    Label,
}

impl fmt::Display for MountBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MountBy::Device => "device",
            MountBy::Uuid => "uuid",
            MountBy::Label => "label",
        })
    }
}

/// Encryption applied underneath the filesystem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptType {
    #[default]
    None,
    Luks,
    Twofish,
    TwofishOld,
    Twofish256Old,
    Unknown,
}

impl EncryptType {
    pub fn is_encrypted(self) -> bool {
        !matches!(self, EncryptType::None)
    }

    /// Loop-based legacy ciphers hide the filesystem's UUID and label
    pub fn hides_identity(self) -> bool {
        matches!(
            self,
            EncryptType::Twofish
                | EncryptType::TwofishOld
                | EncryptType::Twofish256Old
                | EncryptType::Unknown
        )
    }
}

/// A credential that never appears in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// What currently consumes a volume as a building block
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "name")]
pub enum UsedBy {
    #[default]
    None,
    /// Physical volume of the named volume group
    Lvm(String),
}

impl UsedBy {
    pub fn is_used(&self) -> bool {
        !matches!(self, UsedBy::None)
    }
}

/// Filesystem, mount and encryption attributes of one volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Volume {
    /// Size in KiB
    pub size_k: u64,

    /// Filesystem the volume will carry after commit
    pub fs: FsType,

    /// Filesystem found by detection (or the last committed format)
    pub detected_fs: FsType,

    /// Whether the volume is going to be formatted with `fs`
    pub format: bool,

    pub label: Option<String>,

    pub uuid: Option<String>,

    /// Empty means "not in the mount table"
    pub mount_point: Option<String>,

    pub mount_by: MountBy,

    pub fstab_options: FstabOptions,

    pub encryption: EncryptType,

    #[serde(skip)]
    pub password: Option<Secret>,

    /// Currently mounted on the live system
    pub mounted: bool,

    pub used_by: UsedBy,

    /// Mount-table entry as last read from or written to the persisted file
    pub persisted: Option<MountEntry>,
}

impl Volume {
    /// Volume as produced by detection: what's on disk is what's planned.
    pub fn detected(size_k: u64, fs: FsType) -> Self {
        Self {
            size_k,
            fs,
            detected_fs: fs,
            ..Self::default()
        }
    }

    /// Filesystem used for capability checks: none while unformatted.
    pub fn effective_fs(&self) -> FsType {
        if self.format || self.detected_fs.has_filesystem() {
            self.fs
        } else {
            FsType::None
        }
    }

    /// The entry this volume should have in the mount table right now.
    pub fn desired_entry(&self, device: &str) -> Option<MountEntry> {
        let mount_point = self.mount_point.as_deref().filter(|mp| !mp.is_empty())?;
        Some(MountEntry {
            device: device.to_string(),
            mount_point: mount_point.to_string(),
            fs_type: self.fs,
            options: self.fstab_options.clone(),
            mount_by: self.mount_by,
            label: self.label.clone(),
            uuid: self.uuid.clone(),
            encrypted: self.encryption.is_encrypted(),
        })
    }

    /// Whether the mount-table entry differs from what is persisted.
    pub fn fstab_dirty(&self, device: &str) -> bool {
        self.desired_entry(device) != self.persisted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_redacted() {
        let secret = Secret::new("hunter22");
        assert_eq!(format!("{secret:?}"), "Secret(<redacted>)");
        assert_eq!(secret.to_string(), "<redacted>");
        assert_eq!(secret.expose(), "hunter22");
    }

    #[test]
    fn password_never_serialized() {
        let mut volume = Volume::detected(1024, FsType::Ext4);
        volume.password = Some(Secret::new("topsecret"));
        let json = serde_json::to_string(&volume).expect("serialize volume");
        assert!(!json.contains("topsecret"));
    }

    #[test]
    fn unformatted_volume_has_no_effective_fs() {
        let mut volume = Volume::detected(1024, FsType::None);
        volume.fs = FsType::Ext4;
        assert_eq!(volume.effective_fs(), FsType::None);
        volume.format = true;
        assert_eq!(volume.effective_fs(), FsType::Ext4);
    }

    #[test]
    fn fs_type_parses_aliases() {
        assert_eq!("fat32".parse::<FsType>(), Ok(FsType::Vfat));
        assert_eq!("EXT4".parse::<FsType>(), Ok(FsType::Ext4));
        assert!("zfs".parse::<FsType>().is_err());
    }
}
