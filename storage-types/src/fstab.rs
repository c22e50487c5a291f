//! Mount-table (fstab) entry and option set

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::volume::{FsType, MountBy};

/// Name of an fstab option: the part before `=` (`uid=500` -> `uid`).
pub fn option_name(token: &str) -> &str {
    token.split_once('=').map(|(name, _)| name).unwrap_or(token)
}

fn split_options(options: &str) -> impl Iterator<Item = &str> {
    options
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Compile an option pattern anchored at both ends. Patterns that are not
/// valid regular expressions match literally.
fn option_pattern(pattern: &str) -> Option<Regex> {
    Regex::new(&format!("^(?:{pattern})$"))
        .or_else(|_| Regex::new(&format!("^{}$", regex::escape(pattern))))
        .ok()
}

/// Ordered set of fstab options, unique per option name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FstabOptions(Vec<String>);

impl FstabOptions {
    /// Parse a comma separated option string. A later option replaces an
    /// earlier one of the same name.
    pub fn parse(options: &str) -> Self {
        let mut set = Self::default();
        set.add(options);
        set
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.iter().any(|t| t == token)
    }

    /// Add options, replacing any existing option with the same name in place.
    pub fn add(&mut self, options: &str) {
        for token in split_options(options) {
            let name = option_name(token);
            match self.0.iter_mut().find(|t| option_name(t) == name) {
                Some(existing) => *existing = token.to_string(),
                None => self.0.push(token.to_string()),
            }
        }
    }

    /// Remove every option matching one of the comma separated patterns.
    /// Returns the number of options removed.
    pub fn remove(&mut self, patterns: &str) -> usize {
        let patterns: Vec<Regex> = split_options(patterns).filter_map(option_pattern).collect();
        let before = self.0.len();
        self.0
            .retain(|token| !patterns.iter().any(|pattern| pattern.is_match(token)));
        before - self.0.len()
    }

    /// Replace the whole set.
    pub fn replace(&mut self, options: &str) {
        *self = Self::parse(options);
    }

    /// Value for the fourth fstab column
    pub fn fstab_field(&self) -> String {
        if self.0.is_empty() {
            "defaults".to_string()
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for FstabOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

/// One mount-table entry as the engine wants it persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    /// Kernel device path of the volume
    pub device: String,

    pub mount_point: String,

    pub fs_type: FsType,

    pub options: FstabOptions,

    pub mount_by: MountBy,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub uuid: Option<String>,

    #[serde(default)]
    pub encrypted: bool,
}

impl MountEntry {
    /// First fstab column, when it can be derived without probing the device
    pub fn spec(&self) -> Option<String> {
        match self.mount_by {
            MountBy::Device => Some(self.device.clone()),
            MountBy::Uuid => self.uuid.as_ref().map(|uuid| format!("UUID={uuid}")),
            MountBy::Label => self.label.as_ref().map(|label| format!("LABEL={label}")),
        }
    }

    /// fsck pass number: root first, swap and non-checkable filesystems never
    pub fn passno(&self) -> u8 {
        match self.fs_type {
            FsType::Swap | FsType::Vfat | FsType::Ntfs | FsType::Xfs | FsType::Btrfs => 0,
            _ if self.mount_point == "/" => 1,
            _ => 2,
        }
    }
}
