//! Common utility types shared across models

use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

/// A contiguous run of disk cylinders, `[start, start + len)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    /// First cylinder (0-based, inclusive)
    pub start: u64,

    /// Number of cylinders
    pub len: u64,
}

impl Region {
    pub fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    /// One past the last cylinder
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.len)
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check if the two regions share at least one cylinder
    pub fn overlaps(&self, other: &Region) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end() && other.start < self.end()
    }

    /// Check if `other` lies completely inside this region
    pub fn contains(&self, other: &Region) -> bool {
        other.start >= self.start && other.end() <= self.end()
    }

    /// Check if the region fits on a disk with `cylinders` cylinders
    pub fn fits_within(&self, cylinders: u64) -> bool {
        self.end() <= cylinders && self.start <= self.end()
    }

    /// Cylinders covered by `self` but not by `after` (used to find space
    /// released by a shrink).
    pub fn released_by(&self, after: &Region) -> Option<Region> {
        if after.end() < self.end() {
            let start = after.end().max(self.start);
            Some(Region::new(start, self.end() - start))
        } else {
            None
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end())
    }
}

/// Format utilities for converting between bytes and human-readable strings
/// Convert bytes to human-readable format (e.g., "1.50 GB")
pub fn bytes_to_pretty(bytes: &u64, add_bytes: bool) -> String {
    let mut steps = 0;
    let mut val: f64 = *bytes as f64;

    while val > 1024. && steps <= 8 {
        val /= 1024.;
        steps += 1;
    }

    let unit = match steps {
        0 => "B",
        1 => "KB",
        2 => "MB",
        3 => "GB",
        4 => "TB",
        5 => "PB",
        6 => "EB",
        7 => "ZB",
        8 => "YB",
        _ => "Not Supported",
    };

    if add_bytes {
        let bytes_str = bytes.to_formatted_string(&Locale::en);
        format!("{:.2} {} ({} bytes)", val, unit, bytes_str)
    } else {
        format!("{:.2} {}", val, unit)
    }
}

/// Same as [`bytes_to_pretty`] for a size given in KiB
pub fn kb_to_pretty(size_k: u64) -> String {
    bytes_to_pretty(&size_k.saturating_mul(1024), false)
}
