// SPDX-License-Identifier: GPL-3.0-only

//! Mount table persistence
//!
//! Lines are identified by mount point, which is unique in a sane
//! fstab. Comments and unrelated lines are preserved byte for byte.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use storage_types::{MountBy, MountEntry};
use tracing::{debug, warn};

use crate::commands::crypt_mapper_path;
use crate::error::{Result, SysError};

/// One parsed fstab line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabLine {
    pub spec: String,
    pub mount_point: String,
    pub fs_type: String,
    pub options: String,
    pub freq: u8,
    pub passno: u8,
}

impl FstabLine {
    /// `None` for blank lines, comments and lines with fewer than four fields
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }
        let mut fields = trimmed.split_whitespace();
        let spec = fields.next()?;
        let mount_point = fields.next()?;
        let fs_type = fields.next()?;
        let options = fields.next()?;
        let freq = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
        let passno = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
        Some(Self {
            spec: unescape(spec),
            mount_point: unescape(mount_point),
            fs_type: fs_type.to_string(),
            options: options.to_string(),
            freq,
            passno,
        })
    }

    pub fn from_entry(entry: &MountEntry, spec: String) -> Self {
        Self {
            spec,
            mount_point: entry.mount_point.clone(),
            fs_type: entry.fs_type.to_string(),
            options: entry.options.fstab_field(),
            freq: 0,
            passno: entry.passno(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "{:<40} {:<20} {:<8} {:<24} {} {}",
            escape(&self.spec),
            escape(&self.mount_point),
            self.fs_type,
            self.options,
            self.freq,
            self.passno
        )
    }
}

/// Whether `line` is the one `entry` is persisted as. Swap lines all
/// share the `swap` mount point and differ in their first column.
fn same_line(line: &FstabLine, entry: &MountEntry, spec: &str) -> bool {
    line.mount_point == entry.mount_point && (entry.mount_point != "swap" || line.spec == spec)
}

fn escape(field: &str) -> String {
    field.replace('\\', "\\134").replace(' ', "\\040").replace('\t', "\\011")
}

fn unescape(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\134", "\\")
}

/// Persisted mount configuration
pub trait MountTable: Send {
    fn entries(&self) -> Result<Vec<FstabLine>>;

    fn add(&mut self, entry: &MountEntry) -> Result<()>;

    /// Rewrite the line that `old` was persisted as
    fn update(&mut self, old: &MountEntry, new: &MountEntry) -> Result<()>;

    fn remove(&mut self, old: &MountEntry) -> Result<()>;
}

/// `/etc/fstab` (below an optional root prefix)
#[derive(Debug, Clone)]
pub struct FstabFile {
    path: PathBuf,
    root: PathBuf,
}

impl FstabFile {
    pub fn new(path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            root: root.into(),
        }
    }

    /// The running system's table
    pub fn system() -> Self {
        Self::new("/etc/fstab", "/")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_lines(&self, lines: &[String]) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = dir.join(".fstab.storage-engine.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            for line in lines {
                writeln!(file, "{line}")?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!("Wrote {} line(s) to {:?}", lines.len(), self.path);
        Ok(())
    }

    fn position(&self, lines: &[String], entry: &MountEntry) -> Option<usize> {
        let spec = self.spec_for(entry);
        lines.iter().position(|line| {
            FstabLine::parse(line).is_some_and(|parsed| same_line(&parsed, entry, &spec))
        })
    }

    /// First column for `entry`. Falls back to the device path when the
    /// uuid or label is not known yet and cannot be found under
    /// `/dev/disk`.
    fn spec_for(&self, entry: &MountEntry) -> String {
        if entry.encrypted && entry.mount_by == MountBy::Device {
            return crypt_mapper_path(&entry.device);
        }
        if let Some(spec) = entry.spec() {
            return spec;
        }
        let (dir, prefix) = match entry.mount_by {
            MountBy::Uuid => ("dev/disk/by-uuid", "UUID"),
            MountBy::Label => ("dev/disk/by-label", "LABEL"),
            MountBy::Device => return entry.device.clone(),
        };
        match self.lookup_link(dir, &entry.device) {
            Some(name) => format!("{prefix}={name}"),
            None => {
                warn!(
                    "No {} link for {}; persisting the device path",
                    prefix, entry.device
                );
                entry.device.clone()
            }
        }
    }

    fn lookup_link(&self, dir: &str, device: &str) -> Option<String> {
        let device = self.root.join(device.trim_start_matches('/'));
        let device = fs::canonicalize(&device).unwrap_or(device);
        fs::read_dir(self.root.join(dir))
            .ok()?
            .filter_map(|entry| entry.ok())
            .find(|entry| fs::canonicalize(entry.path()).is_ok_and(|target| target == device))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
    }
}

impl MountTable for FstabFile {
    fn entries(&self) -> Result<Vec<FstabLine>> {
        Ok(self
            .read_lines()?
            .iter()
            .filter_map(|line| FstabLine::parse(line))
            .collect())
    }

    fn add(&mut self, entry: &MountEntry) -> Result<()> {
        let mut lines = self.read_lines()?;
        if self.position(&lines, entry).is_some() {
            return Err(SysError::EntryExists {
                path: self.path.clone(),
                mount_point: entry.mount_point.clone(),
            });
        }
        lines.push(FstabLine::from_entry(entry, self.spec_for(entry)).render());
        self.write_lines(&lines)
    }

    fn update(&mut self, old: &MountEntry, new: &MountEntry) -> Result<()> {
        let mut lines = self.read_lines()?;
        let index = self
            .position(&lines, old)
            .ok_or_else(|| SysError::EntryNotFound {
                path: self.path.clone(),
                mount_point: old.mount_point.clone(),
            })?;
        if new.mount_point != old.mount_point && self.position(&lines, new).is_some() {
            return Err(SysError::EntryExists {
                path: self.path.clone(),
                mount_point: new.mount_point.clone(),
            });
        }
        lines[index] = FstabLine::from_entry(new, self.spec_for(new)).render();
        self.write_lines(&lines)
    }

    fn remove(&mut self, old: &MountEntry) -> Result<()> {
        let mut lines = self.read_lines()?;
        let index = self
            .position(&lines, old)
            .ok_or_else(|| SysError::EntryNotFound {
                path: self.path.clone(),
                mount_point: old.mount_point.clone(),
            })?;
        lines.remove(index);
        self.write_lines(&lines)
    }
}

/// Mount table kept in memory. Clones share the same lines, so a caller
/// can inspect what a boxed copy wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryMountTable {
    lines: Arc<Mutex<Vec<FstabLine>>>,
}

impl MemoryMountTable {
    pub fn new(lines: Vec<FstabLine>) -> Self {
        Self {
            lines: Arc::new(Mutex::new(lines)),
        }
    }

    /// Seed with the entries `entries` were persisted as
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a MountEntry>) -> Self {
        Self::new(
            entries
                .into_iter()
                .map(|entry| {
                    let spec = entry.spec().unwrap_or_else(|| entry.device.clone());
                    FstabLine::from_entry(entry, spec)
                })
                .collect(),
        )
    }

    pub fn lines(&self) -> Vec<FstabLine> {
        self.lock().map(|lines| lines.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<FstabLine>>> {
        self.lines
            .lock()
            .map_err(|e| SysError::OperationFailed(format!("mount table lock poisoned: {e}")))
    }

    fn path(&self) -> PathBuf {
        PathBuf::from("<memory>")
    }

    fn position(lines: &[FstabLine], entry: &MountEntry) -> Option<usize> {
        let spec = entry.spec().unwrap_or_else(|| entry.device.clone());
        lines.iter().position(|l| same_line(l, entry, &spec))
    }
}

impl MountTable for MemoryMountTable {
    fn entries(&self) -> Result<Vec<FstabLine>> {
        Ok(self.lock()?.clone())
    }

    fn add(&mut self, entry: &MountEntry) -> Result<()> {
        let path = self.path();
        let mut lines = self.lock()?;
        if Self::position(&lines, entry).is_some() {
            return Err(SysError::EntryExists {
                path,
                mount_point: entry.mount_point.clone(),
            });
        }
        let spec = entry.spec().unwrap_or_else(|| entry.device.clone());
        debug!("memory fstab: add {}", entry.mount_point);
        lines.push(FstabLine::from_entry(entry, spec));
        Ok(())
    }

    fn update(&mut self, old: &MountEntry, new: &MountEntry) -> Result<()> {
        let path = self.path();
        let mut lines = self.lock()?;
        let index = Self::position(&lines, old).ok_or_else(|| SysError::EntryNotFound {
            path: path.clone(),
            mount_point: old.mount_point.clone(),
        })?;
        if new.mount_point != old.mount_point && Self::position(&lines, new).is_some() {
            return Err(SysError::EntryExists {
                path,
                mount_point: new.mount_point.clone(),
            });
        }
        let spec = new.spec().unwrap_or_else(|| new.device.clone());
        debug!("memory fstab: update {} -> {}", old.mount_point, new.mount_point);
        lines[index] = FstabLine::from_entry(new, spec);
        Ok(())
    }

    fn remove(&mut self, old: &MountEntry) -> Result<()> {
        let path = self.path();
        let mut lines = self.lock()?;
        let index = Self::position(&lines, old).ok_or_else(|| SysError::EntryNotFound {
            path,
            mount_point: old.mount_point.clone(),
        })?;
        debug!("memory fstab: remove {}", old.mount_point);
        lines.remove(index);
        Ok(())
    }
}
