// SPDX-License-Identifier: GPL-3.0-only

//! Commit engine
//!
//! Runs the pending actions in dependency order through a [`ToolRunner`]
//! and a [`MountTable`]. Each successful action is settled into the
//! committed model right away. The first failure stops the commit:
//! completed actions stay committed, the failed action and everything
//! waiting on it are dropped, and the rest stays queued.

mod progress;

use std::collections::{BTreeSet, HashSet};

use chrono::Utc;
use storage_contracts::{
    ActionRecord, CommitId, CommitReport, ContainerError, Diagnostic, DiskError, FstabError,
    LvmError, PartialCommit, StorageError, StorageResult, VolumeError,
};
use storage_sys::commands;
use storage_sys::{MountTable, SysError, ToolCommand, ToolOutput, ToolRunner};
use storage_types::{DeviceModel, MountEntry, PartitionType, Volume, ids};
use tracing::{error, info, warn};

use crate::action::{Action, ActionKind, PendingAction};
use crate::planner::{Schedule, Staging};

pub use progress::ProgressSink;

/// Why a step failed, plus the tool output explaining it
#[derive(Debug)]
struct StepFailure {
    cause: StorageError,
    detail: Option<String>,
}

impl StepFailure {
    fn new(cause: impl Into<StorageError>) -> Self {
        Self {
            cause: cause.into(),
            detail: None,
        }
    }

    fn with_output(cause: StorageError, output: &ToolOutput) -> Self {
        let detail = [output.stderr_text(), output.stdout_text()]
            .into_iter()
            .find(|text| !text.trim().is_empty());
        Self { cause, detail }
    }

    fn diagnostic(&self) -> String {
        self.detail
            .clone()
            .unwrap_or_else(|| self.cause.to_string())
    }
}

impl From<StorageError> for StepFailure {
    fn from(cause: StorageError) -> Self {
        Self::new(cause)
    }
}

type Step = Result<(), StepFailure>;

fn table_failure(e: SysError, missing: FstabError) -> StepFailure {
    let code = match &e {
        SysError::EntryExists { .. } => FstabError::AddEntryFound,
        SysError::EntryNotFound { .. } => missing,
        _ => FstabError::WriteFailed,
    };
    StepFailure {
        cause: code.into(),
        detail: Some(e.to_string()),
    }
}

fn lost(what: &str) -> StepFailure {
    warn!("Committed model has no {}", what);
    StepFailure::new(ContainerError::InternalError)
}

pub struct Committer<'a> {
    runner: &'a mut dyn ToolRunner,
    table: &'a mut dyn MountTable,
    sink: ProgressSink<'a>,
    min_password_len: usize,
    /// Devices whose format has not run yet in this commit
    unformatted: HashSet<String>,
}

impl<'a> Committer<'a> {
    pub fn new(
        runner: &'a mut dyn ToolRunner,
        table: &'a mut dyn MountTable,
        sink: ProgressSink<'a>,
        min_password_len: usize,
    ) -> Self {
        Self {
            runner,
            table,
            sink,
            min_password_len,
            unformatted: HashSet::new(),
        }
    }

    /// Execute every pending action of `staging`.
    pub fn commit(&mut self, staging: &mut Staging) -> StorageResult<CommitReport> {
        if !staging.has_pending() {
            return Err(DiskError::CommitNothingTodo.into());
        }
        staging.finalize(self.min_password_len)?;
        let schedule = staging.schedule()?;

        let commit_id = CommitId::new();
        let started_at = Utc::now();
        info!(
            "Commit {} started with {} action(s)",
            commit_id,
            staging.pending.len()
        );

        let actions = std::mem::take(&mut staging.pending);
        self.unformatted = actions
            .iter()
            .filter(|p| p.action.kind() == ActionKind::Format)
            .filter_map(|p| p.action.device().map(str::to_string))
            .collect();

        let mut committed = Vec::with_capacity(actions.len());
        for (position, &index) in schedule.order.iter().enumerate() {
            let pending = &actions[index];
            info!("Committing {}", pending);
            self.sink.install_info(&pending.action.describe());
            self.sink.progress(0);

            let outcome = self
                .execute(&pending.action, &staging.committed)
                .and_then(|()| Ok(pending.action.settle(&mut staging.committed)?));
            match outcome {
                Ok(()) => {
                    if let Some(device) = pending.action.device()
                        && pending.action.kind() == ActionKind::Format
                    {
                        self.unformatted.remove(device);
                    }
                    committed.push(pending.record());
                    self.sink.progress(100);
                }
                Err(failure) => {
                    let partial =
                        self.stop(staging, actions, &schedule, position, committed, failure);
                    return Err(partial.into());
                }
            }
        }

        staging.staged = staging.committed.clone();
        let finished_at = Utc::now();
        info!(
            "Commit {} finished, {} action(s) in {} ms",
            commit_id,
            committed.len(),
            (finished_at - started_at).num_milliseconds()
        );
        Ok(CommitReport {
            commit_id,
            started_at,
            finished_at,
            committed,
        })
    }

    /// Split the queue after the action at `position` failed.
    fn stop(
        &mut self,
        staging: &mut Staging,
        actions: Vec<PendingAction>,
        schedule: &Schedule,
        position: usize,
        committed: Vec<ActionRecord>,
        failure: StepFailure,
    ) -> PartialCommit {
        let failed_index = schedule.order[position];
        let failed = actions[failed_index].record();
        let diagnostic = failure.diagnostic();
        error!("{} failed: {}", failed, failure.cause);
        self.sink.diagnostic(&Diagnostic::fatal(diagnostic.clone()));

        let done: BTreeSet<usize> = schedule.order[..position].iter().copied().collect();
        let waiting = schedule.dependents_of(failed_index);
        let mut dropped = Vec::new();
        let mut remaining = Vec::new();
        for (index, pending) in actions.into_iter().enumerate() {
            if index == failed_index || done.contains(&index) {
                continue;
            }
            if waiting.contains(&index) {
                warn!("Dropping {}, it depends on {}", pending, failed);
                dropped.push(pending.record());
            } else {
                remaining.push(pending);
            }
        }

        staging.pending = remaining;
        if let Err(e) = staging.rebuild() {
            warn!("Remaining actions no longer apply ({}), discarding them", e);
            dropped.extend(staging.pending.drain(..).map(|pending| pending.record()));
            staging.staged = staging.committed.clone();
        }

        PartialCommit {
            committed,
            failed,
            dropped,
            remaining: staging.pending.len(),
            cause: failure.cause,
            diagnostic,
        }
    }

    /// Run `command`; a non-zero exit fails with `code`.
    fn run(&mut self, command: &ToolCommand, code: impl Into<StorageError>) -> Step {
        let code = code.into();
        info!("Running {}", command);
        let sink = &mut self.sink;
        let output = self
            .runner
            .run(command, &mut |event| sink.event(event))
            .map_err(|e| {
                warn!("{} could not be run: {}", command.program, e);
                StepFailure {
                    cause: code.clone(),
                    detail: Some(e.to_string()),
                }
            })?;
        if !output.success() {
            warn!("{} exited with status {}", command.program, output.status);
            return Err(StepFailure::with_output(code, &output));
        }
        Ok(())
    }

    fn execute(&mut self, action: &Action, model: &DeviceModel) -> Step {
        match action {
            Action::CreatePartition {
                disk,
                number,
                kind,
                region,
                id,
                ..
            } => {
                self.run(
                    &commands::mkpart(disk, *kind, region),
                    DiskError::CreatePartitionPartedFailed,
                )?;
                if *kind != PartitionType::Extended && *id != ids::LINUX {
                    let label = model.disk(disk).map(|d| d.label).ok_or_else(|| lost(disk))?;
                    self.run(
                        &commands::set_partition_id(disk, label, *number, *id),
                        DiskError::SetTypePartedFailed,
                    )?;
                }
                Ok(())
            }
            Action::RemovePartition {
                disk,
                device,
                number,
                ..
            } => {
                self.release(device, model)?;
                self.run(
                    &commands::rmpart(disk, *number),
                    DiskError::RemovePartitionPartedFailed,
                )
            }
            Action::ResizePartition {
                disk,
                device,
                number,
                from,
                to,
                size_k,
                ..
            } => {
                let volume = model.volume(device).ok_or_else(|| lost(device))?;
                let keep_fs = self.keeps_filesystem(device, volume);
                let shrink = to.len < from.len;
                if keep_fs && shrink {
                    self.resize_fs(device, volume, *size_k)?;
                }
                self.run(
                    &commands::resizepart(disk, *number, to),
                    DiskError::ResizePartitionPartedFailed,
                )?;
                if keep_fs && !shrink {
                    self.resize_fs(device, volume, *size_k)?;
                }
                Ok(())
            }
            Action::ChangePartitionId {
                disk, number, id, ..
            } => {
                let label = model.disk(disk).map(|d| d.label).ok_or_else(|| lost(disk))?;
                self.run(
                    &commands::set_partition_id(disk, label, *number, *id),
                    DiskError::SetTypePartedFailed,
                )
            }
            Action::DestroyPartitionTable { disk, label } => {
                let devices: Vec<String> = model
                    .disk(disk)
                    .map(|d| d.partitions.iter().map(|p| p.device.clone()).collect())
                    .unwrap_or_default();
                for device in &devices {
                    self.release(device, model)?;
                }
                self.run(
                    &commands::mklabel(disk, *label),
                    DiskError::SetLabelPartedFailed,
                )
            }
            Action::Format {
                device,
                fs,
                label,
                encryption,
                password,
            } => {
                let volume = model.volume(device).ok_or_else(|| lost(device))?;
                if volume.mounted {
                    self.run(&commands::umount(device), VolumeError::UmountFailed)?;
                }
                self.run(
                    &commands::wipe_signatures(device),
                    VolumeError::FormatDdFailed,
                )?;

                if !encryption.is_encrypted() {
                    let mkfs = commands::mkfs(*fs, device, label.as_deref())
                        .ok_or_else(|| StepFailure::new(VolumeError::FormatUnknownFs))?;
                    return self.run(&mkfs, VolumeError::FormatFailed);
                }

                let password = password
                    .as_ref()
                    .ok_or_else(|| StepFailure::new(VolumeError::CryptNoPwd))?;
                self.run(
                    &commands::luks_format(device, password),
                    VolumeError::CryptsetupFailed,
                )?;
                self.run(
                    &commands::luks_open(device, password),
                    VolumeError::CryptsetupFailed,
                )?;
                let mapper = commands::crypt_mapper_path(device);
                let made = match commands::mkfs(*fs, &mapper, label.as_deref()) {
                    Some(mkfs) => self.run(&mkfs, VolumeError::FormatFailed),
                    None => Err(StepFailure::new(VolumeError::FormatUnknownFs)),
                };
                let closed = self.run(&commands::luks_close(device), VolumeError::CryptsetupFailed);
                made.and(closed)
            }
            Action::SetLabel { device, fs, label } => {
                let command = commands::set_label(*fs, device, label.as_deref().unwrap_or(""))
                    .ok_or_else(|| StepFailure::new(VolumeError::MklabelFsUnable))?;
                self.run(&command, VolumeError::MklabelFailed)
            }
            Action::MountTable {
                device,
                mount_point,
                mount_by,
                options,
            } => {
                let volume = model.volume(device).ok_or_else(|| lost(device))?;
                let mut planned = volume.clone();
                planned.mount_point = mount_point.clone();
                planned.mount_by = *mount_by;
                planned.fstab_options = options.clone();
                self.write_entry(volume.persisted.as_ref(), planned.desired_entry(device).as_ref())
            }
            Action::CreateVg {
                name,
                pe_size_k,
                lvm1,
                devices,
            } => {
                for device in devices {
                    self.run(&commands::pvcreate(device), LvmError::CreatePvFailed)?;
                }
                self.run(
                    &commands::vgcreate(name, *pe_size_k, *lvm1, devices),
                    LvmError::VgCreateFailed,
                )
            }
            Action::ExtendVg { name, devices } => {
                for device in devices {
                    self.run(&commands::pvcreate(device), LvmError::CreatePvFailed)?;
                }
                self.run(
                    &commands::vgextend(name, devices),
                    LvmError::VgExtendFailed,
                )
            }
            Action::ReduceVg { name, devices } => {
                self.run(
                    &commands::vgreduce(name, devices),
                    LvmError::VgReduceFailed,
                )?;
                for device in devices {
                    self.run(&commands::pvremove(device), LvmError::PvRemoveFailed)?;
                }
                Ok(())
            }
            Action::RemoveVg { name, devices } => {
                self.run(&commands::vgremove(name), LvmError::VgRemoveFailed)?;
                for device in devices {
                    self.run(&commands::pvremove(device), LvmError::PvRemoveFailed)?;
                }
                Ok(())
            }
            Action::CreateLv {
                vg,
                name,
                extents,
                stripes,
                ..
            } => self.run(
                &commands::lvcreate(vg, name, *extents, *stripes),
                LvmError::LvCreateFailed,
            ),
            Action::RemoveLv { vg, name, device } => {
                self.release(device, model)?;
                self.run(&commands::lvremove(vg, name), LvmError::LvRemoveFailed)
            }
            Action::ResizeLv {
                vg,
                name,
                device,
                from,
                to,
                size_k,
            } => {
                let volume = model.volume(device).ok_or_else(|| lost(device))?;
                let keep_fs = self.keeps_filesystem(device, volume);
                let shrink = to < from;
                if keep_fs && shrink {
                    self.resize_fs(device, volume, *size_k)?;
                }
                self.run(
                    &commands::lvresize(vg, name, *to),
                    LvmError::LvResizeFailed,
                )?;
                if keep_fs && !shrink {
                    self.resize_fs(device, volume, *size_k)?;
                }
                Ok(())
            }
        }
    }

    /// Whether a resize of `device` has to carry its filesystem along
    fn keeps_filesystem(&self, device: &str, volume: &Volume) -> bool {
        !self.unformatted.contains(device) && volume.effective_fs().has_filesystem()
    }

    fn resize_fs(&mut self, device: &str, volume: &Volume, size_k: u64) -> Step {
        let command = commands::resize_fs(device, volume, size_k)
            .ok_or_else(|| StepFailure::new(VolumeError::ResizeUnsupportedByFs))?;
        self.run(&command, VolumeError::ResizeFailed)
    }

    /// Unmount `device` and drop its mount-table entry before it goes away.
    fn release(&mut self, device: &str, model: &DeviceModel) -> Step {
        let Some(volume) = model.volume(device) else {
            return Ok(());
        };
        if volume.mounted {
            self.run(&commands::umount(device), VolumeError::UmountFailed)?;
        }
        self.write_entry(volume.persisted.as_ref(), None)
    }

    fn write_entry(&mut self, old: Option<&MountEntry>, new: Option<&MountEntry>) -> Step {
        match (old, new) {
            (None, None) => Ok(()),
            (Some(old), Some(new)) if old == new => Ok(()),
            (None, Some(new)) => {
                info!("Adding mount table entry for {}", new.mount_point);
                self.table
                    .add(new)
                    .map_err(|e| table_failure(e, FstabError::EntryNotFound))
            }
            (Some(old), Some(new)) => {
                info!(
                    "Updating mount table entry {} -> {}",
                    old.mount_point, new.mount_point
                );
                self.table
                    .update(old, new)
                    .map_err(|e| table_failure(e, FstabError::UpdateEntryNotFound))
            }
            (Some(old), None) => {
                info!("Removing mount table entry for {}", old.mount_point);
                self.table
                    .remove(old)
                    .map_err(|e| table_failure(e, FstabError::RemoveEntryNotFound))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_sys::{DryRunRunner, MemoryMountTable};
    use storage_types::{Disk, FsType, Partition, PartitionTable, Region};

    fn staging() -> Staging {
        let mut disk = Disk::new("/dev/sda", 1024 * 1024, 1000, PartitionTable::Msdos);
        disk.insert_partition(Partition {
            device: "/dev/sda1".to_string(),
            number: 1,
            kind: PartitionType::Primary,
            region: Region::new(0, 100),
            id: ids::LINUX,
            volume: Volume::detected(100 * 1024, FsType::Ext4),
        });
        Staging::new(DeviceModel {
            disks: vec![disk],
            volume_groups: Vec::new(),
        })
    }

    #[test]
    fn empty_queue_is_nothing_to_do() {
        let mut runner = DryRunRunner::new();
        let mut table = MemoryMountTable::default();
        let mut committer = Committer::new(&mut runner, &mut table, ProgressSink::silent(), 5);
        let err = committer.commit(&mut staging()).expect_err("empty");
        assert!(err.is_nothing_to_do());
    }

    #[test]
    fn successful_commit_settles_the_model() {
        let mut staging = staging();
        let device = staging
            .create_partition("/dev/sda", PartitionType::Primary, 100, 200)
            .expect("create");
        staging
            .change_format_volume(&device, true, FsType::Ext4)
            .expect("format");
        staging.change_mount_point(&device, "/data").expect("mount");

        let mut runner = DryRunRunner::new();
        let mut table = MemoryMountTable::default();
        let report = Committer::new(&mut runner, &mut table, ProgressSink::silent(), 5)
            .commit(&mut staging)
            .expect("commit");

        assert_eq!(report.committed.len(), 3);
        assert!(!staging.has_pending());
        assert_eq!(staging.staged(), staging.committed());
        assert_eq!(table.lines().len(), 1);
        assert_eq!(
            runner.executed(),
            [
                "parted -s /dev/sda unit cyl mkpart primary 100 299",
                "wipefs -a /dev/sda2",
                "mkfs.ext4 -F /dev/sda2",
            ]
        );
        let volume = staging.committed().volume(&device).expect("volume");
        assert_eq!(volume.detected_fs, FsType::Ext4);
        assert!(volume.persisted.is_some());
    }

    /// Fails every tool it is asked to run
    struct BrokenRunner;

    impl ToolRunner for BrokenRunner {
        fn run(
            &mut self,
            _command: &ToolCommand,
            _on_event: &mut dyn FnMut(&storage_sys::ToolEvent),
        ) -> storage_sys::Result<ToolOutput> {
            Ok(ToolOutput {
                status: 1,
                stderr: vec!["Error: device busy".to_string()],
                ..ToolOutput::default()
            })
        }
    }

    #[test]
    fn stale_leftovers_are_reported_as_dropped() {
        let mut staging = staging();
        staging
            .create_partition("/dev/sda", PartitionType::Primary, 100, 200)
            .expect("create");
        staging.change_label("/dev/sda1", "data").expect("label");
        // sda1 vanished underneath the queued label change
        staging.committed.disks[0].partitions.clear();

        let mut table = MemoryMountTable::default();
        let partial = Committer::new(&mut BrokenRunner, &mut table, ProgressSink::silent(), 5)
            .commit(&mut staging)
            .expect_err("mkpart fails")
            .as_partial()
            .cloned()
            .expect("partial commit");

        assert!(partial.committed.is_empty());
        assert_eq!(partial.failed.seq, 1);
        assert_eq!(
            partial.dropped.iter().map(|r| r.seq).collect::<Vec<_>>(),
            [2]
        );
        assert_eq!(partial.remaining, 0);
        assert_eq!(partial.diagnostic, "Error: device busy");
        assert!(!staging.has_pending());
    }
}
