// SPDX-License-Identifier: GPL-3.0-only

//! Commit ordering
//!
//! Builds a dependency graph over the pending actions and orders it with
//! Kahn's algorithm. Among ready actions, removals go first, then
//! planning order.

use std::collections::{BTreeSet, VecDeque};

use storage_contracts::{DiskError, StorageError, StorageResult};
use storage_types::PartitionType;
use tracing::{debug, warn};

use crate::action::{Action, ActionKind, PendingAction};

/// Why one action has to run before another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Both touch the same disk, volume or volume group
    Entity,
    /// The second reuses cylinders the first frees
    Space,
    /// The second needs a partition number the first frees, or the
    /// partitioning tool would hand out a different number otherwise
    Number,
}

/// Pending actions in commit order
#[derive(Debug, Clone)]
pub struct Schedule {
    pub order: Vec<usize>,
    edges: Vec<Vec<usize>>,
}

impl Schedule {
    /// Every action that (transitively) waits for `index`
    pub fn dependents_of(&self, index: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([index]);
        while let Some(current) = queue.pop_front() {
            for &next in &self.edges[current] {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }
}

/// Mount-table edits see the final attributes of their volume
fn rank(pending: &PendingAction) -> (u8, u64) {
    let phase = match pending.action.kind() {
        ActionKind::MountTable => 1,
        _ => 0,
    };
    (phase, pending.seq)
}

fn same_disk(a: &Action, b: &Action) -> bool {
    matches!((a.disk(), b.disk()), (Some(x), Some(y)) if x == y)
}

fn partition(action: &Action) -> Option<(u32, PartitionType)> {
    match action {
        Action::CreatePartition { number, kind, .. }
        | Action::RemovePartition { number, kind, .. } => Some((*number, *kind)),
        _ => None,
    }
}

/// Whether `a` has to be committed before `b`
pub fn precedes(a: &PendingAction, b: &PendingAction) -> Option<Reason> {
    let (x, y) = (&a.action, &b.action);

    let shares_entity = x.entities().iter().any(|e| y.touches(e));
    let wipes_disk = matches!(x, Action::DestroyPartitionTable { .. }) && same_disk(x, y);
    if (shares_entity || wipes_disk) && rank(a) < rank(b) {
        return Some(Reason::Entity);
    }

    if !same_disk(x, y) {
        return None;
    }

    let same_level = x.is_logical_level() == y.is_logical_level();
    if same_level {
        if let (Some(freed), Some(taken)) = (x.released(), y.claimed())
            && freed.overlaps(&taken)
        {
            return Some(Reason::Space);
        }
        // Two claims on the same cylinders can never both be satisfied
        if let (Some(first), Some(second)) = (x.claimed(), y.claimed())
            && first.overlaps(&second)
        {
            return Some(Reason::Space);
        }
    }

    match (x, y, partition(x), partition(y)) {
        (
            Action::CreatePartition { .. },
            Action::CreatePartition { .. },
            Some((n, _)),
            Some((m, _)),
        ) if n == m => Some(Reason::Number),
        (
            Action::RemovePartition { .. },
            Action::CreatePartition { .. },
            Some((m, _)),
            Some((n, _)),
        ) if n == m => Some(Reason::Number),
        // The tool numbers a new partition itself; keep lower numbers
        // taken until it ran.
        (
            Action::CreatePartition { .. },
            Action::RemovePartition { .. },
            Some((n, created)),
            Some((m, removed)),
        ) if created != PartitionType::Logical
            && removed != PartitionType::Logical
            && m < n
            && a.seq < b.seq =>
        {
            Some(Reason::Number)
        }
        (
            Action::CreatePartition { .. },
            Action::CreatePartition { .. },
            Some((_, PartitionType::Extended)),
            Some((_, PartitionType::Logical)),
        ) => Some(Reason::Space),
        (
            Action::RemovePartition { .. },
            Action::RemovePartition { .. },
            Some((_, PartitionType::Logical)),
            Some((_, PartitionType::Extended)),
        ) => Some(Reason::Space),
        _ => None,
    }
}

/// Order `actions` for commit. A cycle means two actions compete for the
/// same cylinders or partition number.
pub fn schedule(actions: &[PendingAction]) -> StorageResult<Schedule> {
    let n = actions.len();
    let mut edges = vec![Vec::new(); n];
    let mut reasons = Vec::new();
    let mut indegree = vec![0usize; n];

    for (i, a) in actions.iter().enumerate() {
        for (j, b) in actions.iter().enumerate() {
            if i == j {
                continue;
            }
            if let Some(reason) = precedes(a, b) {
                edges[i].push(j);
                reasons.push((i, j, reason));
                indegree[j] += 1;
            }
        }
    }

    let key = |i: usize| (!actions[i].action.is_removal(), actions[i].seq, i);
    let mut ready: BTreeSet<(bool, u64, usize)> =
        (0..n).filter(|&i| indegree[i] == 0).map(key).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(next) = ready.pop_first() {
        let index = next.2;
        order.push(index);
        for &j in &edges[index] {
            indegree[j] -= 1;
            if indegree[j] == 0 {
                ready.insert(key(j));
            }
        }
    }

    if order.len() < n {
        let stuck: BTreeSet<usize> = (0..n).filter(|i| !order.contains(i)).collect();
        let number = reasons
            .iter()
            .any(|(i, j, r)| *r == Reason::Number && stuck.contains(i) && stuck.contains(j));
        for &i in &stuck {
            warn!("Action {} is part of a dependency cycle", actions[i]);
        }
        return Err(StorageError::from(if number {
            DiskError::CreatePartitionNoFreeNumber
        } else {
            DiskError::CreatePartitionNoSpace
        }));
    }

    debug!(
        "Commit order: {:?}",
        order.iter().map(|&i| actions[i].seq).collect::<Vec<_>>()
    );
    Ok(Schedule { order, edges })
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_types::{EncryptType, FsType, FstabOptions, MountBy, Region};

    fn pending(seq: u64, action: Action) -> PendingAction {
        PendingAction { seq, action }
    }

    fn create(number: u32, kind: PartitionType, start: u64, len: u64) -> Action {
        Action::CreatePartition {
            disk: "/dev/sda".to_string(),
            device: format!("/dev/sda{number}"),
            number,
            kind,
            region: Region::new(start, len),
            id: 0x83,
            size_k: len,
        }
    }

    fn remove(number: u32, kind: PartitionType, start: u64, len: u64) -> Action {
        Action::RemovePartition {
            disk: "/dev/sda".to_string(),
            device: format!("/dev/sda{number}"),
            number,
            kind,
            region: Region::new(start, len),
        }
    }

    fn seqs(actions: &[PendingAction], schedule: &Schedule) -> Vec<u64> {
        schedule.order.iter().map(|&i| actions[i].seq).collect()
    }

    #[test]
    fn independent_removal_moves_ahead_of_creation() {
        let actions = vec![
            pending(1, create(3, PartitionType::Primary, 500, 100)),
            pending(2, remove(4, PartitionType::Primary, 800, 100)),
        ];
        let schedule = schedule(&actions).expect("acyclic");
        assert_eq!(seqs(&actions, &schedule), vec![2, 1]);
    }

    #[test]
    fn lower_number_removal_waits_for_creation() {
        let actions = vec![
            pending(1, create(3, PartitionType::Primary, 500, 100)),
            pending(2, remove(1, PartitionType::Primary, 0, 100)),
        ];
        let schedule = schedule(&actions).expect("acyclic");
        assert_eq!(seqs(&actions, &schedule), vec![1, 2]);
    }

    #[test]
    fn creation_in_freed_space_follows_removal() {
        let actions = vec![
            pending(1, remove(2, PartitionType::Primary, 100, 200)),
            pending(2, create(3, PartitionType::Primary, 150, 50)),
            pending(3, create(4, PartitionType::Primary, 600, 50)),
        ];
        let schedule = schedule(&actions).expect("acyclic");
        assert_eq!(seqs(&actions, &schedule), vec![1, 2, 3]);
        assert_eq!(schedule.dependents_of(0), BTreeSet::from([1]));
    }

    #[test]
    fn mount_table_edit_runs_after_format_of_same_volume() {
        let actions = vec![
            pending(
                1,
                Action::MountTable {
                    device: "/dev/sda1".to_string(),
                    mount_point: Some("/data".to_string()),
                    mount_by: MountBy::Uuid,
                    options: FstabOptions::default(),
                },
            ),
            pending(
                2,
                Action::Format {
                    device: "/dev/sda1".to_string(),
                    fs: FsType::Xfs,
                    label: None,
                    encryption: EncryptType::None,
                    password: None,
                },
            ),
        ];
        let schedule = schedule(&actions).expect("acyclic");
        assert_eq!(seqs(&actions, &schedule), vec![2, 1]);
    }

    #[test]
    fn logicals_follow_their_extended_partition() {
        let actions = vec![
            pending(1, create(1, PartitionType::Extended, 0, 500)),
            pending(2, create(5, PartitionType::Logical, 0, 100)),
            pending(3, remove(3, PartitionType::Primary, 600, 10)),
        ];
        let schedule = schedule(&actions).expect("acyclic");
        assert_eq!(seqs(&actions, &schedule), vec![3, 1, 2]);
    }

    #[test]
    fn competing_claims_are_a_cycle() {
        let overlapping = vec![
            pending(1, create(3, PartitionType::Primary, 100, 100)),
            pending(2, create(4, PartitionType::Primary, 150, 100)),
        ];
        assert_eq!(
            schedule(&overlapping).map(|s| s.order).expect_err("cycle"),
            StorageError::from(DiskError::CreatePartitionNoSpace)
        );

        let mut same_number = create(3, PartitionType::Primary, 400, 10);
        if let Action::CreatePartition { device, .. } = &mut same_number {
            *device = "/dev/sda3-b".to_string();
        }
        let numbered = vec![
            pending(1, create(3, PartitionType::Primary, 100, 10)),
            pending(2, same_number),
        ];
        assert_eq!(
            schedule(&numbered).map(|s| s.order).expect_err("cycle"),
            StorageError::from(DiskError::CreatePartitionNoFreeNumber)
        );
    }
}
