// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for the staged storage engine
//!
//! This crate is the engine's only contact with the real system:
//! - Running partitioning, filesystem, encryption and LVM tools with
//!   incremental output
//! - Reading and rewriting the mount table
//! - Detecting disks, partitions and volume groups
//!
//! Mutating tools require elevated privileges.

pub mod commands;
pub mod detect;
pub mod error;
pub mod fstab;
pub mod output;
pub mod process;

pub use detect::{detect, read_mountinfo};
pub use error::{Result, SysError};
pub use fstab::{FstabFile, FstabLine, MemoryMountTable, MountTable};
pub use output::{LineSplitter, OutputLine, classify};
pub use process::{DryRunRunner, SystemToolRunner, ToolCommand, ToolEvent, ToolOutput, ToolRunner};
