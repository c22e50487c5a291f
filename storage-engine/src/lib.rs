// SPDX-License-Identifier: GPL-3.0-only

//! Staged storage mutation engine
//!
//! Requests are validated against a staged copy of the device model and
//! queued as actions. A commit runs the queue in dependency order through
//! the system tools, reports progress to an optional handler, and stops at
//! the first failing action, leaving unrelated work queued.

pub mod action;
pub mod commit;
pub mod config;
pub mod error;
pub mod factory;
pub mod logging;
pub mod manager;
pub mod planner;
pub mod request;

pub use action::{Action, ActionKind, Entity, PendingAction};
pub use commit::{Committer, ProgressSink};
pub use config::{CONFIG_ENV, EngineConfig, LoggingLevel};
pub use error::{EngineError, Result};
pub use factory::{
    create_storage_interface, create_storage_manager, load_model, load_snapshot, save_snapshot,
};
pub use manager::StorageManager;
pub use planner::{Schedule, Staging};
pub use request::{Plan, Request};
