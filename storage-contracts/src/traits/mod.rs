// SPDX-License-Identifier: GPL-3.0-only

pub mod manager;
pub mod progress;

pub use manager::{StorageInterface, StorageResult};
pub use progress::{
    Callbacks, Diagnostic, HandlerError, HandlerResult, ProgressHandler, TARGET_TEXT_LEN,
    sanitize_target,
};
