//! Test doubles and fixtures for the staged storage engine
//!
//! - [`ScriptedRunner`] records tool invocations and fails or answers
//!   the ones a test picks
//! - [`RecordingHandler`] captures everything the commit engine reports
//! - [`spec`] loads device models from `resources/lab-specs`

pub mod errors;
pub mod handler;
pub mod runner;
pub mod spec;

pub use handler::{HandlerEvent, RecordingHandler};
pub use runner::ScriptedRunner;
pub use storage_sys::MemoryMountTable;
