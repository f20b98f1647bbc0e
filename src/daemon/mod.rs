// src/daemon/mod.rs
//! Local task registry
//!
//! Exposes the task-oriented vocabulary of sqlmap's API server (create,
//! start, status, log, data, stop, delete) over in-process supervisors.

pub mod task;

pub use task::{TaskManager, TaskStatus, TaskStatusReport};
