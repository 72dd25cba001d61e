//! Core engine for the reactive notebook's execution kernel: the dependency
//! graph, the static extractor, the `Output`/`Cell` data model, and the
//! JSON-framed kernel IPC protocol shared between the kernel process and the
//! coordinator.
//!
//! This crate has no I/O of its own beyond the pure framing helpers in
//! [`ipc`]; the kernel process and the coordinator each build on top of it.

pub mod cell;
pub mod error;
pub mod extract;
pub mod graph;
pub mod ipc;
pub mod output;

pub use cell::{CellId, CellStatus, Language};
pub use error::{Error, Result};
pub use extract::extract;
pub use graph::DependencyGraph;
pub use ipc::{CellNotification, Channel, KernelCommand, NotificationPayload, read_message, write_message};
pub use output::{Output, OutputData};
