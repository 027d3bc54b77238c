// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! DDS-to-MCAP recording subsystem.
//!
//! This module provides the recording pipeline:
//! - [`handler`] - the stateful ingest handler (RUNNING / PAUSED / STOPPED)
//! - [`writer`] - the size-bounded rolling MCAP writer
//! - [`size_tracker`] - pre-commit reservation accounting per file
//! - [`file_tracker`] - file naming and the cumulative disk budget
//! - [`config`] - handler and output configuration
//! - [`dynamic_types`] - runtime type descriptions and their attachment
//! - [`message`] - the message types flowing through the handler

pub mod config;
pub mod dynamic_types;
pub mod file_tracker;
pub mod handler;
pub mod message;
pub mod size_tracker;
pub mod writer;

pub use config::{McapHandlerConfig, OutputSettings};
pub use dynamic_types::{
    DynamicType, DynamicTypesCollection, SchemaEncoding, TypeIdentifier,
    DYNAMIC_TYPES_ATTACHMENT_NAME,
};
pub use file_tracker::FileTracker;
pub use handler::{McapHandler, McapHandlerState, SCHEMA_ID_BLANK};
pub use message::{Message, SampleData};
pub use size_tracker::SizeTracker;
pub use writer::{McapWriter, RecordSet};

/// Current time in nanoseconds since the Unix epoch.
pub(crate) fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
