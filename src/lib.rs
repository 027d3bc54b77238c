// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! # Roborec
//!
//! DDS-to-MCAP recording core.
//!
//! This library provides the recording subsystem of a DDS recorder:
//! - **Handler** ingest state machine in [`recorder::handler`](crate::recorder::handler)
//! - **Rolling writer** with size reservation in [`recorder::writer`](crate::recorder::writer)
//! - **MCAP serialization** in [`io::formats::mcap`](crate::io::formats::mcap)
//! - **Payload pool** shared with the upstream pipe in [`types::payload`](crate::types::payload)
//!
//! ## Architecture
//!
//! The library is organized by concern:
//! - `recorder/` - handler, writer, size and file tracking, configuration
//! - `io/formats/mcap/` - the append-only MCAP codec and its constants
//! - `types/` - payload pool and DDS topic types
//! - `core/` - the error taxonomy
//!
//! ## Example: recording a topic
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use roborec::recorder::{
//!     DynamicType, FileTracker, McapHandler, McapHandlerConfig, McapHandlerState, SampleData,
//!     SchemaEncoding, TypeIdentifier,
//! };
//! use roborec::types::{DdsTopic, PayloadPool};
//!
//! let config = McapHandlerConfig::default();
//! let pool = Arc::new(PayloadPool::new());
//! let tracker = FileTracker::new(config.output.clone())?;
//! let mut handler = McapHandler::new(
//!     config,
//!     Arc::clone(&pool),
//!     tracker,
//!     McapHandlerState::Running,
//!     None,
//! )?;
//!
//! let topic = DdsTopic::new("/odom", "nav_msgs::msg::Odometry");
//! let schema = DynamicType::new(
//!     "nav_msgs::msg::Odometry",
//!     SchemaEncoding::Idl,
//!     "struct Odometry { /* ... */ };",
//!     vec![],
//! );
//! handler.add_schema(&schema, &TypeIdentifier(vec![0x01]));
//! handler.add_data(&topic, SampleData::new(pool.wrap(&[0u8; 16]), 1));
//! handler.stop();
//! # Ok(())
//! # }
//! ```

// Core types
pub mod core;

// Re-export core types for convenience
pub use core::{RecorderError, Result};

// Shared data types (payload pool, topics)
pub mod types;

// I/O layer (MCAP codec)
pub mod io;

// Recording subsystem
pub mod recorder;

// Re-export the main entry points
pub use recorder::{
    DynamicType, FileTracker, McapHandler, McapHandlerConfig, McapHandlerState, McapWriter,
    OutputSettings, SampleData, SchemaEncoding, TypeIdentifier,
};
pub use types::{DdsTopic, Payload, PayloadPool, TopicQos};
