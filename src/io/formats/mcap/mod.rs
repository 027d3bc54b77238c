// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! MCAP format implementation.
//!
//! This module provides the append-only MCAP writing primitives used by
//! the recorder:
//! - [`constants`] - magic bytes and record opcodes
//! - [`codec`] - the low-level record serializer with exact size helpers
//!
//! **Note:** This is a custom MCAP serializer with no external
//! dependencies; the mcap crate is used in tests to validate output.

pub mod codec;
pub mod constants;

pub use codec::{
    attachment_record_len, file_overhead, message_record_len, metadata_record_len, ChannelRecord,
    McapCodec, SchemaRecord, STATISTICS_CHANNEL_ENTRY,
};
pub use constants::MCAP_MAGIC;
