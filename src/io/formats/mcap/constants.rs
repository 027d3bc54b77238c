// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! MCAP format constants.
//!
//! Magic bytes and the record opcodes this crate emits, as defined by the
//! [MCAP specification](https://mcap.dev/spec).
//!
//! Using a single source of truth for these constants prevents bugs from
//! opcode mismatches between the codec and the size accounting.

/// MCAP file magic bytes (at start and end of file).
pub const MCAP_MAGIC: [u8; 8] = [0x89, 0x4D, 0x43, 0x41, 0x50, 0x30, 0x0D, 0x0A];

// MCAP Record Opcodes per specification
// https://mcap.dev/spec#opcodes

/// Header record - must be first record after magic.
pub const OP_HEADER: u8 = 0x01;
/// Footer record - contains summary section offsets.
pub const OP_FOOTER: u8 = 0x02;
/// Schema record - defines message schemas.
pub const OP_SCHEMA: u8 = 0x03;
/// Channel record - defines channels/topics.
pub const OP_CHANNEL: u8 = 0x04;
/// Message record - contains message data.
pub const OP_MESSAGE: u8 = 0x05;
/// Attachment record - contains file attachments.
pub const OP_ATTACHMENT: u8 = 0x09;
/// Statistics record - contains file-level statistics.
pub const OP_STATISTICS: u8 = 0x0B;
/// Metadata record - contains key-value metadata.
pub const OP_METADATA: u8 = 0x0C;
/// Data end record - marks end of data section.
pub const OP_DATA_END: u8 = 0x0F;
