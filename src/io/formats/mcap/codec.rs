// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Append-only MCAP codec.
//!
//! Serializes Schema, Channel, Message, Attachment, and Metadata records
//! directly to the file, followed on close by a summary section (schema
//! and channel copies, then a statistics record), the footer, and the
//! closing magic.
//!
//! Messages are written un-chunked, which keeps every record's on-disk
//! size exactly computable before the write: the `*_len` helpers in this
//! module are the single source of truth the size reservation accounting
//! is built on.
//!
//! # MCAP Format Compatibility
//!
//! The record layout matches the specification at
//! https://github.com/foxglove/mcap/tree/main/docs/specification and is
//! readable by the mcap crate.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::core::{RecorderError, Result};
use crate::io::formats::mcap::constants::{
    MCAP_MAGIC, OP_ATTACHMENT, OP_CHANNEL, OP_DATA_END, OP_FOOTER, OP_HEADER, OP_MESSAGE,
    OP_METADATA, OP_SCHEMA, OP_STATISTICS,
};

/// Opcode byte plus the u64 record-length prefix.
const RECORD_PREFIX: u64 = 1 + 8;

/// Per-channel entry in the statistics record's message-count map.
pub const STATISTICS_CHANNEL_ENTRY: u64 = 2 + 8;

/// A schema record: type description emitted once per file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRecord {
    /// Stable schema id (0 is reserved for "no schema")
    pub id: u16,
    /// Type name
    pub name: String,
    /// Schema encoding (e.g., "omgidl", "ros2msg")
    pub encoding: String,
    /// Textual schema body
    pub data: Vec<u8>,
}

impl SchemaRecord {
    /// On-disk size of this record, prefix included.
    pub fn encoded_len(&self) -> u64 {
        RECORD_PREFIX
            + 2
            + 4
            + self.name.len() as u64
            + 4
            + self.encoding.len() as u64
            + 4
            + self.data.len() as u64
    }
}

/// A channel record: per-topic metadata emitted once per file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    /// Stable channel id
    pub id: u16,
    /// Schema id this channel is bound to (0 = blank schema)
    pub schema_id: u16,
    /// Topic name
    pub topic: String,
    /// Message encoding (e.g., "cdr")
    pub message_encoding: String,
    /// Channel metadata (QoS string and friends); ordered so the
    /// serialized bytes are deterministic
    pub metadata: BTreeMap<String, String>,
}

impl ChannelRecord {
    /// On-disk size of this record, prefix included.
    pub fn encoded_len(&self) -> u64 {
        RECORD_PREFIX
            + 2
            + 2
            + 4
            + self.topic.len() as u64
            + 4
            + self.message_encoding.len() as u64
            + 4
            + string_map_len(&self.metadata)
    }
}

/// On-disk size of a message record carrying `data_len` payload bytes.
pub fn message_record_len(data_len: u64) -> u64 {
    RECORD_PREFIX + 2 + 4 + 8 + 8 + data_len
}

/// On-disk size of an attachment record.
pub fn attachment_record_len(name: &str, media_type: &str, data_len: u64) -> u64 {
    RECORD_PREFIX
        + 8
        + 8
        + 4
        + name.len() as u64
        + 4
        + media_type.len() as u64
        + 8
        + data_len
        + 4
}

/// On-disk size of a metadata record.
pub fn metadata_record_len(name: &str, metadata: &BTreeMap<String, String>) -> u64 {
    RECORD_PREFIX + 4 + name.len() as u64 + 4 + string_map_len(metadata)
}

/// Fixed framing cost of a file: magic, header, data end, the statistics
/// record's fixed part, footer, and closing magic.
///
/// The statistics map grows by [`STATISTICS_CHANNEL_ENTRY`] per channel;
/// that delta is accounted when each channel is reserved.
pub fn file_overhead(library: &str) -> u64 {
    let magic = MCAP_MAGIC.len() as u64;
    let header = RECORD_PREFIX + 4 + 4 + library.len() as u64;
    let data_end = RECORD_PREFIX + 4;
    let statistics = RECORD_PREFIX + 8 + 2 + 4 + 4 + 4 + 4 + 8 + 8 + 4;
    let footer = RECORD_PREFIX + 8 + 8 + 4;
    magic + header + data_end + statistics + footer + magic
}

/// Byte length of a string map body (entries only, no length prefix).
fn string_map_len(map: &BTreeMap<String, String>) -> u64 {
    map.iter()
        .map(|(k, v)| 4 + k.len() as u64 + 4 + v.len() as u64)
        .sum()
}

/// Append-only MCAP file writer.
///
/// Tracks schema and channel copies plus per-channel message counts so
/// [`McapCodec::close`] can emit a summary section readable by standard
/// MCAP tooling.
pub struct McapCodec {
    /// Underlying writer
    writer: BufWriter<File>,
    /// Path of the file being written
    path: PathBuf,
    /// Current write position (BufWriter does not expose stream_position)
    current_position: u64,
    /// Schema copies for the summary section
    schema_records: Vec<SchemaRecord>,
    /// Channel copies for the summary section
    channel_records: Vec<ChannelRecord>,
    /// Messages written
    messages_written: u64,
    /// Attachments written
    attachments_written: u32,
    /// Metadata records written
    metadata_written: u32,
    /// Per-channel message counts
    channel_message_counts: BTreeMap<u16, u64>,
    /// Earliest message time in file
    file_message_start_time: u64,
    /// Latest message time in file
    file_message_end_time: u64,
}

impl McapCodec {
    /// Open a new MCAP file and write the magic and header records.
    pub fn open<P: AsRef<Path>>(path: P, library: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| {
            RecorderError::initialization(
                "McapCodec",
                format!("failed to create {}: {e}", path.display()),
            )
        })?;

        let mut codec = Self {
            writer: BufWriter::new(file),
            path,
            current_position: 0,
            schema_records: Vec::new(),
            channel_records: Vec::new(),
            messages_written: 0,
            attachments_written: 0,
            metadata_written: 0,
            channel_message_counts: BTreeMap::new(),
            file_message_start_time: u64::MAX,
            file_message_end_time: 0,
        };

        codec.write_bytes(&MCAP_MAGIC)?;

        // Header record: profile (empty) + library
        codec.write_u8(OP_HEADER)?;
        codec.write_u64(4 + 4 + library.len() as u64)?;
        codec.write_u32(0)?;
        codec.write_string(library)?;

        Ok(codec)
    }

    /// Path of the file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current write position in bytes.
    pub fn position(&self) -> u64 {
        self.current_position
    }

    /// Write a schema record and keep a copy for the summary section.
    pub fn write_schema(&mut self, schema: &SchemaRecord) -> Result<()> {
        self.write_schema_record(schema)?;
        self.schema_records.push(schema.clone());
        Ok(())
    }

    /// Write a channel record and keep a copy for the summary section.
    pub fn write_channel(&mut self, channel: &ChannelRecord) -> Result<()> {
        self.write_channel_record(channel)?;
        self.channel_message_counts.entry(channel.id).or_insert(0);
        self.channel_records.push(channel.clone());
        Ok(())
    }

    /// Write a message record.
    ///
    /// The channel must have been written to this file beforehand.
    pub fn write_message(
        &mut self,
        channel_id: u16,
        sequence: u32,
        log_time: u64,
        publish_time: u64,
        data: &[u8],
    ) -> Result<()> {
        self.write_u8(OP_MESSAGE)?;
        self.write_u64(2 + 4 + 8 + 8 + data.len() as u64)?;
        self.write_u16(channel_id)?;
        self.write_u32(sequence)?;
        self.write_u64(log_time)?;
        self.write_u64(publish_time)?;
        self.write_bytes(data)?;

        self.messages_written += 1;
        *self.channel_message_counts.entry(channel_id).or_insert(0) += 1;
        self.file_message_start_time = self.file_message_start_time.min(log_time);
        self.file_message_end_time = self.file_message_end_time.max(log_time);
        Ok(())
    }

    /// Write an attachment record.
    pub fn write_attachment(
        &mut self,
        name: &str,
        media_type: &str,
        create_time: u64,
        data: &[u8],
    ) -> Result<()> {
        self.write_u8(OP_ATTACHMENT)?;
        self.write_u64(
            8 + 8
                + 4
                + name.len() as u64
                + 4
                + media_type.len() as u64
                + 8
                + data.len() as u64
                + 4,
        )?;
        self.write_u64(create_time)?; // log_time
        self.write_u64(create_time)?;
        self.write_string(name)?;
        self.write_string(media_type)?;
        self.write_u64(data.len() as u64)?;
        self.write_bytes(data)?;
        self.write_u32(0)?; // crc not computed

        self.attachments_written += 1;
        Ok(())
    }

    /// Write a metadata record.
    pub fn write_metadata(&mut self, name: &str, metadata: &BTreeMap<String, String>) -> Result<()> {
        self.write_u8(OP_METADATA)?;
        self.write_u64(4 + name.len() as u64 + 4 + string_map_len(metadata))?;
        self.write_string(name)?;
        self.write_string_map(metadata)?;

        self.metadata_written += 1;
        Ok(())
    }

    /// Finalize the file: data end, summary section, footer, magic.
    pub fn close(mut self) -> Result<()> {
        // Data end record (crc not computed)
        self.write_u8(OP_DATA_END)?;
        self.write_u64(4)?;
        self.write_u32(0)?;

        // Summary section: schema copies, channel copies, statistics
        let summary_start = self.position();

        let schema_records = std::mem::take(&mut self.schema_records);
        for schema in &schema_records {
            self.write_schema_record(schema)?;
        }

        let channel_records = std::mem::take(&mut self.channel_records);
        for channel in &channel_records {
            self.write_channel_record(channel)?;
        }

        self.write_statistics(schema_records.len() as u16, channel_records.len() as u32)?;

        // Footer (no summary-offset section, no crc)
        self.write_u8(OP_FOOTER)?;
        self.write_u64(20)?;
        self.write_u64(summary_start)?;
        self.write_u64(0)?;
        self.write_u32(0)?;

        self.write_bytes(&MCAP_MAGIC)?;

        self.writer
            .flush()
            .map_err(|e| RecorderError::codec("McapCodec", format!("flush failed: {e}")))?;

        tracing::debug!(
            path = %self.path.display(),
            schemas = schema_records.len(),
            channels = channel_records.len(),
            messages = self.messages_written,
            "closed MCAP file"
        );
        Ok(())
    }

    fn write_schema_record(&mut self, schema: &SchemaRecord) -> Result<()> {
        self.write_u8(OP_SCHEMA)?;
        self.write_u64(
            2 + 4
                + schema.name.len() as u64
                + 4
                + schema.encoding.len() as u64
                + 4
                + schema.data.len() as u64,
        )?;
        self.write_u16(schema.id)?;
        self.write_string(&schema.name)?;
        self.write_string(&schema.encoding)?;
        self.write_u32(schema.data.len() as u32)?;
        self.write_bytes(&schema.data)?;
        Ok(())
    }

    fn write_channel_record(&mut self, channel: &ChannelRecord) -> Result<()> {
        self.write_u8(OP_CHANNEL)?;
        self.write_u64(
            2 + 2
                + 4
                + channel.topic.len() as u64
                + 4
                + channel.message_encoding.len() as u64
                + 4
                + string_map_len(&channel.metadata),
        )?;
        self.write_u16(channel.id)?;
        self.write_u16(channel.schema_id)?;
        self.write_string(&channel.topic)?;
        self.write_string(&channel.message_encoding)?;
        self.write_string_map(&channel.metadata)?;
        Ok(())
    }

    /// Statistics record. Chunk count is always zero: this codec writes
    /// messages un-chunked.
    fn write_statistics(&mut self, schema_count: u16, channel_count: u32) -> Result<()> {
        let map_bytes = self.channel_message_counts.len() as u64 * STATISTICS_CHANNEL_ENTRY;

        self.write_u8(OP_STATISTICS)?;
        self.write_u64(8 + 2 + 4 + 4 + 4 + 4 + 8 + 8 + 4 + map_bytes)?;
        self.write_u64(self.messages_written)?;
        self.write_u16(schema_count)?;
        self.write_u32(channel_count)?;
        self.write_u32(self.attachments_written)?;
        self.write_u32(self.metadata_written)?;
        self.write_u32(0)?; // chunk count
        self.write_u64(if self.messages_written > 0 {
            self.file_message_start_time
        } else {
            0
        })?;
        self.write_u64(if self.messages_written > 0 {
            self.file_message_end_time
        } else {
            0
        })?;

        self.write_u32(map_bytes as u32)?;
        let counts: Vec<(u16, u64)> = self
            .channel_message_counts
            .iter()
            .map(|(&k, &v)| (k, v))
            .collect();
        for (channel_id, count) in counts {
            self.write_u16(channel_id)?;
            self.write_u64(count)?;
        }
        Ok(())
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data).map_err(write_err)?;
        self.current_position += data.len() as u64;
        Ok(())
    }

    fn write_u8(&mut self, val: u8) -> Result<()> {
        self.writer.write_u8(val).map_err(write_err)?;
        self.current_position += 1;
        Ok(())
    }

    fn write_u16(&mut self, val: u16) -> Result<()> {
        self.writer.write_u16::<LittleEndian>(val).map_err(write_err)?;
        self.current_position += 2;
        Ok(())
    }

    fn write_u32(&mut self, val: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(val).map_err(write_err)?;
        self.current_position += 4;
        Ok(())
    }

    fn write_u64(&mut self, val: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(val).map_err(write_err)?;
        self.current_position += 8;
        Ok(())
    }

    fn write_string(&mut self, val: &str) -> Result<()> {
        self.write_u32(val.len() as u32)?;
        self.write_bytes(val.as_bytes())
    }

    /// Byte-length prefixed map of string pairs.
    fn write_string_map(&mut self, map: &BTreeMap<String, String>) -> Result<()> {
        self.write_u32(string_map_len(map) as u32)?;
        for (key, value) in map {
            self.write_string(key)?;
            self.write_string(value)?;
        }
        Ok(())
    }
}

fn write_err(e: std::io::Error) -> RecorderError {
    RecorderError::codec("McapCodec", format!("write failed: {e}"))
}
