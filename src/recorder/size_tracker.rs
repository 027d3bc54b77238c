// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Pre-commit size accounting for a single MCAP file.
//!
//! Every record goes through reservation before it is handed to the
//! codec, and is committed afterwards. At any moment
//! `written + reserved + safety_margin <= max_file_size` holds; a
//! reservation that would break it raises a full-file error carrying the
//! item size, which the writer maps to a rollover.
//!
//! Schema and channel records are written twice per file (data section
//! plus summary copy), so their reservations cover both; channels
//! additionally reserve their entry in the statistics record's
//! per-channel count map.

use crate::core::{RecorderError, Result};
use crate::io::formats::mcap::codec::{
    attachment_record_len, message_record_len, ChannelRecord, SchemaRecord,
    STATISTICS_CHANNEL_ENTRY,
};
use crate::recorder::dynamic_types::DYNAMIC_TYPES_ATTACHMENT_NAME;

/// Media type of the dynamic-types attachment.
pub const DYNAMIC_TYPES_MEDIA_TYPE: &str = "application/octet-stream";

/// Size accounting for the file currently being written.
#[derive(Debug)]
pub struct SizeTracker {
    /// Fixed framing cost of an empty file (magic, header, data end,
    /// statistics fixed part, footer)
    base_size: u64,
    /// Size of the version metadata record written at each file open
    metadata_size: u64,
    /// Per-file byte ceiling (already clamped to the remaining disk budget)
    max_size: u64,
    /// Reserved tail absorbing final-write accounting error
    safety_margin: u64,
    /// Committed bytes, baseline included
    written: u64,
    /// Reserved-but-unwritten bytes
    reserved: u64,
    /// Current attachment reservation (full record size)
    attachment_potential: u64,
    /// File the accounting refers to, for logging
    filename: String,
}

impl SizeTracker {
    /// Create a tracker with the crate's framing baseline.
    ///
    /// `base_size` is the fixed file overhead, `metadata_size` the size
    /// of the version metadata record every file opens with. Accounting
    /// only starts once [`SizeTracker::init`] is called.
    pub fn new(base_size: u64, metadata_size: u64) -> Self {
        Self {
            base_size,
            metadata_size,
            max_size: 0,
            safety_margin: 0,
            written: 0,
            reserved: 0,
            attachment_potential: 0,
            filename: String::new(),
        }
    }

    /// Begin accounting for a new file.
    pub fn init(&mut self, max_file_size: u64, safety_margin: u64) {
        self.max_size = max_file_size;
        self.safety_margin = safety_margin;
        self.written = self.base_size;
        self.reserved = 0;
        self.attachment_potential = 0;
    }

    /// Minimum viable size for an empty-but-closeable file: framing
    /// baseline, version metadata, and the pending attachment if any.
    pub fn get_min_mcap_size(&self) -> u64 {
        self.base_size + self.metadata_size + self.attachment_potential
    }

    /// Committed plus reserved bytes.
    pub fn get_potential_mcap_size(&self) -> u64 {
        self.written + self.reserved
    }

    /// Committed bytes only.
    pub fn get_written_mcap_size(&self) -> u64 {
        self.written
    }

    /// Prepare for the next file.
    pub fn reset(&mut self, filename: &str) {
        tracing::debug!(
            file = %self.filename,
            written = self.written,
            reserved = self.reserved,
            next = filename,
            "size tracker reset"
        );
        self.filename = filename.to_string();
        self.written = 0;
        self.reserved = 0;
        self.attachment_potential = 0;
    }

    /// Reserve a schema record (data section plus summary copy).
    pub fn schema_to_write(&mut self, schema: &SchemaRecord) -> Result<()> {
        self.reserve(2 * schema.encoded_len())
    }

    /// Commit a schema reservation.
    pub fn schema_written(&mut self, schema: &SchemaRecord) {
        self.commit(2 * schema.encoded_len());
    }

    /// Reserve a channel record (data section, summary copy, and its
    /// statistics map entry).
    pub fn channel_to_write(&mut self, channel: &ChannelRecord) -> Result<()> {
        self.reserve(2 * channel.encoded_len() + STATISTICS_CHANNEL_ENTRY)
    }

    /// Commit a channel reservation.
    pub fn channel_written(&mut self, channel: &ChannelRecord) {
        self.commit(2 * channel.encoded_len() + STATISTICS_CHANNEL_ENTRY);
    }

    /// Reserve a message record carrying `data_size` payload bytes.
    pub fn message_to_write(&mut self, data_size: u64) -> Result<()> {
        self.reserve(message_record_len(data_size))
    }

    /// Commit a message reservation.
    pub fn message_written(&mut self, data_size: u64) {
        self.commit(message_record_len(data_size));
    }

    /// Reserve a metadata record of the given full size.
    pub fn metadata_to_write(&mut self, record_size: u64) -> Result<()> {
        self.reserve(record_size)
    }

    /// Commit a metadata reservation.
    pub fn metadata_written(&mut self, record_size: u64) {
        self.commit(record_size);
    }

    /// Reserve (or re-reserve) the dynamic-types attachment.
    ///
    /// `previous_payload_len` is the payload length of the reservation
    /// being replaced; only the record-size delta is charged, and a
    /// shrinking payload releases the difference.
    pub fn attachment_to_write(
        &mut self,
        payload_len: u64,
        previous_payload_len: Option<u64>,
    ) -> Result<()> {
        let new_record = attachment_record_len(
            DYNAMIC_TYPES_ATTACHMENT_NAME,
            DYNAMIC_TYPES_MEDIA_TYPE,
            payload_len,
        );
        let old_record = previous_payload_len.map_or(0, |len| {
            attachment_record_len(DYNAMIC_TYPES_ATTACHMENT_NAME, DYNAMIC_TYPES_MEDIA_TYPE, len)
        });

        if new_record >= old_record {
            self.reserve(new_record - old_record)?;
        } else {
            self.release(old_record - new_record);
        }
        self.attachment_potential = new_record;
        Ok(())
    }

    /// Commit the attachment reservation.
    pub fn attachment_written(&mut self, payload_len: u64) {
        let record = attachment_record_len(
            DYNAMIC_TYPES_ATTACHMENT_NAME,
            DYNAMIC_TYPES_MEDIA_TYPE,
            payload_len,
        );
        self.commit(record);
        self.attachment_potential = 0;
    }

    fn reserve(&mut self, size: u64) -> Result<()> {
        if self.written + self.reserved + size + self.safety_margin > self.max_size {
            return Err(RecorderError::full_file(size));
        }
        self.reserved += size;
        Ok(())
    }

    fn release(&mut self, size: u64) {
        debug_assert!(self.reserved >= size);
        self.reserved = self.reserved.saturating_sub(size);
    }

    fn commit(&mut self, size: u64) {
        debug_assert!(self.reserved >= size);
        self.reserved = self.reserved.saturating_sub(size);
        self.written += size;
    }
}
