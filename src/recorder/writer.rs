// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Size-bounded rolling MCAP writer.
//!
//! Wraps the append-only codec with reservation accounting: every record
//! is reserved against the current file's budget before it is handed to
//! the codec and committed afterwards. A reservation overflow closes the
//! current file and opens the next one, re-emitting the version metadata
//! and every schema and channel active at the moment of rollover; when
//! the cumulative disk budget is exhausted the writer disables itself and
//! notifies the disk-full callback.
//!
//! The writer owns no schema or channel maps. The handler is the single
//! owner of those records and passes a borrowed [`RecordSet`] view into
//! every call that can open or roll a file.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::core::{RecorderError, Result};
use crate::io::formats::mcap::codec::{
    attachment_record_len, file_overhead, metadata_record_len, ChannelRecord, McapCodec,
    SchemaRecord,
};
use crate::recorder::config::OutputSettings;
use crate::recorder::dynamic_types::DYNAMIC_TYPES_ATTACHMENT_NAME;
use crate::recorder::file_tracker::FileTracker;
use crate::recorder::message::Message;
use crate::recorder::now_ns;
use crate::recorder::size_tracker::{SizeTracker, DYNAMIC_TYPES_MEDIA_TYPE};

/// Library tag written into each file's header record.
const LIBRARY: &str = concat!("roborec ", env!("CARGO_PKG_VERSION"));

/// Name of the version metadata record.
const VERSION_METADATA_NAME: &str = "version";
/// Release key of the version metadata record.
const VERSION_METADATA_RELEASE: &str = "release";
/// Commit key of the version metadata record.
const VERSION_METADATA_COMMIT: &str = "commit";

/// Borrowed view of the handler's canonical schema and channel records.
///
/// Iteration order is ascending id, so re-emission preserves creation
/// order and every channel's schema precedes it.
#[derive(Clone, Copy)]
pub struct RecordSet<'a> {
    /// Schemas active in the current recording, by id
    pub schemas: &'a BTreeMap<u16, SchemaRecord>,
    /// Channels active in the current recording, by id
    pub channels: &'a BTreeMap<u16, ChannelRecord>,
}

/// Callback invoked when the disk budget is exhausted.
pub type DiskFullCallback = Box<dyn Fn() + Send>;

/// Size-bounded rolling MCAP writer.
pub struct McapWriter {
    inner: Mutex<WriterInner>,
}

struct WriterInner {
    settings: OutputSettings,
    record_types: bool,
    enabled: bool,
    codec: Option<McapCodec>,
    size_tracker: SizeTracker,
    file_tracker: FileTracker,
    dynamic_types_payload: Option<Vec<u8>>,
    on_disk_full: Option<DiskFullCallback>,
}

impl McapWriter {
    /// Create a disabled writer over the given file tracker.
    pub fn new(settings: OutputSettings, file_tracker: FileTracker, record_types: bool) -> Self {
        let metadata_size =
            metadata_record_len(VERSION_METADATA_NAME, &version_metadata());
        Self {
            inner: Mutex::new(WriterInner {
                settings,
                record_types,
                enabled: false,
                codec: None,
                size_tracker: SizeTracker::new(file_overhead(LIBRARY), metadata_size),
                file_tracker,
                dynamic_types_payload: None,
                on_disk_full: None,
            }),
        }
    }

    /// Open the first file of the run. Idempotent if already enabled.
    ///
    /// A disk-full condition notifies the callback and is returned to the
    /// caller, since without a first file the writer is unusable.
    pub fn enable(&self, records: RecordSet<'_>) -> Result<()> {
        let mut inner = self.lock();
        if inner.enabled {
            return Ok(());
        }
        tracing::debug!("enabling MCAP writer");

        let min_size = inner.min_file_size();
        match inner.open_new_file(min_size, records) {
            Ok(()) => {
                inner.enabled = true;
                Ok(())
            }
            Err(err @ RecorderError::FullDisk { .. }) => {
                inner.notify_disk_full(&err);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Close the current file. Idempotent if already disabled.
    pub fn disable(&self) {
        let mut inner = self.lock();
        if !inner.enabled {
            return;
        }
        tracing::debug!("disabling MCAP writer");
        inner.close_current_file();
        inner.enabled = false;
    }

    /// Whether the writer currently has a file open.
    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Persist a schema record.
    pub fn write_schema(&self, schema: &SchemaRecord, records: RecordSet<'_>) -> Result<()> {
        let mut inner = self.lock();
        if !inner.enabled {
            tracing::warn!(name = %schema.name, "writing schema in a disabled writer");
            return Ok(());
        }
        tracing::debug!(name = %schema.name, id = schema.id, "writing schema");
        inner.write_with_rollover(records, |inner| inner.emit_schema(schema))
    }

    /// Persist a channel record.
    pub fn write_channel(&self, channel: &ChannelRecord, records: RecordSet<'_>) -> Result<()> {
        let mut inner = self.lock();
        if !inner.enabled {
            tracing::warn!(topic = %channel.topic, "writing channel in a disabled writer");
            return Ok(());
        }
        tracing::debug!(topic = %channel.topic, id = channel.id, "writing channel");
        inner.write_with_rollover(records, |inner| inner.emit_channel(channel))
    }

    /// Persist a message record.
    pub fn write_message(&self, message: &Message, records: RecordSet<'_>) -> Result<()> {
        let mut inner = self.lock();
        if !inner.enabled {
            tracing::warn!(
                sequence = message.sequence,
                "writing message in a disabled writer"
            );
            return Ok(());
        }
        inner.write_with_rollover(records, |inner| inner.emit_message(message))
    }

    /// Replace the staged dynamic-types attachment, taking ownership of
    /// the serialized payload.
    pub fn update_dynamic_types(&self, payload: Vec<u8>, records: RecordSet<'_>) -> Result<()> {
        let mut inner = self.lock();

        if !inner.record_types || !inner.enabled {
            // Staged for the next enable; no budget is held yet.
            inner.dynamic_types_payload = Some(payload);
            return Ok(());
        }

        let new_len = payload.len() as u64;
        let previous_len = inner.dynamic_types_payload.as_ref().map(|p| p.len() as u64);
        match previous_len {
            None => tracing::debug!(bytes = new_len, "setting the dynamic types payload"),
            Some(old) => {
                tracing::debug!(from = old, to = new_len, "updating the dynamic types payload")
            }
        }

        if let Err(err) = inner
            .size_tracker
            .attachment_to_write(new_len, previous_len)
        {
            match err {
                RecorderError::FullFile { data_size_to_write } => {
                    match inner.rollover(data_size_to_write, records) {
                        Ok(()) => {
                            // The new file re-reserved the previous payload.
                            if let Err(err) = inner
                                .size_tracker
                                .attachment_to_write(new_len, previous_len)
                            {
                                tracing::error!(error = %err, "dynamic types do not fit after rollover");
                            }
                        }
                        Err(err @ RecorderError::FullDisk { .. }) => {
                            inner.notify_disk_full(&err);
                            inner.dynamic_types_payload = Some(payload);
                            return Err(err);
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "failed to roll over for dynamic types");
                            return Err(err);
                        }
                    }
                }
                other => return Err(other),
            }
        }

        inner.dynamic_types_payload = Some(payload);
        let potential = inner.size_tracker.get_potential_mcap_size();
        inner.file_tracker.set_current_file_size(potential);
        Ok(())
    }

    /// Install the disk-full callback. When unset, the condition is only
    /// logged.
    pub fn set_on_disk_full_callback(&self, callback: impl Fn() + Send + 'static) {
        self.lock().on_disk_full = Some(Box::new(callback));
    }

    fn lock(&self) -> MutexGuard<'_, WriterInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for McapWriter {
    fn drop(&mut self) {
        self.disable();
    }
}

impl WriterInner {
    /// Reserve-then-commit with a single rollover retry.
    ///
    /// `emit` reserves and writes one item; a full-file failure closes
    /// the current file and retries once on the next one. Disk
    /// exhaustion disables the writer, notifies the callback, and is
    /// absorbed here: the ingest path sees a no-op, not an error.
    fn write_with_rollover<F>(&mut self, records: RecordSet<'_>, mut emit: F) -> Result<()>
    where
        F: FnMut(&mut WriterInner) -> Result<()>,
    {
        match emit(self) {
            Ok(()) => Ok(()),
            Err(RecorderError::FullFile { data_size_to_write }) => {
                match self.rollover(data_size_to_write, records) {
                    Ok(()) => match emit(self) {
                        Ok(()) => Ok(()),
                        Err(err) => {
                            tracing::error!(error = %err, "write failed after rollover");
                            Ok(())
                        }
                    },
                    Err(err @ RecorderError::FullDisk { .. }) => {
                        self.notify_disk_full(&err);
                        Ok(())
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "failed to open the next file");
                        Ok(())
                    }
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Close the current file and open the next one, re-emitting the
    /// active records. Fails with a disk-full error when no next file may
    /// be opened; the writer stays disabled in that case.
    fn rollover(&mut self, data_size: u64, records: RecordSet<'_>) -> Result<()> {
        tracing::debug!(pending_bytes = data_size, "rolling over to a new MCAP file");
        self.close_current_file();
        self.enabled = false;

        if self.settings.max_file_size == self.settings.max_size {
            return Err(RecorderError::full_disk(
                "the single configured file equals the disk budget and is full",
            ));
        }

        let min_size = self.min_file_size() + data_size;
        self.open_new_file(min_size, records)?;
        self.enabled = true;
        Ok(())
    }

    /// Minimum size of the next file: framing baseline, version
    /// metadata, and the staged attachment.
    ///
    /// Only valid between files (the tracker's own attachment
    /// reservation is zero then).
    fn min_file_size(&self) -> u64 {
        let attachment = match (&self.dynamic_types_payload, self.record_types) {
            (Some(payload), true) => attachment_record_len(
                DYNAMIC_TYPES_ATTACHMENT_NAME,
                DYNAMIC_TYPES_MEDIA_TYPE,
                payload.len() as u64,
            ),
            _ => 0,
        };
        self.size_tracker.get_min_mcap_size() + attachment
    }

    fn open_new_file(&mut self, min_file_size: u64, records: RecordSet<'_>) -> Result<()> {
        self.file_tracker.new_file(min_file_size)?;
        let path = match self.file_tracker.get_current_filename() {
            Some(path) => path.clone(),
            None => {
                return Err(RecorderError::inconsistency(
                    "McapWriter",
                    "file tracker has no current file after new_file",
                ))
            }
        };

        self.codec = Some(McapCodec::open(&path, LIBRARY)?);

        let max_file_size = self.settings.max_file_size.min(
            self.settings
                .max_size
                .saturating_sub(self.file_tracker.get_total_size()),
        );
        self.size_tracker
            .init(max_file_size, self.settings.safety_margin);

        // The minimum size reserved on open accounts for the metadata and
        // attachment; re-emitted records must also fit or the file is
        // unusable.
        must_fit(self.emit_version_metadata())?;
        for schema in records.schemas.values() {
            must_fit(self.emit_schema(schema))?;
        }
        for channel in records.channels.values() {
            must_fit(self.emit_channel(channel))?;
        }

        if self.record_types {
            if let Some(payload) = &self.dynamic_types_payload {
                let len = payload.len() as u64;
                must_fit(self.size_tracker.attachment_to_write(len, None))?;
            }
        }

        let potential = self.size_tracker.get_potential_mcap_size();
        self.file_tracker.set_current_file_size(potential);
        Ok(())
    }

    fn close_current_file(&mut self) {
        if self.record_types {
            if let (Some(codec), Some(payload)) =
                (self.codec.as_mut(), self.dynamic_types_payload.as_deref())
            {
                // The reservation made on open guarantees this fits.
                match codec.write_attachment(
                    DYNAMIC_TYPES_ATTACHMENT_NAME,
                    DYNAMIC_TYPES_MEDIA_TYPE,
                    now_ns(),
                    payload,
                ) {
                    Ok(()) => self.size_tracker.attachment_written(payload.len() as u64),
                    Err(err) => {
                        tracing::error!(error = %err, "failed to write the dynamic types attachment")
                    }
                }
            }
        }

        let written = self.size_tracker.get_written_mcap_size();
        self.file_tracker.set_current_file_size(written);

        if let Some(codec) = self.codec.take() {
            let filename = codec.path().display().to_string();
            self.size_tracker.reset(&filename);
            if let Err(err) = codec.close() {
                tracing::error!(file = %filename, error = %err, "failed to close MCAP file");
            }
        }
        self.file_tracker.close_file();
    }

    fn emit_version_metadata(&mut self) -> Result<()> {
        let metadata = version_metadata();
        let record_size = metadata_record_len(VERSION_METADATA_NAME, &metadata);
        self.size_tracker.metadata_to_write(record_size)?;

        let codec = self.codec_mut()?;
        if let Err(err) = codec.write_metadata(VERSION_METADATA_NAME, &metadata) {
            tracing::error!(error = %err, "failed to write the version metadata");
            return Ok(());
        }
        self.size_tracker.metadata_written(record_size);
        self.update_potential_size();
        Ok(())
    }

    fn emit_schema(&mut self, schema: &SchemaRecord) -> Result<()> {
        self.size_tracker.schema_to_write(schema)?;

        let codec = self.codec_mut()?;
        if let Err(err) = codec.write_schema(schema) {
            tracing::error!(name = %schema.name, error = %err, "failed to write schema");
            return Ok(());
        }
        self.size_tracker.schema_written(schema);
        self.update_potential_size();
        Ok(())
    }

    fn emit_channel(&mut self, channel: &ChannelRecord) -> Result<()> {
        self.size_tracker.channel_to_write(channel)?;

        let codec = self.codec_mut()?;
        if let Err(err) = codec.write_channel(channel) {
            tracing::error!(topic = %channel.topic, error = %err, "failed to write channel");
            return Ok(());
        }
        self.size_tracker.channel_written(channel);
        self.update_potential_size();
        Ok(())
    }

    fn emit_message(&mut self, message: &Message) -> Result<()> {
        let data_size = message.data_size();
        self.size_tracker.message_to_write(data_size)?;

        let codec = self.codec_mut()?;
        if let Err(err) = codec.write_message(
            message.channel_id,
            message.sequence as u32,
            message.log_time,
            message.publish_time,
            message.payload.as_bytes(),
        ) {
            // The reservation is left standing; the file is abandoned by
            // the next rollover.
            tracing::error!(sequence = message.sequence, error = %err, "failed to write message");
            return Ok(());
        }
        self.size_tracker.message_written(data_size);
        self.update_potential_size();
        Ok(())
    }

    fn codec_mut(&mut self) -> Result<&mut McapCodec> {
        self.codec.as_mut().ok_or_else(|| {
            RecorderError::inconsistency("McapWriter", "no file is open in an enabled writer")
        })
    }

    fn update_potential_size(&mut self) {
        let potential = self.size_tracker.get_potential_mcap_size();
        self.file_tracker.set_current_file_size(potential);
    }

    fn notify_disk_full(&mut self, err: &RecorderError) {
        tracing::error!(error = %err, "disk budget exhausted");
        self.enabled = false;
        if let Some(callback) = &self.on_disk_full {
            callback();
        }
    }
}

/// Map a full-file failure on a mandatory write (metadata, re-emitted
/// records, attachment reservation) to disk exhaustion: a file that
/// cannot hold them is unusable.
fn must_fit(result: Result<()>) -> Result<()> {
    result.map_err(|err| match err {
        RecorderError::FullFile { data_size_to_write } => RecorderError::full_disk(format!(
            "mandatory records ({data_size_to_write} bytes) do not fit in a new file"
        )),
        other => other,
    })
}

fn version_metadata() -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert(
        VERSION_METADATA_RELEASE.to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    metadata.insert(
        VERSION_METADATA_COMMIT.to_string(),
        option_env!("ROBOREC_COMMIT").unwrap_or("unknown").to_string(),
    );
    metadata
}
