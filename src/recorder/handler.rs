// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Stateful ingest handler.
//!
//! The handler sits between the DDS pipe and the MCAP writer. Samples of
//! known types go to an in-memory buffer that is dumped to disk when full
//! (RUNNING) or when an event fires (PAUSED); samples whose type has not
//! been announced yet wait in per-type pending queues until their schema
//! arrives or the recording stops.
//!
//! Command methods (`start`, `pause`, `stop`, `trigger_event`) take
//! `&mut self` and are expected to be driven sequentially from one
//! control thread; ingest (`add_schema`, `add_data`) takes `&self` and is
//! guarded by the handler lock.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::core::{RecorderError, Result};
use crate::io::formats::mcap::codec::{ChannelRecord, SchemaRecord};
use crate::recorder::config::McapHandlerConfig;
use crate::recorder::dynamic_types::{DynamicType, DynamicTypesCollection, TypeIdentifier};
use crate::recorder::file_tracker::FileTracker;
use crate::recorder::message::{Message, SampleData};
use crate::recorder::now_ns;
use crate::recorder::writer::{DiskFullCallback, McapWriter, RecordSet};
use crate::types::{DdsTopic, PayloadPool};

/// Reserved schema id for channels whose type is not known yet.
pub const SCHEMA_ID_BLANK: u16 = 0;

/// Message encoding written into every channel record.
const MESSAGE_ENCODING: &str = "cdr";

/// State of the handler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McapHandlerState {
    /// Received messages are not processed.
    Stopped,
    /// Messages are buffered and dumped to disk when the buffer fills.
    Running,
    /// Messages are buffered and dumped to disk when an event triggers.
    Paused,
}

/// Flag code controlling the event thread routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventCode {
    /// Waiting for an event.
    Untriggered,
    /// An event has been triggered.
    Triggered,
    /// The event thread must exit.
    Stopped,
}

/// Condition the event thread sleeps on.
struct EventSignal {
    flag: Mutex<EventCode>,
    cv: Condvar,
}

type PendingQueue = VecDeque<(DdsTopic, Message)>;

struct HandlerInner {
    state: McapHandlerState,
    /// Schema id by type name
    schemas_by_name: HashMap<String, u16>,
    /// Canonical schema records, by id
    schema_records: BTreeMap<u16, SchemaRecord>,
    /// Channel id by topic name
    channels_by_topic: HashMap<String, u16>,
    /// Type name per channel, for rebinding blank channels
    channel_types: HashMap<u16, String>,
    /// Canonical channel records, by id
    channel_records: BTreeMap<u16, ChannelRecord>,
    next_schema_id: u16,
    next_channel_id: u16,
    /// Samples awaiting the next dump
    samples_buffer: VecDeque<Message>,
    /// Unknown-type samples received while RUNNING, per type name
    pending_samples: HashMap<String, PendingQueue>,
    /// Unknown-type samples received while PAUSED, per type name
    pending_samples_paused: HashMap<String, PendingQueue>,
    /// All registered dynamic types
    dynamic_types: DynamicTypesCollection,
    /// Last assigned sequence number
    sequence: u64,
}

/// The ingest state machine between the DDS pipe and the MCAP writer.
pub struct McapHandler {
    config: McapHandlerConfig,
    /// Keeps payload buffers live while messages are in flight
    #[allow(dead_code)]
    payload_pool: Arc<PayloadPool>,
    writer: Arc<McapWriter>,
    inner: Arc<Mutex<HandlerInner>>,
    event: Arc<EventSignal>,
    event_thread: Option<JoinHandle<()>>,
}

impl McapHandler {
    /// Create a handler and open the first output file unless starting
    /// stopped.
    ///
    /// Fails with an initialization error when the first MCAP file cannot
    /// be opened (including a disk budget too small for one file).
    pub fn new(
        config: McapHandlerConfig,
        payload_pool: Arc<PayloadPool>,
        file_tracker: FileTracker,
        init_state: McapHandlerState,
        on_disk_full: Option<DiskFullCallback>,
    ) -> Result<Self> {
        let writer = Arc::new(McapWriter::new(
            config.output.clone(),
            file_tracker,
            config.record_types,
        ));
        if let Some(callback) = on_disk_full {
            writer.set_on_disk_full_callback(move || callback());
        }

        let mut handler = Self {
            config,
            payload_pool,
            writer,
            inner: Arc::new(Mutex::new(HandlerInner {
                state: init_state,
                schemas_by_name: HashMap::new(),
                schema_records: BTreeMap::new(),
                channels_by_topic: HashMap::new(),
                channel_types: HashMap::new(),
                channel_records: BTreeMap::new(),
                next_schema_id: SCHEMA_ID_BLANK + 1,
                next_channel_id: 0,
                samples_buffer: VecDeque::new(),
                pending_samples: HashMap::new(),
                pending_samples_paused: HashMap::new(),
                dynamic_types: DynamicTypesCollection::new(),
                sequence: 0,
            })),
            event: Arc::new(EventSignal {
                flag: Mutex::new(EventCode::Stopped),
                cv: Condvar::new(),
            }),
            event_thread: None,
        };

        if init_state != McapHandlerState::Stopped {
            let inner = handler.lock_inner();
            let records = RecordSet {
                schemas: &inner.schema_records,
                channels: &inner.channel_records,
            };
            handler
                .writer
                .enable(records)
                .map_err(|e| RecorderError::initialization("McapHandler", e.to_string()))?;
        }
        if init_state == McapHandlerState::Paused {
            handler.start_event_thread();
        }

        tracing::info!(state = ?init_state, "MCAP handler created");
        Ok(handler)
    }

    /// Register a schema and reconcile everything waiting for it.
    ///
    /// Idempotent on type name. Channels previously bound to the blank
    /// schema are rebound under fresh channel ids first, so pending
    /// samples of this type reconcile onto the bound channel when they
    /// move to the buffer (or straight to the file when PAUSED, for
    /// samples received during a prior RUNNING window).
    pub fn add_schema(&self, dynamic_type: &DynamicType, type_identifier: &TypeIdentifier) {
        let mut inner = self.lock_inner();
        if inner.schemas_by_name.contains_key(&dynamic_type.name) {
            tracing::debug!(name = %dynamic_type.name, "schema already registered");
            return;
        }
        tracing::info!(name = %dynamic_type.name, "adding schema");

        let id = inner.next_schema_id;
        inner.next_schema_id += 1;
        let schema = SchemaRecord {
            id,
            name: dynamic_type.name.clone(),
            encoding: dynamic_type.encoding.as_str().to_string(),
            data: dynamic_type.definition.as_bytes().to_vec(),
        };
        {
            let records = RecordSet {
                schemas: &inner.schema_records,
                channels: &inner.channel_records,
            };
            if let Err(err) = self.writer.write_schema(&schema, records) {
                tracing::warn!(name = %schema.name, error = %err, "failed to persist schema");
            }
        }
        inner
            .schemas_by_name
            .insert(dynamic_type.name.clone(), id);
        inner.schema_records.insert(id, schema);

        inner.dynamic_types.store(
            &dynamic_type.name,
            type_identifier.0.clone(),
            dynamic_type.type_object.clone(),
        );
        if self.config.record_types {
            let payload = inner.dynamic_types.serialize();
            let records = RecordSet {
                schemas: &inner.schema_records,
                channels: &inner.channel_records,
            };
            if let Err(err) = self.writer.update_dynamic_types(payload, records) {
                tracing::warn!(error = %err, "failed to stage dynamic types");
            }
        }

        // Rebind before reconciling: the channel cache must not hand a
        // stale blank channel to the samples about to be flushed.
        inner.rebind_blank_channels(&self.writer, &dynamic_type.name);
        inner.add_pending_samples(&self.writer, &dynamic_type.name, &self.config);
    }

    /// Ingest one sample for `topic`.
    ///
    /// Behavior depends on the current state; see the module docs. Every
    /// accepted sample receives the next sequence number.
    pub fn add_data(&self, topic: &DdsTopic, sample: SampleData) {
        let mut inner = self.lock_inner();
        match inner.state {
            McapHandlerState::Stopped => {
                tracing::debug!(topic = %topic.name, "sample discarded while STOPPED");
            }
            McapHandlerState::Running => {
                if inner.schemas_by_name.contains_key(&topic.type_name) {
                    let sequence = inner.next_sequence();
                    let mut message = Message::from_sample(sequence, sample);
                    match inner.get_channel_id(&self.writer, topic, &self.config) {
                        Ok(channel_id) => {
                            message.channel_id = channel_id;
                            inner.samples_buffer.push_back(message);
                            if inner.samples_buffer.len() >= self.config.buffer_size {
                                tracing::debug!("buffer full, dumping to disk");
                                inner.dump_data(&self.writer);
                            }
                        }
                        Err(err) => {
                            tracing::warn!(topic = %topic.name, error = %err, "dropping sample");
                        }
                    }
                } else if self.config.max_pending_samples != 0 {
                    let sequence = inner.next_sequence();
                    let message = Message::from_sample(sequence, sample);
                    inner.add_to_pending(&self.writer, topic, message, &self.config);
                } else if !self.config.only_with_schema {
                    // Pending disabled: goes to the buffer bound to the
                    // blank schema.
                    let sequence = inner.next_sequence();
                    let mut message = Message::from_sample(sequence, sample);
                    match inner.get_channel_id(&self.writer, topic, &self.config) {
                        Ok(channel_id) => {
                            message.channel_id = channel_id;
                            inner.samples_buffer.push_back(message);
                            if inner.samples_buffer.len() >= self.config.buffer_size {
                                inner.dump_data(&self.writer);
                            }
                        }
                        Err(err) => {
                            tracing::warn!(topic = %topic.name, error = %err, "dropping sample");
                        }
                    }
                } else {
                    tracing::debug!(
                        topic = %topic.name,
                        "sample discarded: no schema and pending disabled"
                    );
                }
            }
            McapHandlerState::Paused => {
                if inner.schemas_by_name.contains_key(&topic.type_name) {
                    let sequence = inner.next_sequence();
                    let mut message = Message::from_sample(sequence, sample);
                    match inner.get_channel_id(&self.writer, topic, &self.config) {
                        Ok(channel_id) => {
                            message.channel_id = channel_id;
                            // The event thread trims and dumps this buffer.
                            inner.samples_buffer.push_back(message);
                        }
                        Err(err) => {
                            tracing::warn!(topic = %topic.name, error = %err, "dropping sample");
                        }
                    }
                } else if self.config.max_pending_samples != 0 {
                    let sequence = inner.next_sequence();
                    let message = Message::from_sample(sequence, sample);
                    inner.add_to_pending_paused(topic, message, &self.config);
                } else {
                    tracing::debug!(
                        topic = %topic.name,
                        "sample discarded: no schema and pending disabled"
                    );
                }
            }
        }
    }

    /// Transition to RUNNING.
    pub fn start(&mut self) {
        let previous = self.state();
        if previous == McapHandlerState::Running {
            tracing::warn!("ignoring start: already RUNNING");
            return;
        }
        tracing::info!(from = ?previous, "starting recording");

        if previous == McapHandlerState::Paused {
            self.stop_event_thread();
        }

        let mut inner = self.lock_inner();
        inner.state = McapHandlerState::Running;
        if previous == McapHandlerState::Paused {
            inner.samples_buffer.clear();
            inner.pending_samples_paused.clear();
        }
        if previous == McapHandlerState::Stopped {
            let records = RecordSet {
                schemas: &inner.schema_records,
                channels: &inner.channel_records,
            };
            if let Err(err) = self.writer.enable(records) {
                tracing::error!(error = %err, "failed to reopen the writer");
            }
        }
    }

    /// Transition to STOPPED, dumping buffered data and persisting
    /// pending samples with the blank schema (unless `only_with_schema`).
    pub fn stop(&mut self) {
        self.stop_impl(false);
    }

    /// Transition to PAUSED and start the event thread.
    pub fn pause(&mut self) {
        let previous = self.state();
        if previous == McapHandlerState::Paused {
            tracing::warn!("ignoring pause: already PAUSED");
            return;
        }
        tracing::info!(from = ?previous, "pausing recording");

        {
            let mut inner = self.lock_inner();
            if previous == McapHandlerState::Running {
                inner.dump_data(&self.writer);
            }
            if previous == McapHandlerState::Stopped {
                let records = RecordSet {
                    schemas: &inner.schema_records,
                    channels: &inner.channel_records,
                };
                if let Err(err) = self.writer.enable(records) {
                    tracing::error!(error = %err, "failed to reopen the writer");
                }
            }
            inner.state = McapHandlerState::Paused;
        }
        self.start_event_thread();
    }

    /// Signal the event condition. No-op unless PAUSED.
    pub fn trigger_event(&mut self) {
        {
            let inner = self.lock_inner();
            if inner.state != McapHandlerState::Paused {
                tracing::warn!("ignoring trigger_event: not PAUSED");
                return;
            }
        }
        tracing::info!("event triggered");
        let mut flag = self.lock_event();
        *flag = EventCode::Triggered;
        self.event.cv.notify_one();
    }

    /// Current handler state.
    pub fn state(&self) -> McapHandlerState {
        self.lock_inner().state
    }

    /// Number of samples currently buffered.
    pub fn buffered_samples(&self) -> usize {
        self.lock_inner().samples_buffer.len()
    }

    /// Number of samples currently pending, across both pending maps.
    pub fn pending_samples(&self) -> usize {
        let inner = self.lock_inner();
        let running: usize = inner.pending_samples.values().map(VecDeque::len).sum();
        let paused: usize = inner
            .pending_samples_paused
            .values()
            .map(VecDeque::len)
            .sum();
        running + paused
    }

    fn stop_impl(&mut self, on_destruction: bool) {
        let previous = self.state();
        if previous == McapHandlerState::Stopped && !on_destruction {
            tracing::warn!("ignoring stop: already STOPPED");
            return;
        }
        tracing::info!(from = ?previous, on_destruction, "stopping recording");

        if previous == McapHandlerState::Paused {
            self.stop_event_thread();
        }

        let mut inner = self.lock_inner();
        match previous {
            McapHandlerState::Running => inner.dump_data(&self.writer),
            McapHandlerState::Paused => {
                inner.samples_buffer.clear();
                inner.pending_samples_paused.clear();
            }
            McapHandlerState::Stopped => {}
        }
        inner.state = McapHandlerState::Stopped;
        inner.flush_pending_blank(&self.writer, &self.config);

        if on_destruction {
            if self.config.record_types {
                let payload = inner.dynamic_types.serialize();
                let records = RecordSet {
                    schemas: &inner.schema_records,
                    channels: &inner.channel_records,
                };
                if let Err(err) = self.writer.update_dynamic_types(payload, records) {
                    tracing::warn!(error = %err, "failed to stage dynamic types");
                }
            }
            drop(inner);
            self.writer.disable();
        }
    }

    /// Spawn the event thread. The previous one must have been joined.
    fn start_event_thread(&mut self) {
        {
            let mut flag = self.lock_event();
            *flag = EventCode::Untriggered;
        }
        let inner = Arc::clone(&self.inner);
        let writer = Arc::clone(&self.writer);
        let event = Arc::clone(&self.event);
        let config = self.config.clone();
        self.event_thread = Some(std::thread::spawn(move || {
            event_thread_routine(inner, writer, event, config);
        }));
    }

    /// Signal the event thread to exit and join it.
    ///
    /// The handler lock must not be held here: the routine may be
    /// blocked acquiring it for a trim, and must be able to finish that
    /// iteration before it observes the stop flag.
    fn stop_event_thread(&mut self) {
        {
            let mut flag = self.lock_event();
            *flag = EventCode::Stopped;
            self.event.cv.notify_all();
        }
        if let Some(handle) = self.event_thread.take() {
            if handle.join().is_err() {
                tracing::error!("event thread panicked");
            }
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, HandlerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_event(&self) -> MutexGuard<'_, EventCode> {
        self.event.flag.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for McapHandler {
    fn drop(&mut self) {
        self.stop_impl(true);
    }
}

/// Wait for event triggers, trimming outdated samples every
/// `cleanup_period` so a trigger only dumps the last `event_window` of
/// history.
fn event_thread_routine(
    inner: Arc<Mutex<HandlerInner>>,
    writer: Arc<McapWriter>,
    event: Arc<EventSignal>,
    config: McapHandlerConfig,
) {
    tracing::debug!("event thread started");
    loop {
        let flag = event.flag.lock().unwrap_or_else(|e| e.into_inner());
        let (mut flag, _timeout) = event
            .cv
            .wait_timeout_while(flag, config.cleanup_period, |code| {
                *code == EventCode::Untriggered
            })
            .unwrap_or_else(|e| e.into_inner());

        if *flag == EventCode::Stopped {
            break;
        }
        let triggered = *flag == EventCode::Triggered;
        if triggered {
            *flag = EventCode::Untriggered;
        }
        drop(flag);

        let mut state = inner.lock().unwrap_or_else(|e| e.into_inner());
        state.remove_outdated_samples(&config);
        if triggered {
            tracing::debug!("dumping buffer on event");
            state.dump_data(&writer);
        }
    }
    tracing::debug!("event thread stopped");
}

impl HandlerInner {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Channel id for `topic`, creating the channel on a miss.
    ///
    /// A channel bound to the blank schema is created when the type is
    /// unknown, unless `only_with_schema` forbids it.
    fn get_channel_id(
        &mut self,
        writer: &McapWriter,
        topic: &DdsTopic,
        config: &McapHandlerConfig,
    ) -> Result<u16> {
        if let Some(&id) = self.channels_by_topic.get(&topic.name) {
            return Ok(id);
        }

        let schema_id = match self.schemas_by_name.get(&topic.type_name) {
            Some(&id) => id,
            None => {
                if config.only_with_schema {
                    return Err(RecorderError::inconsistency(
                        "channel",
                        format!("no schema for type {}", topic.type_name),
                    ));
                }
                tracing::warn!(
                    topic = %topic.name,
                    type_name = %topic.type_name,
                    "creating channel with blank schema"
                );
                SCHEMA_ID_BLANK
            }
        };

        let id = self.next_channel_id;
        self.next_channel_id += 1;

        let mut metadata = BTreeMap::new();
        metadata.insert("qos".to_string(), topic.qos.serialize());
        let channel = ChannelRecord {
            id,
            schema_id,
            topic: topic.name.clone(),
            message_encoding: MESSAGE_ENCODING.to_string(),
            metadata,
        };
        {
            let records = RecordSet {
                schemas: &self.schema_records,
                channels: &self.channel_records,
            };
            writer.write_channel(&channel, records)?;
        }

        self.channels_by_topic.insert(topic.name.clone(), id);
        self.channel_types.insert(id, topic.type_name.clone());
        self.channel_records.insert(id, channel);
        Ok(id)
    }

    /// Enqueue an unknown-type sample received while RUNNING, evicting
    /// the oldest when the per-type queue overflows. Evicted samples are
    /// written with the blank schema unless `only_with_schema`.
    fn add_to_pending(
        &mut self,
        writer: &McapWriter,
        topic: &DdsTopic,
        message: Message,
        config: &McapHandlerConfig,
    ) {
        let cap = config.max_pending_samples;
        let evicted = {
            let queue = self
                .pending_samples
                .entry(topic.type_name.clone())
                .or_default();
            queue.push_back((topic.clone(), message));
            if cap > 0 && queue.len() > cap as usize {
                queue.pop_front()
            } else {
                None
            }
        };

        if let Some((evicted_topic, evicted_message)) = evicted {
            if config.only_with_schema {
                tracing::debug!(
                    topic = %evicted_topic.name,
                    "pending queue overflow: sample discarded"
                );
            } else {
                tracing::warn!(
                    topic = %evicted_topic.name,
                    "pending queue overflow: writing sample with blank schema"
                );
                self.write_blank(writer, &evicted_topic, evicted_message, config);
            }
        }
    }

    /// Enqueue an unknown-type sample received while PAUSED. Overflow
    /// always discards: PAUSED never writes opportunistically.
    fn add_to_pending_paused(
        &mut self,
        topic: &DdsTopic,
        message: Message,
        config: &McapHandlerConfig,
    ) {
        let cap = config.max_pending_samples;
        let queue = self
            .pending_samples_paused
            .entry(topic.type_name.clone())
            .or_default();
        queue.push_back((topic.clone(), message));
        if cap > 0 && queue.len() > cap as usize {
            queue.pop_front();
            tracing::debug!(
                topic = %topic.name,
                "paused pending queue overflow: oldest sample discarded"
            );
        }
    }

    /// Reconcile pending samples after `schema_name` was registered.
    ///
    /// Paused-pending samples move to the buffer (the event thread may
    /// still evict them). Running-era pending samples are kept
    /// regardless of events: buffered in RUNNING/STOPPED, written
    /// straight to the file in PAUSED.
    fn add_pending_samples(
        &mut self,
        writer: &McapWriter,
        schema_name: &str,
        config: &McapHandlerConfig,
    ) {
        if self.state == McapHandlerState::Paused {
            if let Some(queue) = self.pending_samples_paused.remove(schema_name) {
                for (topic, mut message) in queue {
                    match self.get_channel_id(writer, &topic, config) {
                        Ok(channel_id) => {
                            message.channel_id = channel_id;
                            self.samples_buffer.push_back(message);
                        }
                        Err(err) => {
                            tracing::warn!(topic = %topic.name, error = %err, "dropping sample");
                        }
                    }
                }
            }
        }

        if let Some(queue) = self.pending_samples.remove(schema_name) {
            let direct_write = self.state == McapHandlerState::Paused;
            for (topic, mut message) in queue {
                match self.get_channel_id(writer, &topic, config) {
                    Ok(channel_id) => {
                        message.channel_id = channel_id;
                        if direct_write {
                            let records = RecordSet {
                                schemas: &self.schema_records,
                                channels: &self.channel_records,
                            };
                            if let Err(err) = writer.write_message(&message, records) {
                                tracing::warn!(topic = %topic.name, error = %err, "write failed");
                            }
                        } else {
                            self.samples_buffer.push_back(message);
                            if self.state == McapHandlerState::Running
                                && self.samples_buffer.len() >= config.buffer_size
                            {
                                self.dump_data(writer);
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(topic = %topic.name, error = %err, "dropping sample");
                    }
                }
            }
        }
    }

    /// Persist every remaining running-era pending sample with the blank
    /// schema, or discard them all under `only_with_schema`.
    fn flush_pending_blank(&mut self, writer: &McapWriter, config: &McapHandlerConfig) {
        let pending = std::mem::take(&mut self.pending_samples);
        for (type_name, queue) in pending {
            if config.only_with_schema {
                tracing::debug!(
                    type_name = %type_name,
                    count = queue.len(),
                    "discarding pending samples without schema"
                );
                continue;
            }
            for (topic, message) in queue {
                self.write_blank(writer, &topic, message, config);
            }
        }
    }

    /// Write one message immediately, creating a blank channel if needed.
    fn write_blank(
        &mut self,
        writer: &McapWriter,
        topic: &DdsTopic,
        mut message: Message,
        config: &McapHandlerConfig,
    ) {
        match self.get_channel_id(writer, topic, config) {
            Ok(channel_id) => {
                message.channel_id = channel_id;
                let records = RecordSet {
                    schemas: &self.schema_records,
                    channels: &self.channel_records,
                };
                if let Err(err) = writer.write_message(&message, records) {
                    tracing::warn!(topic = %topic.name, error = %err, "write failed");
                }
            }
            Err(err) => {
                tracing::warn!(topic = %topic.name, error = %err, "dropping sample");
            }
        }
    }

    /// Rebind channels of `schema_name` from the blank schema to the
    /// newly registered one, under fresh channel ids. Outdated channel
    /// records are dropped and will not be re-emitted on rollover.
    fn rebind_blank_channels(&mut self, writer: &McapWriter, schema_name: &str) {
        let new_schema_id = match self.schemas_by_name.get(schema_name) {
            Some(&id) => id,
            None => return,
        };

        let blank_ids: Vec<u16> = self
            .channel_records
            .iter()
            .filter(|(id, record)| {
                record.schema_id == SCHEMA_ID_BLANK
                    && self.channel_types.get(*id).map(String::as_str) == Some(schema_name)
            })
            .map(|(&id, _)| id)
            .collect();

        for old_id in blank_ids {
            let old_record = match self.channel_records.remove(&old_id) {
                Some(record) => record,
                None => continue,
            };
            self.channel_types.remove(&old_id);

            let new_id = self.next_channel_id;
            self.next_channel_id += 1;
            let channel = ChannelRecord {
                id: new_id,
                schema_id: new_schema_id,
                ..old_record
            };
            tracing::debug!(
                topic = %channel.topic,
                old_id,
                new_id,
                "rebinding channel to its schema"
            );
            {
                let records = RecordSet {
                    schemas: &self.schema_records,
                    channels: &self.channel_records,
                };
                if let Err(err) = writer.write_channel(&channel, records) {
                    tracing::warn!(topic = %channel.topic, error = %err, "failed to persist channel");
                }
            }

            self.channels_by_topic.insert(channel.topic.clone(), new_id);
            self.channel_types
                .insert(new_id, schema_name.to_string());
            self.channel_records.insert(new_id, channel);
        }
    }

    /// Write every buffered sample, in sequence order.
    fn dump_data(&mut self, writer: &McapWriter) {
        let buffer = std::mem::take(&mut self.samples_buffer);
        if buffer.is_empty() {
            return;
        }
        tracing::debug!(count = buffer.len(), "dumping buffered samples");
        let records = RecordSet {
            schemas: &self.schema_records,
            channels: &self.channel_records,
        };
        for message in &buffer {
            if let Err(err) = writer.write_message(message, records) {
                tracing::warn!(sequence = message.sequence, error = %err, "write failed");
            }
        }
    }

    /// Drop buffered samples older than `now - event_window`. A sample
    /// exactly on the boundary is retained.
    fn remove_outdated_samples(&mut self, config: &McapHandlerConfig) {
        let threshold = now_ns().saturating_sub(config.event_window.as_nanos() as u64);
        let before = self.samples_buffer.len();
        self.samples_buffer
            .retain(|message| message.log_time >= threshold);
        let removed = before - self.samples_buffer.len();
        if removed > 0 {
            tracing::debug!(removed, "trimmed outdated samples");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::config::OutputSettings;
    use crate::recorder::dynamic_types::SchemaEncoding;
    use crate::types::Payload;
    use std::path::PathBuf;

    struct CleanupGuard(PathBuf);

    impl Drop for CleanupGuard {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn temp_config(name: &str) -> (McapHandlerConfig, CleanupGuard) {
        let random = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "roborec_handler_{}_{}_{}",
            std::process::id(),
            name,
            random
        ));
        let config = McapHandlerConfig::default()
            .with_output(OutputSettings::default().with_output_dir(&dir))
            .with_buffer_size(10);
        (config, CleanupGuard(dir))
    }

    fn handler(config: McapHandlerConfig, init_state: McapHandlerState) -> McapHandler {
        let pool = Arc::new(PayloadPool::new());
        let tracker = FileTracker::new(config.output.clone()).unwrap();
        McapHandler::new(config, pool, tracker, init_state, None).unwrap()
    }

    fn payload(bytes: &[u8]) -> Payload {
        PayloadPool::new().wrap(bytes)
    }

    fn dynamic_type(name: &str) -> DynamicType {
        DynamicType::new(
            name,
            SchemaEncoding::Idl,
            format!("struct {name} {{ long x; }};"),
            vec![0xAB],
        )
    }

    #[test]
    fn test_stopped_discards_and_keeps_sequence() {
        let (config, _guard) = temp_config("stopped");
        let handler = handler(config, McapHandlerState::Stopped);
        let topic = DdsTopic::new("/t", "T");

        handler.add_data(&topic, SampleData::new(payload(b"x"), 1));
        handler.add_data(&topic, SampleData::new(payload(b"y"), 2));
        assert_eq!(handler.buffered_samples(), 0);
        assert_eq!(handler.pending_samples(), 0);
    }

    #[test]
    fn test_unknown_type_goes_pending() {
        let (config, _guard) = temp_config("pending");
        let handler = handler(config, McapHandlerState::Running);
        let topic = DdsTopic::new("/t", "T");

        handler.add_data(&topic, SampleData::new(payload(b"x"), 1));
        assert_eq!(handler.pending_samples(), 1);
        assert_eq!(handler.buffered_samples(), 0);
    }

    #[test]
    fn test_schema_moves_pending_to_buffer() {
        let (config, _guard) = temp_config("reconcile");
        let handler = handler(config, McapHandlerState::Running);
        let topic = DdsTopic::new("/t", "T");

        handler.add_data(&topic, SampleData::new(payload(b"x"), 1));
        handler.add_schema(&dynamic_type("T"), &TypeIdentifier(vec![1]));
        assert_eq!(handler.pending_samples(), 0);
        assert_eq!(handler.buffered_samples(), 1);
    }

    #[test]
    fn test_add_schema_idempotent() {
        let (config, _guard) = temp_config("idempotent");
        let handler = handler(config, McapHandlerState::Running);
        handler.add_schema(&dynamic_type("T"), &TypeIdentifier(vec![1]));
        handler.add_schema(&dynamic_type("T"), &TypeIdentifier(vec![1]));
        let inner = handler.lock_inner();
        assert_eq!(inner.schema_records.len(), 1);
        assert_eq!(inner.next_schema_id, SCHEMA_ID_BLANK + 2);
    }

    #[test]
    fn test_pending_eviction_respects_cap() {
        let (config, _guard) = temp_config("evict");
        let config = config.with_max_pending_samples(2).with_only_with_schema(true);
        let handler = handler(config, McapHandlerState::Running);
        let topic = DdsTopic::new("/t", "T");

        for t in 1..=5u64 {
            handler.add_data(&topic, SampleData::new(payload(b"x"), t));
        }
        assert_eq!(handler.pending_samples(), 2);
    }

    #[test]
    fn test_pause_then_start_clears_paused_state() {
        let (config, _guard) = temp_config("pause_start");
        let mut handler = handler(config, McapHandlerState::Running);
        handler.add_schema(&dynamic_type("T"), &TypeIdentifier(vec![1]));
        handler.pause();

        let topic = DdsTopic::new("/t", "T");
        let unknown = DdsTopic::new("/u", "U");
        handler.add_data(&topic, SampleData::new(payload(b"x"), now_ns()));
        handler.add_data(&unknown, SampleData::new(payload(b"y"), now_ns()));
        assert_eq!(handler.buffered_samples(), 1);
        assert_eq!(handler.pending_samples(), 1);

        handler.start();
        assert_eq!(handler.state(), McapHandlerState::Running);
        assert_eq!(handler.buffered_samples(), 0);
        assert_eq!(handler.pending_samples(), 0);
    }

    #[test]
    fn test_trigger_event_outside_paused_is_noop() {
        let (config, _guard) = temp_config("trigger_noop");
        let mut handler = handler(config, McapHandlerState::Running);
        handler.trigger_event();
        assert_eq!(handler.state(), McapHandlerState::Running);
    }

    #[test]
    fn test_remove_outdated_trims_old_samples() {
        let (config, _guard) = temp_config("outdated");
        let config_window = config
            .clone()
            .with_event_window(std::time::Duration::from_secs(5));
        let handler = handler(config_window.clone(), McapHandlerState::Running);
        let now = now_ns();

        // One sample far outside the window, two comfortably inside.
        let old = now.saturating_sub(60_000_000_000);
        let recent = now.saturating_sub(1_000_000_000);
        let mut inner = handler.lock_inner();
        for log_time in [old, recent, now] {
            inner.samples_buffer.push_back(Message {
                sequence: 1,
                channel_id: 0,
                log_time,
                publish_time: log_time,
                payload: payload(b"x"),
            });
        }
        inner.remove_outdated_samples(&config_window);
        assert_eq!(inner.samples_buffer.len(), 2);
        assert_eq!(inner.samples_buffer[0].log_time, recent);
    }

    #[test]
    fn test_blank_channel_rebinds_on_schema() {
        let (config, _guard) = temp_config("rebind");
        let config = config.with_max_pending_samples(0);
        let handler = handler(config, McapHandlerState::Running);
        let topic = DdsTopic::new("/t", "T");

        // No schema, pending disabled: buffered with a blank channel.
        handler.add_data(&topic, SampleData::new(payload(b"x"), 1));
        {
            let inner = handler.lock_inner();
            assert_eq!(inner.channel_records.len(), 1);
            let channel = inner.channel_records.values().next().unwrap();
            assert_eq!(channel.schema_id, SCHEMA_ID_BLANK);
        }

        handler.add_schema(&dynamic_type("T"), &TypeIdentifier(vec![1]));
        let inner = handler.lock_inner();
        assert_eq!(inner.channel_records.len(), 1);
        let channel = inner.channel_records.values().next().unwrap();
        assert_ne!(channel.schema_id, SCHEMA_ID_BLANK);
        assert_eq!(channel.id, 1); // fresh id, old record dropped
    }
}
