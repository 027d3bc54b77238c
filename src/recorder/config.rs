// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Recorder configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Output file settings: where files go and how large they may grow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Directory MCAP files are written into
    pub output_dir: PathBuf,
    /// Prefix of generated file names (`<prefix>_<index>.mcap`)
    pub file_prefix: String,
    /// Byte ceiling per file; exceeding it triggers rollover
    pub max_file_size: u64,
    /// Cumulative byte ceiling across all files of a run
    pub max_size: u64,
    /// Reserved tail per file to absorb final-write accounting error
    pub safety_margin: u64,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            file_prefix: "recording".to_string(),
            max_file_size: 1024 * 1024 * 1024,
            max_size: 10 * 1024 * 1024 * 1024,
            safety_margin: 0,
        }
    }
}

impl OutputSettings {
    /// Set the output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the file name prefix.
    pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    /// Set the per-file byte ceiling.
    pub fn with_max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Set the cumulative byte ceiling.
    pub fn with_max_size(mut self, size: u64) -> Self {
        self.max_size = size;
        self
    }

    /// Set the per-file safety margin.
    pub fn with_safety_margin(mut self, margin: u64) -> Self {
        self.safety_margin = margin;
        self
    }
}

/// Configuration of the ingest handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McapHandlerConfig {
    /// Output file settings
    pub output: OutputSettings,
    /// Max messages held in the RUNNING buffer before an automatic dump
    pub buffer_size: usize,
    /// Seconds of history retained for an event trigger while PAUSED
    #[serde(with = "duration_secs")]
    pub event_window: Duration,
    /// Interval at which the event thread trims outdated samples
    #[serde(with = "duration_secs")]
    pub cleanup_period: Duration,
    /// Per-type pending-queue cap; 0 disables pending, -1 is unbounded
    pub max_pending_samples: i32,
    /// Drop samples without a known schema instead of writing them blank
    pub only_with_schema: bool,
    /// Append the dynamic-types attachment at each file close
    pub record_types: bool,
}

impl Default for McapHandlerConfig {
    fn default() -> Self {
        Self {
            output: OutputSettings::default(),
            buffer_size: 100,
            event_window: Duration::from_secs(20),
            cleanup_period: Duration::from_secs(10),
            max_pending_samples: 5000,
            only_with_schema: false,
            record_types: true,
        }
    }
}

impl McapHandlerConfig {
    /// Set the output settings.
    pub fn with_output(mut self, output: OutputSettings) -> Self {
        self.output = output;
        self
    }

    /// Set the RUNNING buffer capacity.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the PAUSED event window.
    pub fn with_event_window(mut self, window: Duration) -> Self {
        self.event_window = window;
        self
    }

    /// Set the event-thread cleanup period.
    pub fn with_cleanup_period(mut self, period: Duration) -> Self {
        self.cleanup_period = period;
        self
    }

    /// Set the per-type pending-queue cap.
    pub fn with_max_pending_samples(mut self, max: i32) -> Self {
        self.max_pending_samples = max;
        self
    }

    /// Set whether schemaless samples are dropped.
    pub fn with_only_with_schema(mut self, only: bool) -> Self {
        self.only_with_schema = only;
        self
    }

    /// Set whether dynamic types are attached at file close.
    pub fn with_record_types(mut self, record: bool) -> Self {
        self.record_types = record;
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
