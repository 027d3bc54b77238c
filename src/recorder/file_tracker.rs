// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Output file bookkeeping.
//!
//! Names the files of a recording run and enforces the cumulative disk
//! budget: a new file may only be opened when its minimum size still fits
//! under `max_size` together with everything written so far.

use std::path::PathBuf;

use crate::core::{RecorderError, Result};
use crate::recorder::config::OutputSettings;

/// A file that has been closed, with its final size.
#[derive(Debug, Clone)]
struct ClosedFile {
    path: PathBuf,
    size: u64,
}

/// Tracks the files of a recording run against the disk budget.
#[derive(Debug)]
pub struct FileTracker {
    settings: OutputSettings,
    closed: Vec<ClosedFile>,
    current: Option<(PathBuf, u64)>,
    next_index: u32,
}

impl FileTracker {
    /// Create a tracker, ensuring the output directory exists.
    pub fn new(settings: OutputSettings) -> Result<Self> {
        std::fs::create_dir_all(&settings.output_dir).map_err(|e| {
            RecorderError::initialization(
                "FileTracker",
                format!(
                    "cannot create output directory {}: {e}",
                    settings.output_dir.display()
                ),
            )
        })?;
        Ok(Self {
            settings,
            closed: Vec::new(),
            current: None,
            next_index: 0,
        })
    }

    /// Reserve the next file of the run.
    ///
    /// Fails with a full-disk error when `min_size` cannot fit in a file
    /// (`min_size > max_file_size`) or the cumulative budget has no room
    /// for another `min_size` bytes.
    pub fn new_file(&mut self, min_size: u64) -> Result<()> {
        if min_size > self.settings.max_file_size {
            return Err(RecorderError::full_disk(format!(
                "minimum MCAP size ({min_size} bytes) exceeds the maximum file size ({} bytes)",
                self.settings.max_file_size
            )));
        }
        let total = self.get_total_size();
        if total + min_size > self.settings.max_size {
            return Err(RecorderError::full_disk(format!(
                "{total} bytes already accounted; a file of at least {min_size} bytes does not \
                 fit under the {} byte budget",
                self.settings.max_size
            )));
        }

        let filename = format!("{}_{}.mcap", self.settings.file_prefix, self.next_index);
        self.next_index += 1;
        let path = self.settings.output_dir.join(filename);
        tracing::debug!(path = %path.display(), min_size, "new output file");
        self.current = Some((path, 0));
        Ok(())
    }

    /// Path of the file currently open.
    pub fn get_current_filename(&self) -> Option<&PathBuf> {
        self.current.as_ref().map(|(path, _)| path)
    }

    /// Update the accounted size of the current file.
    pub fn set_current_file_size(&mut self, size: u64) {
        if let Some((_, current_size)) = self.current.as_mut() {
            *current_size = size;
        }
    }

    /// Bytes accounted across closed files plus the current one.
    pub fn get_total_size(&self) -> u64 {
        let closed: u64 = self.closed.iter().map(|f| f.size).sum();
        closed + self.current.as_ref().map_or(0, |(_, size)| *size)
    }

    /// Close the current file, freezing its accounted size.
    pub fn close_file(&mut self) {
        if let Some((path, size)) = self.current.take() {
            self.closed.push(ClosedFile { path, size });
        }
    }

    /// Number of files closed so far.
    pub fn closed_files(&self) -> usize {
        self.closed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_settings(max_file: u64, max_total: u64) -> OutputSettings {
        let random = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        OutputSettings::default()
            .with_output_dir(
                std::env::temp_dir().join(format!("roborec_ft_{}_{random}", std::process::id())),
            )
            .with_file_prefix("run")
            .with_max_file_size(max_file)
            .with_max_size(max_total)
    }

    #[test]
    fn test_file_names_are_sequential() {
        let settings = temp_settings(1000, 10_000);
        let dir = settings.output_dir.clone();
        let mut tracker = FileTracker::new(settings).unwrap();

        tracker.new_file(10).unwrap();
        assert!(tracker
            .get_current_filename()
            .unwrap()
            .ends_with("run_0.mcap"));
        tracker.close_file();
        tracker.new_file(10).unwrap();
        assert!(tracker
            .get_current_filename()
            .unwrap()
            .ends_with("run_1.mcap"));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_min_size_over_max_file_size() {
        let settings = temp_settings(100, 10_000);
        let dir = settings.output_dir.clone();
        let mut tracker = FileTracker::new(settings).unwrap();
        let err = tracker.new_file(200).unwrap_err();
        assert!(matches!(err, RecorderError::FullDisk { .. }));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_cumulative_budget() {
        let settings = temp_settings(600, 1000);
        let dir = settings.output_dir.clone();
        let mut tracker = FileTracker::new(settings).unwrap();

        tracker.new_file(100).unwrap();
        tracker.set_current_file_size(600);
        tracker.close_file();
        assert_eq!(tracker.closed_files(), 1);
        assert_eq!(tracker.get_total_size(), 600);

        // 600 + 500 > 1000
        let err = tracker.new_file(500).unwrap_err();
        assert!(matches!(err, RecorderError::FullDisk { .. }));

        // But 400 still fits.
        tracker.new_file(400).unwrap();
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_total_includes_current() {
        let settings = temp_settings(600, 1000);
        let dir = settings.output_dir.clone();
        let mut tracker = FileTracker::new(settings).unwrap();
        tracker.new_file(100).unwrap();
        tracker.set_current_file_size(250);
        assert_eq!(tracker.get_total_size(), 250);
        std::fs::remove_dir_all(dir).ok();
    }
}
