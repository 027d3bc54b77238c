// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Message types flowing through the handler.

use crate::types::Payload;

/// A sample as delivered by the upstream DDS pipe.
///
/// The pipe stamps both timestamps: `log_time` is the reception time,
/// `publish_time` the source timestamp carried in the sample info. Both
/// are nanoseconds since the Unix epoch.
#[derive(Debug, Clone)]
pub struct SampleData {
    /// Payload bytes, shared with the pool
    pub payload: Payload,
    /// Reception timestamp (nanoseconds)
    pub log_time: u64,
    /// Source timestamp (nanoseconds)
    pub publish_time: u64,
}

impl SampleData {
    /// Create a sample with identical log and publish timestamps.
    pub fn new(payload: Payload, timestamp: u64) -> Self {
        Self {
            payload,
            log_time: timestamp,
            publish_time: timestamp,
        }
    }
}

/// A message accepted by the handler.
///
/// The sequence number is assigned on acceptance and is strictly
/// increasing per handler. The channel id is assigned when the message is
/// bound to a channel, which happens at buffering time for known types
/// and at persist time for pending samples.
#[derive(Debug, Clone)]
pub struct Message {
    /// Handler-wide sequence number, assigned on acceptance
    pub sequence: u64,
    /// Channel this message is bound to (0 until assigned)
    pub channel_id: u16,
    /// Reception timestamp (nanoseconds)
    pub log_time: u64,
    /// Source timestamp (nanoseconds)
    pub publish_time: u64,
    /// Payload bytes, shared with the pool
    pub payload: Payload,
}

impl Message {
    /// Build a message from an accepted sample.
    pub fn from_sample(sequence: u64, sample: SampleData) -> Self {
        Self {
            sequence,
            channel_id: 0,
            log_time: sample.log_time,
            publish_time: sample.publish_time,
            payload: sample.payload,
        }
    }

    /// Payload length in bytes.
    pub fn data_size(&self) -> u64 {
        self.payload.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PayloadPool;

    #[test]
    fn test_from_sample() {
        let pool = PayloadPool::new();
        let sample = SampleData {
            payload: pool.wrap(&[1, 2, 3]),
            log_time: 200,
            publish_time: 150,
        };
        let msg = Message::from_sample(7, sample);
        assert_eq!(msg.sequence, 7);
        assert_eq!(msg.channel_id, 0);
        assert_eq!(msg.log_time, 200);
        assert_eq!(msg.publish_time, 150);
        assert_eq!(msg.data_size(), 3);
    }

    #[test]
    fn test_sample_new_shares_timestamp() {
        let pool = PayloadPool::new();
        let sample = SampleData::new(pool.wrap(b"x"), 42);
        assert_eq!(sample.log_time, 42);
        assert_eq!(sample.publish_time, 42);
    }
}
