// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Shared data types (payload pool, DDS topics).

pub mod payload;
pub mod topic;

pub use payload::{Payload, PayloadPool};
pub use topic::{DdsTopic, Durability, Reliability, TopicQos};
