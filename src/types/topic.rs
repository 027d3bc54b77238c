// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! DDS topic types.
//!
//! A topic pairs a name with a type name and the QoS under which samples
//! are delivered. The QoS is carried into each MCAP channel's metadata as
//! a deterministic string so a reader can reconstruct the publication
//! settings.

use serde::{Deserialize, Serialize};

/// Reliability kind of a DDS publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    /// Samples may be dropped in transit.
    #[default]
    BestEffort,
    /// Samples are retransmitted until acknowledged.
    Reliable,
}

/// Durability kind of a DDS publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Samples exist only while in transit.
    #[default]
    Volatile,
    /// Late joiners receive previously published samples.
    TransientLocal,
}

/// QoS settings attached to a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TopicQos {
    /// Reliability kind
    pub reliability: Reliability,
    /// Durability kind
    pub durability: Durability,
    /// Whether ownership is exclusive
    pub exclusive_ownership: bool,
    /// Whether the topic type is keyed
    pub keyed: bool,
}

impl TopicQos {
    /// Serialize the QoS into the channel-metadata string.
    ///
    /// The field order is fixed so two equal QoS values always produce
    /// byte-identical strings.
    pub fn serialize(&self) -> String {
        format!(
            "reliability={};durability={};ownership={};keyed={}",
            match self.reliability {
                Reliability::BestEffort => "best_effort",
                Reliability::Reliable => "reliable",
            },
            match self.durability {
                Durability::Volatile => "volatile",
                Durability::TransientLocal => "transient_local",
            },
            if self.exclusive_ownership {
                "exclusive"
            } else {
                "shared"
            },
            self.keyed,
        )
    }
}

/// A DDS topic: name, type name, and QoS.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DdsTopic {
    /// Topic name (e.g., "/joint_states")
    pub name: String,
    /// Type name (e.g., "sensor_msgs::msg::JointState")
    pub type_name: String,
    /// QoS the samples were delivered under
    pub qos: TopicQos,
}

impl DdsTopic {
    /// Create a topic with default QoS.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            qos: TopicQos::default(),
        }
    }

    /// Set the QoS.
    pub fn with_qos(mut self, qos: TopicQos) -> Self {
        self.qos = qos;
        self
    }
}
