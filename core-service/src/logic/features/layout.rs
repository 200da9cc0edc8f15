//! Label Layout - Centralized Label Definition
//!
//! **CRITICAL: This file controls the model output schema**
//!
//! ## Rules (NEVER break these):
//! 1. Add label → increment LABEL_VERSION
//! 2. Change order → increment LABEL_VERSION
//! 3. Remove label → increment LABEL_VERSION
//!
//! The order of `LABEL_LAYOUT` is the order of the model's output vector.

use std::fmt;

use crc32fast::Hasher;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

// ============================================================================
// LABEL VERSION
// ============================================================================

/// Current label layout version
/// MUST be incremented when layout changes
pub const LABEL_VERSION: u8 = 1;

// ============================================================================
// LABELS
// ============================================================================

/// Closed set of traffic categories the classifier can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrafficLabel {
    #[serde(rename = "Web Browsing")]
    Browsing,
    #[serde(rename = "Chat")]
    Chat,
    #[serde(rename = "File Transfer")]
    FileTransfer,
    #[serde(rename = "Gaming")]
    Gaming,
    #[serde(rename = "Video Streaming")]
    Streaming,
    #[serde(rename = "Video Conferencing")]
    VideoConference,
    #[serde(rename = "VoIP")]
    Voip,
    #[serde(rename = "Unknown")]
    Unknown,
}

/// Labels in exact model output order
/// This is the SINGLE SOURCE OF TRUTH for output layout
pub const LABEL_LAYOUT: &[TrafficLabel] = &[
    TrafficLabel::Browsing,        // 0
    TrafficLabel::Chat,            // 1
    TrafficLabel::FileTransfer,    // 2
    TrafficLabel::Gaming,          // 3
    TrafficLabel::Streaming,       // 4
    TrafficLabel::VideoConference, // 5
    TrafficLabel::Voip,            // 6
    TrafficLabel::Unknown,         // 7
];

/// Total number of labels
/// IMPORTANT: Must match LABEL_LAYOUT.len()!
pub const LABEL_COUNT: usize = 8;

impl TrafficLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficLabel::Browsing => "Web Browsing",
            TrafficLabel::Chat => "Chat",
            TrafficLabel::FileTransfer => "File Transfer",
            TrafficLabel::Gaming => "Gaming",
            TrafficLabel::Streaming => "Video Streaming",
            TrafficLabel::VideoConference => "Video Conferencing",
            TrafficLabel::Voip => "VoIP",
            TrafficLabel::Unknown => "Unknown",
        }
    }

    /// Label at a model output index
    pub fn from_index(index: usize) -> Option<Self> {
        LABEL_LAYOUT.get(index).copied()
    }

    /// Model output index of this label
    pub fn index(&self) -> usize {
        LABEL_LAYOUT
            .iter()
            .position(|l| l == self)
            .unwrap_or(LABEL_COUNT - 1)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, TrafficLabel::Unknown)
    }
}

impl fmt::Display for TrafficLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// LAYOUT HASH
// ============================================================================

static LAYOUT_HASH: Lazy<u32> = Lazy::new(|| layout_hash_of(LABEL_VERSION, LABEL_LAYOUT.iter().map(|l| l.as_str())));

/// CRC32 of the label layout, used to detect model/label mismatches
pub fn layout_hash() -> u32 {
    *LAYOUT_HASH
}

/// CRC32 of an arbitrary label list (e.g. from a model sidecar)
pub fn layout_hash_of<'a>(version: u8, names: impl IntoIterator<Item = &'a str>) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[version]);

    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
    }

    hasher.finalize()
}

// ============================================================================
// TENSOR SHAPE
// ============================================================================

/// Fixed (packets × bytes) shape the engine accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleShape {
    pub packets: usize,
    pub bytes: usize,
}

impl SampleShape {
    pub fn new(packets: usize, bytes: usize) -> Self {
        Self { packets, bytes }
    }

    pub fn len(&self) -> usize {
        self.packets * self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SampleShape {
    fn default() -> Self {
        Self {
            packets: crate::constants::DEFAULT_PACKETS,
            bytes: crate::constants::DEFAULT_BYTES,
        }
    }
}

impl fmt::Display for SampleShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.packets, self.bytes)
    }
}

// ============================================================================
// TESTS
// ============================================================================
