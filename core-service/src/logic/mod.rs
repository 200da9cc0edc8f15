//! Logic Module - classification pipeline stages
//!
//! ## Layout
//! - `features/` - Flow sample shape, normalization, label layout
//! - `model/` - ONNX inference and the worker pool
//! - `confidence/` - Tier assignment
//! - `fallback/` - DNS / ASN heuristics
//! - `stats/` - Shared counters and latency window
//! - `broadcast/` - Topic fan-out
//! - `meter` - Meter ID codec
//! - `pipeline` - Wires the stages together

pub mod broadcast;
pub mod confidence;
pub mod config;
pub mod fallback;
pub mod features;
pub mod meter;
pub mod model;
pub mod pipeline;
pub mod stats;
