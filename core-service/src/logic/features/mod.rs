//! Features Module - Flow sample shape and label layout
//!
//! Everything the model's input and output schema depends on lives here,
//! so swapping a model only touches this module and the model sidecar.

pub mod layout;
pub mod sample;


// Re-export common types
pub use layout::{SampleShape, TrafficLabel, LABEL_COUNT, LABEL_LAYOUT, LABEL_VERSION};
pub use sample::{normalize_byte, FlowSample, ShapeError};
