//! Flow Sample - per-flow packet digest
//!
//! A flow arrives as a (packets × bytes) matrix of raw byte values, either
//! nested row by row or flattened. It only lives for one classification call.

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use super::layout::SampleShape;

/// Raw packet digest of one flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlowSample {
    /// One row per packet
    Matrix(Vec<Vec<f64>>),
    /// Row-major flattened matrix
    Flat(Vec<f64>),
}

/// Sample cannot be reshaped to the engine's fixed tensor
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShapeError {
    #[error("expected {expected} packets, got {actual}")]
    Packets { expected: usize, actual: usize },

    #[error("packet {row} has {actual} bytes, expected {expected}")]
    RowLength { row: usize, expected: usize, actual: usize },

    #[error("expected {expected} values ({shape}), got {actual}")]
    Length { shape: SampleShape, expected: usize, actual: usize },

    #[error("non-finite value at position {index}")]
    NonFinite { index: usize },

    #[error("reshape failed: {0}")]
    Reshape(String),
}

/// Truncate a raw byte value to an integer, then scale by 255.
///
/// Truncation comes first, so `200.9` becomes `200 / 255`. Values outside
/// 0..=255 are not clamped.
#[inline]
pub fn normalize_byte(raw: f64) -> f32 {
    (raw.trunc() / 255.0) as f32
}

impl FlowSample {
    /// Number of raw values carried
    pub fn value_count(&self) -> usize {
        match self {
            FlowSample::Matrix(rows) => rows.iter().map(Vec::len).sum(),
            FlowSample::Flat(values) => values.len(),
        }
    }

    /// Validate the shape without building a tensor
    pub fn validate(&self, shape: SampleShape) -> Result<(), ShapeError> {
        match self {
            FlowSample::Matrix(rows) => {
                if rows.len() != shape.packets {
                    return Err(ShapeError::Packets {
                        expected: shape.packets,
                        actual: rows.len(),
                    });
                }
                if let Some((row, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != shape.bytes) {
                    return Err(ShapeError::RowLength {
                        row,
                        expected: shape.bytes,
                        actual: r.len(),
                    });
                }
            }
            FlowSample::Flat(values) => {
                if values.len() != shape.len() {
                    return Err(ShapeError::Length {
                        shape,
                        expected: shape.len(),
                        actual: values.len(),
                    });
                }
            }
        }

        let mut values = self.values();
        if let Some(index) = values.position(|v| !v.is_finite()) {
            return Err(ShapeError::NonFinite { index });
        }

        Ok(())
    }

    /// Build the normalized (1, packets, bytes) input tensor
    pub fn to_tensor(&self, shape: SampleShape) -> Result<Array3<f32>, ShapeError> {
        self.validate(shape)?;

        let data: Vec<f32> = self.values().map(normalize_byte).collect();

        Array3::from_shape_vec((1, shape.packets, shape.bytes), data)
            .map_err(|e| ShapeError::Reshape(e.to_string()))
    }

    fn values(&self) -> Box<dyn Iterator<Item = f64> + '_> {
        match self {
            FlowSample::Matrix(rows) => Box::new(rows.iter().flat_map(|r| r.iter().copied())),
            FlowSample::Flat(values) => Box::new(values.iter().copied()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> SampleShape {
        SampleShape::new(2, 3)
    }

    #[test]
    fn test_truncates_before_scaling() {
        assert_eq!(normalize_byte(255.0), 1.0);
        assert_eq!(normalize_byte(0.99), 0.0);
        assert_eq!(normalize_byte(200.9), (200.0f64 / 255.0) as f32);
        assert_ne!(normalize_byte(200.9), (200.9f64 / 255.0) as f32);
    }

    #[test]
    fn test_matrix_to_tensor() {
        let sample = FlowSample::Matrix(vec![vec![0.0, 51.0, 255.0], vec![102.7, 0.0, 0.0]]);
        let tensor = sample.to_tensor(shape()).unwrap();

        assert_eq!(tensor.shape(), &[1, 2, 3]);
        assert_eq!(tensor[[0, 0, 1]], (51.0f64 / 255.0) as f32);
        assert_eq!(tensor[[0, 0, 2]], 1.0);
        assert_eq!(tensor[[0, 1, 0]], (102.0f64 / 255.0) as f32);
    }

    #[test]
    fn test_flat_is_reshaped_row_major() {
        let sample = FlowSample::Flat(vec![1.0, 2.0, 3.0, 4.0, 5.0, 255.0]);
        let tensor = sample.to_tensor(shape()).unwrap();
        assert_eq!(tensor[[0, 1, 2]], 1.0);
        assert_eq!(tensor[[0, 1, 0]], (4.0f64 / 255.0) as f32);
    }

    #[test]
    fn test_wrong_packet_count() {
        let sample = FlowSample::Matrix(vec![vec![0.0; 3]]);
        assert_eq!(
            sample.to_tensor(shape()),
            Err(ShapeError::Packets { expected: 2, actual: 1 })
        );
    }

    #[test]
    fn test_ragged_row() {
        let sample = FlowSample::Matrix(vec![vec![0.0; 3], vec![0.0; 4]]);
        assert_eq!(
            sample.validate(shape()),
            Err(ShapeError::RowLength { row: 1, expected: 3, actual: 4 })
        );
    }

    #[test]
    fn test_flat_wrong_length() {
        let sample = FlowSample::Flat(vec![0.0; 5]);
        assert!(matches!(
            sample.validate(shape()),
            Err(ShapeError::Length { expected: 6, actual: 5, .. })
        ));
    }

    #[test]
    fn test_non_finite_rejected() {
        let sample = FlowSample::Flat(vec![0.0, 1.0, f64::NAN, 0.0, 0.0, 0.0]);
        assert_eq!(sample.validate(shape()), Err(ShapeError::NonFinite { index: 2 }));
    }

    #[test]
    fn test_json_forms() {
        let nested: FlowSample = serde_json::from_str("[[1, 2, 3], [4, 5, 6]]").unwrap();
        assert!(matches!(nested, FlowSample::Matrix(_)));

        let flat: FlowSample = serde_json::from_str("[1, 2, 3, 4, 5, 6]").unwrap();
        assert!(matches!(flat, FlowSample::Flat(_)));
        assert_eq!(flat.value_count(), 6);
    }
}
