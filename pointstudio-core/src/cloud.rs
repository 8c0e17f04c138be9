//! Canonical point cloud record shared by decoders, editors and the renderer

use crate::bounds::Aabb;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Color used when a source carries no per-point color
pub const DEFAULT_GRAY: f32 = 0.8;

/// Soft ceiling on decoded points; decoders stride-sample above this
pub const MAX_DECODED_POINTS: usize = 5_000_000;

/// Source-frame header kept alongside the normalized buffers.
///
/// `scale`/`offset` mirror the LAS header fields; non-LAS decoders leave them
/// at identity so re-export to LAS-like formats stays well defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHeader {
    pub bounds: Aabb,
    pub source_tag: String,
    pub scale: [f64; 3],
    pub offset: [f64; 3],
    pub point_format: u8,
    pub version: String,
}

impl SourceHeader {
    pub fn new(source_tag: &str) -> Self {
        Self {
            bounds: Aabb::empty(),
            source_tag: source_tag.to_string(),
            scale: [1.0, 1.0, 1.0],
            offset: [0.0, 0.0, 0.0],
            point_format: 0,
            version: String::new(),
        }
    }
}

/// One canonical in-memory cloud.
///
/// Positions are f32 triples in a right-handed Y-up frame, centered at the
/// source AABB midpoint. Colors are RGB triples in [0,1]; intensities and
/// classifications are one value per point. `indices` is present only when
/// the source was a mesh or after reconstruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalCloud {
    pub positions: Vec<f32>,
    pub colors: Vec<f32>,
    pub intensities: Vec<f32>,
    pub classifications: Vec<f32>,
    pub indices: Option<Vec<u32>>,
    pub header: SourceHeader,
    pub center: [f64; 3],
    pub has_color: bool,
    pub has_intensity: bool,
    pub has_classification: bool,
}

impl CanonicalCloud {
    pub fn point_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.as_ref().map_or(0, |i| i.len() / 3)
    }

    /// Position of point `i` as an array
    pub fn position(&self, i: usize) -> [f32; 3] {
        [
            self.positions[i * 3],
            self.positions[i * 3 + 1],
            self.positions[i * 3 + 2],
        ]
    }

    /// Bounds of the centered Y-up positions
    pub fn world_bounds(&self) -> Aabb {
        let mut b = Aabb::empty();
        for p in self.positions.chunks_exact(3) {
            b.expand(p[0] as f64, p[1] as f64, p[2] as f64);
        }
        b
    }

    /// Check every structural invariant the renderer and LOD layer rely on.
    pub fn validate(&self) -> Result<()> {
        let n = self.positions.len();
        if n % 3 != 0 {
            return Err(Error::InvalidData(format!(
                "positions length {} is not a multiple of 3",
                n
            )));
        }
        if self.colors.len() != n {
            return Err(Error::InvalidData(format!(
                "colors length {} does not match positions length {}",
                self.colors.len(),
                n
            )));
        }
        if self.intensities.len() != n / 3 {
            return Err(Error::InvalidData(format!(
                "intensities length {} does not match point count {}",
                self.intensities.len(),
                n / 3
            )));
        }
        if self.classifications.len() != n / 3 {
            return Err(Error::InvalidData(format!(
                "classifications length {} does not match point count {}",
                self.classifications.len(),
                n / 3
            )));
        }
        for &c in &self.colors {
            if !c.is_finite() || !(0.0..=1.0).contains(&c) {
                return Err(Error::InvalidData(format!("color component {} out of [0,1]", c)));
            }
        }
        for &i in &self.intensities {
            if !i.is_finite() || !(0.0..=1.0).contains(&i) {
                return Err(Error::InvalidData(format!("intensity {} out of [0,1]", i)));
            }
        }
        for &c in &self.classifications {
            if !c.is_finite() || c < 0.0 || c.fract() != 0.0 {
                return Err(Error::InvalidData(format!(
                    "classification {} is not a nonnegative integer",
                    c
                )));
            }
        }
        if let Some(indices) = &self.indices {
            if indices.len() % 3 != 0 {
                return Err(Error::InvalidData(format!(
                    "index count {} is not a multiple of 3",
                    indices.len()
                )));
            }
            let limit = (n / 3) as u32;
            for &i in indices {
                if i >= limit {
                    return Err(Error::InvalidData(format!(
                        "index {} out of range for {} vertices",
                        i, limit
                    )));
                }
            }
        }
        if !self.header.bounds.is_empty() {
            let b = &self.header.bounds;
            if b.min_x > b.max_x || b.min_y > b.max_y || b.min_z > b.max_z {
                return Err(Error::InvalidData("inverted source bounds".to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_cloud() -> CanonicalCloud {
        CanonicalCloud {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
            colors: vec![DEFAULT_GRAY; 6],
            intensities: vec![1.0, 1.0],
            classifications: vec![0.0, 2.0],
            indices: None,
            header: SourceHeader::new("TEST"),
            center: [0.0, 0.0, 0.0],
            has_color: false,
            has_intensity: false,
            has_classification: true,
        }
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        let cloud = tiny_cloud();
        assert!(cloud.validate().is_ok());
        assert_eq!(cloud.point_count(), 2);
    }

    #[test]
    fn test_validate_rejects_length_mismatch() {
        let mut cloud = tiny_cloud();
        cloud.intensities.pop();
        assert!(cloud.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_color() {
        let mut cloud = tiny_cloud();
        cloud.colors[0] = 1.5;
        assert!(cloud.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_index() {
        let mut cloud = tiny_cloud();
        cloud.indices = Some(vec![0, 1, 2]);
        assert!(cloud.validate().is_err());
        cloud.indices = Some(vec![0, 1, 0]);
        assert!(cloud.validate().is_ok());
    }
}
