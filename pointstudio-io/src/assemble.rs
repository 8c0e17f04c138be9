//! Shared assembly funnel for every decoder
//!
//! Decoders push source-frame points into a [`CloudAssembler`]; `finish`
//! establishes every canonical-cloud invariant in one place: source bounds,
//! AABB-midpoint centering, the Z-up to Y-up frame swap, attribute defaults,
//! and the stride-sampling point ceiling.

use pointstudio_core::{
    Aabb, CanonicalCloud, Error, Result, SourceHeader, DEFAULT_GRAY, MAX_DECODED_POINTS,
};

/// One point in the source frame, attributes optional
#[derive(Debug, Clone, Copy, Default)]
pub struct SourcePoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub color: Option<[f32; 3]>,
    pub intensity: Option<f32>,
    pub classification: Option<f32>,
}

impl SourcePoint {
    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            ..Default::default()
        }
    }
}

/// Accumulates decoder output and normalizes it into a [`CanonicalCloud`]
pub struct CloudAssembler {
    header: SourceHeader,
    positions: Vec<f64>,
    colors: Vec<f32>,
    intensities: Vec<f32>,
    classifications: Vec<f32>,
    indices: Option<Vec<u32>>,
    explicit_bounds: Option<Aabb>,
    has_color: bool,
    has_intensity: bool,
    has_classification: bool,
}

impl CloudAssembler {
    pub fn new(source_tag: &str) -> Self {
        Self {
            header: SourceHeader::new(source_tag),
            positions: Vec::new(),
            colors: Vec::new(),
            intensities: Vec::new(),
            classifications: Vec::new(),
            indices: None,
            explicit_bounds: None,
            has_color: false,
            has_intensity: false,
            has_classification: false,
        }
    }

    pub fn with_capacity(source_tag: &str, capacity: usize) -> Self {
        let mut a = Self::new(source_tag);
        a.positions.reserve(capacity * 3);
        a.colors.reserve(capacity * 3);
        a.intensities.reserve(capacity);
        a.classifications.reserve(capacity);
        a
    }

    /// Number of points pushed so far
    pub fn len(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn push(&mut self, point: SourcePoint) {
        self.positions.push(point.x);
        self.positions.push(point.y);
        self.positions.push(point.z);
        self.header.bounds.expand(point.x, point.y, point.z);

        let [r, g, b] = point.color.unwrap_or([DEFAULT_GRAY; 3]);
        self.colors.push(r.clamp(0.0, 1.0));
        self.colors.push(g.clamp(0.0, 1.0));
        self.colors.push(b.clamp(0.0, 1.0));
        self.has_color |= point.color.is_some();

        self.intensities
            .push(point.intensity.unwrap_or(1.0).clamp(0.0, 1.0));
        self.has_intensity |= point.intensity.is_some();

        self.classifications
            .push(point.classification.unwrap_or(0.0).max(0.0).round());
        self.has_classification |= point.classification.is_some();
    }

    pub fn push_xyz(&mut self, x: f64, y: f64, z: f64) {
        self.push(SourcePoint::xyz(x, y, z));
    }

    /// Triangle indices into the pushed points; disables stride sampling
    pub fn set_indices(&mut self, indices: Vec<u32>) {
        self.indices = Some(indices);
    }

    /// Record the LAS-like scale/offset for the header
    pub fn set_scale_offset(&mut self, scale: [f64; 3], offset: [f64; 3]) {
        self.header.scale = scale;
        self.header.offset = offset;
    }

    pub fn set_point_format(&mut self, format: u8) {
        self.header.point_format = format;
    }

    pub fn set_version(&mut self, version: &str) {
        self.header.version = version.to_string();
    }

    /// Use the file's declared bounds instead of the accumulated ones.
    ///
    /// Decoders that stride-sample at read time (LAS) pass the header bounds
    /// here so centering stays exact for the full cloud.
    pub fn set_source_bounds(&mut self, bounds: Aabb) {
        self.explicit_bounds = Some(bounds);
    }

    /// Normalize everything pushed so far into a canonical cloud.
    ///
    /// Fails with `EmptyCloud` when nothing was pushed and `InvalidData` when
    /// a decoder produced out-of-range triangle indices.
    pub fn finish(mut self) -> Result<CanonicalCloud> {
        if self.positions.is_empty() {
            return Err(Error::EmptyCloud);
        }

        if let Some(bounds) = self.explicit_bounds.take() {
            self.header.bounds = bounds;
        }

        let raw_count = self.positions.len() / 3;
        if raw_count > MAX_DECODED_POINTS && self.indices.is_none() {
            let stride = raw_count.div_ceil(MAX_DECODED_POINTS);
            self.apply_stride(stride);
        }

        let count = self.positions.len() / 3;
        let center = self.header.bounds.center();

        // Source Z becomes up (Y); source Y flips into -Z to stay right-handed.
        let mut positions = Vec::with_capacity(count * 3);
        for p in self.positions.chunks_exact(3) {
            positions.push((p[0] - center[0]) as f32);
            positions.push((p[2] - center[2]) as f32);
            positions.push(-(p[1] - center[1]) as f32);
        }

        if !self.has_color {
            self.colors.clear();
            self.colors.resize(count * 3, DEFAULT_GRAY);
        }

        if let Some(indices) = &self.indices {
            if indices.len() % 3 != 0 {
                return Err(Error::InvalidData(format!(
                    "triangle index count {} is not a multiple of 3",
                    indices.len()
                )));
            }
            let limit = count as u32;
            if indices.iter().any(|&i| i >= limit) {
                return Err(Error::InvalidData(
                    "triangle index out of range".to_string(),
                ));
            }
        }

        Ok(CanonicalCloud {
            positions,
            colors: self.colors,
            intensities: self.intensities,
            classifications: self.classifications,
            indices: self.indices,
            header: self.header,
            center,
            has_color: self.has_color,
            has_intensity: self.has_intensity,
            has_classification: self.has_classification,
        })
    }

    fn apply_stride(&mut self, stride: usize) {
        let count = self.positions.len() / 3;
        let kept = (count + stride - 1) / stride;

        let mut positions = Vec::with_capacity(kept * 3);
        let mut colors = Vec::with_capacity(kept * 3);
        let mut intensities = Vec::with_capacity(kept);
        let mut classifications = Vec::with_capacity(kept);

        for i in (0..count).step_by(stride) {
            positions.extend_from_slice(&self.positions[i * 3..i * 3 + 3]);
            colors.extend_from_slice(&self.colors[i * 3..i * 3 + 3]);
            intensities.push(self.intensities[i]);
            classifications.push(self.classifications[i]);
        }

        self.positions = positions;
        self.colors = colors;
        self.intensities = intensities;
        self.classifications = classifications;
    }
}
