//! STL (stereolithography) support
//!
//! Binary/ASCII detection is by byte length: a file whose length equals
//! `84 + tri_count * 50` is binary even when it starts with `solid`. Vertices
//! are deduplicated through a canonical-string spatial hash so shared corners
//! become shared indices.

use crate::assemble::{CloudAssembler, SourcePoint};
use pointstudio_core::{CanonicalCloud, Error, Result};
use std::collections::HashMap;

/// Builds the unique-vertex list and triangle indices
struct VertexDedup {
    lookup: HashMap<String, u32>,
    vertices: Vec<[f64; 3]>,
    colors: Vec<Option<[f32; 3]>>,
    indices: Vec<u32>,
}

impl VertexDedup {
    fn new() -> Self {
        Self {
            lookup: HashMap::new(),
            vertices: Vec::new(),
            colors: Vec::new(),
            indices: Vec::new(),
        }
    }

    fn add_vertex(&mut self, v: [f64; 3], color: Option<[f32; 3]>) -> u32 {
        let key = format!("{:.6},{:.6},{:.6}", v[0], v[1], v[2]);
        match self.lookup.get(&key) {
            Some(&i) => {
                if color.is_some() {
                    self.colors[i as usize] = color;
                }
                i
            }
            None => {
                let i = self.vertices.len() as u32;
                self.lookup.insert(key, i);
                self.vertices.push(v);
                self.colors.push(color);
                i
            }
        }
    }

    fn add_triangle(&mut self, tri: [[f64; 3]; 3], color: Option<[f32; 3]>) {
        for v in tri {
            let i = self.add_vertex(v, color);
            self.indices.push(i);
        }
    }

    fn finish(self, tag: &str) -> Result<CanonicalCloud> {
        let mut assembler = CloudAssembler::with_capacity(tag, self.vertices.len());
        for (v, c) in self.vertices.iter().zip(&self.colors) {
            assembler.push(SourcePoint {
                x: v[0],
                y: v[1],
                z: v[2],
                color: *c,
                intensity: None,
                classification: None,
            });
        }
        if !self.indices.is_empty() {
            assembler.set_indices(self.indices);
        }
        assembler.finish()
    }
}

/// Decode a VisCAM attribute word: bit 15 set means BGR 5-5-5 face color
fn attribute_color(attr: u16) -> Option<[f32; 3]> {
    if attr & 0x8000 == 0 {
        return None;
    }
    let r = (attr & 0x1f) as f32 / 31.0;
    let g = ((attr >> 5) & 0x1f) as f32 / 31.0;
    let b = ((attr >> 10) & 0x1f) as f32 / 31.0;
    Some([r, g, b])
}

/// Reader for STL byte ranges
pub struct StlReader;

impl StlReader {
    pub fn read_cloud(data: &[u8]) -> Result<CanonicalCloud> {
        if Self::is_binary(data) {
            Self::read_binary(data)
        } else {
            Self::read_ascii(data)
        }
    }

    /// Length arithmetic beats the `solid` prefix: exporters lie about it
    fn is_binary(data: &[u8]) -> bool {
        if data.len() < 84 {
            return false;
        }
        let tri_count =
            u32::from_le_bytes([data[80], data[81], data[82], data[83]]) as usize;
        data.len() == 84 + tri_count * 50
    }

    fn read_binary(data: &[u8]) -> Result<CanonicalCloud> {
        let tri_count =
            u32::from_le_bytes([data[80], data[81], data[82], data[83]]) as usize;
        let mut dedup = VertexDedup::new();

        for t in 0..tri_count {
            let base = 84 + t * 50;
            // 12 bytes of face normal ignored; three vertices follow
            let mut tri = [[0.0f64; 3]; 3];
            for (v, corner) in tri.iter_mut().enumerate() {
                for (c, value) in corner.iter_mut().enumerate() {
                    let off = base + 12 + v * 12 + c * 4;
                    *value = f32::from_le_bytes([
                        data[off],
                        data[off + 1],
                        data[off + 2],
                        data[off + 3],
                    ]) as f64;
                }
            }
            let attr = u16::from_le_bytes([data[base + 48], data[base + 49]]);
            dedup.add_triangle(tri, attribute_color(attr));
        }

        dedup.finish("STL")
    }

    fn read_ascii(data: &[u8]) -> Result<CanonicalCloud> {
        let text = String::from_utf8_lossy(data);
        if !text.trim_start().starts_with("solid") {
            return Err(Error::InvalidSignature(
                "STL file is neither binary nor ASCII solid".to_string(),
            ));
        }

        let mut dedup = VertexDedup::new();
        let mut corners: Vec<[f64; 3]> = Vec::with_capacity(3);
        let mut in_loop = false;

        for line in text.lines() {
            let line = line.trim();
            if line.starts_with("outer loop") {
                in_loop = true;
                corners.clear();
            } else if line.starts_with("endloop") {
                if corners.len() == 3 {
                    dedup.add_triangle([corners[0], corners[1], corners[2]], None);
                }
                in_loop = false;
            } else if in_loop && line.starts_with("vertex") {
                let values: Vec<f64> = line
                    .split_whitespace()
                    .skip(1)
                    .filter_map(|t| t.parse().ok())
                    .collect();
                if values.len() >= 3 {
                    corners.push([values[0], values[1], values[2]]);
                }
            }
        }

        dedup.finish("STL")
    }
}
