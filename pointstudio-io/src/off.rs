//! OFF (Object File Format) support
//!
//! Handles OFF, COFF, NOFF and CNOFF: the magic line tells whether vertex
//! normals and colors trail the coordinates. Counts may sit on the magic line
//! itself or on the next data line. Polygons are fan-triangulated.

use crate::assemble::{CloudAssembler, SourcePoint};
use pointstudio_core::{CanonicalCloud, Error, Result};

/// Reader for OFF byte ranges
pub struct OffReader;

impl OffReader {
    pub fn read_cloud(data: &[u8]) -> Result<CanonicalCloud> {
        let text = String::from_utf8_lossy(data);
        let mut lines = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'));

        let magic_line = lines
            .next()
            .ok_or_else(|| Error::Truncated("empty OFF file".to_string()))?;
        let mut magic_tokens = magic_line.split_whitespace();
        let magic = magic_tokens.next().unwrap_or("");

        let (has_color, has_normals) = match magic {
            "OFF" => (false, false),
            "COFF" => (true, false),
            "NOFF" => (false, true),
            "CNOFF" | "NCOFF" => (true, true),
            _ => {
                return Err(Error::InvalidSignature(format!(
                    "not an OFF file (magic {})",
                    magic
                )));
            }
        };

        // Counts either share the magic line or come next
        let trailing: Vec<usize> = magic_tokens.filter_map(|t| t.parse().ok()).collect();
        let (vertex_count, face_count) = if trailing.len() >= 2 {
            (trailing[0], trailing[1])
        } else {
            let line = lines
                .next()
                .ok_or_else(|| Error::Truncated("OFF counts line missing".to_string()))?;
            let counts: Vec<usize> = line.split_whitespace().filter_map(|t| t.parse().ok()).collect();
            if counts.len() < 2 {
                return Err(Error::InvalidData(format!("bad OFF counts line: {}", line)));
            }
            (counts[0], counts[1])
        };

        let mut vertices: Vec<[f64; 3]> = Vec::with_capacity(vertex_count);
        let mut colors: Vec<Option<[f64; 3]>> = Vec::with_capacity(vertex_count);
        for _ in 0..vertex_count {
            let line = lines
                .next()
                .ok_or_else(|| Error::Truncated("OFF vertex list ended early".to_string()))?;
            let values: Vec<f64> = line.split_whitespace().filter_map(|t| t.parse().ok()).collect();
            if values.len() < 3 {
                return Err(Error::InvalidData(format!("bad OFF vertex: {}", line)));
            }
            vertices.push([values[0], values[1], values[2]]);

            // Normals precede colors in the per-vertex record
            let color_start = if has_normals { 6 } else { 3 };
            colors.push(if has_color && values.len() >= color_start + 3 {
                Some([
                    values[color_start],
                    values[color_start + 1],
                    values[color_start + 2],
                ])
            } else {
                None
            });
        }

        let mut indices: Vec<u32> = Vec::new();
        for _ in 0..face_count {
            let line = match lines.next() {
                Some(l) => l,
                None => break,
            };
            let values: Vec<i64> = line.split_whitespace().filter_map(|t| t.parse().ok()).collect();
            if values.is_empty() {
                continue;
            }
            let n = values[0] as usize;
            if values.len() < n + 1 || n < 3 {
                continue;
            }
            let face = &values[1..n + 1];
            for &i in face {
                if i < 0 || i >= vertex_count as i64 {
                    return Err(Error::InvalidData(format!("OFF face index {} out of range", i)));
                }
            }
            for w in face[1..].windows(2) {
                indices.push(face[0] as u32);
                indices.push(w[0] as u32);
                indices.push(w[1] as u32);
            }
        }

        let color_max = colors
            .iter()
            .flatten()
            .flat_map(|c| c.iter())
            .fold(0.0f64, |m, &v| m.max(v));
        let color_scale = if color_max > 1.0 { 255.0 } else { 1.0 };

        let mut assembler = CloudAssembler::with_capacity("OFF", vertices.len());
        for (v, c) in vertices.iter().zip(&colors) {
            assembler.push(SourcePoint {
                x: v[0],
                y: v[1],
                z: v[2],
                color: c.map(|c| {
                    [
                        (c[0] / color_scale) as f32,
                        (c[1] / color_scale) as f32,
                        (c[2] / color_scale) as f32,
                    ]
                }),
                intensity: None,
                classification: None,
            });
        }
        if !indices.is_empty() {
            assembler.set_indices(indices);
        }

        assembler.finish()
    }
}
