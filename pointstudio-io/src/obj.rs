//! Wavefront OBJ support
//!
//! Extracts `v` records (with optional per-vertex color) and `f` faces. Face
//! vertex tokens may be `v`, `v/vt`, `v/vt/vn` or `v//vn`; only the leading
//! vertex index is used. Negative indices count back from the current vertex
//! list. Polygons are fan-triangulated. A file with faces keeps its full
//! vertex set so the topology survives.

use crate::assemble::{CloudAssembler, SourcePoint};
use pointstudio_core::{CanonicalCloud, Error, Result};

/// Reader for OBJ byte ranges
pub struct ObjReader;

impl ObjReader {
    pub fn read_cloud(data: &[u8]) -> Result<CanonicalCloud> {
        let text = String::from_utf8_lossy(data);

        let mut vertices: Vec<[f64; 3]> = Vec::new();
        let mut colors: Vec<Option<[f64; 3]>> = Vec::new();
        let mut indices: Vec<u32> = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some("v") => {
                    let values: Vec<f64> = tokens.filter_map(|t| t.parse().ok()).collect();
                    if values.len() < 3 {
                        return Err(Error::InvalidData(format!("bad vertex line: {}", line)));
                    }
                    vertices.push([values[0], values[1], values[2]]);
                    colors.push(if values.len() >= 6 {
                        Some([values[3], values[4], values[5]])
                    } else {
                        None
                    });
                }
                Some("f") => {
                    let face: Vec<i64> = tokens
                        .filter_map(|t| t.split('/').next())
                        .filter_map(|t| t.parse().ok())
                        .collect();
                    if face.len() < 3 {
                        continue;
                    }
                    let resolve = |idx: i64| -> Result<u32> {
                        let i = if idx < 0 {
                            vertices.len() as i64 + idx
                        } else {
                            idx - 1
                        };
                        if i < 0 || i >= vertices.len() as i64 {
                            return Err(Error::InvalidData(format!(
                                "face index {} out of range",
                                idx
                            )));
                        }
                        Ok(i as u32)
                    };
                    let anchor = resolve(face[0])?;
                    for w in face[1..].windows(2) {
                        indices.push(anchor);
                        indices.push(resolve(w[0])?);
                        indices.push(resolve(w[1])?);
                    }
                }
                _ => {}
            }
        }

        // 0..255 exporters give themselves away with components above 1
        let color_scale = colors
            .iter()
            .flatten()
            .flat_map(|c| c.iter())
            .fold(0.0f64, |m, &v| m.max(v));
        let color_scale = if color_scale > 1.0 { 255.0 } else { 1.0 };

        let mut assembler = CloudAssembler::with_capacity("OBJ", vertices.len());
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertices_only() {
        let text = "# cloud\nv 0 0 0\nv 1 0 0\nv 0 1 0\n";
        let cloud = ObjReader::read_cloud(text.as_bytes()).unwrap();
        assert_eq!(cloud.point_count(), 3);
        assert!(cloud.indices.is_none());
    }

    #[test]
    fn test_faces_fan_triangulated() {
        let text = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n";
        let cloud = ObjReader::read_cloud(text.as_bytes()).unwrap();
        let indices = cloud.indices.as_ref().unwrap();
        assert_eq!(indices, &vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn test_slash_and_negative_indices() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1/1/1 -2//2 -1\n";
        let cloud = ObjReader::read_cloud(text.as_bytes()).unwrap();
        assert_eq!(cloud.indices.as_ref().unwrap(), &vec![0, 1, 2]);
    }

    #[test]
    fn test_vertex_colors() {
        let text = "v 0 0 0 1 0 0\nv 1 0 0 0 0.5 0\n";
        let cloud = ObjReader::read_cloud(text.as_bytes()).unwrap();
        assert!(cloud.has_color);
        assert!((cloud.colors[0] - 1.0).abs() < 1e-6);
        assert!((cloud.colors[4] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_out_of_range_face_fails() {
        let text = "v 0 0 0\nf 1 2 3\n";
        assert!(ObjReader::read_cloud(text.as_bytes()).is_err());
    }
}
