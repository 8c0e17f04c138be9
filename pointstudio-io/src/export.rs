//! Exporters from the canonical cloud to interchange bytes
//!
//! Every exporter writes source-frame coordinates (the centering and Y-up
//! swap are undone) so an export/import round trip reproduces the same
//! canonical positions.

use pointstudio_core::{CanonicalCloud, Result};

/// Target formats for [`export_cloud`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    PlyBinary,
    PlyAscii,
    Obj,
    Xyz,
    Pts,
    Csv,
}

impl ExportFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_lowercase().as_str() {
            "ply" | "ply_binary" => ExportFormat::PlyBinary,
            "ply_ascii" => ExportFormat::PlyAscii,
            "obj" => ExportFormat::Obj,
            "xyz" => ExportFormat::Xyz,
            "pts" => ExportFormat::Pts,
            "csv" => ExportFormat::Csv,
            _ => return None,
        })
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::PlyBinary | ExportFormat::PlyAscii => "ply",
            ExportFormat::Obj => "obj",
            ExportFormat::Xyz => "xyz",
            ExportFormat::Pts => "pts",
            ExportFormat::Csv => "csv",
        }
    }
}

/// Serialize a cloud in the requested format
pub fn export_cloud(cloud: &CanonicalCloud, format: ExportFormat) -> Result<Vec<u8>> {
    Ok(match format {
        ExportFormat::PlyBinary => PlyExporter::to_binary(cloud),
        ExportFormat::PlyAscii => PlyExporter::to_ascii(cloud),
        ExportFormat::Obj => ObjExporter::to_bytes(cloud, None),
        ExportFormat::Xyz => XyzExporter::to_bytes(cloud),
        ExportFormat::Pts => PtsExporter::to_bytes(cloud),
        ExportFormat::Csv => CsvExporter::to_bytes(cloud),
    })
}

/// Undo centering and the axis swap: src = (x + cx, -z + cy, y + cz)
fn source_frame_positions(cloud: &CanonicalCloud) -> Vec<[f64; 3]> {
    let c = cloud.center;
    cloud
        .positions
        .chunks_exact(3)
        .map(|p| {
            [
                p[0] as f64 + c[0],
                -(p[2] as f64) + c[1],
                p[1] as f64 + c[2],
            ]
        })
        .collect()
}

fn color_byte(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

fn ply_header(cloud: &CanonicalCloud, format_line: &str) -> String {
    let mut header = String::new();
    header.push_str("ply\n");
    header.push_str(format_line);
    header.push_str(&format!("element vertex {}\n", cloud.point_count()));
    header.push_str("property float x\nproperty float y\nproperty float z\n");
    header.push_str("property uchar red\nproperty uchar green\nproperty uchar blue\n");
    header.push_str("property float intensity\nproperty uchar classification\n");
    if let Some(indices) = &cloud.indices {
        header.push_str(&format!("element face {}\n", indices.len() / 3));
        header.push_str("property list uchar int vertex_indices\n");
    }
    header.push_str("end_header\n");
    header
}

/// PLY writer, binary little-endian and ASCII
pub struct PlyExporter;

impl PlyExporter {
    pub fn to_binary(cloud: &CanonicalCloud) -> Vec<u8> {
        let positions = source_frame_positions(cloud);
        let face_count = cloud.indices.as_ref().map_or(0, |i| i.len() / 3);
        let mut out =
            Vec::with_capacity(256 + positions.len() * 20 + face_count * 13);
        out.extend_from_slice(ply_header(cloud, "format binary_little_endian 1.0\n").as_bytes());

        for (i, p) in positions.iter().enumerate() {
            out.extend_from_slice(&(p[0] as f32).to_le_bytes());
            out.extend_from_slice(&(p[1] as f32).to_le_bytes());
            out.extend_from_slice(&(p[2] as f32).to_le_bytes());
            out.push(color_byte(cloud.colors[i * 3]));
            out.push(color_byte(cloud.colors[i * 3 + 1]));
            out.push(color_byte(cloud.colors[i * 3 + 2]));
            out.extend_from_slice(&cloud.intensities[i].to_le_bytes());
            out.push(cloud.classifications[i].clamp(0.0, 255.0) as u8);
        }

        if let Some(indices) = &cloud.indices {
            for tri in indices.chunks_exact(3) {
                out.push(3u8);
                for &i in tri {
                    out.extend_from_slice(&(i as i32).to_le_bytes());
                }
            }
        }
        out
    }

    pub fn to_ascii(cloud: &CanonicalCloud) -> Vec<u8> {
        let positions = source_frame_positions(cloud);
        let mut out = ply_header(cloud, "format ascii 1.0\n");

        for (i, p) in positions.iter().enumerate() {
            out.push_str(&format!(
                "{} {} {} {} {} {} {} {}\n",
                p[0] as f32,
                p[1] as f32,
                p[2] as f32,
                color_byte(cloud.colors[i * 3]),
                color_byte(cloud.colors[i * 3 + 1]),
                color_byte(cloud.colors[i * 3 + 2]),
                cloud.intensities[i],
                cloud.classifications[i].clamp(0.0, 255.0) as u8
            ));
        }
        if let Some(indices) = &cloud.indices {
            for tri in indices.chunks_exact(3) {
                out.push_str(&format!("3 {} {} {}\n", tri[0], tri[1], tri[2]));
            }
        }
        out.into_bytes()
    }
}

/// OBJ writer; indices are 1-based, normals optional
pub struct ObjExporter;

impl ObjExporter {
    /// `normals` is a flat xyz triple per vertex when provided
    pub fn to_bytes(cloud: &CanonicalCloud, normals: Option<&[f32]>) -> Vec<u8> {
        let positions = source_frame_positions(cloud);
        let mut out = String::new();

        for (i, p) in positions.iter().enumerate() {
            if cloud.has_color {
                out.push_str(&format!(
                    "v {} {} {} {} {} {}\n",
                    p[0] as f32,
                    p[1] as f32,
                    p[2] as f32,
                    cloud.colors[i * 3],
                    cloud.colors[i * 3 + 1],
                    cloud.colors[i * 3 + 2]
                ));
            } else {
                out.push_str(&format!("v {} {} {}\n", p[0] as f32, p[1] as f32, p[2] as f32));
            }
        }

        let has_normals = normals.is_some_and(|n| n.len() == cloud.positions.len());
        if let Some(normals) = normals {
            if has_normals {
                for n in normals.chunks_exact(3) {
                    out.push_str(&format!("vn {} {} {}\n", n[0], n[1], n[2]));
                }
            }
        }

        if let Some(indices) = &cloud.indices {
            for tri in indices.chunks_exact(3) {
                let (a, b, c) = (tri[0] + 1, tri[1] + 1, tri[2] + 1);
                if has_normals {
                    out.push_str(&format!("f {}//{} {}//{} {}//{}\n", a, a, b, b, c, c));
                } else {
                    out.push_str(&format!("f {} {} {}\n", a, b, c));
                }
            }
        }
        out.into_bytes()
    }
}

/// XYZ writer: `x y z R G B` with byte colors
pub struct XyzExporter;

impl XyzExporter {
    pub fn to_bytes(cloud: &CanonicalCloud) -> Vec<u8> {
        let positions = source_frame_positions(cloud);
        let mut out = String::new();
        for (i, p) in positions.iter().enumerate() {
            out.push_str(&format!(
                "{} {} {} {} {} {}\n",
                p[0] as f32,
                p[1] as f32,
                p[2] as f32,
                color_byte(cloud.colors[i * 3]),
                color_byte(cloud.colors[i * 3 + 1]),
                color_byte(cloud.colors[i * 3 + 2])
            ));
        }
        out.into_bytes()
    }
}

/// PTS writer: point count line, then `x y z intensity R G B`
pub struct PtsExporter;

impl PtsExporter {
    pub fn to_bytes(cloud: &CanonicalCloud) -> Vec<u8> {
        let positions = source_frame_positions(cloud);
        let mut out = format!("{}\n", positions.len());
        for (i, p) in positions.iter().enumerate() {
            out.push_str(&format!(
                "{} {} {} {} {} {} {}\n",
                p[0] as f32,
                p[1] as f32,
                p[2] as f32,
                cloud.intensities[i],
                color_byte(cloud.colors[i * 3]),
                color_byte(cloud.colors[i * 3 + 1]),
                color_byte(cloud.colors[i * 3 + 2])
            ));
        }
        out.into_bytes()
    }
}

/// CSV writer with a fixed header row
pub struct CsvExporter;

impl CsvExporter {
    pub fn to_bytes(cloud: &CanonicalCloud) -> Vec<u8> {
        let positions = source_frame_positions(cloud);
        let mut out = String::from("x,y,z,r,g,b,intensity,classification\n");
        for (i, p) in positions.iter().enumerate() {
            out.push_str(&format!(
                "{},{},{},{},{},{},{},{}\n",
                p[0] as f32,
                p[1] as f32,
                p[2] as f32,
                color_byte(cloud.colors[i * 3]),
                color_byte(cloud.colors[i * 3 + 1]),
                color_byte(cloud.colors[i * 3 + 2]),
                cloud.intensities[i],
                cloud.classifications[i] as u32
            ));
        }
        out.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::{CloudAssembler, SourcePoint};
    use crate::ply::PlyReader;
    use crate::pts::PtsReader;
    use crate::xyz::XyzReader;

    fn sample_cloud() -> CanonicalCloud {
        let mut a = CloudAssembler::new("TEST");
        a.push(SourcePoint {
            color: Some([1.0, 0.0, 0.0]),
            intensity: Some(0.5),
            classification: Some(2.0),
            ..SourcePoint::xyz(1.0, 2.0, 3.0)
        });
        a.push(SourcePoint {
            color: Some([0.0, 1.0, 0.0]),
            intensity: Some(0.25),
            classification: Some(6.0),
            ..SourcePoint::xyz(-1.0, 0.0, 1.0)
        });
        a.push(SourcePoint {
            color: Some([0.0, 0.0, 1.0]),
            intensity: Some(1.0),
            classification: Some(0.0),
            ..SourcePoint::xyz(0.0, -2.0, 2.0)
        });
        a.finish().unwrap()
    }

    #[test]
    fn test_ply_binary_round_trip() {
        let cloud = sample_cloud();
        let bytes = PlyExporter::to_binary(&cloud);
        let reloaded = PlyReader::read_cloud(&bytes).unwrap();
        reloaded.validate().unwrap();

        assert_eq!(reloaded.point_count(), cloud.point_count());
        for i in 0..cloud.positions.len() {
            assert!(
                (reloaded.positions[i] - cloud.positions[i]).abs() < 1e-4,
                "position {} drifted: {} vs {}",
                i,
                reloaded.positions[i],
                cloud.positions[i]
            );
        }
        assert!(reloaded.has_color);
        assert!((reloaded.colors[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ply_binary_record_sizes() {
        let cloud = sample_cloud();
        let bytes = PlyExporter::to_binary(&cloud);
        let header_end = bytes
            .windows(11)
            .position(|w| w == b"end_header\n")
            .unwrap()
            + 11;
        // 20 bytes per vertex, no faces
        assert_eq!(bytes.len() - header_end, cloud.point_count() * 20);
    }

    #[test]
    fn test_ply_binary_face_block() {
        let mut cloud = sample_cloud();
        cloud.indices = Some(vec![0, 1, 2]);
        let bytes = PlyExporter::to_binary(&cloud);
        let header_end = bytes
            .windows(11)
            .position(|w| w == b"end_header\n")
            .unwrap()
            + 11;
        assert_eq!(bytes.len() - header_end, cloud.point_count() * 20 + 13);
    }

    #[test]
    fn test_ply_ascii_round_trip_counts() {
        let cloud = sample_cloud();
        let bytes = PlyExporter::to_ascii(&cloud);
        let reloaded = PlyReader::read_cloud(&bytes).unwrap();
        assert_eq!(reloaded.point_count(), 3);
    }

    #[test]
    fn test_obj_one_based_faces() {
        let mut cloud = sample_cloud();
        cloud.indices = Some(vec![0, 1, 2]);
        let text = String::from_utf8(ObjExporter::to_bytes(&cloud, None)).unwrap();
        assert!(text.contains("f 1 2 3"));
    }

    #[test]
    fn test_obj_normals_syntax() {
        let mut cloud = sample_cloud();
        cloud.indices = Some(vec![0, 1, 2]);
        let normals = vec![0.0f32, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0];
        let text = String::from_utf8(ObjExporter::to_bytes(&cloud, Some(&normals))).unwrap();
        assert!(text.contains("vn 0 1 0"));
        assert!(text.contains("f 1//1 2//2 3//3"));
    }

    #[test]
    fn test_xyz_round_trip() {
        let cloud = sample_cloud();
        let bytes = XyzExporter::to_bytes(&cloud);
        let reloaded = XyzReader::read_cloud(&bytes).unwrap();
        assert_eq!(reloaded.point_count(), 3);
        assert!(reloaded.has_color);
    }

    #[test]
    fn test_pts_round_trip_with_count_line() {
        let cloud = sample_cloud();
        let bytes = PtsExporter::to_bytes(&cloud);
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("3\n"));
        let reloaded = PtsReader::read_cloud(&bytes).unwrap();
        assert_eq!(reloaded.point_count(), 3);
        assert!((reloaded.intensities[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_csv_header() {
        let cloud = sample_cloud();
        let text = String::from_utf8(CsvExporter::to_bytes(&cloud)).unwrap();
        assert!(text.starts_with("x,y,z,r,g,b,intensity,classification\n"));
        assert_eq!(text.lines().count(), 4);
    }
}
