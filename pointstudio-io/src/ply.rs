//! PLY (Stanford polygon) format support
//!
//! Reads ASCII and binary little-endian PLY. The property table is a dynamic
//! schema: vertex attributes are located by canonical names and every other
//! element is skipped by field-size arithmetic.

use crate::assemble::{CloudAssembler, SourcePoint};
use pointstudio_core::{CanonicalCloud, Error, Result};

/// PLY storage formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
}

/// Scalar property encodings with their byte widths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlyType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl PlyType {
    fn parse(token: &str) -> Result<Self> {
        Ok(match token {
            "char" | "int8" => PlyType::I8,
            "uchar" | "uint8" => PlyType::U8,
            "short" | "int16" => PlyType::I16,
            "ushort" | "uint16" => PlyType::U16,
            "int" | "int32" => PlyType::I32,
            "uint" | "uint32" => PlyType::U32,
            "float" | "float32" => PlyType::F32,
            "double" | "float64" => PlyType::F64,
            other => {
                return Err(Error::InvalidData(format!("unknown PLY type {}", other)));
            }
        })
    }

    fn size(self) -> usize {
        match self {
            PlyType::I8 | PlyType::U8 => 1,
            PlyType::I16 | PlyType::U16 => 2,
            PlyType::I32 | PlyType::U32 | PlyType::F32 => 4,
            PlyType::F64 => 8,
        }
    }

    fn read_le(self, data: &[u8]) -> f64 {
        match self {
            PlyType::I8 => data[0] as i8 as f64,
            PlyType::U8 => data[0] as f64,
            PlyType::I16 => i16::from_le_bytes([data[0], data[1]]) as f64,
            PlyType::U16 => u16::from_le_bytes([data[0], data[1]]) as f64,
            PlyType::I32 => i32::from_le_bytes([data[0], data[1], data[2], data[3]]) as f64,
            PlyType::U32 => u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as f64,
            PlyType::F32 => f32::from_le_bytes([data[0], data[1], data[2], data[3]]) as f64,
            PlyType::F64 => f64::from_le_bytes([
                data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
            ]),
        }
    }
}

/// One declared property: scalar, or list with a count prefix
#[derive(Debug, Clone)]
pub struct PlyProperty {
    pub name: String,
    pub value_type: PlyType,
    pub list_count_type: Option<PlyType>,
}

#[derive(Debug, Clone)]
pub struct PlyElement {
    pub name: String,
    pub count: usize,
    pub properties: Vec<PlyProperty>,
}

#[derive(Debug, Clone)]
pub struct PlyHeader {
    pub format: PlyFormat,
    pub elements: Vec<PlyElement>,
}

/// Where the vertex attributes live within the vertex property list
#[derive(Debug, Default)]
struct VertexLayout {
    x: Option<usize>,
    y: Option<usize>,
    z: Option<usize>,
    red: Option<usize>,
    green: Option<usize>,
    blue: Option<usize>,
    intensity: Option<usize>,
}

impl VertexLayout {
    fn from_properties(props: &[PlyProperty]) -> Self {
        let mut layout = Self::default();
        for (i, p) in props.iter().enumerate() {
            match p.name.as_str() {
                "x" => layout.x = Some(i),
                "y" => layout.y = Some(i),
                "z" => layout.z = Some(i),
                "red" | "r" => layout.red = Some(i),
                "green" | "g" => layout.green = Some(i),
                "blue" | "b" => layout.blue = Some(i),
                "intensity" | "scalar_intensity" => layout.intensity = Some(i),
                _ => {}
            }
        }
        layout
    }

    fn has_color(&self) -> bool {
        self.red.is_some() && self.green.is_some() && self.blue.is_some()
    }
}

/// Reader for PLY byte ranges
pub struct PlyReader;

impl PlyReader {
    pub fn read_cloud(data: &[u8]) -> Result<CanonicalCloud> {
        let (header, body_start) = Self::parse_header(data)?;
        let vertex_pos = header
            .elements
            .iter()
            .position(|e| e.name == "vertex")
            .ok_or_else(|| Error::InvalidData("PLY file has no vertex element".to_string()))?;

        let layout = VertexLayout::from_properties(&header.elements[vertex_pos].properties);
        if layout.x.is_none() || layout.y.is_none() || layout.z.is_none() {
            return Err(Error::InvalidData("PLY vertex element lacks x/y/z".to_string()));
        }

        // Rows of the attribute values we care about, still unnormalized
        let rows = match header.format {
            PlyFormat::Ascii => Self::read_ascii_rows(data, body_start, &header, vertex_pos)?,
            PlyFormat::BinaryLittleEndian => {
                Self::read_binary_rows(data, body_start, &header, vertex_pos)?
            }
        };

        // 0..255 colors betray themselves by exceeding 1
        let color_scale = if layout.has_color() {
            let mut max = 0.0f64;
            for row in &rows {
                for idx in [layout.red.unwrap(), layout.green.unwrap(), layout.blue.unwrap()] {
                    max = max.max(row[idx]);
                }
            }
            if max > 1.0 { 255.0 } else { 1.0 }
        } else {
            1.0
        };
        let intensity_scale = if let Some(idx) = layout.intensity {
            let max = rows.iter().fold(0.0f64, |m, row| m.max(row[idx]));
            if max > 1.0 { 255.0 } else { 1.0 }
        } else {
            1.0
        };

        let mut assembler = CloudAssembler::with_capacity("PLY", rows.len());
        for row in &rows {
            let color = if layout.has_color() {
                Some([
                    (row[layout.red.unwrap()] / color_scale) as f32,
                    (row[layout.green.unwrap()] / color_scale) as f32,
                    (row[layout.blue.unwrap()] / color_scale) as f32,
                ])
            } else {
                None
            };
            assembler.push(SourcePoint {
                x: row[layout.x.unwrap()],
                y: row[layout.y.unwrap()],
                z: row[layout.z.unwrap()],
                color,
                intensity: layout
                    .intensity
                    .map(|idx| (row[idx] / intensity_scale) as f32),
                classification: None,
            });
        }

        assembler.finish()
    }

    /// Parse the ASCII header; returns the header and the body byte offset
    pub fn parse_header(data: &[u8]) -> Result<(PlyHeader, usize)> {
        let mut offset = 0usize;
        let mut lines = Vec::new();
        while offset < data.len() {
            let end = data[offset..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|p| offset + p)
                .ok_or_else(|| Error::Truncated("PLY header never ends".to_string()))?;
            let line = std::str::from_utf8(&data[offset..end])
                .map_err(|_| Error::InvalidData("PLY header is not UTF-8".to_string()))?
                .trim_end_matches('\r')
                .trim()
                .to_string();
            offset = end + 1;
            let done = line == "end_header";
            lines.push(line);
            if done {
                break;
            }
        }

        if lines.first().map(|l| l.as_str()) != Some("ply") {
            return Err(Error::InvalidSignature("missing ply magic line".to_string()));
        }
        if lines.last().map(|l| l.as_str()) != Some("end_header") {
            return Err(Error::Truncated("PLY header never ends".to_string()));
        }

        let mut format = None;
        let mut elements: Vec<PlyElement> = Vec::new();

        for line in &lines[1..lines.len() - 1] {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.first() {
                Some(&"comment") | Some(&"obj_info") | None => {}
                Some(&"format") => {
                    format = Some(match tokens.get(1) {
                        Some(&"ascii") => PlyFormat::Ascii,
                        Some(&"binary_little_endian") => PlyFormat::BinaryLittleEndian,
                        Some(other) => {
                            return Err(Error::UnsupportedVariant(format!(
                                "PLY format {}",
                                other
                            )));
                        }
                        None => {
                            return Err(Error::InvalidData("bare format line".to_string()));
                        }
                    });
                }
                Some(&"element") => {
                    if tokens.len() < 3 {
                        return Err(Error::InvalidData(format!("bad element line: {}", line)));
                    }
                    let count = tokens[2]
                        .parse()
                        .map_err(|_| Error::InvalidData(format!("bad element count: {}", line)))?;
                    elements.push(PlyElement {
                        name: tokens[1].to_string(),
                        count,
                        properties: Vec::new(),
                    });
                }
                Some(&"property") => {
                    let element = elements
                        .last_mut()
                        .ok_or_else(|| Error::InvalidData("property before element".to_string()))?;
                    if tokens.get(1) == Some(&"list") {
                        if tokens.len() < 5 {
                            return Err(Error::InvalidData(format!("bad list property: {}", line)));
                        }
                        element.properties.push(PlyProperty {
                            name: tokens[4].to_string(),
                            value_type: PlyType::parse(tokens[3])?,
                            list_count_type: Some(PlyType::parse(tokens[2])?),
                        });
                    } else {
                        if tokens.len() < 3 {
                            return Err(Error::InvalidData(format!("bad property: {}", line)));
                        }
                        element.properties.push(PlyProperty {
                            name: tokens[2].to_string(),
                            value_type: PlyType::parse(tokens[1])?,
                            list_count_type: None,
                        });
                    }
                }
                _ => {}
            }
        }

        let format =
            format.ok_or_else(|| Error::InvalidData("PLY header lacks a format line".to_string()))?;
        Ok((PlyHeader { format, elements }, offset))
    }

    fn read_ascii_rows(
        data: &[u8],
        body_start: usize,
        header: &PlyHeader,
        vertex_pos: usize,
    ) -> Result<Vec<Vec<f64>>> {
        let body = std::str::from_utf8(&data[body_start..])
            .map_err(|_| Error::InvalidData("ASCII PLY body is not UTF-8".to_string()))?;
        let mut lines = body.lines().filter(|l| !l.trim().is_empty());

        let mut rows = Vec::new();
        for (i, element) in header.elements.iter().enumerate() {
            if i != vertex_pos {
                // Each row of a foreign element is one line
                for _ in 0..element.count {
                    lines.next();
                }
                continue;
            }
            for _ in 0..element.count {
                let line = lines
                    .next()
                    .ok_or_else(|| Error::Truncated("ASCII PLY body ended early".to_string()))?;
                let mut row = Vec::with_capacity(element.properties.len());
                let mut tokens = line.split_whitespace();
                for prop in &element.properties {
                    if prop.list_count_type.is_some() {
                        let count: usize = tokens
                            .next()
                            .and_then(|t| t.parse().ok())
                            .ok_or_else(|| Error::InvalidData("bad list count".to_string()))?;
                        for _ in 0..count {
                            tokens.next();
                        }
                        row.push(0.0);
                    } else {
                        let value: f64 = tokens
                            .next()
                            .and_then(|t| t.parse().ok())
                            .ok_or_else(|| {
                                Error::InvalidData(format!("bad vertex value in: {}", line))
                            })?;
                        row.push(value);
                    }
                }
                rows.push(row);
            }
        }
        Ok(rows)
    }

    fn read_binary_rows(
        data: &[u8],
        body_start: usize,
        header: &PlyHeader,
        vertex_pos: usize,
    ) -> Result<Vec<Vec<f64>>> {
        let mut offset = body_start;
        let mut rows = Vec::new();

        for (i, element) in header.elements.iter().enumerate() {
            for _ in 0..element.count {
                let keep = i == vertex_pos;
                let mut row = if keep {
                    Vec::with_capacity(element.properties.len())
                } else {
                    Vec::new()
                };
                for prop in &element.properties {
                    if let Some(count_type) = prop.list_count_type {
                        if offset + count_type.size() > data.len() {
                            return Err(Error::Truncated("binary PLY ended early".to_string()));
                        }
                        let count = count_type.read_le(&data[offset..]) as usize;
                        offset += count_type.size() + count * prop.value_type.size();
                        if keep {
                            row.push(0.0);
                        }
                    } else {
                        if offset + prop.value_type.size() > data.len() {
                            return Err(Error::Truncated("binary PLY ended early".to_string()));
                        }
                        let value = prop.value_type.read_le(&data[offset..]);
                        offset += prop.value_type.size();
                        if keep {
                            row.push(value);
                        }
                    }
                }
                if offset > data.len() {
                    return Err(Error::Truncated("binary PLY ended early".to_string()));
                }
                if keep {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_triangle_vertices() {
        let text = "ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nend_header\n0 0 0\n1 0 0\n0 1 0\n";
        let cloud = PlyReader::read_cloud(text.as_bytes()).unwrap();
        cloud.validate().unwrap();

        assert_eq!(cloud.point_count(), 3);
        assert!(!cloud.has_color);
        assert!(cloud.colors.iter().all(|&c| (c - 0.8).abs() < 1e-6));

        // AABB midpoint (0.5, 0.5, 0), then the Y-up swap
        let p0 = cloud.position(0);
        assert!((p0[0] - -0.5).abs() < 1e-6);
        assert!((p0[1] - 0.0).abs() < 1e-6);
        assert!((p0[2] - 0.5).abs() < 1e-6);
        let p2 = cloud.position(2);
        assert!((p2[2] - -0.5).abs() < 1e-6);
    }

    #[test]
    fn test_ascii_with_uchar_colors() {
        let text = "ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\nproperty float y\nproperty float z\nproperty uchar red\nproperty uchar green\nproperty uchar blue\nend_header\n0 0 0 255 0 0\n1 0 0 0 128 0\n";
        let cloud = PlyReader::read_cloud(text.as_bytes()).unwrap();
        assert!(cloud.has_color);
        assert!((cloud.colors[0] - 1.0).abs() < 1e-6);
        assert!((cloud.colors[4] - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_unit_range_colors_not_rescaled() {
        let text = "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\nproperty float z\nproperty float red\nproperty float green\nproperty float blue\nend_header\n0 0 0 1.0 0.5 0.25\n";
        let cloud = PlyReader::read_cloud(text.as_bytes()).unwrap();
        assert!((cloud.colors[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_binary_little_endian() {
        let mut data = Vec::new();
        data.extend_from_slice(
            b"ply\nformat binary_little_endian 1.0\nelement vertex 2\nproperty float x\nproperty float y\nproperty float z\nend_header\n",
        );
        for v in [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let cloud = PlyReader::read_cloud(&data).unwrap();
        assert_eq!(cloud.point_count(), 2);
        // Source span x 1..4, y 2..5, z 3..6; check the raw header bounds
        assert_eq!(cloud.header.bounds.min_x, 1.0);
        assert_eq!(cloud.header.bounds.max_y, 5.0);
    }

    #[test]
    fn test_skips_face_element() {
        let text = "ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nelement face 1\nproperty list uchar int vertex_indices\nend_header\n0 0 0\n1 0 0\n0 1 0\n3 0 1 2\n";
        let cloud = PlyReader::read_cloud(text.as_bytes()).unwrap();
        assert_eq!(cloud.point_count(), 3);
        assert!(cloud.indices.is_none());
    }

    #[test]
    fn test_big_endian_rejected() {
        let text = "ply\nformat binary_big_endian 1.0\nelement vertex 0\nend_header\n";
        assert!(matches!(
            PlyReader::read_cloud(text.as_bytes()),
            Err(Error::UnsupportedVariant(_))
        ));
    }

    #[test]
    fn test_bad_magic_rejected() {
        assert!(matches!(
            PlyReader::read_cloud(b"not_ply\n"),
            Err(Error::InvalidSignature(_))
        ));
    }
}
