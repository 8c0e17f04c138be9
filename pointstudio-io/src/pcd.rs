//! PCD (Point Cloud Library) format support
//!
//! Reads ascii, binary and binary_compressed data sections. Compressed
//! bodies are LZF-packed column-major field arrays; the viewpoint line is a
//! translation plus quaternion applied to every point.

use crate::assemble::{CloudAssembler, SourcePoint};
use pointstudio_core::{CanonicalCloud, Error, Result, UnitQuaternion, Vector3};

/// PCD field value categories from the TYPE line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcdFieldKind {
    Float,
    Unsigned,
    Signed,
}

/// One column of the PCD schema
#[derive(Debug, Clone)]
pub struct PcdField {
    pub name: String,
    pub kind: PcdFieldKind,
    pub size: usize,
    pub count: usize,
}

impl PcdField {
    fn byte_len(&self) -> usize {
        self.size * self.count
    }
}

/// PCD data section encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcdDataFormat {
    Ascii,
    Binary,
    BinaryCompressed,
}

#[derive(Debug, Clone)]
pub struct PcdHeader {
    pub fields: Vec<PcdField>,
    pub width: usize,
    pub height: usize,
    pub points: usize,
    pub viewpoint: [f64; 7], // tx ty tz qw qx qy qz
    pub data_format: PcdDataFormat,
}

impl PcdHeader {
    fn record_len(&self) -> usize {
        self.fields.iter().map(|f| f.byte_len()).sum()
    }

    fn field(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Byte offset of a field within a row-major record
    fn field_offset(&self, index: usize) -> usize {
        self.fields[..index].iter().map(|f| f.byte_len()).sum()
    }
}

/// Decompress an LZF block (libLZF encoding, as PCL writes it)
pub fn lzf_decompress(input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_len);
    let mut ip = 0usize;

    while ip < input.len() {
        let ctrl = input[ip] as usize;
        ip += 1;

        if ctrl < 32 {
            // literal run of ctrl + 1 bytes
            let run = ctrl + 1;
            if ip + run > input.len() {
                return Err(Error::Truncated("LZF literal run overruns input".to_string()));
            }
            out.extend_from_slice(&input[ip..ip + run]);
            ip += run;
        } else {
            // back reference
            let mut len = ctrl >> 5;
            if len == 7 {
                if ip >= input.len() {
                    return Err(Error::Truncated("LZF length byte missing".to_string()));
                }
                len += input[ip] as usize;
                ip += 1;
            }
            if ip >= input.len() {
                return Err(Error::Truncated("LZF offset byte missing".to_string()));
            }
            let offset = ((ctrl & 0x1f) << 8) | input[ip] as usize;
            ip += 1;

            let mut pos = out
                .len()
                .checked_sub(offset + 1)
                .ok_or_else(|| Error::InvalidData("LZF back reference before start".to_string()))?;
            for _ in 0..len + 2 {
                let b = out[pos];
                out.push(b);
                pos += 1;
            }
        }
    }

    if out.len() != expected_len {
        return Err(Error::Truncated(format!(
            "LZF produced {} bytes, expected {}",
            out.len(),
            expected_len
        )));
    }
    Ok(out)
}

fn read_scalar(data: &[u8], kind: PcdFieldKind, size: usize) -> f64 {
    match (kind, size) {
        (PcdFieldKind::Float, 4) => {
            f32::from_le_bytes([data[0], data[1], data[2], data[3]]) as f64
        }
        (PcdFieldKind::Float, _) => f64::from_le_bytes([
            data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
        ]),
        (PcdFieldKind::Unsigned, 1) => data[0] as f64,
        (PcdFieldKind::Unsigned, 2) => u16::from_le_bytes([data[0], data[1]]) as f64,
        (PcdFieldKind::Unsigned, _) => {
            u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as f64
        }
        (PcdFieldKind::Signed, 1) => data[0] as i8 as f64,
        (PcdFieldKind::Signed, 2) => i16::from_le_bytes([data[0], data[1]]) as f64,
        (PcdFieldKind::Signed, _) => {
            i32::from_le_bytes([data[0], data[1], data[2], data[3]]) as f64
        }
    }
}

/// Unpack a PCL packed-rgb float: bits are 0xAARRGGBB
fn unpack_rgb(bits: u32) -> [f32; 3] {
    [
        ((bits >> 16) & 0xff) as f32 / 255.0,
        ((bits >> 8) & 0xff) as f32 / 255.0,
        (bits & 0xff) as f32 / 255.0,
    ]
}

/// Reader for PCD byte ranges
pub struct PcdReader;

impl PcdReader {
    pub fn read_cloud(data: &[u8]) -> Result<CanonicalCloud> {
        let (header, body_start) = Self::parse_header(data)?;
        let body = &data[body_start..];

        // Per-point scalar rows in field order (first count entry of each field)
        let rows = match header.data_format {
            PcdDataFormat::Ascii => Self::read_ascii(body, &header)?,
            PcdDataFormat::Binary => Self::read_binary(body, &header)?,
            PcdDataFormat::BinaryCompressed => Self::read_compressed(body, &header)?,
        };

        Self::assemble(&header, rows)
    }

    pub fn parse_header(data: &[u8]) -> Result<(PcdHeader, usize)> {
        let mut names: Vec<String> = Vec::new();
        let mut sizes: Vec<usize> = Vec::new();
        let mut kinds: Vec<PcdFieldKind> = Vec::new();
        let mut counts: Vec<usize> = Vec::new();
        let mut width = None;
        let mut height = None;
        let mut points = None;
        let mut viewpoint = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
        let mut data_format = None;

        let mut offset = 0usize;
        while offset < data.len() {
            let end = data[offset..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|p| offset + p)
                .ok_or_else(|| Error::Truncated("PCD header never ends".to_string()))?;
            let line = String::from_utf8_lossy(&data[offset..end]).trim().to_string();
            offset = end + 1;

            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts[0] {
                "VERSION" => {}
                "FIELDS" | "COLUMNS" => {
                    names = parts[1..].iter().map(|s| s.to_string()).collect();
                }
                "SIZE" => {
                    sizes = parts[1..].iter().filter_map(|s| s.parse().ok()).collect();
                }
                "TYPE" => {
                    kinds = parts[1..]
                        .iter()
                        .map(|s| match *s {
                            "F" => Ok(PcdFieldKind::Float),
                            "U" => Ok(PcdFieldKind::Unsigned),
                            "I" => Ok(PcdFieldKind::Signed),
                            other => Err(Error::InvalidData(format!("bad PCD TYPE {}", other))),
                        })
                        .collect::<Result<Vec<_>>>()?;
                }
                "COUNT" => {
                    counts = parts[1..].iter().filter_map(|s| s.parse().ok()).collect();
                }
                "WIDTH" => width = parts.get(1).and_then(|s| s.parse().ok()),
                "HEIGHT" => height = parts.get(1).and_then(|s| s.parse().ok()),
                "POINTS" => points = parts.get(1).and_then(|s| s.parse().ok()),
                "VIEWPOINT" => {
                    for (i, v) in parts[1..].iter().take(7).enumerate() {
                        viewpoint[i] = v.parse().map_err(|_| {
                            Error::InvalidData(format!("bad VIEWPOINT value {}", v))
                        })?;
                    }
                }
                "DATA" => {
                    data_format = Some(match parts.get(1) {
                        Some(&"ascii") => PcdDataFormat::Ascii,
                        Some(&"binary") => PcdDataFormat::Binary,
                        Some(&"binary_compressed") => PcdDataFormat::BinaryCompressed,
                        other => {
                            return Err(Error::UnsupportedVariant(format!(
                                "PCD data section {:?}",
                                other
                            )));
                        }
                    });
                    break;
                }
                _ => {}
            }
        }

        if names.is_empty() {
            return Err(Error::InvalidSignature("PCD header lacks FIELDS".to_string()));
        }
        let data_format = data_format
            .ok_or_else(|| Error::Truncated("PCD header lacks a DATA line".to_string()))?;
        let width: usize =
            width.ok_or_else(|| Error::InvalidData("PCD header lacks WIDTH".to_string()))?;
        let height: usize = height.unwrap_or(1);
        let points: usize = points.unwrap_or(width * height);

        if sizes.len() != names.len() || kinds.len() != names.len() {
            return Err(Error::InvalidData(
                "PCD FIELDS/SIZE/TYPE lengths disagree".to_string(),
            ));
        }
        if counts.is_empty() {
            counts = vec![1; names.len()];
        }
        if counts.len() != names.len() {
            return Err(Error::InvalidData(
                "PCD FIELDS/COUNT lengths disagree".to_string(),
            ));
        }

        let fields: Vec<PcdField> = names
            .into_iter()
            .zip(sizes)
            .zip(kinds)
            .zip(counts)
            .map(|(((name, size), kind), count)| PcdField {
                name,
                kind,
                size,
                count,
            })
            .collect();
        for field in &fields {
            let valid = match field.kind {
                PcdFieldKind::Float => matches!(field.size, 4 | 8),
                _ => matches!(field.size, 1 | 2 | 4),
            };
            if !valid || field.count == 0 {
                return Err(Error::InvalidData(format!(
                    "field {} has size {} count {}",
                    field.name, field.size, field.count
                )));
            }
        }

        Ok((
            PcdHeader {
                fields,
                width,
                height,
                points,
                viewpoint,
                data_format,
            },
            offset,
        ))
    }

    fn read_ascii(body: &[u8], header: &PcdHeader) -> Result<Vec<Vec<f64>>> {
        let text = String::from_utf8_lossy(body);
        let mut rows = Vec::with_capacity(header.points);
        for line in text.lines().take(header.points) {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let mut row = Vec::with_capacity(header.fields.len());
            let mut cursor = 0usize;
            for field in &header.fields {
                let token = tokens.get(cursor).copied().unwrap_or("0");
                // PCL writes packed rgb as a raw integer in ascii mode
                let value = token.parse::<f64>().unwrap_or(0.0);
                row.push(value);
                cursor += field.count;
            }
            rows.push(row);
        }
        Ok(rows)
    }

    fn read_binary(body: &[u8], header: &PcdHeader) -> Result<Vec<Vec<f64>>> {
        let record_len = header.record_len();
        if body.len() < record_len * header.points {
            return Err(Error::Truncated("PCD binary body too small".to_string()));
        }
        let mut rows = Vec::with_capacity(header.points);
        for p in 0..header.points {
            let rec = &body[p * record_len..(p + 1) * record_len];
            let mut row = Vec::with_capacity(header.fields.len());
            for (i, field) in header.fields.iter().enumerate() {
                let off = header.field_offset(i);
                row.push(Self::field_value(&rec[off..off + field.size], field));
            }
            rows.push(row);
        }
        Ok(rows)
    }

    fn read_compressed(body: &[u8], header: &PcdHeader) -> Result<Vec<Vec<f64>>> {
        if body.len() < 8 {
            return Err(Error::Truncated("PCD compressed header too small".to_string()));
        }
        let compressed_size =
            u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
        let uncompressed_size =
            u32::from_le_bytes([body[4], body[5], body[6], body[7]]) as usize;
        if body.len() < 8 + compressed_size {
            return Err(Error::Truncated("PCD compressed body too small".to_string()));
        }

        let raw = lzf_decompress(&body[8..8 + compressed_size], uncompressed_size)?;

        // Column-major: each field's values for every point are contiguous
        let n = header.points;
        let mut rows = vec![Vec::with_capacity(header.fields.len()); n];
        let mut column_start = 0usize;
        for field in &header.fields {
            let stride = field.byte_len();
            if column_start + stride * n > raw.len() {
                return Err(Error::Truncated("PCD column data too small".to_string()));
            }
            for (p, row) in rows.iter_mut().enumerate() {
                let off = column_start + p * stride;
                row.push(Self::field_value(&raw[off..off + field.size], field));
            }
            column_start += stride * n;
        }
        Ok(rows)
    }

    /// Read the first scalar of a field; packed rgb keeps its raw bit pattern
    fn field_value(data: &[u8], field: &PcdField) -> f64 {
        if (field.name == "rgb" || field.name == "rgba")
            && field.kind == PcdFieldKind::Float
            && field.size == 4
        {
            let bits = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            return bits as f64;
        }
        read_scalar(data, field.kind, field.size)
    }

    fn assemble(header: &PcdHeader, rows: Vec<Vec<f64>>) -> Result<CanonicalCloud> {
        let ix = header
            .field("x")
            .ok_or_else(|| Error::InvalidData("PCD schema lacks x/y/z".to_string()))?;
        let iy = header
            .field("y")
            .ok_or_else(|| Error::InvalidData("PCD schema lacks x/y/z".to_string()))?;
        let iz = header
            .field("z")
            .ok_or_else(|| Error::InvalidData("PCD schema lacks x/y/z".to_string()))?;

        let packed_rgb = header.field("rgb").or_else(|| header.field("rgba"));
        let separate_rgb = match (header.field("r"), header.field("g"), header.field("b")) {
            (Some(r), Some(g), Some(b)) => Some((r, g, b)),
            _ => None,
        };
        let intensity = header.field("intensity");
        let label = header.field("label").or_else(|| header.field("classification"));

        let intensity_max = intensity
            .map(|i| rows.iter().fold(0.0f64, |m, row| m.max(row[i])))
            .unwrap_or(0.0);
        let intensity_scale = if intensity_max > 1.0 { 255.0 } else { 1.0 };

        // Viewpoint: quaternion rotation then translation
        let q = UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(
            header.viewpoint[3],
            header.viewpoint[4],
            header.viewpoint[5],
            header.viewpoint[6],
        ));
        let t = Vector3::new(header.viewpoint[0], header.viewpoint[1], header.viewpoint[2]);
        let apply_pose = q.angle() > 1e-12 || t.norm() > 1e-12;

        let mut assembler = CloudAssembler::with_capacity("PCD", rows.len());
        for row in &rows {
            let (x, y, z) = (row[ix], row[iy], row[iz]);
            if !x.is_finite() || !y.is_finite() || !z.is_finite() {
                continue; // PCL uses NaN for invalid organized points
            }
            let (x, y, z) = if apply_pose {
                let p = q * Vector3::new(x, y, z) + t;
                (p.x, p.y, p.z)
            } else {
                (x, y, z)
            };

            let color = if let Some(i) = packed_rgb {
                Some(unpack_rgb(row[i] as u32))
            } else {
                separate_rgb.map(|(r, g, b)| {
                    [
                        (row[r] / 255.0) as f32,
                        (row[g] / 255.0) as f32,
                        (row[b] / 255.0) as f32,
                    ]
                })
            };

            assembler.push(SourcePoint {
                x,
                y,
                z,
                color,
                intensity: intensity.map(|i| (row[i] / intensity_scale) as f32),
                classification: label.map(|i| row[i] as f32),
            });
        }

        assembler.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_text(data: &str, fields: &str, sizes: &str, types: &str, points: usize) -> String {
        format!(
            "# .PCD v0.7\nVERSION 0.7\nFIELDS {}\nSIZE {}\nTYPE {}\nCOUNT {}\nWIDTH {}\nHEIGHT 1\nVIEWPOINT 0 0 0 1 0 0 0\nPOINTS {}\nDATA {}\n",
            fields,
            sizes,
            types,
            fields.split_whitespace().map(|_| "1").collect::<Vec<_>>().join(" "),
            points,
            points,
            data
        )
    }

    #[test]
    fn test_ascii_xyz() {
        let mut text = header_text("ascii", "x y z", "4 4 4", "F F F", 2);
        text.push_str("0 0 0\n1 2 3\n");
        let cloud = PcdReader::read_cloud(text.as_bytes()).unwrap();
        cloud.validate().unwrap();
        assert_eq!(cloud.point_count(), 2);
        assert_eq!(cloud.header.bounds.max_z, 3.0);
    }

    #[test]
    fn test_binary_with_packed_rgb() {
        let mut data = header_text("binary", "x y z rgb", "4 4 4 4", "F F F F", 1).into_bytes();
        for v in [1.0f32, 2.0, 3.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        data.extend_from_slice(&0x00ff0000u32.to_le_bytes()); // red
        let cloud = PcdReader::read_cloud(&data).unwrap();
        assert_eq!(cloud.point_count(), 1);
        assert!(cloud.has_color);
        assert!((cloud.colors[0] - 1.0).abs() < 1e-6);
        assert!(cloud.colors[1].abs() < 1e-6);
        // Single point centers to the origin
        assert!(cloud.position(0).iter().all(|c| c.abs() < 1e-6));
    }

    #[test]
    fn test_binary_compressed_single_red_point() {
        let mut data =
            header_text("binary_compressed", "x y z rgb", "4 4 4 4", "F F F F", 1).into_bytes();

        // Column-major payload: x, y, z, rgb (one point, so same as row-major)
        let mut raw = Vec::new();
        for v in [1.0f32, 2.0, 3.0] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        raw.extend_from_slice(&0x00ff0000u32.to_le_bytes());

        // Literal-only LZF stream: control byte (len-1), then the bytes
        let mut compressed = vec![(raw.len() - 1) as u8];
        compressed.extend_from_slice(&raw);

        data.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        data.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        data.extend_from_slice(&compressed);

        let cloud = PcdReader::read_cloud(&data).unwrap();
        assert_eq!(cloud.point_count(), 1);
        assert!((cloud.colors[0] - 1.0).abs() < 1e-6);
        assert!(cloud.position(0).iter().all(|c| c.abs() < 1e-6));
    }

    #[test]
    fn test_lzf_back_references() {
        // "abcabcabc": literal "abc" then a 6-byte back reference
        let expected = b"abcabcabc";
        let compressed = vec![
            2, b'a', b'b', b'c', // literal run of 3
            (4 << 5), 2, // back ref: len 4+2=6, offset 2+1=3
        ];
        let out = lzf_decompress(&compressed, expected.len()).unwrap();
        assert_eq!(&out, expected);
    }

    #[test]
    fn test_viewpoint_translation() {
        let mut text = String::from(
            "VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 1\nWIDTH 1\nHEIGHT 1\nVIEWPOINT 10 0 0 1 0 0 0\nPOINTS 1\nDATA ascii\n",
        );
        text.push_str("1 0 0\n");
        let cloud = PcdReader::read_cloud(text.as_bytes()).unwrap();
        assert_eq!(cloud.header.bounds.min_x, 11.0);
    }

    #[test]
    fn test_missing_fields_fails() {
        let text = "VERSION 0.7\nWIDTH 1\nDATA ascii\n0 0 0\n";
        assert!(PcdReader::read_cloud(text.as_bytes()).is_err());
    }
}
