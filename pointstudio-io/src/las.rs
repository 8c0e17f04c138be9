//! LAS and LAZ (LASzip-compressed) LiDAR exchange format support
//!
//! Uncompressed LAS is decoded straight from the byte range. LAZ delegates
//! point decompression to the `laz` crate and then extracts records with the
//! same LAS semantics.

use crate::assemble::{CloudAssembler, SourcePoint};
use pointstudio_core::{Aabb, CanonicalCloud, Error, Result, MAX_DECODED_POINTS};
use std::io::{Cursor, Seek, SeekFrom};

/// LAS header fields we consume (versions 1.0 through 1.4)
#[derive(Debug, Clone)]
pub struct LasHeader {
    pub version_major: u8,
    pub version_minor: u8,
    pub point_data_format: u8,
    pub record_length: u16,
    pub point_count: u64,
    pub offset_to_points: u32,
    pub scale: [f64; 3],
    pub offset: [f64; 3],
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl LasHeader {
    pub fn has_color(&self) -> bool {
        matches!(self.point_data_format, 2 | 3 | 5 | 7 | 8 | 10)
    }

    fn bounds(&self) -> Aabb {
        Aabb {
            min_x: self.min[0],
            min_y: self.min[1],
            min_z: self.min[2],
            max_x: self.max[0],
            max_y: self.max[1],
            max_z: self.max[2],
        }
    }
}

fn read_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

fn read_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

fn read_i32(data: &[u8], off: usize) -> i32 {
    i32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

fn read_f64(data: &[u8], off: usize) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[off..off + 8]);
    f64::from_le_bytes(buf)
}

/// Byte offset of the RGB triple within a point record, 0 when absent
fn color_byte_offset(format: u8) -> usize {
    match format {
        2 => 20,
        3 | 5 => 28,
        7 | 8 | 10 => 30,
        _ => 0,
    }
}

/// Parse the fixed-size LAS public header block
pub fn parse_las_header(data: &[u8]) -> Result<LasHeader> {
    if data.len() < 227 {
        return Err(Error::Truncated("file too small for a LAS header".to_string()));
    }
    if &data[0..4] != b"LASF" {
        return Err(Error::InvalidSignature("missing LASF magic".to_string()));
    }

    let version_major = data[24];
    let version_minor = data[25];
    if version_major != 1 || version_minor > 4 {
        return Err(Error::UnsupportedVariant(format!(
            "LAS version {}.{}",
            version_major, version_minor
        )));
    }

    let offset_to_points = read_u32(data, 96);
    let point_data_format = data[104] & 0x3f; // LAZ sets compressor bits here
    let record_length = read_u16(data, 105);
    if record_length < 20 {
        return Err(Error::InvalidData(format!(
            "point record length {} below the format minimum",
            record_length
        )));
    }
    let legacy_count = read_u32(data, 107) as u64;

    // LAS 1.4 moved the count to a 64-bit field; the legacy slot may be zero.
    let point_count = if version_minor >= 4 && legacy_count == 0 && data.len() >= 255 {
        (read_u32(data, 247) as u64) | ((read_u32(data, 251) as u64) << 32)
    } else {
        legacy_count
    };

    let scale = [read_f64(data, 131), read_f64(data, 139), read_f64(data, 147)];
    let offset = [read_f64(data, 155), read_f64(data, 163), read_f64(data, 171)];
    let max_x = read_f64(data, 179);
    let min_x = read_f64(data, 187);
    let max_y = read_f64(data, 195);
    let min_y = read_f64(data, 203);
    let max_z = read_f64(data, 211);
    let min_z = read_f64(data, 219);

    Ok(LasHeader {
        version_major,
        version_minor,
        point_data_format,
        record_length,
        point_count,
        offset_to_points,
        scale,
        offset,
        min: [min_x, min_y, min_z],
        max: [max_x, max_y, max_z],
    })
}

/// Extract one point record into the source frame
fn extract_record(rec: &[u8], header: &LasHeader) -> SourcePoint {
    let x = read_i32(rec, 0) as f64 * header.scale[0] + header.offset[0];
    let y = read_i32(rec, 4) as f64 * header.scale[1] + header.offset[1];
    let z = read_i32(rec, 8) as f64 * header.scale[2] + header.offset[2];

    let intensity = read_u16(rec, 12) as f32 / 65535.0;

    let classification = if header.point_data_format >= 6 {
        rec[16]
    } else {
        rec[15]
    } as f32;

    let co = color_byte_offset(header.point_data_format);
    let color = if co > 0 && co + 6 <= rec.len() {
        let r = read_u16(rec, co);
        let g = read_u16(rec, co + 2);
        let b = read_u16(rec, co + 4);
        // Writers disagree on color depth; bright channels betray 16-bit.
        let max = if r > 255 || g > 255 || b > 255 { 65535.0 } else { 255.0 };
        Some([r as f32 / max, g as f32 / max, b as f32 / max])
    } else {
        None
    };

    SourcePoint {
        x,
        y,
        z,
        color,
        intensity: Some(intensity),
        classification: Some(classification),
    }
}

fn assembler_for(header: &LasHeader, tag: &str, capacity: usize) -> CloudAssembler {
    let mut assembler = CloudAssembler::with_capacity(tag, capacity);
    assembler.set_source_bounds(header.bounds());
    assembler.set_scale_offset(header.scale, header.offset);
    assembler.set_point_format(header.point_data_format);
    assembler.set_version(&format!("{}.{}", header.version_major, header.version_minor));
    assembler
}

/// Reader for uncompressed LAS byte ranges
pub struct LasReader;

impl LasReader {
    pub fn read_cloud(data: &[u8]) -> Result<CanonicalCloud> {
        let header = parse_las_header(data)?;
        if header.point_count == 0 {
            return Err(Error::EmptyCloud);
        }

        let total = header.point_count as usize;
        let stride = total.div_ceil(MAX_DECODED_POINTS).max(1);
        let record_len = header.record_length as usize;
        let data_start = header.offset_to_points as usize;

        let mut assembler = assembler_for(&header, "LAS", total / stride + 1);
        for i in (0..total).step_by(stride) {
            let start = data_start + i * record_len;
            let end = start + record_len;
            if end > data.len() {
                break;
            }
            assembler.push(extract_record(&data[start..end], &header));
        }

        assembler.finish()
    }
}

/// Reader for LASzip-compressed LAZ byte ranges
pub struct LazReader;

impl LazReader {
    pub fn read_cloud(data: &[u8]) -> Result<CanonicalCloud> {
        let header = parse_las_header(data)?;
        if header.point_count == 0 {
            return Err(Error::EmptyCloud);
        }

        let vlr_data = Self::find_laszip_vlr(data, &header)?;
        let vlr = laz::LazVlr::from_buffer(&vlr_data)
            .map_err(|e| Error::InvalidData(format!("bad LASzip VLR: {}", e)))?;

        let mut cursor = Cursor::new(data);
        cursor.seek(SeekFrom::Start(header.offset_to_points as u64))?;
        let mut decompressor = laz::LasZipDecompressor::new(cursor, vlr)
            .map_err(|e| Error::InvalidData(format!("LASzip init failed: {}", e)))?;

        let total = header.point_count as usize;
        let stride = total.div_ceil(MAX_DECODED_POINTS).max(1);
        let mut record = vec![0u8; header.record_length as usize];

        // The arithmetic coder is sequential, so every record is decompressed
        // even when stride sampling keeps only a subset.
        let mut assembler = assembler_for(&header, "LAZ", total / stride + 1);
        for i in 0..total {
            decompressor
                .decompress_one(&mut record)
                .map_err(|e| Error::Truncated(format!("LAZ stream ended early: {}", e)))?;
            if i % stride == 0 {
                assembler.push(extract_record(&record, &header));
            }
        }

        assembler.finish()
    }

    /// Walk the VLRs for the LASzip record (user id `laszip encoded`, id 22204)
    fn find_laszip_vlr(data: &[u8], header: &LasHeader) -> Result<Vec<u8>> {
        let vlr_start = if header.version_minor >= 3 { 235usize } else { 227usize };
        let num_vlrs = read_u32(data, 100) as usize;
        let header_end = header.offset_to_points as usize;

        let mut offset = vlr_start;
        for _ in 0..num_vlrs {
            if offset + 54 > header_end || offset + 54 > data.len() {
                break;
            }
            let user_id = &data[offset + 2..offset + 18];
            let record_id = read_u16(data, offset + 18);
            let record_length = read_u16(data, offset + 20) as usize;
            let data_start = offset + 54;
            let data_end = data_start + record_length;

            if record_id == 22204 && user_id.starts_with(b"laszip encoded") && data_end <= data.len() {
                return Ok(data[data_start..data_end].to_vec());
            }
            offset = data_end;
        }

        Err(Error::InvalidData("LASzip VLR not found in LAZ file".to_string()))
    }
}
