//! Binary wire format for octree node chunks
//!
//! Little-endian throughout; the node id and the trailing attribute block
//! are padded up to 4-byte alignment so every numeric field stays aligned.

use byteorder::{LittleEndian, ReadBytesExt};
use pointstudio_core::{Error, Result};
use std::io::{Cursor, Read};

/// One octree node's point payload
#[derive(Debug, Clone, PartialEq)]
pub struct PointChunk {
    pub node_id: String,
    /// Node center in source-frame doubles; positions are relative to it
    pub center: [f64; 3],
    pub level: u32,
    /// Average inter-point spacing estimate for the node
    pub spacing: f32,
    pub positions: Vec<f32>,
    pub colors: Vec<u8>,
    pub intensities: Vec<u16>,
    pub classifications: Vec<u8>,
}

impl PointChunk {
    pub fn point_count(&self) -> usize {
        self.positions.len() / 3
    }
}

fn pad_len(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Encode chunks into one contiguous buffer
pub fn encode_chunks(chunks: &[PointChunk]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(chunks.len() as u32).to_le_bytes());

    for chunk in chunks {
        let id = chunk.node_id.as_bytes();
        out.extend_from_slice(&(id.len() as u32).to_le_bytes());
        out.extend_from_slice(id);
        out.extend(std::iter::repeat(0u8).take(pad_len(id.len())));

        for c in chunk.center {
            out.extend_from_slice(&c.to_le_bytes());
        }
        out.extend_from_slice(&chunk.level.to_le_bytes());
        out.extend_from_slice(&chunk.spacing.to_le_bytes());

        let count = chunk.point_count();
        out.extend_from_slice(&(count as u32).to_le_bytes());
        for &p in &chunk.positions {
            out.extend_from_slice(&p.to_le_bytes());
        }
        out.extend_from_slice(&chunk.colors);
        for &i in &chunk.intensities {
            out.extend_from_slice(&i.to_le_bytes());
        }
        out.extend_from_slice(&chunk.classifications);

        let attr_len = count * 3 + count * 2 + count;
        out.extend(std::iter::repeat(0u8).take(pad_len(attr_len)));
    }
    out
}

/// Decode a buffer produced by [`encode_chunks`]
pub fn decode_chunks(data: &[u8]) -> Result<Vec<PointChunk>> {
    let mut cursor = Cursor::new(data);
    let truncated = |what: &str| Error::Truncated(format!("chunk stream ended in {}", what));

    let chunk_count = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| truncated("header"))?;
    let mut chunks = Vec::with_capacity(chunk_count as usize);

    for _ in 0..chunk_count {
        let id_len = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| truncated("node id length"))? as usize;
        let mut id_bytes = vec![0u8; id_len];
        cursor
            .read_exact(&mut id_bytes)
            .map_err(|_| truncated("node id"))?;
        let node_id = String::from_utf8(id_bytes)
            .map_err(|_| Error::InvalidData("node id is not UTF-8".to_string()))?;
        let mut pad = vec![0u8; pad_len(id_len)];
        cursor.read_exact(&mut pad).map_err(|_| truncated("padding"))?;

        let mut center = [0.0f64; 3];
        for c in &mut center {
            *c = cursor
                .read_f64::<LittleEndian>()
                .map_err(|_| truncated("center"))?;
        }
        let level = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| truncated("level"))?;
        let spacing = cursor
            .read_f32::<LittleEndian>()
            .map_err(|_| truncated("spacing"))?;
        let count = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| truncated("point count"))? as usize;

        let mut positions = Vec::with_capacity(count * 3);
        for _ in 0..count * 3 {
            positions.push(
                cursor
                    .read_f32::<LittleEndian>()
                    .map_err(|_| truncated("positions"))?,
            );
        }
        let mut colors = vec![0u8; count * 3];
        cursor.read_exact(&mut colors).map_err(|_| truncated("colors"))?;
        let mut intensities = Vec::with_capacity(count);
        for _ in 0..count {
            intensities.push(
                cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|_| truncated("intensities"))?,
            );
        }
        let mut classifications = vec![0u8; count];
        cursor
            .read_exact(&mut classifications)
            .map_err(|_| truncated("classifications"))?;

        let attr_len = count * 3 + count * 2 + count;
        let mut pad = vec![0u8; pad_len(attr_len)];
        cursor.read_exact(&mut pad).map_err(|_| truncated("padding"))?;

        chunks.push(PointChunk {
            node_id,
            center,
            level,
            spacing,
            positions,
            colors,
            intensities,
            classifications,
        });
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(node_id: &str, count: usize) -> PointChunk {
        PointChunk {
            node_id: node_id.to_string(),
            center: [1.5, -2.5, 1000.25],
            level: 3,
            spacing: 0.05,
            positions: (0..count * 3).map(|i| i as f32 * 0.1).collect(),
            colors: (0..count * 3).map(|i| (i % 256) as u8).collect(),
            intensities: (0..count).map(|i| (i * 257) as u16).collect(),
            classifications: (0..count).map(|i| (i % 32) as u8).collect(),
        }
    }

    #[test]
    fn test_round_trip() {
        let chunks = vec![chunk("r", 5), chunk("r03", 2), chunk("r031", 1)];
        let encoded = encode_chunks(&chunks);
        let decoded = decode_chunks(&encoded).unwrap();
        assert_eq!(chunks, decoded);
    }

    #[test]
    fn test_alignment_padding() {
        // "r03" is 3 bytes of id; 5 points leave 30 attribute bytes. Both
        // need padding and the stream length must stay 4-byte aligned.
        let encoded = encode_chunks(&[chunk("r03", 5)]);
        assert_eq!(encoded.len() % 4, 0);

        let encoded = encode_chunks(&[chunk("r", 1), chunk("r0123456", 3)]);
        assert_eq!(encoded.len() % 4, 0);
        let decoded = decode_chunks(&encoded).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].point_count(), 3);
    }

    #[test]
    fn test_empty_stream() {
        let encoded = encode_chunks(&[]);
        assert_eq!(decode_chunks(&encoded).unwrap().len(), 0);
    }

    #[test]
    fn test_truncated_stream_fails() {
        let mut encoded = encode_chunks(&[chunk("r", 4)]);
        encoded.truncate(encoded.len() - 3);
        assert!(matches!(
            decode_chunks(&encoded),
            Err(Error::Truncated(_))
        ));
    }
}
