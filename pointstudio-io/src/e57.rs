//! E57 (ASTM 3D imaging) format support
//!
//! An E57 file is a sequence of CRC-protected pages; logical content stripes
//! across them. The XML section catalogs scans, each pointing at a
//! CompressedVector of bitpacked bytestreams described by a dynamic
//! prototype. Only uncompressed (codec-free) vectors are supported.

use crate::assemble::{CloudAssembler, SourcePoint};
use log::warn;
use pointstudio_core::{CanonicalCloud, Error, Result, UnitQuaternion, Vector3};

const HEADER_MAGIC: &[u8; 8] = b"ASTM-E57";

/// Prototype field encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Float32,
    Float64,
    Integer,
    ScaledInteger,
}

/// One prototype entry: name, encoding and its integer range/scale
#[derive(Debug, Clone)]
struct ProtoField {
    name: String,
    kind: FieldKind,
    minimum: f64,
    maximum: f64,
    scale: f64,
    offset: f64,
}

impl ProtoField {
    /// Bits per value for integer encodings: ceil(log2(max - min + 1))
    fn bits(&self) -> u32 {
        let range = (self.maximum - self.minimum).max(0.0) as u64;
        64 - range.leading_zeros()
    }

    fn bytes_needed(&self, count: u64) -> usize {
        match self.kind {
            FieldKind::Float32 => count as usize * 4,
            FieldKind::Float64 => count as usize * 8,
            FieldKind::Integer | FieldKind::ScaledInteger => {
                ((self.bits() as u64 * count) as usize).div_ceil(8)
            }
        }
    }
}

/// One scan discovered in the XML catalog
#[derive(Debug)]
struct Scan {
    point_count: u64,
    binary_physical_offset: u64,
    prototype: Vec<ProtoField>,
    pose_rotation: Option<[f64; 4]>, // w x y z
    pose_translation: Option<[f64; 3]>,
}

/// Striped view of the paged file; every page ends in a 4-byte CRC
struct PagedReader<'a> {
    data: &'a [u8],
    page_size: usize,
}

impl<'a> PagedReader<'a> {
    fn payload(&self) -> usize {
        self.page_size - 4
    }

    /// Logical offset of a physical position inside a page's data area
    fn logical_of_physical(&self, physical: usize) -> usize {
        physical - (physical / self.page_size) * 4
    }

    /// Read `len` logical bytes starting at a logical offset
    fn read_logical(&self, logical: usize, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut cursor = logical;
        while out.len() < len {
            let page = cursor / self.payload();
            let in_page = cursor % self.payload();
            let physical = page * self.page_size + in_page;
            if physical >= self.data.len() {
                return Err(Error::Truncated("E57 logical read past end of file".to_string()));
            }
            let take = (self.payload() - in_page).min(len - out.len());
            let end = (physical + take).min(self.data.len());
            out.extend_from_slice(&self.data[physical..end]);
            cursor += end - physical;
            if end - physical == 0 {
                break;
            }
        }
        if out.len() < len {
            return Err(Error::Truncated("E57 logical read ended early".to_string()));
        }
        Ok(out)
    }
}

/// LSB-first bit cursor over one bytestream
struct BitReader<'a> {
    data: &'a [u8],
    bit: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, bit: 0 }
    }

    fn read(&mut self, bits: u32) -> Result<u64> {
        if bits == 0 {
            return Ok(0);
        }
        let mut value = 0u64;
        for i in 0..bits {
            let byte = self.bit / 8;
            if byte >= self.data.len() {
                return Err(Error::Truncated("E57 bytestream ended early".to_string()));
            }
            let b = (self.data[byte] >> (self.bit % 8)) & 1;
            value |= (b as u64) << i;
            self.bit += 1;
        }
        Ok(value)
    }
}

fn read_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

fn read_u64_pair(data: &[u8], off: usize) -> u64 {
    (read_u32(data, off) as u64) | ((read_u32(data, off + 4) as u64) << 32)
}

/// Reader for E57 byte ranges
pub struct E57Reader;

impl E57Reader {
    pub fn read_cloud(data: &[u8]) -> Result<CanonicalCloud> {
        if data.len() < 48 {
            return Err(Error::Truncated("file too small for an E57 header".to_string()));
        }
        if &data[0..8] != HEADER_MAGIC {
            return Err(Error::InvalidSignature("missing ASTM-E57 magic".to_string()));
        }

        let _major = read_u32(data, 8);
        let _minor = read_u32(data, 12);
        let _file_length = read_u64_pair(data, 16);
        let xml_physical_offset = read_u64_pair(data, 24) as usize;
        let xml_logical_length = read_u64_pair(data, 32) as usize;
        let page_size = read_u32(data, 40) as usize;
        if page_size < 8 || page_size > 1 << 20 {
            return Err(Error::InvalidData(format!("implausible E57 page size {}", page_size)));
        }

        let pages = PagedReader { data, page_size };
        let xml_bytes = pages.read_logical(
            pages.logical_of_physical(xml_physical_offset),
            xml_logical_length,
        )?;
        let xml = String::from_utf8_lossy(&xml_bytes).into_owned();

        let scans = Self::parse_scans(&xml)?;
        if scans.is_empty() {
            return Err(Error::EmptyCloud);
        }

        let mut assembler = CloudAssembler::new("E57");
        for (i, scan) in scans.iter().enumerate() {
            if let Err(e) = Self::decode_scan(&pages, scan, &mut assembler) {
                match e {
                    Error::UnsupportedVariant(_) => return Err(e),
                    _ => warn!("skipping E57 scan {}: {}", i, e),
                }
            }
        }

        assembler.finish()
    }

    /// Walk the XML for CompressedVector point records and their prototypes
    fn parse_scans(xml: &str) -> Result<Vec<Scan>> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|e| Error::InvalidData(format!("unparseable E57 XML: {}", e)))?;

        let mut scans = Vec::new();
        for node in doc.descendants().filter(|n| {
            n.has_tag_name("points")
                && n.attribute("type").map(|t| t.eq_ignore_ascii_case("compressedvector"))
                    == Some(true)
        }) {
            let point_count: u64 = node
                .attribute("recordCount")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let binary_physical_offset: u64 = node
                .attribute("fileOffset")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);

            // A populated codecs vector means compressed streams
            if let Some(codecs) = node.children().find(|c| c.has_tag_name("codecs")) {
                if codecs.children().any(|c| c.is_element()) {
                    return Err(Error::UnsupportedVariant(
                        "E57 compressed vector codecs".to_string(),
                    ));
                }
            }

            let prototype = match node.children().find(|c| c.has_tag_name("prototype")) {
                Some(p) => p,
                None => continue,
            };
            let mut fields = Vec::new();
            for field in prototype.children().filter(|c| c.is_element()) {
                let attr = |name: &str| field.attribute(name).and_then(|v| v.parse::<f64>().ok());
                let kind = match field.attribute("type").unwrap_or("") {
                    t if t.eq_ignore_ascii_case("float") => {
                        if field.attribute("precision") == Some("single") {
                            FieldKind::Float32
                        } else {
                            FieldKind::Float64
                        }
                    }
                    t if t.eq_ignore_ascii_case("scaledinteger") => FieldKind::ScaledInteger,
                    t if t.eq_ignore_ascii_case("integer") => FieldKind::Integer,
                    _ => continue,
                };
                fields.push(ProtoField {
                    name: field.tag_name().name().to_string(),
                    kind,
                    minimum: attr("minimum").unwrap_or(0.0),
                    maximum: attr("maximum").unwrap_or(0.0),
                    scale: attr("scale").unwrap_or(1.0),
                    offset: attr("offset").unwrap_or(0.0),
                });
            }

            // The pose lives on the enclosing scan structure
            fn child_value(parent: roxmltree::Node<'_, '_>, tag: &str) -> f64 {
                parent
                    .children()
                    .find(|c| c.has_tag_name(tag))
                    .and_then(|c| c.text())
                    .and_then(|t| t.trim().parse::<f64>().ok())
                    .unwrap_or(0.0)
            }
            let (pose_rotation, pose_translation) = node
                .parent_element()
                .and_then(|scan| scan.children().find(|c| c.has_tag_name("pose")))
                .map(|pose| {
                    let rotation = pose.children().find(|c| c.has_tag_name("rotation")).map(|r| {
                        [
                            child_value(r, "w"),
                            child_value(r, "x"),
                            child_value(r, "y"),
                            child_value(r, "z"),
                        ]
                    });
                    let translation =
                        pose.children().find(|c| c.has_tag_name("translation")).map(|t| {
                            [child_value(t, "x"), child_value(t, "y"), child_value(t, "z")]
                        });
                    (rotation, translation)
                })
                .unwrap_or((None, None));

            scans.push(Scan {
                point_count,
                binary_physical_offset,
                prototype: fields,
                pose_rotation,
                pose_translation,
            });
        }
        Ok(scans)
    }

    /// Pull each prototype field's bytestream out of the data packets
    fn collect_bytestreams(pages: &PagedReader, scan: &Scan) -> Result<Vec<Vec<u8>>> {
        // CompressedVector section header: id byte then the data offset
        let section_logical = pages.logical_of_physical(scan.binary_physical_offset as usize);
        let section = pages.read_logical(section_logical, 32)?;
        if section[0] != 1 {
            return Err(Error::InvalidData(format!(
                "unexpected E57 section id {}",
                section[0]
            )));
        }
        let data_physical_offset = read_u64_pair(&section, 16) as usize;

        let needed: Vec<usize> = scan
            .prototype
            .iter()
            .map(|f| f.bytes_needed(scan.point_count))
            .collect();
        let mut streams: Vec<Vec<u8>> = vec![Vec::new(); scan.prototype.len()];

        let mut cursor = pages.logical_of_physical(data_physical_offset);
        loop {
            if streams.iter().zip(&needed).all(|(s, &n)| s.len() >= n) {
                break;
            }
            let head = match pages.read_logical(cursor, 6) {
                Ok(h) => h,
                Err(_) => break,
            };
            match head[0] {
                0 => {
                    // index packet, fixed 16 byte stride
                    cursor += 16;
                    continue;
                }
                1 => {}
                other => {
                    return Err(Error::InvalidData(format!(
                        "unexpected E57 packet type {}",
                        other
                    )));
                }
            }
            let packet_length = u16::from_le_bytes([head[2], head[3]]) as usize + 1;
            let stream_count = u16::from_le_bytes([head[4], head[5]]) as usize;

            let table = pages.read_logical(cursor + 6, stream_count * 2)?;
            let lengths: Vec<usize> = (0..stream_count)
                .map(|i| u16::from_le_bytes([table[i * 2], table[i * 2 + 1]]) as usize)
                .collect();

            let mut payload_cursor = cursor + 6 + stream_count * 2;
            for (i, &len) in lengths.iter().enumerate() {
                let chunk = pages.read_logical(payload_cursor, len)?;
                if i < streams.len() {
                    streams[i].extend_from_slice(&chunk);
                }
                payload_cursor += len;
            }
            cursor += packet_length;
        }

        for (s, &n) in streams.iter().zip(&needed) {
            if s.len() < n {
                return Err(Error::Truncated("E57 bytestreams ended early".to_string()));
            }
        }
        Ok(streams)
    }

    /// Decode one field's values out of its bytestream
    fn decode_field(field: &ProtoField, stream: &[u8], count: u64) -> Result<Vec<f64>> {
        let mut values = Vec::with_capacity(count as usize);
        match field.kind {
            FieldKind::Float32 => {
                for i in 0..count as usize {
                    let off = i * 4;
                    values.push(f32::from_le_bytes([
                        stream[off],
                        stream[off + 1],
                        stream[off + 2],
                        stream[off + 3],
                    ]) as f64);
                }
            }
            FieldKind::Float64 => {
                for i in 0..count as usize {
                    let off = i * 8;
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(&stream[off..off + 8]);
                    values.push(f64::from_le_bytes(buf));
                }
            }
            FieldKind::Integer | FieldKind::ScaledInteger => {
                let bits = field.bits();
                let mut reader = BitReader::new(stream);
                for _ in 0..count {
                    let raw = reader.read(bits)? as f64;
                    let value = if field.kind == FieldKind::ScaledInteger {
                        (raw + field.minimum) * field.scale + field.offset
                    } else {
                        raw + field.minimum
                    };
                    values.push(value);
                }
            }
        }
        Ok(values)
    }

    fn decode_scan(
        pages: &PagedReader,
        scan: &Scan,
        assembler: &mut CloudAssembler,
    ) -> Result<()> {
        if scan.point_count == 0 {
            return Ok(());
        }
        let streams = Self::collect_bytestreams(pages, scan)?;

        let mut columns: std::collections::HashMap<&str, Vec<f64>> =
            std::collections::HashMap::new();
        for (field, stream) in scan.prototype.iter().zip(&streams) {
            columns.insert(
                field.name.as_str(),
                Self::decode_field(field, stream, scan.point_count)?,
            );
        }

        let n = scan.point_count as usize;
        let cartesian = columns.contains_key("cartesianX")
            && columns.contains_key("cartesianY")
            && columns.contains_key("cartesianZ");
        let spherical = columns.contains_key("sphericalRange")
            && columns.contains_key("sphericalAzimuth")
            && columns.contains_key("sphericalElevation");
        if !cartesian && !spherical {
            return Err(Error::InvalidData("scan has no usable coordinates".to_string()));
        }

        // Integer attribute ranges give us the normalization for free
        let field_range = |name: &str| {
            scan.prototype
                .iter()
                .find(|f| f.name == name)
                .map(|f| (f.minimum, f.maximum))
        };
        let normalize = |name: &str, v: f64| -> f32 {
            match field_range(name) {
                Some((min, max)) if max > min && max > 1.0 => {
                    (((v - min) / (max - min)) as f32).clamp(0.0, 1.0)
                }
                _ => (v as f32).clamp(0.0, 1.0),
            }
        };

        let rotation = scan.pose_rotation.map(|q| {
            UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(q[0], q[1], q[2], q[3]))
        });
        let translation = scan
            .pose_translation
            .map(|t| Vector3::new(t[0], t[1], t[2]));

        for i in 0..n {
            let (x, y, z) = if cartesian {
                (
                    columns["cartesianX"][i],
                    columns["cartesianY"][i],
                    columns["cartesianZ"][i],
                )
            } else {
                let r = columns["sphericalRange"][i];
                let az = columns["sphericalAzimuth"][i];
                let el = columns["sphericalElevation"][i];
                (r * el.cos() * az.cos(), r * el.cos() * az.sin(), r * el.sin())
            };

            // Scan pose: rotate, then translate
            let mut p = Vector3::new(x, y, z);
            if let Some(q) = &rotation {
                p = q * p;
            }
            if let Some(t) = &translation {
                p += t;
            }

            let color = match (
                columns.get("colorRed"),
                columns.get("colorGreen"),
                columns.get("colorBlue"),
            ) {
                (Some(r), Some(g), Some(b)) => Some([
                    normalize("colorRed", r[i]),
                    normalize("colorGreen", g[i]),
                    normalize("colorBlue", b[i]),
                ]),
                _ => None,
            };

            assembler.push(SourcePoint {
                x: p.x,
                y: p.y,
                z: p.z,
                color,
                intensity: columns.get("intensity").map(|v| normalize("intensity", v[i])),
                classification: None,
            });
        }
        Ok(())
    }
}
