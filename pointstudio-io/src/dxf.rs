//! DXF (AutoCAD drawing exchange) support
//!
//! The file is a stream of group-code/value pairs, two lines each. Only the
//! ENTITIES section is consumed: POINT entities become points, 3DFACE
//! entities become triangles. Colors come from the ACI palette (code 62) or
//! a packed 24-bit true color (code 420).

use crate::assemble::{CloudAssembler, SourcePoint};
use pointstudio_core::{CanonicalCloud, Error, Result};

/// The seven primary ACI colors
const ACI_PRIMARY: [[u8; 3]; 7] = [
    [255, 0, 0],     // 1 red
    [255, 255, 0],   // 2 yellow
    [0, 255, 0],     // 3 green
    [0, 255, 255],   // 4 cyan
    [0, 0, 255],     // 5 blue
    [255, 0, 255],   // 6 magenta
    [255, 255, 255], // 7 white
];

/// Gray ramp for ACI 250..255
const ACI_GRAYS: [u8; 6] = [51, 91, 132, 173, 214, 255];

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [f32; 3] {
    let c = v * s;
    let hp = (h / 60.0) % 6.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    [r + m, g + m, b + m]
}

/// Map an AutoCAD Color Index to normalized RGB
pub fn aci_to_rgb(aci: i64) -> Option<[f32; 3]> {
    match aci {
        1..=7 => {
            let c = ACI_PRIMARY[(aci - 1) as usize];
            Some([c[0] as f32 / 255.0, c[1] as f32 / 255.0, c[2] as f32 / 255.0])
        }
        8 => Some([128.0 / 255.0; 3]),
        9 => Some([192.0 / 255.0; 3]),
        250..=255 => {
            let g = ACI_GRAYS[(aci - 250) as usize] as f32 / 255.0;
            Some([g; 3])
        }
        10..=249 => {
            // 24 hues in 15 degree steps, 10 shade variants each
            let hue = ((aci - 10) / 10) as f32 * 15.0;
            let shade = ((aci - 10) % 10) as usize;
            let value = [1.0, 1.0, 0.8, 0.8, 0.6, 0.6, 0.5, 0.5, 0.35, 0.35][shade];
            let saturation = if shade % 2 == 1 { 0.55 } else { 1.0 };
            Some(hsv_to_rgb(hue, saturation, value))
        }
        _ => None,
    }
}

fn true_color_to_rgb(value: i64) -> [f32; 3] {
    [
        ((value >> 16) & 0xff) as f32 / 255.0,
        ((value >> 8) & 0xff) as f32 / 255.0,
        (value & 0xff) as f32 / 255.0,
    ]
}

/// Entity state accumulated between code-0 markers
#[derive(Debug, Default)]
struct Entity {
    kind: String,
    // POINT uses slot 0; 3DFACE fills slots 0..3
    corners: [[f64; 3]; 4],
    seen: [bool; 4],
    aci: Option<i64>,
    true_color: Option<i64>,
}

impl Entity {
    fn color(&self) -> Option<[f32; 3]> {
        if let Some(tc) = self.true_color {
            return Some(true_color_to_rgb(tc));
        }
        self.aci.and_then(aci_to_rgb)
    }
}

/// Reader for DXF byte ranges
pub struct DxfReader;

impl DxfReader {
    pub fn read_cloud(data: &[u8]) -> Result<CanonicalCloud> {
        let text = String::from_utf8_lossy(data);
        let mut lines = text.lines().map(str::trim);

        let mut vertices: Vec<([f64; 3], Option<[f32; 3]>)> = Vec::new();
        let mut indices: Vec<u32> = Vec::new();

        let mut in_entities = false;
        let mut pending_section = false;
        let mut entity: Option<Entity> = None;

        fn flush(
            entity: Option<Entity>,
            vertices: &mut Vec<([f64; 3], Option<[f32; 3]>)>,
            indices: &mut Vec<u32>,
        ) {
            let e = match entity {
                Some(e) => e,
                None => return,
            };
            let color = e.color();
            match e.kind.as_str() {
                "POINT" => {
                    if e.seen[0] {
                        vertices.push((e.corners[0], color));
                    }
                }
                "3DFACE" => {
                    if !(e.seen[0] && e.seen[1] && e.seen[2]) {
                        return;
                    }
                    let base = vertices.len() as u32;
                    vertices.push((e.corners[0], color));
                    vertices.push((e.corners[1], color));
                    vertices.push((e.corners[2], color));
                    indices.extend_from_slice(&[base, base + 1, base + 2]);
                    // A distinct fourth corner makes it a quad
                    if e.seen[3] && e.corners[3] != e.corners[2] {
                        vertices.push((e.corners[3], color));
                        indices.extend_from_slice(&[base, base + 2, base + 3]);
                    }
                }
                _ => {}
            }
        }

        while let (Some(code_line), Some(value_line)) = (lines.next(), lines.next()) {
            let code: i32 = code_line
                .parse()
                .map_err(|_| Error::InvalidData(format!("bad DXF group code: {}", code_line)))?;
            let value = value_line;

            match code {
                0 => {
                    flush(entity.take(), &mut vertices, &mut indices);
                    match value {
                        "SECTION" => pending_section = true,
                        "ENDSEC" => in_entities = false,
                        "POINT" | "3DFACE" if in_entities => {
                            entity = Some(Entity {
                                kind: value.to_string(),
                                ..Default::default()
                            });
                        }
                        _ => {}
                    }
                }
                2 if pending_section => {
                    in_entities = value == "ENTITIES";
                    pending_section = false;
                }
                10..=13 | 20..=23 | 30..=33 => {
                    if let Some(e) = entity.as_mut() {
                        let slot = (code % 10) as usize;
                        let axis = (code / 10 - 1) as usize;
                        if slot < 4 && axis < 3 {
                            if let Ok(v) = value.parse::<f64>() {
                                e.corners[slot][axis] = v;
                                e.seen[slot] = true;
                            }
                        }
                    }
                }
                62 => {
                    if let Some(e) = entity.as_mut() {
                        e.aci = value.parse().ok();
                    }
                }
                420 => {
                    if let Some(e) = entity.as_mut() {
                        e.true_color = value.parse().ok();
                    }
                }
                _ => {}
            }
        }
        flush(entity.take(), &mut vertices, &mut indices);

        let mut assembler = CloudAssembler::with_capacity("DXF", vertices.len());
        for (v, c) in &vertices {
            assembler.push(SourcePoint {
                x: v[0],
                y: v[1],
                z: v[2],
                color: *c,
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

    fn wrap_entities(body: &str) -> String {
        format!("0\nSECTION\n2\nENTITIES\n{}0\nENDSEC\n0\nEOF\n", body)
    }

    #[test]
    fn test_point_entities() {
        let text = wrap_entities("0\nPOINT\n10\n1.0\n20\n2.0\n30\n3.0\n0\nPOINT\n10\n4.0\n20\n5.0\n30\n6.0\n");
        let cloud = DxfReader::read_cloud(text.as_bytes()).unwrap();
        cloud.validate().unwrap();
        assert_eq!(cloud.point_count(), 2);
        assert!(cloud.indices.is_none());
        assert_eq!(cloud.header.bounds.max_x, 4.0);
    }

    #[test]
    fn test_point_outside_entities_ignored() {
        let text = "0\nSECTION\n2\nTABLES\n0\nPOINT\n10\n1.0\n20\n2.0\n30\n3.0\n0\nENDSEC\n0\nEOF\n";
        assert!(matches!(
            DxfReader::read_cloud(text.as_bytes()),
            Err(Error::EmptyCloud)
        ));
    }

    #[test]
    fn test_3dface_quad() {
        let text = wrap_entities(
            "0\n3DFACE\n10\n0\n20\n0\n30\n0\n11\n1\n21\n0\n31\n0\n12\n1\n22\n1\n32\n0\n13\n0\n23\n1\n33\n0\n",
        );
        let cloud = DxfReader::read_cloud(text.as_bytes()).unwrap();
        assert_eq!(cloud.point_count(), 4);
        assert_eq!(cloud.indices.as_ref().unwrap(), &vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn test_3dface_degenerate_fourth_corner_is_triangle() {
        let text = wrap_entities(
            "0\n3DFACE\n10\n0\n20\n0\n30\n0\n11\n1\n21\n0\n31\n0\n12\n1\n22\n1\n32\n0\n13\n1\n23\n1\n33\n0\n",
        );
        let cloud = DxfReader::read_cloud(text.as_bytes()).unwrap();
        assert_eq!(cloud.point_count(), 3);
        assert_eq!(cloud.indices.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn test_aci_and_true_color() {
        let text = wrap_entities(
            "0\nPOINT\n62\n1\n10\n0\n20\n0\n30\n0\n0\nPOINT\n420\n65280\n10\n1\n20\n0\n30\n0\n",
        );
        let cloud = DxfReader::read_cloud(text.as_bytes()).unwrap();
        assert!(cloud.has_color);
        // ACI 1 is red
        assert!((cloud.colors[0] - 1.0).abs() < 1e-6);
        // 65280 = 0x00FF00, green
        assert!((cloud.colors[4] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_aci_table_coverage() {
        assert_eq!(aci_to_rgb(7).unwrap(), [1.0, 1.0, 1.0]);
        assert_eq!(aci_to_rgb(250).unwrap(), [51.0 / 255.0; 3]);
        // Every chromatic index maps into range
        for aci in 10..=249 {
            let c = aci_to_rgb(aci).unwrap();
            assert!(c.iter().all(|&v| (0.0..=1.0).contains(&v)));
        }
        assert!(aci_to_rgb(0).is_none());
    }
}
