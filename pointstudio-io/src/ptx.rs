//! PTX (Leica structured scan) support
//!
//! A PTX file holds one or more scans, each with a small header (grid
//! dimensions, scanner pose, a 4x4 row-major registration transform) followed
//! by `columns * rows` point lines. All-zero points are scanner holes and are
//! dropped.

use crate::assemble::{CloudAssembler, SourcePoint};
use pointstudio_core::{CanonicalCloud, Error, Result};

/// Row-major 4x4 transform applied with the PTX row-vector convention
#[derive(Debug, Clone)]
struct ScanTransform {
    m: [[f64; 4]; 4],
}

impl ScanTransform {
    fn is_identity(&self) -> bool {
        for r in 0..4 {
            for c in 0..4 {
                let expected = if r == c { 1.0 } else { 0.0 };
                if (self.m[r][c] - expected).abs() > 1e-12 {
                    return false;
                }
            }
        }
        true
    }

    fn apply(&self, x: f64, y: f64, z: f64) -> (f64, f64, f64) {
        let m = &self.m;
        (
            x * m[0][0] + y * m[1][0] + z * m[2][0] + m[3][0],
            x * m[0][1] + y * m[1][1] + z * m[2][1] + m[3][1],
            x * m[0][2] + y * m[1][2] + z * m[2][2] + m[3][2],
        )
    }
}

/// Reader for PTX byte ranges
pub struct PtxReader;

impl PtxReader {
    pub fn read_cloud(data: &[u8]) -> Result<CanonicalCloud> {
        let text = String::from_utf8_lossy(data);
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        let mut assembler = CloudAssembler::new("PTX");

        loop {
            let columns: usize = match lines.next() {
                None => break,
                Some(line) => line
                    .parse()
                    .map_err(|_| Error::InvalidData(format!("bad PTX column count: {}", line)))?,
            };
            let rows: usize = lines
                .next()
                .and_then(|l| l.parse().ok())
                .ok_or_else(|| Error::Truncated("PTX scan header ended early".to_string()))?;

            // Scanner position plus 3x3 registration rotation, unused here
            for _ in 0..4 {
                lines
                    .next()
                    .ok_or_else(|| Error::Truncated("PTX scan header ended early".to_string()))?;
            }

            let mut m = [[0.0f64; 4]; 4];
            for row in &mut m {
                let line = lines
                    .next()
                    .ok_or_else(|| Error::Truncated("PTX transform ended early".to_string()))?;
                let values: Vec<f64> =
                    line.split_whitespace().filter_map(|t| t.parse().ok()).collect();
                if values.len() < 4 {
                    return Err(Error::InvalidData(format!("bad PTX transform row: {}", line)));
                }
                row.copy_from_slice(&values[0..4]);
            }
            let transform = ScanTransform { m };
            let apply = !transform.is_identity();

            for _ in 0..columns * rows {
                let line = match lines.next() {
                    Some(l) => l,
                    None => break,
                };
                let values: Vec<f64> =
                    line.split_whitespace().filter_map(|t| t.parse().ok()).collect();
                if values.len() < 3 {
                    continue;
                }

                let (x, y, z) = (values[0], values[1], values[2]);
                if x == 0.0 && y == 0.0 && z == 0.0 {
                    continue; // scanner hole
                }

                let (x, y, z) = if apply { transform.apply(x, y, z) } else { (x, y, z) };

                let mut point = SourcePoint::xyz(x, y, z);
                if values.len() >= 4 {
                    point.intensity = Some(values[3].clamp(0.0, 1.0) as f32);
                }
                if values.len() >= 7 {
                    point.color = Some([
                        (values[4] / 255.0) as f32,
                        (values[5] / 255.0) as f32,
                        (values[6] / 255.0) as f32,
                    ]);
                }
                assembler.push(point);
            }
        }

        assembler.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_header(columns: usize, rows: usize, transform: &str) -> String {
        format!(
            "{}\n{}\n0 0 0\n1 0 0\n0 1 0\n0 0 1\n{}\n",
            columns, rows, transform
        )
    }

    const IDENTITY: &str = "1 0 0 0\n0 1 0 0\n0 0 1 0\n0 0 0 1";

    #[test]
    fn test_single_scan_with_holes() {
        let mut text = scan_header(2, 2, IDENTITY);
        text.push_str("1 0 0 0.5\n0 0 0 0\n0 1 0 0.25\n0 0 1 1.0\n");
        let cloud = PtxReader::read_cloud(text.as_bytes()).unwrap();
        // The all-zero point is a hole
        assert_eq!(cloud.point_count(), 3);
        assert!(cloud.has_intensity);
    }

    #[test]
    fn test_transform_applied() {
        // Translate by (10, 0, 0); row-major with translation in the last row
        let transform = "1 0 0 0\n0 1 0 0\n0 0 1 0\n10 0 0 1";
        let mut text = scan_header(1, 2, transform);
        text.push_str("1 0 0 0.5\n2 0 0 0.5\n");
        let cloud = PtxReader::read_cloud(text.as_bytes()).unwrap();
        assert_eq!(cloud.point_count(), 2);
        assert_eq!(cloud.header.bounds.min_x, 11.0);
        assert_eq!(cloud.header.bounds.max_x, 12.0);
    }

    #[test]
    fn test_two_scans_merge() {
        let mut text = scan_header(1, 1, IDENTITY);
        text.push_str("1 0 0 0.5\n");
        text.push_str(&scan_header(1, 1, IDENTITY));
        text.push_str("2 0 0 0.5 255 0 0\n");
        let cloud = PtxReader::read_cloud(text.as_bytes()).unwrap();
        assert_eq!(cloud.point_count(), 2);
        assert!(cloud.has_color);
    }

    #[test]
    fn test_truncated_header_fails() {
        let text = "4\n4\n0 0 0\n";
        assert!(matches!(
            PtxReader::read_cloud(text.as_bytes()),
            Err(Error::Truncated(_))
        ));
    }
}
