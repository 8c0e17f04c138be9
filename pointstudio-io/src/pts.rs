//! PTS (Leica scanner export) support
//!
//! Same columnar layout as XYZ, with the Leica intensity convention: raw
//! values below zero sit in [-2048, 2047] and are shifted into [0,1]; values
//! above one are 0..255.

use crate::assemble::{CloudAssembler, SourcePoint};
use pointstudio_core::{CanonicalCloud, Result};

/// Shift a raw PTS intensity into [0,1]
pub fn normalize_pts_intensity(raw: f64) -> f32 {
    let v = if raw < 0.0 {
        (raw + 2048.0) / 4095.0
    } else if raw > 1.0 {
        raw / 255.0
    } else {
        raw
    };
    v.clamp(0.0, 1.0) as f32
}

/// Reader for PTS byte ranges
pub struct PtsReader;

impl PtsReader {
    pub fn read_cloud(data: &[u8]) -> Result<CanonicalCloud> {
        let text = String::from_utf8_lossy(data);
        let mut assembler = CloudAssembler::new("PTS");

        let mut first_line = true;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let tokens: Vec<&str> = line.split_whitespace().collect();

            // A lone integer on the first line is the declared point count
            if first_line {
                first_line = false;
                if tokens.len() == 1 && tokens[0].parse::<u64>().is_ok() {
                    continue;
                }
            }

            let values: Vec<f64> = tokens.iter().filter_map(|t| t.parse().ok()).collect();
            if values.len() < 3 {
                continue;
            }

            let mut point = SourcePoint::xyz(values[0], values[1], values[2]);
            match values.len() {
                3 => {}
                4 => point.intensity = Some(normalize_pts_intensity(values[3])),
                5 | 6 => {
                    point.color = Some([
                        (values[3] / 255.0) as f32,
                        (values[4] / 255.0) as f32,
                        (values.get(5).copied().unwrap_or(values[4]) / 255.0) as f32,
                    ]);
                }
                _ => {
                    point.intensity = Some(normalize_pts_intensity(values[3]));
                    point.color = Some([
                        (values[4] / 255.0) as f32,
                        (values[5] / 255.0) as f32,
                        (values[6] / 255.0) as f32,
                    ]);
                }
            }
            assembler.push(point);
        }

        assembler.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_line_skipped() {
        let text = "2\n0 0 0\n1 0 0\n";
        let cloud = PtsReader::read_cloud(text.as_bytes()).unwrap();
        assert_eq!(cloud.point_count(), 2);
    }

    #[test]
    fn test_leica_negative_intensity() {
        let text = "1\n0 0 0 -2048\n";
        let cloud = PtsReader::read_cloud(text.as_bytes()).unwrap();
        assert!((cloud.intensities[0] - 0.0).abs() < 1e-6);

        let text = "1\n0 0 0 2047\n";
        let cloud = PtsReader::read_cloud(text.as_bytes()).unwrap();
        assert!((cloud.intensities[0] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_intensity_above_one_is_byte_scaled() {
        let text = "0 0 0 128\n";
        let cloud = PtsReader::read_cloud(text.as_bytes()).unwrap();
        assert!((cloud.intensities[0] - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_seven_columns_with_color() {
        let text = "1\n1 2 3 0.5 255 128 0\n";
        let cloud = PtsReader::read_cloud(text.as_bytes()).unwrap();
        assert!(cloud.has_color);
        assert!((cloud.intensities[0] - 0.5).abs() < 1e-6);
        assert!((cloud.colors[0] - 1.0).abs() < 1e-6);
        assert!((cloud.colors[1] - 128.0 / 255.0).abs() < 1e-6);
    }
}
