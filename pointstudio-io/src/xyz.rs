//! XYZ / TXT / CSV / ASC delimited text point cloud support
//!
//! Delimiter is detected from the first non-comment line (comma, semicolon,
//! tab, then whitespace). A first line whose leading token is non-numeric is
//! treated as a header. Column meanings follow the column count:
//! 3 = XYZ, 4 = XYZ+intensity, 6 = XYZ+RGB, 7+ = XYZ+intensity+RGB.

use crate::assemble::{CloudAssembler, SourcePoint};
use pointstudio_core::{CanonicalCloud, Error, Result};

/// Supported delimiters, in detection order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Comma,
    Semicolon,
    Tab,
    Whitespace,
}

impl Delimiter {
    /// Detect from a data line; comma wins over semicolon wins over tab
    pub fn detect(line: &str) -> Self {
        if line.contains(',') {
            Delimiter::Comma
        } else if line.contains(';') {
            Delimiter::Semicolon
        } else if line.contains('\t') {
            Delimiter::Tab
        } else {
            Delimiter::Whitespace
        }
    }

    pub fn split<'a>(&self, line: &'a str) -> Vec<&'a str> {
        match self {
            Delimiter::Comma => line.split(',').map(str::trim).filter(|t| !t.is_empty()).collect(),
            Delimiter::Semicolon => {
                line.split(';').map(str::trim).filter(|t| !t.is_empty()).collect()
            }
            Delimiter::Tab => line.split('\t').map(str::trim).filter(|t| !t.is_empty()).collect(),
            Delimiter::Whitespace => line.split_whitespace().collect(),
        }
    }
}

fn is_comment(line: &str) -> bool {
    line.starts_with('#') || line.starts_with("//")
}

/// Map one tokenized row onto a source point by column count
fn row_to_point(values: &[f64]) -> Option<SourcePoint> {
    if values.len() < 3 {
        return None;
    }
    let mut point = SourcePoint::xyz(values[0], values[1], values[2]);
    match values.len() {
        3 => {}
        4 => point.intensity = Some((values[3] / 255.0).clamp(0.0, 1.0) as f32),
        5 | 6 => {
            point.color = Some([
                (values[3] / 255.0) as f32,
                (values[4] / 255.0) as f32,
                (values.get(5).copied().unwrap_or(values[4]) / 255.0) as f32,
            ]);
        }
        _ => {
            point.intensity = Some((values[3] / 255.0).clamp(0.0, 1.0) as f32);
            point.color = Some([
                (values[4] / 255.0) as f32,
                (values[5] / 255.0) as f32,
                (values[6] / 255.0) as f32,
            ]);
        }
    }
    Some(point)
}

/// Reader for delimited text point files
pub struct XyzReader;

impl XyzReader {
    pub fn read_cloud(data: &[u8]) -> Result<CanonicalCloud> {
        let text = String::from_utf8_lossy(data);
        let mut assembler = CloudAssembler::new("XYZ");

        let mut delimiter = None;
        let mut first_data_line = true;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || is_comment(line) {
                continue;
            }

            let delim = *delimiter.get_or_insert_with(|| Delimiter::detect(line));
            let tokens = delim.split(line);
            if tokens.is_empty() {
                continue;
            }

            if first_data_line {
                first_data_line = false;
                // A non-numeric leading token marks a header row
                if tokens[0].parse::<f64>().is_err() {
                    continue;
                }
            }

            let values: Vec<f64> = tokens.iter().filter_map(|t| t.parse().ok()).collect();
            if let Some(point) = row_to_point(&values) {
                assembler.push(point);
            }
        }

        assembler.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_xyz_whitespace() {
        let text = "0 0 0\n1 0 0\n0 1 0\n";
        let cloud = XyzReader::read_cloud(text.as_bytes()).unwrap();
        cloud.validate().unwrap();
        assert_eq!(cloud.point_count(), 3);
        assert!(!cloud.has_color);
        assert!(!cloud.has_intensity);
    }

    #[test]
    fn test_csv_with_header() {
        let text = "x,y,z,r,g,b\n0,0,0,255,0,0\n1,1,1,0,255,0\n";
        let cloud = XyzReader::read_cloud(text.as_bytes()).unwrap();
        assert_eq!(cloud.point_count(), 2);
        assert!(cloud.has_color);
        assert!((cloud.colors[0] - 1.0).abs() < 1e-6);
        assert!((cloud.colors[4] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_four_column_intensity() {
        let text = "0 0 0 255\n1 0 0 0\n";
        let cloud = XyzReader::read_cloud(text.as_bytes()).unwrap();
        assert!(cloud.has_intensity);
        assert!((cloud.intensities[0] - 1.0).abs() < 1e-6);
        assert!((cloud.intensities[1] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_seven_column_intensity_and_rgb() {
        let text = "0;0;0;128;255;0;0\n";
        let cloud = XyzReader::read_cloud(text.as_bytes()).unwrap();
        assert!(cloud.has_intensity);
        assert!(cloud.has_color);
        assert!((cloud.intensities[0] - 128.0 / 255.0).abs() < 1e-6);
        assert!((cloud.colors[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_comments_skipped() {
        let text = "# scanner export\n// more notes\n0 0 0\n";
        let cloud = XyzReader::read_cloud(text.as_bytes()).unwrap();
        assert_eq!(cloud.point_count(), 1);
    }

    #[test]
    fn test_empty_file_fails() {
        assert!(matches!(
            XyzReader::read_cloud(b"# nothing\n"),
            Err(Error::EmptyCloud)
        ));
    }
}
