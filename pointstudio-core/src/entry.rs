//! UI-visible cloud metadata, held separately from the point buffers

use crate::bounds::Aabb;
use crate::cloud::CanonicalCloud;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the renderer colors points; opaque to the data plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    Rgb,
    Intensity,
    Elevation,
    Classification,
}

impl Default for ColorMode {
    fn default() -> Self {
        ColorMode::Rgb
    }
}

/// Octree indexing progress for one cloud
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexProgress {
    pub progress: f64,
    pub phase: String,
    pub points_processed: u64,
    pub total_points: u64,
}

impl IndexProgress {
    pub fn starting(total_points: u64) -> Self {
        Self {
            progress: 0.0,
            phase: "Reading points".to_string(),
            points_processed: 0,
            total_points,
        }
    }
}

/// Metadata about one loaded cloud.
///
/// Created on import, mutated only by the edit engine (which bumps
/// `transform_version`) and the indexing progress ticker, destroyed on
/// explicit removal or when every point has been deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudEntry {
    pub id: String,
    pub name: String,
    pub file_path: String,
    pub source_tag: String,
    pub total_points: u64,
    pub bounds: Aabb,
    pub has_color: bool,
    pub has_intensity: bool,
    pub has_classification: bool,
    pub visible: bool,
    pub index_progress: IndexProgress,
    /// Monotonic counter; the renderer rebuilds its buffers when it changes
    pub transform_version: u64,
}

impl CloudEntry {
    /// Build an entry for a freshly decoded cloud with a new v4 id.
    pub fn from_cloud(name: &str, file_path: &str, cloud: &CanonicalCloud) -> Self {
        let total_points = cloud.point_count() as u64;
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            file_path: file_path.to_string(),
            source_tag: cloud.header.source_tag.clone(),
            total_points,
            bounds: cloud.header.bounds.clone(),
            has_color: cloud.has_color,
            has_intensity: cloud.has_intensity,
            has_classification: cloud.has_classification,
            visible: true,
            index_progress: IndexProgress::starting(total_points),
            transform_version: 0,
        }
    }

    pub fn bump_version(&mut self) {
        self.transform_version += 1;
    }
}
