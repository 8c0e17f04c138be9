//! Octree store behind the LOD backend interface
//!
//! The controller only sees the trait; this in-process implementation
//! indexes a file on a background thread while reporting progress, then
//! serves visibility plans and binary chunk streams.

use crate::octree::{LodCamera, LodOctree, LodPoint, OctreeNodeInfo};
use crate::wire::encode_chunks;
use log::warn;
use pointstudio_core::{Aabb, CanonicalCloud, Error, IndexProgress, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Metadata returned when a cloud is opened in the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendCloudInfo {
    pub id: String,
    pub format: String,
    pub total_points: u64,
    pub bounds: Aabb,
    pub has_color: bool,
    pub has_intensity: bool,
    pub has_classification: bool,
}

/// The opaque LOD backend the controller talks to
pub trait LodBackend: Send + Sync {
    fn open_pointcloud(&self, path: &str) -> Result<BackendCloudInfo>;
    fn get_visible_nodes(
        &self,
        id: &str,
        camera: &LodCamera,
        point_budget: u32,
    ) -> Result<Vec<OctreeNodeInfo>>;
    fn get_nodes_binary(&self, id: &str, node_ids: &[String]) -> Result<Vec<u8>>;
    fn get_progress(&self, id: &str) -> Result<IndexProgress>;
}

struct StoreEntry {
    info: BackendCloudInfo,
    octree: Option<LodOctree>,
    progress: IndexProgress,
}

/// In-process backend building octrees on background threads
#[derive(Default)]
pub struct OctreeStore {
    entries: Arc<RwLock<HashMap<String, StoreEntry>>>,
}

impl OctreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index an already decoded cloud under a fresh id.
    ///
    /// Point data is converted back to the source frame so chunk consumers
    /// get the same coordinates a path-based open would produce.
    pub fn open_from_cloud(&self, cloud: &CanonicalCloud) -> BackendCloudInfo {
        let id = Uuid::new_v4().to_string();
        let total_points = cloud.point_count() as u64;
        let info = BackendCloudInfo {
            id: id.clone(),
            format: cloud.header.source_tag.clone(),
            total_points,
            bounds: cloud.header.bounds.clone(),
            has_color: cloud.has_color,
            has_intensity: cloud.has_intensity,
            has_classification: cloud.has_classification,
        };

        let points = Self::source_frame_points(cloud);
        let bounds = cloud.header.bounds.clone();

        self.entries.write().unwrap().insert(
            id.clone(),
            StoreEntry {
                info: info.clone(),
                octree: None,
                progress: IndexProgress::starting(total_points),
            },
        );

        // Octree construction happens off the interactive thread
        let entries = Arc::clone(&self.entries);
        std::thread::spawn(move || {
            Self::build_entry(&entries, &id, points, bounds);
        });

        info
    }

    fn build_entry(
        entries: &RwLock<HashMap<String, StoreEntry>>,
        id: &str,
        points: Vec<LodPoint>,
        bounds: Aabb,
    ) {
        let total = points.len() as u64;
        if let Some(entry) = entries.write().unwrap().get_mut(id) {
            entry.progress.phase = "Building octree".to_string();
            entry.progress.progress = 0.5;
            entry.progress.points_processed = total;
        }

        let octree = LodOctree::build(points, bounds);

        if let Some(entry) = entries.write().unwrap().get_mut(id) {
            entry.octree = Some(octree);
            entry.progress.phase = "Complete".to_string();
            entry.progress.progress = 1.0;
        }
    }

    /// Undo the canonical centering and Y-up swap per point
    fn source_frame_points(cloud: &CanonicalCloud) -> Vec<LodPoint> {
        let c = cloud.center;
        cloud
            .positions
            .chunks_exact(3)
            .enumerate()
            .map(|(i, p)| LodPoint {
                x: p[0] as f64 + c[0],
                y: -(p[2] as f64) + c[1],
                z: p[1] as f64 + c[2],
                r: (cloud.colors[i * 3] * 255.0).round() as u8,
                g: (cloud.colors[i * 3 + 1] * 255.0).round() as u8,
                b: (cloud.colors[i * 3 + 2] * 255.0).round() as u8,
                intensity: (cloud.intensities[i] * 65535.0).round() as u16,
                classification: cloud.classifications[i].clamp(0.0, 255.0) as u8,
            })
            .collect()
    }

    pub fn close(&self, id: &str) -> bool {
        self.entries.write().unwrap().remove(id).is_some()
    }

    pub fn list(&self) -> Vec<BackendCloudInfo> {
        self.entries
            .read()
            .unwrap()
            .values()
            .map(|e| e.info.clone())
            .collect()
    }
}

impl LodBackend for OctreeStore {
    fn open_pointcloud(&self, path: &str) -> Result<BackendCloudInfo> {
        let cloud = pointstudio_io::read_cloud_from_path(path)?;
        Ok(self.open_from_cloud(&cloud))
    }

    fn get_visible_nodes(
        &self,
        id: &str,
        camera: &LodCamera,
        point_budget: u32,
    ) -> Result<Vec<OctreeNodeInfo>> {
        let entries = self.entries.read().unwrap();
        let entry = entries
            .get(id)
            .ok_or_else(|| Error::Backend(format!("unknown cloud {}", id)))?;
        let octree = entry
            .octree
            .as_ref()
            .ok_or_else(|| Error::Backend("octree not yet built".to_string()))?;
        Ok(octree.visible_nodes(camera, point_budget))
    }

    fn get_nodes_binary(&self, id: &str, node_ids: &[String]) -> Result<Vec<u8>> {
        let entries = self.entries.read().unwrap();
        let entry = entries
            .get(id)
            .ok_or_else(|| Error::Backend(format!("unknown cloud {}", id)))?;
        let octree = entry
            .octree
            .as_ref()
            .ok_or_else(|| Error::Backend("octree not yet built".to_string()))?;

        let mut chunks = Vec::with_capacity(node_ids.len());
        for node_id in node_ids {
            match octree.node_chunk(node_id) {
                Some(chunk) => chunks.push(chunk),
                None => warn!("requested unknown octree node {}", node_id),
            }
        }
        Ok(encode_chunks(&chunks))
    }

    fn get_progress(&self, id: &str) -> Result<IndexProgress> {
        self.entries
            .read()
            .unwrap()
            .get(id)
            .map(|e| e.progress.clone())
            .ok_or_else(|| Error::Backend(format!("unknown cloud {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointstudio_core::SourceHeader;
    use std::time::Duration;

    fn test_cloud(n: usize) -> CanonicalCloud {
        let side = (n as f64).sqrt().ceil() as usize;
        let mut positions = Vec::new();
        let mut bounds = Aabb::empty();
        for i in 0..n {
            let x = (i % side) as f32;
            let y = (i / side) as f32;
            positions.extend_from_slice(&[x, y, 0.0]);
            bounds.expand(x as f64, 0.0, y as f64);
        }
        let mut header = SourceHeader::new("XYZ");
        header.bounds = bounds;
        CanonicalCloud {
            positions,
            colors: vec![0.5; n * 3],
            intensities: vec![0.5; n],
            classifications: vec![2.0; n],
            indices: None,
            header,
            center: [0.0; 3],
            has_color: true,
            has_intensity: true,
            has_classification: true,
        }
    }

    fn wait_for_build(store: &OctreeStore, id: &str) {
        for _ in 0..200 {
            if store.get_progress(id).unwrap().progress >= 1.0 {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("octree build never finished");
    }

    #[test]
    fn test_open_and_progress() {
        let store = OctreeStore::new();
        let info = store.open_from_cloud(&test_cloud(5000));
        assert_eq!(info.total_points, 5000);
        wait_for_build(&store, &info.id);
        assert_eq!(store.get_progress(&info.id).unwrap().phase, "Complete");
    }

    #[test]
    fn test_visible_nodes_and_chunks() {
        let store = OctreeStore::new();
        let info = store.open_from_cloud(&test_cloud(5000));
        wait_for_build(&store, &info.id);

        let camera = LodCamera {
            position: [0.0, 50.0, 0.0],
            target: [0.0, 0.0, 0.0],
            fov: 60.0,
            aspect: 1.6,
            screen_height: 1080.0,
        };
        let nodes = store.get_visible_nodes(&info.id, &camera, 1_000_000).unwrap();
        assert!(!nodes.is_empty());

        let ids: Vec<String> = nodes.iter().map(|n| n.node_id.clone()).collect();
        let bytes = store.get_nodes_binary(&info.id, &ids).unwrap();
        let chunks = crate::wire::decode_chunks(&bytes).unwrap();
        assert_eq!(chunks.len(), ids.len());
    }

    #[test]
    fn test_unknown_id_is_backend_error() {
        let store = OctreeStore::new();
        assert!(matches!(
            store.get_progress("nope"),
            Err(Error::Backend(_))
        ));
    }

    #[test]
    fn test_close_removes_entry() {
        let store = OctreeStore::new();
        let info = store.open_from_cloud(&test_cloud(100));
        assert!(store.close(&info.id));
        assert!(!store.close(&info.id));
    }
}
