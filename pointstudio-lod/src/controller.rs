//! LOD controller: the visible working set of an octree-backed cloud
//!
//! Ticks are throttled and gated on camera movement; each tick asks the
//! backend for a visibility plan, unloads what fell out of it, and fetches
//! missing nodes in bounded batches. Backend errors are absorbed here and
//! never reach the UI.

use crate::backend::LodBackend;
use crate::octree::LodCamera;
use crate::wire::decode_chunks;
use log::warn;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Minimum spacing between ticks (10 Hz ceiling)
const TICK_INTERVAL: Duration = Duration::from_millis(100);
/// Outstanding chunk fetches per batch
const LOAD_BATCH_SIZE: usize = 15;
/// Positional delta below which the camera counts as stationary
const POSITION_EPSILON: f64 = 1e-3;
/// View-direction L1 delta below which rotation counts as unchanged
const ROTATION_EPSILON: f64 = 1e-3;

/// GPU-ready buffers for one resident node
pub struct LoadedNode {
    pub positions: Vec<f32>,
    pub colors: Vec<u8>,
    pub intensities: Vec<u16>,
    pub classifications: Vec<u8>,
    pub spacing: f32,
    pub level: u32,
    pub last_used: Instant,
}

impl LoadedNode {
    pub fn point_count(&self) -> usize {
        self.positions.len() / 3
    }

    /// Raw position bytes for buffer upload
    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }
}

/// Per-cloud LOD state driven from the UI timer
pub struct LodController {
    backend: Arc<dyn LodBackend>,
    cloud_id: String,
    /// Cloud AABB center; subtracted so node data lands in the world frame
    world_offset: [f64; 3],
    point_budget: u32,
    loaded: HashMap<String, LoadedNode>,
    last_camera: Option<LodCamera>,
    last_budget: u32,
    last_tick: Option<Instant>,
    in_tick: bool,
    disposed: bool,
}

impl LodController {
    pub fn new(
        backend: Arc<dyn LodBackend>,
        cloud_id: &str,
        world_offset: [f64; 3],
        point_budget: u32,
    ) -> Self {
        Self {
            backend,
            cloud_id: cloud_id.to_string(),
            world_offset,
            point_budget,
            loaded: HashMap::new(),
            last_camera: None,
            last_budget: point_budget,
            last_tick: None,
            in_tick: false,
            disposed: false,
        }
    }

    pub fn set_point_budget(&mut self, budget: u32) {
        self.point_budget = budget;
    }

    pub fn loaded_nodes(&self) -> &HashMap<String, LoadedNode> {
        &self.loaded
    }

    pub fn resident_points(&self) -> usize {
        self.loaded.values().map(|n| n.point_count()).sum()
    }

    /// Whether the camera changed enough to justify a new plan
    fn camera_moved(&self, camera: &LodCamera) -> bool {
        if self.point_budget != self.last_budget {
            return true;
        }
        let last = match &self.last_camera {
            Some(c) => c,
            None => return true,
        };

        let positional: f64 = camera
            .position
            .iter()
            .zip(&last.position)
            .map(|(a, b)| (a - b).abs())
            .sum();
        if positional > POSITION_EPSILON {
            return true;
        }

        // View direction L1 delta stands in for the rotation angle
        let dir = |c: &LodCamera| {
            let d = [
                c.target[0] - c.position[0],
                c.target[1] - c.position[1],
                c.target[2] - c.position[2],
            ];
            let len = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt().max(1e-12);
            [d[0] / len, d[1] / len, d[2] / len]
        };
        let a = dir(camera);
        let b = dir(last);
        let rotational: f64 = a.iter().zip(&b).map(|(x, y)| (x - y).abs()).sum();
        rotational > ROTATION_EPSILON
    }

    /// One update tick. Skipped while a previous tick runs, inside the
    /// throttle window, or when nothing about the view changed.
    pub fn update(&mut self, camera: &LodCamera) {
        if self.disposed || self.in_tick {
            return;
        }
        if let Some(last) = self.last_tick {
            if last.elapsed() < TICK_INTERVAL {
                return;
            }
        }
        if !self.camera_moved(camera) {
            return;
        }

        self.in_tick = true;
        self.last_tick = Some(Instant::now());
        self.last_camera = Some(camera.clone());
        self.last_budget = self.point_budget;

        let plan = match self
            .backend
            .get_visible_nodes(&self.cloud_id, camera, self.point_budget)
        {
            Ok(plan) => plan,
            Err(e) => {
                // Absorbed: the next camera move retries
                warn!("LOD visibility query failed for {}: {}", self.cloud_id, e);
                self.in_tick = false;
                return;
            }
        };

        let planned: std::collections::HashSet<&str> =
            plan.iter().map(|n| n.node_id.as_str()).collect();
        self.loaded.retain(|id, _| planned.contains(id.as_str()));
        let now = Instant::now();
        for node in self.loaded.values_mut() {
            node.last_used = now;
        }

        let missing: Vec<String> = plan
            .iter()
            .filter(|n| !self.loaded.contains_key(&n.node_id))
            .map(|n| n.node_id.clone())
            .collect();

        for batch in missing.chunks(LOAD_BATCH_SIZE) {
            let bytes = match self.backend.get_nodes_binary(&self.cloud_id, batch) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("LOD chunk fetch failed for {}: {}", self.cloud_id, e);
                    continue;
                }
            };
            let chunks = match decode_chunks(&bytes) {
                Ok(chunks) => chunks,
                Err(e) => {
                    warn!("LOD chunk decode failed for {}: {}", self.cloud_id, e);
                    continue;
                }
            };
            for chunk in chunks {
                // A teardown racing an in-flight batch must not resurrect buffers
                if self.disposed {
                    self.in_tick = false;
                    return;
                }
                let node = self.place_chunk(&chunk);
                self.loaded.insert(chunk.node_id.clone(), node);
            }
        }

        self.in_tick = false;
    }

    /// Resolve a chunk into world-frame Y-up buffers
    fn place_chunk(&self, chunk: &crate::wire::PointChunk) -> LoadedNode {
        let c = chunk.center;
        let o = self.world_offset;
        let mut positions = Vec::with_capacity(chunk.positions.len());
        for p in chunk.positions.chunks_exact(3) {
            let x = p[0] as f64 + c[0];
            let y = p[1] as f64 + c[1];
            let z = p[2] as f64 + c[2];
            // Source Z-up to renderer Y-up, then recenter on the cloud
            positions.push((x - o[0]) as f32);
            positions.push((z - o[2]) as f32);
            positions.push(-(y - o[1]) as f32);
        }
        LoadedNode {
            positions,
            colors: chunk.colors.clone(),
            intensities: chunk.intensities.clone(),
            classifications: chunk.classifications.clone(),
            spacing: chunk.spacing,
            level: chunk.level,
            last_used: Instant::now(),
        }
    }

    /// Drop every buffer; in-flight batches observe the flag and bail
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.loaded.clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCloudInfo, LodBackend};
    use crate::octree::OctreeNodeInfo;
    use crate::wire::{encode_chunks, PointChunk};
    use pointstudio_core::{Aabb, Error, IndexProgress, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend serving a fixed two-node plan and counting queries
    struct FixedBackend {
        queries: AtomicUsize,
        fail: bool,
    }

    impl FixedBackend {
        fn new(fail: bool) -> Self {
            Self {
                queries: AtomicUsize::new(0),
                fail,
            }
        }

        fn node(id: &str, count: u32) -> OctreeNodeInfo {
            let mut bounds = Aabb::empty();
            bounds.expand(0.0, 0.0, 0.0);
            bounds.expand(1.0, 1.0, 1.0);
            OctreeNodeInfo {
                node_id: id.to_string(),
                bounds,
                level: 1,
                point_count: count,
                has_children: false,
            }
        }
    }

    impl LodBackend for FixedBackend {
        fn open_pointcloud(&self, _path: &str) -> Result<BackendCloudInfo> {
            unimplemented!("not used by the controller")
        }

        fn get_visible_nodes(
            &self,
            _id: &str,
            _camera: &LodCamera,
            _budget: u32,
        ) -> Result<Vec<OctreeNodeInfo>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Backend("backend offline".to_string()));
            }
            Ok(vec![Self::node("r0", 2), Self::node("r1", 1)])
        }

        fn get_nodes_binary(&self, _id: &str, node_ids: &[String]) -> Result<Vec<u8>> {
            let chunks: Vec<PointChunk> = node_ids
                .iter()
                .map(|id| PointChunk {
                    node_id: id.clone(),
                    center: [10.0, 20.0, 30.0],
                    level: 1,
                    spacing: 0.1,
                    positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
                    colors: vec![255, 0, 0, 0, 255, 0],
                    intensities: vec![100, 200],
                    classifications: vec![2, 6],
                })
                .collect();
            Ok(encode_chunks(&chunks))
        }

        fn get_progress(&self, _id: &str) -> Result<IndexProgress> {
            Ok(IndexProgress::starting(0))
        }
    }

    fn camera(position: [f64; 3]) -> LodCamera {
        LodCamera {
            position,
            target: [0.0, 0.0, 0.0],
            fov: 60.0,
            aspect: 1.6,
            screen_height: 1080.0,
        }
    }

    #[test]
    fn test_first_tick_loads_plan() {
        let backend = Arc::new(FixedBackend::new(false));
        let mut controller = LodController::new(backend.clone(), "c1", [0.0; 3], 1_000_000);
        controller.update(&camera([0.0, 0.0, 10.0]));

        assert_eq!(controller.loaded_nodes().len(), 2);
        assert_eq!(controller.resident_points(), 4);
        assert_eq!(backend.queries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stationary_camera_skips_tick() {
        let backend = Arc::new(FixedBackend::new(false));
        let mut controller = LodController::new(backend.clone(), "c1", [0.0; 3], 1_000_000);
        let cam = camera([0.0, 0.0, 10.0]);
        controller.update(&cam);
        // Force the throttle window open, then tick with the same camera
        controller.last_tick = Some(Instant::now() - Duration::from_secs(1));
        controller.update(&cam);
        assert_eq!(backend.queries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_budget_change_forces_tick() {
        let backend = Arc::new(FixedBackend::new(false));
        let mut controller = LodController::new(backend.clone(), "c1", [0.0; 3], 1_000_000);
        let cam = camera([0.0, 0.0, 10.0]);
        controller.update(&cam);
        controller.last_tick = Some(Instant::now() - Duration::from_secs(1));
        controller.set_point_budget(500);
        controller.update(&cam);
        assert_eq!(backend.queries.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_throttle_window() {
        let backend = Arc::new(FixedBackend::new(false));
        let mut controller = LodController::new(backend.clone(), "c1", [0.0; 3], 1_000_000);
        controller.update(&camera([0.0, 0.0, 10.0]));
        // Immediately after a tick, even a moved camera is deferred
        controller.update(&camera([5.0, 0.0, 10.0]));
        assert_eq!(backend.queries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backend_errors_absorbed() {
        let backend = Arc::new(FixedBackend::new(true));
        let mut controller = LodController::new(backend.clone(), "c1", [0.0; 3], 1_000_000);
        controller.update(&camera([0.0, 0.0, 10.0]));
        assert!(controller.loaded_nodes().is_empty());

        // The next moved-camera tick retries
        controller.last_tick = Some(Instant::now() - Duration::from_secs(1));
        controller.update(&camera([5.0, 0.0, 10.0]));
        assert_eq!(backend.queries.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_chunk_placement_swaps_frame() {
        let backend = Arc::new(FixedBackend::new(false));
        let mut controller =
            LodController::new(backend, "c1", [10.0, 20.0, 30.0], 1_000_000);
        controller.update(&camera([0.0, 0.0, 10.0]));

        let node = controller.loaded_nodes().get("r0").unwrap();
        // Chunk center equals the world offset, so the first point (rel
        // 0,0,0) lands at the origin after the swap.
        assert!(node.positions[0].abs() < 1e-6);
        assert!(node.positions[1].abs() < 1e-6);
        assert!(node.positions[2].abs() < 1e-6);
        // Second point is +1 source x
        assert!((node.positions[3] - 1.0).abs() < 1e-6);
        assert_eq!(node.position_bytes().len(), 6 * 4);
    }

    #[test]
    fn test_dispose_clears_buffers() {
        let backend = Arc::new(FixedBackend::new(false));
        let mut controller = LodController::new(backend, "c1", [0.0; 3], 1_000_000);
        controller.update(&camera([0.0, 0.0, 10.0]));
        assert!(!controller.loaded_nodes().is_empty());

        controller.dispose();
        assert!(controller.is_disposed());
        assert!(controller.loaded_nodes().is_empty());

        // Ticks after teardown are no-ops
        controller.last_tick = None;
        controller.update(&camera([9.0, 9.0, 9.0]));
        assert!(controller.loaded_nodes().is_empty());
    }
}
