//! In-process octree store for level-of-detail serving
//!
//! Leaves hold up to a fixed point capacity; internal nodes carry a strided
//! subsample of their children so coarse views stay cheap. Node ids are
//! octant digit strings rooted at `"r"`.

use crate::wire::PointChunk;
use pointstudio_core::Aabb;
use serde::{Deserialize, Serialize};

const MAX_POINTS_PER_LEAF: usize = 65_536;
const MAX_DEPTH: u8 = 12;
/// Every Nth child point survives into the parent LOD
const SUBSAMPLE_RATIO: usize = 8;

/// Screen-space size below which a node is culled entirely
const MIN_SCREEN_SIZE_PX: f64 = 1.0;
/// Screen-space size below which a node is coarse enough to use as-is
const REFINEMENT_THRESHOLD_PX: f64 = 200.0;

/// One stored point in the source frame
#[derive(Debug, Clone, Copy)]
pub struct LodPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub intensity: u16,
    pub classification: u8,
}

/// Node metadata handed to the LOD controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OctreeNodeInfo {
    pub node_id: String,
    pub bounds: Aabb,
    pub level: u8,
    pub point_count: u32,
    pub has_children: bool,
}

/// Camera state used for visibility planning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LodCamera {
    pub position: [f64; 3],
    pub target: [f64; 3],
    pub fov: f64,
    pub aspect: f64,
    pub screen_height: f64,
}

struct OctreeNode {
    node_id: String,
    bounds: Aabb,
    level: u8,
    points: Vec<LodPoint>,
    children: [Option<Box<OctreeNode>>; 8],
}

impl OctreeNode {
    fn new(node_id: String, bounds: Aabb, level: u8) -> Self {
        Self {
            node_id,
            bounds,
            level,
            points: Vec::new(),
            children: Default::default(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.iter().all(|c| c.is_none())
    }

    fn has_children(&self) -> bool {
        self.children.iter().any(|c| c.is_some())
    }

    fn info(&self) -> OctreeNodeInfo {
        OctreeNodeInfo {
            node_id: self.node_id.clone(),
            bounds: self.bounds.clone(),
            level: self.level,
            point_count: self.points.len() as u32,
            has_children: self.has_children(),
        }
    }
}

/// The spatial index over one cloud's full point set
pub struct LodOctree {
    root: OctreeNode,
    total_points: u64,
}

impl LodOctree {
    pub fn build(points: Vec<LodPoint>, bounds: Aabb) -> Self {
        let total_points = points.len() as u64;
        let mut tree = Self {
            root: OctreeNode::new("r".to_string(), bounds, 0),
            total_points,
        };
        for point in points {
            Self::insert(&mut tree.root, point);
        }
        Self::build_lod(&mut tree.root);
        tree
    }

    pub fn total_points(&self) -> u64 {
        self.total_points
    }

    fn octant_of(bounds: &Aabb, p: &LodPoint) -> u8 {
        let c = bounds.center();
        let mut octant = 0u8;
        if p.x >= c[0] {
            octant |= 1;
        }
        if p.y >= c[1] {
            octant |= 2;
        }
        if p.z >= c[2] {
            octant |= 4;
        }
        octant
    }

    fn insert(node: &mut OctreeNode, point: LodPoint) {
        if node.is_leaf() && node.points.len() < MAX_POINTS_PER_LEAF {
            node.points.push(point);
            return;
        }
        if node.level >= MAX_DEPTH {
            node.points.push(point);
            return;
        }

        // Splitting a full leaf pushes its points down first
        if node.is_leaf() && !node.points.is_empty() {
            let existing: Vec<LodPoint> = node.points.drain(..).collect();
            for p in existing {
                let octant = Self::octant_of(&node.bounds, &p);
                Self::insert(Self::ensure_child(node, octant), p);
            }
        }

        let octant = Self::octant_of(&node.bounds, &point);
        Self::insert(Self::ensure_child(node, octant), point);
    }

    fn ensure_child(node: &mut OctreeNode, octant: u8) -> &mut OctreeNode {
        if node.children[octant as usize].is_none() {
            node.children[octant as usize] = Some(Box::new(OctreeNode::new(
                format!("{}{}", node.node_id, octant),
                node.bounds.octant(octant),
                node.level + 1,
            )));
        }
        node.children[octant as usize].as_mut().unwrap()
    }

    /// Fill internal nodes bottom-up with subsamples of their children
    fn build_lod(node: &mut OctreeNode) {
        for child in node.children.iter_mut().flatten() {
            Self::build_lod(child);
        }
        if node.has_children() && node.points.is_empty() {
            let mut subsample = Vec::new();
            for child in node.children.iter().flatten() {
                subsample.extend(
                    child
                        .points
                        .iter()
                        .step_by(SUBSAMPLE_RATIO)
                        .copied(),
                );
            }
            node.points = subsample;
        }
    }

    fn find(&self, node_id: &str) -> Option<&OctreeNode> {
        let mut node = &self.root;
        if !node_id.starts_with(&node.node_id) {
            return None;
        }
        for digit in node_id[node.node_id.len()..].bytes() {
            let octant = (digit as char).to_digit(8)? as usize;
            node = node.children[octant].as_deref()?;
        }
        Some(node)
    }

    pub fn node_info(&self, node_id: &str) -> Option<OctreeNodeInfo> {
        self.find(node_id).map(|n| n.info())
    }

    /// Pack a node's points for transfer, positions relative to the node
    /// center so single precision holds up far from the origin.
    pub fn node_chunk(&self, node_id: &str) -> Option<PointChunk> {
        let node = self.find(node_id)?;
        if node.points.is_empty() {
            return None;
        }

        let center = node.bounds.center();
        let count = node.points.len();
        let mut positions = Vec::with_capacity(count * 3);
        let mut colors = Vec::with_capacity(count * 3);
        let mut intensities = Vec::with_capacity(count);
        let mut classifications = Vec::with_capacity(count);

        for p in &node.points {
            positions.push((p.x - center[0]) as f32);
            positions.push((p.y - center[1]) as f32);
            positions.push((p.z - center[2]) as f32);
            colors.push(p.r);
            colors.push(p.g);
            colors.push(p.b);
            intensities.push(p.intensity);
            classifications.push(p.classification);
        }

        // Spacing from the 2D surface footprint: scan points lie on
        // surfaces, so area over count is the right density estimate.
        let s = node.bounds.size();
        let mut dims = [s[0], s[1], s[2]];
        dims.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        let spacing = (dims[0] * dims[1] / count as f64).sqrt() as f32;

        Some(PointChunk {
            node_id: node_id.to_string(),
            center,
            level: node.level as u32,
            spacing,
            positions,
            colors,
            intensities,
            classifications,
        })
    }

    /// Screen-space-error node selection bounded by the point budget.
    ///
    /// Candidates are ranked by `distance / extent` and accumulated until
    /// the budget would overflow.
    pub fn visible_nodes(&self, camera: &LodCamera, point_budget: u32) -> Vec<OctreeNodeInfo> {
        let mut candidates: Vec<(f64, OctreeNodeInfo)> = Vec::new();
        self.collect_visible(&self.root, camera, &mut candidates);
        candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut result = Vec::new();
        let mut total = 0u32;
        for (_, info) in candidates {
            if total + info.point_count > point_budget && !result.is_empty() {
                break;
            }
            total += info.point_count;
            result.push(info);
        }
        result
    }

    fn collect_visible(
        &self,
        node: &OctreeNode,
        camera: &LodCamera,
        candidates: &mut Vec<(f64, OctreeNodeInfo)>,
    ) {
        if node.points.is_empty() && !node.has_children() {
            return;
        }

        let center = node.bounds.center();
        let dx = center[0] - camera.position[0];
        let dy = center[1] - camera.position[1];
        let dz = center[2] - camera.position[2];
        let distance = (dx * dx + dy * dy + dz * dz).sqrt();
        let extent = node.bounds.max_extent();

        let screen_size = if distance > 1e-3 {
            (extent / distance) * camera.screen_height
                / (2.0 * (camera.fov.to_radians() / 2.0).tan())
        } else {
            f64::MAX
        };

        if screen_size < MIN_SCREEN_SIZE_PX {
            return; // too small to matter, children included
        }

        let use_node = node.is_leaf() || screen_size < REFINEMENT_THRESHOLD_PX;
        if use_node && !node.points.is_empty() {
            let priority = distance / extent.max(1e-3);
            candidates.push((priority, node.info()));
        }

        if !use_node || !node.is_leaf() {
            for child in node.children.iter().flatten() {
                self.collect_visible(child, camera, candidates);
            }
        }
    }

    pub fn all_node_infos(&self) -> Vec<OctreeNodeInfo> {
        let mut infos = Vec::new();
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            infos.push(node.info());
            for child in node.children.iter().flatten() {
                stack.push(child);
            }
        }
        infos
    }
}
