//! Uniform grid spatial index
//!
//! Cell size is chosen so the expected occupancy matches the desired
//! neighbor count; k-nearest queries expand over concentric cell rings.

use pointstudio_core::Point3f;
use std::collections::HashMap;

/// Cell rings beyond this radius are never visited
const MAX_RING_RADIUS: i32 = 5;

/// Hash grid over integer cell coordinates
pub struct UniformGrid {
    cells: HashMap<(i32, i32, i32), Vec<usize>>,
    cell_size: f32,
}

impl UniformGrid {
    /// Pick a cell size so a cell holds about `k` points on average:
    /// `extent / cbrt(n / k)`, falling back to 1.0 for degenerate clouds.
    pub fn cell_size_for(points: &[Point3f], k: usize) -> f32 {
        if points.is_empty() || k == 0 {
            return 1.0;
        }
        let mut min = points[0];
        let mut max = points[0];
        for p in points {
            min = Point3f::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z));
            max = Point3f::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z));
        }
        let extent = (max.x - min.x).max(max.y - min.y).max(max.z - min.z);
        let cells = (points.len() as f32 / k as f32).cbrt();
        if extent <= 0.0 || !cells.is_finite() || cells <= 0.0 {
            return 1.0;
        }
        let size = extent / cells;
        if size.is_finite() && size > 0.0 {
            size
        } else {
            1.0
        }
    }

    pub fn new(cell_size: f32) -> Self {
        Self {
            cells: HashMap::new(),
            cell_size: if cell_size > 0.0 { cell_size } else { 1.0 },
        }
    }

    /// Build a grid over a point slice with occupancy tuned for `k`
    pub fn build(points: &[Point3f], k: usize) -> Self {
        let mut grid = Self::new(Self::cell_size_for(points, k));
        for (i, p) in points.iter().enumerate() {
            grid.insert(i, p);
        }
        grid
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    fn cell_of(&self, p: &Point3f) -> (i32, i32, i32) {
        (
            (p.x / self.cell_size).floor() as i32,
            (p.y / self.cell_size).floor() as i32,
            (p.z / self.cell_size).floor() as i32,
        )
    }

    pub fn insert(&mut self, index: usize, p: &Point3f) {
        self.cells.entry(self.cell_of(p)).or_default().push(index);
    }

    /// Indices of the k nearest points, ascending by squared distance.
    ///
    /// Rings expand until enough candidates are found or the radius cap is
    /// hit; a short result means the cloud is sparse there.
    pub fn k_nearest(&self, p: &Point3f, k: usize, exclude: Option<usize>, points: &[Point3f]) -> Vec<usize> {
        if k == 0 {
            return Vec::new();
        }
        let center = self.cell_of(p);
        let mut candidates: Vec<(f32, usize)> = Vec::new();

        for radius in 0..=MAX_RING_RADIUS {
            self.visit_ring(center, radius, |idx| {
                if Some(idx) == exclude {
                    return;
                }
                let d = points[idx] - p;
                candidates.push((d.norm_squared(), idx));
            });
            if candidates.len() >= k {
                break;
            }
        }

        candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(k);
        candidates.into_iter().map(|(_, i)| i).collect()
    }

    /// Call `f` for every index in cells on the shell at `radius`
    fn visit_ring<F: FnMut(usize)>(&self, center: (i32, i32, i32), radius: i32, mut f: F) {
        for dx in -radius..=radius {
            for dy in -radius..=radius {
                for dz in -radius..=radius {
                    if dx.abs().max(dy.abs()).max(dz.abs()) != radius {
                        continue;
                    }
                    let key = (center.0 + dx, center.1 + dy, center.2 + dz);
                    if let Some(indices) = self.cells.get(&key) {
                        for &i in indices {
                            f(i);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_points() -> Vec<Point3f> {
        let mut points = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                points.push(Point3f::new(i as f32, j as f32, 0.0));
            }
        }
        points
    }

    #[test]
    fn test_k_nearest_sorted_ascending() {
        let points = grid_points();
        let grid = UniformGrid::build(&points, 8);
        let query = Point3f::new(5.0, 5.0, 0.0);
        let idx_query = points.iter().position(|p| *p == query).unwrap();

        let nearest = grid.k_nearest(&query, 4, Some(idx_query), &points);
        assert_eq!(nearest.len(), 4);

        let mut last = 0.0;
        for &i in &nearest {
            let d = (points[i] - query).norm_squared();
            assert!(d >= last);
            assert!((d - 1.0).abs() < 1e-6, "4-neighborhood on a unit grid");
            last = d;
        }
    }

    #[test]
    fn test_exclude_self() {
        let points = grid_points();
        let grid = UniformGrid::build(&points, 8);
        let nearest = grid.k_nearest(&points[0], 3, Some(0), &points);
        assert!(!nearest.contains(&0));
    }

    #[test]
    fn test_sparse_cloud_returns_short() {
        let points = vec![Point3f::new(0.0, 0.0, 0.0), Point3f::new(1000.0, 0.0, 0.0)];
        let grid = UniformGrid::build(&points, 8);
        // The far point is beyond the ring cap
        let nearest = grid.k_nearest(&points[0], 5, Some(0), &points);
        assert!(nearest.len() < 5);
    }

    #[test]
    fn test_degenerate_cloud_cell_size() {
        let points = vec![Point3f::new(1.0, 1.0, 1.0); 10];
        assert_eq!(UniformGrid::cell_size_for(&points, 8), 1.0);
    }
}
