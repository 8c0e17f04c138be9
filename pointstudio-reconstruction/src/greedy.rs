//! Greedy projection triangulation
//!
//! Around every seed point, neighbors are projected onto the tangent plane,
//! sorted by polar angle, and consecutive pairs within an angular gap become
//! triangles. The result is a plausible open surface, not a watertight mesh.

use crate::{CancelFlag, ProgressFn, ReconstructionParams};
use pointstudio_algorithms::{estimate_normals, UniformGrid};
use pointstudio_core::{Error, Point3f, Result, Vector3f};
use std::collections::HashSet;

/// Triangulated output plus the normals used to build it
#[derive(Debug)]
pub struct ReconstructionResult {
    pub indices: Vec<u32>,
    pub normals: Vec<Vector3f>,
}

/// Candidate neighbor projected onto the seed's tangent plane
struct RingNeighbor {
    index: u32,
    angle: f32,
}

fn check_cancel(cancel: &CancelFlag) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Run greedy projection over flat xyz triples.
///
/// Progress walks the fixed phases (index 10%, normals 30-60%, triangles
/// 60-90%, finalize 95%, complete 100%); the cancel flag is polled at each
/// phase boundary.
pub fn greedy_projection(
    positions: &[f32],
    params: &ReconstructionParams,
    progress: &mut ProgressFn,
    cancel: &CancelFlag,
) -> Result<ReconstructionResult> {
    let points: Vec<Point3f> = positions
        .chunks_exact(3)
        .map(|p| Point3f::new(p[0], p[1], p[2]))
        .collect();
    if points.len() < 3 {
        return Err(Error::EmptyResult);
    }
    let k = params.k_neighbors.max(3);

    progress("Building spatial index", 10);
    check_cancel(cancel)?;
    let grid = UniformGrid::build(&points, k);
    let max_edge = params
        .max_edge_length
        .unwrap_or(2.0 * grid.cell_size());
    let max_edge_sq = max_edge * max_edge;

    progress("Estimating normals", 30);
    check_cancel(cancel)?;
    let normals = estimate_normals(&points, &grid, k);
    progress("Estimating normals", 60);
    check_cancel(cancel)?;

    progress("Triangulating", 60);
    let mut seen: HashSet<(u32, u32, u32)> = HashSet::new();
    let mut indices: Vec<u32> = Vec::new();

    for (i, point) in points.iter().enumerate() {
        let n = normals[i];

        // Tangent frame: pick the seed axis that is not aligned with n
        let axis = if n.x.abs() >= 0.9 {
            Vector3f::new(0.0, 1.0, 0.0)
        } else {
            Vector3f::new(1.0, 0.0, 0.0)
        };
        let u = n.cross(&axis);
        if u.norm() < 1e-12 {
            continue;
        }
        let u = u.normalize();
        let v = n.cross(&u);

        let mut ring: Vec<RingNeighbor> = grid
            .k_nearest(point, k, Some(i), &points)
            .into_iter()
            .filter(|&j| (points[j] - point).norm_squared() <= max_edge_sq)
            .map(|j| {
                let d = points[j] - point;
                RingNeighbor {
                    index: j as u32,
                    angle: d.dot(&v).atan2(d.dot(&u)),
                }
            })
            .collect();
        if ring.len() < 2 {
            continue;
        }
        ring.sort_by(|a, b| a.angle.partial_cmp(&b.angle).unwrap_or(std::cmp::Ordering::Equal));

        for j in 0..ring.len() {
            let a = &ring[j];
            let b = &ring[(j + 1) % ring.len()];
            if a.index == b.index {
                continue;
            }

            let mut gap = b.angle - a.angle;
            if gap < 0.0 {
                gap += 2.0 * std::f32::consts::PI;
            }
            if gap > std::f32::consts::FRAC_PI_2 {
                continue;
            }

            let edge = points[b.index as usize] - points[a.index as usize];
            if edge.norm_squared() > max_edge_sq {
                continue;
            }

            let mut tri = [i as u32, a.index, b.index];
            let mut key = tri;
            key.sort_unstable();
            if !seen.insert((key[0], key[1], key[2])) {
                continue;
            }

            // Wind so the face agrees with the seed normal
            let pa = points[tri[1] as usize] - point;
            let pb = points[tri[2] as usize] - point;
            if pa.cross(&pb).dot(&n) < 0.0 {
                tri.swap(1, 2);
            }
            indices.extend_from_slice(&tri);
        }
    }
    progress("Triangulating", 90);
    check_cancel(cancel)?;

    progress("Finalizing", 95);
    check_cancel(cancel)?;
    if indices.is_empty() {
        return Err(Error::EmptyResult);
    }

    progress("Complete", 100);
    Ok(ReconstructionResult { indices, normals })
}
