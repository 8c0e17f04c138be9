//! Per-point normal estimation via PCA over grid neighborhoods
//!
//! The covariance eigenproblem is solved with the closed-form symmetric 3x3
//! formula rather than an iterative solver; the eigenvector of the smallest
//! eigenvalue is the surface normal.

use crate::grid::UniformGrid;
use pointstudio_core::{Point3f, Vector3f};
use rayon::prelude::*;

/// Fallback when a neighborhood is too small or degenerate
const UP: [f64; 3] = [0.0, 1.0, 0.0];

/// Symmetric 3x3 covariance in f64
#[derive(Debug, Clone, Copy)]
struct Cov {
    a: f64, // xx
    b: f64, // xy
    c: f64, // xz
    d: f64, // yy
    e: f64, // yz
    f: f64, // zz
}

fn cross(u: [f64; 3], v: [f64; 3]) -> [f64; 3] {
    [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ]
}

fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Eigenvector of the smallest eigenvalue of the covariance, unit length
fn smallest_eigenvector(m: &Cov) -> [f64; 3] {
    let q = (m.a + m.d + m.f) / 3.0;
    let p = (((m.a - q).powi(2) + (m.d - q).powi(2) + (m.f - q).powi(2)
        + 2.0 * (m.b * m.b + m.c * m.c + m.e * m.e))
        / 6.0)
        .sqrt();
    if p < 1e-15 {
        return UP; // isotropic neighborhood, no preferred direction
    }

    // det((M - qI) / p) drives the trigonometric root formula
    let ba = (m.a - q) / p;
    let bd = (m.d - q) / p;
    let bf = (m.f - q) / p;
    let bb = m.b / p;
    let bc = m.c / p;
    let be = m.e / p;
    let det = ba * (bd * bf - be * be) - bb * (bb * bf - be * bc) + bc * (bb * be - bd * bc);

    let phi = (det / 2.0).clamp(-1.0, 1.0).acos() / 3.0;
    let lambda = q + 2.0 * p * (phi + 2.0 * std::f64::consts::PI / 3.0).cos();

    // Null-space of M - lambda I via row cross products; degenerate row
    // pairs fall through to the next one.
    let rows = [
        [m.a - lambda, m.b, m.c],
        [m.b, m.d - lambda, m.e],
        [m.c, m.e, m.f - lambda],
    ];
    for (i, j) in [(0, 1), (0, 2), (1, 2)] {
        let v = cross(rows[i], rows[j]);
        let n = norm(v);
        if n > 1e-12 {
            return [v[0] / n, v[1] / n, v[2] / n];
        }
    }
    UP
}

/// Estimate one normal from a gathered neighborhood
fn normal_for(point: &Point3f, neighbors: &[usize], points: &[Point3f]) -> Vector3f {
    if neighbors.len() < 3 {
        return Vector3f::new(0.0, 1.0, 0.0);
    }

    let mut cx = 0.0f64;
    let mut cy = 0.0f64;
    let mut cz = 0.0f64;
    for &i in neighbors {
        cx += points[i].x as f64;
        cy += points[i].y as f64;
        cz += points[i].z as f64;
    }
    let n = neighbors.len() as f64;
    cx /= n;
    cy /= n;
    cz /= n;

    let mut m = Cov {
        a: 0.0,
        b: 0.0,
        c: 0.0,
        d: 0.0,
        e: 0.0,
        f: 0.0,
    };
    for &i in neighbors {
        let dx = points[i].x as f64 - cx;
        let dy = points[i].y as f64 - cy;
        let dz = points[i].z as f64 - cz;
        m.a += dx * dx;
        m.b += dx * dy;
        m.c += dx * dz;
        m.d += dy * dy;
        m.e += dy * dz;
        m.f += dz * dz;
    }
    m.a /= n;
    m.b /= n;
    m.c /= n;
    m.d /= n;
    m.e /= n;
    m.f /= n;

    let v = smallest_eigenvector(&m);

    // Orient away from the neighborhood centroid
    let to_point = [
        point.x as f64 - cx,
        point.y as f64 - cy,
        point.z as f64 - cz,
    ];
    let dot = v[0] * to_point[0] + v[1] * to_point[1] + v[2] * to_point[2];
    let sign = if dot < 0.0 { -1.0 } else { 1.0 };
    Vector3f::new(
        (v[0] * sign) as f32,
        (v[1] * sign) as f32,
        (v[2] * sign) as f32,
    )
}

/// Estimate a normal per point using up to `k` grid neighbors
pub fn estimate_normals(points: &[Point3f], grid: &UniformGrid, k: usize) -> Vec<Vector3f> {
    points
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            let neighbors = grid.k_nearest(p, k, Some(i), points);
            normal_for(p, &neighbors, points)
        })
        .collect()
}
