//! In-place transform and edit operations on a canonical cloud
//!
//! Every operation re-establishes the cloud invariants before returning and
//! never suspends mid-mutation. Version bumping happens at the session
//! layer, which owns the cloud entries.

use pointstudio_core::CanonicalCloud;
use rand::seq::SliceRandom;
use rand::thread_rng;
use std::collections::HashSet;

/// Outcome of [`delete_points`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Points were removed, survivors remain
    Edited,
    /// Every point was selected; the caller should drop the cloud
    CloudEmptied,
}

/// Add a vector to every position. O(n).
pub fn translate(cloud: &mut CanonicalCloud, dx: f32, dy: f32, dz: f32) {
    for p in cloud.positions.chunks_exact_mut(3) {
        p[0] += dx;
        p[1] += dy;
        p[2] += dz;
    }
}

/// Scale about the centroid, per axis: `p' = c + (p - c) * s`
pub fn scale(cloud: &mut CanonicalCloud, sx: f32, sy: f32, sz: f32) {
    let n = cloud.point_count();
    if n == 0 {
        return;
    }

    let mut cx = 0.0f64;
    let mut cy = 0.0f64;
    let mut cz = 0.0f64;
    for p in cloud.positions.chunks_exact(3) {
        cx += p[0] as f64;
        cy += p[1] as f64;
        cz += p[2] as f64;
    }
    let cx = (cx / n as f64) as f32;
    let cy = (cy / n as f64) as f32;
    let cz = (cz / n as f64) as f32;

    for p in cloud.positions.chunks_exact_mut(3) {
        p[0] = cx + (p[0] - cx) * sx;
        p[1] = cy + (p[1] - cy) * sy;
        p[2] = cz + (p[2] - cz) * sz;
    }
}

/// Keep a uniform random subset of about `percent` of the points.
///
/// `keep = max(1, round(n * percent / 100))`; keeping everything is a
/// no-op. Indices are drawn with a partial Fisher-Yates shuffle and sorted
/// ascending so the rebuild walks the buffers forward.
pub fn thin(cloud: &mut CanonicalCloud, percent: f32) {
    let percent = percent.clamp(1.0, 100.0);
    let n = cloud.point_count();
    let keep = ((n as f32 * percent / 100.0).round() as usize).max(1);
    if keep >= n {
        return;
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = thread_rng();
    let (kept, _) = indices.partial_shuffle(&mut rng, keep);
    let mut kept: Vec<usize> = kept.to_vec();
    kept.sort_unstable();

    rebuild(cloud, &kept);
    cloud.indices = None; // sampling invalidates any topology
}

/// Remove the points at `selected` (deduplicated by the caller), compacting
/// the survivors. Returns whether the cloud survived.
pub fn delete_points(cloud: &mut CanonicalCloud, selected: &HashSet<u32>) -> DeleteOutcome {
    let n = cloud.point_count();
    if selected.len() >= n {
        return DeleteOutcome::CloudEmptied;
    }
    if selected.is_empty() {
        return DeleteOutcome::Edited;
    }

    let survivors: Vec<usize> = (0..n).filter(|i| !selected.contains(&(*i as u32))).collect();
    rebuild(cloud, &survivors);
    cloud.indices = None;
    DeleteOutcome::Edited
}

/// Rebuild every attribute stream keeping `kept` (ascending) rows
fn rebuild(cloud: &mut CanonicalCloud, kept: &[usize]) {
    let mut positions = Vec::with_capacity(kept.len() * 3);
    let mut colors = Vec::with_capacity(kept.len() * 3);
    let mut intensities = Vec::with_capacity(kept.len());
    let mut classifications = Vec::with_capacity(kept.len());

    for &i in kept {
        positions.extend_from_slice(&cloud.positions[i * 3..i * 3 + 3]);
        colors.extend_from_slice(&cloud.colors[i * 3..i * 3 + 3]);
        intensities.push(cloud.intensities[i]);
        classifications.push(cloud.classifications[i]);
    }

    cloud.positions = positions;
    cloud.colors = colors;
    cloud.intensities = intensities;
    cloud.classifications = classifications;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointstudio_core::{SourceHeader, DEFAULT_GRAY};

    fn cloud_of(n: usize) -> CanonicalCloud {
        CanonicalCloud {
            positions: (0..n * 3).map(|i| i as f32).collect(),
            colors: vec![DEFAULT_GRAY; n * 3],
            intensities: vec![1.0; n],
            classifications: vec![0.0; n],
            indices: None,
            header: SourceHeader::new("TEST"),
            center: [0.0; 3],
            has_color: false,
            has_intensity: false,
            has_classification: false,
        }
    }

    #[test]
    fn test_translate_round_trip() {
        let mut cloud = cloud_of(100);
        let before = cloud.positions.clone();
        translate(&mut cloud, 1.5, -2.0, 0.25);
        translate(&mut cloud, -1.5, 2.0, -0.25);
        for (a, b) in cloud.positions.iter().zip(&before) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_scale_identity() {
        let mut cloud = cloud_of(50);
        let before = cloud.positions.clone();
        scale(&mut cloud, 1.0, 1.0, 1.0);
        assert_eq!(cloud.positions, before);
    }

    #[test]
    fn test_scale_about_centroid() {
        let mut cloud = cloud_of(2);
        cloud.positions = vec![0.0, 0.0, 0.0, 2.0, 0.0, 0.0];
        scale(&mut cloud, 2.0, 1.0, 1.0);
        // Centroid x = 1; points move to -1 and 3
        assert_eq!(cloud.positions[0], -1.0);
        assert_eq!(cloud.positions[3], 3.0);
    }

    #[test]
    fn test_thin_exact_keep_count() {
        let mut cloud = cloud_of(1000);
        thin(&mut cloud, 25.0);
        assert_eq!(cloud.point_count(), 250);
        cloud.validate().unwrap();

        thin(&mut cloud, 25.0);
        assert_eq!(cloud.point_count(), 63); // round(250 * 0.25)
    }

    #[test]
    fn test_thin_full_percent_is_identity() {
        let mut cloud = cloud_of(100);
        let before = cloud.positions.clone();
        thin(&mut cloud, 100.0);
        assert_eq!(cloud.positions, before);
    }

    #[test]
    fn test_thin_keeps_rows_aligned() {
        let mut cloud = cloud_of(100);
        for (i, c) in cloud.classifications.iter_mut().enumerate() {
            *c = i as f32;
        }
        thin(&mut cloud, 10.0);
        assert_eq!(cloud.point_count(), 10);
        // Each surviving row still carries its own classification
        for i in 0..cloud.point_count() {
            let expected_row = cloud.classifications[i] as usize;
            assert_eq!(cloud.positions[i * 3], (expected_row * 3) as f32);
        }
    }

    #[test]
    fn test_delete_removes_exact_count() {
        let mut cloud = cloud_of(10);
        let selected: HashSet<u32> = [0u32, 3, 7].into_iter().collect();
        assert_eq!(delete_points(&mut cloud, &selected), DeleteOutcome::Edited);
        assert_eq!(cloud.point_count(), 7);
        cloud.validate().unwrap();
        // Row 1 survived and shifted to the front
        assert_eq!(cloud.positions[0], 3.0);
    }

    #[test]
    fn test_delete_all_empties_cloud() {
        let mut cloud = cloud_of(3);
        let selected: HashSet<u32> = [0u32, 1, 2].into_iter().collect();
        assert_eq!(
            delete_points(&mut cloud, &selected),
            DeleteOutcome::CloudEmptied
        );
    }
}
