//! Surface reconstruction for pointstudio
//!
//! One algorithm lives here: greedy projection triangulation on local
//! tangent planes, with phase progress reporting and cooperative
//! cancellation polled at phase boundaries.

pub mod greedy;

pub use greedy::{greedy_projection, ReconstructionResult};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Progress callback: phase name plus percent complete
pub type ProgressFn = dyn FnMut(&str, u8) + Send;

/// Tuning knobs for reconstruction
#[derive(Debug, Clone)]
pub struct ReconstructionParams {
    /// Neighbors gathered around each seed point
    pub k_neighbors: usize,
    /// Longest allowed triangle edge; defaults to twice the grid cell size
    pub max_edge_length: Option<f32>,
}

impl Default for ReconstructionParams {
    fn default() -> Self {
        Self {
            k_neighbors: 15,
            max_edge_length: None,
        }
    }
}

/// Shared cancellation flag checked between reconstruction phases
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointstudio_core::Error;

    #[test]
    fn test_cancel_flag_shared_across_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_cancel_before_start() {
        let positions: Vec<f32> = (0..30).map(|i| i as f32).collect();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut progress = |_: &str, _: u8| {};
        let result = greedy_projection(
            &positions,
            &ReconstructionParams::default(),
            &mut progress,
            &cancel,
        );
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_too_few_points() {
        let cancel = CancelFlag::new();
        let mut progress = |_: &str, _: u8| {};
        let result = greedy_projection(
            &[0.0, 0.0, 0.0],
            &ReconstructionParams::default(),
            &mut progress,
            &cancel,
        );
        assert!(matches!(result, Err(Error::EmptyResult)));
    }
}
