//! Spatial indexing, normal estimation, selection and the edit engine
//!
//! Everything here operates on canonical cloud buffers owned by the
//! registry; nothing allocates long-lived state of its own.

pub mod edit;
pub mod grid;
pub mod normals;
pub mod selection;

pub use edit::{delete_points, scale, thin, translate, DeleteOutcome};
pub use grid::UniformGrid;
pub use normals::estimate_normals;
pub use selection::{select_in_rect, SelectionRect};
