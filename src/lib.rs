//! # pointstudio
//!
//! The data plane of an interactive point cloud viewer and editor: format
//! decoders, the canonical in-memory cloud, transform and selection engines,
//! greedy surface reconstruction, a level-of-detail subsystem, and
//! exporters.
//!
//! This umbrella crate re-exports the member crates and hosts [`Session`],
//! the facade the UI shell drives with its intents.
//!
//! ## Quick start
//!
//! ```rust
//! use pointstudio::Session;
//!
//! let mut session = Session::new();
//! let id = session
//!     .import_bytes("demo.xyz", "xyz", b"0 0 0\n1 0 0\n0 1 0\n")
//!     .unwrap();
//! session.translate(&id, 0.0, 1.0, 0.0);
//! assert_eq!(session.entry(&id).unwrap().transform_version, 1);
//! ```

pub mod session;

pub use session::{ReconstructionJob, Session};

// Re-export the member crates
pub use pointstudio_core::*;

pub use pointstudio_algorithms as algorithms;
pub use pointstudio_io as io;
pub use pointstudio_lod as lod;
pub use pointstudio_reconstruction as reconstruction;

/// Convenient imports for common use cases
pub mod prelude {
    pub use crate::session::Session;
    pub use pointstudio_algorithms::{SelectionRect, UniformGrid};
    pub use pointstudio_core::*;
    pub use pointstudio_io::{decode_bytes, export_cloud, ExportFormat, ParseDispatcher};
    pub use pointstudio_lod::{LodBackend, LodCamera, LodController, OctreeStore};
    pub use pointstudio_reconstruction::{CancelFlag, ReconstructionParams};
}
