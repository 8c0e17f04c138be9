//! Level-of-detail subsystem for pointstudio
//!
//! An octree store serves visibility plans and binary chunk streams; the
//! controller keeps the resident node set inside the point budget. The
//! backend is reached only through the [`LodBackend`] trait, so a remote
//! store can replace the in-process one without touching the controller.

pub mod backend;
pub mod controller;
pub mod octree;
pub mod wire;

pub use backend::{BackendCloudInfo, LodBackend, OctreeStore};
pub use controller::{LoadedNode, LodController};
pub use octree::{LodCamera, LodOctree, LodPoint, OctreeNodeInfo};
pub use wire::{decode_chunks, encode_chunks, PointChunk};
