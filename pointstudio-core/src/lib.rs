//! Core data structures for pointstudio
//!
//! This crate provides the canonical point cloud record shared by the
//! decoders, the edit engine, the LOD layer and the renderer, plus the
//! registry that owns the backing buffers.

pub mod bounds;
pub mod cloud;
pub mod entry;
pub mod error;
pub mod registry;

pub use bounds::*;
pub use cloud::*;
pub use entry::*;
pub use error::*;
pub use registry::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Matrix3, Matrix4, Point3, UnitQuaternion, Vector3, Vector4};

/// A 3D point with floating point coordinates
pub type Point3f = Point3<f32>;

/// A 3D vector with floating point components
pub type Vector3f = Vector3<f32>;

/// A 3D point with double precision coordinates
pub type Point3d = Point3<f64>;

/// A 3D vector with double precision components
pub type Vector3d = Vector3<f64>;
