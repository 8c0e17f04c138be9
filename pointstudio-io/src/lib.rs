//! I/O for the pointstudio data plane
//!
//! This crate normalizes thirteen point cloud and mesh formats into the
//! canonical cloud record, serializes clouds back out to interchange
//! formats, and runs decoding off the interactive thread through the parse
//! dispatcher.

pub mod assemble;
pub mod dispatcher;
pub mod dxf;
pub mod e57;
pub mod export;
pub mod las;
pub mod obj;
pub mod off;
pub mod pcd;
pub mod ply;
pub mod pts;
pub mod ptx;
pub mod stl;
pub mod xyz;

pub use assemble::{CloudAssembler, SourcePoint};
pub use dispatcher::{ParseDispatcher, ParseMessage};
pub use export::{export_cloud, ExportFormat};

use memmap2::Mmap;
use pointstudio_core::{CanonicalCloud, Error, Result};
use std::fs::File;
use std::path::Path;

/// Extensions of vendor formats we reject with a conversion hint
const PROPRIETARY_EXTENSIONS: &[&str] = &["rcp", "rcs", "fls"];

/// Every extension [`decode_bytes`] accepts
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "las", "laz", "ply", "xyz", "txt", "csv", "asc", "pts", "ptx", "obj", "off", "stl", "pcd",
    "dxf", "e57",
];

/// Whether a format must be decoded on the calling thread.
///
/// E57 depends on the document parser that is only available there; every
/// other decoder is safe on a worker.
pub fn requires_inline_parse(extension: &str) -> bool {
    extension.eq_ignore_ascii_case("e57")
}

/// Decode a byte range by case-insensitive extension.
///
/// The decoder family is closed: this match is total over
/// [`SUPPORTED_EXTENSIONS`] and everything else fails with
/// `UnsupportedExtension` or `ProprietaryFormat`.
pub fn decode_bytes(extension: &str, data: &[u8]) -> Result<CanonicalCloud> {
    let ext = extension.to_lowercase();
    match ext.as_str() {
        "las" => las::LasReader::read_cloud(data),
        "laz" => las::LazReader::read_cloud(data),
        "ply" => ply::PlyReader::read_cloud(data),
        "xyz" | "txt" | "csv" | "asc" => xyz::XyzReader::read_cloud(data),
        "pts" => pts::PtsReader::read_cloud(data),
        "ptx" => ptx::PtxReader::read_cloud(data),
        "obj" => obj::ObjReader::read_cloud(data),
        "off" => off::OffReader::read_cloud(data),
        "stl" => stl::StlReader::read_cloud(data),
        "pcd" => pcd::PcdReader::read_cloud(data),
        "dxf" => dxf::DxfReader::read_cloud(data),
        "e57" => e57::E57Reader::read_cloud(data),
        _ if PROPRIETARY_EXTENSIONS.contains(&ext.as_str()) => Err(Error::proprietary(&ext)),
        _ => Err(Error::UnsupportedExtension(format!(".{}", ext))),
    }
}

/// Memory-map a file and decode it by its extension
pub fn read_cloud_from_path<P: AsRef<Path>>(path: P) -> Result<CanonicalCloud> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| Error::UnsupportedExtension(format!("{}", path.display())))?;

    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file) }?;
    decode_bytes(extension, &mmap)
}
