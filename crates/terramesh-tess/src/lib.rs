//! Adaptive tessellation primitives for height-field terrain meshes.
//!
//! This crate contains the pure, allocation-light core of the terrain
//! pipeline: bicubic patch sampling, camera-distance tessellation level
//! selection, section vertex building, and crack-free index building for
//! sections whose quads tessellate at different rates.
//!
//! # Design principles
//!
//! - **Pure**: every function is a deterministic map from inputs to outputs.
//!   No I/O, no global state, no frame-to-frame caching (that lives in the
//!   `terramesh` crate).
//! - **Two-pass index building**: triangle counts are computed by a prepass
//!   using the exact logic of the emission pass, so output buffers are sized
//!   exactly and a count mismatch is detected as a fatal logic error rather
//!   than a buffer overrun.
//! - **16-bit indices**: vertex addressing stays within `u16`, which bounds a
//!   section to 255 tessellated steps per axis. The bound is validated where
//!   sections are configured, not discovered mid-build.

mod error;
mod indices;
mod level;
mod patch;
mod vertex;

pub use error::{TessError, TessResult};
pub use indices::SmoothIndexBuilder;
pub use level::{TessellationLevels, level_for_depth};
pub use patch::{MAX_TESSELLATION, Patch, PatchSampler};
pub use vertex::{
    PatchSource, SectionDims, TerrainVertex, build_section_vertices, build_uniform_indices,
    vertex_count,
};
