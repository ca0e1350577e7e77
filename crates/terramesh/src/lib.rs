//! Adaptive terrain tessellation, material-mask batching, and foliage
//! placement.
//!
//! This crate turns a quantized height field plus a painted layer stack into
//! per-frame draw batches: camera-distance LOD selection over bicubic
//! patches, crack-free stitching of mixed tessellation levels (via
//! `terramesh-tess`), deduplicated material-mask batching with memoized
//! compiled blends, and deterministic weighted foliage scatter.
//!
//! # Design principles
//!
//! - **Library, not a service**: the external interface is the function-call
//!   boundary. Callers supply a camera and lights per frame and receive
//!   `(buffer, indices, material, triangle count)` batches; the renderer that
//!   consumes them is theirs.
//! - **Explicit context**: material definitions live in a
//!   [`MaterialRegistry`] passed into compilation, never in globals.
//! - **Caches with explicit invalidation**: smooth vertex buffers are keyed
//!   by tessellation level, compiled materials by mask; editing tools
//!   invalidate through [`Terrain::rebuild_render_data`].
//!
//! # Example
//!
//! ```
//! use glam::{Mat4, Vec3};
//! use terramesh::{
//!     Camera, FilteredMaterial, Layer, MaterialGraph, MaterialRegistry, Terrain, TerrainConfig,
//!     TerrainMaterial,
//! };
//!
//! let mut registry = MaterialRegistry::new(MaterialGraph::flat_color(0.2, 0.2, 0.2));
//! registry.materials.push(TerrainMaterial::new(
//!     "grass",
//!     MaterialGraph::flat_color(0.1, 0.6, 0.1),
//! ));
//!
//! let config = TerrainConfig {
//!     num_patches_x: 8,
//!     num_patches_y: 8,
//!     max_tessellation_level: 4,
//!     max_section_size: 8,
//!     ..TerrainConfig::default()
//! };
//! let mut terrain = Terrain::new(config, registry)?;
//! terrain
//!     .layers_mut()
//!     .push(Layer::new("base", vec![FilteredMaterial::covering(0)]));
//! terrain.rebuild_render_data();
//!
//! let camera = Camera {
//!     view: Mat4::look_at_rh(Vec3::new(4.0, 4.0, 20.0), Vec3::new(4.0, 4.0, 0.0), Vec3::Y),
//!     projection: Mat4::perspective_rh(1.0, 1.0, 0.1, 100_000.0),
//! };
//! for view in terrain.build_view(&camera, &[])? {
//!     for batch in &view.batches {
//!         // Submit (vertices, batch.indices, batch.material) to a renderer.
//!         assert_eq!(batch.indices.len(), batch.num_triangles * 3);
//!     }
//! }
//! # Ok::<(), terramesh::Error>(())
//! ```

mod error;
mod foliage;
mod heightfield;
mod layers;
mod material;
mod noise;
mod section;
mod terrain;
mod view;

pub use error::{Error, Result};
pub use foliage::{
    FoliageBatch, FoliageInstance, FoliageInstanceCache, FoliageMesh, LightKind, SectionLight,
    ShadowMap, VisibleFoliage, quad_lerp,
};
pub use heightfield::{AlphaMap, DEFAULT_HEIGHT, HEIGHT_BIAS, HEIGHT_SCALE, HeightField};
pub use layers::{
    DisplacementCache, DisplacementMap, FilteredMaterial, Layer, TerrainMaterial, UvMapping,
    WeightedMaterial, cache_weight_maps,
};
pub use material::{
    MaterialExpr, MaterialGraph, MaterialHandle, MaterialMask, MaterialMaskCache,
    MaterialProperty, MaterialRegistry, ParameterBindings, TerrainMaterialResource, TextureRef,
    UvChannel, collect_parameter_bindings, compile_layer_material,
};
pub use noise::{FilterLimit, NoiseParameter, perlin_noise_2d};
pub use section::{PatchBounds, TerrainSection};
pub use terrain::{Terrain, TerrainConfig};
pub use view::{
    Camera, DrawBatch, DrawRange, MAX_DRAW_TRIANGLES, SectionRenderData, SectionView,
    SmoothBuffer, VertexBufferKind,
};

// Re-export the tessellation core for callers that build custom pipelines.
pub use terramesh_tess::{
    MAX_TESSELLATION, Patch, PatchSampler, PatchSource, SectionDims, SmoothIndexBuilder,
    TerrainVertex, TessError, TessellationLevels, build_section_vertices, build_uniform_indices,
    level_for_depth, vertex_count,
};
