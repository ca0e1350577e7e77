//! Material masks, the mask cache, and terrain material compilation.
//!
//! Each quad of a section activates some subset of the terrain's weighted
//! materials; the subset is captured as a bitset [`MaterialMask`] and
//! deduplicated through [`MaterialMaskCache`] so the (expensive) compiled
//! blend is built at most once per distinct combination, and so the renderer
//! can batch all quads sharing a mask into one draw call.
//!
//! Compilation produces a [`MaterialExpr`] tree rather than driving an
//! abstract compiler interface: the expression vocabulary is the small closed
//! set of operations the terrain blend actually needs, and the renderer
//! lowers the tree into its own shading language.

use glam::Vec4;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::layers::{TerrainMaterial, UvMapping, WeightedMaterial};

/// Bitset selecting the weighted materials active on a quad (or section).
///
/// Two masks are equal iff their bit patterns are identical; equality is the
/// cache key in [`MaterialMaskCache`]. Masks are never mutated after being
/// interned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialMask {
    bits: Vec<u32>,
    num_bits: u32,
}

impl MaterialMask {
    /// An all-zero mask over `num_bits` weighted materials.
    #[must_use]
    pub fn new(num_bits: u32) -> Self {
        Self {
            bits: vec![0; num_bits.div_ceil(32) as usize],
            num_bits,
        }
    }

    #[must_use]
    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    #[must_use]
    pub fn get(&self, index: u32) -> bool {
        debug_assert!(index < self.num_bits);
        self.bits[(index / 32) as usize] & (1 << (index % 32)) != 0
    }

    pub fn set(&mut self, index: u32, value: bool) {
        debug_assert!(index < self.num_bits);
        let word = (index / 32) as usize;
        if value {
            self.bits[word] |= 1 << (index % 32);
        } else {
            self.bits[word] &= !(1 << (index % 32));
        }
    }

    /// Number of active materials (population count).
    #[must_use]
    pub fn active_count(&self) -> u32 {
        self.bits.iter().map(|word| word.count_ones()).sum()
    }

    /// Indices of the active materials, ascending.
    #[must_use]
    pub fn active_indices(&self) -> Vec<u32> {
        (0..self.num_bits).filter(|&index| self.get(index)).collect()
    }
}

/// Texture coordinate channels available to compiled terrain materials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UvChannel {
    /// The weight-map channel: one texel per terrain vertex.
    Weight,
    /// World-axis projections used by layer UV mappings.
    MappedXY,
    MappedXZ,
    MappedYZ,
}

/// A texture referenced by a compiled material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextureRef {
    /// A terrain weight map, by weighted-material index.
    WeightMap(usize),
    /// A texture owned by the external material system.
    External(String),
}

/// A compiled material expression.
///
/// The closed operation set of the terrain blend: constants, coordinate
/// sources, samples, masking, and arithmetic. Parameters are referenced by
/// name; layer compilation prefixes them so composing several layers into one
/// unit cannot collide.
#[derive(Debug, Clone, PartialEq)]
pub enum MaterialExpr {
    Constant(f32),
    Constant2(f32, f32),
    Constant3(f32, f32, f32),
    TextureCoordinate(UvChannel),
    TextureSample {
        texture: TextureRef,
        coords: Box<MaterialExpr>,
    },
    ComponentMask {
        input: Box<MaterialExpr>,
        r: bool,
        g: bool,
        b: bool,
        a: bool,
    },
    Add(Box<MaterialExpr>, Box<MaterialExpr>),
    Mul(Box<MaterialExpr>, Box<MaterialExpr>),
    Dot(Box<MaterialExpr>, Box<MaterialExpr>),
    Append(Box<MaterialExpr>, Box<MaterialExpr>),
    ScalarParameter(String),
    VectorParameter(String),
}

/// The material properties the terrain compiler produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialProperty {
    Diffuse,
    Emissive,
}

/// A material's expression per compiled property.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialGraph {
    pub diffuse: MaterialExpr,
    pub emissive: MaterialExpr,
}

impl MaterialGraph {
    /// A flat single-color graph, useful as a registry default.
    #[must_use]
    pub fn flat_color(r: f32, g: f32, b: f32) -> Self {
        Self {
            diffuse: MaterialExpr::Constant3(r, g, b),
            emissive: MaterialExpr::Constant3(0.0, 0.0, 0.0),
        }
    }

    #[must_use]
    pub fn property(&self, property: MaterialProperty) -> &MaterialExpr {
        match property {
            MaterialProperty::Diffuse => &self.diffuse,
            MaterialProperty::Emissive => &self.emissive,
        }
    }
}

/// Explicit registry of terrain material definitions plus the fallback used
/// when a mask has no live material.
///
/// Passed by reference into compilation and section building; there are no
/// ambient material globals.
#[derive(Debug, Clone)]
pub struct MaterialRegistry {
    pub materials: Vec<TerrainMaterial>,
    pub default_graph: MaterialGraph,
}

impl MaterialRegistry {
    #[must_use]
    pub fn new(default_graph: MaterialGraph) -> Self {
        Self {
            materials: Vec::new(),
            default_graph,
        }
    }
}

/// The in-editor highlight tint, applied additively to emissive and
/// multiplicatively (inverted) to diffuse.
const SELECTION_COLOR: (f32, f32, f32) = (10.0 / 255.0, 5.0 / 255.0, 60.0 / 255.0);

/// Compile one layer's material expression for a property.
///
/// The layer's own texture coordinates are rewritten through its configured
/// UV mapping (axis-pair projection, rotation, scale, pan) and its parameter
/// references are re-parented under a `{material_name}_` prefix.
#[must_use]
pub fn compile_layer_material(
    material: &TerrainMaterial,
    property: MaterialProperty,
    highlighted: bool,
) -> MaterialExpr {
    let expr = rewrite_for_layer(material.graph.property(property).clone(), material);

    if !highlighted {
        return expr;
    }

    let (r, g, b) = SELECTION_COLOR;
    match property {
        MaterialProperty::Emissive => MaterialExpr::Add(
            Box::new(expr),
            Box::new(MaterialExpr::Constant3(r, g, b)),
        ),
        MaterialProperty::Diffuse => MaterialExpr::Mul(
            Box::new(expr),
            Box::new(MaterialExpr::Constant3(1.0 - r, 1.0 - g, 1.0 - b)),
        ),
    }
}

/// The layer's mapped texture coordinates: the chosen axis-pair projection
/// rotated, scaled, and panned.
fn mapped_coordinates(material: &TerrainMaterial) -> MaterialExpr {
    let channel = match material.mapping {
        UvMapping::Auto | UvMapping::XY => UvChannel::MappedXY,
        UvMapping::XZ => UvChannel::MappedXZ,
        UvMapping::YZ => UvChannel::MappedYZ,
    };
    let scale = if material.mapping_scale == 0.0 {
        1.0
    } else {
        material.mapping_scale
    };
    let (sin, cos) = material.mapping_rotation.to_radians().sin_cos();
    let base = || Box::new(MaterialExpr::TextureCoordinate(channel));

    MaterialExpr::Add(
        Box::new(MaterialExpr::Append(
            Box::new(MaterialExpr::Dot(
                base(),
                Box::new(MaterialExpr::Constant2(cos / scale, sin / scale)),
            )),
            Box::new(MaterialExpr::Dot(
                base(),
                Box::new(MaterialExpr::Constant2(-sin / scale, cos / scale)),
            )),
        )),
        Box::new(MaterialExpr::Constant2(
            material.mapping_pan.x,
            material.mapping_pan.y,
        )),
    )
}

fn rewrite_for_layer(expr: MaterialExpr, material: &TerrainMaterial) -> MaterialExpr {
    let rewrite = |inner: Box<MaterialExpr>| Box::new(rewrite_for_layer(*inner, material));
    match expr {
        MaterialExpr::TextureCoordinate(_) => mapped_coordinates(material),
        MaterialExpr::ScalarParameter(name) => {
            MaterialExpr::ScalarParameter(format!("{}_{name}", material.name))
        }
        MaterialExpr::VectorParameter(name) => {
            MaterialExpr::VectorParameter(format!("{}_{name}", material.name))
        }
        MaterialExpr::TextureSample { texture, coords } => MaterialExpr::TextureSample {
            texture,
            coords: rewrite(coords),
        },
        MaterialExpr::ComponentMask { input, r, g, b, a } => MaterialExpr::ComponentMask {
            input: rewrite(input),
            r,
            g,
            b,
            a,
        },
        MaterialExpr::Add(lhs, rhs) => MaterialExpr::Add(rewrite(lhs), rewrite(rhs)),
        MaterialExpr::Mul(lhs, rhs) => MaterialExpr::Mul(rewrite(lhs), rewrite(rhs)),
        MaterialExpr::Dot(lhs, rhs) => MaterialExpr::Dot(rewrite(lhs), rewrite(rhs)),
        MaterialExpr::Append(lhs, rhs) => MaterialExpr::Append(rewrite(lhs), rewrite(rhs)),
        expr @ (MaterialExpr::Constant(_)
        | MaterialExpr::Constant2(..)
        | MaterialExpr::Constant3(..)) => expr,
    }
}

/// A cached compiled material: the mask it was compiled for plus a
/// persistent identifier that is serialized alongside terrain save data, so
/// reloading maps the same mask to the same compiled-material slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerrainMaterialResource {
    pub mask: MaterialMask,
    pub guid: Uuid,
}

impl TerrainMaterialResource {
    #[must_use]
    pub fn new(mask: MaterialMask) -> Self {
        Self {
            mask,
            guid: Uuid::new_v4(),
        }
    }

    /// Compile this mask's blend for a property.
    ///
    /// One active material compiles to that layer's expression alone. Several
    /// compile to the sum of each layer's expression multiplied by its weight
    /// texture's red channel: an additive per-pixel weighted blend. No active
    /// materials fall back to the registry default.
    #[must_use]
    pub fn compile_property(
        &self,
        property: MaterialProperty,
        registry: &MaterialRegistry,
        weighted: &[WeightedMaterial],
    ) -> MaterialExpr {
        let active = self.mask.active_indices();

        match active.as_slice() {
            [] => registry.default_graph.property(property).clone(),
            [index] => {
                let layer = &weighted[*index as usize];
                compile_layer_material(
                    &registry.materials[layer.material],
                    property,
                    layer.highlighted,
                )
            }
            [first, rest @ ..] => {
                let mut result = weighted_layer_expr(*first, property, registry, weighted);
                for index in rest {
                    result = MaterialExpr::Add(
                        Box::new(result),
                        Box::new(weighted_layer_expr(*index, property, registry, weighted)),
                    );
                }
                result
            }
        }
    }
}

fn weighted_layer_expr(
    index: u32,
    property: MaterialProperty,
    registry: &MaterialRegistry,
    weighted: &[WeightedMaterial],
) -> MaterialExpr {
    let layer = &weighted[index as usize];
    MaterialExpr::Mul(
        Box::new(MaterialExpr::ComponentMask {
            input: Box::new(MaterialExpr::TextureSample {
                texture: TextureRef::WeightMap(index as usize),
                coords: Box::new(MaterialExpr::TextureCoordinate(UvChannel::Weight)),
            }),
            r: true,
            g: false,
            b: false,
            a: false,
        }),
        Box::new(compile_layer_material(
            &registry.materials[layer.material],
            property,
            layer.highlighted,
        )),
    )
}

/// Stable handle to an interned mask in a [`MaterialMaskCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialHandle(pub usize);

/// Deduplicates material masks, one cache entry per distinct bit pattern.
///
/// Lookup is a linear scan over bitwise mask equality; the number of masks
/// that actually occur on a terrain is tiny relative to quad count. Not
/// internally synchronized: concurrent section builds must either share
/// through a lock or pre-intern their masks.
///
/// When weighted materials are added or removed, every cached entry's bit
/// layout changes meaning; callers must [`MaterialMaskCache::invalidate`] at
/// that point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterialMaskCache {
    entries: Vec<TerrainMaterialResource>,
}

impl MaterialMaskCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a mask to its cached entry, interning it on first sight.
    pub fn get_or_create(&mut self, mask: &MaterialMask) -> MaterialHandle {
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.mask == *mask {
                return MaterialHandle(index);
            }
        }

        tracing::debug!(
            active = mask.active_count(),
            entries = self.entries.len() + 1,
            "interning new terrain material mask"
        );
        self.entries.push(TerrainMaterialResource::new(mask.clone()));
        MaterialHandle(self.entries.len() - 1)
    }

    #[must_use]
    pub fn resource(&self, handle: MaterialHandle) -> &TerrainMaterialResource {
        &self.entries[handle.0]
    }

    /// Drop every entry. Required whenever the weighted-material layout
    /// changes, since bit positions then refer to different materials.
    pub fn invalidate(&mut self) {
        if !self.entries.is_empty() {
            tracing::debug!(entries = self.entries.len(), "invalidating material mask cache");
        }
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parameter values gathered from every weighted material under their
/// compiled (prefixed) names, for binding alongside the compiled expressions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterBindings {
    pub scalars: Vec<(String, f32)>,
    pub vectors: Vec<(String, Vec4)>,
}

/// Collect the prefixed parameter bindings of every weighted material.
#[must_use]
pub fn collect_parameter_bindings(
    registry: &MaterialRegistry,
    weighted: &[WeightedMaterial],
) -> ParameterBindings {
    let mut bindings = ParameterBindings::default();

    for layer in weighted {
        let material = &registry.materials[layer.material];
        for (name, value) in &material.scalar_params {
            bindings
                .scalars
                .push((format!("{}_{name}", material.name), *value));
        }
        for (name, value) in &material.vector_params {
            bindings
                .vectors
                .push((format!("{}_{name}", material.name), *value));
        }
    }

    bindings
}
