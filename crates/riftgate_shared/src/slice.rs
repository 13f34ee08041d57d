use glam::Vec3;

/// Shader name that marks a material as sliceable. Materials bound to any
/// other shader never receive slice writes.
pub const SLICE_SHADER: &str = "riftgate/slice";

/// Per-frame inputs of the slicing shader: fragments with
/// `dot(world_pos - center, normal) - offset > 0` are discarded. A zero
/// normal disables the cut entirely.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceParameters {
    pub center: Vec3,
    pub normal: Vec3,
    pub offset: f32,
}

impl Default for SliceParameters {
    fn default() -> Self {
        Self {
            center: Vec3::ZERO,
            normal: Vec3::ZERO,
            offset: 0.0,
        }
    }
}

impl SliceParameters {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_disabled(&self) -> bool {
        self.normal == Vec3::ZERO
    }
}

/// A renderable's material: a shader binding plus the uniform state the
/// portal system is allowed to write.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub shader: String,
    pub color: [f32; 4],
    pub slice: SliceParameters,
}

impl Material {
    pub fn sliceable(color: [f32; 4]) -> Self {
        Self {
            shader: SLICE_SHADER.to_string(),
            color,
            slice: SliceParameters::disabled(),
        }
    }

    pub fn plain(shader: &str, color: [f32; 4]) -> Self {
        Self {
            shader: shader.to_string(),
            color,
            slice: SliceParameters::disabled(),
        }
    }

    pub fn is_sliceable(&self) -> bool {
        self.shader == SLICE_SHADER
    }
}

/// Writes slice parameters into every sliceable material of `materials`,
/// leaving the rest untouched.
pub fn write_slice(materials: &mut [Material], params: SliceParameters) {
    for material in materials.iter_mut().filter(|m| m.is_sliceable()) {
        material.slice = params;
    }
}

/// Zeroes the slice normal of every sliceable material, fully un-slicing
/// the mesh.
pub fn disable_slice(materials: &mut [Material]) {
    for material in materials.iter_mut().filter(|m| m.is_sliceable()) {
        material.slice.normal = Vec3::ZERO;
    }
}

/// Overrides only the signed offset, keeping center and normal.
pub fn override_slice_offset(materials: &mut [Material], offset: f32) {
    for material in materials.iter_mut().filter(|m| m.is_sliceable()) {
        material.slice.offset = offset;
    }
}
