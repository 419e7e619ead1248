//! CPU-side mirrors of the records the shaders read. Layouts match the
//! std430 storage-buffer and std140 uniform declarations in
//! `assets/shaders/`; every struct is `Pod` so buffers can be filled with a
//! plain byte copy.

use bytemuck::{Pod, Zeroable};
use ultraviolet::{Mat4, Vec3, Vec4};

/// One triangle vertex as stored in the per-object vertex buffers and as
/// consumed by the BLAS build (position is the first field, `Vertex` is the
/// build's vertex stride).
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
}

/// std430 struct { vec3; float; vec3; float; }
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct PointLight {
    pub position: Vec3,
    pub _pad0: f32,
    pub color: Vec3,
    pub _pad1: f32,
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3) -> Self {
        Self {
            position,
            _pad0: 0.0,
            color,
            _pad1: 0.0,
        }
    }
}

/// Derived PBR material record, one per imported MTL material.
/// std430 struct { vec3; float; float; float[3] padding } = 32 bytes.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct MaterialPbr {
    pub albedo: Vec3,
    pub metallic: f32,
    pub roughness: f32,
    pub _pad: [f32; 3],
}

/// Per-frame constant block. One aligned region per in-flight frame; the
/// shader declares the identical std140 uniform block.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct SceneConstants {
    /// Inverse view-projection, used by raygen to unproject pixels.
    pub projection_to_world: Mat4,
    pub camera_position: Vec4,
    /// Alpha channel is unused.
    pub default_albedo: Vec4,
    /// R = metallic, G = roughness, BA unused.
    pub default_metal_and_roughness: Vec4,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn record_sizes_match_shader_layout() {
        assert_eq!(size_of::<Vertex>(), 24);
        assert_eq!(size_of::<PointLight>(), 32);
        assert_eq!(size_of::<MaterialPbr>(), 32);
        assert_eq!(size_of::<SceneConstants>(), 112);
    }

    #[test]
    fn scene_constants_serialize_to_one_exact_record() {
        let constants = SceneConstants {
            projection_to_world: Mat4::identity(),
            camera_position: Vec4::new(1.0, 2.0, 3.0, 1.0),
            default_albedo: Vec4::one(),
            default_metal_and_roughness: Vec4::new(0.1, 0.8, 0.0, 0.0),
        };

        let bytes = bytemuck::bytes_of(&constants);
        assert_eq!(bytes.len(), size_of::<SceneConstants>());

        let back: &SceneConstants = bytemuck::from_bytes(bytes);
        assert_eq!(back.camera_position, constants.camera_position);
        assert_eq!(
            back.default_metal_and_roughness,
            constants.default_metal_and_roughness
        );
    }

    #[test]
    fn scene_constants_fit_one_aligned_region() {
        // 256 is the largest minUniformBufferOffsetAlignment allowed by the
        // spec, so one region per frame always suffices.
        assert!(size_of::<SceneConstants>() <= 256);
    }
}
