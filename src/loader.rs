//! OBJ scene import. Faces are regrouped by their material so every
//! resulting object maps to exactly one material; vertices are emitted
//! per-corner with sequential indices, which keeps the index-in-bounds
//! invariant trivial and lets the hit shader address attributes without an
//! extra indirection.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context as _, Result};
use ultraviolet::Vec3;

use crate::shader_types::{MaterialPbr, Vertex};

pub struct LoadedScene {
    pub objects: Vec<GeometryObject>,
    pub materials: Vec<MaterialPbr>,
}

/// One ray-traceable object: the triangles of a single material.
pub struct GeometryObject {
    pub indices: Vec<u32>,
    pub vertices: Vec<Vertex>,
    /// One entry per triangle.
    pub material_indices: Vec<i32>,
}

pub fn load_scene(path: &Path) -> Result<LoadedScene> {
    let (models, materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .with_context(|| format!("Could not read scene file {}", path.display()))?;
    let materials = materials.context("Could not read material library")?;

    build_scene(&models, &materials)
}

fn build_scene(models: &[tobj::Model], materials: &[tobj::Material]) -> Result<LoadedScene> {
    let objects = group_by_material(models)?;
    if objects.is_empty() {
        bail!("Scene contains no triangles");
    }

    let materials = materials
        .iter()
        .map(|material| derive_material(material.diffuse, material.specular))
        .collect();

    Ok(LoadedScene { objects, materials })
}

/// Splits the imported meshes into one object per material id, duplicating
/// vertices per face corner and emitting sequential indices.
fn group_by_material(models: &[tobj::Model]) -> Result<Vec<GeometryObject>> {
    // BTreeMap so object order is deterministic across runs.
    let mut objects_by_material: BTreeMap<i32, GeometryObject> = BTreeMap::new();

    for model in models {
        let mesh = &model.mesh;
        if mesh.normals.is_empty() {
            bail!("Mesh '{}' has no normals", model.name);
        }
        let material_id = mesh.material_id.map(|id| id as i32).unwrap_or(-1);
        // TODO: route material id -1 to a default material instead of
        // skipping those faces.
        if material_id < 0 {
            log::warn!("Mesh '{}' has no material, skipping", model.name);
            continue;
        }

        let object = objects_by_material
            .entry(material_id)
            .or_insert_with(|| GeometryObject {
                indices: Vec::new(),
                vertices: Vec::new(),
                material_indices: Vec::new(),
            });

        for triangle in mesh.indices.chunks_exact(3) {
            for &corner in triangle {
                let corner = corner as usize;
                let position = Vec3::new(
                    mesh.positions[3 * corner],
                    mesh.positions[3 * corner + 1],
                    mesh.positions[3 * corner + 2],
                );
                let normal = Vec3::new(
                    mesh.normals[3 * corner],
                    mesh.normals[3 * corner + 1],
                    mesh.normals[3 * corner + 2],
                );

                object.indices.push(object.vertices.len() as u32);
                object.vertices.push(Vertex { position, normal });
            }
            object.material_indices.push(material_id);
        }
    }

    Ok(objects_by_material.into_values().collect())
}

const NORMALIZING_FLOOR: f32 = 0.001;

/// Blends an MTL diffuse/specular pair into one PBR record. Albedo is the
/// self-weighted average of the two colors per channel; roughness is one
/// minus the specular components' self-weighted average. The normalizing
/// sums are floored so black materials stay black instead of going NaN.
pub fn derive_material(diffuse: [f32; 3], specular: [f32; 3]) -> MaterialPbr {
    let blend_channel = |d: f32, s: f32| {
        let normalizing_factor = (d + s).max(NORMALIZING_FLOOR);
        (d / normalizing_factor) * d + (s / normalizing_factor) * s
    };
    let albedo = Vec3::new(
        blend_channel(diffuse[0], specular[0]),
        blend_channel(diffuse[1], specular[1]),
        blend_channel(diffuse[2], specular[2]),
    );

    let specular_normalizing_factor =
        (specular[0] + specular[1] + specular[2]).max(NORMALIZING_FLOOR);
    let shininess: f32 = specular
        .iter()
        .map(|s| (s / specular_normalizing_factor) * s)
        .sum();

    MaterialPbr {
        albedo,
        metallic: 0.25,
        roughness: 1.0 - shininess,
        _pad: [0.0; 3],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_MATERIAL_OBJ: &str = "\
mtllib test.mtl
v 0 0 0
v 1 0 0
v 0 1 0
v 1 1 0
vn 0 0 1
usemtl red
f 1//1 2//1 3//1
usemtl green
f 2//1 4//1 3//1
";

    const TEST_MTL: &str = "\
newmtl red
Kd 1 0 0
Ks 0.5 0.5 0.5
newmtl green
Kd 0 1 0
Ks 0.5 0.5 0.5
";

    fn load_test_scene() -> LoadedScene {
        let mut obj = std::io::Cursor::new(TWO_MATERIAL_OBJ);
        let (models, materials) = tobj::load_obj_buf(
            &mut obj,
            &tobj::LoadOptions {
                triangulate: true,
                single_index: true,
                ..Default::default()
            },
            |_| tobj::load_mtl_buf(&mut std::io::Cursor::new(TEST_MTL)),
        )
        .unwrap();
        build_scene(&models, &materials.unwrap()).unwrap()
    }

    #[test]
    fn groups_faces_by_material() {
        let scene = load_test_scene();
        assert_eq!(scene.objects.len(), 2);
        assert_eq!(scene.materials.len(), 2);
        for object in &scene.objects {
            assert_eq!(object.indices.len(), 3);
            assert_eq!(object.vertices.len(), 3);
            assert_eq!(object.material_indices.len(), 1);
        }
    }

    #[test]
    fn every_index_is_in_bounds() {
        let scene = load_test_scene();
        for object in &scene.objects {
            for &index in &object.indices {
                assert!((index as usize) < object.vertices.len());
            }
        }
    }

    #[test]
    fn indices_are_sequential_per_object() {
        let scene = load_test_scene();
        for object in &scene.objects {
            let expected: Vec<u32> = (0..object.vertices.len() as u32).collect();
            assert_eq!(object.indices, expected);
        }
    }

    #[test]
    fn material_derivation_is_idempotent() {
        let a = derive_material([0.8, 0.2, 0.1], [0.3, 0.3, 0.3]);
        let b = derive_material([0.8, 0.2, 0.1], [0.3, 0.3, 0.3]);
        assert_eq!(bytemuck::bytes_of(&a), bytemuck::bytes_of(&b));
    }

    #[test]
    fn equal_materials_are_not_deduplicated() {
        // Two MTL entries with identical colors must stay two records.
        let materials = [
            tobj::Material {
                diffuse: [0.5, 0.5, 0.5],
                specular: [0.1, 0.1, 0.1],
                ..Default::default()
            },
            tobj::Material {
                diffuse: [0.5, 0.5, 0.5],
                specular: [0.1, 0.1, 0.1],
                ..Default::default()
            },
        ];
        let derived: Vec<MaterialPbr> = materials
            .iter()
            .map(|m| derive_material(m.diffuse, m.specular))
            .collect();
        assert_eq!(derived.len(), 2);
        assert_eq!(derived[0], derived[1]);
    }

    #[test]
    fn black_material_does_not_produce_nan() {
        let material = derive_material([0.0, 0.0, 0.0], [0.0, 0.0, 0.0]);
        assert_eq!(material.albedo, Vec3::zero());
        assert_eq!(material.roughness, 1.0);
        assert!(material.albedo.x.is_finite());
    }

    #[test]
    fn derivation_matches_reference_values() {
        // Pure diffuse: albedo collapses to the diffuse color.
        let material = derive_material([1.0, 0.5, 0.25], [0.0, 0.0, 0.0]);
        assert!((material.albedo.x - 1.0).abs() < 1e-6);
        assert!((material.albedo.y - 0.5).abs() < 1e-6);
        assert!((material.albedo.z - 0.25).abs() < 1e-6);
        assert_eq!(material.metallic, 0.25);

        // Uniform specular 0.9: shininess = 0.9, roughness = 0.1.
        let material = derive_material([0.0, 0.0, 0.0], [0.9, 0.9, 0.9]);
        assert!((material.roughness - 0.1).abs() < 1e-6);
    }
}
