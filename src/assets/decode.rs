//! glTF/GLB decoding into CPU-side geometry ready for GPU upload.
//!
//! Node hierarchies are flattened: every triangle primitive is emitted with its world
//! transform baked into positions and normals.

use glam::{Mat3, Mat4, Vec3};
use std::borrow::Cow;

/// Compression extensions whose payloads cannot be expanded here. A file that lists one of
/// them as required has no uncompressed fallback to read.
const UNDECODABLE_EXTENSIONS: &[&str] = &[
    "KHR_draco_mesh_compression",
    "EXT_meshopt_compression",
    "KHR_texture_basisu",
];

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

#[derive(Debug, Clone)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub material: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterialData {
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: [f32; 3],
    pub base_color_texture: Option<usize>,
    pub double_sided: bool,
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            base_color: [1.0, 1.0, 1.0, 1.0],
            metallic: 1.0,
            roughness: 1.0,
            emissive: [0.0, 0.0, 0.0],
            base_color_texture: None,
            double_sided: false,
        }
    }
}

/// Tightly packed RGBA8 texels.
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ModelGeometry {
    pub meshes: Vec<MeshData>,
    /// Materials in document order followed by one default material.
    pub materials: Vec<MaterialData>,
    /// Textures in document image order; `None` where the image could not be converted.
    pub textures: Vec<Option<TextureData>>,
}

impl ModelGeometry {
    pub fn triangle_count(&self) -> usize {
        self.meshes.iter().map(|mesh| mesh.indices.len() / 3).sum()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to parse glTF: {0}")]
    Parse(#[from] gltf::Error),
    #[error("model requires the unsupported extension {0}")]
    UnsupportedExtension(String),
    #[error("model has no scene to display")]
    EmptyScene,
    #[error("model contains no triangle geometry")]
    NoGeometry,
    #[error("mesh {mesh} primitive {primitive} has no positions")]
    MissingPositions { mesh: usize, primitive: usize },
    #[error("mesh {mesh} primitive {primitive} references vertex {index} of {count}")]
    IndexOutOfRange {
        mesh: usize,
        primitive: usize,
        index: u32,
        count: usize,
    },
}

pub fn decode_glb(bytes: &[u8]) -> Result<ModelGeometry, DecodeError> {
    check_required_extensions(bytes)?;
    let (document, buffers, images) = gltf::import_slice(bytes)?;

    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or(DecodeError::EmptyScene)?;

    let mut materials: Vec<MaterialData> = document.materials().map(convert_material).collect();
    materials.push(MaterialData::default());
    let default_material = materials.len() - 1;

    let textures = images
        .iter()
        .enumerate()
        .map(|(index, image)| {
            let converted = convert_image(image);
            if converted.is_none() {
                log::warn!(
                    "Texture image {} uses unsupported format {:?}; falling back to material color",
                    index,
                    image.format
                );
            }
            converted
        })
        .collect();

    let mut meshes = Vec::new();
    let mut stack: Vec<(gltf::Node, Mat4)> = scene
        .nodes()
        .map(|node| (node, Mat4::IDENTITY))
        .collect();
    while let Some((node, parent)) = stack.pop() {
        let world = parent * Mat4::from_cols_array_2d(&node.transform().matrix());
        if let Some(mesh) = node.mesh() {
            for primitive in mesh.primitives() {
                if primitive.mode() != gltf::mesh::Mode::Triangles {
                    log::debug!(
                        "Skipping mesh {} primitive {} with mode {:?}",
                        mesh.index(),
                        primitive.index(),
                        primitive.mode()
                    );
                    continue;
                }
                let material = primitive
                    .material()
                    .index()
                    .unwrap_or(default_material);
                meshes.push(read_primitive(&buffers, &mesh, &primitive, world, material)?);
            }
        }
        stack.extend(node.children().map(|child| (child, world)));
    }

    if meshes.iter().all(|mesh| mesh.indices.is_empty()) {
        return Err(DecodeError::NoGeometry);
    }

    Ok(ModelGeometry {
        meshes,
        materials,
        textures,
    })
}

#[derive(Default, serde::Deserialize)]
struct RequiredExtensions {
    #[serde(default, rename = "extensionsRequired")]
    names: Vec<String>,
}

/// Reject documents whose required extensions name a compression scheme before the parser
/// turns them into a generic validation error.
fn check_required_extensions(bytes: &[u8]) -> Result<(), DecodeError> {
    let json: Cow<'_, [u8]> = match gltf::Glb::from_slice(bytes) {
        Ok(glb) => glb.json,
        Err(_) => Cow::Borrowed(bytes),
    };
    // Unreadable JSON is left for the parser to report.
    let required = serde_json::from_slice::<RequiredExtensions>(&json).unwrap_or_default();
    match required
        .names
        .into_iter()
        .find(|name| UNDECODABLE_EXTENSIONS.contains(&name.as_str()))
    {
        Some(name) => Err(DecodeError::UnsupportedExtension(name)),
        None => Ok(()),
    }
}

fn read_primitive(
    buffers: &[gltf::buffer::Data],
    mesh: &gltf::Mesh,
    primitive: &gltf::Primitive,
    world: Mat4,
    material: usize,
) -> Result<MeshData, DecodeError> {
    let reader = primitive.reader(|buffer| Some(buffers[buffer.index()].0.as_slice()));

    let positions: Vec<[f32; 3]> = reader
        .read_positions()
        .ok_or(DecodeError::MissingPositions {
            mesh: mesh.index(),
            primitive: primitive.index(),
        })?
        .collect();
    let count = positions.len();

    let mut indices: Vec<u32> = match reader.read_indices() {
        Some(iter) => iter.into_u32().collect(),
        None => (0..count as u32).collect(),
    };
    indices.truncate(indices.len() - indices.len() % 3);
    if let Some(&index) = indices.iter().find(|&&index| index as usize >= count) {
        return Err(DecodeError::IndexOutOfRange {
            mesh: mesh.index(),
            primitive: primitive.index(),
            index,
            count,
        });
    }

    let normals: Vec<[f32; 3]> = match reader.read_normals() {
        Some(iter) => iter.collect(),
        None => smooth_normals(&positions, &indices),
    };
    let uvs: Vec<[f32; 2]> = match reader.read_tex_coords(0) {
        Some(iter) => iter.into_f32().collect(),
        None => vec![[0.0, 0.0]; count],
    };

    let normal_matrix = Mat3::from_mat4(world).inverse().transpose();
    let vertices = (0..count)
        .map(|i| {
            let position = world.transform_point3(Vec3::from(positions[i]));
            let normal = normals
                .get(i)
                .map(|n| (normal_matrix * Vec3::from(*n)).normalize_or_zero())
                .unwrap_or(Vec3::Y);
            Vertex {
                position: position.to_array(),
                normal: normal.to_array(),
                uv: uvs.get(i).copied().unwrap_or([0.0, 0.0]),
            }
        })
        .collect();

    // Mirroring transforms flip triangle winding.
    if world.determinant() < 0.0 {
        for triangle in indices.chunks_exact_mut(3) {
            triangle.swap(1, 2);
        }
    }

    Ok(MeshData {
        vertices,
        indices,
        material,
    })
}

fn smooth_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut accumulated = vec![Vec3::ZERO; positions.len()];
    for triangle in indices.chunks_exact(3) {
        let [a, b, c] = [triangle[0], triangle[1], triangle[2]].map(|i| i as usize);
        let pa = Vec3::from(positions[a]);
        let face = (Vec3::from(positions[b]) - pa).cross(Vec3::from(positions[c]) - pa);
        accumulated[a] += face;
        accumulated[b] += face;
        accumulated[c] += face;
    }
    accumulated
        .into_iter()
        .map(|n| {
            let n = n.normalize_or_zero();
            if n == Vec3::ZERO { Vec3::Y } else { n }.to_array()
        })
        .collect()
}

fn convert_material(material: gltf::Material) -> MaterialData {
    let pbr = material.pbr_metallic_roughness();
    MaterialData {
        base_color: pbr.base_color_factor(),
        metallic: pbr.metallic_factor(),
        roughness: pbr.roughness_factor(),
        emissive: material.emissive_factor(),
        base_color_texture: pbr
            .base_color_texture()
            .map(|info| info.texture().source().index()),
        double_sided: material.double_sided(),
    }
}

fn convert_image(image: &gltf::image::Data) -> Option<TextureData> {
    use gltf::image::Format;

    let texels = (image.width as usize) * (image.height as usize);
    let rgba: Vec<u8> = match image.format {
        Format::R8G8B8A8 => image.pixels.clone(),
        Format::R8G8B8 => image
            .pixels
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect(),
        Format::R8G8 => image
            .pixels
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[0], p[0], p[1]])
            .collect(),
        Format::R8 => image.pixels.iter().flat_map(|&v| [v, v, v, 255]).collect(),
        _ => return None,
    };
    if rgba.len() != texels * 4 {
        return None;
    }
    Some(TextureData {
        width: image.width,
        height: image.height,
        rgba,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{decode_glb, DecodeError};
    use glam::Vec3;

    /// Build a GLB holding one triangle; `node_extras` is spliced into the node object.
    pub(crate) fn triangle_glb(node_extras: &str, with_normals: bool) -> Vec<u8> {
        let positions: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let normals: [f32; 9] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        let indices: [u16; 3] = [0, 1, 2];

        let mut bin = Vec::new();
        for value in positions {
            bin.extend_from_slice(&value.to_le_bytes());
        }
        for value in normals {
            bin.extend_from_slice(&value.to_le_bytes());
        }
        for value in indices {
            bin.extend_from_slice(&value.to_le_bytes());
        }
        while bin.len() % 4 != 0 {
            bin.push(0);
        }

        let normal_attribute = if with_normals { r#", "NORMAL": 1"# } else { "" };
        let json = format!(
            r#"{{
  "asset": {{ "version": "2.0" }},
  "scene": 0,
  "scenes": [ {{ "nodes": [0] }} ],
  "nodes": [ {{ "mesh": 0 {node_extras} }} ],
  "meshes": [ {{ "primitives": [ {{ "attributes": {{ "POSITION": 0{normal_attribute} }}, "indices": 2, "material": 0 }} ] }} ],
  "materials": [ {{ "pbrMetallicRoughness": {{ "baseColorFactor": [0.5, 0.25, 1.0, 1.0], "metallicFactor": 0.0, "roughnessFactor": 0.5 }} }} ],
  "buffers": [ {{ "byteLength": {len} }} ],
  "bufferViews": [
    {{ "buffer": 0, "byteOffset": 0, "byteLength": 36 }},
    {{ "buffer": 0, "byteOffset": 36, "byteLength": 36 }},
    {{ "buffer": 0, "byteOffset": 72, "byteLength": 6 }}
  ],
  "accessors": [
    {{ "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0, 0, 0], "max": [1, 1, 0] }},
    {{ "bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC3" }},
    {{ "bufferView": 2, "componentType": 5123, "count": 3, "type": "SCALAR" }}
  ]
}}"#,
            len = bin.len()
        );
        glb_container(json, bin)
    }

    pub(crate) fn glb_container(json: String, bin: Vec<u8>) -> Vec<u8> {
        let mut json = json.into_bytes();
        while json.len() % 4 != 0 {
            json.push(b' ');
        }
        let total = 12 + 8 + json.len() + if bin.is_empty() { 0 } else { 8 + bin.len() };
        let mut glb = Vec::with_capacity(total);
        glb.extend_from_slice(b"glTF");
        glb.extend_from_slice(&2u32.to_le_bytes());
        glb.extend_from_slice(&(total as u32).to_le_bytes());
        glb.extend_from_slice(&(json.len() as u32).to_le_bytes());
        glb.extend_from_slice(&0x4E4F_534Au32.to_le_bytes());
        glb.extend_from_slice(&json);
        if !bin.is_empty() {
            glb.extend_from_slice(&(bin.len() as u32).to_le_bytes());
            glb.extend_from_slice(&0x004E_4942u32.to_le_bytes());
            glb.extend_from_slice(&bin);
        }
        glb
    }

    #[test]
    fn decodes_single_triangle() {
        let geometry = decode_glb(&triangle_glb("", true)).unwrap();
        assert_eq!(geometry.meshes.len(), 1);
        assert_eq!(geometry.triangle_count(), 1);
        assert_eq!(geometry.meshes[0].vertices.len(), 3);
        assert_eq!(geometry.meshes[0].material, 0);
        assert_eq!(geometry.materials.len(), 2);
        assert_eq!(geometry.materials[0].base_color, [0.5, 0.25, 1.0, 1.0]);
        assert_eq!(geometry.materials[0].roughness, 0.5);
        assert_eq!(geometry.meshes[0].vertices[1].position, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn node_translation_is_baked_into_vertices() {
        let geometry =
            decode_glb(&triangle_glb(r#", "translation": [2.0, 0.0, -1.0]"#, true)).unwrap();
        assert_eq!(geometry.meshes[0].vertices[0].position, [2.0, 0.0, -1.0]);
        assert_eq!(geometry.meshes[0].vertices[2].position, [2.0, 1.0, -1.0]);
    }

    #[test]
    fn missing_normals_are_generated_from_faces() {
        let geometry = decode_glb(&triangle_glb("", false)).unwrap();
        for vertex in &geometry.meshes[0].vertices {
            assert!((Vec3::from(vertex.normal) - Vec3::Z).length() < 1e-5);
        }
    }

    #[test]
    fn mirrored_node_flips_winding() {
        let geometry =
            decode_glb(&triangle_glb(r#", "scale": [-1.0, 1.0, 1.0]"#, true)).unwrap();
        assert_eq!(geometry.meshes[0].indices, vec![0, 2, 1]);
    }

    #[test]
    fn garbage_bytes_fail_to_parse() {
        let err = decode_glb(b"definitely not a model").unwrap_err();
        assert!(matches!(err, DecodeError::Parse(_)));
    }

    #[test]
    fn scene_without_meshes_has_no_geometry() {
        let json = r#"{ "asset": { "version": "2.0" }, "scene": 0, "scenes": [ { "nodes": [0] } ], "nodes": [ {} ] }"#;
        let err = decode_glb(&glb_container(json.to_string(), Vec::new())).unwrap_err();
        assert!(matches!(err, DecodeError::NoGeometry));
    }

    #[test]
    fn document_without_scenes_is_rejected() {
        let json = r#"{ "asset": { "version": "2.0" } }"#;
        let err = decode_glb(&glb_container(json.to_string(), Vec::new())).unwrap_err();
        assert!(matches!(err, DecodeError::EmptyScene));
    }

    #[test]
    fn draco_compressed_model_reports_the_extension() {
        let json = r#"{
  "asset": { "version": "2.0" },
  "extensionsUsed": ["KHR_draco_mesh_compression"],
  "extensionsRequired": ["KHR_draco_mesh_compression"],
  "scene": 0,
  "scenes": [ { "nodes": [] } ]
}"#;
        let err = decode_glb(&glb_container(json.to_string(), Vec::new())).unwrap_err();
        assert!(err.to_string().contains("KHR_draco_mesh_compression"));
        match err {
            DecodeError::UnsupportedExtension(name) => {
                assert_eq!(name, "KHR_draco_mesh_compression")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
