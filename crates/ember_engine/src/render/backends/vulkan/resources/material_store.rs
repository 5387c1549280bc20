//! Material cache
//!
//! A material is a factor block in a device-local uniform array plus an
//! optional base-colour texture. Materials are created once per
//! [`MaterialKey`]; asking again for the same key returns the existing
//! handle. Each material owns one array slot that is written at creation
//! and never touched again, so uploads never race in-flight frames.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;

use crate::foundation::collections::{Handle, HandleArena};
use crate::render::backends::vulkan::resources::texture::TextureHandle;
use crate::render::backends::vulkan::resources::uniform_array::UniformArrayLayout;
use crate::render::backends::vulkan::{AdHocQueue, GpuBuffer, LogicalDevice, VulkanError, VulkanResult};

/// Source identity of a material, used for deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MaterialKey(pub String);

impl MaterialKey {
    /// Key from any string-like identity
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }
}

/// Parameters of a material
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialDesc {
    /// Linear RGBA multiplier of the base colour texture
    pub base_color: [f32; 4],
    /// Strength of the ambient term
    pub ambient: f32,
    /// Specular intensity
    pub specular: f32,
    /// Specular exponent
    pub shininess: f32,
    /// Base colour texture; the white texture is used when absent
    pub base_color_texture: Option<TextureHandle>,
}

impl Default for MaterialDesc {
    fn default() -> Self {
        Self {
            base_color: [1.0, 1.0, 1.0, 1.0],
            ambient: 0.1,
            specular: 0.5,
            shininess: 32.0,
            base_color_texture: None,
        }
    }
}

/// GPU layout of a material's factor block
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MaterialUniform {
    /// Base colour factor
    pub base_color: [f32; 4],
    /// x: ambient, y: specular, z: shininess, w: unused
    pub params: [f32; 4],
}

impl From<&MaterialDesc> for MaterialUniform {
    fn from(desc: &MaterialDesc) -> Self {
        Self {
            base_color: desc.base_color,
            params: [desc.ambient, desc.specular, desc.shininess, 0.0],
        }
    }
}

/// A cached material
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    /// Slot in the factor array
    pub slot: u32,
    /// Parameters it was created with
    pub desc: MaterialDesc,
}

/// Handle to a material in a [`MaterialStore`]
pub type MaterialHandle = Handle<Material>;

/// Key to handle bookkeeping with a fixed slot budget
#[derive(Default)]
pub struct MaterialCatalog {
    materials: HandleArena<Material>,
    by_key: HashMap<MaterialKey, MaterialHandle>,
    capacity: u32,
}

impl MaterialCatalog {
    /// Catalog with room for `capacity` materials
    pub fn new(capacity: u32) -> Self {
        Self {
            materials: HandleArena::new(),
            by_key: HashMap::new(),
            capacity,
        }
    }

    /// Existing material for `key`
    pub fn material_for(&self, key: &MaterialKey) -> Option<MaterialHandle> {
        self.by_key.get(key).copied()
    }

    /// Slot the next material would occupy
    pub fn next_slot(&self, stride: u64) -> VulkanResult<u32> {
        let used = self.materials.len() as u32;
        if used >= self.capacity {
            return Err(VulkanError::ResourceExhausted {
                resource: "material uniforms",
                requested: stride,
                available: 0,
                capacity: stride * u64::from(self.capacity),
            });
        }
        Ok(used)
    }

    /// Record a material created at [`Self::next_slot`]
    pub fn insert(&mut self, key: MaterialKey, material: Material) -> MaterialHandle {
        let handle = self.materials.insert(material);
        self.by_key.insert(key, handle);
        handle
    }

    /// Look up a material
    pub fn get(&self, handle: MaterialHandle) -> Option<&Material> {
        self.materials.get(handle)
    }

    /// Number of materials
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    /// Whether no materials exist yet
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

/// Deduplicated materials and their device-local factor array
pub struct MaterialStore {
    layout: UniformArrayLayout,
    buffer: GpuBuffer,
    catalog: MaterialCatalog,
}

impl MaterialStore {
    /// Allocate room for `capacity` factor blocks at the device's uniform alignment
    pub fn new(device: &LogicalDevice, alignment: u64, capacity: u32) -> VulkanResult<Self> {
        let layout = UniformArrayLayout::of::<MaterialUniform>(alignment, capacity);
        let buffer = GpuBuffer::new(device, layout.total_size(), vk::BufferUsageFlags::UNIFORM_BUFFER)?;
        Ok(Self {
            layout,
            buffer,
            catalog: MaterialCatalog::new(capacity),
        })
    }

    /// Existing material for `key`
    pub fn material_for(&self, key: &MaterialKey) -> Option<MaterialHandle> {
        self.catalog.material_for(key)
    }

    /// Return the material for `key`, creating and uploading it on first use
    pub fn create_material(
        &mut self,
        queue: &mut AdHocQueue,
        key: MaterialKey,
        desc: MaterialDesc,
    ) -> VulkanResult<MaterialHandle> {
        if let Some(handle) = self.catalog.material_for(&key) {
            log::trace!("Material {:?} reused as {:?}", key, handle);
            return Ok(handle);
        }

        let slot = self.catalog.next_slot(self.layout.stride)?;
        let (offset, _) = self.layout.descriptor_range(slot)?;
        let uniform = MaterialUniform::from(&desc);
        self.buffer.copy_from_at(queue, bytemuck::bytes_of(&uniform), offset)?;

        log::debug!("Created material {:?} in slot {}", key, slot);
        Ok(self.catalog.insert(key, Material { slot, desc }))
    }

    /// Look up a material
    pub fn get(&self, handle: MaterialHandle) -> Option<&Material> {
        self.catalog.get(handle)
    }

    /// Descriptor info for the material's factor block
    pub fn uniform_descriptor(&self, handle: MaterialHandle) -> VulkanResult<vk::DescriptorBufferInfo> {
        let material = self.get(handle).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("Unknown material {handle:?}"),
        })?;
        let (offset, range) = self.layout.descriptor_range(material.slot)?;
        Ok(self.buffer.descriptor_info(offset, range))
    }

    /// Number of cached materials
    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    /// Whether no materials exist yet
    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(catalog: &mut MaterialCatalog, key: &str) -> VulkanResult<MaterialHandle> {
        let key = MaterialKey::new(key);
        if let Some(handle) = catalog.material_for(&key) {
            return Ok(handle);
        }
        let slot = catalog.next_slot(256)?;
        Ok(catalog.insert(key, Material { slot, desc: MaterialDesc::default() }))
    }

    #[test]
    fn test_same_key_same_handle() {
        let mut catalog = MaterialCatalog::new(4);
        let a = add(&mut catalog, "crate.png").unwrap();
        let b = add(&mut catalog, "crate.png").unwrap();
        let c = add(&mut catalog, "floor.png").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.raw(), 1);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(c).unwrap().slot, 1);
    }

    #[test]
    fn test_capacity_exhausted() {
        let mut catalog = MaterialCatalog::new(1);
        add(&mut catalog, "a").unwrap();
        let err = add(&mut catalog, "b").unwrap_err();
        assert!(matches!(err, VulkanError::ResourceExhausted { capacity: 256, .. }));
        // Existing keys still resolve when full
        assert!(add(&mut catalog, "a").is_ok());
    }

    #[test]
    fn test_uniform_packing() {
        let desc = MaterialDesc {
            base_color: [0.5, 0.25, 1.0, 1.0],
            ambient: 0.2,
            specular: 0.8,
            shininess: 16.0,
            base_color_texture: None,
        };
        let uniform = MaterialUniform::from(&desc);
        assert_eq!(std::mem::size_of::<MaterialUniform>(), 32);
        assert_eq!(uniform.params, [0.2, 0.8, 16.0, 0.0]);
    }
}
