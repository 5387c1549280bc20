//! Vulkan resource management
//!
//! Buffers, images, textures, push-descriptor layouts and the handle-indexed
//! stores for meshes and materials.

/// Host, GPU and staging buffers
pub mod buffer;

/// Per-frame arrays of aligned uniform blocks
pub mod uniform_array;

/// Push-descriptor layouts and pending writes
pub mod descriptor_set;

/// Allocated images and layout transitions
pub mod image;

/// Sampled textures and the texture store
pub mod texture;

/// Shared vertex/index buffers and meshes
pub mod geometry_store;

/// Deduplicated materials
pub mod material_store;

pub use buffer::{GpuBuffer, HostBuffer, StagingBuffer};
pub use descriptor_set::{DescriptorBindingTable, PendingWrite, PendingWrites, PushDescriptorLayout};
pub use geometry_store::{AppendCursor, BufferView, GeometryStore, Index, Mesh, MeshHandle};
pub use image::{AllocatedImage, ImageDesc};
pub use material_store::{Material, MaterialDesc, MaterialHandle, MaterialKey, MaterialStore, MaterialUniform};
pub use texture::{Sampler, Texture, TextureHandle, TextureStore};
pub use uniform_array::{UniformArrayLayout, UniformBufferArray};
