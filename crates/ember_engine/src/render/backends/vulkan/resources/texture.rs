//! Sampled textures
//!
//! RGBA8 pixel data is copied into a staging buffer, transferred into a
//! device-local image on the graphics ad-hoc queue and left in
//! `SHADER_READ_ONLY_OPTIMAL`. Textures live in a [`TextureStore`] and are
//! referenced everywhere else by [`TextureHandle`].

use ash::{vk, Device};

use crate::foundation::collections::{Handle, HandleArena};
use crate::render::backends::vulkan::resources::image::{AllocatedImage, ImageDesc};
use crate::render::backends::vulkan::{AdHocQueue, LogicalDevice, StagingBuffer, VulkanError, VulkanResult};

/// Handle to a texture in a [`TextureStore`]
pub type TextureHandle = Handle<Texture>;

/// Bytes per RGBA8 texel
const RGBA8_TEXEL_SIZE: u64 = 4;

/// Byte length an RGBA8 image of `width` x `height` must have
pub fn rgba8_len(width: u32, height: u32) -> u64 {
    u64::from(width) * u64::from(height) * RGBA8_TEXEL_SIZE
}

/// Sampler owned by a texture or shadow map
pub struct Sampler {
    device: Device,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Linear, repeating sampler for material textures
    pub fn linear_repeat(device: &Device) -> VulkanResult<Self> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(false)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(0.0);
        Self::create(device, &info)
    }

    /// Depth-compare sampler for shadow lookups; outside the map counts as lit
    pub fn shadow_compare(device: &Device) -> VulkanResult<Self> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE)
            .unnormalized_coordinates(false)
            .compare_enable(true)
            .compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .min_lod(0.0)
            .max_lod(0.0);
        Self::create(device, &info)
    }

    fn create(device: &Device, info: &vk::SamplerCreateInfo) -> VulkanResult<Self> {
        let sampler = unsafe {
            device
                .create_sampler(info, None)
                .map_err(VulkanError::driver("vkCreateSampler"))?
        };
        Ok(Self {
            device: device.clone(),
            sampler,
        })
    }

    /// Sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

/// Device-local RGBA8 texture with its sampler
pub struct Texture {
    sampler: Sampler,
    image: AllocatedImage,
}

impl Texture {
    /// Upload `pixels` (tightly packed RGBA8 rows) and wait for the transfer
    pub fn from_rgba8(
        device: &LogicalDevice,
        queue: &mut AdHocQueue,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> VulkanResult<Self> {
        check_rgba8(width, height, pixels.len())?;

        let extent = vk::Extent2D { width, height };
        let image = AllocatedImage::new(device, ImageDesc::texture(extent, vk::Format::R8G8B8A8_SRGB))?;
        let staging = StagingBuffer::from_bytes(device.allocator(), pixels)?;

        let mut transition_result = Ok(());
        queue.run(|device, command_buffer| {
            transition_result = record_upload(device, command_buffer, &image, staging.handle());
        })?;
        transition_result?;
        drop(staging);

        let sampler = Sampler::linear_repeat(&device.device)?;
        log::debug!("Uploaded {}x{} RGBA8 texture", width, height);
        Ok(Self { sampler, image })
    }

    /// 1x1 texture of a single colour
    pub fn solid(device: &LogicalDevice, queue: &mut AdHocQueue, rgba: [u8; 4]) -> VulkanResult<Self> {
        Self::from_rgba8(device, queue, 1, 1, &rgba)
    }

    /// Descriptor info for a combined image sampler binding
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler.handle(),
            image_view: self.image.view(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    /// Size in texels
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }
}

fn record_upload(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    image: &AllocatedImage,
    staging: vk::Buffer,
) -> VulkanResult<()> {
    image.record_transition(
        device,
        command_buffer,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    )?;

    let extent = image.extent();
    let region = vk::BufferImageCopy::builder()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .build();

    unsafe {
        device.cmd_copy_buffer_to_image(
            command_buffer,
            staging,
            image.image(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    }

    image.record_transition(
        device,
        command_buffer,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )
}

/// Arena of textures with a white fallback at a fixed handle
pub struct TextureStore {
    textures: HandleArena<Texture>,
    white: TextureHandle,
}

impl TextureStore {
    /// Create the store and upload the white fallback
    pub fn new(device: &LogicalDevice, queue: &mut AdHocQueue) -> VulkanResult<Self> {
        let mut textures = HandleArena::new();
        let white = textures.insert(Texture::solid(device, queue, [255, 255, 255, 255])?);
        Ok(Self { textures, white })
    }

    /// Upload an RGBA8 image and return its handle
    pub fn create_texture_rgba8(
        &mut self,
        device: &LogicalDevice,
        queue: &mut AdHocQueue,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> VulkanResult<TextureHandle> {
        let texture = Texture::from_rgba8(device, queue, width, height, pixels)?;
        Ok(self.textures.insert(texture))
    }

    /// Handle of the 1x1 white texture
    pub fn white(&self) -> TextureHandle {
        self.white
    }

    /// Look up a texture
    pub fn get(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures.get(handle)
    }

    /// Descriptor for `handle`, or the white texture if the handle is invalid or unknown
    pub fn descriptor_or_white(&self, handle: TextureHandle) -> vk::DescriptorImageInfo {
        self.textures
            .get(handle)
            .or_else(|| self.textures.get(self.white))
            .map(Texture::descriptor_info)
            .unwrap_or_default()
    }

    /// Number of stored textures, including the fallback
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    /// Whether the store is empty (never true once constructed)
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

/// Reject empty extents and pixel data of the wrong length
fn check_rgba8(width: u32, height: u32, len: usize) -> VulkanResult<()> {
    if width == 0 || height == 0 {
        return Err(VulkanError::InvalidOperation {
            reason: format!("RGBA8 texture {width}x{height} has an empty extent"),
        });
    }
    let expected = rgba8_len(width, height);
    if len as u64 != expected {
        return Err(VulkanError::InvalidOperation {
            reason: format!("RGBA8 texture {width}x{height} needs {expected} bytes, got {len}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba8_len() {
        assert_eq!(rgba8_len(1, 1), 4);
        assert_eq!(rgba8_len(256, 128), 131_072);
        assert_eq!(rgba8_len(0, 64), 0);
    }

    #[test]
    fn test_empty_extent_is_rejected() {
        assert!(matches!(check_rgba8(0, 64, 0), Err(VulkanError::InvalidOperation { .. })));
        assert!(matches!(check_rgba8(64, 0, 0), Err(VulkanError::InvalidOperation { .. })));
        assert!(check_rgba8(2, 2, 16).is_ok());
        assert!(check_rgba8(2, 2, 15).is_err());
    }
}
