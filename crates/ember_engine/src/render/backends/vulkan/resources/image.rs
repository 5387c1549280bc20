//! Allocated images and layout transitions
//!
//! [`AllocatedImage`] is a 2D image, its `vk-mem` allocation and a view
//! covering the whole image. Depth buffers, MSAA colour targets, shadow maps
//! and textures are all built on it.

use ash::{vk, Device};
use std::sync::Arc;
use vk_mem::Alloc;

use crate::render::backends::vulkan::{LogicalDevice, VulkanError, VulkanResult};

/// Creation parameters for an [`AllocatedImage`]
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Size in texels
    pub extent: vk::Extent2D,
    /// Texel format
    pub format: vk::Format,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Sample count
    pub samples: vk::SampleCountFlags,
    /// Aspect of the default view
    pub aspect: vk::ImageAspectFlags,
}

impl ImageDesc {
    /// Depth attachment sampled by later passes (shadow maps)
    pub fn sampled_depth(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            samples: vk::SampleCountFlags::TYPE_1,
            aspect: vk::ImageAspectFlags::DEPTH,
        }
    }

    /// Multisampled depth attachment for the forward pass
    pub fn depth_attachment(extent: vk::Extent2D, format: vk::Format, samples: vk::SampleCountFlags) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            samples,
            aspect: vk::ImageAspectFlags::DEPTH,
        }
    }

    /// Transient multisampled colour attachment resolved into the swapchain image
    pub fn msaa_color(extent: vk::Extent2D, format: vk::Format, samples: vk::SampleCountFlags) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
            samples,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }

    /// Sampled colour texture filled by a transfer
    pub fn texture(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            samples: vk::SampleCountFlags::TYPE_1,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }
}

/// Device-local image with its allocation and default view
pub struct AllocatedImage {
    device: Device,
    allocator: Arc<vk_mem::Allocator>,
    image: vk::Image,
    allocation: vk_mem::Allocation,
    view: vk::ImageView,
    desc: ImageDesc,
}

impl AllocatedImage {
    /// Allocate the image and create its view
    pub fn new(device: &LogicalDevice, desc: ImageDesc) -> VulkanResult<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Cannot create a {}x{} image", desc.extent.width, desc.extent.height),
            });
        }

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(desc.samples);

        let allocation_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            required_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ..Default::default()
        };

        let allocator = Arc::clone(device.allocator());
        let (image, mut allocation) = unsafe {
            allocator
                .create_image(&image_info, &allocation_info)
                .map_err(VulkanError::driver("vmaCreateImage"))?
        };

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(subresource_range(desc.aspect));

        let view = match unsafe { device.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(result) => {
                unsafe { allocator.destroy_image(image, &mut allocation) };
                return Err(VulkanError::Driver { operation: "vkCreateImageView", result });
            }
        };

        Ok(Self {
            device: device.device.clone(),
            allocator,
            image,
            allocation,
            view,
            desc,
        })
    }

    /// Image handle
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// View covering the whole image
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Size in texels
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    /// Record a whole-image layout transition
    pub fn record_transition(
        &self,
        device: &Device,
        command_buffer: vk::CommandBuffer,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> VulkanResult<()> {
        record_layout_transition(device, command_buffer, self.image, self.desc.aspect, old_layout, new_layout)
    }
}

impl Drop for AllocatedImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.allocator.destroy_image(self.image, &mut self.allocation);
        }
    }
}

/// Single mip, single layer range for `aspect`
pub fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Access masks and stages for a supported layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    /// Accesses made available
    pub src_access: vk::AccessFlags,
    /// Accesses made visible
    pub dst_access: vk::AccessFlags,
    /// Stage that produced the old contents
    pub src_stage: vk::PipelineStageFlags,
    /// Stage that consumes the new layout
    pub dst_stage: vk::PipelineStageFlags,
}

/// Masks for `old -> new`, or an error for a transition the engine never performs
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> VulkanResult<TransitionMasks> {
    use vk::ImageLayout as L;

    let masks = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        },
        (L::UNDEFINED, L::DEPTH_STENCIL_READ_ONLY_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        },
        _ => {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Unsupported image layout transition {old:?} -> {new:?}"),
            })
        }
    };
    Ok(masks)
}

/// Record a pipeline barrier moving `image` from `old` to `new`
pub fn record_layout_transition(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> VulkanResult<()> {
    let masks = transition_masks(old, new)?;
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range(aspect))
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access)
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            masks.src_stage,
            masks.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_transitions() {
        let to_dst = transition_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(to_dst.dst_stage, vk::PipelineStageFlags::TRANSFER);
        assert!(to_dst.src_access.is_empty());

        let to_read = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_read.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_read.dst_access, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_unsupported_transition() {
        let result = transition_masks(vk::ImageLayout::PRESENT_SRC_KHR, vk::ImageLayout::UNDEFINED);
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_desc_presets() {
        let extent = vk::Extent2D { width: 512, height: 512 };
        let shadow = ImageDesc::sampled_depth(extent, vk::Format::D32_SFLOAT);
        assert!(shadow.usage.contains(vk::ImageUsageFlags::SAMPLED));
        assert_eq!(shadow.samples, vk::SampleCountFlags::TYPE_1);

        let color = ImageDesc::msaa_color(extent, vk::Format::B8G8R8A8_SRGB, vk::SampleCountFlags::TYPE_4);
        assert_eq!(color.aspect, vk::ImageAspectFlags::COLOR);
        assert_eq!(color.samples, vk::SampleCountFlags::TYPE_4);
    }
}
