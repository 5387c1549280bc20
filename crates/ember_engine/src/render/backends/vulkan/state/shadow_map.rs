//! Shadow map targets
//!
//! One depth image per light, all sharing a compare sampler and the shadow
//! render pass. Maps are created once at a fixed resolution and survive
//! swapchain recreation. Every map is moved to the read-only layout at
//! creation so maps of unused light slots can still be bound.

use ash::vk;

use crate::render::backends::vulkan::resources::image::{AllocatedImage, ImageDesc};
use crate::render::backends::vulkan::resources::texture::Sampler;
use crate::render::backends::vulkan::rendering::render_pass::RenderPass;
use crate::render::backends::vulkan::state::framebuffer::Framebuffer;
use crate::render::backends::vulkan::{AdHocQueue, LogicalDevice, VulkanResult};

/// Depth image and framebuffer for one light
pub struct ShadowMap {
    framebuffer: Framebuffer,
    image: AllocatedImage,
}

impl ShadowMap {
    /// Framebuffer handle
    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer.handle()
    }

    /// Depth view sampled by the forward pass
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }
}

/// Fixed set of shadow maps plus the pass that renders them
pub struct ShadowMaps {
    maps: Vec<ShadowMap>,
    sampler: Sampler,
    render_pass: RenderPass,
    extent: vk::Extent2D,
}

impl ShadowMaps {
    /// Create `count` square maps of `size` texels
    pub fn new(device: &LogicalDevice, queue: &mut AdHocQueue, depth_format: vk::Format, size: u32, count: usize) -> VulkanResult<Self> {
        let render_pass = RenderPass::shadow(&device.device, depth_format)?;
        let sampler = Sampler::shadow_compare(&device.device)?;
        let extent = vk::Extent2D { width: size, height: size };

        let mut maps = Vec::with_capacity(count);
        for _ in 0..count {
            let image = AllocatedImage::new(device, ImageDesc::sampled_depth(extent, depth_format))?;
            let framebuffer = Framebuffer::new(&device.device, render_pass.handle(), &[image.view()], extent)?;
            maps.push(ShadowMap { framebuffer, image });
        }

        let mut transition_result = Ok(());
        queue.run(|device, command_buffer| {
            transition_result = maps.iter().try_for_each(|map| {
                map.image.record_transition(
                    device,
                    command_buffer,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                )
            });
        })?;
        transition_result?;

        log::debug!("Created {} shadow map(s) of {}x{}", count, size, size);
        Ok(Self {
            maps,
            sampler,
            render_pass,
            extent,
        })
    }

    /// Shadow render pass
    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    /// Map size
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Map for light `index`
    pub fn get(&self, index: usize) -> Option<&ShadowMap> {
        self.maps.get(index)
    }

    /// Descriptor infos for every map, in light order
    pub fn descriptor_infos(&self) -> Vec<vk::DescriptorImageInfo> {
        self.maps
            .iter()
            .map(|map| vk::DescriptorImageInfo {
                sampler: self.sampler.handle(),
                image_view: map.view(),
                image_layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            })
            .collect()
    }

    /// Number of maps
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// Whether there are no maps
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}
