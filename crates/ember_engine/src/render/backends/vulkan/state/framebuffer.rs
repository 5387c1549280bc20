//! Framebuffers and the attachments they reference
//!
//! [`RenderTargets`] holds the depth buffer and, with MSAA, the multisampled
//! colour target that resolves into the swapchain image. Both are sized to
//! the swapchain and rebuilt with it.

use ash::{vk, Device};

use crate::render::backends::vulkan::resources::image::{AllocatedImage, ImageDesc};
use crate::render::backends::vulkan::rendering::render_pass::ForwardPassDesc;
use crate::render::backends::vulkan::{LogicalDevice, VulkanError, VulkanResult};

/// Framebuffer wrapper with RAII cleanup
pub struct Framebuffer {
    device: Device,
    framebuffer: vk::Framebuffer,
}

impl Framebuffer {
    /// Create a single-layer framebuffer
    pub fn new(
        device: &Device,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe {
            device
                .create_framebuffer(&info, None)
                .map_err(VulkanError::driver("vkCreateFramebuffer"))?
        };
        Ok(Self {
            device: device.clone(),
            framebuffer,
        })
    }

    /// Framebuffer handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}

/// Depth buffer and optional MSAA colour target for the forward pass
pub struct RenderTargets {
    color: Option<AllocatedImage>,
    depth: AllocatedImage,
}

impl RenderTargets {
    /// Allocate targets of `extent` for `desc`
    pub fn new(device: &LogicalDevice, desc: &ForwardPassDesc, extent: vk::Extent2D) -> VulkanResult<Self> {
        let depth = AllocatedImage::new(device, ImageDesc::depth_attachment(extent, desc.depth_format, desc.samples))?;
        let color = if desc.multisampled() {
            Some(AllocatedImage::new(
                device,
                ImageDesc::msaa_color(extent, desc.color_format, desc.samples),
            )?)
        } else {
            None
        };
        log::debug!("Render targets {}x{} ({:?})", extent.width, extent.height, desc.samples);
        Ok(Self { color, depth })
    }

    /// Attachment list for a framebuffer presenting `swapchain_view`
    pub fn attachments(&self, swapchain_view: vk::ImageView) -> Vec<vk::ImageView> {
        forward_attachment_views(
            self.color.as_ref().map(AllocatedImage::view),
            self.depth.view(),
            swapchain_view,
        )
    }
}

/// Attachment order matching the forward render pass
pub fn forward_attachment_views(
    msaa_color: Option<vk::ImageView>,
    depth: vk::ImageView,
    swapchain_view: vk::ImageView,
) -> Vec<vk::ImageView> {
    match msaa_color {
        Some(color) => vec![color, depth, swapchain_view],
        None => vec![swapchain_view, depth],
    }
}

/// One framebuffer per swapchain image
pub struct SwapchainFramebuffers {
    framebuffers: Vec<Framebuffer>,
}

impl SwapchainFramebuffers {
    /// Build framebuffers for every swapchain image view
    pub fn new(
        device: &Device,
        render_pass: vk::RenderPass,
        targets: &RenderTargets,
        swapchain_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let framebuffers = swapchain_views
            .iter()
            .map(|&view| Framebuffer::new(device, render_pass, &targets.attachments(view), extent))
            .collect::<VulkanResult<Vec<_>>>()?;
        Ok(Self { framebuffers })
    }

    /// Framebuffer for `image_index`
    pub fn get(&self, image_index: u32) -> VulkanResult<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .map(Framebuffer::handle)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("No framebuffer for swapchain image {image_index}"),
            })
    }

    /// Number of framebuffers
    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    /// Whether there are no framebuffers
    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_attachment_order() {
        let color = vk::ImageView::from_raw(1);
        let depth = vk::ImageView::from_raw(2);
        let present = vk::ImageView::from_raw(3);

        assert_eq!(forward_attachment_views(Some(color), depth, present), vec![color, depth, present]);
        assert_eq!(forward_attachment_views(None, depth, present), vec![present, depth]);
    }
}
