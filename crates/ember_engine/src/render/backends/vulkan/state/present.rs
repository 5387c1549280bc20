//! Swapchain-backed frame driver
//!
//! [`PresentTarget`] owns every object that is tied to the swapchain: the
//! swapchain itself, the forward render targets, render pass, framebuffers
//! and forward pipeline, plus the per-slot command buffers and sync objects.
//! [`VulkanFrameDriver`] borrows it together with the context and window for
//! one frame and implements [`FrameDriver`] on top.

use ash::vk;
use std::path::PathBuf;

use crate::render::backends::vulkan::rendering::pipeline::GraphicsPipeline;
use crate::render::backends::vulkan::rendering::render_pass::{ForwardPassDesc, RenderPass};
use crate::render::backends::vulkan::state::frame_loop::{AcquireOutcome, FrameDriver, ImagesInFlight, PresentOutcome};
use crate::render::backends::vulkan::state::framebuffer::{RenderTargets, SwapchainFramebuffers};
use crate::render::backends::vulkan::state::swapchain::Swapchain;
use crate::render::backends::vulkan::state::sync::FrameSync;
use crate::render::backends::vulkan::{CommandPool, QueuePurpose, VulkanContext, VulkanError, VulkanResult, Window};
use crate::render::pipeline::{PipelineKind, RenderConfig};

/// Where the forward pipeline is rebuilt from
#[derive(Debug, Clone)]
pub struct ForwardPipelineSource {
    /// Loaded pipeline definitions
    pub config: RenderConfig,
    /// Name of the forward pipeline definition
    pub pipeline: String,
    /// Directory holding SPIR-V binaries
    pub shader_dir: PathBuf,
}

/// Swapchain and everything rebuilt with it, plus per-slot frame resources
pub struct PresentTarget {
    forward_pipeline: GraphicsPipeline,
    framebuffers: SwapchainFramebuffers,
    render_pass: RenderPass,
    // Referenced only through the framebuffers
    #[allow(dead_code)]
    targets: RenderTargets,
    swapchain: Swapchain,
    images_in_flight: ImagesInFlight,
    frames: Vec<FrameSync>,
    command_buffers: Vec<vk::CommandBuffer>,
    // Owns `command_buffers`
    #[allow(dead_code)]
    command_pool: CommandPool,
    pass_desc: ForwardPassDesc,
    source: ForwardPipelineSource,
}

impl PresentTarget {
    /// Create the swapchain chain at `extent` and `frames_in_flight` slots
    pub fn new(
        context: &VulkanContext,
        extent: vk::Extent2D,
        frames_in_flight: usize,
        source: ForwardPipelineSource,
    ) -> VulkanResult<Self> {
        let device = &context.device;
        let (_, graphics_family) = device.queue(QueuePurpose::Graphics)?;
        let command_pool = CommandPool::new(device.device.clone(), graphics_family)?;
        let command_buffers = command_pool.allocate_command_buffers(frames_in_flight as u32)?;
        let frames = (0..frames_in_flight)
            .map(|_| FrameSync::new(&device.device))
            .collect::<VulkanResult<Vec<_>>>()?;

        let swapchain = Swapchain::new(context, extent, None)?;
        let pass_desc = ForwardPassDesc {
            color_format: swapchain.format(),
            depth_format: context.physical_device.depth_format,
            samples: context.physical_device.msaa_samples,
        };
        let targets = RenderTargets::new(device, &pass_desc, swapchain.extent())?;
        let render_pass = RenderPass::forward(&device.device, &pass_desc)?;
        let framebuffers = SwapchainFramebuffers::new(
            &device.device,
            render_pass.handle(),
            &targets,
            swapchain.image_views(),
            swapchain.extent(),
        )?;
        let forward_pipeline = GraphicsPipeline::from_config(
            device,
            &source.config,
            &source.pipeline,
            PipelineKind::Forward,
            &source.shader_dir,
            &render_pass,
        )?;

        Ok(Self {
            forward_pipeline,
            framebuffers,
            render_pass,
            targets,
            images_in_flight: ImagesInFlight::new(swapchain.image_count()),
            swapchain,
            frames,
            command_buffers,
            command_pool,
            pass_desc,
            source,
        })
    }

    /// Rebuild swapchain, render targets, render pass, framebuffers and forward pipeline, in that order
    ///
    /// The device must be idle.
    pub fn rebuild(&mut self, context: &VulkanContext, extent: vk::Extent2D) -> VulkanResult<()> {
        let device = &context.device;

        let swapchain = Swapchain::new(context, extent, Some(&self.swapchain))?;
        let pass_desc = ForwardPassDesc {
            color_format: swapchain.format(),
            ..self.pass_desc
        };
        let targets = RenderTargets::new(device, &pass_desc, swapchain.extent())?;
        let render_pass = RenderPass::forward(&device.device, &pass_desc)?;
        let framebuffers = SwapchainFramebuffers::new(
            &device.device,
            render_pass.handle(),
            &targets,
            swapchain.image_views(),
            swapchain.extent(),
        )?;
        let forward_pipeline = GraphicsPipeline::from_config(
            device,
            &self.source.config,
            &self.source.pipeline,
            PipelineKind::Forward,
            &self.source.shader_dir,
            &render_pass,
        )?;

        self.forward_pipeline = forward_pipeline;
        self.framebuffers = framebuffers;
        self.render_pass = render_pass;
        self.targets = targets;
        self.swapchain = swapchain;
        self.images_in_flight.reset(self.swapchain.image_count());
        self.pass_desc = pass_desc;
        Ok(())
    }

    /// Current swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Forward render pass
    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    /// Framebuffer for a swapchain image
    pub fn framebuffer(&self, image_index: u32) -> VulkanResult<vk::Framebuffer> {
        self.framebuffers.get(image_index)
    }

    /// Forward pipeline
    pub fn forward_pipeline(&self) -> &GraphicsPipeline {
        &self.forward_pipeline
    }

    /// Forward pipeline, for recording descriptor writes
    pub fn forward_pipeline_mut(&mut self) -> &mut GraphicsPipeline {
        &mut self.forward_pipeline
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    fn frame(&self, slot: usize) -> VulkanResult<(&FrameSync, vk::CommandBuffer)> {
        match (self.frames.get(slot), self.command_buffers.get(slot)) {
            (Some(sync), Some(&command_buffer)) => Ok((sync, command_buffer)),
            _ => Err(VulkanError::InvalidOperation {
                reason: format!("Frame slot {slot} out of range"),
            }),
        }
    }
}

/// [`FrameDriver`] over a [`PresentTarget`] for the duration of one frame
pub struct VulkanFrameDriver<'a> {
    /// Swapchain-bound objects
    pub target: &'a mut PresentTarget,
    /// Device and queues
    pub context: &'a VulkanContext,
    /// Window pumped while minimized
    pub window: &'a mut Window,
}

impl FrameDriver for VulkanFrameDriver<'_> {
    fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()> {
        self.target.frame(slot)?.0.in_flight.wait(u64::MAX)
    }

    fn acquire_image(&mut self, slot: usize) -> VulkanResult<AcquireOutcome> {
        let (sync, _) = self.target.frame(slot)?;
        self.target.swapchain.acquire_next_image(sync.image_available.handle())
    }

    fn wait_for_image(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
        if let Some(previous) = self.target.images_in_flight.claim(image_index, slot) {
            log::trace!("Image {image_index} still owned by slot {previous}; waiting");
            self.target.frame(previous)?.0.in_flight.wait(u64::MAX)?;
        }
        Ok(())
    }

    fn begin_commands(&mut self, slot: usize) -> VulkanResult<vk::CommandBuffer> {
        let (_, command_buffer) = self.target.frame(slot)?;
        let device = self.context.raw_device();
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::driver("vkResetCommandBuffer"))?;
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::driver("vkBeginCommandBuffer"))?;
        }
        Ok(command_buffer)
    }

    fn submit_commands(&mut self, slot: usize, _image_index: u32) -> VulkanResult<()> {
        let (sync, command_buffer) = self.target.frame(slot)?;
        let device = self.context.raw_device();
        let (queue, _) = self.context.device.queue(QueuePurpose::Graphics)?;

        unsafe {
            device
                .end_command_buffer(command_buffer)
                .map_err(VulkanError::driver("vkEndCommandBuffer"))?;
        }

        let wait_semaphores = [sync.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [sync.render_finished.handle()];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        sync.in_flight.reset()?;
        unsafe {
            device
                .queue_submit(queue, &[submit_info], sync.in_flight.handle())
                .map_err(VulkanError::driver("vkQueueSubmit"))
        }
    }

    fn present_image(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentOutcome> {
        let (sync, _) = self.target.frame(slot)?;
        let (queue, _) = self.context.device.queue(QueuePurpose::Present)?;
        self.target
            .swapchain
            .present(queue, image_index, sync.render_finished.handle())
    }

    fn wait_for_drawable_extent(&mut self) -> VulkanResult<Option<vk::Extent2D>> {
        loop {
            let (width, height) = self.window.framebuffer_size();
            if width > 0 && height > 0 {
                return Ok(Some(vk::Extent2D { width, height }));
            }
            if self.window.should_close() {
                return Ok(None);
            }
            log::trace!("Framebuffer is {width}x{height}; waiting for events");
            self.window.wait_events();
        }
    }

    fn wait_device_idle(&mut self) -> VulkanResult<()> {
        self.context.wait_idle()
    }

    fn rebuild_swapchain(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
        self.target.rebuild(self.context, extent)
    }
}
