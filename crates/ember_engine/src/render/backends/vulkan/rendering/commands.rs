//! Command buffer management
//!
//! [`CommandPool`] owns per-frame command buffers. [`AdHocQueue`] runs short
//! one-shot command sequences (buffer copies, texture uploads) and blocks
//! until the GPU has finished them. [`ActiveRenderPass`] ends a render pass
//! when it goes out of scope.

use ash::{vk, Device};

use crate::render::backends::vulkan::{LogicalDevice, QueuePurpose, VulkanError, VulkanResult};

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe {
            device.create_command_pool(&pool_create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, command_pool })
    }

    /// Allocate primary command buffers
    pub fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe {
            self.device.allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)
        }
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            // Destroying the pool frees its command buffers
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Recording state of an ad-hoc queue's single command buffer
#[derive(Debug, Default)]
pub struct AdHocState {
    recording: bool,
}

impl AdHocState {
    /// Enter the recording state; fails if a recording is outstanding
    pub fn start(&mut self, purpose: QueuePurpose) -> VulkanResult<()> {
        if self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{purpose:?} ad-hoc queue is already recording"),
            });
        }
        self.recording = true;
        Ok(())
    }

    /// Leave the recording state; fails if nothing was being recorded
    pub fn finish(&mut self, purpose: QueuePurpose) -> VulkanResult<()> {
        if !self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{purpose:?} ad-hoc queue has nothing to submit"),
            });
        }
        self.recording = false;
        Ok(())
    }

    /// Whether a recording is outstanding
    pub fn is_recording(&self) -> bool {
        self.recording
    }
}

/// Synchronous one-shot submission helper bound to one queue
///
/// A single command buffer is reused for every submission. `begin` hands it
/// out for recording, `submit_and_wait` submits it and blocks until the queue
/// is idle. Nested recordings are rejected.
pub struct AdHocQueue {
    device: Device,
    purpose: QueuePurpose,
    queue: vk::Queue,
    command_buffer: vk::CommandBuffer,
    state: AdHocState,
    // Declared last so the pool outlives the command buffer handle above
    pool: CommandPool,
}

impl AdHocQueue {
    /// Create an ad-hoc queue for `purpose`
    pub fn new(device: &LogicalDevice, purpose: QueuePurpose) -> VulkanResult<Self> {
        let (queue, family) = device.queue(purpose)?;
        let pool = CommandPool::new(device.device.clone(), family)?;
        let command_buffer = pool
            .allocate_command_buffers(1)?
            .pop()
            .ok_or_else(|| VulkanError::InitializationFailed("Empty command buffer allocation".to_string()))?;

        Ok(Self {
            device: device.device.clone(),
            purpose,
            queue,
            command_buffer,
            state: AdHocState::default(),
            pool,
        })
    }

    /// Reset the command buffer and start recording into it
    pub fn begin(&mut self) -> VulkanResult<vk::CommandBuffer> {
        self.state.start(self.purpose)?;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        let result = unsafe {
            self.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .and_then(|()| self.device.begin_command_buffer(self.command_buffer, &begin_info))
        };
        if let Err(err) = result {
            // Leave the queue usable; the buffer is reset again on the next begin
            let _ = self.state.finish(self.purpose);
            return Err(VulkanError::Driver { operation: "vkBeginCommandBuffer", result: err });
        }

        Ok(self.command_buffer)
    }

    /// End recording, submit and block until the queue is idle
    pub fn submit_and_wait(&mut self) -> VulkanResult<()> {
        self.state.finish(self.purpose)?;

        let command_buffers = [self.command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        unsafe {
            self.device
                .end_command_buffer(self.command_buffer)
                .map_err(VulkanError::driver("vkEndCommandBuffer"))?;
            self.device
                .queue_submit(self.queue, &[submit_info.build()], vk::Fence::null())
                .map_err(VulkanError::driver("vkQueueSubmit (ad-hoc)"))?;
            self.device
                .queue_wait_idle(self.queue)
                .map_err(VulkanError::driver("vkQueueWaitIdle"))?;
        }

        log::trace!("{:?} ad-hoc submission complete", self.purpose);
        Ok(())
    }

    /// Record with `record`, then submit and wait
    pub fn run(&mut self, record: impl FnOnce(&Device, vk::CommandBuffer)) -> VulkanResult<()> {
        let command_buffer = self.begin()?;
        record(&self.device, command_buffer);
        self.submit_and_wait()
    }

    /// Queue purpose this helper submits to
    pub fn purpose(&self) -> QueuePurpose {
        self.purpose
    }

    /// Underlying pool handle
    pub fn pool(&self) -> vk::CommandPool {
        self.pool.handle()
    }
}

/// The ad-hoc queues the renderer keeps around
pub struct AdHocQueues {
    /// Layout transitions and texture uploads
    pub graphics: AdHocQueue,
    /// Buffer copies
    pub transfer: AdHocQueue,
}

impl AdHocQueues {
    /// Create the graphics and transfer helpers
    pub fn new(device: &LogicalDevice) -> VulkanResult<Self> {
        Ok(Self {
            graphics: AdHocQueue::new(device, QueuePurpose::Graphics)?,
            transfer: AdHocQueue::new(device, QueuePurpose::Transfer)?,
        })
    }
}

/// Render pass scope; ends the pass on drop
pub struct ActiveRenderPass<'a> {
    device: &'a Device,
    command_buffer: vk::CommandBuffer,
}

impl<'a> ActiveRenderPass<'a> {
    /// Begin `render_pass` on `command_buffer`
    pub fn begin(
        device: &'a Device,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) -> Self {
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(clear_values);

        unsafe {
            device.cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE);
        }

        Self { device, command_buffer }
    }

    /// Set a full-extent viewport and scissor
    pub fn set_viewport(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.device.cmd_set_viewport(self.command_buffer, 0, &[viewport]);
            self.device.cmd_set_scissor(self.command_buffer, 0, &[scissor]);
        }
    }

    /// Command buffer being recorded
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}

impl Drop for ActiveRenderPass<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device.cmd_end_render_pass(self.command_buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_while_recording_is_rejected() {
        let mut state = AdHocState::default();
        state.start(QueuePurpose::Transfer).unwrap();
        let err = state.start(QueuePurpose::Transfer).unwrap_err();
        assert!(matches!(err, VulkanError::InvalidOperation { .. }));
        assert!(state.is_recording());
    }

    #[test]
    fn test_submit_without_begin_is_rejected() {
        let mut state = AdHocState::default();
        assert!(state.finish(QueuePurpose::Graphics).is_err());
    }

    #[test]
    fn test_queue_reusable_after_submit() {
        let mut state = AdHocState::default();
        for _ in 0..3 {
            state.start(QueuePurpose::Graphics).unwrap();
            state.finish(QueuePurpose::Graphics).unwrap();
        }
        assert!(!state.is_recording());
    }
}
