//! Frame-in-flight state machine
//!
//! [`FrameLoop`] sequences one frame on slot `F = frame_index`:
//!
//! ```text
//! Idle -> Acquiring -> Recording -> Submitted -> Presenting -> Idle
//! ```
//!
//! - wait for slot F's in-flight fence, then acquire an image
//! - an out-of-date acquire aborts the frame, recreates the swapchain and
//!   leaves the frame index where it was
//! - a suboptimal acquire renders normally and schedules recreation
//! - after recording, the fence is reset and the work submitted
//! - a stale present schedules recreation; the index advances regardless
//!
//! Scheduled recreation runs at the start of the next frame. All GPU and
//! window interaction goes through [`FrameDriver`], so the sequencing can be
//! exercised without a device.

use ash::vk;

use crate::core::MAX_FRAMES_IN_FLIGHT;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Result of asking the swapchain for an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is available
    Acquired {
        /// Swapchain image index
        image_index: u32,
        /// The swapchain still works but no longer matches the surface
        suboptimal: bool,
    },
    /// The swapchain can no longer be used
    OutOfDate,
}

/// Result of queueing an image for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented on a matching swapchain
    Presented,
    /// Presented (or dropped) on a swapchain that needs recreation
    Stale,
}

/// What happened during [`FrameLoop::run_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Frame rendered and presented
    Presented,
    /// Frame presented; the swapchain will be rebuilt before the next one
    RecreateScheduled,
    /// Acquire found the swapchain out of date; it was rebuilt and nothing was rendered
    SwapchainRecreated,
    /// The window closed while waiting for a drawable size; nothing was rendered
    WindowClosed,
}

/// Lifecycle phase of one frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotPhase {
    /// Nothing outstanding; the slot's fence has been waited on
    #[default]
    Idle,
    /// Fence waited, acquiring a swapchain image
    Acquiring,
    /// Command buffer is being recorded
    Recording,
    /// Work handed to the graphics queue, present not yet accepted
    Submitted,
    /// Image queued for presentation; the slot stays here until its next turn
    Presenting,
}

/// Per-frame identifiers handed to the recording callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    /// Frame-in-flight slot
    pub slot: usize,
    /// Acquired swapchain image
    pub image_index: u32,
    /// Slot's command buffer, already begun
    pub command_buffer: vk::CommandBuffer,
}

/// GPU and window operations the frame loop sequences
pub trait FrameDriver {
    /// Block until slot `slot`'s previous submission has finished
    fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()>;

    /// Acquire the next image, signalling the slot's image-available semaphore
    fn acquire_image(&mut self, slot: usize) -> VulkanResult<AcquireOutcome>;

    /// Block until no other slot is still rendering to `image_index`
    fn wait_for_image(&mut self, slot: usize, image_index: u32) -> VulkanResult<()>;

    /// Reset and begin the slot's command buffer
    fn begin_commands(&mut self, slot: usize) -> VulkanResult<vk::CommandBuffer>;

    /// End recording, reset the slot's fence and submit
    fn submit_commands(&mut self, slot: usize, image_index: u32) -> VulkanResult<()>;

    /// Present `image_index` after the slot's render-finished semaphore
    fn present_image(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentOutcome>;

    /// Block until the framebuffer has a non-zero size; `None` if the window closed meanwhile
    fn wait_for_drawable_extent(&mut self) -> VulkanResult<Option<vk::Extent2D>>;

    /// Block until the device is idle
    fn wait_device_idle(&mut self) -> VulkanResult<()>;

    /// Rebuild the swapchain and everything that depends on it
    fn rebuild_swapchain(&mut self, extent: vk::Extent2D) -> VulkanResult<()>;
}

/// Round-robin frame-in-flight sequencer
#[derive(Debug, Clone)]
pub struct FrameLoop {
    phases: Vec<SlotPhase>,
    frame_index: usize,
    recreate_pending: bool,
}

impl FrameLoop {
    /// Loop over `frames_in_flight` slots (1 to [`MAX_FRAMES_IN_FLIGHT`])
    pub fn new(frames_in_flight: usize) -> VulkanResult<Self> {
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&frames_in_flight) {
            return Err(VulkanError::InvalidOperation {
                reason: format!("frames in flight must be 1..={MAX_FRAMES_IN_FLIGHT}, got {frames_in_flight}"),
            });
        }
        Ok(Self {
            phases: vec![SlotPhase::Idle; frames_in_flight],
            frame_index: 0,
            recreate_pending: false,
        })
    }

    /// Slot the next frame will use
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Number of slots
    pub fn frames_in_flight(&self) -> usize {
        self.phases.len()
    }

    /// Current phase of `slot`
    pub fn phase(&self, slot: usize) -> Option<SlotPhase> {
        self.phases.get(slot).copied()
    }

    /// Rebuild the swapchain before the next frame (window resized)
    pub fn request_recreate(&mut self) {
        self.recreate_pending = true;
    }

    /// Whether a rebuild is scheduled
    pub fn recreate_pending(&self) -> bool {
        self.recreate_pending
    }

    /// Run one frame, calling `record` between begin and submit
    pub fn run_frame<D, F>(&mut self, driver: &mut D, record: F) -> VulkanResult<FrameStatus>
    where
        D: FrameDriver,
        F: FnOnce(&mut D, &FrameContext) -> VulkanResult<()>,
    {
        if self.recreate_pending && !self.recreate(driver)? {
            return Ok(FrameStatus::WindowClosed);
        }

        let slot = self.frame_index;
        driver.wait_for_slot(slot)?;
        self.phases[slot] = SlotPhase::Acquiring;

        let (image_index, suboptimal) = match driver.acquire_image(slot)? {
            AcquireOutcome::Acquired { image_index, suboptimal } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                log::warn!("Swapchain out of date on acquire (slot {slot}); recreating");
                self.phases[slot] = SlotPhase::Idle;
                return Ok(if self.recreate(driver)? {
                    FrameStatus::SwapchainRecreated
                } else {
                    FrameStatus::WindowClosed
                });
            }
        };
        if suboptimal {
            log::debug!("Suboptimal acquire (slot {slot}); recreation scheduled");
            self.recreate_pending = true;
        }
        driver.wait_for_image(slot, image_index)?;

        self.phases[slot] = SlotPhase::Recording;
        let command_buffer = driver.begin_commands(slot)?;
        let frame = FrameContext {
            slot,
            image_index,
            command_buffer,
        };
        record(driver, &frame)?;

        driver.submit_commands(slot, image_index)?;
        self.phases[slot] = SlotPhase::Submitted;

        let outcome = driver.present_image(slot, image_index)?;
        self.phases[slot] = SlotPhase::Presenting;
        self.frame_index = (self.frame_index + 1) % self.phases.len();

        log::trace!("Frame on slot {slot} presented image {image_index} ({outcome:?})");
        match outcome {
            PresentOutcome::Stale => {
                log::warn!("Swapchain stale on present; recreation scheduled");
                self.recreate_pending = true;
                Ok(FrameStatus::RecreateScheduled)
            }
            PresentOutcome::Presented if self.recreate_pending => Ok(FrameStatus::RecreateScheduled),
            PresentOutcome::Presented => Ok(FrameStatus::Presented),
        }
    }

    /// Wait for a drawable size, idle the device and rebuild; `false` if the window closed
    fn recreate<D: FrameDriver>(&mut self, driver: &mut D) -> VulkanResult<bool> {
        let Some(extent) = driver.wait_for_drawable_extent()? else {
            return Ok(false);
        };
        driver.wait_device_idle()?;
        driver.rebuild_swapchain(extent)?;
        self.recreate_pending = false;
        log::debug!("Swapchain recreated at {}x{}", extent.width, extent.height);
        Ok(true)
    }
}

/// Which slot last rendered to each swapchain image
#[derive(Debug, Clone, Default)]
pub struct ImagesInFlight {
    owners: Vec<Option<usize>>,
}

impl ImagesInFlight {
    /// Tracker for `image_count` images, none in flight
    pub fn new(image_count: usize) -> Self {
        Self {
            owners: vec![None; image_count],
        }
    }

    /// Forget all owners after the swapchain changed
    pub fn reset(&mut self, image_count: usize) {
        self.owners = vec![None; image_count];
    }

    /// Give `image_index` to `slot`; returns another slot whose fence must be waited first
    pub fn claim(&mut self, image_index: u32, slot: usize) -> Option<usize> {
        let owner = self.owners.get_mut(image_index as usize)?;
        let previous = owner.replace(slot);
        previous.filter(|&previous| previous != slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        WaitSlot(usize),
        Acquire(usize),
        WaitImage(usize, u32),
        Begin(usize),
        Record(usize, u32),
        Submit(usize, u32),
        Present(usize, u32),
        WaitExtent,
        WaitIdle,
        Rebuild,
    }

    /// Scripted driver: acquires hand out images round-robin unless overridden
    struct ScriptedDriver {
        calls: Vec<Call>,
        acquires: VecDeque<AcquireOutcome>,
        presents: VecDeque<PresentOutcome>,
        extents: VecDeque<Option<vk::Extent2D>>,
        image_count: u32,
        next_image: u32,
        fail_present: bool,
    }

    impl ScriptedDriver {
        fn new(image_count: u32) -> Self {
            Self {
                calls: Vec::new(),
                acquires: VecDeque::new(),
                presents: VecDeque::new(),
                extents: VecDeque::new(),
                image_count,
                next_image: 0,
                fail_present: false,
            }
        }

        fn take_calls(&mut self) -> Vec<Call> {
            std::mem::take(&mut self.calls)
        }
    }

    impl FrameDriver for ScriptedDriver {
        fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::WaitSlot(slot));
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> VulkanResult<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            Ok(self.acquires.pop_front().unwrap_or_else(|| {
                let image_index = self.next_image;
                self.next_image = (self.next_image + 1) % self.image_count;
                AcquireOutcome::Acquired { image_index, suboptimal: false }
            }))
        }

        fn wait_for_image(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
            self.calls.push(Call::WaitImage(slot, image_index));
            Ok(())
        }

        fn begin_commands(&mut self, slot: usize) -> VulkanResult<vk::CommandBuffer> {
            self.calls.push(Call::Begin(slot));
            Ok(vk::CommandBuffer::null())
        }

        fn submit_commands(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
            self.calls.push(Call::Submit(slot, image_index));
            Ok(())
        }

        fn present_image(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            if self.fail_present {
                return Err(VulkanError::InvalidOperation { reason: "present lost".to_string() });
            }
            Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn wait_for_drawable_extent(&mut self) -> VulkanResult<Option<vk::Extent2D>> {
            self.calls.push(Call::WaitExtent);
            Ok(self
                .extents
                .pop_front()
                .unwrap_or(Some(vk::Extent2D { width: 800, height: 600 })))
        }

        fn wait_device_idle(&mut self) -> VulkanResult<()> {
            self.calls.push(Call::WaitIdle);
            Ok(())
        }

        fn rebuild_swapchain(&mut self, _extent: vk::Extent2D) -> VulkanResult<()> {
            self.calls.push(Call::Rebuild);
            Ok(())
        }
    }

    fn record(driver: &mut ScriptedDriver, frame: &FrameContext) -> VulkanResult<()> {
        driver.calls.push(Call::Record(frame.slot, frame.image_index));
        Ok(())
    }

    #[test]
    fn test_frame_index_cycles() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut driver = ScriptedDriver::new(3);

        let mut slots = Vec::new();
        for _ in 0..5 {
            slots.push(frames.frame_index());
            assert_eq!(frames.run_frame(&mut driver, record).unwrap(), FrameStatus::Presented);
            assert!(frames.frame_index() < frames.frames_in_flight());
        }
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_single_frame_call_order() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut driver = ScriptedDriver::new(3);
        frames.run_frame(&mut driver, record).unwrap();

        assert_eq!(
            driver.take_calls(),
            vec![
                Call::WaitSlot(0),
                Call::Acquire(0),
                Call::WaitImage(0, 0),
                Call::Begin(0),
                Call::Record(0, 0),
                Call::Submit(0, 0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(frames.phase(0), Some(SlotPhase::Presenting));
        assert_eq!(frames.phase(1), Some(SlotPhase::Idle));
    }

    #[test]
    fn test_failed_present_leaves_slot_submitted() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut driver = ScriptedDriver::new(3);
        driver.fail_present = true;

        assert!(frames.run_frame(&mut driver, record).is_err());
        assert_eq!(frames.phase(0), Some(SlotPhase::Submitted));
        assert_eq!(frames.frame_index(), 0);
    }

    #[test]
    fn test_out_of_date_acquire_returns_slot_to_idle() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut driver = ScriptedDriver::new(3);
        frames.run_frame(&mut driver, record).unwrap();
        frames.run_frame(&mut driver, record).unwrap();
        assert_eq!(frames.phase(0), Some(SlotPhase::Presenting));

        driver.acquires.push_back(AcquireOutcome::OutOfDate);
        frames.run_frame(&mut driver, record).unwrap();
        assert_eq!(frames.phase(0), Some(SlotPhase::Idle));
        assert_eq!(frames.phase(1), Some(SlotPhase::Presenting));
    }

    #[test]
    fn test_out_of_date_acquire_keeps_index() {
        let mut frames = FrameLoop::new(3).unwrap();
        let mut driver = ScriptedDriver::new(3);
        frames.run_frame(&mut driver, record).unwrap();
        assert_eq!(frames.frame_index(), 1);
        driver.take_calls();

        driver.acquires.push_back(AcquireOutcome::OutOfDate);
        let status = frames.run_frame(&mut driver, record).unwrap();
        assert_eq!(status, FrameStatus::SwapchainRecreated);
        assert_eq!(frames.frame_index(), 1);
        assert_eq!(
            driver.take_calls(),
            vec![
                Call::WaitSlot(1),
                Call::Acquire(1),
                Call::WaitExtent,
                Call::WaitIdle,
                Call::Rebuild,
            ]
        );

        frames.run_frame(&mut driver, record).unwrap();
        let calls = driver.take_calls();
        assert_eq!(calls[0], Call::WaitSlot(1));
        assert_eq!(calls[1], Call::Acquire(1));
        assert_eq!(frames.frame_index(), 2);
    }

    #[test]
    fn test_stale_present_advances_and_recreates_next_frame() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut driver = ScriptedDriver::new(3);
        driver.presents.push_back(PresentOutcome::Stale);

        assert_eq!(frames.run_frame(&mut driver, record).unwrap(), FrameStatus::RecreateScheduled);
        assert_eq!(frames.frame_index(), 1);
        assert!(frames.recreate_pending());
        driver.take_calls();

        assert_eq!(frames.run_frame(&mut driver, record).unwrap(), FrameStatus::Presented);
        let calls = driver.take_calls();
        assert_eq!(&calls[..4], &[Call::WaitExtent, Call::WaitIdle, Call::Rebuild, Call::WaitSlot(1)]);
        assert!(!frames.recreate_pending());
    }

    #[test]
    fn test_suboptimal_acquire_still_renders() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut driver = ScriptedDriver::new(3);
        driver.acquires.push_back(AcquireOutcome::Acquired { image_index: 2, suboptimal: true });

        let status = frames.run_frame(&mut driver, record).unwrap();
        assert_eq!(status, FrameStatus::RecreateScheduled);
        let calls = driver.take_calls();
        assert!(calls.contains(&Call::Record(0, 2)));
        assert!(calls.contains(&Call::Present(0, 2)));
        assert!(!calls.contains(&Call::Rebuild));
    }

    #[test]
    fn test_resize_request_rebuilds_before_acquire() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut driver = ScriptedDriver::new(3);
        frames.request_recreate();

        frames.run_frame(&mut driver, record).unwrap();
        let calls = driver.take_calls();
        assert_eq!(&calls[..3], &[Call::WaitExtent, Call::WaitIdle, Call::Rebuild]);
        assert_eq!(calls[3], Call::WaitSlot(0));
    }

    #[test]
    fn test_closed_while_minimized() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut driver = ScriptedDriver::new(3);
        driver.extents.push_back(None);
        frames.request_recreate();

        assert_eq!(frames.run_frame(&mut driver, record).unwrap(), FrameStatus::WindowClosed);
        assert_eq!(driver.take_calls(), vec![Call::WaitExtent]);
        assert!(frames.recreate_pending());
        assert_eq!(frames.frame_index(), 0);
    }

    #[test]
    fn test_record_error_propagates() {
        let mut frames = FrameLoop::new(2).unwrap();
        let mut driver = ScriptedDriver::new(3);
        let result = frames.run_frame(&mut driver, |_, _| {
            Err(VulkanError::InvalidOperation { reason: "boom".to_string() })
        });
        assert!(result.is_err());
        assert!(!driver.calls.iter().any(|call| matches!(call, Call::Submit(..))));
    }

    #[test]
    fn test_frames_in_flight_bounds() {
        assert!(FrameLoop::new(0).is_err());
        assert!(FrameLoop::new(MAX_FRAMES_IN_FLIGHT + 1).is_err());
        assert!(FrameLoop::new(MAX_FRAMES_IN_FLIGHT).is_ok());
    }

    #[test]
    fn test_images_in_flight() {
        let mut images = ImagesInFlight::new(3);
        assert_eq!(images.claim(0, 0), None);
        assert_eq!(images.claim(1, 1), None);
        // Image 0 comes back while slot 0 may still be rendering it
        assert_eq!(images.claim(0, 1), Some(0));
        assert_eq!(images.claim(0, 1), None);
        assert_eq!(images.claim(7, 0), None);

        images.reset(2);
        assert_eq!(images.claim(1, 0), None);
    }
}
