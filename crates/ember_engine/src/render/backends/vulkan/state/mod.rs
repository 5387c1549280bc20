//! Vulkan state management
//!
//! Swapchain, framebuffers, shadow maps, synchronization objects and the
//! frame-in-flight state machine that ties them together.

pub mod frame_loop;
pub mod framebuffer;
pub mod present;
pub mod shadow_map;
pub mod swapchain;
pub mod sync;

pub use frame_loop::{
    AcquireOutcome, FrameContext, FrameDriver, FrameLoop, FrameStatus, ImagesInFlight, PresentOutcome, SlotPhase,
};
pub use framebuffer::{Framebuffer, RenderTargets, SwapchainFramebuffers};
pub use present::{ForwardPipelineSource, PresentTarget, VulkanFrameDriver};
pub use shadow_map::{ShadowMap, ShadowMaps};
pub use swapchain::Swapchain;
pub use sync::{Fence, FrameSync, Semaphore};
