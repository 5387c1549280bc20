//! Instance, device and window setup

pub mod context;
pub mod window;

pub use context::{
    LogicalDevice, PhysicalDeviceInfo, QueueFamilies, QueuePurpose, VulkanContext, VulkanError,
    VulkanInstance, VulkanResult,
};
pub use window::{Window, WindowError, WindowSignal};
