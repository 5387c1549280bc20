//! Vulkan backend implementation
//!
//! Organized into initialization, resources, rendering and state modules.

/// Vulkan initialization types (instance, device, window)
pub mod initialization;

/// Vulkan resource management (buffers, images, descriptors, stores)
pub mod resources;

/// Vulkan rendering operations (shaders, pipelines, render passes, commands)
pub mod rendering;

/// Vulkan state management (swapchain, sync, frame loop)
pub mod state;

/// Main Vulkan renderer implementation
pub mod renderer;

pub use renderer::VulkanRenderer;

// Re-export core initialization types
pub use initialization::{
    LogicalDevice, PhysicalDeviceInfo, QueueFamilies, QueuePurpose, VulkanContext, VulkanError,
    VulkanInstance, VulkanResult, Window, WindowError, WindowSignal,
};

// Re-export resource types
pub use resources::{
    BufferView, GeometryStore, GpuBuffer, HostBuffer, MaterialDesc, MaterialHandle, MaterialKey,
    MaterialStore, MeshHandle, PushDescriptorLayout, StagingBuffer, TextureHandle, TextureStore,
    UniformArrayLayout, UniformBufferArray,
};

// Re-export rendering types
pub use rendering::{
    ActiveRenderPass, AdHocQueue, AdHocQueues, CommandPool, GraphicsPipeline, RenderPass,
    ShaderModule, ShadowPipeline,
};

// Re-export state types
pub use state::{FrameDriver, FrameLoop, FrameStatus, FrameSync, PresentTarget, Swapchain};
