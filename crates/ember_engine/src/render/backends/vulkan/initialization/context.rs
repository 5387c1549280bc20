//! Vulkan context management
//!
//! Owns the instance, the optional presentation surface, the selected
//! physical device, the logical device with its queues, and the memory
//! allocator. Everything else in the backend borrows from here.
//!
//! Destruction order is allocator, device, surface, instance. Every resource
//! created from the context must be dropped before it.

use ash::{Device, Entry, Instance};
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{PushDescriptor, Surface, Swapchain as SwapchainLoader};
use ash::vk;
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ConfigError;
use crate::core::VulkanRendererConfig;
use super::window::{Window, WindowError};

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// A driver call failed during a named operation
    #[error("{operation} failed: {result:?}")]
    Driver {
        /// What was being attempted
        operation: &'static str,
        /// Driver result code
        result: vk::Result,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// A fixed-capacity resource is full
    #[error("{resource} exhausted: requested {requested} bytes, {available} of {capacity} available")]
    ResourceExhausted {
        /// Which resource
        resource: &'static str,
        /// Bytes requested
        requested: u64,
        /// Bytes still free
        available: u64,
        /// Total capacity
        capacity: u64,
    },

    /// Write outside a buffer's bounds
    #[error("Write of {len} bytes at offset {offset} exceeds buffer capacity {capacity}")]
    RangeViolation {
        /// Write offset
        offset: u64,
        /// Write length
        len: u64,
        /// Buffer size
        capacity: u64,
    },

    /// A shader binary is missing or unreadable
    #[error("Shader not found: {path:?}")]
    ShaderNotFound {
        /// Path that was tried
        path: std::path::PathBuf,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Configuration error surfaced while building GPU objects
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Window system error
    #[error(transparent)]
    Window(#[from] WindowError),
}

impl VulkanError {
    /// Adapter for `map_err` that names the failing operation
    pub fn driver(operation: &'static str) -> impl Fn(vk::Result) -> Self {
        move |result| Self::Driver { operation, result }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Which queue a piece of work goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueuePurpose {
    /// Graphics work and layout transitions
    Graphics,
    /// Presentation
    Present,
    /// Buffer copies
    Transfer,
}

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create a new Vulkan instance, optionally with validation layers
    pub fn new(required_extensions: &[String], app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let app_name_cstr = c_string(app_name)?;
        let engine_name_cstr = c_string("Ember")?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let cstr_extensions = required_extensions
            .iter()
            .map(|ext| c_string(ext))
            .collect::<VulkanResult<Vec<_>>>()?;
        let mut extensions: Vec<*const std::os::raw::c_char> =
            cstr_extensions.iter().map(|ext| ext.as_ptr()).collect();
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![c_string("VK_LAYER_KHRONOS_validation")?]
        } else {
            Vec::new()
        };
        let layer_ptrs: Vec<*const std::os::raw::c_char> =
            layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe {
            entry.create_instance(&create_info, None)
                .map_err(VulkanError::driver("vkCreateInstance"))?
        };

        let debug = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils)?;
            Some((debug_utils, messenger))
        } else {
            None
        };

        log::debug!("Created Vulkan instance (validation: {})", enable_validation);
        Ok(Self { entry, instance, debug })
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils.create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn c_string(value: &str) -> VulkanResult<CString> {
    CString::new(value)
        .map_err(|_| VulkanError::InitializationFailed(format!("Interior NUL in {value:?}")))
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Highest sample count present in `supported` that does not exceed `max_samples`
pub fn select_sample_count(supported: vk::SampleCountFlags, max_samples: u32) -> vk::SampleCountFlags {
    const CANDIDATES: [(u32, vk::SampleCountFlags); 7] = [
        (64, vk::SampleCountFlags::TYPE_64),
        (32, vk::SampleCountFlags::TYPE_32),
        (16, vk::SampleCountFlags::TYPE_16),
        (8, vk::SampleCountFlags::TYPE_8),
        (4, vk::SampleCountFlags::TYPE_4),
        (2, vk::SampleCountFlags::TYPE_2),
        (1, vk::SampleCountFlags::TYPE_1),
    ];

    CANDIDATES
        .iter()
        .find(|(count, flag)| *count <= max_samples && supported.contains(*flag))
        .map_or(vk::SampleCountFlags::TYPE_1, |(_, flag)| *flag)
}

/// Queue family indices chosen for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Family used for graphics
    pub graphics: u32,
    /// Family used for presentation (None when headless)
    pub present: Option<u32>,
    /// Family used for buffer copies; a dedicated transfer family when one exists
    pub transfer: u32,
}

impl QueueFamilies {
    /// Pick families from queue family properties
    ///
    /// `supports_present` reports surface support per family index.
    pub fn choose(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> VulkanResult<bool>,
        need_present: bool,
    ) -> VulkanResult<Option<Self>> {
        let mut graphics = None;
        let mut present = None;
        let mut dedicated_transfer = None;

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if family.queue_count == 0 {
                continue;
            }
            let flags = family.queue_flags;

            if flags.contains(vk::QueueFlags::GRAPHICS) && graphics.is_none() {
                graphics = Some(index);
            }
            if flags.contains(vk::QueueFlags::TRANSFER)
                && !flags.contains(vk::QueueFlags::GRAPHICS)
                && !flags.contains(vk::QueueFlags::COMPUTE)
                && dedicated_transfer.is_none()
            {
                dedicated_transfer = Some(index);
            }
            if need_present && present.is_none() && supports_present(index)? {
                present = Some(index);
            }
        }

        let Some(graphics) = graphics else {
            return Ok(None);
        };
        if need_present && present.is_none() {
            return Ok(None);
        }

        Ok(Some(Self {
            graphics,
            present,
            transfer: dedicated_transfer.unwrap_or(graphics),
        }))
    }

    /// Distinct family indices, graphics first
    pub fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics];
        for family in [self.present, Some(self.transfer)].into_iter().flatten() {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Chosen queue families
    pub queue_families: QueueFamilies,
    /// MSAA sample count used by the forward pass
    pub msaa_samples: vk::SampleCountFlags,
    /// Depth format for depth buffers and shadow maps
    pub depth_format: vk::Format,
}

impl PhysicalDeviceInfo {
    /// Select the first device that can run the renderer, preferring discrete GPUs
    pub fn select_suitable_device(
        instance: &Instance,
        surface: Option<(vk::SurfaceKHR, &Surface)>,
        max_msaa_samples: u32,
    ) -> VulkanResult<Self> {
        let mut devices = unsafe {
            instance.enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };

        devices.sort_by_key(|&device| {
            let properties = unsafe { instance.get_physical_device_properties(device) };
            match properties.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                _ => 2,
            }
        });

        for device in devices {
            match Self::evaluate_device(instance, device, surface, max_msaa_samples) {
                Ok(Some(info)) => {
                    log::info!(
                        "Selected GPU: {} (MSAA {:?}, depth {:?})",
                        unsafe { CStr::from_ptr(info.properties.device_name.as_ptr()).to_string_lossy() },
                        info.msaa_samples,
                        info.depth_format
                    );
                    return Ok(info);
                }
                Ok(None) => {}
                Err(err) => log::debug!("Skipping device {:?}: {}", device, err),
            }
        }

        Err(VulkanError::InitializationFailed("No suitable GPU found".to_string()))
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: Option<(vk::SurfaceKHR, &Surface)>,
        max_msaa_samples: u32,
    ) -> VulkanResult<Option<Self>> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let queue_families = QueueFamilies::choose(
            &families,
            |index| match surface {
                Some((surface, loader)) => unsafe {
                    loader.get_physical_device_surface_support(device, index, surface)
                        .map_err(VulkanError::Api)
                },
                None => Ok(false),
            },
            surface.is_some(),
        )?;
        let Some(queue_families) = queue_families else {
            return Ok(None);
        };

        let available = unsafe {
            instance.enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };
        let has_extension = |required: &CStr| {
            available.iter().any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == required)
        };
        if !has_extension(PushDescriptor::name()) {
            return Ok(None);
        }
        if surface.is_some() && !has_extension(SwapchainLoader::name()) {
            return Ok(None);
        }

        let Some(depth_format) = find_depth_format(instance, device) else {
            return Ok(None);
        };

        let limits = &properties.limits;
        let msaa_samples = select_sample_count(
            limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts,
            max_msaa_samples,
        );

        Ok(Some(Self {
            device,
            properties,
            features,
            queue_families,
            msaa_samples,
            depth_format,
        }))
    }

    /// Required alignment for dynamic uniform buffer offsets
    pub fn min_uniform_buffer_offset_alignment(&self) -> u64 {
        self.properties.limits.min_uniform_buffer_offset_alignment
    }
}

/// First depth format usable both as an attachment and as a sampled image
fn find_depth_format(instance: &Instance, device: vk::PhysicalDevice) -> Option<vk::Format> {
    let required = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT | vk::FormatFeatureFlags::SAMPLED_IMAGE;
    [vk::Format::D32_SFLOAT, vk::Format::D32_SFLOAT_S8_UINT, vk::Format::D24_UNORM_S8_UINT]
        .into_iter()
        .find(|&format| {
            let props = unsafe { instance.get_physical_device_format_properties(device, format) };
            props.optimal_tiling_features.contains(required)
        })
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    allocator: ManuallyDrop<Arc<vk_mem::Allocator>>,
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue (None when headless)
    pub present_queue: Option<vk::Queue>,
    /// Transfer queue
    pub transfer_queue: vk::Queue,
    /// Queue family indices
    pub queue_families: QueueFamilies,
    /// Swapchain extension loader
    pub swapchain_loader: Option<SwapchainLoader>,
    /// Push descriptor extension loader
    pub push_descriptor: PushDescriptor,
}

impl LogicalDevice {
    /// Create a new logical device with required queues and an allocator
    pub fn new(instance: &Instance, physical_device: &PhysicalDeviceInfo, with_swapchain: bool) -> VulkanResult<Self> {
        let families = physical_device.queue_families;
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let mut extensions = vec![PushDescriptor::name().as_ptr()];
        if with_swapchain {
            extensions.push(SwapchainLoader::name().as_ptr());
        }

        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(physical_device.features.sampler_anisotropy == vk::TRUE)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance.create_device(physical_device.device, &create_info, None)
                .map_err(VulkanError::driver("vkCreateDevice"))?
        };

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = families.present.map(|family| unsafe { device.get_device_queue(family, 0) });
        let transfer_queue = unsafe { device.get_device_queue(families.transfer, 0) };

        let swapchain_loader = with_swapchain.then(|| SwapchainLoader::new(instance, &device));
        let push_descriptor = PushDescriptor::new(instance, &device);

        #[allow(unused_unsafe)]
        let allocator = unsafe {
            vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(
                instance,
                &device,
                physical_device.device,
            ))
        };
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(err) => {
                unsafe { device.destroy_device(None) };
                return Err(VulkanError::Driver { operation: "vmaCreateAllocator", result: err });
            }
        };

        Ok(Self {
            allocator: ManuallyDrop::new(Arc::new(allocator)),
            device,
            graphics_queue,
            present_queue,
            transfer_queue,
            queue_families: families,
            swapchain_loader,
            push_descriptor,
        })
    }

    /// Shared handle to the memory allocator
    pub fn allocator(&self) -> &Arc<vk_mem::Allocator> {
        &self.allocator
    }

    /// Queue and family index for a purpose
    pub fn queue(&self, purpose: QueuePurpose) -> VulkanResult<(vk::Queue, u32)> {
        match purpose {
            QueuePurpose::Graphics => Ok((self.graphics_queue, self.queue_families.graphics)),
            QueuePurpose::Transfer => Ok((self.transfer_queue, self.queue_families.transfer)),
            QueuePurpose::Present => match (self.present_queue, self.queue_families.present) {
                (Some(queue), Some(family)) => Ok((queue, family)),
                _ => Err(VulkanError::InvalidOperation {
                    reason: "No present queue on a headless device".to_string(),
                }),
            },
        }
    }

    /// Sharing mode and family list for buffers touched by both graphics and transfer queues
    pub fn buffer_sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        let families = self.queue_families;
        if families.graphics == families.transfer {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        } else {
            (vk::SharingMode::CONCURRENT, vec![families.graphics, families.transfer])
        }
    }

    /// Swapchain loader, if the device was created for presentation
    pub fn swapchain_loader(&self) -> VulkanResult<&SwapchainLoader> {
        self.swapchain_loader.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Device was created without swapchain support".to_string(),
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            if Arc::strong_count(&self.allocator) > 1 {
                log::warn!("Allocator still shared at device teardown; GPU memory may leak");
            }
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
    }
}

/// Main Vulkan context that owns all core Vulkan resources
pub struct VulkanContext {
    surface: Option<(vk::SurfaceKHR, Surface)>,
    /// Selected physical device information
    pub physical_device: PhysicalDeviceInfo,
    /// Logical device, queues and allocator
    pub device: LogicalDevice,
    /// Vulkan instance and debug utilities
    pub instance: VulkanInstance,
}

impl VulkanContext {
    /// Create a context that can present to `window`
    pub fn new(window: &mut Window, config: &VulkanRendererConfig) -> VulkanResult<Self> {
        let extensions = window.required_instance_extensions()?;
        let instance = VulkanInstance::new(&extensions, &config.application_name, config.validation_enabled())?;

        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = window.create_vulkan_surface(instance.instance.handle())?;

        let physical_device = match PhysicalDeviceInfo::select_suitable_device(
            &instance.instance,
            Some((surface, &surface_loader)),
            config.max_msaa_samples,
        ) {
            Ok(info) => info,
            Err(err) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(err);
            }
        };

        let device = match LogicalDevice::new(&instance.instance, &physical_device, true) {
            Ok(device) => device,
            Err(err) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(err);
            }
        };

        Ok(Self {
            surface: Some((surface, surface_loader)),
            physical_device,
            device,
            instance,
        })
    }

    /// Create a context without a surface (uploads and offscreen work only)
    pub fn new_headless(config: &VulkanRendererConfig) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(&[], &config.application_name, config.validation_enabled())?;
        let physical_device =
            PhysicalDeviceInfo::select_suitable_device(&instance.instance, None, config.max_msaa_samples)?;
        let device = LogicalDevice::new(&instance.instance, &physical_device, false)?;

        Ok(Self {
            surface: None,
            physical_device,
            device,
            instance,
        })
    }

    /// Get a reference to the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Get the raw Device handle
    pub fn raw_device(&self) -> &Device {
        &self.device.device
    }

    /// Memory allocator
    pub fn allocator(&self) -> &Arc<vk_mem::Allocator> {
        self.device.allocator()
    }

    /// Surface and loader, if this context presents
    pub fn surface(&self) -> VulkanResult<(vk::SurfaceKHR, &Surface)> {
        self.surface
            .as_ref()
            .map(|(surface, loader)| (*surface, loader))
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "Context has no presentation surface".to_string(),
            })
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe {
            self.device.device.device_wait_idle()
                .map_err(VulkanError::driver("vkDeviceWaitIdle"))
        }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device.device_wait_idle();
            if let Some((surface, loader)) = self.surface.take() {
                loader.destroy_surface(surface, None);
            }
        }
        // Remaining fields drop in declaration order: device (allocator first), then instance
    }
}
