//! Device-backed checks
//!
//! These need a Vulkan driver and are ignored by default:
//!
//! ```text
//! cargo test -p ember_engine --test gpu_smoke -- --ignored
//! ```

use ash::vk;
use ember_engine::core::VulkanRendererConfig;
use ember_engine::render::backends::vulkan::{
    AdHocQueues, GeometryStore, GpuBuffer, HostBuffer, UniformBufferArray, VulkanContext, VulkanError,
};

fn headless() -> VulkanContext {
    let config = VulkanRendererConfig::new("ember-gpu-smoke").with_validation(false);
    VulkanContext::new_headless(&config).expect("no usable Vulkan device")
}

#[test]
#[ignore = "requires a Vulkan device"]
fn test_gpu_buffer_copy_reports_size() {
    let context = headless();
    let mut queues = AdHocQueues::new(&context.device).unwrap();

    let data: Vec<u8> = (0..=255).cycle().take(4096).collect();
    let mut buffer = GpuBuffer::new(&context.device, data.len() as u64, vk::BufferUsageFlags::STORAGE_BUFFER).unwrap();
    buffer.copy_from(&mut queues.transfer, &data).unwrap();

    assert_eq!(buffer.size(), data.len() as u64);
}

#[test]
#[ignore = "requires a Vulkan device"]
fn test_gpu_buffer_copies_from_uniform_host_buffer() {
    let context = headless();
    let mut queues = AdHocQueues::new(&context.device).unwrap();

    let mut host = HostBuffer::new(&context.device, 256, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap();
    host.copy_from(&[7u8; 256]).unwrap();
    let mut buffer = GpuBuffer::new(&context.device, 256, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap();
    buffer.copy_from_host(&mut queues.transfer, &host).unwrap();
    assert_eq!(buffer.size(), host.size());

    let mut small = GpuBuffer::new(&context.device, 128, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap();
    assert!(matches!(
        small.copy_from_host(&mut queues.transfer, &host),
        Err(VulkanError::RangeViolation { .. })
    ));
}

#[test]
#[ignore = "requires a Vulkan device"]
fn test_gpu_buffer_rejects_overrun() {
    let context = headless();
    let mut queues = AdHocQueues::new(&context.device).unwrap();
    let mut buffer = GpuBuffer::new(&context.device, 64, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap();

    let result = buffer.copy_from_at(&mut queues.transfer, &[0u8; 32], 48);
    assert!(matches!(result, Err(VulkanError::RangeViolation { .. })));
}

#[test]
#[ignore = "requires a Vulkan device"]
fn test_adhoc_queue_is_not_reentrant() {
    let context = headless();
    let mut queues = AdHocQueues::new(&context.device).unwrap();

    queues.graphics.begin().unwrap();
    assert!(matches!(queues.graphics.begin(), Err(VulkanError::InvalidOperation { .. })));
    queues.graphics.submit_and_wait().unwrap();
    queues.graphics.run(|_, _| {}).unwrap();
}

#[test]
#[ignore = "requires a Vulkan device"]
fn test_uniform_array_descriptor_offsets() {
    let context = headless();
    let alignment = context.physical_device.min_uniform_buffer_offset_alignment();
    let mut array = UniformBufferArray::<[f32; 16]>::new(&context.device, alignment, 8, 2).unwrap();

    array.copy_from_at(&[1.0; 16], 3, 1).unwrap();
    let info = array.descriptor_info(3, 1).unwrap();
    assert_eq!(info.offset, array.layout().stride * 3);
    assert_eq!(info.range, 64);
    assert!(array.descriptor_info(8, 0).is_err());
    assert!(array.descriptor_info(0, 2).is_err());
}

#[test]
#[ignore = "requires a Vulkan device"]
fn test_uniform_array_items_read_back_without_overlap() {
    let context = headless();
    let alignment = context.physical_device.min_uniform_buffer_offset_alignment();
    let mut array = UniformBufferArray::<[f32; 4]>::new(&context.device, alignment, 4, 2).unwrap();
    let frame0_before = array.mapped_bytes(0).unwrap().to_vec();
    let frame1_before = array.mapped_bytes(1).unwrap().to_vec();

    array.copy_from_at(&[2.0; 4], 2, 1).unwrap();
    array.copy_from_at(&[3.0; 4], 3, 1).unwrap();

    let bytes = array.mapped_bytes(1).unwrap();
    let mut written = vec![false; bytes.len()];
    for (item, value) in [(2, 2.0f32), (3, 3.0f32)] {
        let info = array.descriptor_info(item, 1).unwrap();
        assert_eq!(info.offset, array.layout().stride * u64::from(item));
        assert_eq!(info.range, std::mem::size_of::<[f32; 4]>() as u64);
        let range = info.offset as usize..(info.offset + info.range) as usize;
        assert_eq!(&bytes[range.clone()], bytemuck::bytes_of(&[value; 4]));
        written[range].iter_mut().for_each(|w| *w = true);
    }

    // Padding and other items of frame 1 are untouched
    for (i, &was_written) in written.iter().enumerate() {
        if !was_written {
            assert_eq!(bytes[i], frame1_before[i], "byte {i} changed");
        }
    }
    assert_eq!(array.mapped_bytes(0).unwrap(), frame0_before.as_slice());
}
