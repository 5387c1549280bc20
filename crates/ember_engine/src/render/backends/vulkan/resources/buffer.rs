//! Buffer management
//!
//! Three residency policies share one allocation wrapper:
//!
//! - [`HostBuffer`]: host-visible, host-coherent and persistently mapped. Used
//!   for per-frame uniform data; writes are plain memcpys with no flush.
//! - [`GpuBuffer`]: device-local. Only written through a staging copy on an
//!   ad-hoc queue, which is waited on before the write returns.
//! - [`StagingBuffer`]: short-lived host buffer used as a transfer source.

use ash::vk;
use bytemuck::Pod;
use std::ptr::NonNull;
use std::sync::Arc;
use vk_mem::Alloc;

use crate::render::backends::vulkan::{AdHocQueue, LogicalDevice, VulkanError, VulkanResult};

/// Copy `data` into `dst` at `offset`, refusing writes past the end
pub fn write_bytes_at(dst: &mut [u8], offset: u64, data: &[u8]) -> VulkanResult<()> {
    let range = checked_range(dst.len() as u64, offset, data.len() as u64)?;
    dst[range].copy_from_slice(data);
    Ok(())
}

/// Byte range `[offset, offset + len)` if it fits in `capacity`
fn checked_range(capacity: u64, offset: u64, len: u64) -> VulkanResult<std::ops::Range<usize>> {
    let end = offset.checked_add(len).filter(|&end| end <= capacity);
    match end {
        Some(end) => Ok(offset as usize..end as usize),
        None => Err(VulkanError::RangeViolation { offset, len, capacity }),
    }
}

/// Host buffers can always feed [`GpuBuffer::copy_from_host`]
fn host_usage(usage: vk::BufferUsageFlags) -> vk::BufferUsageFlags {
    usage | vk::BufferUsageFlags::TRANSFER_SRC
}

/// Where an allocation should live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Residency {
    /// Mapped for sequential host writes, preferring device-local memory when it is mappable
    HostVisible,
    /// Mapped and preferring system memory
    Staging,
    /// Device-local only
    Device,
}

/// Buffer handle plus its allocation
struct RawBuffer {
    allocator: Arc<vk_mem::Allocator>,
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: u64,
}

impl RawBuffer {
    fn new(
        allocator: &Arc<vk_mem::Allocator>,
        size: u64,
        usage: vk::BufferUsageFlags,
        residency: Residency,
        sharing: (vk::SharingMode, Vec<u32>),
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "Cannot create a zero-sized buffer".to_string(),
            });
        }

        let (sharing_mode, families) = sharing;
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(sharing_mode)
            .queue_family_indices(&families);

        let host_coherent = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let create_info = match residency {
            Residency::HostVisible => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                required_flags: host_coherent,
                ..Default::default()
            },
            Residency::Staging => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                required_flags: host_coherent,
                ..Default::default()
            },
            Residency::Device => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                required_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                ..Default::default()
            },
        };

        let (buffer, allocation) = unsafe {
            allocator
                .create_buffer(&buffer_info, &create_info)
                .map_err(|result| match result {
                    vk::Result::ERROR_FEATURE_NOT_PRESENT => VulkanError::NoSuitableMemoryType,
                    result => VulkanError::Driver { operation: "vmaCreateBuffer", result },
                })?
        };

        Ok(Self {
            allocator: Arc::clone(allocator),
            buffer,
            allocation,
            size,
        })
    }

    fn map(&mut self) -> VulkanResult<NonNull<u8>> {
        let ptr = unsafe {
            self.allocator
                .map_memory(&mut self.allocation)
                .map_err(VulkanError::driver("vmaMapMemory"))?
        };
        NonNull::new(ptr).ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Allocator returned a null mapping".to_string(),
        })
    }

    fn unmap(&mut self) {
        unsafe {
            self.allocator.unmap_memory(&mut self.allocation);
        }
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        unsafe {
            self.allocator.destroy_buffer(self.buffer, &mut self.allocation);
        }
    }
}

/// Persistently mapped, host-coherent buffer
pub struct HostBuffer {
    raw: RawBuffer,
    mapped: NonNull<u8>,
}

impl HostBuffer {
    /// Allocate and map a host-visible buffer; `TRANSFER_SRC` is added to `usage`
    pub fn new(device: &LogicalDevice, size: u64, usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        Self::with_residency(
            device.allocator(),
            size,
            host_usage(usage),
            Residency::HostVisible,
            device.buffer_sharing(),
        )
    }

    fn with_residency(
        allocator: &Arc<vk_mem::Allocator>,
        size: u64,
        usage: vk::BufferUsageFlags,
        residency: Residency,
        sharing: (vk::SharingMode, Vec<u32>),
    ) -> VulkanResult<Self> {
        let mut raw = RawBuffer::new(allocator, size, usage, residency, sharing)?;
        let mapped = raw.map()?;
        Ok(Self { raw, mapped })
    }

    /// Copy `data` to the start of the buffer
    pub fn copy_from(&mut self, data: &[u8]) -> VulkanResult<()> {
        self.copy_from_at(data, 0)
    }

    /// Copy `data` to `offset`
    ///
    /// Memory is coherent, so the write is visible to the next submission
    /// without a flush.
    pub fn copy_from_at(&mut self, data: &[u8], offset: u64) -> VulkanResult<()> {
        write_bytes_at(self.mapped_bytes_mut(), offset, data)
    }

    /// Copy a plain-old-data value to `offset`
    pub fn write_pod<T: Pod>(&mut self, value: &T, offset: u64) -> VulkanResult<()> {
        self.copy_from_at(bytemuck::bytes_of(value), offset)
    }

    /// Current contents of the mapping
    pub fn mapped_bytes(&self) -> &[u8] {
        // The mapping covers `size` bytes for the lifetime of `self`
        unsafe { std::slice::from_raw_parts(self.mapped.as_ptr(), self.raw.size as usize) }
    }

    fn mapped_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.mapped.as_ptr(), self.raw.size as usize) }
    }

    /// Descriptor info for a sub-range
    pub fn descriptor_info(&self, offset: u64, range: u64) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.raw.buffer,
            offset,
            range,
        }
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.raw.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.raw.size
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        self.raw.unmap();
    }
}

/// Transfer source for uploads into device-local memory
pub struct StagingBuffer {
    inner: HostBuffer,
}

impl StagingBuffer {
    /// Allocate a staging buffer holding a copy of `data`
    pub fn from_bytes(allocator: &Arc<vk_mem::Allocator>, data: &[u8]) -> VulkanResult<Self> {
        let mut inner = HostBuffer::with_residency(
            allocator,
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            Residency::Staging,
            (vk::SharingMode::EXCLUSIVE, Vec::new()),
        )?;
        inner.copy_from(data)?;
        Ok(Self { inner })
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.inner.handle()
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.inner.size()
    }
}

/// Device-local buffer written through staging copies
pub struct GpuBuffer {
    raw: RawBuffer,
}

impl GpuBuffer {
    /// Allocate a device-local buffer; `TRANSFER_DST` is added to `usage`
    pub fn new(device: &LogicalDevice, size: u64, usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        let raw = RawBuffer::new(
            device.allocator(),
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            Residency::Device,
            device.buffer_sharing(),
        )?;
        log::debug!("Allocated {} byte GPU buffer ({:?})", size, usage);
        Ok(Self { raw })
    }

    /// Copy the whole of `src` to the start of this buffer and wait
    pub fn copy_from_host(&mut self, queue: &mut AdHocQueue, src: &HostBuffer) -> VulkanResult<()> {
        checked_range(self.raw.size, 0, src.size())?;
        self.record_copy(queue, src.handle(), 0, src.size())
    }

    /// Upload `data` to the start of this buffer and wait
    pub fn copy_from(&mut self, queue: &mut AdHocQueue, data: &[u8]) -> VulkanResult<()> {
        self.copy_from_at(queue, data, 0)
    }

    /// Upload `data` to `offset` through a temporary staging buffer and wait
    ///
    /// The staging buffer is released only after the copy has completed.
    pub fn copy_from_at(&mut self, queue: &mut AdHocQueue, data: &[u8], offset: u64) -> VulkanResult<()> {
        checked_range(self.raw.size, offset, data.len() as u64)?;
        if data.is_empty() {
            return Ok(());
        }

        let staging = StagingBuffer::from_bytes(&self.raw.allocator, data)?;
        self.record_copy(queue, staging.handle(), offset, staging.size())
    }

    fn record_copy(&mut self, queue: &mut AdHocQueue, src: vk::Buffer, dst_offset: u64, size: u64) -> VulkanResult<()> {
        let dst = self.raw.buffer;
        queue.run(|device, command_buffer| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset,
                size,
            };
            let barrier = vk::MemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::MEMORY_READ)
                .build();
            unsafe {
                device.cmd_copy_buffer(command_buffer, src, dst, &[region]);
                device.cmd_pipeline_barrier(
                    command_buffer,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::DependencyFlags::empty(),
                    &[barrier],
                    &[],
                    &[],
                );
            }
        })
    }

    /// Descriptor info for a sub-range
    pub fn descriptor_info(&self, offset: u64, range: u64) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.raw.buffer,
            offset,
            range,
        }
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.raw.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.raw.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_bytes_at_offset() {
        let mut dst = [0_u8; 8];
        write_bytes_at(&mut dst, 2, &[1, 2, 3]).unwrap();
        assert_eq!(dst, [0, 0, 1, 2, 3, 0, 0, 0]);
    }

    #[test]
    fn test_write_exactly_to_end() {
        let mut dst = [0_u8; 4];
        write_bytes_at(&mut dst, 0, &[9; 4]).unwrap();
        assert_eq!(dst, [9; 4]);
    }

    #[test]
    fn test_write_past_end_is_rejected_untouched() {
        let mut dst = [0_u8; 4];
        let err = write_bytes_at(&mut dst, 2, &[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            VulkanError::RangeViolation { offset: 2, len: 3, capacity: 4 }
        ));
        assert_eq!(dst, [0; 4]);
    }

    #[test]
    fn test_host_usage_is_a_copy_source() {
        let usage = host_usage(vk::BufferUsageFlags::UNIFORM_BUFFER);
        assert!(usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER));
        assert!(usage.contains(vk::BufferUsageFlags::TRANSFER_SRC));
    }

    #[test]
    fn test_offset_overflow_is_rejected() {
        assert!(checked_range(16, u64::MAX, 2).is_err());
    }
}
