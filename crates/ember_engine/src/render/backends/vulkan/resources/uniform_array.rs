//! Per-frame arrays of uniform blocks
//!
//! A [`UniformBufferArray<T>`] holds `count` slots of `T` for every frame in
//! flight. Each slot starts on a multiple of the device's
//! `minUniformBufferOffsetAlignment`, so any slot can be bound on its own with
//! a descriptor range of exactly `size_of::<T>()` bytes.

use ash::vk;
use bytemuck::Pod;
use std::marker::PhantomData;

use crate::foundation::math::utils::align_up;
use crate::render::backends::vulkan::{HostBuffer, LogicalDevice, VulkanError, VulkanResult};

/// Stride of one array element: `size` rounded up to `alignment`
pub fn aligned_stride(size: u64, alignment: u64) -> u64 {
    align_up(size, alignment)
}

/// Offset arithmetic for an aligned array of `count` elements of `item_size` bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformArrayLayout {
    /// Bytes between consecutive elements
    pub stride: u64,
    /// Bytes actually occupied by each element
    pub item_size: u64,
    /// Number of elements
    pub count: u32,
}

impl UniformArrayLayout {
    /// Layout for `count` elements of `item_size` bytes
    pub fn new(item_size: u64, alignment: u64, count: u32) -> Self {
        Self {
            stride: aligned_stride(item_size, alignment),
            item_size,
            count,
        }
    }

    /// Layout for `count` elements of `T`
    pub fn of<T>(alignment: u64, count: u32) -> Self {
        Self::new(std::mem::size_of::<T>() as u64, alignment, count)
    }

    /// Total bytes of one frame's buffer
    pub fn total_size(&self) -> u64 {
        self.stride * u64::from(self.count)
    }

    /// `(offset, range)` that binds element `item`
    pub fn descriptor_range(&self, item: u32) -> VulkanResult<(u64, u64)> {
        if item >= self.count {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Uniform array index {item} out of range (count {})", self.count),
            });
        }
        Ok((self.stride * u64::from(item), self.item_size))
    }
}

/// `count` aligned uniform blocks per frame slot, one host buffer per slot
pub struct UniformBufferArray<T: Pod> {
    layout: UniformArrayLayout,
    frames: Vec<HostBuffer>,
    _marker: PhantomData<T>,
}

impl<T: Pod> UniformBufferArray<T> {
    /// Allocate `frames_in_flight` buffers of `count` aligned elements
    pub fn new(device: &LogicalDevice, alignment: u64, count: u32, frames_in_flight: usize) -> VulkanResult<Self> {
        let layout = UniformArrayLayout::of::<T>(alignment, count);
        let frames = (0..frames_in_flight)
            .map(|_| HostBuffer::new(device, layout.total_size(), vk::BufferUsageFlags::UNIFORM_BUFFER))
            .collect::<VulkanResult<Vec<_>>>()?;

        log::debug!(
            "Uniform array of {} x {} bytes (stride {}) for {} frame(s)",
            count,
            layout.item_size,
            layout.stride,
            frames_in_flight
        );

        Ok(Self {
            layout,
            frames,
            _marker: PhantomData,
        })
    }

    /// Write `value` into element `item` of frame slot `frame`
    ///
    /// Callers must have waited on `frame`'s in-flight fence.
    pub fn copy_from_at(&mut self, value: &T, item: u32, frame: usize) -> VulkanResult<()> {
        let (offset, _) = self.layout.descriptor_range(item)?;
        self.frame_buffer_mut(frame)?.write_pod(value, offset)
    }

    /// Descriptor info binding element `item` of frame slot `frame`
    pub fn descriptor_info(&self, item: u32, frame: usize) -> VulkanResult<vk::DescriptorBufferInfo> {
        let (offset, range) = self.layout.descriptor_range(item)?;
        Ok(self.frame_buffer(frame)?.descriptor_info(offset, range))
    }

    /// Current contents of frame slot `frame`
    pub fn mapped_bytes(&self, frame: usize) -> VulkanResult<&[u8]> {
        Ok(self.frame_buffer(frame)?.mapped_bytes())
    }

    /// Offset arithmetic shared by every frame slot
    pub fn layout(&self) -> UniformArrayLayout {
        self.layout
    }

    fn frame_buffer(&self, frame: usize) -> VulkanResult<&HostBuffer> {
        self.frames.get(frame).ok_or_else(|| frame_out_of_range(frame, self.frames.len()))
    }

    fn frame_buffer_mut(&mut self, frame: usize) -> VulkanResult<&mut HostBuffer> {
        let frames = self.frames.len();
        self.frames.get_mut(frame).ok_or_else(|| frame_out_of_range(frame, frames))
    }
}

fn frame_out_of_range(frame: usize, frames: usize) -> VulkanError {
    VulkanError::InvalidOperation {
        reason: format!("Frame slot {frame} out of range ({frames} frames in flight)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Mat4;
    use crate::render::backends::vulkan::resources::buffer::write_bytes_at;

    #[test]
    fn test_mat4_array_with_256_alignment() {
        let layout = UniformArrayLayout::of::<Mat4>(256, 8);
        assert_eq!(layout.stride, 256);
        assert_eq!(layout.total_size(), 2048);
        assert_eq!(layout.descriptor_range(3).unwrap(), (768, 64));
    }

    #[test]
    fn test_stride_is_aligned_and_large_enough() {
        for size in [1_u64, 16, 64, 100, 256, 257, 1000] {
            for alignment in [16_u64, 64, 256] {
                let stride = aligned_stride(size, alignment);
                assert_eq!(stride % alignment, 0);
                assert!(stride >= size);
                assert!(stride < size + alignment);
            }
        }
    }

    #[test]
    fn test_index_past_count() {
        let layout = UniformArrayLayout::new(64, 256, 2);
        assert!(layout.descriptor_range(2).is_err());
    }

    #[test]
    fn test_adjacent_items_do_not_overlap() {
        // Write every slot of a host-side image of the buffer and read each range back
        let layout = UniformArrayLayout::new(48, 64, 4);
        let mut bytes = vec![0_u8; layout.total_size() as usize];
        for item in 0..layout.count {
            let (offset, range) = layout.descriptor_range(item).unwrap();
            write_bytes_at(&mut bytes, offset, &vec![item as u8 + 1; range as usize]).unwrap();
        }
        for item in 0..layout.count {
            let (offset, range) = layout.descriptor_range(item).unwrap();
            let slice = &bytes[offset as usize..(offset + range) as usize];
            assert!(slice.iter().all(|&b| b == item as u8 + 1));
        }
    }
}
