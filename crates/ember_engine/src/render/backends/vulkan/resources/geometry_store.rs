//! Shared vertex and index storage
//!
//! All meshes live in one device-local vertex buffer and one index buffer of
//! fixed capacity. Uploads append at a cursor and return an immutable
//! [`BufferView`]; meshes pair a vertex view with an index view and are
//! handed out as [`MeshHandle`]s. Nothing is ever freed individually.

use ash::{vk, Device};
use bytemuck::Pod;

use crate::foundation::collections::{Handle, HandleArena};
use crate::foundation::math::utils::align_up;
use crate::render::backends::vulkan::{AdHocQueue, GpuBuffer, LogicalDevice, VulkanError, VulkanResult};

/// Vertex uploads start on this boundary
const VERTEX_ALIGNMENT: u64 = 16;

/// Index type used by every mesh
pub type Index = u32;

/// Range of elements inside one of the shared buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferView {
    /// Byte offset of the first element
    pub offset: u64,
    /// Number of elements
    pub count: u32,
    /// Bytes per element
    pub stride: u32,
}

impl BufferView {
    /// Bytes covered by the view
    pub fn byte_len(&self) -> u64 {
        u64::from(self.count) * u64::from(self.stride)
    }
}

/// Space reserved by [`AppendCursor::reserve`] but not yet committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// Start of the reserved range
    pub offset: u64,
    end: u64,
}

/// Append-only allocation cursor over a fixed capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendCursor {
    resource: &'static str,
    used: u64,
    capacity: u64,
}

impl AppendCursor {
    /// Empty cursor over `capacity` bytes
    pub fn new(resource: &'static str, capacity: u64) -> Self {
        Self { resource, used: 0, capacity }
    }

    /// Find room for `len` bytes at `alignment` without moving the cursor
    pub fn reserve(&self, len: u64, alignment: u64) -> VulkanResult<Reservation> {
        let offset = align_up(self.used, alignment);
        match offset.checked_add(len).filter(|&end| end <= self.capacity) {
            Some(end) => Ok(Reservation { offset, end }),
            None => Err(VulkanError::ResourceExhausted {
                resource: self.resource,
                requested: len,
                available: self.capacity.saturating_sub(offset),
                capacity: self.capacity,
            }),
        }
    }

    /// Advance past a reservation made against the current position
    pub fn commit(&mut self, reservation: Reservation) {
        self.used = self.used.max(reservation.end);
    }

    /// Bytes consumed so far
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

/// A drawable vertex and index range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mesh {
    /// Vertex range
    pub vertices: BufferView,
    /// Index range
    pub indices: BufferView,
}

/// Handle to a mesh in a [`GeometryStore`]
pub type MeshHandle = Handle<Mesh>;

/// Fixed-capacity vertex and index buffers plus the meshes built on them
pub struct GeometryStore {
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    vertex_cursor: AppendCursor,
    index_cursor: AppendCursor,
    meshes: HandleArena<Mesh>,
}

impl GeometryStore {
    /// Allocate the shared buffers
    pub fn new(device: &LogicalDevice, vertex_capacity: u64, index_capacity: u64) -> VulkanResult<Self> {
        let vertex_buffer = GpuBuffer::new(device, vertex_capacity, vk::BufferUsageFlags::VERTEX_BUFFER)?;
        let index_buffer = GpuBuffer::new(device, index_capacity, vk::BufferUsageFlags::INDEX_BUFFER)?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_cursor: AppendCursor::new("vertex buffer", vertex_capacity),
            index_cursor: AppendCursor::new("index buffer", index_capacity),
            meshes: HandleArena::new(),
        })
    }

    /// Append vertices and wait for the upload
    pub fn load_vertexes<V: Pod>(&mut self, queue: &mut AdHocQueue, vertices: &[V]) -> VulkanResult<BufferView> {
        let stride = std::mem::size_of::<V>() as u32;
        Self::append(
            &mut self.vertex_buffer,
            &mut self.vertex_cursor,
            queue,
            bytemuck::cast_slice(vertices),
            VERTEX_ALIGNMENT,
            stride,
        )
    }

    /// Append indices and wait for the upload
    pub fn load_indexes(&mut self, queue: &mut AdHocQueue, indices: &[Index]) -> VulkanResult<BufferView> {
        let stride = std::mem::size_of::<Index>() as u32;
        Self::append(
            &mut self.index_buffer,
            &mut self.index_cursor,
            queue,
            bytemuck::cast_slice(indices),
            u64::from(stride),
            stride,
        )
    }

    fn append(
        buffer: &mut GpuBuffer,
        cursor: &mut AppendCursor,
        queue: &mut AdHocQueue,
        bytes: &[u8],
        alignment: u64,
        stride: u32,
    ) -> VulkanResult<BufferView> {
        let reservation = cursor.reserve(bytes.len() as u64, alignment)?;
        buffer.copy_from_at(queue, bytes, reservation.offset)?;
        cursor.commit(reservation);

        Ok(BufferView {
            offset: reservation.offset,
            count: (bytes.len() as u64 / u64::from(stride.max(1))) as u32,
            stride,
        })
    }

    /// Register a mesh from previously loaded views
    pub fn create_mesh(&mut self, vertices: BufferView, indices: BufferView) -> VulkanResult<MeshHandle> {
        if indices.stride as usize != std::mem::size_of::<Index>() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Index view has stride {}, expected u32 indices", indices.stride),
            });
        }
        Ok(self.meshes.insert(Mesh { vertices, indices }))
    }

    /// Look up a mesh
    pub fn mesh(&self, handle: MeshHandle) -> Option<&Mesh> {
        self.meshes.get(handle)
    }

    /// Bind the mesh's ranges and record an indexed draw
    pub fn record_draw(&self, device: &Device, command_buffer: vk::CommandBuffer, handle: MeshHandle) -> VulkanResult<()> {
        let mesh = self.mesh(handle).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("Unknown mesh {handle:?}"),
        })?;

        unsafe {
            device.cmd_bind_vertex_buffers(
                command_buffer,
                0,
                &[self.vertex_buffer.handle()],
                &[mesh.vertices.offset],
            );
            device.cmd_bind_index_buffer(
                command_buffer,
                self.index_buffer.handle(),
                mesh.indices.offset,
                vk::IndexType::UINT32,
            );
            device.cmd_draw_indexed(command_buffer, mesh.indices.count, 1, 0, 0, 0);
        }
        Ok(())
    }

    /// Vertex cursor state
    pub fn vertex_usage(&self) -> AppendCursor {
        self.vertex_cursor
    }

    /// Index cursor state
    pub fn index_usage(&self) -> AppendCursor {
        self.index_cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_aligns_offset() {
        let mut cursor = AppendCursor::new("vertex buffer", 256);
        let first = cursor.reserve(20, 16).unwrap();
        assert_eq!(first.offset, 0);
        cursor.commit(first);

        let second = cursor.reserve(8, 16).unwrap();
        assert_eq!(second.offset, 32);
        cursor.commit(second);
        assert_eq!(cursor.used(), 40);
    }

    #[test]
    fn test_exhaustion_leaves_cursor_unchanged() {
        let mut cursor = AppendCursor::new("index buffer", 64);
        let reservation = cursor.reserve(48, 4).unwrap();
        cursor.commit(reservation);

        let err = cursor.reserve(32, 4).unwrap_err();
        match err {
            VulkanError::ResourceExhausted { resource, requested, available, capacity } => {
                assert_eq!(resource, "index buffer");
                assert_eq!(requested, 32);
                assert_eq!(available, 16);
                assert_eq!(capacity, 64);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(cursor.used(), 48);
    }

    #[test]
    fn test_exact_fill() {
        let mut cursor = AppendCursor::new("vertex buffer", 64);
        let reservation = cursor.reserve(64, 16).unwrap();
        cursor.commit(reservation);
        assert_eq!(cursor.used(), cursor.capacity());
        assert!(cursor.reserve(1, 1).is_err());
    }

    #[test]
    fn test_buffer_view_len() {
        let view = BufferView { offset: 32, count: 36, stride: 4 };
        assert_eq!(view.byte_len(), 144);
    }
}
