//! Push-descriptor binding
//!
//! Layouts are built from a [`DescriptorLayoutDefinition`] with the
//! push-descriptor flag, so no descriptor pools or sets are ever allocated.
//! Before each draw the caller records writes into the layout's pending
//! write-set, in any order, keyed by binding index; the last write to a
//! binding wins. [`PushDescriptorLayout::push`] then issues a single
//! `vkCmdPushDescriptorSetKHR` with every written binding.
//!
//! Bindings left unset are omitted from the push rather than re-sent from a
//! previous draw, so a flush never carries stale descriptors.

use ash::extensions::khr::PushDescriptor;
use ash::{vk, Device};
use std::cell::Cell;

use crate::render::backends::vulkan::{LogicalDevice, VulkanError, VulkanResult};
use crate::render::pipeline::{DescriptorKind, DescriptorLayoutDefinition, ShaderStage};

/// Vulkan descriptor type for a configured kind
pub fn descriptor_type(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

/// Vulkan stage mask for a list of configured stages
pub fn stage_flags(stages: &[ShaderStage]) -> vk::ShaderStageFlags {
    stages.iter().fold(vk::ShaderStageFlags::empty(), |flags, stage| {
        flags | match stage {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    })
}

/// One slot of a binding table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSlot {
    /// Name from the definition
    pub name: String,
    /// Binding index
    pub binding: u32,
    /// Descriptor kind
    pub kind: DescriptorKind,
    /// Array element count
    pub count: u32,
    /// Stage visibility
    pub stages: vk::ShaderStageFlags,
}

/// Ordered binding table; slot `i` describes binding `i`
#[derive(Debug, Clone)]
pub struct DescriptorBindingTable {
    name: String,
    slots: Vec<BindingSlot>,
}

impl DescriptorBindingTable {
    /// Build from a validated definition
    pub fn from_definition(definition: &DescriptorLayoutDefinition) -> Self {
        let mut slots: Vec<BindingSlot> = definition
            .bindings
            .iter()
            .map(|b| BindingSlot {
                name: b.name.clone(),
                binding: b.binding,
                kind: b.kind,
                count: b.count,
                stages: stage_flags(&b.stages),
            })
            .collect();
        slots.sort_by_key(|slot| slot.binding);

        Self {
            name: definition.name.clone(),
            slots,
        }
    }

    /// Layout name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slots in binding order
    pub fn slots(&self) -> &[BindingSlot] {
        &self.slots
    }

    /// Slot for `binding`, checked against the expected kind
    fn slot(&self, binding: u32, kind: DescriptorKind) -> VulkanResult<&BindingSlot> {
        let slot = self.slots.get(binding as usize).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("Layout `{}` has no binding {binding}", self.name),
        })?;
        if slot.kind != kind {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Binding {binding} (`{}`) of layout `{}` is {:?}, not {:?}",
                    slot.name, self.name, slot.kind, kind
                ),
            });
        }
        Ok(slot)
    }

    /// Vulkan binding descriptions
    pub fn vk_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding> {
        self.slots
            .iter()
            .map(|slot| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(slot.binding)
                    .descriptor_type(descriptor_type(slot.kind))
                    .descriptor_count(slot.count)
                    .stage_flags(slot.stages)
                    .build()
            })
            .collect()
    }
}

/// Pending contents of one binding
#[derive(Debug, Clone, Default)]
pub enum PendingWrite {
    /// Nothing written since the last reset
    #[default]
    Unset,
    /// Uniform buffer range
    Buffer(vk::DescriptorBufferInfo),
    /// One image per array element
    Images(Vec<vk::DescriptorImageInfo>),
}

/// Per-binding pending write-set of a layout
#[derive(Debug, Clone)]
pub struct PendingWrites {
    table: DescriptorBindingTable,
    writes: Vec<PendingWrite>,
    warned_unset: Cell<bool>,
}

impl PendingWrites {
    /// Empty write-set for `table`
    pub fn new(table: DescriptorBindingTable) -> Self {
        let writes = vec![PendingWrite::Unset; table.slots().len()];
        Self {
            table,
            writes,
            warned_unset: Cell::new(false),
        }
    }

    /// Record a uniform buffer range for `binding`
    pub fn write_uniform_buffer(&mut self, info: vk::DescriptorBufferInfo, binding: u32) -> VulkanResult<()> {
        self.table.slot(binding, DescriptorKind::UniformBuffer)?;
        self.writes[binding as usize] = PendingWrite::Buffer(info);
        Ok(())
    }

    /// Record a single image/sampler pair for `binding`
    pub fn write_combined_image_sampler(&mut self, info: vk::DescriptorImageInfo, binding: u32) -> VulkanResult<()> {
        self.write_combined_image_samplers(&[info], binding)
    }

    /// Record every element of an image/sampler array binding
    pub fn write_combined_image_samplers(&mut self, infos: &[vk::DescriptorImageInfo], binding: u32) -> VulkanResult<()> {
        let slot = self.table.slot(binding, DescriptorKind::CombinedImageSampler)?;
        if infos.len() != slot.count as usize {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Binding {binding} (`{}`) expects {} image(s), got {}",
                    slot.name,
                    slot.count,
                    infos.len()
                ),
            });
        }
        self.writes[binding as usize] = PendingWrite::Images(infos.to_vec());
        Ok(())
    }

    /// Clear every binding back to unset
    pub fn reset_writes(&mut self) {
        self.writes.fill(PendingWrite::Unset);
    }

    /// Bindings with no pending write
    pub fn unset_bindings(&self) -> Vec<u32> {
        self.writes
            .iter()
            .enumerate()
            .filter(|(_, write)| matches!(write, PendingWrite::Unset))
            .map(|(binding, _)| binding as u32)
            .collect()
    }

    /// Written bindings in binding order
    pub fn written(&self) -> impl Iterator<Item = (u32, &PendingWrite)> {
        self.writes
            .iter()
            .enumerate()
            .filter(|(_, write)| !matches!(write, PendingWrite::Unset))
            .map(|(binding, write)| (binding as u32, write))
    }

    /// Descriptor writes for every written binding
    ///
    /// The returned structures point into `self` and must be consumed before
    /// the write-set is modified.
    pub fn flush_writes(&self) -> Vec<vk::WriteDescriptorSet> {
        let unset = self.unset_bindings();
        if !unset.is_empty() && cfg!(debug_assertions) && !self.warned_unset.replace(true) {
            log::warn!(
                "Layout `{}` pushed with unset binding(s) {:?}; they are left out of the push",
                self.table.name(),
                unset
            );
        }

        self.written()
            .map(|(binding, write)| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_binding(binding)
                    .dst_array_element(0);
                match write {
                    PendingWrite::Buffer(info) => builder
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(std::slice::from_ref(info))
                        .build(),
                    PendingWrite::Images(infos) => builder
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(infos)
                        .build(),
                    PendingWrite::Unset => unreachable!("written() skips unset bindings"),
                }
            })
            .collect()
    }
}

/// Descriptor set layout created with the push-descriptor flag, plus its write-set
pub struct PushDescriptorLayout {
    device: Device,
    loader: PushDescriptor,
    layout: vk::DescriptorSetLayout,
    pending: PendingWrites,
}

impl PushDescriptorLayout {
    /// Create the Vulkan layout for `definition`
    pub fn new(device: &LogicalDevice, definition: &DescriptorLayoutDefinition) -> VulkanResult<Self> {
        let table = DescriptorBindingTable::from_definition(definition);
        let bindings = table.vk_bindings();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .flags(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR)
            .bindings(&bindings);

        let layout = unsafe {
            device.device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(VulkanError::driver("vkCreateDescriptorSetLayout"))?
        };

        log::debug!("Created push-descriptor layout `{}` with {} binding(s)", table.name(), bindings.len());
        Ok(Self {
            device: device.device.clone(),
            loader: device.push_descriptor.clone(),
            layout,
            pending: PendingWrites::new(table),
        })
    }

    /// Vulkan layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Pending write-set
    pub fn writes(&self) -> &PendingWrites {
        &self.pending
    }

    /// See [`PendingWrites::write_uniform_buffer`]
    pub fn write_uniform_buffer(&mut self, info: vk::DescriptorBufferInfo, binding: u32) -> VulkanResult<()> {
        self.pending.write_uniform_buffer(info, binding)
    }

    /// See [`PendingWrites::write_combined_image_sampler`]
    pub fn write_combined_image_sampler(&mut self, info: vk::DescriptorImageInfo, binding: u32) -> VulkanResult<()> {
        self.pending.write_combined_image_sampler(info, binding)
    }

    /// See [`PendingWrites::write_combined_image_samplers`]
    pub fn write_combined_image_samplers(&mut self, infos: &[vk::DescriptorImageInfo], binding: u32) -> VulkanResult<()> {
        self.pending.write_combined_image_samplers(infos, binding)
    }

    /// Clear the pending write-set
    pub fn reset_writes(&mut self) {
        self.pending.reset_writes();
    }

    /// Push all pending writes to set 0 of `pipeline_layout` in one call
    pub fn push(&self, command_buffer: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline_layout: vk::PipelineLayout) {
        let writes = self.pending.flush_writes();
        if writes.is_empty() {
            return;
        }
        unsafe {
            self.loader.cmd_push_descriptor_set(command_buffer, bind_point, pipeline_layout, 0, &writes);
        }
    }
}

impl Drop for PushDescriptorLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::pipeline::DescriptorBindingDefinition;
    use ash::vk::Handle;
    use std::path::PathBuf;

    fn table() -> DescriptorBindingTable {
        let binding = |binding, kind, count, stages: Vec<ShaderStage>| DescriptorBindingDefinition {
            name: format!("binding{binding}"),
            binding,
            kind,
            count,
            stages,
        };
        let definition = DescriptorLayoutDefinition {
            name: "forward".to_string(),
            bindings: vec![
                binding(0, DescriptorKind::UniformBuffer, 1, vec![ShaderStage::Vertex, ShaderStage::Fragment]),
                binding(1, DescriptorKind::UniformBuffer, 1, vec![ShaderStage::Fragment]),
                binding(2, DescriptorKind::CombinedImageSampler, 2, vec![ShaderStage::Fragment]),
            ],
            source: PathBuf::from("forward.toml"),
        };
        DescriptorBindingTable::from_definition(&definition)
    }

    fn buffer_info(raw: u64, offset: u64) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: vk::Buffer::from_raw(raw),
            offset,
            range: 64,
        }
    }

    fn image_info(raw: u64) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: vk::Sampler::from_raw(raw),
            image_view: vk::ImageView::from_raw(raw),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    #[test]
    fn test_vk_bindings_follow_definition() {
        let bindings = table().vk_bindings();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(bindings[2].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(bindings[2].descriptor_count, 2);
    }

    #[test]
    fn test_last_write_wins() {
        let mut writes = PendingWrites::new(table());
        writes.write_uniform_buffer(buffer_info(1, 0), 1).unwrap();
        writes.write_uniform_buffer(buffer_info(2, 256), 1).unwrap();

        let written: Vec<_> = writes.written().collect();
        assert_eq!(written.len(), 1);
        match written[0] {
            (1, PendingWrite::Buffer(info)) => {
                assert_eq!(info.buffer, vk::Buffer::from_raw(2));
                assert_eq!(info.offset, 256);
            }
            other => panic!("unexpected write: {other:?}"),
        }

        let flushed = writes.flush_writes();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].dst_binding, 1);
        let pushed = unsafe { *flushed[0].p_buffer_info };
        assert_eq!(pushed.buffer, vk::Buffer::from_raw(2));
    }

    #[test]
    fn test_out_of_order_writes_flush_in_binding_order() {
        let mut writes = PendingWrites::new(table());
        writes.write_combined_image_samplers(&[image_info(5), image_info(6)], 2).unwrap();
        writes.write_uniform_buffer(buffer_info(1, 0), 0).unwrap();

        let flushed = writes.flush_writes();
        let bindings: Vec<u32> = flushed.iter().map(|w| w.dst_binding).collect();
        assert_eq!(bindings, vec![0, 2]);
        assert_eq!(flushed[1].descriptor_count, 2);
        assert_eq!(writes.unset_bindings(), vec![1]);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut writes = PendingWrites::new(table());
        writes.write_uniform_buffer(buffer_info(1, 0), 0).unwrap();
        writes.write_uniform_buffer(buffer_info(1, 64), 1).unwrap();
        writes.reset_writes();

        assert_eq!(writes.unset_bindings(), vec![0, 1, 2]);
        assert!(writes.flush_writes().is_empty());
    }

    #[test]
    fn test_kind_mismatch_and_unknown_binding() {
        let mut writes = PendingWrites::new(table());
        assert!(writes.write_combined_image_sampler(image_info(1), 0).is_err());
        assert!(writes.write_uniform_buffer(buffer_info(1, 0), 2).is_err());
        assert!(writes.write_uniform_buffer(buffer_info(1, 0), 7).is_err());
        assert_eq!(writes.unset_bindings(), vec![0, 1, 2]);
    }

    #[test]
    fn test_image_array_length_must_match_count() {
        let mut writes = PendingWrites::new(table());
        assert!(writes.write_combined_image_sampler(image_info(1), 2).is_err());
        assert!(writes.write_combined_image_samplers(&[image_info(1), image_info(2)], 2).is_ok());
    }
}
