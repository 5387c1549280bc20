//! Vulkan renderer
//!
//! Owns the context and every long-lived GPU object, and records one frame
//! per [`VulkanRenderer::draw_frame`] call: a depth-only pass per light into
//! that light's shadow map, then the forward pass into the acquired
//! swapchain image. Frame sequencing, fences and swapchain recreation are
//! left to [`FrameLoop`]; this module only records commands.
//!
//! Forward descriptor bindings (see [`bindings`]):
//!
//! | binding | contents                       | updated          |
//! |---------|--------------------------------|------------------|
//! | 0       | camera block                   | once per frame   |
//! | 1       | lights                         | once per frame   |
//! | 2       | material factors               | per draw         |
//! | 3       | base colour texture            | per draw         |
//! | 4       | shadow maps, [`MAX_LIGHTS`]    | once per frame   |

use ash::{vk, Device};
use bytemuck::Pod;

use crate::core::VulkanRendererConfig;
use crate::render::backends::vulkan::resources::geometry_store::{BufferView, Index};
use crate::render::backends::vulkan::rendering::commands::ActiveRenderPass;
use crate::render::backends::vulkan::state::frame_loop::FrameContext;
use crate::render::backends::vulkan::state::present::{ForwardPipelineSource, VulkanFrameDriver};
use crate::render::backends::vulkan::state::shadow_map::ShadowMaps;
use crate::render::backends::vulkan::{
    AdHocQueues, FrameLoop, FrameStatus, GeometryStore, MaterialDesc, MaterialHandle, MaterialKey,
    MaterialStore, MeshHandle, PresentTarget, ShadowPipeline, TextureHandle, TextureStore,
    UniformBufferArray, VulkanContext, VulkanError, VulkanResult, Window,
};
use crate::render::pipeline::RenderConfig;
use crate::scene::{
    CameraUniform, DrawItem, FrameInput, LightingUniform, MeshData, SceneAssets, ShadowUniform,
    MAX_LIGHTS,
};

/// Name of the forward pipeline definition
pub const FORWARD_PIPELINE: &str = "forward";

/// Name of the shadow pipeline definition
pub const SHADOW_PIPELINE: &str = "shadow";

const DEPTH_BIAS_CONSTANT: f32 = 1.25;
const DEPTH_BIAS_SLOPE: f32 = 1.75;

/// Descriptor binding indices the bundled layouts use
pub mod bindings {
    /// Forward: camera block
    pub const CAMERA: u32 = 0;
    /// Forward: lights
    pub const LIGHTING: u32 = 1;
    /// Forward: material factors
    pub const MATERIAL: u32 = 2;
    /// Forward: base colour texture
    pub const BASE_COLOR: u32 = 3;
    /// Forward: shadow map array
    pub const SHADOW_MAPS: u32 = 4;
    /// Shadow: light matrix
    pub const SHADOW_LIGHT: u32 = 0;
}

/// Clear values in forward attachment order
///
/// Attachment 1 is always depth; every other attachment is colour.
pub fn forward_clear_values(attachment_count: usize, color: [f32; 4]) -> Vec<vk::ClearValue> {
    (0..attachment_count)
        .map(|i| {
            if i == 1 {
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
                }
            } else {
                vk::ClearValue {
                    color: vk::ClearColorValue { float32: color },
                }
            }
        })
        .collect()
}

/// Swapchain-independent resources the recording code reads and writes
struct FrameResources {
    shadow_pipeline: ShadowPipeline,
    shadow_maps: ShadowMaps,
    camera_uniforms: UniformBufferArray<CameraUniform>,
    lighting_uniforms: UniformBufferArray<LightingUniform>,
    shadow_uniforms: UniformBufferArray<ShadowUniform>,
    materials: MaterialStore,
    textures: TextureStore,
    geometry: GeometryStore,
}

impl FrameResources {
    /// Write slot uniforms, then record shadow and forward passes
    fn record(
        &mut self,
        context: &VulkanContext,
        target: &mut PresentTarget,
        frame: &FrameContext,
        input: &FrameInput,
    ) -> VulkanResult<()> {
        let device = context.raw_device();
        let lights = input.active_lights();

        self.camera_uniforms.copy_from_at(&input.camera, 0, frame.slot)?;
        self.lighting_uniforms.copy_from_at(&input.lighting(), 0, frame.slot)?;
        for (i, light) in lights.iter().enumerate() {
            self.shadow_uniforms
                .copy_from_at(&ShadowUniform::from(light), i as u32, frame.slot)?;
        }

        self.record_shadow_passes(device, frame, lights.len(), &input.draws)?;
        self.record_forward_pass(device, target, frame, input)
    }

    fn record_shadow_passes(
        &mut self,
        device: &Device,
        frame: &FrameContext,
        light_count: usize,
        draws: &[DrawItem],
    ) -> VulkanResult<()> {
        let command_buffer = frame.command_buffer;
        let extent = self.shadow_maps.extent();
        let render_pass = self.shadow_maps.render_pass().handle();
        let clear_values = [vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
        }];

        for light in 0..light_count {
            let Some(map) = self.shadow_maps.get(light) else {
                break;
            };
            let light_info = self.shadow_uniforms.descriptor_info(light as u32, frame.slot)?;

            let pass = ActiveRenderPass::begin(
                device,
                command_buffer,
                render_pass,
                map.framebuffer(),
                extent,
                &clear_values,
            );
            pass.set_viewport(extent);
            self.shadow_pipeline.pipeline().bind(command_buffer);
            self.shadow_pipeline
                .set_depth_bias(command_buffer, DEPTH_BIAS_CONSTANT, DEPTH_BIAS_SLOPE);

            let pipeline = self.shadow_pipeline.pipeline_mut();
            pipeline.descriptors_mut().reset_writes();
            pipeline
                .descriptors_mut()
                .write_uniform_buffer(light_info, bindings::SHADOW_LIGHT)?;
            pipeline.push_descriptors(command_buffer);

            for draw in draws {
                pipeline.push_model(command_buffer, &draw.model);
                self.geometry.record_draw(device, command_buffer, draw.mesh)?;
            }
        }
        Ok(())
    }

    fn record_forward_pass(
        &mut self,
        device: &Device,
        target: &mut PresentTarget,
        frame: &FrameContext,
        input: &FrameInput,
    ) -> VulkanResult<()> {
        let command_buffer = frame.command_buffer;
        let extent = target.extent();
        let framebuffer = target.framebuffer(frame.image_index)?;
        let clear_values = forward_clear_values(target.render_pass().attachment_count(), input.clear_color);
        let render_pass = target.render_pass().handle();

        let camera = self.camera_uniforms.descriptor_info(0, frame.slot)?;
        let lighting = self.lighting_uniforms.descriptor_info(0, frame.slot)?;
        let shadow_maps = self.shadow_maps.descriptor_infos();

        let pass = ActiveRenderPass::begin(
            device,
            command_buffer,
            render_pass,
            framebuffer,
            extent,
            &clear_values,
        );
        pass.set_viewport(extent);

        let pipeline = target.forward_pipeline_mut();
        pipeline.bind(command_buffer);
        let descriptors = pipeline.descriptors_mut();
        descriptors.reset_writes();
        descriptors.write_uniform_buffer(camera, bindings::CAMERA)?;
        descriptors.write_uniform_buffer(lighting, bindings::LIGHTING)?;
        descriptors.write_combined_image_samplers(&shadow_maps, bindings::SHADOW_MAPS)?;

        for draw in &input.draws {
            let material = self
                .materials
                .get(draw.material)
                .ok_or_else(|| VulkanError::InvalidOperation {
                    reason: format!("Unknown material {:?}", draw.material),
                })?;
            let texture = material
                .desc
                .base_color_texture
                .unwrap_or_else(|| self.textures.white());

            let descriptors = pipeline.descriptors_mut();
            descriptors.write_uniform_buffer(
                self.materials.uniform_descriptor(draw.material)?,
                bindings::MATERIAL,
            )?;
            descriptors.write_combined_image_sampler(
                self.textures.descriptor_or_white(texture),
                bindings::BASE_COLOR,
            )?;
            pipeline.push_descriptors(command_buffer);
            pipeline.push_model(command_buffer, &draw.model);
            self.geometry.record_draw(device, command_buffer, draw.mesh)?;
        }
        Ok(())
    }
}

/// Vulkan renderer: context, stores, pipelines and the frame loop
pub struct VulkanRenderer {
    // Field order is drop order; the context goes last
    present: PresentTarget,
    frame_loop: FrameLoop,
    resources: FrameResources,
    adhoc: AdHocQueues,
    warned_light_overflow: bool,
    context: VulkanContext,
}

impl VulkanRenderer {
    /// Create the renderer for `window`
    ///
    /// `render_config` must define a forward pipeline named
    /// [`FORWARD_PIPELINE`] and a shadow pipeline named [`SHADOW_PIPELINE`].
    pub fn new(window: &mut Window, config: &VulkanRendererConfig, render_config: RenderConfig) -> VulkanResult<Self> {
        config.validate()?;
        let context = VulkanContext::new(window, config)?;
        let device = &context.device;
        let frames_in_flight = config.max_frames_in_flight;
        let alignment = context.physical_device.min_uniform_buffer_offset_alignment();

        let mut adhoc = AdHocQueues::new(device)?;

        let shadow_maps = ShadowMaps::new(
            device,
            &mut adhoc.graphics,
            context.physical_device.depth_format,
            config.shadow_map_size,
            MAX_LIGHTS,
        )?;
        let shadow_pipeline = ShadowPipeline::from_config(
            device,
            &render_config,
            SHADOW_PIPELINE,
            &config.shader_dir,
            shadow_maps.render_pass(),
        )?;

        let resources = FrameResources {
            shadow_pipeline,
            shadow_maps,
            camera_uniforms: UniformBufferArray::new(device, alignment, 1, frames_in_flight)?,
            lighting_uniforms: UniformBufferArray::new(device, alignment, 1, frames_in_flight)?,
            shadow_uniforms: UniformBufferArray::new(device, alignment, MAX_LIGHTS as u32, frames_in_flight)?,
            materials: MaterialStore::new(device, alignment, config.max_materials)?,
            textures: TextureStore::new(device, &mut adhoc.graphics)?,
            geometry: GeometryStore::new(device, config.vertex_capacity_bytes, config.index_capacity_bytes)?,
        };

        let (width, height) = window.framebuffer_size();
        let present = PresentTarget::new(
            &context,
            vk::Extent2D { width, height },
            frames_in_flight,
            ForwardPipelineSource {
                config: render_config,
                pipeline: FORWARD_PIPELINE.to_string(),
                shader_dir: config.shader_dir.clone(),
            },
        )?;
        let frame_loop = FrameLoop::new(frames_in_flight)?;

        log::info!(
            "Vulkan renderer ready: {} frame(s) in flight, {:?}, {}x{}",
            frames_in_flight,
            context.physical_device.msaa_samples,
            present.extent().width,
            present.extent().height
        );

        Ok(Self {
            present,
            frame_loop,
            resources,
            adhoc,
            warned_light_overflow: false,
            context,
        })
    }

    /// Render and present one frame
    ///
    /// Out-of-date and suboptimal swapchains are handled internally and
    /// reported through the returned [`FrameStatus`]; any error is fatal.
    pub fn draw_frame(&mut self, window: &mut Window, input: &FrameInput) -> VulkanResult<FrameStatus> {
        if input.lights.len() > MAX_LIGHTS && !self.warned_light_overflow {
            log::warn!(
                "{} lights submitted; only the first {} are rendered",
                input.lights.len(),
                MAX_LIGHTS
            );
            self.warned_light_overflow = true;
        }

        let Self {
            present,
            frame_loop,
            resources,
            context,
            ..
        } = self;
        let mut driver = VulkanFrameDriver {
            target: present,
            context,
            window,
        };
        frame_loop.run_frame(&mut driver, |driver, frame| {
            resources.record(driver.context, &mut *driver.target, frame, input)
        })
    }

    /// Rebuild the swapchain before the next frame
    pub fn request_resize(&mut self) {
        self.frame_loop.request_recreate();
    }

    /// Slot the next frame will use
    pub fn frame_index(&self) -> usize {
        self.frame_loop.frame_index()
    }

    /// Current swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.present.extent()
    }

    /// Width over height of the swapchain
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.extent();
        extent.width as f32 / extent.height.max(1) as f32
    }

    /// Device context
    pub fn context(&self) -> &VulkanContext {
        &self.context
    }

    /// Append vertices to the shared vertex buffer
    pub fn load_vertexes<V: Pod>(&mut self, vertices: &[V]) -> VulkanResult<BufferView> {
        self.resources
            .geometry
            .load_vertexes(&mut self.adhoc.transfer, vertices)
    }

    /// Append indices to the shared index buffer
    pub fn load_indexes(&mut self, indices: &[Index]) -> VulkanResult<BufferView> {
        self.resources
            .geometry
            .load_indexes(&mut self.adhoc.transfer, indices)
    }

    /// Register a mesh over previously loaded views
    pub fn create_mesh(&mut self, vertices: BufferView, indices: BufferView) -> VulkanResult<MeshHandle> {
        self.resources.geometry.create_mesh(vertices, indices)
    }

    /// Existing material for `key`
    pub fn material_for(&self, key: &MaterialKey) -> Option<MaterialHandle> {
        self.resources.materials.material_for(key)
    }

    /// Create the material for `key`, or return the one already created
    pub fn create_material(&mut self, key: MaterialKey, desc: MaterialDesc) -> VulkanResult<MaterialHandle> {
        if let Some(texture) = desc.base_color_texture {
            if self.resources.textures.get(texture).is_none() {
                return Err(VulkanError::InvalidOperation {
                    reason: format!("Material {key:?} references unknown texture {texture:?}"),
                });
            }
        }
        self.resources
            .materials
            .create_material(&mut self.adhoc.transfer, key, desc)
    }

    /// Upload a tightly packed RGBA8 texture
    pub fn create_texture_rgba8(&mut self, width: u32, height: u32, pixels: &[u8]) -> VulkanResult<TextureHandle> {
        self.resources.textures.create_texture_rgba8(
            &self.context.device,
            &mut self.adhoc.graphics,
            width,
            height,
            pixels,
        )
    }

    /// Block until the GPU is idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.context.wait_idle()
    }
}

impl SceneAssets for VulkanRenderer {
    fn load_mesh(&mut self, mesh: &MeshData) -> VulkanResult<MeshHandle> {
        let vertices = self.load_vertexes(&mesh.vertices)?;
        let indices = self.load_indexes(&mesh.indices)?;
        self.create_mesh(vertices, indices)
    }

    fn create_material(&mut self, key: MaterialKey, desc: MaterialDesc) -> VulkanResult<MaterialHandle> {
        VulkanRenderer::create_material(self, key, desc)
    }

    fn create_texture_rgba8(&mut self, width: u32, height: u32, pixels: &[u8]) -> VulkanResult<TextureHandle> {
        VulkanRenderer::create_texture_rgba8(self, width, height, pixels)
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        log::debug!("Shutting down Vulkan renderer");
        if let Err(e) = self.context.wait_idle() {
            log::error!("Device wait failed during shutdown: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_values_with_msaa() {
        let values = forward_clear_values(3, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(values.len(), 3);
        unsafe {
            assert_eq!(values[0].color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 1.0);
            assert_eq!(values[2].color.float32, [0.1, 0.2, 0.3, 1.0]);
        }
    }

    #[test]
    fn test_clear_values_without_msaa() {
        let values = forward_clear_values(2, [0.0; 4]);
        assert_eq!(values.len(), 2);
        unsafe {
            assert_eq!(values[1].depth_stencil.depth, 1.0);
            assert_eq!(values[1].depth_stencil.stencil, 0);
        }
    }

    #[test]
    fn test_binding_indices_are_contiguous() {
        let forward = [
            bindings::CAMERA,
            bindings::LIGHTING,
            bindings::MATERIAL,
            bindings::BASE_COLOR,
            bindings::SHADOW_MAPS,
        ];
        assert!(forward.iter().enumerate().all(|(i, &b)| b == i as u32));
        assert_eq!(bindings::SHADOW_LIGHT, 0);
    }
}
