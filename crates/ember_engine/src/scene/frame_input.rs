//! Per-frame data handed from the scene to the renderer
//!
//! Everything in here is plain data. The `*Uniform` types are `#[repr(C)]`
//! and laid out for std140 so they can be copied into uniform buffers as-is:
//! every member is a `vec4` or `mat4`.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{constants, utils, Mat4, Mat4Ext, Vec3};
use crate::render::backends::vulkan::{MaterialHandle, MeshHandle};

/// Upper bound on lights (and shadow maps) per frame
pub const MAX_LIGHTS: usize = 4;

/// Camera block bound at forward binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    /// World to view
    pub view: [[f32; 4]; 4],
    /// View to clip
    pub proj: [[f32; 4]; 4],
    /// `proj * view`
    pub view_proj: [[f32; 4]; 4],
    /// Eye position, w = 1
    pub position: [f32; 4],
}

impl Default for CameraUniform {
    fn default() -> Self {
        Camera::default().uniform(1.0)
    }
}

/// Perspective camera looking at a target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// Eye position
    pub position: Vec3,
    /// Point looked at
    pub target: Vec3,
    /// Up direction
    pub up: Vec3,
    /// Vertical field of view in degrees
    pub fov_degrees: f32,
    /// Near plane distance
    pub near: f32,
    /// Far plane distance
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 3.0, 8.0),
            target: Vec3::zeros(),
            up: Vec3::y(),
            fov_degrees: 60.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    /// View matrix
    pub fn view(&self) -> Mat4 {
        Mat4::look_at(self.position, self.target, self.up)
    }

    /// Projection matrix for `aspect` (width / height)
    pub fn projection(&self, aspect: f32) -> Mat4 {
        Mat4::perspective(utils::deg_to_rad(self.fov_degrees), aspect, self.near, self.far)
    }

    /// Uniform block for `aspect`
    pub fn uniform(&self, aspect: f32) -> CameraUniform {
        let view = self.view();
        let proj = self.projection(aspect);
        CameraUniform {
            view: utils::mat4_columns(&view),
            proj: utils::mat4_columns(&proj),
            view_proj: utils::mat4_columns(&(proj * view)),
            position: [self.position.x, self.position.y, self.position.z, 1.0],
        }
    }
}

/// One light as the shaders see it
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightData {
    /// World to light clip space, used for the shadow lookup
    pub view_proj: [[f32; 4]; 4],
    /// Light position, w = 1
    pub position: [f32; 4],
    /// RGB colour, a = intensity
    pub color: [f32; 4],
}

/// Spot light casting a shadow
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    /// Light position
    pub position: Vec3,
    /// Point the light is aimed at
    pub target: Vec3,
    /// Linear RGB colour
    pub color: Vec3,
    /// Brightness multiplier
    pub intensity: f32,
    /// Cone of the shadow frustum in degrees
    pub cone_degrees: f32,
    /// Shadow frustum depth range
    pub range: f32,
}

impl Light {
    /// White spot light at `position` aimed at `target`
    pub fn spot(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            color: Vec3::new(1.0, 1.0, 1.0),
            intensity: 1.0,
            cone_degrees: 90.0,
            range: 50.0,
        }
    }

    /// Set colour and intensity
    pub fn with_color(mut self, color: Vec3, intensity: f32) -> Self {
        self.color = color;
        self.intensity = intensity;
        self
    }

    /// World to light clip space
    pub fn view_proj(&self) -> Mat4 {
        let direction = self.target - self.position;
        // look_at degenerates when up is parallel to the view direction
        let up = if direction.cross(&Vec3::y()).norm_squared() < 1e-6 {
            Vec3::z()
        } else {
            Vec3::y()
        };
        let fov = (self.cone_degrees * constants::DEG_TO_RAD).min(constants::PI * 0.95);
        Mat4::perspective(fov, 1.0, 0.1, self.range) * Mat4::look_at(self.position, self.target, up)
    }

    /// Shader representation
    pub fn data(&self) -> LightData {
        LightData {
            view_proj: utils::mat4_columns(&self.view_proj()),
            position: [self.position.x, self.position.y, self.position.z, 1.0],
            color: [self.color.x, self.color.y, self.color.z, self.intensity],
        }
    }
}

/// Light block bound at forward binding 1
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightingUniform {
    /// Active lights first, the rest zeroed
    pub lights: [LightData; MAX_LIGHTS],
    /// Ambient RGB, a unused
    pub ambient: [f32; 4],
    /// x = number of active lights
    pub count: [u32; 4],
}

impl LightingUniform {
    /// Pack up to [`MAX_LIGHTS`] lights; extra lights are ignored
    pub fn new(lights: &[LightData], ambient: Vec3) -> Self {
        let mut uniform = Self::zeroed();
        let count = lights.len().min(MAX_LIGHTS);
        uniform.lights[..count].copy_from_slice(&lights[..count]);
        uniform.ambient = [ambient.x, ambient.y, ambient.z, 0.0];
        uniform.count[0] = count as u32;
        uniform
    }
}

/// Light matrix bound at shadow binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShadowUniform {
    /// World to light clip space
    pub light_view_proj: [[f32; 4]; 4],
}

impl From<&LightData> for ShadowUniform {
    fn from(light: &LightData) -> Self {
        Self {
            light_view_proj: light.view_proj,
        }
    }
}

/// One mesh drawn with one material
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawItem {
    /// Geometry to draw
    pub mesh: MeshHandle,
    /// Material to shade it with
    pub material: MaterialHandle,
    /// Object to world transform
    pub model: Mat4,
}

/// Draws for one frame, in submission order
pub type DrawList = Vec<DrawItem>;

/// Everything the renderer needs from the scene for one frame
#[derive(Debug, Clone)]
pub struct FrameInput {
    /// Camera block
    pub camera: CameraUniform,
    /// Lights, at most [`MAX_LIGHTS`] are used
    pub lights: Vec<LightData>,
    /// Ambient light colour
    pub ambient: Vec3,
    /// Clear colour for the forward pass
    pub clear_color: [f32; 4],
    /// Draws
    pub draws: DrawList,
}

impl Default for FrameInput {
    fn default() -> Self {
        Self {
            camera: CameraUniform::default(),
            lights: Vec::new(),
            ambient: Vec3::new(0.05, 0.05, 0.05),
            clear_color: [0.02, 0.02, 0.03, 1.0],
            draws: Vec::new(),
        }
    }
}

impl FrameInput {
    /// Drop last frame's lights and draws, keeping allocations
    pub fn clear(&mut self) {
        self.lights.clear();
        self.draws.clear();
    }

    /// Lights that will actually be rendered
    pub fn active_lights(&self) -> &[LightData] {
        &self.lights[..self.lights.len().min(MAX_LIGHTS)]
    }

    /// Lighting uniform block for this frame
    pub fn lighting(&self) -> LightingUniform {
        LightingUniform::new(self.active_lights(), self.ambient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Point3, Vec4};
    use approx::assert_relative_eq;

    #[test]
    fn test_uniform_sizes_are_std140_friendly() {
        assert_eq!(std::mem::size_of::<CameraUniform>(), 208);
        assert_eq!(std::mem::size_of::<LightData>(), 96);
        assert_eq!(std::mem::size_of::<LightingUniform>(), 96 * MAX_LIGHTS + 32);
        assert_eq!(std::mem::size_of::<ShadowUniform>(), 64);
    }

    #[test]
    fn test_lighting_caps_light_count() {
        let light = Light::spot(Vec3::new(0.0, 5.0, 0.0), Vec3::zeros()).data();
        let lights = vec![light; MAX_LIGHTS + 2];
        let uniform = LightingUniform::new(&lights, Vec3::zeros());
        assert_eq!(uniform.count[0], MAX_LIGHTS as u32);
        assert_eq!(uniform.lights[MAX_LIGHTS - 1], light);
    }

    #[test]
    fn test_lighting_zeroes_unused_slots() {
        let light = Light::spot(Vec3::new(2.0, 4.0, 2.0), Vec3::zeros()).data();
        let uniform = LightingUniform::new(&[light], Vec3::new(0.1, 0.2, 0.3));
        assert_eq!(uniform.count[0], 1);
        assert_eq!(uniform.lights[1], LightData::zeroed());
        assert_relative_eq!(uniform.ambient[2], 0.3);
    }

    #[test]
    fn test_light_straight_down_projects_target_to_center() {
        let light = Light::spot(Vec3::new(0.0, 10.0, 0.0), Vec3::zeros());
        let clip = light.view_proj() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(clip.w > 0.0);
        assert_relative_eq!(clip.x / clip.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(clip.y / clip.w, 0.0, epsilon = 1e-5);
        let depth = clip.z / clip.w;
        assert!((0.0..=1.0).contains(&depth));
    }

    #[test]
    fn test_camera_uniform_matches_matrices() {
        let camera = Camera::default();
        let uniform = camera.uniform(16.0 / 9.0);
        let view_proj = camera.projection(16.0 / 9.0) * camera.view();
        assert_eq!(uniform.view_proj, utils::mat4_columns(&view_proj));
        assert_eq!(uniform.position[3], 1.0);

        let eye_space = camera.view().transform_point(&Point3::from(camera.target));
        assert!(eye_space.z < 0.0);
    }

    #[test]
    fn test_frame_input_clear_keeps_camera() {
        let mut input = FrameInput::default();
        input.camera = Camera::default().uniform(2.0);
        input.lights.push(Light::spot(Vec3::y(), Vec3::zeros()).data());
        input.clear();
        assert!(input.lights.is_empty());
        assert!(input.draws.is_empty());
        assert_eq!(input.camera, Camera::default().uniform(2.0));
    }
}
