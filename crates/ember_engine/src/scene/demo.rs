//! Built-in demo scenes
//!
//! A closed set of scenes dispatched through [`DemoScene`]. Each scene loads
//! its assets through [`SceneAssets`], animates its graph in `update` and
//! fills a [`FrameInput`] in `render`.

use crate::foundation::math::{constants, Quat, Transform, Vec3};
use crate::render::backends::vulkan::{
    MaterialDesc, MaterialHandle, MaterialKey, MeshHandle, TextureHandle, VulkanResult,
};
use crate::scene::frame_input::{Camera, FrameInput, Light, MAX_LIGHTS};
use crate::scene::graph::{NodeId, Renderable, SceneGraph};
use crate::scene::primitives::{self, MeshData};

/// Asset operations a scene needs from the renderer
pub trait SceneAssets {
    /// Upload vertices and indices and register a mesh
    fn load_mesh(&mut self, mesh: &MeshData) -> VulkanResult<MeshHandle>;

    /// Create (or reuse) the material for `key`
    fn create_material(&mut self, key: MaterialKey, desc: MaterialDesc) -> VulkanResult<MaterialHandle>;

    /// Upload a tightly packed RGBA8 texture
    fn create_texture_rgba8(&mut self, width: u32, height: u32, pixels: &[u8]) -> VulkanResult<TextureHandle>;
}

/// Built-in scenes
#[derive(Debug, Clone)]
pub enum DemoScene {
    /// Ring of spinning cubes over a checkered floor, one shadowing light
    Cubes(CubesScene),
    /// Cube tower lit by coloured lights circling it
    Lights(LightsScene),
}

impl DemoScene {
    /// Names accepted by [`from_name`](Self::from_name)
    pub const NAMES: [&'static str; 2] = ["cubes", "lights"];

    /// Scene by name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "cubes" => Some(Self::Cubes(CubesScene::default())),
            "lights" => Some(Self::Lights(LightsScene::default())),
            _ => None,
        }
    }

    /// Create the scene's GPU assets and build its graph
    pub fn load(&mut self, assets: &mut impl SceneAssets) -> VulkanResult<()> {
        match self {
            Self::Cubes(scene) => scene.load(assets),
            Self::Lights(scene) => scene.load(assets),
        }
    }

    /// Advance animation to `time` seconds
    pub fn update(&mut self, frame_index: usize, aspect: f32, time: f32) {
        log::trace!("Scene update on slot {frame_index} at t={time:.3}");
        match self {
            Self::Cubes(scene) => scene.update(aspect, time),
            Self::Lights(scene) => scene.update(aspect, time),
        }
    }

    /// Write this frame's camera, lights and draws into `input`
    pub fn render(&self, input: &mut FrameInput) {
        input.clear();
        match self {
            Self::Cubes(scene) => scene.render(input),
            Self::Lights(scene) => scene.render(input),
        }
    }
}

/// Meshes and materials shared by the scenes
#[derive(Debug, Clone, Copy)]
struct CommonAssets {
    cube: MeshHandle,
    floor: MeshHandle,
    floor_material: MaterialHandle,
}

impl CommonAssets {
    fn load(assets: &mut impl SceneAssets) -> VulkanResult<Self> {
        let cube = assets.load_mesh(&primitives::cube(0.5))?;
        let floor = assets.load_mesh(&primitives::plane(10.0, 8.0))?;
        let checker = primitives::checkerboard_rgba8(64, 8, [200, 200, 200, 255], [90, 90, 90, 255]);
        let checker = assets.create_texture_rgba8(64, 64, &checker)?;
        let floor_material = assets.create_material(
            MaterialKey::new("floor"),
            MaterialDesc {
                specular: 0.1,
                base_color_texture: Some(checker),
                ..MaterialDesc::default()
            },
        )?;
        Ok(Self {
            cube,
            floor,
            floor_material,
        })
    }
}

fn color_material(assets: &mut impl SceneAssets, name: &str, rgb: [f32; 3]) -> VulkanResult<MaterialHandle> {
    assets.create_material(
        MaterialKey::new(name),
        MaterialDesc {
            base_color: [rgb[0], rgb[1], rgb[2], 1.0],
            ..MaterialDesc::default()
        },
    )
}

/// Graph plus camera, shared by the scene variants
#[derive(Debug, Clone, Default)]
struct Stage {
    graph: SceneGraph,
    camera: Camera,
    aspect: f32,
}

impl Stage {
    fn render(&self, input: &mut FrameInput) {
        input.camera = self.camera.uniform(self.aspect.max(f32::EPSILON));
        self.graph.collect(input);
    }
}

/// See [`DemoScene::Cubes`]
#[derive(Debug, Clone, Default)]
pub struct CubesScene {
    stage: Stage,
    spinners: Vec<NodeId>,
    ring: Option<NodeId>,
}

impl CubesScene {
    const CUBES: usize = 6;

    fn load(&mut self, assets: &mut impl SceneAssets) -> VulkanResult<()> {
        let common = CommonAssets::load(assets)?;
        let red = color_material(assets, "red", [0.8, 0.2, 0.2])?;
        let blue = color_material(assets, "blue", [0.2, 0.3, 0.8])?;

        let mut graph = SceneGraph::new();
        let floor = graph.add_node(None, Transform::identity());
        let ring = graph.add_node(None, Transform::from_position(Vec3::new(0.0, 1.0, 0.0)));
        let sun = graph.add_node(None, Transform::identity());
        let (Some(floor), Some(ring), Some(sun)) = (floor, ring, sun) else {
            return Ok(());
        };
        graph.set_renderable(
            floor,
            Renderable {
                mesh: common.floor,
                material: common.floor_material,
            },
        );
        graph.set_light(
            sun,
            Light::spot(Vec3::new(4.0, 9.0, 4.0), Vec3::zeros()).with_color(Vec3::new(1.0, 0.95, 0.9), 1.2),
        );

        self.spinners.clear();
        for i in 0..Self::CUBES {
            let angle = i as f32 / Self::CUBES as f32 * constants::TAU;
            let position = Vec3::new(angle.cos() * 3.0, 0.0, angle.sin() * 3.0);
            let Some(node) = graph.add_node(Some(ring), Transform::from_position(position)) else {
                continue;
            };
            let material = if i % 2 == 0 { red } else { blue };
            graph.set_renderable(node, Renderable { mesh: common.cube, material });
            self.spinners.push(node);
        }

        self.ring = Some(ring);
        self.stage = Stage {
            graph,
            camera: Camera::default(),
            aspect: 1.0,
        };
        log::debug!("Cubes scene loaded with {} nodes", self.stage.graph.len());
        Ok(())
    }

    fn update(&mut self, aspect: f32, time: f32) {
        self.stage.aspect = aspect;
        if let Some(ring) = self.ring.and_then(|ring| self.stage.graph.local_mut(ring)) {
            ring.rotation = Quat::from_axis_angle(&Vec3::y_axis(), time * 0.3);
        }
        for (i, &node) in self.spinners.iter().enumerate() {
            if let Some(local) = self.stage.graph.local_mut(node) {
                let axis = if i % 2 == 0 { Vec3::x_axis() } else { Vec3::z_axis() };
                local.rotation = Quat::from_axis_angle(&axis, time * (1.0 + i as f32 * 0.2));
            }
        }
        self.stage.graph.update_world();
    }

    fn render(&self, input: &mut FrameInput) {
        self.stage.render(input);
    }
}

/// See [`DemoScene::Lights`]
#[derive(Debug, Clone, Default)]
pub struct LightsScene {
    stage: Stage,
    orbit: Option<NodeId>,
}

impl LightsScene {
    const COLORS: [[f32; 3]; MAX_LIGHTS] = [
        [1.0, 0.3, 0.3],
        [0.3, 1.0, 0.3],
        [0.3, 0.4, 1.0],
        [1.0, 0.9, 0.4],
    ];

    fn load(&mut self, assets: &mut impl SceneAssets) -> VulkanResult<()> {
        let common = CommonAssets::load(assets)?;
        let white = color_material(assets, "white", [0.9, 0.9, 0.9])?;

        let mut graph = SceneGraph::new();
        let floor = graph.add_node(None, Transform::identity());
        let tower = graph.add_node(None, Transform::identity());
        let orbit = graph.add_node(None, Transform::identity());
        let (Some(floor), Some(tower), Some(orbit)) = (floor, tower, orbit) else {
            return Ok(());
        };
        graph.set_renderable(
            floor,
            Renderable {
                mesh: common.floor,
                material: common.floor_material,
            },
        );

        let mut parent = tower;
        for level in 0..4 {
            let offset = if level == 0 { 0.5 } else { 1.0 };
            let local = Transform::from_position(Vec3::new(0.0, offset, 0.0))
                .with_rotation(Quat::from_axis_angle(&Vec3::y_axis(), 0.4));
            let Some(block) = graph.add_node(Some(parent), local) else {
                break;
            };
            graph.set_renderable(block, Renderable { mesh: common.cube, material: white });
            parent = block;
        }

        for (i, color) in Self::COLORS.iter().enumerate() {
            let angle = i as f32 / MAX_LIGHTS as f32 * constants::TAU;
            let position = Vec3::new(angle.cos() * 6.0, 7.0, angle.sin() * 6.0);
            if let Some(lamp) = graph.add_node(Some(orbit), Transform::identity()) {
                let light = Light::spot(position, Vec3::new(0.0, 1.0, 0.0)).with_color(Vec3::from(*color), 0.6);
                graph.set_light(lamp, light);
            }
        }

        self.orbit = Some(orbit);
        self.stage = Stage {
            graph,
            camera: Camera {
                position: Vec3::new(0.0, 6.0, 11.0),
                target: Vec3::new(0.0, 1.5, 0.0),
                ..Camera::default()
            },
            aspect: 1.0,
        };
        log::debug!("Lights scene loaded with {} nodes", self.stage.graph.len());
        Ok(())
    }

    fn update(&mut self, aspect: f32, time: f32) {
        self.stage.aspect = aspect;
        if let Some(orbit) = self.orbit.and_then(|orbit| self.stage.graph.local_mut(orbit)) {
            orbit.rotation = Quat::from_axis_angle(&Vec3::y_axis(), time * 0.5);
        }
        self.stage.graph.update_world();
    }

    fn render(&self, input: &mut FrameInput) {
        self.stage.render(input);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::collections::Handle;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingAssets {
        meshes: u32,
        textures: u32,
        materials: HashMap<MaterialKey, MaterialHandle>,
    }

    impl SceneAssets for RecordingAssets {
        fn load_mesh(&mut self, mesh: &MeshData) -> VulkanResult<MeshHandle> {
            assert!(!mesh.indices.is_empty());
            self.meshes += 1;
            Ok(Handle::from_raw(self.meshes))
        }

        fn create_material(&mut self, key: MaterialKey, _desc: MaterialDesc) -> VulkanResult<MaterialHandle> {
            let next = Handle::from_raw(self.materials.len() as u32 + 1);
            Ok(*self.materials.entry(key).or_insert(next))
        }

        fn create_texture_rgba8(&mut self, width: u32, height: u32, pixels: &[u8]) -> VulkanResult<TextureHandle> {
            assert_eq!(pixels.len() as u32, width * height * 4);
            self.textures += 1;
            Ok(Handle::from_raw(self.textures + 1))
        }
    }

    #[test]
    fn test_unknown_scene_name() {
        assert!(DemoScene::from_name("teapot").is_none());
        for name in DemoScene::NAMES {
            assert!(DemoScene::from_name(name).is_some());
        }
    }

    #[test]
    fn test_cubes_scene_frame_input() {
        let mut assets = RecordingAssets::default();
        let mut scene = DemoScene::from_name("cubes").unwrap();
        scene.load(&mut assets).unwrap();
        scene.update(0, 16.0 / 9.0, 1.0);

        let mut input = FrameInput::default();
        scene.render(&mut input);
        assert_eq!(input.draws.len(), 1 + CubesScene::CUBES);
        assert_eq!(input.lights.len(), 1);
        assert_eq!(assets.meshes, 2);
        assert_eq!(assets.textures, 1);
        assert_eq!(assets.materials.len(), 3);
    }

    #[test]
    fn test_lights_scene_uses_every_light_slot() {
        let mut assets = RecordingAssets::default();
        let mut scene = DemoScene::from_name("lights").unwrap();
        scene.load(&mut assets).unwrap();
        scene.update(1, 1.0, 0.5);

        let mut input = FrameInput::default();
        scene.render(&mut input);
        assert_eq!(input.lights.len(), MAX_LIGHTS);
        assert_eq!(input.active_lights().len(), MAX_LIGHTS);
        assert_eq!(input.draws.len(), 5);
    }

    #[test]
    fn test_render_replaces_previous_frame() {
        let mut assets = RecordingAssets::default();
        let mut scene = DemoScene::from_name("cubes").unwrap();
        scene.load(&mut assets).unwrap();
        scene.update(0, 1.0, 0.0);

        let mut input = FrameInput::default();
        scene.render(&mut input);
        let first = input.draws.len();
        scene.update(1, 1.0, 0.1);
        scene.render(&mut input);
        assert_eq!(input.draws.len(), first);
    }

    #[test]
    fn test_spinning_keeps_cubes_on_ring() {
        let mut assets = RecordingAssets::default();
        let mut scene = CubesScene::default();
        scene.load(&mut assets).unwrap();
        scene.update(1.0, 2.5);

        for &node in &scene.spinners {
            let world = scene.stage.graph.world(node).unwrap();
            let center = Vec3::new(world[(0, 3)], world[(1, 3)], world[(2, 3)]);
            assert!((center.xz().norm() - 3.0).abs() < 1e-4);
            assert!((center.y - 1.0).abs() < 1e-5);
        }
    }
}
