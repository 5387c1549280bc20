//! Scene management
//!
//! A small scene layer on top of the renderer:
//!
//! ```text
//! DemoScene (load / update / render)
//!      ↓
//! SceneGraph (NodeId-indexed transforms, renderables, lights)
//!      ↓
//! FrameInput (camera, lights, draw list)
//!      ↓
//! VulkanRenderer::draw_frame
//! ```

pub mod demo;
pub mod frame_input;
pub mod graph;
pub mod primitives;

pub use demo::{DemoScene, SceneAssets};
pub use frame_input::{
    Camera, CameraUniform, DrawItem, DrawList, FrameInput, Light, LightData, LightingUniform,
    ShadowUniform, MAX_LIGHTS,
};
pub use graph::{NodeId, Renderable, SceneGraph};
pub use primitives::{MeshData, Vertex};
