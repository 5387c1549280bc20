//! Structure-of-arrays scene graph
//!
//! Nodes are [`NodeId`] indices into parallel arrays. The hierarchy is stored
//! as parent / first-child / next-sibling links, so adding a child never
//! reallocates another node's data. Traversal is depth-first pre-order with
//! siblings visited in insertion order; world matrices are `parent * local`.

use crate::foundation::math::{Mat4, Point3, Transform};
use crate::render::backends::vulkan::{MaterialHandle, MeshHandle};
use crate::scene::frame_input::{DrawItem, FrameInput, Light};

/// Index of a node in a [`SceneGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Position in the component arrays
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Mesh and material drawn at a node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Renderable {
    /// Geometry
    pub mesh: MeshHandle,
    /// Shading
    pub material: MaterialHandle,
}

/// Flat scene hierarchy
#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    parent: Vec<Option<NodeId>>,
    first_child: Vec<Option<NodeId>>,
    last_child: Vec<Option<NodeId>>,
    next_sibling: Vec<Option<NodeId>>,
    local: Vec<Transform>,
    world: Vec<Mat4>,
    renderable: Vec<Option<Renderable>>,
    light: Vec<Option<Light>>,
    roots: Vec<NodeId>,
}

impl SceneGraph {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Add a node under `parent` (or as a root), after any existing siblings
    ///
    /// Returns `None` if `parent` does not belong to this graph.
    pub fn add_node(&mut self, parent: Option<NodeId>, local: Transform) -> Option<NodeId> {
        if parent.is_some_and(|p| p.index() >= self.len()) {
            return None;
        }

        let id = NodeId(self.len() as u32);
        self.parent.push(parent);
        self.first_child.push(None);
        self.last_child.push(None);
        self.next_sibling.push(None);
        self.local.push(local);
        self.world.push(Mat4::identity());
        self.renderable.push(None);
        self.light.push(None);

        match parent {
            Some(p) => {
                match self.last_child[p.index()] {
                    Some(last) => self.next_sibling[last.index()] = Some(id),
                    None => self.first_child[p.index()] = Some(id),
                }
                self.last_child[p.index()] = Some(id);
            }
            None => self.roots.push(id),
        }
        Some(id)
    }

    /// Parent of `node`
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.parent.get(node.index()).copied().flatten()
    }

    /// Children of `node` in insertion order
    pub fn children(&self, node: NodeId) -> Children<'_> {
        Children {
            graph: self,
            next: self.first_child.get(node.index()).copied().flatten(),
        }
    }

    /// Local transform
    pub fn local(&self, node: NodeId) -> Option<&Transform> {
        self.local.get(node.index())
    }

    /// Local transform, for animation
    pub fn local_mut(&mut self, node: NodeId) -> Option<&mut Transform> {
        self.local.get_mut(node.index())
    }

    /// World matrix as of the last [`update_world`](Self::update_world)
    pub fn world(&self, node: NodeId) -> Option<&Mat4> {
        self.world.get(node.index())
    }

    /// Attach a mesh to draw at `node`
    pub fn set_renderable(&mut self, node: NodeId, renderable: Renderable) {
        if let Some(slot) = self.renderable.get_mut(node.index()) {
            *slot = Some(renderable);
        }
    }

    /// Attach a light to `node`; its position and target are in the node's space
    pub fn set_light(&mut self, node: NodeId, light: Light) {
        if let Some(slot) = self.light.get_mut(node.index()) {
            *slot = Some(light);
        }
    }

    /// Nodes in depth-first pre-order, siblings in insertion order
    pub fn traversal(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            order.push(node);
            let first = stack.len();
            stack.extend(self.children(node));
            stack[first..].reverse();
        }
        order
    }

    /// Recompute every world matrix from the local transforms
    pub fn update_world(&mut self) {
        for node in self.traversal() {
            let local = self.local[node.index()].to_matrix();
            self.world[node.index()] = match self.parent[node.index()] {
                Some(parent) => self.world[parent.index()] * local,
                None => local,
            };
        }
    }

    /// Append draws and world-space lights to `input`, in traversal order
    pub fn collect(&self, input: &mut FrameInput) {
        for node in self.traversal() {
            let world = self.world[node.index()];
            if let Some(renderable) = self.renderable[node.index()] {
                input.draws.push(DrawItem {
                    mesh: renderable.mesh,
                    material: renderable.material,
                    model: world,
                });
            }
            if let Some(light) = self.light[node.index()] {
                let world_light = Light {
                    position: world.transform_point(&Point3::from(light.position)).coords,
                    target: world.transform_point(&Point3::from(light.target)).coords,
                    ..light
                };
                input.lights.push(world_light.data());
            }
        }
    }
}

/// Iterator over a node's children
pub struct Children<'a> {
    graph: &'a SceneGraph,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.graph.next_sibling[current.index()];
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::collections::Handle;
    use crate::foundation::math::Vec3;
    use approx::assert_relative_eq;

    fn at(x: f32, y: f32, z: f32) -> Transform {
        Transform::from_position(Vec3::new(x, y, z))
    }

    #[test]
    fn test_traversal_is_preorder_in_insertion_order() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node(None, Transform::identity()).unwrap();
        let b = graph.add_node(None, Transform::identity()).unwrap();
        let a1 = graph.add_node(Some(a), Transform::identity()).unwrap();
        let a2 = graph.add_node(Some(a), Transform::identity()).unwrap();
        let a1x = graph.add_node(Some(a1), Transform::identity()).unwrap();
        let b1 = graph.add_node(Some(b), Transform::identity()).unwrap();

        assert_eq!(graph.traversal(), vec![a, a1, a1x, a2, b, b1]);
        assert_eq!(graph.children(a).collect::<Vec<_>>(), vec![a1, a2]);
        assert_eq!(graph.parent(a1x), Some(a1));
        assert_eq!(graph.parent(a), None);
    }

    #[test]
    fn test_parent_visited_before_children() {
        let mut graph = SceneGraph::new();
        let root = graph.add_node(None, Transform::identity()).unwrap();
        let mut nodes = vec![root];
        for i in 0..20 {
            let parent = nodes[i / 3];
            nodes.push(graph.add_node(Some(parent), Transform::identity()).unwrap());
        }

        let order = graph.traversal();
        assert_eq!(order.len(), graph.len());
        let position = |n: NodeId| order.iter().position(|&o| o == n).unwrap();
        for &node in &nodes {
            if let Some(parent) = graph.parent(node) {
                assert!(position(parent) < position(node));
            }
        }
    }

    #[test]
    fn test_world_is_parent_times_local() {
        let mut graph = SceneGraph::new();
        let root = graph.add_node(None, at(10.0, 0.0, 0.0).with_scale(2.0)).unwrap();
        let child = graph.add_node(Some(root), at(1.0, 0.0, 0.0)).unwrap();
        graph.update_world();

        let expected = graph.local(root).unwrap().to_matrix() * graph.local(child).unwrap().to_matrix();
        assert_relative_eq!(*graph.world(child).unwrap(), expected, epsilon = 1e-6);
        let origin = graph.world(child).unwrap().transform_point(&Point3::origin());
        assert_relative_eq!(origin, Point3::new(12.0, 0.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_unknown_parent_is_rejected() {
        let mut graph = SceneGraph::new();
        assert!(graph.add_node(Some(NodeId(3)), Transform::identity()).is_none());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_collect_emits_draws_and_world_lights() {
        let mut graph = SceneGraph::new();
        let root = graph.add_node(None, at(0.0, 1.0, 0.0)).unwrap();
        let cube = graph.add_node(Some(root), Transform::identity()).unwrap();
        let lamp = graph.add_node(Some(root), at(0.0, 4.0, 0.0)).unwrap();
        graph.set_renderable(
            cube,
            Renderable {
                mesh: Handle::from_raw(1),
                material: Handle::from_raw(2),
            },
        );
        graph.set_light(lamp, Light::spot(Vec3::zeros(), Vec3::new(0.0, -1.0, 0.0)));
        graph.update_world();

        let mut input = FrameInput::default();
        graph.collect(&mut input);
        assert_eq!(input.draws.len(), 1);
        assert_eq!(input.draws[0].material.raw(), 2);
        assert_relative_eq!(input.draws[0].model[(1, 3)], 1.0);
        assert_eq!(input.lights.len(), 1);
        assert_relative_eq!(input.lights[0].position[1], 5.0);
    }
}
