//! Per-camera state, draw buffers, and tile-tree traversal

pub mod bound;
#[allow(clippy::module_inception)]
pub mod camera;
pub mod draws;
pub mod traversal;
pub mod tree;

pub use bound::{reorder_bound_layers, BoundParam};
pub use camera::{Camera, CameraView};
pub use draws::{
    ColliderDraw, ColliderTask, DrawTask, GeodataDraw, GeodataTask, MapDraws, RenderTask, Renders,
};
pub use traversal::traverse_layer;
pub use tree::{NodeIndex, TraverseNode, TraverseTree};
