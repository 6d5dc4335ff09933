//! Render tasks and per-frame draw buffers
//!
//! A `RenderTask` is the cached, resource-pinned form stored on a traverse
//! node; a `DrawTask` is its per-frame projection handed to the renderer,
//! with matrices flattened to f32 and resources reduced to opaque handles.

use crate::core::types::{DMat4, Mat3, Vec4};
use crate::resources::resource::{GpuHandle, GpuMesh, Resource, Validity};
use crate::tile::TileId;
use std::sync::Arc;

/// One textured draw of a submesh, cached on a traverse node
#[derive(Clone)]
pub struct RenderTask {
    pub mesh: GpuMesh,
    /// Pin on the mesh aggregate the submesh lives in
    pub aggregate: Arc<Resource>,
    pub texture_color: Option<Arc<Resource>>,
    pub texture_mask: Option<Arc<Resource>>,
    /// Normalized-tile to physical-SRS transform
    pub model: DMat4,
    pub uv_trans: Mat3,
    pub color: Vec4,
    pub external_uv: bool,
    pub bound_layer: Option<String>,
}

impl RenderTask {
    /// Whether every referenced resource is ready to draw
    pub fn ready(&self) -> bool {
        if self.aggregate.validity() != Validity::Valid {
            return false;
        }
        for tex in [&self.texture_color, &self.texture_mask].into_iter().flatten() {
            if tex.validity() != Validity::Valid {
                return false;
            }
        }
        true
    }
}

/// Geodata draw cached on a traverse node; pins the style and features
#[derive(Clone)]
pub struct GeodataTask {
    pub features: Arc<Resource>,
    pub style: Arc<Resource>,
    pub tile: TileId,
}

/// Collision-mesh producer task
#[derive(Clone)]
pub struct ColliderTask {
    pub mesh: GpuMesh,
    pub model: DMat4,
}

/// Draw lists cached on one traverse node
#[derive(Clone, Default)]
pub struct Renders {
    pub opaque: Vec<RenderTask>,
    pub transparent: Vec<RenderTask>,
    pub geodata: Vec<GeodataTask>,
    pub colliders: Vec<ColliderTask>,
}

impl Renders {
    pub fn clear(&mut self) {
        self.opaque.clear();
        self.transparent.clear();
        self.geodata.clear();
        self.colliders.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.opaque.is_empty()
            && self.transparent.is_empty()
            && self.geodata.is_empty()
            && self.colliders.is_empty()
    }
}

/// One draw handed to the renderer
#[derive(Clone)]
pub struct DrawTask {
    pub mesh: GpuHandle,
    pub texture_color: Option<GpuHandle>,
    pub texture_mask: Option<GpuHandle>,
    /// Column-major model-view-projection
    pub mvp: [f32; 16],
    /// Column-major UV transform
    pub uvm: [f32; 9],
    pub color: [f32; 4],
    pub external_uv: bool,
}

impl DrawTask {
    /// Project a cached task for this frame; `None` when a referenced
    /// texture is not ready (the node should not have been emitted)
    pub fn from_render(task: &RenderTask, view_proj: &DMat4) -> Option<DrawTask> {
        let texture_color = match &task.texture_color {
            Some(r) => Some(r.texture()?.handle),
            None => None,
        };
        let texture_mask = match &task.texture_mask {
            Some(r) => Some(r.texture()?.handle),
            None => None,
        };
        let mvp = (*view_proj * task.model).as_mat4().to_cols_array();
        Some(DrawTask {
            mesh: task.mesh.handle.clone(),
            texture_color,
            texture_mask,
            mvp,
            uvm: task.uv_trans.to_cols_array(),
            color: task.color.to_array(),
            external_uv: task.external_uv,
        })
    }
}

/// Per-frame geodata draw
#[derive(Clone)]
pub struct GeodataDraw {
    pub features: Arc<[u8]>,
    pub style: Arc<[u8]>,
    pub tile: TileId,
}

/// Per-frame collider draw
#[derive(Clone)]
pub struct ColliderDraw {
    pub mesh: GpuHandle,
    pub mvp: [f32; 16],
}

/// Per-frame draw buffers published to the renderer
#[derive(Clone, Default)]
pub struct MapDraws {
    pub opaque: Vec<DrawTask>,
    pub transparent: Vec<DrawTask>,
    pub geodata: Vec<GeodataDraw>,
    pub colliders: Vec<ColliderDraw>,
}

impl MapDraws {
    pub fn clear(&mut self) {
        self.opaque.clear();
        self.transparent.clear();
        self.geodata.clear();
        self.colliders.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.opaque.is_empty()
            && self.transparent.is_empty()
            && self.geodata.is_empty()
            && self.colliders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DVec3;
    use crate::resources::resource::{ResourceKind, ResourcePayload};

    fn ready_aggregate() -> Arc<Resource> {
        let r = Arc::new(Resource::new("agg", ResourceKind::MeshAggregate));
        r.publish(
            ResourcePayload::MeshAggregate(Arc::new(
                crate::resources::resource::MeshAggregate { submeshes: Vec::new() },
            )),
            None,
            0,
            0,
        );
        r
    }

    fn dummy_mesh() -> GpuMesh {
        GpuMesh {
            handle: Arc::new(()),
            vertex_count: 3,
        }
    }

    fn task() -> RenderTask {
        RenderTask {
            mesh: dummy_mesh(),
            aggregate: ready_aggregate(),
            texture_color: None,
            texture_mask: None,
            model: DMat4::from_translation(DVec3::new(1.0, 2.0, 3.0)),
            uv_trans: Mat3::IDENTITY,
            color: Vec4::ONE,
            external_uv: false,
            bound_layer: None,
        }
    }

    #[test]
    fn test_task_ready() {
        let t = task();
        assert!(t.ready());

        let pending = Arc::new(Resource::new("tex", ResourceKind::Texture));
        let mut with_tex = task();
        with_tex.texture_color = Some(pending);
        assert!(!with_tex.ready());
    }

    #[test]
    fn test_draw_task_mvp() {
        let t = task();
        let view_proj = DMat4::from_scale(DVec3::splat(2.0));
        let draw = DrawTask::from_render(&t, &view_proj).unwrap();

        let expected = (view_proj * t.model).as_mat4().to_cols_array();
        assert_eq!(draw.mvp, expected);
        assert_eq!(draw.uvm, Mat3::IDENTITY.to_cols_array());
        assert_eq!(draw.color, [1.0; 4]);
    }

    #[test]
    fn test_draw_task_requires_ready_texture() {
        let mut t = task();
        t.texture_color = Some(Arc::new(Resource::new("tex", ResourceKind::Texture)));
        assert!(DrawTask::from_render(&t, &DMat4::IDENTITY).is_none());
    }

    #[test]
    fn test_renders_clear() {
        let mut renders = Renders::default();
        renders.opaque.push(task());
        assert!(!renders.is_empty());
        renders.clear();
        assert!(renders.is_empty());
    }
}
