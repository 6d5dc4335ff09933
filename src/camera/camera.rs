//! Per-camera state: matrices, frustum, focus, and the per-node tests
//!
//! The camera owns the frame's draw buffers and statistics; traversal
//! writes into both. Culling state can be frozen independently of the view
//! matrices (detached mode) to inspect what a stationary camera would load.

use crate::camera::draws::MapDraws;
use crate::core::options::MapOptions;
use crate::core::statistics::CameraStatistics;
use crate::core::types::{DMat4, DVec3};
use crate::math::Frustum;
use crate::tile::MetaNode;

/// Application-supplied view for one frame
#[derive(Clone, Copy, Debug)]
pub struct CameraView {
    pub view: DMat4,
    pub proj: DMat4,
    /// Camera position, physical SRS
    pub eye_phys: DVec3,
    /// The point the camera orbits/looks at; origin of priority distances
    pub focus_phys: DVec3,
    pub viewport_height: u32,
    /// Vertical field of view, radians
    pub fov_y: f64,
}

/// Per-camera frame state
pub struct Camera {
    view_proj: DMat4,
    frustum: Frustum,
    eye_phys: DVec3,
    focus_phys: DVec3,
    viewport_height: f64,
    /// `2 * tan(fov_y / 2)`: view extent per unit distance
    fov_scale: f64,

    pub draws: MapDraws,
    pub statistics: CameraStatistics,
}

impl Camera {
    pub fn new() -> Self {
        let identity = DMat4::IDENTITY;
        Self {
            view_proj: identity,
            frustum: Frustum::from_view_projection(&identity),
            eye_phys: DVec3::ZERO,
            focus_phys: DVec3::ZERO,
            viewport_height: 1080.0,
            fov_scale: 2.0 * (45f64.to_radians() / 2.0).tan(),
            draws: MapDraws::default(),
            statistics: CameraStatistics::default(),
        }
    }

    /// Adopt this frame's view
    ///
    /// With `detached` set, the projection used for draw output still
    /// follows the view, but culling and distance state keep their last
    /// values.
    pub fn update_view(&mut self, v: &CameraView, detached: bool) {
        self.view_proj = v.proj * v.view;
        if detached {
            return;
        }
        self.frustum = Frustum::from_view_projection(&self.view_proj);
        self.eye_phys = v.eye_phys;
        self.focus_phys = v.focus_phys;
        self.viewport_height = v.viewport_height as f64;
        self.fov_scale = 2.0 * (v.fov_y / 2.0).tan();
    }

    pub fn view_proj(&self) -> &DMat4 {
        &self.view_proj
    }

    pub fn eye_phys(&self) -> DVec3 {
        self.eye_phys
    }

    pub fn focus_phys(&self) -> DVec3 {
        self.focus_phys
    }

    /// Frustum test against the node's physical extents; unknown extents
    /// pass immediately
    pub fn visibility_test(&self, meta: &MetaNode) -> bool {
        self.frustum.intersects_aabb(&meta.aabb_phys)
    }

    /// Whether this node's detail suffices for the current view
    ///
    /// True when the projected texel size stays within
    /// `max_texel_to_pixel_scale`; descending further would not add visible
    /// detail.
    pub fn coarseness_test(&self, meta: &MetaNode, options: &MapOptions) -> bool {
        self.coarseness_value(meta, options) <= options.max_texel_to_pixel_scale
    }

    /// Worst-case projected texel size over the node's sample set, in
    /// pixels
    fn coarseness_value(&self, meta: &MetaNode, options: &MapOptions) -> f64 {
        let texel = if meta.apply_texel_size() {
            meta.texel_size
        } else if meta.apply_display_size() {
            if !meta.aabb_phys.is_finite() || meta.display_size == 0 {
                return 0.0;
            }
            meta.aabb_phys.size().length() / meta.display_size as f64
        } else {
            // no sizing information: the node cannot ask for descent
            return 0.0;
        };
        if texel <= 0.0 || !meta.aabb_phys.is_finite() {
            return 0.0;
        }

        let mut worst: f64 = 0.0;
        let mut measure = |p: DVec3| {
            let d = (p - self.eye_phys).length().max(1e-9);
            let px = texel * self.viewport_height / (self.fov_scale * d);
            worst = worst.max(px);
        };
        for corner in meta.aabb_phys.corners() {
            measure(corner);
        }
        if let Some(s) = meta.surrogate_phys {
            measure(s);
        }
        // denser sampling adds the box center
        if options.navigation_samples_per_view_extent > 8 {
            measure(meta.aabb_phys.center());
        }
        worst
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Aabb;
    use crate::tile::meta::flags;

    fn looking_at_origin(distance: f64) -> Camera {
        let mut cam = Camera::new();
        let eye = DVec3::new(0.0, 0.0, distance);
        cam.update_view(
            &CameraView {
                view: DMat4::look_at_rh(eye, DVec3::ZERO, DVec3::Y),
                proj: DMat4::perspective_rh(60f64.to_radians(), 1.0, 0.1, 1e6),
                eye_phys: eye,
                focus_phys: DVec3::ZERO,
                viewport_height: 1000,
                fov_y: 60f64.to_radians(),
            },
            false,
        );
        cam
    }

    fn meta_with_box(half: f64, texel: f64) -> MetaNode {
        MetaNode {
            flags: flags::GEOMETRY | flags::APPLY_TEXEL_SIZE,
            aabb_phys: Aabb::new(DVec3::splat(-half), DVec3::splat(half)),
            texel_size: texel,
            ..Default::default()
        }
    }

    #[test]
    fn test_visibility() {
        let cam = looking_at_origin(100.0);
        assert!(cam.visibility_test(&meta_with_box(10.0, 1.0)));

        let mut behind = meta_with_box(10.0, 1.0);
        behind.aabb_phys = Aabb::new(DVec3::new(-1.0, -1.0, 200.0), DVec3::new(1.0, 1.0, 220.0));
        assert!(!cam.visibility_test(&behind));

        // unknown extents can never be culled
        let unknown = MetaNode::default();
        assert!(cam.visibility_test(&unknown));
    }

    #[test]
    fn test_coarseness_close_demands_detail() {
        let opts = MapOptions::default();
        let near = looking_at_origin(20.0);
        let far = looking_at_origin(100_000.0);
        let meta = meta_with_box(10.0, 1.0);

        assert!(!near.coarseness_test(&meta, &opts), "texels visibly large up close");
        assert!(far.coarseness_test(&meta, &opts), "fine enough from afar");
    }

    #[test]
    fn test_coarseness_without_sizing_flags() {
        let opts = MapOptions::default();
        let cam = looking_at_origin(1.0);
        let mut meta = meta_with_box(10.0, 1.0);
        meta.flags = flags::GEOMETRY;
        // no sizing flags: never requests descent
        assert!(cam.coarseness_test(&meta, &opts));
    }

    #[test]
    fn test_coarseness_display_size() {
        let opts = MapOptions::default();
        let cam = looking_at_origin(20.0);
        let mut meta = meta_with_box(10.0, 0.0);
        meta.flags = flags::GEOMETRY | flags::APPLY_DISPLAY_SIZE;
        meta.display_size = 4;
        // a 20-unit box shown through 4 virtual texels is very coarse
        assert!(!cam.coarseness_test(&meta, &opts));
        meta.display_size = 1 << 20;
        assert!(cam.coarseness_test(&meta, &opts));
    }

    #[test]
    fn test_detached_keeps_culling_state() {
        let mut cam = looking_at_origin(100.0);
        let meta = meta_with_box(10.0, 1.0);
        assert!(cam.visibility_test(&meta));

        // move the camera far away, detached: culling still sees the box
        let eye = DVec3::new(0.0, 0.0, 1e9);
        cam.update_view(
            &CameraView {
                view: DMat4::look_at_rh(eye, DVec3::new(0.0, 1e9, 1e9), DVec3::Y),
                proj: DMat4::perspective_rh(60f64.to_radians(), 1.0, 0.1, 1e6),
                eye_phys: eye,
                focus_phys: DVec3::ZERO,
                viewport_height: 1000,
                fov_y: 60f64.to_radians(),
            },
            true,
        );
        assert!(cam.visibility_test(&meta));
        assert_eq!(cam.eye_phys(), DVec3::new(0.0, 0.0, 100.0));
    }
}
