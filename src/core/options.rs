//! Runtime options consumed by the engine
//!
//! Options use the external (camelCase) key names, so a JSON options blob
//! can be deserialized directly into [`MapOptions`].

use serde::{Deserialize, Serialize};

/// Strategy used to walk the tile tree each frame
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraverseMode {
    /// Layer is skipped entirely
    None,
    /// Descend to target LOD, render leaves only; no fallback while loading
    Flat,
    /// Full-coverage recursion that re-renders coarser subtrees while finer
    /// tiles stream in
    Stable,
    /// Flat descent with coarser-ancestor fallback for failed subtrees
    #[default]
    Balanced,
    /// Keeps internal nodes' draws warm and renders them while children load
    Hierarchical,
    /// Descend to a fixed LOD within a fixed distance; for colliders and
    /// other non-visual producers
    Fixed,
    /// Fixed-LOD variant with geometric distance scaling per LOD step
    DistanceBaseFixed,
}

/// Runtime options
///
/// All limits are soft real-time knobs; changing them between frames is
/// allowed and takes effect on the next frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MapOptions {
    pub traverse_mode_surfaces: TraverseMode,
    pub traverse_mode_geodata: TraverseMode,

    /// RAM budget for decoded resources (bytes)
    pub max_resources_memory: usize,
    /// GPU memory budget (bytes)
    pub max_gpu_memory: usize,
    /// Maximum downloads in flight at once
    pub max_concurrent_downloads: usize,
    /// Transient failures retried before a resource is marked failed
    pub max_retries: u32,

    /// A tile is fine enough when its projected texel size (pixels) is at
    /// most this value
    pub max_texel_to_pixel_scale: f64,
    /// Density of the sample set used by the coarseness measure
    pub navigation_samples_per_view_extent: u32,

    /// Distance cutoff for the fixed traversal modes
    pub fixed_traversal_distance: f64,
    /// Target LOD for the fixed traversal modes
    pub fixed_traversal_lod: u8,

    /// Ignore per-node geometry extents and measure distances against the
    /// physical-SRS box only
    pub debug_disable_meta5: bool,
    /// Never substitute virtual surfaces for a matching view
    pub debug_disable_virtual_surfaces: bool,
    /// Freeze the culling camera while the view camera moves
    pub debug_detached_camera: bool,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            traverse_mode_surfaces: TraverseMode::Balanced,
            traverse_mode_geodata: TraverseMode::Flat,
            max_resources_memory: 512 * 1024 * 1024,
            max_gpu_memory: 1024 * 1024 * 1024,
            max_concurrent_downloads: 10,
            max_retries: 5,
            max_texel_to_pixel_scale: 1.2,
            navigation_samples_per_view_extent: 8,
            fixed_traversal_distance: 10_000.0,
            fixed_traversal_lod: 16,
            debug_disable_meta5: false,
            debug_disable_virtual_surfaces: false,
            debug_detached_camera: false,
        }
    }
}
