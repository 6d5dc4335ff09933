//! Frame and resource statistics

use serde::Serialize;

/// Number of LOD buckets tracked by the per-LOD counters; deeper tiles are
/// folded into the last bucket
pub const STATS_MAX_LODS: usize = 25;

/// Per-camera traversal statistics
///
/// Cumulative counters survive across frames; `current_*` counters and the
/// diagnostics channel are reset at the start of every frame.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CameraStatistics {
    pub meta_nodes_traversed_total: u64,
    pub meta_nodes_traversed_per_lod: [u64; STATS_MAX_LODS],
    pub nodes_rendered_total: u64,
    pub nodes_rendered_per_lod: [u64; STATS_MAX_LODS],

    /// Meta determinations performed this frame
    pub current_node_meta_updates: u32,
    /// Draw determinations performed this frame
    pub current_node_draws_updates: u32,

    /// Diagnostic messages emitted this frame
    pub diagnostics: Vec<String>,
}

impl CameraStatistics {
    /// Reset the per-frame counters; cumulative counters are kept
    pub fn reset_frame(&mut self) {
        self.current_node_meta_updates = 0;
        self.current_node_draws_updates = 0;
        self.diagnostics.clear();
    }

    pub fn record_meta_traversal(&mut self, lod: u8) {
        self.meta_nodes_traversed_total += 1;
        self.meta_nodes_traversed_per_lod[(lod as usize).min(STATS_MAX_LODS - 1)] += 1;
    }

    pub fn record_render(&mut self, lod: u8) {
        self.nodes_rendered_total += 1;
        self.nodes_rendered_per_lod[(lod as usize).min(STATS_MAX_LODS - 1)] += 1;
    }

    /// Emit a diagnostic message for this frame
    pub fn note(&mut self, message: impl Into<String>) {
        self.diagnostics.push(message.into());
    }
}

/// Snapshot of the resource cache counters
#[derive(Clone, Debug, Default, Serialize)]
pub struct CacheStatistics {
    pub resources_total: usize,
    pub ram_used: usize,
    pub gpu_used: usize,
    pub downloads_started: u64,
    pub downloads_completed: u64,
    pub downloads_failed: u64,
    pub retries_scheduled: u64,
    pub resources_evicted: u64,
}
