//! Bound-layer compositing for textured submeshes
//!
//! For each bound layer of a submesh this resolves the layer config, checks
//! the LOD/tile ranges, substitutes an ancestor tile (with the matching UV
//! transform) when the tile is finer than the layer provides, gates on the
//! layer's availability metatile, and requests the colour and mask
//! textures. `reorder_bound_layers` then drops layers hidden beneath an
//! opaque watertight layer and reports the combined readiness.

use crate::core::types::{Mat3, Vec3};
use crate::map::config::MapConfig;
use crate::map::config::BoundLayerRef;
use crate::map::url_template::TileVars;
use crate::resources::cache::ResourceCache;
use crate::resources::resource::{Resource, ResourceKind, Validity};
use std::sync::Arc;

/// One bound layer resolved for a particular submesh
#[derive(Clone)]
pub struct BoundParam {
    pub id: String,
    pub alpha: Option<f64>,

    /// The submesh's own tile variables
    orig: TileVars,
    /// Variables after ancestor substitution
    vars: TileVars,
    depth: u8,

    pub watertight: bool,
    pub transparent: bool,
    pub credit_ids: Vec<u32>,

    pub meta_tile: Option<Arc<Resource>>,
    pub texture_color: Option<Arc<Resource>>,
    pub texture_mask: Option<Arc<Resource>>,
}

impl BoundParam {
    pub fn new(layer_ref: &BoundLayerRef) -> Self {
        Self::from_id_alpha(layer_ref.id.clone(), layer_ref.alpha)
    }

    /// Layer referenced by a mesh's `texture_layer`, with no overrides
    pub fn from_id(id: impl Into<String>) -> Self {
        Self::from_id_alpha(id.into(), None)
    }

    fn from_id_alpha(id: String, alpha: Option<f64>) -> Self {
        Self {
            id,
            alpha,
            orig: TileVars::default(),
            vars: TileVars::default(),
            depth: 0,
            watertight: true,
            transparent: false,
            credit_ids: Vec::new(),
            meta_tile: None,
            texture_color: None,
            texture_mask: None,
        }
    }

    /// Ancestor-substitution depth resolved by `prepare`
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// UV transform mapping the submesh's unit square into its quadrant of
    /// the substituted ancestor tile; identity at depth 0
    pub fn uv_matrix(&self) -> Mat3 {
        let depth = self.depth;
        if depth == 0 {
            return Mat3::IDENTITY;
        }
        let scale = 1.0 / (1u32 << depth) as f64;
        let x = self.orig.local.x;
        let y = self.orig.local.y;
        let tx = scale * (x - ((x >> depth) << depth)) as f64;
        let ty = 1.0 - scale - scale * (y - ((y >> depth) << depth)) as f64;
        Mat3::from_cols(
            Vec3::new(scale as f32, 0.0, 0.0),
            Vec3::new(0.0, scale as f32, 0.0),
            Vec3::new(tx as f32, ty as f32, 1.0),
        )
    }

    /// Resolve the layer for this submesh
    ///
    /// `Invalid` rejects the layer permanently (range violation, layer
    /// unavailable here); `Indeterminate` means a referenced resource is
    /// still on its way.
    pub fn prepare(
        &mut self,
        config: &MapConfig,
        cache: &ResourceCache,
        vars: TileVars,
        priority: f32,
    ) -> Validity {
        let Some(bound) = config.bound_layer(&self.id) else {
            // the layer definition may still arrive with a config update
            return Validity::Indeterminate;
        };

        // lodRange and tileRange
        let tile = vars.tile;
        if tile.lod < bound.lod_range.min {
            return Validity::Invalid;
        }
        let at_min = tile.coarsened(tile.lod - bound.lod_range.min);
        if !bound.tile_range.contains(at_min) {
            return Validity::Invalid;
        }

        self.orig = vars;
        self.depth = tile.lod.saturating_sub(bound.lod_range.max);
        self.vars = vars.coarsened(self.depth);

        // availability metatile
        if let Some(meta_url) = &bound.meta_url {
            let url = meta_url.expand(&self.vars.meta_aligned());
            let grid_res = cache.get(&url, ResourceKind::BoundMetaTile);
            cache.touch(&grid_res);
            grid_res.update_priority(priority);
            self.meta_tile = Some(grid_res.clone());
            match grid_res.validity() {
                Validity::Indeterminate => return Validity::Indeterminate,
                Validity::Invalid => return Validity::Invalid,
                Validity::Valid => {}
            }
            let grid = grid_res
                .bound_meta_tile()
                .expect("valid bound metatile has payload");
            if !grid.available(self.vars.tile.x, self.vars.tile.y) {
                return Validity::Invalid;
            }
            self.watertight = grid.watertight(self.vars.tile.x, self.vars.tile.y);
        }

        self.transparent = bound.is_transparent || self.alpha.map_or(false, |a| a < 1.0);
        self.credit_ids = bound
            .credits
            .iter()
            .filter_map(|name| config.credit_id(name))
            .collect();

        // colour texture
        let color = cache.get(&bound.url.expand(&self.vars), ResourceKind::Texture);
        cache.touch(&color);
        color.update_priority(priority);
        self.texture_color = Some(color.clone());

        // mask texture where the layer is not watertight
        if !self.watertight {
            if let Some(mask_url) = &bound.mask_url {
                let mask = cache.get(&mask_url.expand(&self.vars), ResourceKind::Texture);
                cache.touch(&mask);
                mask.update_priority(priority);
                self.texture_mask = Some(mask.clone());
            }
        }

        let mut validity = color.validity();
        if let Some(mask) = &self.texture_mask {
            validity = combine_validity(validity, mask.validity());
        }
        validity
    }
}

/// Worst-of combination: invalid dominates, then indeterminate
pub(crate) fn combine_validity(a: Validity, b: Validity) -> Validity {
    use Validity::*;
    match (a, b) {
        (Invalid, _) | (_, Invalid) => Invalid,
        (Indeterminate, _) | (_, Indeterminate) => Indeterminate,
        _ => Valid,
    }
}

/// Prepare every layer of a submesh's stack and prune hidden ones
///
/// The list is ordered bottom to top. Layers that are invalid here are
/// removed; everything below the topmost fully-opaque watertight layer is
/// dropped since it can never show through. Returns `Indeterminate` while
/// any survivor is still loading and `Invalid` when nothing is left.
pub fn reorder_bound_layers(
    list: &mut Vec<BoundParam>,
    config: &MapConfig,
    cache: &ResourceCache,
    vars: TileVars,
    priority: f32,
) -> Validity {
    let mut indeterminate = false;
    list.retain_mut(|b| match b.prepare(config, cache, vars, priority) {
        Validity::Invalid => false,
        Validity::Indeterminate => {
            indeterminate = true;
            true
        }
        Validity::Valid => true,
    });
    if indeterminate {
        return Validity::Indeterminate;
    }

    if let Some(top_opaque) = list.iter().rposition(|b| b.watertight && !b.transparent) {
        list.drain(..top_opaque);
    }

    if list.is_empty() {
        Validity::Invalid
    } else {
        Validity::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::resource::ResourcePayload;
    use crate::testing::test_config;
    use crate::tile::meta::bound_flags;
    use crate::tile::{BoundMetaTile, TileId};

    fn vars(lod: u8, x: u32, y: u32) -> TileVars {
        TileVars::new(TileId::new(lod, x, y), TileId::new(lod, x, y))
    }

    fn make_texture_ready(cache: &ResourceCache, url: &str) {
        let r = cache.get(url, ResourceKind::Texture);
        r.publish(
            ResourcePayload::Texture(crate::resources::resource::GpuTexture {
                handle: Arc::new(()),
                width: 1,
                height: 1,
            }),
            Some(Arc::new(())),
            4,
            4,
        );
    }

    fn make_grid_ready(cache: &ResourceCache, url: &str, grid: BoundMetaTile) {
        let r = cache.get(url, ResourceKind::BoundMetaTile);
        r.publish(
            ResourcePayload::BoundMetaTile(Arc::new(grid)),
            None,
            BoundMetaTile::CELLS,
            0,
        );
    }

    #[test]
    fn test_uv_identity_at_depth_zero() {
        let config = test_config();
        let cache = ResourceCache::new();
        let mut b = BoundParam::from_id("ortho");
        // "ortho" covers lod 0..18; lod 5 needs no substitution
        b.prepare(&config, &cache, vars(5, 10, 11), 1.0);
        assert_eq!(b.depth(), 0);
        assert_eq!(b.uv_matrix(), Mat3::IDENTITY);
    }

    #[test]
    fn test_uv_ancestor_quadrant() {
        let config = test_config();
        let cache = ResourceCache::new();
        // "capped" tops out at lod 8; a lod-10 tile substitutes depth 2
        let mut b = BoundParam::from_id("capped");
        b.prepare(&config, &cache, vars(10, 400, 300), 1.0);

        assert_eq!(b.depth(), 2);
        let m = b.uv_matrix().to_cols_array();
        let scale = 0.25f32;
        let tx = 0.25 * (400 - ((400 >> 2) << 2)) as f32;
        let ty = 1.0 - 0.25 - 0.25 * (300 - ((300 >> 2) << 2)) as f32;
        assert_eq!(tx, 0.0);
        assert_eq!(ty, 0.75);
        assert_eq!(m[0], scale);
        assert_eq!(m[4], scale);
        assert_eq!(m[6], tx);
        assert_eq!(m[7], ty);
    }

    #[test]
    fn test_uv_maps_unit_square_into_quadrant() {
        let config = test_config();
        let cache = ResourceCache::new();
        for (x, y) in [(400u32, 300u32), (401, 301), (403, 302), (1023, 511)] {
            let mut b = BoundParam::from_id("capped");
            b.prepare(&config, &cache, vars(10, x, y), 1.0);
            let depth = b.depth() as u32;
            let m = b.uv_matrix().to_cols_array();
            let scale = m[0] as f64;
            let (tx, ty) = (m[6] as f64, m[7] as f64);

            // the transformed unit square must cover exactly the tile's
            // sub-square within the ancestor (y is flipped in uv space)
            let n = 1u32 << depth;
            let fx = (x % n) as f64 / n as f64;
            let fy_top = 1.0 - ((y % n) + 1) as f64 / n as f64;
            assert!((tx - fx).abs() < 1e-9);
            assert!((ty - fy_top).abs() < 1e-9);
            assert!((scale - 1.0 / n as f64).abs() < 1e-9);
        }
    }

    #[test]
    fn test_range_rejection() {
        let config = test_config();
        let cache = ResourceCache::new();

        // below lodRange.min
        let mut b = BoundParam::from_id("capped");
        assert_eq!(b.prepare(&config, &cache, vars(1, 0, 0), 1.0), Validity::Invalid);

        // outside tileRange ("narrow" covers x 0..1, y 0..1 at lod 2)
        let mut b = BoundParam::from_id("narrow");
        assert_eq!(b.prepare(&config, &cache, vars(4, 14, 0), 1.0), Validity::Invalid);
        // inside
        let v = b.prepare(&config, &cache, vars(4, 3, 3), 1.0);
        assert_ne!(v, Validity::Invalid);
    }

    #[test]
    fn test_unknown_layer_is_indeterminate() {
        let config = test_config();
        let cache = ResourceCache::new();
        let mut b = BoundParam::from_id("nonexistent");
        assert_eq!(
            b.prepare(&config, &cache, vars(5, 0, 0), 1.0),
            Validity::Indeterminate
        );
    }

    #[test]
    fn test_meta_gate_unavailable() {
        let config = test_config();
        let cache = ResourceCache::new();

        // "gated" carries a metaUrl; cell (3, 4) stays unavailable
        let mut grid = BoundMetaTile::new();
        grid.set(2, 2, bound_flags::AVAILABLE);
        make_grid_ready(&cache, "gated-meta-5-0-0", grid);

        let mut b = BoundParam::from_id("gated");
        assert_eq!(b.prepare(&config, &cache, vars(5, 3, 4), 1.0), Validity::Invalid);
    }

    #[test]
    fn test_meta_gate_watertight_bit() {
        let config = test_config();
        let cache = ResourceCache::new();

        let mut grid = BoundMetaTile::new();
        grid.set(2, 2, bound_flags::AVAILABLE);
        make_grid_ready(&cache, "gated-meta-5-0-0", grid);
        make_texture_ready(&cache, "gated-5-2-2");
        make_texture_ready(&cache, "gated-mask-5-2-2");

        let mut b = BoundParam::from_id("gated");
        let v = b.prepare(&config, &cache, vars(5, 2, 2), 1.0);
        assert_eq!(v, Validity::Valid);
        assert!(!b.watertight, "watertight bit clear");
        assert!(b.texture_mask.is_some(), "mask requested for non-watertight cell");
    }

    #[test]
    fn test_transparent_from_alpha() {
        let config = test_config();
        let cache = ResourceCache::new();
        make_texture_ready(&cache, "ortho-5-0-0");

        let mut opaque = BoundParam::from_id("ortho");
        opaque.prepare(&config, &cache, vars(5, 0, 0), 1.0);
        assert!(!opaque.transparent);

        let mut faded = BoundParam::new(&BoundLayerRef {
            id: "ortho".into(),
            alpha: Some(0.5),
        });
        faded.prepare(&config, &cache, vars(5, 0, 0), 1.0);
        assert!(faded.transparent);
    }

    #[test]
    fn test_credits_resolved() {
        let config = test_config();
        let cache = ResourceCache::new();
        make_texture_ready(&cache, "ortho-5-0-0");
        let mut b = BoundParam::from_id("ortho");
        b.prepare(&config, &cache, vars(5, 0, 0), 1.0);
        assert_eq!(b.credit_ids, vec![7]);
    }

    #[test]
    fn test_reorder_prunes_below_watertight_opaque() {
        let config = test_config();
        let cache = ResourceCache::new();
        make_texture_ready(&cache, "ortho-5-0-0");
        make_texture_ready(&cache, "glass-5-0-0");

        // bottom "glass" (transparent), middle "ortho" (opaque watertight),
        // top "glass" again
        let mut list = vec![
            BoundParam::from_id("glass"),
            BoundParam::from_id("ortho"),
            BoundParam::from_id("glass"),
        ];
        let v = reorder_bound_layers(&mut list, &config, &cache, vars(5, 0, 0), 1.0);
        assert_eq!(v, Validity::Valid);
        assert_eq!(list.len(), 2, "layer hidden below the opaque one dropped");
        assert_eq!(list[0].id, "ortho");
        assert_eq!(list[1].id, "glass");
    }

    #[test]
    fn test_reorder_empty_is_invalid() {
        let config = test_config();
        let cache = ResourceCache::new();
        // a layer out of range vanishes, leaving nothing
        let mut list = vec![BoundParam::from_id("capped")];
        let v = reorder_bound_layers(&mut list, &config, &cache, vars(1, 0, 0), 1.0);
        assert_eq!(v, Validity::Invalid);
        assert!(list.is_empty());
    }

    #[test]
    fn test_reorder_indeterminate_while_loading() {
        let config = test_config();
        let cache = ResourceCache::new();
        // texture never published: stays Initializing
        let mut list = vec![BoundParam::from_id("ortho")];
        let v = reorder_bound_layers(&mut list, &config, &cache, vars(5, 0, 0), 1.0);
        assert_eq!(v, Validity::Indeterminate);
        // the fetch was still registered
        assert!(cache.contains("ortho-5-0-0"));
    }
}
