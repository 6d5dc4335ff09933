//! Frame traversal: meta determination, draw determination, strategies
//!
//! All strategies compose the same primitives: `trav_init` populates a
//! node's metanode (issuing metatile fetches), `determine_draws` builds the
//! node's cached draw lists from the chosen surface's mesh and bound
//! layers, `render_node` copies them into the camera's frame buffers, and
//! `render_node_coarser` substitutes the nearest determined ancestor.

use crate::camera::bound::{combine_validity, reorder_bound_layers, BoundParam};
use crate::camera::camera::Camera;
use crate::camera::draws::{ColliderDraw, ColliderTask, DrawTask, GeodataDraw, GeodataTask, RenderTask};
use crate::camera::tree::{NodeIndex, TraverseTree};
use crate::core::options::{MapOptions, TraverseMode};
use crate::core::types::{Mat3, Vec4};
use crate::map::config::{BoundLayerRef, MapConfig};
use crate::map::layer::{FreeLayerInfo, MapLayer, SurfaceInfo, SurfaceRef, SurfaceStack};
use crate::map::url_template::TileVars;
use crate::resources::cache::ResourceCache;
use crate::resources::io::CoordConvertor;
use crate::resources::resource::{ResourceKind, Validity};
use crate::tile::meta::flags;
use crate::tile::MetaNode;
use std::collections::HashMap;

/// Hard stop for render-only recursion in stable mode
const STABLE_LOD_CAP: u8 = 30;

/// DistanceBaseFixed never back-fills more than this many LODs above the
/// target
const MAX_LOD_DIFF: i32 = 4;

#[derive(Clone, Copy, PartialEq, Eq)]
enum StableMode {
    Default,
    LoadOnly,
    RenderOnly,
}

/// Walk one layer's tree for this frame, emitting draws into the camera
pub fn traverse_layer(
    layer: &mut MapLayer,
    camera: &mut Camera,
    cache: &ResourceCache,
    config: &MapConfig,
    options: &MapOptions,
    convertor: &dyn CoordConvertor,
    tick: u64,
) {
    let mode = if layer.is_geodata() {
        options.traverse_mode_geodata
    } else {
        options.traverse_mode_surfaces
    };
    if mode == TraverseMode::None {
        return;
    }

    let node_srs = config.reference_frame.root_srs.as_deref();
    let MapLayer {
        surface_stack,
        tileset_stack,
        free_layer,
        view_surfaces,
        tree,
    } = layer;

    let mut traversal = Traversal {
        tree,
        surface_stack,
        tileset_stack: tileset_stack.as_ref(),
        free_layer: free_layer.as_ref(),
        view_surfaces,
        cam: camera,
        cache,
        config,
        opts: options,
        convertor,
        node_srs,
        tick,
    };
    let root = traversal.tree.root();
    match mode {
        TraverseMode::None => {}
        TraverseMode::Flat => traversal.mode_flat(root),
        TraverseMode::Stable => {
            traversal.mode_stable(root, StableMode::Default);
        }
        TraverseMode::Balanced => {
            traversal.mode_balanced(root, false);
        }
        TraverseMode::Hierarchical => traversal.mode_hierarchical(root, false),
        TraverseMode::Fixed => traversal.mode_fixed(root),
        TraverseMode::DistanceBaseFixed => {
            traversal.mode_distance_base_fixed(root);
        }
    }
}

/// One layer's traversal state for one frame
pub(crate) struct Traversal<'a> {
    pub(crate) tree: &'a mut TraverseTree,
    pub(crate) surface_stack: &'a SurfaceStack,
    pub(crate) tileset_stack: Option<&'a SurfaceStack>,
    pub(crate) free_layer: Option<&'a FreeLayerInfo>,
    pub(crate) view_surfaces: &'a HashMap<String, Vec<BoundLayerRef>>,
    pub(crate) cam: &'a mut Camera,
    pub(crate) cache: &'a ResourceCache,
    pub(crate) config: &'a MapConfig,
    pub(crate) opts: &'a MapOptions,
    pub(crate) convertor: &'a dyn CoordConvertor,
    pub(crate) node_srs: Option<&'a str>,
    pub(crate) tick: u64,
}

impl<'a> Traversal<'a> {
    // --- Shared primitives ---

    /// Distance from the focus point to the node's extents
    fn node_distance(&self, n: NodeIndex) -> f64 {
        let Some(meta) = self.tree.node(n).meta.as_ref() else {
            return 0.0;
        };
        if !self.opts.debug_disable_meta5 {
            if let (Some(extents), Some(srs)) = (&meta.geom_extents, self.node_srs) {
                let p = self.convertor.phys_to_srs(srs, self.cam.focus_phys());
                return extents.point_distance(p);
            }
        }
        meta.aabb_phys.point_distance(self.cam.focus_phys())
    }

    fn update_node_priority(&mut self, n: NodeIndex) {
        let priority = if self.tree.node(n).meta.is_some() {
            (1e6 / (self.node_distance(n) + 1.0)) as f32
        } else if let Some(parent) = self.tree.node(n).parent {
            self.tree.node(parent).priority
        } else {
            0.0
        };
        self.tree.node_mut(n).priority = priority;
    }

    fn visibility(&self, n: NodeIndex) -> bool {
        let meta = self.tree.node(n).meta.as_ref().expect("meta before visibility");
        self.cam.visibility_test(meta)
    }

    fn coarseness(&self, n: NodeIndex) -> bool {
        let meta = self.tree.node(n).meta.as_ref().expect("meta before coarseness");
        self.cam.coarseness_test(meta, self.opts)
    }

    fn chosen_surface(&self, r: SurfaceRef) -> Option<SurfaceInfo> {
        match r {
            SurfaceRef::Stack(i) => self.surface_stack.surfaces.get(i).cloned(),
            SurfaceRef::Tileset(i) => self
                .tileset_stack
                .and_then(|t| t.surfaces.get(i))
                .cloned(),
        }
    }

    /// The view's bound layers for one submesh; glue members pick their own
    /// list
    fn bound_list_for(&self, surface: &SurfaceInfo, surface_reference: u32) -> Vec<BoundParam> {
        let name = if surface.is_glue() {
            surface
                .name
                .get((surface_reference as usize).saturating_sub(1))
                .unwrap_or(&surface.name[0])
        } else {
            &surface.name[0]
        };
        self.view_surfaces
            .get(name)
            .map(|refs| refs.iter().map(BoundParam::new).collect())
            .unwrap_or_default()
    }

    /// Mark every resource pinned by the node's draws as used this frame
    fn touch_draws(&mut self, n: NodeIndex) {
        let node = self.tree.node(n);
        for r in &node.resources {
            self.cache.touch(r);
        }
    }

    /// Ensure the node's metanode is populated; false while metatiles load
    fn trav_init(&mut self, n: NodeIndex, init_all_children: bool) -> bool {
        let lod = self.tree.node(n).id.lod;
        self.cam.statistics.record_meta_traversal(lod);

        self.tree.node_mut(n).last_access_tick = self.tick;
        self.update_node_priority(n);

        if self.tree.node(n).meta.is_none() {
            let node = self.tree.node(n);
            for handle in node.meta_tiles.iter().flatten() {
                self.cache.touch(handle);
            }
            return self.determine_meta(n, init_all_children);
        }
        true
    }

    /// Resolve the node's metanode from its surface stack
    fn determine_meta(&mut self, n: NodeIndex, init_all_children: bool) -> bool {
        debug_assert!(self.tree.node(n).meta.is_none());
        debug_assert!(!self.tree.node(n).determined);
        debug_assert!(self.tree.node(n).renders_empty());
        self.cam.statistics.current_node_meta_updates += 1;

        // free layers carry no metatiles; their metanode is synthesised
        if self.free_layer.is_some() {
            return self.generate_geodata_meta(n);
        }

        let id = self.tree.node(n).id;

        // materialise the per-surface metatile handles; the descent
        // protocol skips blocks the parent's child flags rule out
        if self.tree.node(n).meta_tiles.is_empty() && !self.surface_stack.surfaces.is_empty() {
            let meta_vars = TileVars::new(id, id.local_to(self.tree.root_tile())).meta_aligned();
            let mut handles = vec![None; self.surface_stack.surfaces.len()];
            for (i, surface) in self.surface_stack.surfaces.iter().enumerate() {
                if let Some(parent_index) = self.tree.node(n).parent {
                    let parent = self.tree.node(parent_index);
                    let Some(parent_handle) = parent.meta_tiles.get(i).and_then(|h| h.as_ref())
                    else {
                        continue;
                    };
                    let blocked = parent_handle
                        .meta_tile()
                        .and_then(|block| {
                            block
                                .get(id.parent())
                                .map(|pn| !pn.child_available(id.child_index()))
                        })
                        .unwrap_or(true);
                    if blocked {
                        continue;
                    }
                }
                let handle = self
                    .cache
                    .get(&surface.url_meta.expand(&meta_vars), ResourceKind::MetaTile);
                self.cache.touch(&handle);
                handles[i] = Some(handle);
            }
            self.tree.node_mut(n).meta_tiles = handles;
        }

        // wait until every block settles
        let mut settled = true;
        {
            let node = self.tree.node(n);
            for handle in node.meta_tiles.iter().flatten() {
                handle.update_priority(node.priority * 2.0);
                if handle.validity() == Validity::Indeterminate {
                    settled = false;
                }
            }
        }
        if !settled {
            return false;
        }

        // top-to-bottom: the first alien-matching geometric surface wins;
        // child availability accumulates across the whole stack
        let mut childs_available = [false; 4];
        let mut topmost: Option<SurfaceRef> = None;
        let mut chosen: Option<MetaNode> = None;
        {
            let node = self.tree.node(n);
            for (i, handle) in node.meta_tiles.iter().enumerate() {
                let Some(handle) = handle else { continue };
                let Some(block) = handle.meta_tile() else { continue };
                let Some(mn) = block.get(id) else { continue };
                for (j, slot) in childs_available.iter_mut().enumerate() {
                    *slot = *slot || mn.child_available(j as u8);
                }
                if topmost.is_some() || mn.alien() != self.surface_stack.surfaces[i].alien {
                    continue;
                }
                if mn.geometry() {
                    chosen = Some(mn.clone());
                    topmost = Some(match self.tileset_stack {
                        Some(tileset) => {
                            let source = mn.source_reference as usize;
                            if source >= 1 && source <= tileset.surfaces.len() {
                                SurfaceRef::Tileset(source - 1)
                            } else {
                                debug_assert!(false, "source reference out of range");
                                SurfaceRef::Stack(i)
                            }
                        }
                        None => SurfaceRef::Stack(i),
                    });
                }
                if chosen.is_none() {
                    chosen = Some(mn.clone());
                }
            }
        }
        let Some(chosen_node) = chosen else {
            // every surface failed to provide this node
            return false;
        };

        {
            let node = self.tree.node_mut(n);
            if let Some(top) = topmost {
                node.surface = Some(top);
                node.credits = chosen_node.credits.clone();
            }
            node.meta = Some(chosen_node);
        }

        // materialise the child slots
        if init_all_children || childs_available.iter().any(|&c| c) {
            for j in 0..4u8 {
                if (init_all_children || childs_available[j as usize])
                    && self.tree.node(n).children[j as usize].is_none()
                {
                    self.tree.add_child(n, j);
                }
            }
        }

        self.update_node_priority(n);
        true
    }

    /// Metanode for a geodata layer, synthesised from the layer definition;
    /// descent is bounded by the layer's LOD range and extent subdivision
    fn generate_geodata_meta(&mut self, n: NodeIndex) -> bool {
        let layer = self.free_layer.expect("geodata layers have a free layer");
        let (extents, subdivide) = {
            let node = self.tree.node(n);
            let extents = match node.parent {
                Some(p) => self
                    .tree
                    .node(p)
                    .meta
                    .as_ref()
                    .map(|m| m.aabb_phys)
                    .unwrap_or(layer.extents)
                    .quadrant(node.id.child_index()),
                None => layer.extents,
            };
            (extents, node.id.lod < layer.lod_range.max)
        };

        let mut meta = MetaNode {
            flags: flags::GEOMETRY,
            aabb_phys: extents,
            ..Default::default()
        };
        if subdivide {
            meta.flags |= flags::UL_CHILD | flags::UR_CHILD | flags::LL_CHILD | flags::LR_CHILD;
        }

        {
            let node = self.tree.node_mut(n);
            node.meta = Some(meta);
            node.surface = Some(SurfaceRef::Stack(0));
        }
        if subdivide {
            for j in 0..4u8 {
                if self.tree.node(n).children[j as usize].is_none() {
                    self.tree.add_child(n, j);
                }
            }
        }
        self.update_node_priority(n);
        true
    }

    /// Build (or confirm) the node's cached draw lists; true only when
    /// every referenced resource is ready
    fn determine_draws(&mut self, n: NodeIndex) -> bool {
        self.touch_draws(n);
        {
            let node = self.tree.node(n);
            if node.surface.is_none() || node.determined {
                return node.determined;
            }
        }
        self.cam.statistics.current_node_draws_updates += 1;
        self.update_node_priority(n);

        let determined = if self.free_layer.is_some() {
            self.determine_draws_geodata(n)
        } else {
            self.determine_draws_surface(n)
        };
        self.tree.node_mut(n).determined = determined;
        determined
    }

    fn determine_draws_surface(&mut self, n: NodeIndex) -> bool {
        // resources requested by a previous attempt must settle first
        {
            let node = self.tree.node(n);
            for r in &node.resources {
                self.cache.touch(r);
            }
            if node
                .resources
                .iter()
                .any(|r| r.validity() == Validity::Indeterminate)
            {
                return false;
            }
        }
        self.tree.node_mut(n).resources.clear();

        let id = self.tree.node(n).id;
        let priority = self.tree.node(n).priority;
        let surface_ref = self.tree.node(n).surface.expect("checked by caller");
        let Some(surface) = self.chosen_surface(surface_ref) else {
            return false;
        };
        let vars = TileVars::new(id, id.local_to(self.tree.root_tile()));

        // the aggregate mesh gates everything else
        let agg_res = self
            .cache
            .get(&surface.url_mesh.expand(&vars), ResourceKind::MeshAggregate);
        self.cache.touch(&agg_res);
        agg_res.update_priority(priority);
        self.tree.node_mut(n).resources.push(agg_res.clone());
        match agg_res.validity() {
            Validity::Invalid => {
                let node = self.tree.node_mut(n);
                node.surface = None;
                node.resources.clear();
                return false;
            }
            Validity::Indeterminate => return false,
            Validity::Valid => {}
        }
        let agg = agg_res.mesh_aggregate().expect("valid aggregate has payload");

        let mut determined = true;
        let mut new_opaque = Vec::new();
        let mut new_transparent = Vec::new();
        let mut new_credits = Vec::new();
        let mut pins = Vec::new();

        for (sub, part) in agg.submeshes.iter().enumerate() {
            let sub_vars = vars.with_sub(sub as u32);

            // external bound layers
            if part.external_uv {
                let mut layers = self.bound_list_for(&surface, part.surface_reference);
                if let Some(baked) = &part.texture_layer {
                    layers.push(BoundParam::from_id(baked.clone()));
                }
                let validity =
                    reorder_bound_layers(&mut layers, self.config, self.cache, sub_vars, priority);

                for b in &layers {
                    pins.extend(
                        [&b.meta_tile, &b.texture_color, &b.texture_mask]
                            .into_iter()
                            .flatten()
                            .cloned(),
                    );
                }
                match validity {
                    Validity::Indeterminate => {
                        determined = false;
                        continue;
                    }
                    Validity::Invalid => continue,
                    Validity::Valid => {}
                }

                let mut any_opaque = layers
                    .iter()
                    .any(|b| !b.transparent && b.texture_mask.is_none());
                let mut all_transparent = true;
                for b in &layers {
                    new_credits.extend_from_slice(&b.credit_ids);

                    let task = RenderTask {
                        mesh: part.mesh.clone(),
                        aggregate: agg_res.clone(),
                        texture_color: b.texture_color.clone(),
                        texture_mask: b.texture_mask.clone(),
                        model: part.norm_to_phys,
                        uv_trans: b.uv_matrix(),
                        color: Vec4::new(1.0, 1.0, 1.0, b.alpha.unwrap_or(1.0) as f32),
                        external_uv: true,
                        bound_layer: Some(b.id.clone()),
                    };

                    // masked layers render as transparencies to keep
                    // painter ordering, unless nothing else writes depth
                    let mut render_transparent = b.transparent;
                    if !render_transparent && b.texture_mask.is_some() {
                        if any_opaque {
                            render_transparent = true;
                        } else {
                            any_opaque = true;
                        }
                    }

                    if render_transparent {
                        new_transparent.push(task);
                    } else {
                        new_opaque.push(task);
                    }
                    all_transparent = all_transparent && b.transparent;
                }
                if !all_transparent {
                    // fully covered; the internal texture would be invisible
                    continue;
                }
            }

            // internal texture
            if part.internal_uv {
                let tex = self
                    .cache
                    .get(&surface.url_int_tex.expand(&sub_vars), ResourceKind::Texture);
                self.cache.touch(&tex);
                tex.update_priority(priority);
                pins.push(tex.clone());
                match tex.validity() {
                    Validity::Indeterminate => {
                        determined = false;
                        continue;
                    }
                    Validity::Invalid => continue,
                    Validity::Valid => {}
                }
                new_opaque.insert(
                    0,
                    RenderTask {
                        mesh: part.mesh.clone(),
                        aggregate: agg_res.clone(),
                        texture_color: Some(tex),
                        texture_mask: None,
                        model: part.norm_to_phys,
                        uv_trans: Mat3::IDENTITY,
                        color: Vec4::ONE,
                        external_uv: false,
                        bound_layer: None,
                    },
                );
            }
        }

        {
            let node = self.tree.node_mut(n);
            node.resources.extend(pins);
            if determined {
                node.renders.opaque = new_opaque;
                node.renders.transparent = new_transparent;
                node.renders.colliders = agg
                    .submeshes
                    .iter()
                    .map(|p| ColliderTask {
                        mesh: p.mesh.clone(),
                        model: p.norm_to_phys,
                    })
                    .collect();
                node.credits.extend(new_credits);
                node.resources.shrink_to_fit();
            }
        }
        determined
    }

    fn determine_draws_geodata(&mut self, n: NodeIndex) -> bool {
        let id = self.tree.node(n).id;
        let priority = self.tree.node(n).priority;
        let surface_ref = self.tree.node(n).surface.expect("checked by caller");
        let Some(surface) = self.chosen_surface(surface_ref) else {
            return false;
        };

        let style_url = self.free_layer.and_then(|f| f.style_url.clone());
        let (Some(style_url), Some(geodata_url)) = (style_url, surface.url_geodata) else {
            self.tree.node_mut(n).surface = None;
            return false;
        };

        let vars = TileVars::new(id, id.local_to(self.tree.root_tile()));
        let features = self
            .cache
            .get(&geodata_url.expand(&vars), ResourceKind::GeodataFeatures);
        let style = self.cache.get(&style_url, ResourceKind::GeodataStyle);
        for r in [&features, &style] {
            self.cache.touch(r);
            r.update_priority(priority);
        }
        {
            let node = self.tree.node_mut(n);
            node.resources.clear();
            node.resources.push(features.clone());
            node.resources.push(style.clone());
        }

        match combine_validity(features.validity(), style.validity()) {
            Validity::Invalid => {
                let node = self.tree.node_mut(n);
                node.surface = None;
                node.resources.clear();
                false
            }
            Validity::Indeterminate => false,
            Validity::Valid => {
                self.tree.node_mut(n).renders.geodata.push(GeodataTask {
                    features,
                    style,
                    tile: id,
                });
                true
            }
        }
    }

    /// Copy the node's cached draws into the camera's frame buffers
    fn render_node(&mut self, n: NodeIndex) {
        let view_proj = *self.cam.view_proj();
        let node = self.tree.node_mut(n);
        node.last_render_tick = self.tick;
        let lod = node.id.lod;

        for task in &node.renders.opaque {
            if let Some(draw) = DrawTask::from_render(task, &view_proj) {
                self.cam.draws.opaque.push(draw);
            }
        }
        for task in &node.renders.transparent {
            if let Some(draw) = DrawTask::from_render(task, &view_proj) {
                self.cam.draws.transparent.push(draw);
            }
        }
        for task in &node.renders.geodata {
            if let (Some(features), Some(style)) =
                (task.features.geodata_features(), task.style.geodata_style())
            {
                self.cam.draws.geodata.push(GeodataDraw {
                    features,
                    style,
                    tile: task.tile,
                });
            }
        }
        for task in &node.renders.colliders {
            self.cam.draws.colliders.push(ColliderDraw {
                mesh: task.mesh.handle.clone(),
                mvp: (view_proj * task.model).as_mat4().to_cols_array(),
            });
        }

        self.cam.statistics.record_render(lod);
    }

    /// Walk toward the root and emit the nearest determined ancestor;
    /// ancestors already emitted this frame are not emitted twice
    fn render_node_coarser(&mut self, n: NodeIndex) {
        let mut cursor = self.tree.node(n).parent;
        while let Some(p) = cursor {
            if self.tree.node(p).determined {
                if self.tree.node(p).last_render_tick != self.tick {
                    self.touch_draws(p);
                    self.render_node(p);
                }
                return;
            }
            cursor = self.tree.node(p).parent;
        }
    }

    // --- Strategies ---

    /// Descend to the coarseness target and render leaves only
    fn mode_flat(&mut self, n: NodeIndex) {
        if !self.trav_init(n, false) {
            return;
        }
        if !self.visibility(n) {
            return;
        }
        if self.coarseness(n) || !self.tree.node(n).has_children() {
            if self.determine_draws(n) {
                self.render_node(n);
            }
            return;
        }
        for child in self.tree.child_slots(n).into_iter().flatten() {
            self.mode_flat(child);
        }
    }

    /// Keep internal nodes' draws warm; render this node while any child
    /// still loads
    fn mode_hierarchical(&mut self, n: NodeIndex, load_only: bool) {
        if !self.trav_init(n, false) {
            return;
        }

        // the draws' resources may not be unloaded while we sit on them
        {
            let node = self.tree.node_mut(n);
            node.last_render_tick = node.last_access_tick;
        }
        self.determine_draws(n);

        if load_only {
            return;
        }
        if !self.visibility(n) {
            return;
        }
        if self.coarseness(n) || !self.tree.node(n).has_children() {
            if self.tree.node(n).determined {
                self.render_node(n);
            }
            return;
        }

        let mut ok = true;
        for child in self.tree.child_slots(n).into_iter().flatten() {
            let c = self.tree.node(child);
            if c.meta.is_none() {
                ok = false;
                continue;
            }
            if c.surface.is_some() && !c.determined {
                ok = false;
            }
        }
        for child in self.tree.child_slots(n).into_iter().flatten() {
            self.mode_hierarchical(child, !ok);
        }
        if !ok && self.tree.node(n).determined {
            self.render_node(n);
        }
    }

    /// Full-coverage recursion; returns whether this subtree is settled
    fn mode_stable(&mut self, n: NodeIndex, mode: StableMode) -> bool {
        use StableMode::*;

        if mode == RenderOnly {
            if self.tree.node(n).meta.is_none() {
                return false;
            }
            self.tree.node_mut(n).last_access_tick = self.tick;
        } else if !self.trav_init(n, false) {
            return false;
        }

        if !self.visibility(n) {
            return true;
        }

        if mode == RenderOnly {
            if self.tree.node(n).determined {
                self.touch_draws(n);
                self.render_node(n);
            } else if self.tree.node(n).id.lod < STABLE_LOD_CAP {
                for child in self.tree.child_slots(n).into_iter().flatten() {
                    self.mode_stable(child, RenderOnly);
                }
            }
            return true;
        }

        if self.coarseness(n) || !self.tree.node(n).has_children() {
            self.determine_draws(n);
            if mode == LoadOnly {
                self.tree.node_mut(n).last_render_tick = self.tick;
                return self.tree.node(n).determined;
            }
            if self.tree.node(n).determined {
                self.render_node(n);
            } else {
                for child in self.tree.child_slots(n).into_iter().flatten() {
                    self.mode_stable(child, RenderOnly);
                }
            }
            return true;
        }

        // only swap to the children once every one of them is loadable
        if mode == Default && self.tree.node(n).determined {
            let mut ok = true;
            for child in self.tree.child_slots(n).into_iter().flatten() {
                ok = self.mode_stable(child, LoadOnly) && ok;
            }
            if !ok {
                self.touch_draws(n);
                self.render_node(n);
                return true;
            }
        }

        let mut ok = true;
        for child in self.tree.child_slots(n).into_iter().flatten() {
            ok = self.mode_stable(child, mode) && ok;
        }
        ok
    }

    /// Flat descent; failed subtrees fall back to their nearest determined
    /// ancestor. Returns whether this subtree produced draws.
    fn mode_balanced(&mut self, n: NodeIndex, render_only: bool) -> bool {
        let mut render_only = render_only;
        if render_only {
            if self.tree.node(n).meta.is_none() {
                return false;
            }
            self.tree.node_mut(n).last_access_tick = self.tick;
        } else if !self.trav_init(n, false) {
            return false;
        }

        if !self.visibility(n) {
            return true;
        }

        if render_only {
            if self.tree.node(n).determined {
                self.touch_draws(n);
                self.render_node(n);
                return true;
            }
        } else if self.coarseness(n) || !self.tree.node(n).has_children() {
            if self.determine_draws(n) {
                self.render_node(n);
                return true;
            }
            render_only = true;
        }

        let children: Vec<NodeIndex> = self.tree.child_slots(n).into_iter().flatten().collect();
        let mut rendered = Vec::with_capacity(children.len());
        let mut rendered_count = 0usize;
        for &child in &children {
            let ok = self.mode_balanced(child, render_only);
            if ok {
                rendered_count += 1;
            }
            rendered.push(ok);
        }
        if rendered_count == 0 && render_only {
            return false;
        }
        for (i, &child) in children.iter().enumerate() {
            if !rendered[i] {
                self.render_node_coarser(child);
            }
        }
        true
    }

    /// Descend to a fixed LOD within a fixed distance
    fn mode_fixed(&mut self, n: NodeIndex) {
        if !self.trav_init(n, false) {
            return;
        }
        if self.node_distance(n) > self.opts.fixed_traversal_distance {
            return;
        }
        if self.tree.node(n).id.lod >= self.opts.fixed_traversal_lod
            || !self.tree.node(n).has_children()
        {
            if self.determine_draws(n) {
                self.render_node(n);
            }
            return;
        }
        for child in self.tree.child_slots(n).into_iter().flatten() {
            self.mode_fixed(child);
        }
    }

    /// Fixed traversal with the distance cutoff scaled by `2^(target - lod)`
    /// per level; renders at the first LOD meeting the criterion and
    /// back-fills finer children opportunistically
    fn mode_distance_base_fixed(&mut self, n: NodeIndex) -> bool {
        if !self.trav_init(n, false) {
            return false;
        }

        let lod = self.tree.node(n).id.lod;
        let lod_diff = (self.opts.fixed_traversal_lod as i32 - lod as i32).max(0);
        let target = self.opts.fixed_traversal_distance * f64::powi(2.0, lod_diff);
        let distance = self.node_distance(n);
        if distance > target {
            return false;
        }

        if (lod_diff < MAX_LOD_DIFF && distance > target / 2.0)
            || !self.tree.node(n).has_children()
        {
            if self.determine_draws(n) {
                self.render_node(n);
            }
            return true;
        }

        let children: Vec<NodeIndex> = self.tree.child_slots(n).into_iter().flatten().collect();
        let mut rendered = Vec::with_capacity(children.len());
        let mut any = false;
        for &child in &children {
            let r = self.mode_distance_base_fixed(child);
            if r {
                any = true;
            }
            rendered.push(r);
        }

        if lod_diff > MAX_LOD_DIFF {
            return any;
        }
        if !any {
            return false;
        }
        for (i, &child) in children.iter().enumerate() {
            if !rendered[i] {
                if self.determine_draws(child) {
                    self.render_node(child);
                }
            }
        }
        true
    }
}
