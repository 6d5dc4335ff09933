//! Map layers and surface stacks
//!
//! A layer is one traversable tree: either the view's surfaces (with glues
//! and optional virtual-surface substitution) or a single free layer. The
//! surface stack is ordered topmost first; metanode determination walks it
//! top to bottom.

use crate::camera::tree::TraverseTree;
use crate::map::config::{
    BoundLayerRef, FreeLayerConfig, GlueConfig, LodRange, MapConfig, SurfaceConfig, ViewConfig,
    VirtualSurfaceConfig,
};
use crate::map::url_template::UrlTemplate;
use crate::math::Aabb;
use crate::tile::TileId;
use std::collections::HashMap;

/// Which stack a chosen surface lives in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceRef {
    /// Index into the layer's surface stack
    Stack(usize),
    /// Index into the layer's tileset stack (virtual surfaces)
    Tileset(usize),
}

/// One renderable surface or glue with its URL templates
#[derive(Clone, Debug)]
pub struct SurfaceInfo {
    /// Member surface ids; more than one entry marks a glue
    pub name: Vec<String>,
    pub alien: bool,
    pub lod_range: LodRange,
    pub url_meta: UrlTemplate,
    pub url_mesh: UrlTemplate,
    pub url_int_tex: UrlTemplate,
    pub url_geodata: Option<UrlTemplate>,
}

impl SurfaceInfo {
    fn from_surface(s: &SurfaceConfig, alien: bool) -> Self {
        Self {
            name: vec![s.id.clone()],
            alien,
            lod_range: s.lod_range,
            url_meta: s.meta_url.clone(),
            url_mesh: s.mesh_url.clone(),
            url_int_tex: s.texture_url.clone(),
            url_geodata: s.geodata_url.clone(),
        }
    }

    fn from_glue(g: &GlueConfig, alien: bool) -> Self {
        Self {
            name: g.id.clone(),
            alien,
            lod_range: g.lod_range,
            url_meta: g.meta_url.clone(),
            url_mesh: g.mesh_url.clone(),
            url_int_tex: g.texture_url.clone(),
            url_geodata: None,
        }
    }

    fn from_virtual(v: &VirtualSurfaceConfig) -> Self {
        Self {
            name: v.id.clone(),
            alien: false,
            lod_range: v.lod_range,
            url_meta: v.meta_url.clone(),
            url_mesh: v.mesh_url.clone(),
            url_int_tex: v.texture_url.clone(),
            url_geodata: None,
        }
    }

    pub fn is_glue(&self) -> bool {
        self.name.len() > 1
    }
}

/// Ordered list of surfaces; index 0 is topmost
#[derive(Clone, Debug, Default)]
pub struct SurfaceStack {
    pub surfaces: Vec<SurfaceInfo>,
}

impl SurfaceStack {
    /// Stack for a view: applicable glues on top (wider glues first), then
    /// the selected surfaces in configuration order
    pub fn from_view(config: &MapConfig, view: &ViewConfig) -> SurfaceStack {
        let selected: Vec<&SurfaceConfig> = config
            .surfaces
            .iter()
            .filter(|s| view.surfaces.contains_key(&s.id))
            .collect();

        let mut glues: Vec<&GlueConfig> = config
            .glues
            .iter()
            .filter(|g| g.id.iter().all(|m| selected.iter().any(|s| &s.id == m)))
            .collect();
        glues.sort_by(|a, b| b.id.len().cmp(&a.id.len()).then(a.id.cmp(&b.id)));

        let mut surfaces = Vec::with_capacity(glues.len() + selected.len());
        for g in glues {
            surfaces.push(SurfaceInfo::from_glue(g, false));
        }
        for s in selected {
            surfaces.push(SurfaceInfo::from_surface(s, false));
        }
        SurfaceStack { surfaces }
    }

    /// Stacks for a virtual surface: the traversed stack holds just the
    /// virtual surface; the tileset stack resolves the wire metanodes'
    /// 1-based source references
    pub fn from_virtual(
        config: &MapConfig,
        vs: &VirtualSurfaceConfig,
    ) -> (SurfaceStack, SurfaceStack) {
        let traversed = SurfaceStack {
            surfaces: vec![SurfaceInfo::from_virtual(vs)],
        };

        let mut tileset = Vec::with_capacity(vs.mapping.len());
        for entry in &vs.mapping {
            let members: Vec<String> = entry
                .iter()
                .filter_map(|&i| vs.id.get(i).cloned())
                .collect();
            if members.len() != entry.len() {
                log::warn!("virtual surface mapping entry references unknown member");
                continue;
            }
            if members.len() == 1 {
                match config.surface(&members[0]) {
                    Some(s) => tileset.push(SurfaceInfo::from_surface(s, false)),
                    None => log::warn!("virtual surface references unknown surface {}", members[0]),
                }
            } else {
                match config.glue(&members) {
                    Some(g) => tileset.push(SurfaceInfo::from_glue(g, false)),
                    None => log::warn!("virtual surface references unknown glue {members:?}"),
                }
            }
        }
        (traversed, SurfaceStack { surfaces: tileset })
    }
}

/// Geodata free-layer parameters carried by its layer
#[derive(Clone, Debug)]
pub struct FreeLayerInfo {
    pub name: String,
    pub style_url: Option<String>,
    pub lod_range: LodRange,
    pub extents: Aabb,
    pub monolithic: bool,
}

/// One traversable layer: a surface stack (or free layer) plus its tree
pub struct MapLayer {
    pub surface_stack: SurfaceStack,
    pub tileset_stack: Option<SurfaceStack>,
    pub free_layer: Option<FreeLayerInfo>,
    /// Surface id -> ordered bound layers (bottom to top) from the view
    pub view_surfaces: HashMap<String, Vec<BoundLayerRef>>,
    pub tree: TraverseTree,
}

impl MapLayer {
    /// The view's surface layer, substituting a virtual surface when one
    /// covers exactly the selected set
    pub fn surfaces_layer(config: &MapConfig, view: &ViewConfig, use_virtual: bool) -> MapLayer {
        let ids: Vec<&str> = config
            .surfaces
            .iter()
            .filter(|s| view.surfaces.contains_key(&s.id))
            .map(|s| s.id.as_str())
            .collect();

        let virtual_pick = if use_virtual {
            config.virtual_surface(&ids)
        } else {
            None
        };
        let (surface_stack, tileset_stack) = match virtual_pick {
            Some(vs) => {
                let (stack, tileset) = SurfaceStack::from_virtual(config, vs);
                (stack, Some(tileset))
            }
            None => (SurfaceStack::from_view(config, view), None),
        };

        MapLayer {
            surface_stack,
            tileset_stack,
            free_layer: None,
            view_surfaces: view.surfaces.clone(),
            tree: TraverseTree::new(TileId::new(0, 0, 0)),
        }
    }

    /// A free-layer geodata layer
    pub fn geodata_layer(name: &str, fl: &FreeLayerConfig) -> MapLayer {
        let surface = SurfaceInfo {
            name: vec![name.to_string()],
            alien: false,
            lod_range: fl.lod_range,
            url_meta: UrlTemplate::new(""),
            url_mesh: UrlTemplate::new(""),
            url_int_tex: UrlTemplate::new(""),
            url_geodata: Some(fl.geodata_url.clone()),
        };
        MapLayer {
            surface_stack: SurfaceStack {
                surfaces: vec![surface],
            },
            tileset_stack: None,
            free_layer: Some(FreeLayerInfo {
                name: name.to_string(),
                style_url: fl.style_url.clone(),
                lod_range: fl.lod_range,
                extents: fl.extents_aabb(),
                monolithic: fl.monolithic,
            }),
            view_surfaces: HashMap::new(),
            tree: TraverseTree::new(TileId::new(0, 0, 0)),
        }
    }

    pub fn is_geodata(&self) -> bool {
        self.free_layer.is_some()
    }

    /// Resolve a surface reference against the right stack
    pub fn surface_info(&self, r: SurfaceRef) -> Option<&SurfaceInfo> {
        match r {
            SurfaceRef::Stack(i) => self.surface_stack.surfaces.get(i),
            SurfaceRef::Tileset(i) => self
                .tileset_stack
                .as_ref()
                .and_then(|t| t.surfaces.get(i)),
        }
    }

    /// The view's bound-layer list for a submesh of `surface`
    ///
    /// For glues, `surface_reference` (1-based) selects which member
    /// surface's list applies.
    pub fn bound_list(&self, surface: &SurfaceInfo, surface_reference: u32) -> Vec<BoundLayerRef> {
        let name = if surface.is_glue() {
            surface
                .name
                .get((surface_reference as usize).saturating_sub(1))
                .unwrap_or(&surface.name[0])
        } else {
            &surface.name[0]
        };
        self.view_surfaces.get(name).cloned().unwrap_or_default()
    }

    /// Drop the traverse tree; resources stay cached
    pub fn purge(&mut self) {
        self.tree.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_config;

    #[test]
    fn test_stack_from_view_orders_glues_first() {
        let config = test_config();
        let view = config.default_view().unwrap();
        let stack = SurfaceStack::from_view(&config, view);

        // glue of both surfaces on top, then surfaces in config order
        assert_eq!(stack.surfaces.len(), 3);
        assert!(stack.surfaces[0].is_glue());
        assert_eq!(stack.surfaces[1].name, vec!["base".to_string()]);
        assert_eq!(stack.surfaces[2].name, vec!["over".to_string()]);
    }

    #[test]
    fn test_layer_bound_list_for_glue_member() {
        let config = test_config();
        let view = config.default_view().unwrap();
        let layer = MapLayer::surfaces_layer(&config, view, false);

        let glue = layer.surface_stack.surfaces[0].clone();
        assert!(glue.is_glue());

        // member 1 is "base", member 2 is "over"
        let base_list = layer.bound_list(&glue, 1);
        assert_eq!(base_list.len(), 1);
        assert_eq!(base_list[0].id, "ortho");
        let over_list = layer.bound_list(&glue, 2);
        assert!(over_list.is_empty());
    }

    #[test]
    fn test_virtual_surface_substitution() {
        let config = test_config();
        let view = config.default_view().unwrap();
        let layer = MapLayer::surfaces_layer(&config, view, true);

        assert_eq!(layer.surface_stack.surfaces.len(), 1);
        let tileset = layer.tileset_stack.as_ref().unwrap();
        // mapping: [base], [over], [base, over]
        assert_eq!(tileset.surfaces.len(), 3);
        assert!(!tileset.surfaces[0].is_glue());
        assert!(!tileset.surfaces[1].is_glue());
        assert!(tileset.surfaces[2].is_glue());
    }

    #[test]
    fn test_geodata_layer() {
        let config = test_config();
        let (name, fl) = config.free_layers.iter().next().unwrap();
        let layer = MapLayer::geodata_layer(name, fl);
        assert!(layer.is_geodata());
        assert!(layer.free_layer.as_ref().unwrap().monolithic);
        assert!(layer.surface_stack.surfaces[0].url_geodata.is_some());
    }

    #[test]
    fn test_surface_info_resolution() {
        let config = test_config();
        let view = config.default_view().unwrap();
        let layer = MapLayer::surfaces_layer(&config, view, true);

        assert!(layer.surface_info(SurfaceRef::Stack(0)).is_some());
        assert!(layer.surface_info(SurfaceRef::Stack(9)).is_none());
        assert!(layer.surface_info(SurfaceRef::Tileset(2)).is_some());
        assert!(layer.surface_info(SurfaceRef::Tileset(9)).is_none());
    }
}
