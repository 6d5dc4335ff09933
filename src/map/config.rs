//! Map configuration model
//!
//! The configuration document is JSON; [`MapConfig::from_slice`] is the
//! boundary where it enters the engine. The model keeps the external
//! camelCase key names.

use crate::core::types::{DVec3, Result};
use crate::core::Error;
use crate::map::url_template::UrlTemplate;
use crate::math::Aabb;
use crate::tile::TileId;
use serde::Deserialize;
use std::collections::HashMap;

/// Inclusive LOD interval, serialized as `[min, max]`
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(from = "[u8; 2]")]
pub struct LodRange {
    pub min: u8,
    pub max: u8,
}

impl From<[u8; 2]> for LodRange {
    fn from(v: [u8; 2]) -> Self {
        Self { min: v[0], max: v[1] }
    }
}

impl LodRange {
    pub fn contains(&self, lod: u8) -> bool {
        lod >= self.min && lod <= self.max
    }
}

/// Inclusive tile rectangle at `LodRange::min`, serialized as `[ll, ur]`
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(from = "[[u32; 2]; 2]")]
pub struct TileRange {
    pub ll: [u32; 2],
    pub ur: [u32; 2],
}

impl From<[[u32; 2]; 2]> for TileRange {
    fn from(v: [[u32; 2]; 2]) -> Self {
        Self { ll: v[0], ur: v[1] }
    }
}

impl TileRange {
    pub fn contains(&self, id: TileId) -> bool {
        id.x >= self.ll[0] && id.x <= self.ur[0] && id.y >= self.ll[1] && id.y <= self.ur[1]
    }
}

/// Reference body dimensions
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    pub major_radius: f64,
    pub minor_radius: f64,
}

/// Spatial reference systems and the body the map lives on
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceFrame {
    pub physical_srs: String,
    pub navigation_srs: String,
    pub public_srs: String,
    /// SRS of the tile-tree root node, for geometry-extents distances
    #[serde(default)]
    pub root_srs: Option<String>,
    pub body: Body,
}

/// One geometric dataset contributing meshes over a LOD range
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceConfig {
    pub id: String,
    pub lod_range: LodRange,
    pub meta_url: UrlTemplate,
    pub mesh_url: UrlTemplate,
    pub texture_url: UrlTemplate,
    #[serde(default)]
    pub geodata_url: Option<UrlTemplate>,
}

/// Precomputed composite of two or more base surfaces
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlueConfig {
    /// Member surface ids, bottom to top
    pub id: Vec<String>,
    pub lod_range: LodRange,
    pub meta_url: UrlTemplate,
    pub mesh_url: UrlTemplate,
    pub texture_url: UrlTemplate,
}

/// Server-merged surface standing in for a whole view
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualSurfaceConfig {
    /// The surface ids this virtual surface replaces
    pub id: Vec<String>,
    /// Tileset stack: each entry lists member indices into `id`; one index
    /// is a plain surface, several are a glue. Wire metanodes reference
    /// these entries 1-based through `source_reference`.
    pub mapping: Vec<Vec<usize>>,
    pub lod_range: LodRange,
    pub meta_url: UrlTemplate,
    pub mesh_url: UrlTemplate,
    pub texture_url: UrlTemplate,
}

/// A texture layer composited onto surface geometry
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundLayerConfig {
    pub id: String,
    pub lod_range: LodRange,
    pub tile_range: TileRange,
    pub url: UrlTemplate,
    #[serde(default)]
    pub mask_url: Option<UrlTemplate>,
    #[serde(default)]
    pub meta_url: Option<UrlTemplate>,
    #[serde(default)]
    pub is_transparent: bool,
    #[serde(default)]
    pub credits: Vec<String>,
}

/// Attribution record
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditConfig {
    pub id: u32,
    #[serde(default)]
    pub notice: String,
}

/// Auxiliary content not bound to the surface tree
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeLayerConfig {
    #[serde(default)]
    pub style_url: Option<String>,
    pub geodata_url: UrlTemplate,
    pub lod_range: LodRange,
    /// `[min, max]` corners in the physical SRS
    pub extents: [[f64; 3]; 2],
    /// Single blob at the root rather than a tiled tree
    #[serde(default)]
    pub monolithic: bool,
}

impl FreeLayerConfig {
    pub fn extents_aabb(&self) -> Aabb {
        Aabb::new(
            DVec3::from_array(self.extents[0]),
            DVec3::from_array(self.extents[1]),
        )
    }
}

/// Reference to a bound layer within a view, with optional opacity override
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundLayerRef {
    pub id: String,
    #[serde(default)]
    pub alpha: Option<f64>,
}

/// Named selection of surfaces with per-surface bound-layer lists
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// Surface id -> ordered bound layers, bottom to top
    #[serde(default)]
    pub surfaces: HashMap<String, Vec<BoundLayerRef>>,
    #[serde(default)]
    pub free_layers: Vec<String>,
}

/// The map configuration document
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapConfig {
    pub reference_frame: ReferenceFrame,
    #[serde(default)]
    pub surfaces: Vec<SurfaceConfig>,
    #[serde(default)]
    pub glues: Vec<GlueConfig>,
    #[serde(default)]
    pub virtual_surfaces: Vec<VirtualSurfaceConfig>,
    #[serde(default)]
    pub bound_layers: Vec<BoundLayerConfig>,
    #[serde(default)]
    pub credits: HashMap<String, CreditConfig>,
    #[serde(default)]
    pub free_layers: HashMap<String, FreeLayerConfig>,
    #[serde(default)]
    pub views: Vec<ViewConfig>,
}

impl MapConfig {
    /// Parse and validate a configuration document
    pub fn from_slice(bytes: &[u8]) -> Result<MapConfig> {
        let config: MapConfig = serde_json::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.surfaces.is_empty() && self.free_layers.is_empty() {
            return Err(Error::Config("no surfaces and no free layers".into()));
        }
        for s in &self.surfaces {
            if s.lod_range.min > s.lod_range.max {
                return Err(Error::Config(format!("surface {}: empty lod range", s.id)));
            }
        }
        for v in &self.views {
            for id in v.surfaces.keys() {
                if self.surface(id).is_none() {
                    return Err(Error::Config(format!("view references unknown surface {id}")));
                }
            }
            for refs in v.surfaces.values() {
                for r in refs {
                    if self.bound_layer(&r.id).is_none() {
                        return Err(Error::Config(format!(
                            "view references unknown bound layer {}", r.id
                        )));
                    }
                }
            }
            for fl in &v.free_layers {
                if !self.free_layers.contains_key(fl) {
                    return Err(Error::Config(format!("view references unknown free layer {fl}")));
                }
            }
        }
        Ok(())
    }

    pub fn surface(&self, id: &str) -> Option<&SurfaceConfig> {
        self.surfaces.iter().find(|s| s.id == id)
    }

    pub fn bound_layer(&self, id: &str) -> Option<&BoundLayerConfig> {
        self.bound_layers.iter().find(|b| b.id == id)
    }

    /// Glue whose member set equals `ids` (order-insensitive)
    pub fn glue(&self, ids: &[String]) -> Option<&GlueConfig> {
        self.glues.iter().find(|g| {
            g.id.len() == ids.len() && g.id.iter().all(|m| ids.contains(m))
        })
    }

    /// Virtual surface covering exactly the given surface set
    pub fn virtual_surface(&self, ids: &[&str]) -> Option<&VirtualSurfaceConfig> {
        self.virtual_surfaces.iter().find(|v| {
            v.id.len() == ids.len() && v.id.iter().all(|m| ids.iter().any(|i| i == m))
        })
    }

    /// The view rendered when the application does not pick one
    pub fn default_view(&self) -> Option<&ViewConfig> {
        self.views.first()
    }

    /// Numeric credit id for a credit name
    pub fn credit_id(&self, name: &str) -> Option<u32> {
        self.credits.get(name).map(|c| c.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const MINIMAL: &str = r#"{
        "referenceFrame": {
            "physicalSrs": "phys",
            "navigationSrs": "nav",
            "publicSrs": "pub",
            "body": { "majorRadius": 6378137.0, "minorRadius": 6356752.0 }
        },
        "surfaces": [{
            "id": "base",
            "lodRange": [0, 18],
            "metaUrl": "meta-{lod}-{x}-{y}",
            "meshUrl": "mesh-{lod}-{x}-{y}",
            "textureUrl": "tex-{lod}-{x}-{y}-{sub}"
        }],
        "boundLayers": [{
            "id": "ortho",
            "lodRange": [0, 18],
            "tileRange": [[0, 0], [262143, 262143]],
            "url": "ortho-{lod}-{x}-{y}",
            "credits": ["cr"]
        }],
        "credits": { "cr": { "id": 7, "notice": "(c) somebody" } },
        "views": [{
            "surfaces": { "base": [ { "id": "ortho" } ] }
        }]
    }"#;

    #[test]
    fn test_parse_minimal() {
        let config = MapConfig::from_slice(MINIMAL.as_bytes()).unwrap();
        assert_eq!(config.surfaces.len(), 1);
        assert_eq!(config.bound_layers.len(), 1);
        assert_eq!(config.credit_id("cr"), Some(7));
        assert!(config.default_view().is_some());

        let s = config.surface("base").unwrap();
        assert!(s.lod_range.contains(5));
        assert!(!s.lod_range.contains(19));
    }

    #[test]
    fn test_reject_empty_config() {
        let json = r#"{
            "referenceFrame": {
                "physicalSrs": "p", "navigationSrs": "n", "publicSrs": "u",
                "body": { "majorRadius": 1.0, "minorRadius": 1.0 }
            }
        }"#;
        assert!(MapConfig::from_slice(json.as_bytes()).is_err());
    }

    #[test]
    fn test_reject_unknown_view_reference() {
        let json = MINIMAL.replace("\"base\": [ { \"id\": \"ortho\" } ]",
                                   "\"nope\": []");
        assert!(MapConfig::from_slice(json.as_bytes()).is_err());
    }

    #[test]
    fn test_reject_malformed_json() {
        assert!(MapConfig::from_slice(b"{ not json").is_err());
    }

    #[test]
    fn test_tile_range_contains() {
        let r = TileRange { ll: [2, 3], ur: [5, 6] };
        assert!(r.contains(TileId::new(4, 2, 3)));
        assert!(r.contains(TileId::new(4, 5, 6)));
        assert!(!r.contains(TileId::new(4, 6, 6)));
        assert!(!r.contains(TileId::new(4, 5, 2)));
    }
}
