//! Map configuration, layers, and the engine facade

pub mod config;
pub mod layer;
#[allow(clippy::module_inception)]
pub mod map;
pub mod url_template;

pub use config::MapConfig;
pub use layer::{FreeLayerInfo, MapLayer, SurfaceInfo, SurfaceRef, SurfaceStack};
pub use map::{Collaborators, DataRunner, Map};
pub use url_template::{TileVars, UrlTemplate};
