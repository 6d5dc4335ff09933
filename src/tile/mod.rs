//! Tile coordinates and metadata

pub mod id;
pub mod meta;

pub use id::TileId;
pub use meta::{BoundMetaTile, MetaNode, MetaTile};
