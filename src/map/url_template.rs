//! URL templates for tile resources
//!
//! Templates carry `{lod}` / `{x}` / `{y}` placeholders for the global tile
//! id, `{loclod}` / `{locx}` / `{locy}` for the id local to the reference
//! frame subtree, and `{sub}` for the submesh index.

use crate::tile::TileId;
use serde::Deserialize;

/// Variables substituted into a URL template
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileVars {
    pub tile: TileId,
    pub local: TileId,
    pub sub: u32,
}

impl TileVars {
    pub fn new(tile: TileId, local: TileId) -> Self {
        Self { tile, local, sub: 0 }
    }

    pub fn with_sub(mut self, sub: u32) -> Self {
        self.sub = sub;
        self
    }

    /// Both ids masked to their 256-aligned metatile blocks
    pub fn meta_aligned(self) -> Self {
        Self {
            tile: self.tile.meta_block(),
            local: self.local.meta_block(),
            sub: self.sub,
        }
    }

    /// Both ids shifted `depth` levels up the tree
    pub fn coarsened(self, depth: u8) -> Self {
        Self {
            tile: self.tile.coarsened(depth),
            local: self.local.coarsened(depth),
            sub: self.sub,
        }
    }
}

/// A URL with tile-variable placeholders
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct UrlTemplate(String);

impl UrlTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitute every known placeholder; unknown placeholders are kept
    /// verbatim
    pub fn expand(&self, vars: &TileVars) -> String {
        let mut out = String::with_capacity(self.0.len() + 16);
        let mut rest = self.0.as_str();
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            match tail.find('}') {
                Some(end) => {
                    let token = &tail[1..end];
                    match token {
                        "lod" => out.push_str(&vars.tile.lod.to_string()),
                        "x" => out.push_str(&vars.tile.x.to_string()),
                        "y" => out.push_str(&vars.tile.y.to_string()),
                        "loclod" => out.push_str(&vars.local.lod.to_string()),
                        "locx" => out.push_str(&vars.local.x.to_string()),
                        "locy" => out.push_str(&vars.local.y.to_string()),
                        "sub" => out.push_str(&vars.sub.to_string()),
                        _ => out.push_str(&tail[..=end]),
                    }
                    rest = &tail[end + 1..];
                }
                None => {
                    out.push_str(tail);
                    return out;
                }
            }
        }
        out.push_str(rest);
        out
    }
}
