//! Lazily materialised traverse tree
//!
//! One node per tile ever visited by this camera. Nodes live in an arena
//! and link through indices, so parent back-pointers cost nothing and the
//! whole tree drops in one deallocation on map reload.

use crate::camera::draws::Renders;
use crate::map::layer::SurfaceRef;
use crate::resources::resource::Resource;
use crate::tile::{MetaNode, TileId};
use std::sync::Arc;

/// Index of a node within its tree's arena
pub type NodeIndex = u32;

/// Per-tile traversal state
pub struct TraverseNode {
    pub id: TileId,
    pub parent: Option<NodeIndex>,
    /// Child slots in child-index order; `None` until materialised
    pub children: [Option<NodeIndex>; 4],

    /// Owning copy of the chosen metanode; `None` until determined
    pub meta: Option<MetaNode>,
    /// Metatile handle per surface in the stack; `None` where the descent
    /// protocol proved the block absent
    pub meta_tiles: Vec<Option<Arc<Resource>>>,
    /// The surface this node renders from, once meta is determined
    pub surface: Option<SurfaceRef>,

    /// Draw lists are valid and all their resources ready
    pub determined: bool,
    pub renders: Renders,
    /// Pins keeping the draw lists' resources alive
    pub resources: Vec<Arc<Resource>>,
    pub credits: Vec<u32>,

    pub priority: f32,
    pub last_access_tick: u64,
    /// Tick the node's draws were last emitted or pinned
    pub last_render_tick: u64,
}

impl TraverseNode {
    fn new(id: TileId, parent: Option<NodeIndex>) -> Self {
        Self {
            id,
            parent,
            children: [None; 4],
            meta: None,
            meta_tiles: Vec::new(),
            surface: None,
            determined: false,
            renders: Renders::default(),
            resources: Vec::new(),
            credits: Vec::new(),
            priority: f32::NAN,
            last_access_tick: 0,
            last_render_tick: 0,
        }
    }

    pub fn has_children(&self) -> bool {
        self.children.iter().any(|c| c.is_some())
    }

    pub fn renders_empty(&self) -> bool {
        self.renders.is_empty()
    }
}

/// Arena of traverse nodes rooted at one tile
pub struct TraverseTree {
    nodes: Vec<TraverseNode>,
    root_tile: TileId,
}

impl TraverseTree {
    pub fn new(root_tile: TileId) -> Self {
        Self {
            nodes: vec![TraverseNode::new(root_tile, None)],
            root_tile,
        }
    }

    pub fn root(&self) -> NodeIndex {
        0
    }

    pub fn root_tile(&self) -> TileId {
        self.root_tile
    }

    pub fn node(&self, index: NodeIndex) -> &TraverseNode {
        &self.nodes[index as usize]
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> &mut TraverseNode {
        &mut self.nodes[index as usize]
    }

    /// Materialise child `child_index` of `parent`; the slot must be empty
    pub fn add_child(&mut self, parent: NodeIndex, child_index: u8) -> NodeIndex {
        debug_assert!(self.nodes[parent as usize].children[child_index as usize].is_none());
        let tile = self.nodes[parent as usize].id.child(child_index);
        let index = self.nodes.len() as NodeIndex;
        self.nodes.push(TraverseNode::new(tile, Some(parent)));
        self.nodes[parent as usize].children[child_index as usize] = Some(index);
        index
    }

    /// Copy of a node's child slots, for iteration while mutating
    pub fn child_slots(&self, index: NodeIndex) -> [Option<NodeIndex>; 4] {
        self.nodes[index as usize].children
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop every node and start over from a fresh root
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.nodes.push(TraverseNode::new(self.root_tile, None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_root() {
        let tree = TraverseTree::new(TileId::new(0, 0, 0));
        assert_eq!(tree.len(), 1);
        let root = tree.node(tree.root());
        assert_eq!(root.id, TileId::new(0, 0, 0));
        assert!(root.parent.is_none());
        assert!(!root.has_children());
        assert!(root.renders_empty());
    }

    #[test]
    fn test_add_child_links() {
        let mut tree = TraverseTree::new(TileId::new(2, 1, 1));
        let root = tree.root();
        let c0 = tree.add_child(root, 0);
        let c3 = tree.add_child(root, 3);

        assert_eq!(tree.node(c0).id, TileId::new(3, 2, 2));
        assert_eq!(tree.node(c3).id, TileId::new(3, 3, 3));
        assert_eq!(tree.node(c0).parent, Some(root));
        assert_eq!(tree.node(c3).parent, Some(root));

        let slots = tree.child_slots(root);
        assert_eq!(slots[0], Some(c0));
        assert_eq!(slots[1], None);
        assert_eq!(slots[2], None);
        assert_eq!(slots[3], Some(c3));
        assert!(tree.node(root).has_children());
    }

    #[test]
    fn test_clear_resets_to_root() {
        let mut tree = TraverseTree::new(TileId::new(0, 0, 0));
        let root = tree.root();
        let c = tree.add_child(root, 1);
        tree.add_child(c, 2);
        assert_eq!(tree.len(), 3);

        tree.clear();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.node(tree.root()).id, TileId::new(0, 0, 0));
        assert!(!tree.node(tree.root()).has_children());
    }
}
