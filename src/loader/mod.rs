//! Geometry loading.
//!
//! A [`GeometryLoader`] turns a model source into prepared geometry
//! instances. The registry calls it once per load and never touches the
//! model format itself. [`JsonModelLoader`] reads the JSON model database
//! described in [`db`].

pub mod db;
mod json;

use std::path::Path;

use crate::geom::GeometryInstance;
use crate::util::{BBox3d, Result};

pub use json::JsonModelLoader;

/// What to load and how to prepare it.
#[derive(Clone, Debug)]
pub struct LoadOptions {
    /// Explicit top-level objects. Empty means "use the database's list".
    pub objects: Vec<String>,
    /// Load one named instance per assembly instead of a single instance.
    pub use_articulation: bool,
    /// Include air regions.
    pub use_air: bool,
    /// Threads used to prepare spatial indices.
    pub prep_threads: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            objects: Vec::new(),
            use_articulation: false,
            use_air: false,
            prep_threads: 1,
        }
    }
}

impl LoadOptions {
    /// Load only the named objects.
    pub fn with_objects<I, S>(mut self, objects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.objects = objects.into_iter().map(Into::into).collect();
        self
    }
}

/// Name of the synthetic node above the loaded trees.
pub const ITEM_TREE_ROOT: &str = "root";

/// One node of the object hierarchy behind the prepared geometry.
///
/// Combinations carry only their name and members. Regions are leaves and
/// carry their ident, air code, component name and how many combinations
/// in the database reference them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemNode {
    pub name: String,
    pub component: Option<String>,
    pub region_id: Option<i32>,
    pub aircode: i32,
    pub use_count: usize,
    pub members: Vec<ItemNode>,
}

impl ItemNode {
    /// Node with a name and nothing else.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_region(&self) -> bool {
        self.region_id.is_some()
    }

    /// Direct member by name.
    pub fn member(&self, name: &str) -> Option<&ItemNode> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Region leaves below this node, depth first.
    pub fn regions(&self) -> Vec<&ItemNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.is_region() {
                out.push(node);
            }
            stack.extend(node.members.iter().rev());
        }
        out
    }
}

/// Result of a successful load.
#[derive(Debug)]
pub struct LoadedModel {
    /// Database title.
    pub title: String,
    /// One or more prepared instances.
    pub instances: Vec<GeometryInstance>,
    /// Combined extents of all instances.
    pub bounds: BBox3d,
    /// Object hierarchy under an [`ITEM_TREE_ROOT`] node.
    pub item_tree: ItemNode,
}

impl LoadedModel {
    /// Assemble a model, computing the overall bounds. The item tree lists
    /// each instance's top-level objects without descending into them.
    pub fn new(title: String, instances: Vec<GeometryInstance>) -> Self {
        let mut bounds = BBox3d::EMPTY;
        let mut item_tree = ItemNode::named(ITEM_TREE_ROOT);
        for inst in &instances {
            bounds.expand_by_box(&inst.bounds());
            item_tree
                .members
                .extend(inst.trees().iter().map(ItemNode::named));
        }
        Self {
            title,
            instances,
            bounds,
            item_tree,
        }
    }

    /// Replace the item tree with a fuller hierarchy.
    pub fn with_item_tree(mut self, item_tree: ItemNode) -> Self {
        self.item_tree = item_tree;
        self
    }
}

/// Loads a model source into prepared geometry.
///
/// Called exactly once per registry load, from the control thread.
pub trait GeometryLoader: Send + Sync {
    fn load(&self, source: &Path, options: &LoadOptions) -> Result<LoadedModel>;
}
