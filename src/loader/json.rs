//! Loader for the JSON model database.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;

use super::db::{DbObject, ModelDb};
use super::{GeometryLoader, ItemNode, LoadOptions, LoadedModel, ITEM_TREE_ROOT};
use crate::geom::{GeometryInstance, Region, SpatialIndex};
use crate::util::{Error, Result};

/// Nesting depth at which a combination is assumed to reference itself.
const MAX_TREE_DEPTH: usize = 64;

/// Reads [`ModelDb`] files.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonModelLoader;

/// Regions gathered for one future instance.
struct InstanceTrees {
    name: Option<String>,
    trees: Vec<String>,
    regions: Vec<Region>,
}

impl JsonModelLoader {
    /// Load an already parsed database.
    #[tracing::instrument(skip_all, fields(title = %db.title))]
    pub fn load_db(&self, db: &ModelDb, options: &LoadOptions) -> Result<LoadedModel> {
        let groups = select_trees(db, options)?;

        let mut gathered = Vec::with_capacity(groups.len());
        for (name, trees) in groups {
            let mut regions = Vec::new();
            for top in &trees {
                walk(db, top, &format!("/{top}"), options.use_air, 0, &mut regions)?;
            }
            tracing::debug!(instance = ?name, trees = ?trees, regions = regions.len(), "trees gathered");
            gathered.push(InstanceTrees { name, trees, regions });
        }

        let total: usize = gathered.iter().map(|g| g.regions.len()).sum();
        if total == 0 {
            return Err(Error::NoGeometry);
        }

        let item_tree = build_item_tree(db, gathered.iter().flat_map(|g| g.trees.iter()));

        // Prep every instance in parallel
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.prep_threads.max(1))
            .thread_name(|i| format!("rtserver-prep-{i}"))
            .build()?;
        let instances: Vec<GeometryInstance> = pool.install(|| {
            gathered
                .into_par_iter()
                .map(|g| GeometryInstance::new(Arc::new(SpatialIndex::build(g.regions)), g.name, g.trees))
                .collect()
        });

        let model = LoadedModel::new(db.title.clone(), instances).with_item_tree(item_tree);
        tracing::info!(
            instances = model.instances.len(),
            regions = total,
            "model extents: {:?}",
            model.bounds
        );
        Ok(model)
    }
}

impl GeometryLoader for JsonModelLoader {
    fn load(&self, source: &Path, options: &LoadOptions) -> Result<LoadedModel> {
        if !source.exists() {
            return Err(Error::FileNotFound(source.to_path_buf()));
        }
        let text = std::fs::read_to_string(source)?;
        let db = ModelDb::from_json(&text)?;
        self.load_db(&db, options)
    }
}

/// Decide which top-level objects make up which instance.
fn select_trees(db: &ModelDb, options: &LoadOptions) -> Result<Vec<(Option<String>, Vec<String>)>> {
    if options.use_articulation {
        if !options.objects.is_empty() {
            return Err(Error::InvalidConfig(
                "cannot use articulation when object names are given".into(),
            ));
        }
        if db.rtserver_assemblies.is_empty() {
            return Err(Error::MissingTops);
        }
        return Ok(db
            .rtserver_assemblies
            .iter()
            .map(|(name, trees)| (Some(name.clone()), trees.clone()))
            .collect());
    }

    let tops = if options.objects.is_empty() {
        if db.rtserver_tops.is_empty() {
            return Err(Error::MissingTops);
        }
        db.rtserver_tops.clone()
    } else {
        options.objects.clone()
    };
    Ok(vec![(None, tops)])
}

/// Depth-first walk from `name`, collecting regions.
fn walk(
    db: &ModelDb,
    name: &str,
    path: &str,
    use_air: bool,
    depth: usize,
    out: &mut Vec<Region>,
) -> Result<()> {
    if depth > MAX_TREE_DEPTH {
        return Err(Error::other(format!("combination nesting too deep at {path}")));
    }
    let obj = db
        .objects
        .get(name)
        .ok_or_else(|| Error::ObjectNotFound(name.to_string()))?;

    match obj {
        DbObject::Comb { members } => {
            for member in members {
                walk(db, member, &format!("{path}/{member}"), use_air, depth + 1, out)?;
            }
        }
        DbObject::Region(def) => {
            if def.aircode > 0 && !use_air {
                return Ok(());
            }
            if def.shape.is_degenerate() {
                tracing::warn!(region = path, "skipping degenerate solid");
                return Ok(());
            }
            out.push(Region {
                name: Arc::from(path),
                region_id: def.id,
                aircode: def.aircode,
                component: def.component().map(str::to_string),
                shape: def.shape.clone(),
            });
        }
    }
    Ok(())
}

/// Hierarchy of every loaded tree under one root node. Air regions are
/// listed even when they were not prepared.
fn build_item_tree<'a>(db: &ModelDb, tops: impl Iterator<Item = &'a String>) -> ItemNode {
    let mut uses: HashMap<&str, usize> = HashMap::new();
    for obj in db.objects.values() {
        if let DbObject::Comb { members } = obj {
            for member in members {
                *uses.entry(member.as_str()).or_default() += 1;
            }
        }
    }

    let mut root = ItemNode::named(ITEM_TREE_ROOT);
    root.members = tops.filter_map(|top| item_node(db, &uses, top, 0)).collect();
    root
}

fn item_node(db: &ModelDb, uses: &HashMap<&str, usize>, name: &str, depth: usize) -> Option<ItemNode> {
    if depth > MAX_TREE_DEPTH {
        return None;
    }
    let mut node = ItemNode::named(name);
    match db.objects.get(name)? {
        DbObject::Comb { members } => {
            node.members = members
                .iter()
                .filter_map(|m| item_node(db, uses, m, depth + 1))
                .collect();
        }
        DbObject::Region(def) => {
            node.component = def.component().map(str::to_string);
            node.region_id = Some(def.id);
            node.aircode = def.aircode;
            node.use_count = uses.get(name).copied().unwrap_or(0);
        }
    }
    Some(node)
}
