//! Component name table.
//!
//! Regions carrying a component attribute are grouped under a component
//! index. Hits report that index rather than the name string. Index 0 is
//! reserved for regions with no component name. The table is built once
//! after a load and shared read-only by every session.

use std::collections::HashMap;

use crate::geom::{GeometryInstance, Region};

/// Name reported for component index 0.
pub const NO_COMPONENT_NAME: &str = "No MUVES Name";

/// Region id / air code to component index lookup.
#[derive(Clone, Debug)]
pub struct ComponentTable {
    names: Vec<String>,
    by_name: HashMap<String, u32>,
    ident: HashMap<i32, u32>,
    air: HashMap<i32, u32>,
}

impl Default for ComponentTable {
    fn default() -> Self {
        Self {
            names: vec![NO_COMPONENT_NAME.to_string()],
            by_name: HashMap::new(),
            ident: HashMap::new(),
            air: HashMap::new(),
        }
    }
}

impl ComponentTable {
    /// Build from every region of the given instances, in load order.
    /// The first region seen for an ident or air code wins.
    pub fn build<'a>(instances: impl IntoIterator<Item = &'a GeometryInstance>) -> Self {
        let mut table = Self::default();
        for instance in instances {
            for region in instance.index().regions() {
                table.insert(region);
            }
        }
        tracing::debug!(components = table.names.len() - 1, "component table built");
        table
    }

    fn insert(&mut self, region: &Region) {
        let Some(name) = region.component.as_deref().filter(|n| !n.is_empty()) else {
            return;
        };
        let index = match self.by_name.get(name) {
            Some(&idx) => idx,
            None => {
                let idx = self.names.len() as u32;
                self.names.push(name.to_string());
                self.by_name.insert(name.to_string(), idx);
                idx
            }
        };
        if region.is_air() {
            self.air.entry(region.aircode).or_insert(index);
        } else {
            self.ident.entry(region.region_id).or_insert(index);
        }
    }

    /// Component index for a region (0 if unknown).
    #[inline]
    pub fn resolve(&self, region: &Region) -> u32 {
        if region.is_air() {
            self.resolve_air(region.aircode)
        } else {
            self.resolve_ident(region.region_id)
        }
    }

    /// Component index for a solid region id (0 if unknown).
    #[inline]
    pub fn resolve_ident(&self, region_id: i32) -> u32 {
        self.ident.get(&region_id).copied().unwrap_or(0)
    }

    /// Component index for an air code (0 if unknown).
    #[inline]
    pub fn resolve_air(&self, aircode: i32) -> u32 {
        self.air.get(&aircode).copied().unwrap_or(0)
    }

    /// Component names indexed by component index.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Name for a component index.
    pub fn name(&self, index: u32) -> Option<&str> {
        self.names.get(index as usize).map(String::as_str)
    }

    /// Number of named components (index 0 excluded).
    pub fn len(&self) -> usize {
        self.names.len() - 1
    }

    /// True if no region carries a component name.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{Shape, SpatialIndex};
    use std::sync::Arc;

    fn region(id: i32, aircode: i32, comp: Option<&str>) -> Region {
        Region {
            name: Arc::from(format!("r{id}")),
            region_id: id,
            aircode,
            component: comp.map(str::to_string),
            shape: Shape::Sph {
                center: [0.0; 3],
                radius: 1.0,
            },
        }
    }

    fn table(regions: Vec<Region>) -> ComponentTable {
        let inst = GeometryInstance::new(Arc::new(SpatialIndex::build(regions)), None, vec![]);
        ComponentTable::build([&inst])
    }

    #[test]
    fn test_indices_and_names() {
        let t = table(vec![
            region(1000, 0, Some("HULL")),
            region(1001, 0, Some("ENGINE")),
            region(1002, 0, Some("HULL")),
            region(1003, 0, None),
            region(0, 2, Some("CREW_AIR")),
        ]);
        assert_eq!(t.names()[0], NO_COMPONENT_NAME);
        assert_eq!(t.len(), 3);
        assert_eq!(t.resolve_ident(1000), 1);
        assert_eq!(t.resolve_ident(1001), 2);
        assert_eq!(t.resolve_ident(1002), 1);
        assert_eq!(t.resolve_ident(1003), 0);
        assert_eq!(t.resolve_air(2), 3);
        assert_eq!(t.name(3), Some("CREW_AIR"));
    }

    #[test]
    fn test_resolve_air_vs_ident() {
        let t = table(vec![region(7, 0, Some("A")), region(7, 7, Some("B"))]);
        assert_eq!(t.resolve(&region(7, 0, None)), 1);
        assert_eq!(t.resolve(&region(7, 7, None)), 2);
        assert_eq!(t.resolve(&region(99, 0, None)), 0);
    }

    #[test]
    fn test_empty_table() {
        let t = ComponentTable::default();
        assert!(t.is_empty());
        assert_eq!(t.names().len(), 1);
    }
}
