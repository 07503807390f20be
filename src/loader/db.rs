//! JSON model database schema.
//!
//! ```json
//! {
//!   "title": "test box",
//!   "rtserver_tops": ["all"],
//!   "rtserver_assemblies": { "hull": ["hull.c"] },
//!   "objects": {
//!     "all":   { "comb": { "members": ["box.r"] } },
//!     "box.r": { "region": { "id": 1000,
//!                 "attributes": { "muves_comp": "HULL" },
//!                 "shape": { "rpp": { "min": [-10,-10,-10], "max": [10,10,10] } } } }
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geom::Shape;

/// Attribute holding the component name of a region.
pub const COMPONENT_ATTR: &str = "muves_comp";

/// A whole model database.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelDb {
    #[serde(default)]
    pub title: String,
    /// Default top-level objects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rtserver_tops: Vec<String>,
    /// Named groups of top-level objects, one instance each.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rtserver_assemblies: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub objects: BTreeMap<String, DbObject>,
}

/// A database object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbObject {
    /// Combination of other objects.
    Comb { members: Vec<String> },
    /// Leaf region.
    Region(RegionDef),
}

/// Region definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionDef {
    pub id: i32,
    #[serde(default)]
    pub aircode: i32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    pub shape: Shape,
}

impl RegionDef {
    /// Component name attribute (key matched case-insensitively).
    pub fn component(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(COMPONENT_ATTR))
            .map(|(_, v)| v.as_str())
    }
}

impl ModelDb {
    /// Parse a database from JSON text.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Add a combination.
    pub fn add_comb<I, S>(&mut self, name: &str, members: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members = members.into_iter().map(Into::into).collect();
        self.objects.insert(name.to_string(), DbObject::Comb { members });
        self
    }

    /// Add a region with an optional component name.
    pub fn add_region(&mut self, name: &str, id: i32, aircode: i32, component: Option<&str>, shape: Shape) -> &mut Self {
        let mut attributes = BTreeMap::new();
        if let Some(c) = component {
            attributes.insert(COMPONENT_ATTR.to_string(), c.to_string());
        }
        self.objects.insert(
            name.to_string(),
            DbObject::Region(RegionDef {
                id,
                aircode,
                attributes,
                shape,
            }),
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_example() {
        let db = ModelDb::from_json(
            r#"{
              "title": "test box",
              "rtserver_tops": ["all"],
              "objects": {
                "all":   { "comb": { "members": ["box.r"] } },
                "box.r": { "region": { "id": 1000,
                            "attributes": { "MUVES_Comp": "HULL" },
                            "shape": { "rpp": { "min": [-10,-10,-10], "max": [10,10,10] } } } }
              }
            }"#,
        )
        .unwrap();
        assert_eq!(db.title, "test box");
        assert_eq!(db.rtserver_tops, vec!["all"]);
        match &db.objects["box.r"] {
            DbObject::Region(r) => {
                assert_eq!(r.id, 1000);
                assert_eq!(r.aircode, 0);
                assert_eq!(r.component(), Some("HULL"));
            }
            other => panic!("expected region, got {other:?}"),
        }
    }

    #[test]
    fn test_builder_roundtrip() {
        let mut db = ModelDb {
            title: "built".into(),
            ..Default::default()
        };
        db.add_comb("all", ["ball.r"]).add_region(
            "ball.r",
            1,
            0,
            Some("BALL"),
            Shape::Sph {
                center: [0.0; 3],
                radius: 2.0,
            },
        );
        let text = db.to_json().unwrap();
        let back = ModelDb::from_json(&text).unwrap();
        assert_eq!(back.objects, db.objects);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(ModelDb::from_json("{ nope"), Err(crate::Error::Json(_))));
    }
}
