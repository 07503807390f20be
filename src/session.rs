//! Session registry.
//!
//! A session is an independently addressable snapshot of the loaded geometry.
//! Session 0 is built by [`SessionRegistry::load`] and lives until the next
//! load. Later sessions are duplicates of session 0: their spatial indices
//! are the same `Arc`s, only transforms and names are per-session.
//!
//! Slots hold `Arc<Session>` snapshots. Workers clone the `Arc` of the
//! session a job names and work against that snapshot. Control operations
//! build a complete replacement outside the lock and publish it with a single
//! slot store, so a half-built session is never visible.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::components::ComponentTable;
use crate::core::SessionId;
use crate::geom::{GeometryInstance, Xform};
use crate::loader::{GeometryLoader, ItemNode, LoadOptions};
use crate::util::{BBox3d, DMat4, Error, Result};

/// Slots added each time the table runs out of free slots.
pub const SESSION_BLOCK_SIZE: usize = 5;

/// One geometry snapshot.
#[derive(Clone, Debug)]
pub struct Session {
    id: SessionId,
    instances: Vec<GeometryInstance>,
    bounds: BBox3d,
    components: Arc<ComponentTable>,
}

impl Session {
    fn new(id: SessionId, instances: Vec<GeometryInstance>, components: Arc<ComponentTable>) -> Self {
        let mut session = Self {
            id,
            instances,
            bounds: BBox3d::EMPTY,
            components,
        };
        session.update_bounds();
        session
    }

    fn update_bounds(&mut self) {
        let mut bounds = BBox3d::EMPTY;
        for inst in &self.instances {
            bounds.expand_by_box(&inst.bounds());
        }
        self.bounds = bounds;
    }

    /// Duplicate for slot `id`: shared indices, fresh transforms.
    fn duplicate(&self, id: SessionId) -> Self {
        let instances = self.instances.iter().map(GeometryInstance::duplicate).collect();
        Self::new(id, instances, Arc::clone(&self.components))
    }

    /// Session id.
    #[inline]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Geometry instances.
    #[inline]
    pub fn instances(&self) -> &[GeometryInstance] {
        &self.instances
    }

    /// Combined extents of all instances, in session space.
    #[inline]
    pub fn bounds(&self) -> BBox3d {
        self.bounds
    }

    /// Shared component lookup table.
    #[inline]
    pub fn components(&self) -> &ComponentTable {
        &self.components
    }

    /// Find an instance by assembly name.
    pub fn instance_by_name(&self, name: &str) -> Option<usize> {
        self.instances.iter().position(|i| i.name() == Some(name))
    }
}

#[derive(Default)]
struct Slots {
    sessions: Vec<Option<Arc<Session>>>,
    session0_used: bool,
    title: String,
    components: Arc<ComponentTable>,
    item_tree: Arc<ItemNode>,
}

/// Growable table of sessions.
#[derive(Default)]
pub struct SessionRegistry {
    slots: RwLock<Slots>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a model and make it session 0, discarding every previous session.
    ///
    /// On failure the registry keeps its previous contents.
    #[tracing::instrument(skip_all, fields(source = %source.display()))]
    pub fn load(&self, loader: &dyn GeometryLoader, source: &Path, options: &LoadOptions) -> Result<SessionId> {
        let model = loader.load(source, options)?;
        if model.instances.is_empty() {
            return Err(Error::NoGeometry);
        }

        let components = Arc::new(ComponentTable::build(&model.instances));
        let session0 = Arc::new(Session::new(0, model.instances, Arc::clone(&components)));

        let mut sessions: Vec<Option<Arc<Session>>> = vec![None; SESSION_BLOCK_SIZE];
        sessions[0] = Some(session0);

        let mut slots = self.slots.write();
        *slots = Slots {
            sessions,
            session0_used: false,
            title: model.title,
            components,
            item_tree: Arc::new(model.item_tree),
        };
        tracing::info!(title = %slots.title, "geometry loaded as session 0");
        Ok(0)
    }

    /// Hand out a session.
    ///
    /// The first call after a load returns session 0 itself; later calls
    /// duplicate session 0 into the first free slot, growing the table by
    /// [`SESSION_BLOCK_SIZE`] when it is full.
    pub fn open_session(&self) -> Result<SessionId> {
        let mut slots = self.slots.write();
        let Some(master) = slots.sessions.first().cloned().flatten() else {
            tracing::error!("no geometry loaded");
            return Err(Error::NoGeometry);
        };

        if !slots.session0_used {
            slots.session0_used = true;
            return Ok(0);
        }

        let id = match slots.sessions.iter().skip(1).position(Option::is_none) {
            Some(pos) => pos + 1,
            None => {
                let id = slots.sessions.len();
                let grown = id + SESSION_BLOCK_SIZE;
                slots.sessions.resize(grown, None);
                tracing::debug!(slots = grown, "session table grown");
                id
            }
        };

        slots.sessions[id] = Some(Arc::new(master.duplicate(id)));
        tracing::debug!(session = id, "session opened");
        Ok(id)
    }

    /// Close a session.
    ///
    /// Session 0 is never destroyed: closing it resets its transforms and
    /// makes it available to the next [`open_session`](Self::open_session).
    /// Closed or out-of-range ids are ignored.
    pub fn close_session(&self, id: SessionId) {
        let mut slots = self.slots.write();
        if id == 0 {
            slots.session0_used = false;
            if let Some(Some(s0)) = slots.sessions.first_mut() {
                if s0.instances.iter().any(|i| i.xform().is_some()) {
                    let session = Arc::make_mut(s0);
                    clear_xforms(session);
                }
            }
            return;
        }
        if let Some(slot) = slots.sessions.get_mut(id) {
            if slot.take().is_some() {
                tracing::debug!(session = id, "session closed");
            }
        }
    }

    /// Set the session-to-instance transform of one instance.
    pub fn set_transform(&self, id: SessionId, instance: usize, matrix: DMat4) -> Result<()> {
        self.update(id, |session| {
            let inst = session
                .instances
                .get_mut(instance)
                .ok_or_else(|| Error::InstanceNotFound(instance.to_string()))?;
            inst.set_xform(Some(Xform::new(matrix)));
            Ok(())
        })
    }

    /// Clear every transform of a session.
    pub fn reset_transforms(&self, id: SessionId) -> Result<()> {
        self.update(id, |session| {
            clear_xforms(session);
            Ok(())
        })
    }

    /// Copy-on-write edit of one session. A worker holding the previous
    /// snapshot keeps using it unchanged.
    fn update(&self, id: SessionId, edit: impl FnOnce(&mut Session) -> Result<()>) -> Result<()> {
        let mut slots = self.slots.write();
        let slot = slots
            .sessions
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or(Error::SessionNotFound(id))?;
        let session = Arc::make_mut(slot);
        edit(session)?;
        session.update_bounds();
        Ok(())
    }

    /// Snapshot of a session, if open.
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.slots.read().sessions.get(id).cloned().flatten()
    }

    /// True if the slot holds a session.
    pub fn is_open(&self, id: SessionId) -> bool {
        matches!(self.slots.read().sessions.get(id), Some(Some(_)))
    }

    /// Extents of a session.
    pub fn bounds(&self, id: SessionId) -> Option<BBox3d> {
        self.get(id).map(|s| s.bounds())
    }

    /// Current table size (occupied or not).
    pub fn num_slots(&self) -> usize {
        self.slots.read().sessions.len()
    }

    /// Title of the loaded model.
    pub fn title(&self) -> String {
        self.slots.read().title.clone()
    }

    /// Component table of the loaded model.
    pub fn components(&self) -> Arc<ComponentTable> {
        Arc::clone(&self.slots.read().components)
    }

    /// Object hierarchy of an open session. Every session of one load
    /// shares the same tree.
    pub fn item_tree(&self, id: SessionId) -> Option<Arc<ItemNode>> {
        let slots = self.slots.read();
        match slots.sessions.get(id) {
            Some(Some(_)) => Some(Arc::clone(&slots.item_tree)),
            _ => None,
        }
    }

    /// Drop every session.
    pub fn clear(&self) {
        *self.slots.write() = Slots::default();
    }
}

fn clear_xforms(session: &mut Session) {
    for inst in &mut session.instances {
        inst.set_xform(None);
    }
    session.update_bounds();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{Region, Shape, SpatialIndex};
    use crate::loader::LoadedModel;
    use crate::util::DVec3;

    /// Loader that ignores the path and serves one box.
    struct BoxLoader;

    impl GeometryLoader for BoxLoader {
        fn load(&self, _source: &Path, _options: &LoadOptions) -> Result<LoadedModel> {
            let region = Region {
                name: Arc::from("/box.r"),
                region_id: 1,
                aircode: 0,
                component: Some("BOX".into()),
                shape: Shape::Rpp {
                    min: [-10.0; 3],
                    max: [10.0; 3],
                },
            };
            let inst = GeometryInstance::new(Arc::new(SpatialIndex::build(vec![region])), None, vec!["box.r".into()]);
            Ok(LoadedModel::new("box".into(), vec![inst]))
        }
    }

    struct FailingLoader;

    impl GeometryLoader for FailingLoader {
        fn load(&self, _source: &Path, _options: &LoadOptions) -> Result<LoadedModel> {
            Err(Error::MissingTops)
        }
    }

    fn loaded() -> SessionRegistry {
        let reg = SessionRegistry::new();
        reg.load(&BoxLoader, Path::new("box"), &LoadOptions::default()).unwrap();
        reg
    }

    #[test]
    fn test_open_without_geometry() {
        let reg = SessionRegistry::new();
        assert!(matches!(reg.open_session(), Err(Error::NoGeometry)));
        assert_eq!(reg.num_slots(), 0);
    }

    #[test]
    fn test_first_open_returns_session0() {
        let reg = loaded();
        assert_eq!(reg.open_session().unwrap(), 0);
        assert_eq!(reg.open_session().unwrap(), 1);
        assert_eq!(reg.open_session().unwrap(), 2);
        assert_eq!(reg.title(), "box");
    }

    #[test]
    fn test_duplicates_share_spatial_index() {
        let reg = loaded();
        reg.open_session().unwrap();
        let id = reg.open_session().unwrap();
        let s0 = reg.get(0).unwrap();
        let s1 = reg.get(id).unwrap();
        assert!(Arc::ptr_eq(s0.instances()[0].index(), s1.instances()[0].index()));
        assert_eq!(s1.id(), id);
        assert_eq!(s1.bounds(), s0.bounds());
        assert_eq!(s1.components().resolve_ident(1), 1);
    }

    #[test]
    fn test_table_grows_in_blocks() {
        let reg = loaded();
        reg.open_session().unwrap();
        let ids: Vec<_> = (0..SESSION_BLOCK_SIZE).map(|_| reg.open_session().unwrap()).collect();
        assert_eq!(ids, (1..=SESSION_BLOCK_SIZE).collect::<Vec<_>>());
        assert_eq!(reg.num_slots(), 2 * SESSION_BLOCK_SIZE);
    }

    #[test]
    fn test_close_reuses_slot() {
        let reg = loaded();
        reg.open_session().unwrap();
        let a = reg.open_session().unwrap();
        let b = reg.open_session().unwrap();
        reg.close_session(a);
        assert!(!reg.is_open(a));
        assert!(reg.is_open(b));
        assert_eq!(reg.open_session().unwrap(), a);
    }

    #[test]
    fn test_close_is_idempotent() {
        let reg = loaded();
        reg.open_session().unwrap();
        let a = reg.open_session().unwrap();
        reg.close_session(a);
        let slots = reg.num_slots();
        reg.close_session(a);
        reg.close_session(999);
        assert_eq!(reg.num_slots(), slots);
        assert!(!reg.is_open(a));
        assert!(reg.is_open(0));
    }

    #[test]
    fn test_close_session0_keeps_it() {
        let reg = loaded();
        assert_eq!(reg.open_session().unwrap(), 0);
        reg.set_transform(0, 0, DMat4::from_translation(DVec3::X)).unwrap();
        reg.close_session(0);
        let s0 = reg.get(0).expect("session 0 is permanent");
        assert!(s0.instances()[0].xform().is_none());
        // Available again without copying
        assert_eq!(reg.open_session().unwrap(), 0);
    }

    #[test]
    fn test_transform_is_copy_on_write() {
        let reg = loaded();
        reg.open_session().unwrap();
        let id = reg.open_session().unwrap();
        let before = reg.get(id).unwrap();
        reg.set_transform(id, 0, DMat4::from_translation(DVec3::new(-100.0, 0.0, 0.0)))
            .unwrap();
        assert!(before.instances()[0].xform().is_none());
        let after = reg.get(id).unwrap();
        assert!(after.instances()[0].xform().is_some());
        assert!((after.bounds().min.x - 90.0).abs() < 1e-9);
        assert!(reg.get(0).unwrap().instances()[0].xform().is_none());

        reg.reset_transforms(id).unwrap();
        assert!((reg.bounds(id).unwrap().min.x + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_item_tree_needs_open_session() {
        let reg = SessionRegistry::new();
        assert!(reg.item_tree(0).is_none());

        let reg = loaded();
        let tree = reg.item_tree(0).unwrap();
        assert_eq!(tree.members, vec![ItemNode::named("box.r")]);
        reg.open_session().unwrap();
        let id = reg.open_session().unwrap();
        assert!(Arc::ptr_eq(&tree, &reg.item_tree(id).unwrap()));
        reg.close_session(id);
        assert!(reg.item_tree(id).is_none());
    }

    #[test]
    fn test_transform_errors() {
        let reg = loaded();
        assert!(matches!(
            reg.set_transform(0, 3, DMat4::IDENTITY),
            Err(Error::InstanceNotFound(_))
        ));
        assert!(matches!(
            reg.set_transform(4, 0, DMat4::IDENTITY),
            Err(Error::SessionNotFound(4))
        ));
    }

    #[test]
    fn test_failed_load_keeps_previous() {
        let reg = loaded();
        reg.open_session().unwrap();
        let id = reg.open_session().unwrap();
        let err = reg
            .load(&FailingLoader, Path::new("bad"), &LoadOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), -2);
        assert!(reg.is_open(0));
        assert!(reg.is_open(id));
        assert_eq!(reg.title(), "box");
    }

    #[test]
    fn test_reload_discards_sessions() {
        let reg = loaded();
        reg.open_session().unwrap();
        let id = reg.open_session().unwrap();
        reg.load(&BoxLoader, Path::new("box"), &LoadOptions::default()).unwrap();
        assert!(!reg.is_open(id));
        assert_eq!(reg.open_session().unwrap(), 0);
    }
}
