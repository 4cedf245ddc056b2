use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::mapping::vertex::{VertexDesc, VertexId};
use crate::time::Time;

pub fn tag_name(tag_id: u32) -> String {
    format!("tag:{tag_id}")
}

pub fn body_name(body: &str) -> String {
    format!("body:{body}")
}

pub fn cam_name(cam: &str) -> String {
    format!("cam:{cam}")
}

/// Canonical id of the vertex named `name` at `time`.
pub fn make_id(time: Time, name: &str) -> VertexId {
    VertexId::new(format!("{name}_{}", time.to_nsec()))
}

/// One to one map from vertex ids to graph handles
#[derive(Clone, Debug, Default)]
pub struct IdentifierIndex {
    map: FxHashMap<VertexId, VertexDesc>,
}

impl IdentifierIndex {
    pub fn new() -> IdentifierIndex {
        IdentifierIndex::default()
    }

    pub fn find(&self, id: &VertexId) -> Option<VertexDesc> {
        self.map.get(id).copied()
    }

    pub fn contains(&self, id: &VertexId) -> bool {
        self.map.contains_key(id)
    }

    /// Fails if `id` is already indexed, the existing entry is kept.
    pub fn insert(&mut self, id: VertexId, v: VertexDesc) -> Result<()> {
        if self.map.contains_key(&id) {
            return Err(Error::DuplicateVertex(id));
        }
        self.map.insert(id, v);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_stable() {
        assert_eq!("tag:17", tag_name(17));
        assert_eq!("body:rig", body_name("rig"));
        assert_eq!("cam:cam0", cam_name("cam0"));
        assert_eq!("tag:17_5", make_id(Time::from_nsec(5), &tag_name(17)).as_str());
    }

    #[test]
    fn duplicate_insert_rejected() {
        let mut index = IdentifierIndex::new();
        let id = make_id(Time::ZERO, "body:rig");
        assert!(index.insert(id.clone(), VertexDesc::new(0)).is_ok());
        assert!(matches!(
            index.insert(id.clone(), VertexDesc::new(1)),
            Err(Error::DuplicateVertex(_))
        ));
        assert_eq!(Some(VertexDesc::new(0)), index.find(&id));
        assert_eq!(1, index.len());
        assert_eq!(None, index.find(&make_id(Time::ZERO, "body:other")));
    }
}
