use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::mapping::vertex::VertexDesc;
use crate::optimizer::OptimizerKey;

/// Optimizer keys of every vertex that was handed to the optimizer.
///
/// This is the only record of whether a vertex reached the optimizer: a
/// vertex is optimized iff it has an entry here, and entries are never
/// empty.
#[derive(Clone, Debug, Default)]
pub struct KeyTracker {
    keys: FxHashMap<VertexDesc, Vec<OptimizerKey>>,
}

impl KeyTracker {
    pub fn new() -> KeyTracker {
        KeyTracker::default()
    }

    /// Records the keys of a freshly submitted vertex. Keys of an already
    /// submitted vertex are never overwritten.
    pub fn record_keys(&mut self, v: VertexDesc, keys: Vec<OptimizerKey>) -> Result<()> {
        if keys.is_empty() {
            return Err(Error::EmptyKeys(v));
        }
        if self.keys.contains_key(&v) {
            return Err(Error::AlreadyOptimized(v.to_string()));
        }
        self.keys.insert(v, keys);
        Ok(())
    }

    pub fn keys_for(&self, v: VertexDesc) -> Option<&[OptimizerKey]> {
        self.keys.get(&v).map(|k| k.as_slice())
    }

    pub fn is_optimized(&self, v: VertexDesc) -> bool {
        self.keys.contains_key(&v)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VertexDesc, &[OptimizerKey])> {
        self.keys.iter().map(|(v, k)| (*v, k.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_lookup() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut tracker = KeyTracker::new();
        let v = VertexDesc::new(2);
        assert!(!tracker.is_optimized(v));
        assert_eq!(None, tracker.keys_for(v));
        tracker.record_keys(v, vec![4, 5])?;
        assert!(tracker.is_optimized(v));
        assert_eq!(Some(&[4, 5][..]), tracker.keys_for(v));
        Ok(())
    }

    #[test]
    fn keys_never_silently_replaced() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut tracker = KeyTracker::new();
        let v = VertexDesc::new(0);
        assert!(matches!(tracker.record_keys(v, vec![]), Err(Error::EmptyKeys(_))));
        assert!(!tracker.is_optimized(v));
        tracker.record_keys(v, vec![1])?;
        assert!(matches!(tracker.record_keys(v, vec![2]), Err(Error::AlreadyOptimized(_))));
        assert_eq!(Some(&[1][..]), tracker.keys_for(v));
        assert_eq!(1, tracker.len());
        Ok(())
    }
}
