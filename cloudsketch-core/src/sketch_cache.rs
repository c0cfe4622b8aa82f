use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::client::Sketch;

/// Session-scoped path → sketch identity cache.
///
/// Fed as a side effect of the paginated sketch listing and invalidated
/// wholesale on structural mutation (rename, edit); never patched entry by
/// entry. Reads are snapshots, not a transactional view.
#[derive(Clone, Default)]
pub struct SketchCache {
    inner: Arc<Mutex<HashMap<String, Sketch>>>,
}

impl SketchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_by_path(&self, path: &str) -> Option<Sketch> {
        self.locked().get(path).cloned()
    }

    pub fn get_by_id(&self, id: &str) -> Option<Sketch> {
        self.locked().values().find(|sketch| sketch.id == id).cloned()
    }

    pub fn replace_all(&self, sketches: &[Sketch]) {
        let mut map = HashMap::with_capacity(sketches.len());
        for sketch in sketches {
            map.insert(sketch.path.clone(), sketch.clone());
        }
        *self.locked() = map;
    }

    pub(crate) fn insert(&self, sketch: Sketch) {
        self.locked().insert(sketch.path.clone(), sketch);
    }

    pub fn clear(&self) {
        self.locked().clear();
    }

    pub fn len(&self) -> usize {
        self.locked().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked().is_empty()
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<String, Sketch>> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sketch(id: &str, path: &str) -> Sketch {
        Sketch {
            id: id.to_string(),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            path: path.to_string(),
            is_public: false,
            secrets: Vec::new(),
        }
    }

    #[test]
    fn replace_all_rebuilds_the_map() {
        let cache = SketchCache::new();
        cache.replace_all(&[sketch("1", "/A"), sketch("2", "/B")]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_by_path("/A").map(|s| s.id), Some("1".into()));

        cache.replace_all(&[sketch("3", "/C")]);
        assert!(cache.get_by_path("/A").is_none());
        assert_eq!(cache.get_by_id("3").map(|s| s.path), Some("/C".into()));
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = SketchCache::new();
        cache.replace_all(&[sketch("1", "/A")]);
        cache.clear();
        assert!(cache.is_empty());
    }
}
