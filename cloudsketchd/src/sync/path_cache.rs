use std::collections::HashMap;

use cloudsketch_core::{Resource, ResourceKind, normalize_remote_path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathCacheError {
    #[error("duplicate path in remote listing: {0}")]
    DuplicatePath(String),
}

/// Path-keyed index over a flat remote listing.
///
/// The remote store keeps no parent links; the tree shape is derived here
/// by path-segment arithmetic alone, so building from the same listing in
/// any order yields the same cache.
#[derive(Debug, Default)]
pub struct PathCache {
    entries: HashMap<String, Resource>,
}

impl PathCache {
    /// Build a cache from a flat listing, seeded with a synthetic root at
    /// `/`. Two resources with the same normalized path are a hard error.
    pub fn build(resources: impl IntoIterator<Item = Resource>) -> Result<Self, PathCacheError> {
        let mut entries = HashMap::new();
        entries.insert("/".to_string(), Resource::folder("/"));
        for mut resource in resources {
            resource.path = normalize_remote_path(&resource.path);
            let key = resource.path.clone();
            if entries.insert(key.clone(), resource).is_some() {
                return Err(PathCacheError::DuplicatePath(key));
            }
        }
        Ok(Self { entries })
    }

    pub fn get(&self, path: &str) -> Option<&Resource> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Insert a resource discovered outside the remote listing (a local
    /// file that has not been pushed yet).
    pub fn insert(&mut self, resource: Resource) -> Result<(), PathCacheError> {
        let key = resource.path.clone();
        if self.entries.insert(key.clone(), resource).is_some() {
            return Err(PathCacheError::DuplicatePath(key));
        }
        Ok(())
    }

    /// Direct children of `resource`: entries whose path extends it by
    /// exactly one segment. Files have no children.
    pub fn children_of(&self, resource: &Resource) -> Option<Vec<&Resource>> {
        if resource.kind == ResourceKind::File {
            return None;
        }
        let parent = resource.path.as_str();
        let want_depth = depth(parent) + 1;
        let mut children: Vec<&Resource> = self
            .entries
            .values()
            .filter(|candidate| is_under(parent, &candidate.path))
            .filter(|candidate| depth(&candidate.path) == want_depth)
            .collect();
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Some(children)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn depth(path: &str) -> usize {
    if path == "/" {
        0
    } else {
        path.trim_start_matches('/').split('/').count()
    }
}

fn is_under(parent: &str, candidate: &str) -> bool {
    if candidate == parent {
        return false;
    }
    if parent == "/" {
        return true;
    }
    candidate.starts_with(parent) && candidate.as_bytes().get(parent.len()) == Some(&b'/')
}

/// Join a child name onto a normalized parent path.
pub fn join_child(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}
