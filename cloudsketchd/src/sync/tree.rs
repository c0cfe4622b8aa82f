use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use cloudsketch_core::{CreateClient, CreateError, ListOptions, Resource, ResourceKind};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use url::Url;

use super::decoration::Decoration;
use super::engine::SyncState;
use super::path_cache::{PathCache, PathCacheError, join_child};
use crate::mirror::{MirrorError, MirrorProvider, Session};

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("api error: {0}")]
    Api(#[from] CreateError),
    #[error("path cache error: {0}")]
    Cache(#[from] PathCacheError),
    #[error("mirror error: {0}")]
    Mirror(#[from] MirrorError),
}

pub type NodeId = usize;

#[derive(Debug, Clone)]
pub struct SketchNode {
    pub path: String,
    pub name: String,
    pub kind: ResourceKind,
    /// A local mirror directory exists for this node. Derived by probing
    /// the mirror on every refresh pass, never persisted.
    pub synced: bool,
    pub sketch_id: Option<String>,
    pub is_public: bool,
    /// Weak reference to the mirror resource; recomputed per pass.
    pub underlying: Option<Url>,
    pub state: SyncState,
    pub decoration: Decoration,
    pub modified: Option<i64>,
}

/// Arena-backed node tree with an explicit parent index. Parent/child
/// lookups never traverse node objects, so there is nothing to cycle on.
#[derive(Debug, Default)]
pub struct SketchTree {
    nodes: Vec<SketchNode>,
    parents: Vec<Option<NodeId>>,
    children: Vec<Vec<NodeId>>,
    by_path: HashMap<String, NodeId>,
}

impl SketchTree {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root_id(&self) -> Option<NodeId> {
        (!self.nodes.is_empty()).then_some(0)
    }

    pub fn id_of(&self, path: &str) -> Option<NodeId> {
        self.by_path.get(path).copied()
    }

    pub fn node(&self, id: NodeId) -> &SketchNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut SketchNode {
        &mut self.nodes[id]
    }

    pub fn get(&self, path: &str) -> Option<&SketchNode> {
        self.id_of(path).map(|id| self.node(id))
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.parents.get(id).copied().flatten()
    }

    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        &self.children[id]
    }

    /// All transitive children, breadth-first.
    pub fn descendants_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut queue: VecDeque<NodeId> = self.children[id].iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            out.push(next);
            queue.extend(self.children[next].iter().copied());
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &SketchNode> {
        self.nodes.iter()
    }

    pub(crate) fn insert(&mut self, node: SketchNode, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.by_path.insert(node.path.clone(), id);
        self.nodes.push(node);
        self.parents.push(parent);
        self.children.push(Vec::new());
        if let Some(parent) = parent {
            self.children[parent].push(id);
        }
        id
    }
}

/// Materializes the merged remote/local node tree.
pub struct TreeModel {
    client: CreateClient,
    mirror: Arc<MirrorProvider>,
    session: Option<Session>,
    tree: SketchTree,
}

impl TreeModel {
    pub fn new(client: CreateClient, mirror: Arc<MirrorProvider>) -> Self {
        Self {
            client,
            mirror,
            session: None,
            tree: SketchTree::default(),
        }
    }

    pub fn set_session(&mut self, session: Option<Session>) {
        self.session = session;
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn tree(&self) -> &SketchTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut SketchTree {
        &mut self.tree
    }

    /// Rebuild the whole tree: re-list the remote store, index it by path,
    /// fold in local-only files, then materialize nodes. Node construction
    /// itself performs no network calls.
    pub async fn update_root(&mut self) -> Result<(), TreeError> {
        let Some(session) = self.session.clone() else {
            self.tree = SketchTree::default();
            return Ok(());
        };
        // Wholesale identity-cache rebuild; listed sketches get annotated
        // with their id and visibility from it.
        self.client.list_sketches().await?;
        let listed = self
            .client
            .list(
                "/",
                &ListOptions {
                    recursive: true,
                    match_name: None,
                },
            )
            .await?;
        let mut cache = PathCache::build(listed)?;
        self.merge_local_only(&session, &mut cache).await;
        self.tree = self.materialize(&session, &cache).await;
        Ok(())
    }

    /// Fold files that exist only in the local mirror into the cache as
    /// synthetic zero-metadata resources, so not-yet-pushed files show up
    /// inside an already-pulled sketch node. A failure under one sketch
    /// leaves that subtree un-merged instead of failing the model.
    async fn merge_local_only(&self, session: &Session, cache: &mut PathCache) {
        let sketch_dirs: Vec<String> = cache
            .iter()
            .filter(|resource| resource.kind == ResourceKind::Sketch)
            .map(|resource| resource.path.clone())
            .collect();

        for dir_path in sketch_dirs {
            let local_dir = match self.mirror.mirror_path_for(session, &dir_path) {
                Ok(dir) => dir,
                Err(err) => {
                    eprintln!("[cloudsketchd] local merge skipped for {dir_path}: {err}");
                    continue;
                }
            };
            if tokio::fs::metadata(&local_dir).await.is_err() {
                continue;
            }
            let mut entries = match tokio::fs::read_dir(&local_dir).await {
                Ok(entries) => entries,
                Err(err) => {
                    eprintln!("[cloudsketchd] local merge skipped for {dir_path}: {err}");
                    continue;
                }
            };
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(err) => {
                        eprintln!("[cloudsketchd] local merge aborted for {dir_path}: {err}");
                        break;
                    }
                };
                let is_file = entry
                    .file_type()
                    .await
                    .map(|file_type| file_type.is_file())
                    .unwrap_or(false);
                if !is_file {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                let remote_path = join_child(&dir_path, &name);
                if cache.contains(&remote_path) {
                    continue;
                }
                if let Err(err) = cache.insert(Resource::synthetic_file(&remote_path)) {
                    eprintln!("[cloudsketchd] local merge aborted for {dir_path}: {err}");
                    break;
                }
            }
        }
    }

    async fn materialize(&self, session: &Session, cache: &PathCache) -> SketchTree {
        let mut tree = SketchTree::default();
        let Some(root) = cache.get("/") else {
            return tree;
        };
        let root_node = self.node_for(session, root).await;
        let root_id = tree.insert(root_node, None);

        let mut queue: VecDeque<(NodeId, Resource)> = VecDeque::new();
        queue.push_back((root_id, root.clone()));
        while let Some((parent_id, resource)) = queue.pop_front() {
            let Some(children) = cache.children_of(&resource) else {
                continue;
            };
            for child in children {
                let node = self.node_for(session, child).await;
                let id = tree.insert(node, Some(parent_id));
                queue.push_back((id, (*child).clone()));
            }
        }
        tree
    }

    async fn node_for(&self, session: &Session, resource: &Resource) -> SketchNode {
        let mut synced = false;
        let mut underlying = None;
        if resource.kind != ResourceKind::File {
            if let Ok(dir) = self.mirror.mirror_path_for(session, &resource.path) {
                synced = tokio::fs::metadata(&dir).await.is_ok();
            }
            if synced {
                underlying = self.mirror.mirror_uri_for(session, &resource.path).ok();
            }
        }
        SketchNode {
            path: resource.path.clone(),
            name: resource.name.clone(),
            kind: resource.kind,
            synced,
            sketch_id: resource.sketch_id.clone(),
            is_public: resource.is_public,
            underlying,
            state: SyncState::Idle,
            decoration: Decoration::none(),
            modified: parse_modified(resource.modified_at.as_deref()),
        }
    }
}

fn parse_modified(value: Option<&str>) -> Option<i64> {
    let value = value?;
    OffsetDateTime::parse(value, &Rfc3339)
        .ok()
        .map(|stamp| stamp.unix_timestamp())
}
