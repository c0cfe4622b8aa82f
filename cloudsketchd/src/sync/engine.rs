use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use cloudsketch_core::{CreateClient, CreateError, ListOptions, ResourceKind};
use thiserror::Error;
use tokio::sync::mpsc;

use super::decoration::Decoration;
use super::path_cache::join_child;
use super::tree::{SketchNode, SketchTree};
use crate::mirror::{MirrorError, MirrorProvider, Session};
use crate::prefs::{Confirmation, ConfirmRequest, ConfirmationGate, SyncPrefs};

/// Transient per-node sync state. Never persisted; a restart always comes
/// up `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncState {
    #[default]
    Idle,
    Pulling,
    Pushing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    Pull,
    Push,
    Open,
    Rename,
    Delete,
}

/// Which actions a node offers in a given state. Callers consult this
/// instead of mutating a per-node command list; a non-idle node offers
/// nothing.
pub fn is_action_available(action: NodeAction, state: SyncState, synced: bool) -> bool {
    if state != SyncState::Idle {
        return false;
    }
    match action {
        NodeAction::Pull | NodeAction::Rename | NodeAction::Delete => true,
        NodeAction::Push | NodeAction::Open => synced,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    StateChanged { path: String, state: SyncState },
    /// Non-fatal, user-visible message.
    Notice(String),
    /// Files freshly copied into the mirror; an embedding editor re-opens
    /// them so displayed content matches the new mirror.
    FilesPulled { paths: Vec<PathBuf> },
    /// The node tree should be rebuilt.
    RefreshRequested,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("api error: {0}")]
    Api(#[from] CreateError),
    #[error("mirror error: {0}")]
    Mirror(#[from] MirrorError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("push requires a pulled local mirror: {0}")]
    PushUnsynced(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    pub files: Vec<PathBuf>,
    /// The sketch disappeared remotely; a tree refresh was requested
    /// instead of raising an error.
    pub sketch_missing: bool,
    pub declined: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    pub files: usize,
    pub directories: usize,
    pub declined: bool,
}

/// Per-node pull/push state machine over the remote store and the local
/// mirror.
///
/// Legal transitions are `Idle → Pulling → Idle` and
/// `Idle → Pushing → Idle` only. The engine does not serialize concurrent
/// calls on the same node; callers keep the triggering affordance disabled
/// while a node is non-idle (see [`is_action_available`]). Operations on
/// different nodes run independently.
pub struct SyncEngine {
    client: CreateClient,
    mirror: Arc<MirrorProvider>,
    session: Session,
    prefs: Mutex<SyncPrefs>,
    gate: Arc<dyn ConfirmationGate>,
    states: Mutex<HashMap<String, SyncState>>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl SyncEngine {
    pub fn new(
        client: CreateClient,
        mirror: Arc<MirrorProvider>,
        session: Session,
        prefs: SyncPrefs,
        gate: Arc<dyn ConfirmationGate>,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                client,
                mirror,
                session,
                prefs: Mutex::new(prefs),
                gate,
                states: Mutex::new(HashMap::new()),
                events,
            },
            receiver,
        )
    }

    pub fn prefs(&self) -> SyncPrefs {
        *self.locked_prefs()
    }

    pub fn state_of(&self, path: &str) -> SyncState {
        self.locked_states().get(path).copied().unwrap_or_default()
    }

    /// Copy the remote sketch into the local mirror, overwriting what is
    /// there. A vanished remote sketch is handled, not raised: the caller
    /// gets a report with `sketch_missing` set and a refresh is requested.
    pub async fn pull(&self, node: &SketchNode, force: bool) -> Result<PullReport, EngineError> {
        if node.synced
            && !force
            && !self.confirm(
                |prefs| prefs.warn_before_pull,
                |prefs| prefs.warn_before_pull = false,
                ConfirmRequest::PullOverwrite {
                    sketch: node.name.clone(),
                },
            )
        {
            return Ok(PullReport {
                declined: true,
                ..PullReport::default()
            });
        }

        self.mirror.ensure_ready(&self.session).await?;
        self.set_state(&node.path, SyncState::Pulling);
        let result = self.pull_inner(node).await;
        // State and decoration always recover, even on failure.
        self.set_state(&node.path, SyncState::Idle);
        let _ = self.events.send(EngineEvent::RefreshRequested);

        match result {
            Ok(files) => {
                if !files.is_empty() {
                    let _ = self.events.send(EngineEvent::FilesPulled {
                        paths: files.clone(),
                    });
                }
                Ok(PullReport {
                    files,
                    ..PullReport::default()
                })
            }
            Err(EngineError::Api(err)) if err.is_not_found() => {
                let _ = self.events.send(EngineEvent::Notice(format!(
                    "Sketch '{}' no longer exists in the cloud.",
                    node.name
                )));
                Ok(PullReport {
                    sketch_missing: true,
                    ..PullReport::default()
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn pull_inner(&self, node: &SketchNode) -> Result<Vec<PathBuf>, EngineError> {
        // Warm the identity cache so the listing carries the synthetic
        // secrets entry.
        self.client.sketch_for_path(&node.path).await?;
        let resources = self
            .client
            .list(
                &node.path,
                &ListOptions {
                    recursive: true,
                    match_name: None,
                },
            )
            .await?;

        let root = self.mirror.mirror_path_for(&self.session, &node.path)?;
        tokio::fs::create_dir_all(&root).await?;

        let mut written = Vec::new();
        for resource in &resources {
            let target = self.mirror.mirror_path_for(&self.session, &resource.path)?;
            match resource.kind {
                ResourceKind::Folder | ResourceKind::Sketch => {
                    tokio::fs::create_dir_all(&target).await?;
                }
                ResourceKind::File => {
                    let content = self.client.read_file(&resource.path).await?;
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&target, content.as_bytes()).await?;
                    written.push(target);
                }
            }
        }
        Ok(written)
    }

    /// Upload the entire local mirror of the node to the remote store,
    /// overwriting the remote copy.
    pub async fn push(&self, node: &SketchNode, force: bool) -> Result<PushReport, EngineError> {
        // Precondition comes before confirmations and before any request.
        if !node.synced {
            return Err(EngineError::PushUnsynced(node.path.clone()));
        }
        if node.is_public
            && !self.confirm(
                |prefs| prefs.warn_before_push_public,
                |prefs| prefs.warn_before_push_public = false,
                ConfirmRequest::PushPublic {
                    sketch: node.name.clone(),
                },
            )
        {
            return Ok(PushReport {
                declined: true,
                ..PushReport::default()
            });
        }
        if !force
            && !self.confirm(
                |prefs| prefs.warn_before_push,
                |prefs| prefs.warn_before_push = false,
                ConfirmRequest::PushOverwrite {
                    sketch: node.name.clone(),
                },
            )
        {
            return Ok(PushReport {
                declined: true,
                ..PushReport::default()
            });
        }

        self.mirror.ensure_ready(&self.session).await?;
        self.set_state(&node.path, SyncState::Pushing);
        let result = self.push_inner(node).await;
        self.set_state(&node.path, SyncState::Idle);
        let _ = self.events.send(EngineEvent::RefreshRequested);
        result
    }

    async fn push_inner(&self, node: &SketchNode) -> Result<PushReport, EngineError> {
        let root = self.mirror.mirror_path_for(&self.session, &node.path)?;
        let mut report = PushReport::default();
        let mut stack = vec![(root, node.path.clone())];
        while let Some((local_dir, remote_dir)) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&local_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let remote_path = join_child(&remote_dir, &name);
                if entry.file_type().await?.is_dir() {
                    self.client.create_directory(&remote_path).await?;
                    report.directories += 1;
                    stack.push((entry.path(), remote_path));
                } else {
                    let content = tokio::fs::read_to_string(entry.path()).await?;
                    self.client.write_file(&remote_path, &content).await?;
                    report.files += 1;
                }
            }
        }
        Ok(report)
    }

    /// Recompute a node's derived sync state from the mirror and reconcile
    /// decorations, dimming the descendants of an unsynced directory.
    /// Runs as the tail step of pull/push and on demand.
    pub async fn refresh(&self, tree: &mut SketchTree, path: &str) -> Result<bool, EngineError> {
        let Some(id) = tree.id_of(path) else {
            return Ok(false);
        };

        let synced = match self.mirror.mirror_path_for(&self.session, path) {
            Ok(dir) => tokio::fs::metadata(&dir).await.is_ok(),
            Err(_) => false,
        };
        let state = self.state_of(path);
        let dim_children = !synced && tree.node(id).kind != ResourceKind::File;

        {
            let underlying = synced
                .then(|| self.mirror.mirror_uri_for(&self.session, path).ok())
                .flatten();
            let node = tree.node_mut(id);
            node.synced = synced;
            node.underlying = underlying;
            node.state = state;
            let base = match state {
                SyncState::Pulling => Decoration::in_progress("Pulling\u{2026}"),
                SyncState::Pushing => Decoration::in_progress("Pushing\u{2026}"),
                SyncState::Idle => Decoration::none(),
            };
            node.decoration = if synced {
                base
            } else {
                Decoration::merge(&base, &Decoration::not_in_sync())
            };
        }

        for descendant in tree.descendants_of(id) {
            let node = tree.node_mut(descendant);
            node.decoration = if dim_children {
                Decoration::merge(&node.decoration, &Decoration::not_in_sync())
            } else {
                node.decoration.undimmed()
            };
        }
        Ok(synced)
    }

    /// Run one confirmation gate. Returns `true` when the operation may
    /// proceed; "accept, don't ask again" also flips the preference off.
    fn confirm(
        &self,
        enabled: impl Fn(&SyncPrefs) -> bool,
        disable: impl Fn(&mut SyncPrefs),
        request: ConfirmRequest,
    ) -> bool {
        if !enabled(&self.locked_prefs()) {
            return true;
        }
        match self.gate.confirm(&request) {
            Confirmation::Accepted => true,
            Confirmation::AcceptedDontAskAgain => {
                disable(&mut self.locked_prefs());
                true
            }
            Confirmation::Declined => false,
        }
    }

    fn set_state(&self, path: &str, state: SyncState) {
        {
            let mut states = self.locked_states();
            if state == SyncState::Idle {
                states.remove(path);
            } else {
                states.insert(path.to_string(), state);
            }
        }
        let _ = self.events.send(EngineEvent::StateChanged {
            path: path.to_string(),
            state,
        });
    }

    fn locked_prefs(&self) -> MutexGuard<'_, SyncPrefs> {
        self.prefs.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn locked_states(&self) -> MutexGuard<'_, HashMap<String, SyncState>> {
        self.states.lock().unwrap_or_else(|err| err.into_inner())
    }
}
