use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use url::Url;

/// Scheme of the virtual remote sketchbook filesystem.
pub const REMOTE_SCHEME: &str = "arduino-create";
/// Scheme of the on-disk mirror of that filesystem.
pub const MIRROR_SCHEME: &str = "arduino-local-cache";

const MIRROR_SUBDIRS: [&str; 2] = ["RemoteSketchbook", "ArduinoCloud"];

/// An authenticated cloud session. Only the stable user id matters here;
/// token handling lives with the API client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("data directory is unavailable: {0}")]
    DataDirUnavailable(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("remote path contains unsupported component: {0}")]
    UnsupportedComponent(String),
    #[error("uri does not belong to the {expected} tree: {uri}")]
    ForeignUri { expected: &'static str, uri: String },
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

/// Maps the virtual remote sketchbook onto a per-user on-disk mirror and
/// rewrites URIs between the two schemes. All mappings are pure
/// path-relative rewrites; actual I/O stays with the caller.
pub struct MirrorProvider {
    data_dir: PathBuf,
    ready_roots: Mutex<HashMap<String, PathBuf>>,
}

impl MirrorProvider {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ready_roots: Mutex::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Validate the data directory and create the mirror folder chain for
    /// this session, once per login. An inaccessible data directory fails
    /// fast with a typed error rather than suspending callers forever.
    pub async fn ensure_ready(&self, session: &Session) -> Result<PathBuf, MirrorError> {
        if let Some(root) = self.locked().get(&session.user_id) {
            return Ok(root.clone());
        }
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|_| MirrorError::DataDirUnavailable(self.data_dir.clone()))?;
        let root = self.mirror_root(session);
        tokio::fs::create_dir_all(&root).await?;
        self.locked().insert(session.user_id.clone(), root.clone());
        Ok(root)
    }

    /// Drop the memoized root on logout. The directory is left on disk,
    /// it just stops being addressable until the next login.
    pub fn end_session(&self, session: &Session) {
        self.locked().remove(&session.user_id);
    }

    pub fn mirror_root(&self, session: &Session) -> PathBuf {
        let mut root = self.data_dir.clone();
        for part in MIRROR_SUBDIRS {
            root.push(part);
        }
        root.push(&session.user_id);
        root
    }

    /// Map a remote POSIX path under the session's mirror root.
    pub fn mirror_path_for(
        &self,
        session: &Session,
        remote_path: &str,
    ) -> Result<PathBuf, MirrorError> {
        let mut out = self.mirror_root(session);
        push_remote_components(&mut out, remote_path)?;
        Ok(out)
    }

    /// Rewrite a remote-scheme URI to its mirror-scheme counterpart.
    pub fn to_mirror_uri(&self, session: &Session, remote: &Url) -> Result<Url, MirrorError> {
        if remote.scheme() != REMOTE_SCHEME {
            return Err(MirrorError::ForeignUri {
                expected: REMOTE_SCHEME,
                uri: remote.to_string(),
            });
        }
        self.mirror_uri_for(session, remote.path())
    }

    /// Build the mirror-scheme URI for a remote POSIX path.
    pub fn mirror_uri_for(&self, session: &Session, remote_path: &str) -> Result<Url, MirrorError> {
        let suffix = remote_path.trim_start_matches('/');
        let mut uri = format!(
            "{MIRROR_SCHEME}:///{}/{}",
            MIRROR_SUBDIRS.join("/"),
            session.user_id
        );
        if !suffix.is_empty() {
            uri.push('/');
            uri.push_str(suffix);
        }
        Ok(Url::parse(&uri)?)
    }

    /// Rewrite a mirror-scheme URI back to the remote scheme.
    pub fn from_mirror_uri(&self, session: &Session, mirror: &Url) -> Result<Url, MirrorError> {
        if mirror.scheme() != MIRROR_SCHEME {
            return Err(MirrorError::ForeignUri {
                expected: MIRROR_SCHEME,
                uri: mirror.to_string(),
            });
        }
        let prefix = format!("/{}/{}", MIRROR_SUBDIRS.join("/"), session.user_id);
        let path = mirror.path();
        let suffix = path
            .strip_prefix(&prefix)
            .ok_or_else(|| MirrorError::ForeignUri {
                expected: MIRROR_SCHEME,
                uri: mirror.to_string(),
            })?;
        let remote_path = if suffix.is_empty() { "/" } else { suffix };
        Ok(Url::parse(&format!("{REMOTE_SCHEME}://{remote_path}"))?)
    }

    /// Resolve a mirror-scheme URI to its on-disk location.
    pub fn resolve_mirror_uri(&self, mirror: &Url) -> Result<PathBuf, MirrorError> {
        if mirror.scheme() != MIRROR_SCHEME {
            return Err(MirrorError::ForeignUri {
                expected: MIRROR_SCHEME,
                uri: mirror.to_string(),
            });
        }
        let mut out = self.data_dir.clone();
        push_remote_components(&mut out, mirror.path())?;
        Ok(out)
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<String, PathBuf>> {
        self.ready_roots.lock().unwrap_or_else(|err| err.into_inner())
    }
}

fn push_remote_components(out: &mut PathBuf, remote_path: &str) -> Result<(), MirrorError> {
    if remote_path.is_empty() {
        return Err(MirrorError::UnsupportedComponent(remote_path.to_string()));
    }
    for component in Path::new(remote_path).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::CurDir => continue,
            Component::ParentDir | Component::Prefix(_) => {
                return Err(MirrorError::UnsupportedComponent(remote_path.to_string()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn provider() -> MirrorProvider {
        MirrorProvider::new("/data")
    }

    fn session() -> Session {
        Session::new("user-1")
    }

    #[test]
    fn mirror_root_nests_under_the_data_dir() {
        assert_eq!(
            provider().mirror_root(&session()),
            PathBuf::from("/data/RemoteSketchbook/ArduinoCloud/user-1")
        );
    }

    #[test]
    fn maps_remote_paths_under_the_mirror_root() {
        let mapped = provider().mirror_path_for(&session(), "/Blink/Blink.ino").unwrap();
        assert_eq!(
            mapped,
            PathBuf::from("/data/RemoteSketchbook/ArduinoCloud/user-1/Blink/Blink.ino")
        );
    }

    #[test]
    fn rejects_parent_dir_components() {
        assert!(matches!(
            provider().mirror_path_for(&session(), "/../escape"),
            Err(MirrorError::UnsupportedComponent(_))
        ));
    }

    #[test]
    fn uri_rewrites_round_trip() {
        let provider = provider();
        let session = session();
        let remote = Url::parse("arduino-create:///Blink/Blink.ino").unwrap();

        let mirror = provider.to_mirror_uri(&session, &remote).unwrap();
        assert_eq!(
            mirror.as_str(),
            "arduino-local-cache:///RemoteSketchbook/ArduinoCloud/user-1/Blink/Blink.ino"
        );

        let back = provider.from_mirror_uri(&session, &mirror).unwrap();
        assert_eq!(back.path(), remote.path());
    }

    #[test]
    fn foreign_scheme_is_rejected() {
        let provider = provider();
        let session = session();
        let other = Url::parse("file:///tmp/x").unwrap();
        assert!(matches!(
            provider.to_mirror_uri(&session, &other),
            Err(MirrorError::ForeignUri { .. })
        ));
    }

    #[test]
    fn resolve_mirror_uri_lands_in_the_data_dir() {
        let uri =
            Url::parse("arduino-local-cache:///RemoteSketchbook/ArduinoCloud/user-1/Blink").unwrap();
        assert_eq!(
            provider().resolve_mirror_uri(&uri).unwrap(),
            PathBuf::from("/data/RemoteSketchbook/ArduinoCloud/user-1/Blink")
        );
    }

    #[tokio::test]
    async fn ensure_ready_creates_the_folder_chain_once() {
        let dir = tempdir().unwrap();
        let provider = MirrorProvider::new(dir.path().join("data"));
        let session = session();

        let root = provider.ensure_ready(&session).await.unwrap();
        assert!(root.is_dir());
        assert_eq!(root, provider.mirror_root(&session));

        // Second call is served from the memoized root.
        assert_eq!(provider.ensure_ready(&session).await.unwrap(), root);

        provider.end_session(&session);
        assert!(provider.ensure_ready(&session).await.is_ok());
    }

    #[tokio::test]
    async fn ensure_ready_fails_fast_on_unusable_data_dir() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("occupied");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let provider = MirrorProvider::new(&blocker);
        let err = provider.ensure_ready(&session()).await.unwrap_err();
        assert!(matches!(err, MirrorError::DataDirUnavailable(_)));
    }
}
