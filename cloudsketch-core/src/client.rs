use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::secrets;
use crate::sketch_cache::SketchCache;

const DEFAULT_BASE_URL: &str = "https://api2.arduino.cc/create";
const STORAGE_PREFIX: &str = "$HOME/sketches_v2";
const SKETCH_PAGE_SIZE: u32 = 50;

#[derive(Debug, Error)]
pub enum CreateError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("file payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("file payload is not valid UTF-8")]
    NonUtf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Auth,
    NotFound,
    Conflict,
    Transient,
    Permanent,
}

impl CreateError {
    pub fn classification(&self) -> Option<ErrorClass> {
        match self {
            CreateError::NotFound(_) => Some(ErrorClass::NotFound),
            CreateError::Api { status, .. } => Some(classify_status(*status)),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.classification(), Some(ErrorClass::NotFound))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.classification(), Some(ErrorClass::Conflict))
    }
}

fn classify_status(status: StatusCode) -> ErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ErrorClass::Auth
    } else if status == StatusCode::NOT_FOUND {
        ErrorClass::NotFound
    } else if status == StatusCode::CONFLICT {
        ErrorClass::Conflict
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Resource {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub sketch_id: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub size: Option<u64>,
}

impl Resource {
    /// A folder entry with no backing remote metadata, e.g. the tree root.
    pub fn folder(path: &str) -> Self {
        let path = normalize_remote_path(path);
        Self {
            name: basename(&path).to_string(),
            path,
            kind: ResourceKind::Folder,
            modified_at: None,
            created_at: None,
            sketch_id: None,
            is_public: false,
            size: None,
        }
    }

    /// A file entry that exists only locally or is synthesized (secrets).
    pub fn synthetic_file(path: &str) -> Self {
        let path = normalize_remote_path(path);
        Self {
            name: basename(&path).to_string(),
            path,
            kind: ResourceKind::File,
            modified_at: None,
            created_at: None,
            sketch_id: None,
            is_public: false,
            size: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    File,
    Folder,
    Sketch,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Sketch {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub secrets: Vec<SketchSecret>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SketchSecret {
    pub name: String,
    pub value: String,
}

/// Partial sketch update for `POST /sketches/{id}`. Unset fields are left
/// untouched server-side.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SketchEdit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Vec<SketchSecret>>,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub recursive: bool,
    pub match_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FilePayload {
    data: String,
    #[allow(dead_code)]
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Serialize)]
struct WritePayload {
    data: String,
}

#[derive(Debug, Serialize)]
struct CreateSketchPayload<'a> {
    ino: String,
    path: String,
    user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct TransferPayload {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct SketchesPage {
    #[serde(default)]
    sketches: Vec<Sketch>,
}

/// Authenticated client for the Arduino Create storage API.
///
/// One client per authenticated session; the sketch identity cache it owns
/// is scoped to that session and is only ever rebuilt wholesale.
#[derive(Clone)]
pub struct CreateClient {
    http: Client,
    base_url: Url,
    token: String,
    cache: SketchCache,
}

impl CreateClient {
    pub fn new(token: impl Into<String>) -> Result<Self, CreateError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, CreateError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
            cache: SketchCache::new(),
        })
    }

    pub fn sketch_cache(&self) -> &SketchCache {
        &self.cache
    }

    /// List a directory. The remote store has no parent links; the flat
    /// result is what callers build their tree index from.
    ///
    /// Sketch-typed entries are annotated with id/visibility from the
    /// identity cache, and a synthetic `arduino_secrets.h` entry is added
    /// under every listed sketch directory whose sketch carries secrets.
    pub async fn list(
        &self,
        path: &str,
        options: &ListOptions,
    ) -> Result<Vec<Resource>, CreateError> {
        let normalized = normalize_remote_path(path);
        let mut url = self.endpoint(&files_route('d', &normalized))?;
        {
            let mut query = url.query_pairs_mut();
            if options.recursive {
                query.append_pair("deep", "true");
            }
            if let Some(name) = options.match_name.as_deref().filter(|n| !n.is_empty()) {
                query.append_pair("name_like", name);
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let raw: Vec<Resource> = Self::handle_response(response).await?;
        let mut resources: Vec<Resource> = raw
            .into_iter()
            .map(|mut resource| {
                resource.path = normalize_remote_path(&resource.path);
                resource
            })
            .collect();
        self.annotate_sketches(&mut resources);
        self.inject_secret_entries(&normalized, &mut resources);
        Ok(resources)
    }

    /// The remote store has no stat-by-path endpoint; stat is a parent
    /// listing filtered by basename. A miss maps to `NotFound`.
    pub async fn stat(&self, path: &str) -> Result<Resource, CreateError> {
        let normalized = normalize_remote_path(path);
        if normalized == "/" {
            return Ok(Resource::folder("/"));
        }
        let parent = parent_path(&normalized);
        let name = basename(&normalized).to_string();
        let siblings = self.list(&parent, &ListOptions::default()).await?;
        siblings
            .into_iter()
            .find(|resource| resource.name == name)
            .ok_or(CreateError::NotFound(normalized))
    }

    pub async fn create_directory(&self, path: &str) -> Result<(), CreateError> {
        let normalized = normalize_remote_path(path);
        let url = self.endpoint(&files_route('d', &normalized))?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::expect_success(response).await
    }

    pub async fn create_sketch(&self, path: &str, content: &str) -> Result<Sketch, CreateError> {
        let normalized = normalize_remote_path(path);
        let url = self.endpoint("/v2/sketches")?;
        let payload = CreateSketchPayload {
            ino: BASE64.encode(content),
            path: storage_path(&normalized),
            user_id: "me",
        };
        let response = self
            .http
            .put(url)
            .header("Authorization", self.auth_header_value())
            .json(&payload)
            .send()
            .await?;
        let mut sketch: Sketch = Self::handle_response(response).await?;
        sketch.path = normalize_remote_path(&sketch.path);
        self.cache.insert(sketch.clone());
        Ok(sketch)
    }

    /// Read a file as text. The main sketch file gains the secrets include
    /// when the sketch has secrets; `arduino_secrets.h` itself is never
    /// fetched, it is rendered from freshly re-read sketch metadata.
    pub async fn read_file(&self, path: &str) -> Result<String, CreateError> {
        let normalized = normalize_remote_path(path);
        if secrets::is_secrets_file(&normalized) {
            return self.read_secrets_file(&normalized).await;
        }
        let url = self.endpoint(&files_route('f', &normalized))?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let payload: FilePayload = Self::handle_response(response).await?;
        let bytes = BASE64.decode(payload.data.as_bytes())?;
        let content = String::from_utf8(bytes).map_err(|_| CreateError::NonUtf8)?;

        if secrets::is_main_file(&normalized) {
            let sketch = self.sketch_for_path(&parent_path(&normalized)).await?;
            if sketch.is_some_and(|s| !s.secrets.is_empty()) {
                return Ok(secrets::ensure_include(&content));
            }
        }
        Ok(content)
    }

    /// Write a file. The secrets include never reaches the backend: it is
    /// stripped from the main file, and a write to `arduino_secrets.h`
    /// turns into a sketch metadata update instead of a file upload.
    pub async fn write_file(&self, path: &str, content: &str) -> Result<(), CreateError> {
        let normalized = normalize_remote_path(path);
        if secrets::is_secrets_file(&normalized) {
            return self.write_secrets_file(&normalized, content).await;
        }
        let upstream = if secrets::is_main_file(&normalized) {
            secrets::strip_include(content)
        } else {
            content.to_string()
        };
        let url = self.endpoint(&files_route('f', &normalized))?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&WritePayload {
                data: BASE64.encode(upstream),
            })
            .send()
            .await?;
        Self::expect_success(response).await
    }

    pub async fn delete(&self, path: &str, kind: ResourceKind) -> Result<(), CreateError> {
        let normalized = normalize_remote_path(path);
        let selector = match kind {
            ResourceKind::File => 'f',
            ResourceKind::Folder | ResourceKind::Sketch => 'd',
        };
        let url = self.endpoint(&files_route(selector, &normalized))?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::expect_success(response).await
    }

    /// Rename a file or directory. A 409 surfaces as a conflict error the
    /// caller recovers from by picking another name. The identity cache is
    /// invalidated wholesale; the next full listing rebuilds it.
    pub async fn rename(&self, from: &str, to: &str) -> Result<(), CreateError> {
        self.transfer("/v3/files/mv", from, to).await?;
        self.cache.clear();
        Ok(())
    }

    pub async fn copy(&self, from: &str, to: &str) -> Result<(), CreateError> {
        self.transfer("/v3/files/cp", from, to).await
    }

    async fn transfer(&self, route: &str, from: &str, to: &str) -> Result<(), CreateError> {
        let url = self.endpoint(route)?;
        let payload = TransferPayload {
            from: storage_path(&normalize_remote_path(from)),
            to: storage_path(&normalize_remote_path(to)),
        };
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&payload)
            .send()
            .await?;
        Self::expect_success(response).await
    }

    pub async fn sketch_by_id(&self, id: &str) -> Result<Sketch, CreateError> {
        let mut url = self.endpoint(&format!("/v2/sketches/byID/{id}"))?;
        url.query_pairs_mut().append_pair("user_id", "me");
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let mut sketch: Sketch = Self::handle_response(response).await?;
        sketch.path = normalize_remote_path(&sketch.path);
        Ok(sketch)
    }

    pub async fn edit_sketch(&self, id: &str, edit: &SketchEdit) -> Result<Sketch, CreateError> {
        let url = self.endpoint(&format!("/v2/sketches/{id}"))?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(edit)
            .send()
            .await?;
        let mut sketch: Sketch = Self::handle_response(response).await?;
        sketch.path = normalize_remote_path(&sketch.path);
        // Wholesale invalidation; the next listing rebuilds the cache.
        self.cache.clear();
        Ok(sketch)
    }

    /// List every sketch of the authenticated user. Pages by a fixed offset
    /// step until a page comes back empty; the accumulated result replaces
    /// the identity cache as a side effect.
    pub async fn list_sketches(&self) -> Result<Vec<Sketch>, CreateError> {
        let mut offset = 0u32;
        let mut sketches = Vec::new();
        loop {
            let mut url = self.endpoint("/v2/sketches")?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("user_id", "me");
                query.append_pair("limit", &SKETCH_PAGE_SIZE.to_string());
                query.append_pair("offset", &offset.to_string());
            }
            let response = self
                .http
                .get(url)
                .header("Authorization", self.auth_header_value())
                .send()
                .await?;
            let page: SketchesPage = Self::handle_response(response).await?;
            if page.sketches.is_empty() {
                break;
            }
            offset = offset.saturating_add(SKETCH_PAGE_SIZE);
            sketches.extend(page.sketches.into_iter().map(|mut sketch| {
                sketch.path = normalize_remote_path(&sketch.path);
                sketch
            }));
        }
        self.cache.replace_all(&sketches);
        Ok(sketches)
    }

    /// Resolve the sketch owning `path` from the identity cache, falling
    /// back to one full re-listing on a miss.
    pub async fn sketch_for_path(&self, path: &str) -> Result<Option<Sketch>, CreateError> {
        let normalized = normalize_remote_path(path);
        if let Some(sketch) = self.cache.get_by_path(&normalized) {
            return Ok(Some(sketch));
        }
        self.list_sketches().await?;
        Ok(self.cache.get_by_path(&normalized))
    }

    async fn read_secrets_file(&self, path: &str) -> Result<String, CreateError> {
        let dir = parent_path(path);
        let sketch = self
            .sketch_for_path(&dir)
            .await?
            .ok_or_else(|| CreateError::NotFound(path.to_string()))?;
        // Re-fetch by id so stale cached secrets never leak into the file.
        let fresh = self.sketch_by_id(&sketch.id).await?;
        if fresh.secrets.is_empty() {
            return Err(CreateError::NotFound(path.to_string()));
        }
        Ok(secrets::render_defines(&fresh.secrets))
    }

    async fn write_secrets_file(&self, path: &str, content: &str) -> Result<(), CreateError> {
        let dir = parent_path(path);
        let sketch = self
            .sketch_for_path(&dir)
            .await?
            .ok_or_else(|| CreateError::NotFound(path.to_string()))?;
        let edit = SketchEdit {
            secrets: Some(secrets::parse_defines(content)),
            ..SketchEdit::default()
        };
        self.edit_sketch(&sketch.id, &edit).await?;
        Ok(())
    }

    fn annotate_sketches(&self, resources: &mut [Resource]) {
        for resource in resources {
            if resource.kind != ResourceKind::Sketch {
                continue;
            }
            if let Some(sketch) = self.cache.get_by_path(&resource.path) {
                resource.sketch_id = Some(sketch.id);
                resource.is_public = sketch.is_public;
            }
        }
    }

    fn inject_secret_entries(&self, listed_path: &str, resources: &mut Vec<Resource>) {
        let mut sketch_dirs: Vec<String> = resources
            .iter()
            .filter(|resource| resource.kind == ResourceKind::Sketch)
            .map(|resource| resource.path.clone())
            .collect();
        if self.cache.get_by_path(listed_path).is_some() {
            sketch_dirs.push(listed_path.to_string());
        }
        for dir in sketch_dirs {
            let Some(sketch) = self.cache.get_by_path(&dir) else {
                continue;
            };
            if sketch.secrets.is_empty() {
                continue;
            }
            let secrets_path = format!("{}/{}", dir.trim_end_matches('/'), secrets::SECRETS_FILE);
            if resources.iter().any(|r| r.path == secrets_path) {
                continue;
            }
            resources.push(Resource::synthetic_file(&secrets_path));
        }
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, route: &str) -> Result<Url, CreateError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}{route}"))?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CreateError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(CreateError::Api { status, body })
        }
    }

    async fn expect_success(response: reqwest::Response) -> Result<(), CreateError> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(CreateError::Api { status, body })
        }
    }
}

fn files_route(selector: char, path: &str) -> String {
    let suffix = if path == "/" { "" } else { path };
    format!("/v2/files/{selector}/{STORAGE_PREFIX}{suffix}")
}

fn storage_path(path: &str) -> String {
    let suffix = if path == "/" { "" } else { path };
    format!("{STORAGE_PREFIX}{suffix}")
}

/// Normalize a remote path to its canonical POSIX form: leading slash, no
/// trailing slash, storage prefix stripped. The result is the resource's
/// identity everywhere in this crate.
pub fn normalize_remote_path(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_prefix = trimmed
        .trim_start_matches('/')
        .strip_prefix(STORAGE_PREFIX)
        .unwrap_or(trimmed);
    let inner = without_prefix.trim_matches('/');
    if inner.is_empty() {
        "/".to_string()
    } else {
        format!("/{inner}")
    }
}

pub fn parent_path(path: &str) -> String {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

fn basename(path: &str) -> &str {
    if path == "/" {
        return "/";
    }
    path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path)
}
