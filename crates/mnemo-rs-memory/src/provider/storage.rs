//! Object blob backends: in-process map and local filesystem.

use super::{Lifecycle, ObjectStorage, Provider, ProviderState, logged};
use crate::error::MemoryError;
use crate::health::HealthStatus;
use crate::model::ObjectMeta;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use mnemo_rs_config::{MemoryDomain, ProviderConfig};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::spawn_blocking;
use uuid::Uuid;
use walkdir::WalkDir;

const DOMAIN: MemoryDomain = MemoryDomain::Storage;
const MAX_KEY_LEN: usize = 1024;

/// Reject keys that could escape the user's namespace.
pub fn validate_key(key: &str) -> Result<(), MemoryError> {
    let invalid = |reason: &str| Err(MemoryError::InvalidInput(format!("object key {key:?} {reason}")));
    if key.is_empty() {
        return invalid("must not be empty");
    }
    if key.len() > MAX_KEY_LEN {
        return invalid("is too long");
    }
    if key.starts_with('/') || key.contains('\\') || key.contains('\0') {
        return invalid("must be a relative path with '/' separators");
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return invalid("contains an empty, '.' or '..' segment");
    }
    Ok(())
}

fn validate_user(user_id: &str) -> Result<(), MemoryError> {
    if user_id.is_empty() {
        return Err(MemoryError::InvalidInput(
            "user id must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn build_meta(
    key: &str,
    size: u64,
    content_type: Option<String>,
    previous: Option<&ObjectMeta>,
    now: DateTime<Utc>,
) -> ObjectMeta {
    ObjectMeta {
        key: key.to_string(),
        size,
        content_type,
        created_at: previous.map_or(now, |meta| meta.created_at),
        updated_at: now,
    }
}

type UserObjects = BTreeMap<String, (ObjectMeta, Vec<u8>)>;

/// Object blobs held in process memory.
#[derive(Debug)]
pub struct InMemoryObjectStorage {
    lifecycle: Lifecycle,
    users: RwLock<HashMap<String, UserObjects>>,
}

impl Default for InMemoryObjectStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStorage {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new(DOMAIN),
            users: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Provider for InMemoryObjectStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn initialize(&self) -> Result<(), MemoryError> {
        if self.lifecycle.should_initialize()? {
            self.lifecycle.mark_ready();
            info!("initialized object storage (backend=memory)");
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), MemoryError> {
        if self.lifecycle.mark_shutdown() {
            self.users.write().clear();
            info!("object storage shutdown (backend=memory)");
        }
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        let users = self.users.read();
        let objects: usize = users.values().map(BTreeMap::len).sum();
        let bytes: u64 = users
            .values()
            .flat_map(BTreeMap::values)
            .map(|(meta, _)| meta.size)
            .sum();
        self.lifecycle.health(
            started,
            serde_json::json!({ "objects": objects, "bytes": bytes }),
        )
    }
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    async fn put_object(
        &self,
        user_id: &str,
        key: &str,
        data: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<ObjectMeta, MemoryError> {
        self.lifecycle.ensure_ready()?;
        logged(DOMAIN, "put_object", user_id, validate_user(user_id).and(validate_key(key)))?;
        let mut users = self.users.write();
        let objects = users.entry(user_id.to_string()).or_default();
        let meta = build_meta(
            key,
            data.len() as u64,
            content_type,
            objects.get(key).map(|(meta, _)| meta),
            Utc::now(),
        );
        objects.insert(key.to_string(), (meta.clone(), data));
        debug!(
            "stored object (user_id={}, key={}, size={})",
            user_id, key, meta.size
        );
        Ok(meta)
    }

    async fn get_object(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<(ObjectMeta, Vec<u8>), MemoryError> {
        self.lifecycle.ensure_ready()?;
        let users = self.users.read();
        let found = users
            .get(user_id)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(|| MemoryError::ObjectNotFound {
                user_id: user_id.to_string(),
                key: key.to_string(),
            });
        logged(DOMAIN, "get_object", user_id, found)
    }

    async fn head_object(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<ObjectMeta>, MemoryError> {
        self.lifecycle.ensure_ready()?;
        let users = self.users.read();
        Ok(users
            .get(user_id)
            .and_then(|objects| objects.get(key))
            .map(|(meta, _)| meta.clone()))
    }

    async fn delete_object(&self, user_id: &str, key: &str) -> Result<bool, MemoryError> {
        self.lifecycle.ensure_ready()?;
        let mut users = self.users.write();
        Ok(users
            .get_mut(user_id)
            .and_then(|objects| objects.remove(key))
            .is_some())
    }

    async fn list_objects(
        &self,
        user_id: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectMeta>, MemoryError> {
        self.lifecycle.ensure_ready()?;
        let users = self.users.read();
        Ok(users
            .get(user_id)
            .map(|objects| {
                objects
                    .iter()
                    .filter(|(key, _)| prefix.is_none_or(|prefix| key.starts_with(prefix)))
                    .map(|(_, (meta, _))| meta.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Object blobs stored under a root directory.
///
/// Layout per user (directory name is the hex-encoded user id):
/// `objects/<key>` holds the bytes, `meta/<key>.json` the metadata sidecar and
/// `tmp/` staged writes that are renamed into place. Filesystem calls run on
/// the blocking thread pool.
#[derive(Debug)]
pub struct FileObjectStorage {
    lifecycle: Lifecycle,
    layout: Arc<ObjectLayout>,
}

/// Paths and blocking filesystem operations behind [`FileObjectStorage`].
#[derive(Debug)]
struct ObjectLayout {
    root: PathBuf,
}

impl ObjectLayout {
    fn user_dir(&self, user_id: &str) -> PathBuf {
        let encoded: String = user_id.bytes().map(|byte| format!("{byte:02x}")).collect();
        self.root.join(encoded)
    }

    fn object_path(&self, user_id: &str, key: &str) -> PathBuf {
        self.user_dir(user_id).join("objects").join(key)
    }

    fn meta_path(&self, user_id: &str, key: &str) -> PathBuf {
        self.user_dir(user_id).join("meta").join(format!("{key}.json"))
    }

    /// Write bytes to a staged file, then rename it over `path`.
    fn write_atomic(&self, user_id: &str, path: &Path, bytes: &[u8]) -> Result<(), MemoryError> {
        let temp_dir = self.user_dir(user_id).join("tmp");
        std::fs::create_dir_all(&temp_dir)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = temp_dir.join(format!("{}.tmp", Uuid::new_v4()));
        {
            let mut file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(temp_path, path)?;
        Ok(())
    }

    fn read_meta(&self, user_id: &str, key: &str) -> Result<Option<ObjectMeta>, MemoryError> {
        let object_path = self.object_path(user_id, key);
        if !object_path.is_file() {
            return Ok(None);
        }
        let meta_path = self.meta_path(user_id, key);
        if meta_path.is_file() {
            let contents = std::fs::read_to_string(meta_path)?;
            return Ok(Some(serde_json::from_str(&contents)?));
        }
        let metadata = std::fs::metadata(&object_path)?;
        let modified: DateTime<Utc> = metadata.modified()?.into();
        Ok(Some(ObjectMeta {
            key: key.to_string(),
            size: metadata.len(),
            content_type: None,
            created_at: modified,
            updated_at: modified,
        }))
    }

    fn put(
        &self,
        user_id: &str,
        key: &str,
        data: &[u8],
        content_type: Option<String>,
    ) -> Result<ObjectMeta, MemoryError> {
        let previous = self.read_meta(user_id, key)?;
        let meta = build_meta(
            key,
            data.len() as u64,
            content_type,
            previous.as_ref(),
            Utc::now(),
        );
        self.write_atomic(user_id, &self.object_path(user_id, key), data)?;
        let encoded = serde_json::to_vec_pretty(&meta)?;
        self.write_atomic(user_id, &self.meta_path(user_id, key), &encoded)?;
        Ok(meta)
    }

    fn get(&self, user_id: &str, key: &str) -> Result<(ObjectMeta, Vec<u8>), MemoryError> {
        let meta = self
            .read_meta(user_id, key)?
            .ok_or_else(|| MemoryError::ObjectNotFound {
                user_id: user_id.to_string(),
                key: key.to_string(),
            })?;
        let data = std::fs::read(self.object_path(user_id, key))?;
        Ok((meta, data))
    }

    fn delete(&self, user_id: &str, key: &str) -> Result<bool, MemoryError> {
        let object_path = self.object_path(user_id, key);
        if !object_path.is_file() {
            return Ok(false);
        }
        std::fs::remove_file(object_path)?;
        let meta_path = self.meta_path(user_id, key);
        if meta_path.is_file() {
            std::fs::remove_file(meta_path)?;
        }
        Ok(true)
    }

    fn list(&self, user_id: &str, prefix: Option<&str>) -> Result<Vec<ObjectMeta>, MemoryError> {
        let objects_dir = self.user_dir(user_id).join("objects");
        if !objects_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut listed = Vec::new();
        for entry in WalkDir::new(&objects_dir).follow_links(false) {
            let entry = entry.map_err(|err| MemoryError::Store(err.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&objects_dir) else {
                continue;
            };
            let key = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if prefix.is_some_and(|prefix| !key.starts_with(prefix)) {
                continue;
            }
            if let Some(meta) = self.read_meta(user_id, &key)? {
                listed.push(meta);
            }
        }
        listed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(listed)
    }
}

impl FileObjectStorage {
    /// Build from backend parameters; `root` is required.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, MemoryError> {
        let root = config.param_path("root")?.ok_or_else(|| {
            MemoryError::InvalidConfig("storage.root is required for the file backend".to_string())
        })?;
        Ok(Self::new(root))
    }

    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            lifecycle: Lifecycle::new(DOMAIN),
            layout: Arc::new(ObjectLayout {
                root: root.as_ref().to_path_buf(),
            }),
        }
    }

    fn checked(&self, user_id: &str, key: &str) -> Result<(), MemoryError> {
        self.lifecycle.ensure_ready()?;
        validate_user(user_id)?;
        validate_key(key)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, MemoryError>
    where
        T: Send + 'static,
        F: FnOnce(&ObjectLayout) -> Result<T, MemoryError> + Send + 'static,
    {
        let layout = self.layout.clone();
        spawn_blocking(move || f(&layout)).await?
    }
}

#[async_trait]
impl Provider for FileObjectStorage {
    fn name(&self) -> &str {
        "file"
    }

    async fn initialize(&self) -> Result<(), MemoryError> {
        if !self.lifecycle.should_initialize()? {
            return Ok(());
        }
        self.blocking(|layout| Ok(std::fs::create_dir_all(&layout.root)?))
            .await?;
        self.lifecycle.mark_ready();
        info!(
            "initialized object storage (backend=file, root={})",
            self.layout.root.display()
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), MemoryError> {
        if self.lifecycle.mark_shutdown() {
            info!("object storage shutdown (backend=file)");
        }
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        if self.lifecycle.state() != ProviderState::Ready {
            return self.lifecycle.health(started, serde_json::Value::Null);
        }
        let root = self.layout.root.display().to_string();
        let probe = self
            .blocking(|layout| Ok(std::fs::metadata(&layout.root)?.is_dir()))
            .await;
        match probe {
            Ok(true) => HealthStatus::healthy(started.elapsed(), serde_json::json!({ "root": root })),
            Ok(false) => HealthStatus::from_error(
                started,
                format!("storage root {root} is not a directory"),
            ),
            Err(err) => HealthStatus::from_error(started, err),
        }
    }
}

#[async_trait]
impl ObjectStorage for FileObjectStorage {
    async fn put_object(
        &self,
        user_id: &str,
        key: &str,
        data: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<ObjectMeta, MemoryError> {
        let result = match self.checked(user_id, key) {
            Ok(()) => {
                let (owner, object_key) = (user_id.to_string(), key.to_string());
                self.blocking(move |layout| layout.put(&owner, &object_key, &data, content_type))
                    .await
            }
            Err(err) => Err(err),
        };
        let meta = logged(DOMAIN, "put_object", user_id, result)?;
        debug!(
            "stored object (user_id={}, key={}, size={})",
            user_id, key, meta.size
        );
        Ok(meta)
    }

    async fn get_object(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<(ObjectMeta, Vec<u8>), MemoryError> {
        let result = match self.checked(user_id, key) {
            Ok(()) => {
                let (owner, object_key) = (user_id.to_string(), key.to_string());
                self.blocking(move |layout| layout.get(&owner, &object_key))
                    .await
            }
            Err(err) => Err(err),
        };
        logged(DOMAIN, "get_object", user_id, result)
    }

    async fn head_object(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<ObjectMeta>, MemoryError> {
        self.checked(user_id, key)?;
        let (owner, object_key) = (user_id.to_string(), key.to_string());
        self.blocking(move |layout| layout.read_meta(&owner, &object_key))
            .await
    }

    async fn delete_object(&self, user_id: &str, key: &str) -> Result<bool, MemoryError> {
        self.checked(user_id, key)?;
        let (owner, object_key) = (user_id.to_string(), key.to_string());
        let removed = self
            .blocking(move |layout| layout.delete(&owner, &object_key))
            .await?;
        if removed {
            debug!("deleted object (user_id={}, key={})", user_id, key);
        }
        Ok(removed)
    }

    async fn list_objects(
        &self,
        user_id: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectMeta>, MemoryError> {
        self.lifecycle.ensure_ready()?;
        validate_user(user_id)?;
        let owner = user_id.to_string();
        let prefix = prefix.map(str::to_string);
        self.blocking(move |layout| layout.list(&owner, prefix.as_deref()))
            .await
    }
}
