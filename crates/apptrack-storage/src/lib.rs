//! Bucket-style blob storage, cached dropdown option lists and secret lookup.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "apptrack-storage";

pub const CORE_SKILLS_BLOB: &str = "core_skills_list.json";
pub const APPLICATION_SOURCE_BLOB: &str = "application_source_list.json";
pub const RESUME_BLOB: &str = "resume.txt";

pub const DEFAULT_APPLICATION_SOURCES: &[&str] = &[
    "Indeed",
    "Glassdoor",
    "Monster",
    "LinkedIn",
    "BuiltIn",
    "Company Website",
];

pub const DEFAULT_CORE_SKILL_OPTIONS: &[&str] = &[
    "python",
    "sql",
    "numpy",
    "pandas",
    "scikit-learn",
    "TensorFlow",
    "matplotlib",
    "seaborn",
    "ggplot",
    "tableau",
    "powerbi",
    "pytorch",
    "keras",
    "R",
    "excel",
    "spark",
    "redshift",
    "bigquery",
    "snowflake",
    "hypothesis_testing",
    "inferential statistics",
    "nlp",
    "computer_vision",
    "a_b_testing",
    "regression_analysis",
    "time_series_analysis",
    "AWS",
    "GCP",
    "Azure",
    "Docker",
    "Kubernetes",
    "CI/CD",
    "Git",
    "Agile",
    "Scrum",
    "Kanban",
    "Jira",
    "Confluence",
    "GA4",
    "customer_segmentation",
    "customer_lifetime_value",
    "churn_prediction",
    "RFM",
    "market_basket_analysis",
    "airflow",
    "Looker",
    "DataDog",
    "causal inference",
    "experimentation",
    "Optimization",
    "GTM",
];

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket_dir: PathBuf,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        Self {
            bucket_dir: std::env::var("APPTRACK_BUCKET_DIR")
                .unwrap_or_else(|_| "./bucket".to_string())
                .into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob name `{0}`")]
    InvalidName(String),
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("blob `{name}` is not valid JSON: {source}")]
    Json {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub name: String,
    pub content_hash: String,
    pub byte_size: usize,
}

/// Flat namespace of named blobs under one root directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.bucket_dir.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(name);
        let plain = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(BlobError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(relative))
    }

    pub async fn exists(&self, name: &str) -> Result<bool, BlobError> {
        let path = self.path_for(name)?;
        let found = fs::try_exists(&path)
            .await
            .with_context(|| format!("checking blob path {}", path.display()))?;
        Ok(found)
    }

    pub async fn read_bytes(&self, name: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(name)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(name.to_string()))
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context(format!("reading blob {}", path.display()))
                .into()),
        }
    }

    pub async fn read_text(&self, name: &str) -> Result<String, BlobError> {
        let bytes = self.read_bytes(name).await?;
        let text = String::from_utf8(bytes).with_context(|| format!("blob `{name}` is not UTF-8"))?;
        Ok(text)
    }

    pub async fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T, BlobError> {
        let bytes = self.read_bytes(name).await?;
        serde_json::from_slice(&bytes).map_err(|source| BlobError::Json {
            name: name.to_string(),
            source,
        })
    }

    /// Replaces the blob atomically: bytes land in a temp file that is renamed over the target.
    pub async fn write_bytes(&self, name: &str, bytes: &[u8]) -> Result<StoredBlob, BlobError> {
        let path = self.path_for(name)?;
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating blob directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp blob file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp blob file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp blob file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(anyhow::Error::new(err)
                .context(format!(
                    "atomically renaming temp blob {} -> {}",
                    temp_path.display(),
                    path.display()
                ))
                .into());
        }

        debug!(blob = name, byte_size = bytes.len(), "blob written");
        Ok(StoredBlob {
            name: name.to_string(),
            content_hash: Self::sha256_hex(bytes),
            byte_size: bytes.len(),
        })
    }

    pub async fn write_text(&self, name: &str, text: &str) -> Result<StoredBlob, BlobError> {
        self.write_bytes(name, text.as_bytes()).await
    }

    pub async fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<StoredBlob, BlobError> {
        let bytes = serde_json::to_vec(value).map_err(|source| BlobError::Json {
            name: name.to_string(),
            source,
        })?;
        self.write_bytes(name, &bytes).await
    }

    /// Plain-text resume consumed by the cover-letter collaborator.
    pub async fn read_resume(&self) -> Result<String, BlobError> {
        self.read_text(RESUME_BLOB).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    pub core_skills: Vec<String>,
    pub application_sources: Vec<String>,
}

/// Dropdown option lists backed by two JSON blobs.
///
/// Loaded on first use and cached until [`OptionLists::invalidate`]. A missing blob is
/// seeded with the built-in defaults and written back.
#[derive(Debug)]
pub struct OptionLists {
    store: BlobStore,
    cache: RwLock<Option<Options>>,
    /// Serialises read-modify-write of the list blobs.
    appending: Mutex<()>,
}

impl OptionLists {
    pub fn new(store: BlobStore) -> Self {
        Self {
            store,
            cache: RwLock::new(None),
            appending: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    pub async fn get(&self) -> Result<Options, BlobError> {
        if let Some(options) = self.cache.read().await.as_ref() {
            return Ok(options.clone());
        }

        let mut cache = self.cache.write().await;
        if let Some(options) = cache.as_ref() {
            return Ok(options.clone());
        }
        let options = Options {
            core_skills: self.load_or_seed(CORE_SKILLS_BLOB, DEFAULT_CORE_SKILL_OPTIONS).await?,
            application_sources: self
                .load_or_seed(APPLICATION_SOURCE_BLOB, DEFAULT_APPLICATION_SOURCES)
                .await?,
        };
        *cache = Some(options.clone());
        Ok(options)
    }

    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    /// Appends `skill` unless already present. Returns whether the list changed.
    pub async fn add_core_skill(&self, skill: &str) -> Result<bool, BlobError> {
        self.append(CORE_SKILLS_BLOB, skill).await
    }

    pub async fn add_application_source(&self, source: &str) -> Result<bool, BlobError> {
        self.append(APPLICATION_SOURCE_BLOB, source).await
    }

    async fn append(&self, blob: &str, value: &str) -> Result<bool, BlobError> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(false);
        }
        let _appending = self.appending.lock().await;
        let mut options = self.get().await?;
        let list = if blob == CORE_SKILLS_BLOB {
            &mut options.core_skills
        } else {
            &mut options.application_sources
        };
        if list.iter().any(|existing| existing == value) {
            return Ok(false);
        }
        list.push(value.to_string());
        self.store.write_json(blob, &*list).await?;
        info!(blob, value, "option appended");

        *self.cache.write().await = Some(options);
        Ok(true)
    }

    async fn load_or_seed(&self, blob: &str, defaults: &[&str]) -> Result<Vec<String>, BlobError> {
        match self.store.read_json::<Vec<String>>(blob).await {
            Ok(list) => Ok(list),
            Err(BlobError::NotFound(_)) => {
                let seeded: Vec<String> = defaults.iter().map(|s| s.to_string()).collect();
                self.store.write_json(blob, &seeded).await?;
                warn!(blob, count = seeded.len(), "option list missing; seeded defaults");
                Ok(seeded)
            }
            Err(err) => Err(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret `{0}` is not set")]
    Missing(String),
    #[error("secret `{name}` is not valid JSON: {source}")]
    Json {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<String, SecretError>;
}

/// Reads secrets from process environment variables of the same name.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn fetch(&self, name: &str) -> Result<String, SecretError> {
        std::env::var(name).map_err(|_| SecretError::Missing(name.to_string()))
    }
}

/// Fixed in-process secrets, mainly for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretStore {
    values: HashMap<String, String>,
}

impl StaticSecretStore {
    pub fn new(values: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn fetch(&self, name: &str) -> Result<String, SecretError> {
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| SecretError::Missing(name.to_string()))
    }
}

/// Lazy, cached front for any [`SecretStore`].
pub struct CachedSecrets {
    inner: Box<dyn SecretStore>,
    cache: Mutex<HashMap<String, String>>,
}

impl CachedSecrets {
    pub fn new(inner: impl SecretStore + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, name: &str) -> Result<String, SecretError> {
        let mut cache = self.cache.lock().await;
        if let Some(value) = cache.get(name) {
            return Ok(value.clone());
        }
        let value = self.inner.fetch(name).await?;
        cache.insert(name.to_string(), value.clone());
        Ok(value)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, name: &str) -> Result<T, SecretError> {
        let raw = self.get(name).await?;
        serde_json::from_str(&raw).map_err(|source| SecretError::Json {
            name: name.to_string(),
            source,
        })
    }

    pub async fn invalidate(&self) {
        self.cache.lock().await.clear();
    }
}
