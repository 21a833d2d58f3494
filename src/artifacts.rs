//! Artifact store
//!
//! Named JSON and SQL blobs produced by a run. The pipeline only needs a key → blob map; the
//! filesystem store additionally keeps a `manifest.json` with a SHA-256 checksum per blob.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const SCHEMA_METADATA: &str = "schema_metadata";
pub const DEPENDENCY_GRAPH: &str = "dependency_graph";
pub const TABLE_BLUEPRINTS: &str = "table_blueprints";
pub const TRANSFORMED_DDL: &str = "transformed_ddl";
pub const CONVERTED_PROCEDURES: &str = "converted_procedures";
pub const SANDBOX_RESULTS: &str = "sandbox_results";
pub const VALIDATION_REPORT: &str = "validation_report";
pub const DATA_MIGRATION_RESULTS: &str = "data_migration_results";
pub const PRODUCTION_DEPLOYMENT: &str = "production_deployment";
pub const MIGRATION_REPORT: &str = "migration_report";
/// Reconciliation CSV, stored through [`ArtifactStore::put_sql`]'s text path
pub const RECONCILIATION: &str = "reconciliation";

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug)]
pub enum ArtifactError {
    Io { path: PathBuf, source: std::io::Error },
    Serialization(serde_json::Error),
}

impl fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactError::Io { path, source } => {
                write!(f, "Artifact I/O error on {}: {}", path.display(), source)
            }
            ArtifactError::Serialization(e) => write!(f, "Artifact serialization error: {}", e),
        }
    }
}

impl std::error::Error for ArtifactError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArtifactError::Io { source, .. } => Some(source),
            ArtifactError::Serialization(e) => Some(e),
        }
    }
}

impl From<serde_json::Error> for ArtifactError {
    fn from(e: serde_json::Error) -> Self {
        ArtifactError::Serialization(e)
    }
}

/// Key → blob map
pub trait ArtifactStore {
    /// Store a JSON blob under `key`, replacing any previous one
    fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), ArtifactError>;

    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, ArtifactError>;

    /// Store a text blob (SQL, CSV) under `key`
    fn put_sql(&self, key: &str, text: &str) -> Result<(), ArtifactError>;

    fn keys(&self) -> Result<Vec<String>, ArtifactError>;
}

/// Serialize `value` and store it under `key`
///
/// # Errors
///
/// Returns an error if serialization or the store fails.
pub fn put_serialized<T: Serialize>(
    store: &dyn ArtifactStore,
    key: &str,
    value: &T,
) -> Result<(), ArtifactError> {
    store.put(key, &serde_json::to_value(value)?)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file: String,
    pub sha256: String,
    pub bytes: usize,
    pub written_at: DateTime<Utc>,
}

pub fn checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// `{dir}/{key}.json` and `{dir}/{key}.sql` plus `{dir}/manifest.json`
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    /// Store rooted at `dir`, created if missing
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| ArtifactError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> Result<BTreeMap<String, ManifestEntry>, ArtifactError> {
        let path = self.dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = read(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn write(&self, key: &str, extension: &str, content: &str) -> Result<(), ArtifactError> {
        let file = format!("{key}.{extension}");
        let path = self.dir.join(&file);
        fs::write(&path, content).map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;

        let mut manifest = self.manifest()?;
        manifest.insert(
            key.to_string(),
            ManifestEntry {
                file,
                sha256: checksum(content.as_bytes()),
                bytes: content.len(),
                written_at: Utc::now(),
            },
        );
        let manifest_path = self.dir.join(MANIFEST_FILE);
        fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?).map_err(|source| {
            ArtifactError::Io {
                path: manifest_path,
                source,
            }
        })?;
        log::debug!("Wrote artifact {}", path.display());
        Ok(())
    }
}

fn read(path: &Path) -> Result<String, ArtifactError> {
    fs::read_to_string(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), ArtifactError> {
        self.write(key, "json", &serde_json::to_string_pretty(value)?)
    }

    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, ArtifactError> {
        let path = self.dir.join(format!("{key}.json"));
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&read(&path)?)?))
    }

    fn put_sql(&self, key: &str, text: &str) -> Result<(), ArtifactError> {
        let extension = if key == RECONCILIATION { "csv" } else { "sql" };
        self.write(key, extension, text)
    }

    fn keys(&self) -> Result<Vec<String>, ArtifactError> {
        Ok(self.manifest()?.into_keys().collect())
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    json: RefCell<BTreeMap<String, serde_json::Value>>,
    text: RefCell<BTreeMap<String, String>>,
}

impl MemoryArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.text.borrow().get(key).cloned()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), ArtifactError> {
        self.json.borrow_mut().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, ArtifactError> {
        Ok(self.json.borrow().get(key).cloned())
    }

    fn put_sql(&self, key: &str, text: &str) -> Result<(), ArtifactError> {
        self.text.borrow_mut().insert(key.to_string(), text.to_string());
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, ArtifactError> {
        let mut keys: Vec<String> = self.json.borrow().keys().cloned().collect();
        keys.extend(self.text.borrow().keys().cloned());
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}
