use serde::{Deserialize, Serialize};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("cannot read {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path:?}")]
    Deserialize {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("cannot serialize the notification target")]
    Serialize(#[from] toml::ser::Error),
}

/// Durable storage of the notification target URI.
pub trait TargetPersistence: Send + Sync {
    fn load(&self) -> Result<Option<String>, PersistenceError>;
    /// `None` clears the stored value.
    fn save(&self, uri: Option<&str>) -> Result<(), PersistenceError>;
}

/// Keeps the value in memory only. Clones share the same value.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    value: Arc<Mutex<Option<String>>>,
}

impl MemoryPersistence {
    #[must_use]
    pub fn with_value(uri: impl Into<String>) -> Self {
        Self {
            value: Arc::new(Mutex::new(Some(uri.into()))),
        }
    }

    #[must_use]
    pub fn stored(&self) -> Option<String> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TargetPersistence for MemoryPersistence {
    fn load(&self) -> Result<Option<String>, PersistenceError> {
        Ok(self.stored())
    }

    fn save(&self, uri: Option<&str>) -> Result<(), PersistenceError> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = uri.map(ToString::to_string);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetToml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uri: Option<String>,
}

/// Stores the target as `uri = "..."` in a TOML file.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the destination, so readers never observe a partially written file.
#[derive(Debug, Clone)]
pub struct TomlFilePersistence {
    path: PathBuf,
}

impl TomlFilePersistence {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl TargetPersistence for TomlFilePersistence {
    fn load(&self) -> Result<Option<String>, PersistenceError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("Target file {:?} does not exist", self.path);
                return Ok(None);
            }
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let target_toml: TargetToml =
            toml::from_str(&contents).map_err(|source| PersistenceError::Deserialize {
                path: self.path.clone(),
                source,
            })?;
        Ok(target_toml.uri.filter(|uri| !uri.trim().is_empty()))
    }

    fn save(&self, uri: Option<&str>) -> Result<(), PersistenceError> {
        let contents = toml::to_string(&TargetToml {
            uri: uri.map(ToString::to_string),
        })?;
        let write_err = |source| PersistenceError::Write {
            path: self.path.clone(),
            source,
        };
        let dir = self.parent_dir();
        std::fs::create_dir_all(dir).map_err(write_err)?;
        let mut temp_file = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        temp_file.write_all(contents.as_bytes()).map_err(write_err)?;
        temp_file.as_file().sync_all().map_err(write_err)?;
        temp_file
            .persist(&self.path)
            .map_err(|err| write_err(err.error))?;
        trace!("Saved target to {:?}", self.path);
        Ok(())
    }
}
