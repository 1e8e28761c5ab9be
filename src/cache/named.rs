//! Named Model Cache
//!
//! Single-tier cache of loaded models addressed by name. Names resolve to
//! files in a model folder through an explicit table or the folder's
//! `models.json`; unknown names are used as filenames directly.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info};

use super::memory::KeyedLru;
use crate::error::{Error, Result};

/// Name of the model table inside the model folder
pub const CONFIG_FILE: &str = "models.json";

type Loader<T> = Box<dyn Fn(&Path) -> anyhow::Result<T> + Send + Sync>;

/// Memory cache of models loaded from a local folder
pub struct NamedModelCache<T> {
    /// Folder holding model files and optionally `models.json`
    folder: PathBuf,
    /// Name to filename table
    models: RwLock<HashMap<String, String>>,
    /// Whether the table is re-read from `models.json` on unknown names
    reload_config: bool,
    /// Loaded models
    cache: KeyedLru<String, Arc<T>>,
    /// Turns a model file into a model
    loader: Loader<T>,
}

impl<T> NamedModelCache<T> {
    /// Create a cache whose table is read from `{folder}/models.json`.
    ///
    /// A missing config file leaves the table empty.
    pub fn new<F>(folder: impl Into<PathBuf>, capacity: usize, loader: F) -> Result<Self>
    where
        F: Fn(&Path) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let cache = Self::build(folder.into(), capacity, HashMap::new(), true, loader)?;
        cache.reload()?;
        Ok(cache)
    }

    /// Create a cache with a fixed name to filename table
    pub fn with_models<F>(
        folder: impl Into<PathBuf>,
        capacity: usize,
        models: HashMap<String, String>,
        loader: F,
    ) -> Result<Self>
    where
        F: Fn(&Path) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::build(folder.into(), capacity, models, false, loader)
    }

    fn build<F>(
        folder: PathBuf,
        capacity: usize,
        models: HashMap<String, String>,
        reload_config: bool,
        loader: F,
    ) -> Result<Self>
    where
        F: Fn(&Path) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Ok(Self {
            folder,
            models: RwLock::new(models),
            reload_config,
            cache: KeyedLru::new(capacity)?,
            loader: Box::new(loader),
        })
    }

    /// Get a loaded model by name, loading it on a miss.
    ///
    /// Load failures are logged and reported as `None`; nothing is cached.
    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        match self.fetch(name) {
            Ok(model) => Some(model),
            Err(e) => {
                error!("{}", e);
                None
            }
        }
    }

    /// Get a loaded model by name, reporting why a load failed
    pub fn fetch(&self, name: &str) -> Result<Arc<T>> {
        if let Some(model) = self.cache.get(name) {
            debug!("{} served from memory", name);
            return Ok(model);
        }

        let path = self.resolve(name)?;
        let model = (self.loader)(&path).map(Arc::new).map_err(|e| Error::Load {
            key: name.to_string(),
            reason: format!("{}: {:#}", path.display(), e),
        })?;

        if let Some((evicted, _)) = self.cache.set(name.to_string(), Arc::clone(&model)) {
            debug!("Evicted {} from memory", evicted);
        }
        Ok(model)
    }

    /// Path a name resolves to, re-reading the config for unknown names
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        if self.reload_config && !self.models.read().contains_key(name) {
            self.reload()?;
        }

        if let Some(filename) = self.models.read().get(name) {
            return Ok(self.folder.join(filename));
        }

        // Unknown names are filenames and must stay inside the folder.
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.folder.join(name)),
            _ => Err(Error::InvalidKey {
                key: name.to_string(),
                reason: "model name must be a single path component",
            }),
        }
    }

    /// Re-read `{folder}/models.json`; a missing file keeps the current table
    pub fn reload(&self) -> Result<()> {
        let path = self.folder.join(CONFIG_FILE);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::Io(e)),
        };

        let models: HashMap<String, String> = serde_json::from_str(&data)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?;

        info!("Loaded {} model names from {}", models.len(), path.display());
        *self.models.write() = models;
        Ok(())
    }

    /// Model folder
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Names currently in the table
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Get loaded-model cache
    pub fn cache(&self) -> &KeyedLru<String, Arc<T>> {
        &self.cache
    }
}

// =============================================================================
// Tests
// =============================================================================
