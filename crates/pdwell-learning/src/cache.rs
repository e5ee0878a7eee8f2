//! Process-wide cache of the loaded bundle.
//!
//! Readers get an `Arc<ModelBundle>` and keep using it for as long as they
//! need; a retrain swaps in a new `Arc` without disturbing them.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::artifact::{load_bundle, read_version};
use crate::config::DEFAULT_MODELS_DIR;
use crate::error::Result;
use crate::model::ModelBundle;

/// Environment variable that overrides the directory of [`global_cache()`].
pub const MODELS_DIR_ENV: &str = "PDWELL_MODELS_DIR";

/// Lazily loaded bundle that follows the version on disk.
///
/// [`get()`](Self::get) reads the small version marker next to the model file
/// and reloads the bundle only when it differs from the one the cached bundle
/// was loaded under, so a retrain in another process is picked up on the
/// next call without re-parsing the model on every request.
#[derive(Debug)]
pub struct BundleCache {
    dir: PathBuf,
    slot: RwLock<Option<Cached>>,
}

#[derive(Debug)]
struct Cached {
    /// Version marker observed before the load.
    key: String,
    bundle: Arc<ModelBundle>,
}

impl BundleCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            slot: RwLock::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The current bundle, loading or reloading it if the on-disk version
    /// changed.
    ///
    /// # Errors
    ///
    /// Returns [`PdwellError::ArtifactMissing`](crate::PdwellError::ArtifactMissing)
    /// when no model has been trained into the directory yet.
    pub fn get(&self) -> Result<Arc<ModelBundle>> {
        let on_disk = read_version(&self.dir)?;
        if let Some(cached) = self.slot.read().as_ref() {
            if cached.key == on_disk {
                return Ok(Arc::clone(&cached.bundle));
            }
        }

        let mut slot = self.slot.write();
        // Another caller may have reloaded while we waited for the lock
        if let Some(cached) = slot.as_ref() {
            if cached.key == on_disk {
                return Ok(Arc::clone(&cached.bundle));
            }
        }
        let loaded = Arc::new(load_bundle(&self.dir)?);
        info!(
            "Loaded {} model version {} from {}",
            loaded.model_name(),
            loaded.version(),
            self.dir.display()
        );
        if loaded.version() != on_disk {
            // Written between the two reads; the next call sees the new marker
            debug!(key = %on_disk, loaded = %loaded.version(), "model changed during load");
        }
        *slot = Some(Cached {
            key: on_disk,
            bundle: Arc::clone(&loaded),
        });
        Ok(loaded)
    }

    /// The cached bundle without touching the disk.
    pub fn cached(&self) -> Option<Arc<ModelBundle>> {
        self.slot.read().as_ref().map(|c| Arc::clone(&c.bundle))
    }

    /// Drop the cached bundle; the next [`get()`](Self::get) reloads it.
    pub fn invalidate(&self) {
        *self.slot.write() = None;
    }
}

static GLOBAL: Lazy<BundleCache> = Lazy::new(|| {
    let dir = std::env::var_os(MODELS_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODELS_DIR));
    BundleCache::new(dir)
});

/// Cache for `$PDWELL_MODELS_DIR`, or `models` when it is unset.
///
/// The directory is fixed on first access.
pub fn global_cache() -> &'static BundleCache {
    &GLOBAL
}
