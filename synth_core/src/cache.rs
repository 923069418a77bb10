use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::SynthesisError;

/// Field delimiter for key derivation. The unit separator cannot appear in
/// validated request text, so ("ab", "c") and ("a", "bc") never hash the
/// same byte sequence.
const KEY_DELIMITER: u8 = 0x1f;

/// Derive the content-address for a (text, voice, speed) triple.
///
/// Deterministic and fixed-length (64 hex chars), so the key doubles as a
/// file name inside the cache root. Speed participates via its decimal
/// rendering; any representational difference changes the key.
pub fn derive_key(text: &str, voice: &str, speed: f64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update([KEY_DELIMITER]);
    hasher.update(voice.as_bytes());
    hasher.update([KEY_DELIMITER]);
    hasher.update(speed.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Content-addressed store of finished telephony audio artifacts.
///
/// The store exclusively owns the files under its root; callers only ever
/// receive paths. Entries are written once and never mutated, and are
/// removed only by [`CacheStore::clear`].
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SynthesisError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| SynthesisError::CacheIo(format!("create {}: {e}", root.display())))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.wav"))
    }

    /// Look up a finished artifact. Absence is a miss, not an error.
    pub fn lookup(&self, key: &str) -> Option<PathBuf> {
        let path = self.entry_path(key);
        path.is_file().then_some(path)
    }

    /// Atomically publish `artifact` under `key`.
    ///
    /// The artifact is copied to a uniquely named staging file inside the
    /// cache root and renamed into place, so readers never observe a
    /// partial entry and racing duplicate puts each publish a complete
    /// artifact (last rename wins).
    pub fn put(&self, key: &str, artifact: &Path) -> Result<PathBuf, SynthesisError> {
        let target = self.entry_path(key);
        let staging = tempfile::Builder::new()
            .prefix(".stage-")
            .tempfile_in(&self.root)
            .map_err(|e| {
                SynthesisError::CacheIo(format!("stage in {}: {e}", self.root.display()))
            })?;
        fs::copy(artifact, staging.path()).map_err(|e| {
            SynthesisError::CacheIo(format!(
                "stage {} -> {}: {e}",
                artifact.display(),
                staging.path().display()
            ))
        })?;
        staging.persist(&target).map_err(|e| {
            SynthesisError::CacheIo(format!("publish {}: {e}", target.display()))
        })?;
        debug!(key, path = %target.display(), "cache entry published");
        Ok(target)
    }

    /// Delete every entry and recreate an empty store, returning how many
    /// artifacts were removed. Eventually-consistent with respect to
    /// concurrent puts.
    pub fn clear(&self) -> Result<usize, SynthesisError> {
        let count = fs::read_dir(&self.root)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().is_some_and(|x| x == "wav"))
                    .count()
            })
            .unwrap_or(0);
        fs::remove_dir_all(&self.root)
            .map_err(|e| SynthesisError::CacheIo(format!("clear {}: {e}", self.root.display())))?;
        fs::create_dir_all(&self.root)
            .map_err(|e| SynthesisError::CacheIo(format!("recreate {}: {e}", self.root.display())))?;
        info!(count, "audio cache cleared");
        Ok(count)
    }
}
