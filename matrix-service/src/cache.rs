// Cache Store
// Key -> snapshot store with prefix-fallback restore and atomic save

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use thiserror::Error;

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Errors from cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache key '{0}' already exists")]
    WriteConflict(String),

    #[error("invalid glob pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration for the cache store
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory holding every namespace
    pub cache_dir: PathBuf,

    /// Namespace separating unrelated key spaces (e.g. "pip")
    pub namespace: String,

    /// If true, saving to an existing key is a conflict instead of a no-op
    pub strict: bool,
}

/// Outcome of a restore attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restore {
    /// An entry was copied into the destination
    Hit {
        /// The key that matched (may differ from the requested key when a
        /// fallback prefix matched)
        key: String,
        /// Whether the requested key matched exactly
        exact: bool,
    },
    /// No entry matched; local state is untouched
    Miss,
}

impl Restore {
    pub fn is_hit(&self) -> bool {
        matches!(self, Restore::Hit { .. })
    }
}

/// Filesystem cache store.
///
/// Entries live at `<cache_dir>/<namespace>/<key>/` and hold the snapshot
/// of the saved paths with their relative layout preserved. Saves go
/// through a temp directory and an atomic rename, so concurrent cells
/// never observe a partial entry and the first writer wins.
pub struct CacheStore {
    config: CacheConfig,
}

impl CacheStore {
    pub fn new(cache_dir: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            config: CacheConfig {
                cache_dir: cache_dir.into(),
                namespace: namespace.into(),
                strict: false,
            },
        }
    }

    pub fn with_config(config: CacheConfig) -> Self {
        Self { config }
    }

    /// Turn save-on-existing-key into a `WriteConflict` error
    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict = strict;
        self
    }

    fn namespace_dir(&self) -> PathBuf {
        self.config.cache_dir.join(&self.config.namespace)
    }

    fn entry_dir(&self, key: &str) -> PathBuf {
        self.namespace_dir().join(sanitize_key(key))
    }

    /// Restore a cache entry into `dest`.
    ///
    /// Tries the exact key first; on a miss, each fallback prefix in order,
    /// taking the most recently saved entry whose key starts with the
    /// prefix. A total miss is a normal outcome, never an error.
    pub fn restore(
        &self,
        key: &str,
        fallback_prefixes: &[String],
        dest: &Path,
    ) -> Result<Restore, CacheError> {
        let exact = self.entry_dir(key);
        if exact.is_dir() {
            copy_tree(&exact, dest)?;
            return Ok(Restore::Hit {
                key: key.to_string(),
                exact: true,
            });
        }

        let namespace_dir = self.namespace_dir();
        if !namespace_dir.is_dir() {
            return Ok(Restore::Miss);
        }

        for prefix in fallback_prefixes {
            if let Some((matched_key, path)) = self.latest_with_prefix(&namespace_dir, prefix)? {
                copy_tree(&path, dest)?;
                return Ok(Restore::Hit {
                    key: matched_key,
                    exact: false,
                });
            }
        }

        Ok(Restore::Miss)
    }

    fn latest_with_prefix(
        &self,
        namespace_dir: &Path,
        prefix: &str,
    ) -> Result<Option<(String, PathBuf)>, CacheError> {
        let prefix = sanitize_key(prefix);
        let mut best: Option<(SystemTime, String, PathBuf)> = None;

        for entry in fs::read_dir(namespace_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !name.starts_with(&prefix) {
                continue;
            }
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let modified = entry
                .metadata()?
                .modified()
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let newer = match &best {
                Some((best_time, best_name, _)) => {
                    modified > *best_time || (modified == *best_time && name > *best_name)
                }
                None => true,
            };
            if newer {
                best = Some((modified, name.clone(), entry.path()));
            }
        }

        Ok(best.map(|(_, name, path)| (name, path)))
    }

    /// Save a snapshot of `paths` (relative to `base`) under `key`.
    ///
    /// Returns `Ok(true)` if the entry was written, `Ok(false)` if another
    /// writer already owns the key (idempotent, first writer wins). With
    /// the strict policy the latter is a `WriteConflict` error instead.
    pub fn save(&self, key: &str, paths: &[String], base: &Path) -> Result<bool, CacheError> {
        let entry = self.entry_dir(key);
        if entry.exists() {
            return self.existing_key(key);
        }

        let namespace_dir = self.namespace_dir();
        fs::create_dir_all(&namespace_dir)?;

        // Concurrent pipelines may save the same key; each attempt stages
        // into its own directory so no writer can disturb a sibling
        let attempt = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        let staging = namespace_dir.join(format!(
            ".tmp-{}-{}-{}",
            sanitize_key(key),
            std::process::id(),
            attempt
        ));
        fs::create_dir_all(&staging)?;

        for relative in paths {
            let src = base.join(relative);
            if !src.exists() {
                continue;
            }
            copy_path(&src, &staging.join(relative))?;
        }

        match fs::rename(&staging, &entry) {
            Ok(()) => Ok(true),
            Err(err) => {
                let _ = fs::remove_dir_all(&staging);
                if entry.exists() {
                    // Lost the race to a concurrent writer
                    self.existing_key(key)
                } else {
                    Err(err.into())
                }
            }
        }
    }

    fn existing_key(&self, key: &str) -> Result<bool, CacheError> {
        if self.config.strict {
            Err(CacheError::WriteConflict(key.to_string()))
        } else {
            Ok(false)
        }
    }
}

/// Hash the contents of every file matching `patterns` under `base`.
///
/// Files are hashed in sorted path order so the digest is stable. Returns
/// `None` when no file matches.
pub fn hash_files(base: &Path, patterns: &[String]) -> Result<Option<String>, CacheError> {
    let mut files = Vec::new();
    for pattern in patterns {
        let full = base.join(pattern).to_string_lossy().into_owned();
        let matches = glob::glob(&full).map_err(|e| CacheError::Pattern {
            pattern: pattern.clone(),
            message: e.msg.to_string(),
        })?;
        for entry in matches {
            let path = entry.map_err(|e| CacheError::Io(e.into()))?;
            if path.is_file() {
                files.push(path);
            }
        }
    }

    if files.is_empty() {
        return Ok(None);
    }
    files.sort();
    files.dedup();

    let mut hasher = Sha256::new();
    for file in &files {
        hasher.update(fs::read(file)?);
    }
    let digest = hasher.finalize();
    Ok(Some(hex::encode(&digest[..8])))
}

/// Keys become directory names; anything path-hostile maps to '_'
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn copy_path(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() {
        copy_tree(src, dst)
    } else {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst).map(|_| ())
    }
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
