//! Include-once URL cache.
//!
//! Each URL maps to one file under `<root>/urlcache/`, named by the hex MD5
//! of the URL. The disk is the only cache layer so deduplication survives
//! process restarts. One processor per cache root is assumed.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tracing::debug;

use crate::error::{Result, UserDataError};

/// Upper bound on the length of a cache file name.
const MAX_INCLUDE_FN_LEN: usize = 64;

const CACHE_SUBDIR: &str = "urlcache";

/// Permissions for cached include content (owner read/write only).
const CACHE_FILE_MODE: u32 = 0o600;

/// Cache of fetched include-once content, rooted at a directory.
#[derive(Debug, Clone)]
pub struct IncludeCache {
    root: PathBuf,
}

impl IncludeCache {
    /// `root` is the data directory; entries live under `root/urlcache`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache file path for a URL.
    pub fn path_for(&self, url: &str) -> PathBuf {
        self.root.join(CACHE_SUBDIR).join(cache_key(url))
    }

    /// Whether content for `url` has been cached.
    pub fn contains(&self, url: &str) -> bool {
        self.path_for(url).is_file()
    }

    /// Cached content for `url`, or `None` if not cached.
    pub fn load(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(url);
        if !path.is_file() {
            return Ok(None);
        }
        let data = fs::read(&path).map_err(|e| UserDataError::io(&path, e))?;
        debug!(url, path = %path.display(), bytes = data.len(), "Include cache hit");
        Ok(Some(data))
    }

    /// Persist content for `url`, creating the cache directory as needed.
    pub fn store(&self, url: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(url);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| UserDataError::io(parent, e))?;
        }
        write_private(&path, content).map_err(|e| UserDataError::io(&path, e))?;
        debug!(url, path = %path.display(), bytes = content.len(), "Stored include in cache");
        Ok(path)
    }
}

/// Hex MD5 of the URL, capped at [`MAX_INCLUDE_FN_LEN`] characters.
pub fn cache_key(url: &str) -> String {
    let digest = Md5::digest(url.as_bytes());
    let mut hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex.truncate(MAX_INCLUDE_FN_LEN);
    hex
}

#[cfg(unix)]
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(CACHE_FILE_MODE)
        .open(path)?;
    // `mode` only applies on creation; tighten pre-existing files too.
    file.set_permissions(fs::Permissions::from_mode(CACHE_FILE_MODE))?;
    file.write_all(content)
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let _ = CACHE_FILE_MODE;
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(content)
}
