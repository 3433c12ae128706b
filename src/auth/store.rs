/// Token persistence: process memory or an on-disk cache shared across restarts
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;

use super::token::AuthToken;
use crate::error::ConfigError;
use crate::utils::generate_id;

/// Which TokenStore variant to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenCacheMode {
    Memory,
    Disk,
}

impl FromStr for TokenCacheMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "" => Ok(TokenCacheMode::Memory),
            "disk" => Ok(TokenCacheMode::Disk),
            other => Err(ConfigError::ValidationError(format!(
                "Invalid auth cache mode '{}': expected memory or disk",
                other
            ))),
        }
    }
}

impl fmt::Display for TokenCacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenCacheMode::Memory => write!(f, "memory"),
            TokenCacheMode::Disk => write!(f, "disk"),
        }
    }
}

/// A token together with the credentials fingerprint it was issued for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub token: AuthToken,
}

#[derive(Debug, Error)]
pub enum TokenStoreError {
    /// The cache file exists but does not hold a valid entry
    #[error("token cache corrupted: {0}")]
    CacheCorrupted(String),

    #[error("token cache IO error: {0}")]
    Io(#[from] io::Error),
}

/// Pluggable token persistence, selected once at construction
#[derive(Debug)]
pub enum TokenStore {
    Memory(MemoryTokenStore),
    Disk(DiskTokenStore),
}

impl TokenStore {
    pub fn memory() -> Self {
        TokenStore::Memory(MemoryTokenStore::default())
    }

    pub fn disk<P: Into<PathBuf>>(root: P) -> Self {
        TokenStore::Disk(DiskTokenStore::new(root))
    }

    pub fn mode(&self) -> TokenCacheMode {
        match self {
            TokenStore::Memory(_) => TokenCacheMode::Memory,
            TokenStore::Disk(_) => TokenCacheMode::Disk,
        }
    }

    /// Cached token for `fingerprint`. Corrupted or unreadable caches are a miss.
    pub async fn load(&self, fingerprint: &str) -> Option<AuthToken> {
        let result = match self {
            TokenStore::Memory(store) => Ok(store.load(fingerprint)),
            TokenStore::Disk(store) => store.load(fingerprint).await,
        };

        match result {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable token cache");
                None
            }
        }
    }

    pub async fn save(&self, fingerprint: &str, token: &AuthToken) -> Result<(), TokenStoreError> {
        match self {
            TokenStore::Memory(store) => {
                store.save(fingerprint, token);
                Ok(())
            }
            TokenStore::Disk(store) => store.save(fingerprint, token).await,
        }
    }

    pub async fn clear(&self, fingerprint: &str) -> Result<(), TokenStoreError> {
        match self {
            TokenStore::Memory(store) => {
                store.clear(fingerprint);
                Ok(())
            }
            TokenStore::Disk(store) => store.clear(fingerprint).await,
        }
    }
}

/// Lost on restart; never shared between processes
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryTokenStore {
    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn load(&self, fingerprint: &str) -> Option<AuthToken> {
        self.entries()
            .get(fingerprint)
            .filter(|entry| entry.fingerprint == fingerprint)
            .map(|entry| entry.token.clone())
    }

    fn save(&self, fingerprint: &str, token: &AuthToken) {
        self.entries().insert(
            fingerprint.to_string(),
            CacheEntry {
                fingerprint: fingerprint.to_string(),
                token: token.clone(),
            },
        );
    }

    fn clear(&self, fingerprint: &str) {
        self.entries().remove(fingerprint);
    }
}

/// One JSON file per credentials fingerprint under `root`.
///
/// Writes go to a unique temp file in the same directory and are renamed
/// into place, so readers see either the old entry or the new one.
#[derive(Debug, Clone)]
pub struct DiskTokenStore {
    root: PathBuf,
}

impl DiskTokenStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic cache path for a fingerprint
    pub fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.root.join(format!("{}.json", fingerprint))
    }

    async fn load(&self, fingerprint: &str) -> Result<Option<AuthToken>, TokenStoreError> {
        let path = self.path_for(fingerprint);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: CacheEntry = serde_json::from_slice(&bytes)
            .map_err(|e| TokenStoreError::CacheCorrupted(format!("{}: {}", path.display(), e)))?;

        if entry.fingerprint != fingerprint {
            tracing::debug!(path = %path.display(), "Token cache entry belongs to other credentials");
            return Ok(None);
        }

        Ok(Some(entry.token))
    }

    async fn save(&self, fingerprint: &str, token: &AuthToken) -> Result<(), TokenStoreError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let entry = CacheEntry {
            fingerprint: fingerprint.to_string(),
            token: token.clone(),
        };
        let body = serde_json::to_vec(&entry)
            .map_err(|e| TokenStoreError::CacheCorrupted(e.to_string()))?;

        let target = self.path_for(fingerprint);
        let prefix = &fingerprint[..fingerprint.len().min(16)];
        let temp = self.root.join(format!(".{}.tmp", generate_id(prefix)));

        tokio::fs::write(&temp, &body).await?;
        restrict_permissions(&temp).await?;
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        tracing::debug!(path = %target.display(), "Persisted auth token");
        Ok(())
    }

    async fn clear(&self, fingerprint: &str) -> Result<(), TokenStoreError> {
        match tokio::fs::remove_file(self.path_for(fingerprint)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::unix_now;
    use tempfile::TempDir;

    fn token(value: &str) -> AuthToken {
        AuthToken::new(value, unix_now(), 3600)
    }

    #[test]
    fn test_cache_mode_parsing() {
        assert_eq!("disk".parse::<TokenCacheMode>().unwrap(), TokenCacheMode::Disk);
        assert_eq!("Memory".parse::<TokenCacheMode>().unwrap(), TokenCacheMode::Memory);
        assert!("sqlite".parse::<TokenCacheMode>().is_err());
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = TokenStore::memory();
        assert_eq!(store.mode(), TokenCacheMode::Memory);
        assert!(store.load("fp").await.is_none());

        store.save("fp", &token("abc")).await.unwrap();
        assert_eq!(store.load("fp").await.unwrap().secret(), "abc");
        assert!(store.load("other").await.is_none());

        store.clear("fp").await.unwrap();
        assert!(store.load("fp").await.is_none());
    }

    #[tokio::test]
    async fn test_disk_store_survives_new_instance() {
        let dir = TempDir::new().unwrap();
        let first = TokenStore::disk(dir.path());
        first.save("fp1", &token("persisted")).await.unwrap();

        let second = TokenStore::disk(dir.path());
        let loaded = second.load("fp1").await.unwrap();
        assert_eq!(loaded.secret(), "persisted");
        assert!(second.load("fp2").await.is_none());
    }

    #[tokio::test]
    async fn test_disk_store_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::disk(dir.path());
        store.save("fp", &token("one")).await.unwrap();
        store.save("fp", &token("two")).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["fp.json".to_string()]);
        assert_eq!(store.load("fp").await.unwrap().secret(), "two");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_never_see_partial_writes() {
        let dir = TempDir::new().unwrap();
        let disk = DiskTokenStore::new(dir.path());
        disk.save("fp", &token("initial")).await.unwrap();

        let writer = {
            let disk = disk.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    // Vary the length so a torn write would not parse
                    let value = format!("token-{}-{}", i, "x".repeat(i % 37));
                    disk.save("fp", &token(&value)).await.unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let disk = disk.clone();
                tokio::spawn(async move {
                    let mut reads = 0;
                    for _ in 0..300 {
                        match disk.load("fp").await {
                            Ok(Some(_)) => reads += 1,
                            Ok(None) => panic!("cache entry vanished during rewrite"),
                            Err(e) => panic!("reader observed a partial write: {}", e),
                        }
                        tokio::task::yield_now().await;
                    }
                    reads
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            assert_eq!(reader.await.unwrap(), 300);
        }
        assert!(disk.load("fp").await.unwrap().unwrap().secret().starts_with("token-199-"));
    }

    #[tokio::test]
    async fn test_corrupted_cache_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let disk = DiskTokenStore::new(dir.path());
        std::fs::write(disk.path_for("fp"), b"{not json").unwrap();

        assert!(matches!(
            disk.load("fp").await,
            Err(TokenStoreError::CacheCorrupted(_))
        ));

        let store = TokenStore::Disk(disk);
        assert!(store.load("fp").await.is_none());
    }

    #[tokio::test]
    async fn test_entry_for_other_credentials_is_ignored() {
        let dir = TempDir::new().unwrap();
        let disk = DiskTokenStore::new(dir.path());
        let foreign = CacheEntry {
            fingerprint: "someone-else".to_string(),
            token: token("foreign"),
        };
        std::fs::write(disk.path_for("fp"), serde_json::to_vec(&foreign).unwrap()).unwrap();

        assert!(TokenStore::Disk(disk).load("fp").await.is_none());
    }

    #[tokio::test]
    async fn test_clear_missing_file_is_ok() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::disk(dir.path().join("nested"));
        assert!(store.clear("fp").await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cache_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let disk = DiskTokenStore::new(dir.path());
        let path = disk.path_for("fp");
        TokenStore::Disk(disk).save("fp", &token("abc")).await.unwrap();

        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
