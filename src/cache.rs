//! Content-addressable result store.
//!
//! One JSON file per key, stored flat in a single directory. Reads are
//! best-effort: anything that goes wrong while reading is a miss. Writes
//! go through a temp file and a rename, so a record is either absent or
//! complete even if the process dies mid-write.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::metadata::format_size;

/// Environment variable that pins the cache directory.
pub const CACHE_DIR_VAR: &str = "VISION_MARKDOWN_CACHE_DIR";
const APP_DIR: &str = "vision-markdown";
const KEY_DELIMITER: &str = "|";

/// Hex SHA-256 digest addressing one cache record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Every option that changes the rendered output. `None` and `Some("")`
/// are the same thing as far as the key is concerned.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyOptions<'a> {
    pub model: Option<&'a str>,
    pub prompt: Option<&'a str>,
    pub template: Option<&'a str>,
    pub note: Option<&'a str>,
    pub provider: Option<&'a str>,
}

/// Derive the cache key for one piece of content under one option set.
pub fn build_key(content_hash: &str, options: &KeyOptions<'_>) -> CacheKey {
    let parts = [
        content_hash,
        options.model.unwrap_or(""),
        options.prompt.unwrap_or(""),
        options.template.unwrap_or(""),
        options.note.unwrap_or(""),
        options.provider.unwrap_or(""),
    ];
    let mut hasher = Sha256::new();
    hasher.update(parts.join(KEY_DELIMITER).as_bytes());
    CacheKey(hex::encode(hasher.finalize()))
}

/// A stored, fully validated result.
///
/// Every field defaults on read so records written by older versions keep
/// deserializing when fields are added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheEntry {
    pub hash: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub category: String,
    pub style: String,
    pub mood: String,
    pub medium: String,
    pub composition: String,
    pub palette: String,
    pub subject: String,
    pub markdown: String,
    pub description: String,
    pub extracted_text: String,
    pub colors: String,
    pub tags: String,
    pub model: String,
    pub provider: String,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// Why a lookup produced nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheMiss {
    /// No record (or the directory could not be read).
    Missing,
    /// A record exists but does not parse.
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub count: usize,
    pub total_bytes: u64,
    pub human_size: String,
    pub location: PathBuf,
}

/// Directory-backed cache.
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    /// Cache rooted at an explicit directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache at the process-wide default location.
    pub fn open_default() -> Self {
        Self::at(default_location())
    }

    pub fn location(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.json", key.as_str()))
    }

    pub async fn get(&self, key: &CacheKey) -> std::result::Result<CacheEntry, CacheMiss> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(_) => return Err(CacheMiss::Missing),
        };
        serde_json::from_slice(&raw).map_err(|e| {
            warn!("Ignoring unreadable cache record {}: {}", path.display(), e);
            CacheMiss::Corrupt(e.to_string())
        })
    }

    /// Store `entry` under `key`, replacing any previous record.
    pub async fn set(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
        let write_err = |source: std::io::Error| Error::CacheWrite {
            key: key.to_string(),
            source,
        };

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(write_err)?;

        let json = serde_json::to_vec_pretty(entry)?;
        let target = self.path_for(key);
        let tmp = self
            .root
            .join(format!(".{}.{}.tmp", key.as_str(), uuid::Uuid::new_v4()));

        tokio::fs::write(&tmp, &json).await.map_err(write_err)?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }

        debug!("Cached {} ({} bytes)", key, json.len());
        Ok(())
    }

    /// Delete every record. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize> {
        let records = match self.records().await {
            Some(records) => records,
            None => return Ok(0),
        };

        let mut removed = 0;
        for (path, _) in records {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|source| Error::Io {
                    path: path.clone(),
                    source,
                })?;
            removed += 1;
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> CacheStats {
        let records = self.records().await.unwrap_or_default();
        let total_bytes: u64 = records.iter().map(|(_, len)| len).sum();
        CacheStats {
            count: records.len(),
            total_bytes,
            human_size: format_size(total_bytes),
            location: self.root.clone(),
        }
    }

    /// `(path, length)` of every `*.json` record, or `None` when the
    /// directory does not exist.
    async fn records(&self) -> Option<Vec<(PathBuf, u64)>> {
        let mut dir = tokio::fs::read_dir(&self.root).await.ok()?;
        let mut out = Vec::new();
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let len = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta.len(),
                _ => continue,
            };
            out.push((path, len));
        }
        Some(out)
    }
}

/// The default cache directory, resolved on first use and fixed for the
/// rest of the process.
pub fn default_location() -> PathBuf {
    static LOCATION: OnceLock<PathBuf> = OnceLock::new();
    LOCATION
        .get_or_init(|| {
            resolve_location(
                std::env::var_os(CACHE_DIR_VAR).map(PathBuf::from),
                std::env::var_os("XDG_CACHE_HOME").map(PathBuf::from),
                dirs::cache_dir(),
            )
        })
        .clone()
}

/// Override → XDG cache home → platform cache dir → local fallback.
pub fn resolve_location(
    override_dir: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    platform_cache: Option<PathBuf>,
) -> PathBuf {
    let non_empty = |p: &PathBuf| !p.as_os_str().is_empty();

    if let Some(dir) = override_dir.filter(non_empty) {
        return dir;
    }
    if let Some(home) = xdg_cache_home.filter(non_empty) {
        return home.join(APP_DIR);
    }
    match platform_cache {
        Some(dir) => dir.join(APP_DIR),
        None => PathBuf::from(format!(".{}-cache", APP_DIR)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(hash: &str) -> CacheEntry {
        CacheEntry {
            hash: hash.to_string(),
            kind: "photo".into(),
            subject: "A cat".into(),
            markdown: "# A cat\n".into(),
            tags: "cat, mat".into(),
            model: "m".into(),
            created_at: "2024-01-01T00:00:00Z".into(),
            ..Default::default()
        }
    }

    #[test]
    fn key_is_hex_sha256() {
        let key = build_key("abc", &KeyOptions::default());
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn unset_and_empty_options_share_a_key() {
        let unset = build_key("h", &KeyOptions::default());
        let empty = build_key(
            "h",
            &KeyOptions {
                model: Some(""),
                prompt: Some(""),
                template: Some(""),
                note: Some(""),
                provider: Some(""),
            },
        );
        assert_eq!(unset, empty);
    }

    #[test]
    fn every_option_changes_the_key() {
        let base = KeyOptions {
            model: Some("m"),
            prompt: Some("p"),
            template: Some("t"),
            note: Some("n"),
            provider: Some("x"),
        };
        let reference = build_key("h", &base);
        assert_eq!(reference, build_key("h", &base));

        let variants = [
            KeyOptions { model: Some("m2"), ..base },
            KeyOptions { prompt: Some("p2"), ..base },
            KeyOptions { template: Some("t2"), ..base },
            KeyOptions { note: Some("n2"), ..base },
            KeyOptions { provider: Some("x2"), ..base },
        ];
        for variant in &variants {
            assert_ne!(reference, build_key("h", variant));
        }
        assert_ne!(reference, build_key("other-hash", &base));
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let cache = Cache::at(dir.path().join("nested"));
        let key = build_key("h1", &KeyOptions::default());

        cache.set(&key, &entry("h1")).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), entry("h1"));
        assert!(dir
            .path()
            .join("nested")
            .join(format!("{}.json", key))
            .exists());
    }

    #[tokio::test]
    async fn set_overwrites_wholesale() {
        let dir = tempdir().unwrap();
        let cache = Cache::at(dir.path());
        let key = build_key("h", &KeyOptions::default());

        cache.set(&key, &entry("first")).await.unwrap();
        cache.set(&key, &entry("second")).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap().hash, "second");
        assert_eq!(cache.stats().await.count, 1);
    }

    #[tokio::test]
    async fn missing_and_corrupt_records_are_misses() {
        let dir = tempdir().unwrap();
        let cache = Cache::at(dir.path());
        let key = build_key("h", &KeyOptions::default());
        assert_eq!(cache.get(&key).await, Err(CacheMiss::Missing));

        std::fs::write(dir.path().join(format!("{}.json", key)), "{not json").unwrap();
        assert!(matches!(cache.get(&key).await, Err(CacheMiss::Corrupt(_))));
    }

    #[tokio::test]
    async fn older_records_missing_fields_still_load() {
        let dir = tempdir().unwrap();
        let cache = Cache::at(dir.path());
        let key = build_key("h", &KeyOptions::default());
        std::fs::write(
            dir.path().join(format!("{}.json", key)),
            r##"{"hash":"h","type":"photo","markdown":"# x\n"}"##,
        )
        .unwrap();

        let loaded = cache.get(&key).await.unwrap();
        assert_eq!(loaded.kind, "photo");
        assert_eq!(loaded.provider, "");
    }

    #[tokio::test]
    async fn clear_removes_exactly_what_was_written() {
        let dir = tempdir().unwrap();
        let cache = Cache::at(dir.path());
        let keys: Vec<CacheKey> = (0..3)
            .map(|i| build_key(&format!("h{}", i), &KeyOptions::default()))
            .collect();
        for key in &keys {
            cache.set(key, &entry("x")).await.unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        assert_eq!(cache.clear().await.unwrap(), 3);
        for key in &keys {
            assert_eq!(cache.get(key).await, Err(CacheMiss::Missing));
        }
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn clear_and_stats_tolerate_missing_directory() {
        let dir = tempdir().unwrap();
        let cache = Cache::at(dir.path().join("never-created"));
        assert_eq!(cache.clear().await.unwrap(), 0);
        let stats = cache.stats().await;
        assert_eq!(stats.count, 0);
        assert_eq!(stats.human_size, "0 B");
    }

    #[tokio::test]
    async fn stats_sum_record_sizes() {
        let dir = tempdir().unwrap();
        let cache = Cache::at(dir.path());
        cache
            .set(&build_key("a", &KeyOptions::default()), &entry("a"))
            .await
            .unwrap();
        let stats = cache.stats().await;
        assert_eq!(stats.count, 1);
        assert!(stats.total_bytes > 0);
        assert_eq!(stats.location, dir.path());
    }

    #[test]
    fn location_resolution_order() {
        let over = Some(PathBuf::from("/override"));
        let xdg = Some(PathBuf::from("/xdg"));
        let platform = Some(PathBuf::from("/platform"));

        assert_eq!(
            resolve_location(over, xdg.clone(), platform.clone()),
            PathBuf::from("/override")
        );
        assert_eq!(
            resolve_location(None, xdg, platform.clone()),
            PathBuf::from("/xdg/vision-markdown")
        );
        assert_eq!(
            resolve_location(Some(PathBuf::new()), None, platform),
            PathBuf::from("/platform/vision-markdown")
        );
    }

    #[test]
    fn default_location_is_stable() {
        assert_eq!(default_location(), default_location());
    }
}
