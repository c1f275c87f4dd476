//! File-based cache of extracted fragments.
//!
//! One JSON document per (source, compiler flags, prefix) key, named by the
//! key's xxh64 hash, with an in-memory front for the current run. An entry
//! is reused only when this tool version wrote it and its parse started
//! after the last modification of the source, every file it depended on
//! and the precompiled prefix.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use xxhash_rust::xxh64::xxh64;

use super::Fragment;
use crate::TOOL_VERSION;

pub struct FragmentCache {
    memory: RwLock<HashMap<String, CacheEntry>>,
    dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    tool_version: String,
    source: PathBuf,
    /// When parsing started, in nanoseconds since the Unix epoch. Files
    /// modified after this instant invalidate the entry.
    parsed_at: u64,
    fragment: Fragment,
}

impl FragmentCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            tracing::warn!(dir = %dir.display(), "cannot create fragment cache directory: {}", e);
        }
        Self {
            memory: RwLock::new(HashMap::new()),
            dir,
        }
    }

    /// Per-user cache location.
    pub fn default_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "stubsmith").map(|dirs| dirs.cache_dir().join("fragments"))
    }

    pub fn key(source: &Path, fingerprint: &str, prefix: Option<&Path>) -> String {
        let mut identity = source.to_string_lossy().into_owned();
        identity.push('\0');
        identity.push_str(fingerprint);
        identity.push('\0');
        if let Some(prefix) = prefix {
            identity.push_str(&prefix.to_string_lossy());
        }
        format!("{:016x}", xxh64(identity.as_bytes(), 0))
    }

    /// A fresh cached fragment, if any.
    pub fn get(&self, source: &Path, fingerprint: &str, prefix: Option<&Path>) -> Option<Fragment> {
        let key = Self::key(source, fingerprint, prefix);

        {
            let memory = self.memory.read().ok()?;
            if let Some(entry) = memory.get(&key) {
                if is_fresh(entry, prefix) {
                    return Some(entry.fragment.clone());
                }
            }
        }

        let entry = self.read_file(&key)?;
        if entry.source != source || !is_fresh(&entry, prefix) {
            tracing::debug!(source = %source.display(), "cached fragment is stale");
            return None;
        }
        let fragment = entry.fragment.clone();
        if let Ok(mut memory) = self.memory.write() {
            memory.insert(key, entry);
        }
        Some(fragment)
    }

    /// Store `fragment`, produced by a parse that began at `parsed_at`.
    pub fn put(
        &self,
        source: &Path,
        fingerprint: &str,
        prefix: Option<&Path>,
        fragment: &Fragment,
        parsed_at: SystemTime,
    ) {
        let key = Self::key(source, fingerprint, prefix);
        let entry = CacheEntry {
            tool_version: TOOL_VERSION.to_string(),
            source: source.to_path_buf(),
            parsed_at: nanos_since_epoch(parsed_at),
            fragment: fragment.clone(),
        };
        self.write_file(&key, &entry);
        if let Ok(mut memory) = self.memory.write() {
            memory.insert(key, entry);
        }
    }

    fn read_file(&self, key: &str) -> Option<CacheEntry> {
        let content = fs::read(self.file_path(key)).ok()?;
        match serde_json::from_slice::<CacheEntry>(&content) {
            Ok(mut entry) => {
                entry.fragment.model.reindex();
                Some(entry)
            }
            Err(e) => {
                tracing::debug!(key, "unreadable cache entry: {}", e);
                None
            }
        }
    }

    fn write_file(&self, key: &str, entry: &CacheEntry) {
        let path = self.file_path(key);
        let result = serde_json::to_vec(entry)
            .map_err(std::io::Error::from)
            .and_then(|bytes| fs::write(&path, bytes));
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), "cannot write cache entry: {}", e);
        }
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

fn is_fresh(entry: &CacheEntry, prefix: Option<&Path>) -> bool {
    if entry.tool_version != TOOL_VERSION {
        return false;
    }
    std::iter::once(entry.source.as_path())
        .chain(entry.fragment.dependencies.iter().map(PathBuf::as_path))
        .chain(prefix)
        .all(|file| match modified_nanos(file) {
            Some(modified) => modified < entry.parsed_at,
            None => false,
        })
}

fn modified_nanos(path: &Path) -> Option<u64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(nanos_since_epoch(modified))
}

fn nanos_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BindingModel;
    use tempfile::TempDir;

    fn fragment(deps: Vec<PathBuf>) -> Fragment {
        let mut model = BindingModel::new();
        model.module_entry("geo");
        Fragment {
            model,
            dependencies: deps,
        }
    }

    #[test]
    fn test_key_depends_on_flags_and_prefix() {
        let src = Path::new("w.cpp");
        let a = FragmentCache::key(src, "clang++ -std=c++17", None);
        let b = FragmentCache::key(src, "clang++ -std=c++20", None);
        let c = FragmentCache::key(src, "clang++ -std=c++17", Some(Path::new("all.pch")));
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, FragmentCache::key(src, "clang++ -std=c++17", None));
    }

    #[test]
    fn test_hit_from_disk_and_staleness() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("w.cpp");
        let header = temp.path().join("w.h");
        fs::write(&source, "int x;").unwrap();
        fs::write(&header, "#pragma once").unwrap();

        let dir = temp.path().join("cache");
        let cache = FragmentCache::new(&dir);
        std::thread::sleep(Duration::from_millis(20));
        cache.put(&source, "flags", None, &fragment(vec![header.clone()]), SystemTime::now());

        // A new cache over the same directory reads the entry from disk.
        let reopened = FragmentCache::new(&dir);
        let hit = reopened.get(&source, "flags", None).unwrap();
        assert!(hit.model.module("geo").is_some());
        assert!(reopened.get(&source, "other flags", None).is_none());

        std::thread::sleep(Duration::from_millis(20));
        fs::write(&header, "#pragma once\nint y;").unwrap();
        assert!(FragmentCache::new(&dir).get(&source, "flags", None).is_none());
    }

    #[test]
    fn test_missing_dependency_is_stale() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("w.cpp");
        fs::write(&source, "int x;").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let cache = FragmentCache::new(temp.path().join("cache"));
        cache.put(
            &source,
            "f",
            None,
            &fragment(vec![temp.path().join("gone.h")]),
            SystemTime::now(),
        );
        assert!(cache.get(&source, "f", None).is_none());
    }

    #[test]
    fn test_edit_during_parse_is_stale() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("w.cpp");
        fs::write(&source, "int x;").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let started = SystemTime::now();
        std::thread::sleep(Duration::from_millis(20));
        fs::write(&source, "int x, y;").unwrap();

        let cache = FragmentCache::new(temp.path().join("cache"));
        cache.put(&source, "f", None, &fragment(vec![]), started);
        assert!(cache.get(&source, "f", None).is_none());
    }
}
