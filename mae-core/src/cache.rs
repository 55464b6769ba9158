use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{EngineError, Result};
use crate::model::{
    AssetContainerType, CacheManifest, CacheManifestEntry, ContainerFingerprint, ScanSnapshot,
};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 2;

/// Persistent snapshot store keyed by `(instance path, source toggle set)`.
///
/// One JSON file per key plus a manifest for LRU pruning. Writes are atomic
/// (temp file + rename) and the whole directory is serialized across
/// processes with an exclusive lock file.
pub struct ScanCache {
    root: PathBuf,
    max_bytes: u64,
}

impl ScanCache {
    pub fn new(root: PathBuf, max_bytes: u64) -> Self {
        Self { root, max_bytes }
    }

    pub fn cache_key(
        prism_root: &Path,
        instance_folder: &str,
        include_vanilla: bool,
        include_mods: bool,
        include_resourcepacks: bool,
    ) -> String {
        format!(
            "{}::{}::{}{}{}",
            prism_root.to_string_lossy(),
            instance_folder.trim(),
            if include_vanilla { 'v' } else { '-' },
            if include_mods { 'm' } else { '-' },
            if include_resourcepacks { 'r' } else { '-' },
        )
    }

    /// Loads the snapshot for a key. Every failure mode (missing file,
    /// unreadable JSON, schema mismatch) degrades to a miss; corrupt files
    /// are removed so the next scan rewrites them.
    pub fn load(&self, cache_key: &str) -> Option<ScanSnapshot> {
        let _lock = match self.lock() {
            Ok(lock) => lock,
            Err(error) => {
                warn!(error = %error, "scan cache unavailable, treating as miss");
                return None;
            }
        };

        let snapshot_path = self.snapshot_path(cache_key);
        if !snapshot_path.is_file() {
            return None;
        }

        let data = match fs::read_to_string(&snapshot_path) {
            Ok(data) => data,
            Err(error) => {
                warn!(path = %snapshot_path.display(), error = %error, "unreadable snapshot, discarding");
                self.discard(cache_key);
                return None;
            }
        };

        let snapshot: ScanSnapshot = match serde_json::from_str(&data) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(path = %snapshot_path.display(), error = %error, "corrupt snapshot, discarding");
                self.discard(cache_key);
                return None;
            }
        };

        if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
            debug!(
                found = snapshot.schema_version,
                expected = SNAPSHOT_SCHEMA_VERSION,
                "snapshot schema mismatch, discarding"
            );
            self.discard(cache_key);
            return None;
        }

        self.touch_manifest(cache_key, &snapshot_path);
        Some(snapshot)
    }

    /// Writes a snapshot atomically and prunes the store down to its byte
    /// budget, evicting least-recently-used keys first.
    pub fn store(&self, snapshot: &ScanSnapshot) -> Result<()> {
        let _lock = self.lock()?;

        let snapshot_path = self.snapshot_path(&snapshot.cache_key);
        write_json_atomically(&snapshot_path, snapshot)?;

        let size_bytes = fs::metadata(&snapshot_path).map(|meta| meta.len()).unwrap_or(0);
        let mut manifest = self.load_manifest();
        manifest.entries.insert(
            snapshot.cache_key.clone(),
            CacheManifestEntry {
                file_name: snapshot_file_name(&snapshot.cache_key),
                size_bytes,
                last_accessed_at: unix_timestamp_ms(),
            },
        );
        self.prune(&mut manifest);
        self.save_manifest(&manifest)
    }

    fn lock(&self) -> Result<CacheDirLock> {
        fs::create_dir_all(&self.root).map_err(|error| {
            EngineError::Cache(format!(
                "Failed to create cache directory {}: {error}",
                self.root.display()
            ))
        })?;

        let lock_path = self.root.join(".lock");
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|error| {
                EngineError::Cache(format!(
                    "Failed to open cache lock {}: {error}",
                    lock_path.display()
                ))
            })?;

        file.lock_exclusive().map_err(|error| {
            EngineError::Cache(format!("Failed to lock cache directory: {error}"))
        })?;

        Ok(CacheDirLock { file })
    }

    fn snapshot_path(&self, cache_key: &str) -> PathBuf {
        self.root.join(snapshot_file_name(cache_key))
    }

    fn discard(&self, cache_key: &str) {
        let _ = fs::remove_file(self.snapshot_path(cache_key));
        let mut manifest = self.load_manifest();
        if manifest.entries.remove(cache_key).is_some() {
            let _ = self.save_manifest(&manifest);
        }
    }

    fn touch_manifest(&self, cache_key: &str, snapshot_path: &Path) {
        let mut manifest = self.load_manifest();
        let entry = manifest
            .entries
            .entry(cache_key.to_string())
            .or_insert_with(|| CacheManifestEntry {
                file_name: snapshot_file_name(cache_key),
                size_bytes: fs::metadata(snapshot_path).map(|meta| meta.len()).unwrap_or(0),
                last_accessed_at: 0,
            });
        entry.last_accessed_at = unix_timestamp_ms();
        let _ = self.save_manifest(&manifest);
    }

    fn load_manifest(&self) -> CacheManifest {
        let manifest_path = self.root.join("manifest.json");
        if !manifest_path.is_file() {
            return empty_manifest();
        }

        let parsed = fs::read_to_string(&manifest_path)
            .ok()
            .and_then(|data| serde_json::from_str::<CacheManifest>(&data).ok());

        match parsed {
            Some(manifest) if manifest.schema_version == SNAPSHOT_SCHEMA_VERSION => manifest,
            _ => empty_manifest(),
        }
    }

    fn save_manifest(&self, manifest: &CacheManifest) -> Result<()> {
        write_json_atomically(&self.root.join("manifest.json"), manifest)
    }

    fn prune(&self, manifest: &mut CacheManifest) {
        let mut total: u64 = manifest.entries.values().map(|entry| entry.size_bytes).sum();
        if total <= self.max_bytes {
            return;
        }

        let mut eviction_order: Vec<(String, u64)> = manifest
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.last_accessed_at))
            .collect();
        eviction_order.sort_by_key(|(_, last_accessed)| *last_accessed);

        for (key, _) in eviction_order {
            let Some(entry) = manifest.entries.remove(&key) else {
                continue;
            };
            let _ = fs::remove_file(self.root.join(&entry.file_name));
            debug!(cache_key = %key, "evicted scan snapshot");
            total = total.saturating_sub(entry.size_bytes);
            if total <= self.max_bytes {
                break;
            }
        }
    }
}

struct CacheDirLock {
    file: fs::File,
}

impl Drop for CacheDirLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

fn empty_manifest() -> CacheManifest {
    CacheManifest {
        schema_version: SNAPSHOT_SCHEMA_VERSION,
        entries: HashMap::new(),
    }
}

fn snapshot_file_name(cache_key: &str) -> String {
    format!("{:016x}.json", fnv1a64(cache_key.as_bytes()))
}

fn write_json_atomically<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let temp_path = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
    let bytes = serde_json::to_vec(value).map_err(|error| {
        EngineError::Cache(format!("Failed to serialize {}: {error}", path.display()))
    })?;
    fs::write(&temp_path, bytes).map_err(|error| {
        EngineError::Cache(format!("Failed to write {}: {error}", temp_path.display()))
    })?;
    fs::rename(&temp_path, path).map_err(|error| {
        EngineError::Cache(format!("Failed to replace {}: {error}", path.display()))
    })
}

pub fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

pub fn unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}

fn modified_ns(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|value| value.duration_since(UNIX_EPOCH).ok())
        .map(|value| value.as_nanos().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}

/// Cheap per-container invalidation token.
///
/// Files go by `(size, mtimeNs)` and only hash their bytes when the mtime is
/// absent or zero. Directories always hash their sorted
/// `(entryPath, size, mtimeNs)` listing — the listing walk is the stat.
pub fn fingerprint_container(
    container_path: &Path,
    container_type: AssetContainerType,
) -> Result<ContainerFingerprint> {
    let metadata = fs::metadata(container_path).map_err(|error| {
        EngineError::Container(format!(
            "Failed to stat container {}: {error}",
            container_path.display()
        ))
    })?;

    if container_type == AssetContainerType::Directory {
        let mut listing: Vec<(String, u64, u64)> = Vec::new();
        let mut total_size = 0u64;

        for entry in WalkDir::new(container_path)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let relative = entry
                .path()
                .strip_prefix(container_path)
                .map(|path| path.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();

            total_size = total_size.saturating_add(meta.len());
            listing.push((relative, meta.len(), modified_ns(&meta)));
        }

        listing.sort();
        let mut material = Vec::new();
        for (path, size, mtime) in &listing {
            material.extend_from_slice(path.as_bytes());
            material.push(0);
            material.extend_from_slice(&size.to_le_bytes());
            material.extend_from_slice(&mtime.to_le_bytes());
        }

        return Ok(ContainerFingerprint {
            path: container_path.to_string_lossy().to_string(),
            container_type,
            size: total_size,
            modified_ns: modified_ns(&metadata),
            content_hash: Some(format!("{:016x}", fnv1a64(&material))),
        });
    }

    let mtime = modified_ns(&metadata);
    let content_hash = if mtime == 0 {
        let bytes = fs::read(container_path).map_err(|error| {
            EngineError::Container(format!(
                "Failed to read container {}: {error}",
                container_path.display()
            ))
        })?;
        Some(format!("{:016x}", fnv1a64(&bytes)))
    } else {
        None
    };

    Ok(ContainerFingerprint {
        path: container_path.to_string_lossy().to_string(),
        container_type,
        size: metadata.len(),
        modified_ns: mtime,
        content_hash,
    })
}
