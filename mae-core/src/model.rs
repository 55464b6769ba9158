use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssetSourceType {
    Vanilla,
    Mod,
    ResourcePack,
}

impl AssetSourceType {
    /// Top-level tree segment for this source family; also the first path
    /// segment of exported files.
    pub fn tree_root_name(&self) -> &'static str {
        match self {
            AssetSourceType::Vanilla => "vanilla",
            AssetSourceType::Mod => "mods",
            AssetSourceType::ResourcePack => "resourcepacks",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssetContainerType {
    Directory,
    Zip,
    Jar,
    AssetIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    pub asset_id: String,
    pub key: String,
    pub source_type: AssetSourceType,
    pub source_name: String,
    pub namespace: String,
    pub relative_asset_path: String,
    pub extension: String,
    pub is_image: bool,
    pub is_audio: bool,
    pub container_path: String,
    pub container_type: AssetContainerType,
    pub entry_path: String,
}

impl AssetRecord {
    /// Final path segment, used for tree leaves and export file names.
    pub fn file_name(&self) -> String {
        self.relative_asset_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_asset_path)
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TreeNodeType {
    Folder,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: String,
    pub name: String,
    pub node_type: TreeNodeType,
    pub has_children: bool,
    pub asset_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanLifecycle {
    Scanning,
    Completed,
    Cancelled,
    Error,
}

impl ScanLifecycle {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScanLifecycle::Scanning)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    Estimating,
    Scanning,
    Refreshing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Original,
    Mp3,
    Wav,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExportKind {
    Save,
    Copy,
}

/// One scannable unit produced by discovery. Immutable for the scan's life.
#[derive(Debug, Clone)]
pub struct ScanContainer {
    pub source_type: AssetSourceType,
    pub source_name: String,
    pub container_type: AssetContainerType,
    pub container_path: PathBuf,
}

impl ScanContainer {
    pub fn path_key(&self) -> String {
        self.container_path.to_string_lossy().to_string()
    }
}

/// Cheap invalidation token for one container.
///
/// Plain files fingerprint by size and mtime; directories hash their sorted
/// `(entryPath, size, mtimeNs)` listing. `content_hash` is only computed for
/// files when the mtime is missing or zero and the stat check is ambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerFingerprint {
    pub path: String,
    pub container_type: AssetContainerType,
    pub size: u64,
    pub modified_ns: u64,
    pub content_hash: Option<String>,
}

// --- wire DTOs (command surface) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrismRootCandidate {
    pub path: String,
    pub exists: bool,
    pub valid: bool,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub folder_name: String,
    pub display_name: String,
    pub path: String,
    pub minecraft_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartScanRequest {
    pub prism_root: String,
    pub instance_folder: String,
    pub include_vanilla: bool,
    pub include_mods: bool,
    pub include_resourcepacks: bool,
    pub force_rescan: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartScanResponse {
    pub scan_id: String,
    pub cache_hit: bool,
    pub refresh_started: bool,
    pub refresh_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatus {
    pub scan_id: String,
    pub lifecycle: ScanLifecycle,
    pub is_refreshing: bool,
    pub scanned_containers: usize,
    pub total_containers: usize,
    pub asset_count: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub scan_id: String,
    pub query: String,
    pub folder_node_id: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub include_images: Option<bool>,
    pub include_audio: Option<bool>,
    pub include_other: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub total: usize,
    pub assets: Vec<AssetRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTreeChildrenRequest {
    pub scan_id: String,
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetPreviewResponse {
    pub mime: String,
    pub base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileAssetIdsRequest {
    pub scan_id: String,
    pub asset_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileAssetIdsResponse {
    pub id_map: HashMap<String, String>,
    pub asset_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveAssetsRequest {
    pub scan_id: String,
    pub asset_ids: Vec<String>,
    pub destination_dir: String,
    pub audio_format: Option<AudioFormat>,
    pub operation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyAssetsRequest {
    pub scan_id: String,
    pub asset_ids: Vec<String>,
    pub audio_format: Option<AudioFormat>,
    pub operation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFailure {
    pub asset_id: String,
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveAssetsResult {
    pub operation_id: String,
    pub requested_count: usize,
    pub processed_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub cancelled: bool,
    pub failures: Vec<ExportFailure>,
    pub saved_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyResult {
    pub operation_id: String,
    pub requested_count: usize,
    pub processed_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub cancelled: bool,
    pub failures: Vec<ExportFailure>,
    pub copied_files: Vec<String>,
}

// --- persisted snapshot ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSnapshot {
    pub schema_version: u32,
    pub cache_key: String,
    pub prism_root: String,
    pub instance_folder: String,
    pub include_vanilla: bool,
    pub include_mods: bool,
    pub include_resourcepacks: bool,
    pub created_at: u64,
    pub app_version: String,
    pub assets: Vec<AssetRecord>,
    /// Records grouped by container path, in container order inside each
    /// bucket. Lets a refresh drop or replace one container's records.
    pub container_records: HashMap<String, Vec<AssetRecord>>,
    pub fingerprints: HashMap<String, ContainerFingerprint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheManifest {
    pub schema_version: u32,
    pub entries: HashMap<String, CacheManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheManifestEntry {
    pub file_name: String,
    pub size_bytes: u64,
    pub last_accessed_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_enums_serialize_their_wire_values() {
        assert_eq!(
            serde_json::to_value(AssetSourceType::ResourcePack).unwrap(),
            "resourcePack"
        );
        assert_eq!(
            serde_json::to_value(AssetContainerType::AssetIndex).unwrap(),
            "assetIndex"
        );
        assert_eq!(serde_json::to_value(AudioFormat::Mp3).unwrap(), "mp3");
        assert_eq!(serde_json::to_value(ScanPhase::Refreshing).unwrap(), "refreshing");
        assert_eq!(
            serde_json::to_value(ScanLifecycle::Cancelled).unwrap(),
            "cancelled"
        );
    }

    #[test]
    fn asset_record_round_trips_camel_case() {
        let record = AssetRecord {
            asset_id: "abc".into(),
            key: "pack / minecraft / textures/block/stone.png".into(),
            source_type: AssetSourceType::Mod,
            source_name: "pack".into(),
            namespace: "minecraft".into(),
            relative_asset_path: "textures/block/stone.png".into(),
            extension: "png".into(),
            is_image: true,
            is_audio: false,
            container_path: "/tmp/pack.jar".into(),
            container_type: AssetContainerType::Jar,
            entry_path: "assets/minecraft/textures/block/stone.png".into(),
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["assetId"], "abc");
        assert_eq!(value["relativeAssetPath"], "textures/block/stone.png");
        assert_eq!(value["isImage"], true);

        let back: AssetRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.file_name(), "stone.png");
    }
}
