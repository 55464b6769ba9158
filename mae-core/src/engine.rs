use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{unix_timestamp_ms, ScanCache, SNAPSHOT_SCHEMA_VERSION};
use crate::discovery::{collect_containers, SourceToggles};
use crate::error::{EngineError, Result};
use crate::events::{
    EngineEvent, EventSink, ProgressGate, ScanCompletedEvent, ScanErrorEvent, ScanProgressEvent,
};
use crate::export::{run_export, ExportItem, ExportOutcome, FileClipboard, SystemClipboard};
use crate::index::{ScanIndex, SearchFilter, ROOT_NODE_ID};
use crate::launcher;
use crate::model::{
    AssetPreviewResponse, AssetRecord, AudioFormat, ContainerFingerprint, CopyAssetsRequest,
    CopyResult, ExportKind, InstanceInfo, ListTreeChildrenRequest, PrismRootCandidate,
    ReconcileAssetIdsRequest, ReconcileAssetIdsResponse, SaveAssetsRequest, SaveAssetsResult,
    ScanLifecycle, ScanPhase, ScanSnapshot, ScanStatus, SearchRequest, SearchResponse,
    StartScanRequest, StartScanResponse, TreeNode,
};
use crate::preview::preview_for_record;
use crate::reader::ReaderCache;
use crate::scan::{build_refresh_plan, scan_containers_parallel, CancellationToken};
use crate::transcode::{AudioTranscoder, FfmpegTranscoder};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub ffmpeg_runtime_dir: PathBuf,
    pub max_scan_workers: usize,
    pub scan_cache_max_bytes: u64,
    pub preview_max_bytes: u64,
    pub progress_interval: Duration,
    pub supersede_grace: Duration,
}

impl EngineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            cache_dir: data_dir.join("scan-cache").join("v2"),
            temp_dir: data_dir.join("temp"),
            ffmpeg_runtime_dir: data_dir.join("ffmpeg-runtime"),
            max_scan_workers: 8,
            scan_cache_max_bytes: 2 * 1024 * 1024 * 1024,
            preview_max_bytes: 16 * 1024 * 1024,
            progress_interval: Duration::from_millis(50),
            supersede_grace: Duration::from_secs(6),
        }
    }
}

struct ScanState {
    lifecycle: ScanLifecycle,
    phase: ScanPhase,
    is_refreshing: bool,
    scanned_containers: usize,
    total_containers: usize,
    error: Option<String>,
    container_errors: usize,
    cancel: CancellationToken,
    index: ScanIndex,
    container_records: HashMap<String, Vec<AssetRecord>>,
    fingerprints: HashMap<String, ContainerFingerprint>,
    cache_key: String,
    request: StartScanRequest,
    progress_gate: ProgressGate,
}

impl ScanState {
    fn new(request: StartScanRequest, cache_key: String, progress_interval: Duration) -> Self {
        Self {
            lifecycle: ScanLifecycle::Scanning,
            phase: ScanPhase::Estimating,
            is_refreshing: false,
            scanned_containers: 0,
            total_containers: 0,
            error: None,
            container_errors: 0,
            cancel: CancellationToken::new(),
            index: ScanIndex::new(),
            container_records: HashMap::new(),
            fingerprints: HashMap::new(),
            cache_key,
            request,
            progress_gate: ProgressGate::new(progress_interval),
        }
    }

    fn from_snapshot(
        request: StartScanRequest,
        snapshot: ScanSnapshot,
        progress_interval: Duration,
    ) -> Self {
        let container_count = snapshot.fingerprints.len();
        Self {
            lifecycle: ScanLifecycle::Scanning,
            phase: ScanPhase::Refreshing,
            is_refreshing: true,
            scanned_containers: container_count,
            total_containers: container_count,
            error: None,
            container_errors: 0,
            cancel: CancellationToken::new(),
            index: ScanIndex::from_records(snapshot.assets),
            container_records: snapshot.container_records,
            fingerprints: snapshot.fingerprints,
            cache_key: snapshot.cache_key,
            request,
            progress_gate: ProgressGate::new(progress_interval),
        }
    }

    fn status(&self, scan_id: &str) -> ScanStatus {
        ScanStatus {
            scan_id: scan_id.to_string(),
            lifecycle: self.lifecycle,
            is_refreshing: self.is_refreshing,
            scanned_containers: self.scanned_containers,
            total_containers: self.total_containers,
            asset_count: self.index.len(),
            error: self.error.clone(),
        }
    }
}

/// The command/event gateway: one session object holding every scan and
/// export known to the engine, with one method per UI command. Long
/// operations run on worker threads and report back through the event sink.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

struct EngineShared {
    config: EngineConfig,
    sink: Arc<dyn EventSink>,
    transcoder: Box<dyn AudioTranscoder>,
    clipboard: Box<dyn FileClipboard>,
    cache: ScanCache,
    scans: Mutex<HashMap<String, ScanState>>,
    active_scan_id: Mutex<Option<String>>,
    active_export_id: Mutex<Option<String>>,
    export_cancels: Mutex<HashMap<String, CancellationToken>>,
    temp_paths: Mutex<Vec<PathBuf>>,
}

impl Engine {
    pub fn new(config: EngineConfig, sink: Arc<dyn EventSink>) -> Self {
        let transcoder = Box::new(FfmpegTranscoder::new(config.ffmpeg_runtime_dir.clone()));
        Self::with_collaborators(config, sink, transcoder, Box::new(SystemClipboard))
    }

    /// Injection point for the transcoder and clipboard seams; tests use
    /// recording fakes, the desktop shell uses the defaults.
    pub fn with_collaborators(
        config: EngineConfig,
        sink: Arc<dyn EventSink>,
        transcoder: Box<dyn AudioTranscoder>,
        clipboard: Box<dyn FileClipboard>,
    ) -> Self {
        let cache = ScanCache::new(config.cache_dir.clone(), config.scan_cache_max_bytes);
        Self {
            shared: Arc::new(EngineShared {
                config,
                sink,
                transcoder,
                clipboard,
                cache,
                scans: Mutex::new(HashMap::new()),
                active_scan_id: Mutex::new(None),
                active_export_id: Mutex::new(None),
                export_cancels: Mutex::new(HashMap::new()),
                temp_paths: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn detect_prism_roots(&self) -> Result<Vec<PrismRootCandidate>> {
        launcher::detect_prism_roots()
    }

    pub fn list_instances(&self, prism_root: &str) -> Result<Vec<InstanceInfo>> {
        launcher::list_instances(prism_root)
    }

    pub fn start_scan(&self, request: StartScanRequest) -> Result<StartScanResponse> {
        let toggles = SourceToggles {
            vanilla: request.include_vanilla,
            mods: request.include_mods,
            resourcepacks: request.include_resourcepacks,
        };
        if !toggles.any() {
            return Err(EngineError::Config(
                "Select at least one asset source to scan".to_string(),
            ));
        }

        let prism_root = launcher::expand_home(&request.prism_root);
        launcher::validate_prism_root(&prism_root)?;
        let instance_dir = launcher::resolve_instance_dir(&prism_root, &request.instance_folder)?;

        self.shared.supersede_active_scan();

        let scan_id = Uuid::new_v4().to_string();
        let cache_key = ScanCache::cache_key(
            &prism_root,
            &request.instance_folder,
            request.include_vanilla,
            request.include_mods,
            request.include_resourcepacks,
        );
        let force_rescan = request.force_rescan.unwrap_or(false);

        if !force_rescan {
            if let Some(snapshot) = self.shared.cache.load(&cache_key) {
                info!(
                    scan_id = %scan_id,
                    assets = snapshot.assets.len(),
                    "serving cached scan, refreshing in background"
                );

                let state = ScanState::from_snapshot(
                    request.clone(),
                    snapshot,
                    self.shared.config.progress_interval,
                );
                self.shared.install_scan(&scan_id, state);

                let shared = Arc::clone(&self.shared);
                let worker_scan_id = scan_id.clone();
                thread::spawn(move || {
                    shared.run_refresh(&worker_scan_id, &prism_root, &instance_dir, toggles);
                });

                return Ok(StartScanResponse {
                    scan_id,
                    cache_hit: true,
                    refresh_started: true,
                    refresh_mode: Some("incremental".to_string()),
                });
            }
        }

        let state = ScanState::new(
            request.clone(),
            cache_key,
            self.shared.config.progress_interval,
        );
        self.shared.install_scan(&scan_id, state);

        let shared = Arc::clone(&self.shared);
        let worker_scan_id = scan_id.clone();
        thread::spawn(move || {
            shared.run_full_scan(&worker_scan_id, &prism_root, &instance_dir, toggles);
        });

        Ok(StartScanResponse {
            scan_id,
            cache_hit: false,
            refresh_started: false,
            refresh_mode: None,
        })
    }

    pub fn cancel_scan(&self, scan_id: &str) -> Result<()> {
        let mut scans = lock_poisoned(&self.shared.scans)?;
        let state = scans
            .get_mut(scan_id)
            .ok_or_else(|| EngineError::unknown_scan(scan_id))?;

        state.cancel.cancel();
        if !state.lifecycle.is_terminal() {
            state.lifecycle = ScanLifecycle::Cancelled;
        }
        state.is_refreshing = false;
        Ok(())
    }

    pub fn get_scan_status(&self, scan_id: &str) -> Result<ScanStatus> {
        let scans = lock_poisoned(&self.shared.scans)?;
        scans
            .get(scan_id)
            .map(|state| state.status(scan_id))
            .ok_or_else(|| EngineError::unknown_scan(scan_id))
    }

    pub fn list_tree_children(&self, request: ListTreeChildrenRequest) -> Result<Vec<TreeNode>> {
        let mut scans = lock_poisoned(&self.shared.scans)?;
        let state = scans
            .get_mut(&request.scan_id)
            .ok_or_else(|| EngineError::unknown_scan(&request.scan_id))?;

        let node_id = request.node_id.unwrap_or_else(|| ROOT_NODE_ID.to_string());
        Ok(state.index.tree_children(&node_id))
    }

    pub fn search_assets(&self, request: SearchRequest) -> Result<SearchResponse> {
        let scans = lock_poisoned(&self.shared.scans)?;
        let state = scans
            .get(&request.scan_id)
            .ok_or_else(|| EngineError::unknown_scan(&request.scan_id))?;

        let filter = SearchFilter {
            query: &request.query,
            folder_node_id: request.folder_node_id.as_deref(),
            include_images: request.include_images.unwrap_or(true),
            include_audio: request.include_audio.unwrap_or(true),
            include_other: request.include_other.unwrap_or(true),
            offset: request.offset.unwrap_or(0),
            limit: request.limit.unwrap_or(200).clamp(1, 1000),
        };

        let (total, assets) = state.index.search(&filter);
        Ok(SearchResponse { total, assets })
    }

    pub fn get_asset_record(&self, scan_id: &str, asset_id: &str) -> Result<AssetRecord> {
        let scans = lock_poisoned(&self.shared.scans)?;
        let state = scans
            .get(scan_id)
            .ok_or_else(|| EngineError::unknown_scan(scan_id))?;

        state
            .index
            .get(asset_id)
            .cloned()
            .ok_or_else(|| EngineError::unknown_asset(asset_id))
    }

    pub fn get_asset_preview(&self, scan_id: &str, asset_id: &str) -> Result<AssetPreviewResponse> {
        let record = self.get_asset_record(scan_id, asset_id)?;
        let mut readers = ReaderCache::new();
        preview_for_record(&record, &mut readers, self.shared.config.preview_max_bytes)
    }

    pub fn reconcile_asset_ids(
        &self,
        request: ReconcileAssetIdsRequest,
    ) -> Result<ReconcileAssetIdsResponse> {
        let scans = lock_poisoned(&self.shared.scans)?;
        let state = scans
            .get(&request.scan_id)
            .ok_or_else(|| EngineError::unknown_scan(&request.scan_id))?;

        let (id_map, asset_ids) = state.index.reconcile(&request.asset_ids);
        Ok(ReconcileAssetIdsResponse { id_map, asset_ids })
    }

    pub fn save_assets(&self, request: SaveAssetsRequest) -> Result<SaveAssetsResult> {
        let operation_id = resolve_operation_id(request.operation_id);
        let requested_count = request.asset_ids.len();

        // One export at a time, even when there is nothing to write.
        let cancel = self.shared.register_export(&operation_id)?;

        let run = (|| -> Result<ExportOutcome> {
            if requested_count == 0 {
                return Ok(ExportOutcome::default());
            }

            let items = self.resolve_export_items(&request.scan_id, &request.asset_ids)?;
            let destination = launcher::expand_home(&request.destination_dir);
            fs::create_dir_all(&destination).map_err(|error| {
                EngineError::Config(format!("Failed to create destination directory: {error}"))
            })?;

            Ok(run_export(
                items,
                ExportKind::Save,
                &operation_id,
                &destination,
                request.audio_format.unwrap_or(AudioFormat::Original),
                &cancel,
                self.shared.sink.as_ref(),
                self.shared.transcoder.as_ref(),
                self.shared.config.progress_interval,
            ))
        })();
        self.shared.unregister_export(&operation_id);

        Ok(save_result(operation_id, requested_count, run?))
    }

    pub fn copy_assets_to_clipboard(&self, request: CopyAssetsRequest) -> Result<CopyResult> {
        let operation_id = resolve_operation_id(request.operation_id);
        let requested_count = request.asset_ids.len();

        // One export at a time, even when there is nothing to stage.
        let cancel = self.shared.register_export(&operation_id)?;

        let run = (|| -> Result<(ExportOutcome, Option<PathBuf>)> {
            if requested_count == 0 {
                return Ok((ExportOutcome::default(), None));
            }

            let items = self.resolve_export_items(&request.scan_id, &request.asset_ids)?;
            let staging_dir = self
                .shared
                .config
                .temp_dir
                .join("clipboard-assets")
                .join(Uuid::new_v4().to_string());
            fs::create_dir_all(&staging_dir).map_err(|error| {
                EngineError::Config(format!("Failed to create staging directory: {error}"))
            })?;

            let outcome = run_export(
                items,
                ExportKind::Copy,
                &operation_id,
                &staging_dir,
                request.audio_format.unwrap_or(AudioFormat::Original),
                &cancel,
                self.shared.sink.as_ref(),
                self.shared.transcoder.as_ref(),
                self.shared.config.progress_interval,
            );
            Ok((outcome, Some(staging_dir)))
        })();
        self.shared.unregister_export(&operation_id);

        let (outcome, staging_dir) = run?;

        if !outcome.output_files.is_empty() {
            self.shared.clipboard.set_file_list(&outcome.output_files)?;
        }

        if let Some(staging_dir) = staging_dir {
            if let Ok(mut temp_paths) = self.shared.temp_paths.lock() {
                temp_paths.push(staging_dir);
            }
        }

        let result = save_result(operation_id, requested_count, outcome);
        Ok(CopyResult {
            operation_id: result.operation_id,
            requested_count: result.requested_count,
            processed_count: result.processed_count,
            success_count: result.success_count,
            failed_count: result.failed_count,
            cancelled: result.cancelled,
            failures: result.failures,
            copied_files: result.saved_files,
        })
    }

    pub fn cancel_export(&self, operation_id: &str) -> Result<()> {
        let cancels = lock_poisoned(&self.shared.export_cancels)?;
        let cancel = cancels.get(operation_id).ok_or_else(|| {
            EngineError::State(format!("Unknown export operation id: {operation_id}"))
        })?;

        cancel.cancel();
        Ok(())
    }

    /// Removes staged clipboard payloads; called by the shell on exit.
    pub fn cleanup_temp_dirs(&self) {
        let Ok(mut paths) = self.shared.temp_paths.lock() else {
            return;
        };

        for path in paths.drain(..) {
            if path.is_dir() {
                let _ = fs::remove_dir_all(&path);
            } else if path.is_file() {
                let _ = fs::remove_file(&path);
            }
        }
    }

    fn resolve_export_items(&self, scan_id: &str, asset_ids: &[String]) -> Result<Vec<ExportItem>> {
        let scans = lock_poisoned(&self.shared.scans)?;
        let state = scans
            .get(scan_id)
            .ok_or_else(|| EngineError::unknown_scan(scan_id))?;

        Ok(asset_ids
            .iter()
            .map(|asset_id| match state.index.get(asset_id) {
                Some(record) => ExportItem::Resolved(record.clone()),
                None => ExportItem::Unknown(asset_id.clone()),
            })
            .collect())
    }
}

impl EngineShared {
    fn install_scan(&self, scan_id: &str, state: ScanState) {
        if let Ok(mut scans) = self.scans.lock() {
            scans.insert(scan_id.to_string(), state);
        }
        if let Ok(mut active) = self.active_scan_id.lock() {
            *active = Some(scan_id.to_string());
        }
    }

    /// Soft-cancels the previously active scan and waits (bounded) for its
    /// workers to reach a terminal state, then releases its memory.
    fn supersede_active_scan(&self) {
        let previous_id = match self.active_scan_id.lock() {
            Ok(mut active) => active.take(),
            Err(_) => None,
        };
        let Some(previous_id) = previous_id else {
            return;
        };

        let cancel = self.scans.lock().ok().and_then(|scans| {
            scans
                .get(&previous_id)
                .filter(|state| !state.lifecycle.is_terminal() || state.is_refreshing)
                .map(|state| state.cancel.clone())
        });

        if let Some(cancel) = cancel {
            debug!(scan_id = %previous_id, "cancelling superseded scan");
            cancel.cancel();

            let deadline = Instant::now() + self.config.supersede_grace;
            loop {
                let settled = self
                    .scans
                    .lock()
                    .ok()
                    .and_then(|scans| {
                        scans
                            .get(&previous_id)
                            .map(|state| state.lifecycle.is_terminal() && !state.is_refreshing)
                    })
                    .unwrap_or(true);

                if settled {
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(scan_id = %previous_id, "superseded scan did not settle within grace");
                    break;
                }
                thread::sleep(Duration::from_millis(25));
            }
        }

        if let Ok(mut scans) = self.scans.lock() {
            scans.remove(&previous_id);
        }
    }

    fn with_scan<T>(&self, scan_id: &str, f: impl FnOnce(&mut ScanState) -> T) -> Option<T> {
        let mut scans = self.scans.lock().ok()?;
        scans.get_mut(scan_id).map(f)
    }

    fn run_full_scan(
        &self,
        scan_id: &str,
        prism_root: &Path,
        instance_dir: &Path,
        toggles: SourceToggles,
    ) {
        self.emit_progress(scan_id, None, true);

        let containers = match collect_containers(prism_root, instance_dir, toggles) {
            Ok(containers) => containers,
            Err(error) => {
                self.fail_scan(scan_id, &error);
                return;
            }
        };

        let total = containers.len();
        let Some(cancel) = self.with_scan(scan_id, |state| {
            state.total_containers = total;
            state.phase = ScanPhase::Scanning;
            state.cancel.clone()
        }) else {
            return;
        };

        if cancel.is_cancelled() {
            self.finish_cancelled(scan_id);
            return;
        }

        info!(scan_id, containers = total, "scan started");
        self.emit_progress(scan_id, None, true);

        let mut completion_order: Vec<(usize, String)> = Vec::with_capacity(total);
        let completed = scan_containers_parallel(
            containers,
            &cancel,
            self.config.max_scan_workers,
            |outcome| {
                let path_key = outcome.container.path_key();
                let source_name = outcome.container.source_name.clone();

                if let Some(error) = &outcome.error {
                    warn!(container = %path_key, error = %error, "container skipped");
                    self.with_scan(scan_id, |state| {
                        state.scanned_containers += 1;
                        state.container_errors += 1;
                    });
                } else {
                    completion_order.push((outcome.ordinal, path_key.clone()));
                    self.with_scan(scan_id, |state| {
                        state.scanned_containers += 1;
                        state.index.append(&outcome.records);
                        if let Some(fingerprint) = outcome.fingerprint.clone() {
                            state.fingerprints.insert(path_key.clone(), fingerprint);
                        }
                        state.container_records.insert(path_key, outcome.records);
                    });
                }

                let force = self
                    .with_scan(scan_id, |state| {
                        state.scanned_containers >= state.total_containers
                    })
                    .unwrap_or(true);
                self.emit_progress(scan_id, Some(source_name), force);
            },
        );

        if !completed {
            self.finish_cancelled(scan_id);
            return;
        }

        // Freeze: rebuild in discovery order so tied search results follow
        // the vanilla → mods → resource packs ordering regardless of which
        // worker finished first.
        completion_order.sort_by_key(|(ordinal, _)| *ordinal);
        self.with_scan(scan_id, |state| {
            let mut ordered = Vec::with_capacity(state.index.len());
            for (_, path_key) in &completion_order {
                if let Some(bucket) = state.container_records.get(path_key) {
                    ordered.extend(bucket.iter().cloned());
                }
            }
            state.index = ScanIndex::from_records(ordered);
            state.scanned_containers = state.total_containers;
        });

        self.persist_snapshot(scan_id);
        self.complete_scan(scan_id, ScanLifecycle::Completed);
    }

    fn run_refresh(
        &self,
        scan_id: &str,
        prism_root: &Path,
        instance_dir: &Path,
        toggles: SourceToggles,
    ) {
        let Some(cancel) = self.with_scan(scan_id, |state| state.cancel.clone()) else {
            return;
        };
        if cancel.is_cancelled() {
            self.finish_cancelled(scan_id);
            return;
        }

        let containers = match collect_containers(prism_root, instance_dir, toggles) {
            Ok(containers) => containers,
            Err(error) => {
                self.fail_scan(scan_id, &error);
                return;
            }
        };

        let Some((cached_fingerprints, cached_buckets, previous_records)) =
            self.with_scan(scan_id, |state| {
                (
                    state.fingerprints.clone(),
                    state.container_records.clone(),
                    state.index.records().to_vec(),
                )
            })
        else {
            return;
        };

        let plan = build_refresh_plan(&cached_fingerprints, &containers);

        // A cached fingerprint without its record bucket cannot be reused.
        let mut changed = plan.changed_or_new;
        let mut retained_paths = HashSet::new();
        for container in plan.unchanged {
            let path_key = container.path_key();
            if cached_buckets.contains_key(&path_key) {
                retained_paths.insert(path_key);
            } else {
                changed.push(container);
            }
        }

        debug!(
            scan_id,
            unchanged = retained_paths.len(),
            changed = changed.len(),
            removed = plan.removed_paths.len(),
            "refresh plan"
        );

        let mut next_buckets: HashMap<String, Vec<AssetRecord>> = cached_buckets
            .iter()
            .filter(|(path, _)| retained_paths.contains(*path))
            .map(|(path, bucket)| (path.clone(), bucket.clone()))
            .collect();
        let mut extracted_paths: HashSet<String> = retained_paths.clone();

        self.with_scan(scan_id, |state| {
            state.total_containers = containers.len();
            state.scanned_containers = retained_paths.len();
        });
        self.emit_progress(scan_id, None, true);

        let completed = scan_containers_parallel(
            changed,
            &cancel,
            self.config.max_scan_workers,
            |outcome| {
                let path_key = outcome.container.path_key();
                let source_name = outcome.container.source_name.clone();

                if let Some(error) = &outcome.error {
                    warn!(container = %path_key, error = %error, "container skipped during refresh");
                    // Keep serving the old records for a container that
                    // stopped being readable; the stale fingerprint makes the
                    // next refresh retry it.
                    self.with_scan(scan_id, |state| {
                        state.container_errors += 1;
                        state.scanned_containers += 1;
                    });
                } else {
                    next_buckets.insert(path_key.clone(), outcome.records);
                    extracted_paths.insert(path_key);
                    self.with_scan(scan_id, |state| {
                        state.scanned_containers += 1;
                    });
                }

                let force = self
                    .with_scan(scan_id, |state| {
                        state.scanned_containers >= state.total_containers
                    })
                    .unwrap_or(true);
                self.emit_progress(scan_id, Some(source_name), force);
            },
        );

        if !completed {
            // Partial refresh results are discarded; the served snapshot
            // stays as loaded.
            self.finish_cancelled(scan_id);
            return;
        }

        let mut next_records = Vec::new();
        let mut next_fingerprints = HashMap::new();
        let mut ordered_buckets = HashMap::new();
        for container in &containers {
            let path_key = container.path_key();
            let Some(bucket) = next_buckets.get(&path_key).or_else(|| {
                // Extraction failed this sweep; fall back to cached records.
                cached_buckets.get(&path_key)
            }) else {
                continue;
            };

            next_records.extend(bucket.iter().cloned());
            ordered_buckets.insert(path_key.clone(), bucket.clone());

            let fingerprint = if extracted_paths.contains(&path_key) {
                plan.fingerprints.get(&path_key).cloned()
            } else {
                cached_fingerprints.get(&path_key).cloned()
            };
            if let Some(fingerprint) = fingerprint {
                next_fingerprints.insert(path_key, fingerprint);
            }
        }

        let aliases = ScanIndex::build_alias_map(&previous_records, &next_records);

        let committed = self
            .with_scan(scan_id, |state| {
                if state.cancel.is_cancelled() {
                    state.is_refreshing = false;
                    return false;
                }

                let mut index = ScanIndex::from_records(next_records);
                index.set_aliases(aliases);
                state.index = index;
                state.container_records = ordered_buckets;
                state.fingerprints = next_fingerprints;
                state.total_containers = state.fingerprints.len();
                state.scanned_containers = state.total_containers;
                true
            })
            .unwrap_or(false);

        if !committed {
            self.finish_cancelled(scan_id);
            return;
        }

        self.persist_snapshot(scan_id);
        self.complete_scan(scan_id, ScanLifecycle::Completed);
    }

    fn register_export(&self, operation_id: &str) -> Result<CancellationToken> {
        let mut active = lock_poisoned(&self.active_export_id)?;
        if let Some(running) = active.as_ref() {
            return Err(EngineError::State(format!(
                "Another export operation is already in progress: {running}"
            )));
        }

        let cancel = CancellationToken::new();
        *active = Some(operation_id.to_string());
        if let Ok(mut cancels) = self.export_cancels.lock() {
            cancels.insert(operation_id.to_string(), cancel.clone());
        }
        Ok(cancel)
    }

    fn unregister_export(&self, operation_id: &str) {
        if let Ok(mut cancels) = self.export_cancels.lock() {
            cancels.remove(operation_id);
        }
        if let Ok(mut active) = self.active_export_id.lock() {
            if active.as_deref() == Some(operation_id) {
                *active = None;
            }
        }
    }

    fn emit_progress(&self, scan_id: &str, current_source: Option<String>, force: bool) {
        let event = self
            .with_scan(scan_id, |state| {
                if state.cancel.is_cancelled() {
                    return None;
                }
                if !state.progress_gate.ready(force) {
                    return None;
                }

                Some(ScanProgressEvent {
                    scan_id: scan_id.to_string(),
                    scanned_containers: state.scanned_containers,
                    total_containers: state.total_containers,
                    asset_count: state.index.len(),
                    phase: state.phase,
                    current_source,
                })
            })
            .flatten();

        if let Some(event) = event {
            self.sink.emit(EngineEvent::ScanProgress(event));
        }
    }

    fn complete_scan(&self, scan_id: &str, lifecycle: ScanLifecycle) {
        let event = self.with_scan(scan_id, |state| {
            state.lifecycle = lifecycle;
            state.is_refreshing = false;
            let event = ScanCompletedEvent {
                scan_id: scan_id.to_string(),
                lifecycle,
                asset_count: state.index.len(),
                error: None,
            };
            (event, state.container_errors)
        });

        if let Some((event, container_errors)) = event {
            info!(
                scan_id,
                assets = event.asset_count,
                skipped_containers = container_errors,
                lifecycle = ?lifecycle,
                "scan finished"
            );
            self.sink.emit(EngineEvent::ScanCompleted(event));
        }
    }

    fn finish_cancelled(&self, scan_id: &str) {
        self.complete_scan(scan_id, ScanLifecycle::Cancelled);
    }

    fn fail_scan(&self, scan_id: &str, error: &EngineError) {
        warn!(scan_id, error = %error, "scan failed");
        self.with_scan(scan_id, |state| {
            state.lifecycle = ScanLifecycle::Error;
            state.is_refreshing = false;
            state.error = Some(error.to_string());
        });

        self.sink.emit(EngineEvent::ScanError(ScanErrorEvent {
            scan_id: scan_id.to_string(),
            kind: error.kind().to_string(),
            error: error.to_string(),
        }));
    }

    /// Serializes the scan into the persistent cache. Failures are logged
    /// and otherwise ignored; cancelled scans are never persisted.
    fn persist_snapshot(&self, scan_id: &str) {
        let snapshot = self
            .with_scan(scan_id, |state| {
                if state.cancel.is_cancelled() {
                    return None;
                }

                Some(ScanSnapshot {
                    schema_version: SNAPSHOT_SCHEMA_VERSION,
                    cache_key: state.cache_key.clone(),
                    prism_root: state.request.prism_root.clone(),
                    instance_folder: state.request.instance_folder.clone(),
                    include_vanilla: state.request.include_vanilla,
                    include_mods: state.request.include_mods,
                    include_resourcepacks: state.request.include_resourcepacks,
                    created_at: unix_timestamp_ms(),
                    app_version: env!("CARGO_PKG_VERSION").to_string(),
                    assets: state.index.records().to_vec(),
                    container_records: state.container_records.clone(),
                    fingerprints: state.fingerprints.clone(),
                })
            })
            .flatten();

        if let Some(snapshot) = snapshot {
            if let Err(error) = self.cache.store(&snapshot) {
                warn!(scan_id, error = %error, "failed to persist scan snapshot");
            }
        }
    }
}

fn save_result(
    operation_id: String,
    requested_count: usize,
    outcome: ExportOutcome,
) -> SaveAssetsResult {
    SaveAssetsResult {
        operation_id,
        requested_count,
        processed_count: outcome.processed_count,
        success_count: outcome.success_count,
        failed_count: outcome.failed_count,
        cancelled: outcome.cancelled,
        failures: outcome.failures,
        saved_files: outcome.output_files,
    }
}

fn resolve_operation_id(operation_id: Option<String>) -> String {
    operation_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn lock_poisoned<'a, T>(mutex: &'a Mutex<T>) -> Result<std::sync::MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| EngineError::State("Engine state lock is poisoned".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_ids_default_to_uuids() {
        let generated = resolve_operation_id(None);
        assert!(Uuid::parse_str(&generated).is_ok());

        let from_blank = resolve_operation_id(Some("   ".to_string()));
        assert!(Uuid::parse_str(&from_blank).is_ok());

        let passthrough = resolve_operation_id(Some("op-7".to_string()));
        assert_eq!(passthrough, "op-7");
    }
}
