//! Tauri shell around [`mae_core::Engine`]: one command per engine
//! operation, plus an event bridge that forwards engine events to the
//! webview on their `scan://*` / `export://*` channels.

use std::sync::Arc;

use tauri::{AppHandle, Emitter, Manager, State};
use tracing_subscriber::EnvFilter;

use mae_core::error::Result;
use mae_core::events::{EngineEvent, EventSink};
use mae_core::model::{
    AssetPreviewResponse, AssetRecord, CopyAssetsRequest, CopyResult, InstanceInfo,
    ListTreeChildrenRequest, PrismRootCandidate, ReconcileAssetIdsRequest,
    ReconcileAssetIdsResponse, SaveAssetsRequest, SaveAssetsResult, ScanStatus, SearchRequest,
    SearchResponse, StartScanRequest, StartScanResponse, TreeNode,
};
use mae_core::{Engine, EngineConfig};

struct WebviewSink {
    app: AppHandle,
}

impl EventSink for WebviewSink {
    fn emit(&self, event: EngineEvent) {
        let _ = self.app.emit(event.channel(), event.payload());
    }
}

#[tauri::command]
fn detect_prism_roots(engine: State<'_, Engine>) -> Result<Vec<PrismRootCandidate>> {
    engine.detect_prism_roots()
}

#[tauri::command]
fn list_instances(prism_root: String, engine: State<'_, Engine>) -> Result<Vec<InstanceInfo>> {
    engine.list_instances(&prism_root)
}

#[tauri::command]
fn start_scan(req: StartScanRequest, engine: State<'_, Engine>) -> Result<StartScanResponse> {
    engine.start_scan(req)
}

#[tauri::command]
fn cancel_scan(scan_id: String, engine: State<'_, Engine>) -> Result<()> {
    engine.cancel_scan(&scan_id)
}

#[tauri::command]
fn get_scan_status(scan_id: String, engine: State<'_, Engine>) -> Result<ScanStatus> {
    engine.get_scan_status(&scan_id)
}

#[tauri::command]
fn list_tree_children(
    req: ListTreeChildrenRequest,
    engine: State<'_, Engine>,
) -> Result<Vec<TreeNode>> {
    engine.list_tree_children(req)
}

#[tauri::command]
fn search_assets(req: SearchRequest, engine: State<'_, Engine>) -> Result<SearchResponse> {
    engine.search_assets(req)
}

#[tauri::command]
fn get_asset_record(
    scan_id: String,
    asset_id: String,
    engine: State<'_, Engine>,
) -> Result<AssetRecord> {
    engine.get_asset_record(&scan_id, &asset_id)
}

#[tauri::command]
fn get_asset_preview(
    scan_id: String,
    asset_id: String,
    engine: State<'_, Engine>,
) -> Result<AssetPreviewResponse> {
    engine.get_asset_preview(&scan_id, &asset_id)
}

#[tauri::command]
fn reconcile_asset_ids(
    req: ReconcileAssetIdsRequest,
    engine: State<'_, Engine>,
) -> Result<ReconcileAssetIdsResponse> {
    engine.reconcile_asset_ids(req)
}

#[tauri::command]
fn save_assets(req: SaveAssetsRequest, engine: State<'_, Engine>) -> Result<SaveAssetsResult> {
    engine.save_assets(req)
}

#[tauri::command]
fn copy_assets_to_clipboard(
    req: CopyAssetsRequest,
    engine: State<'_, Engine>,
) -> Result<CopyResult> {
    engine.copy_assets_to_clipboard(req)
}

#[tauri::command]
fn cancel_export(operation_id: String, engine: State<'_, Engine>) -> Result<()> {
    engine.cancel_export(&operation_id)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    init_tracing();

    let app = tauri::Builder::default()
        .setup(|app| {
            let data_dir = app.path().app_data_dir()?;
            let sink = Arc::new(WebviewSink {
                app: app.handle().clone(),
            });
            let engine = Engine::new(EngineConfig::new(data_dir), sink);
            app.manage(engine);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            detect_prism_roots,
            list_instances,
            start_scan,
            cancel_scan,
            get_scan_status,
            list_tree_children,
            search_assets,
            get_asset_record,
            get_asset_preview,
            reconcile_asset_ids,
            save_assets,
            copy_assets_to_clipboard,
            cancel_export,
        ])
        .build(tauri::generate_context!())
        .expect("error while building tauri application");

    app.run(|app_handle, event| {
        if matches!(event, tauri::RunEvent::Exit) {
            app_handle.state::<Engine>().cleanup_temp_dirs();
        }
    });
}
