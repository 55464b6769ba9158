use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clipboard_rs::{Clipboard, ClipboardContext};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::events::{
    EngineEvent, EventSink, ExportCompletedEvent, ExportProgressEvent, ProgressGate,
};
use crate::model::{AssetRecord, AudioFormat, ExportFailure, ExportKind};
use crate::reader::ReaderCache;
use crate::scan::CancellationToken;
use crate::transcode::AudioTranscoder;

/// Failure records carried on `export://completed` are capped; the counters
/// stay exact either way.
const MAX_REPORTED_FAILURES: usize = 50;

/// OS clipboard seam for `copy_assets_to_clipboard`. The engine hands over
/// absolute paths of the staged files.
pub trait FileClipboard: Send + Sync {
    fn set_file_list(&self, paths: &[String]) -> Result<()>;
}

pub struct SystemClipboard;

impl FileClipboard for SystemClipboard {
    fn set_file_list(&self, paths: &[String]) -> Result<()> {
        let clipboard = ClipboardContext::new().map_err(|error| {
            EngineError::State(format!("Failed to open clipboard context: {error}"))
        })?;

        clipboard.set_files(paths.to_vec()).map_err(|error| {
            EngineError::State(format!("Failed to copy files to clipboard: {error}"))
        })
    }
}

/// One requested asset id, resolved up front. Unknown ids stay in the list
/// so they are counted and reported as per-item failures.
pub enum ExportItem {
    Resolved(AssetRecord),
    Unknown(String),
}

#[derive(Debug, Default)]
pub struct ExportOutcome {
    pub output_files: Vec<String>,
    pub processed_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub cancelled: bool,
    pub failures: Vec<ExportFailure>,
}

/// Runs one export operation item by item on the calling thread, emitting
/// coalesced `export://progress` frames and a final `export://completed`.
///
/// Cancellation lets the in-flight item finish; per-item failures never
/// abort the operation. `success + failed == processed ≤ requested`, with
/// equality exactly when the operation was not cancelled.
#[allow(clippy::too_many_arguments)]
pub fn run_export(
    items: Vec<ExportItem>,
    kind: ExportKind,
    operation_id: &str,
    destination: &Path,
    audio_format: AudioFormat,
    cancel: &CancellationToken,
    sink: &dyn EventSink,
    transcoder: &dyn AudioTranscoder,
    progress_interval: Duration,
) -> ExportOutcome {
    let requested_count = items.len();
    let gate = ProgressGate::new(progress_interval);
    let mut readers = ReaderCache::new();
    let mut outcome = ExportOutcome::default();

    emit_progress(sink, kind, operation_id, requested_count, &outcome);

    for item in items {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            break;
        }

        match item {
            ExportItem::Unknown(asset_id) => {
                outcome.processed_count += 1;
                outcome.failed_count += 1;
                outcome.failures.push(ExportFailure {
                    asset_id: asset_id.clone(),
                    key: String::new(),
                    error: format!("Unknown asset id: {asset_id}"),
                });
            }
            ExportItem::Resolved(record) => {
                let output_path = export_destination(destination, &record, audio_format);
                match materialize_item(&record, &output_path, audio_format, &mut readers, transcoder)
                {
                    Ok(()) => {
                        outcome.processed_count += 1;
                        outcome.success_count += 1;
                        outcome
                            .output_files
                            .push(output_path.to_string_lossy().to_string());
                    }
                    Err(error) => {
                        warn!(asset = %record.key, error = %error, "export item failed");
                        outcome.processed_count += 1;
                        outcome.failed_count += 1;
                        outcome.failures.push(ExportFailure {
                            asset_id: record.asset_id.clone(),
                            key: record.key.clone(),
                            error: error.to_string(),
                        });
                    }
                }
            }
        }

        if gate.ready(outcome.processed_count == requested_count) {
            emit_progress(sink, kind, operation_id, requested_count, &outcome);
        }
    }

    debug!(
        operation = operation_id,
        processed = outcome.processed_count,
        failed = outcome.failed_count,
        cancelled = outcome.cancelled,
        "export finished"
    );

    let mut failures = outcome.failures.clone();
    failures.truncate(MAX_REPORTED_FAILURES);
    sink.emit(EngineEvent::ExportCompleted(ExportCompletedEvent {
        operation_id: operation_id.to_string(),
        kind,
        requested_count,
        processed_count: outcome.processed_count,
        success_count: outcome.success_count,
        failed_count: outcome.failed_count,
        cancelled: outcome.cancelled,
        failures,
    }));

    outcome
}

fn emit_progress(
    sink: &dyn EventSink,
    kind: ExportKind,
    operation_id: &str,
    requested_count: usize,
    outcome: &ExportOutcome,
) {
    sink.emit(EngineEvent::ExportProgress(ExportProgressEvent {
        operation_id: operation_id.to_string(),
        kind,
        requested_count,
        processed_count: outcome.processed_count,
        success_count: outcome.success_count,
        failed_count: outcome.failed_count,
        cancelled: outcome.cancelled,
    }));
}

/// `<destination>/<sourceRoot>/<sourceName>/<namespace>/<relativeAssetPath>`,
/// with the file extension rewritten when an audio asset is transcoded.
pub fn export_destination(
    destination: &Path,
    record: &AssetRecord,
    audio_format: AudioFormat,
) -> PathBuf {
    let mut path = destination
        .join(record.source_type.tree_root_name())
        .join(&record.source_name)
        .join(&record.namespace);

    let segments: Vec<&str> = record.relative_asset_path.split('/').collect();
    for (position, segment) in segments.iter().enumerate() {
        if position + 1 == segments.len() {
            path.push(export_file_name(segment, record, audio_format));
        } else {
            path.push(segment);
        }
    }

    path
}

fn export_file_name(name: &str, record: &AssetRecord, audio_format: AudioFormat) -> String {
    if !record.is_audio {
        return name.to_string();
    }

    let target_extension = match audio_format {
        AudioFormat::Original => return name.to_string(),
        AudioFormat::Mp3 => "mp3",
        AudioFormat::Wav => "wav",
    };

    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{stem}.{target_extension}"),
        _ => format!("{name}.{target_extension}"),
    }
}

fn materialize_item(
    record: &AssetRecord,
    output_path: &Path,
    audio_format: AudioFormat,
    readers: &mut ReaderCache,
    transcoder: &dyn AudioTranscoder,
) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).map_err(|error| {
            EngineError::Read(format!(
                "Failed to create directory {}: {error}",
                parent.display()
            ))
        })?;
    }

    let bytes = readers.read(record)?;

    if record.is_audio && audio_format != AudioFormat::Original {
        transcoder.transcode(&bytes, output_path, audio_format)?;
        return Ok(());
    }

    fs::write(output_path, bytes).map_err(|error| {
        EngineError::Read(format!(
            "Failed to write output file {}: {error}",
            output_path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssetContainerType, AssetSourceType};

    fn audio_record(relative: &str) -> AssetRecord {
        AssetRecord {
            asset_id: "id".into(),
            key: format!("pack / minecraft / {relative}"),
            source_type: AssetSourceType::Mod,
            source_name: "pack".into(),
            namespace: "minecraft".into(),
            relative_asset_path: relative.into(),
            extension: "ogg".into(),
            is_image: false,
            is_audio: true,
            container_path: "/mods/pack.jar".into(),
            container_type: AssetContainerType::Jar,
            entry_path: format!("assets/minecraft/{relative}"),
        }
    }

    #[test]
    fn destination_mirrors_source_name_namespace_and_path() {
        let record = audio_record("sounds/dig/stone1.ogg");
        let path = export_destination(Path::new("/out"), &record, AudioFormat::Original);
        assert_eq!(
            path,
            Path::new("/out/mods/pack/minecraft/sounds/dig/stone1.ogg")
        );
    }

    #[test]
    fn audio_extension_is_rewritten_for_transcoded_formats() {
        let record = audio_record("sounds/dig/stone1.ogg");
        let mp3 = export_destination(Path::new("/out"), &record, AudioFormat::Mp3);
        assert!(mp3.to_string_lossy().ends_with("sounds/dig/stone1.mp3"));

        let wav = export_destination(Path::new("/out"), &record, AudioFormat::Wav);
        assert!(wav.to_string_lossy().ends_with("sounds/dig/stone1.wav"));

        let mut image = audio_record("textures/a.png");
        image.is_audio = false;
        image.is_image = true;
        let unchanged = export_destination(Path::new("/out"), &image, AudioFormat::Mp3);
        assert!(unchanged.to_string_lossy().ends_with("textures/a.png"));
    }
}
