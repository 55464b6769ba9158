#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use mae_core::error::Result;
use mae_core::events::{EngineEvent, EventSink};
use mae_core::export::FileClipboard;
use mae_core::model::{AudioFormat, ScanLifecycle, ScanStatus, StartScanRequest};
use mae_core::transcode::AudioTranscoder;
use mae_core::{Engine, EngineConfig};

/// Captures every engine event for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().expect("sink lock").clone()
    }

    pub fn scan_progress_count(&self, scan_id: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| match event {
                EngineEvent::ScanProgress(progress) => progress.scan_id == scan_id,
                _ => false,
            })
            .count()
    }

    pub fn export_progress_count(&self, operation_id: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| match event {
                EngineEvent::ExportProgress(progress) => progress.operation_id == operation_id,
                _ => false,
            })
            .count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().expect("sink lock").push(event);
    }
}

/// Writes the input bytes to the output path with a marker prefix instead
/// of invoking ffmpeg.
pub struct MockTranscoder;

impl AudioTranscoder for MockTranscoder {
    fn transcode(&self, input: &[u8], output_path: &Path, format: AudioFormat) -> Result<()> {
        let marker = match format {
            AudioFormat::Original => "original",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
        };
        let mut bytes = format!("transcoded:{marker}:").into_bytes();
        bytes.extend_from_slice(input);
        fs::write(output_path, bytes).expect("mock transcoder write");
        Ok(())
    }
}

/// Mock transcoder that sleeps per item, so cancellation tests can observe
/// an export mid-flight.
pub struct SlowTranscoder {
    pub delay: Duration,
}

impl AudioTranscoder for SlowTranscoder {
    fn transcode(&self, input: &[u8], output_path: &Path, _format: AudioFormat) -> Result<()> {
        std::thread::sleep(self.delay);
        fs::write(output_path, input).expect("slow transcoder write");
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingClipboard {
    payloads: Arc<Mutex<Vec<Vec<String>>>>,
}

impl RecordingClipboard {
    pub fn payloads(&self) -> Vec<Vec<String>> {
        self.payloads.lock().expect("clipboard lock").clone()
    }
}

impl FileClipboard for RecordingClipboard {
    fn set_file_list(&self, paths: &[String]) -> Result<()> {
        self.payloads
            .lock()
            .expect("clipboard lock")
            .push(paths.to_vec());
        Ok(())
    }
}

/// One launcher root with a single instance, plus a private engine data dir.
pub struct Fixture {
    pub dir: TempDir,
    pub prism_root: PathBuf,
    pub instance_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl Fixture {
    pub fn mods_dir(&self) -> PathBuf {
        let path = self.instance_dir.join("minecraft/mods");
        fs::create_dir_all(&path).expect("mods dir");
        path
    }

    pub fn resourcepacks_dir(&self) -> PathBuf {
        let path = self.instance_dir.join("minecraft/resourcepacks");
        fs::create_dir_all(&path).expect("resourcepacks dir");
        path
    }
}

pub fn prism_fixture(instance_folder: &str) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let prism_root = dir.path().join("PrismLauncher");
    let instance_dir = prism_root.join("instances").join(instance_folder);
    let data_dir = dir.path().join("app-data");

    fs::create_dir_all(prism_root.join("libraries")).expect("libraries dir");
    fs::create_dir_all(instance_dir.join("minecraft")).expect("instance tree");
    fs::write(
        instance_dir.join("mmc-pack.json"),
        r#"{"components":[{"uid":"net.minecraft","version":"1.21.1"}]}"#,
    )
    .expect("mmc-pack.json");
    fs::write(
        instance_dir.join("instance.cfg"),
        format!("[General]\nname={instance_folder}\n"),
    )
    .expect("instance.cfg");

    Fixture {
        dir,
        prism_root,
        instance_dir,
        data_dir,
    }
}

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = fs::File::create(path).expect("create archive");
    let mut writer = zip::ZipWriter::new(file);
    for (name, bytes) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start archive entry");
        writer.write_all(bytes).expect("write archive entry");
    }
    writer.finish().expect("finish archive");
}

pub fn engine_for(fixture: &Fixture) -> (Engine, Arc<RecordingSink>, RecordingClipboard) {
    engine_with_transcoder(fixture, Box::new(MockTranscoder))
}

pub fn engine_with_transcoder(
    fixture: &Fixture,
    transcoder: Box<dyn AudioTranscoder>,
) -> (Engine, Arc<RecordingSink>, RecordingClipboard) {
    let sink = RecordingSink::new();
    let clipboard = RecordingClipboard::default();
    let engine = Engine::with_collaborators(
        EngineConfig::new(&fixture.data_dir),
        sink.clone(),
        transcoder,
        Box::new(clipboard.clone()),
    );
    (engine, sink, clipboard)
}

pub fn scan_request(fixture: &Fixture, instance_folder: &str) -> StartScanRequest {
    StartScanRequest {
        prism_root: fixture.prism_root.to_string_lossy().to_string(),
        instance_folder: instance_folder.to_string(),
        include_vanilla: true,
        include_mods: true,
        include_resourcepacks: true,
        force_rescan: None,
    }
}

/// Polls until the scan reaches a terminal lifecycle with no refresh in
/// flight, or panics after the timeout.
pub fn wait_for_scan(engine: &Engine, scan_id: &str) -> ScanStatus {
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let status = engine.get_scan_status(scan_id).expect("scan status");
        if status.lifecycle != ScanLifecycle::Scanning && !status.is_refreshing {
            return status;
        }
        if Instant::now() >= deadline {
            panic!("scan {scan_id} did not settle: {status:?}");
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
