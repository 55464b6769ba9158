use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use ffmpeg_sidecar::download::{download_ffmpeg_package, ffmpeg_download_url, unpack_ffmpeg};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::model::AudioFormat;

/// Audio conversion collaborator for the export executor. The engine only
/// calls it for audio assets with a non-original target format.
pub trait AudioTranscoder: Send + Sync {
    fn transcode(&self, input: &[u8], output_path: &Path, format: AudioFormat) -> Result<()>;
}

/// Trailing encoder arguments per target format.
fn codec_args(format: AudioFormat) -> &'static [&'static str] {
    match format {
        AudioFormat::Original => &["-c:a", "copy"],
        AudioFormat::Mp3 => &["-c:a", "libmp3lame", "-q:a", "2"],
        AudioFormat::Wav => &["-c:a", "pcm_s16le"],
    }
}

/// ffmpeg-backed transcoder.
///
/// A usable binary is looked up once per engine: every candidate location
/// is probed in order, and only when none answers is a private runtime
/// fetched into `runtime_dir` through ffmpeg-sidecar. Conversion itself
/// stages the entry bytes next to the output file and runs one batch
/// ffmpeg invocation over them.
pub struct FfmpegTranscoder {
    runtime_dir: PathBuf,
    resolved: Mutex<Option<PathBuf>>,
}

impl FfmpegTranscoder {
    pub fn new(runtime_dir: PathBuf) -> Self {
        Self {
            runtime_dir,
            resolved: Mutex::new(None),
        }
    }

    fn resolve(&self) -> Result<PathBuf> {
        if let Some(path) = self.resolved.lock().ok().and_then(|cached| cached.clone()) {
            return Ok(path);
        }

        let path = self.find_or_install()?;
        if let Ok(mut cached) = self.resolved.lock() {
            *cached = Some(path.clone());
        }
        Ok(path)
    }

    fn find_or_install(&self) -> Result<PathBuf> {
        for candidate in self.candidates() {
            if probe_ffmpeg(&candidate) {
                debug!(ffmpeg = %candidate.display(), "using ffmpeg");
                return Ok(candidate);
            }
        }

        info!("no usable ffmpeg found, fetching a private runtime");
        let installed = self.install_runtime()?;
        if !probe_ffmpeg(&installed) {
            return Err(EngineError::Transcode(
                "the fetched ffmpeg runtime does not run; install ffmpeg and put it on PATH"
                    .to_string(),
            ));
        }

        Ok(installed)
    }

    /// Lookup order: whatever `ffmpeg` PATH resolution finds, then a
    /// runtime unpacked by an earlier session.
    fn candidates(&self) -> [PathBuf; 2] {
        [PathBuf::from("ffmpeg"), self.runtime_binary()]
    }

    fn runtime_binary(&self) -> PathBuf {
        let name = if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" };
        self.runtime_dir.join(name)
    }

    fn install_runtime(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.runtime_dir).map_err(|error| {
            EngineError::Transcode(format!(
                "cannot create runtime directory {}: {error}",
                self.runtime_dir.display()
            ))
        })?;

        let url = ffmpeg_download_url().map_err(|error| {
            EngineError::Transcode(format!(
                "no ffmpeg build available for this platform: {error}"
            ))
        })?;
        let package = download_ffmpeg_package(url, &self.runtime_dir)
            .map_err(|error| EngineError::Transcode(format!("ffmpeg download failed: {error}")))?;
        unpack_ffmpeg(&package, &self.runtime_dir)
            .map_err(|error| EngineError::Transcode(format!("ffmpeg unpack failed: {error}")))?;

        Ok(self.runtime_binary())
    }
}

impl AudioTranscoder for FfmpegTranscoder {
    fn transcode(&self, input: &[u8], output_path: &Path, format: AudioFormat) -> Result<()> {
        let ffmpeg = self.resolve()?;

        // ffmpeg wants a seekable input for container probing; stage the
        // bytes next to the output so both land on the same filesystem.
        let staging = output_path.with_extension("ffmpeg-in");
        fs::write(&staging, input).map_err(|error| {
            EngineError::Transcode(format!("cannot stage audio input: {error}"))
        })?;

        let invocation = Command::new(&ffmpeg)
            .args(["-hide_banner", "-nostdin", "-loglevel", "error", "-y"])
            .arg("-i")
            .arg(&staging)
            .arg("-vn")
            .args(codec_args(format))
            .arg(output_path)
            .output();

        let _ = fs::remove_file(&staging);

        let invocation = invocation.map_err(|error| {
            EngineError::Transcode(format!("could not launch ffmpeg: {error}"))
        })?;

        if !invocation.status.success() {
            let stderr = String::from_utf8_lossy(&invocation.stderr);
            return Err(EngineError::Transcode(format!(
                "audio conversion to {} failed: {}",
                output_path
                    .extension()
                    .map(|ext| ext.to_string_lossy().to_string())
                    .unwrap_or_else(|| "audio".to_string()),
                stderr.trim()
            )));
        }

        Ok(())
    }
}

fn probe_ffmpeg(path: &Path) -> bool {
    Command::new(path)
        .arg("-version")
        .output()
        .map(|probe| probe.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_args_select_the_target_encoder() {
        assert_eq!(codec_args(AudioFormat::Original), ["-c:a", "copy"]);
        assert_eq!(codec_args(AudioFormat::Mp3), ["-c:a", "libmp3lame", "-q:a", "2"]);
        assert_eq!(codec_args(AudioFormat::Wav), ["-c:a", "pcm_s16le"]);
    }

    #[test]
    fn runtime_binary_is_platform_suffixed() {
        let transcoder = FfmpegTranscoder::new(PathBuf::from("/data/ffmpeg-runtime"));
        let binary = transcoder.runtime_binary();
        if cfg!(windows) {
            assert!(binary.ends_with("ffmpeg.exe"));
        } else {
            assert!(binary.ends_with("ffmpeg"));
        }
    }
}
