use base64::Engine as _;

use crate::error::{EngineError, Result};
use crate::model::{AssetPreviewResponse, AssetRecord};
use crate::reader::ReaderCache;

/// Built-in extension→mime map. Unknown extensions serve as octet-stream;
/// what to render is the client's call.
pub fn mime_for_extension(extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tga" => "image/x-tga",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "json" | "mcmeta" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Reads the asset verbatim and returns it base64-encoded, refusing
/// payloads above the size cap before any bytes are read.
pub fn preview_for_record(
    record: &AssetRecord,
    readers: &mut ReaderCache,
    max_bytes: u64,
) -> Result<AssetPreviewResponse> {
    let size = readers.entry_size(record)?;
    if size > max_bytes {
        return Err(EngineError::PreviewTooLarge {
            size,
            limit: max_bytes,
        });
    }

    let bytes = readers.read(record)?;
    Ok(AssetPreviewResponse {
        mime: mime_for_extension(&record.extension).to_string(),
        base64: base64::engine::general_purpose::STANDARD.encode(bytes),
    })
}
