use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{AssetContainerType, AssetRecord, ScanContainer};
use crate::reader::ContainerReader;
use crate::scan::CancellationToken;

/// Namespace for the deterministic assetId digest. The id must be stable
/// across reruns on unchanged containers so cached selections reconcile.
const ASSET_ID_NAMESPACE: Uuid = Uuid::from_u128(0x8f1c_2a4e_6d35_4b0a_9c7e_51d2_83f6_0b19);

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "tga"];
const AUDIO_EXTENSIONS: &[&str] = &["ogg", "mp3", "wav", "flac"];

#[derive(Debug, Default)]
pub struct ContainerExtraction {
    pub records: Vec<AssetRecord>,
    pub malformed_entries: usize,
    pub cancelled: bool,
}

/// Walks one container and emits records for every admissible entry.
/// Cancellation is honored before each entry; a malformed entry bumps the
/// tally and never aborts the container.
pub fn extract_container(
    container: &ScanContainer,
    reader: &mut ContainerReader,
    cancel: &CancellationToken,
) -> Result<ContainerExtraction> {
    let mut extraction = ContainerExtraction::default();
    let entries = reader.enumerate()?;

    for entry_path in entries {
        if cancel.is_cancelled() {
            extraction.cancelled = true;
            break;
        }

        match classify_entry(container, &entry_path) {
            Some(record) => extraction.records.push(record),
            None => {
                if is_malformed_entry(&entry_path) {
                    extraction.malformed_entries += 1;
                    debug!(
                        container = %container.container_path.display(),
                        entry = %entry_path,
                        "skipping malformed entry"
                    );
                }
            }
        }
    }

    Ok(extraction)
}

/// Applies the admission rules and derives the record metadata for a single
/// normalized entry path. Returns `None` for entries that are filtered out.
pub fn classify_entry(container: &ScanContainer, entry_path: &str) -> Option<AssetRecord> {
    if is_malformed_entry(entry_path) || is_junk_entry(entry_path) {
        return None;
    }

    let (namespace, relative_asset_path) = match container.container_type {
        AssetContainerType::AssetIndex => parse_asset_index_path(entry_path)?,
        _ => parse_assets_path(entry_path)?,
    };

    let extension = extension_of(&relative_asset_path);
    let container_path = container.path_key();
    let asset_id = derive_asset_id(&container_path, entry_path);
    let key = format!(
        "{} / {} / {}",
        container.source_name, namespace, relative_asset_path
    );

    Some(AssetRecord {
        asset_id,
        key,
        source_type: container.source_type,
        source_name: container.source_name.clone(),
        namespace,
        relative_asset_path,
        extension: extension.clone(),
        is_image: is_image_extension(&extension),
        is_audio: is_audio_extension(&extension),
        container_path,
        container_type: container.container_type,
        entry_path: entry_path.to_string(),
    })
}

/// 128-bit digest of `(containerPath, entryPath)` as a short hex string.
pub fn derive_asset_id(container_path: &str, entry_path: &str) -> String {
    let material = format!("{container_path}\n{entry_path}");
    Uuid::new_v5(&ASSET_ID_NAMESPACE, material.as_bytes())
        .simple()
        .to_string()
}

/// `…/assets/<namespace>/<rest>` with a non-empty namespace segment. The
/// `assets` anchor may sit below a prefix (mods occasionally nest their
/// resource tree), so the first `assets` segment wins.
fn parse_assets_path(entry_path: &str) -> Option<(String, String)> {
    let segments: Vec<&str> = entry_path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();
    let assets_index = segments.iter().position(|segment| *segment == "assets")?;

    if segments.len() <= assets_index + 2 {
        return None;
    }

    let namespace = segments.get(assets_index + 1)?.to_string();
    let relative_asset_path = segments[assets_index + 2..].join("/");

    if namespace.is_empty() || relative_asset_path.is_empty() {
        return None;
    }

    Some((namespace, relative_asset_path))
}

/// Asset-index virtual paths carry no `assets/` prefix; everything is
/// admitted under the `minecraft` namespace by convention, with an explicit
/// `minecraft/` prefix stripped from the relative path.
fn parse_asset_index_path(entry_path: &str) -> Option<(String, String)> {
    let relative = entry_path.strip_prefix("minecraft/").unwrap_or(entry_path);
    if relative.is_empty() {
        return None;
    }

    Some(("minecraft".to_string(), relative.to_string()))
}

fn extension_of(relative_asset_path: &str) -> String {
    let file_name = relative_asset_path
        .rsplit('/')
        .next()
        .unwrap_or(relative_asset_path);

    file_name
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Path-traversal segments and NUL bytes never become records; they count
/// toward the malformed tally.
fn is_malformed_entry(entry_path: &str) -> bool {
    entry_path.contains('\0') || entry_path.split('/').any(|segment| segment == "..")
}

/// macOS resource forks and finder droppings.
fn is_junk_entry(entry_path: &str) -> bool {
    entry_path.starts_with("__MACOSX/")
        || entry_path.contains("/__MACOSX/")
        || entry_path
            .rsplit('/')
            .next()
            .map(|name| name == ".DS_Store")
            .unwrap_or(false)
}

pub fn is_image_extension(extension: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&extension)
}

pub fn is_audio_extension(extension: &str) -> bool {
    AUDIO_EXTENSIONS.contains(&extension)
}
