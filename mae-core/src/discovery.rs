use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::launcher::{minecraft_dir, parse_minecraft_version};
use crate::model::{AssetContainerType, AssetSourceType, ScanContainer};

#[derive(Debug, Clone, Copy)]
pub struct SourceToggles {
    pub vanilla: bool,
    pub mods: bool,
    pub resourcepacks: bool,
}

impl SourceToggles {
    pub fn any(&self) -> bool {
        self.vanilla || self.mods || self.resourcepacks
    }
}

/// Ordered container list for one instance: vanilla first, then mods and
/// resource packs each sorted by file name. The ordering is observable
/// downstream — tied search results come back in this order.
pub fn collect_containers(
    prism_root: &Path,
    instance_dir: &Path,
    toggles: SourceToggles,
) -> Result<Vec<ScanContainer>> {
    if !instance_dir.is_dir() {
        return Err(EngineError::Config(format!(
            "Instance directory not found: {}",
            instance_dir.display()
        )));
    }

    let mut containers = Vec::new();

    if toggles.vanilla {
        collect_vanilla_containers(prism_root, instance_dir, &mut containers);
    }

    let game_dir = minecraft_dir(instance_dir);

    if toggles.mods {
        if let Some(game_dir) = &game_dir {
            collect_mod_containers(&game_dir.join("mods"), &mut containers)?;
        }
    }

    if toggles.resourcepacks {
        if let Some(game_dir) = &game_dir {
            collect_resourcepack_containers(&game_dir.join("resourcepacks"), &mut containers)?;
        }
    }

    Ok(containers)
}

fn collect_vanilla_containers(
    prism_root: &Path,
    instance_dir: &Path,
    containers: &mut Vec<ScanContainer>,
) {
    let Some(mc_version) = parse_minecraft_version(&instance_dir.join("mmc-pack.json")) else {
        warn!(
            instance = %instance_dir.display(),
            "no net.minecraft component in mmc-pack.json, skipping vanilla sources"
        );
        return;
    };

    let source_name = format!("minecraft-{mc_version}");

    if let Some(index_path) = resolve_vanilla_asset_index(prism_root, &mc_version) {
        containers.push(ScanContainer {
            source_type: AssetSourceType::Vanilla,
            source_name: source_name.clone(),
            container_type: AssetContainerType::AssetIndex,
            container_path: index_path,
        });
    } else {
        debug!(version = %mc_version, "no shared asset index for instance version");
    }

    let client_jar = prism_root
        .join("libraries")
        .join("com")
        .join("mojang")
        .join("minecraft")
        .join(&mc_version)
        .join(format!("minecraft-{mc_version}-client.jar"));

    if client_jar.is_file() {
        containers.push(ScanContainer {
            source_type: AssetSourceType::Vanilla,
            source_name,
            container_type: AssetContainerType::Jar,
            container_path: client_jar,
        });
    }
}

/// `meta/net.minecraft/<version>.json` names the asset-index id; the index
/// itself lives in the launcher's shared `assets/indexes` tree.
fn resolve_vanilla_asset_index(prism_root: &Path, mc_version: &str) -> Option<PathBuf> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct MetaVersion {
        asset_index: Option<MetaAssetIndex>,
        assets: Option<String>,
    }

    #[derive(serde::Deserialize)]
    struct MetaAssetIndex {
        id: String,
    }

    let meta_path = prism_root
        .join("meta")
        .join("net.minecraft")
        .join(format!("{mc_version}.json"));
    let content = fs::read_to_string(meta_path).ok()?;
    let parsed: MetaVersion = serde_json::from_str(&content).ok()?;

    let index_id = parsed
        .asset_index
        .map(|asset_index| asset_index.id)
        .or(parsed.assets)?;

    let index_path = prism_root
        .join("assets")
        .join("indexes")
        .join(format!("{index_id}.json"));

    index_path.is_file().then_some(index_path)
}

/// Non-recursive: jars and zips directly under `mods/`. `.disabled` files
/// are the launcher's off switch and are excluded.
fn collect_mod_containers(mods_dir: &Path, containers: &mut Vec<ScanContainer>) -> Result<()> {
    if !mods_dir.is_dir() {
        return Ok(());
    }

    for path in sorted_dir_entries(mods_dir)? {
        if !path.is_file() {
            continue;
        }

        let file_name = path
            .file_name()
            .map(|value| value.to_string_lossy().to_string())
            .unwrap_or_default();
        if file_name.to_ascii_lowercase().ends_with(".disabled") {
            continue;
        }

        let container_type = match path_extension(&path).as_str() {
            "jar" => AssetContainerType::Jar,
            "zip" => AssetContainerType::Zip,
            _ => continue,
        };

        containers.push(ScanContainer {
            source_type: AssetSourceType::Mod,
            source_name: file_stem(&path, "unknown-mod"),
            container_type,
            container_path: path,
        });
    }

    Ok(())
}

fn collect_resourcepack_containers(
    packs_dir: &Path,
    containers: &mut Vec<ScanContainer>,
) -> Result<()> {
    if !packs_dir.is_dir() {
        return Ok(());
    }

    for path in sorted_dir_entries(packs_dir)? {
        if path.is_dir() {
            if !path.join("assets").is_dir() && !path.join("pack.mcmeta").is_file() {
                warn!(
                    pack = %path.display(),
                    "skipping resource pack folder without assets/ or pack.mcmeta"
                );
                continue;
            }

            containers.push(ScanContainer {
                source_type: AssetSourceType::ResourcePack,
                source_name: file_stem(&path, "resourcepack"),
                container_type: AssetContainerType::Directory,
                container_path: path,
            });
        } else if path_extension(&path) == "zip" {
            containers.push(ScanContainer {
                source_type: AssetSourceType::ResourcePack,
                source_name: file_stem(&path, "resourcepack"),
                container_type: AssetContainerType::Zip,
                container_path: path,
            });
        } else {
            warn!(pack = %path.display(), "skipping unrecognized resource pack entry");
        }
    }

    Ok(())
}

fn sorted_dir_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|error| {
        EngineError::Discovery(format!("Failed to read {}: {error}", dir.display()))
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    paths.sort_by_key(|path| path.file_name().map(|name| name.to_os_string()));
    Ok(paths)
}

fn path_extension(path: &Path) -> String {
    path.extension()
        .map(|value| value.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

fn file_stem(path: &Path, fallback: &str) -> String {
    let stem = if path.is_dir() {
        path.file_name()
    } else {
        path.file_stem()
    };
    stem.map(|value| value.to_string_lossy().to_string())
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn toggles(vanilla: bool, mods: bool, resourcepacks: bool) -> SourceToggles {
        SourceToggles {
            vanilla,
            mods,
            resourcepacks,
        }
    }

    #[test]
    fn missing_instance_dir_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let error = collect_containers(
            dir.path(),
            &dir.path().join("instances/nope"),
            toggles(true, true, true),
        )
        .unwrap_err();
        assert_eq!(error.kind(), "ConfigError");
    }

    #[test]
    fn missing_subtrees_yield_an_empty_slice() {
        let dir = tempfile::tempdir().expect("tempdir");
        let instance = dir.path().join("instances/empty");
        fs::create_dir_all(instance.join("minecraft")).expect("instance tree");

        let containers =
            collect_containers(dir.path(), &instance, toggles(true, true, true)).expect("ok");
        assert!(containers.is_empty());
    }

    #[test]
    fn mods_sorted_by_filename_and_disabled_excluded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let instance = dir.path().join("instances/pack");
        let mods = instance.join("minecraft/mods");
        fs::create_dir_all(&mods).expect("mods dir");
        fs::write(mods.join("zeta.jar"), b"z").expect("zeta");
        fs::write(mods.join("alpha.zip"), b"a").expect("alpha");
        fs::write(mods.join("beta.jar.disabled"), b"b").expect("disabled");
        fs::write(mods.join("readme.txt"), b"r").expect("noise");

        let containers =
            collect_containers(dir.path(), &instance, toggles(false, true, false)).expect("ok");
        let names: Vec<&str> = containers
            .iter()
            .map(|container| container.source_name.as_str())
            .collect();
        assert_eq!(names, ["alpha", "zeta"]);
        assert_eq!(containers[0].container_type, AssetContainerType::Zip);
        assert_eq!(containers[1].container_type, AssetContainerType::Jar);
    }

    #[test]
    fn resourcepack_shapes_are_filtered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let instance = dir.path().join("instances/pack");
        let packs = instance.join("minecraft/resourcepacks");
        fs::create_dir_all(packs.join("good-folder/assets/minecraft")).expect("good folder");
        fs::create_dir_all(packs.join("mcmeta-only")).expect("mcmeta folder");
        fs::write(packs.join("mcmeta-only/pack.mcmeta"), b"{}").expect("mcmeta");
        fs::create_dir_all(packs.join("random-folder")).expect("bad folder");
        fs::write(packs.join("archive.zip"), b"zip").expect("zip");
        fs::write(packs.join("stray.txt"), b"txt").expect("stray");

        let containers =
            collect_containers(dir.path(), &instance, toggles(false, false, true)).expect("ok");
        let names: Vec<&str> = containers
            .iter()
            .map(|container| container.source_name.as_str())
            .collect();
        assert_eq!(names, ["archive", "good-folder", "mcmeta-only"]);
    }

    #[test]
    fn vanilla_without_version_degrades_to_no_containers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let instance = dir.path().join("instances/bare");
        fs::create_dir_all(instance.join("minecraft")).expect("instance tree");
        // No mmc-pack.json at all.

        let containers =
            collect_containers(dir.path(), &instance, toggles(true, false, false)).expect("ok");
        assert!(containers.is_empty());
    }

    #[test]
    fn vanilla_resolves_client_jar_and_asset_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        let instance = root.join("instances/vanilla");
        fs::create_dir_all(instance.join("minecraft")).expect("instance tree");
        fs::write(
            instance.join("mmc-pack.json"),
            r#"{"components":[{"uid":"net.minecraft","version":"1.21.1"}]}"#,
        )
        .expect("mmc-pack");

        let jar_dir = root.join("libraries/com/mojang/minecraft/1.21.1");
        fs::create_dir_all(&jar_dir).expect("jar dir");
        fs::write(jar_dir.join("minecraft-1.21.1-client.jar"), b"jar").expect("jar");

        fs::create_dir_all(root.join("meta/net.minecraft")).expect("meta dir");
        fs::write(
            root.join("meta/net.minecraft/1.21.1.json"),
            r#"{"assetIndex":{"id":"17"}}"#,
        )
        .expect("meta");
        fs::create_dir_all(root.join("assets/indexes")).expect("indexes dir");
        fs::write(root.join("assets/indexes/17.json"), r#"{"objects":{}}"#).expect("index");

        let containers =
            collect_containers(root, &instance, toggles(true, false, false)).expect("ok");
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].container_type, AssetContainerType::AssetIndex);
        assert_eq!(containers[1].container_type, AssetContainerType::Jar);
        assert!(containers
            .iter()
            .all(|container| container.source_name == "minecraft-1.21.1"));
    }
}
