use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{EngineError, Result};
use crate::model::{InstanceInfo, PrismRootCandidate};

#[derive(Debug, Deserialize)]
struct MmcPack {
    components: Vec<MmcComponent>,
}

#[derive(Debug, Deserialize)]
struct MmcComponent {
    uid: String,
    version: Option<String>,
}

/// Known Prism Launcher locations plus `PRISM_ROOT`, deduped and flagged.
pub fn detect_prism_roots() -> Result<Vec<PrismRootCandidate>> {
    let mut candidates = Vec::new();

    if let Some(home) = home_dir() {
        candidates.push(build_candidate(
            home.join("Library/Application Support/PrismLauncher"),
            "macos-default",
        ));
        candidates.push(build_candidate(
            home.join(".local/share/PrismLauncher"),
            "linux-default",
        ));
        candidates.push(build_candidate(home.join("PrismLauncher"), "portable-home"));
    }

    if let Some(app_data) = env::var_os("APPDATA") {
        candidates.push(build_candidate(
            PathBuf::from(app_data).join("PrismLauncher"),
            "windows-default",
        ));
    }

    if let Ok(custom_root) = env::var("PRISM_ROOT") {
        candidates.push(build_candidate(
            PathBuf::from(custom_root),
            "env-prism-root",
        ));
    }

    let mut seen = HashSet::new();
    let deduped: Vec<PrismRootCandidate> = candidates
        .into_iter()
        .filter(|candidate| seen.insert(candidate.path.clone()))
        .collect();

    if deduped.is_empty() {
        return Err(EngineError::Config(
            "No Prism Launcher candidates were found on this machine".to_string(),
        ));
    }

    Ok(deduped)
}

pub fn list_instances(prism_root: &str) -> Result<Vec<InstanceInfo>> {
    let prism_root = expand_home(prism_root);
    validate_prism_root(&prism_root)?;

    let instances_dir = prism_root.join("instances");
    if !instances_dir.exists() {
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(&instances_dir).map_err(|error| {
        EngineError::Discovery(format!("Failed to read instances directory: {error}"))
    })?;

    let mut instances = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else { continue };

        let instance_path = entry.path();
        if !instance_path.is_dir() {
            continue;
        }

        let folder_name = entry.file_name().to_string_lossy().to_string();
        if folder_name.starts_with('.') {
            continue;
        }

        // Real Prism instances carry profile metadata and a minecraft folder.
        if !instance_path.join("mmc-pack.json").is_file()
            || minecraft_dir(&instance_path).is_none()
        {
            continue;
        }

        let display_name =
            instance_display_name(&instance_path).unwrap_or_else(|| folder_name.clone());
        let minecraft_version = parse_minecraft_version(&instance_path.join("mmc-pack.json"));

        instances.push(InstanceInfo {
            folder_name,
            display_name,
            path: instance_path.to_string_lossy().to_string(),
            minecraft_version,
        });
    }

    instances.sort_by(|left, right| left.display_name.cmp(&right.display_name));
    Ok(instances)
}

pub fn validate_prism_root(path: &Path) -> Result<()> {
    if !is_valid_prism_root(path) {
        return Err(EngineError::Config(format!(
            "Invalid Prism root: {} (expected folders: instances and libraries)",
            path.to_string_lossy()
        )));
    }

    Ok(())
}

pub fn is_valid_prism_root(path: &Path) -> bool {
    path.is_dir() && path.join("instances").is_dir() && path.join("libraries").is_dir()
}

pub fn resolve_instance_dir(prism_root: &Path, instance_folder: &str) -> Result<PathBuf> {
    let requested = expand_home(instance_folder);
    if requested.is_dir()
        && requested
            .parent()
            .map(|parent| parent.ends_with("instances"))
            .unwrap_or(false)
    {
        return Ok(requested);
    }

    let folder_name = Path::new(instance_folder)
        .file_name()
        .map(|value| value.to_string_lossy().to_string())
        .unwrap_or_else(|| instance_folder.to_string());

    let path = prism_root.join("instances").join(folder_name);
    if !path.is_dir() {
        return Err(EngineError::Config(format!(
            "Instance directory not found: {}",
            path.display()
        )));
    }

    Ok(path)
}

/// The instance's game directory. Prism uses `minecraft`, MultiMC-era
/// instances use `.minecraft`.
pub fn minecraft_dir(instance_dir: &Path) -> Option<PathBuf> {
    for name in ["minecraft", ".minecraft"] {
        let candidate = instance_dir.join(name);
        if candidate.is_dir() {
            return Some(candidate);
        }
    }
    None
}

pub fn parse_minecraft_version(mmc_pack_path: &Path) -> Option<String> {
    let content = fs::read_to_string(mmc_pack_path).ok()?;
    let parsed: MmcPack = serde_json::from_str(&content).ok()?;

    parsed
        .components
        .into_iter()
        .find(|component| component.uid == "net.minecraft")
        .and_then(|component| component.version)
}

pub fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME").map(PathBuf::from)
}

pub fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }

    if path == "~" {
        if let Some(home) = home_dir() {
            return home;
        }
    }

    PathBuf::from(path)
}

fn build_candidate(path: PathBuf, source: &str) -> PrismRootCandidate {
    let exists = path.exists();
    let valid = is_valid_prism_root(&path);

    PrismRootCandidate {
        path: path.to_string_lossy().to_string(),
        exists,
        valid,
        source: source.to_string(),
    }
}

fn instance_display_name(instance_dir: &Path) -> Option<String> {
    let config_path = instance_dir.join("instance.cfg");
    let content = fs::read_to_string(config_path).ok()?;

    let mut in_general_section = false;

    for raw_line in content.lines() {
        let line = raw_line.trim();

        if line.starts_with('[') && line.ends_with(']') {
            in_general_section = line.eq_ignore_ascii_case("[General]");
            continue;
        }

        if in_general_section && line.starts_with("name=") {
            let name = line.trim_start_matches("name=").trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parses_minecraft_component_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pack_path = dir.path().join("mmc-pack.json");
        fs::write(
            &pack_path,
            r#"{
                "components": [
                    { "uid": "net.fabricmc.fabric-loader", "version": "0.16.5" },
                    { "uid": "net.minecraft", "version": "1.21.1" }
                ]
            }"#,
        )
        .expect("write mmc-pack");

        assert_eq!(parse_minecraft_version(&pack_path).as_deref(), Some("1.21.1"));
    }

    #[test]
    fn reads_display_name_from_general_section() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("instance.cfg"),
            "[General]\nConfigVersion=1.2\nname=All The Mods 10\n",
        )
        .expect("write instance.cfg");

        assert_eq!(
            instance_display_name(dir.path()).as_deref(),
            Some("All The Mods 10")
        );
    }

    #[test]
    fn lists_only_real_instances_sorted_by_display_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs::create_dir_all(root.join("libraries")).expect("libraries");
        for (folder, name) in [("zebra", "Zebra Pack"), ("alpha", "Alpha Pack")] {
            let instance = root.join("instances").join(folder);
            fs::create_dir_all(instance.join("minecraft")).expect("instance tree");
            fs::write(
                instance.join("mmc-pack.json"),
                r#"{"components":[{"uid":"net.minecraft","version":"1.20.1"}]}"#,
            )
            .expect("mmc-pack");
            fs::write(instance.join("instance.cfg"), format!("[General]\nname={name}\n"))
                .expect("instance.cfg");
        }
        // Not an instance: no mmc-pack.json.
        fs::create_dir_all(root.join("instances").join("_LAUNCHER_TEMP")).expect("noise");

        let instances = list_instances(&root.to_string_lossy()).expect("list");
        let names: Vec<&str> = instances
            .iter()
            .map(|instance| instance.display_name.as_str())
            .collect();
        assert_eq!(names, ["Alpha Pack", "Zebra Pack"]);
        assert_eq!(instances[0].minecraft_version.as_deref(), Some("1.20.1"));
    }

    #[test]
    fn invalid_root_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let error = list_instances(&dir.path().to_string_lossy()).unwrap_err();
        assert_eq!(error.kind(), "ConfigError");
    }
}
