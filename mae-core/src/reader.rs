use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::error::{EngineError, Result};
use crate::model::{AssetContainerType, AssetRecord};

/// Uniform lazy read surface over the three physical container forms.
///
/// Enumeration never loads file bytes; `read` returns one entry's bytes and
/// retains nothing. A reader instance is not thread safe — each scan worker
/// opens its own, and export/preview paths reopen through a [`ReaderCache`].
#[derive(Debug)]
pub enum ContainerReader {
    Directory(DirectoryReader),
    Archive(ArchiveReader),
    AssetIndex(AssetIndexReader),
}

impl ContainerReader {
    pub fn open(container_path: &Path, container_type: AssetContainerType) -> Result<Self> {
        match container_type {
            AssetContainerType::Directory => Ok(ContainerReader::Directory(DirectoryReader {
                root: container_path.to_path_buf(),
            })),
            AssetContainerType::Zip | AssetContainerType::Jar => {
                Ok(ContainerReader::Archive(ArchiveReader::open(container_path)?))
            }
            AssetContainerType::AssetIndex => Ok(ContainerReader::AssetIndex(
                AssetIndexReader::open(container_path)?,
            )),
        }
    }

    /// Forward-slash-normalized entry paths. Order is deterministic per
    /// container form (directory walk order, archive central directory
    /// order, sorted index keys).
    pub fn enumerate(&mut self) -> Result<Vec<String>> {
        match self {
            ContainerReader::Directory(reader) => reader.enumerate(),
            ContainerReader::Archive(reader) => Ok(reader.enumerate()),
            ContainerReader::AssetIndex(reader) => Ok(reader.enumerate()),
        }
    }

    pub fn read(&mut self, entry_path: &str) -> Result<Vec<u8>> {
        match self {
            ContainerReader::Directory(reader) => reader.read(entry_path),
            ContainerReader::Archive(reader) => reader.read(entry_path),
            ContainerReader::AssetIndex(reader) => reader.read(entry_path),
        }
    }

    /// Entry size without reading the bytes; lets the preview cap reject
    /// oversized payloads cheaply.
    pub fn entry_size(&mut self, entry_path: &str) -> Result<u64> {
        match self {
            ContainerReader::Directory(reader) => reader.entry_size(entry_path),
            ContainerReader::Archive(reader) => reader.entry_size(entry_path),
            ContainerReader::AssetIndex(reader) => reader.entry_size(entry_path),
        }
    }
}

#[derive(Debug)]
pub struct DirectoryReader {
    root: PathBuf,
}

impl DirectoryReader {
    fn enumerate(&self) -> Result<Vec<String>> {
        let mut entries = Vec::new();

        for entry in WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };

            entries.push(normalize_entry_path(&relative.to_string_lossy()));
        }

        Ok(entries)
    }

    fn read(&self, entry_path: &str) -> Result<Vec<u8>> {
        let file_path = self.root.join(entry_path);
        fs::read(&file_path).map_err(|error| {
            EngineError::Read(format!("Failed to read file {}: {error}", file_path.display()))
        })
    }

    fn entry_size(&self, entry_path: &str) -> Result<u64> {
        let file_path = self.root.join(entry_path);
        fs::metadata(&file_path).map(|meta| meta.len()).map_err(|error| {
            EngineError::Read(format!("Failed to stat file {}: {error}", file_path.display()))
        })
    }
}

/// Zip/jar reader. The central directory is parsed once at open; individual
/// entries decompress on demand.
#[derive(Debug)]
pub struct ArchiveReader {
    path: PathBuf,
    archive: ZipArchive<fs::File>,
}

impl ArchiveReader {
    fn open(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).map_err(|error| {
            EngineError::Container(format!("Failed to open archive {}: {error}", path.display()))
        })?;

        let archive = ZipArchive::new(file).map_err(|error| {
            EngineError::Container(format!("Failed to read archive {}: {error}", path.display()))
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            archive,
        })
    }

    fn enumerate(&mut self) -> Vec<String> {
        let mut entries = Vec::new();

        for index in 0..self.archive.len() {
            let Ok(entry) = self.archive.by_index(index) else {
                continue;
            };

            if entry.is_dir() {
                continue;
            }

            entries.push(normalize_entry_path(entry.name()));
        }

        entries
    }

    fn read(&mut self, entry_path: &str) -> Result<Vec<u8>> {
        let mut entry = self.archive.by_name(entry_path).map_err(|error| {
            EngineError::Read(format!(
                "Failed to open entry {entry_path} in {}: {error}",
                self.path.display()
            ))
        })?;

        let mut buffer = Vec::new();
        entry.read_to_end(&mut buffer).map_err(|error| {
            EngineError::Read(format!(
                "Failed to read entry {entry_path} in {}: {error}",
                self.path.display()
            ))
        })?;

        Ok(buffer)
    }

    fn entry_size(&mut self, entry_path: &str) -> Result<u64> {
        let entry = self.archive.by_name(entry_path).map_err(|error| {
            EngineError::Read(format!(
                "Failed to open entry {entry_path} in {}: {error}",
                self.path.display()
            ))
        })?;

        Ok(entry.size())
    }
}

#[derive(Debug, Deserialize)]
struct AssetIndexFile {
    objects: HashMap<String, AssetIndexObject>,
}

#[derive(Debug, Deserialize)]
struct AssetIndexObject {
    hash: String,
}

/// Minecraft asset index: a JSON map of virtual paths to hashed object
/// files under the shared assets tree. The index path is
/// `<assets>/indexes/<id>.json`; objects live at `<assets>/objects/<hh>/<hash>`.
#[derive(Debug)]
pub struct AssetIndexReader {
    index_path: PathBuf,
    objects_root: PathBuf,
    objects: HashMap<String, String>,
}

impl AssetIndexReader {
    fn open(index_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(index_path).map_err(|error| {
            EngineError::Container(format!(
                "Failed to read asset index {}: {error}",
                index_path.display()
            ))
        })?;

        let parsed: AssetIndexFile = serde_json::from_str(&content).map_err(|error| {
            EngineError::Container(format!(
                "Failed to parse asset index {}: {error}",
                index_path.display()
            ))
        })?;

        let objects_root = index_path
            .parent()
            .and_then(Path::parent)
            .map(|assets_root| assets_root.join("objects"))
            .ok_or_else(|| {
                EngineError::Container(format!(
                    "Invalid asset index path (cannot resolve assets root): {}",
                    index_path.display()
                ))
            })?;

        let objects = parsed
            .objects
            .into_iter()
            .map(|(virtual_path, object)| (normalize_entry_path(&virtual_path), object.hash))
            .collect();

        Ok(Self {
            index_path: index_path.to_path_buf(),
            objects_root,
            objects,
        })
    }

    fn enumerate(&self) -> Vec<String> {
        let mut entries: Vec<String> = self.objects.keys().cloned().collect();
        entries.sort();
        entries
    }

    fn object_path(&self, entry_path: &str) -> Result<PathBuf> {
        let hash = self.objects.get(entry_path).ok_or_else(|| {
            EngineError::Read(format!(
                "No such entry {entry_path} in asset index {}",
                self.index_path.display()
            ))
        })?;

        if hash.len() < 2 {
            return Err(EngineError::Read(format!(
                "Malformed object hash for {entry_path} in {}",
                self.index_path.display()
            )));
        }

        Ok(self.objects_root.join(&hash[0..2]).join(hash))
    }

    fn read(&self, entry_path: &str) -> Result<Vec<u8>> {
        let path = self.object_path(entry_path)?;
        fs::read(&path).map_err(|error| {
            EngineError::Read(format!(
                "Missing hashed object {} for {entry_path}: {error}",
                path.display()
            ))
        })
    }

    fn entry_size(&self, entry_path: &str) -> Result<u64> {
        let path = self.object_path(entry_path)?;
        fs::metadata(&path).map(|meta| meta.len()).map_err(|error| {
            EngineError::Read(format!(
                "Missing hashed object {} for {entry_path}: {error}",
                path.display()
            ))
        })
    }
}

/// Per-operation reader pool for preview and export. Archives keep their
/// central directory cached for the operation's lifetime; nothing is shared
/// across threads.
#[derive(Default)]
pub struct ReaderCache {
    readers: HashMap<String, ContainerReader>,
}

impl ReaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn reader_for(&mut self, record: &AssetRecord) -> Result<&mut ContainerReader> {
        if !self.readers.contains_key(&record.container_path) {
            let reader = ContainerReader::open(
                Path::new(&record.container_path),
                record.container_type,
            )?;
            self.readers.insert(record.container_path.clone(), reader);
        }

        Ok(self
            .readers
            .get_mut(&record.container_path)
            .expect("reader inserted above"))
    }

    pub fn read(&mut self, record: &AssetRecord) -> Result<Vec<u8>> {
        self.reader_for(record)?.read(&record.entry_path)
    }

    pub fn entry_size(&mut self, record: &AssetRecord) -> Result<u64> {
        self.reader_for(record)?.entry_size(&record.entry_path)
    }
}

pub fn normalize_entry_path(raw: &str) -> String {
    raw.replace('\\', "/")
}
