//! Scan-and-serve engine for Minecraft instance assets.
//!
//! Discovers asset containers (vanilla asset index and client jar, mod
//! archives, resource packs) inside one launcher instance, indexes every
//! `assets/<namespace>/…` entry, serves paginated search and a virtual
//! folder tree, and materializes selections to disk or the clipboard.
//! Rescans of an unchanged instance are answered from a persistent snapshot
//! cache and reconciled in the background.

pub mod cache;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod events;
pub mod export;
pub mod extractor;
pub mod index;
pub mod launcher;
pub mod model;
pub mod preview;
pub mod reader;
pub mod scan;
pub mod transcode;

pub use engine::{Engine, EngineConfig};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventSink};
pub use export::FileClipboard;
pub use scan::CancellationToken;
pub use transcode::AudioTranscoder;
