pub mod decode;

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Stable identity of a registry entry. Never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntryId(pub u64);

/// Handle to picked file bytes held by a [`SourceStore`].
///
/// The handle itself owns nothing; the bytes stay reachable through the store until the
/// handle is revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SourceHandle(u64);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    pub fn short(&self) -> String {
        self.0[..6].iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.short())
    }
}

/// A file picked or dropped by the user, before it enters the registry.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl IncomingFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn read(path: &Path) -> Result<Self, AssetError> {
        let bytes = std::fs::read(path).map_err(|source| AssetError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("model.glb")
            .to_string();
        Ok(Self { name, bytes })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("selection index {index} out of range for {len} models")]
    SelectionOutOfRange { index: usize, len: usize },
}

/// Owns the bytes behind every live [`SourceHandle`].
///
/// Revoking a handle drops the store's reference; workers that already cloned the bytes
/// keep them alive until they finish.
#[derive(Default)]
pub struct SourceStore {
    next_id: u64,
    live: HashMap<SourceHandle, Arc<[u8]>>,
}

impl SourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, bytes: Vec<u8>) -> SourceHandle {
        self.next_id += 1;
        let handle = SourceHandle(self.next_id);
        self.live.insert(handle, Arc::from(bytes));
        handle
    }

    pub fn open(&self, handle: SourceHandle) -> Option<Arc<[u8]>> {
        self.live.get(&handle).cloned()
    }

    pub fn revoke(&mut self, handle: SourceHandle) -> bool {
        self.live.remove(&handle).is_some()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

impl fmt::Debug for SourceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceStore")
            .field("live", &self.live_count())
            .finish()
    }
}

impl Drop for SourceStore {
    fn drop(&mut self) {
        if self.live_count() > 0 {
            log::debug!("Revoking {} file sources on shutdown", self.live_count());
        }
        self.live.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LoadStatus {
    Pending,
    Loading,
    Ready { meshes: usize, triangles: usize },
    Failed(String),
}

/// PNG capture of the model canvas.
#[derive(Clone, PartialEq)]
pub struct Screenshot {
    pub width: u32,
    pub height: u32,
    pub png: Arc<Vec<u8>>,
}

impl fmt::Debug for Screenshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Screenshot")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("png_bytes", &self.png.len())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelEntry {
    pub id: EntryId,
    pub source: SourceHandle,
    pub name: String,
    pub size: u64,
    pub digest: ContentDigest,
    pub status: LoadStatus,
    #[serde(skip)]
    pub screenshot: Option<Screenshot>,
}

/// Ordered list of loaded models plus the current selection.
#[derive(Debug, Default, Serialize)]
pub struct AssetRegistry {
    entries: Vec<ModelEntry>,
    selection: Option<usize>,
    #[serde(skip)]
    next_id: u64,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn selection(&self) -> Option<usize> {
        self.selection
    }

    pub fn selected(&self) -> Option<&ModelEntry> {
        self.selection.and_then(|index| self.entries.get(index))
    }

    pub fn get(&self, id: EntryId) -> Option<&ModelEntry> {
        self.index_of(id).map(|index| &self.entries[index])
    }

    pub fn index_of(&self, id: EntryId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    pub fn digests(&self) -> impl Iterator<Item = ContentDigest> + '_ {
        self.entries.iter().map(|entry| entry.digest)
    }

    /// Append `files` in order and select the last one added. Returns the new ids.
    pub fn add_files(&mut self, store: &mut SourceStore, files: Vec<IncomingFile>) -> Vec<EntryId> {
        let mut added = Vec::with_capacity(files.len());
        for file in files {
            self.next_id += 1;
            let id = EntryId(self.next_id);
            let size = file.bytes.len() as u64;
            let digest = ContentDigest::of(&file.bytes);
            let source = store.register(file.bytes);
            log::info!("Added model '{}' ({}, {})", file.name, format_size(size), digest.short());
            self.entries.push(ModelEntry {
                id,
                source,
                name: file.name,
                size,
                digest,
                status: LoadStatus::Pending,
                screenshot: None,
            });
            added.push(id);
        }
        if !added.is_empty() {
            self.selection = Some(self.entries.len() - 1);
        }
        added
    }

    pub fn select(&mut self, index: usize) -> Result<(), AssetError> {
        if index >= self.entries.len() {
            return Err(AssetError::SelectionOutOfRange {
                index,
                len: self.entries.len(),
            });
        }
        self.selection = Some(index);
        Ok(())
    }

    /// Remove the selected entry and clear the selection. No-op without a valid selection.
    pub fn remove_selected(&mut self, store: &mut SourceStore) -> Option<ModelEntry> {
        let index = self.selection.filter(|index| *index < self.entries.len())?;
        self.remove(index, store)
    }

    /// Remove the entry at `index`, revoke its source and clear the selection.
    pub fn remove(&mut self, index: usize, store: &mut SourceStore) -> Option<ModelEntry> {
        if index >= self.entries.len() {
            return None;
        }
        let entry = self.entries.remove(index);
        store.revoke(entry.source);
        self.selection = None;
        log::info!("Removed model '{}'", entry.name);
        Some(entry)
    }

    pub fn update_screenshot(&mut self, id: EntryId, screenshot: Screenshot) -> bool {
        match self.index_of(id) {
            Some(index) => {
                self.entries[index].screenshot = Some(screenshot);
                true
            }
            None => false,
        }
    }

    pub fn set_status(&mut self, id: EntryId, status: LoadStatus) -> bool {
        match self.index_of(id) {
            Some(index) => {
                self.entries[index].status = status;
                true
            }
            None => false,
        }
    }
}

/// Human-readable size in megabytes with two decimals.
pub fn format_size(bytes: u64) -> String {
    let size_kb = bytes as f64 / 1024.0;
    let size_mb = size_kb / 1024.0;
    format!("{size_mb:.2} MB")
}
