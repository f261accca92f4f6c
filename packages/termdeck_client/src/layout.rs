//! Layout memory
//!
//! Where each terminal sits on the grid and its font size, remembered per
//! session id so a reconnect or restart puts things back where they were.
//! Storage problems never fail the caller: a missing or corrupt file reads as
//! empty and failed writes are logged.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use termdeck_protocol::SessionId;
use tracing::{debug, warn};

use crate::error::ClientError;

/// Grid placement, in grid units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Default for LayoutRect {
    fn default() -> Self {
        Self { x: 0, y: 0, w: 6, h: 4 }
    }
}

/// One stored entry, `{x, y, w, h, fontSize}` on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedLayout {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    #[serde(rename = "fontSize", default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u32>,
}

impl PersistedLayout {
    pub fn new(rect: LayoutRect, font_size: u32) -> Self {
        Self {
            x: rect.x,
            y: rect.y,
            w: rect.w,
            h: rect.h,
            font_size: Some(font_size),
        }
    }

    pub fn rect(&self) -> LayoutRect {
        LayoutRect {
            x: self.x,
            y: self.y,
            w: self.w,
            h: self.h,
        }
    }
}

pub type Layouts = HashMap<SessionId, PersistedLayout>;

/// Durable layout storage. `save` replaces the whole record.
pub trait LayoutStore: Send {
    fn load(&self) -> Layouts;

    fn save(&mut self, layouts: &Layouts);
}

/// Layouts in a JSON file.
#[derive(Clone, Debug)]
pub struct FileLayoutStore {
    path: PathBuf,
}

impl FileLayoutStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries that fail to parse are skipped; a file that is not a JSON
    /// object at all reads as empty.
    pub fn read(&self) -> Result<Layouts, ClientError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Layouts::new()),
            Err(source) => {
                return Err(ClientError::Storage {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let entries: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Ignoring corrupt layout file {}: {}", self.path.display(), e);
                return Ok(Layouts::new());
            }
        };

        let mut layouts = Layouts::with_capacity(entries.len());
        for (id, value) in entries {
            match serde_json::from_value::<PersistedLayout>(value) {
                Ok(layout) => {
                    layouts.insert(SessionId::from(id), layout);
                }
                Err(e) => warn!(session = %id, "Skipping invalid stored layout: {}", e),
            }
        }
        Ok(layouts)
    }

    pub fn write(&self, layouts: &Layouts) -> Result<(), ClientError> {
        let storage_err = |source| ClientError::Storage {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(storage_err)?;
        }
        let json = serde_json::to_vec_pretty(layouts).map_err(|e| storage_err(e.into()))?;
        std::fs::write(&self.path, json).map_err(storage_err)?;
        debug!("Saved {} layout(s) to {}", layouts.len(), self.path.display());
        Ok(())
    }
}

impl LayoutStore for FileLayoutStore {
    fn load(&self) -> Layouts {
        self.read().unwrap_or_else(|e| {
            warn!("Failed to load layouts: {}", e);
            Layouts::new()
        })
    }

    fn save(&mut self, layouts: &Layouts) {
        if let Err(e) = self.write(layouts) {
            warn!("Failed to save layouts: {}", e);
        }
    }
}

/// Layouts kept in memory, shared between clones.
#[derive(Clone, Debug, Default)]
pub struct MemoryLayoutStore {
    layouts: Arc<Mutex<Layouts>>,
}

impl MemoryLayoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layouts(layouts: Layouts) -> Self {
        Self {
            layouts: Arc::new(Mutex::new(layouts)),
        }
    }

    pub fn snapshot(&self) -> Layouts {
        self.load()
    }
}

impl LayoutStore for MemoryLayoutStore {
    fn load(&self) -> Layouts {
        self.layouts
            .lock()
            .map(|l| l.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }

    fn save(&mut self, layouts: &Layouts) {
        let mut guard = self.layouts.lock().unwrap_or_else(|p| p.into_inner());
        *guard = layouts.clone();
    }
}
