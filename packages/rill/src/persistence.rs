//! Snapshot persistence through an opaque key-value interface.

use crate::engine::processor::Processor;
use crate::error::EngineError;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{info, warn};

/// Reserved key under which the processor snapshot lives.
pub const SNAPSHOT_KEY: &str = "rill/processor/snapshot";

/// Minimal key-value surface the engine persists through.
pub trait KvStore: Send + Sync {
    fn set(&self, key: &str, value: &[u8]) -> Result<(), EngineError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EngineError>;
    fn remove(&self, key: &str) -> Result<(), EngineError>;
}

/// In-memory backend (`store = memory`).
#[derive(Default)]
pub struct MemoryKv {
    inner: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn set(&self, key: &str, value: &[u8]) -> Result<(), EngineError> {
        self.inner.lock().unwrap().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.inner.lock().unwrap().get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<(), EngineError> {
        self.inner.lock().unwrap().remove(key);
        Ok(())
    }
}

/// File-per-key backend (`store = persistent`).
pub struct FileKv {
    root: PathBuf,
}

impl FileKv {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.root.join(format!("{}.bin", name))
    }
}

impl KvStore for FileKv {
    fn set(&self, key: &str, value: &[u8]) -> Result<(), EngineError> {
        fs::write(self.path_for(key), value).map_err(|e| EngineError::Storage(e.to_string()))
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EngineError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::Storage(e.to_string())),
        }
    }

    fn remove(&self, key: &str) -> Result<(), EngineError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::Storage(e.to_string())),
        }
    }
}

/// Write the current processor state under the reserved key.
pub fn save_snapshot(kv: &dyn KvStore, processor: &Processor) -> Result<(), EngineError> {
    let bytes = processor.snapshot()?;
    kv.set(SNAPSHOT_KEY, &bytes)?;
    info!(bytes = bytes.len(), "processor snapshot saved");
    Ok(())
}

/// Best-effort restore: a missing, unreadable or corrupt snapshot
/// yields an empty processor.
pub fn load_snapshot(kv: &dyn KvStore) -> Processor {
    match kv.get(SNAPSHOT_KEY) {
        Ok(Some(bytes)) => match Processor::restore(&bytes) {
            Ok(processor) => {
                info!("processor snapshot restored");
                processor
            }
            Err(e) => {
                warn!(error = %e, "snapshot corrupted, starting empty");
                Processor::new()
            }
        },
        Ok(None) => {
            info!("no snapshot found, starting fresh");
            Processor::new()
        }
        Err(e) => {
            warn!(error = %e, "snapshot unreadable, starting empty");
            Processor::new()
        }
    }
}
