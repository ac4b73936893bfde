//! Durable key-value backends underneath the local store.
//!
//! A [`StorageEngine`] opens connections; a [`KvBackend`] connection reads
//! and writes whole values by key. Every `put` is atomic: readers observe
//! either the old or the new value, never a torn one.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, TempboxError};

/// An open connection to durable key-value storage.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    /// All keys starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Something that can open [`KvBackend`] connections.
pub trait StorageEngine: Send + Sync {
    fn open(&self) -> Result<Arc<dyn KvBackend>>;
}

/// Read a JSON value, returning `None` when the key is absent.
pub fn read_json<T: DeserializeOwned>(backend: &dyn KvBackend, key: &str) -> Result<Option<T>> {
    match backend.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Write a value as JSON.
pub fn write_json<T: Serialize + ?Sized>(backend: &dyn KvBackend, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    backend.put(key, &bytes)
}

// ── Filesystem ──────────────────────────────────────────────────

/// Stores each key as one file inside a directory.
#[derive(Debug, Clone)]
pub struct FileEngine {
    root: PathBuf,
}

impl FileEngine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl StorageEngine for FileEngine {
    fn open(&self) -> Result<Arc<dyn KvBackend>> {
        std::fs::create_dir_all(&self.root).map_err(|e| TempboxError::io(&self.root, e))?;
        let meta = std::fs::metadata(&self.root).map_err(|e| TempboxError::io(&self.root, e))?;
        if meta.permissions().readonly() {
            return Err(TempboxError::StorageUnavailable(format!(
                "{} is read-only",
                self.root.display()
            )));
        }
        debug!(root = %self.root.display(), "Opened file storage");
        Ok(Arc::new(FileBackend {
            root: self.root.clone(),
        }))
    }
}

/// Connection returned by [`FileEngine::open`].
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Map a key to a file name. Keys use `[A-Za-z0-9._-]`; anything else
    /// is percent-escaped so that account ids cannot escape the root.
    fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len());
        for b in key.bytes() {
            if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-') {
                name.push(b as char);
            } else {
                name.push_str(&format!("%{b:02X}"));
            }
        }
        self.root.join(name)
    }
}

fn unescape_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

impl KvBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TempboxError::io(path, e)),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let mut tmp =
            tempfile::NamedTempFile::new_in(&self.root).map_err(|e| TempboxError::io(&self.root, e))?;
        tmp.write_all(value).map_err(|e| TempboxError::io(tmp.path(), e))?;
        tmp.flush().map_err(|e| TempboxError::io(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| TempboxError::io(&path, e.error))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TempboxError::io(path, e)),
        }
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| TempboxError::io(&self.root, e))?;
        let mut keys: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| unescape_key(&e.file_name().to_string_lossy()))
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// ── In-memory ───────────────────────────────────────────────────

type SharedMap = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// In-memory engine. Clones share the same data, which lets several
/// sessions act as tabs over one store. Supports fault injection for
/// exercising partial-failure paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    data: SharedMap,
    faults: Arc<Faults>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Number of upcoming `open` calls that fail.
    failing_opens: AtomicUsize,
    /// Writes still allowed before every further write fails
    /// (`usize::MAX` = unlimited).
    writes_left: AtomicUsize,
}

impl MemoryEngine {
    pub fn new() -> Self {
        let engine = Self::default();
        engine.faults.writes_left.store(usize::MAX, Ordering::SeqCst);
        engine
    }

    /// Make the next `n` calls to `open` fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.faults.failing_opens.store(n, Ordering::SeqCst);
    }

    /// Allow `n` more writes, then fail every write. `None` lifts the limit.
    pub fn limit_writes(&self, n: Option<usize>) {
        self.faults
            .writes_left
            .store(n.unwrap_or(usize::MAX), Ordering::SeqCst);
    }

    /// Raw view of a stored value (tests and diagnostics).
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.data.lock().ok()?.get(key).cloned()
    }
}

impl StorageEngine for MemoryEngine {
    fn open(&self) -> Result<Arc<dyn KvBackend>> {
        let pending = self.faults.failing_opens.load(Ordering::SeqCst);
        if pending > 0 {
            self.faults.failing_opens.store(pending - 1, Ordering::SeqCst);
            return Err(TempboxError::StorageUnavailable(
                "in-memory engine refused to open".into(),
            ));
        }
        Ok(Arc::new(MemoryBackend {
            data: Arc::clone(&self.data),
            faults: Arc::clone(&self.faults),
        }))
    }
}

/// Connection returned by [`MemoryEngine::open`].
#[derive(Debug)]
pub struct MemoryBackend {
    data: SharedMap,
    faults: Arc<Faults>,
}

impl MemoryBackend {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.data
            .lock()
            .map_err(|_| TempboxError::StorageUnavailable("in-memory store poisoned".into()))
    }

    fn take_write_permit(&self) -> Result<()> {
        let left = self.faults.writes_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(TempboxError::StorageUnavailable("write quota exhausted".into()));
        }
        if left != usize::MAX {
            self.faults.writes_left.store(left - 1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.take_write_permit()?;
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.take_write_permit()?;
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .lock()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
