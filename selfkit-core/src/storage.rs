//! Durable blob storage.
//!
//! The identity core persists everything (account list, session pointer,
//! vault entries) through [`AtomicBlobStore`]. Writes must be atomic so a
//! crash never leaves a partially written record behind.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, SelfkitError};

/// Atomic storage for named blobs.
///
/// Blob names are slash-separated paths (e.g. `vault/<id>/private_key.enc`).
/// Implementations must make `write_atomic` all-or-nothing: after a crash
/// the blob holds either the complete old content or the complete new
/// content, never a partial state.
pub trait AtomicBlobStore: Send + Sync {
    /// Reads a blob by name. Returns `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Atomically writes a blob, replacing any existing content.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Deletes a blob. Deleting a missing blob is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error only for actual I/O failures.
    fn delete(&self, name: &str) -> Result<()>;

    /// Checks whether a blob exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.read(name)?.is_some())
    }
}

/// Reads and deserializes a JSON blob, if present.
///
/// # Errors
///
/// Returns an error if the read fails or the blob is not valid JSON for `T`.
pub fn read_json<T: DeserializeOwned>(store: &dyn AtomicBlobStore, name: &str) -> Result<Option<T>> {
    match store.read(name)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Serializes a value to JSON and writes it atomically.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn write_json<T: Serialize>(store: &dyn AtomicBlobStore, name: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    store.write_atomic(name, &bytes)
}

/// In-memory blob store for tests.
///
/// Not durable and not crash-safe; backs unit tests and the fault-injection
/// scenarios around partial account creation.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryBlobStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail, for fault-injection tests.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl AtomicBlobStore for MemoryBlobStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.lock().expect("blob map poisoned");
        Ok(blobs.get(name).cloned())
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SelfkitError::storage(
                format!("write {name}"),
                std::io::Error::other("injected write failure"),
            ));
        }
        let mut blobs = self.blobs.lock().expect("blob map poisoned");
        blobs.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let mut blobs = self.blobs.lock().expect("blob map poisoned");
        blobs.remove(name);
        Ok(())
    }
}

/// Filesystem-backed blob store.
///
/// Uses the write-to-temp-then-rename pattern so the target file is never
/// observed half-written.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Creates a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .map_err(|e| SelfkitError::storage(format!("create {}", root.display()), e))?;
        Ok(Self { root })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in name.split('/') {
            path.push(part);
        }
        path
    }
}

impl AtomicBlobStore for FsBlobStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SelfkitError::storage(format!("read {name}"), e)),
        }
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SelfkitError::storage(format!("create dir for {name}"), e))?;
        }
        let tmp = path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp)
                .map_err(|e| SelfkitError::storage(format!("create {name}.tmp"), e))?;
            file.write_all(bytes)
                .map_err(|e| SelfkitError::storage(format!("write {name}.tmp"), e))?;
            file.sync_all()
                .map_err(|e| SelfkitError::storage(format!("sync {name}.tmp"), e))?;
        }
        std::fs::rename(&tmp, &path)
            .map_err(|e| SelfkitError::storage(format!("rename {name}"), e))
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SelfkitError::storage(format!("delete {name}"), e)),
        }
    }
}
