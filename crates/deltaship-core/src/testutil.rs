use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use deltaship_storage::{BulkItem, CommitFile, RemoteStore};
use deltaship_types::content_hash::ContentHash;
use deltaship_types::error::{DeltashipError, Result};
use deltaship_types::manifest::{ChunkRecord, ReleaseManifest};

use crate::transfer::Sleeper;

/// In-memory remote store. Thread-safe via Mutex.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, data: &[u8]) {
        self.data.lock().unwrap().insert(key.to_string(), data.to_vec());
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn contents(&self, key: &str) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(key).cloned()
    }
}

impl RemoteStore for MemoryStore {
    fn label(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.contents(key))
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.insert(key, data);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.data.lock().unwrap().contains_key(key))
    }
}

/// A failure to inject into the next matching call.
#[derive(Debug, Clone)]
pub enum Fault {
    Generic(String),
    /// HTTP 429 carrying the given body text.
    RateLimited(String),
    Unrecoverable(String),
}

impl Fault {
    fn into_error(self) -> DeltashipError {
        match self {
            Fault::Generic(msg) => DeltashipError::Transport(msg),
            Fault::RateLimited(body) => DeltashipError::Http {
                status: 429,
                message: body,
                retry_after: None,
            },
            Fault::Unrecoverable(msg) => DeltashipError::Config(msg),
        }
    }
}

#[derive(Default)]
struct Script {
    per_key: HashMap<String, VecDeque<Fault>>,
    bulk: VecDeque<Fault>,
    commits: VecDeque<Fault>,
    attempts: HashMap<String, u32>,
    bulk_calls: u32,
    commit_calls: Vec<Vec<String>>,
}

/// `MemoryStore` wrapper that fails scripted calls and records every attempt.
pub struct ScriptedStore {
    inner: MemoryStore,
    bulk_supported: bool,
    script: Mutex<Script>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            bulk_supported: false,
            script: Mutex::new(Script::default()),
        }
    }

    pub fn with_bulk(mut self) -> Self {
        self.bulk_supported = true;
        self
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Fail the next `put`/`get` calls on `key` with `faults`, in order.
    pub fn fail_key(&self, key: &str, faults: impl IntoIterator<Item = Fault>) {
        self.script
            .lock()
            .unwrap()
            .per_key
            .entry(key.to_string())
            .or_default()
            .extend(faults);
    }

    pub fn fail_bulk(&self, faults: impl IntoIterator<Item = Fault>) {
        self.script.lock().unwrap().bulk.extend(faults);
    }

    pub fn fail_commits(&self, faults: impl IntoIterator<Item = Fault>) {
        self.script.lock().unwrap().commits.extend(faults);
    }

    /// `get`/`put` attempts on `key`, failed ones included.
    pub fn attempts(&self, key: &str) -> u32 {
        self.script.lock().unwrap().attempts.get(key).copied().unwrap_or(0)
    }

    pub fn total_attempts(&self) -> u32 {
        self.script.lock().unwrap().attempts.values().sum()
    }

    pub fn bulk_calls(&self) -> u32 {
        self.script.lock().unwrap().bulk_calls
    }

    /// Paths of every commit call, failed ones included.
    pub fn commit_calls(&self) -> Vec<Vec<String>> {
        self.script.lock().unwrap().commit_calls.clone()
    }

    fn take_key_fault(&self, key: &str) -> Option<Fault> {
        let mut script = self.script.lock().unwrap();
        *script.attempts.entry(key.to_string()).or_default() += 1;
        script.per_key.get_mut(key).and_then(VecDeque::pop_front)
    }
}

impl RemoteStore for ScriptedStore {
    fn label(&self) -> &str {
        "scripted"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(fault) = self.take_key_fault(key) {
            return Err(fault.into_error());
        }
        self.inner.get(key)
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        if let Some(fault) = self.take_key_fault(key) {
            return Err(fault.into_error());
        }
        self.inner.put(key, data)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key)
    }

    /// Content checks see the backing store without consuming faults.
    fn holds(&self, key: &str, size: u64, hash: &str) -> Result<bool> {
        self.inner.holds(key, size, hash)
    }

    fn commit(&self, files: &[CommitFile], _message: &str) -> Result<()> {
        let fault = {
            let mut script = self.script.lock().unwrap();
            script
                .commit_calls
                .push(files.iter().map(|f| f.path.clone()).collect());
            script.commits.pop_front()
        };
        if let Some(fault) = fault {
            return Err(fault.into_error());
        }
        for f in files {
            self.inner.put(&f.path, &f.data)?;
        }
        Ok(())
    }

    fn push_all(&self, items: &[BulkItem<'_>]) -> Result<()> {
        if !self.bulk_supported {
            return Err(DeltashipError::BulkUnsupported);
        }
        if let Some(fault) = self.take_bulk_fault() {
            return Err(fault.into_error());
        }
        for item in items {
            self.inner.put(item.remote, &std::fs::read(item.local)?)?;
        }
        Ok(())
    }

    fn pull_all(&self, items: &[BulkItem<'_>]) -> Result<()> {
        if !self.bulk_supported {
            return Err(DeltashipError::BulkUnsupported);
        }
        if let Some(fault) = self.take_bulk_fault() {
            return Err(fault.into_error());
        }
        for item in items {
            let data = self
                .inner
                .get(item.remote)?
                .ok_or_else(|| DeltashipError::Other(format!("{} missing", item.remote)))?;
            if let Some(parent) = item.local.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(item.local, data)?;
        }
        Ok(())
    }
}

impl ScriptedStore {
    fn take_bulk_fault(&self) -> Option<Fault> {
        let mut script = self.script.lock().unwrap();
        script.bulk_calls += 1;
        script.bulk.pop_front()
    }
}

/// Records requested sleeps instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn total(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Write `files` under `root` and build a manifest describing them.
/// Each entry is `(id, path, contents)`.
pub fn write_release(root: &Path, version: &str, files: &[(&str, &str, &[u8])]) -> ReleaseManifest {
    std::fs::create_dir_all(root).unwrap();
    let chunks = files
        .iter()
        .map(|(id, path, data)| {
            let dest = root.join(path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&dest, data).unwrap();
            ChunkRecord::new(*id, *path, data.len() as u64, ContentHash::of_bytes(data).to_string())
        })
        .collect();
    ReleaseManifest::new(version, 64, chunks)
}

/// Manifest from `(id, hash, size)` triples with `path = id + ".bin"`.
pub fn manifest_of(version: &str, chunks: &[(&str, &str, u64)]) -> ReleaseManifest {
    ReleaseManifest::new(
        version,
        64,
        chunks
            .iter()
            .map(|(id, hash, size)| ChunkRecord::new(*id, format!("{id}.bin"), *size, *hash))
            .collect(),
    )
}
