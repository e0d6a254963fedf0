//! Non-volatile key/value storage.
//!
//! Writes are best-effort: failures are logged and never surface to the
//! caller, since the control loop has nothing better to do with them.
//! A batch passed to [`KvStore::put_all`] lands as one unit.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f32),
}

pub trait KvStore {
    fn get(&self, key: &str) -> Option<Value>;

    /// Write every entry as one unit; `None` removes the key.
    fn put_all(&mut self, entries: &[(&str, Option<Value>)]);

    fn put(&mut self, key: &str, value: Value) {
        self.put_all(&[(key, Some(value))]);
    }

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn get_i64(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            Some(Value::Int(v)) => v,
            Some(Value::Float(v)) => v as i64,
            None => default,
        }
    }

    fn get_f32(&self, key: &str, default: f32) -> f32 {
        match self.get(key) {
            Some(Value::Float(v)) => v,
            Some(Value::Int(v)) => v as f32,
            None => default,
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<String, Value>,
    /// Number of committed batches; lets tests assert write-through.
    pub commits: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).copied()
    }

    fn put_all(&mut self, entries: &[(&str, Option<Value>)]) {
        apply(&mut self.entries, entries);
        self.commits += 1;
    }
}

fn apply(map: &mut BTreeMap<String, Value>, entries: &[(&str, Option<Value>)]) {
    for (key, value) in entries {
        match value {
            Some(v) => {
                map.insert((*key).to_string(), *v);
            }
            None => {
                map.remove(*key);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// A flat JSON object on disk.  Every commit rewrites a temp file and
/// renames it over the original, so a power cut leaves either the old or
/// the new contents.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: BTreeMap<String, Value>,
}

impl FileStore {
    /// Open (or create on first commit) the store at `path`.  A corrupt file
    /// is logged and treated as empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create store directory: {}", dir.display()))?;
        }

        let entries = match fs::read_to_string(&path) {
            Ok(s) => match serde_json::from_str(&s) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), "store corrupt, starting empty: {e}");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read store: {}", path.display()))
            }
        };

        debug!(path = %path.display(), keys = entries.len(), "store opened");
        Ok(Self { path, entries })
    }

    fn flush(&self) -> std::io::Result<()> {
        let tmp = self.path.with_extension("tmp");
        let json = serde_json::to_vec_pretty(&self.entries)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).copied()
    }

    fn put_all(&mut self, entries: &[(&str, Option<Value>)]) {
        apply(&mut self.entries, entries);
        if let Err(e) = self.flush() {
            warn!(path = %self.path.display(), "store write failed: {e}");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
