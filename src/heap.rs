use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::environment::Type;
use crate::parse::ParsedSource;
use crate::path::FileHandle;

/// How hard `collect` should work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectMode {
    Gentle,
    Aggressive,
}

/// A memoized resolved define signature, keyed by `qualifier.name`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSignature {
    pub parameters: Vec<Type>,
    pub return_type: Type,
}

/// Process-wide content store of parsed sources plus the type-resolution
/// memo table. Workers read it concurrently; only the dispatcher (via the
/// parser and type-check services) writes.
pub struct SourceHeap {
    sources: Mutex<HashMap<FileHandle, Arc<ParsedSource>>>,
    resolution: Mutex<HashMap<String, ResolvedSignature>>,
    bytes: AtomicUsize,
    capacity_bytes: usize,
}

impl SourceHeap {
    pub fn new(capacity_bytes: usize) -> SourceHeap {
        SourceHeap {
            sources: Mutex::new(HashMap::new()),
            resolution: Mutex::new(HashMap::new()),
            bytes: AtomicUsize::new(0),
            capacity_bytes: capacity_bytes.max(1),
        }
    }

    pub fn store(&self, source: ParsedSource) -> Arc<ParsedSource> {
        let arc = Arc::new(source);
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = sources.insert(arc.handle.clone(), Arc::clone(&arc)) {
            self.bytes.fetch_sub(previous.text_bytes, Ordering::Relaxed);
        }
        self.bytes.fetch_add(arc.text_bytes, Ordering::Relaxed);
        arc
    }

    pub fn get_source(&self, handle: &FileHandle) -> Option<Arc<ParsedSource>> {
        self.sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(handle)
            .cloned()
    }

    pub fn remove_paths(&self, handles: &[FileHandle]) {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        for handle in handles {
            if let Some(previous) = sources.remove(handle) {
                self.bytes.fetch_sub(previous.text_bytes, Ordering::Relaxed);
            }
        }
    }

    /// Reclaim slack. `Aggressive` additionally drops the resolution memo;
    /// entries are re-derived by the next analysis that needs them.
    pub fn collect(&self, mode: CollectMode) {
        self.sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .shrink_to_fit();
        let mut resolution = self.resolution.lock().unwrap_or_else(|e| e.into_inner());
        if mode == CollectMode::Aggressive {
            resolution.clear();
        }
        resolution.shrink_to_fit();
    }

    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn heap_use_ratio(&self) -> f64 {
        self.bytes() as f64 / self.capacity_bytes as f64
    }

    pub fn insert_define(&self, key: String, signature: ResolvedSignature) {
        self.resolution
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, signature);
    }

    pub fn resolved_define(&self, key: &str) -> Option<ResolvedSignature> {
        self.resolution
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn remove_defines(&self, keys: &[String]) {
        let mut resolution = self.resolution.lock().unwrap_or_else(|e| e.into_inner());
        for key in keys {
            resolution.remove(key);
        }
    }
}
