//! Path-keyed cache of compilation progress and results.
//!
//! One entry per script path. The entry's state is the compilation state
//! machine; only one thread may hold a path in an in-flight state at a
//! time, which [`CompileCache::try_begin`] enforces under the lock.

use crate::artifact::CompilationArtifact;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Where a script is in its compilation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileState {
    NotCompiled,
    Analyzing,
    Generating,
    PendingExternalCompile,
    Compiled,
    Loaded,
    Failed,
}

impl CompileState {
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            CompileState::Analyzing
                | CompileState::Generating
                | CompileState::PendingExternalCompile
        )
    }
}

#[derive(Debug)]
struct CacheEntry {
    state: CompileState,
    artifact: Option<CompilationArtifact>,
}

/// Outcome of a claim attempt for one path.
#[derive(Debug)]
pub enum Claim {
    /// The caller now owns the in-flight compilation for this path.
    Acquired,
    /// Another thread is already compiling this path.
    InFlight,
    /// A finished artifact is available and still valid.
    Ready(CompilationArtifact),
}

#[derive(Debug, Default)]
pub struct CompileCache {
    entries: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl CompileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, path: &Path) -> CompileState {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(path)
            .map(|e| e.state)
            .unwrap_or(CompileState::NotCompiled)
    }

    /// Try to claim a path for compilation. A finished entry whose manifest
    /// still matches the filesystem short-circuits to its artifact; a stale
    /// one is superseded and re-claimed.
    pub fn try_begin(&self, path: &Path) -> Claim {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get(path) {
            if entry.state.is_in_flight() {
                return Claim::InFlight;
            }
            if let Some(artifact) = &entry.artifact {
                if matches!(entry.state, CompileState::Compiled | CompileState::Loaded)
                    && !artifact.manifest.is_modified()
                {
                    return Claim::Ready(artifact.clone());
                }
                debug!(path = %path.display(), "cached artifact superseded");
            }
        }
        entries.insert(
            path.to_path_buf(),
            CacheEntry {
                state: CompileState::Analyzing,
                artifact: None,
            },
        );
        Claim::Acquired
    }

    /// Advance the state of an in-flight entry.
    pub fn set_state(&self, path: &Path, state: CompileState) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(path.to_path_buf()).or_insert(CacheEntry {
            state: CompileState::NotCompiled,
            artifact: None,
        });
        debug!(path = %path.display(), from = ?entry.state, to = ?state, "state transition");
        entry.state = state;
    }

    /// Record a finished compilation.
    pub fn store(&self, path: &Path, artifact: CompilationArtifact) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            path.to_path_buf(),
            CacheEntry {
                state: CompileState::Compiled,
                artifact: Some(artifact),
            },
        );
    }

    pub fn artifact(&self, path: &Path) -> Option<CompilationArtifact> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(path).and_then(|e| e.artifact.clone())
    }

    /// Drop a path's entry entirely; the next request recompiles.
    pub fn invalidate(&self, path: &Path) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.remove(path).is_some() {
            debug!(path = %path.display(), "cache entry invalidated");
        }
    }
}
