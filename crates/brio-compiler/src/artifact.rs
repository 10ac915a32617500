//! Persisted artifact metadata for change detection across processes.
//!
//! Each compiled artifact carries a manifest recording the dependency
//! stamps it was generated from. A later process can decide whether the
//! artifact is reusable without re-running analysis: if every stamp still
//! matches the filesystem, the artifact stands.

use crate::error::DriverError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;

/// One script the artifact was generated from, with the modification time
/// observed at generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyStamp {
    pub path: PathBuf,
    /// Milliseconds since the epoch; zero when the mtime was unreadable.
    pub mtime_ms: u64,
}

impl DependencyStamp {
    /// Stamp a path with its current modification time.
    pub fn capture(path: &Path) -> Self {
        let mtime_ms = read_mtime_ms(path).unwrap_or(0);
        Self {
            path: path.to_path_buf(),
            mtime_ms,
        }
    }

    /// Whether the stamped file has changed since capture. A file that has
    /// disappeared, or whose mtime cannot be read, counts as modified.
    pub fn is_modified(&self) -> bool {
        match read_mtime_ms(&self.path) {
            Some(current) => current != self.mtime_ms,
            None => true,
        }
    }
}

fn read_mtime_ms(path: &Path) -> Option<u64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
    Some(since_epoch.as_millis() as u64)
}

/// Metadata persisted beside a compiled artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    /// Unit class name the artifact declares.
    pub class_name: String,
    /// Script the artifact was compiled from.
    pub source_path: PathBuf,
    /// Every script whose change invalidates the artifact.
    pub dependencies: Vec<DependencyStamp>,
    /// Generated-line to script-line mapping, kept so diagnostics can be
    /// translated by a process that did not generate the artifact.
    pub line_map: brio_core::LineMap,
    /// When the artifact was generated.
    pub created_at: DateTime<Utc>,
    /// Version of the compiler that produced it.
    pub compiler_version: String,
}

impl ArtifactManifest {
    pub fn new(
        class_name: &str,
        source_path: &Path,
        dependencies: Vec<DependencyStamp>,
        line_map: brio_core::LineMap,
    ) -> Self {
        Self {
            class_name: class_name.to_string(),
            source_path: source_path.to_path_buf(),
            dependencies,
            line_map,
            created_at: Utc::now(),
            compiler_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Whether any recorded dependency has changed on disk.
    pub fn is_modified(&self) -> bool {
        self.dependencies.iter().any(DependencyStamp::is_modified)
    }

    pub fn save(&self, path: &Path) -> Result<(), DriverError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        debug!(path = %path.display(), class_name = %self.class_name, "saved manifest");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<ArtifactManifest, DriverError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Manifest file path for a given artifact source file.
    pub fn manifest_path(artifact_path: &Path) -> PathBuf {
        artifact_path.with_extension("manifest.json")
    }
}

/// A generated artifact as far as the driver tracks it: where the generated
/// source lives, its manifest, and the diagnostics line map.
#[derive(Debug, Clone)]
pub struct CompilationArtifact {
    pub class_name: String,
    pub source_file: PathBuf,
    pub manifest: ArtifactManifest,
    pub line_map: brio_core::LineMap,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_detects_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.brio");
        std::fs::write(&file, "x = 1").unwrap();
        let stamp = DependencyStamp::capture(&file);
        assert!(!stamp.is_modified());

        // Force a visible mtime change without relying on clock granularity.
        let later = filetime_later(&file);
        assert!(later.is_modified());
    }

    fn filetime_later(path: &Path) -> DependencyStamp {
        let stamp = DependencyStamp::capture(path);
        DependencyStamp {
            path: stamp.path,
            mtime_ms: stamp.mtime_ms + 1,
        }
    }

    #[test]
    fn test_stamp_missing_file_counts_as_modified() {
        let stamp = DependencyStamp {
            path: PathBuf::from("/nonexistent/definitely/gone.brio"),
            mtime_ms: 42,
        };
        assert!(stamp.is_modified());
    }

    #[test]
    fn test_manifest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("a.brio");
        std::fs::write(&script, "x = 1").unwrap();

        let manifest = ArtifactManifest::new(
            "C_a_12ab34cd",
            &script,
            vec![DependencyStamp::capture(&script)],
            brio_core::LineMap::new(),
        );
        let path = dir.path().join("a.manifest.json");
        manifest.save(&path).unwrap();

        let loaded = ArtifactManifest::load(&path).unwrap();
        assert_eq!(loaded.class_name, "C_a_12ab34cd");
        assert_eq!(loaded.dependencies, manifest.dependencies);
        assert!(!loaded.is_modified());
    }
}
