//! Local artifact store for model weights
//!
//! Artifacts are looked up in an XDG-compliant directory laid out as
//! `<root>/<repo id with "/" replaced by "--">/<file>`. Fetching from a remote hub is
//! left to whoever populates that directory.

use crate::config::ENV_MODELS_DIR;
use crate::error::{BgRemovalError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Weight/artifact retrieval contract
///
/// Given a repository identifier and a set of file names, returns one local path per
/// file in the same order, or fails with a retrieval error.
pub trait ArtifactStore: Send + Sync + std::fmt::Debug {
    /// Resolve `files` of `repo_id` to local paths
    ///
    /// # Errors
    /// - `ArtifactRetrieval` when any file is not available
    fn fetch(&self, repo_id: &str, files: &[&str]) -> Result<Vec<PathBuf>>;
}

/// Filesystem-backed artifact store
#[derive(Debug, Clone)]
pub struct ModelCache {
    root: PathBuf,
}

impl ModelCache {
    /// Create a cache rooted at the environment override or the XDG cache dir
    ///
    /// Uses:
    /// - `$BGREMOVE_MODELS_DIR` when set
    /// - Linux: `~/.cache/bgremove-serve/models/`
    /// - macOS: `~/Library/Caches/bgremove-serve/models/`
    /// - Windows: `%LOCALAPPDATA%/bgremove-serve/models/`
    ///
    /// # Errors
    /// - Failed to determine cache directory
    pub fn new() -> Result<Self> {
        Ok(Self {
            root: Self::default_root()?,
        })
    }

    /// Create a cache at an explicit directory, falling back to [`ModelCache::new`]
    ///
    /// # Errors
    /// - Failed to determine cache directory when `dir` is `None`
    pub fn with_root<P: AsRef<Path>>(dir: Option<P>) -> Result<Self> {
        match dir {
            Some(dir) => Ok(Self {
                root: dir.as_ref().to_path_buf(),
            }),
            None => Self::new(),
        }
    }

    fn default_root() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(ENV_MODELS_DIR) {
            if !dir.trim().is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Failed to determine cache directory. Set {ENV_MODELS_DIR} environment variable."
                ))
            })?
            .join("bgremove-serve")
            .join("models"))
    }

    /// Convert a repository id to its directory name
    ///
    /// ```
    /// use bgremove_serve::cache::ModelCache;
    ///
    /// assert_eq!(ModelCache::repo_to_dir_name("briaai/RMBG-2.0"), "briaai--RMBG-2.0");
    /// ```
    #[must_use]
    pub fn repo_to_dir_name(repo_id: &str) -> String {
        repo_id.replace('/', "--")
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path an artifact is expected at, whether or not it exists
    #[must_use]
    pub fn artifact_path(&self, repo_id: &str, file: &str) -> PathBuf {
        let mut path = self.root.join(Self::repo_to_dir_name(repo_id));
        for component in file.split('/').filter(|c| !c.is_empty()) {
            path.push(component);
        }
        path
    }

    #[must_use]
    pub fn is_cached(&self, repo_id: &str, file: &str) -> bool {
        self.artifact_path(repo_id, file).is_file()
    }

    /// Size in bytes of a cached artifact
    ///
    /// # Errors
    /// - File metadata cannot be read
    pub fn artifact_size(&self, repo_id: &str, file: &str) -> Result<u64> {
        let path = self.artifact_path(repo_id, file);
        let metadata = fs::metadata(&path)
            .map_err(|e| BgRemovalError::file_io_error("read metadata of", &path, &e))?;
        Ok(metadata.len())
    }
}

impl ArtifactStore for ModelCache {
    fn fetch(&self, repo_id: &str, files: &[&str]) -> Result<Vec<PathBuf>> {
        files
            .iter()
            .map(|file| {
                let path = self.artifact_path(repo_id, file);
                if path.is_file() {
                    log::debug!("📦 Artifact found: {}", path.display());
                    Ok(path)
                } else {
                    Err(BgRemovalError::artifact(
                        repo_id,
                        *file,
                        format!("not present at {}", path.display()),
                    ))
                }
            })
            .collect()
    }
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS.get(unit_index).unwrap_or(&"B"))
    } else {
        format!("{:.1} {}", size, UNITS.get(unit_index).unwrap_or(&"B"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_repo_to_dir_name() {
        assert_eq!(
            ModelCache::repo_to_dir_name("onnx-community/BiRefNet-ONNX"),
            "onnx-community--BiRefNet-ONNX"
        );
        assert_eq!(ModelCache::repo_to_dir_name("local"), "local");
    }

    #[test]
    fn test_artifact_path_layout() {
        let cache = ModelCache::with_root(Some("/models")).unwrap();
        assert_eq!(
            cache.artifact_path("briaai/RMBG-2.0", "onnx/model.onnx"),
            PathBuf::from("/models/briaai--RMBG-2.0/onnx/model.onnx")
        );
    }

    #[test]
    fn test_fetch_existing_artifacts() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_root(Some(temp_dir.path())).unwrap();
        let path = cache.artifact_path("PramaLLC/BEN2", "BEN2_Base.onnx");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"onnx").unwrap();

        let paths = cache.fetch("PramaLLC/BEN2", &["BEN2_Base.onnx"]).unwrap();
        assert_eq!(paths, vec![path]);
        assert!(cache.is_cached("PramaLLC/BEN2", "BEN2_Base.onnx"));
        assert_eq!(cache.artifact_size("PramaLLC/BEN2", "BEN2_Base.onnx").unwrap(), 4);
    }

    #[test]
    fn test_fetch_missing_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_root(Some(temp_dir.path())).unwrap();

        let err = cache
            .fetch("briaai/RMBG-2.0", &["onnx/model.onnx"])
            .unwrap_err();
        match err {
            BgRemovalError::ArtifactRetrieval { repo, file, .. } => {
                assert_eq!(repo, "briaai/RMBG-2.0");
                assert_eq!(file, "onnx/model.onnx");
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1024 * 1024 * 3), "3.0 MB");
    }
}
