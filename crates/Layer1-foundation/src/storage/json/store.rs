//! JSON file store

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

/// Directory name used for both the global and the project store
const STORE_DIR: &str = "taskgate";

/// JSON configuration store rooted at a directory
#[derive(Debug, Clone)]
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Global store (`<config dir>/taskgate/`)
    pub fn global() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Cannot find config directory".to_string()))?
            .join(STORE_DIR);
        Ok(Self::new(dir))
    }

    /// Project store (`<root>/.taskgate/`)
    pub fn project(root: impl Into<PathBuf>) -> Self {
        Self::new(root.into().join(format!(".{}", STORE_DIR)))
    }

    /// Project store for the current directory
    pub fn current_project() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::Config(format!("Cannot get current directory: {}", e)))?;
        Ok(Self::project(cwd))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            std::fs::create_dir_all(&self.base_dir)
                .map_err(|e| Error::Config(format!("Failed to create directory: {}", e)))?;
        }
        Ok(())
    }

    /// Load and deserialize a file
    pub fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        load_path(&self.file_path(filename))
    }

    /// Load a file if it exists
    pub fn load_optional<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        let path = self.file_path(filename);
        if !path.exists() {
            return Ok(None);
        }
        load_path(&path).map(Some)
    }

    /// Serialize and write a file, creating the directory if needed
    pub fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        self.ensure_dir()?;
        let path = self.file_path(filename);
        let content = serde_json::to_string_pretty(data)
            .map_err(|e| Error::Config(format!("Failed to serialize: {}", e)))?;
        std::fs::write(&path, content)
            .map_err(|e| Error::Config(format!("Failed to write {}: {}", path.display(), e)))
    }

    pub fn exists(&self, filename: &str) -> bool {
        self.file_path(filename).exists()
    }
}

/// Load a JSON file from an explicit path
pub(crate) fn load_path<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::project(dir.path());

        assert!(!store.exists("sample.json"));
        assert!(store.load_optional::<Sample>("sample.json").unwrap().is_none());

        let sample = Sample {
            name: "ls".into(),
            count: 2,
        };
        store.save("sample.json", &sample).unwrap();

        assert!(store.exists("sample.json"));
        assert!(store.base_dir().ends_with(".taskgate"));
        let loaded: Sample = store.load("sample.json").unwrap();
        assert_eq!(loaded, sample);
    }

    #[test]
    fn test_parse_error_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        std::fs::write(store.file_path("broken.json"), "{ not json").unwrap();

        let err = store.load::<Sample>("broken.json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
