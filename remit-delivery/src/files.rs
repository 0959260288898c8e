//! Retrieval of the statement documents that are sent to the provider

use std::{
    fmt::Debug,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;

use crate::error::FileError;

#[async_trait]
pub trait FileSource: Send + Sync + Debug {
    /// Fetch the contents of the file held under `reference`
    ///
    /// # Errors
    /// Returns an error if the file does not exist or cannot be read.
    async fn get_file(&self, reference: &str) -> Result<Arc<[u8]>, FileError>;
}

/// Statement files held in a local directory, addressed by relative path
#[derive(Debug, Clone)]
pub struct DirectoryFileSource {
    root: PathBuf,
}

impl DirectoryFileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf, FileError> {
        let relative = Path::new(reference);
        let contained = !reference.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));

        if contained {
            Ok(self.root.join(relative))
        } else {
            Err(FileError::InvalidReference(reference.to_string()))
        }
    }
}

#[async_trait]
impl FileSource for DirectoryFileSource {
    async fn get_file(&self, reference: &str) -> Result<Arc<[u8]>, FileError> {
        let path = self.resolve(reference)?;

        match tokio::fs::read(&path).await {
            Ok(contents) => Ok(Arc::from(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FileError::NotFound(reference.to_string()))
            }
            Err(source) => Err(FileError::Io {
                reference: reference.to_string(),
                source,
            }),
        }
    }
}

/// Statement files held in memory (for tests and dry runs)
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSource {
    files: Arc<DashMap<String, Arc<[u8]>>>,
}

impl MemoryFileSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, reference: impl Into<String>, contents: impl Into<Arc<[u8]>>) {
        self.files.insert(reference.into(), contents.into());
    }
}

#[async_trait]
impl FileSource for MemoryFileSource {
    async fn get_file(&self, reference: &str) -> Result<Arc<[u8]>, FileError> {
        self.files
            .get(reference)
            .map(|file| Arc::clone(file.value()))
            .ok_or_else(|| FileError::NotFound(reference.to_string()))
    }
}

/// Configuration for the statement file source
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FilesConfig {
    /// Directory statement file references are resolved against
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
}

fn default_directory() -> PathBuf {
    PathBuf::from("/var/lib/remit/statements")
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
        }
    }
}

impl FilesConfig {
    #[must_use]
    pub fn into_source(self) -> Arc<dyn FileSource> {
        Arc::new(DirectoryFileSource::new(self.directory))
    }
}
