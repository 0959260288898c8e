use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{
    backends::{MemoryDeliveryStore, SqliteDeliveryStore},
    r#trait::DeliveryStore,
};

/// Configuration for the delivery store
///
/// Selects the backend at runtime from the configuration file.
///
/// # Examples
///
/// `SQLite` store in RON config:
/// ```ron
/// Remit (
///     store: Sqlite(
///         path: "/var/lib/remit/remit.db",
///     ),
/// )
/// ```
///
/// Memory store for development:
/// ```ron
/// Remit (
///     store: Memory,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum StoreConfig {
    /// Durable `SQLite` database (production)
    Sqlite {
        #[serde(default = "default_path")]
        path: PathBuf,
    },
    /// In-memory store; nothing survives a restart
    Memory,
}

fn default_path() -> PathBuf {
    PathBuf::from("/var/lib/remit/remit.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: default_path(),
        }
    }
}

impl StoreConfig {
    /// The database file for `SQLite` stores
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::Sqlite { path } => Some(path),
            Self::Memory => None,
        }
    }

    /// Open the configured backend as a shareable trait object
    ///
    /// # Errors
    /// Returns an error if the `SQLite` database cannot be opened.
    pub fn into_store(self) -> crate::Result<Arc<dyn DeliveryStore>> {
        match self {
            Self::Sqlite { path } => {
                tracing::info!(path = %path.display(), "Opening SQLite delivery store");
                Ok(Arc::new(SqliteDeliveryStore::open(path)?))
            }
            Self::Memory => {
                tracing::warn!("Using in-memory delivery store, nothing will be persisted");
                Ok(Arc::new(MemoryDeliveryStore::new()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_sqlite_config() {
        let config: StoreConfig = ron::from_str(r#"Sqlite(path: "/tmp/remit.db")"#).unwrap();
        assert_eq!(
            config,
            StoreConfig::Sqlite {
                path: PathBuf::from("/tmp/remit.db")
            }
        );
        assert_eq!(config.path(), Some(std::path::Path::new("/tmp/remit.db")));
    }

    #[test]
    fn test_parse_memory_config() {
        let config: StoreConfig = ron::from_str("Memory").unwrap();
        assert_eq!(config, StoreConfig::Memory);
        assert!(config.path().is_none());
    }

    #[test]
    fn test_sqlite_path_defaults() {
        let config: StoreConfig = ron::from_str("Sqlite()").unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_into_store_opens_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("remit.db");

        let store = StoreConfig::Sqlite { path: path.clone() }.into_store();
        assert!(store.is_ok());
        assert!(path.exists());
    }
}
