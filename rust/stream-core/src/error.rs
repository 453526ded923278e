// rust/stream-core/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {

    #[error("Storage error at '{path}': {message}")]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Listing dataset '{dataset}' failed: {message}")]
    Listing {
        dataset: String,
        message: String,
    },

    #[error("Metadata for shard '{shard}' unavailable: {message}")]
    Metadata {
        shard: String,
        message: String,
    },

    #[error("Fetching shard '{shard}' failed: {message}")]
    Fetch {
        shard: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Decoding '{path}' failed: {message}")]
    Format {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Local cache error at '{path}': {message}")]
    Cache {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

pub type Result<T> = std::result::Result<T, StreamError>;

/// Coarse classification used when reporting skipped shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Storage,
    Listing,
    Metadata,
    Fetch,
    Format,
    Cache,
    Config,
}

// Convenience constructors
impl StreamError {

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn listing(dataset: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Listing {
            dataset: dataset.into(),
            message: message.into(),
        }
    }

    pub fn metadata(shard: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Metadata {
            shard: shard.into(),
            message: message.into(),
        }
    }

    pub fn fetch(shard: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            shard: shard.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn fetch_with_source(
        shard: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Fetch {
            shard: shard.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn format_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Format {
            path: path.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn cache(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Cache {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn cache_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Cache {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Listing { .. } => ErrorKind::Listing,
            Self::Metadata { .. } => ErrorKind::Metadata,
            Self::Fetch { .. } => ErrorKind::Fetch,
            Self::Format { .. } => ErrorKind::Format,
            Self::Cache { .. } => ErrorKind::Cache,
            Self::Config { .. } => ErrorKind::Config,
        }
    }
}
