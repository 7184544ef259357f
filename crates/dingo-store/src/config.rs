//! Document store configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Where the store lives.
    ///
    /// - `sqlite:///data/app.db`: the path after the scheme, with its
    ///   extension replaced by `.json` (`data/app.json`)
    /// - `file:///var/lib/dingo/store.json` or a bare path: used as-is
    /// - `memory://`, `sqlite://:memory:` or any other scheme: in-memory only
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Refuse to open when the existing file cannot be read or parsed,
    /// instead of starting empty.
    #[serde(default)]
    pub strict_load: bool,
}

fn default_database_url() -> String {
    "sqlite:///./data/dingo.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            strict_load: false,
        }
    }
}

impl StoreConfig {
    /// A file-backed config for `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            database_url: path.into().to_string_lossy().into_owned(),
            strict_load: false,
        }
    }

    /// A config for a purely in-memory store.
    pub fn in_memory() -> Self {
        Self {
            database_url: "memory://".to_string(),
            strict_load: false,
        }
    }

    /// The backing file, or `None` for an in-memory store.
    pub fn backing_path(&self) -> Option<PathBuf> {
        let url = self.database_url.trim();

        if let Some(rest) = url
            .strip_prefix("sqlite:///")
            .or_else(|| url.strip_prefix("sqlite://"))
        {
            if rest.is_empty() || rest == ":memory:" {
                return None;
            }
            return Some(PathBuf::from(rest).with_extension("json"));
        }

        if let Some(rest) = url.strip_prefix("file://") {
            return (!rest.is_empty()).then(|| PathBuf::from(rest));
        }

        if url.is_empty() || url.contains("://") {
            return None;
        }

        Some(PathBuf::from(url))
    }
}
