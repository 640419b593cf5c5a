//! # Node configuration.
//!
//! [`NodeConfig`] is the verified description of one node: identity, source bytes,
//! content hash and origin. It is built once per register call and replaced
//! wholesale on update; the only later mutation is zeroing the source after a
//! successful (or disabling) run.
//!
//! ## Rules
//! - `key`: starts with an ASCII letter, then letters/digits/`_`/`-`/`/`
//! - `id`: derived from the key (blake3) when absent or zero, never zero
//! - `hash`: blake3 hex of the source when absent
//! - `source`: non-empty at construction

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::ConfigError;

/// Where a node's source came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Read from a local script file.
    Local {
        /// File path.
        path: PathBuf,
        /// Script dialect (file extension).
        dialect: String,
    },
    /// Pushed as bytes (diff delivery, API call).
    Remote {
        /// Script dialect declared by the sender.
        dialect: String,
    },
}

impl Origin {
    /// `"local"` or `"remote"`.
    pub fn label(&self) -> &'static str {
        match self {
            Origin::Local { .. } => "local",
            Origin::Remote { .. } => "remote",
        }
    }

    /// Declared script dialect.
    pub fn dialect(&self) -> &str {
        match self {
            Origin::Local { dialect, .. } | Origin::Remote { dialect } => dialect,
        }
    }
}

impl Default for Origin {
    fn default() -> Self {
        Origin::Remote {
            dialect: String::new(),
        }
    }
}

/// Optional inputs of a register call.
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    /// Explicit id (`None` or `Some(0)` derives one from the key).
    pub id: Option<u64>,
    /// Precomputed content hash.
    pub hash: Option<String>,
    /// Origin metadata.
    pub origin: Origin,
}

impl RegisterOptions {
    /// Options carrying an explicit id.
    pub fn with_id(id: u64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }
}

/// Verified description of a node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    id: u64,
    key: String,
    hash: String,
    source: Arc<[u8]>,
    origin: Origin,
}

impl NodeConfig {
    /// Validates the inputs and builds a config.
    ///
    /// ## Example
    /// ```rust
    /// use scriptvisor::{NodeConfig, RegisterOptions};
    ///
    /// let cfg = NodeConfig::new("edge/gateway", "serve", RegisterOptions::default()).unwrap();
    /// assert_ne!(cfg.id(), 0);
    /// assert_eq!(cfg.origin().label(), "remote");
    ///
    /// assert!(NodeConfig::new("9lives", "serve", RegisterOptions::default()).is_err());
    /// assert!(NodeConfig::new("empty", "", RegisterOptions::default()).is_err());
    /// ```
    pub fn new(
        key: impl Into<String>,
        source: impl Into<Vec<u8>>,
        opts: RegisterOptions,
    ) -> Result<Self, ConfigError> {
        let key = key.into();
        validate_key(&key)?;

        let source: Vec<u8> = source.into();
        if source.is_empty() {
            return Err(ConfigError::EmptySource { key });
        }

        let id = opts.id.filter(|id| *id != 0).unwrap_or_else(|| derive_id(&key));
        let hash = opts
            .hash
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| blake3::hash(&source).to_hex().to_string());

        Ok(Self {
            id,
            key,
            hash,
            source: source.into(),
            origin: opts.origin,
        })
    }

    /// Reads a local script file.
    ///
    /// The key is the file stem, the dialect the extension.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = tokio::fs::read(path).await.map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let key = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let dialect = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        Self::new(
            key,
            source,
            RegisterOptions {
                origin: Origin::Local {
                    path: path.to_path_buf(),
                    dialect,
                },
                ..RegisterOptions::default()
            },
        )
    }

    /// Stable numeric identity.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unique node name.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Content digest.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Script bytes (empty once executed).
    pub fn source(&self) -> &Arc<[u8]> {
        &self.source
    }

    /// Origin metadata.
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Drops the script bytes after execution.
    pub(crate) fn clear_source(&mut self) {
        self.source = Arc::from(Vec::new());
    }
}

/// Checks the key grammar: an ASCII letter, then letters/digits/`_`/`-`/`/`.
pub fn validate_key(key: &str) -> Result<(), ConfigError> {
    let mut chars = key.chars();
    let Some(first) = chars.next() else {
        return Err(ConfigError::EmptyKey);
    };
    let valid = first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/'));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidKey {
            key: key.to_string(),
        })
    }
}

/// Derives a non-zero id from a key.
pub fn derive_id(key: &str) -> u64 {
    let digest = blake3::hash(key.as_bytes());
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&digest.as_bytes()[..8]);
    match u64::from_le_bytes(raw) {
        0 => 1,
        id => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_grammar() {
        assert!(validate_key("a").is_ok());
        assert!(validate_key("edge/gateway-01_x").is_ok());
        assert!(matches!(validate_key(""), Err(ConfigError::EmptyKey)));
        assert!(validate_key("1abc").is_err());
        assert!(validate_key("_abc").is_err());
        assert!(validate_key("has space").is_err());
        assert!(validate_key("dot.ted").is_err());
    }

    #[test]
    fn id_is_derived_and_stable() {
        let a = NodeConfig::new("alpha", "x", RegisterOptions::default()).unwrap();
        let b = NodeConfig::new("alpha", "y", RegisterOptions::with_id(0)).unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id(), derive_id("alpha"));
        assert_ne!(a.id(), 0);

        let c = NodeConfig::new("alpha", "x", RegisterOptions::with_id(9)).unwrap();
        assert_eq!(c.id(), 9);
    }

    #[test]
    fn hash_defaults_to_source_digest() {
        let cfg = NodeConfig::new("alpha", "body", RegisterOptions::default()).unwrap();
        assert_eq!(cfg.hash(), blake3::hash(b"body").to_hex().as_str());

        let opts = RegisterOptions {
            hash: Some("h1".into()),
            ..RegisterOptions::default()
        };
        let cfg = NodeConfig::new("alpha", "body", opts).unwrap();
        assert_eq!(cfg.hash(), "h1");
    }

    #[test]
    fn clear_source_keeps_identity() {
        let mut cfg = NodeConfig::new("alpha", "body", RegisterOptions::default()).unwrap();
        let id = cfg.id();
        cfg.clear_source();
        assert!(cfg.source().is_empty());
        assert_eq!(cfg.id(), id);
        assert_eq!(cfg.key(), "alpha");
    }

    #[tokio::test]
    async fn from_file_uses_stem_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.lua");
        tokio::fs::write(&path, b"ok-script").await.unwrap();

        let cfg = NodeConfig::from_file(&path).await.unwrap();
        assert_eq!(cfg.key(), "ingest");
        assert_eq!(cfg.origin().label(), "local");
        assert_eq!(cfg.origin().dialect(), "lua");
        assert_eq!(&cfg.source()[..], b"ok-script");

        let missing = NodeConfig::from_file(dir.path().join("nope.lua")).await;
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
