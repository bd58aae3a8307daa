//! Namespace configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config:
//!
//! ```toml
//! umask = 0o022
//! max_symlinks = 40
//! max_file_size = 1073741824
//! dev_prefix = "/dev"
//!
//! [env]
//! HOME = "/root"
//! PATH = "/usr/bin:/bin"
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{VfsError, VfsResult};

pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Settings applied when a [`Namespace`](crate::Namespace) is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    /// Umask of the init process.
    pub umask: u32,
    /// Symlink hops allowed during one resolution before ELOOP.
    pub max_symlinks: u32,
    /// Largest size a regular file may grow to; writes and truncates past
    /// it fail EFBIG.
    pub max_file_size: u64,
    /// Search path used by `look_path` when the environment has no PATH.
    pub path: String,
    /// Prefix under which devtmpfs synthesizes block device nodes.
    pub dev_prefix: String,
    /// Permission bits of the rootfs root directory.
    pub root_mode: u32,
    /// Initial environment of the init process.
    pub env: IndexMap<String, String>,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            umask: 0o022,
            max_symlinks: 40,
            max_file_size: 1 << 30,
            path: DEFAULT_PATH.to_string(),
            dev_prefix: "/dev".to_string(),
            root_mode: 0o755,
            env: IndexMap::new(),
        }
    }
}

impl NamespaceConfig {
    /// Parse from a TOML string.
    pub fn from_toml_str(text: &str) -> VfsResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| VfsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file on the host.
    pub fn load(path: impl AsRef<Path>) -> VfsResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> VfsResult<()> {
        if self.umask > 0o777 {
            return Err(VfsError::Config(format!("umask {:o} out of range", self.umask)));
        }
        if self.root_mode > 0o7777 {
            return Err(VfsError::Config(format!(
                "root_mode {:o} out of range",
                self.root_mode
            )));
        }
        if !self.dev_prefix.starts_with('/') {
            return Err(VfsError::Config(format!(
                "dev_prefix must be absolute: {}",
                self.dev_prefix
            )));
        }
        if self.env.keys().any(|k| k.is_empty() || k.contains('=')) {
            return Err(VfsError::Config("invalid environment variable name".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_is_default() {
        let config = NamespaceConfig::from_toml_str("").unwrap();
        assert_eq!(config, NamespaceConfig::default());
        assert_eq!(config.umask, 0o022);
        assert_eq!(config.max_symlinks, 40);
    }

    #[test]
    fn test_partial_override_keeps_env_order() {
        let config = NamespaceConfig::from_toml_str(
            r#"
            umask = 0o077
            [env]
            TERM = "dumb"
            HOME = "/root"
            "#,
        )
        .unwrap();
        assert_eq!(config.umask, 0o077);
        assert_eq!(config.dev_prefix, "/dev");
        let keys: Vec<_> = config.env.keys().cloned().collect();
        assert_eq!(keys, vec!["TERM", "HOME"]);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(NamespaceConfig::from_toml_str("umask = 0o1000").is_err());
        assert!(NamespaceConfig::from_toml_str("dev_prefix = \"dev\"").is_err());
        assert!(NamespaceConfig::from_toml_str("umask = \"x\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_symlinks = 8").unwrap();
        let config = NamespaceConfig::load(file.path()).unwrap();
        assert_eq!(config.max_symlinks, 8);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = NamespaceConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, VfsError::Io(_)));
    }
}
