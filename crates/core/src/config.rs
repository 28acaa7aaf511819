//! Session configuration
//!
//! Configuration can be loaded from a TOML file and/or `MEDIAGRAPH_*`
//! environment variables. One `SessionConfig` is shared by every session
//! a server instance runs.

use crate::media::FormatPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Process-wide session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Frames per inference call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Whether clients may negotiate shared memory transfer at all
    #[serde(default = "default_allow_shared_memory")]
    pub allow_shared_memory: bool,

    /// Directory under which shared memory handle names are resolved
    #[serde(default = "default_shared_memory_root")]
    pub shared_memory_root: PathBuf,

    /// Infer and respond to a short trailing batch when the client closes cleanly
    #[serde(default)]
    pub flush_partial_batch_on_close: bool,

    /// Append normalized upstream inferences to flushed responses
    #[serde(default)]
    pub echo_upstream_inferences: bool,

    /// Supported media formats
    #[serde(default)]
    pub formats: FormatPolicy,
}

fn default_batch_size() -> usize {
    1
}

fn default_allow_shared_memory() -> bool {
    true
}

fn default_shared_memory_root() -> PathBuf {
    PathBuf::from("/dev/shm")
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            allow_shared_memory: default_allow_shared_memory(),
            shared_memory_root: default_shared_memory_root(),
            flush_partial_batch_on_close: false,
            echo_upstream_inferences: false,
            formats: FormatPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if self.formats.supported_pixel_formats.is_empty() {
            return Err(Error::Config(
                "formats.supported_pixel_formats must not be empty".into(),
            ));
        }
        if self.formats.min_width > self.formats.max_width
            || self.formats.min_height > self.formats.max_height
        {
            return Err(Error::Config(format!(
                "minimum resolution {}x{} exceeds maximum {}x{}",
                self.formats.min_width,
                self.formats.min_height,
                self.formats.max_width,
                self.formats.max_height
            )));
        }
        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.as_ref().display(), e))
        })?;
        let config: SessionConfig =
            toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `MEDIAGRAPH_*` environment variables
    ///
    /// Unset variables keep their defaults; a value that does not parse is
    /// a configuration error.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build a configuration from a variable lookup
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = SessionConfig::default();

        if let Some(size) = parse_var(&lookup, "MEDIAGRAPH_BATCH_SIZE")? {
            config.batch_size = size;
        }
        if let Some(allow) = parse_var(&lookup, "MEDIAGRAPH_ALLOW_SHARED_MEMORY")? {
            config.allow_shared_memory = allow;
        }
        if let Some(root) = lookup("MEDIAGRAPH_SHARED_MEMORY_ROOT") {
            config.shared_memory_root = PathBuf::from(root);
        }
        if let Some(flush) = parse_var(&lookup, "MEDIAGRAPH_FLUSH_PARTIAL_BATCH")? {
            config.flush_partial_batch_on_close = flush;
        }
        if let Some(echo) = parse_var(&lookup, "MEDIAGRAPH_ECHO_UPSTREAM_INFERENCES")? {
            config.echo_upstream_inferences = echo;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Parse one variable, naming it in the error when the value is malformed
pub fn parse_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::Config(format!("{name}={raw:?}: {e}")))
        })
        .transpose()
}
