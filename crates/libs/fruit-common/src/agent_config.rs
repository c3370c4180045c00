//! Layered JSON configuration of the Fruit agent with JSON pointer lookups.
//!
//! Configuration values are looked up with [RFC 6901](https://www.rfc-editor.org/rfc/rfc6901)
//! JSON pointers in a list of JSON documents. The first document containing a value for
//! the pointer wins, which allows local settings to override settings provisioned by a
//! server.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Environment variable with a colon-separated list of configuration files.
pub const CONFIG_FILES_ENV_VAR: &str = "FRUIT_AGENT_CONFIG_FILES";

/// Configuration files used if [`CONFIG_FILES_ENV_VAR`] is not set.
pub const DEFAULT_CONFIG_FILES: &str = "/run/fruit.json@local:/run/fruit.json@server";

/// Invalid JSON pointer.
#[derive(Debug, Error)]
#[error("invalid JSON pointer {0:?}")]
pub struct PointerError(String);

/// Loaded agent configuration.
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    /// Configuration files in order of precedence.
    sources: Vec<PathBuf>,
    /// Documents loaded from the configuration files which exist.
    documents: Vec<Value>,
}

impl AgentConfig {
    /// Load the configuration from the files given by the environment.
    pub fn from_env() -> Self {
        let files =
            env::var(CONFIG_FILES_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILES.to_owned());
        Self::load(files.split(':').filter(|file| !file.is_empty()))
    }

    /// Load the configuration from the given files.
    ///
    /// Files which do not exist are skipped. Files which cannot be read or parsed are
    /// skipped with a warning.
    pub fn load<P: Into<PathBuf>>(sources: impl IntoIterator<Item = P>) -> Self {
        let mut config = Self {
            sources: sources.into_iter().map(Into::into).collect(),
            documents: Vec::new(),
        };
        config.reload();
        config
    }

    /// Re-read all configuration files.
    pub fn reload(&mut self) {
        self.documents = self
            .sources
            .iter()
            .filter_map(|path| match load_document(path) {
                Ok(document) => document,
                Err(error) => {
                    warn!("could not load agent config file {path:?}: {error}");
                    None
                }
            })
            .collect();
    }

    /// Look up the value for the given JSON pointer.
    ///
    /// The empty pointer refers to the first document as a whole. Pointers are validated
    /// even if no document has been loaded. Array indices follow RFC 6901 strictly, hence,
    /// indices with leading zeros such as `/list/01` do not resolve.
    pub fn get(&self, pointer: &str) -> Result<Option<&Value>, PointerError> {
        if !pointer.is_empty() && !pointer.starts_with('/') {
            return Err(PointerError(pointer.to_owned()));
        }
        Ok(self
            .documents
            .iter()
            .find_map(|document| document.pointer(pointer)))
    }

    /// Look up the value for the given JSON pointer falling back to a default.
    pub fn get_or<'c>(
        &'c self,
        pointer: &str,
        default: &'c Value,
    ) -> Result<&'c Value, PointerError> {
        Ok(self.get(pointer)?.unwrap_or(default))
    }
}

fn load_document(path: &Path) -> io::Result<Option<Value>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(io::Error::from)
}
