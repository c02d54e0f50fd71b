//! Configuration types, loaded from `stencil.toml`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::compiler::Strategy;

/// File picked up from the working directory when no `--config` is given.
pub const CONFIG_FILE: &str = "stencil.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StencilConfig {
    pub compiler: CompilerConfig,
    pub runtime: RuntimeConfig,
    /// `tracing` filter directive, e.g. `"debug"` or `"stencil::vm=trace"`.
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    pub strategy: Strategy,
    /// Run the linked-program verifier after compiling.
    pub verify: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Lazy,
            verify: true,
        }
    }
}

/// Runtime configuration for the VM
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Operand stack limit; exceeding it is a runtime error.
    pub max_stack: usize,
    /// Log every executed instruction at debug level.
    pub trace_ops: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_stack: 4096,
            trace_ops: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl StencilConfig {
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&source).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `explicit` if given, else `./stencil.toml` if present, else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let local = Path::new(CONFIG_FILE);
                if local.exists() {
                    Self::load(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = StencilConfig::from_toml("").unwrap();
        assert_eq!(config, StencilConfig::default());
        assert_eq!(config.compiler.strategy, Strategy::Lazy);
        assert!(config.compiler.verify);
        assert_eq!(config.runtime.max_stack, 4096);
    }

    #[test]
    fn test_partial_override() {
        let config = StencilConfig::from_toml(
            r#"
            log_level = "debug"

            [compiler]
            strategy = "eager"

            [runtime]
            trace_ops = true
            "#,
        )
        .unwrap();
        assert_eq!(config.compiler.strategy, Strategy::Eager);
        assert!(config.compiler.verify);
        assert!(config.runtime.trace_ops);
        assert_eq!(config.runtime.max_stack, 4096);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(StencilConfig::from_toml("[runtime]\njit = true\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\nmax_stack = 64").unwrap();
        let config = StencilConfig::load(file.path()).unwrap();
        assert_eq!(config.runtime.max_stack, 64);

        let err = StencilConfig::discover(Some(Path::new("/nonexistent/stencil.toml")));
        assert!(matches!(err, Err(ConfigError::Io { .. })));
    }
}
