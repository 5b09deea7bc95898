//! Configuration file loader.
//!
//! A TOML subset: tables, inline tables, dotted keys, integer / boolean /
//! string / path values and `#` line comments. Arrays and arrays-of-tables
//! are rejected up front with the offending key path.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// `entrypoint` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct EntrypointConfig {
    /// Source file the compilation starts from.
    pub filepath: Option<PathBuf>,
    /// Symbol evaluated as the program entry.
    pub symbol: Option<String>,
}

/// `std` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct StdConfig {
    /// Standard library source file.
    pub filepath: Option<PathBuf>,
}

/// `logging.asts` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct AstLogConfig {
    /// Print parsed ASTs (and the emitted opcode streams).
    pub enable: bool,
    /// Target file; stdout when absent.
    pub log_file: Option<PathBuf>,
}

/// `logging.imports` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ImportLogConfig {
    /// Log import resolution.
    pub enable: bool,
    /// Also log prelude imports.
    pub enable_prelude: bool,
    /// Target file; stdout when absent.
    pub log_file: Option<PathBuf>,
}

/// `logging.config` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ConfigLogConfig {
    /// Echo the parsed configuration.
    pub enable: bool,
}

/// `logging` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct LoggingConfig {
    /// AST logging.
    pub asts: AstLogConfig,
    /// Import logging.
    pub imports: ImportLogConfig,
    /// Config echo.
    pub config: ConfigLogConfig,
}

/// Parsed configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    /// Entry point.
    pub entrypoint: EntrypointConfig,
    /// Standard library.
    pub std: StdConfig,
    /// Logging toggles.
    pub logging: LoggingConfig,
}

/// Human-readable schema, printed by `--help`.
pub const SCHEMA_HELP: &str = "\
Recognised configuration keys:
  entrypoint.filepath         path    source file to compile
  entrypoint.symbol           string  entry symbol
  std.filepath                path    standard library source file
  logging.asts.enable         bool    print parsed ASTs and opcode streams
  logging.asts.log-file       path    AST log target (default stdout)
  logging.imports.enable      bool    log import resolution
  logging.imports.enable-prelude bool log prelude imports too
  logging.imports.log-file    path    import log target (default stdout)
  logging.config.enable       bool    echo the parsed configuration
Arrays and arrays-of-tables are not supported.";

/// Failure while loading the configuration. All variants are fatal at load.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("could not read config file {path}: {source}")]
    Io {
        /// The config path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML, or holds unknown or mistyped keys.
    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// The supported subset excludes arrays.
    #[error("config key '{key_path}' is an array; arrays are not supported")]
    ArrayUnsupported {
        /// Dotted path of the offending key.
        key_path: String,
    },
}

fn reject_arrays(value: &toml::Value, path: &str) -> Result<(), ConfigError> {
    match value {
        toml::Value::Array(_) => Err(ConfigError::ArrayUnsupported {
            key_path: path.to_owned(),
        }),
        toml::Value::Table(table) => {
            for (key, nested) in table {
                let nested_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };

                reject_arrays(nested, &nested_path)?;
            }

            Ok(())
        }
        _ => Ok(()),
    }
}

/// Parses configuration text.
pub fn parse_config(text: &str) -> Result<Config, ConfigError> {
    let value: toml::Value = toml::from_str(text)?;

    reject_arrays(&value, "")?;

    Ok(value.try_into()?)
}

/// Loads and parses the file at `path`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_owned(),
        source,
    })?;

    parse_config(&text)
}
