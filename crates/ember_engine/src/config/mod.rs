//! Configuration system
//!
//! Every configuration file is TOML or RON, picked by file extension. Errors
//! carry the offending file so a bad definition can be found without a
//! debugger.

pub use serde::{Serialize, Deserialize};

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Supported on-disk formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.toml`
    Toml,
    /// `.ron`
    Ron,
}

impl ConfigFormat {
    /// Detect the format from a path's extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("ron") => Ok(Self::Ron),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Parse `contents` as `T` using the format implied by `path`
pub fn parse_str<T: DeserializeOwned>(contents: &str, path: &Path) -> Result<T, ConfigError> {
    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    match ConfigFormat::from_path(path)? {
        ConfigFormat::Toml => toml::from_str(contents).map_err(|e| parse_error(e.to_string())),
        ConfigFormat::Ron => ron::from_str(contents).map_err(|e| parse_error(e.to_string())),
    }
}

/// Read and parse a single configuration file
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    ConfigFormat::from_path(path)?;
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_str(&contents, path)
}

/// Configuration trait
pub trait Config: Serialize + DeserializeOwned + Default {
    /// Load configuration from file
    fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_file(path.as_ref())
    }

    /// Load configuration from file, falling back to defaults when it is missing
    fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from_file(path)
        } else {
            log::info!("No configuration at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
            }
            ConfigFormat::Ron => ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
        };

        std::fs::write(path, contents).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error reading {path:?}: {source}")]
    Io {
        /// File being accessed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Parse error
    #[error("Parse error in {path:?}: {message}")]
    Parse {
        /// File being parsed
        path: PathBuf,
        /// Parser message, including the offending field
        message: String,
    },

    /// A field parsed but holds an unusable value
    #[error("Invalid field `{field}` in {path:?}: {reason}")]
    InvalidField {
        /// File holding the definition
        path: PathBuf,
        /// Dotted field path
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// Two definitions share a name
    #[error("Duplicate {kind} `{name}` in {path:?}")]
    Duplicate {
        /// Definition kind ("pipeline", "descriptor layout")
        kind: &'static str,
        /// Repeated name
        name: String,
        /// File of the second definition
        path: PathBuf,
    },

    /// A definition names another definition that does not exist
    #[error("Unknown {kind} `{name}` referenced from {path:?}")]
    UnknownReference {
        /// Kind of the missing definition
        kind: &'static str,
        /// Name that failed to resolve
        name: String,
        /// File holding the reference
        path: PathBuf,
    },

    /// A required definition was not provided at all
    #[error("Missing {kind} `{name}`")]
    Missing {
        /// Kind of the missing definition
        kind: &'static str,
        /// Expected name
        name: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0:?}")]
    UnsupportedFormat(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    impl Config for Sample {}

    #[test]
    fn test_round_trip_toml_and_ron() {
        let dir = tempfile::tempdir().unwrap();
        let sample = Sample { name: "ember".to_string(), count: 3 };

        for file in ["sample.toml", "sample.ron"] {
            let path = dir.path().join(file);
            sample.save_to_file(&path).unwrap();
            assert_eq!(Sample::load_from_file(&path).unwrap(), sample);
        }
    }

    #[test]
    fn test_unsupported_extension() {
        let err = Sample::load_from_file("settings.json").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = parse_str::<Sample>("name = 5", Path::new("bad.toml")).unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, PathBuf::from("bad.toml")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Sample::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Sample::default());
    }
}
