use std::path::PathBuf;
use thiserror::Error;

use crate::cache::CacheError;
use crate::compiler::CompileError;

/// Stable error codes, one per failure class.
pub mod codes {
    pub const CACHE_FETCH_FAILED: &str = "CACHE_FETCH_FAILED";
    pub const CACHE_TRANSPORT_ERROR: &str = "CACHE_TRANSPORT_ERROR";
    pub const CACHE_IO_ERROR: &str = "CACHE_IO_ERROR";
    pub const CACHE_METADATA_INVALID: &str = "CACHE_METADATA_INVALID";

    pub const CONFIG_IMPORT_MAP_READ: &str = "CONFIG_IMPORT_MAP_READ";
    pub const CONFIG_IMPORT_MAP_PARSE: &str = "CONFIG_IMPORT_MAP_PARSE";
    pub const CONFIG_INVALID_ROOT: &str = "CONFIG_INVALID_ROOT";
    pub const CONFIG_INVALID_CDN: &str = "CONFIG_INVALID_CDN";

    pub const COMPILE_NO_ENTRY_POINTS: &str = "COMPILE_NO_ENTRY_POINTS";
    pub const COMPILE_NOT_FOUND: &str = "COMPILE_NOT_FOUND";
    pub const COMPILE_IO_ERROR: &str = "COMPILE_IO_ERROR";
    pub const COMPILE_BUILD_FAILED: &str = "COMPILE_BUILD_FAILED";
    pub const COMPILE_ENGINE_CONTRACT: &str = "COMPILE_ENGINE_CONTRACT";
}

/// Errors raised while assembling a [`crate::Config`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read import map at {path}: {source}")]
    ImportMapRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse import map at {path}: {source}")]
    ImportMapParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid root directory {path}: {source}")]
    InvalidRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid CDN base URL '{url}': {source}")]
    InvalidCdn {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

impl ConfigError {
    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ImportMapRead { .. } => codes::CONFIG_IMPORT_MAP_READ,
            Self::ImportMapParse { .. } => codes::CONFIG_IMPORT_MAP_PARSE,
            Self::InvalidRoot { .. } => codes::CONFIG_INVALID_ROOT,
            Self::InvalidCdn { .. } => codes::CONFIG_INVALID_CDN,
        }
    }
}

/// Top-level error type for dvsrv operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

impl Error {
    /// Get the error code of the underlying failure.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.code(),
            Self::Cache(e) => e.code(),
            Self::Compile(e) => e.code(),
        }
    }

    /// Whether the failure means "nothing to serve here" rather than a fault.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Compile(e) if e.is_not_found())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_screaming_snake(code: &str) -> bool {
        !code.is_empty()
            && code
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    }

    #[test]
    fn test_config_error_codes() {
        let err = ConfigError::InvalidCdn {
            url: "not a url".to_string(),
            source: url::Url::parse("not a url").unwrap_err(),
        };
        assert_eq!(err.code(), codes::CONFIG_INVALID_CDN);
        assert!(is_screaming_snake(err.code()));
        assert!(err.to_string().contains("not a url"));
    }

    #[test]
    fn test_error_wraps_compile_not_found() {
        let err: Error = CompileError::NotFound {
            specifier: "/missing.ts".to_string(),
        }
        .into();
        assert!(err.is_not_found());
        assert_eq!(err.code(), codes::COMPILE_NOT_FOUND);
    }

    #[test]
    fn test_cache_error_is_not_not_found() {
        let err: Error = CacheError::Fetch {
            url: "https://esm.sh/left-pad".to_string(),
            status: 404,
        }
        .into();
        assert!(!err.is_not_found());
        assert_eq!(err.code(), codes::CACHE_FETCH_FAILED);
    }
}
