use crate::engine::Sourcemap;
use crate::error::ConfigError;
use crate::import_map::ImportMap;
use crate::paths;
use crate::specifier;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;

/// Environment variable selecting the build mode (`prod` or anything else).
pub const MODE_ENV: &str = "MODE";
/// Environment variable pinning the version string baked into builds.
pub const VERSION_ENV: &str = "VERSION";
/// Environment variable overriding the server port.
pub const PORT_ENV: &str = "PORT";

/// Port used when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 8080;
/// File name looked up at the root when no import map is supplied.
pub const IMPORT_MAP_FILE: &str = "import_map.json";

/// Build mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Dev,
    Prod,
}

impl Mode {
    /// Read the mode from `MODE`; only the exact value `prod` selects production.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var(MODE_ENV).as_deref() {
            Ok("prod") => Self::Prod,
            _ => Self::Dev,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Prod => "prod",
        }
    }
}

/// Runtime configuration shared by the compiler, the CLI and the server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absolute project root. Entry points and outputs are relative to it.
    pub root: PathBuf,

    pub mode: Mode,

    /// Version string exposed to bundles as `self.VERSION`.
    pub version: String,

    pub port: u16,

    /// Package providing the automatic JSX runtime.
    pub jsx_import_source: String,

    /// Engine targets, e.g. `esnext`.
    pub browser_target: Vec<String>,

    pub sourcemap: Sourcemap,

    pub import_map: Option<ImportMap>,

    /// Directory that delegated import-map resolutions are resolved from.
    pub import_map_dir: Option<PathBuf>,

    /// CDN base for `npm:` and `jsr:` aliases.
    pub cdn: Url,

    /// Directory of the remote module cache.
    pub cache_dir: PathBuf,
}

impl Config {
    /// Create a config rooted at `root`, reading `MODE`, `VERSION` and `PORT`
    /// from the environment and discovering `import_map.json` at the root.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .map_err(|source| ConfigError::InvalidRoot {
                path: root.to_path_buf(),
                source,
            })?;

        debug!(root = %root.display(), "configuring");

        let mut config = Self {
            mode: Mode::from_env(),
            version: version_from_env(),
            port: port_from_env(),
            jsx_import_source: "preact".to_string(),
            browser_target: vec!["esnext".to_string()],
            sourcemap: Sourcemap::None,
            import_map: None,
            import_map_dir: None,
            cdn: specifier::default_cdn(),
            cache_dir: paths::cache_dir(),
            root,
        };

        let discovered = config.root.join(IMPORT_MAP_FILE);
        if discovered.is_file() {
            config = config.with_import_map_path(&discovered)?;
        }

        Ok(config)
    }

    /// Set the build mode.
    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Pin the version string.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the JSX import source.
    #[must_use]
    pub fn with_jsx_import_source(mut self, source: impl Into<String>) -> Self {
        self.jsx_import_source = source.into();
        self
    }

    /// Set the engine targets.
    #[must_use]
    pub fn with_browser_target(mut self, target: Vec<String>) -> Self {
        self.browser_target = target;
        self
    }

    /// Set the sourcemap mode.
    #[must_use]
    pub fn with_sourcemap(mut self, sourcemap: Sourcemap) -> Self {
        self.sourcemap = sourcemap;
        self
    }

    /// Use an inline import map. Delegated resolutions start from `dir`, or
    /// from the root when `dir` is `None`.
    #[must_use]
    pub fn with_import_map(mut self, map: ImportMap, dir: Option<PathBuf>) -> Self {
        self.import_map_dir = Some(dir.unwrap_or_else(|| self.root.clone()));
        self.import_map = Some(map);
        self
    }

    /// Load the import map from a file. Delegated resolutions start from the
    /// file's directory.
    pub fn with_import_map_path(self, path: &Path) -> Result<Self, ConfigError> {
        let path = paths::specifier_to_disk(&path.to_string_lossy(), &self.root);
        let map = ImportMap::load(&path)?;
        let dir = path.parent().map(Path::to_path_buf);
        debug!(path = %path.display(), rules = map.imports.len(), "loaded import map");
        Ok(self.with_import_map(map, dir))
    }

    /// Set the CDN that `npm:` and `jsr:` aliases expand onto.
    pub fn with_cdn(mut self, cdn: &str) -> Result<Self, ConfigError> {
        self.cdn = Url::parse(cdn).map_err(|source| ConfigError::InvalidCdn {
            url: cdn.to_string(),
            source,
        })?;
        Ok(self)
    }

    /// Set the remote module cache directory.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = dir;
        self
    }

    #[must_use]
    pub fn is_prod(&self) -> bool {
        self.mode == Mode::Prod
    }
}

fn version_from_env() -> String {
    match std::env::var(VERSION_ENV) {
        Ok(v) if !v.is_empty() => v,
        _ => random_version(),
    }
}

fn port_from_env() -> u16 {
    match std::env::var(PORT_ENV) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(value = %raw, "ignoring invalid {PORT_ENV}, using {DEFAULT_PORT}");
            DEFAULT_PORT
        }),
        Err(_) => DEFAULT_PORT,
    }
}

/// 8 random bytes, hex encoded.
fn random_version() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
