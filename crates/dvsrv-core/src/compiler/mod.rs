//! Bundle orchestrator.
//!
//! Classifies the requested entry points, runs the engine over the
//! compilable ones with the resolve/load pipeline, and reconciles the
//! engine's manifest with the files it produced. Everything the engine
//! doesn't understand (images, HTML, fonts) is read straight from disk.
//!
//! ## Entry point classification
//!
//! | Specifier                 | Handling                                   |
//! |---------------------------|--------------------------------------------|
//! | `https://...`             | handed to the engine as-is                 |
//! | `./app.ts`, `/src/a.tsx`  | mapped under the root; must exist          |
//! | `/logo.png`, `index.html` | static read-through, never seen by engine  |

use crate::cache::ContentCache;
use crate::config::Config;
use crate::engine::{BuildOptions, Engine, LinkEngine, Message, OutputFile};
use crate::error::{codes, Error};
use crate::mime::mime_for;
use crate::paths::{normalize, specifier_to_disk, url_path};
use crate::plugin::Pipeline;
use crate::specifier::{can_compile, is_remote};
use bytes::Bytes;
use dvsrv_util::hash::{weak_etag_bytes, weak_etag_stat};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Orchestrator error.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Must compile at least one entry point")]
    NoEntryPoints,

    /// A local entry point does not exist under the root.
    #[error("{specifier} not found")]
    NotFound { specifier: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The engine reported errors. They are carried untouched.
    #[error("Build failed with {} error(s)", .errors.len())]
    Build { errors: Vec<Message> },

    /// The engine's output doesn't add up.
    #[error("Engine contract violated: {message}")]
    EngineContract { message: String },
}

impl CompileError {
    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoEntryPoints => codes::COMPILE_NO_ENTRY_POINTS,
            Self::NotFound { .. } => codes::COMPILE_NOT_FOUND,
            Self::Io { .. } => codes::COMPILE_IO_ERROR,
            Self::Build { .. } => codes::COMPILE_BUILD_FAILED,
            Self::EngineContract { .. } => codes::COMPILE_ENGINE_CONTRACT,
        }
    }

    /// Whether the request named something that isn't there.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    fn contract(message: impl Into<String>) -> Self {
        Self::EngineContract {
            message: message.into(),
        }
    }
}

/// Per-call compile options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Let the engine split shared code into chunks.
    pub should_split: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { should_split: true }
    }
}

/// One file of a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledFile {
    pub file_path: PathBuf,
    /// `/` + the path relative to the root, `/`-separated.
    pub url_path: String,
    pub contents: Bytes,
    pub etag: Option<String>,
    pub mime: Option<String>,
}

/// A file that was requested directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledEntrypoint {
    pub file: CompiledFile,
    /// The entry point as requested: `/app.ts` for local sources, the URL for
    /// remote ones, the URL path for static files.
    pub specifier: String,
}

/// Result of one compile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    /// Compiled entry points first, then static ones.
    pub entry_points: Vec<CompiledEntrypoint>,
    /// Shared chunks and other non-entry outputs.
    pub files: Vec<CompiledFile>,
    pub warnings: Vec<Message>,
}

/// Drives an [`Engine`] over a set of entry points.
#[derive(Debug)]
pub struct Compiler<E: Engine = LinkEngine> {
    config: Config,
    engine: E,
    pipeline: Pipeline,
}

impl Compiler<LinkEngine> {
    /// A compiler using the built-in link engine.
    pub fn from_config(config: Config) -> Result<Self, Error> {
        Self::new(config, LinkEngine)
    }
}

impl<E: Engine> Compiler<E> {
    /// Create a compiler with the standard pipeline for `config`.
    pub fn new(config: Config, engine: E) -> Result<Self, Error> {
        let cache = ContentCache::new(config.cache_dir.clone())?;
        let pipeline = Pipeline::from_config(&config, cache);
        Ok(Self {
            config,
            engine,
            pipeline,
        })
    }

    /// Replace the resolve/load pipeline.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Compile `specifiers` into a bundle.
    pub async fn compile(
        &self,
        specifiers: &[String],
        options: CompileOptions,
    ) -> Result<Bundle, CompileError> {
        if specifiers.is_empty() {
            return Err(CompileError::NoEntryPoints);
        }

        let root = &self.config.root;
        let mut engine_entries = Vec::new();
        let mut static_entries = Vec::new();

        for specifier in specifiers {
            if is_remote(specifier) {
                engine_entries.push(specifier.clone());
            } else if can_compile(specifier) {
                let on_disk = specifier_to_disk(specifier, root);
                if !on_disk.is_file() {
                    return Err(CompileError::NotFound {
                        specifier: specifier.clone(),
                    });
                }
                engine_entries.push(on_disk.to_string_lossy().into_owned());
            } else {
                static_entries.push((specifier.clone(), specifier_to_disk(specifier, root)));
            }
        }

        debug!(
            entries = ?engine_entries,
            assets = static_entries.len(),
            "compiling"
        );

        let statics = read_static(&static_entries, root).await?;

        if engine_entries.is_empty() {
            return Ok(Bundle {
                entry_points: statics,
                ..Bundle::default()
            });
        }

        let build = self
            .engine
            .build(self.build_options(engine_entries, options), &self.pipeline)
            .await;

        for message in &build.errors {
            error!(%message, "build error");
        }
        for message in &build.warnings {
            warn!(%message, "build warning");
        }
        if !build.errors.is_empty() {
            return Err(CompileError::Build {
                errors: build.errors,
            });
        }

        let metafile = build
            .metafile
            .ok_or_else(|| CompileError::contract("did not create a metafile"))?;

        let mut produced: HashMap<PathBuf, CompiledFile> = build
            .output_files
            .into_iter()
            .map(|file| (normalize(&file.path), compiled_file(file, root)))
            .collect();

        let mut entry_points = Vec::new();
        let mut files = Vec::new();

        for (key, output) in metafile.outputs {
            let path = normalize(&root.join(&key));
            let file = produced.remove(&path).ok_or_else(|| {
                CompileError::contract(format!(
                    "engine said it output a file which we cannot find: {key} - {}",
                    path.display()
                ))
            })?;

            match output.entry_point {
                Some(entry_point) => entry_points.push(CompiledEntrypoint {
                    file,
                    specifier: entry_specifier(&entry_point),
                }),
                None => files.push(file),
            }
        }

        if entry_points.is_empty() {
            return Err(CompileError::contract(
                "did not find an entry point in the metafile",
            ));
        }

        entry_points.extend(statics);

        Ok(Bundle {
            entry_points,
            files,
            warnings: build.warnings,
        })
    }

    fn build_options(&self, entry_points: Vec<String>, options: CompileOptions) -> BuildOptions {
        let mut build = BuildOptions::new(self.config.root.clone(), entry_points);
        build.define = defines(&self.config);
        build.target = self.config.browser_target.clone();
        build.sourcemap = self.config.sourcemap;
        build.splitting = options.should_split;
        build.minify = self.config.is_prod();
        build.jsx_import_source = self.config.jsx_import_source.clone();
        build
    }
}

/// Globals replaced in every compiled script.
#[must_use]
pub fn defines(config: &Config) -> IndexMap<String, String> {
    let mut define = IndexMap::new();
    define.insert("self.Deno".to_string(), "false".to_string());
    define.insert("self.DEV".to_string(), (!config.is_prod()).to_string());
    define.insert("self.PROD".to_string(), config.is_prod().to_string());
    define.insert("self.VERSION".to_string(), format!("'{}'", config.version));
    define
}

fn entry_specifier(entry_point: &str) -> String {
    if is_remote(entry_point) {
        entry_point.to_string()
    } else {
        format!("/{}", entry_point.trim_start_matches('/'))
    }
}

fn compiled_file(file: OutputFile, root: &Path) -> CompiledFile {
    CompiledFile {
        url_path: url_path(&file.path, root),
        etag: Some(weak_etag_bytes(&file.contents)),
        mime: mime_for(&file.path).map(str::to_string),
        contents: file.contents,
        file_path: file.path,
    }
}

async fn read_static(
    entries: &[(String, PathBuf)],
    root: &Path,
) -> Result<Vec<CompiledEntrypoint>, CompileError> {
    let mut out = Vec::with_capacity(entries.len());

    for (specifier, path) in entries {
        let io_err = |source: std::io::Error| {
            if source.kind() == std::io::ErrorKind::NotFound {
                CompileError::NotFound {
                    specifier: specifier.clone(),
                }
            } else {
                CompileError::Io {
                    path: path.clone(),
                    source,
                }
            }
        };

        let contents = tokio::fs::read(path).await.map_err(io_err)?;
        let meta = tokio::fs::metadata(path).await.map_err(io_err)?;
        let mtime_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_millis());

        let url_path = url_path(path, root);
        out.push(CompiledEntrypoint {
            file: CompiledFile {
                file_path: path.clone(),
                url_path: url_path.clone(),
                contents: Bytes::from(contents),
                etag: Some(weak_etag_stat(meta.len(), mtime_ms)),
                mime: mime_for(path).map(str::to_string),
            },
            specifier: url_path,
        });
    }

    Ok(out)
}
