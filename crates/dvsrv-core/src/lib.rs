#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::return_self_not_must_use)]

//! dvsrv core: resolves module specifiers into a dependency graph, fetches
//! and caches remote sources, rewrites specifiers through an import map,
//! drives a bundling engine and republishes its output through a
//! conditional-GET response cache.

pub mod cache;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod import_map;
pub mod mime;
pub mod paths;
pub mod plugin;
pub mod response_cache;
pub mod specifier;
pub mod version;

pub use cache::{CacheError, CachedArtifact, ContentCache, RetryPolicy};
pub use compiler::{Bundle, CompileError, CompileOptions, CompiledEntrypoint, CompiledFile, Compiler};
pub use config::{Config, Mode};
pub use engine::{Engine, LinkEngine};
pub use error::{ConfigError, Error};
pub use import_map::ImportMap;
pub use response_cache::{CacheEntry, CachePolicy, Lookup, ResponseCache, Validators};
pub use version::VERSION;
