//! Resolve/load pipeline handed to the bundling engine.
//!
//! The engine calls [`Pipeline::resolve`] for every specifier it meets and
//! [`Pipeline::load`] for every module outside the file namespace. Handlers
//! run in registration order and the first one that answers wins:
//!
//! ```text
//! resolve:  importMap  ->  fetch  ->  engine default
//! load:     fetch (fetch namespace only)  ->  engine default
//! ```
//!
//! The import-map handler never resolves on its own. It rewrites the
//! specifier and hands it back to the engine ([`ResolveOutcome::Delegate`]),
//! which resolves the rewritten value through the remaining handlers.

pub mod fetch;
pub mod import_map;

use crate::cache::ContentCache;
use crate::config::Config;
use bytes::Bytes;
use std::path::PathBuf;
use thiserror::Error;

pub use fetch::FetchPlugin;
pub use import_map::ImportMapPlugin;

/// Result type for plugin hooks.
pub type HookResult<T> = Result<T, PluginError>;

/// Error from a plugin hook.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{plugin}] {hook}: {message}")]
pub struct PluginError {
    /// Plugin that failed.
    pub plugin: String,
    /// Hook that failed.
    pub hook: &'static str,
    pub message: String,
}

impl PluginError {
    #[must_use]
    pub fn new(plugin: PluginName, hook: &'static str, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.as_str().to_string(),
            hook,
            message: message.into(),
        }
    }
}

/// Names of the built-in handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginName {
    ImportMap,
    Fetch,
}

impl PluginName {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImportMap => "importMap",
            Self::Fetch => "fetch",
        }
    }
}

/// How a specifier was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveKind {
    EntryPoint,
    Import,
    DynamicImport,
    CssImport,
}

/// Where a module's contents come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    /// Local files, read from disk by the engine.
    File,
    /// Remote URLs, loaded through the content cache.
    Fetch,
}

/// Input of a resolve hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveArgs {
    pub path: String,
    pub kind: ResolveKind,
    /// Path (file namespace) or URL (fetch namespace) of the importing module.
    pub importer: Option<String>,
    /// Namespace of the importer; `File` for entry points.
    pub namespace: Namespace,
    pub resolve_dir: Option<PathBuf>,
    /// Handler to skip, set when re-resolving a delegated specifier.
    pub skip: Option<PluginName>,
}

impl ResolveArgs {
    /// Arguments for resolving an entry point from `dir`.
    #[must_use]
    pub fn entry_point(path: impl Into<String>, dir: PathBuf) -> Self {
        Self {
            path: path.into(),
            kind: ResolveKind::EntryPoint,
            importer: None,
            namespace: Namespace::File,
            resolve_dir: Some(dir),
            skip: None,
        }
    }
}

/// A module the pipeline located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    pub path: String,
    pub namespace: Namespace,
    pub external: bool,
}

/// Answer of a resolve hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved(ResolvedModule),
    /// Re-resolve `path` from `resolve_dir`, skipping `from`.
    Delegate {
        path: String,
        resolve_dir: PathBuf,
        from: PluginName,
    },
}

/// Input of a load hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadArgs {
    pub path: String,
    pub namespace: Namespace,
}

/// How the engine should interpret loaded contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loader {
    Tsx,
    Jsx,
    Ts,
    Js,
    Css,
    /// Opaque bytes.
    Raw,
}

impl Loader {
    /// Pick a loader for a URL or file path, consulting the content type
    /// when the extension is not decisive.
    ///
    /// `.tsx` and `.jsx` win outright. Then TypeScript, JavaScript and CSS
    /// are each recognised by content type or by extension, in that order.
    #[must_use]
    pub fn classify(path: &str, content_type: Option<&str>) -> Self {
        let ct = content_type.unwrap_or("");
        if path.ends_with(".tsx") {
            Self::Tsx
        } else if path.ends_with(".jsx") {
            Self::Jsx
        } else if ct.contains("typescript") || path.ends_with(".ts") || path.ends_with(".mts") {
            Self::Ts
        } else if ct.contains("javascript")
            || path.ends_with(".js")
            || path.ends_with(".mjs")
            || path.ends_with(".cjs")
        {
            Self::Js
        } else if ct.contains("css") || path.ends_with(".css") {
            Self::Css
        } else {
            Self::Raw
        }
    }

    /// Whether imports in this kind of module are JavaScript imports.
    #[must_use]
    pub fn is_script(&self) -> bool {
        matches!(self, Self::Tsx | Self::Jsx | Self::Ts | Self::Js)
    }
}

/// Output of a load hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    pub contents: Bytes,
    pub loader: Loader,
}

/// Resolve handlers, tried in order.
#[derive(Debug, Clone)]
pub enum ResolveHandler {
    ImportMap(ImportMapPlugin),
    Fetch(FetchPlugin),
}

impl ResolveHandler {
    #[must_use]
    pub fn name(&self) -> PluginName {
        match self {
            Self::ImportMap(_) => PluginName::ImportMap,
            Self::Fetch(_) => PluginName::Fetch,
        }
    }

    fn resolve(&self, args: &ResolveArgs) -> Option<ResolveOutcome> {
        match self {
            Self::ImportMap(plugin) => plugin.resolve(args),
            Self::Fetch(plugin) => plugin.resolve(args),
        }
    }
}

/// Load handlers, tried in order.
#[derive(Debug, Clone)]
pub enum LoadHandler {
    Fetch(FetchPlugin),
}

impl LoadHandler {
    #[must_use]
    pub fn name(&self) -> PluginName {
        match self {
            Self::Fetch(_) => PluginName::Fetch,
        }
    }

    async fn load(&self, args: &LoadArgs) -> HookResult<Option<LoadResult>> {
        match self {
            Self::Fetch(plugin) => plugin.load(args).await,
        }
    }
}

/// Ordered resolve and load handlers.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    resolvers: Vec<ResolveHandler>,
    loaders: Vec<LoadHandler>,
}

impl Pipeline {
    /// An empty pipeline: everything falls through to the engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard pipeline: the import map (when configured), then fetch.
    #[must_use]
    pub fn from_config(config: &Config, cache: ContentCache) -> Self {
        let mut pipeline = Self::new();

        if let (Some(map), Some(dir)) = (&config.import_map, &config.import_map_dir) {
            if !map.is_empty() {
                pipeline =
                    pipeline.with_resolver(ResolveHandler::ImportMap(ImportMapPlugin::new(
                        map.clone(),
                        dir.clone(),
                    )));
            }
        }

        let fetch = FetchPlugin::new(cache).with_cdn(config.cdn.clone());
        pipeline
            .with_resolver(ResolveHandler::Fetch(fetch.clone()))
            .with_loader(LoadHandler::Fetch(fetch))
    }

    /// Append a resolve handler.
    #[must_use]
    pub fn with_resolver(mut self, handler: ResolveHandler) -> Self {
        self.resolvers.push(handler);
        self
    }

    /// Append a load handler.
    #[must_use]
    pub fn with_loader(mut self, handler: LoadHandler) -> Self {
        self.loaders.push(handler);
        self
    }

    /// Names of the resolve handlers, in order.
    #[must_use]
    pub fn resolver_names(&self) -> Vec<PluginName> {
        self.resolvers.iter().map(ResolveHandler::name).collect()
    }

    /// Ask each resolve handler in turn. `None` means the engine's default
    /// resolver should handle the specifier.
    #[must_use]
    pub fn resolve(&self, args: &ResolveArgs) -> Option<ResolveOutcome> {
        self.resolvers
            .iter()
            .filter(|handler| Some(handler.name()) != args.skip)
            .find_map(|handler| handler.resolve(args))
    }

    /// Ask each load handler in turn. `Ok(None)` means the engine's default
    /// loader should handle the module.
    pub async fn load(&self, args: &LoadArgs) -> HookResult<Option<LoadResult>> {
        for handler in &self.loaders {
            if let Some(result) = handler.load(args).await? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import_map::ImportMap;
    use tempfile::tempdir;

    #[test]
    fn test_loader_classify() {
        assert_eq!(Loader::classify("https://x/a.tsx", Some("text/plain")), Loader::Tsx);
        assert_eq!(Loader::classify("https://x/a.jsx", None), Loader::Jsx);
        assert_eq!(
            Loader::classify("https://x/mod", Some("application/typescript")),
            Loader::Ts
        );
        assert_eq!(Loader::classify("/a.ts", None), Loader::Ts);
        assert_eq!(
            Loader::classify("https://esm.sh/smallest", Some("application/javascript")),
            Loader::Js
        );
        assert_eq!(Loader::classify("/x.mjs", None), Loader::Js);
        assert_eq!(Loader::classify("https://x/s", Some("text/css")), Loader::Css);
        assert_eq!(Loader::classify("/logo.png", Some("image/png")), Loader::Raw);
    }

    #[test]
    fn test_plugin_error_display() {
        let err = PluginError::new(PluginName::Fetch, "load", "boom");
        assert_eq!(err.to_string(), "[fetch] load: boom");
    }

    #[test]
    fn test_from_config_orders_import_map_first() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path())
            .unwrap()
            .with_import_map(ImportMap::from_pairs([("a", "b")]), None);
        let cache = ContentCache::new(dir.path().join("cache")).unwrap();

        let pipeline = Pipeline::from_config(&config, cache);
        assert_eq!(
            pipeline.resolver_names(),
            vec![PluginName::ImportMap, PluginName::Fetch]
        );
    }

    #[test]
    fn test_from_config_without_import_map() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path()).unwrap();
        let cache = ContentCache::new(dir.path().join("cache")).unwrap();

        let pipeline = Pipeline::from_config(&config, cache);
        assert_eq!(pipeline.resolver_names(), vec![PluginName::Fetch]);
    }

    #[test]
    fn test_delegation_then_fetch() {
        let dir = tempdir().unwrap();
        let cache = ContentCache::new(dir.path().join("cache")).unwrap();
        let pipeline = Pipeline::new()
            .with_resolver(ResolveHandler::ImportMap(ImportMapPlugin::new(
                ImportMap::from_pairs([("preact", "npm:preact@10")]),
                dir.path().to_path_buf(),
            )))
            .with_resolver(ResolveHandler::Fetch(FetchPlugin::new(cache)));

        let args = ResolveArgs {
            path: "preact".to_string(),
            kind: ResolveKind::Import,
            importer: Some(dir.path().join("app.ts").display().to_string()),
            namespace: Namespace::File,
            resolve_dir: Some(dir.path().to_path_buf()),
            skip: None,
        };

        let Some(ResolveOutcome::Delegate {
            path,
            resolve_dir,
            from,
        }) = pipeline.resolve(&args)
        else {
            panic!("expected delegation");
        };
        assert_eq!(path, "npm:preact@10");
        assert_eq!(resolve_dir, dir.path());
        assert_eq!(from, PluginName::ImportMap);

        let again = ResolveArgs {
            path,
            resolve_dir: Some(resolve_dir),
            skip: Some(from),
            ..args
        };
        assert_eq!(
            pipeline.resolve(&again),
            Some(ResolveOutcome::Resolved(ResolvedModule {
                path: "https://esm.sh/preact@10".to_string(),
                namespace: Namespace::Fetch,
                external: false,
            }))
        );
    }

    #[test]
    fn test_empty_pipeline_declines() {
        let args = ResolveArgs::entry_point("./app.ts", PathBuf::from("/srv"));
        assert_eq!(Pipeline::new().resolve(&args), None);
    }

    #[tokio::test]
    async fn test_load_declines_file_namespace() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path()).unwrap();
        let cache = ContentCache::new(dir.path().join("cache")).unwrap();
        let pipeline = Pipeline::from_config(&config, cache);

        let loaded = pipeline
            .load(&LoadArgs {
                path: dir.path().join("app.ts").display().to_string(),
                namespace: Namespace::File,
            })
            .await
            .unwrap();
        assert!(loaded.is_none());
    }
}
