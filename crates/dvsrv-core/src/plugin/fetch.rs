use super::{
    HookResult, LoadArgs, LoadResult, Loader, Namespace, PluginError, PluginName, ResolveArgs,
    ResolveKind, ResolveOutcome, ResolvedModule,
};
use crate::cache::ContentCache;
use crate::specifier::{default_cdn, expand_alias, is_remote};
use tracing::error;
use url::Url;

/// Resolves remote URLs and `npm:`/`jsr:` aliases into the fetch namespace
/// and loads them through the content cache.
#[derive(Debug, Clone)]
pub struct FetchPlugin {
    cache: ContentCache,
    cdn: Url,
}

impl FetchPlugin {
    #[must_use]
    pub fn new(cache: ContentCache) -> Self {
        Self {
            cache,
            cdn: default_cdn(),
        }
    }

    /// Set the CDN that aliases expand onto.
    #[must_use]
    pub fn with_cdn(mut self, cdn: Url) -> Self {
        self.cdn = cdn;
        self
    }

    pub(crate) fn resolve(&self, args: &ResolveArgs) -> Option<ResolveOutcome> {
        let path =
            expand_alias(&args.path, &self.cdn).map_or_else(|| args.path.clone(), String::from);

        if !is_remote(&path) && args.namespace != Namespace::Fetch {
            return None;
        }

        // Entry points are full URLs already, and a file importing a URL
        // means that URL as written. Inside the fetch namespace every
        // specifier is relative to the importing module's URL.
        let path = if args.kind == ResolveKind::EntryPoint || args.namespace == Namespace::File {
            path
        } else {
            let importer = Url::parse(args.importer.as_deref()?).ok()?;
            importer.join(&path).ok()?.to_string()
        };

        Some(ResolveOutcome::Resolved(ResolvedModule {
            path,
            namespace: Namespace::Fetch,
            external: false,
        }))
    }

    pub(crate) async fn load(&self, args: &LoadArgs) -> HookResult<Option<LoadResult>> {
        if args.namespace != Namespace::Fetch {
            return Ok(None);
        }

        let url = match Url::parse(&args.path) {
            Ok(url) => url,
            Err(e) => {
                error!(path = %args.path, error = %e, "cannot make path into a url");
                return Ok(None);
            }
        };

        let artifact = self.cache.fetch(&url).await.map_err(|e| {
            PluginError::new(PluginName::Fetch, "load", format!("{e} [{}]", e.code()))
        })?;

        let loader = Loader::classify(url.path(), artifact.content_type.as_deref());
        Ok(Some(LoadResult {
            contents: artifact.contents,
            loader,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::header, routing::get, Router};
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn plugin() -> (tempfile::TempDir, FetchPlugin) {
        let dir = tempdir().unwrap();
        let cache = ContentCache::new(dir.path()).unwrap();
        (dir, FetchPlugin::new(cache))
    }

    fn args(path: &str, kind: ResolveKind, namespace: Namespace, importer: Option<&str>) -> ResolveArgs {
        ResolveArgs {
            path: path.to_string(),
            kind,
            importer: importer.map(str::to_string),
            namespace,
            resolve_dir: Some(PathBuf::from("/srv/app")),
            skip: None,
        }
    }

    fn resolved(path: &str) -> Option<ResolveOutcome> {
        Some(ResolveOutcome::Resolved(ResolvedModule {
            path: path.to_string(),
            namespace: Namespace::Fetch,
            external: false,
        }))
    }

    #[test]
    fn test_npm_alias_expands_to_cdn() {
        let (_dir, plugin) = plugin();
        let a = args("npm:smallest", ResolveKind::Import, Namespace::File, Some("/srv/app/a.ts"));
        assert_eq!(plugin.resolve(&a), resolved("https://esm.sh/smallest"));
    }

    #[test]
    fn test_jsr_alias_expands_to_cdn() {
        let (_dir, plugin) = plugin();
        let a = args("jsr:@std/path", ResolveKind::Import, Namespace::File, None);
        assert_eq!(plugin.resolve(&a), resolved("https://esm.sh/jsr/@std/path"));
    }

    #[test]
    fn test_remote_entry_point_is_kept() {
        let (_dir, plugin) = plugin();
        let a = args("https://esm.sh/preact", ResolveKind::EntryPoint, Namespace::File, None);
        assert_eq!(plugin.resolve(&a), resolved("https://esm.sh/preact"));
    }

    #[test]
    fn test_fetch_namespace_joins_importer() {
        let (_dir, plugin) = plugin();
        let a = args(
            "/v135/preact@10.19.0/es2022/preact.mjs",
            ResolveKind::Import,
            Namespace::Fetch,
            Some("https://esm.sh/preact@10.19.0"),
        );
        assert_eq!(
            plugin.resolve(&a),
            resolved("https://esm.sh/v135/preact@10.19.0/es2022/preact.mjs")
        );

        let a = args(
            "./hooks.js",
            ResolveKind::Import,
            Namespace::Fetch,
            Some("https://cdn.example/pkg/index.js"),
        );
        assert_eq!(plugin.resolve(&a), resolved("https://cdn.example/pkg/hooks.js"));
    }

    #[test]
    fn test_local_specifier_declines() {
        let (_dir, plugin) = plugin();
        let a = args("./util.ts", ResolveKind::Import, Namespace::File, Some("/srv/app/a.ts"));
        assert_eq!(plugin.resolve(&a), None);
    }

    #[tokio::test]
    async fn test_load_unparseable_url_declines() {
        let (_dir, plugin) = plugin();
        let loaded = plugin
            .load(&LoadArgs {
                path: "not a url".to_string(),
                namespace: Namespace::Fetch,
            })
            .await
            .unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_load_through_cache_picks_loader() {
        let app = Router::new()
            .route(
                "/mod",
                get(|| async { ([(header::CONTENT_TYPE, "application/typescript")], "export const a: number = 1;") }),
            )
            .route(
                "/widget.tsx",
                get(|| async { ([(header::CONTENT_TYPE, "text/plain")], "export default <div/>;") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let (_dir, plugin) = plugin();
        let ts = plugin
            .load(&LoadArgs {
                path: format!("http://{addr}/mod"),
                namespace: Namespace::Fetch,
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ts.loader, Loader::Ts);

        let tsx = plugin
            .load(&LoadArgs {
                path: format!("http://{addr}/widget.tsx"),
                namespace: Namespace::Fetch,
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tsx.loader, Loader::Tsx);
    }

    #[tokio::test]
    async fn test_load_failure_becomes_plugin_error() {
        let app = Router::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let (_dir, plugin) = plugin();
        let err = plugin
            .load(&LoadArgs {
                path: format!("http://{addr}/gone.js"),
                namespace: Namespace::Fetch,
            })
            .await
            .unwrap_err();
        assert_eq!(err.plugin, "fetch");
        assert_eq!(err.hook, "load");
        assert!(err.message.contains("CACHE_FETCH_FAILED"));
    }
}
