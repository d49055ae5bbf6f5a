//! `dvsrv serve` command implementation.
//!
//! Layers, outermost first:
//!
//! ```text
//! request log → response time → cross-origin policy → response cache → compiler
//! ```
//!
//! The compiler is the fallback handler: it compiles whatever file the path
//! names on disk, stores the whole bundle in the response cache and answers
//! with the matching entry point. Every later request for one of the
//! bundle's files, or a revalidation of it, is answered by the cache layer.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, USER_AGENT};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use chrono::Utc;
use dvsrv_core::paths::{decode_request_path, web_path_on_disk};
use dvsrv_core::response_cache::http_date;
use dvsrv_core::version::version_string;
use dvsrv_core::{CompileOptions, Compiler, Config, Lookup, ResponseCache, Validators};
use miette::{IntoDiagnostic, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{error, info, warn};

const X_RESPONSE_TIME: &str = "x-response-time";
const CROSS_ORIGIN_RESOURCE_POLICY: &str = "cross-origin-resource-policy";

/// Serve command action.
#[derive(Debug, Clone)]
pub struct ServeAction {
    pub root: PathBuf,
    /// Overrides `PORT`.
    pub port: Option<u16>,
}

/// State shared by every request.
struct AppState {
    compiler: Compiler,
    responses: ResponseCache,
}

type SharedState = Arc<AppState>;

/// Run the dev server until Ctrl+C or SIGTERM.
pub async fn run(action: ServeAction) -> Result<()> {
    let mut config = Config::new(&action.root).into_diagnostic()?;
    if let Some(port) = action.port {
        config = config.with_port(port);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = router(state(config)?);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    info!(version = %version_string(), "Listening http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;

    info!("server stopped");
    Ok(())
}

fn state(config: Config) -> Result<SharedState> {
    let compiler = Compiler::from_config(config).into_diagnostic()?;
    Ok(Arc::new(AppState {
        compiler,
        responses: ResponseCache::new(),
    }))
}

fn router(state: SharedState) -> Router {
    Router::new()
        .fallback(compile)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            response_cache,
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(CROSS_ORIGIN_RESOURCE_POLICY),
            HeaderValue::from_static("same-origin"),
        ))
        .layer(middleware::from_fn(response_time))
        .layer(middleware::from_fn(request_log))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Ctrl+C received, shutting down"),
        () = terminate => info!("SIGTERM received, shutting down"),
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// One structured event per request, leveled by status class.
async fn request_log(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let ua = header_string(request.headers(), USER_AGENT.as_str())
        .unwrap_or_else(|| "unknown UA".to_string());

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let response_time =
        header_string(response.headers(), X_RESPONSE_TIME).unwrap_or_else(|| "-1".to_string());

    if status >= 500 {
        error!(status, response_time = %response_time, %method, path = %path, ua = %ua, "request");
    } else if status >= 400 {
        warn!(status, response_time = %response_time, %method, path = %path, ua = %ua, "request");
    } else if status >= 200 {
        info!(status, response_time = %response_time, %method, path = %path, ua = %ua, "request");
    } else {
        warn!(status, response_time = %response_time, %method, path = %path, ua = %ua, "request");
    }

    response
}

async fn response_time(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let mut response = next.run(request).await;
    let ms = start.elapsed().as_millis();
    if let Ok(value) = HeaderValue::from_str(&format!("{ms}ms")) {
        response.headers_mut().insert(X_RESPONSE_TIME, value);
    }
    response
}

/// Answer from the response cache when possible: 304 for a matching
/// validator, 200 for stored bytes, otherwise on to the compiler.
async fn response_cache(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let validators = Validators {
        if_none_match: header_string(request.headers(), IF_NONE_MATCH.as_str()),
        if_modified_since: header_string(request.headers(), IF_MODIFIED_SINCE.as_str()),
    };

    let pathname = decode_request_path(request.uri().path());
    let lookup = state.responses.lookup(&pathname, &validators);
    let (status, body) = match &lookup {
        Lookup::Miss => return next.run(request).await,
        Lookup::NotModified { .. } => (StatusCode::NOT_MODIFIED, Body::empty()),
        Lookup::Hit { entry, .. } => (
            StatusCode::OK,
            entry.contents.clone().map_or_else(Body::empty, Body::from),
        ),
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    for (name, value) in lookup.headers() {
        if let Ok(value) = HeaderValue::from_str(&value) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

// ============================================================================
// Compiler fallback
// ============================================================================

async fn compile(State(state): State<SharedState>, uri: Uri) -> Response {
    let mut pathname = decode_request_path(uri.path());
    // a directory can't be an entry point
    if pathname.ends_with('/') {
        pathname.push_str("index.html");
    }

    let root = &state.compiler.config().root;
    let Some(on_disk) = web_path_on_disk(&pathname, root) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let specifier = on_disk.to_string_lossy().into_owned();
    let bundle = match state
        .compiler
        .compile(&[specifier], CompileOptions::default())
        .await
    {
        Ok(bundle) => bundle,
        Err(e) if e.is_not_found() => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(code = e.code(), path = %pathname, "{e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    state
        .responses
        .store_bundle(&bundle, &http_date(Utc::now()));

    let Some(entry) = bundle
        .entry_points
        .iter()
        .find(|e| e.file.url_path == pathname)
        .or_else(|| bundle.entry_points.first())
    else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut response = Response::new(Body::from(entry.file.contents.clone()));
    let headers = response.headers_mut();
    if let Some(mime) = entry.file.mime.as_deref().and_then(|m| HeaderValue::from_str(m).ok()) {
        headers.insert(CONTENT_TYPE, mime);
    }
    if let Some(etag) = entry.file.etag.as_deref().and_then(|e| HeaderValue::from_str(e).ok()) {
        headers.insert(ETAG, etag);
    }
    response
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
