//! Logging initialization for the CLI.
//!
//! The library crates only emit `tracing` events; the binary decides where
//! they go. Everything is written to stderr so `dvsrv build` can print
//! bundles on stdout.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber.
///
/// `verbosity` 0 = INFO, 1 = DEBUG, 2+ = TRACE. With `json`, events are
/// written as JSON lines:
///
/// ```json
/// {"timestamp":"...","level":"INFO","fields":{"message":"request","status":200,"path":"/app.js"},"target":"dvsrv::commands::serve"}
/// ```
///
/// # Panics
/// Panics if the subscriber cannot be initialized (e.g., called twice).
pub fn init(verbosity: u8, json: bool) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // RUST_LOG wins for everything the verbosity flag doesn't cover
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"))
        .add_directive(format!("dvsrv={level}").parse().expect("valid directive"))
        .add_directive(format!("dvsrv_core={level}").parse().expect("valid directive"));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
