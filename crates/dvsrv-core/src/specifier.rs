//! Specifier classification.
//!
//! Pure predicates over the strings importers use to name their
//! dependencies. None of them touch the filesystem or the network.

use regex_lite::Regex;
use std::sync::OnceLock;
use url::Url;

/// CDN that `npm:` and `jsr:` aliases expand onto unless configured otherwise.
pub const DEFAULT_CDN: &str = "https://esm.sh/";

/// Extensions the bundling engine can compile.
pub const COMPILABLE_EXTENSIONS: [&str; 5] = [".ts", ".tsx", ".js", ".jsx", ".css"];

const NPM_PREFIX: &str = "npm:";
const JSR_PREFIX: &str = "jsr:";

fn chunk_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"chunk-\w+\.\w+$").expect("chunk pattern compiles"))
}

/// True iff the specifier is an absolute `http://` or `https://` URL.
#[must_use]
pub fn is_remote(specifier: &str) -> bool {
    specifier.starts_with("http://") || specifier.starts_with("https://")
}

/// True iff the specifier is an `npm:` alias.
#[must_use]
pub fn is_npm(specifier: &str) -> bool {
    specifier.starts_with(NPM_PREFIX)
}

/// True iff the specifier is a `jsr:` alias.
#[must_use]
pub fn is_jsr(specifier: &str) -> bool {
    specifier.starts_with(JSR_PREFIX)
}

/// True iff the path names something the engine compiles.
///
/// For remote URLs only the path component is considered, so query strings
/// and fragments do not hide the extension.
#[must_use]
pub fn can_compile(path: &str) -> bool {
    let parsed = if is_remote(path) {
        Url::parse(path).ok()
    } else {
        None
    };
    let path = parsed.as_ref().map_or(path, Url::path);
    COMPILABLE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// True iff the URL path may be cached by clients forever.
///
/// Hashed chunk files never change under the same name, and anything the
/// engine does not compile is served as-is.
#[must_use]
pub fn is_immutable(path: &str) -> bool {
    chunk_pattern().is_match(path) || !can_compile(path)
}

/// Expand an `npm:` or `jsr:` alias onto the CDN.
///
/// `npm:<pkg>` becomes `<cdn>/<pkg>` and `jsr:<pkg>` becomes `<cdn>/jsr/<pkg>`.
/// Returns `None` for anything that is not an alias.
#[must_use]
pub fn expand_alias(specifier: &str, cdn: &Url) -> Option<Url> {
    if let Some(name) = specifier.strip_prefix(NPM_PREFIX) {
        return cdn.join(&format!("/{name}")).ok();
    }
    if let Some(name) = specifier.strip_prefix(JSR_PREFIX) {
        return cdn.join(&format!("/jsr/{name}")).ok();
    }
    None
}

/// The default CDN as a parsed URL.
#[must_use]
pub fn default_cdn() -> Url {
    Url::parse(DEFAULT_CDN).expect("default CDN is a valid URL")
}
