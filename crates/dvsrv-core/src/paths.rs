use crate::version::SCHEMA_VERSION;
use dvsrv_util::fs::to_slash;
use percent_encoding::percent_decode_str;
use std::path::{Component, Path, PathBuf};

/// Environment variable to override the remote module cache directory.
pub const CACHE_DIR_ENV: &str = "DVSRV_CACHE_DIR";

/// Get the directory holding cached remote modules.
///
/// Respects `DVSRV_CACHE_DIR`. Otherwise uses platform-appropriate locations
/// with versioning:
/// - Linux: `$XDG_CACHE_HOME/dvsrv/v{N}/remote` or `~/.cache/dvsrv/v{N}/remote`
/// - macOS: `~/Library/Caches/dvsrv/v{N}/remote`
/// - Windows: `%LOCALAPPDATA%\dvsrv\v{N}\remote`
#[must_use]
pub fn cache_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CACHE_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }

    let base = dirs_next::cache_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".dvsrv-cache"),
                |p| p.join(".cache").join("dvsrv"),
            )
        },
        |p| p.join("dvsrv"),
    );

    base.join(format!("v{SCHEMA_VERSION}")).join("remote")
}

/// Map a local specifier onto the file it names under `root`.
///
/// `./a.ts`, `/a.ts` and `a.ts` all name `<root>/a.ts`. Absolute paths that
/// already live under `root` are kept as they are.
#[must_use]
pub fn specifier_to_disk(specifier: &str, root: &Path) -> PathBuf {
    let as_path = Path::new(specifier);
    if as_path.is_absolute() && as_path.starts_with(root) {
        return as_path.to_path_buf();
    }
    let trimmed = specifier.trim_start_matches("./").trim_start_matches('/');
    root.join(trimmed)
}

/// The `/`-prefixed URL path of a file relative to `root`.
///
/// Paths outside `root` keep their `..` segments.
#[must_use]
pub fn url_path(path: &Path, root: &Path) -> String {
    format!("/{}", to_slash(&relative_to(path, root)))
}

/// Compute `path` relative to `base`, both taken lexically.
#[must_use]
pub fn relative_to(path: &Path, base: &Path) -> PathBuf {
    if let Ok(rel) = path.strip_prefix(base) {
        return rel.to_path_buf();
    }

    let path_parts: Vec<Component<'_>> = path.components().collect();
    let base_parts: Vec<Component<'_>> = base.components().collect();
    let common = path_parts
        .iter()
        .zip(&base_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..base_parts.len() {
        rel.push("..");
    }
    for part in &path_parts[common..] {
        rel.push(part.as_os_str());
    }
    rel
}

/// Resolve `.` and `..` segments without touching the filesystem.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if out.file_name().is_some() {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Percent-decode a request path, so `/my%20file.png` names `my file.png`.
///
/// Paths that don't decode to UTF-8 are returned as sent.
#[must_use]
pub fn decode_request_path(path: &str) -> String {
    match percent_decode_str(path).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => path.to_string(),
    }
}

/// Find the on-disk file a decoded request path names, if it exists.
///
/// Directory paths (ending in `/`) never match; callers rewrite them to
/// `index.html` first. Paths that climb out of `root` never match.
#[must_use]
pub fn web_path_on_disk(request_path: &str, root: &Path) -> Option<PathBuf> {
    let pathname = request_path.trim_start_matches('/');
    if pathname.is_empty() || pathname.ends_with('/') {
        return None;
    }
    if Path::new(pathname)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return None;
    }

    let full = root.join(pathname);
    full.is_file().then_some(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn test_cache_dir_contains_version() {
        std::env::remove_var(CACHE_DIR_ENV);
        let dir = cache_dir();
        let dir_str = dir.to_string_lossy();
        assert!(dir_str.contains(&format!("v{SCHEMA_VERSION}")));
        assert!(dir.ends_with("remote"));
    }

    #[test]
    #[serial]
    fn test_cache_dir_env_override() {
        std::env::set_var(CACHE_DIR_ENV, "/tmp/dvsrv-test-cache");
        assert_eq!(cache_dir(), PathBuf::from("/tmp/dvsrv-test-cache"));
        std::env::remove_var(CACHE_DIR_ENV);
    }

    #[test]
    fn test_specifier_to_disk() {
        let root = Path::new("/srv/app");
        assert_eq!(specifier_to_disk("./app.ts", root), root.join("app.ts"));
        assert_eq!(specifier_to_disk("/src/app.ts", root), root.join("src/app.ts"));
        assert_eq!(specifier_to_disk("src/app.ts", root), root.join("src/app.ts"));
        assert_eq!(
            specifier_to_disk("/srv/app/src/app.ts", root),
            root.join("src/app.ts")
        );
    }

    #[test]
    fn test_url_path() {
        let root = Path::new("/srv/app");
        assert_eq!(url_path(&root.join("app.js"), root), "/app.js");
        assert_eq!(url_path(&root.join("a").join("b.css"), root), "/a/b.css");
    }

    #[test]
    fn test_relative_to_outside_base() {
        let rel = relative_to(Path::new("/srv/shared/x.js"), Path::new("/srv/app"));
        assert_eq!(rel, PathBuf::from("../shared/x.js"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize(Path::new("/srv/app/./src/../lib/x.ts")),
            PathBuf::from("/srv/app/lib/x.ts")
        );
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(normalize(Path::new("../../c")), PathBuf::from("../../c"));
    }

    #[test]
    fn test_web_path_on_disk() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.ts"), "export {}").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        assert_eq!(
            web_path_on_disk("/app.ts", dir.path()),
            Some(dir.path().join("app.ts"))
        );
        assert_eq!(web_path_on_disk("/missing.ts", dir.path()), None);
        assert_eq!(web_path_on_disk("/sub/", dir.path()), None);
        assert_eq!(web_path_on_disk("/sub", dir.path()), None);
        assert_eq!(web_path_on_disk("/../etc/passwd", dir.path()), None);
    }

    #[test]
    fn test_decode_request_path() {
        assert_eq!(decode_request_path("/my%20file.png"), "/my file.png");
        assert_eq!(decode_request_path("/%F0%9F%A6%95.ts"), "/\u{1f995}.ts");
        assert_eq!(decode_request_path("/plain/app.js"), "/plain/app.js");
        assert_eq!(decode_request_path("/bad%FF.js"), "/bad%FF.js");
    }

    #[test]
    fn test_decoded_path_finds_file_with_space() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("my file.png"), b"png").unwrap();

        let decoded = decode_request_path("/my%20file.png");
        assert_eq!(
            web_path_on_disk(&decoded, dir.path()),
            Some(dir.path().join("my file.png"))
        );
        assert_eq!(
            web_path_on_disk(&decode_request_path("/%2e%2e/etc/passwd"), dir.path()),
            None
        );
    }
}
