use std::path::Path;

/// Content type for a file, picked from its extension.
///
/// Returns `None` for extensions we don't know; callers decide whether to
/// send no `Content-Type` or fall back to `application/octet-stream`.
#[must_use]
pub fn mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "js" | "mjs" | "cjs" => "application/javascript; charset=UTF-8",
        "css" => "text/css; charset=UTF-8",
        "html" | "htm" => "text/html; charset=UTF-8",
        "json" | "map" => "application/json; charset=UTF-8",
        "txt" => "text/plain; charset=UTF-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "wasm" => "application/wasm",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_for() {
        assert_eq!(
            mime_for(Path::new("/srv/app.js")),
            Some("application/javascript; charset=UTF-8")
        );
        assert_eq!(mime_for(Path::new("chunk-0a1b2c3d.css")), Some("text/css; charset=UTF-8"));
        assert_eq!(mime_for(Path::new("logo.PNG")), Some("image/png"));
        assert_eq!(mime_for(Path::new("app.js.map")), Some("application/json; charset=UTF-8"));
        assert_eq!(mime_for(Path::new("LICENSE")), None);
        assert_eq!(mime_for(Path::new("data.xyz")), None);
    }
}
