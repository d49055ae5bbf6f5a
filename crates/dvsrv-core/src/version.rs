use std::fmt::Write;

/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Schema version for the on-disk remote module cache.
/// Bump this when changing the artifact or sidecar format.
pub const SCHEMA_VERSION: u32 = 1;

/// User agent sent with every remote fetch.
pub const USER_AGENT: &str = concat!("dvsrv/", env!("CARGO_PKG_VERSION"));

/// Returns a formatted version string including build metadata if available.
#[must_use]
pub fn version_string() -> String {
    let mut s = format!("dvsrv {VERSION}");

    if let Some(hash) = option_env!("DVSRV_BUILD_GIT_HASH") {
        let _ = write!(s, " ({hash})");
    }

    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_contains_version() {
        let vs = version_string();
        assert!(vs.contains(VERSION));
        assert!(vs.starts_with("dvsrv "));
    }

    #[test]
    fn test_user_agent_names_crate() {
        assert!(USER_AGENT.starts_with("dvsrv/"));
    }

    #[test]
    fn test_schema_version_in_cache_layout() {
        assert_eq!(format!("v{SCHEMA_VERSION}"), "v1");
    }
}
