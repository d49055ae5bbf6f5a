use super::{PluginName, ResolveArgs, ResolveOutcome};
use crate::import_map::ImportMap;
use std::path::PathBuf;
use tracing::trace;

/// Rewrites specifiers through the configured import map and delegates the
/// rewritten value back to the engine.
#[derive(Debug, Clone)]
pub struct ImportMapPlugin {
    map: ImportMap,
    dir: PathBuf,
}

impl ImportMapPlugin {
    /// `dir` is where delegated specifiers resolve from: the directory of the
    /// import map file, or the root for inline maps.
    #[must_use]
    pub fn new(map: ImportMap, dir: PathBuf) -> Self {
        Self { map, dir }
    }

    pub(crate) fn resolve(&self, args: &ResolveArgs) -> Option<ResolveOutcome> {
        if args.path.is_empty() {
            return None;
        }

        let path = self.map.resolve(&args.path)?;
        trace!(from = %args.path, to = %path, "import map rewrite");
        Some(ResolveOutcome::Delegate {
            path,
            resolve_dir: self.dir.clone(),
            from: PluginName::ImportMap,
        })
    }
}
