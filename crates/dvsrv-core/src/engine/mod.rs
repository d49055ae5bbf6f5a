//! Bundling engine contract.
//!
//! The compiler drives an [`Engine`] with a set of entry points and the
//! resolve/load [`Pipeline`]. Engines report problems as [`Message`]s rather
//! than failing, so a single bad import never hides the others.

pub mod link;
pub mod scan;

use crate::plugin::Pipeline;
use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;

pub use link::LinkEngine;

/// Output module format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Esm,
    Cjs,
    Iife,
}

/// Source map emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sourcemap {
    #[default]
    None,
    /// Separate `.map` files referenced from each output.
    Linked,
}

/// Everything an engine needs to run one build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Outputs are named relative to this directory.
    pub abs_working_dir: PathBuf,
    /// Absolute file paths or remote URLs.
    pub entry_points: Vec<String>,
    /// Naming template for entry outputs, e.g. `[dir]/[name]`.
    pub entry_names: String,
    /// Naming template for shared chunks, e.g. `[dir]/[name]-[hash]`.
    pub chunk_names: String,
    /// Naming template for assets.
    pub asset_names: String,
    /// Identifier replacements, applied in insertion order.
    pub define: IndexMap<String, String>,
    pub target: Vec<String>,
    pub format: Format,
    pub sourcemap: Sourcemap,
    pub splitting: bool,
    pub minify: bool,
    pub jsx_import_source: String,
}

impl BuildOptions {
    /// Options with the default naming templates and nothing else set.
    #[must_use]
    pub fn new(abs_working_dir: PathBuf, entry_points: Vec<String>) -> Self {
        Self {
            abs_working_dir,
            entry_points,
            entry_names: "[dir]/[name]".to_string(),
            chunk_names: "[dir]/[name]-[hash]".to_string(),
            asset_names: "[dir]/[name]".to_string(),
            define: IndexMap::new(),
            target: vec!["esnext".to_string()],
            format: Format::Esm,
            sourcemap: Sourcemap::None,
            splitting: true,
            minify: false,
            jsx_import_source: "preact".to_string(),
        }
    }
}

/// A diagnostic produced by an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    /// Module the message is about, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Plugin that raised it, when it came from the pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
}

impl Message {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            location: None,
            plugin: None,
        }
    }

    #[must_use]
    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[must_use]
    pub fn from_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(plugin) = &self.plugin {
            write!(f, "[plugin {plugin}] ")?;
        }
        write!(f, "{}", self.text)?;
        if let Some(location) = &self.location {
            write!(f, " ({location})")?;
        }
        Ok(())
    }
}

/// One emitted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    /// Absolute path the file would be written to.
    pub path: PathBuf,
    pub contents: Bytes,
}

/// Manifest entry for one output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetafileOutput {
    /// The entry point this output was built for, relative to the working
    /// directory (or the URL for remote entries). `None` for shared chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
}

/// The engine's manifest of what it produced.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metafile {
    /// Keyed by output path relative to the working directory.
    pub outputs: BTreeMap<String, MetafileOutput>,
}

/// Everything an engine returns from a build.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub output_files: Vec<OutputFile>,
    pub errors: Vec<Message>,
    pub warnings: Vec<Message>,
    pub metafile: Option<Metafile>,
}

impl BuildOutput {
    /// A failed build: only the diagnostics.
    #[must_use]
    pub fn failed(errors: Vec<Message>, warnings: Vec<Message>) -> Self {
        Self {
            output_files: Vec::new(),
            errors,
            warnings,
            metafile: None,
        }
    }
}

/// A bundling engine.
pub trait Engine: Send + Sync {
    /// Run one build, calling back into `pipeline` for every resolve and load.
    fn build(
        &self,
        options: BuildOptions,
        pipeline: &Pipeline,
    ) -> impl Future<Output = BuildOutput> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_display() {
        let msg = Message::new("Could not resolve \"nope\"")
            .at("/srv/app/main.ts")
            .from_plugin("fetch");
        assert_eq!(
            msg.to_string(),
            "[plugin fetch] Could not resolve \"nope\" (/srv/app/main.ts)"
        );
    }

    #[test]
    fn test_metafile_serializes_like_a_manifest() {
        let mut outputs = BTreeMap::new();
        outputs.insert(
            "app.js".to_string(),
            MetafileOutput {
                entry_point: Some("app.ts".to_string()),
            },
        );
        outputs.insert("chunk-0a1b2c3d.js".to_string(), MetafileOutput::default());

        let json = serde_json::to_value(Metafile { outputs }).unwrap();
        assert_eq!(json["outputs"]["app.js"]["entryPoint"], "app.ts");
        assert!(json["outputs"]["chunk-0a1b2c3d.js"].get("entryPoint").is_none());
    }

    #[test]
    fn test_build_options_defaults() {
        let opts = BuildOptions::new(PathBuf::from("/srv"), vec!["/srv/a.ts".to_string()]);
        assert_eq!(opts.entry_names, "[dir]/[name]");
        assert_eq!(opts.chunk_names, "[dir]/[name]-[hash]");
        assert_eq!(opts.format, Format::Esm);
        assert!(opts.splitting);
    }
}
