//! Module-preserving link engine.
//!
//! Walks the module graph breadth-first through the resolve/load pipeline
//! and emits every module as its own output file, with import specifiers
//! rewritten to point at the other outputs. Entry points are named with
//! `entry_names`; everything else is a content-hashed chunk named with
//! `chunk_names`.
//!
//! No transform runs: TypeScript and JSX sources are emitted as written.

use super::scan::{code_ranges, line_of, scan_css, scan_script};
use super::{
    BuildOptions, BuildOutput, Engine, Format, Message, Metafile, MetafileOutput, OutputFile,
    Sourcemap,
};
use crate::paths::{normalize, relative_to};
use crate::plugin::{
    LoadArgs, Loader, Namespace, Pipeline, ResolveArgs, ResolveOutcome, ResolvedModule,
};
use bytes::Bytes;
use dvsrv_util::fs::to_slash;
use dvsrv_util::hash::blake3_bytes;
use futures::future::join_all;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use url::Url;

/// The built-in engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkEngine;

impl Engine for LinkEngine {
    async fn build(&self, options: BuildOptions, pipeline: &Pipeline) -> BuildOutput {
        Linker::new(&options, pipeline).link().await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ModuleKey {
    namespace: Namespace,
    path: String,
}

impl ModuleKey {
    fn from_resolved(module: ResolvedModule) -> Self {
        Self {
            namespace: module.namespace,
            path: module.path,
        }
    }
}

struct Edge {
    start: usize,
    end: usize,
    target: ModuleKey,
}

struct Module {
    source: Bytes,
    loader: Loader,
    edges: Vec<Edge>,
}

struct Linker<'a> {
    options: &'a BuildOptions,
    pipeline: &'a Pipeline,
    /// Discovery order, entries first.
    modules: IndexMap<ModuleKey, Module>,
    /// Entry module -> manifest name of the entry point.
    entries: IndexMap<ModuleKey, String>,
    errors: Vec<Message>,
    warnings: Vec<Message>,
}

impl<'a> Linker<'a> {
    fn new(options: &'a BuildOptions, pipeline: &'a Pipeline) -> Self {
        Self {
            options,
            pipeline,
            modules: IndexMap::new(),
            entries: IndexMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    async fn link(mut self) -> BuildOutput {
        if self.options.format != Format::Esm {
            self.errors.push(Message::new(format!(
                "The link engine only emits esm output (requested {:?})",
                self.options.format
            )));
            return BuildOutput::failed(self.errors, self.warnings);
        }
        if self.options.sourcemap == Sourcemap::Linked {
            self.warnings.push(Message::new(
                "Source maps were requested but the link engine does not produce them",
            ));
        }

        self.resolve_entries();
        self.walk_graph().await;

        if !self.errors.is_empty() {
            return BuildOutput::failed(self.errors, self.warnings);
        }

        let names = match self.assign_names() {
            Ok(names) => names,
            Err(errors) => return BuildOutput::failed(errors, self.warnings),
        };

        let mut output_files = Vec::with_capacity(self.modules.len());
        let mut metafile = Metafile::default();

        for (key, module) in &self.modules {
            let out_rel = &names[key];
            output_files.push(OutputFile {
                path: self.options.abs_working_dir.join(out_rel),
                contents: self.render(module, out_rel, &names),
            });
            metafile.outputs.insert(
                out_rel.clone(),
                MetafileOutput {
                    entry_point: self.entries.get(key).cloned(),
                },
            );
        }

        debug!(
            entries = self.entries.len(),
            outputs = output_files.len(),
            "link complete"
        );

        BuildOutput {
            output_files,
            errors: Vec::new(),
            warnings: self.warnings,
            metafile: Some(metafile),
        }
    }

    fn resolve_entries(&mut self) {
        let options = self.options;
        for entry in &options.entry_points {
            let args = ResolveArgs::entry_point(entry.clone(), options.abs_working_dir.clone());
            match self.resolve(args) {
                Ok(module) if module.external => {
                    self.errors
                        .push(Message::new("An entry point cannot be external").at(entry.clone()));
                }
                Ok(module) => {
                    let key = ModuleKey::from_resolved(module);
                    let name = self.entry_name(&key);
                    self.entries.entry(key).or_insert(name);
                }
                Err(msg) => self.errors.push(msg.at(entry.clone())),
            }
        }
    }

    /// Name of an entry point in the manifest: its path relative to the
    /// working directory, or its URL.
    fn entry_name(&self, key: &ModuleKey) -> String {
        match key.namespace {
            Namespace::File => to_slash(&relative_to(
                Path::new(&key.path),
                &self.options.abs_working_dir,
            )),
            Namespace::Fetch => key.path.clone(),
        }
    }

    /// Resolve through the pipeline, following at most one delegation, then
    /// fall back to the default file resolver.
    fn resolve(&self, mut args: ResolveArgs) -> Result<ResolvedModule, Message> {
        for _ in 0..2 {
            match self.pipeline.resolve(&args) {
                Some(ResolveOutcome::Resolved(module)) => return Ok(module),
                Some(ResolveOutcome::Delegate {
                    path,
                    resolve_dir,
                    from,
                }) => {
                    trace!(from = %args.path, to = %path, plugin = from.as_str(), "delegated");
                    args.path = path;
                    args.resolve_dir = Some(resolve_dir);
                    args.skip = Some(from);
                }
                None => return default_resolve(&args),
            }
        }
        Err(Message::new(format!(
            "Could not resolve \"{}\": delegation did not settle",
            args.path
        )))
    }

    async fn walk_graph(&mut self) {
        let mut seen: HashSet<ModuleKey> = self.entries.keys().cloned().collect();
        let mut frontier: Vec<ModuleKey> = self.entries.keys().cloned().collect();

        while !frontier.is_empty() {
            trace!(modules = frontier.len(), "loading frontier");
            let loaded = join_all(frontier.iter().map(|key| self.load(key))).await;

            let mut next = Vec::new();
            for (key, result) in frontier.into_iter().zip(loaded) {
                match result {
                    Ok((source, loader)) => {
                        let edges = self.link_imports(&key, &source, loader, &mut seen, &mut next);
                        self.modules.insert(
                            key,
                            Module {
                                source,
                                loader,
                                edges,
                            },
                        );
                    }
                    Err(msg) => self.errors.push(msg),
                }
            }
            frontier = next;
        }
    }

    async fn load(&self, key: &ModuleKey) -> Result<(Bytes, Loader), Message> {
        let args = LoadArgs {
            path: key.path.clone(),
            namespace: key.namespace,
        };

        match self.pipeline.load(&args).await {
            Ok(Some(result)) => Ok((result.contents, result.loader)),
            Err(e) => Err(Message::new(e.message)
                .at(key.path.clone())
                .from_plugin(e.plugin)),
            Ok(None) => match key.namespace {
                Namespace::File => tokio::fs::read(&key.path)
                    .await
                    .map(|bytes| (Bytes::from(bytes), Loader::classify(&key.path, None)))
                    .map_err(|e| {
                        Message::new(format!("Could not read file: {e}")).at(key.path.clone())
                    }),
                Namespace::Fetch => {
                    Err(Message::new("No loader handled this module").at(key.path.clone()))
                }
            },
        }
    }

    fn link_imports(
        &mut self,
        key: &ModuleKey,
        source: &[u8],
        loader: Loader,
        seen: &mut HashSet<ModuleKey>,
        next: &mut Vec<ModuleKey>,
    ) -> Vec<Edge> {
        let Ok(text) = std::str::from_utf8(source) else {
            return Vec::new();
        };
        let sites = if loader.is_script() {
            scan_script(text)
        } else if loader == Loader::Css {
            scan_css(text)
        } else {
            return Vec::new();
        };

        let resolve_dir = match key.namespace {
            Namespace::File => Path::new(&key.path).parent().map(Path::to_path_buf),
            Namespace::Fetch => None,
        };

        let mut edges = Vec::with_capacity(sites.len());
        for site in sites {
            let args = ResolveArgs {
                path: site.specifier.clone(),
                kind: site.kind,
                importer: Some(key.path.clone()),
                namespace: key.namespace,
                resolve_dir: resolve_dir.clone(),
                skip: None,
            };
            match self.resolve(args) {
                Ok(module) if module.external => {}
                Ok(module) => {
                    let target = ModuleKey::from_resolved(module);
                    if seen.insert(target.clone()) {
                        next.push(target.clone());
                    }
                    edges.push(Edge {
                        start: site.start,
                        end: site.end,
                        target,
                    });
                }
                Err(msg) => {
                    let location = format!("{}:{}", key.path, line_of(text, site.start));
                    self.errors.push(msg.at(location));
                }
            }
        }
        edges
    }

    fn assign_names(&self) -> Result<HashMap<ModuleKey, String>, Vec<Message>> {
        let mut names = HashMap::with_capacity(self.modules.len());
        let mut taken: HashMap<String, &ModuleKey> = HashMap::new();
        let mut errors = Vec::new();

        for (key, module) in &self.modules {
            let name = if self.entries.contains_key(key) {
                let dir = match key.namespace {
                    Namespace::File => Path::new(&key.path).parent().map_or_else(String::new, |p| {
                        to_slash(&relative_to(p, &self.options.abs_working_dir))
                    }),
                    Namespace::Fetch => String::new(),
                };
                output_name(
                    &self.options.entry_names,
                    &dir,
                    &stem(key),
                    "",
                    &output_extension(key, module.loader),
                )
            } else {
                let mut hashed = key.path.as_bytes().to_vec();
                hashed.extend_from_slice(&module.source);
                let hash = blake3_bytes(&hashed);
                output_name(
                    &self.options.chunk_names,
                    "",
                    "chunk",
                    &hash[..8],
                    &output_extension(key, module.loader),
                )
            };

            if let Some(other) = taken.insert(name.clone(), key) {
                errors.push(Message::new(format!(
                    "Two modules would be written to \"{name}\": {} and {}",
                    other.path, key.path
                )));
            }
            names.insert(key.clone(), name);
        }

        if errors.is_empty() {
            Ok(names)
        } else {
            Err(errors)
        }
    }

    fn render(&self, module: &Module, out_rel: &str, names: &HashMap<ModuleKey, String>) -> Bytes {
        if module.edges.is_empty() && !module.loader.is_script() {
            return module.source.clone();
        }

        // Non-UTF-8 sources were never scanned, so they have no edges either.
        let Ok(text) = std::str::from_utf8(&module.source) else {
            return module.source.clone();
        };
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for edge in &module.edges {
            out.push_str(&text[last..edge.start]);
            out.push_str(&import_path(out_rel, &names[&edge.target]));
            last = edge.end;
        }
        out.push_str(&text[last..]);

        if module.loader.is_script() {
            for (name, value) in &self.options.define {
                out = replace_identifier(&out, name, value);
            }
        }
        Bytes::from(out)
    }
}

/// Resolve relative and absolute file paths from the resolve directory.
fn default_resolve(args: &ResolveArgs) -> Result<ResolvedModule, Message> {
    let not_found = || Message::new(format!("Could not resolve \"{}\"", args.path));

    if args.namespace == Namespace::Fetch {
        return Err(not_found());
    }

    let path = Path::new(&args.path);
    let resolved: PathBuf = if path.is_absolute() {
        path.to_path_buf()
    } else if args.path.starts_with("./") || args.path.starts_with("../") {
        args.resolve_dir.as_ref().ok_or_else(not_found)?.join(path)
    } else {
        return Err(Message::new(format!(
            "Could not resolve \"{}\" (bare specifiers need an import map entry or an npm: alias)",
            args.path
        )));
    };

    Ok(ResolvedModule {
        path: normalize(&resolved).to_string_lossy().into_owned(),
        namespace: Namespace::File,
        external: false,
    })
}

/// File name without extension, for `[name]`.
fn stem(key: &ModuleKey) -> String {
    let path = match key.namespace {
        Namespace::File => key.path.clone(),
        Namespace::Fetch => Url::parse(&key.path)
            .map(|u| u.path().to_string())
            .unwrap_or_default(),
    };
    Path::new(&path)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("index")
        .to_string()
}

fn output_extension(key: &ModuleKey, loader: Loader) -> String {
    match loader {
        Loader::Tsx | Loader::Jsx | Loader::Ts | Loader::Js => "js".to_string(),
        Loader::Css => "css".to_string(),
        Loader::Raw => {
            let path = match key.namespace {
                Namespace::File => key.path.clone(),
                Namespace::Fetch => Url::parse(&key.path)
                    .map(|u| u.path().to_string())
                    .unwrap_or_default(),
            };
            Path::new(&path)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_string()
        }
    }
}

/// Fill a naming template and append the extension. Empty segments left by
/// an empty `[dir]` are dropped.
fn output_name(template: &str, dir: &str, name: &str, hash: &str, ext: &str) -> String {
    let filled = template
        .replace("[dir]", dir)
        .replace("[name]", name)
        .replace("[hash]", hash);
    let path = filled
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/");
    if ext.is_empty() {
        path
    } else {
        format!("{path}.{ext}")
    }
}

/// Relative import path from one output to another.
fn import_path(from: &str, to: &str) -> String {
    let from_dir = Path::new(from).parent().unwrap_or(Path::new(""));
    let rel = to_slash(&relative_to(Path::new(to), from_dir));
    if rel.starts_with("../") {
        rel
    } else {
        format!("./{rel}")
    }
}

fn is_ident(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$'
}

/// Replace whole-identifier occurrences of `name` (which may be dotted, like
/// `self.DEV`) with `value`.
fn replace_identifier(code: &str, name: &str, value: &str) -> String {
    let bytes = code.as_bytes();
    let ranges = code_ranges(code);
    let mut out = String::with_capacity(code.len());
    let mut last = 0;

    for (idx, _) in code.match_indices(name) {
        if !ranges.iter().any(|r| r.contains(&idx)) {
            continue;
        }
        let before_ok = idx == 0 || !(is_ident(bytes[idx - 1]) || bytes[idx - 1] == b'.');
        let after = idx + name.len();
        let after_ok = after >= bytes.len() || !is_ident(bytes[after]);
        if before_ok && after_ok {
            out.push_str(&code[last..idx]);
            out.push_str(value);
            last = after;
        }
    }
    out.push_str(&code[last..]);
    out
}
