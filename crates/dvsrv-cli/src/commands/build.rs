//! `dvsrv build` command implementation.
//!
//! Compiles the given entry points in production mode and either prints
//! every output to stdout or writes it under `-o <dir>`.

use dvsrv_core::{CompileOptions, CompiledFile, Compiler, Config, Error, Mode};
use dvsrv_util::fs::atomic_write;
use flate2::write::GzEncoder;
use flate2::Compression;
use miette::{IntoDiagnostic, Result};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

/// Build command action.
#[derive(Debug, Clone)]
pub struct BuildAction {
    /// Project root.
    pub cwd: PathBuf,
    pub specifiers: Vec<String>,
    /// Output directory (if None, prints to stdout).
    pub out_dir: Option<PathBuf>,
    pub quiet: bool,
}

pub fn print_usage() {
    eprintln!("usage: dvsrv build ./input.ts ./input2.ts # will output the build result to stdout");
    eprintln!("usage: dvsrv build -o dist ./input.ts ./input2.ts # will write the build result to dist");
}

/// Run the build command.
pub fn run(action: BuildAction) -> Result<()> {
    let config = Config::new(&action.cwd)
        .into_diagnostic()?
        .with_mode(Mode::Prod);

    let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
    let bundle = rt
        .block_on(async {
            let compiler = Compiler::from_config(config)?;
            compiler
                .compile(&action.specifiers, CompileOptions::default())
                .await
                .map_err(Error::from)
        })
        .into_diagnostic()?;

    let files = bundle
        .entry_points
        .iter()
        .map(|entry| &entry.file)
        .chain(bundle.files.iter());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for file in files {
        output_file(file, &action, &mut out)?;
    }

    Ok(())
}

fn output_file(file: &CompiledFile, action: &BuildAction, out: &mut impl Write) -> Result<()> {
    if file.url_path.ends_with(".map") && action.out_dir.is_none() {
        return Ok(());
    }

    let rel_path = file.url_path.trim_start_matches('/');

    if !action.quiet {
        info!("{rel_path}");
        info!("file size: {}", format_size(file.contents.len() as u64));
        info!("gzip size: {}", format_size(gzip_size(&file.contents)?));
    }

    match &action.out_dir {
        Some(dir) => {
            let path = dir.join(rel_path);
            atomic_write(&path, &file.contents).into_diagnostic()?;
            if !action.quiet {
                info!("wrote file to: {}", path.display());
            }
        }
        None => {
            out.write_all(&file.contents).into_diagnostic()?;
            writeln!(out, "\n").into_diagnostic()?;
        }
    }

    Ok(())
}

fn gzip_size(contents: &[u8]) -> Result<u64> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(contents).into_diagnostic()?;
    let compressed = encoder.finish().into_diagnostic()?;
    Ok(compressed.len() as u64)
}

/// Human-readable size with up to two decimals, trailing zeros trimmed.
fn format_size(size: u64) -> String {
    let (value, postfix) = if size < KB {
        (size as f64, " bytes")
    } else if size < MB {
        (size as f64 / KB as f64, "kb")
    } else if size < GB {
        (size as f64 / MB as f64, "mb")
    } else {
        (size as f64 / GB as f64, "gb")
    };

    let fixed = format!("{value:.2}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed}{postfix}")
}
