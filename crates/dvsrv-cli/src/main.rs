#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dvsrv")]
#[command(author, version, about = "Build browser bundles and serve them with conditional GET", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Compile entry points in production mode
    #[command(disable_help_flag = true)]
    Build {
        /// Write the outputs under this directory instead of printing them
        #[arg(short = 'o', value_name = "DIR")]
        out_dir: Option<PathBuf>,

        /// Don't log file names and sizes
        #[arg(short = 'q', long)]
        quiet: bool,

        /// Print usage and exit
        #[arg(short = 'h', long)]
        help: bool,

        /// Entry points: local paths relative to the working directory, or URLs
        specifiers: Vec<String>,
    },

    /// Serve the project, compiling on request
    Serve {
        /// Project root (defaults to the working directory)
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,

        /// Port to listen on (defaults to $PORT, then 8080)
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    logging::init(cli.verbose, cli.json);

    match cli.command {
        Commands::Build {
            out_dir,
            quiet,
            help,
            specifiers,
        } => {
            if help {
                commands::build::print_usage();
                std::process::exit(1);
            }

            let span = tracing::info_span!("build", cmd = "build", cwd = %cwd.display());
            let _guard = span.enter();
            commands::build::run(commands::build::BuildAction {
                cwd,
                specifiers,
                out_dir,
                quiet,
            })
        }
        Commands::Serve { root, port } => {
            let action = commands::serve::ServeAction {
                root: root.unwrap_or(cwd),
                port,
            };
            let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
            rt.block_on(commands::serve::run(action))
        }
    }
}
