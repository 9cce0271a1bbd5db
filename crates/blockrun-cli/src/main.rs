//! blockrun CLI - run the code blocks of a Markdown document.

mod colors;
mod config;
mod document;
mod languages;
mod run;
mod terminal;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "blockrun")]
#[command(about = "Run the code blocks of a Markdown document")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every code block of a document, in order
    Run {
        /// Path to the Markdown document
        document: PathBuf,

        /// Settings file (defaults to the user settings file, if present)
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Run only blocks of this language
        #[arg(short, long)]
        language: Option<String>,
    },

    /// List languages and whether their executables are installed
    Languages {
        /// Settings file (defaults to the user settings file, if present)
        #[arg(short, long)]
        settings: Option<PathBuf>,
    },

    /// Write the default settings file
    Settings {
        /// Output path (defaults to the user settings file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            document,
            settings,
            language,
        } => {
            run::execute(&document, settings.as_deref(), language.as_deref()).await?;
        }

        Commands::Languages { settings } => {
            languages::execute(settings.as_deref())?;
        }

        Commands::Settings { output } => {
            config::write_defaults(output.as_deref())?;
        }
    }

    Ok(())
}
