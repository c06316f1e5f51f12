//! # Sheets CLI (`sheets`)
//!
//! ## Usage
//!
//! ```bash
//! sheets --config ./config/sheets.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sheets init` | Create the SQLite database and run schema migrations |
//! | `sheets serve` | Start the HTTP server |
//! | `sheets generate "<prompt>"` | Stream a report to stdout |
//! | `sheets analyze <owner/name> [--type]` | Stream a repository analysis |
//! | `sheets rules list` | List rules files |
//! | `sheets rules put <file>` | Store a local file as a rules file |
//! | `sheets rules cat <path>` | Print a rules file |
//! | `sheets rules rm <path>` | Delete a rules file |
//! | `sheets rules import <dir>` | Store every matching file under a directory |
//! | `sheets render <file>` | Render markdown to HTML |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sheets::analyze::AnalysisType;
use sheets::import::ImportOptions;
use sheets::{analyze, config, generate, migrate, render, rules, server};

/// Sheets: tag context, point at URLs, stream a developer report.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sheets.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sheets",
    about = "Sheets: prompt-to-report relay with tagged context and GitHub-aware fetching",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sheets.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Run the full prompt pipeline and stream the report to stdout.
    ///
    /// `#path` tags load rules files; URLs are fetched.
    Generate {
        prompt: String,

        /// Analysis focus: vision, design, audit, create, or brand.
        #[arg(long)]
        mode: Option<String>,
    },

    /// Analyze a GitHub repository and stream the sheet to stdout.
    Analyze {
        /// `owner/name` or a GitHub URL.
        repo: String,

        /// overview, security, patterns, improvements, learning, or comparison.
        #[arg(long = "type", default_value = "overview")]
        analysis_type: String,
    },

    /// Manage rules files (shared context).
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },

    /// Render a markdown file to HTML on stdout.
    Render {
        file: PathBuf,

        /// Emit a complete HTML page instead of a fragment.
        #[arg(long)]
        page: bool,
    },
}

#[derive(Subcommand)]
enum RulesAction {
    List,

    /// Store a local file. The stored path defaults to the file name.
    Put {
        file: PathBuf,

        #[arg(long)]
        path: Option<String>,
    },

    Cat { path: String },

    Rm { path: String },

    /// Store every matching file under a directory, keyed by relative path.
    Import {
        dir: PathBuf,

        /// Glob of files to include (repeatable). Defaults to everything.
        #[arg(long = "include")]
        include: Vec<String>,

        /// Glob of files to skip (repeatable).
        #[arg(long = "exclude")]
        exclude: Vec<String>,

        /// Prefix added to every stored path, e.g. `team/`.
        #[arg(long, default_value = "")]
        prefix: String,

        #[arg(long)]
        follow_symlinks: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Rendering is a local transform; no config needed.
    if let Commands::Render { file, page } = &cli.command {
        let markdown = std::fs::read_to_string(file)?;
        let html = if *page {
            let title = file
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            render::render_sheet_page(&render::SheetPage {
                title,
                created_at: chrono::Utc::now().to_rfc3339(),
                body_html: render::render_markdown(&markdown),
            })
        } else {
            render::render_markdown(&markdown)
        };
        print!("{}", html);
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Generate { prompt, mode } => {
            generate::run_generate(&cfg, &prompt, mode).await?;
        }
        Commands::Analyze {
            repo,
            analysis_type,
        } => {
            analyze::run_analyze(&cfg, &repo, AnalysisType::parse(&analysis_type)).await?;
        }
        Commands::Rules { action } => match action {
            RulesAction::List => rules::run_list(&cfg).await?,
            RulesAction::Put { file, path } => rules::run_put(&cfg, &file, path).await?,
            RulesAction::Cat { path } => rules::run_cat(&cfg, &path).await?,
            RulesAction::Rm { path } => rules::run_rm(&cfg, &path).await?,
            RulesAction::Import {
                dir,
                include,
                exclude,
                prefix,
                follow_symlinks,
            } => {
                let mut options = ImportOptions {
                    exclude_globs: exclude,
                    prefix,
                    follow_symlinks,
                    ..ImportOptions::default()
                };
                if !include.is_empty() {
                    options.include_globs = include;
                }
                rules::run_import(&cfg, &dir, &options).await?;
            }
        },
        Commands::Render { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
