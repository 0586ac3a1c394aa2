//! # Inkling CLI (`ink`)
//!
//! ## Usage
//!
//! ```bash
//! ink --config ./config/ink.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ink init` | Create the SQLite database and run schema migrations |
//! | `ink serve` | Start the HTTP server |
//! | `ink fragment add "<text>"` | Store a fragment (local database) |
//! | `ink fragment list` | List stored fragments (local database) |
//! | `ink analyze <ids...>` | Stream an analysis from the server |
//! | `ink history list` | List saved analyses |
//! | `ink history delete <id>` | Delete a saved analysis |
//! | `ink health` | Check that the server is up |
//!
//! ## Examples
//!
//! ```bash
//! ink init
//! ink fragment add "The lighthouse keeper never learned to swim."
//! ink serve &
//! ink analyze 6f1c... 9a2e... --relation
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use inkling::{analyze, client, config, fragments, history, logging, migrate, server};

/// Inkling: capture ideas as fragments and let AI find the story in them.
#[derive(Parser)]
#[command(
    name = "ink",
    about = "Inkling: capture ideas as fragments and let AI find the story in them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ink.toml")]
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

    /// Manage fragments in the local database.
    Fragment {
        #[command(subcommand)]
        action: FragmentAction,
    },

    /// Analyze fragments through a running server.
    ///
    /// Text is printed as it streams in; the structured result follows
    /// once the stream ends, and the run is saved to history.
    Analyze {
        /// Fragment ids, in the order they should be presented.
        #[arg(required = true)]
        ids: Vec<String>,

        /// Run relation analysis (relations, groups, timeline, themes).
        #[arg(long)]
        relation: bool,

        /// Fragment to continue from (simple analysis only).
        #[arg(long, conflicts_with = "relation")]
        target: Option<String>,
    },

    /// Browse saved analyses.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Check that the configured server is reachable.
    Health,
}

#[derive(Subcommand)]
enum FragmentAction {
    /// Store a new fragment.
    Add {
        content: String,

        /// Story to file the fragment under.
        #[arg(long)]
        story: Option<String>,
    },
    /// List fragments in sort order.
    List,
    /// Find fragments by content or story title.
    Search {
        query: String,

        /// Only search within this story.
        #[arg(long)]
        story: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List saved analyses, newest first.
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show one saved analysis.
    Show { id: String },
    /// Delete a saved analysis.
    Delete { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Fragment { action } => match action {
            FragmentAction::Add { content, story } => {
                fragments::run_add(&cfg, &content, story.as_deref()).await?;
            }
            FragmentAction::Search {
                query,
                story,
                limit,
            } => {
                fragments::run_search(&cfg, &query, story.as_deref(), limit).await?;
            }
            FragmentAction::List => {
                fragments::run_list(&cfg).await?;
            }
        },
        Commands::Analyze {
            ids,
            relation,
            target,
        } => {
            analyze::run_analyze(&cfg, &ids, relation, target.as_deref()).await?;
        }
        Commands::History { action } => match action {
            HistoryAction::List { limit } => history::run_list(&cfg, limit).await?,
            HistoryAction::Show { id } => history::run_show(&cfg, &id).await?,
            HistoryAction::Delete { id } => history::run_delete(&cfg, &id).await?,
        },
        Commands::Health => {
            let health = client::AnalysisClient::from_config(&cfg.client)?
                .health()
                .await?;
            println!("{} (version {})", health.status, health.version);
        }
    }

    Ok(())
}
