//! readsync CLI
//!
//! Command-line tools for the maintenance operations a user runs by hand.
//!
//! # Commands
//!
//! - `whoami` - Verify the token and show the remote user
//! - `search` - Search the remote catalog
//! - `match` - Match local book metadata to a catalog book
//! - `sessions` - List the read sessions of a library entry
//! - `dedupe` - Delete duplicate read sessions, keeping the furthest one
//! - `linkage` - Show a stored linkage

mod commands;

use clap::{Parser, Subcommand};
use commands::RemoteOptions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// readsync command-line tools.
#[derive(Parser)]
#[command(name = "readsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// API token
    #[arg(global = true, long, env = "READSYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// GraphQL endpoint
    #[arg(global = true, long, env = "READSYNC_ENDPOINT")]
    endpoint: Option<String>,

    /// Requests per minute (1-60)
    #[arg(global = true, long)]
    rate_limit: Option<u32>,

    /// Enable verbose output and payload logging
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify the token and show the remote user
    Whoami,

    /// Search the remote catalog
    Search {
        /// Title, author or ISBN
        query: String,

        /// Maximum number of results
        #[arg(short, long, default_value = "10")]
        limit: u32,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Match local book metadata to a catalog book
    Match {
        /// Book title
        #[arg(short, long)]
        title: String,

        /// Primary author
        #[arg(short, long)]
        author: Option<String>,

        /// ISBN-10 or ISBN-13
        #[arg(short, long)]
        isbn: Option<String>,

        /// Add the match to the library and print the link id
        #[arg(short, long)]
        link: bool,

        /// Linkage file to record the link in
        #[arg(short, long, requires = "book")]
        store: Option<PathBuf>,

        /// Local book key used in the linkage file
        #[arg(short, long)]
        book: Option<String>,
    },

    /// List the read sessions of a library entry
    Sessions {
        /// Library entry id
        link_id: i64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete duplicate read sessions, keeping the one with the most progress
    Dedupe {
        /// Library entry id
        link_id: i64,

        /// Dry run - show what would be deleted
        #[arg(short, long)]
        dry_run: bool,

        /// Linkage file to point at the kept session
        #[arg(short, long, requires = "book")]
        store: Option<PathBuf>,

        /// Local book key used in the linkage file
        #[arg(short, long)]
        book: Option<String>,
    },

    /// Show the stored linkage of a book
    Linkage {
        /// Linkage file
        store: PathBuf,

        /// Local book key
        book: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let remote = RemoteOptions {
        token: cli.token,
        endpoint: cli.endpoint,
        rate_limit: cli.rate_limit,
        debug: cli.verbose,
    };

    match cli.command {
        Commands::Whoami => commands::whoami::run(&remote).await?,
        Commands::Search {
            query,
            limit,
            format,
        } => commands::search::run(&remote, &query, limit, &format).await?,
        Commands::Match {
            title,
            author,
            isbn,
            link,
            store,
            book,
        } => {
            let target = match (store, book) {
                (Some(store), Some(book)) => Some((store, book)),
                _ => None,
            };
            commands::match_book::run(&remote, title, author, isbn, link, target).await?;
        }
        Commands::Sessions { link_id, format } => {
            commands::sessions::run(&remote, link_id, &format).await?
        }
        Commands::Dedupe {
            link_id,
            dry_run,
            store,
            book,
        } => {
            let target = match (store, book) {
                (Some(store), Some(book)) => Some((store, book)),
                _ => None,
            };
            commands::dedupe::run(&remote, link_id, dry_run, target).await?;
        }
        Commands::Linkage { store, book } => commands::linkage::run(&store, &book)?,
        Commands::Version => {
            println!("readsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
