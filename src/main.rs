use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use qnasearch::config::Config;
use qnasearch::embedding::create_provider;
use qnasearch::engine::SearchEngine;
use qnasearch::format::{format_category_results, format_results};
use qnasearch::logging;
use qnasearch::query_log::{QueryLogger, SqliteQueryLogger};
use qnasearch::server::QnaService;
use rmcp::ServiceExt;

#[derive(Parser)]
#[command(name = "qnasearch", version, about = "Hybrid keyword + semantic search over Q&A posts and bug tickets")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the TOML configuration file
    #[arg(long, default_value = "qnasearch.toml", env = "QNASEARCH_CONFIG")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve MCP tools over stdio (default)
    Serve,
    /// Run a single query and print the results
    Search {
        query: String,
        /// Number of results (default: embedding.top_k)
        #[arg(long)]
        top_k: Option<usize>,
        /// Split results into category buckets
        #[arg(long)]
        by_category: bool,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Load the corpus and build both indices, refreshing stale embedding caches
    Reindex {
        /// Re-embed every document even when the cache is current
        #[arg(long)]
        force: bool,
    },
    /// Inspect the query log
    Logs {
        #[command(subcommand)]
        action: LogsAction,
    },
}

#[derive(Subcommand)]
enum LogsAction {
    /// Most recent queries
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Aggregate statistics over the last N days
    Stats {
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
    /// Queries containing a keyword
    Search {
        keyword: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Full detail of one logged query
    Show { id: i64 },
}

async fn open_logger(config: &Config) -> Option<Arc<dyn QueryLogger>> {
    if !config.query_log.enabled {
        tracing::info!("Query logging disabled via config (query_log.enabled=false)");
        return None;
    }
    match SqliteQueryLogger::new(&config.query_log.db_path).await {
        Ok(logger) => Some(Arc::new(logger)),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to open query log, continuing without it");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args
    let cli = Cli::parse();

    // 2. Load configuration
    let config = Config::load_from(&cli.config)?;

    // 3. Initialize logging FIRST (before any other output)
    // CRITICAL: logging goes to stderr only, stdout is reserved for JSON-RPC
    logging::init_logging(&config);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Search { query, top_k, by_category, json } => {
            let engine = SearchEngine::initialize(config).await?;
            if by_category {
                let results = engine.search_by_category(&query, &engine.default_limits()).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&results)?);
                } else {
                    println!("{}", format_category_results(&results, &query));
                }
            } else {
                let results = engine.search(&query, top_k).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&results)?);
                } else {
                    println!("{}", format_results(&results, &query));
                }
            }
        }

        Commands::Reindex { force } => {
            let provider = create_provider(&config.embedding).await?;
            let engine = if force {
                SearchEngine::initialize_recomputed(config, provider).await?
            } else {
                SearchEngine::initialize_with_provider(config, provider).await?
            };
            println!("{}", serde_json::to_string_pretty(&engine.stats())?);
        }

        Commands::Logs { action } => {
            let logger = SqliteQueryLogger::new(&config.query_log.db_path).await?;
            match action {
                LogsAction::Recent { limit } => {
                    println!("{}", serde_json::to_string_pretty(&logger.recent(limit).await?)?);
                }
                LogsAction::Stats { days } => {
                    println!("{}", serde_json::to_string_pretty(&logger.statistics(days).await?)?);
                }
                LogsAction::Search { keyword, limit } => {
                    let entries = logger.search_queries(&keyword, limit).await?;
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                }
                LogsAction::Show { id } => match logger.detail(id).await? {
                    Some(detail) => println!("{}", serde_json::to_string_pretty(&detail)?),
                    None => anyhow::bail!("No query log entry with id {}", id),
                },
            }
        }

        Commands::Serve => {
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                "qnasearch server starting"
            );

            // 4. Build the search engine; model or primary corpus failures are fatal
            let engine = Arc::new(SearchEngine::initialize(config.clone()).await?);

            // 5. Open the query log if enabled
            let logger = open_logger(&config).await;

            // 6. Serve via stdio transport
            let service = QnaService::new(engine, logger);
            let (stdin, stdout) = rmcp::transport::io::stdio();
            let server = service.serve((stdin, stdout)).await?;

            tracing::info!("qnasearch server running, awaiting tool calls via stdio");

            // 7. Wait for shutdown (client disconnects or signal)
            server.waiting().await?;

            tracing::info!("qnasearch server stopped");
        }
    }

    Ok(())
}
