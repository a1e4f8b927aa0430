pub mod archive;
pub mod catalog;
pub mod config;
pub mod indexer;
pub mod metadata;
pub mod model;
pub mod registry;
pub mod search;

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::json;

use catalog::Catalog;
use config::CatalogConfig;
use search::query::{SearchRequest, SortField};

static LONG_VERSION: Lazy<String> = Lazy::new(|| match option_env!("VERGEN_BUILD_TIMESTAMP") {
    Some(ts) => format!("{} (built {ts})", env!("CARGO_PKG_VERSION")),
    None => env!("CARGO_PKG_VERSION").to_string(),
});

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "catalog",
    version,
    about = "Identity, metadata and search index for an archive collection"
)]
pub struct Cli {
    /// Config file (defaults to $CATALOG_CONFIG, then the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level logging on stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List every registered file pointer
    Files,
    /// Show one item: merged document, cover and browse links
    Show { hash: String },
    /// Query the search index
    Search {
        /// Query string; empty matches everything
        #[arg(default_value = "")]
        query: String,
        /// Sort field, `-` prefix for descending (see `sort-fields`)
        #[arg(long, default_value = "")]
        sort: String,
        /// Zero-based page number
        #[arg(long, default_value_t = 0)]
        page: usize,
        #[arg(long, default_value_t = 48)]
        page_size: usize,
    },
    /// Items still in an auto-generated "No Collection" group
    Pending,
    /// Set the star rating (0-5)
    Rate {
        hash: String,
        #[arg(allow_negative_numbers = true)]
        rating: i64,
        /// Clear the rating if it already equals RATING
        #[arg(long)]
        toggle: bool,
    },
    /// Increment the mark counter (decrement with --remove)
    Mark {
        hash: String,
        #[arg(long)]
        remove: bool,
    },
    /// Choose the cover entry
    Cover { hash: String, entry: String },
    /// Write one archive entry's raw bytes to stdout
    Read { hash: String, entry: String },
    /// Rebuild the search index from the registry (Ctrl-C cancels)
    Reindex,
    /// Re-read the manifest
    Reload,
    /// List the accepted sort fields
    SortFields,
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

fn command() -> clap::Command {
    Cli::command().long_version(LONG_VERSION.as_str())
}

pub async fn run() -> Result<()> {
    let cli = Cli::from_arg_matches(&command().get_matches())?;

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = command();
            clap_complete::generate(shell, &mut cmd, "catalog", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Man => {
            let man = clap_mangen::Man::new(command());
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            return Ok(());
        }
        Commands::SortFields => {
            let fields: Vec<_> = SortField::all()
                .into_iter()
                .map(|f| json!({ "sort": f.to_string(), "label": f.label() }))
                .collect();
            return print_json(&fields);
        }
        _ => {}
    }

    let config = CatalogConfig::load(cli.config.as_deref())?;
    init_tracing(cli.verbose || config.debug);
    let catalog = Catalog::open(config)?;

    match cli.command {
        Commands::Files => print_json(&catalog.files()),
        Commands::Show { hash } => show(&catalog, &hash),
        Commands::Search {
            query,
            sort,
            page,
            page_size,
        } => {
            let request = SearchRequest::new(query)
                .page(page, page_size)
                .sorted_by(SortField::parse_or_default(&sort));
            let results = catalog.search(&request)?;
            print_json(&json!({
                "query": request.query,
                "sort": request.sort.to_string(),
                "page": page,
                "page_size": page_size,
                "total": results.total,
                "hits": results.hits,
            }))
        }
        Commands::Pending => print_json(&catalog.pending()?),
        Commands::Rate {
            hash,
            rating,
            toggle,
        } => {
            let item = catalog.set_rating(&hash, rating, toggle)?;
            print_json(&json!({
                "rating": item.dynamic_meta.rating,
                "message": format!("Rating updated to {}", item.dynamic_meta.rating),
            }))
        }
        Commands::Mark { hash, remove } => {
            let item = if remove {
                catalog.sub_mark(&hash)?
            } else {
                catalog.add_mark(&hash)?
            };
            print_json(&json!({ "marks": item.dynamic_meta.marks }))
        }
        Commands::Cover { hash, entry } => {
            let item = catalog.set_cover(&hash, &entry)?;
            print_json(&json!({ "cover": item.dynamic_meta.cover }))
        }
        Commands::Read { hash, entry } => {
            let mut reader = catalog.open_entry(&hash, &entry)?;
            let mut out = std::io::stdout().lock();
            std::io::copy(&mut reader, &mut out)?;
            out.flush()?;
            Ok(())
        }
        Commands::Reindex => run_reindex(&catalog).await,
        Commands::Reload => {
            let (previous, current) = catalog.reload()?;
            print_json(&json!({ "previous": previous, "current": current }))
        }
        Commands::SortFields | Commands::Completions { .. } | Commands::Man => Ok(()),
    }
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` when asked for.
pub fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

fn show(catalog: &Catalog, hash: &str) -> Result<()> {
    let mut item = catalog.item(hash)?;
    let cover = item.effective_cover(catalog.overlay(), catalog.index());
    let terms: serde_json::Map<String, serde_json::Value> = item
        .browse_terms()
        .into_iter()
        .map(|(label, terms)| {
            let links = terms
                .iter()
                .map(|t| json!({ "label": t.label, "query": t.query(), "href": t.href() }))
                .collect();
            (label.to_string(), serde_json::Value::Array(links))
        })
        .collect();
    let collection = item.collection_term();
    print_json(&json!({
        "document": item.document(),
        "real_location": catalog.overlay().real_location(&item.pointer),
        "meta_path": item.pointer.meta_path,
        "cover": cover,
        "collection": { "label": collection.label, "query": collection.query(), "href": collection.href() },
        "terms": terms,
    }))
}

async fn run_reindex(catalog: &Catalog) -> Result<()> {
    catalog.start_reindex()?;

    let pb = ProgressBar::new(catalog.reindex_status().total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("██░"),
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let mut interrupted = false;

    loop {
        tokio::select! {
            res = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                if res.is_ok() && catalog.cancel_reindex() {
                    pb.set_message("cancelling");
                    tracing::info!("reindex cancellation requested");
                }
            }
            _ = ticker.tick() => {
                let status = catalog.reindex_status();
                pb.set_position(status.processed as u64);
                if !interrupted {
                    pb.set_message(format!("ok {} err {}", status.ok, status.error));
                }
                if !status.running {
                    break;
                }
            }
        }
    }

    pb.finish_and_clear();
    catalog.wait_reindex();
    print_json(&catalog.reindex_status())
}
