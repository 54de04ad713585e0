use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ifi_events_lib::{
    scraping, AppConfig, ConfigStore, Event, FetchOrigin, MemoryCache, Pipeline, ShowTarget,
    SourceSelector, Store,
};

#[derive(Parser)]
#[command(name = "ifi-events")]
#[command(about = "Fetch, cache, merge and deduplicate student event listings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database file path (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Cache directory (overrides config)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Keep source responses in memory for this run only
    #[arg(long, global = true)]
    no_cache: bool,

    /// Only log warnings and errors
    #[arg(long, short = 'q', global = true, conflicts_with = "debug")]
    quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch events from one or all sources and store them
    Fetch {
        /// Source tag or alias, or "all"
        #[arg(long, short = 's', default_value = "all")]
        source: String,

        /// Ignore the cache and fetch from the sources
        #[arg(long)]
        live: bool,

        /// Print the fetched events instead of storing them
        #[arg(long)]
        no_store: bool,

        /// Print full event details
        #[arg(long)]
        detailed: bool,
    },
    /// List stored events
    List {
        #[arg(long, short = 's', default_value = "all")]
        source: String,

        #[arg(long)]
        detailed: bool,
    },
    /// Delete stored events
    Clear {
        #[arg(long, short = 's', default_value = "all")]
        source: String,
    },
    /// Show one event: an id, "r" for random or "n" for the next upcoming
    Show { target: ShowTarget },
    /// Remove duplicate stored events
    Deduplicate {
        #[arg(long, short = 's', default_value = "all")]
        source: String,
    },
    /// List registered sources
    Sources,
    /// Include a source when fetching all
    Enable { source: String },
    /// Skip a source when fetching all
    Disable { source: String },
    /// Cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove cached source responses
    Clear {
        #[arg(long, short = 's', default_value = "all")]
        source: String,
    },
}

fn init_tracing(cli: &Cli) {
    let level = if cli.quiet {
        "warn"
    } else if cli.debug {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_events(events: &[Event], detailed: bool) {
    if events.is_empty() {
        println!("No events found.");
        return;
    }
    for event in events {
        if detailed {
            println!("{}", event.detailed());
        } else {
            println!("{}", event.summary());
        }
    }
}

fn set_enabled(name: &str, enabled: bool) -> Result<()> {
    let tag = scraping::active_sources()
        .iter()
        .find(|source| scraping::matches(source.as_ref(), name))
        .map(|source| source.source_tag())
        .with_context(|| format!("unknown source: {name}"))?;
    let store = ConfigStore::load();
    store.update(|config| config.set_enabled(tag, enabled))?;
    let state = if enabled { "enabled" } else { "disabled" };
    println!("{tag} {state}");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let mut config: AppConfig = ConfigStore::load().read();
    if let Some(db) = cli.db.clone() {
        config.database_path = Some(db);
    }
    if let Some(dir) = cli.cache_dir.clone() {
        config.cache_dir = Some(dir);
    }

    match &cli.command {
        Commands::Enable { source } => return set_enabled(source, true),
        Commands::Disable { source } => return set_enabled(source, false),
        _ => {}
    }

    let mut pipeline = if cli.no_cache {
        let store = Store::open(&config.database_path()).context("failed to open event store")?;
        Pipeline::new(
            Box::new(MemoryCache::new()),
            store,
            scraping::active_sources(),
            config,
        )
    } else {
        Pipeline::open(config).context("failed to open event store")?
    };

    match cli.command {
        Commands::Fetch {
            source,
            live,
            no_store,
            detailed,
        } => {
            let target = SourceSelector::parse(&source);
            if no_store {
                for outcome in pipeline.fetch_only(&target, live)? {
                    match outcome.result {
                        Ok(batch) => {
                            println!("{} ({} events)", outcome.source_tag, batch.events.len());
                            for event in batch.events {
                                let draft = event.draft;
                                if detailed {
                                    println!("{}", serde_json::to_string_pretty(&draft)?);
                                } else {
                                    println!("  {} - {}", draft.title, draft.start_time);
                                }
                            }
                        }
                        Err(err) => eprintln!("{}: {err}", outcome.source_tag),
                    }
                }
                return Ok(());
            }

            let report = pipeline.fetch(&target, live)?;
            for source in &report.sources {
                match &source.result {
                    Ok((origin, counts)) => {
                        let origin = match origin {
                            FetchOrigin::Cache => "cache",
                            FetchOrigin::Live => "live",
                        };
                        println!(
                            "{} [{origin}]: {} fetched, {} new, {} updated, {} unchanged",
                            source.source_tag,
                            counts.fetched,
                            counts.inserted,
                            counts.updated,
                            counts.unchanged
                        );
                    }
                    Err(err) => println!("{}: {err}", source.source_tag),
                }
            }
            if detailed {
                print_events(&pipeline.list(&target)?, true);
            }
            let failures = report.failures();
            if failures > 0 {
                bail!("{failures} source(s) failed");
            }
        }
        Commands::List { source, detailed } => {
            let events = pipeline.list(&SourceSelector::parse(&source))?;
            print_events(&events, detailed);
        }
        Commands::Clear { source } => {
            let removed = pipeline.clear(&SourceSelector::parse(&source))?;
            println!("Removed {removed} events.");
        }
        Commands::Show { target } => match pipeline.show(target)? {
            Some(event) => println!("{}", event.detailed()),
            None => println!("No matching event."),
        },
        Commands::Deduplicate { source } => {
            let report = pipeline.deduplicate(&SourceSelector::parse(&source))?;
            println!(
                "Removed {} duplicates, {} events remain.",
                report.removed, report.remaining
            );
            for pair in &report.ambiguous {
                println!(
                    "Possible cross-source duplicate: {} and {} ({})",
                    pair.first, pair.second, pair.title
                );
            }
        }
        Commands::Sources => {
            for info in pipeline.sources() {
                let ttl = info
                    .ttl_seconds
                    .map(|secs| format!("{secs}s"))
                    .unwrap_or_else(|| "none".to_string());
                let state = if info.enabled { "enabled" } else { "disabled" };
                println!(
                    "{} ({}) {} ttl={ttl} {state}",
                    info.tag, info.alias, info.url
                );
            }
        }
        Commands::Cache {
            action: CacheAction::Clear { source },
        } => {
            let removed = pipeline.clear_cache(&SourceSelector::parse(&source))?;
            println!("Removed {removed} cache entries.");
        }
        Commands::Enable { .. } | Commands::Disable { .. } => {}
    }

    Ok(())
}
