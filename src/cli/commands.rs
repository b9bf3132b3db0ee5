//! Command implementations.

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::Config;
use crate::coordination::{CircuitBreaker, Coordinator, SeenUrls};
use crate::proxy::RotationEngine;
use crate::scheduler::{CrawlParams, MatchMode, NewJob, Scheduler};
use crate::storage::{Database, JobStore, MigrationRunner, ProxyStore, SettingsStore};

/// Crawl job scheduler and proxy rotation service.
#[derive(Debug, Parser)]
#[command(name = "crawld", version, about)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info", env = "CRAWLD_LOG_LEVEL")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the scheduler loop.
    Run,

    /// Apply database migrations and exit.
    Migrate {
        /// List applied migrations instead of applying pending ones.
        #[arg(long)]
        list: bool,
    },

    /// Drop all tables and data. Development only.
    Reset {
        /// Required confirmation.
        #[arg(long)]
        yes: bool,
    },

    /// Enqueue a crawl job.
    Enqueue {
        /// Target URL.
        url: String,

        /// Claim priority; lower claims first.
        #[arg(long, default_value_t = 100)]
        priority: i32,

        /// Failure budget before the job is terminal.
        #[arg(long)]
        max_retries: Option<i32>,

        /// Comma-separated keyword list for the worker's page filter.
        #[arg(long, value_delimiter = ',')]
        keywords: Vec<String>,

        /// Keyword match mode (any, all).
        #[arg(long, default_value = "any")]
        match_mode: String,

        /// Minimum matching keywords for `any` mode.
        #[arg(long, default_value_t = 1)]
        min_matches: i32,

        /// ISO country filter.
        #[arg(long)]
        country: Option<String>,

        /// Language filter.
        #[arg(long)]
        lang: Option<String>,

        /// Render JavaScript in the worker.
        #[arg(long)]
        use_js: bool,

        /// Per-domain page cap.
        #[arg(long, default_value_t = 25)]
        max_pages: i32,

        /// Browser-session reference for the worker.
        #[arg(long)]
        session_id: Option<i64>,
    },

    /// Pause job claiming across all scheduler instances.
    Pause,

    /// Resume job claiming.
    Resume,

    /// Print queue counts and scheduler liveness.
    Stats,

    /// Proxy fleet operations.
    Proxy {
        #[command(subcommand)]
        command: ProxyCommands,
    },

    /// Seen-URL dedup operations.
    Seen {
        #[command(subcommand)]
        command: SeenCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum SeenCommands {
    /// Check whether a URL was already seen. Exits 0 if seen, 1 if not.
    Check {
        /// URL to check (normalized before lookup).
        url: String,

        /// Per-job scope; omitted means the global scope.
        #[arg(long)]
        scope: Option<i64>,
    },

    /// Mark a URL as seen.
    Mark {
        /// URL to mark (normalized before insertion).
        url: String,

        /// Per-job scope; omitted means the global scope.
        #[arg(long)]
        scope: Option<i64>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ProxyCommands {
    /// Select a proxy through the rotation engine.
    Acquire {
        /// Affinity key for sticky-session selection (usually a job id).
        #[arg(long)]
        affinity: Option<String>,
    },

    /// Report a request outcome for a proxy.
    Report {
        /// Proxy id.
        id: i64,

        /// Whether the request succeeded.
        #[arg(long)]
        success: bool,

        /// Observed latency in milliseconds.
        #[arg(long)]
        latency_ms: Option<f64>,
    },

    /// Add a proxy endpoint to the fleet.
    Add {
        /// Proxy host.
        host: String,

        /// Proxy port.
        port: i32,

        /// URL scheme (http, https, socks5).
        #[arg(long, default_value = "http")]
        scheme: String,

        /// Human-assigned label; doubles as the weight-config key.
        #[arg(long)]
        label: Option<String>,

        /// Static selection weight for weighted rotation.
        #[arg(long, default_value_t = 1.0)]
        weight: f64,
    },

    /// Put a proxy back into rotation.
    Enable {
        /// Proxy id.
        id: i64,
    },

    /// Take a proxy out of rotation without deleting it.
    Disable {
        /// Proxy id.
        id: i64,
    },
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Executes the parsed command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env();

    match cli.command {
        Commands::Migrate { list } => {
            let db = Database::connect(&config.database_url)
                .await
                .context("connecting to database")?;

            if list {
                let runner = MigrationRunner::new(db.pool().clone());
                let applied = runner
                    .list_applied_migrations()
                    .await
                    .context("listing migrations")?;
                for migration in applied {
                    println!("{}  {}", migration.applied_at.to_rfc3339(), migration.name);
                }
            } else {
                db.run_migrations().await.context("running migrations")?;
                info!("Migrations applied");
            }
            Ok(())
        }

        Commands::Reset { yes } => {
            if !yes {
                anyhow::bail!("refusing to reset without --yes; this destroys all data");
            }

            let db = Database::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            MigrationRunner::new(db.pool().clone())
                .reset_database()
                .await
                .context("resetting database")?;
            println!("database reset");
            Ok(())
        }

        Commands::Run => {
            let db = Database::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            db.run_migrations().await.context("running migrations")?;

            crate::metrics::init_metrics().context("initializing metrics")?;

            let jobs = JobStore::new(db.pool().clone());
            let settings = SettingsStore::new(db.pool().clone());
            let scheduler = Scheduler::new(config, jobs, settings);

            scheduler.run().await.context("scheduler loop")?;
            Ok(())
        }

        Commands::Enqueue {
            url,
            priority,
            max_retries,
            keywords,
            match_mode,
            min_matches,
            country,
            lang,
            use_js,
            max_pages,
            session_id,
        } => {
            let db = Database::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            let jobs = JobStore::new(db.pool().clone());

            let match_mode: MatchMode = match_mode
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;

            let params = CrawlParams {
                keywords,
                match_mode,
                min_matches,
                country_filter: country,
                lang_filter: lang,
                use_js,
                max_pages_per_domain: max_pages,
            };

            let mut job = NewJob::new(url)
                .with_priority(priority)
                .with_max_retries(max_retries.unwrap_or(config.max_retries))
                .with_params(params);
            if let Some(session_id) = session_id {
                job = job.with_session_id(session_id);
            }

            let id = jobs.insert(job).await.context("inserting job")?;
            println!("enqueued job {}", id);
            Ok(())
        }

        Commands::Pause => {
            let db = Database::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            SettingsStore::new(db.pool().clone())
                .set_paused(true)
                .await
                .context("setting pause flag")?;
            println!("scheduler paused");
            Ok(())
        }

        Commands::Resume => {
            let db = Database::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            SettingsStore::new(db.pool().clone())
                .set_paused(false)
                .await
                .context("clearing pause flag")?;
            println!("scheduler resumed");
            Ok(())
        }

        Commands::Stats => {
            let db = Database::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            let jobs = JobStore::new(db.pool().clone());
            let settings = SettingsStore::new(db.pool().clone());

            let counts = jobs.counts().await.context("counting queue")?;
            let paused = settings.is_paused().await.context("reading pause flag")?;
            let heartbeat = settings
                .get(crate::storage::settings::KEY_HEARTBEAT)
                .await
                .context("reading heartbeat")?;

            println!("pending:     {}", counts.pending);
            println!("in_progress: {}", counts.in_progress);
            println!("done:        {}", counts.done);
            println!("failed:      {}", counts.failed);
            println!("paused:      {}", paused);
            println!(
                "heartbeat:   {}",
                heartbeat.as_deref().unwrap_or("(never)")
            );
            Ok(())
        }

        Commands::Proxy { command } => {
            let db = Database::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            let store = ProxyStore::new(db.pool().clone());

            match command {
                ProxyCommands::Add {
                    host,
                    port,
                    scheme,
                    label,
                    weight,
                } => {
                    let id = store
                        .insert(&scheme, &host, port, label.as_deref(), weight)
                        .await
                        .context("inserting proxy")?;
                    println!("added proxy {}", id);
                    Ok(())
                }

                ProxyCommands::Enable { id } => {
                    store.set_active(id, true).await.context("enabling proxy")?;
                    println!("enabled proxy {}", id);
                    Ok(())
                }

                ProxyCommands::Disable { id } => {
                    store
                        .set_active(id, false)
                        .await
                        .context("disabling proxy")?;
                    println!("disabled proxy {}", id);
                    Ok(())
                }

                ProxyCommands::Acquire { affinity } => {
                    let engine = build_engine(&config, store).await?;
                    match engine
                        .acquire(affinity.as_deref())
                        .await
                        .context("selecting proxy")?
                    {
                        Some(proxy) => {
                            println!("{} {}", proxy.id, proxy.uri());
                            Ok(())
                        }
                        None => {
                            eprintln!("no selectable proxy");
                            std::process::exit(1);
                        }
                    }
                }

                ProxyCommands::Report {
                    id,
                    success,
                    latency_ms,
                } => {
                    let engine = build_engine(&config, store).await?;
                    engine
                        .report_outcome(id, success, latency_ms)
                        .await
                        .context("reporting outcome")?;
                    println!("recorded");
                    Ok(())
                }
            }
        }

        Commands::Seen { command } => {
            let db = Database::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            let coordinator = Coordinator::connect(&config.redis_url, &config.namespace)
                .await
                .context("connecting to coordination store")?;
            let seen = SeenUrls::new(coordinator).with_mirror(db.pool().clone());

            match command {
                SeenCommands::Check { url, scope } => {
                    if seen.is_seen(&url, scope).await.context("checking URL")? {
                        println!("seen");
                        Ok(())
                    } else {
                        println!("not seen");
                        std::process::exit(1);
                    }
                }

                SeenCommands::Mark { url, scope } => {
                    let added = seen.mark_seen(&url, scope).await.context("marking URL")?;
                    println!("{}", if added { "marked" } else { "already seen" });
                    Ok(())
                }
            }
        }
    }
}

async fn build_engine(config: &Config, store: ProxyStore) -> anyhow::Result<RotationEngine> {
    let coordinator = Coordinator::connect(&config.redis_url, &config.namespace)
        .await
        .context("connecting to coordination store")?;

    let breaker = CircuitBreaker::new(
        coordinator.clone(),
        config.breaker_failure_threshold,
        config.breaker_cooldown,
    );

    Ok(
        RotationEngine::new(store, coordinator, breaker, config.rotation_strategy)
            .with_weights(config.proxy_weights.clone())
            .with_sticky_ttl(config.sticky_ttl),
    )
}
