use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use apipulse::config::AppConfig;
use apipulse::metrics::MetricsStore;
use apipulse::model::{Cadence, HttpMethod, RunStatus, Schedule, ScheduleStatus};
use apipulse::storage::{
    self, NewSchedule, NewTarget, Pool, RunFilter, RunStore, ScheduleStore, TargetStore,
};

#[derive(Parser)]
#[command(
    name = "apipulse",
    about = "Self-hosted HTTP request scheduler with durable run history",
    version,
    long_about = None
)]
struct Cli {
    /// Config file path (defaults to $APIPULSE_CONFIG, then /etc/apipulse/apipulse.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (REST API + schedule engine)
    Serve {
        /// Bind address, overriding the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Manage HTTP targets
    Target {
        #[command(subcommand)]
        action: TargetAction,
    },

    /// Manage schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Show recent runs, newest first
    Runs {
        /// Filter by schedule name
        #[arg(long)]
        schedule: Option<String>,

        /// Filter by run status (SUCCESS, FAILED, TIMEOUT, ...)
        #[arg(long)]
        status: Option<RunStatus>,

        /// Maximum rows to print
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show aggregate metrics
    Metrics,
}

#[derive(Subcommand)]
enum TargetAction {
    /// Register a new target
    Add {
        /// Unique target name
        #[arg(long)]
        name: String,

        /// URL to call
        #[arg(long)]
        url: String,

        /// HTTP method
        #[arg(long, default_value = "GET")]
        method: HttpMethod,

        /// Header as 'Name: Value', repeatable
        #[arg(long = "header")]
        headers: Vec<String>,

        /// Request body template; JSON-parseable templates are sent as JSON
        #[arg(long)]
        body: Option<String>,
    },

    /// List all targets
    List,

    /// Delete a target and every schedule that references it
    Remove {
        /// Target name
        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Add a new schedule; it becomes ACTIVE immediately
    Add {
        /// Unique schedule name
        #[arg(long)]
        name: String,

        /// Name of the target to fire against
        #[arg(long)]
        target: String,

        /// Seconds between fires
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        interval_seconds: u32,

        /// Total window length in seconds; omit for an open-ended schedule
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        duration_seconds: Option<u32>,
    },

    /// List all schedules
    List,

    /// Pause an active schedule
    Pause {
        /// Schedule name
        #[arg(long)]
        name: String,
    },

    /// Resume a paused schedule
    Resume {
        /// Schedule name
        #[arg(long)]
        name: String,
    },

    /// Delete a schedule
    Remove {
        /// Schedule name
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_or_default(),
    };

    // RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    match cli.command {
        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.server.listen_address = bind;
            }
            tracing::info!(bind = %config.server.listen_address, "starting apipulse daemon");
            apipulse::serve(config).await?;
        }
        Commands::Target { action } => {
            let pool = open_pool(&config)?;
            run_target_action(pool, action)?;
        }
        Commands::Schedule { action } => {
            let pool = open_pool(&config)?;
            run_schedule_action(pool, action)?;
        }
        Commands::Runs {
            schedule,
            status,
            limit,
        } => {
            let pool = open_pool(&config)?;
            let schedule_id = match schedule {
                Some(name) => Some(require_schedule(&pool, &name)?.id),
                None => None,
            };
            let runs = RunStore::new(pool).list(&RunFilter {
                schedule_id,
                status,
                limit: Some(limit),
                ..Default::default()
            })?;
            if runs.is_empty() {
                println!("No runs recorded.");
            } else {
                println!(
                    "{:<6} | {:<8} | {:<16} | {:<24} | {:>6} | {:>10}",
                    "Run", "Schedule", "Status", "Started", "HTTP", "Latency"
                );
                println!(
                    "{:-<6}-|-{:-<8}-|-{:-<16}-|-{:-<24}-|-{:-<6}-|-{:-<10}",
                    "", "", "", "", "", ""
                );
                for run in runs {
                    println!(
                        "{:<6} | {:<8} | {:<16} | {:<24} | {:>6} | {:>10}",
                        run.id,
                        run.schedule_id,
                        run.status.to_string(),
                        run.started_at.format("%Y-%m-%d %H:%M:%S"),
                        run.http_status.map_or("-".into(), |s| s.to_string()),
                        run.latency_ms
                            .map_or("-".into(), |ms| format!("{ms:.1}ms")),
                    );
                }
            }
        }
        Commands::Metrics => {
            let pool = open_pool(&config)?;
            let metrics = MetricsStore::new(pool).system()?;
            println!("Targets:           {}", metrics.total_targets);
            println!(
                "Schedules:         {} ({} active, {} paused, {} stopped)",
                metrics.total_schedules,
                metrics.active_schedules,
                metrics.paused_schedules,
                metrics.stopped_schedules
            );
            println!("Runs:              {}", metrics.total_runs);
            println!("Runs (last hour):  {}", metrics.runs_last_hour);
            println!("Success rate:      {:.2}%", metrics.success_rate);
            match metrics.avg_latency_ms {
                Some(ms) => println!("Avg latency:       {ms:.2}ms"),
                None => println!("Avg latency:       -"),
            }
        }
    }

    Ok(())
}

fn open_pool(config: &AppConfig) -> Result<Pool> {
    storage::open_pool(&config.database.path)
        .with_context(|| format!("failed to open {}", config.database.path.display()))
}

fn run_target_action(pool: Pool, action: TargetAction) -> Result<()> {
    let targets = TargetStore::new(pool.clone());
    match action {
        TargetAction::Add {
            name,
            url,
            method,
            headers,
            body,
        } => {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("url must start with http:// or https://");
            }
            let headers = parse_headers(&headers)?;
            let target = targets.create(&NewTarget {
                name,
                url,
                method,
                headers,
                body_template: body,
            })?;
            println!("Target '{}' registered (id {}).", target.name, target.id);
        }
        TargetAction::List => {
            let all = targets.list()?;
            if all.is_empty() {
                println!("No targets found.");
            } else {
                println!("{:<6} | {:<20} | {:<7} | URL", "Id", "Name", "Method");
                println!("{:-<6}-|-{:-<20}-|-{:-<7}-|-{:-<40}", "", "", "", "");
                for target in all {
                    println!(
                        "{:<6} | {:<20} | {:<7} | {}",
                        target.id,
                        target.name,
                        target.method.to_string(),
                        target.url
                    );
                }
            }
        }
        TargetAction::Remove { name } => {
            let Some(target) = targets.get_by_name(&name)? else {
                bail!("no target named '{name}'");
            };
            targets.delete(target.id)?;
            println!("Target '{name}' deleted.");
        }
    }
    Ok(())
}

fn run_schedule_action(pool: Pool, action: ScheduleAction) -> Result<()> {
    let schedules = ScheduleStore::new(pool.clone());
    match action {
        ScheduleAction::Add {
            name,
            target,
            interval_seconds,
            duration_seconds,
        } => {
            let Some(target) = TargetStore::new(pool).get_by_name(&target)? else {
                bail!("no target named '{target}'");
            };
            let cadence = match duration_seconds {
                Some(duration_seconds) => Cadence::Window {
                    interval_seconds,
                    duration_seconds,
                },
                None => Cadence::Interval { interval_seconds },
            };
            let window_started_at = match cadence {
                Cadence::Window { .. } => Some(Utc::now()),
                Cadence::Interval { .. } => None,
            };
            let schedule = schedules.create(&NewSchedule {
                name,
                target_id: target.id,
                cadence,
                window_started_at,
            })?;
            println!(
                "Schedule '{}' added (id {}). A running daemon picks it up on restart.",
                schedule.name, schedule.id
            );
        }
        ScheduleAction::List => {
            let all = schedules.list(None)?;
            if all.is_empty() {
                println!("No schedules found.");
            } else {
                println!(
                    "{:<6} | {:<20} | {:<8} | {:>8} | {:>8} | Status",
                    "Id", "Name", "Type", "Interval", "Duration"
                );
                println!(
                    "{:-<6}-|-{:-<20}-|-{:-<8}-|-{:-<8}-|-{:-<8}-|-{:-<7}",
                    "", "", "", "", "", ""
                );
                for schedule in all {
                    println!(
                        "{:<6} | {:<20} | {:<8} | {:>7}s | {:>8} | {}",
                        schedule.id,
                        schedule.name,
                        schedule.cadence.kind(),
                        schedule.cadence.interval_seconds(),
                        schedule
                            .cadence
                            .duration_seconds()
                            .map_or("-".into(), |d| format!("{d}s")),
                        schedule.status
                    );
                }
            }
        }
        ScheduleAction::Pause { name } => {
            let schedule = require_schedule_by_store(&schedules, &name)?;
            if schedule.status != ScheduleStatus::Active {
                bail!(
                    "schedule '{name}' is {}, only ACTIVE schedules can be paused",
                    schedule.status
                );
            }
            schedules.set_status(schedule.id, ScheduleStatus::Paused)?;
            println!("Schedule '{name}' paused.");
        }
        ScheduleAction::Resume { name } => {
            let schedule = require_schedule_by_store(&schedules, &name)?;
            if schedule.status != ScheduleStatus::Paused {
                bail!(
                    "schedule '{name}' is {}, only PAUSED schedules can be resumed",
                    schedule.status
                );
            }
            match schedule.window_ends_at() {
                Some(ends_at) if ends_at <= Utc::now() => {
                    schedules.mark_stopped(schedule.id, Utc::now())?;
                    println!("Schedule '{name}' window already elapsed; marked STOPPED.");
                }
                _ => {
                    schedules.set_status(schedule.id, ScheduleStatus::Active)?;
                    println!("Schedule '{name}' resumed.");
                }
            }
        }
        ScheduleAction::Remove { name } => {
            let schedule = require_schedule_by_store(&schedules, &name)?;
            schedules.delete(schedule.id)?;
            println!("Schedule '{name}' deleted.");
        }
    }
    Ok(())
}

fn require_schedule(pool: &Pool, name: &str) -> Result<Schedule> {
    require_schedule_by_store(&ScheduleStore::new(pool.clone()), name)
}

fn require_schedule_by_store(store: &ScheduleStore, name: &str) -> Result<Schedule> {
    match store.get_by_name(name)? {
        Some(schedule) => Ok(schedule),
        None => bail!("no schedule named '{name}'"),
    }
}

/// Parse repeated `--header 'Name: Value'` flags.
fn parse_headers(raw: &[String]) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .with_context(|| format!("header '{entry}' is not in 'Name: Value' form"))?;
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }
    Ok(headers)
}
