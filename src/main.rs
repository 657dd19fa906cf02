use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod aggregate;
mod cohort;
mod config;
mod db;
mod eligibility;
mod engine;
mod error;
mod models;
mod records;
mod report;
mod sessions;
mod store;

use crate::engine::InvocationContext;
use crate::models::{FilterSpec, ReportRequest};

#[derive(Parser)]
#[command(name = "church-attendance-report")]
#[command(about = "Attendance eligibility and reporting engine for church congregations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    Markdown,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a realistic demo congregation
    Seed,
    /// Import attendance records from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Generate an attendance report
    #[command(group(
        ArgGroup::new("source")
            .args(["filter", "from"])
            .multiple(false)
    ))]
    Report {
        /// Organization to report on
        #[arg(long, env = "ORGANIZATION_ID")]
        org: Option<Uuid>,
        /// JSON report request as produced by the UI. An `organization_id`
        /// in the file takes precedence over `--org`.
        #[arg(long)]
        filter: Option<PathBuf>,
        /// First day of the window (inclusive)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day of the window (inclusive)
        #[arg(long, conflicts_with = "filter")]
        to: Option<NaiveDate>,
        #[arg(long = "occasion", conflicts_with = "filter")]
        occasions: Vec<Uuid>,
        #[arg(long = "session", conflicts_with = "filter")]
        sessions: Vec<Uuid>,
        #[arg(long = "member", conflicts_with = "filter")]
        members: Vec<Uuid>,
        #[arg(long = "tag", conflicts_with = "filter")]
        tags: Vec<Uuid>,
        #[arg(long = "group", conflicts_with = "filter")]
        groups: Vec<Uuid>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn start_of_day(day: NaiveDate) -> Option<DateTime<Utc>> {
    day.and_hms_opt(0, 0, 0).map(|ts| ts.and_utc())
}

fn end_of_day(day: NaiveDate) -> Option<DateTime<Utc>> {
    day.and_hms_nano_opt(23, 59, 59, 999_999_999)
        .map(|ts| ts.and_utc())
}

/// Parses a request file, falling back to `org` when the file names no
/// organization.
fn parse_request(raw: &str, org: Option<Uuid>) -> anyhow::Result<ReportRequest> {
    let mut request: ReportRequest = serde_json::from_str(raw)?;
    request.organization_id = request.organization_id.or(org);
    Ok(request)
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
    let settings = config::Settings::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!(
                "Seed data inserted for organization {}.",
                db::SEED_ORGANIZATION_ID
            );
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} attendance records from {}.", csv.display());
        }
        Commands::Report {
            org,
            filter,
            from,
            to,
            occasions,
            sessions,
            members,
            tags,
            groups,
            format,
            out,
        } => {
            let request = match filter {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    parse_request(&raw, org)
                        .with_context(|| format!("invalid report request in {}", path.display()))?
                }
                None => ReportRequest {
                    organization_id: org,
                    filter: FilterSpec {
                        date_from: from.and_then(start_of_day),
                        date_to: to.and_then(end_of_day),
                        occasion_ids: occasions,
                        session_ids: sessions,
                        member_ids: members,
                        tag_item_ids: tags,
                        group_ids: groups,
                    },
                },
            };

            let ctx = InvocationContext::new(Utc::now()).with_deadline(settings.deadline);
            let cancel = ctx.cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });

            let store = db::PgStore::new(pool.clone());
            let result = engine::generate_report(&store, &request, &ctx)
                .await
                .context("report could not be generated")?;

            let rendered = match format {
                OutputFormat::Json => serde_json::to_string_pretty(&result)?,
                OutputFormat::Markdown => report::render_markdown(&result, &request.filter),
            };

            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    info!(path = %path.display(), "report written");
                    println!("Report written to {}.", path.display());
                }
                None => println!("{rendered}"),
            }
        }
    }

    Ok(())
}
