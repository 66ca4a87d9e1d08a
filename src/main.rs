use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use report_sync::api::{ApiRateLimiter, IsinClient, MopsClient};
use report_sync::config::Config;
use report_sync::data_collector::ReportCollector;
use report_sync::database::ReportStore;
use report_sync::database_sqlx::DatabaseManagerSqlx;
use report_sync::models::{Company, FetchJob, FiscalPeriod, ReportKind, Ticker};
use report_sync::scheduler::{Scheduler, SweepReport};

#[derive(Parser, Debug)]
#[command(author, version, about = "Keeps MOPS quarterly financial reports in sync", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sweep now, then daily at the configured time (default)
    Run,
    /// Run a single reconciliation sweep and exit
    Sweep,
    /// Fetch every missing period down to the earliest supported quarter, ignoring NDF marks
    Backfill {
        /// Limit to these tickers
        #[arg(long)]
        ticker: Vec<String>,
    },
    /// Fetch one report, e.g. `fetch 2330 111Q4`
    Fetch {
        ticker: String,
        period: FiscalPeriod,
        #[arg(long, value_enum, default_value_t = ReportKind::BalanceSheet)]
        kind: ReportKind,
    },
    /// Manage the company universe
    Companies {
        #[command(subcommand)]
        action: CompaniesAction,
    },
    /// Print the version ledger of a company
    Status {
        ticker: String,
        #[arg(long, value_enum, default_value_t = ReportKind::BalanceSheet)]
        kind: ReportKind,
    },
    /// Inspect or remove stored reports
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },
}

#[derive(Subcommand, Debug)]
enum CompaniesAction {
    /// Import listed companies from the exchange ISIN page
    Import,
    /// Add a single company
    Add {
        ticker: String,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// List the company universe
    List,
}

#[derive(Subcommand, Debug)]
enum ReportAction {
    /// Print a stored report
    Show {
        ticker: String,
        period: FiscalPeriod,
        #[arg(long, value_enum, default_value_t = ReportKind::BalanceSheet)]
        kind: ReportKind,
    },
    /// Delete a stored report so the next sweep fetches it again
    Delete {
        ticker: String,
        period: FiscalPeriod,
        #[arg(long, value_enum, default_value_t = ReportKind::BalanceSheet)]
        kind: ReportKind,
    },
}

fn init_logging() {
    // RUST_LOG wins; LOG_LEVEL is a shorthand for this crate's level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(format!("report_sync={}", level.to_lowercase()))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Ctrl-C received, shutting down");
            let _ = tx.send(true);
        }
        // keep the sender alive so receivers never see a closed channel
        std::future::pending::<()>().await;
    });
    rx
}

fn print_report(report: &SweepReport) {
    println!("📊 Planned jobs:      {}", report.planned);
    println!("✅ Stored:            {}", report.stats.stored);
    println!("♻️  Already stored:    {}", report.stats.already_stored);
    println!("📭 Not filed:         {}", report.stats.not_filed);
    println!("⚠️  Failed:            {}", report.stats.failures());
    if report.ledgers_failed > 0 {
        println!("❌ Unreadable ledgers: {}", report.ledgers_failed);
    }
    if report.interrupted {
        println!("🛑 Interrupted, {} jobs cancelled", report.stats.cancelled);
    }
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("❌ Configuration Error: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(cli.command.unwrap_or(Command::Run), config).await {
        error!("{:#}", e);
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

async fn run(command: Command, config: Config) -> Result<()> {
    let database = Arc::new(DatabaseManagerSqlx::new(&config.database_path).await?);

    match command {
        Command::Run => {
            let scheduler = Scheduler::from_config(&config, database)?;
            scheduler.run(shutdown_channel()).await?;
        }
        Command::Sweep => {
            let scheduler = Scheduler::from_config(&config, database)?;
            let mut shutdown = shutdown_channel();
            let result = scheduler.run_sweep(Local::now().date_naive(), &mut shutdown).await;
            scheduler.shutdown().await;
            print_report(&result?);
        }
        Command::Backfill { ticker } => {
            let tickers = (!ticker.is_empty()).then(|| ticker.iter().map(|t| Ticker::new(t.as_str())).collect());
            let scheduler = Scheduler::from_config(&config, database)?;
            let mut shutdown = shutdown_channel();
            let result = scheduler
                .run_backfill(Local::now().date_naive(), tickers, &mut shutdown)
                .await;
            scheduler.shutdown().await;
            print_report(&result?);
        }
        Command::Fetch { ticker, period, kind } => {
            if !kind.is_supported() {
                warn!("no extraction schema for {}, the fetch will fail to parse", kind);
            }
            let rate_limiter = ApiRateLimiter::per_second(config.requests_per_second)
                .ok_or_else(|| anyhow!("invalid request rate {}", config.requests_per_second))?;
            let client = MopsClient::new(&config, Arc::new(rate_limiter))?;
            let collector = ReportCollector::new(Arc::new(client), database, &config);

            let job = FetchJob::new(Ticker::new(ticker), period, kind);
            let outcome = collector.collect(&job).await;
            println!("{}: {:?}", job, outcome);
        }
        Command::Companies { action } => match action {
            CompaniesAction::Import => {
                let client = IsinClient::new(&config.isin_listing_url, config.request_timeout)?;
                let companies = client.fetch_listed_companies().await?;
                for company in &companies {
                    database.upsert_company(company).await?;
                }
                println!("✅ Imported {} companies", companies.len());
            }
            CompaniesAction::Add { ticker, name } => {
                let company = Company { ticker: Ticker::new(ticker), name };
                database.upsert_company(&company).await?;
                println!("✅ Added {}", company.ticker);
            }
            CompaniesAction::List => {
                for company in database.get_companies().await? {
                    println!("{}\t{}", company.ticker, company.name);
                }
            }
        },
        Command::Status { ticker, kind } => {
            let ticker = Ticker::new(ticker);
            let ledger = database
                .get_version_table(&ticker, kind)
                .await
                .with_context(|| format!("failed to read ledger for {}", ticker))?;
            if ledger.is_empty() {
                println!("No {} ledger entries for {}", kind, ticker);
            }
            for (period, tag) in ledger.iter().rev() {
                println!("{}\t{}", period, tag);
            }
        }
        Command::Report { action } => match action {
            ReportAction::Show { ticker, period, kind } => {
                let ticker = Ticker::new(ticker);
                match database.get_report(&ticker, kind, period).await? {
                    Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                    None => println!("No {} report for {} {}", kind, ticker, period),
                }
            }
            ReportAction::Delete { ticker, period, kind } => {
                let ticker = Ticker::new(ticker);
                let deleted = database.delete_report(&ticker, kind, period).await?;
                println!("🗑️  Deleted {} report(s) for {} {} {}", deleted, ticker, kind, period);
            }
        },
    }

    Ok(())
}
