// Copyright 2026 Rankharvest Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{Parser, Subcommand};
use rankharvest::cli;
use rankharvest::cli::context::Harvest;
use rankharvest::config::HarvestConfig;
use rankharvest::period::RankPeriod;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rankharvest",
    about = "Short-video sales ranking harvester",
    version,
    after_help = "Run 'rankharvest <command> --help' for details on each command."
)]
struct Cli {
    /// JSON config file (every section optional)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch rank list pages over HTTP
    Rank {
        /// day, week or month
        #[arg(long, default_value = "day")]
        period: RankPeriod,
        /// Date code (YYYYMMDD); defaults to yesterday
        #[arg(long)]
        date: Option<String>,
        /// Number of pages to fetch
        #[arg(long)]
        pages: Option<u32>,
        #[arg(long)]
        page_size: Option<u32>,
    },
    /// Capture summary and trend for videos never collected before
    Details {
        /// Maximum number of videos this run
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Re-capture the missing half of partially collected videos
    Repair {
        /// Look-back window in hours
        #[arg(long)]
        window_hours: Option<i64>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Fetch video summaries directly over HTTP
    Summary {
        /// Video ids
        #[arg(required = true)]
        aweme_ids: Vec<String>,
        /// Date code (YYYYMMDD); defaults to yesterday
        #[arg(long)]
        date: Option<String>,
    },
    /// Process unprocessed records of one data type
    Etl {
        /// e.g. video_rank_day, video_summary, video_trend
        data_type: String,
    },
    /// Process unprocessed records of every type
    EtlAll,
    /// Check environment and configuration
    Doctor,
}

fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    let directive = if verbose { "rankharvest=debug" } else { "rankharvest=info" };
    let filter = EnvFilter::from_default_env().add_directive(directive.parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json)?;
    let config = HarvestConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Rank {
            period,
            date,
            pages,
            page_size,
        } => {
            let harvest = Harvest::open(config)?;
            cli::rank_cmd::run(&harvest, period, date, pages, page_size).await
        }
        Commands::Details { limit } => {
            let harvest = Harvest::open(config)?;
            cli::details_cmd::run_first(&harvest, limit).await
        }
        Commands::Repair {
            window_hours,
            limit,
        } => {
            let harvest = Harvest::open(config)?;
            cli::details_cmd::run_repair_pass(&harvest, window_hours, limit).await
        }
        Commands::Summary { aweme_ids, date } => {
            let harvest = Harvest::open(config)?;
            let date = date.unwrap_or_else(cli::rank_cmd::default_date_code);
            cli::details_cmd::run_summaries(&harvest, aweme_ids, date).await
        }
        Commands::Etl { data_type } => cli::etl_cmd::run_type(&config, &data_type),
        Commands::EtlAll => cli::etl_cmd::run_all(&config),
        Commands::Doctor => cli::doctor::run(&config).await,
    }
}
