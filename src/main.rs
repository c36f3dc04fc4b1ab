mod config;
mod data_service;
mod date;
mod distribute;
mod doc_type;
mod error;
mod linkedin;
mod lookup;
mod planner;
mod runner;
mod sync_state;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use config::Config;
use doc_type::DocType;
use error::Error;
use log::{error, info, warn};
use planner::{
    compute_backfill_chunks, compute_timestamp_range, exclude_chunks_containing, BackfillWindow,
    JobType, SyncStart,
};
use runner::CustomRange;

#[derive(Parser)]
struct Args {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync LinkedIn ads documents for every configured ad account.
    Sync {
        #[arg(long, help = "Date should be in the form YYYYMMDD", value_parser = validate_date)]
        start_timestamp: Option<NaiveDate>,

        #[arg(long, help = "Date should be in the form YYYYMMDD", value_parser = validate_date)]
        end_timestamp: Option<NaiveDate>,
    },
    /// Print the dates a sync would fetch for one document type.
    Plan {
        #[arg(long, value_parser = validate_doc_type)]
        doc_type: DocType,

        #[arg(long, help = "Date should be in the form YYYYMMDD", value_parser = validate_date)]
        last_synced: Option<NaiveDate>,

        #[arg(long, help = "Date should be in the form YYYYMMDD", value_parser = validate_date)]
        end_timestamp: Option<NaiveDate>,
    },
    /// Print the week chunks a member company backfill would fetch.
    BackfillPlan {
        #[arg(long, help = "Date should be in the form YYYYMMDD", value_parser = validate_date)]
        last_backfill: Option<NaiveDate>,

        #[arg(long, value_enum, help = "Plan the backfill window of this sync job")]
        job_type: Option<JobType>,

        #[arg(long, help = "Use full weeks ending this many weeks before the last Sunday")]
        weeks_for_buffer: Option<u32>,

        #[arg(
            long,
            help = "Monday starting the window, YYYYMMDD",
            value_parser = validate_date,
            requires = "window_end"
        )]
        window_start: Option<NaiveDate>,

        #[arg(
            long,
            help = "Sunday ending the window, YYYYMMDD",
            value_parser = validate_date,
            requires = "window_start"
        )]
        window_end: Option<NaiveDate>,

        #[arg(
            long,
            help = "Skip the week containing this date, YYYYMMDD",
            value_parser = validate_date
        )]
        skip_date: Option<NaiveDate>,
    },
}

fn validate_date(s: &str) -> Result<NaiveDate, String> {
    date::parse_timestamp(s).map_err(|err| err.to_string())
}

fn validate_doc_type(s: &str) -> Result<DocType, String> {
    s.parse::<DocType>().map_err(|err| err.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::init();

    let today = date::today_in(&args.config.timezone);

    match args.command {
        Command::Sync {
            start_timestamp,
            end_timestamp,
        } => {
            let custom = CustomRange {
                start: start_timestamp,
                end: end_timestamp,
            };
            match runner::sync_linkedin_ads(args.config, custom).await {
                Ok(report) if report.is_success() => {}
                Ok(report) => {
                    for failure in &report.failures {
                        error!("sync failure: {:?}", failure);
                    }
                    std::process::exit(1);
                }
                Err(err) => {
                    error!("failed to sync LinkedIn ads data: {}", err);
                    std::process::exit(1);
                }
            }
        }
        Command::Plan {
            doc_type,
            last_synced,
            end_timestamp,
        } => {
            let start = match last_synced {
                Some(last_synced) => SyncStart::After(last_synced),
                None => SyncStart::From(date::add_days(today, -(planner::MAX_LOOKBACK as i64))),
            };
            let plan = compute_timestamp_range(doc_type, start, end_timestamp, today);
            if let Some(truncation) = &plan.truncation {
                warn!("{}", truncation);
            }
            println!("{}", plan.range.timestamps().join("\n"));
        }
        Command::BackfillPlan {
            last_backfill,
            job_type,
            weeks_for_buffer,
            window_start,
            window_end,
            skip_date,
        } => {
            let window = match (window_start, window_end, weeks_for_buffer, job_type) {
                (Some(start), Some(end), _, _) => BackfillWindow::explicit(start, end)?,
                (_, _, Some(weeks), _) => BackfillWindow::weekly(today, weeks),
                (_, _, None, Some(job)) => job.backfill_window(today),
                _ => BackfillWindow::trailing(today),
            };
            let skip_date =
                skip_date.or_else(|| job_type.and_then(|job| job.unsettled_date(today)));
            info!("backfill window {} to {}", window.start, window.end);

            let mut chunks = compute_backfill_chunks(last_backfill, &window);
            if let Some(skip_date) = skip_date {
                chunks = exclude_chunks_containing(chunks, skip_date);
            }
            for chunk in chunks {
                println!("{}", chunk.timestamps().join(","));
            }
        }
    };

    Ok(())
}
