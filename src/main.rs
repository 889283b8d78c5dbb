use anyhow::{Context, Result};
use aqi_sampler::batch::BatchFetcher;
use aqi_sampler::cli::Args;
use aqi_sampler::config::Config;
use aqi_sampler::error::SamplerError;
use aqi_sampler::session::{run_session, SessionOutcome};
use aqi_sampler::transport::ReqwestTransport;
use clap::Parser;
use std::future::Future;
use std::process::ExitCode;

const INTERRUPTED_EXIT_CODE: u8 = 130;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,aqi_sampler=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(err) = init_tracing() {
        eprintln!("failed to initialise logging: {err:#}");
    }

    tokio::select! {
        _ = interrupted(tokio::signal::ctrl_c()) => {
            tracing::warn!("interrupted; no average reported");
            ExitCode::from(INTERRUPTED_EXIT_CODE)
        }
        result = run(args) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                tracing::error!(error = %err, "sampling failed");
                eprintln!("error: {err:#}");
                let code = err
                    .downcast_ref::<SamplerError>()
                    .map(SamplerError::exit_code)
                    .unwrap_or(1);
                ExitCode::from(code)
            }
        },
    }
}

/// Resolves on Ctrl-C. If the handler cannot be installed it never resolves,
/// so the run continues without interrupt support.
async fn interrupted<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(err) = signal.await {
        tracing::warn!(error = %err, "unable to listen for ctrl-c; interrupt disabled");
        std::future::pending::<()>().await;
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::from_args(args)?;
    tracing::info!(
        api_root = config.api.root(),
        bounds = %config.bounds,
        pollutant = %config.pollutant,
        period_minutes = config.period_minutes,
        rate_per_minute = config.rate_per_minute,
        workers = config.workers,
        "aqi-sampler starting"
    );

    let transport =
        ReqwestTransport::new(config.request_timeout()).context("failed to build HTTP client")?;
    let fetcher = BatchFetcher::new(transport, config.workers);
    let outcome = run_session(&fetcher, &config.api, &config.session_request()).await?;

    match outcome {
        SessionOutcome::NoStations => {
            if config.json_output {
                let body = serde_json::json!({
                    "pollutant": config.pollutant,
                    "bounds": config.bounds.to_string(),
                    "stations": [],
                    "average": null,
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                println!("There are no stations in the requested area; nothing to sample.");
            }
        }
        SessionOutcome::Completed(report) => {
            if config.json_output {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "The average {} over {} samples is:\n{:.5}",
                    report.pollutant, report.ticks, report.average
                );
            }
        }
    }
    Ok(())
}
