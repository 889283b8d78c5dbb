use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "aqi-sampler",
    version,
    about = "Average one pollutant index across every WAQI station in a bounding box"
)]
pub struct Args {
    /// WAQI API token.
    pub token: String,
    /// Bounding box as lat1,lng1,lat2,lng2 (no spaces).
    #[arg(allow_hyphen_values = true)]
    pub bounds: String,
    /// Sampling period in minutes.
    #[arg(default_value_t = 5.0)]
    pub period: f64,
    /// Sampling rate in samples per minute.
    #[arg(default_value_t = 1.0)]
    pub rate: f64,
    /// Pollutant index to sample (pm25, pm10, o3, no2, ...).
    #[arg(long)]
    pub pollutant: Option<String>,
    /// Maximum concurrent requests per batch.
    #[arg(long)]
    pub workers: Option<usize>,
    #[arg(long)]
    pub api_root: Option<String>,
    #[arg(long)]
    pub timeout_secs: Option<u64>,
    /// JSON file with default overrides.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Print the final report as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}
