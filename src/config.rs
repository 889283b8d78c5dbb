use crate::batch::DEFAULT_WORKERS;
use crate::cli::Args;
use crate::rate_guard;
use crate::sampling::SamplingPlan;
use crate::session::SessionRequest;
use crate::waqi::{BoundingBox, WaqiApi, DEFAULT_API_ROOT, DEFAULT_POLLUTANT};
use anyhow::{anyhow, bail, Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub api: WaqiApi,
    pub bounds: BoundingBox,
    pub period_minutes: f64,
    pub rate_per_minute: f64,
    pub pollutant: String,
    pub workers: usize,
    pub request_timeout_secs: u64,
    pub json_output: bool,
}

/// Defaults read from the optional JSON file; anything set here loses to env
/// and CLI values.
#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    #[serde(default)]
    pollutant: Option<String>,
    #[serde(default)]
    workers: Option<usize>,
    #[serde(default)]
    api_root: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self> {
        dotenv().ok();
        Self::resolve(args, |key| std::env::var(key).ok())
    }

    /// Resolves settings with precedence CLI > env > overrides file > default.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let config_path = args
            .config
            .clone()
            .or_else(|| env.optional("AQI_SAMPLER_CONFIG_PATH").map(PathBuf::from));
        let overrides = config_path
            .as_deref()
            .and_then(load_config_overrides)
            .unwrap_or_default();

        let pollutant = match args.pollutant {
            Some(value) => value.trim().to_string(),
            None => env.string(
                "AQI_SAMPLER_POLLUTANT",
                overrides
                    .pollutant
                    .unwrap_or_else(|| DEFAULT_POLLUTANT.to_string()),
            ),
        };
        let workers = match args.workers {
            Some(value) => value,
            None => env.usize(
                "AQI_SAMPLER_WORKERS",
                overrides.workers.unwrap_or(DEFAULT_WORKERS),
            )?,
        };
        let api_root = match args.api_root {
            Some(value) => value,
            None => env.string(
                "AQI_SAMPLER_API_ROOT",
                overrides
                    .api_root
                    .unwrap_or_else(|| DEFAULT_API_ROOT.to_string()),
            ),
        };
        let request_timeout_secs = match args.timeout_secs {
            Some(value) => value,
            None => env.u64(
                "AQI_SAMPLER_TIMEOUT_SECS",
                overrides.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            )?,
        };

        let token = args.token.trim().to_string();
        if token.is_empty() {
            bail!("API token must not be empty");
        }
        if pollutant.is_empty() {
            bail!("pollutant must not be empty");
        }
        if workers == 0 {
            bail!("workers must be at least 1");
        }
        if request_timeout_secs == 0 {
            bail!("request timeout must be at least 1 second");
        }
        validate_positive("sampling period", args.period)?;
        validate_positive("sampling rate", args.rate)?;
        let interval_secs = 60.0 / args.rate;
        if !interval_secs.is_finite() {
            bail!("sampling rate {} gives no usable interval", args.rate);
        }
        // Keep the SamplerError intact so main can map it to its exit code.
        rate_guard::check_requested_rate(args.rate)?;

        let bounds = args
            .bounds
            .parse::<BoundingBox>()
            .with_context(|| format!("invalid bounding box {:?}", args.bounds))?;
        let api = WaqiApi::new(&api_root, token).context("invalid API root")?;

        Ok(Self {
            api,
            bounds,
            period_minutes: args.period,
            rate_per_minute: args.rate,
            pollutant,
            workers,
            request_timeout_secs,
            json_output: args.json,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sampling_plan(&self) -> SamplingPlan {
        SamplingPlan {
            pollutant: self.pollutant.clone(),
            period_minutes: self.period_minutes,
            rate_per_minute: self.rate_per_minute,
        }
    }

    pub fn session_request(&self) -> SessionRequest {
        SessionRequest {
            bounds: self.bounds,
            plan: self.sampling_plan(),
        }
    }
}

fn validate_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        bail!("{name} must be a positive number, got {value}");
    }
    Ok(())
}

fn load_config_overrides(path: &Path) -> Option<ConfigOverrides> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read config overrides; using env defaults"
            );
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse config overrides; using env defaults"
            );
            None
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.optional(key).unwrap_or(default)
    }

    fn u64(&self, key: &str, default: u64) -> Result<u64> {
        match self.optional(key) {
            Some(value) => value
                .parse::<u64>()
                .with_context(|| format!("invalid {key}")),
            None => Ok(default),
        }
    }

    fn usize(&self, key: &str, default: usize) -> Result<usize> {
        match self.optional(key) {
            Some(value) => value
                .parse::<usize>()
                .map_err(|err| anyhow!("invalid {key}: {err}")),
            None => Ok(default),
        }
    }
}
