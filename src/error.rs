use thiserror::Error;

/// Failure of a single fetch at the network layer.
///
/// URLs carried here are already redacted (see [`crate::transport::redact_url`]).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("{url} returned a body that is not JSON: {message}")]
    Decode { url: String, message: String },
}

/// Fatal session errors. Each kind maps to its own exit code.
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("API error while querying the bounding box: {0}")]
    Discovery(String),

    #[error(
        "sampling rate {sampling_rate}/min needs ~{requests_per_second:.1} req/s, \
         which is too high for the API to keep up; choose a smaller sampling rate"
    )]
    RateLimitExceeded {
        sampling_rate: f64,
        requests_per_second: f64,
    },

    #[error("station {uid} returned an API error: {message}")]
    Remote { uid: i64, message: String },

    #[error("station {uid} stopped reporting {pollutant} after it was discovered")]
    MissingPollutant { uid: i64, pollutant: String },

    #[error(
        "API requests taking too long ({latency_secs:.3}s for a {interval_secs:.3}s interval); \
         please decrease the sampling rate"
    )]
    CadenceOverrun {
        latency_secs: f64,
        interval_secs: f64,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unexpected payload from {url}: {message}")]
    InvalidPayload { url: String, message: String },

    #[error("no station in the requested area reports {0}")]
    NoEligibleStations(String),

    #[error("tick {tick} produced no numeric {pollutant} values")]
    EmptyTick { tick: u64, pollutant: String },
}

impl SamplerError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::RateLimitExceeded { .. } | Self::CadenceOverrun { .. } => 2,
            Self::Discovery(_) | Self::NoEligibleStations(_) => 3,
            Self::Remote { .. } | Self::MissingPollutant { .. } | Self::EmptyTick { .. } => 4,
            Self::Transport(_) | Self::InvalidPayload { .. } => 5,
        }
    }
}

pub type SamplerResult<T> = Result<T, SamplerError>;
