//! Pre-flight check of the request rate a session would put on the API.

use crate::error::{SamplerError, SamplerResult};

/// Above this estimated request rate the session is refused.
pub const REJECT_REQUESTS_PER_SECOND: f64 = 1000.0;
/// Above this estimated request rate the session runs with a warning.
pub const WARN_REQUESTS_PER_SECOND: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateVerdict {
    Proceed,
    Warn,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateAssessment {
    pub requests_per_second: f64,
    pub verdict: RateVerdict,
}

pub fn estimated_requests_per_second(station_count: usize, rate_per_minute: f64) -> f64 {
    (rate_per_minute / 60.0) * station_count as f64
}

fn classify(requests_per_second: f64) -> RateVerdict {
    if requests_per_second > REJECT_REQUESTS_PER_SECOND {
        RateVerdict::Reject
    } else if requests_per_second > WARN_REQUESTS_PER_SECOND {
        RateVerdict::Warn
    } else {
        RateVerdict::Proceed
    }
}

pub fn assess(station_count: usize, rate_per_minute: f64) -> RateAssessment {
    let requests_per_second = estimated_requests_per_second(station_count, rate_per_minute);
    RateAssessment {
        requests_per_second,
        verdict: classify(requests_per_second),
    }
}

/// Gate applied once the eligible station count is known.
pub fn check_station_rate(station_count: usize, rate_per_minute: f64) -> SamplerResult<RateAssessment> {
    let assessment = assess(station_count, rate_per_minute);
    match assessment.verdict {
        RateVerdict::Reject => Err(SamplerError::RateLimitExceeded {
            sampling_rate: rate_per_minute,
            requests_per_second: assessment.requests_per_second,
        }),
        RateVerdict::Warn => {
            tracing::warn!(
                sampling_rate = rate_per_minute,
                requests_per_second = assessment.requests_per_second,
                station_count,
                "sampling rate is nearly too high for the API to keep up; consider lowering it"
            );
            Ok(assessment)
        }
        RateVerdict::Proceed => Ok(assessment),
    }
}

/// Gate applied to the requested rate alone, before discovery knows how many
/// stations there are.
pub fn check_requested_rate(rate_per_minute: f64) -> SamplerResult<()> {
    let requests_per_second = rate_per_minute / 60.0;
    if requests_per_second > REJECT_REQUESTS_PER_SECOND {
        return Err(SamplerError::RateLimitExceeded {
            sampling_rate: rate_per_minute,
            requests_per_second,
        });
    }
    Ok(())
}
