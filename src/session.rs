use crate::batch::BatchFetcher;
use crate::discovery::{discover_stations, Station};
use crate::error::{SamplerError, SamplerResult};
use crate::rate_guard;
use crate::sampling::{SamplingLoop, SamplingPlan, TickSummary};
use crate::transport::Transport;
use crate::waqi::{BoundingBox, WaqiApi};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub bounds: BoundingBox,
    pub plan: SamplingPlan,
}

/// A sampled station as it appears in the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportedStation {
    pub uid: i64,
    pub name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl From<&Station> for ReportedStation {
    fn from(station: &Station) -> Self {
        Self {
            uid: station.uid,
            name: station.name.clone(),
            lat: station.lat,
            lon: station.lon,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SamplingReport {
    pub pollutant: String,
    pub bounds: String,
    pub stations: Vec<ReportedStation>,
    pub ignored_stations: Vec<i64>,
    pub requests_per_second: f64,
    pub ticks: u64,
    pub average: f64,
    pub tick_summaries: Vec<TickSummary>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// The bounding box lists no stations at all; nothing to sample.
    NoStations,
    Completed(SamplingReport),
}

/// Runs one full session: rate pre-check, discovery (once), rate gate, then
/// sampling against the discovered station set.
pub async fn run_session<T: Transport>(
    fetcher: &BatchFetcher<T>,
    api: &WaqiApi,
    request: &SessionRequest,
) -> SamplerResult<SessionOutcome> {
    let plan = &request.plan;
    rate_guard::check_requested_rate(plan.rate_per_minute)?;
    let started_at = Utc::now();

    let discovery = discover_stations(fetcher, api, &request.bounds, &plan.pollutant).await?;
    if discovery.returned == 0 {
        return Ok(SessionOutcome::NoStations);
    }
    if discovery.eligible.is_empty() {
        return Err(SamplerError::NoEligibleStations(plan.pollutant.clone()));
    }
    tracing::info!(
        stations = discovery.eligible.len(),
        "there are {} valid stations in the requested area",
        discovery.eligible.len()
    );

    let assessment = rate_guard::check_station_rate(discovery.eligible.len(), plan.rate_per_minute)?;
    let outcome = SamplingLoop::new(fetcher, &discovery.eligible, plan)?
        .run()
        .await?;

    Ok(SessionOutcome::Completed(SamplingReport {
        pollutant: plan.pollutant.clone(),
        bounds: request.bounds.to_string(),
        stations: discovery.eligible.iter().map(ReportedStation::from).collect(),
        ignored_stations: discovery.ineligible.iter().map(|station| station.uid).collect(),
        requests_per_second: assessment.requests_per_second,
        ticks: outcome.session.tick_count,
        average: outcome.average,
        tick_summaries: outcome.ticks,
        started_at,
        finished_at: Utc::now(),
    }))
}
