mod session;


pub use session::SamplingSession;

use crate::batch::BatchFetcher;
use crate::discovery::Station;
use crate::error::{SamplerError, SamplerResult};
use crate::transport::{redact_url, Transport};
use crate::waqi::{self, ApiReply};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct SamplingPlan {
    pub pollutant: String,
    pub period_minutes: f64,
    pub rate_per_minute: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleEntry {
    Value { uid: i64, value: f64 },
    /// The station listed the pollutant but had no numeric reading this tick.
    Skipped { uid: i64 },
}

/// Readings gathered by one tick, in station order.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    pub tick: u64,
    pub entries: Vec<SampleEntry>,
}

impl SampleBatch {
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            SampleEntry::Value { value, .. } => Some(*value),
            SampleEntry::Skipped { .. } => None,
        })
    }

    pub fn mean(&self) -> Option<f64> {
        let (sum, count) = self
            .values()
            .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
        (count > 0).then(|| sum / count as f64)
    }

    pub fn skipped(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry, SampleEntry::Skipped { .. }))
            .count()
    }

    fn describe(&self) -> String {
        self.entries
            .iter()
            .map(|entry| match entry {
                SampleEntry::Value { uid, value } => format!("{uid}={value:.2}"),
                SampleEntry::Skipped { uid } => format!("{uid}=-"),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickSummary {
    pub tick: u64,
    pub latency_ms: f64,
    pub mean: f64,
    pub samples: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Done,
}

#[derive(Debug, Clone)]
pub struct SamplingOutcome {
    pub session: SamplingSession,
    pub ticks: Vec<TickSummary>,
    pub average: f64,
}

/// Samples a fixed station set once per tick until the period is covered.
///
/// Only one batch is in flight at a time; between ticks the loop sleeps for
/// the target interval minus the time the batch took.
pub struct SamplingLoop<'a, T> {
    fetcher: &'a BatchFetcher<T>,
    stations: &'a [Station],
    urls: Vec<String>,
    pollutant: String,
    session: SamplingSession,
    ticks: Vec<TickSummary>,
}

impl<'a, T: Transport> SamplingLoop<'a, T> {
    pub fn new(
        fetcher: &'a BatchFetcher<T>,
        stations: &'a [Station],
        plan: &SamplingPlan,
    ) -> SamplerResult<Self> {
        if stations.is_empty() {
            return Err(SamplerError::NoEligibleStations(plan.pollutant.clone()));
        }
        Ok(Self {
            fetcher,
            stations,
            urls: stations.iter().map(|station| station.feed_url.clone()).collect(),
            pollutant: plan.pollutant.clone(),
            session: SamplingSession::new(plan.period_minutes, plan.rate_per_minute),
            ticks: Vec::new(),
        })
    }

    pub fn session(&self) -> &SamplingSession {
        &self.session
    }

    pub fn ticks(&self) -> &[TickSummary] {
        &self.ticks
    }

    pub async fn run(mut self) -> SamplerResult<SamplingOutcome> {
        while self.tick().await? == LoopState::Running {}
        self.finish()
    }

    fn finish(self) -> SamplerResult<SamplingOutcome> {
        let average = self
            .session
            .final_average()
            .ok_or_else(|| SamplerError::EmptyTick {
                tick: self.session.tick_count,
                pollutant: self.pollutant.clone(),
            })?;
        tracing::info!(
            ticks = self.session.tick_count,
            average,
            pollutant = %self.pollutant,
            "sampling finished"
        );
        Ok(SamplingOutcome {
            session: self.session,
            ticks: self.ticks,
            average,
        })
    }

    pub async fn tick(&mut self) -> SamplerResult<LoopState> {
        let tick = self.session.tick_count + 1;
        let started = Instant::now();
        let results = self.fetcher.fetch_all(&self.urls).await;

        let mut entries = Vec::with_capacity(results.len());
        for (station, result) in self.stations.iter().zip(results) {
            entries.push(self.extract(station, result?)?);
        }
        let batch = SampleBatch { tick, entries };
        let tick_mean = batch.mean().ok_or_else(|| SamplerError::EmptyTick {
            tick,
            pollutant: self.pollutant.clone(),
        })?;
        self.session.record_tick(tick_mean);

        let latency = started.elapsed();
        tracing::info!(
            tick,
            latency_ms = latency.as_secs_f64() * 1000.0,
            mean = tick_mean,
            values = %batch.describe(),
            "collected samples"
        );
        self.ticks.push(TickSummary {
            tick,
            latency_ms: latency.as_secs_f64() * 1000.0,
            mean: tick_mean,
            samples: batch.entries.len() - batch.skipped(),
            skipped: batch.skipped(),
        });

        let interval_secs = self.session.target_interval_seconds;
        let sleep_secs = interval_secs - latency.as_secs_f64();
        if sleep_secs <= 0.0 {
            return Err(SamplerError::CadenceOverrun {
                latency_secs: latency.as_secs_f64(),
                interval_secs,
            });
        }
        tokio::time::sleep(Duration::try_from_secs_f64(sleep_secs).unwrap_or(Duration::MAX)).await;
        self.session.advance();

        Ok(if self.session.is_done() {
            LoopState::Done
        } else {
            LoopState::Running
        })
    }

    fn extract(&self, station: &Station, payload: serde_json::Value) -> SamplerResult<SampleEntry> {
        let feed = match waqi::decode_feed(&payload).map_err(|err| SamplerError::InvalidPayload {
            url: redact_url(&station.feed_url),
            message: err.to_string(),
        })? {
            ApiReply::Ok(feed) => feed,
            ApiReply::Error(message) => {
                return Err(SamplerError::Remote {
                    uid: station.uid,
                    message,
                })
            }
        };
        let reading = feed
            .reading(&self.pollutant)
            .ok_or_else(|| SamplerError::MissingPollutant {
                uid: station.uid,
                pollutant: self.pollutant.clone(),
            })?;
        Ok(match reading.value() {
            Some(value) => SampleEntry::Value {
                uid: station.uid,
                value,
            },
            None => SampleEntry::Skipped { uid: station.uid },
        })
    }
}
