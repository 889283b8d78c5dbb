use crate::batch::BatchFetcher;
use crate::error::{SamplerError, SamplerResult};
use crate::transport::{redact_url, Transport};
use crate::waqi::{self, ApiReply, BoundingBox, WaqiApi};
use std::collections::HashSet;
use std::fmt;

/// A reporting station found inside the bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub uid: i64,
    pub feed_url: String,
    pub name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IneligibleReason {
    MissingPollutant,
    ProbeError(String),
    MalformedProbe(String),
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPollutant => write!(f, "pollutant not reported"),
            Self::ProbeError(message) => write!(f, "feed returned an error: {message}"),
            Self::MalformedProbe(message) => write!(f, "feed payload not understood: {message}"),
        }
    }
}

/// A station dropped during discovery. Expected and non-fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct IneligibleStation {
    pub uid: i64,
    pub reason: IneligibleReason,
}

#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Stations listed by the bounding-box query (after dropping duplicate uids).
    pub returned: usize,
    pub eligible: Vec<Station>,
    pub ineligible: Vec<IneligibleStation>,
}

impl Discovery {
    pub fn feed_urls(&self) -> Vec<String> {
        self.eligible
            .iter()
            .map(|station| station.feed_url.clone())
            .collect()
    }
}

/// Queries the bounding box once, probes every listed station's feed once, and
/// keeps the stations whose feed reports `pollutant`.
///
/// A bounding box with no stations is not an error: the result is simply empty.
pub async fn discover_stations<T: Transport>(
    fetcher: &BatchFetcher<T>,
    api: &WaqiApi,
    bounds: &BoundingBox,
    pollutant: &str,
) -> SamplerResult<Discovery> {
    let bounds_url = api.bounds_url(bounds);
    let payload = fetcher.transport().fetch(&bounds_url).await?;
    let listed = match waqi::decode_bounds(&payload).map_err(|err| SamplerError::InvalidPayload {
        url: redact_url(&bounds_url),
        message: err.to_string(),
    })? {
        ApiReply::Ok(listed) => listed,
        ApiReply::Error(message) => return Err(SamplerError::Discovery(message)),
    };

    let mut seen = HashSet::new();
    let candidates: Vec<Station> = listed
        .into_iter()
        .filter(|entry| seen.insert(entry.uid))
        .map(|entry| Station {
            uid: entry.uid,
            feed_url: api.feed_url(entry.uid),
            name: entry.station.and_then(|info| info.name),
            lat: entry.lat,
            lon: entry.lon,
        })
        .collect();

    if candidates.is_empty() {
        tracing::info!(%bounds, "bounding box query returned no stations");
        return Ok(Discovery::default());
    }

    let urls: Vec<String> = candidates
        .iter()
        .map(|station| station.feed_url.clone())
        .collect();
    let probes = fetcher.fetch_all(&urls).await;

    let mut discovery = Discovery {
        returned: candidates.len(),
        ..Discovery::default()
    };
    for (station, probe) in candidates.into_iter().zip(probes) {
        let payload = probe?;
        let verdict = match waqi::decode_feed(&payload) {
            Ok(ApiReply::Ok(feed)) if feed.reports(pollutant) => None,
            Ok(ApiReply::Ok(_)) => Some(IneligibleReason::MissingPollutant),
            Ok(ApiReply::Error(message)) => Some(IneligibleReason::ProbeError(message)),
            Err(err) => Some(IneligibleReason::MalformedProbe(err.to_string())),
        };
        match verdict {
            None => {
                tracing::debug!(
                    uid = station.uid,
                    name = station.name.as_deref().unwrap_or("-"),
                    lat = station.lat,
                    lon = station.lon,
                    "station eligible"
                );
                discovery.eligible.push(station);
            }
            Some(reason) => {
                tracing::warn!(
                    uid = station.uid,
                    name = station.name.as_deref().unwrap_or("-"),
                    pollutant,
                    %reason,
                    "ignoring station"
                );
                discovery.ineligible.push(IneligibleStation {
                    uid: station.uid,
                    reason,
                });
            }
        }
    }

    tracing::info!(
        returned = discovery.returned,
        eligible = discovery.eligible.len(),
        pollutant,
        "station discovery finished"
    );
    Ok(discovery)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        api_error, bounds_ok, feed_ok, feed_without, test_api, CapturedLogs, StubTransport,
    };
    use serde_json::json;

    fn bounds() -> BoundingBox {
        "39.37,116.09,40.23,116.78".parse().unwrap()
    }

    #[tokio::test]
    async fn drops_station_missing_pollutant() {
        let api = test_api();
        let transport = StubTransport::new()
            .respond(&api.bounds_url(&bounds()), bounds_ok(&[11, 22]))
            .respond(&api.feed_url(11), feed_ok("pm25", 30.0))
            .respond(&api.feed_url(22), feed_without("pm25"));
        let fetcher = BatchFetcher::new(transport, 4);

        let discovery = discover_stations(&fetcher, &api, &bounds(), "pm25")
            .await
            .unwrap();

        assert_eq!(discovery.returned, 2);
        assert_eq!(discovery.eligible.len(), 1);
        assert_eq!(discovery.eligible[0].uid, 11);
        assert_eq!(discovery.eligible[0].name.as_deref(), Some("station 11"));
        assert_eq!(discovery.eligible[0].lat, Some(1.0));
        assert_eq!(discovery.eligible[0].lon, Some(2.0));
        assert_eq!(discovery.eligible[0].feed_url, api.feed_url(11));
        assert_eq!(
            discovery.ineligible,
            vec![IneligibleStation {
                uid: 22,
                reason: IneligibleReason::MissingPollutant
            }]
        );
    }

    #[tokio::test]
    async fn dropped_station_is_announced_with_its_uid() {
        let api = test_api();
        let transport = StubTransport::new()
            .respond(&api.bounds_url(&bounds()), bounds_ok(&[11, 22]))
            .respond(&api.feed_url(11), feed_ok("pm25", 30.0))
            .respond(&api.feed_url(22), feed_without("pm25"));
        let fetcher = BatchFetcher::new(transport, 4);
        let (logs, _guard) = CapturedLogs::install();

        discover_stations(&fetcher, &api, &bounds(), "pm25")
            .await
            .unwrap();

        let warnings = logs.warnings();
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert!(warnings[0].contains("ignoring station"), "{}", warnings[0]);
        assert!(warnings[0].contains("uid=22"), "{}", warnings[0]);
        assert!(warnings[0].contains("station 22"), "{}", warnings[0]);
        assert!(logs.contents().contains("uid=11"));
    }

    #[tokio::test]
    async fn bounds_error_fails_before_any_feed_request() {
        let api = test_api();
        let transport =
            StubTransport::new().respond(&api.bounds_url(&bounds()), api_error("Invalid key"));
        let fetcher = BatchFetcher::new(transport, 4);

        let err = discover_stations(&fetcher, &api, &bounds(), "pm25")
            .await
            .unwrap_err();

        assert!(matches!(err, SamplerError::Discovery(ref msg) if msg == "Invalid key"));
        assert_eq!(fetcher.transport().request_count(), 1);
    }

    #[tokio::test]
    async fn empty_bounding_box_is_not_an_error() {
        let api = test_api();
        let transport = StubTransport::new().respond(&api.bounds_url(&bounds()), bounds_ok(&[]));
        let fetcher = BatchFetcher::new(transport, 4);

        let discovery = discover_stations(&fetcher, &api, &bounds(), "pm25")
            .await
            .unwrap();

        assert_eq!(discovery.returned, 0);
        assert!(discovery.eligible.is_empty());
        assert_eq!(fetcher.transport().request_count(), 1);
    }

    #[tokio::test]
    async fn probe_error_status_makes_station_ineligible() {
        let api = test_api();
        let transport = StubTransport::new()
            .respond(&api.bounds_url(&bounds()), bounds_ok(&[1, 2]))
            .respond(&api.feed_url(1), api_error("Unknown station"))
            .respond(&api.feed_url(2), json!({ "status": "ok", "data": "garbled" }));
        let fetcher = BatchFetcher::new(transport, 4);

        let discovery = discover_stations(&fetcher, &api, &bounds(), "pm25")
            .await
            .unwrap();

        assert!(discovery.eligible.is_empty());
        assert_eq!(
            discovery.ineligible[0].reason,
            IneligibleReason::ProbeError("Unknown station".to_string())
        );
        assert!(matches!(
            discovery.ineligible[1].reason,
            IneligibleReason::MalformedProbe(_)
        ));
    }

    #[tokio::test]
    async fn probe_transport_failure_is_fatal() {
        let api = test_api();
        let transport = StubTransport::new()
            .respond(&api.bounds_url(&bounds()), bounds_ok(&[1, 2]))
            .respond(&api.feed_url(1), feed_ok("pm25", 1.0))
            .fail(&api.feed_url(2), 503);
        let fetcher = BatchFetcher::new(transport, 4);

        let err = discover_stations(&fetcher, &api, &bounds(), "pm25")
            .await
            .unwrap_err();

        assert!(matches!(err, SamplerError::Transport(_)));
    }

    #[tokio::test]
    async fn duplicate_uids_are_probed_once() {
        let api = test_api();
        let transport = StubTransport::new()
            .respond(&api.bounds_url(&bounds()), bounds_ok(&[5, 5, 6]))
            .respond(&api.feed_url(5), feed_ok("pm25", 1.0))
            .respond(&api.feed_url(6), feed_ok("pm25", 2.0));
        let fetcher = BatchFetcher::new(transport, 4);

        let discovery = discover_stations(&fetcher, &api, &bounds(), "pm25")
            .await
            .unwrap();

        assert_eq!(discovery.returned, 2);
        assert_eq!(fetcher.transport().requests_to(&api.feed_url(5)), 1);
        assert_eq!(discovery.feed_urls(), vec![api.feed_url(5), api.feed_url(6)]);
    }

    #[tokio::test]
    async fn eligible_stations_are_a_subset_that_report_the_pollutant() {
        let api = test_api();
        // Every pattern of reporting / not reporting over four stations.
        for mask in 0u8..16 {
            let uids: Vec<i64> = (1..=4).collect();
            let mut transport =
                StubTransport::new().respond(&api.bounds_url(&bounds()), bounds_ok(&uids));
            for (bit, uid) in uids.iter().enumerate() {
                let payload = if mask & (1 << bit) != 0 {
                    feed_ok("no2", 3.0)
                } else {
                    feed_without("no2")
                };
                transport = transport.respond(&api.feed_url(*uid), payload);
            }
            let fetcher = BatchFetcher::new(transport, 2);

            let discovery = discover_stations(&fetcher, &api, &bounds(), "no2")
                .await
                .unwrap();

            assert!(discovery.eligible.len() <= discovery.returned);
            assert_eq!(discovery.eligible.len(), mask.count_ones() as usize);
            assert_eq!(
                discovery.eligible.len() + discovery.ineligible.len(),
                discovery.returned
            );
            for station in &discovery.eligible {
                let bit = station.uid - 1;
                assert!(mask & (1 << bit) != 0);
            }
        }
    }
}
