//! WAQI (`api.waqi.info`) endpoints and response shapes.
//!
//! Both endpoints answer `{"status": "ok", "data": ...}` on success and
//! `{"status": "error", "data": "<message>"}` (older deployments use a
//! `message` field instead) on failure, usually with HTTP 200.

use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_ROOT: &str = "https://api.waqi.info";
pub const DEFAULT_POLLUTANT: &str = "pm25";

/// Two lat/lng corners, `lat1,lng1,lat2,lng2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lat1: f64,
    pub lng1: f64,
    pub lat2: f64,
    pub lng2: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum BoundingBoxError {
    #[error("expected 4 comma separated coordinates (lat1,lng1,lat2,lng2), got {0}")]
    Arity(usize),
    #[error("coordinate {0:?} is not a valid decimal number")]
    Coordinate(String),
}

impl FromStr for BoundingBox {
    type Err = BoundingBoxError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(BoundingBoxError::Arity(parts.len()));
        }
        let mut coords = [0.0f64; 4];
        for (slot, part) in coords.iter_mut().zip(&parts) {
            *slot = part
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| BoundingBoxError::Coordinate(part.to_string()))?;
        }
        Ok(Self {
            lat1: coords[0],
            lng1: coords[1],
            lat2: coords[2],
            lng2: coords[3],
        })
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.lat1, self.lng1, self.lat2, self.lng2)
    }
}

#[derive(Debug, Error)]
pub enum ApiRootError {
    #[error("invalid API root {root:?}: {source}")]
    Parse {
        root: String,
        source: url::ParseError,
    },
    #[error("API root {0:?} must be an http(s) URL")]
    Scheme(String),
}

/// Builds request URLs for one API root and token.
#[derive(Clone)]
pub struct WaqiApi {
    root: Url,
    token: String,
}

impl fmt::Debug for WaqiApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaqiApi")
            .field("root", &self.root.as_str())
            .field("token", &"***")
            .finish()
    }
}

impl WaqiApi {
    pub fn new(root: &str, token: impl Into<String>) -> Result<Self, ApiRootError> {
        let trimmed = root.trim().trim_end_matches('/');
        let root_url = Url::parse(trimmed).map_err(|source| ApiRootError::Parse {
            root: root.to_string(),
            source,
        })?;
        if !matches!(root_url.scheme(), "http" | "https") || root_url.cannot_be_a_base() {
            return Err(ApiRootError::Scheme(root.to_string()));
        }
        Ok(Self {
            root: root_url,
            token: token.into(),
        })
    }

    pub fn root(&self) -> &str {
        self.root.as_str()
    }

    pub fn bounds_url(&self, bounds: &BoundingBox) -> String {
        let mut url = self.endpoint(&["map", "bounds"]);
        url.query_pairs_mut()
            .append_pair("token", &self.token)
            .append_pair("latlng", &bounds.to_string());
        url.into()
    }

    pub fn feed_url(&self, uid: i64) -> String {
        let station = format!("@{uid}");
        let mut url = self.endpoint(&["feed", &station, ""]);
        url.query_pairs_mut().append_pair("token", &self.token);
        url.into()
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.root.clone();
        // http(s) roots always have a path; checked in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum Envelope<T> {
    Ok {
        data: T,
    },
    Error {
        #[serde(default)]
        data: Option<JsonValue>,
        #[serde(default)]
        message: Option<String>,
    },
}

/// Decoded `status` of a WAQI response.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiReply<T> {
    Ok(T),
    Error(String),
}

fn decode<T>(payload: &JsonValue) -> Result<ApiReply<T>, serde_json::Error>
where
    T: for<'de> Deserialize<'de>,
{
    match Envelope::<T>::deserialize(payload)? {
        Envelope::Ok { data } => Ok(ApiReply::Ok(data)),
        Envelope::Error { data, message } => {
            let text = match data {
                Some(JsonValue::String(text)) => Some(text),
                _ => message,
            };
            Ok(ApiReply::Error(
                text.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawUid {
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoundsStation {
    #[serde(deserialize_with = "deserialize_uid")]
    pub uid: i64,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub station: Option<BoundsStationInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoundsStationInfo {
    #[serde(default)]
    pub name: Option<String>,
}

fn deserialize_uid<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match RawUid::deserialize(deserializer)? {
        RawUid::Int(uid) => Ok(uid),
        RawUid::Str(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| serde::de::Error::custom(format!("station uid {raw:?} is not an integer"))),
    }
}

pub fn decode_bounds(payload: &JsonValue) -> Result<ApiReply<Vec<BoundsStation>>, serde_json::Error> {
    decode(payload)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedData {
    #[serde(default)]
    pub iaqi: BTreeMap<String, IaqiReading>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IaqiReading {
    #[serde(default)]
    v: Option<RawReading>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawReading {
    Num(f64),
    Str(String),
}

impl IaqiReading {
    /// Numeric reading; stations sometimes publish `"-"` for a channel that is
    /// listed but currently has no value.
    pub fn value(&self) -> Option<f64> {
        let value = match self.v.as_ref()? {
            RawReading::Num(v) => Some(*v),
            RawReading::Str(raw) => raw.trim().parse::<f64>().ok(),
        };
        value.filter(|v| v.is_finite())
    }
}

impl FeedData {
    pub fn reports(&self, pollutant: &str) -> bool {
        self.iaqi.contains_key(pollutant)
    }

    pub fn reading(&self, pollutant: &str) -> Option<&IaqiReading> {
        self.iaqi.get(pollutant)
    }
}

pub fn decode_feed(payload: &JsonValue) -> Result<ApiReply<FeedData>, serde_json::Error> {
    decode(payload)
}
