//! The "fetch URL -> JSON payload" collaborator.

use crate::error::TransportError;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::time::Duration;
use url::Url;

const TOKEN_PARAM: &str = "token";
const REDACTED: &str = "***";

/// Fetches a URL and decodes the body as JSON.
///
/// Implementations only report transport-level outcomes; interpreting the
/// payload (`status`, `data`) is left to the caller.
pub trait Transport: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<JsonValue, TransportError>> + Send;
}

/// Transport backed by one explicitly constructed `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("aqi-sampler/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| TransportError::Request {
                url: String::new(),
                message: format!("failed to create HTTP client: {err}"),
            })?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    async fn fetch(&self, url: &str) -> Result<JsonValue, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| TransportError::Request {
                url: redact_url(url),
                message: err.without_url().to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: redact_url(url),
                status: status.as_u16(),
            });
        }

        response
            .json::<JsonValue>()
            .await
            .map_err(|err| TransportError::Decode {
                url: redact_url(url),
                message: err.without_url().to_string(),
            })
    }
}

/// Replaces the API token in a request URL so it can be logged.
pub fn redact_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return "<unparseable url>".to_string();
    };
    if !url.query_pairs().any(|(key, _)| key == TOKEN_PARAM) {
        return url.to_string();
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == TOKEN_PARAM {
                REDACTED.to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();
    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.to_string()
}
