use crate::error::TransportError;
use crate::transport::Transport;
use futures::stream::{self, StreamExt};
use serde_json::Value as JsonValue;

pub const DEFAULT_WORKERS: usize = 16;

/// Outcome of one request in a batch: `Ok` carries the decoded payload,
/// `Err` the captured transport failure.
pub type FetchResult = Result<JsonValue, TransportError>;

/// Runs independent GETs with at most `workers` requests in flight.
pub struct BatchFetcher<T> {
    transport: T,
    workers: usize,
}

impl<T: Transport> BatchFetcher<T> {
    pub fn new(transport: T, workers: usize) -> Self {
        Self {
            transport,
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetches every URL and returns one result per URL, in input order.
    ///
    /// A failing request never stops the others; its slot holds the error.
    /// A new request starts as soon as any in-flight one finishes, so a slow
    /// URL early in the list only holds its own worker.
    pub async fn fetch_all(&self, urls: &[String]) -> Vec<FetchResult> {
        tracing::trace!(count = urls.len(), workers = self.workers, "dispatching batch");
        let mut slots: Vec<Option<FetchResult>> = urls.iter().map(|_| None).collect();
        let mut completed = stream::iter(urls.iter().enumerate())
            .map(|(idx, url)| async move { (idx, self.transport.fetch(url).await) })
            .buffer_unordered(self.workers);
        while let Some((idx, result)) = completed.next().await {
            slots[idx] = Some(result);
        }
        slots.into_iter().flatten().collect()
    }
}
