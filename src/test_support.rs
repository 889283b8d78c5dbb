use crate::discovery::Station;
use crate::error::TransportError;
use crate::transport::Transport;
use crate::waqi::WaqiApi;
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

pub const TEST_ROOT: &str = "https://stub.test";
pub const TEST_TOKEN: &str = "test-token";

pub fn test_api() -> WaqiApi {
    WaqiApi::new(TEST_ROOT, TEST_TOKEN).expect("stub api root")
}

pub fn station(uid: i64) -> Station {
    Station {
        uid,
        feed_url: test_api().feed_url(uid),
        name: None,
        lat: None,
        lon: None,
    }
}

pub fn feed_ok(pollutant: &str, value: f64) -> JsonValue {
    json!({
        "status": "ok",
        "data": { "idx": 1, "iaqi": { pollutant: { "v": value }, "t": { "v": 21.0 } } }
    })
}

pub fn feed_without(pollutant: &str) -> JsonValue {
    let other = if pollutant == "pm10" { "o3" } else { "pm10" };
    json!({
        "status": "ok",
        "data": { "idx": 1, "iaqi": { other: { "v": 5.0 } } }
    })
}

pub fn api_error(message: &str) -> JsonValue {
    json!({ "status": "error", "data": message })
}

pub fn bounds_ok(uids: &[i64]) -> JsonValue {
    let stations: Vec<JsonValue> = uids
        .iter()
        .map(|uid| json!({ "uid": uid, "lat": 1.0, "lon": 2.0, "station": { "name": format!("station {uid}") } }))
        .collect();
    json!({ "status": "ok", "data": stations })
}

#[derive(Clone)]
enum StubReply {
    Body(JsonValue),
    Status(u16),
}

/// Scripted transport. Each URL answers from a queue of replies; the last
/// reply repeats once the queue is down to one entry.
#[derive(Default)]
pub struct StubTransport {
    replies: Mutex<HashMap<String, VecDeque<StubReply>>>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    requests: Mutex<Vec<String>>,
    dispatched: Mutex<Vec<(String, Instant)>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, url: &str, reply: StubReply) -> Self {
        self.replies
            .lock()
            .expect("stub replies lock")
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn respond(self, url: &str, body: JsonValue) -> Self {
        self.push(url, StubReply::Body(body))
    }

    pub fn fail(self, url: &str, status: u16) -> Self {
        self.push(url, StubReply::Status(status))
    }

    pub fn delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("stub requests lock").clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("stub requests lock").len()
    }

    pub fn requests_to(&self, url: &str) -> usize {
        self.requests().iter().filter(|req| req.as_str() == url).count()
    }

    /// URL and start time of every request, in dispatch order.
    pub fn dispatch_log(&self) -> Vec<(String, Instant)> {
        self.dispatched.lock().expect("stub dispatch lock").clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, url: &str) -> Option<StubReply> {
        let mut replies = self.replies.lock().expect("stub replies lock");
        let queue = replies.get_mut(url)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl Transport for StubTransport {
    async fn fetch(&self, url: &str) -> Result<JsonValue, TransportError> {
        self.requests
            .lock()
            .expect("stub requests lock")
            .push(url.to_string());
        self.dispatched
            .lock()
            .expect("stub dispatch lock")
            .push((url.to_string(), Instant::now()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delays.get(url).copied().unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.next_reply(url) {
            Some(StubReply::Body(body)) => Ok(body),
            Some(StubReply::Status(status)) => Err(TransportError::Status {
                url: url.to_string(),
                status,
            }),
            None => Err(TransportError::Request {
                url: url.to_string(),
                message: "no stub reply configured".to_string(),
            }),
        }
    }
}

/// In-memory sink for `tracing` output, installed as the thread's default
/// subscriber for as long as the returned guard lives.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn install() -> (Self, DefaultGuard) {
        let logs = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (logs, guard)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("log buffer lock")).into_owned()
    }

    /// Lines at `WARN` level.
    pub fn warnings(&self) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains("WARN"))
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log buffer lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
