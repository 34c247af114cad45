//! Shared fixtures for integration tests: stub transports, an in-memory
//! bucket and helpers for collecting callbacks.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};

use orbit_s3_transfer::config::{EngineConfig, RetryConfig};
use orbit_s3_transfer::core::{Direction, ProgressCallback, ResultCallback, TransferRequest};
use orbit_s3_transfer::protocol::s3::{RequestBody, Response, SignedRequest, Transport};
use orbit_s3_transfer::{Credentials, Result};

/// Engine settings with tiny backoff so retry tests run fast
pub fn test_config() -> EngineConfig {
    EngineConfig {
        worker_threads: 2,
        chunk_size: 64 * 1024,
        progress_min_delta: 0.0,
        retry: RetryConfig {
            initial_delay_ms: 1,
            max_delay_ms: 5,
            jitter_factor: 0.0,
        },
        shutdown_grace_secs: 5,
        ..Default::default()
    }
}

pub fn request(direction: Direction, key: &str, path: &Path, tries: u32) -> TransferRequest {
    TransferRequest::new(
        direction,
        "test-bucket",
        key,
        path,
        Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY"),
    )
    .with_region("us-east-1")
    .with_max_attempts(tries)
}

/// Deterministic pseudo-random payload
pub fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Everything a transfer reported, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Progress(f64),
    Result(bool, String),
}

/// Records callbacks and lets the test block until the result arrives
#[derive(Clone)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
    results: Arc<Mutex<Option<mpsc::Sender<()>>>>,
    done: Arc<Mutex<mpsc::Receiver<()>>>,
}

impl Recorder {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            results: Arc::new(Mutex::new(Some(tx))),
            done: Arc::new(Mutex::new(rx)),
        }
    }

    pub fn on_result(&self) -> ResultCallback {
        let events = self.events.clone();
        let results = self.results.clone();
        Box::new(move |success, message| {
            events.lock().unwrap().push(Event::Result(success, message));
            if let Some(tx) = results.lock().unwrap().as_ref() {
                let _ = tx.send(());
            }
        })
    }

    pub fn on_progress(&self) -> ProgressCallback {
        let events = self.events.clone();
        Box::new(move |fraction| {
            events.lock().unwrap().push(Event::Progress(fraction));
        })
    }

    /// Block until the terminal result arrives, returning it
    pub fn wait(&self, timeout: Duration) -> (bool, String) {
        self.done
            .lock()
            .unwrap()
            .recv_timeout(timeout)
            .expect("no terminal result before timeout");
        self.result().expect("result recorded")
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn result(&self) -> Option<(bool, String)> {
        self.events().into_iter().find_map(|e| match e {
            Event::Result(success, message) => Some((success, message)),
            Event::Progress(_) => None,
        })
    }

    pub fn result_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Result(..)))
            .count()
    }

    pub fn progress(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Progress(f) => Some(f),
                Event::Result(..) => None,
            })
            .collect()
    }
}

/// What a scripted transport does for one attempt
#[derive(Debug, Clone)]
pub enum Step {
    /// 2xx with the given body
    Ok(Vec<u8>),
    /// Error status with an S3 error document
    Status(u16, &'static str),
    /// Connection-level failure
    Network,
    /// Never answers
    Hang,
}

/// Plays back a fixed sequence of responses, repeating the last one
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Step>,
    calls: AtomicU32,
    requests: Mutex<Vec<SignedRequest>>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        let last = steps.last().cloned().unwrap_or(Step::Ok(Vec::new()));
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(last),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<SignedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Poll until `n` attempts have started
    pub fn wait_for_calls(&self, n: u32, timeout: Duration) {
        let deadline = std::time::Instant::now() + timeout;
        while self.calls() < n {
            assert!(
                std::time::Instant::now() < deadline,
                "only {} of {} attempts started",
                self.calls(),
                n
            );
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: SignedRequest, body: RequestBody) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        drain(body).await?;

        let step = {
            let mut steps = self.steps.lock().unwrap();
            steps
                .pop_front()
                .unwrap_or_else(|| self.last.lock().unwrap().clone())
        };

        match step {
            Step::Ok(data) => Ok(response(200, Vec::new(), data)),
            Step::Status(status, code) => Ok(response(
                status,
                Vec::new(),
                format!("<Error><Code>{}</Code><Message>scripted</Message></Error>", code)
                    .into_bytes(),
            )),
            Step::Network => Err(orbit_s3_transfer::TransferError::Network(
                "connection reset by peer".to_string(),
            )),
            Step::Hang => std::future::pending().await,
        }
    }
}

/// Pulls the request body at a fixed pace, then answers 200
pub struct SlowReader {
    pause: Duration,
    calls: AtomicU32,
}

impl SlowReader {
    pub fn new(pause: Duration) -> Arc<Self> {
        Arc::new(Self {
            pause,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for SlowReader {
    async fn send(&self, _request: SignedRequest, body: RequestBody) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let RequestBody::Stream { mut stream, .. } = body {
            while let Some(chunk) = stream.next().await {
                chunk?;
                tokio::time::sleep(self.pause).await;
            }
        }
        Ok(response(200, Vec::new(), Vec::new()))
    }
}

/// In-memory S3 bucket keyed by request path
#[derive(Default)]
pub struct MemoryBucket {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    puts: AtomicU32,
    gets: AtomicU32,
}

impl MemoryBucket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn puts(&self) -> u32 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> u32 {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryBucket {
    async fn send(&self, request: SignedRequest, body: RequestBody) -> Result<Response> {
        assert!(request
            .header("authorization")
            .is_some_and(|v| v.starts_with("AWS4-HMAC-SHA256 ")));
        let path = request
            .url
            .split_once("://")
            .and_then(|(_, rest)| rest.find('/').map(|i| rest[i..].to_string()))
            .unwrap_or_default();

        match request.method {
            orbit_s3_transfer::protocol::s3::Method::Put => {
                self.puts.fetch_add(1, Ordering::SeqCst);
                let data = drain(body).await?;
                let etag = format!("\"{:x}\"", md5::compute(&data));
                self.objects.lock().unwrap().insert(path, data);
                Ok(response(200, vec![("etag", etag)], Vec::new()))
            }
            orbit_s3_transfer::protocol::s3::Method::Get => {
                self.gets.fetch_add(1, Ordering::SeqCst);
                let found = self.objects.lock().unwrap().get(&path).cloned();
                match found {
                    Some(data) => {
                        let etag = format!("\"{:x}\"", md5::compute(&data));
                        Ok(response(200, vec![("etag", etag)], data))
                    }
                    None => Ok(response(
                        404,
                        Vec::new(),
                        b"<Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message></Error>"
                            .to_vec(),
                    )),
                }
            }
        }
    }
}

async fn drain(body: RequestBody) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    if let RequestBody::Stream { mut stream, .. } = body {
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }
    }
    Ok(data)
}

/// Response whose body arrives in 4 KiB pieces
fn response(status: u16, headers: Vec<(&str, String)>, body: Vec<u8>) -> Response {
    let mut headers: Vec<(String, String)> = headers
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    headers.push(("content-length".to_string(), body.len().to_string()));

    let chunks: Vec<Result<Bytes>> = body
        .chunks(4096)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    Response {
        status,
        headers,
        body: stream::iter(chunks).boxed(),
    }
}
