/*!
 * Transfer engine and process-wide entry points
 *
 * [`Engine`] owns the Tokio runtime every transfer runs on, the shared HTTP
 * clients and the cancellation tree. The free functions [`init`],
 * [`uninit`], [`upload`] and [`download`] wrap one process-wide engine for
 * callers that hand over JSON parameter blocks.
 */

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::config::EngineConfig;
use crate::core::dispatch::{CallbackDispatcher, CallbackGate, ResultCallback, TransferResult};
use crate::core::progress::{ProgressAggregator, ProgressCallback};
use crate::core::request::{Direction, TransferRequest};
use crate::core::transfer::{execute, failure_message, TransferSettings};
use crate::error::{ErrorKind, Result, TransferError};
use crate::logging;
use crate::params::TransferParams;
use crate::protocol::s3::transport::{HttpTransport, Transport};

/// Reason delivered to callers that use the facade outside init/uninit
pub const NOT_INITIALIZED: &str = "engine not initialized";

/// Terminal message for a request that reached no running engine
///
/// Carries the configuration kind prefix like every other failure.
pub fn not_initialized_message() -> String {
    format!("{}: {}", ErrorKind::Configuration, NOT_INITIALIZED)
}

/// Caller's view of one submitted transfer
#[derive(Debug, Clone)]
pub struct TransferHandle {
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
}

impl TransferHandle {
    /// Request cancellation; the terminal callback still fires once
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the terminal result has been dispatched
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

/// HTTP transports shared by all transfers, one per CA bundle
struct TransportCache {
    connect_timeout: std::time::Duration,
    fixed: Option<Arc<dyn Transport>>,
    clients: Mutex<HashMap<Option<PathBuf>, Arc<dyn Transport>>>,
}

impl TransportCache {
    fn clients(&self) -> MutexGuard<'_, HashMap<Option<PathBuf>, Arc<dyn Transport>>> {
        match self.clients.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Shared transport for a CA bundle, building it on first use
    ///
    /// Reading the bundle and the platform roots is blocking file I/O, so
    /// the client is built on the blocking pool with the cache unlocked.
    async fn get(&self, ca_certs_path: Option<&Path>) -> Result<Arc<dyn Transport>> {
        if let Some(transport) = &self.fixed {
            return Ok(transport.clone());
        }

        let key = ca_certs_path.map(Path::to_path_buf);
        let cached = self.clients().get(&key).cloned();
        if let Some(transport) = cached {
            return Ok(transport);
        }

        let path = key.clone();
        let connect_timeout = self.connect_timeout;
        let built: Arc<dyn Transport> = Arc::new(
            tokio::task::spawn_blocking(move || {
                HttpTransport::new(path.as_deref(), connect_timeout)
            })
            .await
            .map_err(|e| TransferError::Config(format!("HTTP client setup failed: {}", e)))??,
        );

        // Two first uses may race; the first client stored wins
        let transport = self.clients().entry(key).or_insert(built).clone();
        debug!(ca_certs_path = ?ca_certs_path, "created HTTP client");
        Ok(transport)
    }
}

/// Runs transfers on a dedicated multi-threaded runtime
pub struct Engine {
    runtime: Option<Runtime>,
    config: EngineConfig,
    settings: TransferSettings,
    transports: Arc<TransportCache>,
    tracker: TaskTracker,
    root_cancel: CancellationToken,
    gate: Arc<CallbackGate>,
    _log_guard: Option<WorkerGuard>,
}

impl Engine {
    /// Start an engine talking to real endpoints
    pub fn start(config: EngineConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Start an engine whose transfers all go through `transport`
    pub fn with_transport(config: EngineConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::build(config, Some(transport))
    }

    fn build(config: EngineConfig, fixed: Option<Arc<dyn Transport>>) -> Result<Self> {
        config.validate()?;
        let log_guard = logging::init_logging(&config)?;
        logging::log_host_summary();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name("orbit-s3-worker")
            .enable_all()
            .build()
            .map_err(|e| TransferError::Config(format!("failed to start runtime: {}", e)))?;

        info!(
            worker_threads = config.worker_threads,
            chunk_size = config.effective_chunk_size(),
            "transfer engine started"
        );

        Ok(Self {
            runtime: Some(runtime),
            settings: TransferSettings::from_config(&config),
            transports: Arc::new(TransportCache {
                connect_timeout: config.connect_timeout(),
                fixed,
                clients: Mutex::new(HashMap::new()),
            }),
            tracker: TaskTracker::new(),
            root_cancel: CancellationToken::new(),
            gate: Arc::new(CallbackGate::new()),
            _log_guard: log_guard,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Upload `request.file_path` to the object
    ///
    /// `on_progress` receives non-decreasing fractions, ending with `1.0`
    /// right before a successful `on_result`.
    pub fn upload(
        &self,
        mut request: TransferRequest,
        on_result: ResultCallback,
        on_progress: Option<ProgressCallback>,
    ) -> TransferHandle {
        request.direction = Direction::Upload;
        self.submit(request, on_result, on_progress)
    }

    /// Download the object into `request.file_path`
    pub fn download(&self, mut request: TransferRequest, on_result: ResultCallback) -> TransferHandle {
        request.direction = Direction::Download;
        self.submit(request, on_result, None)
    }

    fn submit(
        &self,
        request: TransferRequest,
        on_result: ResultCallback,
        on_progress: Option<ProgressCallback>,
    ) -> TransferHandle {
        let handle = TransferHandle {
            cancel: self.root_cancel.child_token(),
            finished: Arc::new(AtomicBool::new(false)),
        };

        let progress = on_progress.map(|callback| {
            Arc::new(
                ProgressAggregator::new(callback, self.config.progress_min_delta)
                    .with_gate(self.gate.clone()),
            )
        });
        let mut dispatcher = CallbackDispatcher::new(on_result).with_gate(self.gate.clone());
        if let Some(progress) = &progress {
            dispatcher = dispatcher.with_progress(progress.clone());
        }

        let Some(runtime) = &self.runtime else {
            dispatcher.dispatch(TransferResult::failure(not_initialized_message()));
            handle.finished.store(true, Ordering::SeqCst);
            return handle;
        };

        let transports = self.transports.clone();
        let settings = self.settings.clone();
        let cancel = handle.cancel.clone();
        let finished = handle.finished.clone();

        runtime.spawn(self.tracker.track_future(async move {
            let result = match transports.get(request.ca_certs_path.as_deref()).await {
                Ok(transport) => execute(request, transport, &settings, progress, cancel).await,
                Err(e) => {
                    error!(error = %e, "no transport for request");
                    TransferResult::failure(failure_message(&e, 0, request.max_attempts))
                }
            };
            dispatcher.dispatch(result);
            finished.store(true, Ordering::SeqCst);
        }));

        handle
    }

    /// Transfers submitted and not yet finished
    pub fn active_transfers(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel every outstanding transfer and stop the runtime
    ///
    /// Cancelled transfers report their failure while this runs. Once it
    /// returns no callback fires again. Must not be called from inside a
    /// transfer callback.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };

        info!(active = self.tracker.len(), "shutting down transfer engine");
        self.root_cancel.cancel();
        self.tracker.close();

        let grace = self.config.shutdown_grace();
        let tracker = self.tracker.clone();
        let drain = async move { tokio::time::timeout(grace, tracker.wait()).await.is_ok() };

        // block_on panics on a thread that is already driving a runtime
        let drained = if tokio::runtime::Handle::try_current().is_ok() {
            std::thread::scope(|scope| {
                scope
                    .spawn(|| runtime.block_on(drain))
                    .join()
                    .unwrap_or(false)
            })
        } else {
            runtime.block_on(drain)
        };
        if !drained {
            warn!(
                remaining = self.tracker.len(),
                "transfers still running after shutdown grace period"
            );
        }

        self.gate.close();
        runtime.shutdown_background();
        info!("transfer engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

static ENGINE: Mutex<Option<Engine>> = Mutex::new(None);

fn global() -> MutexGuard<'static, Option<Engine>> {
    match ENGINE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Start the process-wide engine from a JSON init block
///
/// An empty block means defaults. Calling `init` again while an engine is
/// running is a no-op.
pub fn init(params: &str) -> Result<()> {
    let mut engine = global();
    if engine.is_some() {
        debug!("engine already initialized");
        return Ok(());
    }

    let config = if params.trim().is_empty() {
        EngineConfig::default()
    } else {
        EngineConfig::from_init_json(params)?
    };
    *engine = Some(Engine::start(config)?);
    Ok(())
}

/// Stop the process-wide engine, cancelling outstanding transfers
pub fn uninit() {
    // Released before shutting down so callbacks may still reach the facade
    let engine = global().take();
    if let Some(engine) = engine {
        engine.shutdown();
    }
}

/// Whether [`init`] has run without a matching [`uninit`]
pub fn is_initialized() -> bool {
    global().is_some()
}

/// Upload using a JSON parameter block
///
/// `on_result` fires exactly once, even when the parameters are invalid or
/// the engine is not running.
pub fn upload<R, P>(params: &str, on_result: R, on_progress: P)
where
    R: FnOnce(bool, String) + Send + 'static,
    P: Fn(f64) + Send + Sync + 'static,
{
    submit_json(
        params,
        Direction::Upload,
        Box::new(on_result),
        Some(Box::new(on_progress)),
    );
}

/// Download using a JSON parameter block
pub fn download<R>(params: &str, on_result: R)
where
    R: FnOnce(bool, String) + Send + 'static,
{
    submit_json(params, Direction::Download, Box::new(on_result), None);
}

fn submit_json(
    params: &str,
    direction: Direction,
    on_result: ResultCallback,
    on_progress: Option<ProgressCallback>,
) {
    let rejected = {
        let engine = global();
        match engine.as_ref() {
            None => Some(not_initialized_message()),
            Some(engine) => match parse_request(params, direction) {
                Ok(request) => {
                    match direction {
                        Direction::Upload => engine.upload(request, on_result, on_progress),
                        Direction::Download => engine.download(request, on_result),
                    };
                    return;
                }
                Err(e) => Some(failure_message(&e, 0, 0)),
            },
        }
    };

    // Fired with the engine lock released
    if let Some(message) = rejected {
        error!(%direction, %message, "transfer rejected");
        on_result(false, message);
    }
}

fn parse_request(params: &str, direction: Direction) -> Result<TransferRequest> {
    let params = TransferParams::from_json(params)?;
    debug!(?params, %direction, "transfer params");
    params.into_request(direction)
}
