//! Unix domain socket server for IPC
//!
//! Provides request-response control of the engine, and turns subscribed
//! connections into a stream of engine events.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::engine::{CaptureError, Engine};
use crate::replay::{ReplayDispatch, ReplayError, ReplayHandle, ReplayPolicy, ReplayReport};

use super::protocol::{DaemonStatus, Request, Response, MAX_FRAME_LEN};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    engine: Arc<Engine>,
    state: Arc<Mutex<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Shared server state
struct ServerState {
    start_time: Instant,
    /// Handle of the most recently started replay, joined on shutdown
    replay: Option<ReplayHandle>,
}

impl Server {
    /// Bind the socket and create a server driving `engine`
    pub fn new(socket_path: &Path, engine: Arc<Engine>) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Owner-only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(Mutex::new(ServerState {
            start_time: Instant::now(),
            replay: None,
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            engine,
            state,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let engine = Arc::clone(&self.engine);
                    let state = Arc::clone(&self.state);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, engine, state) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(
        mut stream: UnixStream,
        engine: Arc<Engine>,
        state: Arc<Mutex<ServerState>>,
    ) -> Result<()> {
        loop {
            let Some(frame) = read_frame(&mut stream).await? else {
                debug!("client disconnected");
                return Ok(());
            };

            let request: Request = match serde_json::from_slice(&frame) {
                Ok(request) => request,
                Err(e) => {
                    warn!(?e, "failed to parse request");
                    send_message(&mut stream, &Response::error("invalid_request", e.to_string()))
                        .await?;
                    continue;
                }
            };

            debug!(?request, "received request");

            if request == Request::Subscribe {
                // Subscribe before confirming so no event slips between the two
                let events = engine.subscribe();
                send_message(&mut stream, &Response::Subscribed).await?;
                debug!("client subscribed to notifications");
                return Self::stream_events(stream, events).await;
            }

            let response = Self::process_request(request, &engine, &state).await;
            send_message(&mut stream, &response).await?;
        }
    }

    /// Forward engine events to a subscribed client until either side closes
    async fn stream_events(
        mut stream: UnixStream,
        mut events: broadcast::Receiver<crate::events::EngineEvent>,
    ) -> Result<()> {
        loop {
            match events.recv().await {
                Ok(event) => {
                    send_message(&mut stream, &Response::Event { event }).await?;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }

    /// Process a request and return a response
    async fn process_request(
        request: Request,
        engine: &Arc<Engine>,
        state: &Arc<Mutex<ServerState>>,
    ) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let uptime_secs = state.lock().await.start_time.elapsed().as_secs();
                Response::Status(DaemonStatus {
                    state: engine.state(),
                    recorded_actions: engine.last_recording().len(),
                    uptime_secs,
                    ..DaemonStatus::default()
                })
            }

            Request::StartCapture => match blocking(engine, |engine| engine.start_capture()).await
            {
                Ok(Ok(())) => Response::CaptureStarted,
                Ok(Err(e)) => capture_error(&e),
                Err(e) => e,
            },

            Request::StopCapture => match blocking(engine, |engine| engine.stop_capture()).await {
                Ok(sequence) => Response::CaptureStopped {
                    actions: sequence.len(),
                    duration_ms: sequence.span().as_millis() as u64,
                },
                Err(e) => e,
            },

            Request::Replay {
                iterations,
                stop_key,
            } => {
                let policy = ReplayPolicy::from_iterations(iterations);
                let dispatch = blocking(engine, move |engine| {
                    let sequence = engine.last_recording();
                    engine.replay(&sequence, policy, stop_key.as_deref())
                })
                .await;

                match dispatch {
                    Ok(Ok(ReplayDispatch::Started(handle))) => {
                        let previous = state.lock().await.replay.replace(handle);
                        if let Some(previous) = previous {
                            reap(previous);
                        }
                        Response::ReplayStarted
                    }
                    Ok(Ok(ReplayDispatch::CancelledActive)) => Response::ReplayCancelled,
                    Ok(Err(e)) => replay_error(&e),
                    Err(e) => e,
                }
            }

            Request::Cancel => Response::Cancelled {
                active: engine.cancel(),
            },

            Request::Subscribe => Response::Subscribed,
        }
    }

    /// Gracefully shutdown the server
    ///
    /// Stops the engine, waits for the last replay worker and removes the
    /// socket file.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        let handle = self.state.lock().await.replay.take();
        let engine = Arc::clone(&self.engine);
        let stopped = tokio::task::spawn_blocking(move || {
            engine.shutdown();
            handle.map(settle)
        })
        .await;

        match stopped {
            Ok(Some(Ok(report))) => info!(%report, "replay stopped"),
            Ok(Some(Err(e))) => warn!(code = error_code(&e), %e, "replay ended with an error"),
            Ok(None) => {}
            Err(e) => error!(?e, "engine shutdown task failed"),
        }

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Run a potentially blocking engine call off the async runtime
async fn blocking<T, F>(engine: &Arc<Engine>, f: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce(&Engine) -> T + Send + 'static,
{
    let engine = Arc::clone(engine);
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| {
            error!(?e, "engine task failed");
            Response::error("internal", e.to_string())
        })
}

/// Wait for a replay worker and surface an injection failure as an error
fn settle(handle: ReplayHandle) -> Result<ReplayReport, ReplayError> {
    handle.join().and_then(ReplayReport::into_result)
}

fn log_settled(id: u64, result: Result<ReplayReport, ReplayError>) {
    match result {
        Ok(report) => debug!(id, %report, "previous replay joined"),
        Err(e) => warn!(id, code = error_code(&e), %e, "previous replay ended with an error"),
    }
}

/// Join a superseded replay worker, off the runtime unless it already exited
fn reap(handle: ReplayHandle) {
    let id = handle.id();
    if handle.is_finished() {
        log_settled(id, settle(handle));
    } else {
        tokio::task::spawn_blocking(move || log_settled(id, settle(handle)));
    }
}

fn capture_error(e: &CaptureError) -> Response {
    let code = match e {
        CaptureError::InvalidTransition { .. } => "invalid_state",
        CaptureError::Platform(_) => "platform",
    };
    Response::error(code, e.to_string())
}

fn error_code(e: &ReplayError) -> &'static str {
    match e {
        ReplayError::NoActionsRecorded => "no_actions_recorded",
        ReplayError::InvalidTransition { .. } => "invalid_state",
        ReplayError::InjectionFailure(_) => "injection_failure",
        ReplayError::WorkerSpawn(_) | ReplayError::WorkerPanicked => "internal",
    }
}

fn replay_error(e: &ReplayError) -> Response {
    Response::error(error_code(e), e.to_string())
}

/// Read one length-prefixed frame. `None` on a clean disconnect.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        bail!("message of {len} bytes too large, disconnecting");
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

/// Send a length-prefixed JSON message
async fn send_message<W: AsyncWrite + Unpin, T: Serialize>(writer: &mut W, msg: &T) -> Result<()> {
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}
