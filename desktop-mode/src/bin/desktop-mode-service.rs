// desktop-mode-service: control-plane host for the remote display service
//
// Responsibilities:
// - Hold the launch parameters the service was started or re-applied with
// - Expose the Unix socket protocol used by the front-end
// - Keep watch connections open for as long as the service lives
// - Write and remove its PID file and socket
//
// It never streams anything; the display protocol is out of scope.

use anyhow::{Context, Result};
use clap::Parser;
use desktop_mode_lib::{
    logging::init_logging,
    session::{
        config::Config,
        protocol::{
            deserialize_message, serialize_message, LaunchParams, ServiceErrorCode,
            ServiceRequest, ServiceResponse, MAX_FRAME_SIZE, PROTOCOL_VERSION,
        },
        settings::Snapshot,
    },
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "desktop-mode-service", about = "Remote display service host")]
struct Args {
    /// Launch parameters as JSON (defaults derive from the default settings)
    #[arg(long)]
    params: Option<String>,
}

/// Service state shared across all client connections
struct ServiceState {
    params: RwLock<LaunchParams>,
    /// Number of hot re-applies since start
    reconfigures: RwLock<u64>,
}

impl ServiceState {
    fn new(params: LaunchParams) -> Self {
        Self {
            params: RwLock::new(params),
            reconfigures: RwLock::new(0),
        }
    }
}

/// What the connection loop does after answering a request
#[derive(Debug, PartialEq, Eq)]
enum Followup {
    Continue,
    /// Stop serving and exit the process
    Shutdown,
}

fn parse_params(raw: Option<&str>) -> Result<LaunchParams> {
    match raw {
        Some(raw) => {
            let params: LaunchParams =
                serde_json::from_str(raw).context("Failed to parse --params")?;
            check_params(&params).map_err(anyhow::Error::msg)?;
            Ok(params)
        }
        None => Ok(LaunchParams::from(&Snapshot::default())),
    }
}

fn check_params(params: &LaunchParams) -> Result<(), String> {
    if params.dpi == 0 {
        return Err("dpi must be positive".to_string());
    }
    if params.width == Some(0) || params.height == Some(0) {
        return Err("width and height must be positive".to_string());
    }
    Ok(())
}

/// Handle a single request from a client
async fn handle_request(
    state: &Arc<ServiceState>,
    request: ServiceRequest,
) -> (ServiceResponse, Followup) {
    match request {
        ServiceRequest::Handshake { client_version } => {
            if client_version != PROTOCOL_VERSION {
                let message = if client_version < PROTOCOL_VERSION {
                    "Service is newer than the front-end, please update it.".to_string()
                } else {
                    "Service is outdated, please restart it.".to_string()
                };
                return (
                    ServiceResponse::Error {
                        code: ServiceErrorCode::VersionMismatch,
                        message,
                    },
                    Followup::Continue,
                );
            }
            (
                ServiceResponse::Handshake {
                    protocol_version: PROTOCOL_VERSION,
                },
                Followup::Continue,
            )
        }

        ServiceRequest::IsRunning => (
            ServiceResponse::Running { running: true },
            Followup::Continue,
        ),

        ServiceRequest::Reconfigure { params } => {
            if let Err(message) = check_params(&params) {
                return (
                    ServiceResponse::Error {
                        code: ServiceErrorCode::InvalidRequest,
                        message,
                    },
                    Followup::Continue,
                );
            }
            info!(
                width = ?params.width,
                height = ?params.height,
                dpi = params.dpi,
                "re-applying parameters"
            );
            *state.params.write().await = params;
            *state.reconfigures.write().await += 1;
            (ServiceResponse::Reconfigured, Followup::Continue)
        }

        ServiceRequest::Watch => (ServiceResponse::Watching, Followup::Continue),

        ServiceRequest::Shutdown => (ServiceResponse::ShuttingDown, Followup::Shutdown),
    }
}

async fn handle_client(
    state: Arc<ServiceState>,
    mut stream: UnixStream,
    shutdown_tx: tokio::sync::mpsc::Sender<()>,
    mut closing_rx: watch::Receiver<bool>,
) -> Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let mut handshaken = false;

    loop {
        tokio::select! {
            result = reader.read_line(&mut line) => {
                match result {
                    // Client disconnected
                    Ok(0) => break,
                    Ok(_) => {
                        let (response, followup) = if line.len() > MAX_FRAME_SIZE {
                            (
                                ServiceResponse::Error {
                                    code: ServiceErrorCode::InvalidRequest,
                                    message: format!(
                                        "Request frame too large: {} bytes (max {})",
                                        line.len(),
                                        MAX_FRAME_SIZE
                                    ),
                                },
                                Followup::Continue,
                            )
                        } else {
                            match deserialize_message::<ServiceRequest>(line.as_bytes()) {
                                Ok(ServiceRequest::Handshake { client_version }) => {
                                    let answer = handle_request(
                                        &state,
                                        ServiceRequest::Handshake { client_version },
                                    )
                                    .await;
                                    handshaken =
                                        matches!(answer.0, ServiceResponse::Handshake { .. });
                                    answer
                                }
                                Ok(_) if !handshaken => (
                                    ServiceResponse::Error {
                                        code: ServiceErrorCode::InvalidRequest,
                                        message: "Handshake required".to_string(),
                                    },
                                    Followup::Continue,
                                ),
                                Ok(request) => handle_request(&state, request).await,
                                Err(e) => (
                                    ServiceResponse::Error {
                                        code: ServiceErrorCode::InvalidRequest,
                                        message: format!("Failed to parse request: {}", e),
                                    },
                                    Followup::Continue,
                                ),
                            }
                        };

                        let bytes = serialize_message(&response)?;
                        writer.write_all(&bytes).await?;
                        writer.flush().await?;
                        line.clear();

                        if followup == Followup::Shutdown {
                            let _ = shutdown_tx.send(()).await;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "error reading from client");
                        break;
                    }
                }
            }

            // Closing drops the stream, which is how watchers learn we are gone
            _ = closing_rx.changed() => break,
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("info");
    let args = Args::parse();
    let params = parse_params(args.params.as_deref())?;

    let config = Config::from_env();
    config
        .ensure_dirs()
        .context("Failed to create runtime directory")?;

    // Clean up stale socket if exists
    if config.socket_exists() {
        if config.is_service_running() {
            error!(pid = ?config.read_pid(), "service already running");
            std::process::exit(1);
        }
        config
            .remove_socket()
            .context("Failed to remove stale socket")?;
    }

    config.write_pid().context("Failed to write PID file")?;

    let state = Arc::new(ServiceState::new(params));

    let listener = UnixListener::bind(&config.socket_path)
        .with_context(|| format!("Failed to bind socket: {}", config.socket_path.display()))?;

    // Owner-only access
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&config.socket_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| {
                format!(
                    "Failed to set socket permissions: {}",
                    config.socket_path.display()
                )
            })?;
    }

    info!(socket = %config.socket_path.display(), "service listening");

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let (closing_tx, closing_rx) = watch::channel(false);

    // Handle SIGINT for graceful shutdown
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        let _ = shutdown_tx_clone.send(()).await;
    });

    // The launcher falls back to SIGTERM when the socket is unresponsive
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            terminate.recv().await;
            let _ = shutdown_tx_clone.send(()).await;
        });
    }

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let state = Arc::clone(&state);
                        let shutdown_tx = shutdown_tx.clone();
                        let closing_rx = closing_rx.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_client(state, stream, shutdown_tx, closing_rx).await
                            {
                                warn!(error = %e, "client error");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept error");
                    }
                }
            }

            _ = shutdown_rx.recv() => {
                info!("shutting down service");
                break;
            }
        }
    }

    // Remove the socket first so nobody new connects, then release watchers
    config.remove_socket().ok();
    config.remove_pid().ok();
    let _ = closing_tx.send(true);

    info!(
        reconfigures = *state.reconfigures.read().await,
        "service stopped"
    );
    Ok(())
}
