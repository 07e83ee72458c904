// Unix socket transport to desktop-mode-service
// One short-lived connection per request; the binder keeps one long-lived watch connection

use super::error::TransportFault;
use super::link::{BindToken, Binder, RemoteService};
use super::protocol::{
    deserialize_message, serialize_message, LaunchParams, ServiceErrorCode, ServiceRequest,
    ServiceResponse, MAX_FRAME_SIZE, PROTOCOL_VERSION,
};
use std::io::{BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A connection that has completed the protocol handshake
struct Connection {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl Connection {
    fn open(socket_path: &Path) -> Result<Self, TransportFault> {
        let stream =
            UnixStream::connect(socket_path).map_err(|source| TransportFault::Connect {
                path: socket_path.to_path_buf(),
                source,
            })?;
        stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;
        stream.set_write_timeout(Some(REQUEST_TIMEOUT))?;

        let writer = stream.try_clone()?;
        let mut conn = Self {
            reader: BufReader::new(stream),
            writer,
        };

        let handshake = ServiceRequest::Handshake {
            client_version: PROTOCOL_VERSION,
        };
        match conn.exchange(&handshake)? {
            ServiceResponse::Handshake { protocol_version } => {
                trace!(protocol_version, "handshake complete");
                Ok(conn)
            }
            ServiceResponse::Error {
                code: ServiceErrorCode::VersionMismatch,
                message,
            } => Err(TransportFault::VersionMismatch(message)),
            other => Err(TransportFault::Unexpected(format!(
                "expected handshake, got {:?}",
                other
            ))),
        }
    }

    fn exchange(&mut self, request: &ServiceRequest) -> Result<ServiceResponse, TransportFault> {
        let bytes = serialize_message(request)?;
        self.writer.write_all(&bytes)?;
        self.writer.flush()?;
        self.read_response()
    }

    /// Read one frame, enforcing the frame size limit
    fn read_response(&mut self) -> Result<ServiceResponse, TransportFault> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(TransportFault::Closed);
        }
        if line.len() > MAX_FRAME_SIZE {
            return Err(TransportFault::FrameTooLarge {
                size: line.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(deserialize_message(line.as_bytes())?)
    }

    /// Block until the service closes the stream
    fn wait_closed(mut self) {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => return,
                Ok(_) => trace!(frame = line.trim(), "ignoring frame on watch connection"),
                Err(e) => {
                    debug!(error = %e, "watch connection failed");
                    return;
                }
            }
        }
    }
}

/// Send one request to the service and return its response.
///
/// `Error` responses come back as faults so callers only match on success shapes.
pub fn send_request(
    socket_path: &Path,
    request: ServiceRequest,
) -> Result<ServiceResponse, TransportFault> {
    let mut conn = Connection::open(socket_path)?;
    match conn.exchange(&request)? {
        ServiceResponse::Error {
            code: ServiceErrorCode::VersionMismatch,
            message,
        } => Err(TransportFault::VersionMismatch(message)),
        ServiceResponse::Error { code, message } => {
            Err(TransportFault::Rejected(format!("{:?}: {}", code, message)))
        }
        response => Ok(response),
    }
}

/// Remote handle backed by the service socket
#[derive(Debug, Clone)]
pub struct SocketRemote {
    socket_path: PathBuf,
}

impl SocketRemote {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }
}

impl RemoteService for SocketRemote {
    fn is_running(&mut self) -> Result<bool, TransportFault> {
        match send_request(&self.socket_path, ServiceRequest::IsRunning)? {
            ServiceResponse::Running { running } => Ok(running),
            other => Err(TransportFault::Unexpected(format!("{:?}", other))),
        }
    }

    fn reconfigure(&mut self, params: &LaunchParams) -> Result<(), TransportFault> {
        let request = ServiceRequest::Reconfigure {
            params: params.clone(),
        };
        match send_request(&self.socket_path, request)? {
            ServiceResponse::Reconfigured => Ok(()),
            other => Err(TransportFault::Unexpected(format!("{:?}", other))),
        }
    }
}

/// State shared between a bind request and its watcher thread
#[derive(Default)]
struct Watch {
    cancelled: AtomicBool,
    stream: Mutex<Option<UnixStream>>,
}

impl Watch {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = self.stream.lock() {
            if let Some(stream) = slot.take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Remember the watch stream so `cancel` can unblock the reader.
    /// Returns false if the bind was released in the meantime.
    fn hold(&self, stream: &UnixStream) -> bool {
        let Ok(clone) = stream.try_clone() else {
            return !self.is_cancelled();
        };
        if let Ok(mut slot) = self.stream.lock() {
            *slot = Some(clone);
        }
        !self.is_cancelled()
    }
}

/// Substrate over the service socket.
///
/// Each bind starts a watcher thread that polls until the socket accepts a
/// `watch` connection, reports `attached`, then blocks until the service closes
/// the connection and reports `detached`.
pub struct SocketBinder {
    socket_path: PathBuf,
    poll_interval: Duration,
    current: Option<Arc<Watch>>,
}

impl SocketBinder {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            poll_interval: DEFAULT_POLL_INTERVAL,
            current: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Binder for SocketBinder {
    fn bind(&mut self, token: BindToken) -> Result<(), TransportFault> {
        self.unbind();

        let watch = Arc::new(Watch::default());
        let socket_path = self.socket_path.clone();
        let poll_interval = self.poll_interval;
        let thread_watch = Arc::clone(&watch);

        std::thread::Builder::new()
            .name(format!("service-watch-{}", token.generation()))
            .spawn(move || run_watch(socket_path, poll_interval, token, thread_watch))?;

        self.current = Some(watch);
        Ok(())
    }

    fn unbind(&mut self) {
        if let Some(watch) = self.current.take() {
            watch.cancel();
        }
    }
}

impl Drop for SocketBinder {
    fn drop(&mut self) {
        self.unbind();
    }
}

fn run_watch(socket_path: PathBuf, poll_interval: Duration, token: BindToken, watch: Arc<Watch>) {
    let generation = token.generation();
    loop {
        if watch.is_cancelled() {
            return;
        }

        let conn = match open_watch(&socket_path) {
            Ok(conn) => conn,
            Err(e) => {
                trace!(generation, error = %e, "service not reachable yet");
                std::thread::sleep(poll_interval);
                continue;
            }
        };

        if !watch.hold(&conn.writer) {
            return;
        }
        debug!(generation, "watch established");
        if !token.attached(Box::new(SocketRemote::new(socket_path.clone()))) {
            return;
        }

        conn.wait_closed();
        if !watch.is_cancelled() {
            token.detached();
        }
        return;
    }
}

fn open_watch(socket_path: &Path) -> Result<Connection, TransportFault> {
    let mut conn = Connection::open(socket_path)?;
    match conn.exchange(&ServiceRequest::Watch)? {
        ServiceResponse::Watching => {
            // Watch connections idle until the service exits
            conn.writer.set_read_timeout(None)?;
            Ok(conn)
        }
        ServiceResponse::Error { code, message } => {
            warn!(?code, %message, "service refused watch");
            Err(TransportFault::Rejected(message))
        }
        other => Err(TransportFault::Unexpected(format!("{:?}", other))),
    }
}
