// Starting and stopping the display service process
// These operations do not need a binding; they talk to the process directly

use super::config::Config;
use super::error::LaunchError;
use super::protocol::{LaunchParams, ServiceRequest, ServiceResponse};
use super::service_client::send_request;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const READY_TIMEOUT: Duration = Duration::from_secs(2);
const EXIT_TIMEOUT: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Process-level control of the service
pub trait ServiceLauncher {
    /// Start the service with `params`. A start while it already runs
    /// coalesces into the running process, which re-applies the parameters.
    fn launch(&mut self, params: &LaunchParams) -> Result<(), LaunchError>;

    /// Stop the service; no-op if it is not running
    fn terminate(&mut self) -> Result<(), LaunchError>;
}

/// Launches `desktop-mode-service` as a detached child process
#[derive(Debug)]
pub struct ProcessLauncher {
    config: Config,
    service_bin: Option<PathBuf>,
    /// Last process spawned from here, reaped once it exits
    child: Option<Child>,
}

impl ProcessLauncher {
    /// Locate the service binary lazily on first launch
    pub fn new(config: Config) -> Self {
        Self {
            config,
            service_bin: None,
            child: None,
        }
    }

    pub fn with_binary(config: Config, service_bin: PathBuf) -> Self {
        Self {
            config,
            service_bin: Some(service_bin),
            child: None,
        }
    }

    fn resolve_binary(&mut self) -> Result<PathBuf, LaunchError> {
        if let Some(path) = &self.service_bin {
            return Ok(path.clone());
        }
        let path =
            crate::service_paths::resolve_service_path().ok_or(LaunchError::BinaryNotFound)?;
        self.service_bin = Some(path.clone());
        Ok(path)
    }

    fn spawn(&mut self, params: &LaunchParams) -> Result<(), LaunchError> {
        let service_bin = self.resolve_binary()?;
        let encoded = serde_json::to_string(params)?;

        self.config.ensure_dirs().map_err(LaunchError::RuntimeDir)?;

        // Stale socket from a service that died without cleaning up
        if self.config.socket_exists() {
            self.config.remove_socket().map_err(LaunchError::RuntimeDir)?;
        }

        let child = Command::new(&service_bin)
            .arg("--params")
            .arg(&encoded)
            .env(super::config::DIR_OVERRIDE_ENV, &self.config.runtime_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                path: service_bin.clone(),
                source,
            })?;
        info!(pid = child.id(), bin = %service_bin.display(), "spawned display service");
        self.child = Some(child);

        // Wait for the socket to accept connections
        let start = Instant::now();
        while start.elapsed() < READY_TIMEOUT {
            std::thread::sleep(POLL_INTERVAL);
            if self.config.socket_exists()
                && std::os::unix::net::UnixStream::connect(&self.config.socket_path).is_ok()
            {
                debug!(waited = ?start.elapsed(), "display service ready");
                return Ok(());
            }
        }

        Err(LaunchError::NotReady(READY_TIMEOUT))
    }

    /// Collect our own child once it exits so it does not linger as a zombie
    fn reap_child(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Ok(Some(status)) = child.try_wait() {
                debug!(%status, "display service exited");
                self.child = None;
            }
        }
    }

    fn wait_for_exit(&mut self) -> Result<(), LaunchError> {
        let start = Instant::now();
        while start.elapsed() < EXIT_TIMEOUT {
            self.reap_child();
            if !self.config.is_service_running() {
                return Ok(());
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        Err(LaunchError::StillRunning(EXIT_TIMEOUT))
    }
}

impl ServiceLauncher for ProcessLauncher {
    fn launch(&mut self, params: &LaunchParams) -> Result<(), LaunchError> {
        self.reap_child();
        if let Some(pid) = self.config.read_pid().filter(|_| self.config.is_service_running()) {
            debug!(pid, "service already running, coalescing start into reconfigure");
            let request = ServiceRequest::Reconfigure {
                params: params.clone(),
            };
            match send_request(&self.config.socket_path, request) {
                Ok(ServiceResponse::Reconfigured) => return Ok(()),
                Ok(other) => {
                    warn!(pid, response = ?other, "service refused coalesced start, replacing it");
                }
                Err(e) => {
                    warn!(pid, error = %e, "running service unreachable, replacing it");
                }
            }

            // Never leave the old process behind an overwritten PID file
            signal_terminate(pid);
            self.wait_for_exit()?;
        }

        self.spawn(params)
    }

    fn terminate(&mut self) -> Result<(), LaunchError> {
        self.reap_child();
        let Some(pid) = self.config.read_pid() else {
            return Ok(());
        };
        if !self.config.is_service_running() {
            debug!(pid, "stale PID file, nothing to stop");
            self.config.remove_pid().ok();
            return Ok(());
        }

        info!(pid, "stopping display service");
        match send_request(&self.config.socket_path, ServiceRequest::Shutdown) {
            Ok(ServiceResponse::ShuttingDown) => {}
            Ok(other) => {
                warn!(response = ?other, "unexpected shutdown response, sending SIGTERM");
                signal_terminate(pid);
            }
            Err(e) => {
                warn!(error = %e, "shutdown request failed, sending SIGTERM");
                signal_terminate(pid);
            }
        }

        self.wait_for_exit()
    }
}

#[cfg(unix)]
fn signal_terminate(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn signal_terminate(_pid: u32) {}
