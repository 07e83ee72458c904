use super::polling::{wait_for_file_content, wait_for_path, wait_until, WaitError};
use desktop_mode_lib::session::config::{process_is_alive, Config, DIR_OVERRIDE_ENV};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Path of the service binary cargo built for this test run
pub fn service_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_desktop-mode-service"))
}

/// RAII wrapper that ensures a directly started service process is cleaned up.
pub struct ServiceGuard {
    child: Child,
    config: Config,
}

impl ServiceGuard {
    /// Start the service in `data_dir` with default parameters.
    pub fn start(data_dir: &Path) -> Result<Self, ServiceError> {
        let config = Config::in_dir(data_dir.to_path_buf());
        let child = Command::new(service_binary())
            .env(DIR_OVERRIDE_ENV, data_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(ServiceError::SpawnFailed)?;

        let guard = Self { child, config };
        println!(
            "Started desktop-mode-service (pid {}) in {}",
            guard.pid(),
            data_dir.display()
        );

        wait_for_ready(&guard.config).map_err(ServiceError::ReadyTimeout)?;
        Ok(guard)
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Wait for the child to exit on its own, reaping it
    pub fn wait_exit(&mut self, timeout: Duration) -> bool {
        let child = &mut self.child;
        wait_until("service child to exit", timeout, || match child.try_wait() {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(None),
            Err(e) => Err(Some(e.to_string())),
        })
        .is_ok()
    }
}

impl Drop for ServiceGuard {
    fn drop(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }

        if let Err(err) = self.child.kill() {
            eprintln!(
                "Failed to terminate desktop-mode-service pid {}: {}",
                self.child.id(),
                err
            );
            return;
        }

        let _ = self.child.wait();
    }
}

/// Kills whatever service the PID file names when dropped.
///
/// For services spawned through the launcher, which the test does not own as a child.
pub struct PidFileCleanup {
    config: Config,
}

impl PidFileCleanup {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl Drop for PidFileCleanup {
    fn drop(&mut self) {
        if let Some(pid) = self.config.read_pid() {
            if process_is_alive(pid) {
                unsafe {
                    libc::kill(pid as i32, libc::SIGKILL);
                }
            }
        }
    }
}

/// Wait until the PID file is written and the socket is bound.
pub fn wait_for_ready(config: &Config) -> Result<(), WaitError> {
    wait_for_file_content(
        &config.pid_file,
        |content| content.trim().parse::<u32>().is_ok(),
        READY_TIMEOUT,
    )?;
    wait_for_path(&config.socket_path, READY_TIMEOUT)
}

/// Wait for a process to exit, used by tests to ensure no orphans remain.
pub fn wait_for_process_exit(pid: u32, timeout: Duration) -> bool {
    wait_until(&format!("pid {} to exit", pid), timeout, || {
        if process_is_alive(pid) {
            Err(None)
        } else {
            Ok(())
        }
    })
    .is_ok()
}

/// Errors that can occur when starting the service for tests.
#[derive(Debug)]
pub enum ServiceError {
    SpawnFailed(std::io::Error),
    ReadyTimeout(WaitError),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpawnFailed(err) => write!(f, "failed to spawn service: {}", err),
            Self::ReadyTimeout(err) => write!(f, "service never became ready: {}", err),
        }
    }
}

impl std::error::Error for ServiceError {}
