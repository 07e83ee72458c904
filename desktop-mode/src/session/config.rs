// Environment configuration helpers for the front-end and the service host
// Handles platform-specific paths for the socket, PID file, and settings file

use std::path::PathBuf;

/// Environment variable overriding both runtime and state directories
pub const DIR_OVERRIDE_ENV: &str = "DESKTOP_MODE_DIR";

/// Configuration for service paths
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for storing runtime files (socket, PID)
    pub runtime_dir: PathBuf,
    /// Directory for storing persistent state (settings.json)
    pub state_dir: PathBuf,
    /// Path to the service's Unix socket
    pub socket_path: PathBuf,
    /// Path to the service PID file
    pub pid_file: PathBuf,
}

impl Config {
    /// Create configuration using default paths
    pub fn default_paths() -> Self {
        let runtime_dir = Self::default_runtime_dir();
        let state_dir = Self::default_state_dir();

        Self {
            socket_path: runtime_dir.join("service.sock"),
            pid_file: runtime_dir.join("service.pid"),
            runtime_dir,
            state_dir,
        }
    }

    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        if let Ok(override_dir) = std::env::var(DIR_OVERRIDE_ENV) {
            return Self::in_dir(PathBuf::from(override_dir));
        }

        Self::default_paths()
    }

    /// Everything under a single directory
    pub fn in_dir(base: PathBuf) -> Self {
        Self {
            socket_path: base.join("service.sock"),
            pid_file: base.join("service.pid"),
            runtime_dir: base.clone(),
            state_dir: base,
        }
    }

    fn default_runtime_dir() -> PathBuf {
        #[cfg(target_os = "linux")]
        {
            if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
                PathBuf::from(runtime_dir).join("desktop-mode")
            } else {
                Self::default_state_dir()
            }
        }

        #[cfg(not(target_os = "linux"))]
        {
            Self::default_state_dir()
        }
    }

    fn default_state_dir() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".desktop-mode"))
            .unwrap_or_else(|| PathBuf::from("/tmp/desktop-mode"))
    }

    pub fn runtime_dir(&self) -> &PathBuf {
        &self.runtime_dir
    }

    pub fn state_dir(&self) -> &PathBuf {
        &self.state_dir
    }

    /// Get the settings.json file path
    pub fn settings_file(&self) -> PathBuf {
        self.state_dir.join("settings.json")
    }

    /// Ensure both runtime and state directories exist with appropriate permissions
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;
        std::fs::create_dir_all(&self.runtime_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.runtime_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        Ok(())
    }

    /// Write the current process PID to the PID file
    pub fn write_pid(&self) -> std::io::Result<()> {
        self.ensure_dirs()?;
        std::fs::write(&self.pid_file, std::process::id().to_string())
    }

    pub fn read_pid(&self) -> Option<u32> {
        std::fs::read_to_string(&self.pid_file)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn remove_pid(&self) -> std::io::Result<()> {
        if self.pid_file.exists() {
            std::fs::remove_file(&self.pid_file)
        } else {
            Ok(())
        }
    }

    pub fn remove_socket(&self) -> std::io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
        } else {
            Ok(())
        }
    }

    /// Check if the service socket exists (the service may be running)
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Check if a process with the stored PID is still alive
    #[cfg(unix)]
    pub fn is_service_running(&self) -> bool {
        match self.read_pid() {
            Some(pid) => process_is_alive(pid),
            None => false,
        }
    }

    // TODO(windows): Implement Windows process check
    #[cfg(not(unix))]
    pub fn is_service_running(&self) -> bool {
        self.socket_exists()
    }
}

/// Probe a PID with signal 0
#[cfg(unix)]
pub fn process_is_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}
