// Locating the desktop-mode-service binary from the front-end

use std::path::PathBuf;

/// Environment variable pointing at an explicit service binary
pub const SERVICE_BIN_ENV: &str = "DESKTOP_MODE_SERVICE_BIN";

fn service_binary_name() -> &'static str {
    if cfg!(windows) {
        "desktop-mode-service.exe"
    } else {
        "desktop-mode-service"
    }
}

/// Platform-specific fallback locations to search for the service
pub fn fallback_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();

    #[cfg(target_os = "macos")]
    {
        locations.push(PathBuf::from("/usr/local/bin"));
        locations.push(PathBuf::from("/opt/homebrew/bin"));
    }

    #[cfg(target_os = "linux")]
    {
        locations.push(PathBuf::from("/usr/bin"));
        locations.push(PathBuf::from("/usr/local/bin"));
        locations.push(PathBuf::from("/usr/libexec/desktop-mode"));
    }

    if let Some(home) = dirs::home_dir() {
        locations.push(home.join(".local/bin"));
        locations.push(home.join(".cargo/bin"));
    }

    locations
}

/// Resolve the `desktop-mode-service` binary path for the current process.
///
/// Resolution order:
/// 1) `DESKTOP_MODE_SERVICE_BIN`
/// 2) Next to `current_exe()` (installed together / cargo target dir)
/// 3) Platform fallback locations
pub fn resolve_service_path() -> Option<PathBuf> {
    if let Some(explicit) = std::env::var_os(SERVICE_BIN_ENV) {
        let candidate = PathBuf::from(explicit);
        if candidate.is_file() {
            return Some(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{} does not name a file", SERVICE_BIN_ENV);
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join(service_binary_name());
            if candidate.is_file() {
                return Some(candidate);
            }
            // Test binaries live one level down in target/<profile>/deps
            if let Some(parent) = dir.parent() {
                let candidate = parent.join(service_binary_name());
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
    }

    fallback_locations()
        .into_iter()
        .map(|dir| dir.join(service_binary_name()))
        .find(|candidate| candidate.is_file())
}
