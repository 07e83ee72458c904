use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

const INITIAL_DELAY_MS: u64 = 50;
const MAX_DELAY_MS: u64 = 500;

/// Error returned when a polled condition never held.
#[derive(Debug)]
pub struct WaitError {
    what: String,
    attempts: u32,
    waited: Duration,
    last_observed: Option<String>,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timed out after {} attempts over {:?} waiting for {}. Last observed: {}",
            self.attempts,
            self.waited,
            self.what,
            self.last_observed
                .as_deref()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .unwrap_or("<nothing>"),
        )
    }
}

impl std::error::Error for WaitError {}

/// Poll `probe` with exponential backoff until it yields a value or `timeout` passes.
///
/// `probe` returns `Ok(value)` when done, or `Err(observation)` describing what it saw.
pub fn wait_until<T, F>(what: &str, timeout: Duration, mut probe: F) -> Result<T, WaitError>
where
    F: FnMut() -> Result<T, Option<String>>,
{
    let start = Instant::now();
    let mut delay = Duration::from_millis(INITIAL_DELAY_MS);
    let mut attempts = 0;
    let mut last_observed = None;

    loop {
        attempts += 1;
        match probe() {
            Ok(value) => return Ok(value),
            Err(observed) => {
                if observed.is_some() {
                    last_observed = observed;
                }
            }
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            break;
        }

        thread::sleep(delay.min(remaining));
        delay = (delay * 2).min(Duration::from_millis(MAX_DELAY_MS));
    }

    Err(WaitError {
        what: what.to_string(),
        attempts,
        waited: start.elapsed(),
        last_observed,
    })
}

/// Poll a file for content until the provided predicate returns true.
pub fn wait_for_file_content<P, F>(
    path: P,
    predicate: F,
    timeout: Duration,
) -> Result<String, WaitError>
where
    P: AsRef<Path>,
    F: Fn(&str) -> bool,
{
    let path: PathBuf = path.as_ref().to_path_buf();
    wait_until(&path.display().to_string(), timeout, || {
        match fs::read_to_string(&path) {
            Ok(content) if predicate(&content) => Ok(content),
            Ok(content) => Err(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(None),
            Err(err) => Err(Some(err.to_string())),
        }
    })
}

/// Poll until `path` exists.
pub fn wait_for_path(path: &Path, timeout: Duration) -> Result<(), WaitError> {
    wait_until(&path.display().to_string(), timeout, || {
        if path.exists() {
            Ok(())
        } else {
            Err(None)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn wait_for_file_content_returns_existing_content() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("value.txt");
        fs::write(&file, "ready").unwrap();

        let content =
            wait_for_file_content(&file, |text| text.contains("ready"), Duration::from_secs(1))
                .expect("should read file immediately");
        assert_eq!(content, "ready");
    }

    #[test]
    fn wait_for_file_content_times_out_with_context() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("missing.txt");

        let err = wait_for_file_content(
            &file,
            |text| text.contains("anything"),
            Duration::from_millis(1),
        )
        .expect_err("should time out");
        assert!(
            err.to_string().contains("missing.txt"),
            "error message should reference file path"
        );
    }
}
