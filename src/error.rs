use crate::frame::Frame;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StbtError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Key \"{key}\" not valid for the \"{control}\" control ({allowed})")]
    InvalidKey {
        key: String,
        control: &'static str,
        allowed: &'static str,
    },

    #[error("Pipeline error in {source_name}: {message}")]
    Pipeline {
        source_name: String,
        message: String,
    },

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("System error: {message}")]
    System { message: String },
}

impl StbtError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    /// True for failures that a retry cannot fix
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Settings(_))
    }
}

/// Socket-level failures of the remote control transports
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to {endpoint}: {source}")]
    ConnectFailed {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out after {timeout:?} connecting to {endpoint}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    #[error("Failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to accept connection on {address}: {source}")]
    AcceptFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to send to {endpoint}: {source}")]
    SendFailed {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read from {endpoint}: {details}")]
    ReadFailed { endpoint: String, details: String },

    #[error("Connection to {endpoint} is closed")]
    Closed { endpoint: String },
}

/// The expected "test assertion failed" outcome of a wait.
///
/// Returned inside [`crate::wait::WaitResult::TimedOut`] rather than as an
/// error, so callers can tell it apart from configuration and transport
/// failures.
#[derive(Error, Debug, Clone)]
pub enum UiTestFailure {
    #[error("Didn't find match for '{}' after {:.1}s (timeout {:.1}s)", .expected.display(), .elapsed.as_secs_f64(), .timeout.as_secs_f64())]
    MatchTimeout {
        screenshot: Option<Frame>,
        expected: PathBuf,
        elapsed: Duration,
        timeout: Duration,
    },

    #[error("Didn't find motion{} after {:.1}s (timeout {:.1}s)", mask_suffix(.mask), .elapsed.as_secs_f64(), .timeout.as_secs_f64())]
    MotionTimeout {
        screenshot: Option<Frame>,
        mask: Option<PathBuf>,
        elapsed: Duration,
        timeout: Duration,
    },
}

impl UiTestFailure {
    /// Last frame seen before giving up, for post-mortem inspection
    pub fn screenshot(&self) -> Option<&Frame> {
        match self {
            Self::MatchTimeout { screenshot, .. } | Self::MotionTimeout { screenshot, .. } => {
                screenshot.as_ref()
            }
        }
    }

    /// Wait time spent, not counting video-loss recovery
    pub fn elapsed(&self) -> Duration {
        match self {
            Self::MatchTimeout { elapsed, .. } | Self::MotionTimeout { elapsed, .. } => *elapsed,
        }
    }
}

fn mask_suffix(mask: &Option<PathBuf>) -> String {
    match mask {
        Some(path) => format!(" within mask '{}'", path.display()),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, StbtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_timeout_message_names_reference() {
        let failure = UiTestFailure::MatchTimeout {
            screenshot: None,
            expected: PathBuf::from("/tmp/menu.png"),
            elapsed: Duration::from_millis(10_000),
            timeout: Duration::from_secs(10),
        };

        let message = failure.to_string();
        assert!(message.contains("/tmp/menu.png"));
        assert!(message.contains("10.0s"));
    }

    #[test]
    fn test_motion_timeout_message_without_mask() {
        let failure = UiTestFailure::MotionTimeout {
            screenshot: None,
            mask: None,
            elapsed: Duration::from_secs(3),
            timeout: Duration::from_secs(3),
        };

        assert_eq!(
            failure.to_string(),
            "Didn't find motion after 3.0s (timeout 3.0s)"
        );
        assert_eq!(failure.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn test_configuration_classification() {
        assert!(StbtError::configuration("bad uri").is_configuration());
        assert!(!StbtError::system("boom").is_configuration());
    }
}
