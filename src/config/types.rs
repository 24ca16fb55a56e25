/// Core error types shared by every relaunch subsystem
use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy for a launch run.
///
/// Every fatal condition surfaces as one of these variants. Transient network
/// failures are folded into [`LaunchError::Exhausted`] by the cache retry loop
/// and only reach callers once every attempt has failed.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("usage: {0}")]
    Usage(String),

    #[error(
        "invalid version of launcher; launch file requires {required_major}.{required_minor}, this is {major}.{minor}"
    )]
    VersionMismatch {
        required_major: u32,
        required_minor: u32,
        major: u32,
        minor: u32,
    },

    #[error("{0}")]
    User(String),

    #[error("network error fetching {uri}: {details}")]
    Network { uri: String, details: String },

    #[error("unexpected HTTP response code {status} for {uri}")]
    HttpStatus { uri: String, status: u16 },

    #[error("premature EOF fetching {uri}: expected {expected} bytes, received {received}")]
    Truncated {
        uri: String,
        expected: u64,
        received: u64,
    },

    #[error("could not validate {uri}")]
    Validation { uri: String, rejections: Vec<String> },

    #[error("could not replace out-of-date file {} with newly downloaded file", path.display())]
    ReplaceFailed { path: PathBuf },

    #[error("corrupt package {uri}: {details}")]
    CorruptArchive { uri: String, details: String },

    #[error("unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("could not fetch {uri} after {attempts} attempts: {first}")]
    Exhausted {
        uri: String,
        attempts: usize,
        first: Box<LaunchError>,
        others: Vec<LaunchError>,
    },

    #[error("{uri}:{line}: {source}")]
    At {
        uri: String,
        line: usize,
        #[source]
        source: Box<LaunchError>,
    },
}

impl LaunchError {
    /// Annotate an error with the descriptor location it was raised from.
    /// Errors that already carry a location keep the innermost one.
    pub fn at(self, uri: &str, line: usize) -> Self {
        match self {
            already @ LaunchError::At { .. } => already,
            other => LaunchError::At {
                uri: uri.to_string(),
                line,
                source: Box::new(other),
            },
        }
    }

    /// The error with location and retry wrappers peeled off.
    pub fn root(&self) -> &LaunchError {
        match self {
            LaunchError::At { source, .. } => source.root(),
            LaunchError::Exhausted { first, .. } => first.root(),
            other => other,
        }
    }

    /// Remediation guidance meant for the person running the launcher.
    pub fn user_message(&self) -> Option<String> {
        match self.root() {
            LaunchError::ReplaceFailed { .. } => Some(
                "Could not replace out-of-date file with newly downloaded file. \
                 If the program is currently running, please quit it and try again."
                    .to_string(),
            ),
            LaunchError::VersionMismatch {
                required_major,
                required_minor,
                ..
            } => Some(format!(
                "This program requires launcher version {}.{} or newer. \
                 Please download an updated launcher.",
                required_major, required_minor
            )),
            LaunchError::User(message) => Some(message.clone()),
            _ => None,
        }
    }

    /// Whether this failure stems from a validator rejecting a cached artifact.
    pub fn is_validation(&self) -> bool {
        matches!(self.root(), LaunchError::Validation { .. })
    }
}

/// Result type for relaunch operations
pub type Result<T> = std::result::Result<T, LaunchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_keeps_innermost_location() {
        let err = LaunchError::Syntax("unterminated quote".to_string())
            .at("file:///a.hl", 3)
            .at("file:///b.hl", 9);
        match err {
            LaunchError::At { uri, line, .. } => {
                assert_eq!(uri, "file:///a.hl");
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_user_message_sees_through_wrappers() {
        let err = LaunchError::Exhausted {
            uri: "http://example/a.jar".to_string(),
            attempts: 3,
            first: Box::new(LaunchError::ReplaceFailed {
                path: PathBuf::from("/tmp/a.jar"),
            }),
            others: Vec::new(),
        }
        .at("http://example/launch.hl", 2);

        let message = err.user_message().expect("remediation text");
        assert!(message.contains("quit it and try again"));
    }

    #[test]
    fn test_version_mismatch_message() {
        let err = LaunchError::VersionMismatch {
            required_major: 1,
            required_minor: 9,
            major: 1,
            minor: 3,
        };
        assert!(err.to_string().contains("requires 1.9, this is 1.3"));
        assert!(err.user_message().unwrap().contains("1.9"));
    }

    #[test]
    fn test_network_errors_have_no_user_message() {
        let err = LaunchError::Network {
            uri: "http://example/".to_string(),
            details: "connection refused".to_string(),
        };
        assert!(err.user_message().is_none());
        assert!(!err.is_validation());
    }
}
