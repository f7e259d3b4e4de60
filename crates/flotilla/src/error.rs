//! Error taxonomy shared by the library.
//!
//! The split matters for control flow: `Config` aborts before any network
//! I/O, `Transport`/`Api`/`Validation`/`Cancelled` are recorded per host and
//! never abort peer hosts, and `Cache` degrades to pass-through.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed configuration, missing url/token, or an unknown
    /// `group_by`/`order_by` path. Fatal before any network I/O.
    #[error("config error: {0}")]
    Config(String),

    /// Connection, DNS, or timeout failure after retries were exhausted.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx response from the upstream API.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Disk-cache read/write failure. Callers degrade to pass-through.
    #[error("cache error: {0}")]
    Cache(String),

    /// Option merging or response validation failed for a single target.
    #[error("validation error: {0}")]
    Validation(String),

    /// The surrounding operation was cancelled. Recorded per host, never
    /// treated as a failure exit.
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Transient errors are worth retrying: transport failures and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::Transport("connection reset".into()).is_transient());
        assert!(
            Error::Api {
                status: 503,
                message: "unavailable".into()
            }
            .is_transient()
        );
        assert!(
            !Error::Api {
                status: 404,
                message: "not found".into()
            }
            .is_transient()
        );
        assert!(!Error::Config("bad filter".into()).is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn display_includes_status() {
        let err = Error::Api {
            status: 403,
            message: "forbidden".into(),
        };
        assert_eq!(err.to_string(), "api error (403): forbidden");
    }
}
