use thiserror::Error;

use crate::graph::GraphError;

#[derive(Debug, Error)]
pub enum Error {
    /// No input device, or the device refused to open. Fatal to startup.
    #[error("audio input unavailable: {0}")]
    InputUnavailable(String),

    #[error("audio output unavailable: {0}")]
    OutputUnavailable(String),

    /// Impulse response fetch or decode failed. The reverb stays off for the session.
    #[error("failed to load resource '{resource}': {reason}")]
    ResourceLoadFailed { resource: String, reason: String },

    /// Rejected at the setter boundary; nothing reached the graph.
    #[error("invalid value {value} for {name}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f32,
        reason: &'static str,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("audio stream error: {0}")]
    Stream(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid(name: &'static str, value: f32, reason: &'static str) -> Self {
        Error::InvalidParameter { name, value, reason }
    }

    pub(crate) fn load_failed(resource: &str, reason: impl ToString) -> Self {
        Error::ResourceLoadFailed {
            resource: resource.to_string(),
            reason: reason.to_string(),
        }
    }
}
