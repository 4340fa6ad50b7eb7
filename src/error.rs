use thiserror::Error;

use crate::pipeline::PipelineState;

/// A capture request that can never be satisfied.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot satisfy capture constraint `{constraint}`: {reason}")]
pub struct NegotiationError {
    pub constraint: &'static str,
    pub reason: String,
}

impl NegotiationError {
    pub fn new(constraint: &'static str, reason: impl Into<String>) -> Self {
        Self {
            constraint,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CaptureError {
    #[error("camera access denied: {0} (grant camera permission to this user and start again)")]
    PermissionDenied(String),

    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),

    /// An exact constraint the device cannot meet. Never silently relaxed.
    #[error("device cannot provide exact {constraint}: requested {requested}, supports {supported}")]
    Overconstrained {
        constraint: &'static str,
        requested: String,
        supported: String,
    },

    #[error("failed to read frame: {0}")]
    Frame(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncoderError {
    #[error("no supported codec/container among [{}]", .tried.join(", "))]
    Unsupported { tried: Vec<String> },

    #[error("encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("could not connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("connection to {endpoint} lost: {reason}")]
    Lost { endpoint: String, reason: String },

    #[error("server at {endpoint} closed the connection")]
    ClosedUnexpectedly { endpoint: String },
}

/// Everything that can end a streaming session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Encoder(#[from] EncoderError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("pipeline is {0:?}; stop it before starting again")]
    Busy(PipelineState),

    #[error("enter server host and port first")]
    MissingEndpoint,
}

impl PipelineError {
    /// Short label for the status line.
    pub fn class(&self) -> &'static str {
        match self {
            PipelineError::Negotiation(_) => "negotiation",
            PipelineError::Capture(CaptureError::PermissionDenied(_)) => "permission",
            PipelineError::Capture(CaptureError::Overconstrained { .. }) => "negotiation",
            PipelineError::Capture(_) => "device",
            PipelineError::Encoder(_) => "encoder",
            PipelineError::Transport(_) => "transport",
            PipelineError::Busy(_) | PipelineError::MissingEndpoint => "config",
        }
    }
}
