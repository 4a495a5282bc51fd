// src/error.rs - Session-level error taxonomy
use thiserror::Error;

use crate::session::SessionState;

pub type Result<T, E = TryOnError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error)]
pub enum TryOnError {
    #[error("Camera access was denied: {0}")]
    PermissionDenied(String),

    #[error("Camera access requires a secure context, origin `{origin}` is not served over HTTPS or localhost")]
    InsecureContext { origin: String },

    #[error("No usable camera device: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to load garment asset `{url}`: {reason}")]
    AssetLoadFailure { url: String, reason: String },

    #[error("Pose backend failed to initialize (accelerated: {accelerated}; cpu: {cpu})")]
    BackendInitFailure { accelerated: String, cpu: String },

    #[error("Frame processing failed: {0}")]
    FrameFailure(String),

    #[error("Tracking failed on {frames} consecutive frames, last error: {last}")]
    TrackingFailure { frames: u32, last: String },

    #[error("Invalid session transition from {from:?} to {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Export failed: {0}")]
    Export(String),
}

impl TryOnError {
    pub fn asset(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::AssetLoadFailure {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether restarting the session unchanged has any chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PermissionDenied(_)
            | Self::DeviceUnavailable(_)
            | Self::AssetLoadFailure { .. }
            | Self::FrameFailure(_)
            | Self::TrackingFailure { .. }
            | Self::Export(_) => true,
            Self::InsecureContext { .. }
            | Self::BackendInitFailure { .. }
            | Self::InvalidTransition { .. }
            | Self::Config(_) => false,
        }
    }

    /// Short troubleshooting hint shown next to the error message.
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => {
                "Allow camera access for this application in the system privacy settings, then try again."
            }
            Self::InsecureContext { .. } => {
                "The try-on view must be served over HTTPS or from localhost. Retrying from the same origin will not help."
            }
            Self::DeviceUnavailable(_) => {
                "Check that a camera is connected and not in use by another application, then try again."
            }
            Self::AssetLoadFailure { .. } => {
                "The garment model could not be loaded. Try again or pick a different garment."
            }
            Self::BackendInitFailure { .. } => {
                "Pose detection is not supported with the current graphics driver or model files."
            }
            Self::FrameFailure(_) | Self::TrackingFailure { .. } => {
                "Tracking was interrupted. Restart the try-on session."
            }
            Self::InvalidTransition { .. } => "Restart the try-on session.",
            Self::Config(_) => "Fix the configuration file and restart.",
            Self::Export(_) => "Choose a different destination and try again.",
        }
    }

    /// Errors that end the session, as opposed to per-frame hiccups.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::FrameFailure(_) | Self::Export(_))
    }
}
