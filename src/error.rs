//! Error taxonomy for VPN operations.

use std::path::PathBuf;

/// Errors surfaced by [`crate::service::VpnService`] and its helpers.
///
/// Cleanup problems during disconnect are deliberately absent: those are
/// recorded as [`crate::core::cleanup::CleanupOutcome::Failed`] entries.
#[derive(Debug, thiserror::Error)]
pub enum VpnError {
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// The config file or a requested name does not have the expected shape.
    #[error("{0}")]
    Validation(String),

    /// A subprocess could not be started, exited non-zero, or timed out.
    #[error("{program}: {reason}")]
    ProcessLaunch { program: String, reason: String },

    /// The client was launched but never confirmed the tunnel.
    #[error("{0}")]
    VerificationTimeout(String),

    #[error("Another VPN operation is already queued, try again shortly")]
    Busy,

    #[error("Secret store error: {0}")]
    SecretStore(String),

    #[error("Configuration error in {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl VpnError {
    pub(crate) fn launch(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProcessLaunch {
            program: program.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = VpnError> = std::result::Result<T, E>;
