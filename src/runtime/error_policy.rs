//! # Error Policy
//!
//! Classification of Kubernetes API failures into retry / conflict / fatal
//! buckets, and the exit status a finished run maps to.

use crate::cluster::ClusterError;
use crate::controller::reporter::RunSummary;
use std::process::ExitCode;
use tracing::error;

/// Every item updated or already up to date
pub const EXIT_OK: u8 = 0;
/// At least one item failed or was skipped for a missing dependent
pub const EXIT_ITEMS_NOT_CURRENT: u8 = 1;
/// A fatal condition aborted the run
pub const EXIT_FATAL: u8 = 2;

/// Classify a kube client error
///
/// API status codes are authoritative. Errors that never reached the API
/// server (connection, TLS, auth plugin) are classified from their message,
/// the same way watch stream errors are.
pub fn classify_kube_error(err: &kube::Error) -> ClusterError {
    if let kube::Error::Api(status) = err {
        return classify_status(status.code, &status.reason, &status.message);
    }
    classify_message(&err.to_string())
}

/// Classify an HTTP status returned by the API server
pub fn classify_status(code: u16, reason: &str, message: &str) -> ClusterError {
    let detail = if reason.is_empty() {
        message.to_string()
    } else {
        format!("{reason}: {message}")
    };
    match code {
        401 | 403 => ClusterError::Unauthorized(detail),
        404 => ClusterError::NotFound,
        409 => ClusterError::Conflict,
        410 => ClusterError::Gone(detail),
        429 => ClusterError::Throttled(detail),
        _ => ClusterError::Transport(format!("HTTP {code} {detail}")),
    }
}

/// Classify an error that only carries a message
pub fn classify_message(error_string: &str) -> ClusterError {
    let is_401 = error_string.contains("401")
        || error_string.contains("Unauthorized")
        || error_string.contains("Forbidden");
    let is_410 = error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired");
    let is_429 = error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests");

    if is_401 {
        ClusterError::Unauthorized(error_string.to_string())
    } else if is_410 {
        ClusterError::Gone(error_string.to_string())
    } else if is_429 {
        ClusterError::Throttled(error_string.to_string())
    } else {
        ClusterError::Transport(error_string.to_string())
    }
}

/// Process exit status for a finished run
pub fn exit_code_for(summary: &RunSummary) -> ExitCode {
    let code = summary.exit_code();
    if code == EXIT_FATAL {
        if let Some(fatal) = &summary.fatal {
            error!(error = %fatal, "run aborted");
        }
    }
    ExitCode::from(code)
}
