//! Error types at the public seams of the console core
//!
//! Only [`ClusterError`] ever fails an aggregation. Everything else is
//! absorbed into summary fields, per-record error strings or logs.

use std::time::Duration;

use thiserror::Error;

/// Fatal listing failure: the minimum viable view (nodes + pods) could not be built
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("failed to list nodes: {0}")]
    Nodes(#[source] anyhow::Error),

    #[error("failed to list pods: {0}")]
    Pods(#[source] anyhow::Error),
}

/// Failure of a single metrics call (one node, one exporter scrape)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetricsError {
    /// The caller is not allowed to read the endpoint (HTTP 401/403)
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Endpoint absent or not serving (404, 5xx, connection refused)
    #[error("metrics unavailable: {0}")]
    Unavailable(String),

    #[error("failed to decode metrics: {0}")]
    Decode(String),
}

impl MetricsError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, MetricsError::PermissionDenied(_))
    }

    /// Classify a kube client error by its HTTP status
    pub fn from_kube(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                401 | 403 => MetricsError::PermissionDenied(resp.message),
                _ => MetricsError::Unavailable(format!("{} ({})", resp.message, resp.code)),
            },
            kube::Error::SerdeError(e) => MetricsError::Decode(e.to_string()),
            other => MetricsError::Unavailable(other.to_string()),
        }
    }
}

/// Errors returned by the refresher's out-of-band operations
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("refresher is not running")]
    NotRunning,

    #[error("refresher is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Aggregation(#[from] ClusterError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "nodes \"n1\" is forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code,
        })
    }

    #[test]
    fn test_forbidden_maps_to_permission_denied() {
        assert!(MetricsError::from_kube(api_error(403)).is_permission_denied());
        assert!(MetricsError::from_kube(api_error(401)).is_permission_denied());
    }

    #[test]
    fn test_not_found_maps_to_unavailable() {
        let err = MetricsError::from_kube(api_error(404));
        assert!(matches!(err, MetricsError::Unavailable(_)));
        assert!(!err.is_permission_denied());
    }

    #[test]
    fn test_refresh_error_display() {
        assert_eq!(RefreshError::NotRunning.to_string(), "refresher is not running");
    }
}
