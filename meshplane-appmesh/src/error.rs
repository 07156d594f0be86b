//! Error types.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::clients::Operation;
use crate::snapshot::ResourceKind;

/// Errors returned by a [`MeshApi`](crate::clients::MeshApi) implementation.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The remote API reports the object does not exist.
    #[error("{kind} {name} not found")]
    NotFound { kind: ResourceKind, name: String },

    /// The remote API rejected the request.
    #[error("{code} (HTTP {status}): {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },

    /// The request did not complete.
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body could not be decoded.
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),

    /// The configured endpoint is not a usable base URL.
    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),

    /// Failure raised by an in-process implementation.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// True when the API reported the object as missing.
    ///
    /// Reconciliation code branches on this and nothing else; vendor error
    /// codes are mapped onto [`ApiError::NotFound`] by the client.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }
}

/// Problems with a desired snapshot, detected before any remote call.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse snapshot: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{kind} keyed as {key} is named {name}")]
    NameMismatch {
        kind: ResourceKind,
        key: String,
        name: String,
    },

    #[error("{kind} {name} belongs to mesh {found}, expected {expected}")]
    MeshMismatch {
        kind: ResourceKind,
        name: String,
        expected: String,
        found: String,
    },

    #[error("{kind} {name} references {target_kind} {target} which is not in the snapshot")]
    DanglingReference {
        kind: ResourceKind,
        name: String,
        target_kind: ResourceKind,
        target: String,
    },
}

/// Errors surfaced by the lister and reconcilers.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A single remote call failed.
    #[error("failed to {op} {kind} {name} in mesh {mesh}: {source}")]
    Operation {
        op: Operation,
        kind: ResourceKind,
        mesh: String,
        name: String,
        #[source]
        source: ApiError,
    },

    /// One or more listing tasks failed.
    #[error(transparent)]
    Listing(#[from] AggregateError),

    #[error("invalid snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    /// A listing task panicked or was cancelled.
    #[error("listing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ReconcileError {
    pub fn operation(
        op: Operation,
        kind: ResourceKind,
        mesh: &str,
        name: &str,
        source: ApiError,
    ) -> Self {
        ReconcileError::Operation {
            op,
            kind,
            mesh: mesh.to_string(),
            name: name.to_string(),
            source,
        }
    }

    /// True when the underlying remote failure was a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::Operation { source, .. } if source.is_not_found())
    }
}

/// Several independent failures reported as one error.
///
/// Every collected error is kept; the message lists how many occurred
/// followed by each message verbatim.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<ReconcileError>,
}

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: ReconcileError) {
        self.errors.push(err);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), AggregateError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.errors.len();
        let noun = if count == 1 { "error" } else { "errors" };
        write!(f, "{} {} occurred:", count, noun)?;
        for err in &self.errors {
            write!(f, "\n\t* {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_failure(name: &str, message: &str) -> ReconcileError {
        ReconcileError::operation(
            Operation::List,
            ResourceKind::Route,
            "mesh-a",
            name,
            ApiError::Internal(message.to_string()),
        )
    }

    #[test]
    fn test_aggregate_single_error() {
        let mut agg = AggregateError::new();
        agg.push(list_failure("vr-1", "throttled"));
        let msg = agg.to_string();
        assert!(msg.starts_with("1 error occurred:"));
        assert!(msg.contains("throttled"));
    }

    #[test]
    fn test_aggregate_keeps_every_message() {
        let mut agg = AggregateError::new();
        agg.push(list_failure("vr-1", "throttled"));
        agg.push(list_failure("vr-2", "connection reset"));

        let msg = agg.to_string();
        assert_eq!(agg.len(), 2);
        assert!(msg.starts_with("2 errors occurred:"));
        assert!(msg.contains("failed to list route vr-1 in mesh mesh-a: throttled"));
        assert!(msg.contains("failed to list route vr-2 in mesh mesh-a: connection reset"));
    }

    #[test]
    fn test_empty_aggregate_is_ok() {
        assert!(AggregateError::new().into_result().is_ok());

        let mut agg = AggregateError::new();
        agg.push(list_failure("vr-1", "throttled"));
        assert_eq!(agg.into_result().unwrap_err().len(), 1);
    }

    #[test]
    fn test_not_found_classification() {
        let missing = ReconcileError::operation(
            Operation::Describe,
            ResourceKind::Mesh,
            "mesh-a",
            "mesh-a",
            ApiError::NotFound {
                kind: ResourceKind::Mesh,
                name: "mesh-a".to_string(),
            },
        );
        assert!(missing.is_not_found());
        assert!(!list_failure("vr-1", "boom").is_not_found());
    }
}
