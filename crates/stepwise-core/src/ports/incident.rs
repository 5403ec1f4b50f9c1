//! Incident reporting port - where operational failures are surfaced.

/// An operational failure that never reaches the end user as a denial but
/// must not be swallowed either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incident {
    /// Window store failed; the request was admitted anyway.
    StorageUnavailable { key: String, error: String },
    /// Upstream stream aborted after `partial_len` bytes were produced.
    UpstreamStream {
        action: String,
        caller_id: String,
        error: String,
        partial_len: usize,
    },
    /// The finished result could not be persisted.
    PersistenceFailed {
        action: String,
        caller_id: String,
        error: String,
    },
    /// The provider's output did not have the expected structure.
    MalformedOutput {
        action: String,
        caller_id: String,
        error: String,
    },
}

impl Incident {
    pub fn kind(&self) -> &'static str {
        match self {
            Incident::StorageUnavailable { .. } => "storage_unavailable",
            Incident::UpstreamStream { .. } => "upstream_stream",
            Incident::PersistenceFailed { .. } => "persistence_failed",
            Incident::MalformedOutput { .. } => "malformed_output",
        }
    }
}

/// Sink for incidents. Must not block the caller.
pub trait IncidentReporter: Send + Sync {
    fn report(&self, incident: Incident);
}

/// Reports incidents as tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogIncidents;

impl IncidentReporter for LogIncidents {
    fn report(&self, incident: Incident) {
        match &incident {
            Incident::StorageUnavailable { key, error } => {
                tracing::error!(kind = incident.kind(), key = %key, error = %error, "Window store unavailable, admitting request");
            }
            Incident::UpstreamStream {
                action,
                caller_id,
                error,
                partial_len,
            } => {
                tracing::error!(
                    kind = incident.kind(),
                    action = %action,
                    caller_id = %caller_id,
                    partial_len,
                    error = %error,
                    "Upstream stream aborted"
                );
            }
            Incident::PersistenceFailed {
                action,
                caller_id,
                error,
            } => {
                tracing::error!(kind = incident.kind(), action = %action, caller_id = %caller_id, error = %error, "Failed to persist result");
            }
            Incident::MalformedOutput {
                action,
                caller_id,
                error,
            } => {
                tracing::warn!(kind = incident.kind(), action = %action, caller_id = %caller_id, error = %error, "Could not understand provider output");
            }
        }
    }
}
