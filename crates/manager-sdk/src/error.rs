use reqwest::StatusCode;
use thiserror::Error;

/// Why the manager refused a request outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentKind {
    /// 401/403: bad credentials, expired token, or missing tenant access.
    Auth,
    NotFound,
    /// 409: the identifier is already bound to something incompatible.
    Conflict,
    /// Any other 4xx.
    Rejected,
    /// The response body did not have the expected shape.
    Decode,
}

impl std::fmt::Display for PermanentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PermanentKind::Auth => "authentication failed",
            PermanentKind::NotFound => "not found",
            PermanentKind::Conflict => "conflict",
            PermanentKind::Rejected => "request rejected",
            PermanentKind::Decode => "unexpected response",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Network-level or server-side failure. Retried internally; only surfaces
    /// once the retry budget is spent.
    #[error("{operation}: manager unavailable after {attempts} attempt(s): {message}")]
    Transient {
        operation: String,
        attempts: u32,
        message: String,
    },
    /// Never retried.
    #[error("{operation}: {kind}{}: {message}", status_suffix(.status))]
    Permanent {
        operation: String,
        kind: PermanentKind,
        status: Option<u16>,
        message: String,
    },
}

impl ClientError {
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        ClientError::Transient {
            operation: operation.into(),
            attempts: 1,
            message: message.into(),
        }
    }

    pub fn permanent(
        operation: impl Into<String>,
        kind: PermanentKind,
        message: impl Into<String>,
    ) -> Self {
        ClientError::Permanent {
            operation: operation.into(),
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Maps a non-success HTTP status to the matching error class.
    pub fn from_status(operation: impl Into<String>, status: StatusCode, body: String) -> Self {
        let operation = operation.into();
        if is_transient_status(status) {
            return ClientError::Transient {
                operation,
                attempts: 1,
                message: format!("HTTP {}: {}", status.as_u16(), body),
            };
        }
        let kind = match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PermanentKind::Auth,
            StatusCode::NOT_FOUND => PermanentKind::NotFound,
            StatusCode::CONFLICT => PermanentKind::Conflict,
            _ => PermanentKind::Rejected,
        };
        ClientError::Permanent {
            operation,
            kind,
            status: Some(status.as_u16()),
            message: manager_message(&body),
        }
    }

    /// Send failures: connection refused, timeouts, resets are transient;
    /// a request that could not even be built is not.
    pub fn from_reqwest(operation: impl Into<String>, err: &reqwest::Error) -> Self {
        if err.is_builder() {
            ClientError::permanent(operation, PermanentKind::Rejected, err.to_string())
        } else if err.is_decode() {
            ClientError::permanent(operation, PermanentKind::Decode, err.to_string())
        } else {
            ClientError::transient(operation, err.to_string())
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient { .. })
    }

    pub fn kind(&self) -> Option<PermanentKind> {
        match self {
            ClientError::Permanent { kind, .. } => Some(*kind),
            ClientError::Transient { .. } => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == Some(PermanentKind::Conflict)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == Some(PermanentKind::NotFound)
    }

    pub fn message(&self) -> &str {
        match self {
            ClientError::Transient { message, .. } | ClientError::Permanent { message, .. } => {
                message
            }
        }
    }

    pub(crate) fn with_attempts(self, attempts: u32) -> Self {
        match self {
            ClientError::Transient {
                operation, message, ..
            } => ClientError::Transient {
                operation,
                attempts,
                message,
            },
            other => other,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

pub(crate) fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// The manager reports errors as `{"message": ..., "error_code": ...}`; fall
/// back to the raw body when it doesn't.
fn manager_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        let err = ClientError::from_status("get", StatusCode::BAD_GATEWAY, String::new());
        assert!(err.is_transient());
        let err = ClientError::from_status("get", StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(err.is_transient());
        let err = ClientError::from_status("get", StatusCode::UNAUTHORIZED, String::new());
        assert_eq!(err.kind(), Some(PermanentKind::Auth));
        let err = ClientError::from_status("get", StatusCode::FORBIDDEN, String::new());
        assert_eq!(err.kind(), Some(PermanentKind::Auth));
        let err = ClientError::from_status("put", StatusCode::CONFLICT, String::new());
        assert!(err.is_conflict());
        let err = ClientError::from_status("put", StatusCode::BAD_REQUEST, String::new());
        assert_eq!(err.kind(), Some(PermanentKind::Rejected));
    }

    #[test]
    fn extracts_manager_message() {
        let body = r#"{"message": "blueprint already exists", "error_code": "conflict_error"}"#;
        let err = ClientError::from_status("upload blueprint", StatusCode::CONFLICT, body.into());
        assert_eq!(err.message(), "blueprint already exists");
        assert_eq!(
            err.to_string(),
            "upload blueprint: conflict (HTTP 409): blueprint already exists"
        );
    }

    #[test]
    fn attempts_are_stamped_on_transient_only() {
        let err = ClientError::transient("poll", "reset").with_attempts(4);
        assert!(matches!(err, ClientError::Transient { attempts: 4, .. }));
        let err = ClientError::permanent("poll", PermanentKind::Auth, "nope").with_attempts(4);
        assert_eq!(err.kind(), Some(PermanentKind::Auth));
    }
}
