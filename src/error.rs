//! Error taxonomy for the route engine.
//!
//! Every engine failure is recoverable locally. Controllers catch these,
//! leave or reset state, and surface `status_line()` to the operator.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RouteError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// Transport failure, timeout, or an undecodable body
    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),

    /// The backend answered with a non-success status
    #[error("backend rejected request: HTTP {status}{}", fmt_body(.body))]
    BackendRejected { status: u16, body: String },

    /// No registered route for the (zone, wind) pair
    #[error("no route registered for zone {zone} with wind {wind}")]
    NotFound { zone: String, wind: String },

    /// The route exists but its device sequence is missing or empty
    #[error("policy unavailable for route {route_id}: {reason}")]
    PolicyUnavailable { route_id: i64, reason: String },

    /// A precondition of the requested operation does not hold
    #[error("{0}")]
    InvalidState(String),
}

fn fmt_body(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(" ({body})")
    }
}

impl RouteError {
    /// True for failures that say nothing about backend state.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::BackendUnreachable(_) | Self::BackendRejected { .. }
        )
    }

    /// Operator-facing one-liner for the presentation layer.
    pub fn status_line(&self, action: &str) -> String {
        format!("{action} failed: {self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_without_body_has_no_suffix() {
        let err = RouteError::BackendRejected {
            status: 503,
            body: String::new(),
        };
        assert_eq!(err.to_string(), "backend rejected request: HTTP 503");
    }

    #[test]
    fn rejected_with_body_includes_it() {
        let err = RouteError::BackendRejected {
            status: 409,
            body: "zone busy".into(),
        };
        assert_eq!(
            err.to_string(),
            "backend rejected request: HTTP 409 (zone busy)"
        );
    }

    #[test]
    fn transport_classification() {
        assert!(RouteError::BackendUnreachable("timeout".into()).is_transport());
        assert!(!RouteError::NotFound {
            zone: "5".into(),
            wind: "north".into()
        }
        .is_transport());
        assert!(!RouteError::InvalidState("x".into()).is_transport());
    }

    #[test]
    fn status_line_prefixes_action() {
        let err = RouteError::PolicyUnavailable {
            route_id: 9,
            reason: "empty device sequence".into(),
        };
        assert_eq!(
            err.status_line("Activation"),
            "Activation failed: policy unavailable for route 9: empty device sequence"
        );
    }
}
