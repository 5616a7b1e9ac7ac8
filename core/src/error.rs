use serde_json::Value;

/// Error taxonomy shared by the session, store, and write pipeline.
/// Every variant maps to a stable machine-readable code so the tool
/// boundary can report structured failures instead of crashing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The account handshake was rejected. Fatal for the session; carries
    /// the platform's decoded error payload verbatim.
    #[error("authentication rejected: {0}")]
    Auth(Value),

    /// The socket errored or closed. The session must be reopened by the
    /// caller; there is no automatic reconnect.
    #[error("transport failure: {0}")]
    Transport(String),

    /// No reply arrived within the call's deadline. The operation is not
    /// known to have been applied.
    #[error("call '{method}' timed out after {seconds}s")]
    Timeout { method: String, seconds: u64 },

    /// A project, issue, or comment lookup missed. The message lists valid
    /// alternatives where feasible.
    #[error("{0}")]
    NotFound(String),

    /// Workspace scoping could not be determined for a write.
    #[error("cannot determine workspace scoping: {0}")]
    Configuration(String),

    /// The platform returned a structured error over the socket; the raw
    /// payload is surfaced verbatim.
    #[error("platform error: {0}")]
    Api(Value),

    /// A backing-store call failed. Log/activity rows committed before the
    /// failing step are not rolled back.
    #[error("store call failed: {0}")]
    Store(#[from] sqlx::Error),
}

impl Error {
    /// Stable code string used in structured tool failure envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Auth(_) => "auth_rejected",
            Error::Transport(_) => "transport_failed",
            Error::Timeout { .. } => "timeout",
            Error::NotFound(_) => "not_found",
            Error::Configuration(_) => "configuration_error",
            Error::Api(_) => "platform_error",
            Error::Store(_) => "store_failed",
        }
    }

    /// Raw platform payload for Auth/Api errors, if any.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Error::Auth(value) | Error::Api(value) => Some(value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn codes_are_stable_per_variant() {
        assert_eq!(Error::Auth(json!({"code": "bad"})).code(), "auth_rejected");
        assert_eq!(
            Error::Transport("socket closed".into()).code(),
            "transport_failed"
        );
        assert_eq!(
            Error::Timeout {
                method: "findAll".into(),
                seconds: 30
            }
            .code(),
            "timeout"
        );
        assert_eq!(Error::NotFound("no such project".into()).code(), "not_found");
    }

    #[test]
    fn auth_and_api_errors_carry_the_raw_payload() {
        let payload = json!({"code": "platform:error:InvalidPassword"});
        let err = Error::Auth(payload.clone());
        assert_eq!(err.payload(), Some(&payload));
        assert!(Error::NotFound("x".into()).payload().is_none());
    }
}
