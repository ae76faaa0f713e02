use thiserror::Error;

/// Error type shared across the beacon-rpc crates.
///
/// Variants follow the framework's error taxonomy: transport-level failures
/// are retryable, protocol- and application-level failures are not.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("decode error: {0}")]
    Decode(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("remote call failed: {0}")]
    Remote(String),

    #[error("local invocation failed: {0}")]
    LocalInvocation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// Whether a retry of the same call could plausibly succeed.
    ///
    /// Transient network conditions are retryable; malformed input and
    /// application failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::Transport(_) | RpcError::Timeout(_) | RpcError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(RpcError::Transport("refused".into()).is_retryable());
        assert!(RpcError::Timeout(5000).is_retryable());
        assert!(RpcError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset"
        ))
        .is_retryable());

        assert!(!RpcError::Decode("bad frame".into()).is_retryable());
        assert!(!RpcError::Protocol("unexpected payload".into()).is_retryable());
        assert!(!RpcError::ServiceNotFound("svc_1.0.0_".into()).is_retryable());
        assert!(!RpcError::Remote("boom".into()).is_retryable());
        assert!(!RpcError::LocalInvocation("boom".into()).is_retryable());
    }

    #[test]
    fn display_carries_context() {
        let err = RpcError::ServiceNotFound("com.ex.UserService_1.0.0_".into());
        assert_eq!(
            err.to_string(),
            "service not found: com.ex.UserService_1.0.0_"
        );
        assert_eq!(
            RpcError::Timeout(250).to_string(),
            "request timed out after 250ms"
        );
    }
}
