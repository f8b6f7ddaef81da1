//! Error types for the Docker runtime adapter

use thiserror::Error;

use gantry_core::ports::AdapterError;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur when talking to the Docker Engine
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The Docker API call itself failed
    #[error("docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// The target container does not exist
    #[error("container not found: {0}")]
    NotFound(String),

    /// The daemon returned something the adapter cannot interpret
    #[error("unexpected docker response: {0}")]
    Unexpected(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Docker(bollard::errors::Error::DockerResponseServerError {
                status_code,
                ..
            }) => *status_code == 404,
            _ => false,
        }
    }
}

impl From<RuntimeError> for AdapterError {
    fn from(err: RuntimeError) -> Self {
        if err.is_not_found() {
            return AdapterError::NotFound(err.to_string());
        }

        match &err {
            RuntimeError::Docker(bollard::errors::Error::DockerResponseServerError {
                status_code,
                ..
            }) if *status_code < 500 => AdapterError::Fatal(err.to_string()),
            RuntimeError::Docker(_) => AdapterError::Transient(err.to_string()),
            _ => AdapterError::Fatal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_classification() {
        let err = RuntimeError::Docker(bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "no such container".to_string(),
        });
        assert!(err.is_not_found());
        assert!(matches!(AdapterError::from(err), AdapterError::NotFound(_)));

        let err = RuntimeError::Docker(bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "daemon exploded".to_string(),
        });
        assert!(!err.is_not_found());
        assert!(matches!(AdapterError::from(err), AdapterError::Transient(_)));

        let err = RuntimeError::Docker(bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message: "name conflict".to_string(),
        });
        assert!(matches!(AdapterError::from(err), AdapterError::Fatal(_)));
    }
}
