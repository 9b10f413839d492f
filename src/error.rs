//! Error taxonomy for the direct debit processor

/// Failures reported by the host collaborator (persistence, lookups).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("{entity} [{key}] not found")]
    NotFound { entity: &'static str, key: String },
    #[error("{0}")]
    Persistence(String),
    #[error("failed to encode/decode {entity}: {message}")]
    Codec { entity: &'static str, message: String },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SepaError {
    /// Fatal setup problems, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// User-correctable bank account data.
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },
    /// Submission/completion callbacks arrived in an order the workflow cannot accept.
    #[error("workflow ordering violation: {0}")]
    WorkflowOrdering(String),
    #[error("{entity} [{key}] not found")]
    NotFound { entity: &'static str, key: String },
    #[error("Couldn't create SEPA mandate. Error was: {0}")]
    MandateCreation(String),
    #[error(transparent)]
    Host(#[from] HostError),
}

impl SepaError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, SepaError::Configuration(_))
    }
    pub fn is_validation(&self) -> bool {
        matches!(self, SepaError::Validation { .. })
    }
    pub fn is_workflow_ordering(&self) -> bool {
        matches!(self, SepaError::WorkflowOrdering(_))
    }
}

impl From<sled::Error> for HostError {
    fn from(value: sled::Error) -> Self {
        HostError::Persistence(value.to_string())
    }
}
