use thiserror::Error;
use truenas_client::ApiError;

/// Errors that abort an audit run.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("failed to get {resource}: {source}")]
    Fetch {
        resource: &'static str,
        #[source]
        source: ApiError,
    },
}

pub type Result<T> = std::result::Result<T, AuditError>;
