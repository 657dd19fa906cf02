use std::time::Duration;

use thiserror::Error;

/// Failure of a collaborator store query.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{operation} failed: {source}")]
    Database {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("{operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} returned malformed data: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn database(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Database { operation, source }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("report generation was cancelled")]
    Cancelled,

    #[error("report generation exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
}

impl ReportError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_name_the_failed_operation() {
        let err = StoreError::Backend {
            operation: "active member count",
            message: "connection reset".to_string(),
        };
        assert_eq!(err.to_string(), "active member count failed: connection reset");

        let wrapped = ReportError::from(err);
        assert_eq!(
            wrapped.to_string(),
            "active member count failed: connection reset"
        );
    }

    #[test]
    fn database_helper_keeps_source() {
        let err = StoreError::database("session query")(sqlx::Error::RowNotFound);
        assert!(matches!(
            err,
            StoreError::Database {
                operation: "session query",
                source: sqlx::Error::RowNotFound
            }
        ));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn configuration_message_is_prefixed() {
        let err = ReportError::configuration("organization id is required");
        assert_eq!(
            err.to_string(),
            "configuration error: organization id is required"
        );
    }
}
