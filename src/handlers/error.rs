use tonic::{Code, Status};

use crate::repository::RepositoryError;

/// The four operations of the record surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Create,
    Get,
    Update,
    Delete,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Create => "create",
            Op::Get => "get",
            Op::Update => "update",
            Op::Delete => "delete",
        }
    }

    /// Fully-qualified gRPC method path; also used as the event type.
    pub fn method_path(self) -> &'static str {
        match self {
            Op::Create => "/record.v1.RecordService/CreateRecord",
            Op::Get => "/record.v1.RecordService/GetRecord",
            Op::Update => "/record.v1.RecordService/UpdateRecord",
            Op::Delete => "/record.v1.RecordService/DeleteRecord",
        }
    }
}

/// Failure of one handler invocation.
///
/// Classification lives in the variant and in the `operation` field, never
/// in the message text: operators key on the status code and the structured
/// fields, and the rendered message can change without breaking anything.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("name must be non-empty and rating must be at least 1")]
    InvalidRecordData,

    #[error("record {id} does not exist")]
    NotFound { id: i64 },

    #[error("{operation} failed: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: RepositoryError,
    },
}

impl HandlerError {
    /// Translate a repository failure for `op` against `id`.
    pub fn from_repository(op: Op, id: i64, source: RepositoryError) -> Self {
        match source {
            RepositoryError::NotFound => Self::NotFound { id },
            other => Self::storage(op, other),
        }
    }

    pub fn storage(op: Op, source: RepositoryError) -> Self {
        Self::Storage {
            operation: op.as_str(),
            source,
        }
    }

    /// Stable outcome label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRecordData => "invalid_argument",
            Self::NotFound { .. } => "not_found",
            Self::Storage { .. } => "internal",
        }
    }

    fn code(&self) -> Code {
        match self {
            Self::InvalidRecordData => Code::InvalidArgument,
            Self::NotFound { .. } => Code::NotFound,
            Self::Storage { .. } => Code::Internal,
        }
    }
}

impl From<HandlerError> for Status {
    fn from(error: HandlerError) -> Self {
        Status::new(error.code(), error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_not_found_maps_to_not_found() {
        let error = HandlerError::from_repository(Op::Update, 42, RepositoryError::NotFound);
        assert!(matches!(error, HandlerError::NotFound { id: 42 }));

        let status: Status = error.into();
        assert_eq!(status.code(), Code::NotFound);
        assert!(status.message().contains("42"));
    }

    #[test]
    fn test_other_repository_errors_map_to_internal() {
        let error = HandlerError::from_repository(
            Op::Delete,
            42,
            RepositoryError::Database(sqlx::Error::PoolTimedOut),
        );
        assert_eq!(error.kind(), "internal");

        let status: Status = error.into();
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().starts_with("delete failed"));
    }

    #[test]
    fn test_method_paths_are_fully_qualified() {
        assert_eq!(
            Op::Create.method_path(),
            "/record.v1.RecordService/CreateRecord"
        );
        assert_eq!(
            Op::Delete.method_path(),
            "/record.v1.RecordService/DeleteRecord"
        );
    }
}
