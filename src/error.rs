/// typed errors raised by the grid, the admin protocol and node configuration
///
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// the node's grid connection has been released
    #[error("node {0} is disconnected from the grid")]
    Disconnected(String),

    #[error("distributed object {id} exists as {existing}, requested as {requested}")]
    KindMismatch {
        id: String,
        existing: String,
        requested: String,
    },

    /// the caller's role may not perform the operation
    #[error("operation not permitted: {0}")]
    NotPermitted(String),

    #[error("{command} expects {expected} argument(s), found {found}")]
    MalformedArguments {
        command: String,
        expected: usize,
        found: usize,
    },

    #[error("unsupported admin command: {0}")]
    UnsupportedCommand(String),

    #[error("unknown distributed object kind: {0}")]
    UnknownObjectKind(String),

    #[error("distributed object not found: {0}")]
    ObjectNotFound(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// compare-and-set retries exhausted on a shared entry
    #[error("gave up updating {0} after concurrent modification")]
    Contention(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_arguments_display() {
        let err = CacheError::MalformedArguments {
            command: "REMOVE_LISTENER".to_string(),
            expected: 2,
            found: 1,
        };
        assert_eq!(
            err.to_string(),
            "REMOVE_LISTENER expects 2 argument(s), found 1"
        );
    }

    #[test]
    fn serde_error_conversion() {
        let bad = serde_json::from_str::<Vec<String>>("not json").unwrap_err();
        let err: CacheError = bad.into();
        assert!(matches!(err, CacheError::Serialization(_)));
        assert!(err.to_string().starts_with("serialization error"));
    }

    #[test]
    fn kind_mismatch_display() {
        let err = CacheError::KindMismatch {
            id: "foo".to_string(),
            existing: "MAP".to_string(),
            requested: "QUEUE".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "distributed object foo exists as MAP, requested as QUEUE"
        );
    }
}
