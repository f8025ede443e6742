//! Error types for the container storage engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("layer not known: {0}")]
    LayerUnknown(String),

    #[error("image not known: {0}")]
    ImageUnknown(String),

    #[error("container not known: {0}")]
    ContainerUnknown(String),

    #[error("id already in use: {0}")]
    DuplicateId(String),

    #[error("name already in use: {0}")]
    DuplicateName(String),

    #[error("parent layer not known: {0}")]
    ParentUnknown(String),

    #[error("layer {0} is in use by an image")]
    LayerUsedByImage(String),

    #[error("layer {0} is in use by a container")]
    LayerUsedByContainer(String),

    #[error("image {0} is in use by a container")]
    ImageUsedByContainer(String),

    #[error("parent {0} is an image, not a layer")]
    ParentIsImage(String),

    #[error("graph driver error: {0}")]
    Driver(String),

    #[error("persist error: {0}")]
    Persist(String),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("no layer specified")]
    NoLayerSpecified,

    #[error("{primary} (rollback also failed: {rollback})")]
    Compound {
        primary: Box<StoreError>,
        rollback: Box<StoreError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Wrap a primary failure together with the error from a failed
    /// compensating rollback, so callers never silently swallow the second
    /// failure.
    pub fn with_rollback_failure(primary: StoreError, rollback: StoreError) -> StoreError {
        StoreError::Compound {
            primary: Box::new(primary),
            rollback: Box::new(rollback),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_unknown_display() {
        let err = StoreError::LayerUnknown("abc123".to_string());
        let display = format!("{}", err);
        assert!(display.contains("layer not known"));
        assert!(display.contains("abc123"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StoreError = io_err.into();
        match err {
            StoreError::Io(_) => {}
            _ => panic!("expected Io variant"),
        }
    }

    #[test]
    fn test_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, serde_json::Error> =
            serde_json::from_str("{not json}");
        let json_err = result.unwrap_err();
        let err: StoreError = json_err.into();
        match err {
            StoreError::Json(_) => {}
            _ => panic!("expected Json variant"),
        }
    }

    #[test]
    fn test_compound_error_display() {
        let primary = StoreError::LayerUnknown("a".to_string());
        let rollback = StoreError::Persist("disk full".to_string());
        let err = StoreError::with_rollback_failure(primary, rollback);
        let display = format!("{}", err);
        assert!(display.contains("layer not known"));
        assert!(display.contains("rollback also failed"));
        assert!(display.contains("disk full"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StoreError>();
    }

    #[test]
    fn test_result_alias() {
        let ok: Result<u32> = Ok(7);
        assert_eq!(ok.unwrap(), 7);

        let err: Result<u32> = Err(StoreError::NoLayerSpecified);
        assert!(err.is_err());
    }
}
