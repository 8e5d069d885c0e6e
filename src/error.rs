use std::fmt;

use crate::storage::StorageError;

#[derive(Debug)]
pub enum RegistryError {
    NotFound(String),
    Conflict(String),
    BadRequest(String),
    InProgress,
    Tar(String),
    Io(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NotFound(what) => write!(f, "{what} not found"),
            RegistryError::Conflict(msg) => write!(f, "{msg}"),
            RegistryError::BadRequest(msg) => write!(f, "{msg}"),
            RegistryError::InProgress => write!(f, "Image is being uploaded, retry later"),
            RegistryError::Tar(msg) => write!(f, "Tar Error: {msg}"),
            RegistryError::Io(msg) => write!(f, "IO Error: {msg}"),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Io(err.to_string())
    }
}

impl From<StorageError> for RegistryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => RegistryError::NotFound("Blob".to_string()),
            StorageError::Io(msg) => RegistryError::Io(msg),
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::BadRequest(format!("Invalid JSON: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            RegistryError::NotFound("Image".to_string()).to_string(),
            "Image not found"
        );
        assert!(RegistryError::InProgress.to_string().contains("retry later"));
        assert!(RegistryError::Tar("truncated".to_string())
            .to_string()
            .contains("truncated"));
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: RegistryError = StorageError::NotFound.into();
        assert!(matches!(err, RegistryError::NotFound(_)));

        let err: RegistryError = StorageError::Io("disk full".to_string()).into();
        assert!(matches!(err, RegistryError::Io(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: RegistryError = io_err.into();
        assert!(matches!(err, RegistryError::Io(_)));
    }
}
