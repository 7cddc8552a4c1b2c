//! Error types for the Cardport core library.

use thiserror::Error;

/// All errors that can abort an import or a collection operation.
///
/// Per-record anomalies found while importing (wrong field count, empty
/// first field, repeated keys) are not errors; they are reported as
/// [`RecordDiagnostic`](crate::RecordDiagnostic) lines in the import log.
#[derive(Debug, Error)]
pub enum CardportError {
    /// A SQLite operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// An incoming model differs from the destination model of the same id,
    /// the destination already holds notes of it, and the caller did not
    /// authorise the change.
    #[error("Schema conflict: model '{model}' changed and has existing notes")]
    SchemaConflict { model: String },

    /// Writing a media file into the destination media store failed.
    #[error("Could not write media file '{filename}': {source}")]
    MediaWrite {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    /// A note ID was requested that does not exist in the collection.
    #[error("Note not found: {0}")]
    NoteNotFound(i64),

    /// A model ID was requested that does not exist in the collection.
    #[error("Model not found: {0}")]
    ModelNotFound(i64),

    /// The opened file is not a valid collection database.
    #[error("Invalid collection: {0}")]
    InvalidCollection(String),

    /// The package archive is missing required entries or is malformed.
    #[error("Invalid package: {0}")]
    InvalidPackage(String),

    /// An I/O operation on the filesystem failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored or packaged data could not be (de)serialised as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The package archive could not be read or written.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The delimited text source could not be parsed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Convenience alias that pins the error type to [`CardportError`].
pub type Result<T> = std::result::Result<T, CardportError>;

impl CardportError {
    /// Returns a short, human-readable message suitable for display to the end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Database(e) => format!("Failed to save: {e}"),
            Self::SchemaConflict { model } => format!(
                "The note type '{model}' in this file differs from yours. Allow schema changes to import it anyway."
            ),
            Self::MediaWrite { filename, .. } => format!("Could not save media file {filename}"),
            Self::NoteNotFound(_) => "Note no longer exists".to_string(),
            Self::ModelNotFound(_) => "Unknown note type".to_string(),
            Self::InvalidCollection(_) => "Could not open collection file".to_string(),
            Self::InvalidPackage(msg) => format!("Not a valid package: {msg}"),
            Self::Io(e) => format!("File error: {e}"),
            Self::Json(e) => format!("Data format error: {e}"),
            Self::Zip(e) => format!("Archive error: {e}"),
            Self::Csv(e) => format!("Could not read text file: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_conflict_names_model() {
        let e = CardportError::SchemaConflict { model: "Basic".to_string() };
        assert!(e.to_string().contains("Basic"));
        assert!(e.user_message().contains("Basic"));
    }

    #[test]
    fn test_media_write_keeps_source() {
        let e = CardportError::MediaWrite {
            filename: "foo.mp3".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(e.to_string().contains("foo.mp3"));
        assert!(std::error::Error::source(&e).is_some());
    }
}
