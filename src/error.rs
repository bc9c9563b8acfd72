//! Error types for activity import.
//!
//! This module provides error handling for the tracklog import library.
//! All errors implement the `std::error::Error` trait and include structured
//! context for debugging and recovery guidance.
//!
//! ## Error Categories
//!
//! - **File Errors**: Problems opening or reading a recording from disk
//! - **Format Errors**: Corrupt or malformed recording content (bad magic,
//!   CRC mismatch, truncated records, invalid XML/JSON)
//! - **Missing Metadata**: Recordings that decode but lack the metadata
//!   required to build an activity (no resolvable start time)
//! - **Unsupported Errors**: Files that are recognizable but not importable
//!   (wrong file type, unknown extension)
//! - **Continuation Errors**: Multi-part recordings whose earlier parts are
//!   missing from the batch
//!
//! Every error is fatal for the file that raised it and for that file only.
//! Recoverable field-level problems (an out-of-range coordinate, an invalid
//! sensor sentinel) never surface here; decoders degrade those fields to
//! absent values and keep going.
//!
//! ## Recovery
//!
//! Errors classify themselves so batch drivers can decide whether re-running
//! the same file could ever succeed:
//!
//! ```rust
//! use tracklog::ImportError;
//!
//! let error = ImportError::format_error("fit header", "bad magic");
//! if error.is_data_error() {
//!     println!("The file itself is at fault; retrying will not help");
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```
//!
//! ## Helper Constructors
//!
//! Use helper methods for common error scenarios:
//!
//! ```rust
//! use tracklog::ImportError;
//! use std::path::PathBuf;
//!
//! // File operations
//! let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
//! let file_error = ImportError::file_error(PathBuf::from("/rides/morning.fit"), io_err);
//!
//! // Malformed content
//! let format_error = ImportError::format_error("record header", "undefined local message 3");
//!
//! // Unusable metadata
//! let meta_error = ImportError::missing_metadata("start time", PathBuf::from("/rides/evening.sml"));
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for import operations.
pub type Result<T, E = ImportError> = std::result::Result<T, E>;

/// Main error type for import operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ImportError {
    #[error("recording file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed recording in {context}: {details}")]
    Format { context: String, details: String },

    #[error("recording {path} is missing required {field}")]
    MissingMetadata { field: String, path: PathBuf },

    #[error("unsupported recording {path}: {details}")]
    Unsupported { path: PathBuf, details: String },

    #[error("continuation part for '{stem}' cannot be attached: {details}")]
    Continuation { stem: String, details: String },
}

impl ImportError {
    /// Returns whether the file content itself is at fault.
    ///
    /// Data errors are deterministic: re-importing the same bytes will fail
    /// the same way. I/O errors may be transient (missing mount, permissions)
    /// and can succeed on a later attempt.
    pub fn is_data_error(&self) -> bool {
        match self {
            ImportError::File { .. } => false,
            ImportError::Format { .. } => true,
            ImportError::MissingMetadata { .. } => true,
            ImportError::Unsupported { .. } => true,
            ImportError::Continuation { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            ImportError::File { .. } => vec![
                "Check file exists and is readable",
                "Check file permissions",
                "Verify the device export completed",
            ],
            ImportError::Format { .. } => vec![
                "Verify the file was not truncated during transfer",
                "Re-export the recording from the device",
                "Check the file extension matches the actual format",
            ],
            ImportError::MissingMetadata { .. } => vec![
                "Verify the recording contains at least one timestamped sample",
                "Check the device clock was set when recording",
            ],
            ImportError::Unsupported { .. } => vec![
                "Check the file is an activity recording, not a settings or course file",
                "Verify the file extension",
            ],
            ImportError::Continuation { .. } => vec![
                "Import the first part of the recording before its continuations",
                "Include all parts of the recording in the same batch",
            ],
        }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        ImportError::File { path, source }
    }

    /// Helper constructor for malformed content errors.
    pub fn format_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        ImportError::Format { context: context.into(), details: details.into() }
    }

    /// Helper constructor for missing metadata errors.
    pub fn missing_metadata(field: impl Into<String>, path: PathBuf) -> Self {
        ImportError::MissingMetadata { field: field.into(), path }
    }

    /// Helper constructor for unsupported recording errors.
    pub fn unsupported(path: PathBuf, details: impl Into<String>) -> Self {
        ImportError::Unsupported { path, details: details.into() }
    }

    /// Helper constructor for continuation attachment errors.
    pub fn continuation(stem: impl Into<String>, details: impl Into<String>) -> Self {
        ImportError::Continuation { stem: stem.into(), details: details.into() }
    }
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[cfg(test)]
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_conversions_work_for_all_generated_variants(
            reason in ".*",
            field_name in "\\w+",
          ) {
            // Property: Error conversions work for all generated error variants

            // Test From<std::io::Error> conversion
            let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, reason.clone());
            let converted: ImportError = io_err.into();
            match converted {
              ImportError::File { source, .. } => {
                prop_assert_eq!(source.to_string(), reason.clone());
              }
              _ => prop_assert!(false, "Expected File error from io::Error conversion"),
            }

            // Test various error variant creations
            let format_err = ImportError::format_error(field_name.clone(), reason.clone());
            let meta_err = ImportError::missing_metadata(field_name.clone(), PathBuf::from("/a"));
            let cont_err = ImportError::continuation(field_name.clone(), reason.clone());

            // Property: All variants should be constructible and display correctly
            prop_assert!(!format_err.to_string().is_empty());
            prop_assert!(!meta_err.to_string().is_empty());
            prop_assert!(!cont_err.to_string().is_empty());
          }

          #[test]
          fn error_messages_format_correctly_with_arbitrary_context(
            context in "\\w+",
            details in "\\w+( \\w+)*",
            field_name in "\\w+",
            stem in "\\w+",
          ) {
            // Property: Error messages format correctly with arbitrary context strings
            let format_error = ImportError::Format { context: context.clone(), details: details.clone() };
            let meta_error = ImportError::MissingMetadata {
              field: field_name.clone(),
              path: PathBuf::from("/rides/test.fit"),
            };
            let unsupported_error = ImportError::Unsupported {
              path: PathBuf::from("/rides/test.fit"),
              details: details.clone(),
            };
            let continuation_error = ImportError::Continuation { stem: stem.clone(), details: details.clone() };

            // Property: All error messages should contain their context
            let format_msg = format_error.to_string();
            prop_assert!(format_msg.contains(&context));
            prop_assert!(format_msg.contains(&details));

            let meta_msg = meta_error.to_string();
            prop_assert!(meta_msg.contains(&field_name));

            let unsupported_msg = unsupported_error.to_string();
            prop_assert!(unsupported_msg.contains(&details));

            let continuation_msg = continuation_error.to_string();
            prop_assert!(continuation_msg.contains(&stem));

            // Property: No error message should be empty
            prop_assert!(!format_msg.is_empty());
            prop_assert!(!meta_msg.is_empty());
            prop_assert!(!unsupported_msg.is_empty());
            prop_assert!(!continuation_msg.is_empty());
          }

          #[test]
          fn data_error_classification_is_total(
            context in "\\w+",
            details in ".*",
          ) {
            // Property: Every variant classifies and suggests recovery actions
            let errors = vec![
              ImportError::file_error(
                PathBuf::from("/a"),
                std::io::Error::other(details.clone()),
              ),
              ImportError::format_error(context.clone(), details.clone()),
              ImportError::missing_metadata(context.clone(), PathBuf::from("/a")),
              ImportError::unsupported(PathBuf::from("/a"), details.clone()),
              ImportError::continuation(context.clone(), details.clone()),
            ];

            for error in errors {
              // Classification never panics and suggestions are always actionable
              let _ = error.is_data_error();
              let suggestions = error.recovery_suggestions();
              prop_assert!(!suggestions.is_empty());
              for suggestion in suggestions {
                prop_assert!(!suggestion.is_empty());
              }
            }
          }
        }
    }

    #[test]
    fn error_constructors_validation() {
        // Unit test: Simple error constructor validation
        let file_error = ImportError::file_error(
            PathBuf::from("/test"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "test"),
        );
        assert!(matches!(file_error, ImportError::File { .. }));

        let format_error = ImportError::format_error("fit header", "bad magic");
        assert!(matches!(format_error, ImportError::Format { .. }));

        let meta_error = ImportError::missing_metadata("start time", PathBuf::from("/test"));
        assert!(matches!(meta_error, ImportError::MissingMetadata { .. }));
    }

    #[test]
    fn error_traits_validation() {
        // Compile-time check: ImportError must be Send + Sync + 'static
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<ImportError>();

        // Runtime check: Error trait is implemented
        let error = ImportError::format_error("test", "test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn classification_separates_data_faults_from_io_faults() {
        let io_error = ImportError::file_error(
            PathBuf::from("/test"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"),
        );
        let format_error = ImportError::format_error("crc", "checksum mismatch");
        let unsupported = ImportError::unsupported(PathBuf::from("/test.hrm"), "unknown extension");

        assert!(!io_error.is_data_error());
        assert!(format_error.is_data_error());
        assert!(unsupported.is_data_error());

        assert!(!io_error.recovery_suggestions().is_empty());
        assert!(!format_error.recovery_suggestions().is_empty());
    }

    #[test]
    fn from_conversions_work() {
        // Test From trait implementations
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test file");
        let import_err: ImportError = io_err.into();

        match import_err {
            ImportError::File { source, path } => {
                assert_eq!(source.to_string(), "test file");
                assert_eq!(path, PathBuf::from("<unknown>"));
            }
            _ => panic!("Expected File error variant"),
        }
    }

    #[test]
    fn source_chain_preserves_io_cause() {
        let io_err = std::io::Error::other("device unplugged");
        let error = ImportError::file_error(PathBuf::from("/rides/a.fit"), io_err);

        let source = std::error::Error::source(&error).expect("File error carries a source");
        assert!(source.to_string().contains("device unplugged"));
    }
}
